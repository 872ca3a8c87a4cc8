//! Condition evaluation against the clock and button history.
//!
//! Evaluation is total: a predicate that fails (bad time string, unknown
//! pin, dangling reference) counts as `false` for that predicate. The first
//! occurrence of each distinct failure is logged at warn level, repeats at
//! debug level, so a misconfigured condition does not flood the log once a
//! second.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use chrono::{DateTime, Datelike, NaiveTime, Utc};
use tracing::{debug, warn};

use rouse_core::{parse_weekday, secs_to_duration, to_chrono, ButtonEvent, Zone};

use crate::error::EvalError;
use crate::schema::{ConditionExpression, Predicate};

/// Maximum nesting of `ref` predicates.
pub const MAX_REF_DEPTH: usize = 8;

// ── Evaluation context ──────────────────────────────────────────────

/// Everything a predicate may look at.
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    /// The instant being evaluated.
    pub now: DateTime<Utc>,
    /// Zone for time-of-day and weekday predicates.
    pub zone: Zone,
    /// Button history keyed by input pin.
    pub inputs: &'a BTreeMap<u8, Vec<ButtonEvent>>,
}

impl<'a> EvalContext<'a> {
    pub fn new(now: DateTime<Utc>, zone: Zone, inputs: &'a BTreeMap<u8, Vec<ButtonEvent>>) -> Self {
        Self { now, zone, inputs }
    }

    /// Events on `pin`, or on every pin when `pin` is `None`.
    fn events(&self, pin: Option<u8>) -> Result<Vec<&'a ButtonEvent>, EvalError> {
        match pin {
            Some(p) => self
                .inputs
                .get(&p)
                .map(|events| events.iter().collect())
                .ok_or(EvalError::UnknownPin(p)),
            None => Ok(self.inputs.values().flatten().collect()),
        }
    }

    fn time_of_day(&self) -> NaiveTime {
        self.zone.wall_clock(self.now).time()
    }
}

// ── Evaluator ───────────────────────────────────────────────────────

/// Evaluates [`ConditionExpression`]s, resolving `ref` predicates against a
/// table of named expressions from configuration.
#[derive(Debug, Default)]
pub struct ConditionEvaluator {
    named: HashMap<String, ConditionExpression>,
    reported: Mutex<HashSet<String>>,
    errors: AtomicU64,
}

impl ConditionEvaluator {
    /// Create an evaluator with the given named expressions.
    pub fn new(named: HashMap<String, ConditionExpression>) -> Self {
        Self {
            named,
            reported: Mutex::new(HashSet::new()),
            errors: AtomicU64::new(0),
        }
    }

    /// Evaluate an expression. Never fails.
    ///
    /// Stops at the first fully-true clause, and within a clause at the
    /// first false predicate.
    pub fn evaluate(&self, expr: &ConditionExpression, ctx: &EvalContext<'_>) -> bool {
        self.evaluate_at_depth(expr, ctx, 0)
    }

    /// Evaluate a single predicate, surfacing any error.
    pub fn try_predicate(&self, predicate: &Predicate, ctx: &EvalContext<'_>) -> Result<bool, EvalError> {
        self.predicate(predicate, ctx, 0)
    }

    /// Total number of predicate failures collapsed to `false` so far.
    pub fn error_count(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Check that every `ref` in `expr` (followed transitively) names a
    /// defined expression.
    pub fn check_references(&self, expr: &ConditionExpression) -> Result<(), EvalError> {
        self.check_references_at_depth(expr, 0)
    }

    fn check_references_at_depth(&self, expr: &ConditionExpression, depth: usize) -> Result<(), EvalError> {
        for name in expr.references() {
            if depth >= MAX_REF_DEPTH {
                return Err(EvalError::DepthExceeded(MAX_REF_DEPTH));
            }
            let target = self
                .named
                .get(name)
                .ok_or_else(|| EvalError::UnknownReference(name.to_string()))?;
            self.check_references_at_depth(target, depth + 1)?;
        }
        Ok(())
    }

    fn evaluate_at_depth(&self, expr: &ConditionExpression, ctx: &EvalContext<'_>, depth: usize) -> bool {
        expr.clauses().iter().any(|clause| {
            clause
                .iter()
                .all(|predicate| match self.predicate(predicate, ctx, depth) {
                    Ok(value) => value,
                    Err(e) => {
                        self.report(&e);
                        false
                    }
                })
        })
    }

    fn report(&self, error: &EvalError) {
        self.errors.fetch_add(1, Ordering::Relaxed);
        let message = error.to_string();
        let first = self
            .reported
            .lock()
            .expect("evaluator lock poisoned")
            .insert(message.clone());
        if first {
            warn!(error = %message, "condition predicate failed, treating as false");
        } else {
            debug!(error = %message, "condition predicate failed again");
        }
    }

    fn predicate(&self, predicate: &Predicate, ctx: &EvalContext<'_>, depth: usize) -> Result<bool, EvalError> {
        match predicate {
            Predicate::Always => Ok(true),
            Predicate::Never => Ok(false),
            Predicate::After { time } => Ok(ctx.time_of_day() >= parse_time(time)?),
            Predicate::Before { time } => Ok(ctx.time_of_day() < parse_time(time)?),
            Predicate::Between { start, end } => {
                let (start, end) = (parse_time(start)?, parse_time(end)?);
                let t = ctx.time_of_day();
                Ok(if start <= end {
                    start <= t && t < end
                } else {
                    t >= start || t < end
                })
            }
            Predicate::Weekday { days } => {
                let today = ctx.zone.wall_clock(ctx.now).weekday();
                for day in days {
                    let wd = parse_weekday(day).ok_or_else(|| EvalError::UnknownWeekday(day.clone()))?;
                    if wd == today {
                        return Ok(true);
                    }
                }
                Ok(false)
            }
            Predicate::Presses {
                pin,
                at_least,
                within_secs,
            } => {
                let since = ctx.now - to_chrono(secs_to_duration(*within_secs));
                let count = ctx
                    .events(*pin)?
                    .into_iter()
                    .filter(|e| e.pressed_at > since && e.pressed_at <= ctx.now)
                    .count();
                Ok(count >= *at_least as usize)
            }
            Predicate::Held { pin, at_least_secs } => {
                let min = to_chrono(secs_to_duration(*at_least_secs));
                Ok(ctx
                    .events(*pin)?
                    .into_iter()
                    .any(|e| e.is_held() && e.held_for(ctx.now) >= min))
            }
            Predicate::LongPress {
                pin,
                at_least_secs,
                within_secs,
            } => {
                let min = to_chrono(secs_to_duration(*at_least_secs));
                let since = ctx.now - to_chrono(secs_to_duration(*within_secs));
                Ok(ctx.events(*pin)?.into_iter().any(|e| {
                    e.released_at.is_some_and(|r| r >= since && r <= ctx.now)
                        && e.held_for(ctx.now) >= min
                }))
            }
            Predicate::Ref { name } => {
                if depth >= MAX_REF_DEPTH {
                    return Err(EvalError::DepthExceeded(MAX_REF_DEPTH));
                }
                let target = self
                    .named
                    .get(name)
                    .ok_or_else(|| EvalError::UnknownReference(name.clone()))?;
                Ok(self.evaluate_at_depth(target, ctx, depth + 1))
            }
        }
    }
}

/// Parse `HH:MM` or `HH:MM:SS`.
fn parse_time(s: &str) -> Result<NaiveTime, EvalError> {
    let s = s.trim();
    NaiveTime::parse_from_str(s, "%H:%M:%S")
        .or_else(|_| NaiveTime::parse_from_str(s, "%H:%M"))
        .map_err(|_| EvalError::InvalidTime(s.to_string()))
}

// ── Tests ───────────────────────────────────────────────────────────
