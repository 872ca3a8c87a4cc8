//! Recurrence engine: compiled rule-sets answering "next occurrence at or
//! after this instant".
//!
//! Each recurrence rule expands independently from its own anchor (the
//! fixed epoch 2000-01-01 00:00:00 in the document timezone, with any
//! `dtstart` fields overlaid). Candidates from every rule and every explicit
//! `rdate` are merged; a candidate matching an exclusion rule or an exclusion
//! date is skipped and the search resumes one second later.

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Month, NaiveDateTime, TimeZone, Utc, Weekday};
use rrule::{Frequency, NWeekday, RRule, RRuleSet};
use tracing::{debug, warn};

use rouse_core::{parse_month, parse_weekday, Zone};
use rouse_rules::AlarmParameters;

use crate::document::{
    epoch_anchor, NameOrNumber, RuleSetSpec, RuleSpec, ScheduleDocument, WeekdaySpec,
};
use crate::error::{Result, ScheduleError};

/// Consecutive excluded candidates tolerated before a rule-set is treated
/// as exhausted.
const MAX_EXCLUDED_SKIPS: usize = 10_000;

fn one_second() -> chrono::Duration {
    chrono::Duration::seconds(1)
}

fn rrule_tz(zone: Zone) -> rrule::Tz {
    match zone {
        Zone::Local => rrule::Tz::Local(chrono::Local),
        Zone::Named(tz) => rrule::Tz::Tz(tz),
    }
}

// ── Field conversion ────────────────────────────────────────────────

fn frequency(spec: Option<&NameOrNumber>) -> Result<Frequency> {
    let Some(spec) = spec else {
        return Ok(Frequency::Daily);
    };
    // Numeric values follow dateutil's constants.
    let freq = match spec {
        NameOrNumber::Number(0) => Frequency::Yearly,
        NameOrNumber::Number(1) => Frequency::Monthly,
        NameOrNumber::Number(2) => Frequency::Weekly,
        NameOrNumber::Number(3) => Frequency::Daily,
        NameOrNumber::Number(4) => Frequency::Hourly,
        NameOrNumber::Number(5) => Frequency::Minutely,
        NameOrNumber::Number(6) => Frequency::Secondly,
        NameOrNumber::Name(name) => match name.trim().to_ascii_lowercase().as_str() {
            "yearly" => Frequency::Yearly,
            "monthly" => Frequency::Monthly,
            "weekly" => Frequency::Weekly,
            "daily" => Frequency::Daily,
            "hourly" => Frequency::Hourly,
            "minutely" => Frequency::Minutely,
            "secondly" => Frequency::Secondly,
            _ => return Err(ScheduleError::UnknownFrequency(name.clone())),
        },
        NameOrNumber::Number(_) => return Err(ScheduleError::UnknownFrequency(spec.to_string())),
    };
    Ok(freq)
}

fn weekday(spec: &NameOrNumber) -> Result<Weekday> {
    let parsed = match spec {
        NameOrNumber::Number(n) => u8::try_from(*n)
            .ok()
            .and_then(|n| Weekday::try_from(n).ok()),
        NameOrNumber::Name(name) => parse_weekday(name),
    };
    parsed.ok_or_else(|| ScheduleError::UnknownWeekday(spec.to_string()))
}

fn month(spec: &NameOrNumber) -> Result<Month> {
    let parsed = match spec {
        NameOrNumber::Number(n) => u8::try_from(*n).ok().and_then(|n| Month::try_from(n).ok()),
        NameOrNumber::Name(name) => parse_month(name),
    };
    parsed.ok_or_else(|| ScheduleError::UnknownMonth(spec.to_string()))
}

fn nweekday(spec: &WeekdaySpec) -> Result<NWeekday> {
    Ok(match spec {
        WeekdaySpec::Every(day) => NWeekday::Every(weekday(day)?),
        WeekdaySpec::Nth(day, n) => NWeekday::Nth(*n, weekday(day)?),
    })
}

/// Length of one period for sub-daily frequencies.
fn sub_daily_period(freq: Frequency) -> Option<chrono::Duration> {
    match freq {
        Frequency::Hourly => Some(chrono::Duration::hours(1)),
        Frequency::Minutely => Some(chrono::Duration::minutes(1)),
        Frequency::Secondly => Some(chrono::Duration::seconds(1)),
        _ => None,
    }
}

// ── Expansion of one rule ───────────────────────────────────────────

/// Parameters for moving a sub-daily rule's start forward by whole
/// intervals, so expansion does not walk every hour/minute/second since the
/// anchor. Only used for rules without `count`, where the start does not
/// change the grid.
#[derive(Debug, Clone)]
struct Rebase {
    anchor: NaiveDateTime,
    step: chrono::Duration,
}

/// One recurrence rule expanded from its own anchor.
#[derive(Debug, Clone)]
struct Expansion {
    spec: RuleSpec,
    set: RRuleSet,
    tz: rrule::Tz,
    rebase: Option<Rebase>,
}

impl Expansion {
    fn compile(spec: &RuleSpec, zone: Zone) -> Result<Self> {
        let tz = rrule_tz(zone);
        let freq = frequency(spec.freq.as_ref())?;
        let anchor = match &spec.dtstart {
            Some(fields) => fields.overlay(epoch_anchor())?,
            None => epoch_anchor(),
        };
        let set = build(spec, zone, localize(&tz, anchor)?)?;

        let rebase = match (sub_daily_period(freq), spec.count) {
            (Some(period), None) => Some(Rebase {
                anchor,
                step: period * i32::from(spec.interval.unwrap_or(1).max(1)),
            }),
            _ => None,
        };

        Ok(Self {
            spec: spec.clone(),
            set,
            tz,
            rebase,
        })
    }

    /// Earliest generated instant at or after `from`.
    fn first_at_or_after(&self, from: DateTime<Utc>, zone: Zone) -> Option<DateTime<Utc>> {
        let set = self.rebased_for(from, zone).unwrap_or_else(|| self.set.clone());
        // Step back a second so the bound holds whether `after` is inclusive or not.
        set.after((from - one_second()).with_timezone(&self.tz))
            .all(3)
            .dates
            .into_iter()
            .map(|d| d.with_timezone(&Utc))
            .find(|d| *d >= from)
    }

    /// Whether `at` is one of this rule's instants.
    fn contains(&self, at: DateTime<Utc>, zone: Zone) -> bool {
        let set = self.rebased_for(at, zone).unwrap_or_else(|| self.set.clone());
        set.after((at - one_second()).with_timezone(&self.tz))
            .before((at + one_second()).with_timezone(&self.tz))
            .all(4)
            .dates
            .iter()
            .any(|d| d.with_timezone(&Utc) == at)
    }

    fn rebased_for(&self, from: DateTime<Utc>, zone: Zone) -> Option<RRuleSet> {
        let rebase = self.rebase.as_ref()?;
        let elapsed = (zone.wall_clock(from) - rebase.anchor).num_seconds();
        let step = rebase.step.num_seconds().max(1);
        // Keep one spare interval before `from` so DST shifts never skip a hit.
        let periods = (elapsed / step - 1).max(0);
        if periods == 0 {
            return None;
        }
        let start = rebase.anchor + chrono::Duration::seconds(periods * step);
        let start = localize(&self.tz, start).ok()?;
        build(&self.spec, zone, start).ok()
    }
}

fn build(spec: &RuleSpec, zone: Zone, start: DateTime<rrule::Tz>) -> Result<RRuleSet> {
    let mut rule = RRule::new(frequency(spec.freq.as_ref())?);

    if let Some(interval) = spec.interval {
        rule = rule.interval(interval.max(1));
    }
    if let Some(count) = spec.count {
        rule = rule.count(count);
    }
    if let Some(until) = &spec.until {
        // UTC is the only UNTIL zone rrule accepts for every start zone.
        rule = rule.until(until.resolve(zone)?.with_timezone(&rrule::Tz::UTC));
    }
    if let Some(months) = &spec.bymonth {
        let months = months
            .as_slice()
            .iter()
            .map(month)
            .collect::<Result<Vec<_>>>()?;
        rule = rule.by_month(&months);
    }
    if let Some(days) = &spec.bymonthday {
        rule = rule.by_month_day(days.as_slice().to_vec());
    }
    if let Some(days) = &spec.byweekday {
        let days = days
            .as_slice()
            .iter()
            .map(nweekday)
            .collect::<Result<Vec<_>>>()?;
        rule = rule.by_weekday(days);
    }
    if let Some(hours) = &spec.byhour {
        rule = rule.by_hour(hours.as_slice().to_vec());
    }
    if let Some(minutes) = &spec.byminute {
        rule = rule.by_minute(minutes.as_slice().to_vec());
    }
    if let Some(seconds) = &spec.bysecond {
        rule = rule.by_second(seconds.as_slice().to_vec());
    }
    if let Some(positions) = &spec.bysetpos {
        rule = rule.by_set_pos(positions.as_slice().to_vec());
    }
    if let Some(wkst) = &spec.wkst {
        rule = rule.week_start(weekday(wkst)?);
    }

    rule.build(start)
        .map_err(|e| ScheduleError::Recurrence(e.to_string()))
}

fn localize(tz: &rrule::Tz, naive: NaiveDateTime) -> Result<DateTime<rrule::Tz>> {
    tz.from_local_datetime(&naive)
        .earliest()
        .ok_or_else(|| ScheduleError::InvalidDate(format!("{naive} does not exist in this timezone")))
}

// ── Rule-set ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy)]
struct Memo {
    from: DateTime<Utc>,
    next: Option<DateTime<Utc>>,
}

/// A compiled recurrence definition bound to alarm parameters.
///
/// Immutable after compilation apart from the next-occurrence memo.
#[derive(Debug)]
pub struct RuleSet {
    zone: Zone,
    rrules: Vec<Expansion>,
    exrules: Vec<Expansion>,
    rdates: Vec<DateTime<Utc>>,
    exdates: BTreeSet<DateTime<Utc>>,
    parameters: Arc<AlarmParameters>,
    memo: Mutex<Option<Memo>>,
}

impl RuleSet {
    /// Compile one rule-set. `extra_exdates` are document-wide exclusions.
    pub fn compile(
        spec: &RuleSetSpec,
        zone: Zone,
        extra_exdates: &[DateTime<Utc>],
    ) -> Result<Self> {
        let rrules = spec
            .rrules
            .iter()
            .map(|r| Expansion::compile(r, zone))
            .collect::<Result<Vec<_>>>()?;
        let exrules = spec
            .exrules
            .iter()
            .map(|r| Expansion::compile(r, zone))
            .collect::<Result<Vec<_>>>()?;

        let mut rdates = spec
            .rdates
            .iter()
            .map(|d| d.resolve(zone))
            .collect::<Result<Vec<_>>>()?;
        rdates.sort();
        rdates.dedup();

        let mut exdates = spec
            .exdates
            .iter()
            .map(|d| d.resolve(zone))
            .collect::<Result<BTreeSet<_>>>()?;
        exdates.extend(extra_exdates.iter().copied());

        Ok(Self {
            zone,
            rrules,
            exrules,
            rdates,
            exdates,
            parameters: Arc::new(spec.parameters.clone()),
            memo: Mutex::new(None),
        })
    }

    pub fn parameters(&self) -> &Arc<AlarmParameters> {
        &self.parameters
    }

    /// Whether `at` is removed by an exclusion date or exclusion rule.
    pub fn is_excluded(&self, at: DateTime<Utc>) -> bool {
        self.exdates.contains(&at) || self.exrules.iter().any(|r| r.contains(at, self.zone))
    }

    /// Earliest non-excluded occurrence at or after `threshold`, or `None`
    /// once the rules are exhausted.
    pub fn next_occurrence(&self, threshold: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut memo = self.memo.lock().expect("rule-set memo lock poisoned");
        if let Some(m) = *memo {
            let hit = match m.next {
                Some(next) => m.from <= threshold && threshold <= next,
                None => m.from <= threshold,
            };
            if hit {
                return m.next;
            }
        }
        let next = self.compute_next(threshold);
        *memo = Some(Memo {
            from: threshold,
            next,
        });
        next
    }

    /// Up to `n` consecutive occurrences starting at `threshold`.
    pub fn occurrences_from(&self, threshold: DateTime<Utc>, n: usize) -> Vec<DateTime<Utc>> {
        let mut out = Vec::with_capacity(n);
        let mut from = threshold;
        while out.len() < n {
            let Some(next) = self.compute_next(from) else {
                break;
            };
            out.push(next);
            from = next + one_second();
        }
        out
    }

    fn first_candidate(&self, from: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let from_rules = self
            .rrules
            .iter()
            .filter_map(|r| r.first_at_or_after(from, self.zone))
            .min();
        let idx = self.rdates.partition_point(|d| *d < from);
        let from_rdates = self.rdates.get(idx).copied();
        from_rules.into_iter().chain(from_rdates).min()
    }

    fn compute_next(&self, threshold: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let mut from = threshold;
        for _ in 0..=MAX_EXCLUDED_SKIPS {
            let candidate = self.first_candidate(from)?;
            if !self.is_excluded(candidate) {
                return Some(candidate);
            }
            debug!(%candidate, "occurrence excluded, searching on");
            from = candidate + one_second();
        }
        warn!(
            %threshold,
            skips = MAX_EXCLUDED_SKIPS,
            "every candidate occurrence was excluded, treating rule-set as exhausted"
        );
        None
    }
}

// ── Whole schedule ──────────────────────────────────────────────────

/// Where an occurrence came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OccurrenceSource {
    /// Index into the document's `rrule_sets`.
    RuleSet(usize),
    /// A one-off `exceptions.include` entry.
    Inclusion,
}

/// One concrete instant at which an alarm should fire.
#[derive(Debug, Clone)]
pub struct Occurrence {
    pub at: DateTime<Utc>,
    pub parameters: Arc<AlarmParameters>,
    pub source: OccurrenceSource,
}

impl Occurrence {
    /// Alarm name carried by the occurrence's parameters.
    pub fn name(&self) -> Option<&str> {
        self.parameters.name()
    }
}

/// A compiled schedule document.
#[derive(Debug, Default)]
pub struct Schedule {
    zone: Zone,
    rule_sets: Vec<RuleSet>,
    /// Sorted by instant.
    inclusions: Vec<(DateTime<Utc>, Arc<AlarmParameters>)>,
}

impl Schedule {
    /// Compile a parsed document. Any malformed entry fails the whole document.
    pub fn compile(doc: &ScheduleDocument) -> Result<Self> {
        let zone = Zone::parse(doc.timezone.as_deref())?;

        let excluded = doc
            .exceptions
            .exclude
            .iter()
            .map(|d| d.resolve(zone))
            .collect::<Result<Vec<_>>>()?;

        let rule_sets = doc
            .rrule_sets
            .iter()
            .map(|spec| RuleSet::compile(spec, zone, &excluded))
            .collect::<Result<Vec<_>>>()?;

        let mut inclusions = doc
            .exceptions
            .include
            .iter()
            .map(|inc| Ok((inc.datetime.resolve(zone)?, Arc::new(inc.parameters.clone()))))
            .collect::<Result<Vec<_>>>()?;
        inclusions.sort_by_key(|(at, _)| *at);

        Ok(Self {
            zone,
            rule_sets,
            inclusions,
        })
    }

    pub fn zone(&self) -> Zone {
        self.zone
    }

    pub fn rule_sets(&self) -> &[RuleSet] {
        &self.rule_sets
    }

    /// The earliest occurrence of every rule-set plus every inclusion at or
    /// after `threshold`, sorted ascending.
    pub fn due_candidates(&self, threshold: DateTime<Utc>) -> Vec<Occurrence> {
        let mut out: Vec<Occurrence> = self
            .rule_sets
            .iter()
            .enumerate()
            .filter_map(|(i, rs)| {
                rs.next_occurrence(threshold).map(|at| Occurrence {
                    at,
                    parameters: Arc::clone(rs.parameters()),
                    source: OccurrenceSource::RuleSet(i),
                })
            })
            .collect();
        out.extend(self.inclusions_from(threshold));
        out.sort_by_key(|o| o.at);
        out
    }

    /// Earliest occurrence at or after `threshold`, across the whole schedule.
    pub fn next_occurrence(&self, threshold: DateTime<Utc>) -> Option<Occurrence> {
        self.due_candidates(threshold).into_iter().next()
    }

    /// The next `n` occurrences at or after `threshold`, in order.
    pub fn upcoming(&self, threshold: DateTime<Utc>, n: usize) -> Vec<Occurrence> {
        let mut out: Vec<Occurrence> = self
            .rule_sets
            .iter()
            .enumerate()
            .flat_map(|(i, rs)| {
                rs.occurrences_from(threshold, n)
                    .into_iter()
                    .map(move |at| Occurrence {
                        at,
                        parameters: Arc::clone(rs.parameters()),
                        source: OccurrenceSource::RuleSet(i),
                    })
            })
            .collect();
        out.extend(self.inclusions_from(threshold).take(n));
        out.sort_by_key(|o| o.at);
        out.truncate(n);
        out
    }

    fn inclusions_from(&self, threshold: DateTime<Utc>) -> impl Iterator<Item = Occurrence> + '_ {
        let idx = self.inclusions.partition_point(|(at, _)| *at < threshold);
        self.inclusions[idx..].iter().map(|(at, params)| Occurrence {
            at: *at,
            parameters: Arc::clone(params),
            source: OccurrenceSource::Inclusion,
        })
    }
}
