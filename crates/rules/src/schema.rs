//! Serde schema for condition expressions.
//!
//! A condition expression is an ordered list of OR-clauses, each an ordered
//! list of AND-predicates:
//!
//! ```json
//! [
//!   [{"kind": "presses", "at_least": 3, "within_secs": 10}],
//!   [{"kind": "held", "at_least_secs": 5}, {"kind": "after", "time": "07:00"}]
//! ]
//! ```
//!
//! Predicates are plain data; they never carry executable code.

use serde::{Deserialize, Serialize};

// ── Predicates ──────────────────────────────────────────────────────

/// A single boolean test over the current time and button history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Predicate {
    /// Always true.
    Always,

    /// Always false.
    Never,

    /// Time of day is at or after `time` (`HH:MM[:SS]`).
    After { time: String },

    /// Time of day is before `time`.
    Before { time: String },

    /// Time of day lies in `[start, end)`. Wraps past midnight when `end < start`.
    Between { start: String, end: String },

    /// Today is one of `days` (`"mon"`, `"Tuesday"`, ...).
    Weekday { days: Vec<String> },

    /// At least `at_least` presses started within the last `within_secs`.
    /// `pin = None` counts every input.
    Presses {
        #[serde(default)]
        pin: Option<u8>,
        at_least: u32,
        within_secs: f64,
    },

    /// A button is currently held down for at least `at_least_secs`.
    Held {
        #[serde(default)]
        pin: Option<u8>,
        at_least_secs: f64,
    },

    /// A press of at least `at_least_secs` was released within the last `within_secs`.
    LongPress {
        #[serde(default)]
        pin: Option<u8>,
        at_least_secs: f64,
        within_secs: f64,
    },

    /// Evaluate the named condition expression from configuration.
    Ref { name: String },
}

// ── Expressions ─────────────────────────────────────────────────────

/// OR-of-AND condition expression.
///
/// True iff at least one clause has all of its predicates true. An
/// expression with no clauses is always false.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConditionExpression {
    clauses: Vec<Vec<Predicate>>,
}

impl ConditionExpression {
    pub fn new(clauses: Vec<Vec<Predicate>>) -> Self {
        Self { clauses }
    }

    /// A single-clause expression: all of `predicates` must hold.
    pub fn all_of(predicates: Vec<Predicate>) -> Self {
        Self {
            clauses: vec![predicates],
        }
    }

    /// The expression that never fires.
    pub fn never() -> Self {
        Self::default()
    }

    pub fn clauses(&self) -> &[Vec<Predicate>] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    /// Names of every `ref` predicate in this expression (not followed).
    pub fn references(&self) -> impl Iterator<Item = &str> {
        self.clauses.iter().flatten().filter_map(|p| match p {
            Predicate::Ref { name } => Some(name.as_str()),
            _ => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_clause_lists() {
        let expr: ConditionExpression = serde_json::from_str(
            r#"[
                [{"kind": "presses", "at_least": 3, "within_secs": 10}],
                [{"kind": "held", "pin": 21, "at_least_secs": 5},
                 {"kind": "after", "time": "07:00"}]
            ]"#,
        )
        .unwrap();

        assert_eq!(expr.clauses().len(), 2);
        assert_eq!(
            expr.clauses()[0][0],
            Predicate::Presses {
                pin: None,
                at_least: 3,
                within_secs: 10.0
            }
        );
        assert_eq!(
            expr.clauses()[1][0],
            Predicate::Held {
                pin: Some(21),
                at_least_secs: 5.0
            }
        );
    }

    #[test]
    fn unit_predicates_parse_from_kind_only() {
        let expr: ConditionExpression =
            serde_json::from_str(r#"[[{"kind": "always"}], [{"kind": "never"}]]"#).unwrap();
        assert_eq!(expr.clauses()[0], vec![Predicate::Always]);
        assert_eq!(expr.clauses()[1], vec![Predicate::Never]);
    }

    #[test]
    fn unknown_kind_is_rejected() {
        let result: Result<ConditionExpression, _> =
            serde_json::from_str(r#"[[{"kind": "lambda", "code": "True"}]]"#);
        assert!(result.is_err());
    }

    #[test]
    fn references_are_listed() {
        let expr = ConditionExpression::new(vec![
            vec![Predicate::Ref {
                name: "triple_press".into(),
            }],
            vec![
                Predicate::Always,
                Predicate::Ref {
                    name: "weekend".into(),
                },
            ],
        ]);
        let refs: Vec<&str> = expr.references().collect();
        assert_eq!(refs, vec!["triple_press", "weekend"]);
    }

    #[test]
    fn empty_expression_round_trips_as_empty_list() {
        let json = serde_json::to_string(&ConditionExpression::never()).unwrap();
        assert_eq!(json, "[]");
    }
}
