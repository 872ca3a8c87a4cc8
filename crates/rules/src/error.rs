//! Predicate evaluation errors.

/// Why a single predicate could not be evaluated.
///
/// These never escape [`ConditionEvaluator::evaluate`](crate::ConditionEvaluator::evaluate);
/// the failing predicate counts as `false`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EvalError {
    #[error("invalid time of day '{0}' (expected HH:MM or HH:MM:SS)")]
    InvalidTime(String),

    #[error("unknown weekday '{0}'")]
    UnknownWeekday(String),

    #[error("input pin {0} is not configured")]
    UnknownPin(u8),

    #[error("unknown condition reference '{0}'")]
    UnknownReference(String),

    #[error("condition references nested deeper than {0}")]
    DepthExceeded(usize),
}
