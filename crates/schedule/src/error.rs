//! Schedule parsing errors.

use rouse_core::UnknownTimezone;

/// Errors raised while reading or compiling a schedule document.
#[derive(Debug, thiserror::Error)]
pub enum ScheduleError {
    /// Filesystem I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed JSON or schema mismatch.
    #[error("JSON parse error: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Timezone(#[from] UnknownTimezone),

    #[error("unknown frequency: {0}")]
    UnknownFrequency(String),

    #[error("unknown weekday: {0}")]
    UnknownWeekday(String),

    #[error("unknown month: {0}")]
    UnknownMonth(String),

    #[error("invalid datetime: {0}")]
    InvalidDate(String),

    /// The recurrence rule was rejected by the rule builder.
    #[error("invalid recurrence rule: {0}")]
    Recurrence(String),
}

/// Result alias for schedule operations.
pub type Result<T> = std::result::Result<T, ScheduleError>;
