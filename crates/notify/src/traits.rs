//! Interface capability trait and shared error types.

use std::time::Duration;

use chrono::{DateTime, Utc};

use rouse_rouser::Rouser;

/// Errors raised by external interfaces.
#[derive(Debug, thiserror::Error)]
pub enum InterfaceError {
    #[error("SMTP delivery failed: {0}")]
    Smtp(String),

    #[error("Template rendering failed: {0}")]
    Template(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    #[error("Interface not started")]
    NotStarted,
}

/// What an interface may look at and act on during [`Interface::check`].
///
/// Interfaces reach the alarm only through the rouser's public operations
/// (`start_alarm`, `stop_alarm`, `status`, ...).
pub struct InterfaceContext<'a> {
    pub rouser: &'a Rouser,
    pub now: DateTime<Utc>,
}

/// An external collaborator polled by the orchestrator: a notification or
/// command channel.
///
/// All three methods may fail; the orchestrator logs failures and carries on.
pub trait Interface: Send {
    /// Short label for logs (e.g. `"email:primary"`).
    fn name(&self) -> &str;

    /// Establish connections. Fails fast on missing or invalid configuration.
    fn startup(&mut self) -> Result<(), InterfaceError>;

    /// Poll once. Must be idempotent and return promptly when nothing is pending.
    fn check(&mut self, ctx: &InterfaceContext<'_>) -> Result<(), InterfaceError>;

    /// Release resources.
    fn shutdown(&mut self) -> Result<(), InterfaceError>;
}

/// A rendered message ready for delivery.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Message {
    pub subject: String,
    pub body: String,
}
