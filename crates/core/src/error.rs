use thiserror::Error;

/// Errors raised by hardware capabilities (actuators and the registry).
#[derive(Error, Debug)]
pub enum HardwareError {
    #[error("no actuator registered on pin {0}")]
    PinNotRegistered(u8),

    #[error("actuator on pin {pin} failed: {reason}")]
    Actuator { pin: u8, reason: String },

    #[error("{0}")]
    Other(String),
}

/// Result alias for hardware operations.
pub type HardwareResult<T> = std::result::Result<T, HardwareError>;

/// Errors raised while resolving a timezone name.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("unknown timezone: {0}")]
pub struct UnknownTimezone(pub String);
