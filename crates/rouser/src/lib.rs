//! The alarm state machine ("rouser").
//!
//! A [`Rouser`] owns one actuator and a table of named alarm definitions.
//! It exposes start / resume / snooze / stop and runs a one-second tick that
//! applies start, snooze and stop conditions plus a hard ceiling on how long
//! an alarm may sound.

pub mod definition;
pub mod machine;
pub mod state;

pub use definition::{AlarmDefinition, RouserConfig};
pub use machine::Rouser;
pub use state::{AlarmPhase, AlarmState, AlarmStatus, ResolvedAlarm};
