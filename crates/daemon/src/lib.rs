//! The rouse daemon: configuration and the orchestrator loop that ties the
//! schedule, the rouser and external interfaces together.

pub mod config;
pub mod orchestrator;

pub use config::{ConfigError, DaemonConfig, HardwareConfig, ScheduleConfig};
pub use orchestrator::{Orchestrator, UpcomingAlarm};
