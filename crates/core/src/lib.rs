//! Shared building blocks for the rouse alarm daemon.
//!
//! - Error taxonomy for hardware access
//! - Actuator / button capabilities and the process-wide [`HardwareRegistry`]
//! - Button press history consumed by condition predicates
//! - Timezone handling and human-readable duration parsing

pub mod duration;
pub mod error;
pub mod hardware;
pub mod input;
pub mod names;
pub mod zone;

pub use duration::{parse_duration, secs_to_duration, to_chrono};
pub use error::*;
pub use hardware::{
    Actuator, ActuatorMode, HardwareRegistry, InvertedActuator, SimulatedActuator,
};
pub use input::{ButtonEvent, InputHistory};
pub use names::{parse_month, parse_weekday};
pub use zone::Zone;
