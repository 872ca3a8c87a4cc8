//! Alarm definitions and rouser-wide defaults.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use rouse_core::secs_to_duration;
use rouse_rules::{AlarmSettings, RestingState};

/// A named, reusable alarm profile from configuration.
///
/// Same shape as the per-occurrence overrides; fields left unset fall
/// through to the rouser defaults.
pub type AlarmDefinition = AlarmSettings;

/// Rouser settings (`[rouser]` in the daemon config).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouserConfig {
    /// Used in log lines only.
    #[serde(default = "default_name")]
    pub name: String,

    #[serde(default = "default_beep_on")]
    pub beep_on_secs: f64,

    #[serde(default = "default_beep_off")]
    pub beep_off_secs: f64,

    #[serde(default = "default_snooze")]
    pub snooze_secs: f64,

    #[serde(default)]
    pub snooze_state: RestingState,

    /// Hard ceiling on how long an alarm may sound without being snoozed.
    #[serde(default = "default_max_active")]
    pub max_active_secs: f64,

    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,

    /// How long completed button presses are kept for condition evaluation.
    #[serde(default = "default_input_retention")]
    pub input_retention_secs: u64,
}

fn default_name() -> String { "rouser".to_string() }
fn default_beep_on() -> f64 { 0.5 }
fn default_beep_off() -> f64 { 0.5 }
fn default_snooze() -> f64 { 600.0 }
fn default_max_active() -> f64 { 600.0 }
fn default_tick_ms() -> u64 { 1000 }
fn default_input_retention() -> u64 { 86_400 }

impl Default for RouserConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            beep_on_secs: default_beep_on(),
            beep_off_secs: default_beep_off(),
            snooze_secs: default_snooze(),
            snooze_state: RestingState::default(),
            max_active_secs: default_max_active(),
            tick_ms: default_tick_ms(),
            input_retention_secs: default_input_retention(),
        }
    }
}

impl RouserConfig {
    /// The process-wide layer of the parameter merge.
    pub fn defaults(&self) -> AlarmSettings {
        AlarmSettings {
            beep_on_secs: Some(self.beep_on_secs),
            beep_off_secs: Some(self.beep_off_secs),
            snooze_secs: Some(self.snooze_secs),
            snooze_state: Some(self.snooze_state),
            ..Default::default()
        }
    }

    pub fn max_active(&self) -> Duration {
        secs_to_duration(self.max_active_secs)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    pub fn input_retention(&self) -> Duration {
        Duration::from_secs(self.input_retention_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_table_uses_defaults() {
        let config: RouserConfig = toml::from_str("").unwrap();
        assert_eq!(config.name, "rouser");
        assert_eq!(config.snooze_secs, 600.0);
        assert_eq!(config.max_active(), Duration::from_secs(600));
        assert_eq!(config.tick(), Duration::from_secs(1));
        assert_eq!(config.snooze_state, RestingState::Off);
    }

    #[test]
    fn defaults_fill_every_timing_field() {
        let config = RouserConfig {
            beep_on_secs: 0.25,
            ..Default::default()
        };
        let layer = config.defaults();
        assert_eq!(layer.beep_on_secs, Some(0.25));
        assert_eq!(layer.beep_off_secs, Some(0.5));
        assert_eq!(layer.snooze_secs, Some(600.0));
        assert!(layer.stop_conditions.is_none());
    }
}
