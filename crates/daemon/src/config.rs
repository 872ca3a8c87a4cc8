//! Daemon configuration: one TOML file plus a few environment overrides.
//!
//! ```toml
//! [hardware]
//! output_pin = 2
//! input_pins = [21]
//!
//! [rouser]
//! name = "bedroom"
//!
//! [schedule]
//! path = "schedule.json"
//!
//! [conditions]
//! triple_press = [[{ kind = "presses", at_least = 3, within_secs = 10 }]]
//!
//! [alarms.weekday]
//! stop_conditions = [[{ kind = "ref", name = "triple_press" }]]
//!
//! [email.primary]
//! smtp_server = "smtp.example.com"
//! address = "rouse@example.com"
//! ```

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info};

use rouse_core::parse_duration;
use rouse_notify::EmailConfig;
use rouse_rouser::{AlarmDefinition, RouserConfig};
use rouse_rules::{ConditionEvaluator, ConditionExpression, EvalError};

/// Environment variable naming the config file.
pub const CONFIG_ENV: &str = "ROUSE_CONFIG";
pub const DEFAULT_CONFIG_PATH: &str = "rouse.toml";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value '{value}' for {key}")]
    Env { key: &'static str, value: String },

    #[error("toggle pin {0} is not listed in hardware.input_pins")]
    ToggleNotInput(u8),

    #[error("alarm '{alarm}': {source}")]
    Reference {
        alarm: String,
        #[source]
        source: EvalError,
    },

    #[error("{field} must be a non-negative number of seconds, got {value}")]
    NegativeDuration { field: String, value: f64 },
}

pub type Result<T> = std::result::Result<T, ConfigError>;

// ── Sections ────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct HardwareConfig {
    #[serde(default = "default_output_pin")]
    pub output_pin: u8,

    #[serde(default = "default_input_pins")]
    pub input_pins: Vec<u8>,

    /// Inputs that flip the actuator by hand while no alarm sounds.
    #[serde(default)]
    pub toggle_pins: Vec<u8>,

    /// Swap on/off for active-low outputs.
    #[serde(default)]
    pub invert_on_off: bool,
}

fn default_output_pin() -> u8 { 2 }
fn default_input_pins() -> Vec<u8> { vec![21] }

impl Default for HardwareConfig {
    fn default() -> Self {
        Self {
            output_pin: default_output_pin(),
            input_pins: default_input_pins(),
            toggle_pins: Vec::new(),
            invert_on_off: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_schedule_path")]
    pub path: PathBuf,

    /// An occurrence fires when it lies within this many seconds of now.
    #[serde(default = "default_trigger_window")]
    pub trigger_window_secs: u64,

    #[serde(default = "default_tick_ms")]
    pub tick_ms: u64,
}

fn default_schedule_path() -> PathBuf { PathBuf::from("schedule.json") }
fn default_trigger_window() -> u64 { 5 }
fn default_tick_ms() -> u64 { 1000 }

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            path: default_schedule_path(),
            trigger_window_secs: default_trigger_window(),
            tick_ms: default_tick_ms(),
        }
    }
}

impl ScheduleConfig {
    pub fn trigger_window(&self) -> Duration {
        Duration::from_secs(self.trigger_window_secs)
    }

    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }
}

// ── Top-level config ────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
pub struct DaemonConfig {
    #[serde(default)]
    pub hardware: HardwareConfig,

    #[serde(default)]
    pub rouser: RouserConfig,

    #[serde(default)]
    pub schedule: ScheduleConfig,

    /// Named expressions for `ref` predicates.
    #[serde(default)]
    pub conditions: HashMap<String, ConditionExpression>,

    #[serde(default)]
    pub alarms: BTreeMap<String, AlarmDefinition>,

    /// SMTP interfaces keyed by a short label.
    #[serde(default)]
    pub email: BTreeMap<String, EmailConfig>,
}

impl DaemonConfig {
    /// Resolve the config path: explicit argument, then `ROUSE_CONFIG`, then
    /// `rouse.toml` in the working directory.
    pub fn resolve_path(explicit: Option<&Path>) -> PathBuf {
        explicit
            .map(Path::to_path_buf)
            .or_else(|| env_opt(CONFIG_ENV).map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Read, apply environment overrides and validate.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let mut config = Self::parse(&text)?;
        config.apply_overrides(env_opt)?;
        config.validate()?;
        info!(
            path = %path.display(),
            alarms = config.alarms.len(),
            conditions = config.conditions.len(),
            interfaces = config.email.len(),
            "configuration loaded"
        );
        Ok(config)
    }

    /// Parse without touching the environment or validating.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Apply `ROUSE_*` overrides read through `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("ROUSE_SCHEDULE_PATH") {
            debug!(%path, "schedule path overridden from environment");
            self.schedule.path = PathBuf::from(path);
        }
        if let Some(value) = lookup("ROUSE_OUTPUT_PIN") {
            self.hardware.output_pin = value.trim().parse().map_err(|_| ConfigError::Env {
                key: "ROUSE_OUTPUT_PIN",
                value: value.clone(),
            })?;
        }
        if let Some(value) = lookup("ROUSE_TRIGGER_WINDOW_SECS") {
            self.schedule.trigger_window_secs =
                seconds(&value).ok_or_else(|| ConfigError::Env {
                    key: "ROUSE_TRIGGER_WINDOW_SECS",
                    value: value.clone(),
                })? as u64;
        }
        if let Some(value) = lookup("ROUSE_MAX_ACTIVE_SECS") {
            self.rouser.max_active_secs = seconds(&value).ok_or_else(|| ConfigError::Env {
                key: "ROUSE_MAX_ACTIVE_SECS",
                value: value.clone(),
            })?;
        }
        Ok(())
    }

    /// Check cross-references and ranges.
    pub fn validate(&self) -> Result<()> {
        if let Some(pin) = self
            .hardware
            .toggle_pins
            .iter()
            .find(|p| !self.hardware.input_pins.contains(p))
        {
            return Err(ConfigError::ToggleNotInput(*pin));
        }

        let rouser = &self.rouser;
        for (field, value) in [
            ("rouser.beep_on_secs", rouser.beep_on_secs),
            ("rouser.beep_off_secs", rouser.beep_off_secs),
            ("rouser.snooze_secs", rouser.snooze_secs),
            ("rouser.max_active_secs", rouser.max_active_secs),
        ] {
            non_negative(field.to_string(), value)?;
        }

        let evaluator = self.evaluator();
        for (name, expr) in &self.conditions {
            evaluator
                .check_references(expr)
                .map_err(|source| ConfigError::Reference {
                    alarm: format!("conditions.{name}"),
                    source,
                })?;
        }
        for (name, alarm) in &self.alarms {
            for expr in alarm.conditions() {
                evaluator
                    .check_references(expr)
                    .map_err(|source| ConfigError::Reference {
                        alarm: name.clone(),
                        source,
                    })?;
            }
            for (field, value) in [
                ("beep_on_secs", alarm.beep_on_secs),
                ("beep_off_secs", alarm.beep_off_secs),
                ("snooze_secs", alarm.snooze_secs),
            ] {
                if let Some(v) = value {
                    non_negative(format!("alarms.{name}.{field}"), v)?;
                }
            }
        }
        Ok(())
    }

    /// Evaluator over the `[conditions]` table.
    pub fn evaluator(&self) -> ConditionEvaluator {
        ConditionEvaluator::new(self.conditions.clone())
    }
}

fn env_opt(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|s| !s.is_empty())
}

/// Plain seconds (`"90"`, `"1.5"`) or a unit string (`"10m"`, `"1h30m"`).
fn seconds(value: &str) -> Option<f64> {
    let value = value.trim();
    match value.parse::<f64>() {
        Ok(secs) if secs.is_finite() && secs >= 0.0 => Some(secs),
        Ok(_) => None,
        Err(_) => parse_duration(value).map(|d| d.as_secs_f64()),
    }
}

fn non_negative(field: String, value: f64) -> Result<()> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NegativeDuration { field, value })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookup(pairs: &'static [(&'static str, &'static str)]) -> impl Fn(&str) -> Option<String> {
        move |key| {
            pairs
                .iter()
                .find(|(k, _)| *k == key)
                .map(|(_, v)| v.to_string())
        }
    }

    #[test]
    fn empty_file_uses_defaults() {
        let config = DaemonConfig::parse("").unwrap();
        assert_eq!(config.hardware.output_pin, 2);
        assert_eq!(config.hardware.input_pins, vec![21]);
        assert_eq!(config.schedule.path, PathBuf::from("schedule.json"));
        assert_eq!(config.schedule.trigger_window_secs, 5);
        assert_eq!(config.rouser.max_active_secs, 600.0);
        assert!(config.alarms.is_empty());
        config.validate().unwrap();
    }

    #[test]
    fn parses_conditions_and_alarms() {
        let config = DaemonConfig::parse(
            r#"
            [conditions]
            triple_press = [[{ kind = "presses", at_least = 3, within_secs = 10 }]]

            [alarms.weekday]
            beep_on_secs = 1.0
            stop_conditions = [[{ kind = "ref", name = "triple_press" }]]
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        let weekday = &config.alarms["weekday"];
        assert_eq!(weekday.beep_on_secs, Some(1.0));
        assert_eq!(
            weekday.stop_conditions.as_ref().unwrap().references().count(),
            1
        );
    }

    #[test]
    fn env_overrides_apply() {
        let mut config = DaemonConfig::default();
        config
            .apply_overrides(lookup(&[
                ("ROUSE_SCHEDULE_PATH", "/etc/rouse/schedule.json"),
                ("ROUSE_OUTPUT_PIN", "17"),
                ("ROUSE_TRIGGER_WINDOW_SECS", "10"),
                ("ROUSE_MAX_ACTIVE_SECS", "15m"),
            ]))
            .unwrap();
        assert_eq!(config.schedule.path, PathBuf::from("/etc/rouse/schedule.json"));
        assert_eq!(config.hardware.output_pin, 17);
        assert_eq!(config.schedule.trigger_window_secs, 10);
        assert_eq!(config.rouser.max_active_secs, 900.0);
    }

    #[test]
    fn bad_env_override_is_rejected() {
        let mut config = DaemonConfig::default();
        let err = config
            .apply_overrides(lookup(&[("ROUSE_OUTPUT_PIN", "gpio17")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { key: "ROUSE_OUTPUT_PIN", .. }));
    }

    #[test]
    fn toggle_pin_must_be_an_input() {
        let config = DaemonConfig::parse(
            r#"
            [hardware]
            input_pins = [21]
            toggle_pins = [20]
            "#,
        )
        .unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::ToggleNotInput(20))));
    }

    #[test]
    fn undefined_reference_is_rejected() {
        let config = DaemonConfig::parse(
            r#"
            [alarms.weekday]
            snooze_conditions = [[{ kind = "ref", name = "missing" }]]
            "#,
        )
        .unwrap();
        let err = config.validate().unwrap_err();
        assert!(
            matches!(&err, ConfigError::Reference { alarm, source: EvalError::UnknownReference(r) }
                if alarm == "weekday" && r == "missing"),
            "got: {err}"
        );
    }

    #[test]
    fn negative_durations_are_rejected() {
        let config = DaemonConfig::parse(
            r#"
            [alarms.weekday]
            snooze_secs = -1.0
            "#,
        )
        .unwrap();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::NegativeDuration { .. })
        ));

        let config = DaemonConfig::parse("[rouser]\nbeep_on_secs = -0.5\n").unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn seconds_accepts_numbers_and_units() {
        assert_eq!(seconds("90"), Some(90.0));
        assert_eq!(seconds(" 1.5 "), Some(1.5));
        assert_eq!(seconds("2m"), Some(120.0));
        assert_eq!(seconds("-3"), None);
        assert_eq!(seconds("soon"), None);
    }

    #[test]
    fn explicit_path_wins() {
        assert_eq!(
            DaemonConfig::resolve_path(Some(Path::new("/tmp/x.toml"))),
            PathBuf::from("/tmp/x.toml")
        );
    }
}
