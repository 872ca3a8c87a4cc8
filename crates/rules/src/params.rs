//! Alarm parameter bundles.
//!
//! [`AlarmSettings`] is the set of optional knobs an alarm can carry. It is
//! used both for named alarm definitions in configuration and for the
//! per-occurrence overrides attached to schedule entries; final values are
//! resolved by layering overrides over the definition over process defaults.

use serde::{Deserialize, Serialize};

use crate::schema::ConditionExpression;

/// What the actuator does while an alarm is snoozed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestingState {
    #[default]
    Off,
    On,
}

/// Optional alarm knobs; `None` means "inherit from the next layer".
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AlarmSettings {
    #[serde(default)]
    pub start_conditions: Option<ConditionExpression>,
    #[serde(default)]
    pub stop_conditions: Option<ConditionExpression>,
    #[serde(default)]
    pub snooze_conditions: Option<ConditionExpression>,
    /// Seconds the actuator is on per beep.
    #[serde(default, alias = "on_time")]
    pub beep_on_secs: Option<f64>,
    /// Seconds the actuator is off between beeps; `0` means steady on.
    #[serde(default, alias = "off_time")]
    pub beep_off_secs: Option<f64>,
    /// Seconds a snooze lasts before the alarm resumes.
    #[serde(default, alias = "snooze_time")]
    pub snooze_secs: Option<f64>,
    #[serde(default)]
    pub snooze_state: Option<RestingState>,
    /// IANA timezone for time-of-day conditions and log timestamps.
    #[serde(default)]
    pub timezone: Option<String>,
}

impl AlarmSettings {
    /// Field-wise merge: values from `self` win, gaps are filled from `fallback`.
    pub fn or(&self, fallback: &AlarmSettings) -> AlarmSettings {
        AlarmSettings {
            start_conditions: self
                .start_conditions
                .clone()
                .or_else(|| fallback.start_conditions.clone()),
            stop_conditions: self
                .stop_conditions
                .clone()
                .or_else(|| fallback.stop_conditions.clone()),
            snooze_conditions: self
                .snooze_conditions
                .clone()
                .or_else(|| fallback.snooze_conditions.clone()),
            beep_on_secs: self.beep_on_secs.or(fallback.beep_on_secs),
            beep_off_secs: self.beep_off_secs.or(fallback.beep_off_secs),
            snooze_secs: self.snooze_secs.or(fallback.snooze_secs),
            snooze_state: self.snooze_state.or(fallback.snooze_state),
            timezone: self.timezone.clone().or_else(|| fallback.timezone.clone()),
        }
    }

    /// Every condition expression present in these settings.
    pub fn conditions(&self) -> impl Iterator<Item = &ConditionExpression> {
        [
            &self.start_conditions,
            &self.stop_conditions,
            &self.snooze_conditions,
        ]
        .into_iter()
        .flatten()
    }
}

/// A request to start an alarm: an optional definition name plus overrides.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AlarmParameters {
    /// Name of the alarm definition to inherit from (and the alarm's identity).
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub settings: AlarmSettings,
}

impl AlarmParameters {
    /// Start the named alarm with no overrides.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            settings: AlarmSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: AlarmSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}
