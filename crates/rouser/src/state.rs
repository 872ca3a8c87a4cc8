//! Live alarm state.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use rouse_core::Zone;
use rouse_rules::{ConditionExpression, RestingState};

/// An alarm with every parameter resolved to a concrete value.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedAlarm {
    /// `None` for ad-hoc alarms started without a definition name.
    pub name: Option<String>,
    pub start_conditions: Option<ConditionExpression>,
    pub stop_conditions: Option<ConditionExpression>,
    pub snooze_conditions: Option<ConditionExpression>,
    pub beep_on: Duration,
    /// Zero means steady on.
    pub beep_off: Duration,
    pub snooze: Duration,
    pub snooze_state: RestingState,
    pub zone: Zone,
}

impl ResolvedAlarm {
    pub fn label(&self) -> &str {
        self.name.as_deref().unwrap_or("<unnamed>")
    }
}

/// The rouser's current alarm.
///
/// Sounding and snoozed are separate variants, so an alarm can never carry
/// both an onset time and a snooze time.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum AlarmState {
    #[default]
    Idle,
    Sounding {
        alarm: ResolvedAlarm,
        onset: DateTime<Utc>,
    },
    Snoozed {
        alarm: ResolvedAlarm,
        since: DateTime<Utc>,
    },
}

impl AlarmState {
    pub fn alarm(&self) -> Option<&ResolvedAlarm> {
        match self {
            AlarmState::Idle => None,
            AlarmState::Sounding { alarm, .. } | AlarmState::Snoozed { alarm, .. } => Some(alarm),
        }
    }

    pub fn name(&self) -> Option<&str> {
        self.alarm().and_then(|a| a.name.as_deref())
    }

    pub fn phase(&self) -> AlarmPhase {
        match self {
            AlarmState::Idle => AlarmPhase::Idle,
            AlarmState::Sounding { .. } => AlarmPhase::Sounding,
            AlarmState::Snoozed { .. } => AlarmPhase::Snoozed,
        }
    }

    pub fn onset(&self) -> Option<DateTime<Utc>> {
        match self {
            AlarmState::Sounding { onset, .. } => Some(*onset),
            _ => None,
        }
    }

    pub fn snoozed_since(&self) -> Option<DateTime<Utc>> {
        match self {
            AlarmState::Snoozed { since, .. } => Some(*since),
            _ => None,
        }
    }
}

/// Sounding / snoozed / idle classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmPhase {
    Idle,
    Sounding,
    Snoozed,
}

/// Read-only snapshot for status reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlarmStatus {
    pub rouser: String,
    pub alarm: Option<String>,
    pub phase: AlarmPhase,
    pub onset: Option<DateTime<Utc>>,
    pub snoozed_since: Option<DateTime<Utc>>,
}

impl AlarmStatus {
    pub(crate) fn of(rouser: &str, state: &AlarmState) -> Self {
        Self {
            rouser: rouser.to_string(),
            alarm: state.name().map(str::to_string),
            phase: state.phase(),
            onset: state.onset(),
            snoozed_since: state.snoozed_since(),
        }
    }
}
