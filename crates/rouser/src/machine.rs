use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use rouse_core::{
    secs_to_duration, to_chrono, Actuator, HardwareRegistry, HardwareResult, InputHistory, Zone,
};
use rouse_rules::{
    AlarmParameters, ConditionEvaluator, ConditionExpression, EvalContext, RestingState,
};

use crate::definition::{AlarmDefinition, RouserConfig};
use crate::state::{AlarmState, AlarmStatus, ResolvedAlarm};

#[cfg(test)]
mod tests;

/// Drives one actuator through Idle → Sounding ⇄ Snoozed → Idle.
///
/// Every transition happens under a single mutex, so the tick thread and
/// external callers (interfaces, button callbacks) never interleave.
pub struct Rouser {
    config: RouserConfig,
    output: Arc<dyn Actuator>,
    inputs: Arc<InputHistory>,
    toggle_pins: Vec<u8>,
    alarms: BTreeMap<String, AlarmDefinition>,
    evaluator: Arc<ConditionEvaluator>,
    state: Mutex<AlarmState>,
    running: AtomicBool,
}

impl Rouser {
    /// Bind a rouser to the actuator registered on `output_pin`.
    ///
    /// Fails if the registry has no actuator on that pin.
    pub fn new(
        config: RouserConfig,
        hardware: &HardwareRegistry,
        output_pin: u8,
    ) -> HardwareResult<Self> {
        let output = hardware.output(output_pin)?;
        Ok(Self {
            config,
            output,
            inputs: hardware.inputs(),
            toggle_pins: Vec::new(),
            alarms: BTreeMap::new(),
            evaluator: Arc::new(ConditionEvaluator::default()),
            state: Mutex::new(AlarmState::Idle),
            running: AtomicBool::new(true),
        })
    }

    pub fn with_alarms(mut self, alarms: BTreeMap<String, AlarmDefinition>) -> Self {
        self.alarms = alarms;
        self
    }

    /// Evaluator holding the named condition table for `ref` predicates.
    pub fn with_evaluator(mut self, evaluator: Arc<ConditionEvaluator>) -> Self {
        self.evaluator = evaluator;
        self
    }

    /// Pins whose presses flip the actuator while no alarm is sounding.
    pub fn with_toggle_pins(mut self, pins: Vec<u8>) -> Self {
        self.toggle_pins = pins;
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn alarms(&self) -> &BTreeMap<String, AlarmDefinition> {
        &self.alarms
    }

    // ── Parameter resolution ────────────────────────────────────────

    /// Merge call-time overrides over the named definition over the
    /// rouser defaults.
    pub fn resolve(&self, params: &AlarmParameters) -> ResolvedAlarm {
        let definition = params.name().and_then(|n| self.alarms.get(n));
        if let (Some(name), None) = (params.name(), definition) {
            debug!(alarm = name, "no definition for alarm, using overrides and defaults");
        }
        let merged = match definition {
            Some(def) => params.settings.or(def),
            None => params.settings.clone(),
        }
        .or(&self.config.defaults());

        let zone = Zone::parse(merged.timezone.as_deref()).unwrap_or_else(|e| {
            warn!(error = %e, "falling back to local time for alarm");
            Zone::Local
        });

        ResolvedAlarm {
            name: params.name.clone(),
            start_conditions: merged.start_conditions,
            stop_conditions: merged.stop_conditions,
            snooze_conditions: merged.snooze_conditions,
            beep_on: secs_to_duration(merged.beep_on_secs.unwrap_or(self.config.beep_on_secs)),
            beep_off: secs_to_duration(merged.beep_off_secs.unwrap_or(self.config.beep_off_secs)),
            snooze: secs_to_duration(merged.snooze_secs.unwrap_or(self.config.snooze_secs)),
            snooze_state: merged.snooze_state.unwrap_or(self.config.snooze_state),
            zone,
        }
    }

    // ── Operations ──────────────────────────────────────────────────

    /// Start an alarm. A no-op (returning `false`) if an alarm with the same
    /// name is already active.
    pub fn start_alarm(&self, params: &AlarmParameters) -> bool {
        self.start_alarm_at(params, Utc::now())
    }

    pub fn start_alarm_at(&self, params: &AlarmParameters, now: DateTime<Utc>) -> bool {
        let mut state = self.lock();
        self.start_locked(&mut state, params, now)
    }

    /// Leave Snoozed for Sounding. Returns `false` unless snoozed.
    pub fn resume_alarm(&self) -> bool {
        self.resume_alarm_at(Utc::now())
    }

    pub fn resume_alarm_at(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.lock();
        self.resume_locked(&mut state, now)
    }

    /// Leave Sounding for Snoozed. Returns `false` unless sounding.
    pub fn snooze_alarm(&self) -> bool {
        self.snooze_alarm_at(Utc::now())
    }

    pub fn snooze_alarm_at(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.lock();
        self.snooze_locked(&mut state, now)
    }

    /// Stop whatever is active. The actuator is switched off even when idle.
    /// Returns `true` if an alarm was active.
    pub fn stop_alarm(&self) -> bool {
        let mut state = self.lock();
        self.stop_locked(&mut state)
    }

    /// Name of the active alarm, if any.
    pub fn current_name(&self) -> Option<String> {
        self.lock().name().map(str::to_string)
    }

    pub fn state(&self) -> AlarmState {
        self.lock().clone()
    }

    pub fn status(&self) -> AlarmStatus {
        AlarmStatus::of(&self.config.name, &self.lock())
    }

    // ── Buttons ─────────────────────────────────────────────────────

    /// Hardware callback for a button press.
    pub fn handle_press(&self, pin: u8, at: DateTime<Utc>) {
        if !self.toggle_pins.contains(&pin) {
            self.inputs.press(pin, at);
            return;
        }
        let state = self.lock();
        if matches!(*state, AlarmState::Sounding { .. }) {
            debug!(pin, "toggle ignored while sounding");
            return;
        }
        let result = if self.output.is_active() {
            self.output.off()
        } else {
            self.output.on()
        };
        self.check_hardware(result, "toggle");
    }

    /// Hardware callback for a button release.
    pub fn handle_release(&self, pin: u8, at: DateTime<Utc>) {
        if !self.toggle_pins.contains(&pin) {
            self.inputs.release(pin, at);
        }
    }

    // ── Loop ────────────────────────────────────────────────────────

    /// One pass of the control loop.
    pub fn tick(&self) {
        self.tick_at(Utc::now());
    }

    pub fn tick_at(&self, now: DateTime<Utc>) {
        let inputs = self.inputs.snapshot();
        let mut state = self.lock();

        // Start conditions are independent of the schedule.
        for (name, definition) in &self.alarms {
            let Some(conditions) = &definition.start_conditions else {
                continue;
            };
            let zone = Zone::parse(definition.timezone.as_deref()).unwrap_or_default();
            if self.holds(conditions, now, zone, &inputs) {
                debug!(alarm = %name, "start conditions met");
                self.start_locked(&mut state, &AlarmParameters::named(name.clone()), now);
            }
        }

        let resume = matches!(
            &*state,
            AlarmState::Snoozed { alarm, since } if now >= *since + to_chrono(alarm.snooze)
        );
        if resume {
            self.resume_locked(&mut state, now);
        }

        let snooze = match &*state {
            AlarmState::Sounding { alarm, .. } => alarm
                .snooze_conditions
                .as_ref()
                .is_some_and(|c| self.holds(c, now, alarm.zone, &inputs)),
            _ => false,
        };
        if snooze {
            self.snooze_locked(&mut state, now);
        }

        let stop = state.alarm().is_some_and(|alarm| {
            alarm
                .stop_conditions
                .as_ref()
                .is_some_and(|c| self.holds(c, now, alarm.zone, &inputs))
        });
        if stop {
            self.stop_locked(&mut state);
        }

        let overdue = state
            .onset()
            .is_some_and(|onset| now >= onset + to_chrono(self.config.max_active()));
        if overdue {
            warn!(
                rouser = %self.config.name,
                alarm = state.name().unwrap_or("<unnamed>"),
                max_active_secs = self.config.max_active_secs,
                "alarm exceeded maximum active duration"
            );
            self.stop_locked(&mut state);
        }
        drop(state);

        let cutoff = now - to_chrono(self.config.input_retention());
        let pruned = self.inputs.prune_before(cutoff);
        if pruned > 0 {
            debug!(pruned, "pruned old button events");
        }
    }

    /// Run the control loop on the current thread until [`shutdown`](Self::shutdown).
    pub fn run(&self) {
        info!(rouser = %self.config.name, alarms = self.alarms.len(), "rouser loop running");
        while self.running.load(Ordering::Relaxed) {
            std::thread::sleep(self.config.tick());
            if !self.running.load(Ordering::Relaxed) {
                break;
            }
            self.tick();
        }
        info!(rouser = %self.config.name, "rouser loop stopped");
    }

    /// Stop any active alarm and end the loop after the current tick.
    pub fn shutdown(&self) {
        info!(rouser = %self.config.name, "shutting down rouser");
        self.stop_alarm();
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    // ── Internals ───────────────────────────────────────────────────

    fn lock(&self) -> std::sync::MutexGuard<'_, AlarmState> {
        self.state.lock().expect("alarm state lock poisoned")
    }

    fn holds(
        &self,
        conditions: &ConditionExpression,
        now: DateTime<Utc>,
        zone: Zone,
        inputs: &BTreeMap<u8, Vec<rouse_core::ButtonEvent>>,
    ) -> bool {
        self.evaluator
            .evaluate(conditions, &EvalContext::new(now, zone, inputs))
    }

    fn start_locked(
        &self,
        state: &mut AlarmState,
        params: &AlarmParameters,
        now: DateTime<Utc>,
    ) -> bool {
        if let Some(name) = params.name() {
            if state.name() == Some(name) {
                return false;
            }
        }
        let alarm = self.resolve(params);
        info!(
            rouser = %self.config.name,
            alarm = %alarm.label(),
            local_time = %alarm.zone.wall_clock(now),
            timezone = %alarm.zone,
            "starting alarm"
        );
        self.sound(&alarm);
        *state = AlarmState::Sounding { alarm, onset: now };
        true
    }

    fn resume_locked(&self, state: &mut AlarmState, now: DateTime<Utc>) -> bool {
        match std::mem::take(state) {
            AlarmState::Snoozed { alarm, .. } => {
                info!(rouser = %self.config.name, alarm = %alarm.label(), "resuming alarm");
                self.sound(&alarm);
                *state = AlarmState::Sounding { alarm, onset: now };
                true
            }
            other => {
                *state = other;
                false
            }
        }
    }

    fn snooze_locked(&self, state: &mut AlarmState, now: DateTime<Utc>) -> bool {
        match std::mem::take(state) {
            AlarmState::Sounding { alarm, .. } => {
                info!(
                    rouser = %self.config.name,
                    alarm = %alarm.label(),
                    snooze_secs = alarm.snooze.as_secs_f64(),
                    "snoozing alarm"
                );
                let result = match alarm.snooze_state {
                    RestingState::Off => self.output.off(),
                    RestingState::On => self.output.on(),
                };
                self.check_hardware(result, "snooze");
                *state = AlarmState::Snoozed { alarm, since: now };
                true
            }
            other => {
                *state = other;
                false
            }
        }
    }

    fn stop_locked(&self, state: &mut AlarmState) -> bool {
        let result = self.output.off();
        self.check_hardware(result, "stop");
        match std::mem::take(state) {
            AlarmState::Idle => false,
            active => {
                if let Some(alarm) = active.alarm() {
                    info!(rouser = %self.config.name, alarm = %alarm.label(), "stopping alarm");
                }
                true
            }
        }
    }

    fn sound(&self, alarm: &ResolvedAlarm) {
        let result = if alarm.beep_off.is_zero() {
            self.output.on()
        } else {
            self.output.beep(alarm.beep_on, alarm.beep_off)
        };
        self.check_hardware(result, "sound");
    }

    /// Actuator failures never block a transition; the state still moves
    /// so the machine does not wedge on a flaky output.
    fn check_hardware(&self, result: HardwareResult<()>, action: &str) {
        if let Err(e) = result {
            warn!(rouser = %self.config.name, action, error = %e, "actuator call failed");
        }
    }
}
