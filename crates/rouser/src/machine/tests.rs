use super::*;

use std::time::Duration;

use chrono::TimeZone;
use rouse_core::{ActuatorMode, SimulatedActuator};
use rouse_rules::{AlarmSettings, Predicate};

use crate::state::AlarmPhase;

const OUTPUT: u8 = 2;
const BUTTON: u8 = 21;
const TOGGLE: u8 = 20;

fn t(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

fn rig_with(config: RouserConfig, alarms: BTreeMap<String, AlarmDefinition>) -> (Rouser, Arc<SimulatedActuator>) {
    let registry = HardwareRegistry::new(&[BUTTON]);
    let sim = Arc::new(SimulatedActuator::new(OUTPUT));
    registry.register_output(OUTPUT, sim.clone());
    let rouser = Rouser::new(config, &registry, OUTPUT)
        .unwrap()
        .with_alarms(alarms)
        .with_toggle_pins(vec![TOGGLE]);
    (rouser, sim)
}

fn rig(alarms: BTreeMap<String, AlarmDefinition>) -> (Rouser, Arc<SimulatedActuator>) {
    rig_with(RouserConfig::default(), alarms)
}

fn presses(at_least: u32, within_secs: f64) -> ConditionExpression {
    ConditionExpression::all_of(vec![Predicate::Presses {
        pin: Some(BUTTON),
        at_least,
        within_secs,
    }])
}

fn click(rouser: &Rouser, at: DateTime<Utc>) {
    rouser.handle_press(BUTTON, at);
    rouser.handle_release(BUTTON, at);
}

// ── Construction ────────────────────────────────────────────────────

#[test]
fn unregistered_output_fails_fast() {
    let registry = HardwareRegistry::new(&[]);
    assert!(Rouser::new(RouserConfig::default(), &registry, OUTPUT).is_err());
}

// ── Transitions ─────────────────────────────────────────────────────

#[test]
fn full_cycle_is_reachable() {
    let (rouser, sim) = rig(BTreeMap::new());
    assert_eq!(rouser.status().phase, AlarmPhase::Idle);

    assert!(rouser.start_alarm_at(&AlarmParameters::named("weekday"), t(0)));
    assert_eq!(rouser.status().phase, AlarmPhase::Sounding);
    assert_eq!(
        sim.mode(),
        ActuatorMode::Beeping {
            on: Duration::from_millis(500),
            off: Duration::from_millis(500)
        }
    );

    assert!(rouser.snooze_alarm_at(t(10)));
    assert_eq!(rouser.status().phase, AlarmPhase::Snoozed);
    assert_eq!(sim.mode(), ActuatorMode::Off);

    assert!(rouser.resume_alarm_at(t(20)));
    assert_eq!(rouser.state().onset(), Some(t(20)));
    assert!(sim.is_active());

    assert!(rouser.stop_alarm());
    assert_eq!(rouser.state(), AlarmState::Idle);
    assert_eq!(sim.mode(), ActuatorMode::Off);
}

#[test]
fn sounding_and_snoozed_are_exclusive() {
    let (rouser, _) = rig(BTreeMap::new());
    rouser.start_alarm_at(&AlarmParameters::named("weekday"), t(0));
    let status = rouser.status();
    assert_eq!(status.onset, Some(t(0)));
    assert_eq!(status.snoozed_since, None);

    rouser.snooze_alarm_at(t(5));
    let status = rouser.status();
    assert_eq!(status.onset, None);
    assert_eq!(status.snoozed_since, Some(t(5)));
    assert_eq!(status.alarm.as_deref(), Some("weekday"));
}

#[test]
fn out_of_order_operations_are_rejected() {
    let (rouser, _) = rig(BTreeMap::new());
    assert!(!rouser.resume_alarm_at(t(0)));
    assert!(!rouser.snooze_alarm_at(t(0)));
    assert!(!rouser.stop_alarm());

    rouser.start_alarm_at(&AlarmParameters::named("weekday"), t(0));
    assert!(!rouser.resume_alarm_at(t(1)));
    rouser.snooze_alarm_at(t(2));
    assert!(!rouser.snooze_alarm_at(t(3)));
    assert_eq!(rouser.state().snoozed_since(), Some(t(2)));
}

#[test]
fn stop_when_idle_still_switches_output_off() {
    let (rouser, sim) = rig(BTreeMap::new());
    sim.on().unwrap();
    assert!(!rouser.stop_alarm());
    assert_eq!(sim.mode(), ActuatorMode::Off);
}

#[test]
fn starting_same_name_twice_keeps_onset() {
    let (rouser, _) = rig(BTreeMap::new());
    assert!(rouser.start_alarm_at(&AlarmParameters::named("weekday"), t(0)));
    assert!(!rouser.start_alarm_at(&AlarmParameters::named("weekday"), t(30)));
    assert_eq!(rouser.state().onset(), Some(t(0)));
}

#[test]
fn different_name_replaces_active_alarm() {
    let (rouser, _) = rig(BTreeMap::new());
    rouser.start_alarm_at(&AlarmParameters::named("weekday"), t(0));
    assert!(rouser.start_alarm_at(&AlarmParameters::named("weekend"), t(30)));
    assert_eq!(rouser.current_name().as_deref(), Some("weekend"));
    assert_eq!(rouser.state().onset(), Some(t(30)));
}

#[test]
fn unnamed_alarms_always_restart() {
    let (rouser, _) = rig(BTreeMap::new());
    assert!(rouser.start_alarm_at(&AlarmParameters::default(), t(0)));
    assert!(rouser.start_alarm_at(&AlarmParameters::default(), t(5)));
    assert_eq!(rouser.state().onset(), Some(t(5)));
}

// ── Parameter resolution ────────────────────────────────────────────

#[test]
fn overrides_beat_definition_beat_defaults() {
    let mut alarms = BTreeMap::new();
    alarms.insert(
        "weekday".to_string(),
        AlarmSettings {
            beep_on_secs: Some(1.0),
            beep_off_secs: Some(2.0),
            snooze_state: Some(RestingState::On),
            ..Default::default()
        },
    );
    let (rouser, _) = rig(alarms);

    let params = AlarmParameters::named("weekday").with_settings(AlarmSettings {
        beep_on_secs: Some(0.1),
        ..Default::default()
    });
    let alarm = rouser.resolve(&params);
    assert_eq!(alarm.beep_on, Duration::from_millis(100));
    assert_eq!(alarm.beep_off, Duration::from_secs(2));
    assert_eq!(alarm.snooze_state, RestingState::On);
    assert_eq!(alarm.snooze, Duration::from_secs(600));
}

#[test]
fn bad_timezone_falls_back_to_local() {
    let (rouser, _) = rig(BTreeMap::new());
    let params = AlarmParameters::named("x").with_settings(AlarmSettings {
        timezone: Some("Atlantis/Capital".into()),
        ..Default::default()
    });
    assert_eq!(rouser.resolve(&params).zone, Zone::Local);
}

#[test]
fn zero_off_time_sounds_steady() {
    let (rouser, sim) = rig(BTreeMap::new());
    let params = AlarmParameters::named("steady").with_settings(AlarmSettings {
        beep_off_secs: Some(0.0),
        ..Default::default()
    });
    rouser.start_alarm_at(&params, t(0));
    assert_eq!(sim.mode(), ActuatorMode::On);
}

#[test]
fn snooze_resting_state_on_keeps_output_driven() {
    let (rouser, sim) = rig(BTreeMap::new());
    let params = AlarmParameters::named("light").with_settings(AlarmSettings {
        snooze_state: Some(RestingState::On),
        ..Default::default()
    });
    rouser.start_alarm_at(&params, t(0));
    rouser.snooze_alarm_at(t(1));
    assert_eq!(sim.mode(), ActuatorMode::On);
}

// ── Tick ────────────────────────────────────────────────────────────

#[test]
fn snooze_times_out_only_after_duration() {
    let (rouser, _) = rig(BTreeMap::new());
    rouser.start_alarm_at(&AlarmParameters::named("weekday"), t(0));
    rouser.snooze_alarm_at(t(100));

    rouser.tick_at(t(100 + 599));
    assert_eq!(rouser.status().phase, AlarmPhase::Snoozed);

    rouser.tick_at(t(100 + 601));
    assert_eq!(rouser.status().phase, AlarmPhase::Sounding);
    assert_eq!(rouser.state().onset(), Some(t(701)));
}

#[test]
fn max_active_duration_forces_stop() {
    let params = AlarmParameters::named("stubborn").with_settings(AlarmSettings {
        stop_conditions: Some(ConditionExpression::never()),
        ..Default::default()
    });
    let (rouser, sim) = rig(BTreeMap::new());
    rouser.start_alarm_at(&params, t(0));

    rouser.tick_at(t(599));
    assert_eq!(rouser.status().phase, AlarmPhase::Sounding);

    rouser.tick_at(t(600));
    assert_eq!(rouser.status().phase, AlarmPhase::Idle);
    assert_eq!(sim.mode(), ActuatorMode::Off);
}

#[test]
fn max_active_is_configurable() {
    let config = RouserConfig {
        max_active_secs: 30.0,
        ..Default::default()
    };
    let (rouser, _) = rig_with(config, BTreeMap::new());
    rouser.start_alarm_at(&AlarmParameters::named("short"), t(0));
    rouser.tick_at(t(30));
    assert_eq!(rouser.status().phase, AlarmPhase::Idle);
}

#[test]
fn button_presses_snooze_then_stop() {
    let mut alarms = BTreeMap::new();
    alarms.insert(
        "weekday".to_string(),
        AlarmSettings {
            snooze_conditions: Some(presses(1, 2.0)),
            stop_conditions: Some(presses(3, 10.0)),
            ..Default::default()
        },
    );
    let (rouser, _) = rig(alarms);
    rouser.start_alarm_at(&AlarmParameters::named("weekday"), t(0));

    rouser.tick_at(t(5));
    assert_eq!(rouser.status().phase, AlarmPhase::Sounding);

    click(&rouser, t(6));
    rouser.tick_at(t(7));
    assert_eq!(rouser.status().phase, AlarmPhase::Snoozed);

    click(&rouser, t(8));
    click(&rouser, t(9));
    rouser.tick_at(t(10));
    assert_eq!(rouser.status().phase, AlarmPhase::Idle);
}

#[test]
fn start_conditions_trigger_named_alarm() {
    let mut alarms = BTreeMap::new();
    alarms.insert(
        "manual".to_string(),
        AlarmSettings {
            start_conditions: Some(ConditionExpression::all_of(vec![Predicate::Held {
                pin: Some(BUTTON),
                at_least_secs: 3.0,
            }])),
            ..Default::default()
        },
    );
    let (rouser, _) = rig(alarms);

    rouser.handle_press(BUTTON, t(0));
    rouser.tick_at(t(2));
    assert_eq!(rouser.status().phase, AlarmPhase::Idle);

    rouser.tick_at(t(3));
    assert_eq!(rouser.current_name().as_deref(), Some("manual"));
    assert_eq!(rouser.state().onset(), Some(t(3)));

    // Still held: the running alarm is not restarted.
    rouser.tick_at(t(4));
    assert_eq!(rouser.state().onset(), Some(t(3)));
}

#[test]
fn failing_actuator_does_not_block_transitions() {
    let (rouser, sim) = rig(BTreeMap::new());
    sim.set_failing(true);
    assert!(rouser.start_alarm_at(&AlarmParameters::named("weekday"), t(0)));
    assert!(rouser.snooze_alarm_at(t(1)));
    assert!(rouser.stop_alarm());
    assert_eq!(rouser.status().phase, AlarmPhase::Idle);
}

#[test]
fn old_presses_are_pruned() {
    let config = RouserConfig {
        input_retention_secs: 60,
        ..Default::default()
    };
    let registry = HardwareRegistry::new(&[BUTTON]);
    registry.register_output(OUTPUT, Arc::new(SimulatedActuator::new(OUTPUT)));
    let rouser = Rouser::new(config, &registry, OUTPUT).unwrap();

    click(&rouser, t(0));
    rouser.tick_at(t(30));
    assert_eq!(registry.inputs().snapshot()[&BUTTON].len(), 1);

    rouser.tick_at(t(61));
    assert!(registry.inputs().snapshot()[&BUTTON].is_empty());
}

// ── Toggle pins ─────────────────────────────────────────────────────

#[test]
fn toggle_pin_flips_output_when_idle() {
    let (rouser, sim) = rig(BTreeMap::new());
    rouser.handle_press(TOGGLE, t(0));
    assert_eq!(sim.mode(), ActuatorMode::On);
    rouser.handle_release(TOGGLE, t(0));
    rouser.handle_press(TOGGLE, t(1));
    assert_eq!(sim.mode(), ActuatorMode::Off);
}

#[test]
fn toggle_pin_ignored_while_sounding() {
    let (rouser, sim) = rig(BTreeMap::new());
    rouser.start_alarm_at(&AlarmParameters::named("weekday"), t(0));
    let before = sim.mode();
    rouser.handle_press(TOGGLE, t(1));
    assert_eq!(sim.mode(), before);
}

// ── Lifecycle ───────────────────────────────────────────────────────

#[test]
fn shutdown_stops_alarm_and_loop() {
    let (rouser, sim) = rig(BTreeMap::new());
    rouser.start_alarm_at(&AlarmParameters::named("weekday"), t(0));

    rouser.shutdown();
    assert!(!rouser.is_running());
    assert_eq!(rouser.status().phase, AlarmPhase::Idle);
    assert_eq!(sim.mode(), ActuatorMode::Off);

    // run() returns immediately once shutdown is set.
    rouser.run();
}
