use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use rouse_core::to_chrono;
use rouse_notify::{Interface, InterfaceContext};
use rouse_rouser::{ResolvedAlarm, Rouser};
use rouse_schedule::{Occurrence, OccurrenceSource, ScheduleStore, StoreStatus};

use crate::config::ScheduleConfig;


/// An upcoming occurrence with the parameters the rouser would use.
#[derive(Debug, Clone, Serialize)]
pub struct UpcomingAlarm {
    pub at: DateTime<Utc>,
    pub name: Option<String>,
    pub beep_on_secs: f64,
    pub beep_off_secs: f64,
    pub snooze_secs: f64,
    pub timezone: String,
}

impl UpcomingAlarm {
    fn new(at: DateTime<Utc>, resolved: &ResolvedAlarm) -> Self {
        Self {
            at,
            name: resolved.name.clone(),
            beep_on_secs: resolved.beep_on.as_secs_f64(),
            beep_off_secs: resolved.beep_off.as_secs_f64(),
            snooze_secs: resolved.snooze.as_secs_f64(),
            timezone: resolved.zone.to_string(),
        }
    }
}

/// Composition root: polls interfaces, refreshes the schedule and starts
/// alarms on the rouser when an occurrence comes due.
pub struct Orchestrator {
    rouser: Arc<Rouser>,
    store: ScheduleStore,
    interfaces: Mutex<Vec<Box<dyn Interface>>>,
    window: chrono::Duration,
    period: Duration,
    /// The occurrence most recently handed to the rouser.
    last_fired: Mutex<Option<(DateTime<Utc>, OccurrenceSource)>>,
    running: AtomicBool,
}

impl Orchestrator {
    pub fn new(rouser: Arc<Rouser>, store: ScheduleStore, config: &ScheduleConfig) -> Self {
        Self {
            rouser,
            store,
            interfaces: Mutex::new(Vec::new()),
            window: to_chrono(config.trigger_window()),
            period: config.tick(),
            last_fired: Mutex::new(None),
            running: AtomicBool::new(true),
        }
    }

    pub fn add_interface(&self, interface: Box<dyn Interface>) {
        info!(interface = interface.name(), "registered interface");
        self.lock_interfaces().push(interface);
    }

    pub fn interface_count(&self) -> usize {
        self.lock_interfaces().len()
    }

    /// Start every registered interface. Ones that fail are logged and
    /// dropped; returns how many remain.
    pub fn startup(&self) -> usize {
        let mut interfaces = self.lock_interfaces();
        interfaces.retain_mut(|iface| match iface.startup() {
            Ok(()) => true,
            Err(e) => {
                error!(interface = iface.name(), error = %e, "interface failed to start; dropping it");
                false
            }
        });
        interfaces.len()
    }

    pub fn rouser(&self) -> &Arc<Rouser> {
        &self.rouser
    }

    pub fn store(&self) -> &ScheduleStore {
        &self.store
    }

    pub fn tick(&self) -> bool {
        self.tick_at(Utc::now())
    }

    /// One orchestrator iteration at `now`. Returns `true` when an alarm was
    /// started.
    pub fn tick_at(&self, now: DateTime<Utc>) -> bool {
        self.check_interfaces(now);

        if self.store.refresh() {
            info!(hash = ?self.store.content_hash(), "schedule reloaded");
        }

        let threshold = now - chrono::Duration::seconds(1);
        let Some(next) = self.store.next_occurrence(threshold) else {
            trace!(status = ?self.store.status(), "no upcoming occurrence");
            return false;
        };

        if (next.at - now).abs() > self.window {
            trace!(next = %next.at, alarm = next.name().unwrap_or("<unnamed>"), "next occurrence not yet due");
            return false;
        }

        if !self.should_fire(&next) {
            return false;
        }

        info!(at = %next.at, alarm = next.name().unwrap_or("<unnamed>"), "occurrence due");
        *self.lock_last_fired() = Some((next.at, next.source));
        self.rouser.start_alarm_at(&next.parameters, now)
    }

    /// Same occurrence never fires twice. A named occurrence also does not
    /// fire over an active alarm of the same name; an unnamed one always may.
    fn should_fire(&self, next: &Occurrence) -> bool {
        if *self.lock_last_fired() == Some((next.at, next.source)) {
            return false;
        }
        match next.name() {
            Some(name) => self.rouser.current_name().as_deref() != Some(name),
            None => true,
        }
    }

    fn check_interfaces(&self, now: DateTime<Utc>) {
        let ctx = InterfaceContext {
            rouser: &self.rouser,
            now,
        };
        for iface in self.lock_interfaces().iter_mut() {
            if let Err(e) = iface.check(&ctx) {
                warn!(interface = iface.name(), error = %e, "interface check failed");
            }
        }
    }

    /// The next `n` occurrences after `now`, resolved against the rouser's
    /// alarm definitions and defaults.
    pub fn upcoming_at(&self, now: DateTime<Utc>, n: usize) -> Vec<UpcomingAlarm> {
        self.store
            .upcoming(now, n)
            .iter()
            .map(|occ| UpcomingAlarm::new(occ.at, &self.rouser.resolve(&occ.parameters)))
            .collect()
    }

    pub fn upcoming(&self, n: usize) -> Vec<UpcomingAlarm> {
        self.upcoming_at(Utc::now(), n)
    }

    pub fn schedule_status(&self) -> StoreStatus {
        self.store.status()
    }

    /// Run the loop on the current thread until [`stop`](Self::stop), then
    /// tear down.
    pub fn run(&self) {
        info!(
            interfaces = self.interface_count(),
            schedule = %self.store.path().display(),
            "orchestrator loop running"
        );
        while self.running.load(Ordering::Relaxed) {
            self.tick();
            std::thread::sleep(self.period);
        }
        self.teardown();
        info!("orchestrator loop stopped");
    }

    /// Ask the loop to exit after the current iteration.
    pub fn stop(&self) {
        debug!("orchestrator stop requested");
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Stop the loop and tear down immediately, for callers that never
    /// started [`run`](Self::run). Must not be called from inside a tokio
    /// runtime.
    pub fn shutdown(&self) {
        self.stop();
        self.teardown();
    }

    /// Shut down every interface, then the rouser. Safe to call twice.
    fn teardown(&self) {
        let interfaces: Vec<_> = self.lock_interfaces().drain(..).collect();
        for mut iface in interfaces {
            if let Err(e) = iface.shutdown() {
                warn!(interface = iface.name(), error = %e, "interface shutdown failed");
            }
        }
        if self.rouser.is_running() {
            self.rouser.shutdown();
        }
    }

    fn lock_interfaces(&self) -> std::sync::MutexGuard<'_, Vec<Box<dyn Interface>>> {
        self.interfaces.lock().expect("interface list lock poisoned")
    }

    fn lock_last_fired(&self) -> std::sync::MutexGuard<'_, Option<(DateTime<Utc>, OccurrenceSource)>> {
        self.last_fired.lock().expect("last fired lock poisoned")
    }
}
