//! Button press/release history.
//!
//! Hardware callbacks append to the history from their own thread; the
//! rouser tick takes snapshots for condition evaluation. Both sides go
//! through the same mutex.

use std::collections::BTreeMap;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};

/// One physical press, completed once the button is released.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ButtonEvent {
    pub pressed_at: DateTime<Utc>,
    /// `None` while the button is still held down.
    pub released_at: Option<DateTime<Utc>>,
}

impl ButtonEvent {
    /// How long the button was (or has so far been) held.
    pub fn held_for(&self, now: DateTime<Utc>) -> chrono::Duration {
        self.released_at.unwrap_or(now) - self.pressed_at
    }

    pub fn is_held(&self) -> bool {
        self.released_at.is_none()
    }
}

/// Per-pin event history shared between button callbacks and the rouser.
#[derive(Debug, Default)]
pub struct InputHistory {
    events: Mutex<BTreeMap<u8, Vec<ButtonEvent>>>,
}

impl InputHistory {
    /// Create a history tracking the given input pins.
    pub fn new(pins: &[u8]) -> Self {
        let events = pins.iter().map(|pin| (*pin, Vec::new())).collect();
        Self {
            events: Mutex::new(events),
        }
    }

    /// Record a press on `pin`.
    pub fn press(&self, pin: u8, at: DateTime<Utc>) {
        let mut events = self.events.lock().expect("input history lock poisoned");
        let pin_events = events.entry(pin).or_default();
        pin_events.push(ButtonEvent {
            pressed_at: at,
            released_at: None,
        });
        debug!(pin, "button pressed");
    }

    /// Complete the most recent press on `pin`.
    ///
    /// A release without a matching open press is ignored.
    pub fn release(&self, pin: u8, at: DateTime<Utc>) {
        let mut events = self.events.lock().expect("input history lock poisoned");
        match events.get_mut(&pin).and_then(|e| e.last_mut()) {
            Some(last) if last.released_at.is_none() => {
                last.released_at = Some(at);
                debug!(pin, "button released");
            }
            _ => warn!(pin, "release without a matching press"),
        }
    }

    /// Whether `pin` is a tracked input.
    pub fn has_pin(&self, pin: u8) -> bool {
        self.events
            .lock()
            .expect("input history lock poisoned")
            .contains_key(&pin)
    }

    /// Copy of all events, keyed by pin.
    pub fn snapshot(&self) -> BTreeMap<u8, Vec<ButtonEvent>> {
        self.events
            .lock()
            .expect("input history lock poisoned")
            .clone()
    }

    /// Drop completed presses released before `cutoff`. Held presses are kept.
    ///
    /// Returns the number of events removed.
    pub fn prune_before(&self, cutoff: DateTime<Utc>) -> usize {
        let mut events = self.events.lock().expect("input history lock poisoned");
        let mut removed = 0;
        for pin_events in events.values_mut() {
            let before = pin_events.len();
            pin_events.retain(|e| e.released_at.map_or(true, |r| r >= cutoff));
            removed += before - pin_events.len();
        }
        removed
    }
}
