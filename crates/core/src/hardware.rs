//! Actuator capability and the process-wide hardware registry.
//!
//! Physical drivers live outside this workspace. The core only needs an
//! on/off/beep capability per output pin and a press/release history per
//! input pin. The [`HardwareRegistry`] is owned by the process and handed
//! to each rouser so that one physical pin always maps to one handle.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info};

use crate::error::{HardwareError, HardwareResult};
use crate::input::InputHistory;

// ── Actuator capability ─────────────────────────────────────────────

/// What an actuator is currently doing.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum ActuatorMode {
    Off,
    On,
    Beeping { on: Duration, off: Duration },
}

/// A buzzer, shaker or light that can be switched and pulsed.
///
/// Implementations must return quickly; a beep pattern runs in the
/// background until the next call replaces it.
pub trait Actuator: Send + Sync {
    /// Switch fully on.
    fn on(&self) -> HardwareResult<()>;

    /// Switch fully off, cancelling any beep pattern.
    fn off(&self) -> HardwareResult<()>;

    /// Alternate between on (`on` long) and off (`off` long) until replaced.
    fn beep(&self, on: Duration, off: Duration) -> HardwareResult<()>;

    /// Whether the output is currently driven (steady on or beeping).
    fn is_active(&self) -> bool;

    /// Whether a beep pattern is running. Drivers that cannot tell report
    /// `false`.
    fn is_beeping(&self) -> bool {
        false
    }
}

// ── Simulated actuator ──────────────────────────────────────────────

/// In-memory actuator that records its mode and logs every change.
///
/// Used when no physical driver is linked, and as the test double.
#[derive(Debug)]
pub struct SimulatedActuator {
    pin: u8,
    mode: Mutex<ActuatorMode>,
    fail: AtomicBool,
}

impl SimulatedActuator {
    pub fn new(pin: u8) -> Self {
        Self {
            pin,
            mode: Mutex::new(ActuatorMode::Off),
            fail: AtomicBool::new(false),
        }
    }

    /// Current mode.
    pub fn mode(&self) -> ActuatorMode {
        *self.mode.lock().expect("actuator lock poisoned")
    }

    /// Make every subsequent call fail (the mode is still recorded).
    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::Relaxed);
    }

    fn set(&self, mode: ActuatorMode) -> HardwareResult<()> {
        *self.mode.lock().expect("actuator lock poisoned") = mode;
        debug!(pin = self.pin, ?mode, "simulated actuator");
        if self.fail.load(Ordering::Relaxed) {
            return Err(HardwareError::Actuator {
                pin: self.pin,
                reason: "simulated failure".to_string(),
            });
        }
        Ok(())
    }
}

impl Actuator for SimulatedActuator {
    fn on(&self) -> HardwareResult<()> {
        self.set(ActuatorMode::On)
    }

    fn off(&self) -> HardwareResult<()> {
        self.set(ActuatorMode::Off)
    }

    fn beep(&self, on: Duration, off: Duration) -> HardwareResult<()> {
        self.set(ActuatorMode::Beeping { on, off })
    }

    fn is_active(&self) -> bool {
        self.mode() != ActuatorMode::Off
    }

    fn is_beeping(&self) -> bool {
        matches!(self.mode(), ActuatorMode::Beeping { .. })
    }
}

// ── Inverted actuator ───────────────────────────────────────────────

/// Swaps on and off for active-low devices (e.g. a shaker that vibrates
/// while its pin is low).
pub struct InvertedActuator<A: Actuator> {
    inner: A,
}

impl<A: Actuator> InvertedActuator<A> {
    pub fn new(inner: A) -> Self {
        Self { inner }
    }

    pub fn inner(&self) -> &A {
        &self.inner
    }
}

impl<A: Actuator> Actuator for InvertedActuator<A> {
    fn on(&self) -> HardwareResult<()> {
        self.inner.off()
    }

    fn off(&self) -> HardwareResult<()> {
        self.inner.on()
    }

    fn beep(&self, on: Duration, off: Duration) -> HardwareResult<()> {
        self.inner.beep(off, on)
    }

    // A beep pattern drives the output at both levels.
    fn is_active(&self) -> bool {
        self.inner.is_beeping() || !self.inner.is_active()
    }

    fn is_beeping(&self) -> bool {
        self.inner.is_beeping()
    }
}

// ── Registry ────────────────────────────────────────────────────────

/// Process-owned map of output pins to actuator handles, plus the shared
/// input history for all button pins.
pub struct HardwareRegistry {
    outputs: Mutex<HashMap<u8, Arc<dyn Actuator>>>,
    inputs: Arc<InputHistory>,
}

impl HardwareRegistry {
    /// Create a registry tracking the given input pins.
    pub fn new(input_pins: &[u8]) -> Self {
        Self {
            outputs: Mutex::new(HashMap::new()),
            inputs: Arc::new(InputHistory::new(input_pins)),
        }
    }

    /// Register an actuator for `pin`.
    ///
    /// If the pin already has a handle, that handle is returned and
    /// `actuator` is dropped.
    pub fn register_output(&self, pin: u8, actuator: Arc<dyn Actuator>) -> Arc<dyn Actuator> {
        let mut outputs = self.outputs.lock().expect("registry lock poisoned");
        if let Some(existing) = outputs.get(&pin) {
            debug!(pin, "output already registered, reusing handle");
            return Arc::clone(existing);
        }
        if let Err(e) = actuator.off() {
            tracing::warn!(pin, error = %e, "failed to switch new actuator off");
        }
        info!(pin, "registered output");
        outputs.insert(pin, Arc::clone(&actuator));
        actuator
    }

    /// Look up the actuator for `pin`.
    pub fn output(&self, pin: u8) -> HardwareResult<Arc<dyn Actuator>> {
        self.outputs
            .lock()
            .expect("registry lock poisoned")
            .get(&pin)
            .cloned()
            .ok_or(HardwareError::PinNotRegistered(pin))
    }

    /// Shared button history for all input pins.
    pub fn inputs(&self) -> Arc<InputHistory> {
        Arc::clone(&self.inputs)
    }
}
