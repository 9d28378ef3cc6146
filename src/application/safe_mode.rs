//! Reversible risk clamp engaged on critical anomalies.
//!
//! Activation snapshots the live runtime parameters and writes clamped
//! values: position sizing halved, stop distances halved (stops tightened
//! 2x), cycle cadence halved, and optionally a pause on new entries. A
//! recovery task checks every five minutes; after an hour without
//! reactivation (or on operator command) the snapshot is restored exactly.
//! Activation is idempotent; transitions are serialized by an explicit lock
//! so readers never observe a torn parameter set.

use crate::domain::events::EngineEvent;
use crate::infrastructure::event_bus::EventBus;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::{Arc, Mutex, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{info, warn};

/// Live risk parameters consulted by the control loops each cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct RuntimeParams {
    /// Multiplier on every computed position size (and Kelly fraction).
    pub sizing_multiplier: Decimal,
    /// Multiplier on stop distance; 0.5 means stops sit twice as close.
    pub stop_distance_factor: Decimal,
    /// Multiplier on the cycle interval; 0.5 doubles the cadence.
    pub cycle_interval_factor: f64,
    pub entries_paused: bool,
}

impl Default for RuntimeParams {
    fn default() -> Self {
        Self {
            sizing_multiplier: Decimal::ONE,
            stop_distance_factor: Decimal::ONE,
            cycle_interval_factor: 1.0,
            entries_paused: false,
        }
    }
}

struct Activation {
    snapshot: RuntimeParams,
    activated_at: Instant,
}

pub struct SafeMode {
    params: Arc<RwLock<RuntimeParams>>,
    activation: Mutex<Option<Activation>>,
    recovery_after: Duration,
    check_interval: Duration,
    pause_entries: bool,
    events: EventBus,
}

impl SafeMode {
    pub fn new(events: EventBus) -> Self {
        Self {
            params: Arc::new(RwLock::new(RuntimeParams::default())),
            activation: Mutex::new(None),
            recovery_after: Duration::from_secs(3600),
            check_interval: Duration::from_secs(300),
            pause_entries: false,
            events,
        }
    }

    pub fn with_entry_pause(mut self, pause: bool) -> Self {
        self.pause_entries = pause;
        self
    }

    /// Test hook: shrink the recovery windows.
    pub fn with_recovery_timing(mut self, recovery_after: Duration, check_interval: Duration) -> Self {
        self.recovery_after = recovery_after;
        self.check_interval = check_interval;
        self
    }

    pub fn params(&self) -> RuntimeParams {
        self.params.read().expect("safe-mode params poisoned").clone()
    }

    pub fn is_active(&self) -> bool {
        self.activation
            .lock()
            .expect("safe-mode lock poisoned")
            .is_some()
    }

    /// Engage the clamp. A second activation while engaged is a no-op; the
    /// explicit lock serializes concurrent attempts.
    pub fn activate(&self, reason: &str) {
        let mut activation = self.activation.lock().expect("safe-mode lock poisoned");
        if activation.is_some() {
            info!("SafeMode: already active, ignoring activation ({})", reason);
            return;
        }

        let mut params = self.params.write().expect("safe-mode params poisoned");
        let snapshot = params.clone();

        params.sizing_multiplier *= dec!(0.5);
        params.stop_distance_factor *= dec!(0.5);
        params.cycle_interval_factor *= 0.5;
        params.entries_paused = self.pause_entries;

        warn!(
            "SafeMode: ENGAGED ({}) - sizing {}, stop distance {}, cycle {}",
            reason, params.sizing_multiplier, params.stop_distance_factor,
            params.cycle_interval_factor
        );
        drop(params);

        *activation = Some(Activation {
            snapshot,
            activated_at: Instant::now(),
        });
        self.events.publish(EngineEvent::SafeModeEngaged {
            reason: reason.to_string(),
        });
    }

    /// Restore the exact pre-activation parameters.
    pub fn deactivate(&self, reason: &str) {
        let mut activation = self.activation.lock().expect("safe-mode lock poisoned");
        let Some(active) = activation.take() else {
            return;
        };

        *self.params.write().expect("safe-mode params poisoned") = active.snapshot;
        info!("SafeMode: lifted ({}), parameters restored", reason);
        self.events.publish(EngineEvent::SafeModeLifted);
    }

    /// Scheduled recovery: restore after the window elapses.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.check_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let expired = {
                        let activation = self.activation.lock().expect("safe-mode lock poisoned");
                        activation
                            .as_ref()
                            .map(|a| a.activated_at.elapsed() >= self.recovery_after)
                            .unwrap_or(false)
                    };
                    if expired {
                        self.deactivate("recovery window elapsed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("SafeMode: shutdown requested, stopping recovery task");
                    return;
                }
            }
        }
    }
}
