//! Heartbeat registry and dead-man switch.
//!
//! Components register with a maximum silent interval and must beat at least
//! every half-interval. A monitor task wakes on a fixed cadence; any
//! component past its window arms the emergency protocol: cancel all open
//! orders, close every position at market, and latch a process-wide tripped
//! flag that blocks new entries until an explicit operator reset.

use crate::domain::events::EngineEvent;
use crate::domain::ports::BrokerClient;
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::observability::metrics::Metrics;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{error, info, warn};

/// The latched emergency flag. Process-wide by design: once the dead-man
/// switch fires, nothing in this process may open a position until an
/// operator resets it.
static EMERGENCY_TRIPPED: AtomicBool = AtomicBool::new(false);

pub fn emergency_tripped() -> bool {
    EMERGENCY_TRIPPED.load(Ordering::SeqCst)
}

struct ComponentHealth {
    max_silence: Duration,
    last_beat: Instant,
}

pub struct Supervisor {
    components: Mutex<HashMap<String, ComponentHealth>>,
    brokers: Vec<Arc<dyn BrokerClient>>,
    events: EventBus,
    metrics: Metrics,
    check_interval: Duration,
}

impl Supervisor {
    pub fn new(brokers: Vec<Arc<dyn BrokerClient>>, events: EventBus, metrics: Metrics) -> Self {
        Self {
            components: Mutex::new(HashMap::new()),
            brokers,
            events,
            metrics,
            check_interval: Duration::from_secs(30),
        }
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval = interval;
        self
    }

    /// Register a component. Cloud scheduling pauses are normal; intervals
    /// should be minutes, not seconds.
    pub fn register(&self, name: impl Into<String>, max_silence: Duration) {
        let name = name.into();
        info!(
            "Supervisor: registered component '{}' (max silence {:?})",
            name, max_silence
        );
        self.components.lock().expect("supervisor lock poisoned").insert(
            name,
            ComponentHealth {
                max_silence,
                last_beat: Instant::now(),
            },
        );
    }

    pub fn beat(&self, name: &str) {
        if let Some(health) = self
            .components
            .lock()
            .expect("supervisor lock poisoned")
            .get_mut(name)
        {
            health.last_beat = Instant::now();
        }
    }

    /// Explicit operator reset of the latched flag.
    pub fn reset(&self, operator: &str) {
        warn!("Supervisor: emergency latch reset by operator '{}'", operator);
        EMERGENCY_TRIPPED.store(false, Ordering::SeqCst);
    }

    /// Names of components currently past their window.
    fn overdue(&self) -> Vec<String> {
        self.components
            .lock()
            .expect("supervisor lock poisoned")
            .iter()
            .filter(|(_, h)| h.last_beat.elapsed() > h.max_silence)
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.check_interval);
        loop {
            tokio::select! {
                _ = ticker.tick() => self.check().await,
                _ = shutdown.changed() => {
                    info!("Supervisor: shutdown requested, stopping monitor");
                    return;
                }
            }
        }
    }

    async fn check(&self) {
        let overdue = self.overdue();
        if overdue.is_empty() {
            return;
        }

        for name in &overdue {
            self.metrics
                .heartbeat_misses_total
                .with_label_values(&[name.as_str()])
                .inc();
        }

        if emergency_tripped() {
            // Already flattened; stay latched and keep logging.
            warn!("Supervisor: still tripped, overdue: {:?}", overdue);
            return;
        }

        let reason = format!("heartbeat missed: {}", overdue.join(", "));
        error!("Supervisor: DEAD-MAN SWITCH ARMED ({})", reason);
        self.emergency_flatten(&reason).await;
    }

    /// Cancel everything, close everything, latch. Not cancellable once
    /// begun; per-broker failures are logged and the remaining brokers are
    /// still flattened.
    pub async fn emergency_flatten(&self, reason: &str) {
        EMERGENCY_TRIPPED.store(true, Ordering::SeqCst);
        self.metrics.degradation_level.set(4.0);
        self.events.publish(EngineEvent::EmergencyFlatten {
            reason: reason.to_string(),
        });

        for broker in &self.brokers {
            let venue = broker.venue();
            if let Err(e) = broker.cancel_all(None).await {
                error!("Supervisor: cancel_all on {} failed: {}", venue, e);
            }
            if let Err(e) = broker.close_all().await {
                error!("Supervisor: close_all on {} failed: {}", venue, e);
            } else {
                info!("Supervisor: {} flattened", venue);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock::MockBroker;

    fn supervisor_with_mock() -> (Arc<Supervisor>, Arc<MockBroker>) {
        let mock = Arc::new(MockBroker::new());
        let supervisor = Arc::new(
            Supervisor::new(
                vec![mock.clone() as Arc<dyn BrokerClient>],
                EventBus::new(),
                Metrics::default(),
            )
            .with_check_interval(Duration::from_millis(20)),
        );
        (supervisor, mock)
    }

    // The latch is a process-wide static, so assertions about it live in
    // one test; the others only assert per-instance broker activity.

    #[tokio::test]
    async fn test_missed_beat_triggers_flatten_and_reset_is_explicit() {
        let (supervisor, mock) = supervisor_with_mock();
        supervisor.reset("test-setup");
        supervisor.register("slow_loop", Duration::from_millis(30));

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(supervisor.clone().run(shutdown_rx));

        // Never beat: the monitor must trip and flatten.
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(mock.call_count("cancel_all") >= 1);
        assert!(mock.call_count("close_all") >= 1);
        handle.abort();

        // The latch survives the flatten and only an operator clears it.
        assert!(emergency_tripped());
        supervisor.reset("operator");
        assert!(!emergency_tripped());
    }

    #[tokio::test]
    async fn test_regular_beats_keep_switch_disarmed() {
        let (supervisor, mock) = supervisor_with_mock();
        supervisor.register("healthy_loop", Duration::from_millis(80));

        let (_shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(supervisor.clone().run(shutdown_rx));

        for _ in 0..6 {
            supervisor.beat("healthy_loop");
            tokio::time::sleep(Duration::from_millis(25)).await;
        }

        // This instance's brokers were never touched.
        assert_eq!(mock.call_count("close_all"), 0);
        assert_eq!(mock.call_count("cancel_all"), 0);

        handle.abort();
    }
}
