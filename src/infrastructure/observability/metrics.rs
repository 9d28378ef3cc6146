//! Prometheus metrics definitions for quantpilot
//!
//! All metrics use the `quantpilot_` prefix and are read-only.

use prometheus::{
    CounterVec, Gauge, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
    core::{AtomicF64, GenericGauge, GenericGaugeVec},
};
use std::sync::Arc;

#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Broker calls by venue, endpoint and outcome
    pub broker_calls_total: CounterVec,
    /// Retries performed by the resilient client
    pub broker_retries_total: CounterVec,
    /// Circuit breaker state (0=closed, 1=half-open, 2=open)
    pub breaker_state: GenericGaugeVec<AtomicF64>,
    /// Calls currently in flight per venue
    pub inflight_calls: GenericGaugeVec<AtomicF64>,
    /// Equity per profile in USD
    pub equity_usd: GenericGaugeVec<AtomicF64>,
    /// Open positions per profile
    pub positions_count: GenericGaugeVec<AtomicF64>,
    /// Orders by side and status
    pub orders_total: CounterVec,
    /// Control-loop cycle latency
    pub cycle_latency_seconds: HistogramVec,
    /// Current degradation level (0=normal .. 4=emergency)
    pub degradation_level: GenericGauge<AtomicF64>,
    /// Supervisor heartbeat misses per component
    pub heartbeat_misses_total: CounterVec,
    /// Anomaly detections per metric name
    pub anomalies_total: CounterVec,
}

impl Metrics {
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let broker_calls_total = CounterVec::new(
            Opts::new(
                "quantpilot_broker_calls_total",
                "Broker calls by venue, endpoint and outcome",
            ),
            &["venue", "endpoint", "outcome"],
        )?;
        registry.register(Box::new(broker_calls_total.clone()))?;

        let broker_retries_total = CounterVec::new(
            Opts::new(
                "quantpilot_broker_retries_total",
                "Retries performed by the resilient client",
            ),
            &["venue", "endpoint"],
        )?;
        registry.register(Box::new(broker_retries_total.clone()))?;

        let breaker_state = GaugeVec::new(
            Opts::new(
                "quantpilot_breaker_state",
                "Circuit breaker state (0=closed, 1=half-open, 2=open)",
            ),
            &["venue"],
        )?;
        registry.register(Box::new(breaker_state.clone()))?;

        let inflight_calls = GaugeVec::new(
            Opts::new("quantpilot_inflight_calls", "Broker calls in flight"),
            &["venue"],
        )?;
        registry.register(Box::new(inflight_calls.clone()))?;

        let equity_usd = GaugeVec::new(
            Opts::new("quantpilot_equity_usd", "Equity per profile in USD"),
            &["profile"],
        )?;
        registry.register(Box::new(equity_usd.clone()))?;

        let positions_count = GaugeVec::new(
            Opts::new("quantpilot_positions_count", "Open positions per profile"),
            &["profile"],
        )?;
        registry.register(Box::new(positions_count.clone()))?;

        let orders_total = CounterVec::new(
            Opts::new("quantpilot_orders_total", "Orders by side and status"),
            &["side", "status"],
        )?;
        registry.register(Box::new(orders_total.clone()))?;

        let cycle_latency_seconds = HistogramVec::new(
            HistogramOpts::new(
                "quantpilot_cycle_latency_seconds",
                "Control-loop cycle latency",
            )
            .buckets(vec![0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["profile"],
        )?;
        registry.register(Box::new(cycle_latency_seconds.clone()))?;

        let degradation_level = Gauge::with_opts(Opts::new(
            "quantpilot_degradation_level",
            "Current degradation level (0=normal .. 4=emergency)",
        ))?;
        registry.register(Box::new(degradation_level.clone()))?;

        let heartbeat_misses_total = CounterVec::new(
            Opts::new(
                "quantpilot_heartbeat_misses_total",
                "Supervisor heartbeat misses per component",
            ),
            &["component"],
        )?;
        registry.register(Box::new(heartbeat_misses_total.clone()))?;

        let anomalies_total = CounterVec::new(
            Opts::new(
                "quantpilot_anomalies_total",
                "Anomaly detections per metric name",
            ),
            &["metric", "class"],
        )?;
        registry.register(Box::new(anomalies_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            broker_calls_total,
            broker_retries_total,
            breaker_state,
            inflight_calls,
            equity_usd,
            positions_count,
            orders_total,
            cycle_latency_seconds,
            degradation_level,
            heartbeat_misses_total,
            anomalies_total,
        })
    }

    /// Render all metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }

    pub fn record_call(&self, venue: &str, endpoint: &str, outcome: &str) {
        self.broker_calls_total
            .with_label_values(&[venue, endpoint, outcome])
            .inc();
    }

    pub fn record_retry(&self, venue: &str, endpoint: &str) {
        self.broker_retries_total
            .with_label_values(&[venue, endpoint])
            .inc();
    }

    pub fn set_breaker_state(&self, venue: &str, state: &str) {
        let value = match state {
            "closed" => 0.0,
            "half_open" => 1.0,
            _ => 2.0,
        };
        self.breaker_state.with_label_values(&[venue]).set(value);
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new().expect("Failed to create default Metrics")
    }
}
