//! Resilience wrapper around a venue client.
//!
//! Each call passes, in order, through the endpoint-class rate limiter, the
//! circuit breaker gate, and a bounded retry loop with full-jitter
//! exponential backoff. Only `Network` failures retry; every other kind is
//! returned as-is. Each attempt carries a hard deadline and resolves to
//! `Network` on expiry.

use crate::domain::errors::BrokerError;
use crate::domain::market::bar::Bar;
use crate::domain::ports::BrokerClient;
use crate::domain::trading::types::{
    Account, BracketRequest, ExternalPosition, MarketClock, Order, OrderPatch, OrderRequest,
    Symbol, Venue,
};
use crate::infrastructure::core::circuit_breaker::CircuitBreaker;
use crate::infrastructure::core::rate_limiter::{EndpointClass, RateLimiterSet};
use crate::infrastructure::observability::metrics::Metrics;
use async_trait::async_trait;
use rand::Rng;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct ResilienceConfig {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub call_timeout: Duration,
    pub limiter_deadline: Duration,
    pub breaker_failure_threshold: usize,
    pub breaker_failure_window: Duration,
    pub breaker_cooldown: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_backoff: Duration::from_millis(500),
            call_timeout: Duration::from_secs(10),
            limiter_deadline: Duration::from_secs(5),
            breaker_failure_threshold: 5,
            breaker_failure_window: Duration::from_secs(10),
            breaker_cooldown: Duration::from_secs(30),
        }
    }
}

pub struct ResilientClient {
    inner: Arc<dyn BrokerClient>,
    breaker: CircuitBreaker,
    limiters: RateLimiterSet,
    metrics: Metrics,
    config: ResilienceConfig,
}

impl ResilientClient {
    pub fn new(inner: Arc<dyn BrokerClient>, metrics: Metrics, config: ResilienceConfig) -> Self {
        let breaker = CircuitBreaker::new(
            format!("{}", inner.venue()),
            config.breaker_failure_threshold,
            config.breaker_failure_window,
            config.breaker_cooldown,
        );
        Self {
            inner,
            breaker,
            limiters: RateLimiterSet::default_for_venue(),
            metrics,
            config,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    fn venue_label(&self) -> String {
        self.inner.venue().to_string()
    }

    async fn call<T, F, Fut>(
        &self,
        class: EndpointClass,
        endpoint: &'static str,
        op: F,
    ) -> Result<T, BrokerError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, BrokerError>>,
    {
        let venue = self.venue_label();

        self.limiters.acquire(class, self.config.limiter_deadline).await?;

        let mut attempt: u32 = 0;
        loop {
            if let Err(remaining) = self.breaker.try_acquire() {
                self.metrics.record_call(&venue, endpoint, "breaker_open");
                self.metrics.set_breaker_state(&venue, self.breaker.state_label());
                return Err(BrokerError::RateLimited {
                    retry_after_secs: remaining.as_secs().max(1),
                });
            }

            self.metrics.inflight_calls.with_label_values(&[venue.as_str()]).inc();
            let outcome = tokio::time::timeout(self.config.call_timeout, op()).await;
            self.metrics.inflight_calls.with_label_values(&[venue.as_str()]).dec();

            let result = match outcome {
                Ok(r) => r,
                Err(_) => Err(BrokerError::Network(format!(
                    "deadline of {:?} exceeded",
                    self.config.call_timeout
                ))),
            };

            match result {
                Ok(value) => {
                    self.breaker.record_success();
                    self.metrics.record_call(&venue, endpoint, "success");
                    self.metrics.set_breaker_state(&venue, self.breaker.state_label());
                    return Ok(value);
                }
                Err(e) => {
                    // Business rejections are not venue failures; only
                    // transport and auth problems count against the breaker.
                    match e {
                        BrokerError::Network(_) | BrokerError::Auth(_) | BrokerError::Unknown(_) => {
                            self.breaker.record_failure()
                        }
                        _ => {}
                    }
                    self.metrics.record_call(&venue, endpoint, e.kind());
                    self.metrics.set_breaker_state(&venue, self.breaker.state_label());

                    if e.is_retryable() && attempt < self.config.max_retries {
                        attempt += 1;
                        self.metrics.record_retry(&venue, endpoint);
                        let backoff = self.jittered_backoff(attempt);
                        debug!(
                            "ResilientClient [{}]: {} attempt {} failed ({}), retrying in {:?}",
                            venue, endpoint, attempt, e, backoff
                        );
                        tokio::time::sleep(backoff).await;
                        continue;
                    }

                    if e.is_retryable() {
                        warn!(
                            "ResilientClient [{}]: {} exhausted {} retries: {}",
                            venue, endpoint, self.config.max_retries, e
                        );
                    }
                    return Err(e);
                }
            }
        }
    }

    /// Full jitter: a uniform draw over the exponential envelope.
    fn jittered_backoff(&self, attempt: u32) -> Duration {
        let cap = self.config.base_backoff.as_millis() as u64 * 2u64.saturating_pow(attempt);
        let jitter: f64 = rand::rng().random_range(0.0..1.0);
        Duration::from_millis((cap as f64 * jitter) as u64)
    }
}

#[async_trait]
impl BrokerClient for ResilientClient {
    fn venue(&self) -> Venue {
        self.inner.venue()
    }

    fn supports_brackets(&self) -> bool {
        self.inner.supports_brackets()
    }

    async fn account(&self) -> Result<Account, BrokerError> {
        self.call(EndpointClass::Account, "account", || self.inner.account())
            .await
    }

    async fn positions(&self) -> Result<Vec<ExternalPosition>, BrokerError> {
        self.call(EndpointClass::Account, "positions", || self.inner.positions())
            .await
    }

    async fn latest_bar(&self, symbol: &Symbol) -> Result<Option<Bar>, BrokerError> {
        self.call(EndpointClass::MarketData, "latest_bar", || {
            self.inner.latest_bar(symbol)
        })
        .await
    }

    async fn history(&self, symbol: &Symbol, limit: usize) -> Result<Vec<Bar>, BrokerError> {
        self.call(EndpointClass::MarketData, "history", || {
            self.inner.history(symbol, limit)
        })
        .await
    }

    async fn place_order(&self, request: OrderRequest) -> Result<String, BrokerError> {
        self.call(EndpointClass::Trading, "place_order", || {
            self.inner.place_order(request.clone())
        })
        .await
    }

    async fn place_bracket(&self, request: BracketRequest) -> Result<String, BrokerError> {
        self.call(EndpointClass::Trading, "place_bracket", || {
            self.inner.place_bracket(request.clone())
        })
        .await
    }

    async fn open_orders(&self, symbol: Option<&Symbol>) -> Result<Vec<Order>, BrokerError> {
        self.call(EndpointClass::Trading, "open_orders", || {
            self.inner.open_orders(symbol)
        })
        .await
    }

    async fn replace_order(&self, order_id: &str, patch: OrderPatch) -> Result<(), BrokerError> {
        self.call(EndpointClass::Trading, "replace_order", || {
            self.inner.replace_order(order_id, patch.clone())
        })
        .await
    }

    async fn cancel_all(&self, symbol: Option<&Symbol>) -> Result<(), BrokerError> {
        self.call(EndpointClass::Trading, "cancel_all", || {
            self.inner.cancel_all(symbol)
        })
        .await
    }

    async fn close_all(&self) -> Result<(), BrokerError> {
        self.call(EndpointClass::Trading, "close_all", || self.inner.close_all())
            .await
    }

    async fn clock(&self) -> Result<MarketClock, BrokerError> {
        self.call(EndpointClass::Account, "clock", || self.inner.clock())
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock::MockBroker;
    use std::time::Instant;

    fn fast_config() -> ResilienceConfig {
        ResilienceConfig {
            max_retries: 2,
            base_backoff: Duration::from_millis(5),
            call_timeout: Duration::from_millis(500),
            limiter_deadline: Duration::from_millis(500),
            breaker_failure_threshold: 5,
            breaker_failure_window: Duration::from_secs(10),
            breaker_cooldown: Duration::from_millis(200),
        }
    }

    #[tokio::test]
    async fn test_retries_bounded_on_network_errors() {
        let mock = Arc::new(MockBroker::new());
        mock.fail_next("network", 100); // far more than the retry budget
        let client = ResilientClient::new(mock.clone(), Metrics::default(), fast_config());

        let result = client.account().await;
        assert!(matches!(result, Err(BrokerError::Network(_))));
        // 1 initial + 2 retries
        assert_eq!(mock.call_count("account"), 3);
    }

    #[tokio::test]
    async fn test_non_retryable_not_retried() {
        let mock = Arc::new(MockBroker::new());
        mock.fail_next("auth", 10);
        let client = ResilientClient::new(mock.clone(), Metrics::default(), fast_config());

        let result = client.account().await;
        assert!(matches!(result, Err(BrokerError::Auth(_))));
        assert_eq!(mock.call_count("account"), 1);
    }

    #[tokio::test]
    async fn test_breaker_opens_and_fast_fails() {
        let mock = Arc::new(MockBroker::new());
        mock.fail_next("network", 1000);
        let mut config = fast_config();
        config.max_retries = 0;
        let client = ResilientClient::new(mock.clone(), Metrics::default(), config);

        for _ in 0..5 {
            let _ = client.account().await;
        }
        let calls_before = mock.call_count("account");

        // Breaker is open: the venue must not be touched and the call must
        // return well inside the cool-down.
        let started = Instant::now();
        let result = client.account().await;
        assert!(matches!(result, Err(BrokerError::RateLimited { .. })));
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(mock.call_count("account"), calls_before);
    }

    #[tokio::test]
    async fn test_half_open_probe_closes_breaker() {
        let mock = Arc::new(MockBroker::new());
        mock.fail_next("network", 5);
        let mut config = fast_config();
        config.max_retries = 0;
        let client = ResilientClient::new(mock.clone(), Metrics::default(), config);

        for _ in 0..5 {
            let _ = client.account().await;
        }
        assert_eq!(
            client.breaker().state(),
            crate::infrastructure::core::circuit_breaker::CircuitState::Open
        );

        tokio::time::sleep(Duration::from_millis(250)).await;

        // Failure scripts exhausted: the probe succeeds and closes.
        let result = client.account().await;
        assert!(result.is_ok());
        assert_eq!(
            client.breaker().state(),
            crate::infrastructure::core::circuit_breaker::CircuitState::Closed
        );
    }
}
