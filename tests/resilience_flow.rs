//! Venue-outage behavior across the resilience stack: breaker cool-down
//! timing and the cache serving stale views through an outage.

use quantpilot::domain::errors::BrokerError;
use quantpilot::domain::ports::BrokerClient;
use quantpilot::infrastructure::core::circuit_breaker::CircuitState;
use quantpilot::infrastructure::core::resilient::{ResilienceConfig, ResilientClient};
use quantpilot::infrastructure::market_cache::MarketDataCache;
use quantpilot::infrastructure::mock::MockBroker;
use quantpilot::infrastructure::observability::Metrics;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn scenario_config() -> ResilienceConfig {
    ResilienceConfig {
        max_retries: 0,
        base_backoff: Duration::from_millis(5),
        call_timeout: Duration::from_millis(500),
        limiter_deadline: Duration::from_millis(500),
        breaker_failure_threshold: 5,
        breaker_failure_window: Duration::from_secs(10),
        breaker_cooldown: Duration::from_millis(300),
    }
}

#[tokio::test]
async fn test_five_failures_open_breaker_then_probe_recovers() {
    let mock = Arc::new(MockBroker::new());
    mock.fail_next("network", 5);
    let client = ResilientClient::new(mock.clone(), Metrics::default(), scenario_config());

    // Five consecutive network failures inside the window open the breaker.
    for _ in 0..5 {
        let result = client.account().await;
        assert!(matches!(result, Err(BrokerError::Network(_))));
    }
    assert_eq!(client.breaker().state(), CircuitState::Open);
    let venue_calls_when_opened = mock.call_count("account");

    // During the cool-down every call fast-fails without touching the venue.
    let started = Instant::now();
    let result = client.account().await;
    assert!(matches!(result, Err(BrokerError::RateLimited { .. })));
    assert!(started.elapsed() < Duration::from_millis(150));
    assert_eq!(mock.call_count("account"), venue_calls_when_opened);

    // After the cool-down a single probe succeeds and closes the breaker.
    tokio::time::sleep(Duration::from_millis(350)).await;
    assert!(client.account().await.is_ok());
    assert_eq!(client.breaker().state(), CircuitState::Closed);
}

#[tokio::test]
async fn test_cache_serves_stale_views_through_an_outage() {
    let mock = Arc::new(MockBroker::new());
    let client: Arc<dyn BrokerClient> = Arc::new(ResilientClient::new(
        mock.clone(),
        Metrics::default(),
        scenario_config(),
    ));
    let cache = MarketDataCache::new(client, Duration::from_millis(10));

    // Healthy first refresh.
    let first = cache.snapshot().await;
    assert!(first.account.is_some());

    // The venue starts rate-limiting; the next refresh fails but readers
    // keep getting the last good snapshot and the cache latches backoff.
    tokio::time::sleep(Duration::from_millis(20)).await;
    mock.fail_next("rate_limited", 10);
    let stale = cache.snapshot().await;
    assert!(stale.account.is_some());
    assert!(cache.is_serving_stale().await);

    // While latched, repeated reads perform no further venue refreshes.
    let refreshes = cache.refresh_count();
    tokio::time::sleep(Duration::from_millis(20)).await;
    cache.snapshot().await;
    assert_eq!(cache.refresh_count(), refreshes);
}
