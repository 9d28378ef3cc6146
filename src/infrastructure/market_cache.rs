//! Rate-limit-aware venue state cache.
//!
//! A single writer refreshes a batched snapshot (account, then holdings,
//! then open orders, with inter-call spacing) at most once per TTL; readers
//! get pre-materialized views and never touch the venue. The first
//! rate-limit error latches a longer backoff so every reader sees the same
//! "serving stale" state instead of piling on.

use crate::domain::errors::BrokerError;
use crate::domain::ports::BrokerClient;
use crate::domain::trading::types::{Account, ExternalPosition, Order};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
pub struct VenueSnapshot {
    pub account: Option<Account>,
    pub holdings: Vec<ExternalPosition>,
    pub open_orders: Vec<Order>,
}

/// Deployment view derived once per refresh.
#[derive(Debug, Clone, Default)]
pub struct DeploymentSummary {
    pub equity: Decimal,
    pub cash: Decimal,
    pub deployed_value: Decimal,
    pub deployed_pct: Decimal,
    pub holding_count: usize,
}

struct CacheState {
    snapshot: VenueSnapshot,
    summary: DeploymentSummary,
    fetched_at: Option<Instant>,
    backoff_until: Option<Instant>,
}

pub struct MarketDataCache {
    broker: Arc<dyn BrokerClient>,
    ttl: Duration,
    rate_limit_backoff: Duration,
    call_spacing: Duration,
    state: RwLock<CacheState>,
    refresh_gate: Mutex<()>,
    refresh_count: AtomicU64,
}

impl MarketDataCache {
    pub fn new(broker: Arc<dyn BrokerClient>, ttl: Duration) -> Self {
        Self {
            broker,
            ttl,
            rate_limit_backoff: Duration::from_secs(120),
            call_spacing: Duration::from_millis(350),
            state: RwLock::new(CacheState {
                snapshot: VenueSnapshot::default(),
                summary: DeploymentSummary::default(),
                fetched_at: None,
                backoff_until: None,
            }),
            refresh_gate: Mutex::new(()),
            refresh_count: AtomicU64::new(0),
        }
    }

    /// Number of venue refreshes performed (observability and tests).
    pub fn refresh_count(&self) -> u64 {
        self.refresh_count.load(Ordering::SeqCst)
    }

    /// Current snapshot, refreshing at most once per TTL. Concurrent callers
    /// during a refresh wait on the gate and then reuse the fresh result.
    pub async fn snapshot(&self) -> VenueSnapshot {
        if let Some(snapshot) = self.fresh_snapshot().await {
            return snapshot;
        }

        // Single-flight: one caller refreshes, the rest re-check after.
        let _gate = self.refresh_gate.lock().await;
        if let Some(snapshot) = self.fresh_snapshot().await {
            return snapshot;
        }

        self.refresh().await;
        self.state.read().await.snapshot.clone()
    }

    pub async fn deployment_summary(&self) -> DeploymentSummary {
        // Views never trigger venue I/O; they read whatever is cached.
        self.state.read().await.summary.clone()
    }

    pub async fn holdings(&self) -> Vec<ExternalPosition> {
        self.state.read().await.snapshot.holdings.clone()
    }

    pub async fn is_serving_stale(&self) -> bool {
        let state = self.state.read().await;
        state
            .backoff_until
            .map(|until| Instant::now() < until)
            .unwrap_or(false)
    }

    async fn fresh_snapshot(&self) -> Option<VenueSnapshot> {
        let state = self.state.read().await;

        if let Some(until) = state.backoff_until
            && Instant::now() < until
        {
            // Rate-limit latch: serve stale to everyone until it expires.
            return Some(state.snapshot.clone());
        }

        let fresh = state
            .fetched_at
            .map(|at| at.elapsed() < self.ttl)
            .unwrap_or(false);
        if fresh {
            Some(state.snapshot.clone())
        } else {
            None
        }
    }

    /// One batched refresh. Partial success publishes what succeeded and
    /// keeps the stale value for what failed.
    async fn refresh(&self) {
        self.refresh_count.fetch_add(1, Ordering::SeqCst);
        let mut rate_limited = false;

        let account = match self.broker.account().await {
            Ok(a) => Some(a),
            Err(e) => {
                rate_limited |= matches!(e, BrokerError::RateLimited { .. });
                warn!("MarketDataCache: account fetch failed: {}", e);
                None
            }
        };

        tokio::time::sleep(self.call_spacing).await;
        let holdings = match self.broker.positions().await {
            Ok(p) => Some(p),
            Err(e) => {
                rate_limited |= matches!(e, BrokerError::RateLimited { .. });
                warn!("MarketDataCache: positions fetch failed: {}", e);
                None
            }
        };

        tokio::time::sleep(self.call_spacing).await;
        let open_orders = match self.broker.open_orders(None).await {
            Ok(o) => Some(o),
            Err(e) => {
                rate_limited |= matches!(e, BrokerError::RateLimited { .. });
                warn!("MarketDataCache: open orders fetch failed: {}", e);
                None
            }
        };

        let mut state = self.state.write().await;

        if let Some(account) = account {
            state.snapshot.account = Some(account);
        }
        if let Some(holdings) = holdings {
            state.snapshot.holdings = holdings;
        }
        if let Some(open_orders) = open_orders {
            state.snapshot.open_orders = open_orders;
        }

        state.summary = derive_summary(&state.snapshot);
        state.fetched_at = Some(Instant::now());

        if rate_limited {
            debug!(
                "MarketDataCache: entering rate-limit backoff for {:?}",
                self.rate_limit_backoff
            );
            state.backoff_until = Some(Instant::now() + self.rate_limit_backoff);
        } else {
            state.backoff_until = None;
        }
    }
}

fn derive_summary(snapshot: &VenueSnapshot) -> DeploymentSummary {
    let (equity, cash) = snapshot
        .account
        .as_ref()
        .map(|a| (a.equity, a.cash))
        .unwrap_or((Decimal::ZERO, Decimal::ZERO));

    let deployed_value: Decimal = snapshot.holdings.iter().map(|h| h.market_value).sum();
    let deployed_pct = if equity > Decimal::ZERO {
        deployed_value / equity
    } else {
        Decimal::ZERO
    };

    DeploymentSummary {
        equity,
        cash,
        deployed_value,
        deployed_pct,
        holding_count: snapshot.holdings.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock::MockBroker;

    #[tokio::test]
    async fn test_single_refresh_under_concurrent_readers() {
        let mock = Arc::new(MockBroker::new());
        let cache = Arc::new(MarketDataCache::new(
            mock.clone(),
            Duration::from_secs(60),
        ));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = Arc::clone(&cache);
            handles.push(tokio::spawn(async move { cache.snapshot().await }));
        }
        for handle in handles {
            let snapshot = handle.await.unwrap();
            assert!(snapshot.account.is_some());
        }

        assert_eq!(cache.refresh_count(), 1);
        assert_eq!(mock.call_count("account"), 1);
    }

    #[tokio::test]
    async fn test_ttl_expiry_triggers_second_refresh() {
        let mock = Arc::new(MockBroker::new());
        let cache = MarketDataCache::new(mock.clone(), Duration::from_millis(10));

        cache.snapshot().await;
        tokio::time::sleep(Duration::from_millis(30)).await;
        cache.snapshot().await;

        assert_eq!(cache.refresh_count(), 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_last_good_views() {
        let mock = Arc::new(MockBroker::new());
        let cache = MarketDataCache::new(mock.clone(), Duration::from_millis(1));

        let first = cache.snapshot().await;
        assert!(first.account.is_some());

        tokio::time::sleep(Duration::from_millis(5)).await;
        mock.fail_next("rate_limited", 3);

        // Every leg of this refresh fails: the cache publishes the previous
        // good views instead of discarding them, and latches backoff.
        let snapshot = cache.snapshot().await;
        assert!(snapshot.account.is_some());
        assert!(cache.is_serving_stale().await);
    }

    #[tokio::test]
    async fn test_backoff_serves_stale_without_venue_calls() {
        let mock = Arc::new(MockBroker::new());
        let cache = MarketDataCache::new(mock.clone(), Duration::from_millis(1));

        mock.fail_next("rate_limited", 3);
        cache.snapshot().await;
        let refreshes = cache.refresh_count();

        tokio::time::sleep(Duration::from_millis(5)).await;
        // TTL has expired but the backoff latch is armed: no new venue call.
        cache.snapshot().await;
        assert_eq!(cache.refresh_count(), refreshes);
    }

    #[tokio::test]
    async fn test_deployment_summary_derived() {
        use crate::domain::trading::types::{ExternalPosition, Symbol};
        use rust_decimal_macros::dec;

        let mock = Arc::new(MockBroker::with_equity(dec!(10000)));
        mock.set_position(ExternalPosition {
            symbol: Symbol::new("AAPL"),
            quantity: dec!(10),
            avg_entry_price: dec!(150),
            market_value: dec!(1500),
            unrealized_pnl: Decimal::ZERO,
        });

        let cache = MarketDataCache::new(mock, Duration::from_secs(60));
        cache.snapshot().await;

        let summary = cache.deployment_summary().await;
        assert_eq!(summary.equity, dec!(10000));
        assert_eq!(summary.deployed_value, dec!(1500));
        assert_eq!(summary.deployed_pct, dec!(0.15));
        assert_eq!(summary.holding_count, 1);
    }
}
