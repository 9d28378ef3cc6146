//! Token-bucket rate limiting, sized per endpoint class.
//!
//! Venue quotas differ by endpoint family (order placement is scarcer than
//! market data), so each class gets its own bucket. An empty bucket waits up
//! to the caller's deadline, then fails as `RateLimited` rather than
//! touching the venue.

use crate::domain::errors::BrokerError;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointClass {
    Account,
    MarketData,
    Trading,
}

impl EndpointClass {
    pub fn label(&self) -> &'static str {
        match self {
            EndpointClass::Account => "account",
            EndpointClass::MarketData => "market_data",
            EndpointClass::Trading => "trading",
        }
    }
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

pub struct TokenBucket {
    capacity: f64,
    refill_per_sec: f64,
    state: Mutex<BucketState>,
}

impl TokenBucket {
    pub fn new(capacity: u32, refill_per_sec: f64) -> Self {
        Self {
            capacity: capacity as f64,
            refill_per_sec,
            state: Mutex::new(BucketState {
                tokens: capacity as f64,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Take one token, waiting at most `deadline`.
    pub async fn acquire(&self, deadline: Duration) -> Result<(), BrokerError> {
        let started = Instant::now();
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let elapsed = state.last_refill.elapsed().as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                state.last_refill = Instant::now();

                if state.tokens >= 1.0 {
                    state.tokens -= 1.0;
                    return Ok(());
                }
                // Time until one token is available.
                Duration::from_secs_f64((1.0 - state.tokens) / self.refill_per_sec)
            };

            if started.elapsed() + wait > deadline {
                debug!("TokenBucket: deadline exceeded waiting for a token");
                return Err(BrokerError::RateLimited {
                    retry_after_secs: wait.as_secs().max(1),
                });
            }
            tokio::time::sleep(wait).await;
        }
    }
}

/// One bucket per endpoint class, with venue-shaped defaults.
pub struct RateLimiterSet {
    account: TokenBucket,
    market_data: TokenBucket,
    trading: TokenBucket,
}

impl RateLimiterSet {
    pub fn new(account: TokenBucket, market_data: TokenBucket, trading: TokenBucket) -> Self {
        Self {
            account,
            market_data,
            trading,
        }
    }

    /// Conservative defaults well under both venues' published quotas.
    pub fn default_for_venue() -> Self {
        Self {
            account: TokenBucket::new(10, 1.0),
            market_data: TokenBucket::new(30, 3.0),
            trading: TokenBucket::new(10, 0.5),
        }
    }

    pub async fn acquire(
        &self,
        class: EndpointClass,
        deadline: Duration,
    ) -> Result<(), BrokerError> {
        match class {
            EndpointClass::Account => self.account.acquire(deadline).await,
            EndpointClass::MarketData => self.market_data.acquire(deadline).await,
            EndpointClass::Trading => self.trading.acquire(deadline).await,
        }
    }
}
