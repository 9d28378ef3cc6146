//! Best-effort advisor bus.
//!
//! Advisors are optional external scorers (sentiment, ML risk) returning a
//! scalar in [0, 1]. Scores are cached per advisor and symbol, failures fall
//! back to neutral, and the bus never blocks a cycle on a slow advisor
//! longer than its per-call deadline. Scores bias sizing; they never gate a
//! trade on their own.

use crate::domain::trading::types::Symbol;
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

pub const NEUTRAL_SCORE: f64 = 0.5;

#[async_trait]
pub trait Advisor: Send + Sync {
    fn name(&self) -> &str;
    /// Score in [0, 1]; 0 = maximally bearish, 1 = maximally bullish.
    async fn score(&self, symbol: &Symbol) -> Result<f64>;
}

pub struct AdvisorBus {
    advisors: Vec<Box<dyn Advisor>>,
    cache: Mutex<HashMap<(String, Symbol), (f64, Instant)>>,
    cache_ttl: Duration,
    call_deadline: Duration,
}

impl AdvisorBus {
    pub fn new(advisors: Vec<Box<dyn Advisor>>) -> Self {
        Self {
            advisors,
            cache: Mutex::new(HashMap::new()),
            cache_ttl: Duration::from_secs(300),
            call_deadline: Duration::from_secs(3),
        }
    }

    pub fn empty() -> Self {
        Self::new(Vec::new())
    }

    /// Mean of the available advisor scores; neutral when none respond.
    pub async fn composite_score(&self, symbol: &Symbol) -> f64 {
        if self.advisors.is_empty() {
            return NEUTRAL_SCORE;
        }

        let mut scores = Vec::with_capacity(self.advisors.len());
        for advisor in &self.advisors {
            scores.push(self.score_one(advisor.as_ref(), symbol).await);
        }

        let sum: f64 = scores.iter().sum();
        sum / scores.len() as f64
    }

    async fn score_one(&self, advisor: &dyn Advisor, symbol: &Symbol) -> f64 {
        let key = (advisor.name().to_string(), symbol.clone());

        if let Some((score, at)) = self
            .cache
            .lock()
            .expect("advisor cache poisoned")
            .get(&key)
            .copied()
            && at.elapsed() < self.cache_ttl
        {
            return score;
        }

        let outcome = tokio::time::timeout(self.call_deadline, advisor.score(symbol)).await;
        let score = match outcome {
            Ok(Ok(score)) => score.clamp(0.0, 1.0),
            Ok(Err(e)) => {
                warn!(
                    "AdvisorBus: {} failed for {} ({}), using neutral",
                    advisor.name(),
                    symbol,
                    e
                );
                NEUTRAL_SCORE
            }
            Err(_) => {
                warn!(
                    "AdvisorBus: {} timed out for {}, using neutral",
                    advisor.name(),
                    symbol
                );
                NEUTRAL_SCORE
            }
        };

        debug!("AdvisorBus: {} scored {} at {:.2}", advisor.name(), symbol, score);
        self.cache
            .lock()
            .expect("advisor cache poisoned")
            .insert(key, (score, Instant::now()));
        score
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct StaticAdvisor {
        name: String,
        score: f64,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Advisor for StaticAdvisor {
        fn name(&self) -> &str {
            &self.name
        }
        async fn score(&self, _symbol: &Symbol) -> Result<f64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.score)
        }
    }

    struct FailingAdvisor;

    #[async_trait]
    impl Advisor for FailingAdvisor {
        fn name(&self) -> &str {
            "failing"
        }
        async fn score(&self, _symbol: &Symbol) -> Result<f64> {
            anyhow::bail!("upstream unavailable")
        }
    }

    #[tokio::test]
    async fn test_empty_bus_is_neutral() {
        let bus = AdvisorBus::empty();
        assert_eq!(bus.composite_score(&Symbol::new("AAPL")).await, NEUTRAL_SCORE);
    }

    #[tokio::test]
    async fn test_composite_averages_scores() {
        let bus = AdvisorBus::new(vec![
            Box::new(StaticAdvisor {
                name: "bullish".into(),
                score: 0.9,
                calls: AtomicUsize::new(0),
            }),
            Box::new(StaticAdvisor {
                name: "bearish".into(),
                score: 0.1,
                calls: AtomicUsize::new(0),
            }),
        ]);
        let score = bus.composite_score(&Symbol::new("AAPL")).await;
        assert!((score - 0.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_failure_falls_back_to_neutral() {
        let bus = AdvisorBus::new(vec![Box::new(FailingAdvisor)]);
        assert_eq!(bus.composite_score(&Symbol::new("AAPL")).await, NEUTRAL_SCORE);
    }

    #[tokio::test]
    async fn test_scores_are_cached() {
        let bus = AdvisorBus::new(vec![Box::new(StaticAdvisor {
            name: "counted".into(),
            score: 0.7,
            calls: AtomicUsize::new(0),
        })]);

        let symbol = Symbol::new("AAPL");
        bus.composite_score(&symbol).await;
        bus.composite_score(&symbol).await;

        // The advisor itself only ran once; the second read hit the cache.
        let cache = bus.cache.lock().unwrap();
        assert_eq!(cache.len(), 1);
    }
}
