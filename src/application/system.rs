//! Application bootstrap and task supervision.
//!
//! One `Runtime` of explicitly-threaded services is assembled at startup
//! (no package-level mutable state beyond the supervisor's emergency latch):
//! venue clients wrapped in resilience, the journal, the protection
//! services, one control loop per profile, and the background tasks
//! (supervisor monitor, safe-mode recovery, cache refreshers, watchdog
//! heartbeat, crypto private stream).

use crate::application::advisors::AdvisorBus;
use crate::application::anomaly::AnomalyMonitor;
use crate::application::control_loop::{ControlLoop, SharedServices};
use crate::application::pdt_guard::PdtGuard;
use crate::application::safe_mode::SafeMode;
use crate::application::supervisor::Supervisor;
use crate::config::{Config, ProfileConfig};
use crate::domain::market::bar::Bar;
use crate::domain::ports::BrokerClient;
use crate::domain::risk::drawdown::DrawdownGuard;
use crate::domain::trading::types::{Symbol, Venue};
use crate::infrastructure::alpaca::AlpacaClient;
use crate::infrastructure::core::resilient::{ResilienceConfig, ResilientClient};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::journal::Journal;
use crate::infrastructure::kraken::{KrakenClient, KrakenPrivateStream};
use crate::infrastructure::market_cache::MarketDataCache;
use crate::infrastructure::mock::MockBroker;
use crate::infrastructure::observability::Metrics;
use crate::infrastructure::watchdog::WatchdogSender;
use anyhow::{Context, Result};
use chrono::Utc;
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

pub struct Application {
    config: Config,
    journal: Journal,
    metrics: Metrics,
    events: EventBus,
    supervisor: Arc<Supervisor>,
    safe_mode: Arc<SafeMode>,
    loops: Vec<ControlLoop>,
    caches: Vec<Arc<MarketDataCache>>,
    kraken_stream: Option<Arc<KrakenPrivateStream>>,
    mocks: Vec<Arc<MockBroker>>,
}

impl Application {
    pub async fn build(config: Config) -> Result<Self> {
        let journal = Journal::new(&config.journal_db_url)
            .await
            .context("journal initialization failed")?;
        let metrics = Metrics::new().context("metrics registry failed")?;
        let events = EventBus::new();

        let safe_mode = Arc::new(SafeMode::new(events.clone()));
        let anomaly = Arc::new(AnomalyMonitor::new());
        let advisors = Arc::new(AdvisorBus::empty());
        let pdt = Arc::new(PdtGuard::new(
            journal.clone(),
            config.risk.pdt_protection_enabled,
        ));

        // One venue client per profile, shared where profiles share a venue.
        let mut mocks = Vec::new();
        let mut brokers: Vec<Arc<dyn BrokerClient>> = Vec::new();
        let mut kraken_raw: Option<Arc<KrakenClient>> = None;
        for profile in &config.profiles {
            let inner: Arc<dyn BrokerClient> = if config.test_mode_enabled {
                let mock = Arc::new(MockBroker::new());
                seed_simulation_bars(&mock, profile);
                mocks.push(mock.clone());
                mock
            } else {
                match profile.venue {
                    Venue::Alpaca => Arc::new(AlpacaClient::new(
                        config.broker.alpaca.api_key.clone(),
                        config.broker.alpaca.api_secret.clone(),
                        config.broker.alpaca.base_url.clone(),
                        config.broker.alpaca.data_url.clone(),
                    )),
                    Venue::Kraken => {
                        let client = Arc::new(KrakenClient::new(
                            config.broker.kraken.api_key.clone(),
                            config.broker.kraken.api_secret.clone(),
                            config.broker.kraken.base_url.clone(),
                        ));
                        kraken_raw = Some(client.clone());
                        client
                    }
                    Venue::Mock => Arc::new(MockBroker::new()),
                }
            };
            brokers.push(Arc::new(ResilientClient::new(
                inner,
                metrics.clone(),
                ResilienceConfig::default(),
            )));
        }

        let supervisor = Arc::new(Supervisor::new(
            brokers.clone(),
            events.clone(),
            metrics.clone(),
        ));

        let shared = SharedServices {
            pdt,
            supervisor: supervisor.clone(),
            anomaly,
            safe_mode: safe_mode.clone(),
            advisors,
            events: events.clone(),
            metrics: metrics.clone(),
        };

        let mut loops = Vec::new();
        let mut caches = Vec::new();
        for (profile, broker) in config.profiles.iter().zip(brokers.iter()) {
            let drawdown = Arc::new(DrawdownGuard::new(config.risk.max_drawdown_pct));
            loops.push(ControlLoop::new(
                profile.clone(),
                broker.clone(),
                journal.clone(),
                shared.clone(),
                drawdown,
                config.strategy.clone(),
                config.risk.clone(),
                config.market_hours_bypass,
            ));
            caches.push(Arc::new(MarketDataCache::new(
                broker.clone(),
                Duration::from_secs(60),
            )));
        }

        let kraken_stream = kraken_raw.map(|client| {
            Arc::new(KrakenPrivateStream::new(
                client,
                config.broker.kraken.ws_url.clone(),
            ))
        });

        Ok(Self {
            config,
            journal,
            metrics,
            events,
            supervisor,
            safe_mode,
            loops,
            caches,
            kraken_stream,
            mocks,
        })
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Prometheus text exposition for the external scraper/pusher.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Spawn every task and run until shutdown flips. Startup venue
    /// verification is fatal so a dead venue exits non-zero instead of
    /// trading blind.
    pub async fn run(self, shutdown: watch::Receiver<bool>) -> Result<()> {
        if self.config.autonomous_trading {
            for control_loop in &self.loops {
                // A dead venue at startup is a configuration-grade failure;
                // bail before any task spawns instead of trading blind.
                control_loop
                    .startup_probe()
                    .await
                    .context("fatal: venue unreachable at startup")?;
            }
        }

        let mut handles: Vec<JoinHandle<()>> = Vec::new();

        handles.push(tokio::spawn(
            self.supervisor.clone().run(shutdown.clone()),
        ));
        handles.push(tokio::spawn(self.safe_mode.clone().run(shutdown.clone())));

        if let Some(url) = self.config.watchdog_url.clone() {
            let sender = WatchdogSender::new(url);
            let rx = shutdown.clone();
            handles.push(tokio::spawn(async move { sender.run(rx).await }));
        }

        for cache in &self.caches {
            let cache = cache.clone();
            let mut rx = shutdown.clone();
            handles.push(tokio::spawn(async move {
                // Keep the dashboard views warm even while loops are idle.
                loop {
                    tokio::select! {
                        _ = tokio::time::sleep(Duration::from_secs(30)) => {
                            let _ = cache.snapshot().await;
                        }
                        _ = rx.changed() => return,
                    }
                }
            }));
        }

        if let Some(stream) = &self.kraken_stream {
            let stream = stream.clone();
            let rx = shutdown.clone();
            handles.push(tokio::spawn(async move { stream.run(rx).await }));
        }

        if self.config.test_mode_enabled {
            for (mock, profile) in self.mocks.iter().zip(self.config.profiles.iter()) {
                handles.push(spawn_simulation_feeder(
                    mock.clone(),
                    profile.clone(),
                    self.config.test_mode_frequency,
                    shutdown.clone(),
                ));
            }
        }

        if self.config.autonomous_trading {
            for control_loop in self.loops {
                self.supervisor.register(
                    control_loop.component_name(),
                    Duration::from_secs(self.config.supervisor_silence_secs),
                );
                handles.push(tokio::spawn(control_loop.run(shutdown.clone())));
            }
            info!("Application: trading loops armed");
        } else {
            info!("Application: AUTONOMOUS_TRADING off; data refresh only");
        }

        let mut rx = shutdown;
        let _ = rx.changed().await;
        info!("Application: shutdown signal received, draining tasks");

        for handle in handles {
            if tokio::time::timeout(Duration::from_secs(45), handle)
                .await
                .is_err()
            {
                warn!("Application: a task did not drain in time, detaching");
            }
        }
        Ok(())
    }
}

/// Seed enough synthetic history for indicators to warm up immediately.
fn seed_simulation_bars(mock: &MockBroker, profile: &ProfileConfig) {
    let mut symbols = profile.bullish_symbols.clone();
    symbols.extend(profile.bearish_symbols.clone());
    symbols.push(Symbol::new("SPY"));

    for symbol in symbols {
        let mut price = 100.0;
        let mut rng = rand::rng();
        for i in 0..120 {
            price *= 1.0 + rng.random_range(-0.004..0.004);
            mock.push_bar(symbol.clone(), synthetic_bar(price, i));
        }
    }
}

fn synthetic_bar(price: f64, index: i64) -> Bar {
    let close = Decimal::from_f64_retain(price).unwrap_or(dec!(100));
    Bar {
        open_time: Utc::now() - chrono::Duration::minutes(120 - index),
        open: close,
        high: close * dec!(1.001),
        low: close * dec!(0.999),
        close,
        volume: dec!(1000),
    }
}

/// Test-mode feeder: a slow random walk so the loops see moving prices.
fn spawn_simulation_feeder(
    mock: Arc<MockBroker>,
    profile: ProfileConfig,
    frequency_secs: u64,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut symbols = profile.bullish_symbols.clone();
        symbols.extend(profile.bearish_symbols.clone());
        symbols.push(Symbol::new("SPY"));
        let mut prices: Vec<f64> = symbols.iter().map(|_| 100.0).collect();
        let mut tick = 0i64;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(Duration::from_secs(frequency_secs.max(1))) => {
                    tick += 1;
                    for (symbol, price) in symbols.iter().zip(prices.iter_mut()) {
                        let step: f64 = rand::rng().random_range(-0.005..0.005);
                        *price *= 1.0 + step;
                        mock.push_bar(symbol.clone(), synthetic_bar(*price, 120 + tick));
                    }
                }
                _ = shutdown.changed() => return,
            }
        }
    })
}
