//! Per-profile trading control loop.
//!
//! One instance runs per enabled profile on its own cadence: snapshot the
//! venue, enforce the portfolio guards, classify the regime, then walk the
//! active symbol set sequentially — exits always evaluated before entries,
//! and every symbol wrapped in its own error perimeter so one bad symbol
//! cannot kill the profile.

use crate::application::advisors::AdvisorBus;
use crate::application::anomaly::{AnomalyClass, AnomalyMonitor};
use crate::application::lifecycle::{CycleOutcome, LifecycleConfig, PositionLifecycle};
use crate::application::pdt_guard::PdtGuard;
use crate::application::safe_mode::SafeMode;
use crate::application::strategy::StrategyEngine;
use crate::application::supervisor::{Supervisor, emergency_tripped};
use crate::config::{ProfileConfig, RiskEnvConfig, StrategyEnvConfig};
use crate::domain::events::{DegradationLevel, EngineEvent};
use crate::domain::market::bar::Bar;
use crate::domain::market::regime::{
    MarketRegime, RegimeDetector, VolatilityState, VolatilityTracker,
};
use crate::domain::ports::BrokerClient;
use crate::domain::risk::capital_tier::CapitalTier;
use crate::domain::risk::drawdown::DrawdownGuard;
use crate::domain::risk::sizing::{self, deployable_capital, derive_stops, position_size};
use crate::domain::trading::position::TradePosition;
use crate::domain::trading::types::{MarketClock, OrderSide, Signal, Symbol, Venue};
use crate::infrastructure::event_bus::EventBus;
use crate::infrastructure::journal::Journal;
use crate::infrastructure::observability::metrics::Metrics;
use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use statrs::statistics::{Data, Distribution};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// Shared protection and observability services every loop consults.
#[derive(Clone)]
pub struct SharedServices {
    pub pdt: Arc<PdtGuard>,
    pub supervisor: Arc<Supervisor>,
    pub anomaly: Arc<AnomalyMonitor>,
    pub safe_mode: Arc<SafeMode>,
    pub advisors: Arc<AdvisorBus>,
    pub events: EventBus,
    pub metrics: Metrics,
}

#[derive(Debug, Default)]
pub struct CycleReport {
    pub symbols_processed: usize,
    pub errors: usize,
}

pub struct ControlLoop {
    profile: ProfileConfig,
    broker: Arc<dyn BrokerClient>,
    strategy: StrategyEngine,
    lifecycle: PositionLifecycle,
    shared: SharedServices,
    drawdown: Arc<DrawdownGuard>,
    risk: RiskEnvConfig,
    strategy_cfg: StrategyEnvConfig,
    journal: Journal,
    vol_tracker: VolatilityTracker,
    regime_detector: RegimeDetector,
    positions: HashMap<Symbol, TradePosition>,
    last_prices: HashMap<Symbol, Decimal>,
    last_tier: Option<CapitalTier>,
    last_degradation: DegradationLevel,
    session_start_equity: Option<Decimal>,
    halted: bool,
    market_hours_bypass: bool,
    component_name: String,
}

impl ControlLoop {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        profile: ProfileConfig,
        broker: Arc<dyn BrokerClient>,
        journal: Journal,
        shared: SharedServices,
        drawdown: Arc<DrawdownGuard>,
        strategy_cfg: StrategyEnvConfig,
        risk: RiskEnvConfig,
        market_hours_bypass: bool,
    ) -> Self {
        let component_name = format!("control_loop:{}", profile.name);
        let lifecycle = PositionLifecycle::new(
            broker.clone(),
            journal.clone(),
            shared.events.clone(),
            profile.name.clone(),
            LifecycleConfig::from_profile(&profile),
        );
        let vol_tracker = VolatilityTracker::new(
            strategy_cfg.vix_threshold,
            strategy_cfg.vix_hysteresis,
        );
        let regime_detector = RegimeDetector::new(
            strategy_cfg.regime_window,
            strategy_cfg.strong_trend_threshold,
            strategy_cfg.range_trend_threshold,
        );

        Self {
            strategy: StrategyEngine::new(strategy_cfg.clone()),
            lifecycle,
            vol_tracker,
            regime_detector,
            profile,
            broker,
            shared,
            drawdown,
            risk,
            strategy_cfg,
            journal,
            positions: HashMap::new(),
            last_prices: HashMap::new(),
            last_tier: None,
            last_degradation: DegradationLevel::Normal,
            session_start_equity: None,
            halted: false,
            market_hours_bypass,
            component_name,
        }
    }

    pub fn component_name(&self) -> &str {
        &self.component_name
    }

    /// Account access proves both connectivity and credentials; used by the
    /// bootstrap before any task spawns.
    pub async fn startup_probe(&self) -> Result<(), crate::domain::errors::BrokerError> {
        self.broker.account().await.map(|_| ())
    }

    /// Run until shutdown. The in-flight cycle always finishes; shutdown is
    /// observed between cycles.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "ControlLoop [{}]: starting ({} bullish / {} bearish symbols, every {:?})",
            self.profile.name,
            self.profile.bullish_symbols.len(),
            self.profile.bearish_symbols.len(),
            self.profile.cycle_interval
        );

        loop {
            let started = Instant::now();
            let report = match self.cycle().await {
                Ok(report) => report,
                Err(e) => {
                    error!("ControlLoop [{}]: cycle failed: {:#}", self.profile.name, e);
                    CycleReport {
                        symbols_processed: 0,
                        errors: 1,
                    }
                }
            };

            self.shared.supervisor.beat(&self.component_name);
            self.shared
                .metrics
                .cycle_latency_seconds
                .with_label_values(&[self.profile.name.as_str()])
                .observe(started.elapsed().as_secs_f64());

            let degradation = self.publish_degradation(report.errors > 0);
            self.shared.events.publish(EngineEvent::CycleCompleted {
                profile: self.profile.name.clone(),
                symbols_processed: report.symbols_processed,
                errors: report.errors,
                elapsed_ms: started.elapsed().as_millis() as u64,
                degradation,
            });

            // Safe mode halves the interval so recovery is observed sooner.
            let factor = self.shared.safe_mode.params().cycle_interval_factor;
            let interval = self.profile.cycle_interval.mul_f64(factor.max(0.05));

            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("ControlLoop [{}]: shutdown requested, exiting cleanly", self.profile.name);
                        return;
                    }
                }
            }
        }
    }

    /// One pipeline pass. Public for the integration harness.
    pub async fn cycle(&mut self) -> Result<CycleReport> {
        // 1. Venue snapshot.
        let mut account = self.broker.account().await?;
        if let Some(cap) = self.risk.initial_capital
            && account.equity > cap
        {
            account.equity = cap;
        }
        let equity = account.equity * self.profile.capital_fraction;
        self.shared
            .metrics
            .equity_usd
            .with_label_values(&[self.profile.name.as_str()])
            .set(equity.to_f64().unwrap_or(0.0));

        if self.session_start_equity.is_none() {
            self.session_start_equity = Some(equity);
        }

        // 2. Reconcile venue-closed positions (bracket legs fill server-side).
        self.reconcile_positions().await?;
        self.shared
            .metrics
            .positions_count
            .with_label_values(&[self.profile.name.as_str()])
            .set(self.positions.len() as f64);

        // 3. Capital tier for this equity slice.
        let tier = CapitalTier::for_equity(equity);
        if self.last_tier != Some(tier) {
            if let Some(previous) = self.last_tier {
                info!(
                    "ControlLoop [{}]: capital tier {} -> {} (equity {})",
                    self.profile.name, previous, tier, equity
                );
                self.shared.events.publish(EngineEvent::TierChanged {
                    profile: self.profile.name.clone(),
                    from: previous.to_string(),
                    to: tier.to_string(),
                });
            }
            self.last_tier = Some(tier);
        }

        // 4. Portfolio guards: drawdown and session stop. Entries halt;
        //    exit management below keeps running.
        let status = self.drawdown.observe(equity);
        let was_halted = self.halted;
        self.halted = status.should_halt() || self.session_stop_breached(equity);
        if self.halted && !was_halted {
            warn!(
                "ControlLoop [{}]: entries HALTED (drawdown/session guard)",
                self.profile.name
            );
            self.shared.events.publish(EngineEvent::DrawdownWarning {
                peak: self.drawdown.peak_equity(),
                current: equity,
            });
        }

        // 5. Market hours gate. Data refresh continues regardless so the
        //    dashboard stays live; symbol work stops when closed.
        let clock = match self.broker.clock().await {
            Ok(clock) => clock,
            Err(e) => {
                warn!(
                    "ControlLoop [{}]: clock unavailable ({}), treating market as closed",
                    self.profile.name, e
                );
                MarketClock {
                    is_open: false,
                    next_open: None,
                    next_close: None,
                }
            }
        };
        if !clock.is_open && !self.market_hours_bypass {
            debug!(
                "ControlLoop [{}]: market closed, skipping symbol processing",
                self.profile.name
            );
            return Ok(CycleReport::default());
        }

        // 6. Regime classification off the index proxy.
        let proxy = self.index_proxy();
        let proxy_bars = match self
            .broker
            .history(&proxy, self.strategy_cfg.history_bars)
            .await
        {
            Ok(bars) => bars,
            Err(e) => {
                warn!(
                    "ControlLoop [{}]: index proxy history failed ({}), holding regime",
                    self.profile.name, e
                );
                Vec::new()
            }
        };
        let vol_index = realized_volatility_index(&proxy_bars);
        let vol_state = self.vol_tracker.update(vol_index);
        let regime = self.regime_detector.detect(&proxy_bars, vol_state);

        // 7. Active set: regime-selected symbols plus everything held, so
        //    exits are always managed.
        let configured = match regime {
            MarketRegime::StrongBear => self.profile.bearish_symbols.clone(),
            _ => self.profile.bullish_symbols.clone(),
        };
        let mut active: Vec<Symbol> = configured;
        let held: HashSet<Symbol> = self.positions.keys().cloned().collect();
        for symbol in held {
            if !active.contains(&symbol) {
                active.push(symbol);
            }
        }

        // 8. Sequential symbol walk inside the error perimeter.
        let mut report = CycleReport::default();
        for symbol in &active {
            report.symbols_processed += 1;
            if let Err(e) = self
                .process_symbol(symbol, equity, tier, regime, vol_state, vol_index)
                .await
            {
                report.errors += 1;
                error!(
                    "ControlLoop [{}]: symbol {} failed, isolating: {:#}",
                    self.profile.name, symbol, e
                );
            }
        }

        // Cycle-level error rate feeds the anomaly monitor.
        if self
            .shared
            .anomaly
            .check_error_rate(report.errors, report.symbols_processed.max(1))
            == AnomalyClass::Critical
        {
            self.shared
                .safe_mode
                .activate(&format!("cycle error rate {}/{}", report.errors, report.symbols_processed));
        }

        Ok(report)
    }

    fn index_proxy(&self) -> Symbol {
        match self.broker.venue() {
            Venue::Alpaca => Symbol::new("SPY"),
            _ => self
                .profile
                .bullish_symbols
                .first()
                .cloned()
                .unwrap_or_else(|| Symbol::new("XBT/USD")),
        }
    }

    fn session_stop_breached(&self, equity: Decimal) -> bool {
        let Some(start) = self.session_start_equity else {
            return false;
        };
        if start <= Decimal::ZERO {
            return false;
        }
        (start - equity) / start > self.risk.portfolio_stop_loss_pct
    }

    async fn reconcile_positions(&mut self) -> Result<()> {
        if self.positions.is_empty() {
            return Ok(());
        }
        let venue_positions = self.broker.positions().await?;
        let at_venue: HashSet<Symbol> = venue_positions.into_iter().map(|p| p.symbol).collect();

        let held: Vec<Symbol> = self.positions.keys().cloned().collect();
        for symbol in held {
            if at_venue.contains(&symbol) {
                continue;
            }
            let Some(position) = self.positions.get(&symbol) else {
                continue;
            };
            // A just-placed limit entry may not show as a venue position
            // yet; give it a grace window before declaring it closed.
            let age = Utc::now() - position.entry_time;
            if age < chrono::Duration::minutes(5) {
                continue;
            }

            let position = self.positions.remove(&symbol).expect("position checked above");
            let last = self
                .last_prices
                .get(&symbol)
                .copied()
                .unwrap_or(position.entry_price);
            info!(
                "ControlLoop [{}]: {} no longer at venue, reconciling close",
                self.profile.name, symbol
            );
            self.lifecycle
                .reconcile_external_close(&position, last)
                .await?;
        }
        Ok(())
    }

    async fn process_symbol(
        &mut self,
        symbol: &Symbol,
        equity: Decimal,
        tier: CapitalTier,
        regime: MarketRegime,
        vol_state: VolatilityState,
        vol_index: Decimal,
    ) -> Result<()> {
        let Some(bar) = self.broker.latest_bar(symbol).await? else {
            debug!(
                "ControlLoop [{}]: no bar for {}, skipping",
                self.profile.name, symbol
            );
            return Ok(());
        };
        let price = bar.close;

        // Crash/spike detection against the previous sample.
        if let Some(previous) = self.last_prices.insert(symbol.clone(), price)
            && self.shared.anomaly.check_price_move(previous, price) == AnomalyClass::Critical
        {
            self.shared.metrics.anomalies_total
                .with_label_values(&[symbol.as_str(), "price_move"])
                .inc();
            self.shared.events.publish(EngineEvent::AnomalyDetected {
                metric: format!("price:{}", symbol),
                z_score: 0.0,
            });
            self.shared
                .safe_mode
                .activate(&format!("price shock on {}", symbol));
        }

        // Exits before entries: a stop hit in the same cycle as a fresh Buy
        // must resolve to exit-only.
        if let Some(position) = self.positions.remove(symbol) {
            match self.lifecycle.manage_exits(position, &bar, vol_index).await? {
                CycleOutcome::Closed { .. } => return Ok(()),
                CycleOutcome::Held(position) => {
                    self.positions.insert(symbol.clone(), position);
                }
            }
        }

        let history = self.broker.history(symbol, self.strategy_cfg.history_bars).await?;

        // Volume spike check against the trailing average.
        if history.len() >= 10 {
            let trailing: Decimal = history[history.len() - 10..]
                .iter()
                .map(|b| b.volume)
                .sum::<Decimal>()
                / dec!(10);
            if self.shared.anomaly.check_volume(bar.volume, trailing) == AnomalyClass::Critical {
                self.shared.metrics.anomalies_total
                    .with_label_values(&[symbol.as_str(), "volume"])
                    .inc();
                self.shared
                    .safe_mode
                    .activate(&format!("volume spike on {}", symbol));
            }
        }

        let signal = self.strategy.signal(symbol, regime, vol_state, &history);
        self.shared.events.publish(EngineEvent::SignalGenerated {
            profile: self.profile.name.clone(),
            symbol: symbol.clone(),
            signal: signal.clone(),
            regime,
        });

        match signal {
            Signal::Sell { reason } => self.handle_sell(symbol, price, equity, &reason).await,
            Signal::Buy { reason } => {
                self.handle_buy(symbol, price, equity, tier, regime, vol_index, &reason)
                    .await
            }
            Signal::Hold { .. } => Ok(()),
        }
    }

    async fn handle_sell(
        &mut self,
        symbol: &Symbol,
        price: Decimal,
        equity: Decimal,
        reason: &str,
    ) -> Result<()> {
        let Some(position) = self.positions.get(symbol) else {
            return Ok(()); // nothing to sell; shorting is out of scope
        };

        if let Err(violation) = self.shared.pdt.check_sell(symbol, equity, Utc::now()).await {
            warn!(
                "ControlLoop [{}]: sell of {} blocked: {}",
                self.profile.name, symbol, violation
            );
            self.shared.events.publish(EngineEvent::OrderRejected {
                profile: self.profile.name.clone(),
                symbol: symbol.clone(),
                side: OrderSide::Sell,
                reason: violation.to_string(),
            });
            return Ok(());
        }

        let position = position.clone();
        self.lifecycle
            .close_position(&position, price, &format!("sell signal: {}", reason))
            .await?;
        self.positions.remove(symbol);
        self.shared
            .metrics
            .orders_total
            .with_label_values(&["sell", "accepted"])
            .inc();
        Ok(())
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_buy(
        &mut self,
        symbol: &Symbol,
        price: Decimal,
        equity: Decimal,
        tier: CapitalTier,
        regime: MarketRegime,
        vol_index: Decimal,
        reason: &str,
    ) -> Result<()> {
        if self.positions.contains_key(symbol) {
            return Ok(()); // already long; scaling is the lifecycle's job
        }
        if emergency_tripped() {
            debug!(
                "ControlLoop [{}]: entry skipped for {} (emergency latch)",
                self.profile.name, symbol
            );
            return Ok(());
        }
        if self.halted {
            debug!(
                "ControlLoop [{}]: entry skipped for {} (portfolio guard)",
                self.profile.name, symbol
            );
            return Ok(());
        }
        let safe_params = self.shared.safe_mode.params();
        if safe_params.entries_paused {
            debug!(
                "ControlLoop [{}]: entry skipped for {} (safe mode pause)",
                self.profile.name, symbol
            );
            return Ok(());
        }
        self.shared.pdt.check_buy()?;

        let params = tier.params();
        if self.positions.len() >= params.max_positions {
            debug!(
                "ControlLoop [{}]: entry skipped for {} ({} positions at tier cap)",
                self.profile.name,
                symbol,
                self.positions.len()
            );
            return Ok(());
        }

        // Stop/target: venue override beats tier multipliers; safe mode then
        // tightens the stop distance.
        let (mut stop_loss, take_profit) = derive_stops(
            price,
            self.profile.baseline_exits(),
            &params,
            self.profile.venue_exit_override,
        );
        if safe_params.stop_distance_factor < Decimal::ONE {
            stop_loss = price - (price - stop_loss) * safe_params.stop_distance_factor;
        }

        let deployable = deployable_capital(equity, self.risk.reserve_percent);
        let mut quantity = position_size(deployable, price, vol_index, stop_loss, &params);
        if quantity <= Decimal::ZERO {
            return Ok(());
        }
        quantity *= safe_params.sizing_multiplier;

        // Advisors bias size, never gate alone.
        let advisor_score = self.shared.advisors.composite_score(symbol).await;
        if advisor_score < 0.3 {
            debug!(
                "ControlLoop [{}]: advisors bearish on {} ({:.2}), halving size",
                self.profile.name, symbol, advisor_score
            );
            quantity *= dec!(0.5);
        }

        // Kelly cap from journal statistics when enabled and significant.
        if self.risk.kelly_enabled
            && let Ok(stats) = self.journal.symbol_stats(symbol).await
            && stats.is_significant(self.risk.kelly_min_trades)
        {
            let kelly_value = sizing::kelly_position_value(
                equity,
                &stats,
                self.risk.kelly_reward_risk,
                self.risk.kelly_fraction * safe_params.sizing_multiplier,
                self.risk.reserve_percent,
            );
            let kelly_quantity = kelly_value / price;
            if kelly_quantity < quantity {
                debug!(
                    "ControlLoop [{}]: Kelly cap trims {} from {} to {}",
                    self.profile.name, symbol, quantity, kelly_quantity
                );
                quantity = kelly_quantity;
            }
        }

        if quantity <= Decimal::ZERO {
            return Ok(());
        }

        info!(
            "ControlLoop [{}]: BUY {} x {} @ {} ({}; regime {}, tier {})",
            self.profile.name, symbol, quantity, price, reason, regime, tier
        );
        let position = self
            .lifecycle
            .open_position(
                symbol,
                quantity,
                price,
                stop_loss,
                take_profit,
                self.strategy.strategy_name(regime),
            )
            .await?;
        self.positions.insert(symbol.clone(), position);
        self.shared
            .metrics
            .orders_total
            .with_label_values(&["buy", "accepted"])
            .inc();
        Ok(())
    }

    fn publish_degradation(&mut self, cycle_had_errors: bool) -> DegradationLevel {
        let level = if emergency_tripped() {
            DegradationLevel::Emergency
        } else if self.halted {
            DegradationLevel::Halted
        } else if self.shared.safe_mode.is_active() {
            DegradationLevel::SafeMode
        } else if cycle_had_errors {
            DegradationLevel::Degraded
        } else {
            DegradationLevel::Normal
        };

        if level != self.last_degradation {
            self.shared.metrics.degradation_level.set(match level {
                DegradationLevel::Normal => 0.0,
                DegradationLevel::Degraded => 1.0,
                DegradationLevel::SafeMode => 2.0,
                DegradationLevel::Halted => 3.0,
                DegradationLevel::Emergency => 4.0,
            });
            self.shared
                .events
                .publish(EngineEvent::DegradationChanged { level });
            self.last_degradation = level;
        }
        level
    }

    /// Test/harness hook: currently held positions.
    pub fn held_positions(&self) -> &HashMap<Symbol, TradePosition> {
        &self.positions
    }
}

/// Annualized realized volatility of the proxy's closes, scaled onto the
/// familiar index range (so ~20 means a calm tape). Used when no direct
/// volatility index feed is available.
pub fn realized_volatility_index(bars: &[Bar]) -> Decimal {
    if bars.len() < 2 {
        return dec!(20);
    }

    let closes: Vec<f64> = bars
        .iter()
        .filter_map(|b| b.close.to_f64())
        .filter(|c| *c > 0.0)
        .collect();
    if closes.len() < 2 {
        return dec!(20);
    }

    let returns: Vec<f64> = closes
        .windows(2)
        .map(|w| (w[1] - w[0]) / w[0])
        .collect();
    let Some(sd) = Data::new(returns).std_dev() else {
        return dec!(20);
    };
    if !sd.is_finite() {
        return dec!(20);
    }

    let annualized = sd * 252f64.sqrt() * 100.0;
    Decimal::from_f64_retain(annualized).unwrap_or(dec!(20))
}
