//! Shared builders for the integration scenarios.
#![allow(dead_code)] // each test binary uses a different subset

use chrono::{Duration as ChronoDuration, Utc};
use quantpilot::application::advisors::AdvisorBus;
use quantpilot::application::anomaly::AnomalyMonitor;
use quantpilot::application::control_loop::{ControlLoop, SharedServices};
use quantpilot::application::pdt_guard::PdtGuard;
use quantpilot::application::safe_mode::SafeMode;
use quantpilot::application::supervisor::Supervisor;
use quantpilot::config::{ProfileConfig, RiskEnvConfig, StrategyEnvConfig};
use quantpilot::domain::market::bar::Bar;
use quantpilot::domain::ports::BrokerClient;
use quantpilot::domain::risk::drawdown::DrawdownGuard;
use quantpilot::domain::trading::types::{Symbol, Venue};
use quantpilot::infrastructure::event_bus::EventBus;
use quantpilot::infrastructure::journal::Journal;
use quantpilot::infrastructure::mock::MockBroker;
use quantpilot::infrastructure::observability::Metrics;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;

pub fn bar_at(price: Decimal, minutes_ago: i64) -> Bar {
    Bar {
        open_time: Utc::now() - ChronoDuration::minutes(minutes_ago),
        open: price,
        high: price * dec!(1.001),
        low: price * dec!(0.999),
        close: price,
        volume: dec!(1000),
    }
}

/// Flat tape that drifts gently down at the end: weak trend (range-bound
/// regime) with a deeply oversold RSI.
pub fn oversold_tape() -> Vec<Bar> {
    let mut bars = Vec::new();
    for i in 0..45 {
        bars.push(bar_at(dec!(100), 60 - i));
    }
    let mut price = dec!(100);
    for i in 0..12 {
        price -= dec!(0.3);
        bars.push(bar_at(price, 15 - i));
    }
    bars
}

/// Gentle rise from `start`: overbought RSI without reaching a 2% target.
pub fn overbought_tape(start: Decimal) -> Vec<Bar> {
    let mut bars = Vec::new();
    for i in 0..20 {
        bars.push(bar_at(start, 60 - i));
    }
    let mut price = start;
    for i in 0..30 {
        price *= dec!(1.0004);
        bars.push(bar_at(price, 40 - i));
    }
    bars
}

pub fn test_strategy_config() -> StrategyEnvConfig {
    StrategyEnvConfig {
        rsi_period: 14,
        rsi_lower: dec!(30),
        rsi_upper: dec!(70),
        macd_fast_period: 12,
        macd_slow_period: 26,
        macd_signal_period: 9,
        macd_threshold: dec!(0.1),
        vix_threshold: dec!(20),
        vix_hysteresis: dec!(1),
        regime_window: 20,
        strong_trend_threshold: dec!(5),
        range_trend_threshold: dec!(1),
        history_bars: 60,
        atr_period: 14,
    }
}

pub fn test_risk_config() -> RiskEnvConfig {
    RiskEnvConfig {
        portfolio_stop_loss_pct: dec!(0.5),
        max_drawdown_pct: dec!(0.5),
        pdt_protection_enabled: true,
        reserve_percent: dec!(0.1),
        kelly_enabled: false,
        kelly_fraction: dec!(0.5),
        kelly_reward_risk: dec!(2),
        kelly_min_trades: 30,
        initial_capital: None,
    }
}

pub fn test_profile(symbols: &[&str]) -> ProfileConfig {
    ProfileConfig {
        name: "equity".to_string(),
        venue: Venue::Alpaca,
        capital_fraction: Decimal::ONE,
        bullish_symbols: symbols.iter().map(Symbol::new).collect(),
        bearish_symbols: vec![],
        take_profit_pct: dec!(0.02),
        stop_loss_pct: dec!(0.01),
        trailing_stop_pct: dec!(0.005),
        cycle_interval: Duration::from_millis(50),
        partial_exits_enabled: false,
        micro_scaling_enabled: false,
        venue_exit_override: None,
        grid_order_size: dec!(0.5),
        grid_volatility_threshold: dec!(30),
    }
}

pub struct Harness {
    pub control_loop: ControlLoop,
    pub journal: Journal,
    pub safe_mode: Arc<SafeMode>,
    pub events: EventBus,
}

pub async fn harness(mock: Arc<MockBroker>, profile: ProfileConfig) -> Harness {
    harness_opts(mock, profile, true).await
}

pub async fn harness_opts(
    mock: Arc<MockBroker>,
    profile: ProfileConfig,
    market_hours_bypass: bool,
) -> Harness {
    let journal = Journal::in_memory().await.unwrap();
    let events = EventBus::new();
    let metrics = Metrics::default();
    let safe_mode = Arc::new(SafeMode::new(events.clone()));

    let shared = SharedServices {
        pdt: Arc::new(PdtGuard::new(journal.clone(), true)),
        supervisor: Arc::new(Supervisor::new(
            vec![mock.clone() as Arc<dyn BrokerClient>],
            events.clone(),
            metrics.clone(),
        )),
        anomaly: Arc::new(AnomalyMonitor::new()),
        safe_mode: safe_mode.clone(),
        advisors: Arc::new(AdvisorBus::empty()),
        events: events.clone(),
        metrics,
    };

    let control_loop = ControlLoop::new(
        profile,
        mock,
        journal.clone(),
        shared,
        Arc::new(DrawdownGuard::new(dec!(0.5))),
        test_strategy_config(),
        test_risk_config(),
        market_hours_bypass,
    );

    Harness {
        control_loop,
        journal,
        safe_mode,
        events,
    }
}
