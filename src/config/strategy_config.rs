//! Strategy and regime threshold configuration.

use crate::config::parse;
use anyhow::Result;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

#[derive(Debug, Clone)]
pub struct StrategyEnvConfig {
    // RSI mean reversion
    pub rsi_period: usize,
    pub rsi_lower: Decimal,
    pub rsi_upper: Decimal,

    // MACD trend following
    pub macd_fast_period: usize,
    pub macd_slow_period: usize,
    pub macd_signal_period: usize,
    pub macd_threshold: Decimal,

    // Regime detection
    pub vix_threshold: Decimal,
    pub vix_hysteresis: Decimal,
    pub regime_window: usize,
    pub strong_trend_threshold: Decimal,
    pub range_trend_threshold: Decimal,

    // History depth requested per symbol each cycle
    pub history_bars: usize,
    pub atr_period: usize,
}

impl StrategyEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            rsi_period: parse::usize_var("RSI_PERIOD", 14)?,
            rsi_lower: parse::decimal_var("RSI_LOWER", dec!(30))?,
            rsi_upper: parse::decimal_var("RSI_UPPER", dec!(70))?,
            macd_fast_period: parse::usize_var("MACD_FAST_PERIOD", 12)?,
            macd_slow_period: parse::usize_var("MACD_SLOW_PERIOD", 26)?,
            macd_signal_period: parse::usize_var("MACD_SIGNAL_PERIOD", 9)?,
            macd_threshold: parse::decimal_var("MACD_THRESHOLD", dec!(0.1))?,
            vix_threshold: parse::decimal_var("VIX_THRESHOLD", dec!(20))?,
            vix_hysteresis: parse::decimal_var("VIX_HYSTERESIS", dec!(1))?,
            regime_window: parse::usize_var("REGIME_WINDOW", 20)?,
            strong_trend_threshold: parse::decimal_var("STRONG_TREND_THRESHOLD", dec!(5))?,
            range_trend_threshold: parse::decimal_var("RANGE_TREND_THRESHOLD", dec!(1))?,
            history_bars: parse::usize_var("HISTORY_BARS", 60)?,
            atr_period: parse::usize_var("ATR_PERIOD", 14)?,
        })
    }
}
