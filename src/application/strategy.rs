//! Regime-aware signal generation.
//!
//! `signal` is a pure function over the bar history: RSI mean-reversion in
//! ranging markets, MACD trend-following in strong trends, and a whipsaw
//! guard (3x MACD threshold, RSI fallback) under high volatility.

use crate::config::StrategyEnvConfig;
use crate::domain::market::bar::Bar;
use crate::domain::market::indicators::{closes, macd, rsi};
use crate::domain::market::regime::{MarketRegime, VolatilityState};
use crate::domain::trading::types::{Signal, Symbol};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

pub struct StrategyEngine {
    config: StrategyEnvConfig,
}

impl StrategyEngine {
    pub fn new(config: StrategyEnvConfig) -> Self {
        Self { config }
    }

    /// Strategy tag recorded with opened positions for journal statistics.
    pub fn strategy_name(&self, regime: MarketRegime) -> &'static str {
        match regime {
            MarketRegime::RangeBound | MarketRegime::Neutral => "rsi_reversion",
            MarketRegime::StrongBull | MarketRegime::StrongBear => "macd_trend",
            MarketRegime::HighVolatility => "volatility_guarded",
        }
    }

    pub fn signal(
        &self,
        symbol: &Symbol,
        regime: MarketRegime,
        vol_state: VolatilityState,
        history: &[Bar],
    ) -> Signal {
        let prices = closes(history);
        if prices.len() < self.config.rsi_period + 1 {
            return Signal::hold("insufficient data");
        }

        let signal = match regime {
            MarketRegime::RangeBound | MarketRegime::Neutral => {
                self.rsi_reversion(&prices, vol_state)
            }
            MarketRegime::StrongBull => self.macd_trend(&prices, dec!(0.5)),
            MarketRegime::StrongBear => self.macd_trend(&prices, dec!(1.5)),
            MarketRegime::HighVolatility => {
                // Triple the histogram bar to suppress whipsaws; if there is
                // not enough history for MACD, fall back to widened RSI.
                match self.try_macd_trend(&prices, dec!(3)) {
                    Some(s) => s,
                    None => self.rsi_reversion(&prices, VolatilityState::Extreme),
                }
            }
        };

        debug!("StrategyEngine [{}]: {} in {}", symbol, signal, regime);
        signal
    }

    /// RSI thresholds widen symmetrically when volatility is elevated, so a
    /// noisy tape needs a deeper extreme before a trade fires.
    fn rsi_reversion(&self, prices: &[Decimal], vol_state: VolatilityState) -> Signal {
        let Some(value) = rsi(prices, self.config.rsi_period) else {
            return Signal::hold("insufficient data");
        };

        let widen = match vol_state {
            VolatilityState::Elevated | VolatilityState::Extreme => dec!(10),
            _ => Decimal::ZERO,
        };
        let lower = self.config.rsi_lower - widen;
        let upper = self.config.rsi_upper + widen;

        if value < lower {
            Signal::buy(format!("RSI {:.1} below {}", value, lower))
        } else if value > upper {
            Signal::sell(format!("RSI {:.1} above {}", value, upper))
        } else {
            Signal::hold(format!("RSI {:.1} inside [{}, {}]", value, lower, upper))
        }
    }

    fn macd_trend(&self, prices: &[Decimal], threshold_scale: Decimal) -> Signal {
        self.try_macd_trend(prices, threshold_scale)
            .unwrap_or_else(|| Signal::hold("insufficient data"))
    }

    fn try_macd_trend(&self, prices: &[Decimal], threshold_scale: Decimal) -> Option<Signal> {
        let out = macd(
            prices,
            self.config.macd_fast_period,
            self.config.macd_slow_period,
            self.config.macd_signal_period,
        )?;

        let threshold = self.config.macd_threshold * threshold_scale;

        Some(if out.macd > out.signal && out.histogram > threshold {
            Signal::buy(format!(
                "MACD {:.3} above signal, histogram {:.3} > {:.3}",
                out.macd, out.histogram, threshold
            ))
        } else if out.macd < out.signal && out.histogram < Decimal::ZERO {
            Signal::sell(format!(
                "MACD bearish cross (histogram {:.3})",
                out.histogram
            ))
        } else {
            Signal::hold(format!("MACD {:.3} without confirmation", out.macd))
        })
    }
}
