//! Strategy profile configuration.
//!
//! One profile per trading venue: the equity profile always exists; the
//! crypto micro-profit profile is added when `MULTI_PROFILE_ENABLED` is set.
//! Exit parameters come from `<PREFIX>_TAKE_PROFIT_PERCENT` and friends; the
//! crypto profile additionally honors the tighter `KRAKEN_*` overrides.

use crate::config::parse;
use crate::domain::risk::sizing::ExitParams;
use crate::domain::trading::types::{Symbol, Venue};
use anyhow::Result;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ProfileConfig {
    pub name: String,
    pub venue: Venue,
    pub capital_fraction: Decimal,
    pub bullish_symbols: Vec<Symbol>,
    pub bearish_symbols: Vec<Symbol>,
    pub take_profit_pct: Decimal,
    pub stop_loss_pct: Decimal,
    pub trailing_stop_pct: Decimal,
    pub cycle_interval: Duration,
    /// Partial exits default on for equity, off for the crypto scalper.
    pub partial_exits_enabled: bool,
    pub micro_scaling_enabled: bool,
    /// Fixed exit override (crypto micro-profit); beats tier multipliers.
    pub venue_exit_override: Option<ExitParams>,
    /// Fraction of the computed size for the micro-scaling initial entry.
    pub grid_order_size: Decimal,
    /// Volatility index level above which micro-scaling add-ons pause.
    pub grid_volatility_threshold: Decimal,
}

impl ProfileConfig {
    pub fn baseline_exits(&self) -> ExitParams {
        ExitParams {
            stop_loss_pct: self.stop_loss_pct,
            take_profit_pct: self.take_profit_pct,
        }
    }
}

fn symbol_list(key: &str, default: &str) -> Vec<Symbol> {
    let raw = env::var(key).unwrap_or_else(|_| default.to_string());
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(Symbol::new)
        .collect()
}

pub fn equity_profile() -> Result<ProfileConfig> {
    Ok(ProfileConfig {
        name: "equity".to_string(),
        venue: Venue::Alpaca,
        capital_fraction: parse::decimal_var("EQUITY_CAPITAL_FRACTION", dec!(0.7))?,
        bullish_symbols: symbol_list("BULLISH_SYMBOLS", "AAPL,MSFT,NVDA,GOOGL"),
        bearish_symbols: symbol_list("BEARISH_SYMBOLS", "SH,SDS"),
        take_profit_pct: parse::decimal_var("EQUITY_TAKE_PROFIT_PERCENT", dec!(0.02))?,
        stop_loss_pct: parse::decimal_var("EQUITY_STOP_LOSS_PERCENT", dec!(0.01))?,
        trailing_stop_pct: parse::decimal_var("EQUITY_TRAILING_STOP_PERCENT", dec!(0.005))?,
        cycle_interval: Duration::from_millis(parse::u64_var("EQUITY_CYCLE_INTERVAL_MS", 30_000)?),
        partial_exits_enabled: parse::bool_var("EQUITY_PARTIAL_EXITS_ENABLED", true),
        micro_scaling_enabled: parse::bool_var("EQUITY_MICRO_SCALING_ENABLED", false),
        venue_exit_override: None,
        grid_order_size: parse::decimal_var("GRID_ORDER_SIZE", dec!(0.5))?,
        grid_volatility_threshold: parse::decimal_var("GRID_VOLATILITY_THRESHOLD", dec!(30))?,
    })
}

pub fn crypto_profile() -> Result<ProfileConfig> {
    // The micro-profit scalper: tight fixed exits, fast cadence.
    let override_exits = ExitParams {
        stop_loss_pct: parse::decimal_var("KRAKEN_STOP_LOSS_PERCENT", dec!(0.005))?,
        take_profit_pct: parse::decimal_var("KRAKEN_TAKE_PROFIT_PERCENT", dec!(0.0075))?,
    };

    Ok(ProfileConfig {
        name: "crypto_micro".to_string(),
        venue: Venue::Kraken,
        capital_fraction: parse::decimal_var("CRYPTO_CAPITAL_FRACTION", dec!(0.3))?,
        bullish_symbols: symbol_list("CRYPTO_BULLISH_SYMBOLS", "XBT/USD,ETH/USD"),
        bearish_symbols: symbol_list("CRYPTO_BEARISH_SYMBOLS", ""),
        take_profit_pct: override_exits.take_profit_pct,
        stop_loss_pct: override_exits.stop_loss_pct,
        trailing_stop_pct: parse::decimal_var("CRYPTO_TRAILING_STOP_PERCENT", dec!(0.004))?,
        cycle_interval: Duration::from_millis(parse::u64_var("KRAKEN_CYCLE_INTERVAL_MS", 15_000)?),
        partial_exits_enabled: parse::bool_var("CRYPTO_PARTIAL_EXITS_ENABLED", false),
        micro_scaling_enabled: parse::bool_var("CRYPTO_MICRO_SCALING_ENABLED", true),
        venue_exit_override: Some(override_exits),
        grid_order_size: parse::decimal_var("GRID_ORDER_SIZE", dec!(0.5))?,
        grid_volatility_threshold: parse::decimal_var("GRID_VOLATILITY_THRESHOLD", dec!(30))?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equity_profile_defaults() {
        let p = equity_profile().expect("should parse with defaults");
        assert_eq!(p.name, "equity");
        assert_eq!(p.venue, Venue::Alpaca);
        assert!(p.partial_exits_enabled);
        assert!(p.venue_exit_override.is_none());
        assert!(!p.bullish_symbols.is_empty());
    }

    #[test]
    fn test_crypto_profile_has_override() {
        let p = crypto_profile().expect("should parse with defaults");
        assert_eq!(p.venue, Venue::Kraken);
        let o = p.venue_exit_override.expect("crypto profile needs override");
        assert!(o.stop_loss_pct < o.take_profit_pct);
        assert!(!p.partial_exits_enabled);
    }
}
