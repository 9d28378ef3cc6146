//! Risk management configuration: drawdown limits, PDT protection, reserve
//! capital and Kelly sizing.

use crate::config::parse;
use anyhow::Result;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::env;

#[derive(Debug, Clone)]
pub struct RiskEnvConfig {
    // Portfolio guards
    pub portfolio_stop_loss_pct: Decimal,
    pub max_drawdown_pct: Decimal,

    // Regulatory
    pub pdt_protection_enabled: bool,

    // Capital reserve held out of sizing
    pub reserve_percent: Decimal,

    // Kelly-mode sizing
    pub kelly_enabled: bool,
    pub kelly_fraction: Decimal,
    pub kelly_reward_risk: Decimal,
    pub kelly_min_trades: u64,

    // Test cap: equity is clamped to this when the venue reports more
    pub initial_capital: Option<Decimal>,
}

impl RiskEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            portfolio_stop_loss_pct: parse::decimal_var("PORTFOLIO_STOP_LOSS_PERCENT", dec!(0.1))?,
            max_drawdown_pct: parse::decimal_var("MAX_DRAWDOWN_PERCENT", dec!(0.25))?,
            pdt_protection_enabled: parse::bool_var("PDT_PROTECTION_ENABLED", true),
            reserve_percent: parse::decimal_var("RESERVE_PERCENT", dec!(0.1))?,
            kelly_enabled: parse::bool_var("KELLY_SIZING_ENABLED", false),
            kelly_fraction: parse::decimal_var("KELLY_FRACTION", dec!(0.5))?,
            kelly_reward_risk: parse::decimal_var("KELLY_REWARD_RISK", dec!(2.0))?,
            kelly_min_trades: parse::u64_var("KELLY_MIN_TRADES", 30)?,
            initial_capital: env::var("INITIAL_CAPITAL")
                .ok()
                .and_then(|s| s.parse::<Decimal>().ok()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = RiskEnvConfig::from_env().expect("should parse with defaults");
        assert!(config.pdt_protection_enabled);
        assert_eq!(config.max_drawdown_pct, dec!(0.25));
        assert_eq!(config.reserve_percent, dec!(0.1));
    }
}
