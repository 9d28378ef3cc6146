//! Configuration for quantpilot.
//!
//! Everything is read once at startup from the environment (plus the `.env`
//! file loaded in `main`); there are no lazy re-reads. Sub-modules split the
//! surface by domain: Broker, Strategy, Risk, and Profiles.

mod broker_config;
mod profile_config;
mod risk_env_config;
mod strategy_config;

pub use broker_config::{AlpacaConfig, BrokerEnvConfig, KrakenConfig};
pub use profile_config::{ProfileConfig, crypto_profile, equity_profile};
pub use risk_env_config::RiskEnvConfig;
pub use strategy_config::StrategyEnvConfig;

use anyhow::{Context, Result, bail};
use std::env;

/// Shared env parsing helpers used by the sub-configs.
pub(crate) mod parse {
    use anyhow::{Context, Result};
    use rust_decimal::Decimal;
    use std::env;

    pub fn usize_var(key: &str, default: usize) -> Result<usize> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<usize>()
            .context(format!("Failed to parse {}", key))
    }

    pub fn u64_var(key: &str, default: u64) -> Result<u64> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<u64>()
            .context(format!("Failed to parse {}", key))
    }

    pub fn decimal_var(key: &str, default: Decimal) -> Result<Decimal> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<Decimal>()
            .context(format!("Failed to parse {}", key))
    }

    pub fn bool_var(key: &str, default: bool) -> bool {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .parse::<bool>()
            .unwrap_or(default)
    }
}

/// Main application configuration, composed from the sub-configs.
#[derive(Debug, Clone)]
pub struct Config {
    pub broker: BrokerEnvConfig,
    pub strategy: StrategyEnvConfig,
    pub risk: RiskEnvConfig,
    pub profiles: Vec<ProfileConfig>,

    /// Gate for the live trading loops. Off = data and dashboard only.
    pub autonomous_trading: bool,
    pub multi_profile_enabled: bool,
    pub market_hours_bypass: bool,
    pub test_mode_enabled: bool,
    /// Simulated fill frequency (cycles) in test mode.
    pub test_mode_frequency: u64,

    pub journal_db_url: String,
    pub watchdog_url: Option<String>,
    /// Seconds of component silence tolerated before the dead-man switch
    /// arms. Cloud scheduling jitter wants minutes, not seconds.
    pub supervisor_silence_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let broker = BrokerEnvConfig::from_env();
        let strategy = StrategyEnvConfig::from_env().context("Failed to load strategy config")?;
        let risk = RiskEnvConfig::from_env().context("Failed to load risk config")?;

        let multi_profile_enabled = parse::bool_var("MULTI_PROFILE_ENABLED", false);
        let mut profiles = vec![equity_profile().context("Failed to load equity profile")?];
        if multi_profile_enabled {
            profiles.push(crypto_profile().context("Failed to load crypto profile")?);
        }

        let config = Self {
            broker,
            strategy,
            risk,
            profiles,
            autonomous_trading: parse::bool_var("AUTONOMOUS_TRADING", false),
            multi_profile_enabled,
            market_hours_bypass: parse::bool_var("MARKET_HOURS_BYPASS", false),
            test_mode_enabled: parse::bool_var("TEST_MODE_ENABLED", false),
            test_mode_frequency: parse::u64_var("TEST_MODE_FREQUENCY", 10)?,
            journal_db_url: env::var("JOURNAL_DB_URL")
                .unwrap_or_else(|_| "sqlite://data/quantpilot.db".to_string()),
            watchdog_url: env::var("WATCHDOG_URL").ok(),
            supervisor_silence_secs: parse::u64_var("SUPERVISOR_SILENCE_SECS", 300)?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Credential presence is fatal at startup when live trading is enabled;
    /// the process exits non-zero rather than running half-armed.
    fn validate(&self) -> Result<()> {
        if self.autonomous_trading && !self.test_mode_enabled {
            if !self.broker.has_alpaca_credentials() {
                bail!("AUTONOMOUS_TRADING is enabled but ALPACA_API_KEY/ALPACA_API_SECRET are missing");
            }
            if self.multi_profile_enabled && !self.broker.has_kraken_credentials() {
                bail!("MULTI_PROFILE_ENABLED is set but KRAKEN_API_KEY/KRAKEN_API_SECRET are missing");
            }
        }

        for profile in &self.profiles {
            if profile.capital_fraction <= rust_decimal::Decimal::ZERO {
                bail!("profile {} has non-positive capital fraction", profile.name);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_defaults_without_credentials() {
        // Autonomous trading defaults off, so missing credentials parse fine.
        let config = Config::from_env().expect("should parse with defaults");
        assert!(!config.autonomous_trading);
        assert_eq!(config.profiles.len(), 1);
        assert_eq!(config.profiles[0].name, "equity");
    }
}
