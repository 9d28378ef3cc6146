//! Venue credential and endpoint configuration from environment variables.

use std::env;

#[derive(Debug, Clone)]
pub struct AlpacaConfig {
    pub api_key: String,
    pub api_secret: String,
    pub base_url: String,
    pub data_url: String,
}

#[derive(Debug, Clone)]
pub struct KrakenConfig {
    pub api_key: String,
    pub api_secret: String,
    pub base_url: String,
    pub ws_url: String,
}

#[derive(Debug, Clone)]
pub struct BrokerEnvConfig {
    pub alpaca: AlpacaConfig,
    pub kraken: KrakenConfig,
}

impl BrokerEnvConfig {
    pub fn from_env() -> Self {
        Self {
            alpaca: AlpacaConfig {
                api_key: env::var("ALPACA_API_KEY").unwrap_or_default(),
                api_secret: env::var("ALPACA_API_SECRET").unwrap_or_default(),
                base_url: env::var("ALPACA_BASE_URL")
                    .unwrap_or_else(|_| "https://paper-api.alpaca.markets".to_string()),
                data_url: env::var("ALPACA_DATA_URL")
                    .unwrap_or_else(|_| "https://data.alpaca.markets".to_string()),
            },
            kraken: KrakenConfig {
                api_key: env::var("KRAKEN_API_KEY").unwrap_or_default(),
                api_secret: env::var("KRAKEN_API_SECRET").unwrap_or_default(),
                base_url: env::var("KRAKEN_BASE_URL")
                    .unwrap_or_else(|_| "https://api.kraken.com".to_string()),
                ws_url: env::var("KRAKEN_WS_URL")
                    .unwrap_or_else(|_| "wss://ws-auth.kraken.com".to_string()),
            },
        }
    }

    pub fn has_alpaca_credentials(&self) -> bool {
        !self.alpaca.api_key.is_empty() && !self.alpaca.api_secret.is_empty()
    }

    pub fn has_kraken_credentials(&self) -> bool {
        !self.kraken.api_key.is_empty() && !self.kraken.api_secret.is_empty()
    }
}
