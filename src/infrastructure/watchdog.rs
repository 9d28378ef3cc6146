//! Outbound heartbeat to an external watchdog.
//!
//! A POST lands on the configured URL every interval; delivery failure is
//! logged and never fatal. The external watchdog alerting on silence is the
//! last line of defense when this whole process is gone.

use crate::infrastructure::core::http_client_factory::HttpClientFactory;
use reqwest_middleware::ClientWithMiddleware;
use serde_json::json;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

pub struct WatchdogSender {
    client: ClientWithMiddleware,
    url: String,
    interval: Duration,
}

impl WatchdogSender {
    pub fn new(url: String) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            url,
            interval: Duration::from_secs(60),
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "WatchdogSender: heartbeating to {} every {:?}",
            self.url, self.interval
        );
        let mut ticker = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.beat().await,
                _ = shutdown.changed() => {
                    info!("WatchdogSender: shutdown requested, stopping");
                    return;
                }
            }
        }
    }

    async fn beat(&self) {
        let body = json!({
            "service": "quantpilot",
            "timestamp": chrono::Utc::now().timestamp(),
        });

        match self.client.post(&self.url).json(&body).send().await {
            Ok(response) if response.status().is_success() => {
                debug!("WatchdogSender: heartbeat delivered");
            }
            Ok(response) => {
                warn!(
                    "WatchdogSender: heartbeat rejected with status {}",
                    response.status()
                );
            }
            Err(e) => {
                warn!("WatchdogSender: heartbeat failed: {}", e);
            }
        }
    }
}
