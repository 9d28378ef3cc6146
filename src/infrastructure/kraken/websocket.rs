//! Kraken private WebSocket stream.
//!
//! Authenticates with a short-lived token from `GetWebSocketsToken`,
//! subscribes to own-trade and open-order feeds, and republishes them as
//! typed events. Reconnects with exponential backoff; subscriptions are
//! re-sent verbatim on every (re)connect, which the venue treats as
//! idempotent.

use crate::domain::trading::types::{OrderSide, Symbol};
use crate::infrastructure::kraken::client::KrakenClient;
use anyhow::{Context, Result};
use futures_util::{SinkExt, StreamExt};
use rust_decimal::Decimal;
use serde_json::{Value, json};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

/// Events surfaced from the private stream.
#[derive(Debug, Clone)]
pub enum PrivateStreamEvent {
    OrderFill {
        order_id: String,
        symbol: Symbol,
        side: OrderSide,
        price: Decimal,
        quantity: Decimal,
    },
    OrderStatus {
        order_id: String,
        status: String,
    },
}

pub struct KrakenPrivateStream {
    client: Arc<KrakenClient>,
    ws_url: String,
    event_tx: broadcast::Sender<PrivateStreamEvent>,
}

impl KrakenPrivateStream {
    pub fn new(client: Arc<KrakenClient>, ws_url: String) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            client,
            ws_url,
            event_tx,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PrivateStreamEvent> {
        self.event_tx.subscribe()
    }

    /// Connection supervisor: runs until shutdown, reconnecting with
    /// exponential backoff after failures.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut backoff = 1u64;
        const MAX_BACKOFF: u64 = 60;

        loop {
            if *shutdown.borrow() {
                info!("KrakenPrivateStream: shutdown requested, stopping");
                return;
            }

            match self.connect_and_stream(&mut shutdown).await {
                Ok(()) => {
                    info!("KrakenPrivateStream: connection closed, reconnecting");
                    backoff = 1;
                }
                Err(e) => {
                    error!(
                        "KrakenPrivateStream: {}. Reconnecting in {}s...",
                        e, backoff
                    );
                    tokio::select! {
                        _ = tokio::time::sleep(std::time::Duration::from_secs(backoff)) => {}
                        _ = shutdown.changed() => return,
                    }
                    backoff = (backoff * 2).min(MAX_BACKOFF);
                }
            }
        }
    }

    async fn connect_and_stream(&self, shutdown: &mut watch::Receiver<bool>) -> Result<()> {
        let token = self
            .client
            .websocket_token()
            .await
            .map_err(|e| anyhow::anyhow!("token fetch failed: {}", e))?;

        let endpoint = url::Url::parse(&self.ws_url).context("Invalid WebSocket URL")?;
        info!("KrakenPrivateStream: connecting to {}", endpoint);
        let (ws_stream, _) = connect_async(endpoint.as_str())
            .await
            .context("Failed to connect to private WebSocket")?;
        let (mut write, mut read) = ws_stream.split();

        // Same two subscriptions every connect; the venue dedupes.
        for name in ["ownTrades", "openOrders"] {
            let msg = json!({
                "event": "subscribe",
                "subscription": { "name": name, "token": token }
            });
            write
                .send(Message::Text(msg.to_string().into()))
                .await
                .context("Failed to send subscription")?;
        }

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => self.handle_message(&text),
                        Some(Ok(Message::Ping(payload))) => {
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Close(frame))) => {
                            debug!("KrakenPrivateStream: server close: {:?}", frame);
                            return Ok(());
                        }
                        Some(Ok(_)) => {}
                        Some(Err(e)) => anyhow::bail!("read error: {}", e),
                        None => return Ok(()),
                    }
                }
            }
        }
    }

    fn handle_message(&self, text: &str) {
        let value: Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!("KrakenPrivateStream: unparseable message: {}", e);
                return;
            }
        };

        // Status events arrive as objects; data frames as arrays tagged with
        // the channel name in the second-to-last slot.
        if let Some(event) = value.get("event").and_then(Value::as_str) {
            match event {
                "subscriptionStatus" => debug!(
                    "KrakenPrivateStream: subscription {:?} -> {:?}",
                    value.get("channelName"),
                    value.get("status")
                ),
                "heartbeat" => {}
                other => debug!("KrakenPrivateStream: event {}", other),
            }
            return;
        }

        let Some(arr) = value.as_array() else { return };
        let channel = arr
            .iter()
            .rev()
            .find_map(Value::as_str)
            .unwrap_or_default();

        match channel {
            "ownTrades" => self.handle_own_trades(arr),
            "openOrders" => self.handle_open_orders(arr),
            _ => {}
        }
    }

    fn handle_own_trades(&self, frame: &[Value]) {
        let Some(batches) = frame.first().and_then(Value::as_array) else {
            return;
        };
        for batch in batches {
            let Some(map) = batch.as_object() else { continue };
            for (_trade_id, trade) in map {
                let order_id = trade
                    .get("ordertxid")
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string();
                let pair = trade.get("pair").and_then(Value::as_str).unwrap_or_default();
                let side = match trade.get("type").and_then(Value::as_str) {
                    Some("sell") => OrderSide::Sell,
                    _ => OrderSide::Buy,
                };
                let price = decimal_field(trade, "price");
                let quantity = decimal_field(trade, "vol");

                let _ = self.event_tx.send(PrivateStreamEvent::OrderFill {
                    order_id,
                    symbol: Symbol::new(pair),
                    side,
                    price,
                    quantity,
                });
            }
        }
    }

    fn handle_open_orders(&self, frame: &[Value]) {
        let Some(batches) = frame.first().and_then(Value::as_array) else {
            return;
        };
        for batch in batches {
            let Some(map) = batch.as_object() else { continue };
            for (order_id, order) in map {
                if let Some(status) = order.get("status").and_then(Value::as_str) {
                    let _ = self.event_tx.send(PrivateStreamEvent::OrderStatus {
                        order_id: order_id.clone(),
                        status: status.to_string(),
                    });
                }
            }
        }
    }
}

fn decimal_field(value: &Value, key: &str) -> Decimal {
    value
        .get(key)
        .and_then(Value::as_str)
        .and_then(|s| s.parse::<Decimal>().ok())
        .unwrap_or(Decimal::ZERO)
}
