//! Kraken crypto venue adapter.
//!
//! Private endpoints are signed with HMAC-SHA512 over
//! `path || SHA256(nonce || POST-body)`, keyed by the base64-decoded API
//! secret. Nonces are millisecond timestamps, post-incremented on collision
//! so they are strictly monotonic per key. The response `error` array is the
//! canonical failure signal regardless of HTTP status.

use crate::domain::errors::BrokerError;
use crate::domain::market::bar::Bar;
use crate::domain::ports::BrokerClient;
use crate::domain::trading::precision::{PriceField, round_for_venue};
use crate::domain::trading::types::{
    Account, AccountStatus, BracketRequest, ExternalPosition, MarketClock, Order, OrderPatch,
    OrderRequest, OrderSide, OrderStatus, OrderType, Symbol, Venue,
};
use crate::infrastructure::core::http_client_factory::{HttpClientFactory, build_url_with_query};
use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{TimeZone, Utc};
use hmac::{Hmac, Mac};
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256, Sha512};
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

pub struct KrakenClient {
    client: ClientWithMiddleware,
    api_key: String,
    api_secret: String,
    base_url: String,
    last_nonce: AtomicU64,
}

impl KrakenClient {
    pub fn new(api_key: String, api_secret: String, base_url: String) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            api_key,
            api_secret,
            base_url,
            last_nonce: AtomicU64::new(0),
        }
    }

    /// Millisecond nonce, strictly monotonic even when calls land in the
    /// same millisecond.
    fn next_nonce(&self) -> u64 {
        let now = Utc::now().timestamp_millis() as u64;
        let mut prev = self.last_nonce.load(Ordering::SeqCst);
        loop {
            let candidate = now.max(prev + 1);
            match self.last_nonce.compare_exchange(
                prev,
                candidate,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return candidate,
                Err(actual) => prev = actual,
            }
        }
    }

    fn sign(&self, path: &str, nonce: u64, post_data: &str) -> Result<String, BrokerError> {
        let secret = BASE64
            .decode(&self.api_secret)
            .map_err(|e| BrokerError::Auth(format!("secret is not valid base64: {}", e)))?;

        let mut sha = Sha256::new();
        sha.update(format!("{}{}", nonce, post_data).as_bytes());
        let digest = sha.finalize();

        let mut mac = Hmac::<Sha512>::new_from_slice(&secret)
            .map_err(|e| BrokerError::Auth(format!("invalid secret length: {}", e)))?;
        mac.update(path.as_bytes());
        mac.update(&digest);

        Ok(BASE64.encode(mac.finalize().into_bytes()))
    }

    async fn private<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        mut params: Vec<(String, String)>,
    ) -> Result<T, BrokerError> {
        let path = format!("/0/private/{}", endpoint);
        let nonce = self.next_nonce();
        params.insert(0, ("nonce".to_string(), nonce.to_string()));

        let post_data: String = params
            .iter()
            .map(|(k, v)| format!("{}={}", k, v))
            .collect::<Vec<_>>()
            .join("&");

        let signature = self.sign(&path, nonce, &post_data)?;
        let url = format!("{}{}", self.base_url, path);

        let response = self
            .client
            .post(&url)
            .header("API-Key", &self.api_key)
            .header("API-Sign", signature)
            .header("Content-Type", "application/x-www-form-urlencoded")
            .body(post_data)
            .send()
            .await
            .map_err(|e| BrokerError::Network(e.to_string()))?;

        decode_envelope(response).await
    }

    async fn public<T: serde::de::DeserializeOwned>(
        &self,
        endpoint: &str,
        params: &[(&str, &str)],
    ) -> Result<T, BrokerError> {
        let base = format!("{}/0/public/{}", self.base_url, endpoint);
        let url = build_url_with_query(&base, params);

        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| BrokerError::Network(e.to_string()))?;

        decode_envelope(response).await
    }

    /// Short-lived token for the private WebSocket feed.
    pub async fn websocket_token(&self) -> Result<String, BrokerError> {
        #[derive(Debug, Deserialize)]
        struct TokenResult {
            token: String,
        }
        let result: TokenResult = self.private("GetWebSocketsToken", Vec::new()).await?;
        Ok(result.token)
    }

    async fn asset_balances(&self) -> Result<HashMap<String, Decimal>, BrokerError> {
        let raw: HashMap<String, String> = self.private("Balance", Vec::new()).await?;
        Ok(raw
            .into_iter()
            .map(|(asset, amount)| (asset, amount.parse::<Decimal>().unwrap_or(Decimal::ZERO)))
            .collect())
    }
}

/// Kraken wraps every response in `{ "error": [...], "result": ... }`.
async fn decode_envelope<T: serde::de::DeserializeOwned>(
    response: reqwest::Response,
) -> Result<T, BrokerError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| BrokerError::Network(e.to_string()))?;

    if status.is_server_error() {
        return Err(BrokerError::Network(format!("venue 5xx: {}", body)));
    }

    #[derive(Debug, Deserialize)]
    struct Envelope<T> {
        error: Vec<String>,
        result: Option<T>,
    }

    let envelope: Envelope<T> = serde_json::from_str(&body)
        .map_err(|e| BrokerError::Unknown(format!("decode failed: {} (body: {})", e, body)))?;

    if let Some(first) = envelope.error.first() {
        return Err(map_kraken_error(first));
    }

    envelope
        .result
        .ok_or_else(|| BrokerError::Unknown("empty result with no error".to_string()))
}

fn map_kraken_error(error: &str) -> BrokerError {
    if error.contains("Rate limit") || error.contains("Temporary lockout") {
        BrokerError::RateLimited { retry_after_secs: 60 }
    } else if error.contains("Invalid key")
        || error.contains("Invalid signature")
        || error.contains("Invalid nonce")
        || error.contains("Permission denied")
    {
        BrokerError::Auth(error.to_string())
    } else if error.contains("Insufficient funds") {
        BrokerError::InsufficientFunds {
            need: Decimal::ZERO,
            available: Decimal::ZERO,
        }
    } else if error.contains("Unavailable") || error.contains("Busy") {
        BrokerError::Network(error.to_string())
    } else {
        BrokerError::Unknown(error.to_string())
    }
}

/// `XBT/USD` -> `XBTUSD` for request parameters.
fn to_pair(symbol: &Symbol) -> String {
    symbol.as_str().replace('/', "")
}

/// Asset code as reported by Balance (`XXBT`, `ZUSD`, `ADA`) to the engine's
/// `BASE/USD` symbol form. Legacy four-letter codes carry one X/Z prefix.
fn asset_to_symbol(asset: &str) -> Symbol {
    let base = if asset.len() == 4 && (asset.starts_with('X') || asset.starts_with('Z')) {
        &asset[1..]
    } else {
        asset
    };
    Symbol::new(format!("{}/USD", base))
}

fn is_cash_asset(asset: &str) -> bool {
    matches!(asset, "ZUSD" | "USD" | "USDT" | "USDC" | "ZEUR" | "EUR")
}

fn parse_ohlc_row(row: &Value) -> Option<Bar> {
    let arr = row.as_array()?;
    let ts = arr.first()?.as_i64()?;
    let field = |i: usize| -> Option<Decimal> {
        let v = arr.get(i)?;
        match v {
            Value::String(s) => s.parse::<Decimal>().ok(),
            Value::Number(n) => n.to_string().parse::<Decimal>().ok(),
            _ => None,
        }
    };
    Some(Bar {
        open_time: Utc.timestamp_opt(ts, 0).single()?,
        open: field(1)?,
        high: field(2)?,
        low: field(3)?,
        close: field(4)?,
        volume: field(6)?,
    })
}

#[async_trait]
impl BrokerClient for KrakenClient {
    fn venue(&self) -> Venue {
        Venue::Kraken
    }

    /// Spot orders carry no venue-held bracket legs; protective exits are
    /// enforced client-side by the position lifecycle.
    fn supports_brackets(&self) -> bool {
        false
    }

    async fn account(&self) -> Result<Account, BrokerError> {
        #[derive(Debug, Deserialize)]
        struct TradeBalance {
            /// Equivalent balance: all assets valued in the quote currency.
            eb: String,
            /// Margin free for new positions.
            mf: Option<String>,
        }

        let trade_balance: TradeBalance = self
            .private("TradeBalance", vec![("asset".to_string(), "ZUSD".to_string())])
            .await?;
        let balances = self.asset_balances().await?;

        let equity = trade_balance.eb.parse::<Decimal>().unwrap_or(Decimal::ZERO);
        let cash = balances
            .iter()
            .filter(|(asset, _)| is_cash_asset(asset))
            .map(|(_, amount)| *amount)
            .sum::<Decimal>();
        let buying_power = trade_balance
            .mf
            .and_then(|s| s.parse::<Decimal>().ok())
            .unwrap_or(cash);

        Ok(Account {
            equity,
            buying_power,
            cash,
            status: AccountStatus::Active,
        })
    }

    async fn positions(&self) -> Result<Vec<ExternalPosition>, BrokerError> {
        // Spot holdings from Balance; entry price is engine bookkeeping.
        let balances = self.asset_balances().await?;
        Ok(balances
            .into_iter()
            .filter(|(asset, amount)| !is_cash_asset(asset) && *amount > Decimal::ZERO)
            .map(|(asset, amount)| ExternalPosition {
                symbol: asset_to_symbol(&asset),
                quantity: amount,
                avg_entry_price: Decimal::ZERO,
                market_value: Decimal::ZERO,
                unrealized_pnl: Decimal::ZERO,
            })
            .collect())
    }

    async fn latest_bar(&self, symbol: &Symbol) -> Result<Option<Bar>, BrokerError> {
        let bars = self.history(symbol, 1).await?;
        Ok(bars.into_iter().next_back())
    }

    async fn history(&self, symbol: &Symbol, limit: usize) -> Result<Vec<Bar>, BrokerError> {
        let pair = to_pair(symbol);
        let raw: HashMap<String, Value> = self
            .public("OHLC", &[("pair", pair.as_str()), ("interval", "1")])
            .await?;

        // The result maps the venue's canonical pair name (which differs
        // from the requested one) to the row array, plus a `last` cursor.
        let rows = raw
            .iter()
            .find(|(k, _)| k.as_str() != "last")
            .and_then(|(_, v)| v.as_array().cloned())
            .unwrap_or_default();

        let mut bars: Vec<Bar> = rows.iter().filter_map(parse_ohlc_row).collect();
        bars.sort_by_key(|b| b.open_time);
        let start = bars.len().saturating_sub(limit);
        Ok(bars[start..].to_vec())
    }

    async fn place_order(&self, request: OrderRequest) -> Result<String, BrokerError> {
        #[derive(Debug, Deserialize)]
        struct AddOrderResult {
            txid: Vec<String>,
        }

        let volume = round_for_venue(
            self.venue(),
            &request.symbol,
            PriceField::Quantity,
            request.quantity,
        );

        let mut params = vec![
            ("pair".to_string(), to_pair(&request.symbol)),
            (
                "type".to_string(),
                match request.side {
                    OrderSide::Buy => "buy".to_string(),
                    OrderSide::Sell => "sell".to_string(),
                },
            ),
            (
                "ordertype".to_string(),
                match request.order_type {
                    OrderType::Market => "market".to_string(),
                    OrderType::Limit => "limit".to_string(),
                },
            ),
            ("volume".to_string(), volume.to_string()),
        ];
        if let Some(limit) = request.limit_price {
            let limit = round_for_venue(self.venue(), &request.symbol, PriceField::Price, limit);
            params.push(("price".to_string(), limit.to_string()));
        }

        let result: AddOrderResult = self.private("AddOrder", params).await?;
        result
            .txid
            .into_iter()
            .next()
            .ok_or_else(|| BrokerError::Unknown("AddOrder returned no txid".to_string()))
    }

    async fn place_bracket(&self, _request: BracketRequest) -> Result<String, BrokerError> {
        Err(BrokerError::Unknown(
            "bracket orders are not supported on this venue".to_string(),
        ))
    }

    async fn open_orders(&self, symbol: Option<&Symbol>) -> Result<Vec<Order>, BrokerError> {
        #[derive(Debug, Deserialize)]
        struct OpenOrdersResult {
            open: HashMap<String, Value>,
        }

        let result: OpenOrdersResult = self.private("OpenOrders", Vec::new()).await?;
        let want_pair = symbol.map(to_pair);

        let orders = result
            .open
            .into_iter()
            .filter_map(|(id, v)| {
                let descr = v.get("descr")?;
                let pair = descr.get("pair")?.as_str()?.to_string();
                if let Some(ref want) = want_pair
                    && &pair != want
                {
                    return None;
                }
                let side = match descr.get("type")?.as_str()? {
                    "sell" => OrderSide::Sell,
                    _ => OrderSide::Buy,
                };
                let order_type = match descr.get("ordertype")?.as_str()? {
                    "limit" => OrderType::Limit,
                    _ => OrderType::Market,
                };
                let quantity = v.get("vol")?.as_str()?.parse::<Decimal>().ok()?;
                let limit_price = descr
                    .get("price")
                    .and_then(Value::as_str)
                    .and_then(|s| s.parse::<Decimal>().ok())
                    .filter(|p| *p > Decimal::ZERO);
                let submitted_at = v
                    .get("opentm")
                    .and_then(Value::as_f64)
                    .map(|t| t as i64)
                    .unwrap_or(0);

                let base = pair.trim_end_matches("USD").trim_end_matches('/');
                Some(Order {
                    id,
                    symbol: Symbol::new(format!("{}/USD", base)),
                    side,
                    order_type,
                    quantity,
                    limit_price,
                    stop_price: None,
                    status: OrderStatus::New,
                    submitted_at,
                })
            })
            .collect();

        Ok(orders)
    }

    async fn replace_order(&self, order_id: &str, patch: OrderPatch) -> Result<(), BrokerError> {
        // EditOrder needs the pair; look the order up first.
        let open = self.open_orders(None).await?;
        let order = open
            .into_iter()
            .find(|o| o.id == order_id)
            .ok_or_else(|| BrokerError::Unknown(format!("no open order {}", order_id)))?;

        let mut params = vec![
            ("txid".to_string(), order_id.to_string()),
            ("pair".to_string(), to_pair(&order.symbol)),
        ];
        if let Some(q) = patch.quantity {
            params.push(("volume".to_string(), q.to_string()));
        }
        if let Some(p) = patch.limit_price.or(patch.stop_price) {
            let p = round_for_venue(self.venue(), &order.symbol, PriceField::Price, p);
            params.push(("price".to_string(), p.to_string()));
        }

        let _: Value = self.private("EditOrder", params).await?;
        Ok(())
    }

    async fn cancel_all(&self, symbol: Option<&Symbol>) -> Result<(), BrokerError> {
        match symbol {
            None => {
                let _: Value = self.private("CancelAll", Vec::new()).await?;
                Ok(())
            }
            Some(s) => {
                let open = self.open_orders(Some(s)).await?;
                for order in open {
                    let params = vec![("txid".to_string(), order.id.clone())];
                    let _: Value = self.private("CancelOrder", params).await?;
                }
                Ok(())
            }
        }
    }

    async fn close_all(&self) -> Result<(), BrokerError> {
        self.cancel_all(None).await?;

        let holdings = self.positions().await?;
        for holding in holdings {
            let request = OrderRequest {
                symbol: holding.symbol.clone(),
                quantity: holding.quantity,
                side: OrderSide::Sell,
                order_type: OrderType::Market,
                time_in_force: crate::domain::trading::types::TimeInForce::Ioc,
                limit_price: None,
            };
            if let Err(e) = self.place_order(request).await {
                // Keep flattening the rest; one stuck asset must not leave
                // the others exposed.
                warn!(
                    "KrakenClient: emergency close of {} failed: {}",
                    holding.symbol, e
                );
            }
        }
        debug!("KrakenClient: emergency close dispatched");
        Ok(())
    }

    async fn clock(&self) -> Result<MarketClock, BrokerError> {
        Ok(MarketClock::always_open())
    }
}
