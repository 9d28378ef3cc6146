//! Alpaca equity venue adapter.
//!
//! REST endpoints for account, positions, bars, order placement (including
//! native brackets), replace/cancel, and the market clock. Venue responses
//! decode into typed records; unknown fields are logged at debug and never
//! leak past this module.

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
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use reqwest_middleware::ClientWithMiddleware;
use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::json;
use std::collections::HashMap;
use tracing::debug;

pub struct AlpacaClient {
    client: ClientWithMiddleware,
    api_key: String,
    api_secret: String,
    base_url: String,
    data_url: String,
}

impl AlpacaClient {
    pub fn new(api_key: String, api_secret: String, base_url: String, data_url: String) -> Self {
        Self {
            client: HttpClientFactory::create_client(),
            api_key,
            api_secret,
            base_url,
            data_url,
        }
    }

    fn request(&self, method: reqwest::Method, url: &str) -> reqwest_middleware::RequestBuilder {
        self.client
            .request(method, url)
            .header("APCA-API-KEY-ID", &self.api_key)
            .header("APCA-API-SECRET-KEY", &self.api_secret)
    }

    async fn send<T: serde::de::DeserializeOwned>(
        &self,
        builder: reqwest_middleware::RequestBuilder,
    ) -> Result<T, BrokerError> {
        let response = builder
            .send()
            .await
            .map_err(|e| BrokerError::Network(e.to_string()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| BrokerError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(map_http_error(status, &body));
        }

        serde_json::from_str(&body)
            .map_err(|e| BrokerError::Unknown(format!("decode failed: {} (body: {})", e, body)))
    }
}

fn map_http_error(status: StatusCode, body: &str) -> BrokerError {
    let lower = body.to_lowercase();
    match status.as_u16() {
        401 => BrokerError::Auth(body.to_string()),
        403 => {
            if lower.contains("insufficient") {
                BrokerError::InsufficientFunds {
                    need: Decimal::ZERO,
                    available: Decimal::ZERO,
                }
            } else {
                BrokerError::Auth(body.to_string())
            }
        }
        422 if lower.contains("market") && lower.contains("closed") => BrokerError::MarketClosed,
        429 => BrokerError::RateLimited { retry_after_secs: 60 },
        s if s >= 500 => BrokerError::Network(format!("venue 5xx: {}", body)),
        _ => BrokerError::Unknown(format!("{}: {}", status, body)),
    }
}

fn log_unknown_fields(record: &str, extra: &HashMap<String, serde_json::Value>) {
    if !extra.is_empty() {
        let keys: Vec<&str> = extra.keys().map(String::as_str).collect();
        debug!("AlpacaClient: {} carried unknown fields {:?}", record, keys);
    }
}

fn parse_decimal(s: &str) -> Decimal {
    s.parse::<Decimal>().unwrap_or(Decimal::ZERO)
}

#[derive(Debug, Deserialize)]
struct AlpacaAccount {
    equity: String,
    buying_power: String,
    cash: String,
    status: String,
    #[serde(flatten)]
    extra: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct AlpacaPosition {
    symbol: String,
    qty: String,
    avg_entry_price: String,
    market_value: String,
    unrealized_pl: String,
}

#[derive(Debug, Deserialize)]
struct AlpacaBar {
    t: DateTime<Utc>,
    o: Decimal,
    h: Decimal,
    l: Decimal,
    c: Decimal,
    v: Decimal,
}

impl From<AlpacaBar> for Bar {
    fn from(b: AlpacaBar) -> Self {
        Bar {
            open_time: b.t,
            open: b.o,
            high: b.h,
            low: b.l,
            close: b.c,
            volume: b.v,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AlpacaBarsResponse {
    bars: Option<Vec<AlpacaBar>>,
}

#[derive(Debug, Deserialize)]
struct AlpacaLatestBarResponse {
    bar: Option<AlpacaBar>,
}

#[derive(Debug, Deserialize)]
struct AlpacaOrder {
    id: String,
    symbol: String,
    side: String,
    #[serde(rename = "type")]
    order_type: String,
    qty: Option<String>,
    limit_price: Option<String>,
    stop_price: Option<String>,
    status: String,
    submitted_at: Option<DateTime<Utc>>,
    #[serde(flatten)]
    extra: HashMap<String, serde_json::Value>,
}

impl AlpacaOrder {
    fn into_order(self) -> Order {
        log_unknown_fields("order", &self.extra);
        Order {
            id: self.id,
            symbol: Symbol::new(&self.symbol),
            side: if self.side == "sell" {
                OrderSide::Sell
            } else {
                OrderSide::Buy
            },
            order_type: if self.order_type == "limit" {
                OrderType::Limit
            } else {
                OrderType::Market
            },
            quantity: self.qty.as_deref().map(parse_decimal).unwrap_or(Decimal::ZERO),
            limit_price: self.limit_price.as_deref().map(parse_decimal),
            stop_price: self.stop_price.as_deref().map(parse_decimal),
            status: match self.status.as_str() {
                "filled" => OrderStatus::Filled,
                "partially_filled" => OrderStatus::PartiallyFilled,
                "canceled" | "expired" => OrderStatus::Canceled,
                "rejected" => OrderStatus::Rejected,
                _ => OrderStatus::New,
            },
            submitted_at: self.submitted_at.map(|t| t.timestamp()).unwrap_or(0),
        }
    }
}

#[derive(Debug, Deserialize)]
struct AlpacaClock {
    is_open: bool,
    next_open: Option<DateTime<Utc>>,
    next_close: Option<DateTime<Utc>>,
}

#[async_trait]
impl BrokerClient for AlpacaClient {
    fn venue(&self) -> Venue {
        Venue::Alpaca
    }

    fn supports_brackets(&self) -> bool {
        true
    }

    async fn account(&self) -> Result<Account, BrokerError> {
        let url = format!("{}/v2/account", self.base_url);
        let raw: AlpacaAccount = self.send(self.request(reqwest::Method::GET, &url)).await?;
        log_unknown_fields("account", &raw.extra);

        Ok(Account {
            equity: parse_decimal(&raw.equity),
            buying_power: parse_decimal(&raw.buying_power),
            cash: parse_decimal(&raw.cash),
            status: match raw.status.as_str() {
                "ACTIVE" => AccountStatus::Active,
                "ACCOUNT_CLOSED" => AccountStatus::Closed,
                _ => AccountStatus::Restricted,
            },
        })
    }

    async fn positions(&self) -> Result<Vec<ExternalPosition>, BrokerError> {
        let url = format!("{}/v2/positions", self.base_url);
        let raw: Vec<AlpacaPosition> = self.send(self.request(reqwest::Method::GET, &url)).await?;

        Ok(raw
            .into_iter()
            .map(|p| ExternalPosition {
                symbol: Symbol::new(&p.symbol),
                quantity: parse_decimal(&p.qty),
                avg_entry_price: parse_decimal(&p.avg_entry_price),
                market_value: parse_decimal(&p.market_value),
                unrealized_pnl: parse_decimal(&p.unrealized_pl),
            })
            .collect())
    }

    async fn latest_bar(&self, symbol: &Symbol) -> Result<Option<Bar>, BrokerError> {
        let url = format!("{}/v2/stocks/{}/bars/latest", self.data_url, symbol);
        let raw: AlpacaLatestBarResponse =
            self.send(self.request(reqwest::Method::GET, &url)).await?;
        Ok(raw.bar.map(Bar::from))
    }

    async fn history(&self, symbol: &Symbol, limit: usize) -> Result<Vec<Bar>, BrokerError> {
        let base = format!("{}/v2/stocks/{}/bars", self.data_url, symbol);
        let limit_s = limit.to_string();
        let url = build_url_with_query(&base, &[("timeframe", "1Min"), ("limit", &limit_s)]);
        let raw: AlpacaBarsResponse = self.send(self.request(reqwest::Method::GET, &url)).await?;

        let mut bars: Vec<Bar> = raw
            .bars
            .unwrap_or_default()
            .into_iter()
            .map(Bar::from)
            .collect();
        bars.sort_by_key(|b| b.open_time);
        Ok(bars)
    }

    async fn place_order(&self, request: OrderRequest) -> Result<String, BrokerError> {
        let url = format!("{}/v2/orders", self.base_url);
        let qty = round_for_venue(self.venue(), &request.symbol, PriceField::Quantity, request.quantity);

        let mut body = json!({
            "symbol": request.symbol.as_str(),
            "qty": qty.to_string(),
            "side": match request.side { OrderSide::Buy => "buy", OrderSide::Sell => "sell" },
            "type": match request.order_type { OrderType::Market => "market", OrderType::Limit => "limit" },
            "time_in_force": request.time_in_force.as_str(),
            "client_order_id": uuid::Uuid::new_v4().to_string(),
        });
        if let Some(limit) = request.limit_price {
            let limit = round_for_venue(self.venue(), &request.symbol, PriceField::Price, limit);
            body["limit_price"] = json!(limit.to_string());
        }

        let raw: AlpacaOrder = self
            .send(self.request(reqwest::Method::POST, &url).json(&body))
            .await?;
        Ok(raw.into_order().id)
    }

    async fn place_bracket(&self, request: BracketRequest) -> Result<String, BrokerError> {
        let url = format!("{}/v2/orders", self.base_url);
        let qty = round_for_venue(self.venue(), &request.symbol, PriceField::Quantity, request.quantity);
        let tp = round_for_venue(self.venue(), &request.symbol, PriceField::Price, request.take_profit);
        let sl = round_for_venue(self.venue(), &request.symbol, PriceField::Price, request.stop_loss);

        let mut body = json!({
            "symbol": request.symbol.as_str(),
            "qty": qty.to_string(),
            "side": match request.side { OrderSide::Buy => "buy", OrderSide::Sell => "sell" },
            "type": if request.limit_price.is_some() { "limit" } else { "market" },
            "time_in_force": "gtc",
            "order_class": "bracket",
            "client_order_id": uuid::Uuid::new_v4().to_string(),
            "take_profit": { "limit_price": tp.to_string() },
            "stop_loss": { "stop_price": sl.to_string() },
        });
        if let Some(limit) = request.limit_price {
            let limit = round_for_venue(self.venue(), &request.symbol, PriceField::Price, limit);
            body["limit_price"] = json!(limit.to_string());
        }

        let raw: AlpacaOrder = self
            .send(self.request(reqwest::Method::POST, &url).json(&body))
            .await?;
        Ok(raw.into_order().id)
    }

    async fn open_orders(&self, symbol: Option<&Symbol>) -> Result<Vec<Order>, BrokerError> {
        let base = format!("{}/v2/orders", self.base_url);
        let url = match symbol {
            Some(s) => build_url_with_query(&base, &[("status", "open"), ("symbols", s.as_str())]),
            None => build_url_with_query(&base, &[("status", "open")]),
        };
        let raw: Vec<AlpacaOrder> = self.send(self.request(reqwest::Method::GET, &url)).await?;
        Ok(raw.into_iter().map(AlpacaOrder::into_order).collect())
    }

    async fn replace_order(&self, order_id: &str, patch: OrderPatch) -> Result<(), BrokerError> {
        let url = format!("{}/v2/orders/{}", self.base_url, order_id);
        let mut body = serde_json::Map::new();
        if let Some(q) = patch.quantity {
            body.insert("qty".into(), json!(q.to_string()));
        }
        if let Some(l) = patch.limit_price {
            body.insert("limit_price".into(), json!(l.to_string()));
        }
        if let Some(s) = patch.stop_price {
            body.insert("stop_price".into(), json!(s.to_string()));
        }

        let _: AlpacaOrder = self
            .send(
                self.request(reqwest::Method::PATCH, &url)
                    .json(&serde_json::Value::Object(body)),
            )
            .await?;
        Ok(())
    }

    async fn cancel_all(&self, symbol: Option<&Symbol>) -> Result<(), BrokerError> {
        match symbol {
            None => {
                let url = format!("{}/v2/orders", self.base_url);
                let response = self
                    .request(reqwest::Method::DELETE, &url)
                    .send()
                    .await
                    .map_err(|e| BrokerError::Network(e.to_string()))?;
                if !response.status().is_success() && response.status().as_u16() != 207 {
                    let status = response.status();
                    let body = response.text().await.unwrap_or_default();
                    return Err(map_http_error(status, &body));
                }
                Ok(())
            }
            Some(s) => {
                // The bulk endpoint has no symbol filter; cancel individually.
                let open = self.open_orders(Some(s)).await?;
                for order in open {
                    let url = format!("{}/v2/orders/{}", self.base_url, order.id);
                    let response = self
                        .request(reqwest::Method::DELETE, &url)
                        .send()
                        .await
                        .map_err(|e| BrokerError::Network(e.to_string()))?;
                    if !response.status().is_success() {
                        let status = response.status();
                        let body = response.text().await.unwrap_or_default();
                        return Err(map_http_error(status, &body));
                    }
                }
                Ok(())
            }
        }
    }

    async fn close_all(&self) -> Result<(), BrokerError> {
        let url = format!("{}/v2/positions?cancel_orders=true", self.base_url);
        let response = self
            .request(reqwest::Method::DELETE, &url)
            .send()
            .await
            .map_err(|e| BrokerError::Network(e.to_string()))?;
        // 207 multi-status means some legs closed; good enough in an emergency.
        if !response.status().is_success() && response.status().as_u16() != 207 {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(map_http_error(status, &body));
        }
        Ok(())
    }

    async fn clock(&self) -> Result<MarketClock, BrokerError> {
        let url = format!("{}/v2/clock", self.base_url);
        let raw: AlpacaClock = self.send(self.request(reqwest::Method::GET, &url)).await?;
        Ok(MarketClock {
            is_open: raw.is_open,
            next_open: raw.next_open.map(|t| t.timestamp()),
            next_close: raw.next_close.map(|t| t.timestamp()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_error_mapping() {
        assert!(matches!(
            map_http_error(StatusCode::UNAUTHORIZED, "bad key"),
            BrokerError::Auth(_)
        ));
        assert!(matches!(
            map_http_error(StatusCode::FORBIDDEN, "insufficient buying power"),
            BrokerError::InsufficientFunds { .. }
        ));
        assert!(matches!(
            map_http_error(StatusCode::TOO_MANY_REQUESTS, "slow down"),
            BrokerError::RateLimited { .. }
        ));
        assert!(matches!(
            map_http_error(StatusCode::BAD_GATEWAY, "oops"),
            BrokerError::Network(_)
        ));
        assert!(matches!(
            map_http_error(
                StatusCode::UNPROCESSABLE_ENTITY,
                "{\"message\": \"market is closed\"}"
            ),
            BrokerError::MarketClosed
        ));
    }

    #[test]
    fn test_order_decoding() {
        let json = r#"{
            "id": "abc-123",
            "symbol": "AAPL",
            "side": "buy",
            "type": "limit",
            "qty": "3",
            "limit_price": "150.15",
            "stop_price": null,
            "status": "new",
            "submitted_at": "2025-06-02T14:30:00Z",
            "legs": []
        }"#;
        let raw: AlpacaOrder = serde_json::from_str(json).unwrap();
        let order = raw.into_order();
        assert_eq!(order.symbol, Symbol::new("AAPL"));
        assert_eq!(order.quantity, Decimal::from(3));
        assert_eq!(order.status, OrderStatus::New);
        assert_eq!(order.limit_price, Some(Decimal::from_str_exact("150.15").unwrap()));
    }
}
