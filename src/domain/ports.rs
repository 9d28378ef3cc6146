use crate::domain::errors::BrokerError;
use crate::domain::market::bar::Bar;
use crate::domain::trading::types::{
    Account, BracketRequest, ExternalPosition, MarketClock, Order, OrderPatch, OrderRequest,
    Symbol, Venue,
};
use async_trait::async_trait;

/// Uniform venue contract. Implemented by the Alpaca and Kraken adapters,
/// by the resilience wrapper, and by the mock used in tests.
#[async_trait]
pub trait BrokerClient: Send + Sync {
    fn venue(&self) -> Venue;

    /// Whether the venue accepts compound bracket orders. When false the
    /// lifecycle falls back to client-side protective triggers.
    fn supports_brackets(&self) -> bool;

    async fn account(&self) -> Result<Account, BrokerError>;

    async fn positions(&self) -> Result<Vec<ExternalPosition>, BrokerError>;

    async fn latest_bar(&self, symbol: &Symbol) -> Result<Option<Bar>, BrokerError>;

    /// Up to `limit` bars in chronological order.
    async fn history(&self, symbol: &Symbol, limit: usize) -> Result<Vec<Bar>, BrokerError>;

    /// Returns the venue order id on acceptance.
    async fn place_order(&self, request: OrderRequest) -> Result<String, BrokerError>;

    async fn place_bracket(&self, request: BracketRequest) -> Result<String, BrokerError>;

    async fn open_orders(&self, symbol: Option<&Symbol>) -> Result<Vec<Order>, BrokerError>;

    async fn replace_order(&self, order_id: &str, patch: OrderPatch) -> Result<(), BrokerError>;

    async fn cancel_all(&self, symbol: Option<&Symbol>) -> Result<(), BrokerError>;

    /// Emergency liquidation of every holding at market.
    async fn close_all(&self) -> Result<(), BrokerError>;

    async fn clock(&self) -> Result<MarketClock, BrokerError>;
}
