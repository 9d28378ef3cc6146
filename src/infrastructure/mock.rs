//! In-memory venue used by tests and simulation mode.
//!
//! Behavior is scripted: bars are seeded per symbol, failures are injected
//! per kind with a remaining-count, and every accepted order is recorded so
//! tests can assert on exactly what would have hit the wire.

use crate::domain::errors::BrokerError;
use crate::domain::market::bar::Bar;
use crate::domain::ports::BrokerClient;
use crate::domain::trading::types::{
    Account, AccountStatus, BracketRequest, ExternalPosition, MarketClock, Order, OrderPatch,
    OrderRequest, OrderSide, OrderStatus, OrderType, Symbol, Venue,
};
use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::sync::Mutex;

struct MockState {
    account: Account,
    positions: Vec<ExternalPosition>,
    bars: HashMap<Symbol, Vec<Bar>>,
    orders: Vec<Order>,
    brackets: Vec<BracketRequest>,
    fail_kind: Option<String>,
    fail_remaining: u32,
    endpoint_failures: HashMap<String, (String, u32)>,
    call_counts: HashMap<String, u32>,
    market_open: bool,
    next_order_id: u64,
}

pub struct MockBroker {
    state: Mutex<MockState>,
    supports_brackets: bool,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::with_equity(dec!(100000))
    }

    pub fn with_equity(equity: Decimal) -> Self {
        Self {
            state: Mutex::new(MockState {
                account: Account {
                    equity,
                    buying_power: equity,
                    cash: equity,
                    status: AccountStatus::Active,
                },
                positions: Vec::new(),
                bars: HashMap::new(),
                orders: Vec::new(),
                brackets: Vec::new(),
                fail_kind: None,
                fail_remaining: 0,
                endpoint_failures: HashMap::new(),
                call_counts: HashMap::new(),
                market_open: true,
                next_order_id: 1,
            }),
            supports_brackets: true,
        }
    }

    pub fn without_brackets(mut self) -> Self {
        self.supports_brackets = false;
        self
    }

    /// Script the next `count` calls (any endpoint) to fail with `kind`.
    pub fn fail_next(&self, kind: &str, count: u32) {
        let mut state = self.state.lock().expect("mock lock poisoned");
        state.fail_kind = Some(kind.to_string());
        state.fail_remaining = count;
    }

    /// Script the next `count` calls of one endpoint to fail with `kind`,
    /// leaving other endpoints healthy.
    pub fn fail_endpoint(&self, endpoint: &str, kind: &str, count: u32) {
        self.state
            .lock()
            .expect("mock lock poisoned")
            .endpoint_failures
            .insert(endpoint.to_string(), (kind.to_string(), count));
    }

    pub fn set_bars(&self, symbol: Symbol, bars: Vec<Bar>) {
        self.state
            .lock()
            .expect("mock lock poisoned")
            .bars
            .insert(symbol, bars);
    }

    pub fn push_bar(&self, symbol: Symbol, bar: Bar) {
        self.state
            .lock()
            .expect("mock lock poisoned")
            .bars
            .entry(symbol)
            .or_default()
            .push(bar);
    }

    pub fn set_market_open(&self, open: bool) {
        self.state.lock().expect("mock lock poisoned").market_open = open;
    }

    pub fn set_position(&self, position: ExternalPosition) {
        let mut state = self.state.lock().expect("mock lock poisoned");
        state.positions.retain(|p| p.symbol != position.symbol);
        state.positions.push(position);
    }

    pub fn set_equity(&self, equity: Decimal) {
        let mut state = self.state.lock().expect("mock lock poisoned");
        state.account.equity = equity;
        state.account.buying_power = equity;
        state.account.cash = equity;
    }

    pub fn call_count(&self, endpoint: &str) -> u32 {
        self.state
            .lock()
            .expect("mock lock poisoned")
            .call_counts
            .get(endpoint)
            .copied()
            .unwrap_or(0)
    }

    pub fn placed_orders(&self) -> Vec<Order> {
        self.state.lock().expect("mock lock poisoned").orders.clone()
    }

    pub fn placed_brackets(&self) -> Vec<BracketRequest> {
        self.state
            .lock()
            .expect("mock lock poisoned")
            .brackets
            .clone()
    }

    pub fn positions_snapshot(&self) -> Vec<ExternalPosition> {
        self.state
            .lock()
            .expect("mock lock poisoned")
            .positions
            .clone()
    }

    fn gate(&self, endpoint: &str) -> Result<(), BrokerError> {
        let mut state = self.state.lock().expect("mock lock poisoned");
        *state.call_counts.entry(endpoint.to_string()).or_insert(0) += 1;

        let scripted_kind = if let Some((kind, remaining)) =
            state.endpoint_failures.get_mut(endpoint)
            && *remaining > 0
        {
            *remaining -= 1;
            Some(kind.clone())
        } else if state.fail_remaining > 0 {
            state.fail_remaining -= 1;
            Some(state.fail_kind.clone().unwrap_or_default())
        } else {
            None
        };

        if let Some(kind) = scripted_kind {
            return Err(match kind.as_str() {
                "network" => BrokerError::Network("scripted failure".into()),
                "auth" => BrokerError::Auth("scripted failure".into()),
                "rate_limited" => BrokerError::RateLimited { retry_after_secs: 1 },
                "insufficient" => BrokerError::InsufficientFunds {
                    need: dec!(100),
                    available: dec!(0),
                },
                "market_closed" => BrokerError::MarketClosed,
                _ => BrokerError::Unknown("scripted failure".into()),
            });
        }
        Ok(())
    }
}

impl Default for MockBroker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BrokerClient for MockBroker {
    fn venue(&self) -> Venue {
        Venue::Mock
    }

    fn supports_brackets(&self) -> bool {
        self.supports_brackets
    }

    async fn account(&self) -> Result<Account, BrokerError> {
        self.gate("account")?;
        Ok(self.state.lock().expect("mock lock poisoned").account.clone())
    }

    async fn positions(&self) -> Result<Vec<ExternalPosition>, BrokerError> {
        self.gate("positions")?;
        Ok(self.positions_snapshot())
    }

    async fn latest_bar(&self, symbol: &Symbol) -> Result<Option<Bar>, BrokerError> {
        self.gate("latest_bar")?;
        Ok(self
            .state
            .lock()
            .expect("mock lock poisoned")
            .bars
            .get(symbol)
            .and_then(|bars| bars.last().cloned()))
    }

    async fn history(&self, symbol: &Symbol, limit: usize) -> Result<Vec<Bar>, BrokerError> {
        self.gate("history")?;
        let state = self.state.lock().expect("mock lock poisoned");
        let bars = state.bars.get(symbol).cloned().unwrap_or_default();
        let start = bars.len().saturating_sub(limit);
        Ok(bars[start..].to_vec())
    }

    async fn place_order(&self, request: OrderRequest) -> Result<String, BrokerError> {
        self.gate("place_order")?;
        let mut state = self.state.lock().expect("mock lock poisoned");
        let id = format!("mock-{}", state.next_order_id);
        state.next_order_id += 1;

        let status = match request.order_type {
            OrderType::Market => OrderStatus::Filled,
            OrderType::Limit => OrderStatus::New,
        };
        state.orders.push(Order {
            id: id.clone(),
            symbol: request.symbol,
            side: request.side,
            order_type: request.order_type,
            quantity: request.quantity,
            limit_price: request.limit_price,
            stop_price: None,
            status,
            submitted_at: Utc::now().timestamp(),
        });
        Ok(id)
    }

    async fn place_bracket(&self, request: BracketRequest) -> Result<String, BrokerError> {
        self.gate("place_bracket")?;
        if !self.supports_brackets {
            return Err(BrokerError::Unknown("brackets not supported".into()));
        }
        let mut state = self.state.lock().expect("mock lock poisoned");
        let id = format!("mock-{}", state.next_order_id);
        state.next_order_id += 1;
        state.orders.push(Order {
            id: id.clone(),
            symbol: request.symbol.clone(),
            side: request.side,
            order_type: OrderType::Limit,
            quantity: request.quantity,
            limit_price: request.limit_price,
            stop_price: Some(request.stop_loss),
            status: OrderStatus::New,
            submitted_at: Utc::now().timestamp(),
        });
        state.brackets.push(request);
        Ok(id)
    }

    async fn open_orders(&self, symbol: Option<&Symbol>) -> Result<Vec<Order>, BrokerError> {
        self.gate("open_orders")?;
        let state = self.state.lock().expect("mock lock poisoned");
        Ok(state
            .orders
            .iter()
            .filter(|o| o.status == OrderStatus::New)
            .filter(|o| symbol.is_none_or(|s| &o.symbol == s))
            .cloned()
            .collect())
    }

    async fn replace_order(&self, order_id: &str, patch: OrderPatch) -> Result<(), BrokerError> {
        self.gate("replace_order")?;
        let mut state = self.state.lock().expect("mock lock poisoned");
        let order = state
            .orders
            .iter_mut()
            .find(|o| o.id == order_id && o.status == OrderStatus::New)
            .ok_or_else(|| BrokerError::Unknown(format!("no open order {}", order_id)))?;
        if let Some(q) = patch.quantity {
            order.quantity = q;
        }
        if let Some(l) = patch.limit_price {
            order.limit_price = Some(l);
        }
        if let Some(s) = patch.stop_price {
            order.stop_price = Some(s);
        }
        Ok(())
    }

    async fn cancel_all(&self, symbol: Option<&Symbol>) -> Result<(), BrokerError> {
        self.gate("cancel_all")?;
        let mut state = self.state.lock().expect("mock lock poisoned");
        for order in state.orders.iter_mut() {
            if order.status == OrderStatus::New && symbol.is_none_or(|s| &order.symbol == s) {
                order.status = OrderStatus::Canceled;
            }
        }
        Ok(())
    }

    async fn close_all(&self) -> Result<(), BrokerError> {
        self.gate("close_all")?;
        let mut state = self.state.lock().expect("mock lock poisoned");
        let closers: Vec<Order> = state
            .positions
            .iter()
            .map(|p| Order {
                id: format!("mock-close-{}", p.symbol),
                symbol: p.symbol.clone(),
                side: OrderSide::Sell,
                order_type: OrderType::Market,
                quantity: p.quantity,
                limit_price: None,
                stop_price: None,
                status: OrderStatus::Filled,
                submitted_at: Utc::now().timestamp(),
            })
            .collect();
        state.orders.extend(closers);
        state.positions.clear();
        Ok(())
    }

    async fn clock(&self) -> Result<MarketClock, BrokerError> {
        self.gate("clock")?;
        let state = self.state.lock().expect("mock lock poisoned");
        Ok(MarketClock {
            is_open: state.market_open,
            next_open: None,
            next_close: None,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_failures_then_recovery() {
        let mock = MockBroker::new();
        mock.fail_next("network", 2);

        assert!(mock.account().await.is_err());
        assert!(mock.account().await.is_err());
        assert!(mock.account().await.is_ok());
        assert_eq!(mock.call_count("account"), 3);
    }

    #[tokio::test]
    async fn test_close_all_flattens() {
        let mock = MockBroker::new();
        mock.set_position(ExternalPosition {
            symbol: Symbol::new("AAPL"),
            quantity: dec!(10),
            avg_entry_price: dec!(150),
            market_value: dec!(1500),
            unrealized_pnl: Decimal::ZERO,
        });

        mock.close_all().await.unwrap();
        assert!(mock.positions_snapshot().is_empty());
        assert!(
            mock.placed_orders()
                .iter()
                .any(|o| o.side == OrderSide::Sell && o.order_type == OrderType::Market)
        );
    }
}
