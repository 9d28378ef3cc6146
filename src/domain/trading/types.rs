use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Venue-qualified instrument identifier.
///
/// Equity tickers are uppercased on construction so lookups are
/// case-insensitive; crypto pairs (containing `/`) keep their venue casing.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Symbol(String);

impl Symbol {
    pub fn new(raw: impl AsRef<str>) -> Self {
        let raw = raw.as_ref().trim();
        if raw.contains('/') {
            Symbol(raw.to_string())
        } else {
            Symbol(raw.to_uppercase())
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_crypto(&self) -> bool {
        self.0.contains('/')
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Symbol::new(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeInForce {
    Day,
    Gtc,
    Ioc,
}

impl TimeInForce {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeInForce::Day => "day",
            TimeInForce::Gtc => "gtc",
            TimeInForce::Ioc => "ioc",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    PartiallyFilled,
    Filled,
    Canceled,
    Rejected,
}

/// Outbound single-leg order.
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub quantity: Decimal,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub time_in_force: TimeInForce,
    pub limit_price: Option<Decimal>,
}

/// Outbound bracket: entry plus venue-held take-profit and stop-loss.
#[derive(Debug, Clone)]
pub struct BracketRequest {
    pub symbol: Symbol,
    pub quantity: Decimal,
    pub side: OrderSide,
    pub take_profit: Decimal,
    pub stop_loss: Decimal,
    pub limit_price: Option<Decimal>,
}

/// Fields that may be amended on a resting order. `None` leaves the field.
#[derive(Debug, Clone, Default)]
pub struct OrderPatch {
    pub quantity: Option<Decimal>,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
}

/// A resting or recently-terminal order as reported by the venue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub symbol: Symbol,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: Decimal,
    pub limit_price: Option<Decimal>,
    pub stop_price: Option<Decimal>,
    pub status: OrderStatus,
    pub submitted_at: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AccountStatus {
    Active,
    Restricted,
    Closed,
}

/// Venue account snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    pub equity: Decimal,
    pub buying_power: Decimal,
    pub cash: Decimal,
    pub status: AccountStatus,
}

/// A holding as the venue reports it (before the engine's own bookkeeping).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalPosition {
    pub symbol: Symbol,
    pub quantity: Decimal,
    pub avg_entry_price: Decimal,
    pub market_value: Decimal,
    pub unrealized_pnl: Decimal,
}

/// Market session state for a venue. Crypto venues are always open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketClock {
    pub is_open: bool,
    pub next_open: Option<i64>,
    pub next_close: Option<i64>,
}

impl MarketClock {
    pub fn always_open() -> Self {
        Self {
            is_open: true,
            next_open: None,
            next_close: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Venue {
    Alpaca,
    Kraken,
    Mock,
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Venue::Alpaca => write!(f, "alpaca"),
            Venue::Kraken => write!(f, "kraken"),
            Venue::Mock => write!(f, "mock"),
        }
    }
}

/// Strategy output for one symbol in one cycle.
///
/// The reason string is diagnostic only; execution never branches on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    Buy { reason: String },
    Sell { reason: String },
    Hold { reason: String },
}

impl Signal {
    pub fn buy(reason: impl Into<String>) -> Self {
        Signal::Buy {
            reason: reason.into(),
        }
    }

    pub fn sell(reason: impl Into<String>) -> Self {
        Signal::Sell {
            reason: reason.into(),
        }
    }

    pub fn hold(reason: impl Into<String>) -> Self {
        Signal::Hold {
            reason: reason.into(),
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Signal::Buy { reason } | Signal::Sell { reason } | Signal::Hold { reason } => reason,
        }
    }
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Signal::Buy { reason } => write!(f, "BUY ({})", reason),
            Signal::Sell { reason } => write!(f, "SELL ({})", reason),
            Signal::Hold { reason } => write!(f, "HOLD ({})", reason),
        }
    }
}
