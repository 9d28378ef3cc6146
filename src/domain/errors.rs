use rust_decimal::Decimal;
use thiserror::Error;

/// Failure kinds surfaced by venue clients.
///
/// Every outbound broker call resolves to exactly one of these; the
/// resilience layer keys its retry decision off [`BrokerError::is_retryable`].
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("network error: {0}")]
    Network(String),

    #[error("authentication rejected: {0}")]
    Auth(String),

    #[error("rate limited (retry after {retry_after_secs}s)")]
    RateLimited { retry_after_secs: u64 },

    #[error("insufficient funds: need ${need}, available ${available}")]
    InsufficientFunds { need: Decimal, available: Decimal },

    #[error("market closed")]
    MarketClosed,

    #[error("venue error: {0}")]
    Unknown(String),
}

impl BrokerError {
    /// Only transient transport failures are retryable. Converting any other
    /// kind into a retry is a policy violation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, BrokerError::Network(_))
    }

    /// Stable label for metric dimensions.
    pub fn kind(&self) -> &'static str {
        match self {
            BrokerError::Network(_) => "network",
            BrokerError::Auth(_) => "auth",
            BrokerError::RateLimited { .. } => "rate_limited",
            BrokerError::InsufficientFunds { .. } => "insufficient_funds",
            BrokerError::MarketClosed => "market_closed",
            BrokerError::Unknown(_) => "unknown",
        }
    }
}

/// Violations raised by the invariant checks on
/// [`TradePosition`](crate::domain::trading::position::TradePosition).
///
/// A violation means the mutation was refused; the previous value is intact.
#[derive(Debug, Error, PartialEq)]
pub enum PositionError {
    #[error(
        "invalid stops: stop {stop} / entry {entry} / target {target} must be strictly increasing"
    )]
    InvalidStops {
        stop: Decimal,
        entry: Decimal,
        target: Decimal,
    },

    #[error("quantity must be positive, got {quantity}")]
    NonPositiveQuantity { quantity: Decimal },

    #[error("entry price must be positive, got {price}")]
    NonPositiveEntry { price: Decimal },

    #[error("partial exit level {level} out of range (0..3)")]
    LevelOutOfRange { level: u8 },

    #[error("partial exit level {level} already taken")]
    LevelAlreadyTaken { level: u8 },
}

/// Risk-policy rejections. These skip or halt an action without being bugs.
#[derive(Debug, Error)]
pub enum RiskViolation {
    #[error("drawdown breach: {drawdown_pct:.2}% > limit {limit_pct:.2}%")]
    DrawdownBreach { drawdown_pct: f64, limit_pct: f64 },

    #[error("PDT protection: {day_trades} day trades in window with equity ${equity} < $25,000")]
    PdtProtection { day_trades: u64, equity: Decimal },

    #[error("position value ${value} below tier minimum ${minimum}")]
    BelowMinimumValue { value: Decimal, minimum: Decimal },

    #[error("max positions reached: {open} of {max}")]
    PositionLimit { open: usize, max: usize },
}
