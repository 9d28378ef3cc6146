use crate::domain::market::regime::MarketRegime;
use crate::domain::trading::types::{OrderSide, Signal, Symbol};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// How degraded the engine currently is. Every state push to the dashboard
/// interface carries this.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum DegradationLevel {
    Normal,
    Degraded,
    SafeMode,
    Halted,
    Emergency,
}

impl fmt::Display for DegradationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DegradationLevel::Normal => write!(f, "NORMAL"),
            DegradationLevel::Degraded => write!(f, "DEGRADED"),
            DegradationLevel::SafeMode => write!(f, "SAFE_MODE"),
            DegradationLevel::Halted => write!(f, "HALTED"),
            DegradationLevel::Emergency => write!(f, "EMERGENCY"),
        }
    }
}

/// Typed events published by the core. A dedicated sender owns the dashboard
/// socket and serializes these; the core never touches the wire format.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
    CycleCompleted {
        profile: String,
        symbols_processed: usize,
        errors: usize,
        elapsed_ms: u64,
        degradation: DegradationLevel,
    },
    SignalGenerated {
        profile: String,
        symbol: Symbol,
        signal: Signal,
        regime: MarketRegime,
    },
    PositionOpened {
        profile: String,
        symbol: Symbol,
        quantity: Decimal,
        entry_price: Decimal,
    },
    PositionClosed {
        profile: String,
        symbol: Symbol,
        exit_price: Decimal,
        pnl: Decimal,
        reason: String,
    },
    OrderRejected {
        profile: String,
        symbol: Symbol,
        side: OrderSide,
        reason: String,
    },
    TierChanged {
        profile: String,
        from: String,
        to: String,
    },
    DrawdownWarning {
        peak: Decimal,
        current: Decimal,
    },
    AnomalyDetected {
        metric: String,
        z_score: f64,
    },
    SafeModeEngaged {
        reason: String,
    },
    SafeModeLifted,
    EmergencyFlatten {
        reason: String,
    },
    DegradationChanged {
        level: DegradationLevel,
    },
}
