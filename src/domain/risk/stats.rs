use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Per-symbol trade statistics, aggregated from the journal on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SymbolStats {
    pub win_rate: f64,
    pub total_trades: u64,
    pub wins: u64,
    pub avg_win: Decimal,
    pub avg_loss: Decimal,
}

impl SymbolStats {
    pub fn empty() -> Self {
        Self {
            win_rate: 0.0,
            total_trades: 0,
            wins: 0,
            avg_win: Decimal::ZERO,
            avg_loss: Decimal::ZERO,
        }
    }

    /// Kelly sizing only trusts statistics backed by enough closed trades.
    pub fn is_significant(&self, min_trades: u64) -> bool {
        self.total_trades >= min_trades
    }
}
