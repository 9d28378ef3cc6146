use crate::domain::errors::PositionError;
use crate::domain::trading::types::Symbol;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Set-once bitset over the three partial-exit levels.
///
/// A bit, once set, stays set for the life of the position, so a level can
/// never re-trigger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartialExitsMask(u8);

pub const PARTIAL_EXIT_LEVELS: u8 = 3;

impl PartialExitsMask {
    pub fn empty() -> Self {
        PartialExitsMask(0)
    }

    pub fn is_marked(&self, level: u8) -> bool {
        level < PARTIAL_EXIT_LEVELS && self.0 & (1 << level) != 0
    }

    pub fn mark(&self, level: u8) -> Result<Self, PositionError> {
        if level >= PARTIAL_EXIT_LEVELS {
            return Err(PositionError::LevelOutOfRange { level });
        }
        if self.is_marked(level) {
            return Err(PositionError::LevelAlreadyTaken { level });
        }
        Ok(PartialExitsMask(self.0 | (1 << level)))
    }

    pub fn count(&self) -> u32 {
        self.0.count_ones()
    }

    pub fn bits(&self) -> u8 {
        self.0
    }
}

/// Immutable record of an open long position.
///
/// Invariants, checked on construction and on every transition:
/// - `stop_loss < entry_price < take_profit`
/// - `quantity > 0`
/// - `highest_seen_price >= entry_price`
///
/// Every mutator returns a new value; a failed check leaves the original
/// untouched and refuses the mutation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradePosition {
    pub symbol: Symbol,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub entry_time: DateTime<Utc>,
    pub highest_seen_price: Decimal,
    pub partial_exits: PartialExitsMask,
    pub strategy: String,
}

impl TradePosition {
    #[allow(clippy::too_many_arguments)]
    pub fn open(
        symbol: Symbol,
        entry_price: Decimal,
        quantity: Decimal,
        stop_loss: Decimal,
        take_profit: Decimal,
        entry_time: DateTime<Utc>,
        strategy: impl Into<String>,
    ) -> Result<Self, PositionError> {
        if entry_price <= Decimal::ZERO {
            return Err(PositionError::NonPositiveEntry { price: entry_price });
        }
        if quantity <= Decimal::ZERO {
            return Err(PositionError::NonPositiveQuantity { quantity });
        }
        Self::check_stops(stop_loss, entry_price, take_profit)?;

        Ok(Self {
            symbol,
            entry_price,
            quantity,
            stop_loss,
            take_profit,
            entry_time,
            highest_seen_price: entry_price,
            partial_exits: PartialExitsMask::empty(),
            strategy: strategy.into(),
        })
    }

    fn check_stops(stop: Decimal, entry: Decimal, target: Decimal) -> Result<(), PositionError> {
        if stop >= entry || entry >= target {
            return Err(PositionError::InvalidStops {
                stop,
                entry,
                target,
            });
        }
        Ok(())
    }

    /// Observe a price tick and advance the trailing stop.
    ///
    /// The stop only ever rises: the candidate is
    /// `highest_seen × (1 − trail_pct)` and the result is the max of that and
    /// the current stop. Processing any tick sequence is equivalent to
    /// processing its running maximum.
    pub fn with_trailing_advance(&self, price: Decimal, trail_pct: Decimal) -> Self {
        let highest = self.highest_seen_price.max(price);
        let candidate = highest * (Decimal::ONE - trail_pct);
        let stop_loss = self.stop_loss.max(candidate);

        Self {
            highest_seen_price: highest,
            stop_loss,
            ..self.clone()
        }
    }

    /// Mark a partial-exit level and reduce the quantity.
    ///
    /// Refused if the level was already taken or the remaining quantity would
    /// not be positive.
    pub fn with_partial_exit(
        &self,
        level: u8,
        exit_quantity: Decimal,
    ) -> Result<Self, PositionError> {
        let partial_exits = self.partial_exits.mark(level)?;
        let remaining = self.quantity - exit_quantity;
        if remaining <= Decimal::ZERO {
            return Err(PositionError::NonPositiveQuantity {
                quantity: remaining,
            });
        }
        Ok(Self {
            quantity: remaining,
            partial_exits,
            ..self.clone()
        })
    }

    /// Increase quantity at a blended entry price (micro-scaling add-on).
    pub fn with_add_on(
        &self,
        add_quantity: Decimal,
        add_price: Decimal,
    ) -> Result<Self, PositionError> {
        if add_quantity <= Decimal::ZERO {
            return Err(PositionError::NonPositiveQuantity {
                quantity: add_quantity,
            });
        }
        if add_price <= Decimal::ZERO {
            return Err(PositionError::NonPositiveEntry { price: add_price });
        }
        let total = self.quantity + add_quantity;
        let blended = (self.entry_price * self.quantity + add_price * add_quantity) / total;

        Ok(Self {
            entry_price: blended,
            quantity: total,
            highest_seen_price: self.highest_seen_price.max(add_price),
            ..self.clone()
        })
    }

    /// Replace the protective levels. The ordering `stop < target` must hold;
    /// a trailing-advanced stop is allowed to sit above the original entry.
    pub fn with_stops(
        &self,
        stop_loss: Decimal,
        take_profit: Decimal,
    ) -> Result<Self, PositionError> {
        if stop_loss >= take_profit {
            return Err(PositionError::InvalidStops {
                stop: stop_loss,
                entry: self.entry_price,
                target: take_profit,
            });
        }
        Ok(Self {
            stop_loss,
            take_profit,
            ..self.clone()
        })
    }

    pub fn unrealized_pnl(&self, price: Decimal) -> Decimal {
        (price - self.entry_price) * self.quantity
    }

    /// Profit as a fraction of entry (0.01 = +1%).
    pub fn profit_pct(&self, price: Decimal) -> Decimal {
        if self.entry_price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        (price - self.entry_price) / self.entry_price
    }

    pub fn market_value(&self, price: Decimal) -> Decimal {
        price * self.quantity
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn open_test_position() -> TradePosition {
        TradePosition::open(
            Symbol::new("AAPL"),
            dec!(150),
            dec!(10),
            dec!(148.50),
            dec!(153),
            Utc::now(),
            "rsi_reversion",
        )
        .unwrap()
    }

    #[test]
    fn test_open_rejects_inverted_stops() {
        let err = TradePosition::open(
            Symbol::new("AAPL"),
            dec!(150),
            dec!(10),
            dec!(151), // stop above entry
            dec!(153),
            Utc::now(),
            "test",
        )
        .unwrap_err();
        assert!(matches!(err, PositionError::InvalidStops { .. }));
    }

    #[test]
    fn test_open_rejects_non_positive_quantity() {
        let err = TradePosition::open(
            Symbol::new("AAPL"),
            dec!(150),
            Decimal::ZERO,
            dec!(148),
            dec!(153),
            Utc::now(),
            "test",
        )
        .unwrap_err();
        assert!(matches!(err, PositionError::NonPositiveQuantity { .. }));
    }

    #[test]
    fn test_trailing_stop_never_decreases() {
        let trail = dec!(0.005);
        let mut pos = open_test_position();
        let mut last_stop = pos.stop_loss;

        for price in [dec!(152), dec!(155), dec!(151), dec!(150), dec!(154)] {
            pos = pos.with_trailing_advance(price, trail);
            assert!(pos.stop_loss >= last_stop, "stop decreased at {}", price);
            last_stop = pos.stop_loss;
        }

        // max(148.50, 155 * 0.995) = 154.225
        assert_eq!(pos.stop_loss, dec!(154.225));
        assert_eq!(pos.highest_seen_price, dec!(155));
    }

    #[test]
    fn test_trailing_equivalent_to_running_maximum() {
        let trail = dec!(0.01);
        let ticks = [dec!(151), dec!(149), dec!(156), dec!(153), dec!(152)];

        let mut seq = open_test_position();
        for p in ticks {
            seq = seq.with_trailing_advance(p, trail);
        }

        let max_only = open_test_position().with_trailing_advance(dec!(156), trail);
        assert_eq!(seq.stop_loss, max_only.stop_loss);
        assert_eq!(seq.highest_seen_price, max_only.highest_seen_price);
    }

    #[test]
    fn test_partial_exit_marks_once() {
        let pos = open_test_position();
        let pos = pos.with_partial_exit(0, dec!(3)).unwrap();
        assert_eq!(pos.quantity, dec!(7));
        assert!(pos.partial_exits.is_marked(0));

        let err = pos.with_partial_exit(0, dec!(1)).unwrap_err();
        assert_eq!(err, PositionError::LevelAlreadyTaken { level: 0 });
    }

    #[test]
    fn test_partial_exit_level_range() {
        let pos = open_test_position();
        let err = pos.with_partial_exit(3, dec!(1)).unwrap_err();
        assert_eq!(err, PositionError::LevelOutOfRange { level: 3 });
    }

    #[test]
    fn test_mask_survives_all_levels() {
        let mut mask = PartialExitsMask::empty();
        for level in 0..PARTIAL_EXIT_LEVELS {
            mask = mask.mark(level).unwrap();
            assert!(mask.is_marked(level));
        }
        assert_eq!(mask.count(), 3);
    }

    #[test]
    fn test_add_on_blends_entry() {
        let pos = open_test_position();
        let pos = pos.with_add_on(dec!(10), dec!(151)).unwrap();
        assert_eq!(pos.quantity, dec!(20));
        assert_eq!(pos.entry_price, dec!(150.5));
    }

    #[test]
    fn test_invariants_hold_after_every_transition() {
        let pos = open_test_position()
            .with_trailing_advance(dec!(152), dec!(0.005))
            .with_partial_exit(0, dec!(2))
            .unwrap()
            .with_add_on(dec!(5), dec!(151))
            .unwrap();

        // The trailing advance may lift the stop above entry (profit lock);
        // the ordering against the target and the positivity bounds must hold.
        assert!(pos.stop_loss < pos.take_profit);
        assert!(pos.entry_price < pos.take_profit);
        assert!(pos.quantity > Decimal::ZERO);
        assert!(pos.highest_seen_price >= pos.entry_price);
    }

    #[test]
    fn test_serde_round_trip_preserves_all_fields() {
        let pos = open_test_position()
            .with_trailing_advance(dec!(152), dec!(0.005))
            .with_partial_exit(1, dec!(2))
            .unwrap();

        let json = serde_json::to_string(&pos).unwrap();
        let back: TradePosition = serde_json::from_str(&json).unwrap();
        assert_eq!(pos, back);
    }
}
