use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// One OHLCV aggregate. All derived indicators are pure functions over
/// ordered slices of these.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub open_time: DateTime<Utc>,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
}

impl Bar {
    pub fn true_range(&self, prev_close: Decimal) -> Decimal {
        (self.high - self.low)
            .max((self.high - prev_close).abs())
            .max((self.low - prev_close).abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_true_range_covers_gap() {
        let bar = Bar {
            open_time: Utc::now(),
            open: dec!(101),
            high: dec!(103),
            low: dec!(100),
            close: dec!(102),
            volume: dec!(1000),
        };
        // Gap down from 110: TR must capture the gap, not just the bar range.
        assert_eq!(bar.true_range(dec!(110)), dec!(10));
    }
}
