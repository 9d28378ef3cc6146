use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Equity-band classification. The tier is recomputed from current equity
/// every cycle; transitions are logged by the control loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CapitalTier {
    Micro,
    Small,
    Medium,
    Standard,
    Pdt,
}

impl fmt::Display for CapitalTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CapitalTier::Micro => write!(f, "MICRO"),
            CapitalTier::Small => write!(f, "SMALL"),
            CapitalTier::Medium => write!(f, "MEDIUM"),
            CapitalTier::Standard => write!(f, "STANDARD"),
            CapitalTier::Pdt => write!(f, "PDT"),
        }
    }
}

/// Risk-parameter row owned by a capital tier.
#[derive(Debug, Clone, PartialEq)]
pub struct TierParameters {
    pub max_position_percent: Decimal,
    pub risk_per_trade_percent: Decimal,
    pub max_positions: usize,
    pub min_position_value: Decimal,
    pub tp_multiplier: Decimal,
    pub sl_multiplier: Decimal,
    pub prefer_whole_shares: bool,
    pub human_hint: &'static str,
}

impl CapitalTier {
    pub fn for_equity(equity: Decimal) -> Self {
        if equity < dec!(500) {
            CapitalTier::Micro
        } else if equity < dec!(2000) {
            CapitalTier::Small
        } else if equity < dec!(5000) {
            CapitalTier::Medium
        } else if equity < dec!(25000) {
            CapitalTier::Standard
        } else {
            CapitalTier::Pdt
        }
    }

    /// The authoritative parameter table.
    pub fn params(&self) -> TierParameters {
        match self {
            CapitalTier::Micro => TierParameters {
                max_position_percent: dec!(0.50),
                risk_per_trade_percent: dec!(0.005),
                max_positions: 2,
                min_position_value: dec!(5),
                tp_multiplier: dec!(0.5),
                sl_multiplier: dec!(1.5),
                prefer_whole_shares: true,
                human_hint: "capital preservation: few, small, tight positions",
            },
            CapitalTier::Small => TierParameters {
                max_position_percent: dec!(0.35),
                risk_per_trade_percent: dec!(0.01),
                max_positions: 3,
                min_position_value: dec!(10),
                tp_multiplier: dec!(0.75),
                sl_multiplier: dec!(1.25),
                prefer_whole_shares: true,
                human_hint: "building the base: modest risk, whole shares",
            },
            CapitalTier::Medium => TierParameters {
                max_position_percent: dec!(0.30),
                risk_per_trade_percent: dec!(0.015),
                max_positions: 4,
                min_position_value: dec!(15),
                tp_multiplier: dec!(0.9),
                sl_multiplier: dec!(1.1),
                prefer_whole_shares: true,
                human_hint: "room to diversify, still conservative",
            },
            CapitalTier::Standard => TierParameters {
                max_position_percent: dec!(0.25),
                risk_per_trade_percent: dec!(0.02),
                max_positions: 5,
                min_position_value: dec!(25),
                tp_multiplier: dec!(1.0),
                sl_multiplier: dec!(1.0),
                prefer_whole_shares: false,
                human_hint: "standard retail sizing",
            },
            CapitalTier::Pdt => TierParameters {
                max_position_percent: dec!(0.20),
                risk_per_trade_percent: dec!(0.02),
                max_positions: 8,
                min_position_value: dec!(50),
                tp_multiplier: dec!(1.0),
                sl_multiplier: dec!(1.0),
                prefer_whole_shares: false,
                human_hint: "above the PDT threshold: widest book",
            },
        }
    }
}
