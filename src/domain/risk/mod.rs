pub mod capital_tier;
pub mod drawdown;
pub mod sizing;
pub mod stats;
