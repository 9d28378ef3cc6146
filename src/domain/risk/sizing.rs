//! Volatility-adjusted position sizing and stop/target derivation.
//!
//! All capital percentages apply to deployable capital, defined everywhere
//! as `equity × (1 − reserve_percent)`.

use crate::domain::risk::capital_tier::TierParameters;
use crate::domain::risk::stats::SymbolStats;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

/// Exit percentages carried by a profile (or a venue override).
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExitParams {
    pub stop_loss_pct: Decimal,
    pub take_profit_pct: Decimal,
}

/// Derive absolute stop and target for an entry.
///
/// Precedence: venue override (fixed percentages, no multipliers) first,
/// then the tier multipliers applied to the profile baseline.
pub fn derive_stops(
    entry: Decimal,
    baseline: ExitParams,
    tier: &TierParameters,
    venue_override: Option<ExitParams>,
) -> (Decimal, Decimal) {
    let (sl_pct, tp_pct) = match venue_override {
        Some(o) => (o.stop_loss_pct, o.take_profit_pct),
        None => (
            baseline.stop_loss_pct * tier.sl_multiplier,
            baseline.take_profit_pct * tier.tp_multiplier,
        ),
    };
    let stop = entry * (Decimal::ONE - sl_pct);
    let target = entry * (Decimal::ONE + tp_pct);
    (stop, target)
}

/// Volatility haircut on per-trade dollar risk: full size up to an index
/// reading of 20, shrinking proportionally above it.
fn volatility_scalar(volatility_index: Decimal) -> Decimal {
    let floor = dec!(20);
    let denom = volatility_index.max(floor);
    (floor / denom).min(Decimal::ONE)
}

/// Risk-based position size in shares (or coin units).
///
/// Returns zero when the inputs cannot support a position: non-positive
/// price or equity, a stop at or above the entry, or a resulting value under
/// the tier minimum.
pub fn position_size(
    equity: Decimal,
    price: Decimal,
    volatility_index: Decimal,
    stop_loss_price: Decimal,
    tier: &TierParameters,
) -> Decimal {
    if price <= Decimal::ZERO || equity <= Decimal::ZERO {
        return Decimal::ZERO;
    }
    let risk_per_share = price - stop_loss_price;
    if risk_per_share <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    let dollar_risk = equity * tier.risk_per_trade_percent * volatility_scalar(volatility_index);
    let mut shares = dollar_risk / risk_per_share;

    // Cap by the tier's share of equity in a single name.
    let max_shares = equity * tier.max_position_percent / price;
    shares = shares.min(max_shares);

    if shares * price < tier.min_position_value {
        debug!(
            "sizing: dropping entry, value {} below tier minimum {}",
            shares * price,
            tier.min_position_value
        );
        return Decimal::ZERO;
    }

    // Whole shares make the position bracketable on venues that refuse
    // fractional bracket legs.
    if tier.prefer_whole_shares {
        let whole = shares.floor();
        if whole * price >= tier.min_position_value {
            return whole;
        }
    }

    shares
}

/// Kelly-mode dollar sizing from cached symbol statistics.
///
/// `f* = p − (1 − p) / b` with `b` the configured reward:risk; the result is
/// scaled by the operator's Kelly fraction and clamped to [1%, 25%] of
/// deployable capital.
pub fn kelly_position_value(
    equity: Decimal,
    stats: &SymbolStats,
    reward_risk: Decimal,
    kelly_fraction: Decimal,
    reserve_percent: Decimal,
) -> Decimal {
    let deployable = deployable_capital(equity, reserve_percent);
    if deployable <= Decimal::ZERO || reward_risk <= Decimal::ZERO {
        return Decimal::ZERO;
    }

    let p = Decimal::from_f64_retain(stats.win_rate).unwrap_or(Decimal::ZERO);
    let f_star = p - (Decimal::ONE - p) / reward_risk;
    let raw = f_star * kelly_fraction;

    let clamped = raw.clamp(dec!(0.01), dec!(0.25));
    deployable * clamped
}

/// The single authoritative formula for capital available to sizing.
pub fn deployable_capital(equity: Decimal, reserve_percent: Decimal) -> Decimal {
    equity * (Decimal::ONE - reserve_percent)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::risk::capital_tier::CapitalTier;

    #[test]
    fn test_small_account_scenario() {
        // $1,000 equity, $100 price, calm index: risk $10 against a $0.50
        // stop distance gives 20 shares, capped to 3.5 by the 35% position
        // limit, preferred down to 3 whole shares.
        let tier = CapitalTier::Small.params();
        let baseline = ExitParams {
            stop_loss_pct: dec!(0.005),
            take_profit_pct: dec!(0.0075),
        };
        let (stop, target) = derive_stops(dec!(100), baseline, &tier, Some(baseline));
        assert_eq!(stop, dec!(99.5000));
        assert_eq!(target, dec!(100.7500));

        let shares = position_size(dec!(1000), dec!(100), dec!(15), stop, &tier);
        assert_eq!(shares, dec!(3));
    }

    #[test]
    fn test_zero_price_yields_zero() {
        let tier = CapitalTier::Standard.params();
        assert_eq!(
            position_size(dec!(10000), Decimal::ZERO, dec!(15), dec!(99), &tier),
            Decimal::ZERO
        );
    }

    #[test]
    fn test_non_positive_equity_yields_zero() {
        let tier = CapitalTier::Standard.params();
        assert_eq!(
            position_size(Decimal::ZERO, dec!(100), dec!(15), dec!(99), &tier),
            Decimal::ZERO
        );
        assert_eq!(
            position_size(dec!(-50), dec!(100), dec!(15), dec!(99), &tier),
            Decimal::ZERO
        );
    }

    #[test]
    fn test_inverted_stop_yields_zero() {
        let tier = CapitalTier::Standard.params();
        assert_eq!(
            position_size(dec!(10000), dec!(100), dec!(15), dec!(101), &tier),
            Decimal::ZERO
        );
    }

    #[test]
    fn test_volatility_haircut() {
        // Index 40 halves the dollar risk vs index <= 20.
        let tier = CapitalTier::Standard.params();
        let calm = position_size(dec!(10000), dec!(100), dec!(10), dec!(90), &tier);
        let stressed = position_size(dec!(10000), dec!(100), dec!(40), dec!(90), &tier);
        assert_eq!(calm, dec!(20));
        assert_eq!(stressed * dec!(2), calm);
    }

    #[test]
    fn test_below_minimum_value_dropped() {
        let tier = CapitalTier::Micro.params();
        // Tiny equity: whatever survives the caps is worth less than $5.
        let shares = position_size(dec!(8), dec!(100), dec!(15), dec!(99.5), &tier);
        assert_eq!(shares, Decimal::ZERO);
    }

    #[test]
    fn test_tier_multipliers_shape_stops() {
        let micro = CapitalTier::Micro.params();
        let baseline = ExitParams {
            stop_loss_pct: dec!(0.01),
            take_profit_pct: dec!(0.02),
        };
        // MICRO: SL x1.5 (wider stop), TP x0.5 (closer target).
        let (stop, target) = derive_stops(dec!(100), baseline, &micro, None);
        assert_eq!(stop, dec!(98.5000));
        assert_eq!(target, dec!(101.0000));
    }

    #[test]
    fn test_venue_override_beats_tier_multiplier() {
        let micro = CapitalTier::Micro.params();
        let baseline = ExitParams {
            stop_loss_pct: dec!(0.01),
            take_profit_pct: dec!(0.02),
        };
        let crypto_override = ExitParams {
            stop_loss_pct: dec!(0.005),
            take_profit_pct: dec!(0.0075),
        };
        let (stop, target) = derive_stops(dec!(200), baseline, &micro, Some(crypto_override));
        assert_eq!(stop, dec!(199.000));
        assert_eq!(target, dec!(201.5000));
    }

    #[test]
    fn test_kelly_clamped_to_band() {
        let stats = SymbolStats {
            win_rate: 0.9,
            total_trades: 60,
            wins: 54,
            avg_win: dec!(50),
            avg_loss: dec!(25),
        };
        // Very high win rate: raw Kelly far above 25%; clamp applies.
        let value = kelly_position_value(dec!(10000), &stats, dec!(2), dec!(0.5), dec!(0.1));
        assert_eq!(value, dec!(9000) * dec!(0.25));

        // Losing stats clamp up to the 1% floor rather than zero.
        let losing = SymbolStats {
            win_rate: 0.2,
            total_trades: 40,
            wins: 8,
            avg_win: dec!(10),
            avg_loss: dec!(20),
        };
        let value = kelly_position_value(dec!(10000), &losing, dec!(2), dec!(0.5), dec!(0.1));
        assert_eq!(value, dec!(9000) * dec!(0.01));
    }

    #[test]
    fn test_deployable_capital_formula() {
        assert_eq!(deployable_capital(dec!(10000), dec!(0.1)), dec!(9000));
        assert_eq!(deployable_capital(dec!(10000), Decimal::ZERO), dec!(10000));
    }
}
