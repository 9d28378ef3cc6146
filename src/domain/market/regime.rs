use crate::domain::market::bar::Bar;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Market regime derived from trend strength and the volatility state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MarketRegime {
    StrongBull,
    StrongBear,
    RangeBound,
    HighVolatility,
    Neutral,
}

impl fmt::Display for MarketRegime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MarketRegime::StrongBull => write!(f, "Strong Bull"),
            MarketRegime::StrongBear => write!(f, "Strong Bear"),
            MarketRegime::RangeBound => write!(f, "Range Bound"),
            MarketRegime::HighVolatility => write!(f, "High Volatility"),
            MarketRegime::Neutral => write!(f, "Neutral"),
        }
    }
}

/// Volatility classification of the venue-level index (VIX for equities).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VolatilityState {
    Low,
    Normal,
    Elevated,
    Extreme,
}

impl fmt::Display for VolatilityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VolatilityState::Low => write!(f, "Low"),
            VolatilityState::Normal => write!(f, "Normal"),
            VolatilityState::Elevated => write!(f, "Elevated"),
            VolatilityState::Extreme => write!(f, "Extreme"),
        }
    }
}

/// Hysteresis classifier for the volatility index.
///
/// A rising transition requires crossing the target band's lower edge by the
/// hysteresis margin; a falling transition requires re-crossing below it by
/// the same margin. Inputs inside the dead band keep the current state, so
/// the classifier never oscillates on the exact threshold.
#[derive(Debug, Clone)]
pub struct VolatilityTracker {
    low_upper: Decimal,
    normal_upper: Decimal,
    elevated_upper: Decimal,
    hysteresis: Decimal,
    state: VolatilityState,
}

impl VolatilityTracker {
    /// `normal_upper` is the operator-tunable threshold (`VIX_THRESHOLD`);
    /// the low and extreme edges scale off it.
    pub fn new(normal_upper: Decimal, hysteresis: Decimal) -> Self {
        Self {
            low_upper: normal_upper * dec!(0.75),
            normal_upper,
            elevated_upper: normal_upper * dec!(1.5),
            hysteresis,
            state: VolatilityState::Normal,
        }
    }

    pub fn state(&self) -> VolatilityState {
        self.state
    }

    /// Lower edge of the band the given state occupies.
    fn lower_edge(&self, state: VolatilityState) -> Decimal {
        match state {
            VolatilityState::Low => Decimal::MIN,
            VolatilityState::Normal => self.low_upper,
            VolatilityState::Elevated => self.normal_upper,
            VolatilityState::Extreme => self.elevated_upper,
        }
    }

    fn raw_classify(&self, vix: Decimal) -> VolatilityState {
        if vix >= self.elevated_upper {
            VolatilityState::Extreme
        } else if vix >= self.normal_upper {
            VolatilityState::Elevated
        } else if vix >= self.low_upper {
            VolatilityState::Normal
        } else {
            VolatilityState::Low
        }
    }

    /// Feed a new index reading; returns the (possibly unchanged) state.
    pub fn update(&mut self, vix: Decimal) -> VolatilityState {
        let raw = self.raw_classify(vix);
        if raw == self.state {
            return self.state;
        }

        let next = if raw > self.state {
            // Rising: must clear the target band's lower edge by the margin.
            if vix >= self.lower_edge(raw) + self.hysteresis {
                raw
            } else {
                self.state
            }
        } else {
            // Falling: must clear the current band's floor by the margin.
            if vix <= self.lower_edge(self.state) - self.hysteresis {
                raw
            } else {
                self.state
            }
        };

        if next != self.state {
            debug!(
                "VolatilityTracker: {} -> {} (index {})",
                self.state, next, vix
            );
            self.state = next;
        }
        self.state
    }
}

/// Regime detector over an index-proxy bar window.
pub struct RegimeDetector {
    window: usize,
    strong_trend_threshold: Decimal,
    range_threshold: Decimal,
}

impl RegimeDetector {
    pub fn new(window: usize, strong_trend_threshold: Decimal, range_threshold: Decimal) -> Self {
        Self {
            window,
            strong_trend_threshold,
            range_threshold,
        }
    }

    /// Classify the regime from trend strength plus the volatility state.
    /// Insufficient history yields `Neutral`.
    pub fn detect(&self, bars: &[Bar], vol: VolatilityState) -> MarketRegime {
        if vol == VolatilityState::Extreme {
            return MarketRegime::HighVolatility;
        }
        if bars.len() < self.window {
            return MarketRegime::Neutral;
        }

        let recent = &bars[bars.len() - self.window..];
        let strength = trend_strength(recent);

        if strength >= self.strong_trend_threshold {
            if is_uptrend(recent) {
                MarketRegime::StrongBull
            } else {
                MarketRegime::StrongBear
            }
        } else if strength <= self.range_threshold {
            MarketRegime::RangeBound
        } else {
            MarketRegime::Neutral
        }
    }
}

/// Trend strength as the absolute regression slope normalized by the first
/// price, scaled to a 0..~100 range.
pub fn trend_strength(bars: &[Bar]) -> Decimal {
    let n = bars.len();
    if n < 2 {
        return Decimal::ZERO;
    }

    let prices: Vec<Decimal> = bars.iter().map(|b| b.close).collect();
    let n_dec = Decimal::from(n);
    let x_sum: Decimal = (0..n).map(Decimal::from).sum();
    let y_sum: Decimal = prices.iter().sum();
    let xy_sum: Decimal = prices
        .iter()
        .enumerate()
        .map(|(i, &p)| Decimal::from(i) * p)
        .sum();
    let x2_sum: Decimal = (0..n).map(|i| Decimal::from(i * i)).sum();

    let denominator = n_dec * x2_sum - x_sum * x_sum;
    if denominator == Decimal::ZERO {
        return Decimal::ZERO;
    }

    let slope = (n_dec * xy_sum - x_sum * y_sum) / denominator;
    let first_price = prices[0].max(dec!(0.0001));

    (slope / first_price).abs() * dec!(1000.0)
}

fn is_uptrend(bars: &[Bar]) -> bool {
    match (bars.first(), bars.last()) {
        (Some(first), Some(last)) => last.close > first.close,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn bar(close: f64) -> Bar {
        let c = Decimal::from_f64_retain(close).unwrap();
        Bar {
            open_time: Utc::now(),
            open: c,
            high: c + dec!(1),
            low: c - dec!(1),
            close: c,
            volume: dec!(1000),
        }
    }

    #[test]
    fn test_hysteresis_no_oscillation_on_threshold() {
        // Threshold 20, hysteresis 1: readings hovering at the edge hold state.
        let mut tracker = VolatilityTracker::new(dec!(20), dec!(1));
        assert_eq!(tracker.state(), VolatilityState::Normal);

        assert_eq!(tracker.update(dec!(20.2)), VolatilityState::Normal);
        assert_eq!(tracker.update(dec!(20.8)), VolatilityState::Normal);
        assert_eq!(tracker.update(dec!(19.9)), VolatilityState::Normal);
    }

    #[test]
    fn test_rising_transition_needs_margin() {
        let mut tracker = VolatilityTracker::new(dec!(20), dec!(1));
        assert_eq!(tracker.update(dec!(20.9)), VolatilityState::Normal);
        assert_eq!(tracker.update(dec!(21.1)), VolatilityState::Elevated);
    }

    #[test]
    fn test_falling_transition_needs_margin() {
        let mut tracker = VolatilityTracker::new(dec!(20), dec!(1));
        tracker.update(dec!(25)); // Elevated
        assert_eq!(tracker.state(), VolatilityState::Elevated);

        // Dips back under the threshold but not past the margin: hold.
        assert_eq!(tracker.update(dec!(19.5)), VolatilityState::Elevated);
        // Clears the margin: fall.
        assert_eq!(tracker.update(dec!(18.9)), VolatilityState::Normal);
    }

    #[test]
    fn test_extreme_band() {
        let mut tracker = VolatilityTracker::new(dec!(20), dec!(1));
        assert_eq!(tracker.update(dec!(35)), VolatilityState::Extreme);
        assert_eq!(tracker.update(dec!(29.5)), VolatilityState::Extreme);
        assert_eq!(tracker.update(dec!(25)), VolatilityState::Elevated);
    }

    #[test]
    fn test_regime_extreme_vol_dominates() {
        let detector = RegimeDetector::new(10, dec!(5), dec!(1));
        let bars: Vec<Bar> = (0..20).map(|i| bar(100.0 + i as f64 * 3.0)).collect();
        assert_eq!(
            detector.detect(&bars, VolatilityState::Extreme),
            MarketRegime::HighVolatility
        );
    }

    #[test]
    fn test_regime_strong_uptrend() {
        let detector = RegimeDetector::new(10, dec!(5), dec!(1));
        let bars: Vec<Bar> = (0..20).map(|i| bar(100.0 + i as f64 * 3.0)).collect();
        assert_eq!(
            detector.detect(&bars, VolatilityState::Normal),
            MarketRegime::StrongBull
        );
    }

    #[test]
    fn test_regime_strong_downtrend() {
        let detector = RegimeDetector::new(10, dec!(5), dec!(1));
        let bars: Vec<Bar> = (0..20).map(|i| bar(200.0 - i as f64 * 3.0)).collect();
        assert_eq!(
            detector.detect(&bars, VolatilityState::Normal),
            MarketRegime::StrongBear
        );
    }

    #[test]
    fn test_regime_flat_is_range_bound() {
        let detector = RegimeDetector::new(10, dec!(5), dec!(1));
        let bars: Vec<Bar> = (0..20)
            .map(|i| bar(100.0 + if i % 2 == 0 { 0.1 } else { -0.1 }))
            .collect();
        assert_eq!(
            detector.detect(&bars, VolatilityState::Normal),
            MarketRegime::RangeBound
        );
    }

    #[test]
    fn test_regime_insufficient_history() {
        let detector = RegimeDetector::new(10, dec!(5), dec!(1));
        let bars: Vec<Bar> = (0..3).map(|i| bar(100.0 + i as f64)).collect();
        assert_eq!(
            detector.detect(&bars, VolatilityState::Normal),
            MarketRegime::Neutral
        );
    }
}
