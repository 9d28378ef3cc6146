use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use std::sync::RwLock;
use tracing::{info, warn};

/// Outcome of a drawdown observation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DrawdownStatus {
    Ok { drawdown_pct: Decimal },
    Breached { drawdown_pct: Decimal },
}

impl DrawdownStatus {
    pub fn should_halt(&self) -> bool {
        matches!(self, DrawdownStatus::Breached { .. })
    }
}

struct DrawdownState {
    peak_equity: Decimal,
    warned_anomalous: bool,
}

/// Portfolio drawdown guard.
///
/// `peak_equity` is monotonically non-decreasing and is never auto-reset on
/// an anomalous drop: if capital has genuinely been lost, resetting the peak
/// would silently re-enable full-size trading. An operator reset is the only
/// way down.
pub struct DrawdownGuard {
    max_drawdown: Decimal,
    state: RwLock<DrawdownState>,
}

impl DrawdownGuard {
    /// `max_drawdown` is a fraction (0.5 = halt at 50% off the peak).
    pub fn new(max_drawdown: Decimal) -> Self {
        Self {
            max_drawdown,
            state: RwLock::new(DrawdownState {
                peak_equity: Decimal::ZERO,
                warned_anomalous: false,
            }),
        }
    }

    /// Feed the current equity; raises the peak, computes drawdown, and
    /// reports whether entries must halt.
    pub fn observe(&self, equity: Decimal) -> DrawdownStatus {
        let mut state = self.state.write().expect("drawdown lock poisoned");

        if equity > state.peak_equity {
            state.peak_equity = equity;
            state.warned_anomalous = false;
        }

        if state.peak_equity <= Decimal::ZERO {
            return DrawdownStatus::Ok {
                drawdown_pct: Decimal::ZERO,
            };
        }

        let drawdown_pct = (state.peak_equity - equity) / state.peak_equity;

        // A peak more than double the current equity looks like either a
        // catastrophic loss or a broken feed. Either way the operator must
        // look; the guard stays armed.
        if state.peak_equity > equity * dec!(2) && !state.warned_anomalous {
            state.warned_anomalous = true;
            warn!(
                "DrawdownGuard: equity {} is less than half of peak {}; \
                 peak retained, operator reset required if this is intentional",
                equity, state.peak_equity
            );
        }

        if drawdown_pct > self.max_drawdown {
            DrawdownStatus::Breached { drawdown_pct }
        } else {
            DrawdownStatus::Ok { drawdown_pct }
        }
    }

    /// Explicit operator reset of the high-water mark.
    pub fn reset_peak(&self, equity: Decimal) {
        let mut state = self.state.write().expect("drawdown lock poisoned");
        info!(
            "DrawdownGuard: operator reset peak {} -> {}",
            state.peak_equity, equity
        );
        state.peak_equity = equity;
        state.warned_anomalous = false;
    }

    pub fn peak_equity(&self) -> Decimal {
        self.state.read().expect("drawdown lock poisoned").peak_equity
    }

    pub fn current_drawdown_f64(&self, equity: Decimal) -> f64 {
        let peak = self.peak_equity();
        if peak <= Decimal::ZERO {
            return 0.0;
        }
        ((peak - equity) / peak).to_f64().unwrap_or(0.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_peak_is_monotone() {
        let guard = DrawdownGuard::new(dec!(0.5));
        guard.observe(dec!(10000));
        guard.observe(dec!(8000));
        assert_eq!(guard.peak_equity(), dec!(10000));
        guard.observe(dec!(12000));
        assert_eq!(guard.peak_equity(), dec!(12000));
    }

    #[test]
    fn test_halt_at_limit_without_auto_reset() {
        // Peak $10,000, current $4,900, limit 50%: halt, peak untouched.
        let guard = DrawdownGuard::new(dec!(0.5));
        guard.observe(dec!(10000));
        let status = guard.observe(dec!(4900));
        assert!(status.should_halt());
        assert_eq!(guard.peak_equity(), dec!(10000));
    }

    #[test]
    fn test_within_limit_no_halt() {
        let guard = DrawdownGuard::new(dec!(0.5));
        guard.observe(dec!(10000));
        let status = guard.observe(dec!(6000));
        assert!(!status.should_halt());
    }

    #[test]
    fn test_operator_reset() {
        let guard = DrawdownGuard::new(dec!(0.5));
        guard.observe(dec!(10000));
        guard.reset_peak(dec!(5000));
        assert_eq!(guard.peak_equity(), dec!(5000));
        assert!(!guard.observe(dec!(4000)).should_halt());
    }
}
