//! Stateless technical indicators.
//!
//! Every function is a pure computation over an ordered price slice; none of
//! them hold state between calls. Insufficient input yields `None` rather
//! than a partial value.

use crate::domain::market::bar::Bar;
use rust_decimal::Decimal;

/// Simple moving average of the trailing `period` values.
pub fn sma(values: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || values.len() < period {
        return None;
    }
    let sum: Decimal = values[values.len() - period..].iter().sum();
    Some(sum / Decimal::from(period))
}

/// Exponential moving average, seeded with the SMA of the first `period`
/// values and smoothed with `k = 2 / (period + 1)`.
pub fn ema(values: &[Decimal], period: usize) -> Option<Decimal> {
    ema_series(values, period).and_then(|s| s.last().copied())
}

fn ema_series(values: &[Decimal], period: usize) -> Option<Vec<Decimal>> {
    if period == 0 || values.len() < period {
        return None;
    }
    let k = Decimal::from(2) / Decimal::from(period + 1);
    let seed: Decimal = values[..period].iter().sum::<Decimal>() / Decimal::from(period);

    let mut series = Vec::with_capacity(values.len() - period + 1);
    series.push(seed);
    let mut current = seed;
    for v in &values[period..] {
        current = (*v - current) * k + current;
        series.push(current);
    }
    Some(series)
}

/// Relative Strength Index with Wilder smoothing.
///
/// Needs `period + 1` closes for the first reading. A zero average loss
/// saturates at 100.
pub fn rsi(closes: &[Decimal], period: usize) -> Option<Decimal> {
    if period == 0 || closes.len() < period + 1 {
        return None;
    }

    let mut avg_gain = Decimal::ZERO;
    let mut avg_loss = Decimal::ZERO;

    for window in closes[..period + 1].windows(2) {
        let delta = window[1] - window[0];
        if delta > Decimal::ZERO {
            avg_gain += delta;
        } else {
            avg_loss -= delta;
        }
    }
    let period_dec = Decimal::from(period);
    avg_gain /= period_dec;
    avg_loss /= period_dec;

    // Wilder smoothing over the remainder of the series.
    for window in closes[period..].windows(2) {
        let delta = window[1] - window[0];
        let (gain, loss) = if delta > Decimal::ZERO {
            (delta, Decimal::ZERO)
        } else {
            (Decimal::ZERO, -delta)
        };
        avg_gain = (avg_gain * (period_dec - Decimal::ONE) + gain) / period_dec;
        avg_loss = (avg_loss * (period_dec - Decimal::ONE) + loss) / period_dec;
    }

    if avg_loss == Decimal::ZERO {
        return Some(Decimal::from(100));
    }
    let rs = avg_gain / avg_loss;
    Some(Decimal::from(100) - Decimal::from(100) / (Decimal::ONE + rs))
}

/// MACD line, signal line and histogram at the latest close.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MacdOutput {
    pub macd: Decimal,
    pub signal: Decimal,
    pub histogram: Decimal,
}

/// MACD over `fast`/`slow` EMAs with an EMA-`signal` of the MACD line.
/// Needs `slow + signal - 1` closes.
pub fn macd(
    closes: &[Decimal],
    fast: usize,
    slow: usize,
    signal: usize,
) -> Option<MacdOutput> {
    if fast >= slow || closes.len() < slow + signal - 1 {
        return None;
    }

    let fast_series = ema_series(closes, fast)?;
    let slow_series = ema_series(closes, slow)?;

    // Align the two series on the slow EMA's start.
    let offset = fast_series.len() - slow_series.len();
    let macd_line: Vec<Decimal> = slow_series
        .iter()
        .enumerate()
        .map(|(i, s)| fast_series[i + offset] - s)
        .collect();

    let signal_series = ema_series(&macd_line, signal)?;
    let macd_now = *macd_line.last()?;
    let signal_now = *signal_series.last()?;

    Some(MacdOutput {
        macd: macd_now,
        signal: signal_now,
        histogram: macd_now - signal_now,
    })
}

/// Average True Range with Wilder smoothing. Needs `period + 1` bars.
pub fn atr(bars: &[Bar], period: usize) -> Option<Decimal> {
    if period == 0 || bars.len() < period + 1 {
        return None;
    }

    let period_dec = Decimal::from(period);
    let mut value = Decimal::ZERO;
    for i in 1..=period {
        value += bars[i].true_range(bars[i - 1].close);
    }
    value /= period_dec;

    for i in period + 1..bars.len() {
        let tr = bars[i].true_range(bars[i - 1].close);
        value = (value * (period_dec - Decimal::ONE) + tr) / period_dec;
    }
    Some(value)
}

/// Closes extracted from a bar slice, oldest first.
pub fn closes(bars: &[Bar]) -> Vec<Decimal> {
    bars.iter().map(|b| b.close).collect()
}
