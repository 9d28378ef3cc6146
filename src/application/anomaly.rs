//! Statistical anomaly detection over named engine metrics.
//!
//! Each metric keeps a bounded ring of recent samples; a new sample is
//! z-scored against the ring before being appended. Dedicated detectors
//! cover the three event classes that bypass statistics entirely: adjacent
//! price moves of 5%+, volume at 10x the trailing average, and a cycle error
//! rate of 10%+.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal_macros::dec;
use statrs::statistics::{Data, Distribution};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AnomalyClass {
    Normal,
    Warning,
    Critical,
}

#[derive(Debug, Clone)]
pub struct AnomalyReport {
    pub z_score: f64,
    pub class: AnomalyClass,
}

pub struct AnomalyMonitor {
    rings: Mutex<HashMap<String, VecDeque<f64>>>,
    capacity: usize,
    warning_z: f64,
    critical_z: f64,
}

impl AnomalyMonitor {
    pub fn new() -> Self {
        Self {
            rings: Mutex::new(HashMap::new()),
            capacity: 100,
            warning_z: 2.5,
            critical_z: 4.0,
        }
    }

    /// Z-score `value` against the metric's recent history, then record it.
    /// Short history (under 10 samples) classifies as Normal.
    pub fn check_anomaly(&self, name: &str, value: f64) -> AnomalyReport {
        let mut rings = self.rings.lock().expect("anomaly lock poisoned");
        let ring = rings.entry(name.to_string()).or_default();

        let report = if ring.len() < 10 {
            AnomalyReport {
                z_score: 0.0,
                class: AnomalyClass::Normal,
            }
        } else {
            // f64 boundary for the statistical library.
            let data = Data::new(ring.iter().copied().collect::<Vec<f64>>());
            let mean = data.mean().unwrap_or(0.0);
            let std_dev = data.std_dev().unwrap_or(0.0);

            let z_score = if std_dev > f64::EPSILON {
                (value - mean) / std_dev
            } else if (value - mean).abs() > f64::EPSILON {
                // Flat history, sudden change: treat as far out.
                self.critical_z + 1.0
            } else {
                0.0
            };

            let class = if z_score.abs() >= self.critical_z {
                AnomalyClass::Critical
            } else if z_score.abs() >= self.warning_z {
                AnomalyClass::Warning
            } else {
                AnomalyClass::Normal
            };
            AnomalyReport { z_score, class }
        };

        if report.class != AnomalyClass::Normal {
            warn!(
                "AnomalyMonitor: '{}' value {} z-score {:.2} ({:?})",
                name, value, report.z_score, report.class
            );
        }

        ring.push_back(value);
        if ring.len() > self.capacity {
            ring.pop_front();
        }
        report
    }

    /// Crash/spike detector: a 5%+ move between adjacent samples.
    pub fn check_price_move(&self, previous: Decimal, current: Decimal) -> AnomalyClass {
        if previous <= Decimal::ZERO {
            return AnomalyClass::Normal;
        }
        let move_pct = ((current - previous) / previous).abs();
        if move_pct >= dec!(0.05) {
            warn!(
                "AnomalyMonitor: price moved {:.2}% between samples",
                (move_pct * dec!(100)).to_f64().unwrap_or(0.0)
            );
            AnomalyClass::Critical
        } else {
            AnomalyClass::Normal
        }
    }

    /// Volume spike detector: 10x the trailing average.
    pub fn check_volume(&self, current: Decimal, trailing_avg: Decimal) -> AnomalyClass {
        if trailing_avg <= Decimal::ZERO {
            return AnomalyClass::Normal;
        }
        if current >= trailing_avg * dec!(10) {
            warn!(
                "AnomalyMonitor: volume {} is 10x trailing average {}",
                current, trailing_avg
            );
            AnomalyClass::Critical
        } else {
            AnomalyClass::Normal
        }
    }

    /// Process error-rate detector over one cycle window.
    pub fn check_error_rate(&self, errors: usize, total: usize) -> AnomalyClass {
        if total == 0 {
            return AnomalyClass::Normal;
        }
        let rate = errors as f64 / total as f64;
        if rate >= 0.10 {
            warn!(
                "AnomalyMonitor: error rate {:.0}% over {} operations",
                rate * 100.0,
                total
            );
            AnomalyClass::Critical
        } else {
            AnomalyClass::Normal
        }
    }
}

impl Default for AnomalyMonitor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_history_is_normal() {
        let monitor = AnomalyMonitor::new();
        for i in 0..5 {
            let report = monitor.check_anomaly("latency", i as f64);
            assert_eq!(report.class, AnomalyClass::Normal);
        }
    }

    #[test]
    fn test_outlier_flags_critical() {
        let monitor = AnomalyMonitor::new();
        for i in 0..50 {
            monitor.check_anomaly("error_rate", 0.01 + (i % 5) as f64 * 0.001);
        }
        let report = monitor.check_anomaly("error_rate", 0.5);
        assert_eq!(report.class, AnomalyClass::Critical);
        assert!(report.z_score > 4.0);
    }

    #[test]
    fn test_inlier_stays_normal() {
        let monitor = AnomalyMonitor::new();
        for i in 0..50 {
            monitor.check_anomaly("spread", 1.0 + (i % 7) as f64 * 0.1);
        }
        let report = monitor.check_anomaly("spread", 1.3);
        assert_eq!(report.class, AnomalyClass::Normal);
    }

    #[test]
    fn test_ring_is_bounded() {
        let monitor = AnomalyMonitor::new();
        for i in 0..500 {
            monitor.check_anomaly("volume", i as f64);
        }
        let rings = monitor.rings.lock().unwrap();
        assert_eq!(rings.get("volume").unwrap().len(), monitor.capacity);
    }

    #[test]
    fn test_price_move_detector() {
        let monitor = AnomalyMonitor::new();
        assert_eq!(
            monitor.check_price_move(dec!(100), dec!(94)),
            AnomalyClass::Critical
        );
        assert_eq!(
            monitor.check_price_move(dec!(100), dec!(106)),
            AnomalyClass::Critical
        );
        assert_eq!(
            monitor.check_price_move(dec!(100), dec!(102)),
            AnomalyClass::Normal
        );
    }

    #[test]
    fn test_volume_detector() {
        let monitor = AnomalyMonitor::new();
        assert_eq!(
            monitor.check_volume(dec!(10000), dec!(900)),
            AnomalyClass::Critical
        );
        assert_eq!(
            monitor.check_volume(dec!(5000), dec!(900)),
            AnomalyClass::Normal
        );
    }

    #[test]
    fn test_error_rate_detector() {
        let monitor = AnomalyMonitor::new();
        assert_eq!(monitor.check_error_rate(2, 10), AnomalyClass::Critical);
        assert_eq!(monitor.check_error_rate(0, 10), AnomalyClass::Normal);
        assert_eq!(monitor.check_error_rate(0, 0), AnomalyClass::Normal);
    }
}
