//! Safe-mode engagement from a cycle-level error storm, and the clamped
//! parameters' exact restoration.

mod common;

use common::{harness, oversold_tape, test_profile};
use quantpilot::domain::trading::types::Symbol;
use quantpilot::infrastructure::mock::MockBroker;
use rust_decimal_macros::dec;
use std::sync::Arc;

#[tokio::test]
async fn test_error_storm_engages_safe_mode_clamp() {
    let mock = Arc::new(MockBroker::new());
    mock.set_bars(Symbol::new("AAPL"), oversold_tape());
    mock.set_bars(Symbol::new("MSFT"), oversold_tape());

    let mut h = harness(mock.clone(), test_profile(&["AAPL", "MSFT"])).await;
    let original = h.safe_mode.params();

    // Every symbol's quote fetch fails: a 100% error rate over the cycle.
    mock.fail_endpoint("latest_bar", "unknown", 2);
    let report = h.control_loop.cycle().await.unwrap();
    assert_eq!(report.errors, 2);

    assert!(h.safe_mode.is_active());
    let clamped = h.safe_mode.params();
    assert_eq!(
        clamped.sizing_multiplier,
        original.sizing_multiplier * dec!(0.5)
    );
    assert_eq!(
        clamped.stop_distance_factor,
        original.stop_distance_factor * dec!(0.5)
    );
    assert!((clamped.cycle_interval_factor - 0.5).abs() < 1e-9);

    // Operator restore brings back the exact originals.
    h.safe_mode.deactivate("operator");
    assert_eq!(h.safe_mode.params(), original);
}

#[tokio::test]
async fn test_clamped_sizing_flows_into_entries() {
    let mock = Arc::new(MockBroker::new());
    let aapl = Symbol::new("AAPL");
    mock.set_bars(aapl.clone(), oversold_tape());

    // Baseline entry size without the clamp.
    let mut h = harness(mock.clone(), test_profile(&["AAPL"])).await;
    h.control_loop.cycle().await.unwrap();
    let full_size = h.control_loop.held_positions()[&aapl].quantity;

    // Fresh engine with safe mode pre-engaged: the same tape buys half.
    let mock2 = Arc::new(MockBroker::new());
    mock2.set_bars(aapl.clone(), oversold_tape());
    let mut h2 = harness(mock2.clone(), test_profile(&["AAPL"])).await;
    h2.safe_mode.activate("pre-engaged for sizing test");

    h2.control_loop.cycle().await.unwrap();
    let clamped_size = h2.control_loop.held_positions()[&aapl].quantity;

    assert!(
        clamped_size < full_size,
        "safe mode must reduce entry size ({} !< {})",
        clamped_size,
        full_size
    );
}
