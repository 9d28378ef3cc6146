//! Regulatory day-trade protection, end to end: the fourth same-day round
//! trip is refused below the $25k threshold and the position stays on.

mod common;

use chrono::Utc;
use common::{harness, overbought_tape, oversold_tape, test_profile};
use quantpilot::domain::trading::position::TradePosition;
use quantpilot::domain::trading::types::{OrderSide, Symbol};
use quantpilot::infrastructure::journal::Journal;
use quantpilot::infrastructure::mock::MockBroker;
use rust_decimal_macros::dec;
use std::sync::Arc;

async fn seed_day_trades(journal: &Journal, n: usize) {
    let now = Utc::now();
    for i in 0..n {
        let pos = TradePosition::open(
            Symbol::new(format!("DAY{}", i)),
            dec!(100),
            dec!(1),
            dec!(99),
            dec!(102),
            now,
            "rsi_reversion",
        )
        .unwrap();
        let id = journal.record_open(&pos, "equity").await.unwrap();
        journal
            .record_close(id, dec!(101), now.timestamp())
            .await
            .unwrap();
    }
}

#[tokio::test]
async fn test_fourth_day_trade_sell_denied_then_allowed_above_threshold() {
    let mock = Arc::new(MockBroker::with_equity(dec!(20000)));
    let aapl = Symbol::new("AAPL");
    mock.set_bars(aapl.clone(), oversold_tape());

    let mut h = harness(mock.clone(), test_profile(&["AAPL"])).await;
    seed_day_trades(&h.journal, 3).await;

    // Cycle 1: the oversold tape opens a position (buys stay allowed even
    // with the window saturated).
    h.control_loop.cycle().await.unwrap();
    assert_eq!(h.control_loop.held_positions().len(), 1);
    let entry = h.control_loop.held_positions()[&aapl].entry_price;

    // Cycle 2: gently overbought tape produces a Sell signal. Selling a
    // position opened today would be the fourth day trade: denied.
    mock.set_bars(aapl.clone(), overbought_tape(entry));
    h.control_loop.cycle().await.unwrap();

    assert_eq!(
        h.control_loop.held_positions().len(),
        1,
        "the sell must be denied while under the PDT threshold"
    );
    let sells = mock
        .placed_orders()
        .into_iter()
        .filter(|o| o.side == OrderSide::Sell)
        .count();
    assert_eq!(sells, 0);

    // Cycle 3: equity above the threshold lifts the rule; the same signal
    // now closes the position.
    mock.set_equity(dec!(30000));
    h.control_loop.cycle().await.unwrap();

    assert!(h.control_loop.held_positions().is_empty());
    let sells = mock
        .placed_orders()
        .into_iter()
        .filter(|o| o.side == OrderSide::Sell)
        .count();
    assert_eq!(sells, 1);
}
