//! Pattern-day-trade protection.
//!
//! Counts completed day trades over a rolling five-business-day window and
//! refuses the sell that would create a fourth while equity is under the
//! $25k threshold. The count always comes from the journal, never from
//! memory, so the guard survives process restarts. Buys are never blocked;
//! overnight exits never count.

use crate::domain::errors::RiskViolation;
use crate::domain::trading::types::Symbol;
use crate::infrastructure::journal::Journal;
use chrono::{DateTime, Datelike, Duration as ChronoDuration, Utc, Weekday};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::warn;

const PDT_EQUITY_THRESHOLD: Decimal = dec!(25000);
const MAX_DAY_TRADES: u64 = 3;

pub struct PdtGuard {
    journal: Journal,
    enabled: bool,
}

impl PdtGuard {
    pub fn new(journal: Journal, enabled: bool) -> Self {
        Self { journal, enabled }
    }

    /// May this sell proceed? Denied only when it would complete a fourth
    /// day trade in the window with sub-threshold equity.
    pub async fn check_sell(
        &self,
        symbol: &Symbol,
        equity: Decimal,
        now: DateTime<Utc>,
    ) -> Result<(), RiskViolation> {
        if !self.enabled || equity >= PDT_EQUITY_THRESHOLD {
            return Ok(());
        }

        // An overnight position can always be sold.
        let opened_today = match self.journal.opened_same_day(symbol, now.timestamp()).await {
            Ok(v) => v,
            Err(e) => {
                // A broken journal must not trap capital behind the guard.
                warn!("PdtGuard: journal read failed ({}), allowing sell", e);
                return Ok(());
            }
        };
        if !opened_today {
            return Ok(());
        }

        let window_start = rolling_window_start(now);
        let day_trades = match self.journal.day_trade_count(window_start).await {
            Ok(v) => v,
            Err(e) => {
                warn!("PdtGuard: journal read failed ({}), allowing sell", e);
                return Ok(());
            }
        };

        if day_trades >= MAX_DAY_TRADES {
            return Err(RiskViolation::PdtProtection { day_trades, equity });
        }
        Ok(())
    }

    /// Buys are always permitted: opening a position is never itself a day
    /// trade, and holding overnight is the compliant path out.
    pub fn check_buy(&self) -> Result<(), RiskViolation> {
        Ok(())
    }
}

/// Start (midnight UTC) of the business day four business days before
/// `now`'s, i.e. a window spanning five business days including today.
fn rolling_window_start(now: DateTime<Utc>) -> i64 {
    let mut date = now.date_naive();
    let mut business_days = 1; // today counts
    while business_days < 5 {
        date -= ChronoDuration::days(1);
        if !matches!(date.weekday(), Weekday::Sat | Weekday::Sun) {
            business_days += 1;
        }
    }
    date.and_hms_opt(0, 0, 0)
        .expect("midnight is always valid")
        .and_utc()
        .timestamp()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trading::position::TradePosition;
    use chrono::TimeZone;

    async fn journal_with_day_trades(n: usize, now: DateTime<Utc>) -> Journal {
        let journal = Journal::in_memory().await.unwrap();
        for i in 0..n {
            let pos = TradePosition::open(
                Symbol::new(format!("SYM{}", i)),
                dec!(100),
                dec!(1),
                dec!(99),
                dec!(102),
                now,
                "test",
            )
            .unwrap();
            let id = journal.record_open(&pos, "equity").await.unwrap();
            journal
                .record_close(id, dec!(101), now.timestamp())
                .await
                .unwrap();
        }
        journal
    }

    fn wednesday() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 6, 4, 15, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn test_fourth_day_trade_denied_below_threshold() {
        let now = wednesday();
        let journal = journal_with_day_trades(3, now).await;

        // Open TSLA today; selling it today would be the fourth day trade.
        let tsla = TradePosition::open(
            Symbol::new("TSLA"),
            dec!(200),
            dec!(1),
            dec!(198),
            dec!(205),
            now,
            "test",
        )
        .unwrap();
        journal.record_open(&tsla, "equity").await.unwrap();

        let guard = PdtGuard::new(journal, true);
        assert!(guard.check_buy().is_ok());

        let result = guard.check_sell(&Symbol::new("TSLA"), dec!(20000), now).await;
        assert!(matches!(
            result,
            Err(RiskViolation::PdtProtection { day_trades: 3, .. })
        ));
    }

    #[tokio::test]
    async fn test_overnight_sell_allowed() {
        let now = wednesday();
        let yesterday = now - ChronoDuration::days(1);
        let journal = journal_with_day_trades(3, now).await;

        // TSLA was opened yesterday: selling today is not a day trade.
        let tsla = TradePosition::open(
            Symbol::new("TSLA"),
            dec!(200),
            dec!(1),
            dec!(198),
            dec!(205),
            yesterday,
            "test",
        )
        .unwrap();
        journal.record_open(&tsla, "equity").await.unwrap();

        let guard = PdtGuard::new(journal, true);
        assert!(
            guard
                .check_sell(&Symbol::new("TSLA"), dec!(20000), now)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_above_threshold_never_denied() {
        let now = wednesday();
        let journal = journal_with_day_trades(10, now).await;
        let tsla = TradePosition::open(
            Symbol::new("TSLA"),
            dec!(200),
            dec!(1),
            dec!(198),
            dec!(205),
            now,
            "test",
        )
        .unwrap();
        journal.record_open(&tsla, "equity").await.unwrap();

        let guard = PdtGuard::new(journal, true);
        assert!(
            guard
                .check_sell(&Symbol::new("TSLA"), dec!(30000), now)
                .await
                .is_ok()
        );
    }

    #[tokio::test]
    async fn test_disabled_guard_approves_everything() {
        let now = wednesday();
        let journal = journal_with_day_trades(10, now).await;
        let guard = PdtGuard::new(journal, false);
        assert!(
            guard
                .check_sell(&Symbol::new("TSLA"), dec!(1000), now)
                .await
                .is_ok()
        );
    }

    #[test]
    fn test_window_skips_weekends() {
        // From a Wednesday, five business days back lands on the previous
        // Thursday, not the previous Sunday.
        let start = rolling_window_start(wednesday());
        let date = Utc.timestamp_opt(start, 0).unwrap().date_naive();
        assert_eq!(date, chrono::NaiveDate::from_ymd_opt(2025, 5, 29).unwrap());
        assert_eq!(date.weekday(), Weekday::Thu);
    }
}
