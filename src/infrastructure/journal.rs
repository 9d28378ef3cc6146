//! Append-only trade journal on SQLite.
//!
//! The journal is the system of record for opens, closes and realized P&L;
//! the PDT guard and the Kelly statistics both read from here rather than
//! from memory so they survive process restarts. Writers go through the
//! single pool; readers see snapshots.

use crate::domain::risk::stats::SymbolStats;
use crate::domain::trading::position::TradePosition;
use crate::domain::trading::types::Symbol;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use sqlx::Row;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// One journal row. Prices are stored as decimal TEXT, times as unix seconds.
#[derive(Debug, Clone, PartialEq)]
pub struct TradeRecord {
    pub id: i64,
    pub symbol: Symbol,
    pub strategy: String,
    pub profile: String,
    pub entry_time: i64,
    pub entry_price: Decimal,
    pub quantity: Decimal,
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
    pub exit_time: Option<i64>,
    pub exit_price: Option<Decimal>,
    pub pnl: Option<Decimal>,
}

#[derive(Clone)]
pub struct Journal {
    pool: SqlitePool,
}

impl Journal {
    pub async fn new(db_url: &str) -> Result<Self> {
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.as_os_str().is_empty()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create journal directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .context("Failed to connect to journal database")?;

        info!("Journal: connected to {}", db_url);

        let journal = Self { pool };
        journal.init().await?;
        Ok(journal)
    }

    /// Throwaway in-memory journal for tests. A single connection: every
    /// fresh `:memory:` connection would otherwise be its own empty database.
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("Failed to open in-memory journal")?;

        let journal = Self { pool };
        journal.init().await?;
        Ok(journal)
    }

    async fn init(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS trades (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                strategy TEXT NOT NULL,
                profile TEXT NOT NULL,
                entry_time INTEGER NOT NULL,
                entry_price TEXT NOT NULL,
                quantity TEXT NOT NULL,
                stop_loss TEXT NOT NULL,
                take_profit TEXT NOT NULL,
                exit_time INTEGER,
                exit_price TEXT,
                pnl TEXT
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create trades table")?;

        // Index for the rolling day-trade window queries.
        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_trades_entry_time
            ON trades (entry_time);
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create trades index")?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_trades_symbol
            ON trades (symbol, entry_time);
            "#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create symbol index")?;

        Ok(())
    }

    /// Record a newly-opened position; returns the journal row id.
    pub async fn record_open(&self, position: &TradePosition, profile: &str) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO trades
                (symbol, strategy, profile, entry_time, entry_price, quantity, stop_loss, take_profit)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(position.symbol.as_str())
        .bind(&position.strategy)
        .bind(profile)
        .bind(position.entry_time.timestamp())
        .bind(position.entry_price.to_string())
        .bind(position.quantity.to_string())
        .bind(position.stop_loss.to_string())
        .bind(position.take_profit.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to insert trade open")?;

        Ok(result.last_insert_rowid())
    }

    /// Close a journalled trade and return the realized P&L.
    pub async fn record_close(
        &self,
        trade_id: i64,
        exit_price: Decimal,
        exit_time: i64,
    ) -> Result<Decimal> {
        let row = sqlx::query("SELECT entry_price, quantity FROM trades WHERE id = ?")
            .bind(trade_id)
            .fetch_one(&self.pool)
            .await
            .context("Trade not found for close")?;

        let entry_price: Decimal = parse_decimal_col(&row, "entry_price");
        let quantity: Decimal = parse_decimal_col(&row, "quantity");
        let pnl = (exit_price - entry_price) * quantity;

        sqlx::query("UPDATE trades SET exit_time = ?, exit_price = ?, pnl = ? WHERE id = ?")
            .bind(exit_time)
            .bind(exit_price.to_string())
            .bind(pnl.to_string())
            .bind(trade_id)
            .execute(&self.pool)
            .await
            .context("Failed to record trade close")?;

        Ok(pnl)
    }

    pub async fn get(&self, trade_id: i64) -> Result<TradeRecord> {
        let row = sqlx::query("SELECT * FROM trades WHERE id = ?")
            .bind(trade_id)
            .fetch_one(&self.pool)
            .await
            .context("Trade not found")?;
        Ok(record_from_row(&row))
    }

    /// Trades without an exit, oldest first. Used to rebuild state at startup.
    pub async fn open_trades(&self) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query("SELECT * FROM trades WHERE exit_time IS NULL ORDER BY entry_time")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(record_from_row).collect())
    }

    pub async fn recent_trades(&self, limit: i64) -> Result<Vec<TradeRecord>> {
        let rows = sqlx::query("SELECT * FROM trades ORDER BY entry_time DESC LIMIT ?")
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.iter().map(record_from_row).collect())
    }

    /// Count of completed day trades (entry and exit on the same calendar
    /// day, venue time) with entries at or after `window_start` unix seconds.
    pub async fn day_trade_count(&self, window_start: i64) -> Result<u64> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM trades
            WHERE exit_time IS NOT NULL
              AND entry_time >= ?
              AND date(entry_time, 'unixepoch') = date(exit_time, 'unixepoch')
            "#,
        )
        .bind(window_start)
        .fetch_one(&self.pool)
        .await?;
        let n: i64 = row.get("n");
        Ok(n.max(0) as u64)
    }

    /// Whether the given symbol has an entry journalled on the same calendar
    /// day as `now` (a sell today would therefore complete a day trade).
    pub async fn opened_same_day(&self, symbol: &Symbol, now: i64) -> Result<bool> {
        let row = sqlx::query(
            r#"
            SELECT COUNT(*) AS n FROM trades
            WHERE symbol = ?
              AND date(entry_time, 'unixepoch') = date(?, 'unixepoch')
            "#,
        )
        .bind(symbol.as_str())
        .bind(now)
        .fetch_one(&self.pool)
        .await?;
        let n: i64 = row.get("n");
        Ok(n > 0)
    }

    /// Win-rate statistics over closed trades for one symbol.
    pub async fn symbol_stats(&self, symbol: &Symbol) -> Result<SymbolStats> {
        let rows = sqlx::query("SELECT pnl FROM trades WHERE symbol = ? AND pnl IS NOT NULL")
            .bind(symbol.as_str())
            .fetch_all(&self.pool)
            .await?;

        let pnls: Vec<Decimal> = rows
            .iter()
            .map(|row| {
                row.get::<Option<String>, _>("pnl")
                    .and_then(|s| s.parse::<Decimal>().ok())
                    .unwrap_or(Decimal::ZERO)
            })
            .collect();

        if pnls.is_empty() {
            return Ok(SymbolStats::empty());
        }

        let wins: Vec<&Decimal> = pnls.iter().filter(|p| **p > Decimal::ZERO).collect();
        let losses: Vec<&Decimal> = pnls.iter().filter(|p| **p <= Decimal::ZERO).collect();

        let avg_win = if wins.is_empty() {
            Decimal::ZERO
        } else {
            wins.iter().copied().sum::<Decimal>() / Decimal::from(wins.len())
        };
        let avg_loss = if losses.is_empty() {
            Decimal::ZERO
        } else {
            (losses.iter().copied().sum::<Decimal>() / Decimal::from(losses.len())).abs()
        };

        Ok(SymbolStats {
            win_rate: wins.len() as f64 / pnls.len() as f64,
            total_trades: pnls.len() as u64,
            wins: wins.len() as u64,
            avg_win,
            avg_loss,
        })
    }

    /// Total realized P&L over every closed trade (dashboard view).
    pub async fn realized_pnl(&self) -> Result<Decimal> {
        let rows = sqlx::query("SELECT pnl FROM trades WHERE pnl IS NOT NULL")
            .fetch_all(&self.pool)
            .await?;
        Ok(rows
            .iter()
            .filter_map(|row| {
                row.get::<Option<String>, _>("pnl")
                    .and_then(|s| s.parse::<Decimal>().ok())
            })
            .sum())
    }
}

fn parse_decimal_col(row: &sqlx::sqlite::SqliteRow, col: &str) -> Decimal {
    row.get::<String, _>(col).parse::<Decimal>().unwrap_or(Decimal::ZERO)
}

fn record_from_row(row: &sqlx::sqlite::SqliteRow) -> TradeRecord {
    TradeRecord {
        id: row.get("id"),
        symbol: Symbol::new(row.get::<String, _>("symbol")),
        strategy: row.get("strategy"),
        profile: row.get("profile"),
        entry_time: row.get("entry_time"),
        entry_price: parse_decimal_col(row, "entry_price"),
        quantity: parse_decimal_col(row, "quantity"),
        stop_loss: parse_decimal_col(row, "stop_loss"),
        take_profit: parse_decimal_col(row, "take_profit"),
        exit_time: row.get("exit_time"),
        exit_price: row
            .get::<Option<String>, _>("exit_price")
            .and_then(|s| s.parse::<Decimal>().ok()),
        pnl: row
            .get::<Option<String>, _>("pnl")
            .and_then(|s| s.parse::<Decimal>().ok()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn position(symbol: &str, entry: Decimal, qty: Decimal) -> TradePosition {
        TradePosition::open(
            Symbol::new(symbol),
            entry,
            qty,
            entry * dec!(0.99),
            entry * dec!(1.02),
            Utc::now(),
            "rsi_reversion",
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_open_close_round_trip_preserves_pnl() {
        let journal = Journal::in_memory().await.unwrap();
        let pos = position("AAPL", dec!(150), dec!(10));

        let id = journal.record_open(&pos, "equity").await.unwrap();
        let pnl = journal
            .record_close(id, dec!(153), Utc::now().timestamp())
            .await
            .unwrap();
        assert_eq!(pnl, dec!(30));

        let record = journal.get(id).await.unwrap();
        assert_eq!(record.symbol, Symbol::new("AAPL"));
        assert_eq!(record.entry_price, dec!(150));
        assert_eq!(record.exit_price, Some(dec!(153)));
        assert_eq!(record.pnl, Some(dec!(30)));
    }

    #[tokio::test]
    async fn test_open_trades_survive_reconnection_semantics() {
        let journal = Journal::in_memory().await.unwrap();
        let id = journal
            .record_open(&position("MSFT", dec!(400), dec!(2)), "equity")
            .await
            .unwrap();

        let open = journal.open_trades().await.unwrap();
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, id);
        assert!(open[0].exit_time.is_none());
    }

    #[tokio::test]
    async fn test_day_trade_count_same_day_only() {
        let journal = Journal::in_memory().await.unwrap();
        let now = Utc::now().timestamp();

        // Same-day round trip: counts.
        let id = journal
            .record_open(&position("AAPL", dec!(150), dec!(1)), "equity")
            .await
            .unwrap();
        journal.record_close(id, dec!(151), now).await.unwrap();

        // Overnight exit: never counts.
        let id = journal
            .record_open(&position("TSLA", dec!(200), dec!(1)), "equity")
            .await
            .unwrap();
        journal
            .record_close(id, dec!(201), now + 3 * 86_400)
            .await
            .unwrap();

        let count = journal.day_trade_count(now - 7 * 86_400).await.unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn test_symbol_stats_aggregation() {
        let journal = Journal::in_memory().await.unwrap();
        let now = Utc::now().timestamp();

        for (exit, _win) in [(dec!(153), true), (dec!(148), false), (dec!(156), true)] {
            let id = journal
                .record_open(&position("NVDA", dec!(150), dec!(1)), "equity")
                .await
                .unwrap();
            journal.record_close(id, exit, now).await.unwrap();
        }

        let stats = journal.symbol_stats(&Symbol::new("NVDA")).await.unwrap();
        assert_eq!(stats.total_trades, 3);
        assert_eq!(stats.wins, 2);
        assert!((stats.win_rate - 2.0 / 3.0).abs() < 1e-9);
        assert_eq!(stats.avg_win, dec!(4.5));
        assert_eq!(stats.avg_loss, dec!(2));
    }

    #[tokio::test]
    async fn test_opened_same_day() {
        let journal = Journal::in_memory().await.unwrap();
        let now = Utc::now().timestamp();
        journal
            .record_open(&position("AAPL", dec!(150), dec!(1)), "equity")
            .await
            .unwrap();

        assert!(journal.opened_same_day(&Symbol::new("AAPL"), now).await.unwrap());
        assert!(
            !journal
                .opened_same_day(&Symbol::new("GOOGL"), now)
                .await
                .unwrap()
        );
    }
}
