use super::row;
use crate::domain::repositories::WatchlistRepository;
use crate::domain::watchlist::{ManualSignals, WatchlistEntry};
use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

pub struct SqliteWatchlistRepository {
    pool: SqlitePool,
}

impl SqliteWatchlistRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: &sqlx::sqlite::SqliteRow) -> Result<WatchlistEntry> {
        Ok(WatchlistEntry {
            symbol: row.try_get("symbol")?,
            strategy_key: row.try_get("strategy_key")?,
            alert_enabled: row.try_get("alert_enabled")?,
            buy_alert_enabled: row.try_get("buy_alert_enabled")?,
            sell_alert_enabled: row.try_get("sell_alert_enabled")?,
            trade_enabled: row.try_get("trade_enabled")?,
            trade_on_margin: row.try_get("trade_on_margin")?,
            trade_amount_usd: row::opt_decimal(row.try_get("trade_amount_usd")?)?,
            leverage: row
                .try_get::<Option<i64>, _>("leverage")?
                .map(|v| v as u32),
            manual_signals: ManualSignals {
                buy: row.try_get("manual_buy")?,
                sell: row.try_get("manual_sell")?,
            },
            deleted_at: row::opt_millis(row.try_get("deleted_at")?),
        })
    }
}

#[async_trait]
impl WatchlistRepository for SqliteWatchlistRepository {
    async fn active_entries(&self) -> Result<Vec<WatchlistEntry>> {
        let rows = sqlx::query(
            "SELECT * FROM watchlist_items WHERE deleted_at IS NULL ORDER BY symbol ASC",
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to load watchlist")?;

        rows.iter().map(Self::map_row).collect()
    }

    async fn find(&self, symbol: &str) -> Result<Option<WatchlistEntry>> {
        let row = sqlx::query("SELECT * FROM watchlist_items WHERE symbol = ?")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::map_row).transpose()
    }

    async fn upsert(&self, entry: &WatchlistEntry) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO watchlist_items (
                symbol, strategy_key, alert_enabled, buy_alert_enabled,
                sell_alert_enabled, trade_enabled, trade_on_margin,
                trade_amount_usd, leverage, manual_buy, manual_sell, deleted_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(symbol) DO UPDATE SET
                strategy_key = excluded.strategy_key,
                alert_enabled = excluded.alert_enabled,
                buy_alert_enabled = excluded.buy_alert_enabled,
                sell_alert_enabled = excluded.sell_alert_enabled,
                trade_enabled = excluded.trade_enabled,
                trade_on_margin = excluded.trade_on_margin,
                trade_amount_usd = excluded.trade_amount_usd,
                leverage = excluded.leverage,
                manual_buy = excluded.manual_buy,
                manual_sell = excluded.manual_sell,
                deleted_at = excluded.deleted_at
            "#,
        )
        .bind(&entry.symbol)
        .bind(&entry.strategy_key)
        .bind(entry.alert_enabled)
        .bind(entry.buy_alert_enabled)
        .bind(entry.sell_alert_enabled)
        .bind(entry.trade_enabled)
        .bind(entry.trade_on_margin)
        .bind(entry.trade_amount_usd.map(|v| v.to_string()))
        .bind(entry.leverage.map(|v| v as i64))
        .bind(entry.manual_signals.buy)
        .bind(entry.manual_signals.sell)
        .bind(entry.deleted_at.map(|t| t.timestamp_millis()))
        .execute(&self.pool)
        .await
        .context("Failed to upsert watchlist entry")?;

        Ok(())
    }
}
