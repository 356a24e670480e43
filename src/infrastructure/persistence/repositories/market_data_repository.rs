use super::row;
use crate::domain::market::MarketSnapshot;
use crate::domain::repositories::MarketDataRepository;
use anyhow::{Context, Result};
use async_trait::async_trait;
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};

pub struct SqliteMarketDataRepository {
    pool: SqlitePool,
}

impl SqliteMarketDataRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(r: &sqlx::sqlite::SqliteRow) -> Result<MarketSnapshot> {
        let history_json: String = r.try_get("rsi_history")?;
        let rsi_history: Vec<Decimal> = serde_json::from_str(&history_json)
            .context("Failed to parse rsi_history column")?;

        Ok(MarketSnapshot {
            symbol: r.try_get("symbol")?,
            price: row::decimal(r.try_get("price")?)?,
            rsi: row::opt_decimal(r.try_get("rsi")?)?,
            ema10: row::opt_decimal(r.try_get("ema10")?)?,
            ma50: row::opt_decimal(r.try_get("ma50")?)?,
            ma200: row::opt_decimal(r.try_get("ma200")?)?,
            ma10w: row::opt_decimal(r.try_get("ma10w")?)?,
            atr: row::opt_decimal(r.try_get("atr")?)?,
            volume: row::opt_decimal(r.try_get("volume")?)?,
            avg_volume: row::opt_decimal(r.try_get("avg_volume")?)?,
            rsi_history,
            observed_at: row::millis(r.try_get("observed_at")?),
            stale: r.try_get("stale")?,
        })
    }
}

#[async_trait]
impl MarketDataRepository for SqliteMarketDataRepository {
    async fn latest(&self, symbol: &str) -> Result<Option<MarketSnapshot>> {
        let r = sqlx::query("SELECT * FROM market_data WHERE symbol = ?")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;

        r.as_ref().map(Self::map_row).transpose()
    }

    async fn upsert(&self, snapshot: &MarketSnapshot) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO market_data (
                symbol, price, rsi, ema10, ma50, ma200, ma10w, atr,
                volume, avg_volume, rsi_history, observed_at, stale
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(symbol) DO UPDATE SET
                price = excluded.price,
                rsi = excluded.rsi,
                ema10 = excluded.ema10,
                ma50 = excluded.ma50,
                ma200 = excluded.ma200,
                ma10w = excluded.ma10w,
                atr = excluded.atr,
                volume = excluded.volume,
                avg_volume = excluded.avg_volume,
                rsi_history = excluded.rsi_history,
                observed_at = excluded.observed_at,
                stale = excluded.stale
            "#,
        )
        .bind(&snapshot.symbol)
        .bind(snapshot.price.to_string())
        .bind(snapshot.rsi.map(|v| v.to_string()))
        .bind(snapshot.ema10.map(|v| v.to_string()))
        .bind(snapshot.ma50.map(|v| v.to_string()))
        .bind(snapshot.ma200.map(|v| v.to_string()))
        .bind(snapshot.ma10w.map(|v| v.to_string()))
        .bind(snapshot.atr.map(|v| v.to_string()))
        .bind(snapshot.volume.map(|v| v.to_string()))
        .bind(snapshot.avg_volume.map(|v| v.to_string()))
        .bind(serde_json::to_string(&snapshot.rsi_history)?)
        .bind(snapshot.observed_at.timestamp_millis())
        .bind(snapshot.stale)
        .execute(&self.pool)
        .await
        .context("Failed to upsert market snapshot")?;

        Ok(())
    }
}
