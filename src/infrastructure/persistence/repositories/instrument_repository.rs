use super::row;
use crate::domain::repositories::InstrumentRepository;
use crate::domain::types::Instrument;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

pub struct SqliteInstrumentRepository {
    pool: SqlitePool,
}

impl SqliteInstrumentRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InstrumentRepository for SqliteInstrumentRepository {
    async fn get(&self, symbol: &str) -> Result<Option<(Instrument, DateTime<Utc>)>> {
        let r = sqlx::query("SELECT * FROM instrument_metadata_cache WHERE symbol = ?")
            .bind(symbol)
            .fetch_optional(&self.pool)
            .await?;

        match r {
            Some(r) => {
                let instrument = Instrument {
                    symbol: r.try_get("symbol")?,
                    base: r.try_get("base")?,
                    quote: r.try_get("quote")?,
                    price_tick: row::decimal(r.try_get("price_tick")?)?,
                    quantity_tick: row::decimal(r.try_get("quantity_tick")?)?,
                    min_quantity: row::decimal(r.try_get("min_quantity")?)?,
                    price_decimals: r.try_get::<i64, _>("price_decimals")? as u32,
                    quantity_decimals: r.try_get::<i64, _>("quantity_decimals")? as u32,
                };
                let refreshed_at = row::millis(r.try_get("refreshed_at")?);
                Ok(Some((instrument, refreshed_at)))
            }
            None => Ok(None),
        }
    }

    async fn upsert_all(
        &self,
        instruments: &[Instrument],
        refreshed_at: DateTime<Utc>,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        for i in instruments {
            sqlx::query(
                r#"
                INSERT INTO instrument_metadata_cache (
                    symbol, base, quote, price_tick, quantity_tick,
                    min_quantity, price_decimals, quantity_decimals, refreshed_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
                ON CONFLICT(symbol) DO UPDATE SET
                    base = excluded.base,
                    quote = excluded.quote,
                    price_tick = excluded.price_tick,
                    quantity_tick = excluded.quantity_tick,
                    min_quantity = excluded.min_quantity,
                    price_decimals = excluded.price_decimals,
                    quantity_decimals = excluded.quantity_decimals,
                    refreshed_at = excluded.refreshed_at
                "#,
            )
            .bind(&i.symbol)
            .bind(&i.base)
            .bind(&i.quote)
            .bind(i.price_tick.to_string())
            .bind(i.quantity_tick.to_string())
            .bind(i.min_quantity.to_string())
            .bind(i.price_decimals as i64)
            .bind(i.quantity_decimals as i64)
            .bind(refreshed_at.timestamp_millis())
            .execute(&mut *tx)
            .await?;
        }

        tx.commit()
            .await
            .context("Failed to upsert instrument metadata")?;
        Ok(())
    }
}
