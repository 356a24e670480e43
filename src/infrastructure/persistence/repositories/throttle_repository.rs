use super::row;
use crate::domain::repositories::ThrottleRepository;
use crate::domain::throttle::ThrottleState;
use crate::domain::types::OrderSide;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};

pub struct SqliteThrottleRepository {
    pool: SqlitePool,
}

impl SqliteThrottleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ThrottleRepository for SqliteThrottleRepository {
    async fn get(
        &self,
        symbol: &str,
        side: OrderSide,
        strategy_key: &str,
    ) -> Result<Option<ThrottleState>> {
        let r = sqlx::query(
            "SELECT * FROM throttle_states
             WHERE symbol = ? AND side = ? AND strategy_key = ?",
        )
        .bind(symbol)
        .bind(side.to_string())
        .bind(strategy_key)
        .fetch_optional(&self.pool)
        .await?;

        match r {
            Some(r) => Ok(Some(ThrottleState {
                symbol: r.try_get("symbol")?,
                side: r
                    .try_get::<String, _>("side")?
                    .parse()
                    .map_err(anyhow::Error::msg)?,
                strategy_key: r.try_get("strategy_key")?,
                last_emit_time: row::millis(r.try_get("last_emit_time")?),
                last_emit_price: row::decimal(r.try_get("last_emit_price")?)?,
                force_next: r.try_get("force_next")?,
            })),
            None => Ok(None),
        }
    }

    async fn record_emit(
        &self,
        symbol: &str,
        side: OrderSide,
        strategy_key: &str,
        at: DateTime<Utc>,
        price: Decimal,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO throttle_states (
                symbol, side, strategy_key, last_emit_time, last_emit_price, force_next
            )
            VALUES (?, ?, ?, ?, ?, 0)
            ON CONFLICT(symbol, side, strategy_key) DO UPDATE SET
                last_emit_time = excluded.last_emit_time,
                last_emit_price = excluded.last_emit_price,
                force_next = 0
            "#,
        )
        .bind(symbol)
        .bind(side.to_string())
        .bind(strategy_key)
        .bind(at.timestamp_millis())
        .bind(price.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to record throttle emit")?;

        Ok(())
    }

    async fn clear_force_next(
        &self,
        symbol: &str,
        side: OrderSide,
        strategy_key: &str,
    ) -> Result<()> {
        sqlx::query(
            "UPDATE throttle_states SET force_next = 0
             WHERE symbol = ? AND side = ? AND strategy_key = ?",
        )
        .bind(symbol)
        .bind(side.to_string())
        .bind(strategy_key)
        .execute(&self.pool)
        .await
        .context("Failed to clear force_next")?;

        Ok(())
    }

    async fn set_force_next(
        &self,
        symbol: &str,
        side: OrderSide,
        strategy_key: &str,
    ) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO throttle_states (
                symbol, side, strategy_key, last_emit_time, last_emit_price, force_next
            )
            VALUES (?, ?, ?, 0, '0', 1)
            ON CONFLICT(symbol, side, strategy_key) DO UPDATE SET force_next = 1
            "#,
        )
        .bind(symbol)
        .bind(side.to_string())
        .bind(strategy_key)
        .execute(&self.pool)
        .await
        .context("Failed to set force_next")?;

        Ok(())
    }
}
