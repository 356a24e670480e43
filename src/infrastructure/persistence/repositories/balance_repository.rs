use super::row;
use crate::domain::repositories::BalanceRepository;
use crate::domain::types::Balance;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Row, SqlitePool};

pub struct SqliteBalanceRepository {
    pool: SqlitePool,
}

impl SqliteBalanceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(r: &sqlx::sqlite::SqliteRow) -> Result<Balance> {
        Ok(Balance {
            asset: r.try_get("asset")?,
            total: row::decimal(r.try_get("total")?)?,
            available: row::decimal(r.try_get("available")?)?,
            reserved: row::decimal(r.try_get("reserved")?)?,
        })
    }
}

#[async_trait]
impl BalanceRepository for SqliteBalanceRepository {
    async fn replace_all(&self, balances: &[Balance]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        let now = Utc::now().timestamp_millis();

        sqlx::query("DELETE FROM balances")
            .execute(&mut *tx)
            .await?;

        for b in balances {
            sqlx::query(
                "INSERT INTO balances (asset, total, available, reserved, updated_at)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&b.asset)
            .bind(b.total.to_string())
            .bind(b.available.to_string())
            .bind(b.reserved.to_string())
            .bind(now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await.context("Failed to replace balances")?;
        Ok(())
    }

    async fn get(&self, asset: &str) -> Result<Option<Balance>> {
        let r = sqlx::query("SELECT * FROM balances WHERE asset = ?")
            .bind(asset)
            .fetch_optional(&self.pool)
            .await?;

        r.as_ref().map(Self::map_row).transpose()
    }

    async fn all(&self) -> Result<Vec<Balance>> {
        let rows = sqlx::query("SELECT * FROM balances ORDER BY asset ASC")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(Self::map_row).collect()
    }
}
