use super::row;
use crate::domain::alert::{AlertRecord, DecisionTrace, DecisionType};
use crate::domain::repositories::{AlertRepository, NewAlert};
use crate::domain::types::OrderSide;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

pub struct SqliteAlertRepository {
    pool: SqlitePool,
}

impl SqliteAlertRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(r: &sqlx::sqlite::SqliteRow) -> Result<AlertRecord> {
        let context_json: String = r.try_get("context")?;

        Ok(AlertRecord {
            id: r.try_get("id")?,
            symbol: r.try_get("symbol")?,
            side: r
                .try_get::<String, _>("side")?
                .parse()
                .map_err(anyhow::Error::msg)?,
            strategy_key: r.try_get("strategy_key")?,
            price_at_emit: row::decimal(r.try_get("price_at_emit")?)?,
            created_at: row::millis(r.try_get("created_at")?),
            run_id: r.try_get("run_id")?,
            decision_type: r
                .try_get::<String, _>("decision_type")?
                .parse()
                .map_err(anyhow::Error::msg)?,
            reason_code: r
                .try_get::<Option<String>, _>("reason_code")?
                .map(|s| s.parse().map_err(anyhow::Error::msg))
                .transpose()?,
            reason_message: r.try_get("reason_message")?,
            context: serde_json::from_str(&context_json)
                .context("Failed to parse alert context column")?,
            order_id: r.try_get("order_id")?,
            exchange_error_snippet: r.try_get("exchange_error_snippet")?,
        })
    }
}

#[async_trait]
impl AlertRepository for SqliteAlertRepository {
    async fn insert(&self, alert: &NewAlert) -> Result<i64> {
        let result = sqlx::query(
            r#"
            INSERT INTO alert_messages (
                symbol, side, strategy_key, price_at_emit, created_at, run_id,
                decision_type, context
            )
            VALUES (?, ?, ?, ?, ?, ?, 'PENDING', 'null')
            "#,
        )
        .bind(&alert.symbol)
        .bind(alert.side.to_string())
        .bind(&alert.strategy_key)
        .bind(alert.price_at_emit.to_string())
        .bind(alert.created_at.timestamp_millis())
        .bind(&alert.run_id)
        .execute(&self.pool)
        .await
        .context("Failed to insert alert")?;

        Ok(result.last_insert_rowid())
    }

    async fn find(&self, id: i64) -> Result<Option<AlertRecord>> {
        let r = sqlx::query("SELECT * FROM alert_messages WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        r.as_ref().map(Self::map_row).transpose()
    }

    async fn apply_trace(&self, id: i64, trace: &DecisionTrace) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE alert_messages SET
                decision_type = ?,
                reason_code = ?,
                reason_message = ?,
                context = ?,
                order_id = COALESCE(?, order_id),
                exchange_error_snippet = COALESCE(?, exchange_error_snippet)
            WHERE id = ?
            "#,
        )
        .bind(trace.decision_type.to_string())
        .bind(trace.reason_code.to_string())
        .bind(&trace.reason_message)
        .bind(serde_json::to_string(&trace.context)?)
        .bind(&trace.order_id)
        .bind(&trace.exchange_error_snippet)
        .bind(id)
        .execute(&self.pool)
        .await
        .context("Failed to stamp decision trace")?;

        Ok(())
    }

    async fn apply_trace_if_pending(&self, id: i64, trace: &DecisionTrace) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE alert_messages SET
                decision_type = ?,
                reason_code = ?,
                reason_message = ?,
                context = ?,
                order_id = COALESCE(?, order_id),
                exchange_error_snippet = COALESCE(?, exchange_error_snippet)
            WHERE id = ? AND decision_type = ?
            "#,
        )
        .bind(trace.decision_type.to_string())
        .bind(trace.reason_code.to_string())
        .bind(&trace.reason_message)
        .bind(serde_json::to_string(&trace.context)?)
        .bind(&trace.order_id)
        .bind(&trace.exchange_error_snippet)
        .bind(id)
        .bind(DecisionType::Pending.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to stamp decision trace (conditional)")?;

        Ok(result.rows_affected() > 0)
    }

    async fn latest_for(
        &self,
        symbol: &str,
        side: OrderSide,
        since: DateTime<Utc>,
    ) -> Result<Option<AlertRecord>> {
        let r = sqlx::query(
            "SELECT * FROM alert_messages
             WHERE symbol = ? AND side = ? AND created_at >= ?
             ORDER BY created_at DESC, id DESC LIMIT 1",
        )
        .bind(symbol)
        .bind(side.to_string())
        .bind(since.timestamp_millis())
        .fetch_optional(&self.pool)
        .await?;

        r.as_ref().map(Self::map_row).transpose()
    }

    async fn pending_for_run(&self, run_id: &str) -> Result<Vec<AlertRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM alert_messages
             WHERE run_id = ? AND decision_type = 'PENDING'
             ORDER BY id ASC",
        )
        .bind(run_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::map_row).collect()
    }
}
