//! Cross-process advisory lock for the monitor cycle.
//!
//! One seeded row keyed by [`RUN_LOCK_ID`] is claimed with a compare-and-set
//! UPDATE; replicas sharing the database therefore run at most one pipeline
//! cycle at a time. A TTL lets the lock recover if a holder dies without
//! releasing. This lock is cross-process; the per-parent SL/TP lock in the
//! protection manager is in-process and unrelated.

use crate::domain::repositories::RunLock;
use crate::infrastructure::persistence::database::RUN_LOCK_ID;
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use std::time::Duration;

pub struct SqliteRunLock {
    pool: SqlitePool,
    ttl: Duration,
}

impl SqliteRunLock {
    pub fn new(pool: SqlitePool) -> Self {
        Self::with_ttl(pool, Duration::from_secs(600))
    }

    pub fn with_ttl(pool: SqlitePool, ttl: Duration) -> Self {
        Self { pool, ttl }
    }
}

#[async_trait]
impl RunLock for SqliteRunLock {
    async fn try_acquire(&self, holder: &str) -> Result<bool> {
        let now = Utc::now().timestamp_millis();
        let expires_at = now + self.ttl.as_millis() as i64;

        let result = sqlx::query(
            r#"
            UPDATE run_lock
            SET holder = ?, acquired_at = ?, expires_at = ?
            WHERE id = ? AND (holder IS NULL OR expires_at < ?)
            "#,
        )
        .bind(holder)
        .bind(now)
        .bind(expires_at)
        .bind(RUN_LOCK_ID)
        .bind(now)
        .execute(&self.pool)
        .await
        .context("Failed to acquire run lock")?;

        Ok(result.rows_affected() > 0)
    }

    async fn release(&self, holder: &str) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE run_lock
            SET holder = NULL, acquired_at = NULL, expires_at = NULL
            WHERE id = ? AND holder = ?
            "#,
        )
        .bind(RUN_LOCK_ID)
        .bind(holder)
        .execute(&self.pool)
        .await
        .context("Failed to release run lock")?;

        Ok(())
    }
}
