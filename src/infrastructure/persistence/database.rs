use anyhow::{Context, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Fixed advisory-lock id reserved for the monitor run lock.
pub const RUN_LOCK_ID: i64 = 730_001;

/// Shared database handle
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    pub async fn new(db_url: &str) -> Result<Self> {
        // Ensure the directory exists if it's a file path
        if let Some(path_part) = db_url.strip_prefix("sqlite://") {
            let path = Path::new(path_part);
            if let Some(parent) = path.parent()
                && !parent.exists()
            {
                fs::create_dir_all(parent)
                    .await
                    .context("Failed to create database directory")?;
            }
        }

        let options = SqliteConnectOptions::from_str(db_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal); // Better for concurrency

        // A pooled :memory: database would give every connection its own
        // empty schema; tests need a single shared connection.
        let max_connections = if db_url.contains(":memory:") { 1 } else { 5 };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .connect_with(options)
            .await
            .context("Failed to connect to SQLite database")?;

        info!("Connected to database: {}", db_url);

        let db = Self { pool };
        db.init().await?;

        Ok(db)
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS watchlist_items (
                symbol TEXT PRIMARY KEY,
                strategy_key TEXT NOT NULL,
                alert_enabled INTEGER NOT NULL DEFAULT 1,
                buy_alert_enabled INTEGER NOT NULL DEFAULT 1,
                sell_alert_enabled INTEGER NOT NULL DEFAULT 1,
                trade_enabled INTEGER NOT NULL DEFAULT 0,
                trade_on_margin INTEGER NOT NULL DEFAULT 0,
                trade_amount_usd TEXT,
                leverage INTEGER,
                manual_buy INTEGER NOT NULL DEFAULT 0,
                manual_sell INTEGER NOT NULL DEFAULT 0,
                deleted_at INTEGER
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create watchlist_items table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS market_data (
                symbol TEXT PRIMARY KEY,
                price TEXT NOT NULL,
                rsi TEXT,
                ema10 TEXT,
                ma50 TEXT,
                ma200 TEXT,
                ma10w TEXT,
                atr TEXT,
                volume TEXT,
                avg_volume TEXT,
                rsi_history TEXT NOT NULL DEFAULT '[]',
                observed_at INTEGER NOT NULL,
                stale INTEGER NOT NULL DEFAULT 0
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create market_data table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS exchange_orders (
                exchange_order_id TEXT PRIMARY KEY,
                client_oid TEXT NOT NULL,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                order_type TEXT NOT NULL,
                role TEXT NOT NULL,
                status TEXT NOT NULL,
                price TEXT NOT NULL,
                trigger_price TEXT,
                quantity TEXT NOT NULL,
                filled_quantity TEXT NOT NULL DEFAULT '0',
                avg_fill_price TEXT,
                parent_order_id TEXT,
                oco_group_id TEXT,
                signal_key TEXT,
                is_margin INTEGER NOT NULL DEFAULT 0,
                leverage INTEGER,
                note TEXT,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_orders_symbol_role_status
            ON exchange_orders (symbol, role, status);
            CREATE INDEX IF NOT EXISTS idx_orders_oco_group
            ON exchange_orders (oco_group_id);
            CREATE INDEX IF NOT EXISTS idx_orders_signal_key
            ON exchange_orders (signal_key, created_at);
            CREATE INDEX IF NOT EXISTS idx_orders_created
            ON exchange_orders (created_at);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create exchange_orders table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alert_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                strategy_key TEXT NOT NULL,
                price_at_emit TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                run_id TEXT NOT NULL,
                decision_type TEXT NOT NULL DEFAULT 'PENDING',
                reason_code TEXT,
                reason_message TEXT,
                context TEXT NOT NULL DEFAULT 'null',
                order_id TEXT,
                exchange_error_snippet TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_alerts_symbol_side_time
            ON alert_messages (symbol, side, created_at);
            CREATE INDEX IF NOT EXISTS idx_alerts_run_decision
            ON alert_messages (run_id, decision_type);
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create alert_messages table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS throttle_states (
                symbol TEXT NOT NULL,
                side TEXT NOT NULL,
                strategy_key TEXT NOT NULL,
                last_emit_time INTEGER NOT NULL,
                last_emit_price TEXT NOT NULL,
                force_next INTEGER NOT NULL DEFAULT 0,
                PRIMARY KEY (symbol, side, strategy_key)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create throttle_states table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS balances (
                asset TEXT PRIMARY KEY,
                total TEXT NOT NULL,
                available TEXT NOT NULL,
                reserved TEXT NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create balances table")?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS instrument_metadata_cache (
                symbol TEXT PRIMARY KEY,
                base TEXT NOT NULL,
                quote TEXT NOT NULL,
                price_tick TEXT NOT NULL,
                quantity_tick TEXT NOT NULL,
                min_quantity TEXT NOT NULL,
                price_decimals INTEGER NOT NULL,
                quantity_decimals INTEGER NOT NULL,
                refreshed_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create instrument_metadata_cache table")?;

        // Advisory run lock: one seeded row, acquired by compare-and-set.
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS run_lock (
                id INTEGER PRIMARY KEY,
                holder TEXT,
                acquired_at INTEGER,
                expires_at INTEGER
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create run_lock table")?;

        sqlx::query("INSERT OR IGNORE INTO run_lock (id) VALUES (?)")
            .bind(RUN_LOCK_ID)
            .execute(&mut *conn)
            .await
            .context("Failed to seed run_lock row")?;

        info!("Database schema initialized.");
        Ok(())
    }
}
