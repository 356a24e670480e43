use super::row;
use crate::domain::repositories::OrderRepository;
use crate::domain::types::{Order, OrderRole, OrderStatus};
use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};

const NON_TERMINAL: &str = "('NEW', 'ACTIVE', 'PARTIALLY_FILLED')";

pub struct SqliteOrderRepository {
    pool: SqlitePool,
}

impl SqliteOrderRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// LIKE pattern matching symbols of one base asset. The underscore is a
    /// LIKE wildcard, so it is escaped.
    fn base_pattern(base: &str) -> String {
        format!("{}\\_%", base)
    }

    fn map_row(r: &sqlx::sqlite::SqliteRow) -> Result<Order> {
        Ok(Order {
            exchange_order_id: r.try_get("exchange_order_id")?,
            client_oid: r.try_get("client_oid")?,
            symbol: r.try_get("symbol")?,
            side: r
                .try_get::<String, _>("side")?
                .parse()
                .map_err(anyhow::Error::msg)?,
            order_type: r
                .try_get::<String, _>("order_type")?
                .parse()
                .map_err(anyhow::Error::msg)?,
            role: r
                .try_get::<String, _>("role")?
                .parse()
                .map_err(anyhow::Error::msg)?,
            status: r
                .try_get::<String, _>("status")?
                .parse()
                .map_err(anyhow::Error::msg)?,
            price: row::decimal(r.try_get("price")?)?,
            trigger_price: row::opt_decimal(r.try_get("trigger_price")?)?,
            quantity: row::decimal(r.try_get("quantity")?)?,
            filled_quantity: row::decimal(r.try_get("filled_quantity")?)?,
            avg_fill_price: row::opt_decimal(r.try_get("avg_fill_price")?)?,
            parent_order_id: r.try_get("parent_order_id")?,
            oco_group_id: r.try_get("oco_group_id")?,
            signal_key: r.try_get("signal_key")?,
            is_margin: r.try_get("is_margin")?,
            leverage: r
                .try_get::<Option<i64>, _>("leverage")?
                .map(|v| v as u32),
            note: r.try_get("note")?,
            created_at: row::millis(r.try_get("created_at")?),
            updated_at: row::millis(r.try_get("updated_at")?),
        })
    }

    fn map_rows(rows: &[sqlx::sqlite::SqliteRow]) -> Result<Vec<Order>> {
        rows.iter().map(Self::map_row).collect()
    }
}

#[async_trait]
impl OrderRepository for SqliteOrderRepository {
    async fn insert(&self, order: &Order) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO exchange_orders (
                exchange_order_id, client_oid, symbol, side, order_type, role,
                status, price, trigger_price, quantity, filled_quantity,
                avg_fill_price, parent_order_id, oco_group_id, signal_key,
                is_margin, leverage, note, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(exchange_order_id) DO NOTHING
            "#,
        )
        .bind(&order.exchange_order_id)
        .bind(&order.client_oid)
        .bind(&order.symbol)
        .bind(order.side.to_string())
        .bind(order.order_type.to_string())
        .bind(order.role.to_string())
        .bind(order.status.to_string())
        .bind(order.price.to_string())
        .bind(order.trigger_price.map(|v| v.to_string()))
        .bind(order.quantity.to_string())
        .bind(order.filled_quantity.to_string())
        .bind(order.avg_fill_price.map(|v| v.to_string()))
        .bind(&order.parent_order_id)
        .bind(&order.oco_group_id)
        .bind(&order.signal_key)
        .bind(order.is_margin)
        .bind(order.leverage.map(|v| v as i64))
        .bind(&order.note)
        .bind(order.created_at.timestamp_millis())
        .bind(order.updated_at.timestamp_millis())
        .execute(&self.pool)
        .await
        .context("Failed to insert order")?;

        Ok(())
    }

    async fn find(&self, exchange_order_id: &str) -> Result<Option<Order>> {
        let r = sqlx::query("SELECT * FROM exchange_orders WHERE exchange_order_id = ?")
            .bind(exchange_order_id)
            .fetch_optional(&self.pool)
            .await?;

        r.as_ref().map(Self::map_row).transpose()
    }

    async fn update_status(
        &self,
        exchange_order_id: &str,
        status: OrderStatus,
        filled_quantity: Option<Decimal>,
        avg_fill_price: Option<Decimal>,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE exchange_orders SET
                status = ?,
                filled_quantity = COALESCE(?, filled_quantity),
                avg_fill_price = COALESCE(?, avg_fill_price),
                updated_at = ?
            WHERE exchange_order_id = ?
            "#,
        )
        .bind(status.to_string())
        .bind(filled_quantity.map(|v| v.to_string()))
        .bind(avg_fill_price.map(|v| v.to_string()))
        .bind(Utc::now().timestamp_millis())
        .bind(exchange_order_id)
        .execute(&self.pool)
        .await
        .context("Failed to update order status")?;

        Ok(())
    }

    async fn set_note(&self, exchange_order_id: &str, note: &str) -> Result<()> {
        sqlx::query("UPDATE exchange_orders SET note = ?, updated_at = ? WHERE exchange_order_id = ?")
            .bind(note)
            .bind(Utc::now().timestamp_millis())
            .bind(exchange_order_id)
            .execute(&self.pool)
            .await
            .context("Failed to set order note")?;

        Ok(())
    }

    async fn open_orders(&self) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT * FROM exchange_orders WHERE status IN {} ORDER BY created_at ASC",
            NON_TERMINAL
        ))
        .fetch_all(&self.pool)
        .await?;

        Self::map_rows(&rows)
    }

    async fn count_open_take_profits_by_base(&self, base: &str) -> Result<u32> {
        let r = sqlx::query(&format!(
            r#"
            SELECT COUNT(*) AS count FROM exchange_orders
            WHERE role = 'TAKE_PROFIT' AND status IN {}
              AND symbol LIKE ? ESCAPE '\'
            "#,
            NON_TERMINAL
        ))
        .bind(Self::base_pattern(base))
        .fetch_one(&self.pool)
        .await?;

        let count: i64 = r.try_get("count")?;
        Ok(count as u32)
    }

    async fn count_open_take_profits_by_symbol(&self, symbol: &str) -> Result<u32> {
        let r = sqlx::query(&format!(
            "SELECT COUNT(*) AS count FROM exchange_orders
             WHERE role = 'TAKE_PROFIT' AND status IN {} AND symbol = ?",
            NON_TERMINAL
        ))
        .bind(symbol)
        .fetch_one(&self.pool)
        .await?;

        let count: i64 = r.try_get("count")?;
        Ok(count as u32)
    }

    async fn has_order_for_base_since(&self, base: &str, since: DateTime<Utc>) -> Result<bool> {
        let r = sqlx::query(
            r#"
            SELECT COUNT(*) AS count FROM exchange_orders
            WHERE symbol LIKE ? ESCAPE '\' AND created_at >= ?
            "#,
        )
        .bind(Self::base_pattern(base))
        .bind(since.timestamp_millis())
        .fetch_one(&self.pool)
        .await?;

        let count: i64 = r.try_get("count")?;
        Ok(count > 0)
    }

    async fn signal_key_exists_since(
        &self,
        signal_key: &str,
        since: DateTime<Utc>,
    ) -> Result<bool> {
        let r = sqlx::query(
            "SELECT COUNT(*) AS count FROM exchange_orders
             WHERE signal_key = ? AND created_at >= ?",
        )
        .bind(signal_key)
        .bind(since.timestamp_millis())
        .fetch_one(&self.pool)
        .await?;

        let count: i64 = r.try_get("count")?;
        Ok(count > 0)
    }

    async fn open_entry_notional(&self) -> Result<Decimal> {
        let rows = sqlx::query(&format!(
            "SELECT price, quantity FROM exchange_orders
             WHERE role = 'ENTRY' AND status IN {}",
            NON_TERMINAL
        ))
        .fetch_all(&self.pool)
        .await?;

        let mut total = Decimal::ZERO;
        for r in rows {
            let price = row::decimal(r.try_get("price")?)?;
            let quantity = row::decimal(r.try_get("quantity")?)?;
            total += price * quantity;
        }
        Ok(total)
    }

    async fn active_protection_orders(&self, parent_order_id: &str) -> Result<Vec<Order>> {
        let rows = sqlx::query(&format!(
            "SELECT * FROM exchange_orders
             WHERE parent_order_id = ? AND role != 'ENTRY' AND status IN {}
             ORDER BY created_at ASC",
            NON_TERMINAL
        ))
        .bind(parent_order_id)
        .fetch_all(&self.pool)
        .await?;

        Self::map_rows(&rows)
    }

    async fn find_by_oco_group(&self, oco_group_id: &str) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            "SELECT * FROM exchange_orders WHERE oco_group_id = ? ORDER BY created_at ASC",
        )
        .bind(oco_group_id)
        .fetch_all(&self.pool)
        .await?;

        Self::map_rows(&rows)
    }

    async fn recent_protection_orders(
        &self,
        symbol: &str,
        role: OrderRole,
        since: DateTime<Utc>,
    ) -> Result<Vec<Order>> {
        let rows = sqlx::query(
            "SELECT * FROM exchange_orders
             WHERE symbol = ? AND role = ? AND created_at >= ?
             ORDER BY created_at DESC",
        )
        .bind(symbol)
        .bind(role.to_string())
        .bind(since.timestamp_millis())
        .fetch_all(&self.pool)
        .await?;

        Self::map_rows(&rows)
    }
}
