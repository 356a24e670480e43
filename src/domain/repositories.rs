//! Repository traits over the relational store.
//!
//! The database is the shared mutable state of the pipeline; everything the
//! monitor, gate, reconciler and protection manager know about live state
//! goes through these traits. SQLite implementations live under
//! `infrastructure::persistence`.

use crate::domain::alert::{AlertRecord, DecisionTrace};
use crate::domain::market::MarketSnapshot;
use crate::domain::throttle::ThrottleState;
use crate::domain::types::{Balance, Instrument, Order, OrderRole, OrderSide, OrderStatus};
use crate::domain::watchlist::WatchlistEntry;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

#[async_trait]
pub trait WatchlistRepository: Send + Sync {
    /// Entries that are not soft-deleted, in stable symbol order.
    async fn active_entries(&self) -> Result<Vec<WatchlistEntry>>;

    async fn find(&self, symbol: &str) -> Result<Option<WatchlistEntry>>;

    async fn upsert(&self, entry: &WatchlistEntry) -> Result<()>;
}

#[async_trait]
pub trait MarketDataRepository: Send + Sync {
    async fn latest(&self, symbol: &str) -> Result<Option<MarketSnapshot>>;

    async fn upsert(&self, snapshot: &MarketSnapshot) -> Result<()>;
}

/// Fields of a freshly emitted alert; the decision stamp arrives later.
#[derive(Debug, Clone)]
pub struct NewAlert {
    pub symbol: String,
    pub side: OrderSide,
    pub strategy_key: String,
    pub price_at_emit: Decimal,
    pub run_id: String,
    pub created_at: DateTime<Utc>,
}

#[async_trait]
pub trait AlertRepository: Send + Sync {
    /// Insert a PENDING alert, returning its id.
    async fn insert(&self, alert: &NewAlert) -> Result<i64>;

    async fn find(&self, id: i64) -> Result<Option<AlertRecord>>;

    /// Stamp a decision onto an alert. Last write wins.
    async fn apply_trace(&self, id: i64, trace: &DecisionTrace) -> Result<()>;

    /// Stamp only if the alert is still PENDING. Returns whether the write
    /// landed; used where re-entry is possible.
    async fn apply_trace_if_pending(&self, id: i64, trace: &DecisionTrace) -> Result<bool>;

    /// Most recent alert for `(symbol, side)` created at or after `since`.
    async fn latest_for(
        &self,
        symbol: &str,
        side: OrderSide,
        since: DateTime<Utc>,
    ) -> Result<Option<AlertRecord>>;

    /// All alerts of one run still PENDING, for the cycle-end safety net.
    async fn pending_for_run(&self, run_id: &str) -> Result<Vec<AlertRecord>>;
}

#[async_trait]
pub trait OrderRepository: Send + Sync {
    async fn insert(&self, order: &Order) -> Result<()>;

    async fn find(&self, exchange_order_id: &str) -> Result<Option<Order>>;

    async fn update_status(
        &self,
        exchange_order_id: &str,
        status: OrderStatus,
        filled_quantity: Option<Decimal>,
        avg_fill_price: Option<Decimal>,
    ) -> Result<()>;

    async fn set_note(&self, exchange_order_id: &str, note: &str) -> Result<()>;

    /// All orders in a non-terminal status.
    async fn open_orders(&self) -> Result<Vec<Order>>;

    /// Non-terminal TAKE_PROFIT orders whose symbol starts with `base`.
    async fn count_open_take_profits_by_base(&self, base: &str) -> Result<u32>;

    /// Non-terminal TAKE_PROFIT orders for exactly `symbol`.
    async fn count_open_take_profits_by_symbol(&self, symbol: &str) -> Result<u32>;

    /// Whether any order for the base asset was created at or after `since`.
    async fn has_order_for_base_since(&self, base: &str, since: DateTime<Utc>) -> Result<bool>;

    /// Whether an order with this signal key was created at or after `since`.
    async fn signal_key_exists_since(&self, signal_key: &str, since: DateTime<Utc>)
    -> Result<bool>;

    /// Sum of `price × quantity` over non-terminal entry orders.
    async fn open_entry_notional(&self) -> Result<Decimal>;

    /// Non-terminal protection orders attached to `parent_order_id`.
    async fn active_protection_orders(&self, parent_order_id: &str) -> Result<Vec<Order>>;

    async fn find_by_oco_group(&self, oco_group_id: &str) -> Result<Vec<Order>>;

    /// Protection orders of `role` for `symbol` created at or after `since`,
    /// newest first. Legacy sibling matching only.
    async fn recent_protection_orders(
        &self,
        symbol: &str,
        role: OrderRole,
        since: DateTime<Utc>,
    ) -> Result<Vec<Order>>;
}

#[async_trait]
pub trait ThrottleRepository: Send + Sync {
    async fn get(
        &self,
        symbol: &str,
        side: OrderSide,
        strategy_key: &str,
    ) -> Result<Option<ThrottleState>>;

    /// Record an emission: upsert `(last_emit_time, last_emit_price)` and
    /// clear `force_next`.
    async fn record_emit(
        &self,
        symbol: &str,
        side: OrderSide,
        strategy_key: &str,
        at: DateTime<Utc>,
        price: Decimal,
    ) -> Result<()>;

    /// Consume the one-shot override without emitting.
    async fn clear_force_next(
        &self,
        symbol: &str,
        side: OrderSide,
        strategy_key: &str,
    ) -> Result<()>;

    async fn set_force_next(
        &self,
        symbol: &str,
        side: OrderSide,
        strategy_key: &str,
    ) -> Result<()>;
}

#[async_trait]
pub trait BalanceRepository: Send + Sync {
    /// Overwrite the local mirror with the exchange account summary.
    async fn replace_all(&self, balances: &[Balance]) -> Result<()>;

    async fn get(&self, asset: &str) -> Result<Option<Balance>>;

    async fn all(&self) -> Result<Vec<Balance>>;
}

#[async_trait]
pub trait InstrumentRepository: Send + Sync {
    async fn get(&self, symbol: &str) -> Result<Option<(Instrument, DateTime<Utc>)>>;

    async fn upsert_all(&self, instruments: &[Instrument], refreshed_at: DateTime<Utc>)
    -> Result<()>;
}

/// Cross-process advisory lock guarding the monitor cycle. Acquire is
/// non-blocking: a held lock yields `false`, never a wait.
#[async_trait]
pub trait RunLock: Send + Sync {
    async fn try_acquire(&self, holder: &str) -> Result<bool>;

    async fn release(&self, holder: &str) -> Result<()>;
}
