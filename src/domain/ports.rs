//! Service ports. Infrastructure provides the real implementations; tests
//! plug in the mocks from `infrastructure::mock`.

use crate::domain::errors::ExchangeError;
use crate::domain::types::{Balance, Instrument, OrderSide, OrderStatus, OrderType};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Outbound order request. All numeric fields are pre-normalized canonical
/// strings; the facade never re-rounds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CreateOrderRequest {
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub quantity: String,
    pub price: Option<String>,
    pub trigger_price: Option<String>,
    pub trigger_condition: Option<String>,
    pub client_oid: String,
    /// Instrument-specific execution hint, e.g. the margin-order tag.
    pub exec_inst: Option<String>,
    pub leverage: Option<u32>,
}

/// Acknowledgement returned by `create-order`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeOrderAck {
    pub exchange_order_id: String,
    pub client_oid: String,
}

/// Exchange-side view of an order, as returned by the open-orders, history
/// and detail endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeOrderView {
    pub exchange_order_id: String,
    pub client_oid: Option<String>,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub status: OrderStatus,
    pub price: Option<Decimal>,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub avg_fill_price: Option<Decimal>,
    pub updated_at: DateTime<Utc>,
}

/// Request/response facade over the exchange REST API.
///
/// Implementations own signing, deadlines and transient retries; callers see
/// typed [`ExchangeError`]s only.
#[async_trait]
pub trait ExchangeClient: Send + Sync {
    async fn get_instruments(&self) -> Result<Vec<Instrument>, ExchangeError>;

    async fn get_account_summary(&self) -> Result<Vec<Balance>, ExchangeError>;

    async fn get_open_orders(&self) -> Result<Vec<ExchangeOrderView>, ExchangeError>;

    async fn get_order_history(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ExchangeOrderView>, ExchangeError>;

    async fn get_order_detail(
        &self,
        exchange_order_id: &str,
    ) -> Result<ExchangeOrderView, ExchangeError>;

    async fn create_order(
        &self,
        request: &CreateOrderRequest,
    ) -> Result<ExchangeOrderAck, ExchangeError>;

    async fn cancel_order(
        &self,
        symbol: &str,
        exchange_order_id: &str,
    ) -> Result<(), ExchangeError>;
}

/// Single gatekeeper for outbound operator messages.
///
/// `send` never errors into the hot path: failures are logged and reported
/// as `false`.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send(&self, text: &str, origin: &str) -> bool;

    fn is_enabled(&self) -> bool;
}
