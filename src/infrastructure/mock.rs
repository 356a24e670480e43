//! Scriptable service doubles for integration tests.
//!
//! `MockExchange` keeps an in-memory order book and lets tests enqueue
//! per-call failures by exchange error code; `RecordingNotifier` captures
//! outbound messages instead of contacting anything.

use crate::domain::errors::ExchangeError;
use crate::domain::ports::{
    CreateOrderRequest, ExchangeClient, ExchangeOrderAck, ExchangeOrderView, Notifier,
};
use crate::domain::types::{Balance, Instrument, OrderStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct MockExchangeState {
    instruments: Vec<Instrument>,
    balances: Vec<Balance>,
    orders: HashMap<String, ExchangeOrderView>,
    /// Scripted `create-order` outcomes, consumed per call. `None` means
    /// success; `Some(code)` produces the mapped error. An empty queue
    /// defaults to success.
    create_results: VecDeque<Option<i64>>,
    cancel_results: VecDeque<Option<i64>>,
    create_requests: Vec<CreateOrderRequest>,
    cancel_requests: Vec<(String, String)>,
    next_id: u64,
    auto_fill: bool,
}

#[derive(Clone, Default)]
pub struct MockExchange {
    state: Arc<RwLock<MockExchangeState>>,
}

impl MockExchange {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn set_instruments(&self, instruments: Vec<Instrument>) {
        self.state.write().await.instruments = instruments;
    }

    pub async fn set_balances(&self, balances: Vec<Balance>) {
        self.state.write().await.balances = balances;
    }

    /// Newly created orders report FILLED immediately.
    pub async fn auto_fill(&self, enabled: bool) {
        self.state.write().await.auto_fill = enabled;
    }

    pub async fn script_create_results(&self, results: Vec<Option<i64>>) {
        self.state.write().await.create_results = results.into();
    }

    pub async fn script_cancel_results(&self, results: Vec<Option<i64>>) {
        self.state.write().await.cancel_results = results.into();
    }

    pub async fn set_order_status(
        &self,
        exchange_order_id: &str,
        status: OrderStatus,
        filled_quantity: Option<Decimal>,
        avg_fill_price: Option<Decimal>,
    ) {
        let mut state = self.state.write().await;
        if let Some(view) = state.orders.get_mut(exchange_order_id) {
            view.status = status;
            if let Some(filled) = filled_quantity {
                view.filled_quantity = filled;
            }
            if let Some(avg) = avg_fill_price {
                view.avg_fill_price = Some(avg);
            }
            view.updated_at = Utc::now();
        }
    }

    pub async fn create_requests(&self) -> Vec<CreateOrderRequest> {
        self.state.read().await.create_requests.clone()
    }

    pub async fn cancel_requests(&self) -> Vec<(String, String)> {
        self.state.read().await.cancel_requests.clone()
    }

    pub async fn order(&self, exchange_order_id: &str) -> Option<ExchangeOrderView> {
        self.state.read().await.orders.get(exchange_order_id).cloned()
    }
}

#[async_trait]
impl ExchangeClient for MockExchange {
    async fn get_instruments(&self) -> Result<Vec<Instrument>, ExchangeError> {
        Ok(self.state.read().await.instruments.clone())
    }

    async fn get_account_summary(&self) -> Result<Vec<Balance>, ExchangeError> {
        Ok(self.state.read().await.balances.clone())
    }

    async fn get_open_orders(&self) -> Result<Vec<ExchangeOrderView>, ExchangeError> {
        Ok(self
            .state
            .read()
            .await
            .orders
            .values()
            .filter(|o| !o.status.is_terminal())
            .cloned()
            .collect())
    }

    async fn get_order_history(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<ExchangeOrderView>, ExchangeError> {
        Ok(self
            .state
            .read()
            .await
            .orders
            .values()
            .filter(|o| o.status.is_terminal() && o.updated_at >= since)
            .cloned()
            .collect())
    }

    async fn get_order_detail(
        &self,
        exchange_order_id: &str,
    ) -> Result<ExchangeOrderView, ExchangeError> {
        self.state
            .read()
            .await
            .orders
            .get(exchange_order_id)
            .cloned()
            .ok_or_else(|| ExchangeError::Unknown {
                code: 316,
                snippet: format!("order {} not found", exchange_order_id),
            })
    }

    async fn create_order(
        &self,
        request: &CreateOrderRequest,
    ) -> Result<ExchangeOrderAck, ExchangeError> {
        let mut state = self.state.write().await;
        state.create_requests.push(request.clone());

        if let Some(Some(code)) = state.create_results.pop_front() {
            return Err(ExchangeError::from_code(code, "scripted failure"));
        }

        state.next_id += 1;
        let exchange_order_id = format!("EX-{}", state.next_id);

        let quantity = Decimal::from_str(&request.quantity).unwrap_or(Decimal::ZERO);
        let price = request
            .price
            .as_deref()
            .and_then(|p| Decimal::from_str(p).ok());

        let auto_fill = state.auto_fill;
        state.orders.insert(
            exchange_order_id.clone(),
            ExchangeOrderView {
                exchange_order_id: exchange_order_id.clone(),
                client_oid: Some(request.client_oid.clone()),
                symbol: request.symbol.clone(),
                side: request.side,
                order_type: request.order_type,
                status: if auto_fill {
                    OrderStatus::Filled
                } else {
                    OrderStatus::Active
                },
                price,
                quantity,
                filled_quantity: if auto_fill { quantity } else { Decimal::ZERO },
                avg_fill_price: if auto_fill { price } else { None },
                updated_at: Utc::now(),
            },
        );

        Ok(ExchangeOrderAck {
            exchange_order_id,
            client_oid: request.client_oid.clone(),
        })
    }

    async fn cancel_order(
        &self,
        symbol: &str,
        exchange_order_id: &str,
    ) -> Result<(), ExchangeError> {
        let mut state = self.state.write().await;
        state
            .cancel_requests
            .push((symbol.to_string(), exchange_order_id.to_string()));

        if let Some(Some(code)) = state.cancel_results.pop_front() {
            return Err(ExchangeError::from_code(code, "scripted failure"));
        }

        if let Some(view) = state.orders.get_mut(exchange_order_id) {
            view.status = OrderStatus::Cancelled;
            view.updated_at = Utc::now();
        }
        Ok(())
    }
}

/// Notifier double that records every message.
#[derive(Clone, Default)]
pub struct RecordingNotifier {
    messages: Arc<RwLock<Vec<(String, String)>>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn messages(&self) -> Vec<(String, String)> {
        self.messages.read().await.clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, text: &str, origin: &str) -> bool {
        self.messages
            .write()
            .await
            .push((origin.to_string(), text.to_string()));
        true
    }

    fn is_enabled(&self) -> bool {
        true
    }
}
