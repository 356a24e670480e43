//! Wire shapes for the exchange REST API. All numeric fields travel as
//! strings; parsing into `Decimal` happens at this boundary only.

use crate::domain::errors::ExchangeError;
use crate::domain::ports::ExchangeOrderView;
use crate::domain::types::Instrument;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Signed request envelope.
#[derive(Debug, Serialize)]
pub struct ApiRequest<P: Serialize> {
    pub id: u64,
    pub method: String,
    pub api_key: String,
    pub params: P,
    pub nonce: i64,
    pub sig: String,
}

/// Response envelope. `code == 0` is success; anything else maps through
/// [`ExchangeError::from_code`].
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    pub code: i64,
    #[serde(default)]
    pub message: Option<String>,
    pub result: Option<T>,
}

#[derive(Debug, Deserialize)]
pub struct InstrumentsResult {
    pub instruments: Vec<InstrumentDto>,
}

#[derive(Debug, Deserialize)]
pub struct InstrumentDto {
    pub instrument_name: String,
    pub base_currency: String,
    pub quote_currency: String,
    pub price_tick_size: String,
    pub qty_tick_size: String,
    pub min_quantity: String,
    pub price_decimals: u32,
    pub quantity_decimals: u32,
}

impl InstrumentDto {
    pub fn into_domain(self) -> Result<Instrument, ExchangeError> {
        Ok(Instrument {
            base: self.base_currency,
            quote: self.quote_currency,
            price_tick: parse_decimal(&self.price_tick_size)?,
            quantity_tick: parse_decimal(&self.qty_tick_size)?,
            min_quantity: parse_decimal(&self.min_quantity)?,
            price_decimals: self.price_decimals,
            quantity_decimals: self.quantity_decimals,
            symbol: self.instrument_name,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct AccountSummaryResult {
    pub accounts: Vec<AccountDto>,
}

#[derive(Debug, Deserialize)]
pub struct AccountDto {
    pub currency: String,
    pub balance: String,
    pub available: String,
    /// Amount reserved by open orders.
    pub order: String,
}

#[derive(Debug, Deserialize)]
pub struct OrderListResult {
    pub order_list: Vec<OrderDto>,
}

#[derive(Debug, Deserialize)]
pub struct OrderDetailResult {
    pub order_info: OrderDto,
}

#[derive(Debug, Deserialize)]
pub struct OrderDto {
    pub order_id: String,
    #[serde(default)]
    pub client_oid: Option<String>,
    pub instrument_name: String,
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub status: String,
    #[serde(default)]
    pub price: Option<String>,
    pub quantity: String,
    #[serde(default)]
    pub cumulative_quantity: Option<String>,
    #[serde(default)]
    pub avg_price: Option<String>,
    pub update_time: i64,
}

impl OrderDto {
    pub fn into_view(self) -> Result<ExchangeOrderView, ExchangeError> {
        Ok(ExchangeOrderView {
            side: self.side.parse().map_err(bad_field)?,
            order_type: self.order_type.parse().map_err(bad_field)?,
            status: self.status.parse().map_err(bad_field)?,
            price: self.price.as_deref().map(parse_decimal).transpose()?,
            quantity: parse_decimal(&self.quantity)?,
            filled_quantity: self
                .cumulative_quantity
                .as_deref()
                .map(parse_decimal)
                .transpose()?
                .unwrap_or(Decimal::ZERO),
            avg_fill_price: self.avg_price.as_deref().map(parse_decimal).transpose()?,
            updated_at: DateTime::<Utc>::from_timestamp_millis(self.update_time)
                .unwrap_or_default(),
            exchange_order_id: self.order_id,
            client_oid: self.client_oid,
            symbol: self.instrument_name,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderResult {
    pub order_id: String,
    pub client_oid: String,
}

/// Wire params for `private/create-order`.
#[derive(Debug, Serialize)]
pub struct CreateOrderParams {
    pub instrument_name: String,
    pub side: String,
    #[serde(rename = "type")]
    pub order_type: String,
    pub quantity: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_price: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trigger_condition: Option<String>,
    pub client_oid: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exec_inst: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub leverage: Option<u32>,
}

fn parse_decimal(raw: &str) -> Result<Decimal, ExchangeError> {
    Decimal::from_str(raw).map_err(|e| ExchangeError::Transport(format!(
        "unparseable decimal '{}' in exchange response: {}",
        raw, e
    )))
}

fn bad_field(msg: String) -> ExchangeError {
    ExchangeError::Transport(format!("unexpected field in exchange response: {}", msg))
}
