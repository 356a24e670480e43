use crate::domain::types::OrderSide;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Per `(symbol, side, strategy_key)` emission state.
///
/// Inserted on first emit, updated on every emit. `force_next` is a one-shot
/// operator override consumed on read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThrottleState {
    pub symbol: String,
    pub side: OrderSide,
    pub strategy_key: String,
    pub last_emit_time: DateTime<Utc>,
    pub last_emit_price: Decimal,
    pub force_next: bool,
}
