use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderSide {
    Buy,
    Sell,
}

impl OrderSide {
    pub fn opposite(self) -> Self {
        match self {
            OrderSide::Buy => OrderSide::Sell,
            OrderSide::Sell => OrderSide::Buy,
        }
    }
}

impl fmt::Display for OrderSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderSide::Buy => write!(f, "BUY"),
            OrderSide::Sell => write!(f, "SELL"),
        }
    }
}

impl FromStr for OrderSide {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "BUY" => Ok(OrderSide::Buy),
            "SELL" => Ok(OrderSide::Sell),
            other => Err(format!("unknown order side: '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    Market,
    Limit,
    StopLimit,
    TakeProfitLimit,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::Market => write!(f, "MARKET"),
            OrderType::Limit => write!(f, "LIMIT"),
            OrderType::StopLimit => write!(f, "STOP_LIMIT"),
            OrderType::TakeProfitLimit => write!(f, "TAKE_PROFIT_LIMIT"),
        }
    }
}

impl FromStr for OrderType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MARKET" => Ok(OrderType::Market),
            "LIMIT" => Ok(OrderType::Limit),
            "STOP_LIMIT" => Ok(OrderType::StopLimit),
            "TAKE_PROFIT_LIMIT" => Ok(OrderType::TakeProfitLimit),
            other => Err(format!("unknown order type: '{}'", other)),
        }
    }
}

/// Role of an order inside a trade: the opening order, or one of the two
/// protective orders attached to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderRole {
    Entry,
    StopLoss,
    TakeProfit,
}

impl fmt::Display for OrderRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderRole::Entry => write!(f, "ENTRY"),
            OrderRole::StopLoss => write!(f, "STOP_LOSS"),
            OrderRole::TakeProfit => write!(f, "TAKE_PROFIT"),
        }
    }
}

impl FromStr for OrderRole {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "ENTRY" => Ok(OrderRole::Entry),
            "STOP_LOSS" => Ok(OrderRole::StopLoss),
            "TAKE_PROFIT" => Ok(OrderRole::TakeProfit),
            other => Err(format!("unknown order role: '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    New,
    Active,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    /// Rollback of a half-created protection pair failed; the order needs
    /// operator attention and must not be touched by automation again.
    FailedInconsistent,
}

impl OrderStatus {
    /// Terminal states never transition again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Filled
                | OrderStatus::Cancelled
                | OrderStatus::Rejected
                | OrderStatus::FailedInconsistent
        )
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderStatus::New => write!(f, "NEW"),
            OrderStatus::Active => write!(f, "ACTIVE"),
            OrderStatus::PartiallyFilled => write!(f, "PARTIALLY_FILLED"),
            OrderStatus::Filled => write!(f, "FILLED"),
            OrderStatus::Cancelled => write!(f, "CANCELLED"),
            OrderStatus::Rejected => write!(f, "REJECTED"),
            OrderStatus::FailedInconsistent => write!(f, "FAILED_INCONSISTENT"),
        }
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "NEW" => Ok(OrderStatus::New),
            "ACTIVE" => Ok(OrderStatus::Active),
            "PARTIALLY_FILLED" => Ok(OrderStatus::PartiallyFilled),
            "FILLED" => Ok(OrderStatus::Filled),
            "CANCELLED" | "CANCELED" => Ok(OrderStatus::Cancelled),
            "REJECTED" => Ok(OrderStatus::Rejected),
            "FAILED_INCONSISTENT" => Ok(OrderStatus::FailedInconsistent),
            other => Err(format!("unknown order status: '{}'", other)),
        }
    }
}

/// Local mirror of an exchange order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub exchange_order_id: String,
    pub client_oid: String,
    pub symbol: String,
    pub side: OrderSide,
    pub order_type: OrderType,
    pub role: OrderRole,
    pub status: OrderStatus,
    pub price: Decimal,
    pub trigger_price: Option<Decimal>,
    pub quantity: Decimal,
    pub filled_quantity: Decimal,
    pub avg_fill_price: Option<Decimal>,
    /// Set on protection orders only; `None` for entries.
    pub parent_order_id: Option<String>,
    /// Shared by exactly the SL/TP pair of one trade; never reused.
    pub oco_group_id: Option<String>,
    pub signal_key: Option<String>,
    pub is_margin: bool,
    pub leverage: Option<u32>,
    pub note: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn notional(&self) -> Decimal {
        self.price * self.quantity
    }
}

/// Exchange-declared formatting metadata for one instrument. Immutable per
/// symbol; refreshed from exchange metadata and cached.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instrument {
    pub symbol: String,
    pub base: String,
    pub quote: String,
    pub price_tick: Decimal,
    pub quantity_tick: Decimal,
    pub min_quantity: Decimal,
    pub price_decimals: u32,
    pub quantity_decimals: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Balance {
    pub asset: String,
    pub total: Decimal,
    pub available: Decimal,
    pub reserved: Decimal,
}

/// Splits an underscore-separated instrument name into `(base, quote)`.
///
/// The exchange names instruments `BTC_USDT`, `ETH_USD` and so on; local
/// grouping (per-base caps, balance lookups) needs the parts.
pub fn split_symbol(symbol: &str) -> Result<(String, String), String> {
    match symbol.split_once('_') {
        Some((base, quote)) if !base.is_empty() && !quote.is_empty() => {
            Ok((base.to_string(), quote.to_string()))
        }
        _ => Err(format!(
            "cannot split instrument name '{}' into base/quote",
            symbol
        )),
    }
}
