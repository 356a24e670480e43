use crate::domain::types::OrderSide;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Final classification of an emitted alert. Every alert leaves `Pending`
/// before the cycle that created it ends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionType {
    Pending,
    Executed,
    Skipped,
    Failed,
    Blocked,
}

impl fmt::Display for DecisionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecisionType::Pending => write!(f, "PENDING"),
            DecisionType::Executed => write!(f, "EXECUTED"),
            DecisionType::Skipped => write!(f, "SKIPPED"),
            DecisionType::Failed => write!(f, "FAILED"),
            DecisionType::Blocked => write!(f, "BLOCKED"),
        }
    }
}

impl FromStr for DecisionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(DecisionType::Pending),
            "EXECUTED" => Ok(DecisionType::Executed),
            "SKIPPED" => Ok(DecisionType::Skipped),
            "FAILED" => Ok(DecisionType::Failed),
            "BLOCKED" => Ok(DecisionType::Blocked),
            other => Err(format!("unknown decision type: '{}'", other)),
        }
    }
}

/// Machine-readable reason attached to a decision, partitioned by decision
/// type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReasonCode {
    // SKIPPED
    MaxOpenTradesReached,
    RecentOrdersCooldown,
    TradeDisabled,
    AlertDisabled,
    DataMissing,
    GuardrailBlocked,
    InsufficientAvailableBalance,
    IdempotencyBlocked,
    DecisionPipelineNotCalled,
    ThrottledMinTime,
    ThrottledMinPriceChange,
    // FAILED
    ExchangeRejected,
    InsufficientFunds,
    AuthenticationError,
    RateLimit,
    Timeout,
    InvalidPriceFormat,
    ExchangeErrorUnknown,
    // EXECUTED
    ExecOrderPlaced,
    // BLOCKED
    ExchangeApiDisabled,
}

impl ReasonCode {
    /// The decision type this code belongs to.
    pub fn decision_type(self) -> DecisionType {
        use ReasonCode::*;
        match self {
            MaxOpenTradesReached | RecentOrdersCooldown | TradeDisabled | AlertDisabled
            | DataMissing | GuardrailBlocked | InsufficientAvailableBalance
            | IdempotencyBlocked | DecisionPipelineNotCalled | ThrottledMinTime
            | ThrottledMinPriceChange => DecisionType::Skipped,
            ExchangeRejected | InsufficientFunds | AuthenticationError | RateLimit | Timeout
            | InvalidPriceFormat | ExchangeErrorUnknown => DecisionType::Failed,
            ExecOrderPlaced => DecisionType::Executed,
            ExchangeApiDisabled => DecisionType::Blocked,
        }
    }
}

impl fmt::Display for ReasonCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use ReasonCode::*;
        let s = match self {
            MaxOpenTradesReached => "MAX_OPEN_TRADES_REACHED",
            RecentOrdersCooldown => "RECENT_ORDERS_COOLDOWN",
            TradeDisabled => "TRADE_DISABLED",
            AlertDisabled => "ALERT_DISABLED",
            DataMissing => "DATA_MISSING",
            GuardrailBlocked => "GUARDRAIL_BLOCKED",
            InsufficientAvailableBalance => "INSUFFICIENT_AVAILABLE_BALANCE",
            IdempotencyBlocked => "IDEMPOTENCY_BLOCKED",
            DecisionPipelineNotCalled => "DECISION_PIPELINE_NOT_CALLED",
            ThrottledMinTime => "THROTTLED_MIN_TIME",
            ThrottledMinPriceChange => "THROTTLED_MIN_PRICE_CHANGE",
            ExchangeRejected => "EXCHANGE_REJECTED",
            InsufficientFunds => "INSUFFICIENT_FUNDS",
            AuthenticationError => "AUTHENTICATION_ERROR",
            RateLimit => "RATE_LIMIT",
            Timeout => "TIMEOUT",
            InvalidPriceFormat => "INVALID_PRICE_FORMAT",
            ExchangeErrorUnknown => "EXCHANGE_ERROR_UNKNOWN",
            ExecOrderPlaced => "EXEC_ORDER_PLACED",
            ExchangeApiDisabled => "EXCHANGE_API_DISABLED",
        };
        write!(f, "{}", s)
    }
}

impl FromStr for ReasonCode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use ReasonCode::*;
        match s {
            "MAX_OPEN_TRADES_REACHED" => Ok(MaxOpenTradesReached),
            "RECENT_ORDERS_COOLDOWN" => Ok(RecentOrdersCooldown),
            "TRADE_DISABLED" => Ok(TradeDisabled),
            "ALERT_DISABLED" => Ok(AlertDisabled),
            "DATA_MISSING" => Ok(DataMissing),
            "GUARDRAIL_BLOCKED" => Ok(GuardrailBlocked),
            "INSUFFICIENT_AVAILABLE_BALANCE" => Ok(InsufficientAvailableBalance),
            "IDEMPOTENCY_BLOCKED" => Ok(IdempotencyBlocked),
            "DECISION_PIPELINE_NOT_CALLED" => Ok(DecisionPipelineNotCalled),
            "THROTTLED_MIN_TIME" => Ok(ThrottledMinTime),
            "THROTTLED_MIN_PRICE_CHANGE" => Ok(ThrottledMinPriceChange),
            "EXCHANGE_REJECTED" => Ok(ExchangeRejected),
            "INSUFFICIENT_FUNDS" => Ok(InsufficientFunds),
            "AUTHENTICATION_ERROR" => Ok(AuthenticationError),
            "RATE_LIMIT" => Ok(RateLimit),
            "TIMEOUT" => Ok(Timeout),
            "INVALID_PRICE_FORMAT" => Ok(InvalidPriceFormat),
            "EXCHANGE_ERROR_UNKNOWN" => Ok(ExchangeErrorUnknown),
            "EXEC_ORDER_PLACED" => Ok(ExecOrderPlaced),
            "EXCHANGE_API_DISABLED" => Ok(ExchangeApiDisabled),
            other => Err(format!("unknown reason code: '{}'", other)),
        }
    }
}

/// The audit stamp applied to an alert record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTrace {
    pub decision_type: DecisionType,
    pub reason_code: ReasonCode,
    pub reason_message: String,
    pub context: serde_json::Value,
    pub order_id: Option<String>,
    pub exchange_error_snippet: Option<String>,
}

impl DecisionTrace {
    pub fn new(reason_code: ReasonCode, reason_message: impl Into<String>) -> Self {
        Self {
            decision_type: reason_code.decision_type(),
            reason_code,
            reason_message: reason_message.into(),
            context: serde_json::Value::Null,
            order_id: None,
            exchange_error_snippet: None,
        }
    }

    pub fn with_context(mut self, context: serde_json::Value) -> Self {
        self.context = context;
        self
    }

    pub fn with_order_id(mut self, order_id: impl Into<String>) -> Self {
        self.order_id = Some(order_id.into());
        self
    }

    pub fn with_error_snippet(mut self, snippet: impl Into<String>) -> Self {
        self.exchange_error_snippet = Some(snippet.into());
        self
    }
}

/// Audit row for one outbound alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: i64,
    pub symbol: String,
    pub side: OrderSide,
    pub strategy_key: String,
    pub price_at_emit: Decimal,
    pub created_at: DateTime<Utc>,
    pub run_id: String,
    pub decision_type: DecisionType,
    pub reason_code: Option<ReasonCode>,
    pub reason_message: Option<String>,
    pub context: serde_json::Value,
    pub order_id: Option<String>,
    pub exchange_error_snippet: Option<String>,
}
