use crate::domain::types::OrderSide;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SignalSide {
    Buy,
    Sell,
    Wait,
}

impl SignalSide {
    pub fn as_order_side(self) -> Option<OrderSide> {
        match self {
            SignalSide::Buy => Some(OrderSide::Buy),
            SignalSide::Sell => Some(OrderSide::Sell),
            SignalSide::Wait => None,
        }
    }
}

impl fmt::Display for SignalSide {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SignalSide::Buy => write!(f, "BUY"),
            SignalSide::Sell => write!(f, "SELL"),
            SignalSide::Wait => write!(f, "WAIT"),
        }
    }
}

/// Outcome of one evaluation rule, in evaluation order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleCheck {
    pub name: String,
    pub passed: bool,
    pub detail: String,
}

impl RuleCheck {
    pub fn new(name: &str, passed: bool, detail: impl Into<String>) -> Self {
        Self {
            name: name.to_string(),
            passed,
            detail: detail.into(),
        }
    }
}

impl fmt::Display for RuleCheck {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}: {}",
            self.name,
            if self.passed { "pass" } else { "fail" },
            self.detail
        )
    }
}

/// A computed trading signal. Derived, never stored; callers persist the
/// resulting decision on the alert record instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub side: SignalSide,
    /// Rule outcomes in a stable order, for deterministic comparison.
    pub reasons: Vec<RuleCheck>,
    pub computed_at: DateTime<Utc>,
}

impl Signal {
    pub fn wait(reasons: Vec<RuleCheck>, computed_at: DateTime<Utc>) -> Self {
        Self {
            side: SignalSide::Wait,
            reasons,
            computed_at,
        }
    }
}

/// Idempotency token `{symbol}:{side}:{minute-bucket}`.
///
/// Two cycles inside the same minute produce the same key, so a rerun can
/// never place a second order for the same signal.
pub fn signal_key(symbol: &str, side: OrderSide, at: DateTime<Utc>) -> String {
    let minute_bucket = at.timestamp() / 60;
    format!("{}:{}:{}", symbol, side, minute_bucket)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_signal_key_buckets_by_minute() {
        let t0 = Utc.with_ymd_and_hms(2025, 6, 1, 12, 30, 1).unwrap();
        let t1 = Utc.with_ymd_and_hms(2025, 6, 1, 12, 30, 59).unwrap();
        let t2 = Utc.with_ymd_and_hms(2025, 6, 1, 12, 31, 0).unwrap();

        assert_eq!(
            signal_key("BTC_USDT", OrderSide::Buy, t0),
            signal_key("BTC_USDT", OrderSide::Buy, t1)
        );
        assert_ne!(
            signal_key("BTC_USDT", OrderSide::Buy, t1),
            signal_key("BTC_USDT", OrderSide::Buy, t2)
        );
    }

    #[test]
    fn test_signal_key_format() {
        let t = Utc.with_ymd_and_hms(2025, 6, 1, 0, 0, 0).unwrap();
        let key = signal_key("ETH_USDT", OrderSide::Sell, t);
        assert_eq!(key, format!("ETH_USDT:SELL:{}", t.timestamp() / 60));
    }

    #[test]
    fn test_wait_has_no_order_side() {
        assert_eq!(SignalSide::Wait.as_order_side(), None);
        assert_eq!(SignalSide::Buy.as_order_side(), Some(OrderSide::Buy));
    }
}
