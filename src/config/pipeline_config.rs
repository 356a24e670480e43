//! Pipeline cadences and trading guardrails from environment variables.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Scope of the open-trade cap: count open TPs for the base asset across
/// quotes, or for the exact symbol only.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenTradesScope {
    PerBase,
    PerSymbol,
}

impl FromStr for OpenTradesScope {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "per-base" => Ok(OpenTradesScope::PerBase),
            "per-symbol" => Ok(OpenTradesScope::PerSymbol),
            _ => anyhow::bail!(
                "Invalid MAX_OPEN_TRADES_SCOPE: {}. Must be 'per-base' or 'per-symbol'",
                s
            ),
        }
    }
}

#[derive(Debug, Clone)]
pub struct PipelineEnvConfig {
    // Cadences
    pub monitor_interval: Duration,
    pub reconcile_interval: Duration,

    // Order gate
    pub max_open_trades: u32,
    pub max_open_trades_scope: OpenTradesScope,
    pub recent_orders_cooldown: Duration,
    pub idempotency_window: Duration,
    pub portfolio_notional_cap: Decimal,

    // Protection
    pub fill_poll_window: Duration,
    pub fill_poll_step: Duration,

    // Instrument metadata cache
    pub instrument_cache_ttl: Duration,

    // Reconciler history lookback
    pub order_history_lookback: Duration,
}

impl PipelineEnvConfig {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            monitor_interval: Duration::from_secs(Self::parse_u64("MONITOR_INTERVAL_SECS", 30)?),
            reconcile_interval: Duration::from_secs(Self::parse_u64(
                "RECONCILE_INTERVAL_SECS",
                15,
            )?),
            max_open_trades: Self::parse_u64("MAX_OPEN_TRADES", 3)? as u32,
            max_open_trades_scope: env::var("MAX_OPEN_TRADES_SCOPE")
                .unwrap_or_else(|_| "per-base".to_string())
                .parse()?,
            recent_orders_cooldown: Duration::from_secs(
                Self::parse_u64("RECENT_ORDERS_COOLDOWN_MINUTES", 5)? * 60,
            ),
            idempotency_window: Duration::from_secs(
                Self::parse_u64("IDEMPOTENCY_WINDOW_HOURS", 24)? * 3600,
            ),
            portfolio_notional_cap: Self::parse_decimal("PORTFOLIO_NOTIONAL_CAP_USD", "10000")?,
            fill_poll_window: Duration::from_secs(Self::parse_u64("FILL_POLL_WINDOW_SECS", 30)?),
            fill_poll_step: Duration::from_secs(Self::parse_u64("FILL_POLL_STEP_SECS", 2)?),
            instrument_cache_ttl: Duration::from_secs(
                Self::parse_u64("INSTRUMENT_CACHE_TTL_MINUTES", 360)? * 60,
            ),
            order_history_lookback: Duration::from_secs(
                Self::parse_u64("ORDER_HISTORY_LOOKBACK_MINUTES", 60)? * 60,
            ),
        })
    }

    fn parse_u64(key: &str, default: u64) -> Result<u64> {
        match env::var(key) {
            Ok(v) => v.parse::<u64>().with_context(|| format!("Failed to parse {}", key)),
            Err(_) => Ok(default),
        }
    }

    fn parse_decimal(key: &str, default: &str) -> Result<Decimal> {
        let raw = env::var(key).unwrap_or_else(|_| default.to_string());
        Decimal::from_str(&raw).with_context(|| format!("Failed to parse {}", key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_parsing() {
        assert_eq!(
            "per-base".parse::<OpenTradesScope>().unwrap(),
            OpenTradesScope::PerBase
        );
        assert_eq!(
            "PER-SYMBOL".parse::<OpenTradesScope>().unwrap(),
            OpenTradesScope::PerSymbol
        );
        assert!("per-quote".parse::<OpenTradesScope>().is_err());
    }
}
