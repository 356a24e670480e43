//! Alert-side throttle.
//!
//! Decides whether a computed non-WAIT signal may emit an alert, given the
//! persisted per `(symbol, side, strategy_key)` state. Pure and
//! deterministic: identical inputs always yield the identical decision.

use crate::config::StrategyRules;
use crate::domain::alert::ReasonCode;
use crate::domain::throttle::ThrottleState;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThrottleDecision {
    Allow {
        /// The one-shot `force_next` override was consumed.
        consumed_force_next: bool,
    },
    Blocked {
        reason: ReasonCode,
        detail: String,
    },
}

pub struct AlertThrottle;

impl AlertThrottle {
    pub fn decide(
        state: Option<&ThrottleState>,
        rules: &StrategyRules,
        now: DateTime<Utc>,
        price: Decimal,
    ) -> ThrottleDecision {
        let Some(state) = state else {
            // First emit for this key.
            return ThrottleDecision::Allow {
                consumed_force_next: false,
            };
        };

        if state.force_next {
            return ThrottleDecision::Allow {
                consumed_force_next: true,
            };
        }

        let elapsed = now - state.last_emit_time;
        let cooldown = Duration::minutes(rules.alert_cooldown_minutes);
        // A delta exactly equal to the cooldown is allowed.
        if elapsed < cooldown {
            return ThrottleDecision::Blocked {
                reason: ReasonCode::ThrottledMinTime,
                detail: format!(
                    "last emit {}s ago, cooldown {}s",
                    elapsed.num_seconds(),
                    cooldown.num_seconds()
                ),
            };
        }

        if state.last_emit_price > Decimal::ZERO {
            let change_pct = ((price - state.last_emit_price).abs() / state.last_emit_price)
                * Decimal::ONE_HUNDRED;
            if change_pct < rules.min_price_change_pct {
                return ThrottleDecision::Blocked {
                    reason: ReasonCode::ThrottledMinPriceChange,
                    detail: format!(
                        "price moved {}% since last emit at {}, minimum {}%",
                        change_pct.round_dp(4),
                        state.last_emit_price,
                        rules.min_price_change_pct
                    ),
                };
            }
        }

        ThrottleDecision::Allow {
            consumed_force_next: false,
        }
    }
}
