//! Order-side decision gate.
//!
//! A pure function over a consistent snapshot of live state. Guards run in a
//! fixed order and the first failure short-circuits; the full check list is
//! returned so the decision trace can show which guards ran and where the
//! request stopped.

use crate::domain::alert::ReasonCode;
use crate::domain::types::OrderSide;
use rust_decimal::Decimal;
use serde::Serialize;

/// Live state assembled by the monitor just before gating. Collected in one
/// place so the gate itself never suspends.
#[derive(Debug, Clone)]
pub struct GateContext {
    pub symbol: String,
    pub base: String,
    pub quote: String,
    pub side: OrderSide,
    pub price: Decimal,

    // Watchlist flags, re-read to defend against races with the UI.
    pub trade_enabled: bool,
    pub alert_enabled_for_side: bool,
    pub trade_amount_usd: Option<Decimal>,

    // Live counters
    pub open_take_profits: u32,
    pub recent_order_exists: bool,
    pub duplicate_signal_key: bool,
    pub open_notional: Decimal,
    pub available_quote: Decimal,
    pub available_base: Decimal,

    // Limits
    pub max_open_trades: u32,
    pub portfolio_notional_cap: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct GuardCheck {
    pub name: &'static str,
    pub passed: bool,
    pub detail: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GateDecision {
    Allow { notional: Decimal },
    Skip { reason: ReasonCode, message: String },
}

#[derive(Debug, Clone)]
pub struct GateReport {
    pub decision: GateDecision,
    pub checks: Vec<GuardCheck>,
    open_take_profits: u32,
    open_notional: Decimal,
}

impl GateReport {
    /// Structured context for the decision trace.
    pub fn context(&self) -> serde_json::Value {
        serde_json::json!({
            "guards": self.checks,
            "open_positions": self.open_take_profits,
            "open_notional": self.open_notional.to_string(),
        })
    }
}

pub struct DecisionGate;

impl DecisionGate {
    pub fn evaluate(ctx: &GateContext) -> GateReport {
        let mut checks: Vec<GuardCheck> = Vec::new();

        let report = |decision: GateDecision, checks: Vec<GuardCheck>| GateReport {
            decision,
            checks,
            open_take_profits: ctx.open_take_profits,
            open_notional: ctx.open_notional,
        };

        // 1. Trading enabled at all?
        if !Self::guard(&mut checks, "TRADE_ENABLED", ctx.trade_enabled, || {
            "trade_enabled flag is off".to_string()
        }) {
            return report(
                GateDecision::Skip {
                    reason: ReasonCode::TradeDisabled,
                    message: format!("trading disabled for {}", ctx.symbol),
                },
                checks,
            );
        }

        // 2. Alert flag re-check, defending against a concurrent flag flip.
        if !Self::guard(
            &mut checks,
            "ALERT_ENABLED",
            ctx.alert_enabled_for_side,
            || format!("{} alerts disabled for {}", ctx.side, ctx.symbol),
        ) {
            return report(
                GateDecision::Skip {
                    reason: ReasonCode::AlertDisabled,
                    message: format!("{} alerts disabled for {}", ctx.side, ctx.symbol),
                },
                checks,
            );
        }

        // 3. Open-trade cap. Open TPs stand in for outstanding exposure.
        if !Self::guard(
            &mut checks,
            "MAX_OPEN_TRADES",
            ctx.open_take_profits < ctx.max_open_trades,
            || {
                format!(
                    "{} open take-profits vs cap {}",
                    ctx.open_take_profits, ctx.max_open_trades
                )
            },
        ) {
            return report(
                GateDecision::Skip {
                    reason: ReasonCode::MaxOpenTradesReached,
                    message: format!(
                        "{} open positions for {} (cap {})",
                        ctx.open_take_profits, ctx.base, ctx.max_open_trades
                    ),
                },
                checks,
            );
        }

        // 4. Database-scoped cooldown; survives restarts.
        if !Self::guard(
            &mut checks,
            "RECENT_ORDERS_COOLDOWN",
            !ctx.recent_order_exists,
            || format!("an order for {} exists inside the cooldown window", ctx.base),
        ) {
            return report(
                GateDecision::Skip {
                    reason: ReasonCode::RecentOrdersCooldown,
                    message: format!("recent order for {} within cooldown", ctx.base),
                },
                checks,
            );
        }

        // 5. Idempotency on the minute-bucket signal key.
        if !Self::guard(
            &mut checks,
            "IDEMPOTENCY",
            !ctx.duplicate_signal_key,
            || "an order with this signal key already exists".to_string(),
        ) {
            return report(
                GateDecision::Skip {
                    reason: ReasonCode::IdempotencyBlocked,
                    message: "duplicate signal key within the idempotency window".to_string(),
                },
                checks,
            );
        }

        // 6. Portfolio guardrail. Without a configured amount this passes
        //    and the data check below reports the real problem.
        let projected = ctx
            .trade_amount_usd
            .map(|amount| ctx.open_notional + amount);
        if !Self::guard(
            &mut checks,
            "PORTFOLIO_GUARDRAIL",
            projected.is_none_or(|p| p <= ctx.portfolio_notional_cap),
            || {
                format!(
                    "projected open notional {} vs cap {}",
                    projected.unwrap_or(ctx.open_notional),
                    ctx.portfolio_notional_cap
                )
            },
        ) {
            return report(
                GateDecision::Skip {
                    reason: ReasonCode::GuardrailBlocked,
                    message: format!(
                        "portfolio notional cap {} would be exceeded",
                        ctx.portfolio_notional_cap
                    ),
                },
                checks,
            );
        }

        // 7. Free balance: quote for buys, base for sells.
        let funded = match (ctx.trade_amount_usd, ctx.side) {
            (None, _) => true,
            (Some(amount), OrderSide::Buy) => ctx.available_quote >= amount,
            (Some(amount), OrderSide::Sell) => {
                ctx.price > Decimal::ZERO && ctx.available_base >= amount / ctx.price
            }
        };
        if !Self::guard(&mut checks, "AVAILABLE_BALANCE", funded, || {
            match ctx.side {
                OrderSide::Buy => format!(
                    "available {} {} vs required {}",
                    ctx.available_quote,
                    ctx.quote,
                    ctx.trade_amount_usd.unwrap_or_default()
                ),
                OrderSide::Sell => format!(
                    "available {} {} vs required quantity",
                    ctx.available_base, ctx.base
                ),
            }
        }) {
            return report(
                GateDecision::Skip {
                    reason: ReasonCode::InsufficientAvailableBalance,
                    message: format!(
                        "insufficient available {} balance",
                        match ctx.side {
                            OrderSide::Buy => &ctx.quote,
                            OrderSide::Sell => &ctx.base,
                        }
                    ),
                },
                checks,
            );
        }

        // 8. Trade amount must be configured.
        let Some(amount) = ctx.trade_amount_usd else {
            checks.push(GuardCheck {
                name: "TRADE_AMOUNT_CONFIGURED",
                passed: false,
                detail: "trade_amount_usd is not set".to_string(),
            });
            return report(
                GateDecision::Skip {
                    reason: ReasonCode::DataMissing,
                    message: format!("no trade amount configured for {}", ctx.symbol),
                },
                checks,
            );
        };
        checks.push(GuardCheck {
            name: "TRADE_AMOUNT_CONFIGURED",
            passed: true,
            detail: format!("trade amount {}", amount),
        });

        report(GateDecision::Allow { notional: amount }, checks)
    }

    fn guard(
        checks: &mut Vec<GuardCheck>,
        name: &'static str,
        passed: bool,
        detail: impl FnOnce() -> String,
    ) -> bool {
        checks.push(GuardCheck {
            name,
            passed,
            detail: detail(),
        });
        passed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn context() -> GateContext {
        GateContext {
            symbol: "BTC_USDT".to_string(),
            base: "BTC".to_string(),
            quote: "USDT".to_string(),
            side: OrderSide::Buy,
            price: dec!(50000),
            trade_enabled: true,
            alert_enabled_for_side: true,
            trade_amount_usd: Some(dec!(100)),
            open_take_profits: 0,
            recent_order_exists: false,
            duplicate_signal_key: false,
            open_notional: dec!(0),
            available_quote: dec!(1000),
            available_base: dec!(0.5),
            max_open_trades: 3,
            portfolio_notional_cap: dec!(10000),
        }
    }

    fn reason(report: &GateReport) -> Option<ReasonCode> {
        match &report.decision {
            GateDecision::Allow { .. } => None,
            GateDecision::Skip { reason, .. } => Some(*reason),
        }
    }

    #[test]
    fn test_allow_path_returns_notional() {
        let report = DecisionGate::evaluate(&context());
        assert_eq!(
            report.decision,
            GateDecision::Allow {
                notional: dec!(100)
            }
        );
        assert!(report.checks.iter().all(|c| c.passed));
    }

    #[test]
    fn test_trade_disabled_short_circuits_first() {
        let mut ctx = context();
        ctx.trade_enabled = false;
        ctx.duplicate_signal_key = true; // would also fail later

        let report = DecisionGate::evaluate(&ctx);
        assert_eq!(reason(&report), Some(ReasonCode::TradeDisabled));
        assert_eq!(report.checks.len(), 1);
    }

    #[test]
    fn test_alert_disabled_race_defense() {
        let mut ctx = context();
        ctx.alert_enabled_for_side = false;
        assert_eq!(
            reason(&DecisionGate::evaluate(&ctx)),
            Some(ReasonCode::AlertDisabled)
        );
    }

    #[test]
    fn test_max_open_trades_blocks_at_cap() {
        let mut ctx = context();
        ctx.open_take_profits = 3;

        let report = DecisionGate::evaluate(&ctx);
        assert_eq!(reason(&report), Some(ReasonCode::MaxOpenTradesReached));
        assert_eq!(report.context()["open_positions"], 3);
    }

    #[test]
    fn test_open_trades_below_cap_passes() {
        let mut ctx = context();
        ctx.open_take_profits = 2;
        assert!(matches!(
            DecisionGate::evaluate(&ctx).decision,
            GateDecision::Allow { .. }
        ));
    }

    #[test]
    fn test_recent_orders_cooldown() {
        let mut ctx = context();
        ctx.recent_order_exists = true;
        assert_eq!(
            reason(&DecisionGate::evaluate(&ctx)),
            Some(ReasonCode::RecentOrdersCooldown)
        );
    }

    #[test]
    fn test_idempotency_blocked() {
        let mut ctx = context();
        ctx.duplicate_signal_key = true;
        assert_eq!(
            reason(&DecisionGate::evaluate(&ctx)),
            Some(ReasonCode::IdempotencyBlocked)
        );
    }

    #[test]
    fn test_guardrail_on_portfolio_cap() {
        let mut ctx = context();
        ctx.open_notional = dec!(9950);
        assert_eq!(
            reason(&DecisionGate::evaluate(&ctx)),
            Some(ReasonCode::GuardrailBlocked)
        );
    }

    #[test]
    fn test_insufficient_quote_balance_for_buy() {
        let mut ctx = context();
        ctx.available_quote = dec!(50);
        assert_eq!(
            reason(&DecisionGate::evaluate(&ctx)),
            Some(ReasonCode::InsufficientAvailableBalance)
        );
    }

    #[test]
    fn test_insufficient_base_balance_for_sell() {
        let mut ctx = context();
        ctx.side = OrderSide::Sell;
        // 100 USDT at 50,000 needs 0.002 BTC.
        ctx.available_base = dec!(0.001);
        assert_eq!(
            reason(&DecisionGate::evaluate(&ctx)),
            Some(ReasonCode::InsufficientAvailableBalance)
        );

        ctx.available_base = dec!(0.002);
        assert!(matches!(
            DecisionGate::evaluate(&ctx).decision,
            GateDecision::Allow { .. }
        ));
    }

    #[test]
    fn test_missing_trade_amount_is_data_missing() {
        let mut ctx = context();
        ctx.trade_amount_usd = None;
        let report = DecisionGate::evaluate(&ctx);
        assert_eq!(reason(&report), Some(ReasonCode::DataMissing));
        // The earlier guards still ran and passed.
        assert!(report.checks.len() > 1);
    }

    #[test]
    fn test_guard_order_is_fixed() {
        let report = DecisionGate::evaluate(&context());
        let names: Vec<_> = report.checks.iter().map(|c| c.name).collect();
        assert_eq!(
            names,
            vec![
                "TRADE_ENABLED",
                "ALERT_ENABLED",
                "MAX_OPEN_TRADES",
                "RECENT_ORDERS_COOLDOWN",
                "IDEMPOTENCY",
                "PORTFOLIO_GUARDRAIL",
                "AVAILABLE_BALANCE",
                "TRADE_AMOUNT_CONFIGURED",
            ]
        );
    }
}
