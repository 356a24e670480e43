//! Pure signal evaluation: market snapshot + strategy rules -> Signal.
//!
//! The reasons list is built in a fixed order (BUY rules, then SELL rules)
//! so traces compare deterministically. A missing required indicator always
//! produces WAIT with a `MISSING_INDICATOR_*` reason; it never defaults.

use crate::config::StrategyRules;
use crate::domain::market::MarketSnapshot;
use crate::domain::signal::{RuleCheck, Signal, SignalSide};
use crate::domain::watchlist::ManualSignals;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

/// Minimum MA50-below-EMA10 divergence counting as a reversal.
const MA_REVERSAL_MARGIN: Decimal = dec!(0.005);

pub struct SignalEvaluator;

impl SignalEvaluator {
    pub fn evaluate(
        snapshot: &MarketSnapshot,
        rules: &StrategyRules,
        manual: &ManualSignals,
        now: DateTime<Utc>,
    ) -> Signal {
        // Operator overrides supersede computed values. Buy wins when both
        // are set. The throttle still applies downstream.
        if manual.buy {
            return Signal {
                side: SignalSide::Buy,
                reasons: vec![RuleCheck::new(
                    "MANUAL_OVERRIDE",
                    true,
                    "operator buy signal set",
                )],
                computed_at: now,
            };
        }
        if manual.sell {
            return Signal {
                side: SignalSide::Sell,
                reasons: vec![RuleCheck::new(
                    "MANUAL_OVERRIDE",
                    true,
                    "operator sell signal set",
                )],
                computed_at: now,
            };
        }

        let missing = Self::missing_indicators(snapshot, rules);
        if !missing.is_empty() {
            return Signal::wait(missing, now);
        }

        let buy_checks = Self::buy_checks(snapshot, rules);
        let sell_checks = Self::sell_checks(snapshot, rules);

        let buy = buy_checks.iter().all(|c| c.passed);
        let sell = sell_checks.iter().all(|c| c.passed);

        let mut reasons = buy_checks;
        reasons.extend(sell_checks);

        let side = if buy {
            SignalSide::Buy
        } else if sell {
            SignalSide::Sell
        } else {
            SignalSide::Wait
        };

        Signal {
            side,
            reasons,
            computed_at: now,
        }
    }

    fn missing_indicators(snapshot: &MarketSnapshot, rules: &StrategyRules) -> Vec<RuleCheck> {
        let mut missing = Vec::new();
        let mut record = |name: &str| {
            missing.push(RuleCheck::new(
                &format!("MISSING_INDICATOR_{}", name),
                false,
                "required indicator absent from snapshot",
            ));
        };

        if snapshot.rsi.is_none() {
            record("RSI");
        }
        if snapshot.volume_ratio().is_none() {
            record("VOLUME");
        }
        if rules.require_price_above_ma200 && snapshot.ma200.is_none() {
            record("MA200");
        }
        if rules.require_price_above_ma50 && snapshot.ma50.is_none() {
            record("MA50");
        }
        if rules.require_rsi_cross_up && snapshot.rsi_history.is_empty() {
            record("RSI_HISTORY");
        }
        if rules.require_ma_reversal_for_sell
            && (snapshot.ema10.is_none() || snapshot.ma50.is_none())
            && snapshot.ma10w.is_none()
        {
            record("MA_REVERSAL");
        }
        missing
    }

    fn buy_checks(snapshot: &MarketSnapshot, rules: &StrategyRules) -> Vec<RuleCheck> {
        let mut checks = Vec::new();

        // Guarded by missing_indicators above.
        let Some(rsi) = snapshot.rsi else {
            return checks;
        };
        let Some(volume_ratio) = snapshot.volume_ratio() else {
            return checks;
        };

        checks.push(RuleCheck::new(
            "BUY_RSI_BELOW",
            rsi < rules.rsi_buy_below,
            format!("rsi {} vs buy threshold {}", rsi, rules.rsi_buy_below),
        ));

        if rules.require_price_above_ma200
            && let Some(ma200) = snapshot.ma200
        {
            checks.push(RuleCheck::new(
                "BUY_PRICE_ABOVE_MA200",
                snapshot.price > ma200,
                format!("price {} vs ma200 {}", snapshot.price, ma200),
            ));
        }

        if rules.require_price_above_ma50
            && let Some(ma50) = snapshot.ma50
        {
            checks.push(RuleCheck::new(
                "BUY_PRICE_ABOVE_MA50",
                snapshot.price > ma50,
                format!("price {} vs ma50 {}", snapshot.price, ma50),
            ));
        }

        checks.push(RuleCheck::new(
            "BUY_VOLUME_CONFIRMED",
            volume_ratio >= rules.volume_min_ratio,
            format!(
                "volume ratio {} vs minimum {}",
                volume_ratio, rules.volume_min_ratio
            ),
        ));

        if rules.require_rsi_cross_up
            && let Some(floor) = rules.rsi_cross_floor
        {
            let lookback = rules.rsi_cross_lookback;
            let dipped = snapshot
                .rsi_history
                .iter()
                .rev()
                .take(lookback)
                .any(|v| *v < floor);
            let crossed = dipped && rsi >= floor;
            checks.push(RuleCheck::new(
                "BUY_RSI_CROSS_UP",
                crossed,
                format!(
                    "rsi {} vs floor {}, dipped below within last {} candles: {}",
                    rsi, floor, lookback, dipped
                ),
            ));
        }

        checks
    }

    fn sell_checks(snapshot: &MarketSnapshot, rules: &StrategyRules) -> Vec<RuleCheck> {
        let mut checks = Vec::new();

        let Some(rsi) = snapshot.rsi else {
            return checks;
        };
        let Some(volume_ratio) = snapshot.volume_ratio() else {
            return checks;
        };

        checks.push(RuleCheck::new(
            "SELL_RSI_ABOVE",
            rsi > rules.rsi_sell_above,
            format!("rsi {} vs sell threshold {}", rsi, rules.rsi_sell_above),
        ));

        if rules.require_ma_reversal_for_sell {
            let diverged = match (snapshot.ma50, snapshot.ema10) {
                (Some(ma50), Some(ema10)) if ema10 > Decimal::ZERO => {
                    ma50 < ema10 * (Decimal::ONE - MA_REVERSAL_MARGIN)
                }
                _ => false,
            };
            let below_weekly = match snapshot.ma10w {
                Some(ma10w) => snapshot.price < ma10w,
                None => false,
            };
            checks.push(RuleCheck::new(
                "SELL_MA_REVERSAL",
                diverged || below_weekly,
                format!(
                    "ma50 diverged below ema10: {}, price below 10-week ma: {}",
                    diverged, below_weekly
                ),
            ));
        }

        checks.push(RuleCheck::new(
            "SELL_VOLUME_CONFIRMED",
            volume_ratio >= rules.volume_min_ratio,
            format!(
                "volume ratio {} vs minimum {}",
                volume_ratio, rules.volume_min_ratio
            ),
        ));

        checks
    }
}
