//! Alert throttle behavior across monitor cycles.

mod common;

use common::*;
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal_macros::dec;
use tradeflow::domain::alert::{DecisionType, ReasonCode};
use tradeflow::domain::types::OrderSide;

fn epoch() -> chrono::DateTime<Utc> {
    chrono::DateTime::<Utc>::from_timestamp_millis(0).unwrap()
}

/// A conservative strategy with a 2-minute cooldown and 1% price gate.
fn short_cooldown_rules() -> String {
    temp_rules_file(
        r#"
        [strategies.swing.conservative]
        rsi_buy_below = 30
        rsi_sell_above = 70
        require_ma_reversal_for_sell = true
        volume_min_ratio = 1.0
        min_price_change_pct = 1.0
        alert_cooldown_minutes = 2
        atr_multiplier_sl = 1.5
        risk_reward = 1.0
        "#,
    )
}

#[tokio::test]
async fn test_sell_throttled_by_min_price_change() {
    let mut config = test_config();
    config.rules_file = Some(short_cooldown_rules());
    let test = build_app(config).await;

    test.watchlist
        .upsert(&watch_entry("ETH_USDT", "swing/conservative"))
        .await
        .unwrap();
    test.market
        .upsert(&sell_snapshot("ETH_USDT", dec!(3010)))
        .await
        .unwrap();
    test.balances
        .replace_all(&[usdt_balance(dec!(1000))])
        .await
        .unwrap();
    test.exchange.set_instruments(vec![eth_instrument()]).await;

    // Previous emit three minutes ago at 3,000: past the cooldown, but
    // 3,010 is only +0.33%.
    let emitted_at = Utc::now() - ChronoDuration::minutes(3);
    test.throttles
        .record_emit(
            "ETH_USDT",
            OrderSide::Sell,
            "swing/conservative",
            emitted_at,
            dec!(3000),
        )
        .await
        .unwrap();

    test.app.monitor.run_cycle().await.unwrap();

    let alert = test
        .alerts
        .latest_for("ETH_USDT", OrderSide::Sell, epoch())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(alert.decision_type, DecisionType::Skipped);
    assert_eq!(alert.reason_code, Some(ReasonCode::ThrottledMinPriceChange));

    // Throttle state unchanged by the blocked emit.
    let state = test
        .throttles
        .get("ETH_USDT", OrderSide::Sell, "swing/conservative")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(state.last_emit_price, dec!(3000));
    assert_eq!(state.last_emit_time.timestamp(), emitted_at.timestamp());

    // Nothing was submitted.
    assert!(test.exchange.create_requests().await.is_empty());
}

#[tokio::test]
async fn test_sell_throttled_by_cooldown() {
    let mut config = test_config();
    config.rules_file = Some(short_cooldown_rules());
    let test = build_app(config).await;

    test.watchlist
        .upsert(&watch_entry("ETH_USDT", "swing/conservative"))
        .await
        .unwrap();
    test.market
        .upsert(&sell_snapshot("ETH_USDT", dec!(3500)))
        .await
        .unwrap();
    test.exchange.set_instruments(vec![eth_instrument()]).await;

    // One minute ago, inside the 2-minute cooldown, price change is large.
    test.throttles
        .record_emit(
            "ETH_USDT",
            OrderSide::Sell,
            "swing/conservative",
            Utc::now() - ChronoDuration::minutes(1),
            dec!(3000),
        )
        .await
        .unwrap();

    test.app.monitor.run_cycle().await.unwrap();

    let alert = test
        .alerts
        .latest_for("ETH_USDT", OrderSide::Sell, epoch())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(alert.reason_code, Some(ReasonCode::ThrottledMinTime));
}

#[tokio::test]
async fn test_force_next_overrides_throttle_once() {
    let mut config = test_config();
    config.rules_file = Some(short_cooldown_rules());
    let test = build_app(config).await;

    test.watchlist
        .upsert(&watch_entry("ETH_USDT", "swing/conservative"))
        .await
        .unwrap();
    test.market
        .upsert(&sell_snapshot("ETH_USDT", dec!(3010)))
        .await
        .unwrap();
    test.balances
        .replace_all(&[usdt_balance(dec!(1000))])
        .await
        .unwrap();
    test.exchange.set_instruments(vec![eth_instrument()]).await;

    test.throttles
        .record_emit(
            "ETH_USDT",
            OrderSide::Sell,
            "swing/conservative",
            Utc::now() - ChronoDuration::minutes(3),
            dec!(3000),
        )
        .await
        .unwrap();
    test.throttles
        .set_force_next("ETH_USDT", OrderSide::Sell, "swing/conservative")
        .await
        .unwrap();

    test.app.monitor.run_cycle().await.unwrap();

    // The alert went through despite the small price change.
    let alert = test
        .alerts
        .latest_for("ETH_USDT", OrderSide::Sell, epoch())
        .await
        .unwrap()
        .unwrap();
    assert_ne!(alert.decision_type, DecisionType::Pending);
    assert_ne!(alert.reason_code, Some(ReasonCode::ThrottledMinPriceChange));

    // force_next was consumed and the emit recorded.
    let state = test
        .throttles
        .get("ETH_USDT", OrderSide::Sell, "swing/conservative")
        .await
        .unwrap()
        .unwrap();
    assert!(!state.force_next);
    assert_eq!(state.last_emit_price, dec!(3010));
}
