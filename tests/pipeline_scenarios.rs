//! End-to-end monitor cycles against the mock exchange: alert emission,
//! gating, placement and protection.

mod common;

use common::*;
use chrono::Utc;
use rust_decimal_macros::dec;
use std::time::Duration;
use tradeflow::domain::alert::{DecisionType, ReasonCode};
use tradeflow::domain::types::{OrderRole, OrderSide, OrderStatus};

fn epoch() -> chrono::DateTime<Utc> {
    chrono::DateTime::<Utc>::from_timestamp_millis(0).unwrap()
}

#[tokio::test]
async fn test_buy_executes_and_attaches_oco_protection() {
    let test = build_app(test_config()).await;
    seed_btc_buy(&test).await;
    test.exchange.auto_fill(true).await;

    test.app.monitor.run_cycle().await.unwrap();
    // The protection task runs off-cycle.
    tokio::time::sleep(Duration::from_millis(300)).await;

    // Alert stamped EXECUTED with the order id attached.
    let alert = test
        .alerts
        .latest_for("BTC_USDT", OrderSide::Buy, epoch())
        .await
        .unwrap()
        .expect("alert exists");
    assert_eq!(alert.decision_type, DecisionType::Executed);
    assert_eq!(alert.reason_code, Some(ReasonCode::ExecOrderPlaced));
    let entry_id = alert.order_id.clone().expect("order id on alert");

    // Entry order: 100 USDT at 50,000 quantized to 0.002.
    let entry = test.orders.find(&entry_id).await.unwrap().unwrap();
    assert_eq!(entry.role, OrderRole::Entry);
    assert_eq!(entry.quantity, dec!(0.002));
    assert_eq!(entry.status, OrderStatus::Filled);

    // SL and TP share one OCO group and carry the scenario's exact prices.
    let protection = test.orders.active_protection_orders(&entry_id).await.unwrap();
    assert_eq!(protection.len(), 2);
    let sl = protection
        .iter()
        .find(|o| o.role == OrderRole::StopLoss)
        .expect("stop-loss exists");
    let tp = protection
        .iter()
        .find(|o| o.role == OrderRole::TakeProfit)
        .expect("take-profit exists");
    assert_eq!(sl.price, dec!(48500));
    assert_eq!(tp.price, dec!(51500));
    assert!(sl.oco_group_id.is_some());
    assert_eq!(sl.oco_group_id, tp.oco_group_id);
    assert_eq!(sl.parent_order_id.as_deref(), Some(entry_id.as_str()));

    // Wire requests: entry first, then SL, then TP with trigger conditions.
    let requests = test.exchange.create_requests().await;
    assert_eq!(requests.len(), 3);
    assert_eq!(requests[1].trigger_condition.as_deref(), Some("<= 48500.00"));
    assert_eq!(requests[2].trigger_condition.as_deref(), Some(">= 51500.00"));
    assert_eq!(requests[1].quantity, "0.0020");
}

#[tokio::test]
async fn test_buy_blocked_by_max_open_trades() {
    let test = build_app(test_config()).await;
    seed_btc_buy(&test).await;

    // Three live TPs for the BTC base, across different quotes.
    for (i, symbol) in ["BTC_USDT", "BTC_USDT", "BTC_USD"].iter().enumerate() {
        test.orders
            .insert(&open_order(
                &format!("TP-{}", i),
                symbol,
                OrderRole::TakeProfit,
                OrderSide::Sell,
            ))
            .await
            .unwrap();
    }

    test.app.monitor.run_cycle().await.unwrap();

    let alert = test
        .alerts
        .latest_for("BTC_USDT", OrderSide::Buy, epoch())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(alert.decision_type, DecisionType::Skipped);
    assert_eq!(alert.reason_code, Some(ReasonCode::MaxOpenTradesReached));
    assert_eq!(alert.context["open_positions"], 3);

    // No new entry order was submitted.
    assert!(test.exchange.create_requests().await.is_empty());
}

#[tokio::test]
async fn test_authentication_failure_is_terminal_for_the_cycle() {
    let test = build_app(test_config()).await;
    seed_btc_buy(&test).await;
    test.exchange.script_create_results(vec![Some(40101)]).await;

    test.app.monitor.run_cycle().await.unwrap();

    let alert = test
        .alerts
        .latest_for("BTC_USDT", OrderSide::Buy, epoch())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(alert.decision_type, DecisionType::Failed);
    assert_eq!(alert.reason_code, Some(ReasonCode::AuthenticationError));

    // Exactly one submit: no retry, no spot fallback.
    assert_eq!(test.exchange.create_requests().await.len(), 1);

    // One throttled operator notification from the placer.
    let operator_alerts: Vec<_> = test
        .notifier
        .messages()
        .await
        .into_iter()
        .filter(|(origin, _)| origin == "order-placer")
        .collect();
    assert_eq!(operator_alerts.len(), 1);
}

#[tokio::test]
async fn test_duplicate_signal_within_one_minute_is_idempotency_blocked() {
    // A strategy without alert throttling so the second alert reaches the
    // gate, where the shared minute-bucket signal key must stop it.
    let rules_file = temp_rules_file(
        r#"
        [strategies.swing.conservative]
        rsi_buy_below = 30
        rsi_sell_above = 70
        require_price_above_ma200 = true
        volume_min_ratio = 1.0
        min_price_change_pct = 0.0
        alert_cooldown_minutes = 0
        atr_multiplier_sl = 1.5
        risk_reward = 1.0
        "#,
    );
    let mut config = test_config();
    config.rules_file = Some(rules_file);

    let test = build_app(config).await;
    seed_btc_buy(&test).await;

    test.app.monitor.run_cycle().await.unwrap();
    test.app.monitor.run_cycle().await.unwrap();

    // Two alerts exist; the latest is the idempotency-blocked one.
    let second = test
        .alerts
        .latest_for("BTC_USDT", OrderSide::Buy, epoch())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(second.decision_type, DecisionType::Skipped);
    assert_eq!(second.reason_code, Some(ReasonCode::IdempotencyBlocked));

    // Only the first cycle submitted an order.
    assert_eq!(test.exchange.create_requests().await.len(), 1);
}

#[tokio::test]
async fn test_missing_indicators_trace_data_missing() {
    let test = build_app(test_config()).await;
    seed_btc_buy(&test).await;

    let mut snapshot = buy_snapshot("BTC_USDT");
    snapshot.rsi = None;
    test.market.upsert(&snapshot).await.unwrap();

    test.app.monitor.run_cycle().await.unwrap();

    let alert = test
        .alerts
        .latest_for("BTC_USDT", OrderSide::Buy, epoch())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(alert.decision_type, DecisionType::Skipped);
    assert_eq!(alert.reason_code, Some(ReasonCode::DataMissing));
    assert!(test.exchange.create_requests().await.is_empty());
}

#[tokio::test]
async fn test_disabled_master_alert_flag_stays_silent() {
    let test = build_app(test_config()).await;
    seed_btc_buy(&test).await;

    let mut entry = watch_entry("BTC_USDT", "swing/conservative");
    entry.alert_enabled = false;
    test.watchlist.upsert(&entry).await.unwrap();

    test.app.monitor.run_cycle().await.unwrap();

    assert!(test
        .alerts
        .latest_for("BTC_USDT", OrderSide::Buy, epoch())
        .await
        .unwrap()
        .is_none());
    assert!(test.exchange.create_requests().await.is_empty());
}

#[tokio::test]
async fn test_trade_disabled_still_alerts_but_skips_order() {
    let test = build_app(test_config()).await;
    seed_btc_buy(&test).await;

    let mut entry = watch_entry("BTC_USDT", "swing/conservative");
    entry.trade_enabled = false;
    test.watchlist.upsert(&entry).await.unwrap();

    test.app.monitor.run_cycle().await.unwrap();

    let alert = test
        .alerts
        .latest_for("BTC_USDT", OrderSide::Buy, epoch())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(alert.decision_type, DecisionType::Skipped);
    assert_eq!(alert.reason_code, Some(ReasonCode::TradeDisabled));

    // The alert itself still went out through the notifier.
    let signal_alerts: Vec<_> = test
        .notifier
        .messages()
        .await
        .into_iter()
        .filter(|(origin, _)| origin == "signal-monitor")
        .collect();
    assert_eq!(signal_alerts.len(), 1);
}

#[tokio::test]
async fn test_no_pending_alerts_survive_a_cycle() {
    let test = build_app(test_config()).await;
    seed_btc_buy(&test).await;
    test.exchange.auto_fill(true).await;

    test.app.monitor.run_cycle().await.unwrap();

    let alert = test
        .alerts
        .latest_for("BTC_USDT", OrderSide::Buy, epoch())
        .await
        .unwrap()
        .unwrap();
    assert_ne!(alert.decision_type, DecisionType::Pending);
}
