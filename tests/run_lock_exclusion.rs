//! Cross-process run-lock exclusion: two monitors over one database never
//! run a pipeline cycle concurrently.

mod common;

use common::*;
use chrono::Utc;
use std::sync::atomic::{AtomicU64, Ordering};
use tradeflow::domain::repositories::{AlertRepository, RunLock};
use tradeflow::domain::types::OrderSide;
use tradeflow::infrastructure::persistence::SqliteRunLock;

fn epoch() -> chrono::DateTime<Utc> {
    chrono::DateTime::<Utc>::from_timestamp_millis(0).unwrap()
}

fn shared_db_url() -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let path = std::env::temp_dir().join(format!(
        "tradeflow-lock-test-{}-{}.db",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    let _ = std::fs::remove_file(&path);
    format!("sqlite://{}", path.to_string_lossy())
}

#[tokio::test]
async fn test_cycle_skips_while_lock_is_held() {
    let mut config = test_config();
    config.database_url = shared_db_url();
    let test = build_app(config).await;
    seed_btc_buy(&test).await;

    let lock = SqliteRunLock::new(test.app.database.pool.clone());
    assert!(lock.try_acquire("replica-b#999").await.unwrap());

    // The held lock turns the whole cycle into a RUN_LOCKED no-op.
    test.app.monitor.run_cycle().await.unwrap();
    assert!(test
        .alerts
        .latest_for("BTC_USDT", OrderSide::Buy, epoch())
        .await
        .unwrap()
        .is_none());

    lock.release("replica-b#999").await.unwrap();

    test.app.monitor.run_cycle().await.unwrap();
    assert!(test
        .alerts
        .latest_for("BTC_USDT", OrderSide::Buy, epoch())
        .await
        .unwrap()
        .is_some());
}

#[tokio::test]
async fn test_two_replicas_place_at_most_one_entry() {
    let db_url = shared_db_url();

    let mut config_a = test_config();
    config_a.database_url = db_url.clone();
    let replica_a = build_app(config_a).await;
    seed_btc_buy(&replica_a).await;

    let mut config_b = test_config();
    config_b.database_url = db_url;
    let replica_b = build_app(config_b).await;
    replica_b.exchange.set_instruments(vec![btc_instrument()]).await;

    // Drive both monitors concurrently against the shared database. The
    // run lock serializes the cycles; throttle and idempotency state in the
    // shared store keep the loser from double-placing afterwards.
    let (ra, rb) = tokio::join!(
        replica_a.app.monitor.run_cycle(),
        replica_b.app.monitor.run_cycle()
    );
    ra.unwrap();
    rb.unwrap();

    let submitted = replica_a.exchange.create_requests().await.len()
        + replica_b.exchange.create_requests().await.len();
    assert_eq!(submitted, 1, "exactly one entry across both replicas");
}
