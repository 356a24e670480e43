//! Shared harness for integration tests: an application wired to the mock
//! exchange and recording notifier over one in-memory database, plus
//! seeding helpers.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tradeflow::application::system::Application;
use tradeflow::config::{Config, ExchangeEnvConfig, NotifierEnvConfig, OpenTradesScope, PipelineEnvConfig};
use tradeflow::domain::market::MarketSnapshot;
use tradeflow::domain::repositories::{
    AlertRepository, BalanceRepository, MarketDataRepository, OrderRepository,
    ThrottleRepository, WatchlistRepository,
};
use tradeflow::domain::types::{
    Balance, Instrument, Order, OrderRole, OrderSide, OrderStatus, OrderType,
};
use tradeflow::domain::watchlist::{ManualSignals, WatchlistEntry};
use tradeflow::infrastructure::mock::{MockExchange, RecordingNotifier};
use tradeflow::infrastructure::persistence::repositories::{
    SqliteAlertRepository, SqliteBalanceRepository, SqliteMarketDataRepository,
    SqliteOrderRepository, SqliteThrottleRepository, SqliteWatchlistRepository,
};

pub struct TestApp {
    pub app: Application,
    pub exchange: MockExchange,
    pub notifier: RecordingNotifier,
    pub watchlist: Arc<dyn WatchlistRepository>,
    pub market: Arc<dyn MarketDataRepository>,
    pub orders: Arc<dyn OrderRepository>,
    pub alerts: Arc<dyn AlertRepository>,
    pub balances: Arc<dyn BalanceRepository>,
    pub throttles: Arc<dyn ThrottleRepository>,
}

pub fn test_pipeline_config() -> PipelineEnvConfig {
    PipelineEnvConfig {
        monitor_interval: Duration::from_secs(30),
        reconcile_interval: Duration::from_secs(15),
        max_open_trades: 3,
        max_open_trades_scope: OpenTradesScope::PerBase,
        recent_orders_cooldown: Duration::ZERO,
        idempotency_window: Duration::from_secs(24 * 3600),
        portfolio_notional_cap: dec!(10000),
        fill_poll_window: Duration::from_secs(5),
        fill_poll_step: Duration::from_millis(20),
        instrument_cache_ttl: Duration::from_secs(3600),
        order_history_lookback: Duration::from_secs(3600),
    }
}

pub fn test_config() -> Config {
    Config {
        database_url: "sqlite::memory:".to_string(),
        exchange: ExchangeEnvConfig::default(),
        notifier: NotifierEnvConfig::default(),
        pipeline: test_pipeline_config(),
        rules_file: None,
    }
}

/// Write a rules document to a unique temp file and return its path.
pub fn temp_rules_file(contents: &str) -> String {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    let path = std::env::temp_dir().join(format!(
        "tradeflow-rules-{}-{}.toml",
        std::process::id(),
        COUNTER.fetch_add(1, Ordering::Relaxed)
    ));
    std::fs::write(&path, contents).expect("write temp rules file");
    path.to_string_lossy().into_owned()
}

pub async fn build_app(config: Config) -> TestApp {
    let exchange = MockExchange::new();
    let notifier = RecordingNotifier::new();
    let app = Application::build_with(
        config,
        Arc::new(exchange.clone()),
        Arc::new(notifier.clone()),
    )
    .await
    .expect("application builds");

    let pool = app.database.pool.clone();
    TestApp {
        exchange,
        notifier,
        watchlist: Arc::new(SqliteWatchlistRepository::new(pool.clone())),
        market: Arc::new(SqliteMarketDataRepository::new(pool.clone())),
        orders: Arc::new(SqliteOrderRepository::new(pool.clone())),
        alerts: Arc::new(SqliteAlertRepository::new(pool.clone())),
        balances: Arc::new(SqliteBalanceRepository::new(pool.clone())),
        throttles: Arc::new(SqliteThrottleRepository::new(pool)),
        app,
    }
}

pub fn btc_instrument() -> Instrument {
    Instrument {
        symbol: "BTC_USDT".to_string(),
        base: "BTC".to_string(),
        quote: "USDT".to_string(),
        price_tick: dec!(0.5),
        quantity_tick: dec!(0.0001),
        min_quantity: dec!(0.0001),
        price_decimals: 2,
        quantity_decimals: 4,
    }
}

pub fn eth_instrument() -> Instrument {
    Instrument {
        symbol: "ETH_USDT".to_string(),
        base: "ETH".to_string(),
        quote: "USDT".to_string(),
        price_tick: dec!(0.01),
        quantity_tick: dec!(0.001),
        min_quantity: dec!(0.001),
        price_decimals: 2,
        quantity_decimals: 3,
    }
}

pub fn watch_entry(symbol: &str, strategy_key: &str) -> WatchlistEntry {
    WatchlistEntry {
        symbol: symbol.to_string(),
        strategy_key: strategy_key.to_string(),
        alert_enabled: true,
        buy_alert_enabled: true,
        sell_alert_enabled: true,
        trade_enabled: true,
        trade_on_margin: false,
        trade_amount_usd: Some(dec!(100)),
        leverage: None,
        manual_signals: ManualSignals::default(),
        deleted_at: None,
    }
}

/// Snapshot that computes a BUY under swing/conservative.
pub fn buy_snapshot(symbol: &str) -> MarketSnapshot {
    MarketSnapshot {
        symbol: symbol.to_string(),
        price: dec!(50000),
        rsi: Some(dec!(28)),
        ema10: Some(dec!(49800)),
        ma50: Some(dec!(48000)),
        ma200: Some(dec!(45000)),
        ma10w: Some(dec!(47000)),
        atr: Some(dec!(1000)),
        volume: Some(dec!(120)),
        avg_volume: Some(dec!(100)),
        rsi_history: vec![dec!(35), dec!(30), dec!(28)],
        observed_at: chrono::Utc::now(),
        stale: false,
    }
}

/// Snapshot that computes a SELL under swing/conservative.
pub fn sell_snapshot(symbol: &str, price: Decimal) -> MarketSnapshot {
    MarketSnapshot {
        symbol: symbol.to_string(),
        price,
        rsi: Some(dec!(78)),
        ema10: Some(price * dec!(1.02)),
        ma50: Some(price * dec!(0.95)),
        ma200: Some(price * dec!(0.9)),
        ma10w: Some(price * dec!(1.05)),
        atr: Some(price / dec!(50)),
        volume: Some(dec!(150)),
        avg_volume: Some(dec!(100)),
        rsi_history: vec![dec!(70), dec!(75), dec!(78)],
        observed_at: chrono::Utc::now(),
        stale: false,
    }
}

pub fn usdt_balance(available: Decimal) -> Balance {
    Balance {
        asset: "USDT".to_string(),
        total: available,
        available,
        reserved: Decimal::ZERO,
    }
}

/// A non-terminal order row for seeding.
pub fn open_order(
    exchange_order_id: &str,
    symbol: &str,
    role: OrderRole,
    side: OrderSide,
) -> Order {
    let now = chrono::Utc::now();
    Order {
        exchange_order_id: exchange_order_id.to_string(),
        client_oid: format!("oid-{}", exchange_order_id),
        symbol: symbol.to_string(),
        side,
        order_type: match role {
            OrderRole::Entry => OrderType::Limit,
            OrderRole::StopLoss => OrderType::StopLimit,
            OrderRole::TakeProfit => OrderType::TakeProfitLimit,
        },
        role,
        status: OrderStatus::Active,
        price: dec!(50000),
        trigger_price: None,
        quantity: dec!(0.002),
        filled_quantity: Decimal::ZERO,
        avg_fill_price: None,
        parent_order_id: None,
        oco_group_id: None,
        signal_key: None,
        is_margin: false,
        leverage: None,
        note: None,
        created_at: now,
        updated_at: now,
    }
}

/// Seed the standard BTC scenario: watchlist entry, BUY snapshot, balances
/// and instrument metadata.
pub async fn seed_btc_buy(test: &TestApp) {
    test.watchlist
        .upsert(&watch_entry("BTC_USDT", "swing/conservative"))
        .await
        .unwrap();
    test.market.upsert(&buy_snapshot("BTC_USDT")).await.unwrap();
    test.balances
        .replace_all(&[usdt_balance(dec!(1000))])
        .await
        .unwrap();
    test.exchange.set_instruments(vec![btc_instrument()]).await;
}
