//! System orchestrator: wires repositories, exchange, notifier and the two
//! loops together, then spawns them.

use crate::application::instruments::InstrumentCache;
use crate::application::monitor::SignalMonitor;
use crate::application::trace::DecisionTraceWriter;
use crate::application::trading::placer::OrderPlacer;
use crate::application::trading::protection::{ProtectionConfig, ProtectionManager};
use crate::application::trading::reconciler::Reconciler;
use crate::config::Config;
use crate::domain::ports::{ExchangeClient, Notifier};
use crate::domain::repositories::{
    AlertRepository, BalanceRepository, MarketDataRepository, OrderRepository, RunLock,
    ThrottleRepository, WatchlistRepository,
};
use crate::infrastructure::exchange::RestExchangeClient;
use crate::infrastructure::notify::TelegramNotifier;
use crate::infrastructure::persistence::repositories::{
    SqliteAlertRepository, SqliteBalanceRepository, SqliteInstrumentRepository,
    SqliteMarketDataRepository, SqliteOrderRepository, SqliteThrottleRepository,
    SqliteWatchlistRepository,
};
use crate::infrastructure::persistence::{Database, SqliteRunLock};
use anyhow::Result;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;

pub struct SystemHandle {
    pub monitor: Arc<SignalMonitor>,
    pub monitor_task: JoinHandle<()>,
    pub reconciler_task: JoinHandle<()>,
}

impl SystemHandle {
    pub fn shutdown(&self) {
        self.monitor_task.abort();
        self.reconciler_task.abort();
    }
}

pub struct Application {
    pub config: Config,
    pub database: Database,
    pub monitor: Arc<SignalMonitor>,
    pub reconciler: Arc<Reconciler>,
}

impl Application {
    /// Build against the real exchange client and Telegram notifier.
    pub async fn build(config: Config) -> Result<Self> {
        let exchange: Arc<dyn ExchangeClient> = Arc::new(RestExchangeClient::new(
            config.exchange.api_key.clone(),
            config.exchange.api_secret.clone(),
            config.exchange.base_url.clone(),
            config.exchange.request_deadline,
        ));
        let notifier: Arc<dyn Notifier> = Arc::new(TelegramNotifier::from_config(&config.notifier));
        Self::build_with(config, exchange, notifier).await
    }

    /// Build with injected services; tests plug in the mocks here.
    pub async fn build_with(
        config: Config,
        exchange: Arc<dyn ExchangeClient>,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self> {
        info!("Building Tradeflow application...");

        let database = Database::new(&config.database_url).await?;
        let pool = database.pool.clone();

        let watchlist: Arc<dyn WatchlistRepository> =
            Arc::new(SqliteWatchlistRepository::new(pool.clone()));
        let market: Arc<dyn MarketDataRepository> =
            Arc::new(SqliteMarketDataRepository::new(pool.clone()));
        let orders: Arc<dyn OrderRepository> = Arc::new(SqliteOrderRepository::new(pool.clone()));
        let alerts: Arc<dyn AlertRepository> = Arc::new(SqliteAlertRepository::new(pool.clone()));
        let throttles: Arc<dyn ThrottleRepository> =
            Arc::new(SqliteThrottleRepository::new(pool.clone()));
        let balances: Arc<dyn BalanceRepository> =
            Arc::new(SqliteBalanceRepository::new(pool.clone()));
        let run_lock: Arc<dyn RunLock> = Arc::new(SqliteRunLock::new(pool.clone()));

        let rules = Arc::new(config.load_rules()?);
        info!("Strategy rules loaded: {:?}", rules.strategy_keys());

        let instruments = Arc::new(InstrumentCache::new(
            exchange.clone(),
            Arc::new(SqliteInstrumentRepository::new(pool)),
            config.pipeline.instrument_cache_ttl,
        ));

        let trace = Arc::new(DecisionTraceWriter::new(alerts.clone()));
        let placer = Arc::new(OrderPlacer::new(
            exchange.clone(),
            orders.clone(),
            notifier.clone(),
        ));
        let protection = Arc::new(ProtectionManager::new(
            exchange.clone(),
            orders.clone(),
            notifier.clone(),
            ProtectionConfig {
                fill_poll_window: config.pipeline.fill_poll_window,
                fill_poll_step: config.pipeline.fill_poll_step,
            },
        ));

        let reconciler = Arc::new(Reconciler::new(
            exchange.clone(),
            orders.clone(),
            balances.clone(),
            watchlist.clone(),
            market.clone(),
            instruments.clone(),
            rules.clone(),
            protection.clone(),
            notifier.clone(),
            config.pipeline.reconcile_interval,
            config.pipeline.order_history_lookback,
        ));

        let monitor = Arc::new(SignalMonitor::new(
            watchlist,
            market,
            orders,
            alerts,
            throttles,
            balances,
            instruments,
            rules,
            placer,
            protection,
            trace,
            notifier,
            run_lock,
            config.pipeline.clone(),
        ));

        Ok(Self {
            config,
            database,
            monitor,
            reconciler,
        })
    }

    /// Spawn the monitor and reconciler loops.
    pub async fn start(&self) -> Result<SystemHandle> {
        let monitor = self.monitor.clone();
        let monitor_task = tokio::spawn(async move {
            monitor.run().await;
        });

        let reconciler = self.reconciler.clone();
        let reconciler_task = tokio::spawn(async move {
            reconciler.run().await;
        });

        info!("Tradeflow system running.");
        Ok(SystemHandle {
            monitor: self.monitor.clone(),
            monitor_task,
            reconciler_task,
        })
    }
}
