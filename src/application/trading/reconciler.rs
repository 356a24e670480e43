//! Exchange reconciler.
//!
//! Pulls balances, completed orders and open orders back into the local
//! mirror on its own cadence. The pass order is a contract: order history
//! runs before open orders so a just-filled order can never be mistaken for
//! a cancelled one, and every candidate for sync-cancellation is re-read
//! from the database before its state changes. A failed pass ends the cycle
//! (the next one retries); it never crashes the process.

use crate::application::instruments::InstrumentCache;
use crate::application::trading::protection::ProtectionManager;
use crate::config::RulesBook;
use crate::domain::ports::{ExchangeClient, ExchangeOrderView, Notifier};
use crate::domain::repositories::{
    BalanceRepository, MarketDataRepository, OrderRepository, WatchlistRepository,
};
use crate::domain::types::{Order, OrderRole, OrderStatus, OrderType};
use anyhow::{Context, Result};
use chrono::{Duration as ChronoDuration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, MissedTickBehavior};
use tracing::{info, warn};

/// Orders younger than this are exempt from sync-cancellation; they may have
/// been placed after the open-orders fetch started.
const PLACEMENT_GRACE_SECONDS: i64 = 60;

pub struct Reconciler {
    exchange: Arc<dyn ExchangeClient>,
    orders: Arc<dyn OrderRepository>,
    balances: Arc<dyn BalanceRepository>,
    watchlist: Arc<dyn WatchlistRepository>,
    market: Arc<dyn MarketDataRepository>,
    instruments: Arc<InstrumentCache>,
    rules: Arc<RulesBook>,
    protection: Arc<ProtectionManager>,
    notifier: Arc<dyn Notifier>,
    interval: Duration,
    history_lookback: Duration,
}

impl Reconciler {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        orders: Arc<dyn OrderRepository>,
        balances: Arc<dyn BalanceRepository>,
        watchlist: Arc<dyn WatchlistRepository>,
        market: Arc<dyn MarketDataRepository>,
        instruments: Arc<InstrumentCache>,
        rules: Arc<RulesBook>,
        protection: Arc<ProtectionManager>,
        notifier: Arc<dyn Notifier>,
        interval: Duration,
        history_lookback: Duration,
    ) -> Self {
        Self {
            exchange,
            orders,
            balances,
            watchlist,
            market,
            instruments,
            rules,
            protection,
            notifier,
            interval,
            history_lookback,
        }
    }

    pub async fn run(&self) {
        info!("Reconciler started (interval {:?})", self.interval);
        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if let Err(e) = self.run_cycle().await {
                warn!("Reconcile cycle incomplete: {:#}", e);
            }
        }
    }

    /// One reconcile cycle: balances, then history, then open orders.
    pub async fn run_cycle(&self) -> Result<()> {
        self.sync_balances().await.context("balance pass failed")?;
        self.sync_order_history()
            .await
            .context("order-history pass failed")?;
        self.sync_open_orders()
            .await
            .context("open-orders pass failed")?;
        Ok(())
    }

    async fn sync_balances(&self) -> Result<()> {
        let balances = self.exchange.get_account_summary().await?;
        self.balances.replace_all(&balances).await?;
        Ok(())
    }

    /// Upsert terminal statuses from recent history. Must run before the
    /// open-orders pass.
    async fn sync_order_history(&self) -> Result<()> {
        let since = Utc::now()
            - ChronoDuration::from_std(self.history_lookback).unwrap_or(ChronoDuration::hours(1));
        let history = self.exchange.get_order_history(since).await?;

        for view in history {
            if !view.status.is_terminal() {
                continue;
            }

            let local = match self.orders.find(&view.exchange_order_id).await? {
                Some(local) => {
                    if local.status.is_terminal() {
                        continue;
                    }
                    self.orders
                        .update_status(
                            &view.exchange_order_id,
                            view.status,
                            Some(view.filled_quantity),
                            view.avg_fill_price,
                        )
                        .await?;
                    info!(
                        "Synced {} {} -> {}",
                        local.role, view.exchange_order_id, view.status
                    );
                    Order {
                        status: view.status,
                        filled_quantity: view.filled_quantity,
                        avg_fill_price: view.avg_fill_price.or(local.avg_fill_price),
                        ..local
                    }
                }
                None => {
                    let imported = Self::import_view(&view);
                    self.orders.insert(&imported).await?;
                    info!(
                        "Imported unknown {} order {} from history ({})",
                        imported.role, imported.exchange_order_id, imported.status
                    );
                    imported
                }
            };

            if local.status == OrderStatus::Filled {
                match local.role {
                    OrderRole::Entry => self.protect_filled_entry(&local).await?,
                    OrderRole::StopLoss | OrderRole::TakeProfit => {
                        self.protection.on_protection_filled(&local).await?;
                    }
                }
            }
        }
        Ok(())
    }

    /// Mirror the open set, then sync-cancel local strays with a second,
    /// fresh confirmation per order.
    async fn sync_open_orders(&self) -> Result<()> {
        let open_views = self.exchange.get_open_orders().await?;
        let open_ids: HashSet<&str> = open_views
            .iter()
            .map(|v| v.exchange_order_id.as_str())
            .collect();

        for view in &open_views {
            match self.orders.find(&view.exchange_order_id).await? {
                Some(local) if local.status == OrderStatus::New => {
                    let status = if view.filled_quantity > rust_decimal::Decimal::ZERO {
                        OrderStatus::PartiallyFilled
                    } else {
                        OrderStatus::Active
                    };
                    self.orders
                        .update_status(
                            &view.exchange_order_id,
                            status,
                            Some(view.filled_quantity),
                            view.avg_fill_price,
                        )
                        .await?;
                }
                Some(_) => {}
                None => {
                    let imported = Self::import_view(view);
                    self.orders.insert(&imported).await?;
                    info!(
                        "Imported unknown open order {} from exchange",
                        view.exchange_order_id
                    );
                }
            }
        }

        let now = Utc::now();
        for stale in self.orders.open_orders().await? {
            if open_ids.contains(stale.exchange_order_id.as_str()) {
                continue;
            }
            if (now - stale.created_at).num_seconds() < PLACEMENT_GRACE_SECONDS {
                continue;
            }

            // Fresh re-read: the history pass (or a concurrent fill) may
            // have already moved this order to a terminal state.
            let Some(current) = self.orders.find(&stale.exchange_order_id).await? else {
                continue;
            };
            if current.status.is_terminal() {
                continue;
            }

            self.orders
                .update_status(&current.exchange_order_id, OrderStatus::Cancelled, None, None)
                .await?;
            self.orders
                .set_note(
                    &current.exchange_order_id,
                    "sync: absent from exchange open orders",
                )
                .await?;
            warn!(
                "Sync-cancelled {} {} (not in exchange open set)",
                current.role, current.exchange_order_id
            );
            self.notifier
                .send(
                    &format!(
                        "Order {} for {} is no longer open on the exchange; marked cancelled",
                        current.exchange_order_id, current.symbol
                    ),
                    "reconciler",
                )
                .await;
        }
        Ok(())
    }

    /// Keep the filled-entry invariant live: an entry that filled after the
    /// monitor's poll window gave up still gets its SL/TP pair here.
    async fn protect_filled_entry(&self, entry: &Order) -> Result<()> {
        if !self
            .orders
            .active_protection_orders(&entry.exchange_order_id)
            .await?
            .is_empty()
        {
            return Ok(());
        }

        let Some(watch) = self.watchlist.find(&entry.symbol).await? else {
            self.orders
                .set_note(
                    &entry.exchange_order_id,
                    "PROTECTION_SKIPPED: symbol no longer on watchlist",
                )
                .await?;
            return Ok(());
        };
        let Some(rules) = self.rules.rules_for(&watch.strategy_key) else {
            self.orders
                .set_note(
                    &entry.exchange_order_id,
                    "PROTECTION_SKIPPED: unknown strategy key",
                )
                .await?;
            return Ok(());
        };
        let Some(instrument) = self.instruments.get(&entry.symbol).await? else {
            self.orders
                .set_note(
                    &entry.exchange_order_id,
                    "PROTECTION_SKIPPED: instrument metadata unavailable",
                )
                .await?;
            return Ok(());
        };

        let atr = self
            .market
            .latest(&entry.symbol)
            .await?
            .and_then(|snapshot| snapshot.atr);

        let fill_price = entry.avg_fill_price.unwrap_or(entry.price);
        let fill_quantity = if entry.filled_quantity > rust_decimal::Decimal::ZERO {
            entry.filled_quantity
        } else {
            entry.quantity
        };

        info!(
            "Reconciler attaching protection to late-filled entry {}",
            entry.exchange_order_id
        );
        self.protection
            .create_protection(entry, fill_price, fill_quantity, atr, rules, &instrument)
            .await
    }

    fn import_view(view: &ExchangeOrderView) -> Order {
        let role = match view.order_type {
            OrderType::StopLimit => OrderRole::StopLoss,
            OrderType::TakeProfitLimit => OrderRole::TakeProfit,
            OrderType::Market | OrderType::Limit => OrderRole::Entry,
        };
        let now = Utc::now();

        Order {
            exchange_order_id: view.exchange_order_id.clone(),
            client_oid: view.client_oid.clone().unwrap_or_default(),
            symbol: view.symbol.clone(),
            side: view.side,
            order_type: view.order_type,
            role,
            status: view.status,
            price: view.price.unwrap_or_default(),
            trigger_price: None,
            quantity: view.quantity,
            filled_quantity: view.filled_quantity,
            avg_fill_price: view.avg_fill_price,
            parent_order_id: None,
            oco_group_id: None,
            signal_key: None,
            is_margin: false,
            leverage: None,
            note: Some("sync: imported from exchange".to_string()),
            created_at: now,
            updated_at: now,
        }
    }
}
