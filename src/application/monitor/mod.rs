//! The signal monitor loop.
//!
//! At a fixed cadence the monitor takes the cross-process run lock, walks
//! the active watchlist and drives each symbol through evaluation, throttle,
//! alert emission, the order gate and placement. A symbol failure becomes a
//! decision trace, never a dead cycle; any alert still PENDING when the
//! cycle ends is stamped by the safety-net sweep.

pub mod evaluator;
pub mod throttle;

use crate::application::gate::{DecisionGate, GateContext, GateDecision};
use crate::application::instruments::InstrumentCache;
use crate::application::monitor::evaluator::SignalEvaluator;
use crate::application::monitor::throttle::{AlertThrottle, ThrottleDecision};
use crate::application::trace::DecisionTraceWriter;
use crate::application::trading::placer::{EntryRequest, OrderPlacer};
use crate::application::trading::protection::ProtectionManager;
use crate::config::{OpenTradesScope, PipelineEnvConfig, RulesBook};
use crate::domain::alert::{DecisionTrace, ReasonCode};
use crate::domain::market::MarketSnapshot;
use crate::domain::outcome::PlacementOutcome;
use crate::domain::ports::Notifier;
use crate::domain::repositories::{
    AlertRepository, BalanceRepository, MarketDataRepository, NewAlert, OrderRepository, RunLock,
    ThrottleRepository, WatchlistRepository,
};
use crate::domain::signal::{Signal, signal_key};
use crate::domain::types::{OrderSide, split_symbol};
use crate::domain::watchlist::WatchlistEntry;
use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;
use tokio::time::{self, MissedTickBehavior};
use tracing::{info, warn};

pub struct SignalMonitor {
    watchlist: Arc<dyn WatchlistRepository>,
    market: Arc<dyn MarketDataRepository>,
    orders: Arc<dyn OrderRepository>,
    alerts: Arc<dyn AlertRepository>,
    throttles: Arc<dyn ThrottleRepository>,
    balances: Arc<dyn BalanceRepository>,
    instruments: Arc<InstrumentCache>,
    rules: Arc<RulesBook>,
    placer: Arc<OrderPlacer>,
    protection: Arc<ProtectionManager>,
    trace: Arc<DecisionTraceWriter>,
    notifier: Arc<dyn Notifier>,
    run_lock: Arc<dyn RunLock>,
    config: PipelineEnvConfig,
    host: String,
    run_counter: AtomicU64,
    startup_summary_emitted: AtomicBool,
}

impl SignalMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        watchlist: Arc<dyn WatchlistRepository>,
        market: Arc<dyn MarketDataRepository>,
        orders: Arc<dyn OrderRepository>,
        alerts: Arc<dyn AlertRepository>,
        throttles: Arc<dyn ThrottleRepository>,
        balances: Arc<dyn BalanceRepository>,
        instruments: Arc<InstrumentCache>,
        rules: Arc<RulesBook>,
        placer: Arc<OrderPlacer>,
        protection: Arc<ProtectionManager>,
        trace: Arc<DecisionTraceWriter>,
        notifier: Arc<dyn Notifier>,
        run_lock: Arc<dyn RunLock>,
        config: PipelineEnvConfig,
    ) -> Self {
        Self {
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
            config,
            host: std::env::var("HOSTNAME").unwrap_or_else(|_| "local".to_string()),
            run_counter: AtomicU64::new(0),
            startup_summary_emitted: AtomicBool::new(false),
        }
    }

    pub async fn run(self: Arc<Self>) {
        info!(
            "SignalMonitor started (interval {:?})",
            self.config.monitor_interval
        );
        let mut ticker = time::interval(self.config.monitor_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            if let Err(e) = self.run_cycle().await {
                warn!("Monitor cycle failed: {:#}", e);
            }
        }
    }

    /// One full cycle. Public so `--once` mode and tests can drive it.
    pub async fn run_cycle(&self) -> Result<()> {
        let pid = std::process::id();
        let run_id = format!("{}-{}", pid, self.run_counter.fetch_add(1, Ordering::Relaxed));
        let holder = format!("{}#{}", self.host, pid);

        if !self.run_lock.try_acquire(&holder).await? {
            info!(run_id = %run_id, pid, host = %self.host, "RUN_LOCKED");
            return Ok(());
        }

        info!(run_id = %run_id, pid, host = %self.host, "RUN_START");
        let started = Instant::now();

        let result = self.run_cycle_locked(&run_id, started).await;

        // The safety net and the lock release run on every path out.
        match self.trace.sweep_pending(&run_id).await {
            Ok(0) => {}
            Ok(n) => warn!(run_id = %run_id, "Safety net stamped {} pending alerts", n),
            Err(e) => warn!(run_id = %run_id, "Safety-net sweep failed: {:#}", e),
        }
        self.run_lock.release(&holder).await?;

        info!(
            run_id = %run_id,
            pid,
            host = %self.host,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "RUN_END"
        );
        result
    }

    async fn run_cycle_locked(&self, run_id: &str, started: Instant) -> Result<()> {
        let entries = self.watchlist.active_entries().await?;

        if !self.startup_summary_emitted.swap(true, Ordering::Relaxed) {
            self.emit_startup_summary(&entries);
        }

        for entry in &entries {
            // Soft deadline: one tick interval. Whatever is left waits for
            // the next cycle.
            if started.elapsed() >= self.config.monitor_interval {
                warn!(
                    run_id = %run_id,
                    "Cycle deadline reached; deferring remaining symbols ({} processed so far)",
                    entries.iter().position(|e| e.symbol == entry.symbol).unwrap_or(0)
                );
                break;
            }

            if let Err(e) = self.process_symbol(entry, run_id).await {
                warn!(
                    run_id = %run_id,
                    symbol = %entry.symbol,
                    "Symbol processing failed: {:#}", e
                );
                // Convert the failure into a trace rather than losing it.
                let trace = DecisionTrace::new(
                    ReasonCode::ExchangeErrorUnknown,
                    format!("symbol processing failed: {:#}", e),
                );
                let price = self
                    .market
                    .latest(&entry.symbol)
                    .await
                    .ok()
                    .flatten()
                    .map(|s| s.price)
                    .unwrap_or_default();
                if let Err(stamp_err) = self
                    .trace
                    .stamp_latest(
                        &entry.symbol,
                        OrderSide::Buy,
                        &entry.strategy_key,
                        price,
                        run_id,
                        &trace,
                    )
                    .await
                {
                    warn!("Failed to stamp failure trace: {:#}", stamp_err);
                }
            }
        }
        Ok(())
    }

    fn emit_startup_summary(&self, entries: &[WatchlistEntry]) {
        let enabled = entries.iter().filter(|e| e.alert_enabled).count();
        for entry in entries {
            info!(
                symbol = %entry.symbol,
                alert_enabled = entry.alert_enabled,
                buy_alerts = entry.buy_alert_enabled,
                sell_alerts = entry.sell_alert_enabled,
                trade_enabled = entry.trade_enabled,
                "STARTUP_ALERT_CONFIG"
            );
        }
        info!(
            total = entries.len(),
            enabled,
            disabled = entries.len() - enabled,
            source = "db",
            "STARTUP_ALERT_CONFIG summary"
        );
    }

    async fn process_symbol(&self, entry: &WatchlistEntry, run_id: &str) -> Result<()> {
        let now = Utc::now();

        let Some(snapshot) = self.market.latest(&entry.symbol).await? else {
            info!(symbol = %entry.symbol, "ALERT_CHECK no market snapshot");
            let trace = DecisionTrace::new(ReasonCode::DataMissing, "no market snapshot");
            self.trace
                .stamp_latest(
                    &entry.symbol,
                    OrderSide::Buy,
                    &entry.strategy_key,
                    Decimal::ZERO,
                    run_id,
                    &trace,
                )
                .await?;
            return Ok(());
        };

        let Some(rules) = self.rules.rules_for(&entry.strategy_key) else {
            let trace = DecisionTrace::new(
                ReasonCode::DataMissing,
                format!("unknown strategy key '{}'", entry.strategy_key),
            );
            self.trace
                .stamp_latest(
                    &entry.symbol,
                    OrderSide::Buy,
                    &entry.strategy_key,
                    snapshot.price,
                    run_id,
                    &trace,
                )
                .await?;
            return Ok(());
        };

        let signal = SignalEvaluator::evaluate(&snapshot, rules, &entry.manual_signals, now);
        info!(
            symbol = %entry.symbol,
            side = %signal.side,
            stale = snapshot.stale,
            "ALERT_CHECK"
        );

        let Some(side) = signal.side.as_order_side() else {
            // WAIT from missing indicators is a traced skip; a plain WAIT is
            // just a quiet cycle for the symbol.
            if signal
                .reasons
                .iter()
                .any(|r| r.name.starts_with("MISSING_INDICATOR_"))
            {
                let names: Vec<_> = signal.reasons.iter().map(|r| r.name.clone()).collect();
                let trace = DecisionTrace::new(
                    ReasonCode::DataMissing,
                    format!("missing indicators: {}", names.join(", ")),
                )
                .with_context(serde_json::json!({ "reasons": names }));
                self.trace
                    .stamp_latest(
                        &entry.symbol,
                        OrderSide::Buy,
                        &entry.strategy_key,
                        snapshot.price,
                        run_id,
                        &trace,
                    )
                    .await?;
            }
            return Ok(());
        };

        if !entry.alert_allowed_for(side) {
            return Ok(());
        }

        // Alert-side throttle.
        let throttle_state = self
            .throttles
            .get(&entry.symbol, side, &entry.strategy_key)
            .await?;
        match AlertThrottle::decide(throttle_state.as_ref(), rules, now, snapshot.price) {
            ThrottleDecision::Blocked { reason, detail } => {
                let alert_id = self
                    .alerts
                    .insert(&NewAlert {
                        symbol: entry.symbol.clone(),
                        side,
                        strategy_key: entry.strategy_key.clone(),
                        price_at_emit: snapshot.price,
                        run_id: run_id.to_string(),
                        created_at: now,
                    })
                    .await?;
                self.trace
                    .stamp(alert_id, &DecisionTrace::new(reason, detail))
                    .await?;
                return Ok(());
            }
            ThrottleDecision::Allow {
                consumed_force_next,
            } => {
                if consumed_force_next {
                    self.throttles
                        .clear_force_next(&entry.symbol, side, &entry.strategy_key)
                        .await?;
                }
            }
        }

        // Emit the alert, then immediately walk it through the order gate.
        let alert_id = self
            .alerts
            .insert(&NewAlert {
                symbol: entry.symbol.clone(),
                side,
                strategy_key: entry.strategy_key.clone(),
                price_at_emit: snapshot.price,
                run_id: run_id.to_string(),
                created_at: now,
            })
            .await?;
        info!(symbol = %entry.symbol, side = %side, alert_id, "ALERT_ALLOWED");

        self.throttles
            .record_emit(&entry.symbol, side, &entry.strategy_key, now, snapshot.price)
            .await?;

        self.notifier
            .send(
                &format!(
                    "{} signal for {} at {} ({})",
                    side, entry.symbol, snapshot.price, entry.strategy_key
                ),
                "signal-monitor",
            )
            .await;

        self.decide_and_place(entry, rules, &snapshot, &signal, side, alert_id)
            .await
    }

    async fn decide_and_place(
        &self,
        entry: &WatchlistEntry,
        rules: &crate::config::StrategyRules,
        snapshot: &MarketSnapshot,
        signal: &Signal,
        side: OrderSide,
        alert_id: i64,
    ) -> Result<()> {
        let now = Utc::now();

        let (base, quote) = match split_symbol(&entry.symbol) {
            Ok(parts) => parts,
            Err(e) => {
                self.trace
                    .stamp(alert_id, &DecisionTrace::new(ReasonCode::DataMissing, e))
                    .await?;
                return Ok(());
            }
        };

        let open_take_profits = match self.config.max_open_trades_scope {
            OpenTradesScope::PerBase => self.orders.count_open_take_profits_by_base(&base).await?,
            OpenTradesScope::PerSymbol => {
                self.orders
                    .count_open_take_profits_by_symbol(&entry.symbol)
                    .await?
            }
        };
        let cooldown_since = now
            - ChronoDuration::from_std(self.config.recent_orders_cooldown)
                .unwrap_or(ChronoDuration::minutes(5));
        let recent_order_exists = self
            .orders
            .has_order_for_base_since(&base, cooldown_since)
            .await?;

        let key = signal_key(&entry.symbol, side, now);
        let idempotency_since = now
            - ChronoDuration::from_std(self.config.idempotency_window)
                .unwrap_or(ChronoDuration::hours(24));
        let duplicate_signal_key = self
            .orders
            .signal_key_exists_since(&key, idempotency_since)
            .await?;

        let open_notional = self.orders.open_entry_notional().await?;
        let available_quote = self
            .balances
            .get(&quote)
            .await?
            .map(|b| b.available)
            .unwrap_or(Decimal::ZERO);
        let available_base = self
            .balances
            .get(&base)
            .await?
            .map(|b| b.available)
            .unwrap_or(Decimal::ZERO);

        let report = DecisionGate::evaluate(&GateContext {
            symbol: entry.symbol.clone(),
            base,
            quote,
            side,
            price: snapshot.price,
            trade_enabled: entry.trade_enabled,
            alert_enabled_for_side: entry.alert_allowed_for(side),
            trade_amount_usd: entry.trade_amount_usd,
            open_take_profits,
            recent_order_exists,
            duplicate_signal_key,
            open_notional,
            available_quote,
            available_base,
            max_open_trades: self.config.max_open_trades,
            portfolio_notional_cap: self.config.portfolio_notional_cap,
        });

        for check in &report.checks {
            info!(
                symbol = %entry.symbol,
                "GUARD {} {}",
                check.name,
                if check.passed { "passed" } else { "blocked" }
            );
        }

        let notional = match report.decision {
            GateDecision::Skip { reason, ref message } => {
                self.trace
                    .stamp(
                        alert_id,
                        &DecisionTrace::new(reason, message.clone())
                            .with_context(report.context()),
                    )
                    .await?;
                return Ok(());
            }
            GateDecision::Allow { notional } => notional,
        };

        let Some(instrument) = self.instruments.get(&entry.symbol).await? else {
            self.trace
                .stamp(
                    alert_id,
                    &DecisionTrace::new(
                        ReasonCode::DataMissing,
                        "instrument metadata unavailable",
                    ),
                )
                .await?;
            return Ok(());
        };

        let outcome = self
            .placer
            .place_entry(EntryRequest {
                entry,
                instrument: &instrument,
                side,
                notional,
                last_price: snapshot.price,
                signal_key: key,
            })
            .await?;

        match outcome {
            PlacementOutcome::Placed(order) => {
                self.trace
                    .stamp(
                        alert_id,
                        &DecisionTrace::new(ReasonCode::ExecOrderPlaced, "entry order placed")
                            .with_context(serde_json::json!({
                                "quantity": order.quantity.to_string(),
                                "price": order.price.to_string(),
                                "signal_reasons": signal
                                    .reasons
                                    .iter()
                                    .map(|r| r.to_string())
                                    .collect::<Vec<_>>(),
                            }))
                            .with_order_id(order.exchange_order_id.clone()),
                    )
                    .await?;

                // Fill watching and SL/TP creation run off-cycle.
                let protection = self.protection.clone();
                let rules = rules.clone();
                let atr = snapshot.atr;
                tokio::spawn(async move {
                    if let Err(e) = protection
                        .await_fill_and_protect(&order, atr, &rules, &instrument)
                        .await
                    {
                        warn!(
                            "Protection task for {} failed: {:#}",
                            order.exchange_order_id, e
                        );
                    }
                });
            }
            PlacementOutcome::Skipped { reason, context } => {
                self.trace
                    .stamp(
                        alert_id,
                        &DecisionTrace::new(reason, "order skipped before submission")
                            .with_context(context),
                    )
                    .await?;
            }
            PlacementOutcome::Failed {
                reason,
                message,
                error_snippet,
            } => {
                let mut trace = DecisionTrace::new(reason, message);
                if let Some(snippet) = error_snippet {
                    trace = trace.with_error_snippet(snippet);
                }
                self.trace.stamp(alert_id, &trace).await?;
            }
            PlacementOutcome::Blocked { reason, message } => {
                self.trace
                    .stamp(alert_id, &DecisionTrace::new(reason, message))
                    .await?;
            }
        }
        Ok(())
    }
}
