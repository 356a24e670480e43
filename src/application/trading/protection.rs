//! Protection-order manager.
//!
//! After an entry fill this component creates the SL/TP pair as an atomic
//! OCO group: both orders succeed or neither survives. A failed rollback is
//! the one state automation cannot repair; the half-placed order is flagged
//! `FAILED_INCONSISTENT` and a CRITICAL operator alert goes out. The
//! per-parent lock here is in-process only; it prevents double SL/TP
//! creation inside this process and is unrelated to the cross-process run
//! lock.

use crate::config::StrategyRules;
use crate::domain::errors::ExchangeError;
use crate::domain::formatter::{self, CanonicalAmount};
use crate::domain::ports::{CreateOrderRequest, ExchangeClient, Notifier};
use crate::domain::repositories::OrderRepository;
use crate::domain::types::{Instrument, Order, OrderRole, OrderSide, OrderStatus, OrderType};
use anyhow::Result;
use chrono::{Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

/// Sibling lookup window for legacy orders without group or parent markers.
const LEGACY_SIBLING_WINDOW_MINUTES: i64 = 5;

#[derive(Debug, Clone)]
pub struct ProtectionConfig {
    pub fill_poll_window: Duration,
    pub fill_poll_step: Duration,
}

impl Default for ProtectionConfig {
    fn default() -> Self {
        Self {
            fill_poll_window: Duration::from_secs(30),
            fill_poll_step: Duration::from_secs(2),
        }
    }
}

/// Raw (unquantized) SL and TP prices for a fill.
///
/// The stop distance comes from `ATR × atr_multiplier_sl` when ATR is known,
/// else from the fixed percent; the TP distance is the stop distance times
/// the risk:reward ratio. Shorts mirror the direction.
pub fn protection_prices(
    entry_side: OrderSide,
    fill_price: Decimal,
    atr: Option<Decimal>,
    rules: &StrategyRules,
) -> Option<(Decimal, Decimal)> {
    let stop_distance = match (atr, rules.atr_multiplier_sl) {
        (Some(atr), Some(multiplier)) if atr > Decimal::ZERO => atr * multiplier,
        _ => {
            let pct = rules.stop_loss_pct?;
            fill_price * pct / Decimal::ONE_HUNDRED
        }
    };
    if stop_distance <= Decimal::ZERO || stop_distance >= fill_price {
        return None;
    }

    let profit_distance = stop_distance * rules.risk_reward;
    let (sl, tp) = match entry_side {
        OrderSide::Buy => (fill_price - stop_distance, fill_price + profit_distance),
        OrderSide::Sell => (fill_price + stop_distance, fill_price - profit_distance),
    };
    (sl > Decimal::ZERO && tp > Decimal::ZERO).then_some((sl, tp))
}

struct ParentGuard<'a> {
    locks: &'a Mutex<HashSet<String>>,
    key: String,
}

impl Drop for ParentGuard<'_> {
    fn drop(&mut self) {
        self.locks
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.key);
    }
}

pub struct ProtectionManager {
    exchange: Arc<dyn ExchangeClient>,
    orders: Arc<dyn OrderRepository>,
    notifier: Arc<dyn Notifier>,
    config: ProtectionConfig,
    parent_locks: Mutex<HashSet<String>>,
}

impl ProtectionManager {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        orders: Arc<dyn OrderRepository>,
        notifier: Arc<dyn Notifier>,
        config: ProtectionConfig,
    ) -> Self {
        Self {
            exchange,
            orders,
            notifier,
            config,
            parent_locks: Mutex::new(HashSet::new()),
        }
    }

    fn try_lock_parent(&self, parent_order_id: &str) -> Option<ParentGuard<'_>> {
        let mut locks = self.parent_locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks.insert(parent_order_id.to_string()) {
            Some(ParentGuard {
                locks: &self.parent_locks,
                key: parent_order_id.to_string(),
            })
        } else {
            None
        }
    }

    /// Poll the entry fill for a bounded window, then attach protection.
    pub async fn await_fill_and_protect(
        &self,
        entry: &Order,
        atr: Option<Decimal>,
        rules: &StrategyRules,
        instrument: &Instrument,
    ) -> Result<()> {
        let deadline = Instant::now() + self.config.fill_poll_window;

        loop {
            match self.exchange.get_order_detail(&entry.exchange_order_id).await {
                Ok(view) if view.status == OrderStatus::Filled => {
                    let fill_price = view.avg_fill_price.unwrap_or(entry.price);
                    let fill_quantity = if view.filled_quantity > Decimal::ZERO {
                        view.filled_quantity
                    } else {
                        entry.quantity
                    };
                    self.orders
                        .update_status(
                            &entry.exchange_order_id,
                            OrderStatus::Filled,
                            Some(fill_quantity),
                            Some(fill_price),
                        )
                        .await?;
                    info!(
                        "ORDER_FILLED {} {} @ {} ({})",
                        entry.symbol, fill_quantity, fill_price, entry.exchange_order_id
                    );
                    return self
                        .create_protection(entry, fill_price, fill_quantity, atr, rules, instrument)
                        .await;
                }
                Ok(view) if view.status.is_terminal() => {
                    // Cancelled or rejected before filling: nothing to protect.
                    self.orders
                        .update_status(&entry.exchange_order_id, view.status, None, None)
                        .await?;
                    return Ok(());
                }
                Ok(_) => {}
                Err(e) if e.is_transient() => {
                    warn!(
                        "Fill poll for {} failed transiently: {}",
                        entry.exchange_order_id, e
                    );
                }
                Err(e) => {
                    warn!("Fill poll for {} failed: {}", entry.exchange_order_id, e);
                }
            }

            if Instant::now() >= deadline {
                self.orders
                    .set_note(
                        &entry.exchange_order_id,
                        "PROTECTION_SKIPPED: fill not confirmed within poll window",
                    )
                    .await?;
                warn!(
                    "Entry {} not confirmed filled within {:?}; protection deferred to reconciler",
                    entry.exchange_order_id, self.config.fill_poll_window
                );
                return Ok(());
            }
            tokio::time::sleep(self.config.fill_poll_step).await;
        }
    }

    /// Create the SL/TP pair for a filled entry. Both orders must succeed;
    /// on a second-leg failure the first leg is cancelled.
    pub async fn create_protection(
        &self,
        entry: &Order,
        fill_price: Decimal,
        fill_quantity: Decimal,
        atr: Option<Decimal>,
        rules: &StrategyRules,
        instrument: &Instrument,
    ) -> Result<()> {
        let Some(_guard) = self.try_lock_parent(&entry.exchange_order_id) else {
            info!(
                "SLTP creation for {} already in flight; skipping",
                entry.exchange_order_id
            );
            return Ok(());
        };

        // Idempotency: a live pair for this parent means a rerun.
        let existing = self
            .orders
            .active_protection_orders(&entry.exchange_order_id)
            .await?;
        if !existing.is_empty() {
            info!(
                "SLTP_SKIPPED_ALREADY_EXISTS parent={} ({} active protection orders)",
                entry.exchange_order_id,
                existing.len()
            );
            self.notifier
                .send(
                    &format!(
                        "SL/TP already active for {} entry {}",
                        entry.symbol, entry.exchange_order_id
                    ),
                    "protection-manager",
                )
                .await;
            return Ok(());
        }

        let Some((sl_raw, tp_raw)) = protection_prices(entry.side, fill_price, atr, rules) else {
            self.orders
                .set_note(
                    &entry.exchange_order_id,
                    "PROTECTION_SKIPPED: no usable stop distance from strategy rules",
                )
                .await?;
            warn!(
                "No usable SL/TP prices for {} (fill {}, atr {:?})",
                entry.symbol, fill_price, atr
            );
            return Ok(());
        };

        let sl_price = formatter::normalize_price(
            sl_raw,
            instrument.price_tick,
            formatter::protection_price_rounding(OrderRole::StopLoss, entry.side),
            instrument.price_decimals,
        )?;
        let tp_price = formatter::normalize_price(
            tp_raw,
            instrument.price_tick,
            formatter::protection_price_rounding(OrderRole::TakeProfit, entry.side),
            instrument.price_decimals,
        )?;
        let quantity = match formatter::normalize_quantity(
            fill_quantity,
            instrument.quantity_tick,
            instrument.min_quantity,
            instrument.quantity_decimals,
        ) {
            Ok(q) => q,
            Err(e) => {
                self.orders
                    .set_note(
                        &entry.exchange_order_id,
                        &format!("PROTECTION_SKIPPED: {}", e),
                    )
                    .await?;
                return Ok(());
            }
        };

        let oco_group_id = Uuid::new_v4().to_string();
        let close_side = entry.side.opposite();

        // The stop-loss leg goes first; the rollback below undoes it if the
        // take-profit leg cannot follow.
        let sl_order = match self
            .submit_protection(
                entry,
                OrderRole::StopLoss,
                close_side,
                &sl_price,
                &quantity,
                &oco_group_id,
                instrument,
            )
            .await
        {
            Ok(order) => order,
            Err(e) => {
                self.orders
                    .set_note(
                        &entry.exchange_order_id,
                        &format!("PROTECTION_SKIPPED: stop-loss submit failed ({})", e),
                    )
                    .await?;
                self.notifier
                    .send(
                        &format!(
                            "Stop-loss creation failed for {} entry {}: {}",
                            entry.symbol, entry.exchange_order_id, e
                        ),
                        "protection-manager",
                    )
                    .await;
                return Ok(());
            }
        };
        self.orders.insert(&sl_order).await?;

        match self
            .submit_protection(
                entry,
                OrderRole::TakeProfit,
                close_side,
                &tp_price,
                &quantity,
                &oco_group_id,
                instrument,
            )
            .await
        {
            Ok(tp_order) => {
                self.orders.insert(&tp_order).await?;
                info!(
                    "SLTP_PLACED parent={} group={} sl={} tp={}",
                    entry.exchange_order_id,
                    oco_group_id,
                    sl_order.exchange_order_id,
                    tp_order.exchange_order_id
                );
                Ok(())
            }
            Err(tp_error) => {
                // Rollback: a lone SL is a forbidden half-pair.
                warn!(
                    "Take-profit submit failed for {} ({}); cancelling stop-loss {}",
                    entry.exchange_order_id, tp_error, sl_order.exchange_order_id
                );
                match self
                    .exchange
                    .cancel_order(&entry.symbol, &sl_order.exchange_order_id)
                    .await
                {
                    Ok(()) => {
                        self.orders
                            .update_status(
                                &sl_order.exchange_order_id,
                                OrderStatus::Cancelled,
                                None,
                                None,
                            )
                            .await?;
                        self.orders
                            .set_note(
                                &entry.exchange_order_id,
                                &format!("PROTECTION_FAILED: {}", tp_error),
                            )
                            .await?;
                        self.notifier
                            .send(
                                &format!(
                                    "SL/TP creation failed for {} entry {} ({}); stop-loss rolled back",
                                    entry.symbol, entry.exchange_order_id, tp_error
                                ),
                                "protection-manager",
                            )
                            .await;
                    }
                    Err(cancel_error) => {
                        self.orders
                            .update_status(
                                &sl_order.exchange_order_id,
                                OrderStatus::FailedInconsistent,
                                None,
                                None,
                            )
                            .await?;
                        error!(
                            "CRITICAL: rollback cancel failed for stop-loss {} (parent {}): {}",
                            sl_order.exchange_order_id, entry.exchange_order_id, cancel_error
                        );
                        self.notifier
                            .send(
                                &format!(
                                    "CRITICAL: orphaned stop-loss {} for {} entry {} could not be cancelled: {}",
                                    sl_order.exchange_order_id,
                                    entry.symbol,
                                    entry.exchange_order_id,
                                    cancel_error
                                ),
                                "protection-manager",
                            )
                            .await;
                    }
                }
                Ok(())
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn submit_protection(
        &self,
        entry: &Order,
        role: OrderRole,
        side: OrderSide,
        price: &CanonicalAmount,
        quantity: &CanonicalAmount,
        oco_group_id: &str,
        instrument: &Instrument,
    ) -> Result<Order, ExchangeError> {
        let order_type = match role {
            OrderRole::StopLoss => OrderType::StopLimit,
            OrderRole::TakeProfit => OrderType::TakeProfitLimit,
            OrderRole::Entry => OrderType::Limit,
        };
        let comparator = formatter::trigger_comparator(role, entry.side);
        let variants = formatter::trigger_condition_variants(comparator, &price.text);

        let client_oid = Uuid::new_v4().to_string();
        let mut last_error = None;

        // One targeted retry over the trigger-condition formatting variants.
        for (attempt, condition) in variants.iter().take(2).enumerate() {
            let request = CreateOrderRequest {
                symbol: instrument.symbol.clone(),
                side,
                order_type,
                quantity: quantity.text.clone(),
                price: Some(price.text.clone()),
                trigger_price: Some(price.text.clone()),
                trigger_condition: Some(condition.clone()),
                client_oid: client_oid.clone(),
                exec_inst: None,
                leverage: None,
            };

            match self.exchange.create_order(&request).await {
                Ok(ack) => {
                    let now = Utc::now();
                    return Ok(Order {
                        exchange_order_id: ack.exchange_order_id,
                        client_oid,
                        symbol: instrument.symbol.clone(),
                        side,
                        order_type,
                        role,
                        status: OrderStatus::Active,
                        price: price.value,
                        trigger_price: Some(price.value),
                        quantity: quantity.value,
                        filled_quantity: Decimal::ZERO,
                        avg_fill_price: None,
                        parent_order_id: Some(entry.exchange_order_id.clone()),
                        oco_group_id: Some(oco_group_id.to_string()),
                        signal_key: None,
                        is_margin: false,
                        leverage: None,
                        note: None,
                        created_at: now,
                        updated_at: now,
                    });
                }
                Err(e @ ExchangeError::InvalidPriceFormat { .. }) => {
                    warn!(
                        "{} submit for {} rejected as invalid price format (attempt {})",
                        role,
                        entry.symbol,
                        attempt + 1
                    );
                    last_error = Some(e);
                }
                Err(e) => return Err(e),
            }
        }

        Err(last_error.unwrap_or(ExchangeError::Transport(
            "protection submit produced no result".to_string(),
        )))
    }

    /// Sibling-cancels-other: a filled protection order cancels its pair.
    pub async fn on_protection_filled(&self, filled: &Order) -> Result<()> {
        let Some(sibling) = self.find_sibling(filled).await? else {
            warn!(
                "No OCO sibling found for filled {} {}",
                filled.role, filled.exchange_order_id
            );
            return Ok(());
        };

        if sibling.status == OrderStatus::Cancelled {
            info!(
                "OCO sibling {} already cancelled; nothing to do",
                sibling.exchange_order_id
            );
            self.notifier
                .send(
                    &format!(
                        "{} sibling {} for {} was already cancelled",
                        sibling.role, sibling.exchange_order_id, sibling.symbol
                    ),
                    "protection-manager",
                )
                .await;
            return Ok(());
        }
        if sibling.status.is_terminal() {
            return Ok(());
        }

        match self
            .exchange
            .cancel_order(&sibling.symbol, &sibling.exchange_order_id)
            .await
        {
            Ok(()) => {
                self.orders
                    .update_status(
                        &sibling.exchange_order_id,
                        OrderStatus::Cancelled,
                        None,
                        None,
                    )
                    .await?;
                self.orders
                    .set_note(&sibling.exchange_order_id, "cancelled: OCO sibling filled")
                    .await?;
                info!(
                    "Cancelled OCO sibling {} after {} fill",
                    sibling.exchange_order_id, filled.role
                );
                self.notifier
                    .send(
                        &format!(
                            "{} filled for {}; cancelled sibling {} ({})",
                            filled.role,
                            filled.symbol,
                            sibling.exchange_order_id,
                            sibling.role
                        ),
                        "protection-manager",
                    )
                    .await;
            }
            Err(e) => {
                warn!(
                    "Failed to cancel OCO sibling {}: {} (will retry next reconcile)",
                    sibling.exchange_order_id, e
                );
            }
        }
        Ok(())
    }

    /// Locate the other half of the pair. Preference order: shared OCO group
    /// id, same parent, opposite role in the legacy time window.
    async fn find_sibling(&self, filled: &Order) -> Result<Option<Order>> {
        if let Some(group) = &filled.oco_group_id {
            let group_orders = self.orders.find_by_oco_group(group).await?;
            if let Some(sibling) = group_orders
                .into_iter()
                .find(|o| o.exchange_order_id != filled.exchange_order_id)
            {
                return Ok(Some(sibling));
            }
        }

        if let Some(parent) = &filled.parent_order_id {
            let siblings = self.orders.active_protection_orders(parent).await?;
            if let Some(sibling) = siblings
                .into_iter()
                .find(|o| o.exchange_order_id != filled.exchange_order_id)
            {
                return Ok(Some(sibling));
            }
        }

        let opposite = match filled.role {
            OrderRole::StopLoss => OrderRole::TakeProfit,
            OrderRole::TakeProfit => OrderRole::StopLoss,
            OrderRole::Entry => return Ok(None),
        };
        let since = Utc::now() - ChronoDuration::minutes(LEGACY_SIBLING_WINDOW_MINUTES);
        let candidates = self
            .orders
            .recent_protection_orders(&filled.symbol, opposite, since)
            .await?;
        Ok(candidates
            .into_iter()
            .find(|o| o.exchange_order_id != filled.exchange_order_id))
    }
}
