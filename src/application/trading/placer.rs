//! Entry order placement.
//!
//! Resolves instrument formatting rules, turns the approved notional into a
//! normalized limit order and maps every exchange response code to a tagged
//! [`PlacementOutcome`]. Authentication failures never fall back to a spot
//! retry; they surface once and raise a single throttled operator alert.

use crate::domain::alert::ReasonCode;
use crate::domain::errors::{ExchangeError, truncate_snippet};
use crate::domain::formatter::{self, FormatError};
use crate::domain::outcome::PlacementOutcome;
use crate::domain::ports::{CreateOrderRequest, ExchangeClient, Notifier};
use crate::domain::repositories::OrderRepository;
use crate::domain::types::{Instrument, Order, OrderRole, OrderSide, OrderStatus, OrderType};
use crate::domain::watchlist::WatchlistEntry;
use crate::infrastructure::exchange::MARGIN_ORDER_EXEC_INST;
use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

/// Per-topic throttle for operator notifications, e.g. at most one
/// authentication alert per 24 h.
#[derive(Default)]
pub struct OperatorAlertThrottle {
    last_sent: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl OperatorAlertThrottle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn should_send(&self, topic: &str, min_interval: Duration) -> bool {
        let mut last_sent = self.last_sent.lock().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        match last_sent.get(topic) {
            Some(last) if now - *last < min_interval => false,
            _ => {
                last_sent.insert(topic.to_string(), now);
                true
            }
        }
    }
}

/// An order request the gate has already approved.
pub struct EntryRequest<'a> {
    pub entry: &'a WatchlistEntry,
    pub instrument: &'a Instrument,
    pub side: OrderSide,
    pub notional: Decimal,
    pub last_price: Decimal,
    pub signal_key: String,
}

pub struct OrderPlacer {
    exchange: Arc<dyn ExchangeClient>,
    orders: Arc<dyn OrderRepository>,
    notifier: Arc<dyn Notifier>,
    operator_alerts: OperatorAlertThrottle,
}

impl OrderPlacer {
    pub fn new(
        exchange: Arc<dyn ExchangeClient>,
        orders: Arc<dyn OrderRepository>,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        Self {
            exchange,
            orders,
            notifier,
            operator_alerts: OperatorAlertThrottle::new(),
        }
    }

    pub async fn place_entry(&self, request: EntryRequest<'_>) -> Result<PlacementOutcome> {
        let instrument = request.instrument;

        let price = match formatter::normalize_price(
            request.last_price,
            instrument.price_tick,
            formatter::entry_price_rounding(request.side),
            instrument.price_decimals,
        ) {
            Ok(p) => p,
            Err(e) => return Ok(Self::formatting_outcome(e)),
        };

        if price.value <= Decimal::ZERO {
            return Ok(PlacementOutcome::Skipped {
                reason: ReasonCode::DataMissing,
                context: serde_json::json!({ "detail": "last price quantized to zero" }),
            });
        }

        let quantity = match formatter::normalize_quantity(
            request.notional / price.value,
            instrument.quantity_tick,
            instrument.min_quantity,
            instrument.quantity_decimals,
        ) {
            Ok(q) => q,
            Err(e) => return Ok(Self::formatting_outcome(e)),
        };

        let client_oid = Uuid::new_v4().to_string();
        let is_margin = request.entry.trade_on_margin;
        let mut wire = CreateOrderRequest {
            symbol: instrument.symbol.clone(),
            side: request.side,
            order_type: OrderType::Limit,
            quantity: quantity.text.clone(),
            price: Some(price.text.clone()),
            trigger_price: None,
            trigger_condition: None,
            client_oid: client_oid.clone(),
            exec_inst: is_margin.then(|| MARGIN_ORDER_EXEC_INST.to_string()),
            leverage: is_margin.then_some(request.entry.leverage).flatten(),
        };

        info!(
            "Submitting entry {} {} {} @ {} (margin: {})",
            request.side, quantity.text, instrument.symbol, price.text, is_margin
        );

        let ack = match self.exchange.create_order(&wire).await {
            Ok(ack) => ack,
            Err(ExchangeError::InvalidPriceFormat { .. }) => {
                // One targeted retry: re-normalize and resubmit. Entries have
                // no trigger condition to vary, so the price text is rebuilt.
                warn!(
                    "Entry for {} rejected as invalid price format; retrying once re-normalized",
                    instrument.symbol
                );
                let retry_price = match formatter::normalize_price(
                    price.value,
                    instrument.price_tick,
                    formatter::entry_price_rounding(request.side),
                    instrument.price_decimals,
                ) {
                    Ok(p) => p,
                    Err(e) => return Ok(Self::formatting_outcome(e)),
                };
                wire.price = Some(retry_price.text);
                match self.exchange.create_order(&wire).await {
                    Ok(ack) => ack,
                    Err(e) => return Ok(self.map_exchange_error(e).await),
                }
            }
            Err(e) => return Ok(self.map_exchange_error(e).await),
        };

        let now = Utc::now();
        let order = Order {
            exchange_order_id: ack.exchange_order_id,
            client_oid,
            symbol: instrument.symbol.clone(),
            side: request.side,
            order_type: OrderType::Limit,
            role: OrderRole::Entry,
            status: OrderStatus::Active,
            price: price.value,
            trigger_price: None,
            quantity: quantity.value,
            filled_quantity: Decimal::ZERO,
            avg_fill_price: None,
            parent_order_id: None,
            oco_group_id: None,
            signal_key: Some(request.signal_key),
            is_margin,
            leverage: wire.leverage,
            note: None,
            created_at: now,
            updated_at: now,
        };
        self.orders.insert(&order).await?;

        info!(
            "ORDER_PLACED {} {} {} @ {} (exchange id {})",
            order.side, order.quantity, order.symbol, order.price, order.exchange_order_id
        );

        Ok(PlacementOutcome::Placed(order))
    }

    fn formatting_outcome(error: FormatError) -> PlacementOutcome {
        match error {
            FormatError::QuantityBelowMin { quantity, min } => PlacementOutcome::Skipped {
                reason: ReasonCode::DataMissing,
                context: serde_json::json!({
                    "detail": "computed quantity below instrument minimum",
                    "quantity": quantity.to_string(),
                    "min_quantity": min.to_string(),
                }),
            },
            other => PlacementOutcome::Failed {
                reason: ReasonCode::InvalidPriceFormat,
                message: other.to_string(),
                error_snippet: None,
            },
        }
    }

    async fn map_exchange_error(&self, error: ExchangeError) -> PlacementOutcome {
        match error {
            ExchangeError::Authentication { code } => {
                // Fatal for this symbol this cycle. No spot fallback. One
                // operator alert per day at most.
                if self
                    .operator_alerts
                    .should_send("authentication-error", Duration::hours(24))
                {
                    self.notifier
                        .send(
                            &format!("Exchange authentication failed (code {})", code),
                            "order-placer",
                        )
                        .await;
                }
                PlacementOutcome::Failed {
                    reason: ReasonCode::AuthenticationError,
                    message: format!("exchange rejected credentials (code {})", code),
                    error_snippet: None,
                }
            }
            ExchangeError::InvalidPriceFormat { code, message } => PlacementOutcome::Failed {
                reason: ReasonCode::InvalidPriceFormat,
                message: format!("price rejected after retry (code {})", code),
                error_snippet: Some(truncate_snippet(&message)),
            },
            ExchangeError::ConditionalOrdersDisabled { code } => PlacementOutcome::Blocked {
                reason: ReasonCode::ExchangeApiDisabled,
                message: format!("conditional orders disabled on account (code {})", code),
            },
            ExchangeError::InsufficientFunds { code } => PlacementOutcome::Failed {
                reason: ReasonCode::InsufficientFunds,
                message: format!("exchange reports insufficient funds (code {})", code),
                error_snippet: None,
            },
            ExchangeError::Timeout(deadline) => PlacementOutcome::Failed {
                reason: ReasonCode::Timeout,
                message: format!("exchange call exceeded {:?}", deadline),
                error_snippet: None,
            },
            ExchangeError::RateLimited { code } => PlacementOutcome::Failed {
                reason: ReasonCode::RateLimit,
                message: format!("rate limited by exchange (code {})", code),
                error_snippet: None,
            },
            ExchangeError::Unknown { code, snippet } => PlacementOutcome::Failed {
                reason: ReasonCode::ExchangeErrorUnknown,
                message: format!("unexpected exchange error (code {})", code),
                error_snippet: Some(snippet),
            },
            other => PlacementOutcome::Failed {
                reason: ReasonCode::ExchangeErrorUnknown,
                message: other.to_string(),
                error_snippet: None,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mock::{MockExchange, RecordingNotifier};
    use crate::infrastructure::persistence::Database;
    use crate::infrastructure::persistence::repositories::SqliteOrderRepository;
    use crate::domain::watchlist::ManualSignals;
    use rust_decimal_macros::dec;

    fn instrument() -> Instrument {
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

    fn entry() -> WatchlistEntry {
        WatchlistEntry {
            symbol: "BTC_USDT".to_string(),
            strategy_key: "swing/conservative".to_string(),
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

    async fn placer() -> (OrderPlacer, MockExchange, RecordingNotifier, Arc<SqliteOrderRepository>) {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let orders = Arc::new(SqliteOrderRepository::new(db.pool));
        let exchange = MockExchange::new();
        let notifier = RecordingNotifier::new();
        let placer = OrderPlacer::new(
            Arc::new(exchange.clone()),
            orders.clone(),
            Arc::new(notifier.clone()),
        );
        (placer, exchange, notifier, orders)
    }

    #[tokio::test]
    async fn test_entry_is_normalized_and_persisted() {
        let (placer, exchange, _, orders) = placer().await;
        let entry = entry();
        let instrument = instrument();

        let outcome = placer
            .place_entry(EntryRequest {
                entry: &entry,
                instrument: &instrument,
                side: OrderSide::Buy,
                notional: dec!(100),
                last_price: dec!(50000),
                signal_key: "BTC_USDT:BUY:1".to_string(),
            })
            .await
            .unwrap();

        let PlacementOutcome::Placed(order) = outcome else {
            panic!("expected Placed, got {:?}", outcome);
        };
        // 100 / 50,000 = 0.002, already on the step grid.
        assert_eq!(order.quantity, dec!(0.002));
        assert_eq!(order.role, OrderRole::Entry);
        assert_eq!(order.signal_key.as_deref(), Some("BTC_USDT:BUY:1"));

        let requests = exchange.create_requests().await;
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].quantity, "0.0020");
        assert_eq!(requests[0].price.as_deref(), Some("50000.00"));
        assert_eq!(requests[0].exec_inst, None);

        let stored = orders.find(&order.exchange_order_id).await.unwrap();
        assert!(stored.is_some());
    }

    #[tokio::test]
    async fn test_margin_entry_carries_exec_inst_and_leverage() {
        let (placer, exchange, _, _) = placer().await;
        let mut entry = entry();
        entry.trade_on_margin = true;
        entry.leverage = Some(5);
        let instrument = instrument();

        let outcome = placer
            .place_entry(EntryRequest {
                entry: &entry,
                instrument: &instrument,
                side: OrderSide::Buy,
                notional: dec!(100),
                last_price: dec!(50000),
                signal_key: "BTC_USDT:BUY:2".to_string(),
            })
            .await
            .unwrap();
        assert!(matches!(outcome, PlacementOutcome::Placed(_)));

        let requests = exchange.create_requests().await;
        assert_eq!(
            requests[0].exec_inst.as_deref(),
            Some(MARGIN_ORDER_EXEC_INST)
        );
        assert_eq!(requests[0].leverage, Some(5));
    }

    #[tokio::test]
    async fn test_auth_error_fails_once_with_single_operator_alert() {
        let (placer, exchange, notifier, _) = placer().await;
        let entry = entry();
        let instrument = instrument();
        exchange
            .script_create_results(vec![Some(40101), Some(40101)])
            .await;

        for key in ["k1", "k2"] {
            let outcome = placer
                .place_entry(EntryRequest {
                    entry: &entry,
                    instrument: &instrument,
                    side: OrderSide::Buy,
                    notional: dec!(100),
                    last_price: dec!(50000),
                    signal_key: key.to_string(),
                })
                .await
                .unwrap();
            assert!(matches!(
                outcome,
                PlacementOutcome::Failed {
                    reason: ReasonCode::AuthenticationError,
                    ..
                }
            ));
        }

        // No retry, no fallback: exactly one submit per attempt.
        assert_eq!(exchange.create_requests().await.len(), 2);
        // 24h operator-alert throttle: only the first failure notified.
        assert_eq!(notifier.messages().await.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_price_format_retries_once() {
        let (placer, exchange, _, _) = placer().await;
        let entry = entry();
        let instrument = instrument();
        exchange.script_create_results(vec![Some(308), None]).await;

        let outcome = placer
            .place_entry(EntryRequest {
                entry: &entry,
                instrument: &instrument,
                side: OrderSide::Buy,
                notional: dec!(100),
                last_price: dec!(50000),
                signal_key: "k3".to_string(),
            })
            .await
            .unwrap();

        assert!(matches!(outcome, PlacementOutcome::Placed(_)));
        assert_eq!(exchange.create_requests().await.len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_price_format_surfaces_after_retry() {
        let (placer, exchange, _, _) = placer().await;
        let entry = entry();
        let instrument = instrument();
        exchange
            .script_create_results(vec![Some(308), Some(308)])
            .await;

        let outcome = placer
            .place_entry(EntryRequest {
                entry: &entry,
                instrument: &instrument,
                side: OrderSide::Buy,
                notional: dec!(100),
                last_price: dec!(50000),
                signal_key: "k4".to_string(),
            })
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            PlacementOutcome::Failed {
                reason: ReasonCode::InvalidPriceFormat,
                ..
            }
        ));
        assert_eq!(exchange.create_requests().await.len(), 2);
    }

    #[tokio::test]
    async fn test_conditional_orders_disabled_is_blocked() {
        let (placer, exchange, _, _) = placer().await;
        let entry = entry();
        let instrument = instrument();
        exchange.script_create_results(vec![Some(140001)]).await;

        let outcome = placer
            .place_entry(EntryRequest {
                entry: &entry,
                instrument: &instrument,
                side: OrderSide::Buy,
                notional: dec!(100),
                last_price: dec!(50000),
                signal_key: "k5".to_string(),
            })
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            PlacementOutcome::Blocked {
                reason: ReasonCode::ExchangeApiDisabled,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_tiny_notional_skips_below_min_quantity() {
        let (placer, _, _, _) = placer().await;
        let entry = entry();
        let mut instrument = instrument();
        instrument.min_quantity = dec!(0.01);

        let outcome = placer
            .place_entry(EntryRequest {
                entry: &entry,
                instrument: &instrument,
                side: OrderSide::Buy,
                notional: dec!(100),
                last_price: dec!(50000),
                signal_key: "k6".to_string(),
            })
            .await
            .unwrap();

        assert!(matches!(
            outcome,
            PlacementOutcome::Skipped {
                reason: ReasonCode::DataMissing,
                ..
            }
        ));
    }
}
