//! Decision-trace writer.
//!
//! Attaches the final `(decision_type, reason_code, reason_message, context)`
//! stamp to the originating alert record. When the originating alert cannot
//! be located the event is preserved on a synthetic record instead of being
//! dropped. Writes are idempotent per alert id; the cycle-end sweep uses a
//! compare-and-set so it can never overwrite a real decision.

use crate::domain::alert::{DecisionTrace, ReasonCode};
use crate::domain::repositories::{AlertRepository, NewAlert};
use crate::domain::types::OrderSide;
use anyhow::Result;
use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};

/// How far back the writer searches for the originating alert.
const ALERT_LOOKBACK_MINUTES: i64 = 5;

pub struct DecisionTraceWriter {
    alerts: Arc<dyn AlertRepository>,
}

impl DecisionTraceWriter {
    pub fn new(alerts: Arc<dyn AlertRepository>) -> Self {
        Self { alerts }
    }

    /// Stamp a known alert. Last write wins.
    pub async fn stamp(&self, alert_id: i64, trace: &DecisionTrace) -> Result<()> {
        self.alerts.apply_trace(alert_id, trace).await?;
        info!(
            "Decision trace on alert {}: {}/{} - {}",
            alert_id, trace.decision_type, trace.reason_code, trace.reason_message
        );
        Ok(())
    }

    /// Stamp the most recent alert for `(symbol, side)` within the lookback
    /// window, or synthesize a record when none exists. Returns the alert id
    /// that carries the trace.
    pub async fn stamp_latest(
        &self,
        symbol: &str,
        side: OrderSide,
        strategy_key: &str,
        price: Decimal,
        run_id: &str,
        trace: &DecisionTrace,
    ) -> Result<i64> {
        let since = Utc::now() - Duration::minutes(ALERT_LOOKBACK_MINUTES);

        let alert_id = match self.alerts.latest_for(symbol, side, since).await? {
            Some(alert) => alert.id,
            None => {
                warn!(
                    "No originating alert for {} {} within {} minutes; creating synthetic trace record",
                    symbol, side, ALERT_LOOKBACK_MINUTES
                );
                self.alerts
                    .insert(&NewAlert {
                        symbol: symbol.to_string(),
                        side,
                        strategy_key: strategy_key.to_string(),
                        price_at_emit: price,
                        run_id: run_id.to_string(),
                        created_at: Utc::now(),
                    })
                    .await?
            }
        };

        self.stamp(alert_id, trace).await?;
        Ok(alert_id)
    }

    /// Cycle-end safety net: stamp every alert of this run still PENDING.
    /// Returns how many were caught.
    pub async fn sweep_pending(&self, run_id: &str) -> Result<u32> {
        let pending = self.alerts.pending_for_run(run_id).await?;
        let mut swept = 0;

        for alert in pending {
            let trace = DecisionTrace::new(
                ReasonCode::DecisionPipelineNotCalled,
                "alert was still pending at cycle end",
            );
            if self.alerts.apply_trace_if_pending(alert.id, &trace).await? {
                warn!(
                    "Safety net stamped alert {} ({} {}) as SKIPPED/DECISION_PIPELINE_NOT_CALLED",
                    alert.id, alert.symbol, alert.side
                );
                swept += 1;
            }
        }
        Ok(swept)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::alert::DecisionType;
    use crate::infrastructure::persistence::Database;
    use crate::infrastructure::persistence::repositories::SqliteAlertRepository;
    use rust_decimal_macros::dec;

    async fn writer() -> (DecisionTraceWriter, Arc<SqliteAlertRepository>) {
        let db = Database::new("sqlite::memory:").await.unwrap();
        let repo = Arc::new(SqliteAlertRepository::new(db.pool));
        (DecisionTraceWriter::new(repo.clone()), repo)
    }

    fn new_alert() -> NewAlert {
        NewAlert {
            symbol: "BTC_USDT".to_string(),
            side: OrderSide::Buy,
            strategy_key: "swing/conservative".to_string(),
            price_at_emit: dec!(50000),
            run_id: "1234-1".to_string(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_stamp_latest_finds_originating_alert() {
        let (writer, repo) = writer().await;
        let id = repo.insert(&new_alert()).await.unwrap();

        let trace = DecisionTrace::new(ReasonCode::ExecOrderPlaced, "entry placed");
        let stamped = writer
            .stamp_latest(
                "BTC_USDT",
                OrderSide::Buy,
                "swing/conservative",
                dec!(50000),
                "1234-1",
                &trace,
            )
            .await
            .unwrap();
        assert_eq!(stamped, id);

        let alert = repo.find(id).await.unwrap().unwrap();
        assert_eq!(alert.decision_type, DecisionType::Executed);
        assert_eq!(alert.reason_code, Some(ReasonCode::ExecOrderPlaced));
    }

    #[tokio::test]
    async fn test_stamp_latest_synthesizes_when_missing() {
        let (writer, repo) = writer().await;

        let trace = DecisionTrace::new(ReasonCode::Timeout, "exchange deadline exceeded");
        let id = writer
            .stamp_latest(
                "ETH_USDT",
                OrderSide::Sell,
                "swing/conservative",
                dec!(3000),
                "1234-2",
                &trace,
            )
            .await
            .unwrap();

        let alert = repo.find(id).await.unwrap().unwrap();
        assert_eq!(alert.symbol, "ETH_USDT");
        assert_eq!(alert.decision_type, DecisionType::Failed);
    }

    #[tokio::test]
    async fn test_last_write_wins_on_same_alert() {
        let (writer, repo) = writer().await;
        let id = repo.insert(&new_alert()).await.unwrap();

        writer
            .stamp(id, &DecisionTrace::new(ReasonCode::Timeout, "first"))
            .await
            .unwrap();
        writer
            .stamp(
                id,
                &DecisionTrace::new(ReasonCode::ExecOrderPlaced, "second"),
            )
            .await
            .unwrap();

        let alert = repo.find(id).await.unwrap().unwrap();
        assert_eq!(alert.reason_code, Some(ReasonCode::ExecOrderPlaced));
        assert_eq!(alert.reason_message.as_deref(), Some("second"));
    }

    #[tokio::test]
    async fn test_sweep_only_touches_pending() {
        let (writer, repo) = writer().await;
        let pending_id = repo.insert(&new_alert()).await.unwrap();
        let decided_id = repo.insert(&new_alert()).await.unwrap();
        writer
            .stamp(
                decided_id,
                &DecisionTrace::new(ReasonCode::ExecOrderPlaced, "placed"),
            )
            .await
            .unwrap();

        let swept = writer.sweep_pending("1234-1").await.unwrap();
        assert_eq!(swept, 1);

        let pending = repo.find(pending_id).await.unwrap().unwrap();
        assert_eq!(
            pending.reason_code,
            Some(ReasonCode::DecisionPipelineNotCalled)
        );

        let decided = repo.find(decided_id).await.unwrap().unwrap();
        assert_eq!(decided.reason_code, Some(ReasonCode::ExecOrderPlaced));
    }
}
