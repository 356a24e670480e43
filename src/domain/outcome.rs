use crate::domain::alert::ReasonCode;
use crate::domain::types::Order;

/// Tagged result of an order placement attempt.
///
/// Every call site pattern-matches all four variants; there is no success
/// payload carrying a hidden error field.
#[derive(Debug, Clone)]
pub enum PlacementOutcome {
    Placed(Order),
    Skipped {
        reason: ReasonCode,
        context: serde_json::Value,
    },
    Failed {
        reason: ReasonCode,
        message: String,
        error_snippet: Option<String>,
    },
    Blocked {
        reason: ReasonCode,
        message: String,
    },
}

impl PlacementOutcome {
    pub fn reason_code(&self) -> ReasonCode {
        match self {
            PlacementOutcome::Placed(_) => ReasonCode::ExecOrderPlaced,
            PlacementOutcome::Skipped { reason, .. } => *reason,
            PlacementOutcome::Failed { reason, .. } => *reason,
            PlacementOutcome::Blocked { reason, .. } => *reason,
        }
    }
}
