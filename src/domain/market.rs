use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Latest observed market state for one symbol, produced by the market-data
/// provider. Indicator fields are optional: a missing required indicator
/// turns the evaluation into WAIT with a `MISSING_INDICATOR_*` reason.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketSnapshot {
    pub symbol: String,
    pub price: Decimal,
    pub rsi: Option<Decimal>,
    pub ema10: Option<Decimal>,
    pub ma50: Option<Decimal>,
    pub ma200: Option<Decimal>,
    pub ma10w: Option<Decimal>,
    pub atr: Option<Decimal>,
    pub volume: Option<Decimal>,
    pub avg_volume: Option<Decimal>,
    /// Recent RSI values, newest last, for cross-up evidence.
    pub rsi_history: Vec<Decimal>,
    pub observed_at: DateTime<Utc>,
    /// Stale values are valid inputs but flagged by the provider.
    pub stale: bool,
}

impl MarketSnapshot {
    pub fn volume_ratio(&self) -> Option<Decimal> {
        match (self.volume, self.avg_volume) {
            (Some(v), Some(avg)) if avg > Decimal::ZERO => Some(v / avg),
            _ => None,
        }
    }
}
