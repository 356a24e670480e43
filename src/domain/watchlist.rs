use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Operator-set manual signal overrides. When set they supersede the
/// computed signal but still pass through the alert throttle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualSignals {
    pub buy: bool,
    pub sell: bool,
}

impl ManualSignals {
    pub fn any(&self) -> bool {
        self.buy || self.sell
    }
}

/// One actively monitored symbol.
///
/// `alert_enabled` is the master switch: when false no alert fires for the
/// symbol regardless of the side flags. The side flags are independent of
/// `trade_enabled`: an alert can fire without trading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WatchlistEntry {
    pub symbol: String,
    /// e.g. `swing/conservative`.
    pub strategy_key: String,
    pub alert_enabled: bool,
    pub buy_alert_enabled: bool,
    pub sell_alert_enabled: bool,
    pub trade_enabled: bool,
    pub trade_on_margin: bool,
    pub trade_amount_usd: Option<Decimal>,
    pub leverage: Option<u32>,
    pub manual_signals: ManualSignals,
    /// Soft-deleted entries are excluded from the monitor loop.
    pub deleted_at: Option<DateTime<Utc>>,
}

impl WatchlistEntry {
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }

    pub fn alert_allowed_for(&self, side: crate::domain::types::OrderSide) -> bool {
        use crate::domain::types::OrderSide;
        self.alert_enabled
            && match side {
                OrderSide::Buy => self.buy_alert_enabled,
                OrderSide::Sell => self.sell_alert_enabled,
            }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::OrderSide;

    fn entry() -> WatchlistEntry {
        WatchlistEntry {
            symbol: "BTC_USDT".to_string(),
            strategy_key: "swing/conservative".to_string(),
            alert_enabled: true,
            buy_alert_enabled: true,
            sell_alert_enabled: false,
            trade_enabled: false,
            trade_on_margin: false,
            trade_amount_usd: None,
            leverage: None,
            manual_signals: ManualSignals::default(),
            deleted_at: None,
        }
    }

    #[test]
    fn test_master_flag_overrides_side_flags() {
        let mut e = entry();
        e.alert_enabled = false;
        assert!(!e.alert_allowed_for(OrderSide::Buy));
        assert!(!e.alert_allowed_for(OrderSide::Sell));
    }

    #[test]
    fn test_side_flags_independent_of_trading() {
        let e = entry();
        assert!(e.alert_allowed_for(OrderSide::Buy));
        assert!(!e.alert_allowed_for(OrderSide::Sell));
        assert!(!e.trade_enabled);
    }

    #[test]
    fn test_soft_delete_deactivates() {
        let mut e = entry();
        assert!(e.is_active());
        e.deleted_at = Some(Utc::now());
        assert!(!e.is_active());
    }
}
