mod alert_repository;
mod balance_repository;
mod instrument_repository;
mod market_data_repository;
mod order_repository;
mod throttle_repository;
mod watchlist_repository;

pub use alert_repository::SqliteAlertRepository;
pub use balance_repository::SqliteBalanceRepository;
pub use instrument_repository::SqliteInstrumentRepository;
pub use market_data_repository::SqliteMarketDataRepository;
pub use order_repository::SqliteOrderRepository;
pub use throttle_repository::SqliteThrottleRepository;
pub use watchlist_repository::SqliteWatchlistRepository;

pub(crate) mod row {
    //! Shared row-mapping helpers. Decimals travel as canonical strings,
    //! timestamps as unix milliseconds.

    use chrono::{DateTime, Utc};
    use rust_decimal::Decimal;
    use std::str::FromStr;

    pub fn decimal(raw: &str) -> anyhow::Result<Decimal> {
        Decimal::from_str(raw).map_err(|e| anyhow::anyhow!("bad decimal '{}': {}", raw, e))
    }

    pub fn opt_decimal(raw: Option<String>) -> anyhow::Result<Option<Decimal>> {
        raw.map(|s| decimal(&s)).transpose()
    }

    pub fn millis(ms: i64) -> DateTime<Utc> {
        DateTime::<Utc>::from_timestamp_millis(ms).unwrap_or_default()
    }

    pub fn opt_millis(ms: Option<i64>) -> Option<DateTime<Utc>> {
        ms.map(millis)
    }
}
