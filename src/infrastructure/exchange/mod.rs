pub mod client;
pub mod types;

pub use client::RestExchangeClient;

/// Execution hint attached to margin entry orders so the exchange books the
/// request against margin instead of spot.
pub const MARGIN_ORDER_EXEC_INST: &str = "MARGIN_ORDER";
