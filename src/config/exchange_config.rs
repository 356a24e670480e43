//! Exchange connection configuration parsing from environment variables.

use std::env;
use std::time::Duration;

/// Exchange REST API configuration
#[derive(Debug, Clone, Default)]
pub struct ExchangeEnvConfig {
    pub api_key: String,
    pub api_secret: String,
    pub base_url: String,
    pub request_deadline: Duration,
}

impl ExchangeEnvConfig {
    pub fn from_env() -> Self {
        let deadline_secs = env::var("EXCHANGE_REQUEST_DEADLINE_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(10);

        Self {
            api_key: env::var("EXCHANGE_API_KEY").unwrap_or_default(),
            api_secret: env::var("EXCHANGE_API_SECRET").unwrap_or_default(),
            base_url: env::var("EXCHANGE_BASE_URL")
                .unwrap_or_else(|_| "https://api.crypto.com/exchange/v1".to_string()),
            request_deadline: Duration::from_secs(deadline_secs),
        }
    }
}
