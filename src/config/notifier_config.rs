//! Notifier configuration parsing from environment variables.
//!
//! The kill switch is resolved here once: the notifier is live only when the
//! process environment tag equals the production tag, the configured chat is
//! the production chat, and a bot token is present. Anything else resolves
//! to a disabled notifier whose `send` is a no-op.

use std::env;

#[derive(Debug, Clone, Default)]
pub struct NotifierEnvConfig {
    pub bot_token: String,
    pub chat_id: i64,
    pub environment: String,
    pub production_environment: String,
    pub production_chat_id: i64,
}

impl NotifierEnvConfig {
    pub fn from_env() -> Self {
        Self {
            bot_token: env::var("TELEGRAM_BOT_TOKEN").unwrap_or_default(),
            chat_id: env::var("TELEGRAM_CHAT_ID")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(0),
            environment: env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string()),
            production_environment: env::var("NOTIFIER_PRODUCTION_ENV")
                .unwrap_or_else(|_| "production".to_string()),
            production_chat_id: env::var("NOTIFIER_PRODUCTION_CHAT_ID")
                .ok()
                .and_then(|v| v.parse::<i64>().ok())
                .unwrap_or(0),
        }
    }

    /// All three kill-switch conditions at once.
    pub fn resolved_enabled(&self) -> bool {
        self.environment == self.production_environment
            && self.chat_id != 0
            && self.chat_id == self.production_chat_id
            && !self.bot_token.is_empty()
    }

    /// Last four digits of the chat id, for startup logging. Credentials are
    /// never logged in full.
    pub fn masked_chat_id(&self) -> String {
        let digits: String = self
            .chat_id
            .abs()
            .to_string()
            .chars()
            .rev()
            .take(4)
            .collect::<Vec<_>>()
            .into_iter()
            .rev()
            .collect();
        format!("…{}", digits)
    }
}
