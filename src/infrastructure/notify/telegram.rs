//! Telegram notification sink.
//!
//! This is the single gatekeeper for outbound operator messages. The kill
//! switch is resolved once at construction: unless the process runs with the
//! production environment tag, the production chat id and a token, the bot is
//! never built and `send` cannot reach the remote API at all.

use crate::config::NotifierEnvConfig;
use crate::domain::ports::Notifier;
use async_trait::async_trait;
use teloxide::prelude::*;
use teloxide::types::ChatId;
use tracing::{debug, info, warn};

pub struct TelegramNotifier {
    bot: Option<Bot>,
    chat_id: ChatId,
}

impl TelegramNotifier {
    pub fn from_config(config: &NotifierEnvConfig) -> Self {
        let enabled = config.resolved_enabled();

        if enabled {
            info!(
                "Notifier ENABLED (env '{}', chat {})",
                config.environment,
                config.masked_chat_id()
            );
        } else {
            info!(
                "Notifier DISABLED (env '{}' vs production '{}', chat {}) - outbound messages are no-ops",
                config.environment,
                config.production_environment,
                config.masked_chat_id()
            );
        }

        Self {
            bot: enabled.then(|| Bot::new(config.bot_token.clone())),
            chat_id: ChatId(config.chat_id),
        }
    }
}

#[async_trait]
impl Notifier for TelegramNotifier {
    async fn send(&self, text: &str, origin: &str) -> bool {
        let Some(bot) = &self.bot else {
            debug!("TG_SKIPPED origin={} (notifier disabled)", origin);
            return false;
        };

        match bot
            .send_message(self.chat_id, format!("[{}] {}", origin, text))
            .await
        {
            Ok(_) => {
                info!("TG_SENT origin={}", origin);
                true
            }
            Err(e) => {
                warn!("TG_FAILED origin={}: {}", origin, e);
                false
            }
        }
    }

    fn is_enabled(&self) -> bool {
        self.bot.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_disabled_notifier_never_sends() {
        let config = NotifierEnvConfig {
            bot_token: "123:abc".to_string(),
            chat_id: 42,
            environment: "dev".to_string(),
            production_environment: "production".to_string(),
            production_chat_id: 42,
        };

        let notifier = TelegramNotifier::from_config(&config);
        assert!(!notifier.is_enabled());
        assert!(!notifier.send("hello", "test").await);
    }
}
