//! Configuration module for Tradeflow.
//!
//! Structured configuration loading from environment variables, organized by
//! domain: Exchange, Notifier, Pipeline. The strategy-rules document is a
//! separate strict TOML file (see `strategy_rules`).

mod exchange_config;
mod notifier_config;
mod pipeline_config;
mod strategy_rules;

pub use exchange_config::ExchangeEnvConfig;
pub use notifier_config::NotifierEnvConfig;
pub use pipeline_config::{OpenTradesScope, PipelineEnvConfig};
pub use strategy_rules::{RulesBook, StrategyRules};

use anyhow::{Context, Result};
use std::env;

/// Main application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub exchange: ExchangeEnvConfig,
    pub notifier: NotifierEnvConfig,
    pub pipeline: PipelineEnvConfig,
    /// Optional path to an external rules document; the built-in document
    /// is used when unset.
    pub rules_file: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: env::var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite://data/tradeflow.db".to_string()),
            exchange: ExchangeEnvConfig::from_env(),
            notifier: NotifierEnvConfig::from_env(),
            pipeline: PipelineEnvConfig::from_env().context("Failed to load pipeline config")?,
            rules_file: env::var("RULES_FILE").ok(),
        })
    }

    pub fn load_rules(&self) -> Result<RulesBook> {
        match &self.rules_file {
            Some(path) => RulesBook::from_path(path),
            None => Ok(RulesBook::builtin()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_from_env_defaults() {
        let config = Config::from_env().expect("Should parse with defaults");
        assert_eq!(config.pipeline.max_open_trades, 3);
        assert_eq!(config.pipeline.monitor_interval.as_secs(), 30);
        assert_eq!(config.pipeline.reconcile_interval.as_secs(), 15);
    }

    #[test]
    fn test_builtin_rules_load() {
        let config = Config::from_env().unwrap();
        let book = config.load_rules().unwrap();
        assert!(book.rules_for("swing/conservative").is_some());
    }
}
