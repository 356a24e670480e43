//! The strategy-rules document.
//!
//! One strict TOML document keyed by `(preset, risk_mode)` is the single
//! source of truth for signal thresholds, throttling and SL/TP parameters.
//! Unknown keys are rejected at load so every consumer sees identical
//! semantics; there is no loosely-typed config passed between layers.

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

fn default_cross_lookback() -> usize {
    5
}

/// Rules for one `(preset, risk_mode)` pair.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StrategyRules {
    pub rsi_buy_below: Decimal,
    pub rsi_sell_above: Decimal,

    /// BUY requires price above MA200.
    #[serde(default)]
    pub require_price_above_ma200: bool,
    /// BUY requires price above MA50.
    #[serde(default)]
    pub require_price_above_ma50: bool,
    /// SELL requires MA50 below EMA10 by the divergence margin, or price
    /// below the 10-week MA.
    #[serde(default)]
    pub require_ma_reversal_for_sell: bool,

    /// BUY requires RSI to have re-entered above `rsi_cross_floor` within
    /// the last `rsi_cross_lookback` candles.
    #[serde(default)]
    pub require_rsi_cross_up: bool,
    pub rsi_cross_floor: Option<Decimal>,
    #[serde(default = "default_cross_lookback")]
    pub rsi_cross_lookback: usize,

    pub volume_min_ratio: Decimal,

    // Alert throttle
    pub min_price_change_pct: Decimal,
    pub alert_cooldown_minutes: i64,

    // Protection sizing: ATR multiple when ATR is available, fixed percent
    // otherwise. At least one must be set.
    pub atr_multiplier_sl: Option<Decimal>,
    pub stop_loss_pct: Option<Decimal>,
    pub risk_reward: Decimal,
}

impl StrategyRules {
    fn validate(&self, key: &str) -> Result<()> {
        if self.atr_multiplier_sl.is_none() && self.stop_loss_pct.is_none() {
            anyhow::bail!(
                "strategy '{}' defines neither atr_multiplier_sl nor stop_loss_pct",
                key
            );
        }
        if self.require_rsi_cross_up && self.rsi_cross_floor.is_none() {
            anyhow::bail!(
                "strategy '{}' requires an RSI cross-up but sets no rsi_cross_floor",
                key
            );
        }
        if self.risk_reward <= Decimal::ZERO {
            anyhow::bail!("strategy '{}' has non-positive risk_reward", key);
        }
        Ok(())
    }
}

/// The parsed rules document. One accessor serves every consumer.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RulesBook {
    strategies: HashMap<String, HashMap<String, StrategyRules>>,
}

impl RulesBook {
    pub fn from_toml_str(raw: &str) -> Result<Self> {
        let book: RulesBook =
            toml::from_str(raw).context("Failed to parse strategy rules document")?;
        for (preset, modes) in &book.strategies {
            for (mode, rules) in modes {
                rules.validate(&format!("{}/{}", preset, mode))?;
            }
        }
        Ok(book)
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref()).with_context(|| {
            format!("Failed to read rules file {}", path.as_ref().display())
        })?;
        Self::from_toml_str(&raw)
    }

    /// The document shipped with the binary, used when no rules file is
    /// configured.
    pub fn builtin() -> Self {
        Self::from_toml_str(include_str!("../../rules.toml"))
            .expect("built-in rules document is valid")
    }

    /// Look up rules by strategy key, e.g. `swing/conservative`.
    pub fn rules_for(&self, strategy_key: &str) -> Option<&StrategyRules> {
        let (preset, mode) = strategy_key.split_once('/')?;
        self.strategies.get(preset)?.get(mode)
    }

    pub fn strategy_keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .strategies
            .iter()
            .flat_map(|(preset, modes)| {
                modes.keys().map(move |mode| format!("{}/{}", preset, mode))
            })
            .collect();
        keys.sort();
        keys
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    const DOC: &str = r#"
        [strategies.swing.conservative]
        rsi_buy_below = 30
        rsi_sell_above = 70
        require_price_above_ma200 = true
        volume_min_ratio = 1.0
        min_price_change_pct = 1.0
        alert_cooldown_minutes = 15
        atr_multiplier_sl = 1.5
        risk_reward = 1.0
    "#;

    #[test]
    fn test_parses_and_resolves_by_strategy_key() {
        let book = RulesBook::from_toml_str(DOC).unwrap();
        let rules = book.rules_for("swing/conservative").unwrap();
        assert_eq!(rules.rsi_buy_below, dec!(30));
        assert!(rules.require_price_above_ma200);
        assert_eq!(rules.rsi_cross_lookback, 5);
        assert!(book.rules_for("swing/unknown").is_none());
        assert!(book.rules_for("not-a-key").is_none());
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let doc = r#"
            [strategies.swing.conservative]
            rsi_buy_below = 30
            rsi_sell_above = 70
            volume_min_ratio = 1.0
            min_price_change_pct = 1.0
            alert_cooldown_minutes = 15
            atr_multiplier_sl = 1.5
            risk_reward = 1.0
            rsi_buy_belw = 25
        "#;
        assert!(RulesBook::from_toml_str(doc).is_err());
    }

    #[test]
    fn test_missing_protection_sizing_rejected() {
        let doc = r#"
            [strategies.swing.conservative]
            rsi_buy_below = 30
            rsi_sell_above = 70
            volume_min_ratio = 1.0
            min_price_change_pct = 1.0
            alert_cooldown_minutes = 15
            risk_reward = 1.0
        "#;
        let err = RulesBook::from_toml_str(doc).unwrap_err().to_string();
        assert!(err.contains("atr_multiplier_sl"), "{}", err);
    }

    #[test]
    fn test_cross_up_without_floor_rejected() {
        let doc = r#"
            [strategies.swing.conservative]
            rsi_buy_below = 30
            rsi_sell_above = 70
            require_rsi_cross_up = true
            volume_min_ratio = 1.0
            min_price_change_pct = 1.0
            alert_cooldown_minutes = 15
            stop_loss_pct = 3.0
            risk_reward = 1.5
        "#;
        assert!(RulesBook::from_toml_str(doc).is_err());
    }

    #[test]
    fn test_builtin_document_is_valid() {
        let book = RulesBook::builtin();
        assert!(book.rules_for("swing/conservative").is_some());
        assert!(!book.strategy_keys().is_empty());
    }
}
