//! Tick-size quantization for prices and quantities.
//!
//! Everything on the order path goes through these functions before it is
//! sent to the exchange. All arithmetic is `rust_decimal`; the canonical
//! output is a plain decimal string with a fixed number of digits, never
//! scientific notation.

use crate::domain::types::{OrderRole, OrderSide};
use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundDirection {
    Up,
    Down,
}

#[derive(Debug, Error, PartialEq)]
pub enum FormatError {
    #[error("quantity {quantity} below instrument minimum {min}")]
    QuantityBelowMin { quantity: Decimal, min: Decimal },

    #[error("tick size must be positive, got {0}")]
    NonPositiveTick(Decimal),

    #[error("cannot normalize non-positive amount {0}")]
    NonPositiveAmount(Decimal),
}

/// A quantized amount together with its canonical wire representation.
#[derive(Debug, Clone, PartialEq)]
pub struct CanonicalAmount {
    pub value: Decimal,
    pub text: String,
}

fn quantize(raw: Decimal, tick: Decimal, direction: RoundDirection) -> Result<Decimal, FormatError> {
    if tick <= Decimal::ZERO {
        return Err(FormatError::NonPositiveTick(tick));
    }
    if raw <= Decimal::ZERO {
        return Err(FormatError::NonPositiveAmount(raw));
    }

    let steps = raw / tick;
    let floored = steps.floor();
    let quantized = match direction {
        RoundDirection::Down => floored * tick,
        RoundDirection::Up => {
            // Exact multiples round to themselves.
            if floored * tick == raw {
                raw
            } else {
                (floored + Decimal::ONE) * tick
            }
        }
    };
    Ok(quantized.normalize())
}

fn render(value: Decimal, decimals: u32) -> String {
    format!("{:.*}", decimals as usize, value)
}

/// Quantize `raw` to a multiple of `tick` in the given direction and render
/// it with exactly `decimals` digits.
pub fn normalize_price(
    raw: Decimal,
    tick: Decimal,
    direction: RoundDirection,
    decimals: u32,
) -> Result<CanonicalAmount, FormatError> {
    let value = quantize(raw, tick, direction)?;
    Ok(CanonicalAmount {
        value,
        text: render(value, decimals),
    })
}

/// Quantize a quantity with ROUND_DOWN and enforce the instrument minimum.
pub fn normalize_quantity(
    raw: Decimal,
    step: Decimal,
    min_quantity: Decimal,
    decimals: u32,
) -> Result<CanonicalAmount, FormatError> {
    let value = quantize(raw, step, RoundDirection::Down)?;
    if value < min_quantity {
        return Err(FormatError::QuantityBelowMin {
            quantity: value,
            min: min_quantity,
        });
    }
    Ok(CanonicalAmount {
        value,
        text: render(value, decimals),
    })
}

/// Price rounding for entry limit orders.
pub fn entry_price_rounding(side: OrderSide) -> RoundDirection {
    match side {
        OrderSide::Buy => RoundDirection::Down,
        OrderSide::Sell => RoundDirection::Up,
    }
}

/// Price rounding for protection orders, keyed by the side of the entry
/// they close. TP never rounds against the position, SL never rounds past
/// the stop level.
pub fn protection_price_rounding(role: OrderRole, entry_side: OrderSide) -> RoundDirection {
    match (role, entry_side) {
        (OrderRole::TakeProfit, OrderSide::Buy) => RoundDirection::Up,
        (OrderRole::TakeProfit, OrderSide::Sell) => RoundDirection::Down,
        (OrderRole::StopLoss, OrderSide::Buy) => RoundDirection::Down,
        (OrderRole::StopLoss, OrderSide::Sell) => RoundDirection::Up,
        // Entries are handled by entry_price_rounding; treat defensively.
        (OrderRole::Entry, side) => entry_price_rounding(side),
    }
}

/// Which way a protection order triggers relative to the market.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TriggerComparator {
    AtOrAbove,
    AtOrBelow,
}

impl TriggerComparator {
    pub fn symbol(self) -> &'static str {
        match self {
            TriggerComparator::AtOrAbove => ">=",
            TriggerComparator::AtOrBelow => "<=",
        }
    }
}

/// Trigger comparator for a protection order closing `entry_side`.
pub fn trigger_comparator(role: OrderRole, entry_side: OrderSide) -> TriggerComparator {
    match (role, entry_side) {
        (OrderRole::TakeProfit, OrderSide::Buy) => TriggerComparator::AtOrAbove,
        (OrderRole::TakeProfit, OrderSide::Sell) => TriggerComparator::AtOrBelow,
        (OrderRole::StopLoss, OrderSide::Buy) => TriggerComparator::AtOrBelow,
        (OrderRole::StopLoss, OrderSide::Sell) => TriggerComparator::AtOrAbove,
        (OrderRole::Entry, _) => TriggerComparator::AtOrAbove,
    }
}

/// Canonical trigger-condition string, e.g. `">= 2984.41"`.
pub fn format_trigger_condition(comparator: TriggerComparator, price_text: &str) -> String {
    format!("{} {}", comparator.symbol(), price_text)
}

/// Formatting variants tried in order when the exchange rejects the
/// canonical form with an invalid-price-format code. Index 0 is canonical.
pub fn trigger_condition_variants(comparator: TriggerComparator, price_text: &str) -> Vec<String> {
    vec![
        format!("{} {}", comparator.symbol(), price_text),
        format!("{}{}", comparator.symbol(), price_text),
    ]
}
