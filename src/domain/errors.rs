use std::time::Duration;
use thiserror::Error;

/// Exchange response codes with a fixed local meaning.
///
/// Anything not listed here falls through to [`ExchangeError::Unknown`] with
/// a truncated raw snippet for the decision trace.
pub mod codes {
    pub const UNAUTHORIZED: i64 = 401;
    pub const AUTH_BAD_KEY: i64 = 40101;
    pub const AUTH_BAD_SIGNATURE: i64 = 40103;
    pub const INVALID_PRICE_FORMAT: i64 = 308;
    pub const CONDITIONAL_ORDERS_DISABLED: i64 = 140001;
    pub const NO_AVAILABLE_BALANCE: i64 = 306;
    pub const INSUFFICIENT_BALANCE: i64 = 30024;
    pub const TOO_MANY_REQUESTS: i64 = 429;
    pub const RATE_LIMIT: i64 = 42901;
}

/// Errors surfaced by the exchange facade.
///
/// Transient variants are retried by callers; permanent ones map straight to
/// a decision trace.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("exchange call timed out after {0:?}")]
    Timeout(Duration),

    #[error("rate limited by exchange (code {code})")]
    RateLimited { code: i64 },

    #[error("authentication rejected (code {code})")]
    Authentication { code: i64 },

    #[error("conditional orders disabled on account (code {code})")]
    ConditionalOrdersDisabled { code: i64 },

    #[error("invalid price format (code {code}): {message}")]
    InvalidPriceFormat { code: i64, message: String },

    #[error("insufficient funds on exchange (code {code})")]
    InsufficientFunds { code: i64 },

    #[error("exchange transport failed: {0}")]
    Transport(String),

    #[error("exchange unavailable: {0}")]
    Unavailable(String),

    #[error("exchange error (code {code}): {snippet}")]
    Unknown { code: i64, snippet: String },
}

/// Longest raw-response snippet carried into decision-trace context.
pub const ERROR_SNIPPET_MAX: usize = 240;

pub fn truncate_snippet(raw: &str) -> String {
    if raw.len() <= ERROR_SNIPPET_MAX {
        raw.to_string()
    } else {
        let mut end = ERROR_SNIPPET_MAX;
        while !raw.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &raw[..end])
    }
}

impl ExchangeError {
    /// Map a non-zero exchange response code to a typed error.
    pub fn from_code(code: i64, raw: &str) -> Self {
        match code {
            codes::UNAUTHORIZED | codes::AUTH_BAD_KEY | codes::AUTH_BAD_SIGNATURE => {
                ExchangeError::Authentication { code }
            }
            codes::INVALID_PRICE_FORMAT => ExchangeError::InvalidPriceFormat {
                code,
                message: truncate_snippet(raw),
            },
            codes::CONDITIONAL_ORDERS_DISABLED => ExchangeError::ConditionalOrdersDisabled { code },
            codes::NO_AVAILABLE_BALANCE | codes::INSUFFICIENT_BALANCE => {
                ExchangeError::InsufficientFunds { code }
            }
            codes::TOO_MANY_REQUESTS | codes::RATE_LIMIT => ExchangeError::RateLimited { code },
            _ => ExchangeError::Unknown {
                code,
                snippet: truncate_snippet(raw),
            },
        }
    }

    /// Transient errors may be retried; permanent ones must not be.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            ExchangeError::Timeout(_)
                | ExchangeError::RateLimited { .. }
                | ExchangeError::Transport(_)
                | ExchangeError::Unavailable(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_auth_codes_map_to_authentication() {
        for code in [401, 40101, 40103] {
            assert!(matches!(
                ExchangeError::from_code(code, ""),
                ExchangeError::Authentication { .. }
            ));
        }
    }

    #[test]
    fn test_permanent_codes_are_not_transient() {
        assert!(!ExchangeError::from_code(40101, "").is_transient());
        assert!(!ExchangeError::from_code(308, "bad price").is_transient());
        assert!(!ExchangeError::from_code(140001, "").is_transient());
        assert!(!ExchangeError::from_code(306, "").is_transient());
    }

    #[test]
    fn test_rate_limit_is_transient() {
        assert!(ExchangeError::from_code(42901, "").is_transient());
        assert!(ExchangeError::Timeout(Duration::from_secs(10)).is_transient());
    }

    #[test]
    fn test_unknown_code_keeps_snippet() {
        let err = ExchangeError::from_code(99999, "weird payload");
        match err {
            ExchangeError::Unknown { code, snippet } => {
                assert_eq!(code, 99999);
                assert_eq!(snippet, "weird payload");
            }
            other => panic!("expected Unknown, got {:?}", other),
        }
    }

    #[test]
    fn test_snippet_truncated() {
        let raw = "x".repeat(1000);
        let snippet = truncate_snippet(&raw);
        assert!(snippet.chars().count() <= ERROR_SNIPPET_MAX + 1);
        assert!(snippet.ends_with('…'));
    }
}
