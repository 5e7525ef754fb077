//! Errors raised by the tick.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    /// A required field is missing or older than the snapshot TTL. Only the
    /// symbol is skipped.
    #[error("data validation failed for {symbol}: {field}")]
    DataValidation { symbol: String, field: String },

    /// The fan-out fetch exceeded its latency budget.
    #[error("data fetch exceeded {budget_ms}ms")]
    FetchTimeout { budget_ms: u64 },

    /// A tick-wide input (balances, quote rate) is missing.
    #[error("reference data unavailable ({what}): {reason}")]
    ReferencePrice { what: String, reason: String },

    #[error("order book stream unavailable")]
    OrderbookUnavailable,
}

impl EngineError {
    pub fn validation(symbol: impl Into<String>, field: impl Into<String>) -> Self {
        Self::DataValidation {
            symbol: symbol.into(),
            field: field.into(),
        }
    }

    pub fn reference(what: impl Into<String>, reason: impl ToString) -> Self {
        Self::ReferencePrice {
            what: what.into(),
            reason: reason.to_string(),
        }
    }

    /// Transient feed or latency problems clear on a later tick. A missing
    /// reference input usually means a venue account or the quote book is
    /// misconfigured.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(self, Self::ReferencePrice { .. })
    }

    /// Alert topic for tick-level failures, `None` for expected skips.
    #[must_use]
    pub const fn alert_topic(&self) -> Option<&'static str> {
        match self {
            Self::DataValidation { .. } => Some("DATA VALIDATION"),
            Self::FetchTimeout { .. } => Some("DATA FETCH TIMEOUT"),
            Self::ReferencePrice { .. } => Some("REFERENCE PRICE UNAVAILABLE"),
            Self::OrderbookUnavailable => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_and_topics() {
        let err = EngineError::validation("BTC", "orderbook");
        assert_eq!(err.to_string(), "data validation failed for BTC: orderbook");
        assert_eq!(err.alert_topic(), Some("DATA VALIDATION"));

        let timeout = EngineError::FetchTimeout { budget_ms: 3000 };
        assert!(timeout.is_retryable());
        assert_eq!(timeout.to_string(), "data fetch exceeded 3000ms");
        assert_eq!(EngineError::OrderbookUnavailable.alert_topic(), None);
    }
}
