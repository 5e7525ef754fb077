//! Error types for order book maintenance.

use thiserror::Error;

/// Errors raised while applying stream messages to the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum OrderbookError {
    /// An update does not chain onto the current sequence id.
    #[error("sequence gap on {symbol}: book at {expected:?}, update prev_seq_id {received}")]
    Desync {
        symbol: String,
        /// Current sequence id, `None` when no snapshot has been applied.
        expected: Option<i64>,
        received: i64,
    },

    /// A resync snapshot is not bracketed by the buffered updates.
    #[error(
        "snapshot {snapshot_seq_id} for {symbol} does not line up with buffered update \
         {first_prev_seq_id}..{first_seq_id}"
    )]
    ResyncGap {
        symbol: String,
        snapshot_seq_id: i64,
        first_prev_seq_id: i64,
        first_seq_id: i64,
    },

    #[error("symbol not tracked: {0}")]
    UnknownSymbol(String),
}

impl OrderbookError {
    pub fn desync(symbol: impl Into<String>, expected: Option<i64>, received: i64) -> Self {
        Self::Desync {
            symbol: symbol.into(),
            expected,
            received,
        }
    }

    /// Desync and gap errors clear up with a fresh snapshot.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Desync { .. } | Self::ResyncGap { .. })
    }
}

pub type Result<T> = std::result::Result<T, OrderbookError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = OrderbookError::desync("BTC-USDT-SWAP", Some(10), 12);
        assert_eq!(
            err.to_string(),
            "sequence gap on BTC-USDT-SWAP: book at Some(10), update prev_seq_id 12"
        );
        assert!(err.is_retryable());
        assert!(!OrderbookError::UnknownSymbol("X".into()).is_retryable());
    }
}
