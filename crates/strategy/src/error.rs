use rust_decimal::Decimal;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StrategyError {
    #[error("({symbol}) exchange mid price must be positive, got {mid}")]
    NonPositiveMid { symbol: String, mid: Decimal },

    #[error("index price must be positive, got {0}")]
    NonPositiveIndex(Decimal),

    #[error("quote rate must be positive, got {0}")]
    NonPositiveQuoteRate(Decimal),
}

pub type Result<T> = std::result::Result<T, StrategyError>;
