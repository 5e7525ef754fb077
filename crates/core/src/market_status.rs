//! Protocol market status and its decoding boundary.
//!
//! The protocol client hands back loosely-typed JSON. [`MarketStatus::decode`]
//! is the only place that payload is interpreted: every field must be present
//! and numeric, and the depth factor must be positive.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;
use thiserror::Error;

/// Errors raised while decoding a market status payload.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("market status payload is not an object")]
    NotAnObject,

    #[error("missing field: {field}")]
    Missing { field: &'static str },

    #[error("invalid value for {field}: {value}")]
    Invalid { field: &'static str, value: String },

    #[error("depth factor must be positive, got {0}")]
    NonPositiveDepth(Decimal),
}

/// Per-market state of the protocol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketStatus {
    /// Signed net open interest on the protocol.
    pub skewness: Decimal,
    /// How much the mark price moves per unit of skew. Always > 0.
    pub depth_factor: Decimal,
    pub oi_soft_cap: Decimal,
    pub oi_hard_cap: Decimal,
    /// Funding accrued over 24h, in price units.
    pub funding_price_24h: Decimal,
    pub target_leverage: Decimal,
    pub funding_coefficient: Decimal,
}

impl MarketStatus {
    /// Decodes a raw protocol payload.
    ///
    /// Numbers may arrive as JSON numbers or numeric strings.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError`] if the payload is not an object, a field is
    /// missing or non-numeric, or the depth factor is not positive.
    pub fn decode(value: &Value) -> Result<Self, DecodeError> {
        let obj = value.as_object().ok_or(DecodeError::NotAnObject)?;
        let field = |name: &'static str| -> Result<Decimal, DecodeError> {
            let raw = obj.get(name).ok_or(DecodeError::Missing { field: name })?;
            parse_decimal(name, raw)
        };

        let depth_factor = field("depthFactor")?;
        if depth_factor <= Decimal::ZERO {
            return Err(DecodeError::NonPositiveDepth(depth_factor));
        }

        Ok(Self {
            skewness: field("skewness")?,
            depth_factor,
            oi_soft_cap: field("oiSoftCap")?,
            oi_hard_cap: field("oiHardCap")?,
            funding_price_24h: field("fundingRatePrice24h")?,
            target_leverage: field("targetLeverage")?,
            funding_coefficient: field("coefficient")?,
        })
    }

    /// Synthetic mark price: `index * (1 + skewness / depth_factor / 100)`.
    #[must_use]
    pub fn mark_price(&self, index_price: Decimal) -> Decimal {
        index_price * (Decimal::ONE + self.skewness / self.depth_factor / Decimal::ONE_HUNDRED)
    }

    /// Daily protocol funding as a fraction of the index price.
    #[must_use]
    pub fn funding_rate_24h(&self, index_price: Decimal) -> Decimal {
        if index_price.is_zero() {
            return Decimal::ZERO;
        }
        self.funding_price_24h / index_price
    }
}

fn parse_decimal(field: &'static str, raw: &Value) -> Result<Decimal, DecodeError> {
    let text = match raw {
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.trim().to_string(),
        other => {
            return Err(DecodeError::Invalid {
                field,
                value: other.to_string(),
            })
        }
    };

    Decimal::from_str(&text)
        .or_else(|_| Decimal::from_scientific(&text))
        .map_err(|_| DecodeError::Invalid { field, value: text })
}
