//! Weight-capped EMA of the cross-venue premium.
//!
//! `premium = protocol_mark_equivalent / exchange_mid - 1`. The weight starts
//! at 1 and grows by one per sample up to `window`, so the first `window`
//! samples produce a plain running average before the value settles into a
//! fixed-window EMA.

use crate::error::{Result, StrategyError};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PremiumEma {
    pub value: Decimal,
    pub weight: u32,
}

/// Per-symbol premium EMAs. Mutated only by the engine tick.
#[derive(Debug, Clone)]
pub struct PremiumTracker {
    window: u32,
    emas: HashMap<String, PremiumEma>,
}

impl PremiumTracker {
    #[must_use]
    pub fn new(window: u32) -> Self {
        Self {
            window: window.max(1),
            emas: HashMap::new(),
        }
    }

    /// Changes the window; existing weights are re-capped on the next update.
    pub fn set_window(&mut self, window: u32) {
        self.window = window.max(1);
    }

    #[must_use]
    pub const fn window(&self) -> u32 {
        self.window
    }

    /// Folds one premium sample into `symbol`'s EMA and returns the new value.
    ///
    /// # Errors
    ///
    /// Returns [`StrategyError::NonPositiveMid`] if `exchange_mid <= 0`.
    pub fn update(
        &mut self,
        symbol: &str,
        exchange_mid: Decimal,
        protocol_mark_equivalent: Decimal,
    ) -> Result<Decimal> {
        if exchange_mid <= Decimal::ZERO {
            return Err(StrategyError::NonPositiveMid {
                symbol: symbol.to_string(),
                mid: exchange_mid,
            });
        }
        let premium = protocol_mark_equivalent / exchange_mid - Decimal::ONE;
        let cap = self.window - 1;

        let next = match self.emas.get(symbol) {
            None => PremiumEma {
                value: premium,
                weight: 1,
            },
            Some(ema) => {
                let weight = ema.weight.min(cap);
                let next_weight = weight + 1;
                PremiumEma {
                    value: (ema.value * Decimal::from(weight) + premium)
                        / Decimal::from(next_weight),
                    weight: next_weight,
                }
            }
        };

        debug!(symbol, %premium, ema = %next.value, weight = next.weight, "Premium EMA updated");
        self.emas.insert(symbol.to_string(), next);
        Ok(next.value)
    }

    /// Current EMA value, `None` before the first sample.
    #[must_use]
    pub fn value(&self, symbol: &str) -> Option<Decimal> {
        self.emas.get(symbol).map(|ema| ema.value)
    }

    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<PremiumEma> {
        self.emas.get(symbol).copied()
    }
}
