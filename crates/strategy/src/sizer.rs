//! Skew-curve sizing against the exchange book.
//!
//! The protocol's mark moves linearly with its skew, so filling `x` units
//! from skew `k` executes at the average of the marks at `k` and `k + x`.
//! For each exchange level the sizer solves for the largest fill whose
//! protocol execution price still beats the level by the side's threshold,
//! and takes levels until one is only partly used.
//!
//! # Example
//!
//! ```
//! use chrono::Utc;
//! use rust_decimal::Decimal;
//! use rust_decimal_macros::dec;
//! use skew_arb_core::{Book, OrderbookLevel};
//! use skew_arb_strategy::{ArbitrageSizer, SideThresholds, SizerInputs};
//!
//! let book = Book::from_levels(
//!     "BTC-USDT-SWAP",
//!     1,
//!     vec![OrderbookLevel::new(dec!(101), dec!(10)), OrderbookLevel::new(dec!(100), dec!(1000))],
//!     vec![OrderbookLevel::new(dec!(102), dec!(10))],
//!     Utc::now(),
//! );
//! let inputs = SizerInputs {
//!     book: &book,
//!     index_price: dec!(100),
//!     skewness: Decimal::ZERO,
//!     depth_factor: dec!(500),
//!     thresholds: SideThresholds { long: dec!(0.002), short: dec!(0.002) },
//!     quote_rate: Decimal::ONE,
//!     contract_size: Decimal::ONE,
//!     max_slippage: None,
//! };
//! assert_eq!(ArbitrageSizer::size(&inputs), dec!(10));
//! ```

use rust_decimal::Decimal;
use skew_arb_core::{Book, OrderbookLevel, Side};
use tracing::debug;

use crate::threshold::SideThresholds;

/// Everything the walk needs for one symbol.
#[derive(Debug, Clone, Copy)]
pub struct SizerInputs<'a> {
    pub book: &'a Book,
    pub index_price: Decimal,
    pub skewness: Decimal,
    pub depth_factor: Decimal,
    pub thresholds: SideThresholds,
    /// Protocol collateral price in exchange quote units.
    pub quote_rate: Decimal,
    /// Base units per exchange contract.
    pub contract_size: Decimal,
    /// Levels beyond `best * (1 -/+ slippage)` end the walk.
    pub max_slippage: Option<Decimal>,
}

impl SizerInputs<'_> {
    /// Protocol mark price: `index * (1 + skew / depth / 100)`.
    #[must_use]
    pub fn mark_price(&self) -> Decimal {
        self.index_price * (Decimal::ONE + self.skewness / self.depth_factor / Decimal::ONE_HUNDRED)
    }
}

pub struct ArbitrageSizer;

impl ArbitrageSizer {
    /// Side to trade, `None` when the mark sits inside the exchange touch.
    ///
    /// A mark below the best bid buys on the protocol and sells into the bids.
    #[must_use]
    pub fn direction(inputs: &SizerInputs<'_>) -> Option<Side> {
        if inputs.quote_rate <= Decimal::ZERO || inputs.depth_factor <= Decimal::ZERO {
            return None;
        }
        let mark = inputs.mark_price();
        let best_bid = inputs.book.best_bid()?.price / inputs.quote_rate;
        let best_ask = inputs.book.best_ask()?.price / inputs.quote_rate;

        if mark < best_bid {
            Some(Side::Long)
        } else if mark > best_ask {
            Some(Side::Short)
        } else {
            None
        }
    }

    /// Signed protocol size; positive buys on the protocol.
    #[must_use]
    pub fn size(inputs: &SizerInputs<'_>) -> Decimal {
        if inputs.index_price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let Some(side) = Self::direction(inputs) else {
            return Decimal::ZERO;
        };
        let levels: &[OrderbookLevel] = match side {
            Side::Long => &inputs.book.bids,
            Side::Short => &inputs.book.asks,
        };
        Self::walk(inputs, side, levels)
    }

    fn walk(inputs: &SizerInputs<'_>, side: Side, levels: &[OrderbookLevel]) -> Decimal {
        let s = side.sign();
        let threshold = inputs.thresholds.for_side(side);
        let slippage_limit = match (inputs.max_slippage, levels.first()) {
            (Some(slippage), Some(best)) => Some(best.price * (Decimal::ONE - s * slippage)),
            _ => None,
        };

        let mut total = Decimal::ZERO;
        for level in levels {
            if let Some(limit) = slippage_limit {
                if s * (level.price - limit) < Decimal::ZERO {
                    debug!(price = %level.price, %limit, "Level beyond slippage limit");
                    break;
                }
            }

            let price = level.price / inputs.quote_rate;
            let quantity = level.quantity * inputs.contract_size;
            let target_skew = s
                * Decimal::ONE_HUNDRED
                * inputs.depth_factor
                * (price * (Decimal::ONE - s * threshold) / inputs.index_price - Decimal::ONE);
            let delta = quantity.min(Decimal::TWO * (target_skew - s * inputs.skewness) - s * total);

            debug!(%side, %price, %quantity, %delta, "Sizer level");
            if delta < Decimal::ZERO {
                break;
            }
            total += s * delta;
            if delta < quantity {
                break;
            }
        }
        total
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn levels(raw: &[(Decimal, Decimal)]) -> Vec<OrderbookLevel> {
        raw.iter().map(|(p, q)| OrderbookLevel::new(*p, *q)).collect()
    }

    fn book(bids: &[(Decimal, Decimal)], asks: &[(Decimal, Decimal)]) -> Book {
        Book::from_levels("BTC-USDT-SWAP", 1, levels(bids), levels(asks), Utc::now())
    }

    fn inputs(book: &Book) -> SizerInputs<'_> {
        SizerInputs {
            book,
            index_price: dec!(100),
            skewness: Decimal::ZERO,
            depth_factor: dec!(500),
            thresholds: SideThresholds {
                long: dec!(0.002),
                short: dec!(0.002),
            },
            quote_rate: Decimal::ONE,
            contract_size: Decimal::ONE,
            max_slippage: None,
        }
    }

    #[test]
    fn test_worked_example_returns_ten() {
        let b = book(&[(dec!(101), dec!(10)), (dec!(100), dec!(1000))], &[(dec!(102), dec!(5))]);
        assert_eq!(ArbitrageSizer::direction(&inputs(&b)), Some(Side::Long));
        assert_eq!(ArbitrageSizer::size(&inputs(&b)), dec!(10));
    }

    #[test]
    fn test_mark_inside_touch_is_zero() {
        let b = book(&[(dec!(99.9), dec!(10))], &[(dec!(100.1), dec!(10))]);
        assert_eq!(ArbitrageSizer::direction(&inputs(&b)), None);
        assert_eq!(ArbitrageSizer::size(&inputs(&b)), Decimal::ZERO);
    }

    #[test]
    fn test_partial_level_stops_walk() {
        // Level 101 supports 2 * 399 = 798 units; only part of 1000 is taken.
        let b = book(&[(dec!(101), dec!(1000)), (dec!(100.9), dec!(1000))], &[(dec!(102), dec!(5))]);
        assert_eq!(ArbitrageSizer::size(&inputs(&b)), dec!(798));
    }

    #[test]
    fn test_short_walks_asks_with_negative_size() {
        let b = book(&[(dec!(98), dec!(5))], &[(dec!(99), dec!(10)), (dec!(100), dec!(1000))]);
        let i = inputs(&b);
        assert_eq!(ArbitrageSizer::direction(&i), Some(Side::Short));
        assert_eq!(ArbitrageSizer::size(&i), dec!(-10));
    }

    #[test]
    fn test_existing_skew_reduces_room() {
        let b = book(&[(dec!(101), dec!(1000))], &[(dec!(102), dec!(5))]);
        let mut i = inputs(&b);
        i.skewness = dec!(100);
        // mark 100.2; room 2 * (399 - 100) = 598
        assert_eq!(ArbitrageSizer::size(&i), dec!(598));
    }

    #[test]
    fn test_contract_size_scales_quantity() {
        let b = book(&[(dec!(101), dec!(100)), (dec!(100), dec!(1000))], &[(dec!(102), dec!(5))]);
        let mut i = inputs(&b);
        i.contract_size = dec!(0.1);
        assert_eq!(ArbitrageSizer::size(&i), dec!(10));
    }

    #[test]
    fn test_slippage_limit_ends_walk() {
        let b = book(
            &[(dec!(101.5), dec!(10)), (dec!(101), dec!(10)), (dec!(100.9), dec!(1000))],
            &[(dec!(102), dec!(5))],
        );
        let mut i = inputs(&b);
        i.max_slippage = Some(dec!(0.004));
        // Limit 101.094: only the first level is eligible.
        assert_eq!(ArbitrageSizer::size(&i), dec!(10));

        i.max_slippage = None;
        assert!(ArbitrageSizer::size(&i) > dec!(20));
    }

    #[test]
    fn test_higher_threshold_shrinks_size() {
        let b = book(&[(dec!(101), dec!(1000))], &[(dec!(102), dec!(5))]);
        let mut i = inputs(&b);
        let loose = ArbitrageSizer::size(&i);
        i.thresholds.long = dec!(0.008);
        let tight = ArbitrageSizer::size(&i);
        assert!(tight < loose);
        assert!(tight > Decimal::ZERO);
    }
}
