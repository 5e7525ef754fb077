use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use skew_arb_core::Position;

/// Applies a signed fill to `position` and returns the realized PnL.
///
/// Adding to a position averages the entry price. Reducing realizes PnL on the
/// closed part; crossing through zero opens the remainder at `price`.
pub(crate) fn apply_fill(position: &mut Position, size: Decimal, price: Decimal) -> Decimal {
    let old = position.size;
    let new = old + size;

    if old.is_zero() || old.signum() == size.signum() {
        let entry = position.entry_price.unwrap_or(price);
        let weighted = old.abs() * entry + size.abs() * price;
        position.entry_price = Some(weighted / new.abs());
        position.size = new;
        return Decimal::ZERO;
    }

    let closed = size.abs().min(old.abs());
    let entry = position.entry_price.unwrap_or(price);
    let realized = closed * (price - entry) * old.signum();

    position.size = new;
    position.entry_price = if new.is_zero() {
        None
    } else if new.signum() == old.signum() {
        Some(entry)
    } else {
        Some(price)
    };
    realized
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use rust_decimal_macros::dec;

    #[test]
    fn test_fill_averages_then_realizes() {
        let mut pos = Position::flat("X", Utc::now());
        assert_eq!(apply_fill(&mut pos, dec!(2), dec!(100)), Decimal::ZERO);
        assert_eq!(apply_fill(&mut pos, dec!(2), dec!(110)), Decimal::ZERO);
        assert_eq!(pos.entry_price, Some(dec!(105)));

        // Sell 1 at 115 against entry 105
        assert_eq!(apply_fill(&mut pos, dec!(-1), dec!(115)), dec!(10));
        assert_eq!(pos.size, dec!(3));
        assert_eq!(pos.entry_price, Some(dec!(105)));
    }

    #[test]
    fn test_fill_through_zero_reopens_at_price() {
        let mut pos = Position::flat("X", Utc::now());
        apply_fill(&mut pos, dec!(-2), dec!(100));
        // Buy 5: closes 2 short at a loss of 20, opens 3 long at 110
        assert_eq!(apply_fill(&mut pos, dec!(5), dec!(110)), dec!(-20));
        assert_eq!(pos.size, dec!(3));
        assert_eq!(pos.entry_price, Some(dec!(110)));

        apply_fill(&mut pos, dec!(-3), dec!(110));
        assert_eq!(pos.entry_price, None);
    }
}
