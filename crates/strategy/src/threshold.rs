//! Dynamic entry and exit thresholds.
//!
//! A side's margin starts from the base threshold and is shifted by the
//! funding each venue pays or charges for holding that side:
//!
//! - exchange funding `-s * rate * (time_to_funding / 8h)^2`, which fades as
//!   the funding time approaches;
//! - protocol funding `s * multiplier * funding_price_24h / index`.
//!
//! Entries use `max(base + adjustments, min_threshold)`. Exits only keep the
//! adjustments that make the exit easier, so an exit is never harder than the
//! matching entry. The sizer receives `margin - s * ema`.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use skew_arb_core::{EngineConfig, Side};

/// Exchange funding interval in milliseconds.
pub const FUNDING_INTERVAL_MS: i64 = 8 * 60 * 60 * 1000;

/// Market inputs for one symbol at one instant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThresholdInputs {
    pub ema: Decimal,
    pub funding_rate: Decimal,
    pub next_funding_time: DateTime<Utc>,
    pub funding_price_24h: Decimal,
    pub index_price: Decimal,
    pub now: DateTime<Utc>,
}

/// Sizer thresholds for both sides, EMA offset included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SideThresholds {
    pub long: Decimal,
    pub short: Decimal,
}

impl SideThresholds {
    #[must_use]
    pub const fn for_side(&self, side: Side) -> Decimal {
        match side {
            Side::Long => self.long,
            Side::Short => self.short,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThresholdModel {
    base: Decimal,
    min_threshold: Decimal,
    funding_multiplier: Decimal,
}

impl ThresholdModel {
    #[must_use]
    pub const fn new(base: Decimal, min_threshold: Decimal, funding_multiplier: Decimal) -> Self {
        Self {
            base,
            min_threshold,
            funding_multiplier,
        }
    }

    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.price_diff_threshold,
            config.min_threshold,
            config.funding_multiplier,
        )
    }

    /// Exchange funding term for `side`.
    #[must_use]
    pub fn exchange_funding_adjustment(&self, side: Side, inputs: &ThresholdInputs) -> Decimal {
        let remaining = (inputs.next_funding_time - inputs.now)
            .num_milliseconds()
            .clamp(0, FUNDING_INTERVAL_MS);
        let fraction = Decimal::from(remaining) / Decimal::from(FUNDING_INTERVAL_MS);
        -side.sign() * inputs.funding_rate * fraction * fraction
    }

    /// Protocol funding term for `side`.
    #[must_use]
    pub fn protocol_funding_adjustment(&self, side: Side, inputs: &ThresholdInputs) -> Decimal {
        if inputs.index_price <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        side.sign() * self.funding_multiplier * inputs.funding_price_24h / inputs.index_price
    }

    /// Margin required to open or grow a position on `side`.
    #[must_use]
    pub fn enter_margin(&self, side: Side, inputs: &ThresholdInputs) -> Decimal {
        let margin = self.base
            + self.exchange_funding_adjustment(side, inputs)
            + self.protocol_funding_adjustment(side, inputs);
        margin.max(self.min_threshold)
    }

    /// Margin required to reduce a position by trading `side`.
    #[must_use]
    pub fn exit_margin(&self, side: Side, inputs: &ThresholdInputs) -> Decimal {
        self.base
            + self.exchange_funding_adjustment(side, inputs).min(Decimal::ZERO)
            + self.protocol_funding_adjustment(side, inputs).min(Decimal::ZERO)
    }

    /// Sizer thresholds given the current signed protocol position.
    ///
    /// The side that reduces the position uses the exit margin.
    #[must_use]
    pub fn side_thresholds(&self, inputs: &ThresholdInputs, protocol_position: Decimal) -> SideThresholds {
        let reducing = Side::from_size(protocol_position).map(Side::opposite);
        let threshold = |side: Side| {
            let margin = if reducing == Some(side) {
                self.exit_margin(side, inputs)
            } else {
                self.enter_margin(side, inputs)
            };
            margin - side.sign() * inputs.ema
        };

        SideThresholds {
            long: threshold(Side::Long),
            short: threshold(Side::Short),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    fn inputs(rate: Decimal, hours_to_funding: i64, funding_price: Decimal) -> ThresholdInputs {
        let now = Utc::now();
        ThresholdInputs {
            ema: Decimal::ZERO,
            funding_rate: rate,
            next_funding_time: now + Duration::hours(hours_to_funding),
            funding_price_24h: funding_price,
            index_price: dec!(100),
            now,
        }
    }

    fn model() -> ThresholdModel {
        ThresholdModel::new(dec!(0.002), dec!(0.0005), Decimal::ONE)
    }

    #[test]
    fn test_no_funding_gives_base() {
        let i = inputs(Decimal::ZERO, 4, Decimal::ZERO);
        assert_eq!(model().enter_margin(Side::Long, &i), dec!(0.002));
        assert_eq!(model().exit_margin(Side::Short, &i), dec!(0.002));
    }

    #[test]
    fn test_exchange_funding_fades_toward_funding_time() {
        let m = model();
        let full = inputs(dec!(0.001), 8, Decimal::ZERO);
        let half = inputs(dec!(0.001), 4, Decimal::ZERO);
        let due = inputs(dec!(0.001), 0, Decimal::ZERO);

        assert_eq!(m.exchange_funding_adjustment(Side::Long, &full), dec!(-0.001));
        assert_eq!(m.exchange_funding_adjustment(Side::Long, &half), dec!(-0.00025));
        assert_eq!(m.exchange_funding_adjustment(Side::Long, &due), Decimal::ZERO);
        assert_eq!(m.exchange_funding_adjustment(Side::Short, &full), dec!(0.001));
    }

    #[test]
    fn test_time_to_funding_is_clamped() {
        let m = model();
        let far = inputs(dec!(0.001), 20, Decimal::ZERO);
        let past = inputs(dec!(0.001), -3, Decimal::ZERO);
        assert_eq!(m.exchange_funding_adjustment(Side::Long, &far), dec!(-0.001));
        assert_eq!(m.exchange_funding_adjustment(Side::Long, &past), Decimal::ZERO);
    }

    #[test]
    fn test_protocol_funding_sign_flips_by_side() {
        let m = model();
        let i = inputs(Decimal::ZERO, 4, dec!(0.05));
        assert_eq!(m.protocol_funding_adjustment(Side::Long, &i), dec!(0.0005));
        assert_eq!(m.protocol_funding_adjustment(Side::Short, &i), dec!(-0.0005));
    }

    #[test]
    fn test_enter_margin_floor() {
        // 0.002 - 0.01 would be negative
        let i = inputs(dec!(0.01), 8, Decimal::ZERO);
        assert_eq!(model().enter_margin(Side::Long, &i), dec!(0.0005));
    }

    #[test]
    fn test_exit_never_harder_than_enter() {
        let m = model();
        for (rate, price) in [
            (dec!(0.001), dec!(0.05)),
            (dec!(-0.001), dec!(0.05)),
            (dec!(0.001), dec!(-0.05)),
            (dec!(-0.0003), dec!(-0.01)),
        ] {
            let i = inputs(rate, 6, price);
            for side in [Side::Long, Side::Short] {
                assert!(m.exit_margin(side, &i) <= m.enter_margin(side, &i));
            }
        }
    }

    #[test]
    fn test_side_thresholds_use_exit_for_reducing_side() {
        let m = model();
        // Protocol funding charges longs, so entering long is harder.
        let mut i = inputs(Decimal::ZERO, 4, dec!(0.1));
        i.ema = dec!(0.001);

        let flat = m.side_thresholds(&i, Decimal::ZERO);
        assert_eq!(flat.long, dec!(0.003) - dec!(0.001));
        assert_eq!(flat.short, dec!(0.001) + dec!(0.001));

        // Short position: buying protocol reduces it and drops the penalty.
        let short = m.side_thresholds(&i, dec!(-2));
        assert_eq!(short.long, dec!(0.002) - dec!(0.001));
        assert_eq!(short.for_side(Side::Short), flat.short);
    }
}
