//! Hedge checks and trade clamping.
//!
//! Sizes are signed protocol base units: positive buys on the protocol. The
//! exchange leg always trades the opposite size.

use rust_decimal::prelude::Signed;
use rust_decimal::Decimal;
use skew_arb_core::{EngineConfig, SymbolParams};
use tracing::debug;

/// Floors `size` toward zero to a multiple of `step`, preserving sign.
#[must_use]
pub fn floor_to_step(size: Decimal, step: Decimal) -> Decimal {
    if step <= Decimal::ZERO {
        return size;
    }
    (size / step).trunc() * step
}

/// The coarser of the two venues' quantity steps, in base units.
#[must_use]
pub fn coarse_step(exchange_step: Decimal, protocol_step: Decimal) -> Decimal {
    exchange_step.max(protocol_step)
}

/// One clamp evaluation for a single symbol.
#[derive(Debug, Clone, Copy)]
pub struct ClampRequest<'a> {
    pub params: &'a SymbolParams,
    /// Raw sizer output.
    pub size: Decimal,
    /// Exchange mid price.
    pub mid: Decimal,
    /// Current signed protocol position.
    pub position: Decimal,
    /// Protocol skew before the trade.
    pub skewness: Decimal,
    /// Remaining leverage headroom in USDT, see [`RiskController::leverage_capacity`].
    pub capacity_usdt: Decimal,
    /// Coarse quantity step in base units.
    pub step: Decimal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskController {
    max_order_usdt: Decimal,
    unhedged_threshold_usdt: Decimal,
    max_total_position_usdt: Decimal,
    max_leverage: Decimal,
}

impl RiskController {
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            max_order_usdt: config.max_order_usdt,
            unhedged_threshold_usdt: config.unhedged_threshold_usdt,
            max_total_position_usdt: config.max_total_position_usdt,
            max_leverage: config.max_leverage,
        }
    }

    /// USDT notional still available for new exposure.
    ///
    /// `min(max_total, min(exchange, protocol * quote_rate) * leverage) - gross`,
    /// where `gross` is the sum of `|position| * mid` over all symbols. May be
    /// negative when the book is already over-extended.
    #[must_use]
    pub fn leverage_capacity(
        &self,
        exchange_balance: Decimal,
        protocol_balance: Decimal,
        quote_rate: Decimal,
        gross_exposure_usdt: Decimal,
    ) -> Decimal {
        let collateral = exchange_balance.min(protocol_balance * quote_rate);
        self.max_total_position_usdt.min(collateral * self.max_leverage) - gross_exposure_usdt
    }

    /// Corrective size for an unhedged imbalance, if one is needed.
    ///
    /// The correction has the opposite sign of `exchange_position +
    /// protocol_position` and never exceeds `max_order_usdt / mid`.
    #[must_use]
    pub fn hedge_check(
        &self,
        exchange_position: Decimal,
        protocol_position: Decimal,
        mid: Decimal,
        step: Decimal,
    ) -> Option<Decimal> {
        if mid <= Decimal::ZERO {
            return None;
        }
        let imbalance = exchange_position + protocol_position;
        if imbalance.abs() * mid <= self.unhedged_threshold_usdt {
            return None;
        }

        let magnitude = floor_to_step(imbalance.abs().min(self.max_order_usdt / mid), step);
        if magnitude.is_zero() {
            return None;
        }
        let correction = if imbalance > Decimal::ZERO {
            -magnitude
        } else {
            magnitude
        };
        debug!(%imbalance, %correction, "Hedge correction required");
        Some(correction)
    }

    /// Bounds a raw sizer output by every risk limit, the step and the dust floor.
    #[must_use]
    pub fn clamp(&self, req: &ClampRequest<'_>) -> Decimal {
        if req.size.is_zero() || req.mid <= Decimal::ZERO {
            return Decimal::ZERO;
        }
        let s = req.size.signum();
        let pos = req.position;
        let params = req.params;

        // Every bound is a magnitude in the trade's direction.
        let max_base = params.max_position_usdt / req.mid;
        let skew_cap = params.max_market_skewness_usdt / req.mid;
        let leverage_room = req.capacity_usdt.max(Decimal::ZERO) / req.mid + pos.abs();

        let mut bounds = vec![
            ("order", self.max_order_usdt / req.mid),
            ("position", max_base - s * pos),
            ("skew", skew_cap - s * req.skewness),
            ("leverage", leverage_room - s * pos),
        ];
        let reducing = s * pos < Decimal::ZERO;
        if reducing {
            bounds.push(("exit", pos.abs()));
        }

        let mut magnitude = req.size.abs();
        for (name, bound) in bounds {
            let bound = bound.max(Decimal::ZERO);
            if bound < magnitude {
                debug!(limit = name, %bound, "Trade clamped");
                magnitude = bound;
            }
        }

        let clamped = floor_to_step(s * magnitude, req.step);
        if clamped.is_zero() {
            return Decimal::ZERO;
        }

        if clamped.abs() * req.mid < params.min_order_usdt {
            if reducing && pos.abs() * req.mid <= params.min_order_usdt {
                return floor_to_step(-pos, req.step);
            }
            debug!(size = %clamped, "Trade below minimum order notional");
            return Decimal::ZERO;
        }
        clamped
    }
}
