//! Decision pipeline for one symbol.
//!
//! The engine runs these in order every tick: [`PremiumTracker`] folds the
//! cross-venue premium into an EMA, [`ThresholdModel`] turns it into per-side
//! thresholds, [`ArbitrageSizer`] walks the exchange book against the
//! protocol's skew curve, and [`RiskController`] bounds the result.

pub mod error;
pub mod premium;
pub mod risk;
pub mod sizer;
pub mod threshold;

pub use error::{Result, StrategyError};
pub use premium::{PremiumEma, PremiumTracker};
pub use risk::{coarse_step, floor_to_step, ClampRequest, RiskController};
pub use sizer::{ArbitrageSizer, SizerInputs};
pub use threshold::{SideThresholds, ThresholdInputs, ThresholdModel};
