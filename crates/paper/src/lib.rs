//! In-memory venues for simulation and end-to-end tests.
//!
//! Every client here makes **zero API calls**: fills are computed locally
//! from the scenario's books and protocol curve. They implement the same
//! collaborator traits a live deployment would, so the engine cannot tell
//! the difference.
//!
//! ```
//! use skew_arb_paper::Scenario;
//!
//! let world = Scenario::demo().build();
//! assert_eq!(world.protocol.market("BTC_USDC").unwrap().market_id, 0);
//! ```

mod fill;
pub mod protocol;
pub mod scenario;
pub mod swap;
pub mod venue;

pub use protocol::{PaperMarket, PaperProtocol};
pub use scenario::{MarketScenario, Scenario, DEMO_WARMUP_STEPS};
pub use swap::PaperSwap;
pub use venue::PaperVenue;

use std::sync::Arc;

/// The three simulated collaborators, shared between the engine and the
/// caller that inspects them.
#[derive(Debug, Clone)]
pub struct PaperWorld {
    pub venue: Arc<PaperVenue>,
    pub protocol: Arc<PaperProtocol>,
    pub swap: Arc<PaperSwap>,
}
