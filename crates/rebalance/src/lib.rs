//! Cross-venue balance rebalancing.
//!
//! [`RebalanceStateMachine`] moves funds between the exchange and the
//! protocol when one side drifts out of its target band.
//! [`RebalanceActor`] runs it as a background task fed by balance
//! snapshots and controlled through a [`RebalanceHandle`].

pub mod actor;
pub mod error;
pub mod machine;

pub use actor::{RebalanceActor, RebalanceCommand, RebalanceHandle};
pub use error::{RebalanceError, RebalanceStep, Result};
pub use machine::{
    BalanceSnapshot, RebalancePlan, RebalanceSettings, RebalanceState, RebalanceStateMachine,
    RebalanceStatus,
};
