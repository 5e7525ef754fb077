use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// One leg of a rebalance workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RebalanceStep {
    VenueWithdraw,
    Swap,
    ProtocolDeposit,
    ProtocolWithdraw,
    VenueDeposit,
}

impl fmt::Display for RebalanceStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::VenueWithdraw => "exchange withdraw",
            Self::Swap => "swap",
            Self::ProtocolDeposit => "protocol deposit",
            Self::ProtocolWithdraw => "protocol withdraw",
            Self::VenueDeposit => "exchange deposit",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Error)]
pub enum RebalanceError {
    #[error("rebalance step '{step}' failed: {source:#}")]
    Step {
        step: RebalanceStep,
        #[source]
        source: anyhow::Error,
    },

    #[error("rebalance actor is not running")]
    ActorUnavailable,
}

impl RebalanceError {
    /// Step failures halt the machine until an operator resets it.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::ActorUnavailable)
    }
}

pub type Result<T> = std::result::Result<T, RebalanceError>;
