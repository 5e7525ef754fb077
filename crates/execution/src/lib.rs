//! Dual-leg execution across the exchange and the protocol.

pub mod coordinator;
pub mod error;
pub mod plan;

pub use coordinator::{
    CooldownBook, ExecutionCoordinator, ExecutionOutcome, OutcomeSummary, TRADE_TOPIC,
};
pub use error::{ExecutionError, Result};
pub use plan::{Decision, ExecutionPlan, ProtocolOrder, SymbolDecision};
