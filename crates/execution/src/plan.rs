//! Materialization of decisions into per-venue action lists.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use skew_arb_core::{ActionParam, ActionType, OpenOrder, SymbolParams, Venue};

/// What the strategy wants for one symbol this tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Decision {
    Hold,
    /// Signed protocol size; the exchange trades the opposite amount.
    Trade { size: Decimal },
    /// Single-venue correction of an unhedged imbalance.
    Hedge { venue: Venue, size: Decimal },
}

impl Decision {
    #[must_use]
    pub fn is_actionable(&self) -> bool {
        match self {
            Self::Hold => false,
            Self::Trade { size } | Self::Hedge { size, .. } => !size.is_zero(),
        }
    }
}

/// Decision plus the context needed to turn it into orders.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SymbolDecision {
    pub params: SymbolParams,
    pub decision: Decision,
    /// Resting exchange orders, cancelled ahead of any exchange leg.
    pub open_orders: Vec<OpenOrder>,
}

/// Market order on the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolOrder {
    pub market_id: u32,
    /// Signed size, positive for longs.
    pub size: Decimal,
}

impl ProtocolOrder {
    #[must_use]
    pub fn is_long(&self) -> bool {
        self.size > Decimal::ZERO
    }
}

/// Orders for both venues from one selected decision.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionPlan {
    pub exchange: Vec<ActionParam>,
    pub protocol: Vec<ProtocolOrder>,
}

const fn priority(action_type: ActionType) -> u8 {
    match action_type {
        ActionType::Cancel => 0,
        ActionType::Market => 1,
        ActionType::Limit => 2,
    }
}

impl ExecutionPlan {
    #[must_use]
    pub fn from_decision(decision: &SymbolDecision) -> Self {
        let params = &decision.params;
        let mut plan = Self::default();

        let exchange_size = match decision.decision {
            Decision::Hold => None,
            Decision::Trade { size } => {
                plan.protocol.push(ProtocolOrder {
                    market_id: params.protocol_market_id,
                    size,
                });
                Some(-size)
            }
            Decision::Hedge {
                venue: Venue::Protocol,
                size,
            } => {
                plan.protocol.push(ProtocolOrder {
                    market_id: params.protocol_market_id,
                    size,
                });
                None
            }
            Decision::Hedge {
                venue: Venue::Exchange,
                size,
            } => Some(size),
        };

        if let Some(size) = exchange_size {
            plan.exchange.extend(
                decision
                    .open_orders
                    .iter()
                    .map(|order| ActionParam::cancel(&params.venue_symbol, &order.order_id)),
            );
            plan.exchange.push(ActionParam::market(&params.venue_symbol, size));
        }
        plan.sort();
        plan
    }

    /// Cancels first, then market orders, then limits. Stable within a type.
    pub fn sort(&mut self) {
        self.exchange.sort_by_key(|action| priority(action.action_type()));
    }

    pub fn is_empty(&self) -> bool {
        self.exchange.is_empty() && self.protocol.is_empty()
    }
}
