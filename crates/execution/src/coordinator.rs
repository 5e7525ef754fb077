//! Per-tick selection and dual-leg submission.
//!
//! # Overview
//!
//! Decisions arrive in the configured symbol priority order. The coordinator
//! takes the first actionable decision whose symbol is out of cooldown,
//! stamps the cooldown, and submits both venue lists concurrently with
//! `tokio::join!`. A failed leg is alerted and never rolled back; the next
//! tick's hedge check repairs any resulting imbalance. A fully submitted set
//! is announced under [`TRADE_TOPIC`] with both order lists.

use crate::error::ExecutionError;
use crate::plan::{Decision, ExecutionPlan, ProtocolOrder, SymbolDecision};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use skew_arb_core::{
    ActionParam, Alert, AlertSink, EngineConfig, OrderAck, OrderVariant, ProtocolClient, Venue,
    VenueClient,
};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Alert topic of every fully submitted order set.
pub const TRADE_TOPIC: &str = "ARBITRAGE DETECTED";

/// Last order time per symbol.
#[derive(Debug, Clone, Default)]
pub struct CooldownBook {
    last_order: HashMap<String, DateTime<Utc>>,
}

impl CooldownBook {
    /// True while `last + interval > now`.
    #[must_use]
    pub fn is_blocked(&self, symbol: &str, interval: Duration, now: DateTime<Utc>) -> bool {
        self.last_order
            .get(symbol)
            .is_some_and(|last| *last + interval > now)
    }

    pub fn record(&mut self, symbol: &str, at: DateTime<Utc>) {
        self.last_order.insert(symbol.to_string(), at);
    }

    #[must_use]
    pub fn last_order(&self, symbol: &str) -> Option<DateTime<Utc>> {
        self.last_order.get(symbol).copied()
    }
}

/// Result of one coordinator cycle.
#[derive(Debug)]
pub enum ExecutionOutcome {
    /// Nothing eligible this tick.
    Idle,
    Submitted {
        symbol: String,
        decision: Decision,
        acks: Vec<OrderAck>,
    },
    /// At least one leg succeeded and at least one failed.
    PartialFailure {
        symbol: String,
        decision: Decision,
        acks: Vec<OrderAck>,
        errors: Vec<ExecutionError>,
    },
    Failed {
        symbol: String,
        decision: Decision,
        errors: Vec<ExecutionError>,
    },
}

impl ExecutionOutcome {
    #[must_use]
    pub fn symbol(&self) -> Option<&str> {
        match self {
            Self::Idle => None,
            Self::Submitted { symbol, .. }
            | Self::PartialFailure { symbol, .. }
            | Self::Failed { symbol, .. } => Some(symbol),
        }
    }

    #[must_use]
    pub const fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    /// Short label for reports.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Submitted { .. } => "submitted",
            Self::PartialFailure { .. } => "partial_failure",
            Self::Failed { .. } => "failed",
        }
    }
}

/// Serializable view of an outcome, used in tick reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutcomeSummary {
    pub outcome: &'static str,
    pub symbol: Option<String>,
    pub errors: Vec<String>,
}

impl From<&ExecutionOutcome> for OutcomeSummary {
    fn from(outcome: &ExecutionOutcome) -> Self {
        let errors = match outcome {
            ExecutionOutcome::PartialFailure { errors, .. } | ExecutionOutcome::Failed { errors, .. } => {
                errors.iter().map(ToString::to_string).collect()
            }
            _ => Vec::new(),
        };
        Self {
            outcome: outcome.label(),
            symbol: outcome.symbol().map(str::to_string),
            errors,
        }
    }
}

pub struct ExecutionCoordinator {
    venue: Arc<dyn VenueClient>,
    protocol: Arc<dyn ProtocolClient>,
    alerts: Arc<dyn AlertSink>,
    cooldowns: CooldownBook,
    min_order_interval: Duration,
    hedge_cooldown: Duration,
}

fn millis(ms: u64) -> Duration {
    Duration::milliseconds(i64::try_from(ms).unwrap_or(i64::MAX))
}

impl ExecutionCoordinator {
    #[must_use]
    pub fn new(
        venue: Arc<dyn VenueClient>,
        protocol: Arc<dyn ProtocolClient>,
        alerts: Arc<dyn AlertSink>,
        config: &EngineConfig,
    ) -> Self {
        Self {
            venue,
            protocol,
            alerts,
            cooldowns: CooldownBook::default(),
            min_order_interval: millis(config.min_order_interval_ms),
            hedge_cooldown: millis(config.hedge_cooldown_ms),
        }
    }

    /// Applies new pacing intervals. Recorded order times are kept.
    pub fn update_config(&mut self, config: &EngineConfig) {
        self.min_order_interval = millis(config.min_order_interval_ms);
        self.hedge_cooldown = millis(config.hedge_cooldown_ms);
    }

    #[must_use]
    pub const fn cooldowns(&self) -> &CooldownBook {
        &self.cooldowns
    }

    fn interval_for(&self, decision: &Decision) -> Duration {
        match decision {
            Decision::Hedge { .. } => self.hedge_cooldown,
            _ => self.min_order_interval,
        }
    }

    /// Index of the first actionable decision out of cooldown.
    #[must_use]
    pub fn select(&self, decisions: &[SymbolDecision], now: DateTime<Utc>) -> Option<usize> {
        decisions.iter().position(|d| {
            if !d.decision.is_actionable() {
                return false;
            }
            let blocked = self
                .cooldowns
                .is_blocked(&d.params.base, self.interval_for(&d.decision), now);
            if blocked {
                debug!(symbol = %d.params.base, "Symbol in cooldown");
            }
            !blocked
        })
    }

    /// Selects at most one decision and submits it.
    pub async fn execute(&mut self, decisions: &[SymbolDecision], now: DateTime<Utc>) -> ExecutionOutcome {
        let Some(index) = self.select(decisions, now) else {
            return ExecutionOutcome::Idle;
        };
        let selected = &decisions[index];
        let symbol = selected.params.base.clone();
        self.cooldowns.record(&symbol, now);

        let plan = ExecutionPlan::from_decision(selected);
        info!(
            symbol = %symbol,
            decision = ?selected.decision,
            exchange_actions = plan.exchange.len(),
            protocol_orders = plan.protocol.len(),
            "Submitting orders"
        );

        let (exchange_result, protocol_result) = tokio::join!(
            submit_exchange(self.venue.as_ref(), &plan.exchange),
            submit_protocol(self.protocol.as_ref(), &plan.protocol),
        );

        let mut acks = Vec::new();
        let mut errors = Vec::new();
        for result in [exchange_result, protocol_result] {
            match result {
                Ok(leg_acks) => acks.extend(leg_acks),
                Err(e) => errors.push(e),
            }
        }

        if errors.is_empty() {
            self.alerts
                .notify(
                    Alert::new(TRADE_TOPIC, trade_text(&symbol, &selected.decision, &plan))
                        .dedupe(std::time::Duration::ZERO)
                        .mention(),
                )
                .await;
            return ExecutionOutcome::Submitted {
                symbol,
                decision: selected.decision,
                acks,
            };
        }

        for e in &errors {
            error!(symbol = %symbol, venue = %e.venue(), error = %e, "Execution leg failed");
        }
        let text = errors
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n");
        self.alerts
            .notify(Alert::new("EXECUTION ERROR", format!("({symbol}) {text}")).mention().urgent())
            .await;

        if acks.is_empty() {
            ExecutionOutcome::Failed {
                symbol,
                decision: selected.decision,
                errors,
            }
        } else {
            ExecutionOutcome::PartialFailure {
                symbol,
                decision: selected.decision,
                acks,
                errors,
            }
        }
    }
}

fn trade_text(symbol: &str, decision: &Decision, plan: &ExecutionPlan) -> String {
    let json = |value: serde_json::Result<String>| value.unwrap_or_else(|e| format!("<{e}>"));
    format!(
        "({symbol}) {}\n*EXCHANGE ORDERS*\n{}\n*PROTOCOL ORDERS*\n{}",
        json(serde_json::to_string(decision)),
        json(serde_json::to_string(&plan.exchange)),
        json(serde_json::to_string(&plan.protocol)),
    )
}

/// Runs exchange actions in list order, stopping at the first failure.
async fn submit_exchange(
    client: &dyn VenueClient,
    actions: &[ActionParam],
) -> Result<Vec<OrderAck>, ExecutionError> {
    let mut acks = Vec::with_capacity(actions.len());
    for action in actions {
        let result = match action.order {
            OrderVariant::Cancel { .. } => client.cancel_order(action).await,
            OrderVariant::Market { .. } => client.create_market_order(action).await,
            OrderVariant::Limit { .. } => client.create_limit_order(action).await,
        };
        acks.push(result.map_err(|e| ExecutionError::leg(Venue::Exchange, e))?);
    }
    Ok(acks)
}

async fn submit_protocol(
    client: &dyn ProtocolClient,
    orders: &[ProtocolOrder],
) -> Result<Vec<OrderAck>, ExecutionError> {
    let mut acks = Vec::with_capacity(orders.len());
    for order in orders {
        let ack = client
            .submit_order(order.size.abs(), order.market_id, order.is_long())
            .await
            .map_err(|e| ExecutionError::leg(Venue::Protocol, e))?;
        acks.push(ack);
    }
    Ok(acks)
}
