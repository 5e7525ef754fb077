//! Rebalance state machine.
//!
//! ```text
//! None --(exchange short)--> ProtocolToVenue --ok--> None
//! None --(protocol short)--> VenueToProtocol --ok--> None
//!            any step error ---------------------> Halt --reset--> None
//! ```
//!
//! Each workflow runs three steps with a settle delay between them, feeding
//! the amount received by one step into the next.

use crate::error::{RebalanceError, RebalanceStep, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use skew_arb_core::{Alert, AlertSink, EngineConfig, ProtocolClient, SwapClient, VenueClient};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RebalanceState {
    #[default]
    None,
    VenueToProtocol,
    ProtocolToVenue,
    Halt,
}

/// State plus the time it was entered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalanceStatus {
    pub state: RebalanceState,
    pub since: DateTime<Utc>,
    /// Failure that caused the current halt.
    pub last_error: Option<String>,
}

/// Equity on both venues, in exchange quote units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    pub exchange: Decimal,
    pub protocol: Decimal,
    /// Protocol collateral price in exchange quote units.
    pub quote_rate: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl BalanceSnapshot {
    #[must_use]
    pub fn total(&self) -> Decimal {
        self.exchange + self.protocol
    }
}

/// A transfer the machine decided to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RebalancePlan {
    pub direction: RebalanceState,
    /// Amount in exchange quote units.
    pub amount: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RebalanceSettings {
    pub initial_balance: Decimal,
    pub ratio_venue: Decimal,
    pub ratio_protocol: Decimal,
    pub diff_threshold: Decimal,
    pub min_rebalance: Decimal,
    pub settle_delay: Duration,
    pub venue_currency: String,
    pub protocol_currency: String,
}

impl RebalanceSettings {
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            initial_balance: config.initial_balance_usdt,
            ratio_venue: config.balance_ratio_venue_a,
            ratio_protocol: config.balance_ratio_venue_b,
            diff_threshold: config.balance_ratio_diff_threshold,
            min_rebalance: config.min_rebalance_usdt,
            settle_delay: Duration::from_millis(config.rebalance_settle_delay_ms),
            venue_currency: config.venue_quote_currency.clone(),
            protocol_currency: config.protocol_collateral_currency.clone(),
        }
    }

    /// Transfer needed by `snapshot`, if any.
    ///
    /// The amount refills the short side to its target but never takes the
    /// other side below its own target.
    #[must_use]
    pub fn plan(&self, snapshot: &BalanceSnapshot) -> Option<RebalancePlan> {
        let target_venue = self.initial_balance * self.ratio_venue;
        let target_protocol = self.initial_balance * self.ratio_protocol;
        let band = self.initial_balance * self.diff_threshold;

        let (direction, deficit, surplus) = if snapshot.exchange < target_venue - band {
            (
                RebalanceState::ProtocolToVenue,
                target_venue - snapshot.exchange,
                snapshot.protocol - target_protocol,
            )
        } else if snapshot.protocol < target_protocol - band {
            (
                RebalanceState::VenueToProtocol,
                target_protocol - snapshot.protocol,
                snapshot.exchange - target_venue,
            )
        } else {
            return None;
        };

        let amount = deficit.min(surplus.max(Decimal::ZERO));
        if amount < self.min_rebalance {
            warn!(?direction, %deficit, %amount, "Rebalance needed but amount below minimum");
            return None;
        }
        Some(RebalancePlan { direction, amount })
    }
}

pub struct RebalanceStateMachine {
    venue: Arc<dyn VenueClient>,
    protocol: Arc<dyn ProtocolClient>,
    swap: Arc<dyn SwapClient>,
    alerts: Arc<dyn AlertSink>,
    settings: RebalanceSettings,
    status: RebalanceStatus,
}

impl RebalanceStateMachine {
    #[must_use]
    pub fn new(
        venue: Arc<dyn VenueClient>,
        protocol: Arc<dyn ProtocolClient>,
        swap: Arc<dyn SwapClient>,
        alerts: Arc<dyn AlertSink>,
        settings: RebalanceSettings,
    ) -> Self {
        Self {
            venue,
            protocol,
            swap,
            alerts,
            settings,
            status: RebalanceStatus {
                state: RebalanceState::None,
                since: Utc::now(),
                last_error: None,
            },
        }
    }

    #[must_use]
    pub const fn state(&self) -> RebalanceState {
        self.status.state
    }

    #[must_use]
    pub fn status(&self) -> RebalanceStatus {
        self.status.clone()
    }

    pub fn update_settings(&mut self, settings: RebalanceSettings) {
        self.settings = settings;
    }

    fn transition(&mut self, state: RebalanceState, last_error: Option<String>) {
        info!(from = ?self.status.state, to = ?state, "Rebalance state transition");
        self.status = RebalanceStatus {
            state,
            since: Utc::now(),
            last_error,
        };
    }

    /// Clears any state, including a halt, back to `None`.
    pub fn reset(&mut self) {
        if self.status.state != RebalanceState::None {
            self.transition(RebalanceState::None, None);
        }
    }

    /// Starts and runs a rebalance if `snapshot` calls for one.
    ///
    /// Does nothing unless the machine is in `None`. Returns the state after
    /// the attempt.
    pub async fn run_once(&mut self, snapshot: &BalanceSnapshot) -> RebalanceState {
        if self.status.state != RebalanceState::None {
            return self.status.state;
        }
        let Some(plan) = self.settings.plan(snapshot) else {
            return self.status.state;
        };

        info!(direction = ?plan.direction, amount = %plan.amount, "Starting rebalance");
        self.transition(plan.direction, None);

        match self.execute(&plan, snapshot.quote_rate).await {
            Ok(received) => {
                self.alerts
                    .notify(Alert::new(
                        "REBALANCE COMPLETE",
                        format!("{:?}: sent {}, received {received}", plan.direction, plan.amount),
                    ))
                    .await;
                self.transition(RebalanceState::None, None);
            }
            Err(e) => {
                error!(direction = ?plan.direction, error = %e, "Rebalance halted");
                self.alerts
                    .notify(
                        Alert::new("REBALANCE HALTED", format!("{:?}: {e}", plan.direction))
                            .mention()
                            .urgent(),
                    )
                    .await;
                self.transition(RebalanceState::Halt, Some(e.to_string()));
            }
        }
        self.status.state
    }

    async fn settle(&self) {
        if !self.settings.settle_delay.is_zero() {
            tokio::time::sleep(self.settings.settle_delay).await;
        }
    }

    /// Runs the three steps for `plan`, returning the amount finally deposited.
    async fn execute(&self, plan: &RebalancePlan, quote_rate: Decimal) -> Result<Decimal> {
        let venue_ccy = self.settings.venue_currency.as_str();
        let protocol_ccy = self.settings.protocol_currency.as_str();
        let step = |step: RebalanceStep| move |source| RebalanceError::Step { step, source };

        match plan.direction {
            RebalanceState::VenueToProtocol => {
                let withdrawn = self
                    .venue
                    .withdraw(venue_ccy, plan.amount)
                    .await
                    .map_err(step(RebalanceStep::VenueWithdraw))?;
                self.settle().await;
                let swapped = self
                    .swap
                    .swap(venue_ccy, protocol_ccy, withdrawn)
                    .await
                    .map_err(step(RebalanceStep::Swap))?;
                self.settle().await;
                self.protocol
                    .deposit_collateral(swapped)
                    .await
                    .map_err(step(RebalanceStep::ProtocolDeposit))?;
                Ok(swapped)
            }
            RebalanceState::ProtocolToVenue => {
                let collateral = if quote_rate > Decimal::ZERO {
                    plan.amount / quote_rate
                } else {
                    plan.amount
                };
                let withdrawn = self
                    .protocol
                    .withdraw_collateral(collateral)
                    .await
                    .map_err(step(RebalanceStep::ProtocolWithdraw))?;
                self.settle().await;
                let swapped = self
                    .swap
                    .swap(protocol_ccy, venue_ccy, withdrawn)
                    .await
                    .map_err(step(RebalanceStep::Swap))?;
                self.settle().await;
                self.venue
                    .deposit(venue_ccy, swapped)
                    .await
                    .map_err(step(RebalanceStep::VenueDeposit))?;
                Ok(swapped)
            }
            RebalanceState::None | RebalanceState::Halt => Ok(Decimal::ZERO),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use futures_util::stream::{self, BoxStream, StreamExt};
    use parking_lot::Mutex;
    use rust_decimal_macros::dec;
    use skew_arb_core::alert::MemoryTransport;
    use skew_arb_core::{
        ActionParam, Balance, Book, Deduplicated, DepthEvent, FundingRate, InstrumentSpec,
        OpenOrder, OrderAck, Position,
    };

    /// Records every treasury call; fee of 1 unit per withdrawal.
    #[derive(Default)]
    pub(crate) struct Treasury {
        pub calls: Mutex<Vec<String>>,
        pub fail_swap: Mutex<bool>,
    }

    #[async_trait]
    impl VenueClient for Treasury {
        async fn fetch_order_book(&self, _symbol: &str) -> Result<Book> {
            anyhow::bail!("unused")
        }
        async fn fetch_position(&self, _symbol: &str) -> Result<Option<Position>> {
            Ok(None)
        }
        async fn fetch_balances(&self) -> Result<Vec<Balance>> {
            Ok(vec![])
        }
        async fn fetch_funding_rate(&self, _symbol: &str) -> Result<FundingRate> {
            anyhow::bail!("unused")
        }
        async fn fetch_open_orders(&self, _symbol: &str) -> Result<Vec<OpenOrder>> {
            Ok(vec![])
        }
        async fn fetch_instrument(&self, _symbol: &str) -> Result<InstrumentSpec> {
            anyhow::bail!("unused")
        }
        async fn create_market_order(&self, _action: &ActionParam) -> Result<OrderAck> {
            anyhow::bail!("unused")
        }
        async fn create_limit_order(&self, _action: &ActionParam) -> Result<OrderAck> {
            anyhow::bail!("unused")
        }
        async fn cancel_order(&self, _action: &ActionParam) -> Result<OrderAck> {
            anyhow::bail!("unused")
        }
        async fn depth_updates(&self, _symbols: &[String]) -> Result<BoxStream<'static, Result<DepthEvent>>> {
            Ok(stream::empty().boxed())
        }
        async fn withdraw(&self, currency: &str, amount: Decimal) -> Result<Decimal> {
            self.calls.lock().push(format!("venue_withdraw {currency} {}", amount.normalize()));
            Ok(amount - Decimal::ONE)
        }
        async fn deposit(&self, currency: &str, amount: Decimal) -> Result<()> {
            self.calls.lock().push(format!("venue_deposit {currency} {}", amount.normalize()));
            Ok(())
        }
    }

    #[async_trait]
    impl ProtocolClient for Treasury {
        async fn get_index_price(&self, _symbol: &str) -> Result<Decimal> {
            anyhow::bail!("unused")
        }
        async fn get_market_status(&self, _symbol: &str) -> Result<serde_json::Value> {
            anyhow::bail!("unused")
        }
        async fn get_user_position(&self, _symbol: &str) -> Result<Option<Position>> {
            Ok(None)
        }
        async fn get_lp_pool_value(&self) -> Result<Decimal> {
            Ok(Decimal::ZERO)
        }
        async fn get_collateral_balances(&self) -> Result<Vec<Balance>> {
            Ok(vec![])
        }
        async fn submit_order(&self, _size: Decimal, _market_id: u32, _is_long: bool) -> Result<OrderAck> {
            anyhow::bail!("unused")
        }
        async fn deposit_collateral(&self, amount: Decimal) -> Result<()> {
            self.calls.lock().push(format!("protocol_deposit {}", amount.normalize()));
            Ok(())
        }
        async fn withdraw_collateral(&self, amount: Decimal) -> Result<Decimal> {
            self.calls.lock().push(format!("protocol_withdraw {}", amount.normalize()));
            Ok(amount - Decimal::ONE)
        }
    }

    #[async_trait]
    impl SwapClient for Treasury {
        async fn swap(&self, from_asset: &str, to_asset: &str, amount: Decimal) -> Result<Decimal> {
            if *self.fail_swap.lock() {
                anyhow::bail!("slippage exceeded");
            }
            self.calls.lock().push(format!("swap {from_asset}->{to_asset} {}", amount.normalize()));
            Ok(amount)
        }
    }

    pub(crate) fn settings() -> RebalanceSettings {
        RebalanceSettings {
            settle_delay: Duration::ZERO,
            ..RebalanceSettings::from_config(&EngineConfig::default())
        }
    }

    pub(crate) fn snapshot(exchange: Decimal, protocol: Decimal) -> BalanceSnapshot {
        BalanceSnapshot {
            exchange,
            protocol,
            quote_rate: Decimal::ONE,
            timestamp: Utc::now(),
        }
    }

    pub(crate) fn machine(treasury: &Arc<Treasury>) -> (RebalanceStateMachine, MemoryTransport) {
        let transport = MemoryTransport::default();
        let machine = RebalanceStateMachine::new(
            treasury.clone(),
            treasury.clone(),
            treasury.clone(),
            Arc::new(Deduplicated::new(transport.clone())),
            settings(),
        );
        (machine, transport)
    }

    #[test]
    fn test_plan_inside_band_is_none() {
        // Targets 5000 / 5000, band 2000
        assert_eq!(settings().plan(&snapshot(dec!(3500), dec!(6500))), None);
        assert_eq!(settings().plan(&snapshot(dec!(5000), dec!(5000))), None);
    }

    #[test]
    fn test_plan_limits_amount_to_surplus() {
        let plan = settings().plan(&snapshot(dec!(2500), dec!(7500))).unwrap();
        assert_eq!(plan.direction, RebalanceState::ProtocolToVenue);
        assert_eq!(plan.amount, dec!(2500));

        // Deficit 2500, but the protocol only has 400 above target.
        let limited = settings().plan(&snapshot(dec!(2500), dec!(5400))).unwrap();
        assert_eq!(limited.amount, dec!(400));

        let other = settings().plan(&snapshot(dec!(8000), dec!(2000))).unwrap();
        assert_eq!(other.direction, RebalanceState::VenueToProtocol);
        assert_eq!(other.amount, dec!(3000));
    }

    #[test]
    fn test_plan_below_minimum_is_none() {
        // Deficit 2100 but surplus only 50
        assert_eq!(settings().plan(&snapshot(dec!(2900), dec!(5050))), None);
    }

    #[tokio::test]
    async fn test_venue_to_protocol_feeds_amounts_forward() {
        let treasury = Arc::new(Treasury::default());
        let (mut m, transport) = machine(&treasury);

        let state = m.run_once(&snapshot(dec!(8000), dec!(2000))).await;

        assert_eq!(state, RebalanceState::None);
        assert_eq!(
            treasury.calls.lock().clone(),
            vec![
                "venue_withdraw USDT 3000".to_string(),
                "swap USDT->USDC 2999".to_string(),
                "protocol_deposit 2999".to_string(),
            ]
        );
        assert_eq!(transport.topics(), vec!["REBALANCE COMPLETE".to_string()]);
    }

    #[tokio::test]
    async fn test_protocol_to_venue_converts_quote_rate() {
        let treasury = Arc::new(Treasury::default());
        let (mut m, _transport) = machine(&treasury);
        let mut snap = snapshot(dec!(2500), dec!(7500));
        snap.quote_rate = dec!(0.5);

        m.run_once(&snap).await;

        let calls = treasury.calls.lock().clone();
        assert_eq!(calls[0], "protocol_withdraw 5000");
        assert_eq!(calls[1], "swap USDC->USDT 4999");
        assert_eq!(calls[2], "venue_deposit USDT 4999");
    }

    #[tokio::test]
    async fn test_step_failure_halts_until_reset() {
        let treasury = Arc::new(Treasury::default());
        *treasury.fail_swap.lock() = true;
        let (mut m, transport) = machine(&treasury);
        let unbalanced = snapshot(dec!(8000), dec!(2000));

        assert_eq!(m.run_once(&unbalanced).await, RebalanceState::Halt);
        let alert = &transport.delivered()[0];
        assert_eq!(alert.topic, "REBALANCE HALTED");
        assert!(alert.urgent);
        assert!(m.status().last_error.unwrap().contains("swap"));

        // Halt persists: no new transition and no further treasury calls.
        *treasury.fail_swap.lock() = false;
        assert_eq!(m.run_once(&unbalanced).await, RebalanceState::Halt);
        assert_eq!(treasury.calls.lock().len(), 1);

        m.reset();
        assert_eq!(m.state(), RebalanceState::None);
        assert_eq!(m.run_once(&unbalanced).await, RebalanceState::None);
        assert_eq!(treasury.calls.lock().len(), 4);
    }

    #[tokio::test(start_paused = true)]
    async fn test_settle_delay_between_steps() {
        let treasury = Arc::new(Treasury::default());
        let transport = MemoryTransport::default();
        let mut m = RebalanceStateMachine::new(
            treasury.clone(),
            treasury.clone(),
            treasury.clone(),
            Arc::new(Deduplicated::new(transport)),
            RebalanceSettings {
                settle_delay: Duration::from_secs(30),
                ..settings()
            },
        );

        let started = tokio::time::Instant::now();
        m.run_once(&snapshot(dec!(8000), dec!(2000))).await;
        assert!(started.elapsed() >= Duration::from_secs(60));
    }
}
