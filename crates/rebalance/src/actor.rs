//! Background task owning the [`RebalanceStateMachine`].
//!
//! The engine publishes a [`BalanceSnapshot`] every tick through a `watch`
//! channel; each new snapshot gives the machine one chance to start a
//! rebalance. Operators clear a halt through a [`RebalanceHandle`].
//! Commands are served between workflow steps, never during one.

use crate::error::{RebalanceError, Result};
use crate::machine::{BalanceSnapshot, RebalanceSettings, RebalanceStateMachine, RebalanceStatus};
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, info};

const COMMAND_BUFFER: usize = 16;

#[derive(Debug)]
pub enum RebalanceCommand {
    /// Clears the current state back to `None` and replies with the new status.
    Reset(oneshot::Sender<RebalanceStatus>),
    GetState(oneshot::Sender<RebalanceStatus>),
    UpdateSettings(Box<RebalanceSettings>),
}

/// Cloneable sender side of the actor.
#[derive(Clone, Debug)]
pub struct RebalanceHandle {
    tx: mpsc::Sender<RebalanceCommand>,
}

impl RebalanceHandle {
    #[must_use]
    pub const fn new(tx: mpsc::Sender<RebalanceCommand>) -> Self {
        Self { tx }
    }

    /// Clears a halt (or any other state).
    ///
    /// # Errors
    /// Returns [`RebalanceError::ActorUnavailable`] if the actor has stopped.
    pub async fn reset(&self) -> Result<RebalanceStatus> {
        self.request(RebalanceCommand::Reset).await
    }

    /// # Errors
    /// Returns [`RebalanceError::ActorUnavailable`] if the actor has stopped.
    pub async fn get_state(&self) -> Result<RebalanceStatus> {
        self.request(RebalanceCommand::GetState).await
    }

    /// # Errors
    /// Returns [`RebalanceError::ActorUnavailable`] if the actor has stopped.
    pub async fn update_settings(&self, settings: RebalanceSettings) -> Result<()> {
        self.tx
            .send(RebalanceCommand::UpdateSettings(Box::new(settings)))
            .await
            .map_err(|_| RebalanceError::ActorUnavailable)
    }

    async fn request(
        &self,
        command: fn(oneshot::Sender<RebalanceStatus>) -> RebalanceCommand,
    ) -> Result<RebalanceStatus> {
        let (tx, rx) = oneshot::channel();
        self.tx
            .send(command(tx))
            .await
            .map_err(|_| RebalanceError::ActorUnavailable)?;
        rx.await.map_err(|_| RebalanceError::ActorUnavailable)
    }
}

pub struct RebalanceActor {
    machine: RebalanceStateMachine,
    balances: watch::Receiver<Option<BalanceSnapshot>>,
    rx: mpsc::Receiver<RebalanceCommand>,
}

impl RebalanceActor {
    /// Creates the actor and its handle.
    #[must_use]
    pub fn new(
        machine: RebalanceStateMachine,
        balances: watch::Receiver<Option<BalanceSnapshot>>,
    ) -> (Self, RebalanceHandle) {
        let (tx, rx) = mpsc::channel(COMMAND_BUFFER);
        (
            Self {
                machine,
                balances,
                rx,
            },
            RebalanceHandle::new(tx),
        )
    }

    #[must_use]
    pub const fn machine(&self) -> &RebalanceStateMachine {
        &self.machine
    }

    fn handle_command(&mut self, command: RebalanceCommand) {
        match command {
            RebalanceCommand::Reset(reply) => {
                info!(state = ?self.machine.state(), "Rebalance reset requested");
                self.machine.reset();
                let _ = reply.send(self.machine.status());
            }
            RebalanceCommand::GetState(reply) => {
                let _ = reply.send(self.machine.status());
            }
            RebalanceCommand::UpdateSettings(settings) => {
                self.machine.update_settings(*settings);
            }
        }
    }

    /// Serves commands and balance updates until every handle and the
    /// balance publisher are gone.
    ///
    /// # Errors
    ///
    /// Step failures halt the machine rather than ending the task, so this
    /// only returns `Ok`.
    pub async fn run(&mut self) -> anyhow::Result<()> {
        info!(state = ?self.machine.state(), "Rebalance actor started");
        let mut balances_open = true;
        loop {
            tokio::select! {
                command = self.rx.recv() => match command {
                    Some(command) => self.handle_command(command),
                    None => {
                        info!("All rebalance handles dropped, stopping");
                        return Ok(());
                    }
                },
                changed = self.balances.changed(), if balances_open => {
                    if changed.is_err() {
                        debug!("Balance publisher closed");
                        balances_open = false;
                        continue;
                    }
                    let snapshot = self.balances.borrow_and_update().clone();
                    if let Some(snapshot) = snapshot {
                        self.machine.run_once(&snapshot).await;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::machine::tests::{machine, snapshot, Treasury};
    use crate::machine::RebalanceState;
    use rust_decimal_macros::dec;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_actor_rebalances_on_snapshot_and_serves_state() {
        let treasury = Arc::new(Treasury::default());
        let (m, _transport) = machine(&treasury);
        let (balances_tx, balances_rx) = watch::channel(None);
        let (mut actor, handle) = RebalanceActor::new(m, balances_rx);
        let task = tokio::spawn(async move { actor.run().await });

        balances_tx.send_replace(Some(snapshot(dec!(8000), dec!(2000))));

        tokio::time::timeout(Duration::from_secs(2), async {
            while treasury.calls.lock().len() < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(handle.get_state().await.unwrap().state, RebalanceState::None);

        drop(handle);
        task.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_reset_through_handle_clears_halt() {
        let treasury = Arc::new(Treasury::default());
        *treasury.fail_swap.lock() = true;
        let (m, _transport) = machine(&treasury);
        let (balances_tx, balances_rx) = watch::channel(None);
        let (mut actor, handle) = RebalanceActor::new(m, balances_rx);
        tokio::spawn(async move { actor.run().await });

        balances_tx.send_replace(Some(snapshot(dec!(8000), dec!(2000))));
        let halted = tokio::time::timeout(Duration::from_secs(2), async {
            loop {
                let status = handle.get_state().await.unwrap();
                if status.state == RebalanceState::Halt {
                    return status;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert!(halted.last_error.is_some());

        let status = handle.reset().await.unwrap();
        assert_eq!(status.state, RebalanceState::None);
        assert_eq!(status.last_error, None);
    }

    #[tokio::test]
    async fn test_handle_reports_stopped_actor() {
        let treasury = Arc::new(Treasury::default());
        let (m, _transport) = machine(&treasury);
        let (_balances_tx, balances_rx) = watch::channel(None);
        let (actor, handle) = RebalanceActor::new(m, balances_rx);
        drop(actor);

        let err = handle.get_state().await.unwrap_err();
        assert!(matches!(err, RebalanceError::ActorUnavailable));
        assert!(err.is_retryable());
    }
}
