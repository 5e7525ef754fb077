//! Long-lived tasks running beside the tick loop.

use futures_util::FutureExt;
use skew_arb_core::{supervise_with, AlertSink, EngineConfig, ProtocolClient, SwapClient, VenueClient};
use skew_arb_orderbook::{OrderbookFeed, OrderbookView};
use skew_arb_rebalance::{
    BalanceSnapshot, RebalanceActor, RebalanceHandle, RebalanceSettings, RebalanceStateMachine,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Exchange symbols the feed must track: every traded instrument plus the
/// quote-conversion book.
#[must_use]
pub fn feed_symbols(config: &EngineConfig) -> Vec<String> {
    let mut symbols: Vec<String> = config
        .target_symbol_list
        .iter()
        .map(|base| config.symbol_params(base).venue_symbol)
        .collect();
    if let Some(quote) = &config.quote_conversion_symbol {
        if !symbols.contains(quote) {
            symbols.push(quote.clone());
        }
    }
    symbols
}

/// Supervised feed and rebalance tasks. Dropping this aborts both.
pub struct Background {
    rebalance: RebalanceHandle,
    tasks: Vec<JoinHandle<()>>,
}

impl Background {
    #[must_use]
    pub const fn rebalance(&self) -> &RebalanceHandle {
        &self.rebalance
    }

    /// True while every supervised task is still scheduled.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.tasks.iter().all(|t| !t.is_finished())
    }
}

impl Drop for Background {
    fn drop(&mut self) {
        for task in &self.tasks {
            task.abort();
        }
    }
}

/// Creates the order book feed without starting it.
#[must_use]
pub fn orderbook_feed(
    config: &EngineConfig,
    venue: Arc<dyn VenueClient>,
    alerts: Arc<dyn AlertSink>,
) -> (OrderbookFeed<dyn VenueClient>, watch::Receiver<OrderbookView>) {
    OrderbookFeed::new(venue, feed_symbols(config), config.orderbook.clone(), alerts)
}

/// Spawns `feed` and a rebalance actor fed by `balances`, each under its
/// own supervisor.
///
/// Must be called inside a tokio runtime.
pub fn spawn_background(
    config: &EngineConfig,
    feed: OrderbookFeed<dyn VenueClient>,
    clients: (Arc<dyn VenueClient>, Arc<dyn ProtocolClient>, Arc<dyn SwapClient>),
    alerts: Arc<dyn AlertSink>,
    balances: watch::Receiver<Option<BalanceSnapshot>>,
) -> Background {
    let restart_delay = Duration::from_millis(config.orderbook.restart_delay_ms);
    let (venue, protocol, swap) = clients;

    let feed_alerts = alerts.clone();
    let feed_task = tokio::spawn(async move {
        supervise_with(
            "orderbook stream",
            restart_delay,
            feed_alerts,
            feed,
            |feed: &mut OrderbookFeed<dyn VenueClient>| feed.run_session().boxed(),
        )
        .await;
    });

    let machine = RebalanceStateMachine::new(
        venue,
        protocol,
        swap,
        alerts.clone(),
        RebalanceSettings::from_config(config),
    );
    let (actor, rebalance) = RebalanceActor::new(machine, balances);
    let rebalance_task = tokio::spawn(async move {
        supervise_with(
            "rebalance actor",
            restart_delay,
            alerts,
            actor,
            |actor: &mut RebalanceActor| actor.run().boxed(),
        )
        .await;
    });

    info!(restart_delay_ms = config.orderbook.restart_delay_ms, "Background tasks started");
    Background {
        rebalance,
        tasks: vec![feed_task, rebalance_task],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_symbols_include_quote_book_once() {
        let config = EngineConfig::default();
        assert_eq!(
            feed_symbols(&config),
            vec!["BTC-USDT-SWAP".to_string(), "ETH-USDT-SWAP".to_string(), "USDC-USDT".to_string()]
        );

        let mut no_quote = EngineConfig::default().with_symbols(["SOL"]);
        no_quote.quote_conversion_symbol = None;
        assert_eq!(feed_symbols(&no_quote), vec!["SOL-USDT-SWAP".to_string()]);
    }
}
