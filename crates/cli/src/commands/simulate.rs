//! Deterministic replay of a scenario on a virtual clock.
//!
//! Each step moves the protocol index along the scenario's paths,
//! republishes the paper books stamped with the virtual time, and runs one
//! engine tick. The rebalance machine runs inline after each tick with no
//! settle delay.

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use clap::Args;
use rust_decimal::Decimal;
use serde::Serialize;
use skew_arb_core::{AlertSink, EngineConfig, MemoryAlertSink, VenueClient};
use skew_arb_engine::{feed_symbols, Engine, TickReport};
use skew_arb_orderbook::{OrderbookStore, OrderbookView};
use skew_arb_paper::{PaperWorld, Scenario};
use skew_arb_rebalance::{BalanceSnapshot, RebalanceSettings, RebalanceState, RebalanceStateMachine};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

use super::{fit_to_scenario, load_config, load_scenario};

/// Arguments for the simulate command.
#[derive(Args, Debug, Clone)]
pub struct SimulateArgs {
    /// Scenario JSON file (built-in demo when omitted)
    #[arg(short, long)]
    pub scenario: Option<PathBuf>,

    /// Config file (defaults when omitted)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Ticks to run (defaults to the scenario's index path length plus one)
    #[arg(short, long)]
    pub ticks: Option<usize>,

    /// Print every tick report, not only ticks that submitted orders
    #[arg(long)]
    pub all: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PositionSummary {
    pub symbol: String,
    pub exchange: Decimal,
    pub protocol: Decimal,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationSummary {
    pub ticks: usize,
    pub failed_ticks: usize,
    pub submissions: usize,
    pub positions: Vec<PositionSummary>,
    pub balances: Option<BalanceSnapshot>,
    pub rebalance: RebalanceState,
    pub alerts: Vec<String>,
}

pub struct Simulation {
    scenario: Scenario,
    world: PaperWorld,
    engine: Engine,
    rebalance: RebalanceStateMachine,
    books: watch::Sender<OrderbookView>,
    alerts: Arc<MemoryAlertSink>,
    symbols: Vec<String>,
    start: DateTime<Utc>,
    interval: Duration,
    step: usize,
    failed_ticks: usize,
    submissions: usize,
    last_balances: Option<BalanceSnapshot>,
}

impl Simulation {
    /// # Errors
    /// Returns an error if the tick interval does not fit a virtual clock step.
    pub fn new(scenario: Scenario, config: EngineConfig, start: DateTime<Utc>) -> Result<Self> {
        let world = scenario.build();
        let alerts = Arc::new(MemoryAlertSink::default());
        let sink: Arc<dyn AlertSink> = alerts.clone();
        let (books, books_rx) = watch::channel(OrderbookView::default());

        let mut settings = RebalanceSettings::from_config(&config);
        settings.settle_delay = std::time::Duration::ZERO;
        let rebalance = RebalanceStateMachine::new(
            world.venue.clone(),
            world.protocol.clone(),
            world.swap.clone(),
            sink.clone(),
            settings,
        );

        let interval = Duration::milliseconds(i64::try_from(config.tick_interval_ms)?);
        let symbols = feed_symbols(&config);
        let engine = Engine::new(config, world.venue.clone(), world.protocol.clone(), sink, books_rx);

        Ok(Self {
            scenario,
            world,
            engine,
            rebalance,
            books,
            alerts,
            symbols,
            start,
            interval,
            step: 0,
            failed_ticks: 0,
            submissions: 0,
            last_balances: None,
        })
    }

    /// Virtual time of the next step.
    #[must_use]
    pub fn now(&self) -> DateTime<Utc> {
        let step = i32::try_from(self.step).unwrap_or(i32::MAX);
        self.start + self.interval * step
    }

    async fn publish(&self, now: DateTime<Utc>) -> Result<()> {
        let mut store = OrderbookStore::new(self.symbols.iter().cloned());
        for symbol in &self.symbols {
            let mut book = self.world.venue.fetch_order_book(symbol).await?;
            book.timestamp = now;
            store.apply_book(book)?;
        }
        self.books.send_replace(store.view());
        Ok(())
    }

    /// Advances one step. `None` means the tick was aborted and alerted.
    ///
    /// # Errors
    /// Returns an error if the paper books cannot be republished.
    pub async fn step(&mut self) -> Result<Option<TickReport>> {
        let now = self.now();
        self.scenario.apply_step(&self.world, self.step);
        self.publish(now).await?;
        self.step += 1;

        let Some(report) = self.engine.run_once(now).await else {
            self.failed_ticks += 1;
            return Ok(None);
        };
        if !report.outcome.is_idle() {
            self.submissions += 1;
        }
        self.rebalance.run_once(&report.balances).await;
        self.last_balances = Some(report.balances.clone());
        Ok(Some(report))
    }

    #[must_use]
    pub fn summary(&self) -> SimulationSummary {
        let config = self.engine.config();
        let positions = config
            .target_symbol_list
            .iter()
            .map(|base| {
                let p = config.symbol_params(base);
                PositionSummary {
                    symbol: p.base,
                    exchange: self.world.venue.position(&p.venue_symbol),
                    protocol: self.world.protocol.position(&p.protocol_symbol),
                }
            })
            .collect();
        SimulationSummary {
            ticks: self.step,
            failed_ticks: self.failed_ticks,
            submissions: self.submissions,
            positions,
            balances: self.last_balances.clone(),
            rebalance: self.rebalance.state(),
            alerts: self.alerts.transport().topics(),
        }
    }
}

/// Runs the simulate command, printing tick reports as JSON lines followed
/// by a summary.
///
/// # Errors
/// Returns an error if the scenario or config cannot be loaded.
pub async fn run_simulate(args: SimulateArgs) -> Result<()> {
    let scenario = load_scenario(args.scenario.as_deref())?;
    let config = fit_to_scenario(load_config(args.config.as_deref(), None)?, &scenario)?;
    let ticks = args.ticks.unwrap_or_else(|| scenario.steps() + 1);
    info!(ticks, symbols = ?config.target_symbol_list, "Starting simulation");

    let mut sim = Simulation::new(scenario, config, Utc::now())?;
    for _ in 0..ticks {
        if let Some(report) = sim.step().await? {
            if args.all || !report.outcome.is_idle() {
                println!("{}", serde_json::to_string(&report)?);
            }
        }
    }

    println!("{}", serde_json::to_string_pretty(&sim.summary())?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use skew_arb_paper::DEMO_WARMUP_STEPS;

    fn demo() -> Simulation {
        let scenario = Scenario::demo();
        let config = fit_to_scenario(EngineConfig::default(), &scenario).unwrap();
        Simulation::new(scenario, config, Utc::now()).unwrap()
    }

    #[tokio::test]
    async fn test_demo_trades_once_after_warmup() {
        let mut sim = demo();
        for _ in 0..DEMO_WARMUP_STEPS {
            let report = sim.step().await.unwrap().unwrap();
            assert!(report.outcome.is_idle());
        }

        let report = sim.step().await.unwrap().unwrap();
        assert_eq!(report.execution.outcome, "submitted");

        // Inside the 10s order interval on a 5s virtual tick.
        let report = sim.step().await.unwrap().unwrap();
        assert!(report.outcome.is_idle());

        let summary = sim.summary();
        assert_eq!(summary.ticks, DEMO_WARMUP_STEPS + 2);
        assert_eq!(summary.submissions, 1);
        assert_eq!(summary.failed_ticks, 0);
        assert_eq!(
            summary.positions,
            vec![PositionSummary {
                symbol: "BTC".to_string(),
                exchange: dec!(-9.852),
                protocol: dec!(9.852),
            }]
        );
        assert_eq!(summary.rebalance, RebalanceState::None);
    }

    #[tokio::test]
    async fn test_virtual_clock_advances_by_tick_interval() {
        let mut sim = demo();
        let start = sim.now();
        sim.step().await.unwrap();
        sim.step().await.unwrap();
        assert_eq!(sim.now() - start, Duration::seconds(10));
    }
}
