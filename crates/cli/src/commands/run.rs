//! Long-running engine against the paper venues.

use anyhow::Result;
use clap::Args;
use skew_arb_core::config_loader::DEFAULT_CONFIG_PATH;
use skew_arb_core::{ConfigWatcher, EngineConfig, ProtocolClient, SwapClient, VenueClient};
use skew_arb_engine::{orderbook_feed, spawn_background, Engine};
use skew_arb_paper::Scenario;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{error, info, warn};

use super::{alert_sink, fit_to_scenario, load_config, load_scenario};

/// Arguments for the run command.
#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Profile overlay, reads `Config.{profile}.toml` next to the config file
    #[arg(short, long, env = "SKEW_ARB_PROFILE")]
    pub profile: Option<String>,

    /// Scenario JSON seeding the paper venues (built-in demo when omitted)
    #[arg(short, long)]
    pub scenario: Option<PathBuf>,

    /// Reload the config file when it changes
    #[arg(long)]
    pub watch: bool,
}

/// Reloads `args.config` on change, fitting each valid update to the
/// scenario. The symbol list only changes across a restart of the feed.
fn watch_config(args: &RunArgs, config: &EngineConfig, scenario: &Scenario) -> watch::Receiver<EngineConfig> {
    let (watcher, mut raw) = ConfigWatcher::new(config.clone(), args.config.clone());
    let (fitted_tx, fitted_rx) = watch::channel(config.clone());
    let scenario = scenario.clone();

    tokio::spawn(async move {
        if let Err(e) = watcher.watch().await {
            error!(error = %e, "Config watcher stopped");
        }
    });
    tokio::spawn(async move {
        while raw.changed().await.is_ok() {
            let update = raw.borrow_and_update().clone();
            match fit_to_scenario(update, &scenario) {
                Ok(fitted) => {
                    fitted_tx.send_replace(fitted);
                }
                Err(e) => warn!(error = %e, "Ignoring config update"),
            }
        }
    });
    fitted_rx
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Received Ctrl+C, initiating graceful shutdown"),
        Err(e) => error!(error = %e, "Failed to listen for Ctrl+C, stopping"),
    }
}

/// Runs the engine until Ctrl+C.
///
/// # Errors
/// Returns an error if the scenario or config cannot be loaded, or the
/// alert sink cannot be built.
pub async fn run_engine(args: RunArgs) -> Result<()> {
    let scenario = load_scenario(args.scenario.as_deref())?;
    let config = fit_to_scenario(load_config(Some(&args.config), args.profile.as_deref())?, &scenario)?;
    info!(
        config = %args.config.display(),
        symbols = ?config.target_symbol_list,
        "Starting engine against paper venues"
    );

    let world = scenario.build();
    let alerts = alert_sink(&config)?;
    let venue: Arc<dyn VenueClient> = world.venue.clone();
    let protocol: Arc<dyn ProtocolClient> = world.protocol.clone();
    let swap: Arc<dyn SwapClient> = world.swap.clone();

    let (feed, books) = orderbook_feed(&config, venue.clone(), alerts.clone());
    let engine = Engine::new(config.clone(), venue.clone(), protocol.clone(), alerts.clone(), books);
    let background = spawn_background(&config, feed, (venue, protocol, swap), alerts, engine.balance_updates());
    let mut engine = engine.with_rebalance(background.rebalance().clone());

    if args.watch {
        engine = engine.with_config_updates(watch_config(&args, &config, &scenario));
    }

    let steps = scenario.steps();
    let stepper = (steps > 0).then(|| {
        let world = world.clone();
        let period = config.tick_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            for step in 0..steps {
                ticker.tick().await;
                scenario.apply_step(&world, step);
            }
            info!(steps, "Scenario index path exhausted");
        })
    });

    engine.run(shutdown_signal()).await;

    if let Some(stepper) = stepper {
        stepper.abort();
    }
    match background.rebalance().get_state().await {
        Ok(status) => info!(state = ?status.state, last_error = ?status.last_error, "Rebalance state at shutdown"),
        Err(e) => error!(error = %e, "Rebalance actor unavailable at shutdown"),
    }
    info!("Engine stopped");
    Ok(())
}
