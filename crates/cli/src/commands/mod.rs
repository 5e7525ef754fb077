//! CLI commands for the skew arbitrage engine.
//!
//! Every command trades against the paper venues in `skew-arb-paper`; live
//! exchange and chain clients plug in through the same traits.

pub mod check_config;
pub mod run;
pub mod simulate;
pub mod size;

pub use check_config::{run_check_config, CheckConfigArgs};
pub use run::{run_engine, RunArgs};
pub use simulate::{run_simulate, SimulateArgs};
pub use size::{run_size, SizeArgs};

use anyhow::{bail, Result};
use skew_arb_core::alert::SlackTransport;
use skew_arb_core::{AlertSink, ConfigLoader, EngineConfig, LogAlertSink, SlackAlertSink};
use skew_arb_paper::Scenario;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Reads `path`, or returns the built-in demo when none is given.
pub(crate) fn load_scenario(path: Option<&Path>) -> Result<Scenario> {
    match path {
        Some(path) => Scenario::from_file(path),
        None => Ok(Scenario::demo()),
    }
}

/// Loads `path` through the layered loader, or the defaults when none is given.
pub(crate) fn load_config(path: Option<&Path>, profile: Option<&str>) -> Result<EngineConfig> {
    match (path, profile) {
        (Some(path), Some(profile)) => ConfigLoader::load_with_profile(path, profile),
        (Some(path), None) => ConfigLoader::load(path),
        (None, _) => Ok(EngineConfig::default()),
    }
}

/// Restricts `config` to the markets listed in `scenario` and takes market
/// naming, ids and currencies from the scenario.
pub(crate) fn fit_to_scenario(mut config: EngineConfig, scenario: &Scenario) -> Result<EngineConfig> {
    let bases = scenario.bases();
    let (kept, dropped): (Vec<String>, Vec<String>) = config
        .target_symbol_list
        .into_iter()
        .partition(|base| bases.contains(base));
    if !dropped.is_empty() {
        warn!(?dropped, "Configured symbols missing from scenario, not trading them");
    }
    if kept.is_empty() {
        bail!("None of the configured symbols are listed by the scenario ({bases:?})");
    }
    config.target_symbol_list = kept;

    for (index, market) in scenario.markets.iter().enumerate() {
        let params = config.market_params.entry(market.base.clone()).or_default();
        params.protocol_market_id = Some(market.resolved_market_id(index));
        params.venue_symbol = Some(market.venue_symbol(&scenario.venue_quote_currency));
    }
    if config.quote_conversion_symbol.is_some() {
        config.quote_conversion_symbol = Some(scenario.quote_symbol.clone());
    }
    config.venue_quote_currency.clone_from(&scenario.venue_quote_currency);
    config
        .protocol_collateral_currency
        .clone_from(&scenario.protocol_collateral_currency);

    config.validate()?;
    Ok(config)
}

/// Slack when a webhook is configured, otherwise the log.
pub(crate) fn alert_sink(config: &EngineConfig) -> Result<Arc<dyn AlertSink>> {
    match &config.alerts.slack_webhook_url {
        Some(url) => {
            let transport = SlackTransport::new(url.clone(), config.alerts.manager_slack_id.clone())?;
            info!("Alerts go to Slack");
            Ok(Arc::new(SlackAlertSink::new(transport)))
        }
        None => Ok(Arc::new(LogAlertSink::default())),
    }
}
