//! One-shot sizing of a scenario market.

use anyhow::{anyhow, Result};
use chrono::{Duration, Utc};
use clap::Args;
use rust_decimal::Decimal;
use serde::Serialize;
use skew_arb_core::{Book, EngineConfig, Side};
use skew_arb_paper::Scenario;
use skew_arb_strategy::{
    coarse_step, ArbitrageSizer, ClampRequest, RiskController, SideThresholds, SizerInputs,
    ThresholdInputs, ThresholdModel,
};
use std::path::PathBuf;

use super::{fit_to_scenario, load_config, load_scenario};

/// Arguments for the size command.
#[derive(Args, Debug, Clone)]
pub struct SizeArgs {
    /// Scenario JSON file (built-in demo when omitted)
    #[arg(short, long)]
    pub scenario: Option<PathBuf>,

    /// Config file (defaults when omitted)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Base asset to size (first scenario market when omitted)
    #[arg(short, long)]
    pub base: Option<String>,

    /// Index path step to size at (last step when omitted)
    #[arg(long)]
    pub step: Option<usize>,

    /// Premium EMA to assume
    #[arg(long, default_value = "0")]
    pub ema: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SizeReport {
    pub base: String,
    pub index_price: Decimal,
    pub mark_price: Decimal,
    pub best_bid: Option<Decimal>,
    pub best_ask: Option<Decimal>,
    pub side: Option<String>,
    pub thresholds: SideThresholds,
    pub raw_size: Decimal,
    /// After risk limits and step rounding, with the scenario's balances.
    pub clamped_size: Decimal,
}

/// Sizes `base` in `scenario` as the engine would on a fresh tick.
///
/// # Errors
/// Returns an error if the scenario does not list `base`.
pub fn size_market(
    scenario: &Scenario,
    config: &EngineConfig,
    base: &str,
    step: usize,
    ema: Decimal,
) -> Result<SizeReport> {
    let market = scenario
        .markets
        .iter()
        .find(|m| m.base == base)
        .ok_or_else(|| anyhow!("Scenario has no market for {base}"))?;
    let params = config.symbol_params(base);
    let now = Utc::now();
    let book = Book::from_levels(&params.venue_symbol, 1, market.bids.clone(), market.asks.clone(), now);
    let index_price = market.index_at(step);

    let threshold_inputs = ThresholdInputs {
        ema,
        funding_rate: market.funding_rate,
        next_funding_time: now + Duration::hours(market.hours_to_funding),
        funding_price_24h: market.funding_price_24h,
        index_price,
        now,
    };
    let thresholds =
        ThresholdModel::from_config(config).side_thresholds(&threshold_inputs, market.protocol_position);

    let inputs = SizerInputs {
        book: &book,
        index_price,
        skewness: market.skewness,
        depth_factor: market.depth_factor,
        thresholds,
        quote_rate: scenario.quote_rate,
        contract_size: market.contract_size,
        max_slippage: params.max_orderbook_slippage,
    };
    let raw_size = ArbitrageSizer::size(&inputs);

    let mid = book.mid_price().unwrap_or(Decimal::ZERO);
    let risk = RiskController::from_config(config);
    let gross = market.venue_position.abs() * mid;
    let capacity = risk.leverage_capacity(scenario.venue_balance, scenario.protocol_balance, scenario.quote_rate, gross);
    let clamped_size = risk.clamp(&ClampRequest {
        params: &params,
        size: raw_size,
        mid,
        position: market.protocol_position,
        skewness: market.skewness,
        capacity_usdt: capacity,
        step: coarse_step(market.lot_size * market.contract_size, params.protocol_qty_step),
    });

    Ok(SizeReport {
        base: base.to_string(),
        index_price,
        mark_price: inputs.mark_price(),
        best_bid: book.best_bid().map(|l| l.price),
        best_ask: book.best_ask().map(|l| l.price),
        side: ArbitrageSizer::direction(&inputs).map(|s: Side| s.to_string()),
        thresholds,
        raw_size,
        clamped_size,
    })
}

/// Runs the size command and prints the report as JSON.
///
/// # Errors
/// Returns an error if the scenario, config or market cannot be resolved.
pub fn run_size(args: &SizeArgs) -> Result<()> {
    let scenario = load_scenario(args.scenario.as_deref())?;
    let config = fit_to_scenario(load_config(args.config.as_deref(), None)?, &scenario)?;
    let base = match &args.base {
        Some(base) => base.clone(),
        None => scenario
            .bases()
            .into_iter()
            .next()
            .ok_or_else(|| anyhow!("Scenario lists no markets"))?,
    };
    let step = args.step.unwrap_or_else(|| scenario.steps().saturating_sub(1));

    let report = size_market(&scenario, &config, &base, step, args.ema)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
