//! Validates a configuration without starting anything.

use anyhow::Result;
use clap::Args;
use serde_json::json;
use skew_arb_core::config_loader::DEFAULT_CONFIG_PATH;
use std::path::PathBuf;

use super::load_config;

/// Arguments for the check-config command.
#[derive(Args, Debug, Clone)]
pub struct CheckConfigArgs {
    /// Config file path
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    /// Profile overlay, reads `Config.{profile}.toml` next to the config file
    #[arg(short, long, env = "SKEW_ARB_PROFILE")]
    pub profile: Option<String>,
}

/// Prints the merged configuration with per-symbol parameters resolved.
///
/// # Errors
/// Returns an error if the configuration cannot be parsed or fails validation.
pub fn run_check_config(args: &CheckConfigArgs) -> Result<()> {
    let mut config = load_config(Some(&args.config), args.profile.as_deref())?;
    if config.alerts.slack_webhook_url.is_some() {
        config.alerts.slack_webhook_url = Some("<redacted>".to_string());
    }

    let symbols: Vec<_> = config
        .target_symbol_list
        .iter()
        .map(|base| {
            let p = config.symbol_params(base);
            json!({
                "base": p.base,
                "venue_symbol": p.venue_symbol,
                "protocol_symbol": p.protocol_symbol,
                "protocol_market_id": p.protocol_market_id,
                "min_order_usdt": p.min_order_usdt,
                "max_position_usdt": p.max_position_usdt,
                "max_market_skewness_usdt": p.max_market_skewness_usdt,
                "max_orderbook_slippage": p.max_orderbook_slippage,
                "protocol_qty_step": p.protocol_qty_step,
            })
        })
        .collect();

    let out = json!({ "config": config, "symbols": symbols });
    println!("{}", serde_json::to_string_pretty(&out)?);
    tracing::info!(path = %args.config.display(), "Configuration is valid");
    Ok(())
}
