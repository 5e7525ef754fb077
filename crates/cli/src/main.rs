use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{CheckConfigArgs, RunArgs, SimulateArgs, SizeArgs};

#[derive(Parser)]
#[command(name = "skew-arb")]
#[command(about = "Cross-venue skew arbitrage and hedging engine", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the engine and its background tasks against paper venues until Ctrl+C
    Run(RunArgs),
    /// Step a scenario on a virtual clock and print tick reports as JSON
    Simulate(SimulateArgs),
    /// Load and validate a configuration, then print the resolved values
    CheckConfig(CheckConfigArgs),
    /// Size one scenario market without trading
    Size(SizeArgs),
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Reports go to stdout, logs to stderr.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Run(args) => commands::run_engine(args).await?,
        Commands::Simulate(args) => commands::run_simulate(args).await?,
        Commands::CheckConfig(args) => commands::run_check_config(&args)?,
        Commands::Size(args) => commands::run_size(&args)?,
    }

    Ok(())
}
