//! pacycle subsystem worker.
//!
//! Dials the coordinator, joins under the given identity and answers every
//! stimulus with randomly sampled action recommendations.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pacycle_network::connect_with_retry;
use pacycle_protocol::{
    ConfigProvider, RandomGenerator, TomlConfigProvider, CONNECT_RETRIES, CONNECT_RETRY_DELAY_MS,
};
use pacycle_subsystem::{run_worker, SubsystemProtocol};

#[derive(Parser)]
#[command(name = "pacycle-subsystem")]
#[command(about = "Subsystem worker for the pacycle perception-action loop")]
struct Cli {
    /// Identity announced in JOIN, e.g. ACS
    #[arg(long)]
    identity: String,

    /// Coordinator address (host:port)
    #[arg(long)]
    coordinator: String,

    /// Agent configuration file
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Seed for action generation (overrides agent.seed)
    #[arg(long)]
    seed: Option<u64>,

    /// Enable verbose output
    #[arg(long, short)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let provider = TomlConfigProvider::resolve(cli.config)?;
    let context = provider
        .load()
        .with_context(|| format!("loading {}", provider.path().display()))?;

    let generator = RandomGenerator::new(cli.seed.or(context.agent.seed));
    let mut protocol = SubsystemProtocol::new(&cli.identity, context.dimensions, generator);

    let channel = connect_with_retry(
        &cli.coordinator,
        CONNECT_RETRIES,
        Duration::from_millis(CONNECT_RETRY_DELAY_MS),
    )
    .await?;
    tracing::info!(identity = %cli.identity, coordinator = %cli.coordinator, "Connected");

    let summary = run_worker(channel, &mut protocol).await?;
    tracing::info!(
        identity = %summary.identity,
        cycles = summary.cycles_completed,
        actions = summary.actions_acked,
        "Worker finished"
    );
    Ok(())
}
