//! pacycle coordinator.
//!
//! Loads the agent configuration, listens for subsystem workers and drives
//! them through perception-action cycles.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pacycle_coordinator::{AgentCoordinator, CoordinatorConfig, CoordinatorServer, FirstExternal};
use pacycle_protocol::{ConfigProvider, RandomGenerator, TomlConfigProvider};

#[derive(Parser)]
#[command(name = "pacycle-coordinator")]
#[command(about = "Coordinator for the pacycle perception-action loop")]
struct Cli {
    /// Agent configuration file (default: <config dir>/pacycle/agent.toml)
    #[arg(long, short)]
    config: Option<PathBuf>,

    /// Host to listen on (overrides agent.listen_host)
    #[arg(long)]
    listen_host: Option<String>,

    /// Port to listen on; 0 picks a free port
    #[arg(long, short, default_value = "0")]
    port: u16,

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

    let coordinator = AgentCoordinator::new(
        CoordinatorConfig::from_context(&context),
        RandomGenerator::new(context.agent.seed),
        FirstExternal,
    );

    let host = cli.listen_host.unwrap_or_else(|| context.agent.listen_host.clone());
    let server = CoordinatorServer::bind(coordinator, &host, cli.port)
        .await?
        .with_simulation(context.simulation.clone());

    // Workers are pointed at this address.
    println!("{}", server.local_addr());

    let summary = server
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!(error = %e, "Could not listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await?;

    tracing::info!(
        agent = %context.agent.name,
        cycles = summary.cycles_completed,
        tic = summary.final_tic,
        "Done"
    );
    Ok(())
}
