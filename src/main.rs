//! execution-agent
//!
//! Heartbeats to the orchestrator and runs test jobs until interrupted.
//! Configuration comes from `--config` or the `EXECUTION_AGENT_CONFIG`
//! env var.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use execution_agent::{
    config::AgentConfig, controller::AgentController, runner::ShellRunner,
    transport::HttpTransport,
};

#[derive(Parser, Debug)]
#[command(name = "execution-agent")]
#[command(about = "Runs test jobs handed out by the orchestrator and reports results")]
struct Args {
    /// Path to a JSON configuration file
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let config = AgentConfig::load(args.config.as_deref()).context("Failed to load configuration")?;

    let default_level = if config.debug { "debug" } else { args.log_level.as_str() };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    info!(
        agent_id = %config.id,
        backend = %config.backend.url,
        cli_command = %config.cli_command,
        "Loaded configuration"
    );

    let transport = HttpTransport::new(config.request_timeout())
        .context("Failed to build HTTP client")?;
    let controller = AgentController::new(config, Arc::new(transport), Arc::new(ShellRunner::new()));

    controller
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
            info!("Shutdown requested");
        })
        .await;

    Ok(())
}
