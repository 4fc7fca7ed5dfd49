// ABOUTME: Main entry point for the mcp-gateway CLI
//
// Binary: mcp-gateway
// Usage: mcp-gateway [--config PATH] [--backend connection|container] [--format text|json] <COMMAND>
// - tools: list a user's tools
// - call: call one tool for a user
// - ping: check a user's backend
// - replay: drive a JSONL script of user operations through one pool
// - sweep: remove orphaned managed containers
// - config: print the effective configuration

#![allow(missing_docs)]

use anyhow::{Context, Result};
use clap::Parser;

use mcp_gateway::cli;
use mcp_gateway::config::{GatewayConfig, LogFormat, LoggingConfig};

#[tokio::main]
async fn main() -> Result<()> {
    let args = cli::Cli::parse();
    let config = GatewayConfig::load(args.config.as_deref())?;

    setup_logging(&config.logging)?;
    setup_panic_handler();

    cli::execute(args, config).await
}

/// Console logs go to stderr so command output on stdout stays parseable.
fn setup_logging(logging: &LoggingConfig) -> Result<()> {
    use std::fs::OpenOptions;
    use tracing_subscriber::prelude::*;
    use tracing_subscriber::EnvFilter;

    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(format!("mcp_gateway={}", logging.level))
            .with_context(|| format!("Invalid log level {:?}", logging.level))?,
    };

    let console = match logging.format {
        LogFormat::Text => tracing_subscriber::fmt::layer()
            .with_writer(std::io::stderr)
            .with_target(false)
            .boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer()
            .json()
            .with_writer(std::io::stderr)
            .with_target(true)
            .boxed(),
    };

    let file_layer = match &logging.file {
        Some(log_dir) => {
            std::fs::create_dir_all(log_dir)
                .with_context(|| format!("Failed to create log directory {}", log_dir.display()))?;

            // JSONL log file with timestamp
            let log_file = log_dir.join(format!(
                "mcp-gateway-{}.jsonl",
                chrono::Local::now().format("%Y%m%d-%H%M%S")
            ));
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&log_file)
                .with_context(|| format!("Failed to create log file {}", log_file.display()))?;

            Some(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_target(true)
                    .with_writer(file)
                    .with_ansi(false),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .with(filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(())
}

fn setup_panic_handler() {
    use tracing::error;

    std::panic::set_hook(Box::new(|panic_info| {
        error!("Application panicked: {}", panic_info);
        eprintln!("Application panicked: {}", panic_info);
        eprintln!("Please check the logs for more details.");
    }));
}
