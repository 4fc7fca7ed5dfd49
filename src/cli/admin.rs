// ABOUTME: CLI sweep and config commands - maintenance that needs no pool
//
// sweep: remove containers labelled with this service that no pool owns
// config: print the effective configuration after file and env overrides

use anyhow::{Context, Result};
use serde::Serialize;

use super::util::print_json;
use super::OutputFormat;
use crate::config::GatewayConfig;
use crate::docker::ContainerManager;
use crate::mcp_pool::ContainerProvisioner;

/// JSON output of the sweep command
#[derive(Debug, Serialize)]
pub struct SweepOutput {
    pub service: String,
    pub removed: usize,
}

/// Execute the sweep command
pub async fn sweep(config: &GatewayConfig, format: OutputFormat) -> Result<()> {
    let runtime = ContainerManager::connect(&config.docker)
        .await
        .context("Failed to connect to Docker")?;
    let provisioner = ContainerProvisioner::new(runtime, config.container.clone())?;
    let removed = provisioner.sweep_orphans().await?;

    match format {
        OutputFormat::Json => print_json(&SweepOutput {
            service: config.container.service_name.clone(),
            removed,
        })?,
        OutputFormat::Text => println!(
            "Removed {removed} orphaned container(s) for {}",
            config.container.service_name
        ),
    }
    Ok(())
}

/// Execute the config command
pub fn show_config(config: &GatewayConfig, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(config),
        OutputFormat::Text => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}
