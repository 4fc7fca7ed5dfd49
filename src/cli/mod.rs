// ABOUTME: CLI argument parsing and command routing for mcp-gateway
//
// Provides command-line interface for:
// - Listing and calling a user's MCP tools through the pool (tools, call, ping)
// - Driving many users through one pool from a JSONL script (replay)
// - Removing orphaned managed containers (sweep)
// - Printing the effective configuration (config)

pub mod admin;
pub mod call;
pub mod replay;
pub mod util;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::config::GatewayConfig;
use crate::docker::ContainerManager;
use crate::mcp_pool::{PoolManager, Provisioner, UserId};

/// Multi-tenant MCP gateway - per-user pooled connections and containers
#[derive(Parser)]
#[command(name = "mcp-gateway")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Config file (defaults to ./mcp-gateway.toml, ~/.mcp-gateway/config.toml, /etc/mcp-gateway/config.toml)
    #[arg(long, short, global = true)]
    pub config: Option<PathBuf>,

    /// Which kind of backend to pool
    #[arg(long, global = true, default_value = "connection")]
    pub backend: Backend,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

/// Backend kind served to each user
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum Backend {
    /// Logical connection to the shared endpoint
    #[default]
    Connection,
    /// Dedicated Docker container per user
    Container,
}

/// Output format for commands
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// List the tools available to a user
    Tools(UserArgs),

    /// Call one tool on behalf of a user
    Call(CallArgs),

    /// Check that a user's backend answers
    Ping(UserArgs),

    /// Replay a JSONL script of user operations through one pool
    Replay(ReplayArgs),

    /// Remove containers left behind by an earlier gateway process
    Sweep,

    /// Print the effective configuration
    Config,
}

/// Arguments for single-user commands
#[derive(clap::Args)]
pub struct UserArgs {
    /// User to act for
    #[arg(long, short)]
    pub user: UserId,
}

/// Arguments for the call command
#[derive(clap::Args)]
pub struct CallArgs {
    /// User to act for
    #[arg(long, short)]
    pub user: UserId,

    /// Tool name
    #[arg(long, short)]
    pub tool: String,

    /// Tool arguments as a JSON object
    #[arg(long, short)]
    pub args: Option<String>,
}

/// Arguments for the replay command
#[derive(clap::Args)]
pub struct ReplayArgs {
    /// JSONL file, one operation per line
    pub script: PathBuf,

    /// Operations in flight at once
    #[arg(long, short = 'j', default_value = "8")]
    pub concurrency: usize,
}

/// Route a parsed command line to its handler.
pub async fn execute(cli: Cli, config: GatewayConfig) -> Result<()> {
    match cli.command {
        Commands::Config => admin::show_config(&config, cli.format),
        Commands::Sweep => admin::sweep(&config, cli.format).await,
        command => match cli.backend {
            Backend::Connection => {
                let manager = PoolManager::connections(&config.connection);
                run_pooled(&manager, command, cli.format).await
            }
            Backend::Container => {
                let runtime = ContainerManager::connect(&config.docker)
                    .await
                    .context("Failed to connect to Docker")?;
                let manager = PoolManager::containers(runtime, config.container.clone()).await?;
                run_pooled(&manager, command, cli.format).await
            }
        },
    }
}

/// Run one command against a started manager, then shut it down so nothing
/// it provisioned outlives the process.
async fn run_pooled<P: Provisioner>(manager: &PoolManager<P>, command: Commands, format: OutputFormat) -> Result<()> {
    manager.start().await;
    let cancel = util::cancel_on_ctrl_c();

    let result = match command {
        Commands::Tools(args) => call::tools(manager, &args, format, &cancel).await,
        Commands::Call(args) => call::call(manager, &args, format, &cancel).await,
        Commands::Ping(args) => call::ping(manager, &args, format, &cancel).await,
        Commands::Replay(args) => replay::execute(manager, &args, format, &cancel).await,
        Commands::Sweep | Commands::Config => bail!("command does not use a pool"),
    };

    manager.shutdown().await;
    result
}
