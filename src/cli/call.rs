// ABOUTME: CLI tools, call and ping commands - one MCP exchange for one user
//
// Each command acquires the user's backend through the pool (provisioning it
// if needed), performs a single exchange and reports the result.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

use super::util::{parse_tool_args, print_json};
use super::{CallArgs, OutputFormat, UserArgs};
use crate::mcp::ToolInfo;
use crate::mcp_pool::{PoolManager, Provisioner};

/// JSON output of the ping command
#[derive(Debug, Serialize)]
pub struct PingOutput {
    pub user: String,
    pub ok: bool,
    pub elapsed_ms: u64,
}

/// Execute the tools command
pub async fn tools<P: Provisioner>(
    manager: &PoolManager<P>,
    args: &UserArgs,
    format: OutputFormat,
    cancel: &CancellationToken,
) -> Result<()> {
    let tools = manager
        .list_tools(&args.user, cancel)
        .await
        .with_context(|| format!("Listing tools for {} failed", args.user))?;

    match format {
        OutputFormat::Json => print_json(&tools)?,
        OutputFormat::Text => output_tools_text(&tools),
    }
    Ok(())
}

/// Execute the call command
pub async fn call<P: Provisioner>(
    manager: &PoolManager<P>,
    args: &CallArgs,
    format: OutputFormat,
    cancel: &CancellationToken,
) -> Result<()> {
    let arguments = parse_tool_args(args.args.as_deref())?;

    let result: Value = manager
        .call_tool(&args.user, &args.tool, arguments, cancel)
        .await
        .with_context(|| format!("Calling {} for {} failed", args.tool, args.user))?;

    match format {
        OutputFormat::Json => print_json(&result)?,
        OutputFormat::Text => output_call_text(&result)?,
    }
    Ok(())
}

/// Execute the ping command
pub async fn ping<P: Provisioner>(
    manager: &PoolManager<P>,
    args: &UserArgs,
    format: OutputFormat,
    cancel: &CancellationToken,
) -> Result<()> {
    let started = Instant::now();
    manager
        .ping(&args.user, cancel)
        .await
        .with_context(|| format!("Ping for {} failed", args.user))?;
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    match format {
        OutputFormat::Json => print_json(&PingOutput {
            user: args.user.to_string(),
            ok: true,
            elapsed_ms,
        })?,
        OutputFormat::Text => println!("✓ {} answered in {elapsed_ms}ms", args.user),
    }
    Ok(())
}

fn output_tools_text(tools: &[ToolInfo]) {
    if tools.is_empty() {
        println!("No tools advertised.");
        return;
    }

    println!("{:<32} DESCRIPTION", "NAME");
    println!("{}", "-".repeat(80));
    for tool in tools {
        println!("{:<32} {}", tool.name, tool.description.as_deref().unwrap_or(""));
    }
}

/// MCP tool results carry a `content` list; text parts are printed as-is,
/// anything else as JSON.
fn output_call_text(result: &Value) -> Result<()> {
    let texts: Vec<&str> = result
        .get("content")
        .and_then(Value::as_array)
        .map(|parts| {
            parts
                .iter()
                .filter(|part| part.get("type").and_then(Value::as_str) == Some("text"))
                .filter_map(|part| part.get("text").and_then(Value::as_str))
                .collect()
        })
        .unwrap_or_default();

    if texts.is_empty() {
        print_json(result)
    } else {
        for text in texts {
            println!("{text}");
        }
        Ok(())
    }
}
