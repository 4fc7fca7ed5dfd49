// ABOUTME: Shared CLI utilities for argument decoding, JSON output and interrupt handling

use anyhow::{bail, Context, Result};
use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::mcp::ToolArguments;

/// Decode `--args` into a tool argument object. Absent means empty.
pub fn parse_tool_args(raw: Option<&str>) -> Result<ToolArguments> {
    let Some(raw) = raw else {
        return Ok(ToolArguments::new());
    };

    match serde_json::from_str::<Value>(raw).context("Tool arguments are not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("Tool arguments must be a JSON object, got {other}"),
    }
}

/// Print any serializable value as pretty JSON
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    println!("{json}");
    Ok(())
}

/// Token cancelled on the first Ctrl-C, so in-flight calls end as cancelled
/// instead of the process dying mid-provision.
pub fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling in-flight calls");
            trigger.cancel();
        }
    });

    token
}
