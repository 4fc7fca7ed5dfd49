// ABOUTME: CLI replay command - drives many users through one pool from a JSONL script
//
// Script lines look like:
//   {"user": "alice", "op": "tools"}
//   {"user": "bob", "op": "call", "tool": "search", "args": {"keyword": "tea"}}
//   {"user": "carol", "op": "ping"}
//   {"user": "alice", "op": "release"}
// Blank lines and lines starting with '#' are skipped.

use anyhow::{Context, Result};
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::util::print_json;
use super::{OutputFormat, ReplayArgs};
use crate::mcp::ToolArguments;
use crate::mcp_pool::{FailureKind, MetricsSnapshot, PoolManager, PoolStats, Provisioner, UserId};

/// One scripted operation
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ReplayEntry {
    pub user: UserId,
    #[serde(flatten)]
    pub op: ReplayOp,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ReplayOp {
    Tools,
    Call {
        tool: String,
        #[serde(default)]
        args: ToolArguments,
    },
    Ping,
    Release,
}

/// Tally of a replay run plus the pool's state at the end of it
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplayReport {
    pub entries: usize,
    pub succeeded: usize,
    pub request_failed: usize,
    pub service_unavailable: usize,
    pub cancelled: usize,
    pub released: usize,
    pub elapsed_ms: u64,
    pub stats: PoolStats,
    pub metrics: MetricsSnapshot,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Succeeded,
    Released(bool),
    Failed(FailureKind),
}

/// Parse a replay script
pub fn parse_script(content: &str) -> Result<Vec<ReplayEntry>> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| {
            let line = line.trim();
            !line.is_empty() && !line.starts_with('#')
        })
        .map(|(index, line)| {
            serde_json::from_str(line).with_context(|| format!("Invalid replay entry on line {}", index + 1))
        })
        .collect()
}

/// Load a replay script from disk
pub fn load_script(path: &Path) -> Result<Vec<ReplayEntry>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read replay script {}", path.display()))?;
    parse_script(&content)
}

/// Execute the replay command
pub async fn execute<P: Provisioner>(
    manager: &PoolManager<P>,
    args: &ReplayArgs,
    format: OutputFormat,
    cancel: &CancellationToken,
) -> Result<()> {
    let entries = load_script(&args.script)?;
    info!(entries = entries.len(), concurrency = args.concurrency, "Replaying script");

    let report = run(manager, entries, args.concurrency, cancel).await;

    match format {
        OutputFormat::Json => print_json(&report)?,
        OutputFormat::Text => output_text(&report),
    }
    Ok(())
}

/// Run `entries` with at most `concurrency` in flight and report the outcome.
pub async fn run<P: Provisioner>(
    manager: &PoolManager<P>,
    entries: Vec<ReplayEntry>,
    concurrency: usize,
    cancel: &CancellationToken,
) -> ReplayReport {
    let started = Instant::now();
    let total = entries.len();

    let outcomes: Vec<Outcome> = stream::iter(entries)
        .map(|entry| run_entry(manager, entry, cancel))
        .buffer_unordered(concurrency.max(1))
        .collect()
        .await;

    let mut report = ReplayReport {
        entries: total,
        elapsed_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        stats: manager.stats().await,
        metrics: manager.metrics(),
        ..ReplayReport::default()
    };
    for outcome in outcomes {
        match outcome {
            Outcome::Succeeded => report.succeeded += 1,
            Outcome::Released(true) => report.released += 1,
            Outcome::Released(false) => {}
            Outcome::Failed(FailureKind::RequestFailed) => report.request_failed += 1,
            Outcome::Failed(FailureKind::ServiceUnavailable) => report.service_unavailable += 1,
            Outcome::Failed(FailureKind::Cancelled) => report.cancelled += 1,
        }
    }
    report
}

async fn run_entry<P: Provisioner>(manager: &PoolManager<P>, entry: ReplayEntry, cancel: &CancellationToken) -> Outcome {
    let user = entry.user;
    let result = match entry.op {
        ReplayOp::Tools => manager.list_tools(&user, cancel).await.map(drop),
        ReplayOp::Call { tool, args } => manager.call_tool(&user, &tool, args, cancel).await.map(drop),
        ReplayOp::Ping => manager.ping(&user, cancel).await,
        ReplayOp::Release => return Outcome::Released(manager.release(&user).await),
    };

    match result {
        Ok(()) => Outcome::Succeeded,
        Err(e) => {
            debug!(user = %user, error = %e, "Replay entry failed");
            Outcome::Failed(e.failure_kind())
        }
    }
}

fn output_text(report: &ReplayReport) {
    println!("Replayed {} entries in {}ms", report.entries, report.elapsed_ms);
    println!("  succeeded:           {}", report.succeeded);
    println!("  request failed:      {}", report.request_failed);
    println!("  service unavailable: {}", report.service_unavailable);
    println!("  cancelled:           {}", report.cancelled);
    println!("  released:            {}", report.released);
    println!();
    println!(
        "Pool: {}/{} resident ({} active, {} error)",
        report.stats.total, report.stats.capacity, report.stats.active, report.stats.error
    );
    let m = &report.metrics;
    println!(
        "Acquires: {} ({} reused), provisions: {} ({} failed), evictions: {}, reaped: {}, releases: {}",
        m.acquires, m.reuse_hits, m.provisions, m.provision_failures, m.evictions, m.reaped, m.releases
    );
}
