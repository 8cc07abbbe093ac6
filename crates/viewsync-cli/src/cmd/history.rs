use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use clap::{Args, Subcommand};
use serde::Serialize;
use std::io::Write;
use tracing::info;
use viewsync_core::Snapshot;
use viewsync_core::error::ErrorCode;

use super::Workspace;
use crate::output::{OutputMode, pretty_kv, pretty_rule, pretty_section, render_ack, render_mode};

#[derive(Args, Debug)]
pub struct HistoryArgs {
    #[command(subcommand)]
    command: HistoryCommand,
}

#[derive(Subcommand, Debug)]
enum HistoryCommand {
    /// List persisted snapshots, oldest first
    List {
        /// Only snapshots of this partition (also rewrites storage without the others)
        #[arg(long)]
        partition: Option<String>,
    },
    /// Show one snapshot in full
    Show {
        /// Zero-based index; negative values count from the newest
        #[arg(allow_negative_numbers = true)]
        index: i64,
    },
    /// Evict the oldest snapshots until the bound holds
    Trim {
        /// Bound to trim to (default: history.limit)
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Delete the persisted history
    Reset,
    /// Drop snapshots that belong to any other partition
    PrunePartition {
        partition: String,
    },
}

#[derive(Debug, Serialize)]
struct SnapshotSummary {
    index: usize,
    name: Option<String>,
    saved_at: Option<DateTime<Utc>>,
    filters: usize,
    selections: usize,
}

impl SnapshotSummary {
    fn from_snapshot(index: usize, snapshot: &Snapshot) -> Self {
        Self {
            index,
            name: snapshot.name.clone(),
            saved_at: snapshot.saved_at,
            filters: snapshot.filters.len(),
            selections: snapshot.selections.len(),
        }
    }
}

pub fn run_history(args: &HistoryArgs, output: OutputMode, workspace: &Workspace) -> Result<()> {
    match &args.command {
        HistoryCommand::List { partition } => run_list(partition.as_deref(), output, workspace),
        HistoryCommand::Show { index } => run_show(*index, output, workspace),
        HistoryCommand::Trim { limit } => run_trim(*limit, output, workspace),
        HistoryCommand::Reset => run_reset(output, workspace),
        HistoryCommand::PrunePartition { partition } => run_prune(partition, output, workspace),
    }
}

fn run_list(partition: Option<&str>, output: OutputMode, workspace: &Workspace) -> Result<()> {
    let history = workspace.history(partition);
    let rows: Vec<SnapshotSummary> = history
        .entries()
        .iter()
        .enumerate()
        .map(|(i, s)| SnapshotSummary::from_snapshot(i, s))
        .collect();

    render_mode(
        output,
        &rows,
        |rows, w| {
            for row in rows {
                writeln!(
                    w,
                    "{}\t{}\t{}\t{}\t{}",
                    row.index,
                    row.name.as_deref().unwrap_or("-"),
                    row.saved_at.map_or_else(|| "-".to_string(), |t| t.to_rfc3339()),
                    row.filters,
                    row.selections
                )?;
            }
            Ok(())
        },
        |rows, w| {
            pretty_section(w, &format!("History ({} of {})", rows.len(), history.limit()))?;
            if rows.is_empty() {
                writeln!(w, "(empty)")?;
            }
            for row in rows {
                writeln!(
                    w,
                    "#{:<3} {:<16} {:>3} filters {:>3} selections  {}",
                    row.index,
                    row.name.as_deref().unwrap_or("-"),
                    row.filters,
                    row.selections,
                    row.saved_at
                        .map_or_else(String::new, |t| t.format("%Y-%m-%d %H:%M:%S").to_string()),
                )?;
            }
            Ok(())
        },
    )
}

/// Resolve a possibly negative index against `len`.
fn resolve_index(index: i64, len: usize) -> Option<usize> {
    if index >= 0 {
        let index = usize::try_from(index).ok()?;
        (index < len).then_some(index)
    } else {
        let back = usize::try_from(index.unsigned_abs()).ok()?;
        len.checked_sub(back)
    }
}

fn run_show(index: i64, output: OutputMode, workspace: &Workspace) -> Result<()> {
    let history = workspace.history(None);
    let resolved = resolve_index(index, history.len()).ok_or_else(|| {
        anyhow!(
            "{}: {} (index {index}, {} entries)",
            ErrorCode::SnapshotNotFound.code(),
            ErrorCode::SnapshotNotFound.message(),
            history.len()
        )
    })?;
    let snapshot = history
        .get(resolved)
        .ok_or_else(|| anyhow!("{}", ErrorCode::SnapshotNotFound.message()))?;

    render_mode(
        output,
        snapshot,
        |s, w| {
            for f in &s.filters {
                writeln!(w, "filter\t{}\t{}\t{}\t{}", f.id, f.hierarchy_name, f.operator, f.members.join(","))?;
            }
            for f in &s.selections {
                writeln!(w, "selection\t{}\t{}\t{}\t{}", f.id, f.hierarchy_name, f.operator, f.members.join(","))?;
            }
            Ok(())
        },
        |s, w| {
            pretty_section(w, &format!("Snapshot #{resolved}"))?;
            pretty_kv(w, "partition", s.name.as_deref().unwrap_or("(none)"))?;
            if let Some(t) = s.saved_at {
                pretty_kv(w, "saved", t.to_rfc3339())?;
            }
            for (label, set) in [("filters", &s.filters), ("selections", &s.selections)] {
                pretty_rule(w)?;
                writeln!(w, "{label} ({})", set.len())?;
                for f in set {
                    writeln!(w, "  {} {} {} [{}]", f.id, f.hierarchy_name, f.operator, f.members.join(", "))?;
                }
            }
            Ok(())
        },
    )
}

fn run_trim(limit: Option<usize>, output: OutputMode, workspace: &Workspace) -> Result<()> {
    let mut history = workspace.history(None);
    if let Some(limit) = limit {
        history.set_limit(limit);
    }
    let evicted = history.trim()?;
    info!(evicted, remaining = history.len(), "history trimmed");
    render_ack(
        output,
        "trim",
        format!("evicted {evicted}, {} remaining", history.len()),
    )
}

fn run_reset(output: OutputMode, workspace: &Workspace) -> Result<()> {
    let mut history = workspace.history(None);
    let discarded = history.len();
    history.clear()?;
    render_ack(output, "reset", format!("discarded {discarded} snapshots"))
}

fn run_prune(partition: &str, output: OutputMode, workspace: &Workspace) -> Result<()> {
    let history = workspace.history(Some(partition));
    render_ack(
        output,
        "prune-partition",
        format!("{} snapshots kept for '{partition}'", history.len()),
    )
}
