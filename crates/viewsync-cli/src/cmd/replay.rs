//! `vsync replay`: drive a synchronizer from a JSON script of operations and
//! report the resulting sets, installed channels and emitted events.

use anyhow::{Context, Result};
use clap::Args;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;
use tracing::{debug, info};
use viewsync_core::{
    Constraint, EventKind, Filter, FilterPatch, MemoryStorage, MutationOptions, NamedFilterTable,
    Operator, PrivateSelection, StateEvent, StateStorage, StateSynchronizer,
};

use super::Workspace;
use crate::output::{OutputMode, pretty_kv, pretty_rule, pretty_section, render_mode};

#[derive(Args, Debug)]
#[command(after_help = "\
SCRIPT FORMAT:
  A JSON array of steps, each tagged by \"op\":
    [{\"op\": \"load\"},
     {\"op\": \"add_filters\", \"filters\": [{\"id\": \"f1\", \"hierarchyName\": \"[Study].[Name]\", \"members\": [\"A\"]}]},
     {\"op\": \"attach\"}]

  State is loaded before the first step unless a step loads it. A data
  source is attached after the last step unless a step attaches one or
  --detached is given.")]
pub struct ReplayArgs {
    /// Script file, or `-` for stdin
    pub script: PathBuf,

    /// Keep history in memory instead of the state directory
    #[arg(long)]
    pub in_memory: bool,

    /// Never attach a data source implicitly
    #[arg(long)]
    pub detached: bool,
}

fn default_true() -> bool {
    true
}

/// One scripted operation.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Step {
    Load {
        #[serde(default)]
        index: Option<usize>,
    },
    LoadFilters {
        index: usize,
    },
    Attach,
    Hold {
        token: String,
    },
    Release {
        token: String,
    },
    AddFilters {
        filters: Vec<Filter>,
        #[serde(default)]
        merge: Option<bool>,
        #[serde(default)]
        skip_state: bool,
    },
    PrependFilter {
        filter: Filter,
    },
    SetFilters {
        filters: Vec<Filter>,
        #[serde(default)]
        skip_state: bool,
    },
    ClearFilters {
        #[serde(default)]
        skip_state: bool,
    },
    RemoveFilter {
        id: String,
        #[serde(default)]
        unique_name: Option<String>,
    },
    UpdateFilter {
        id: String,
        patch: FilterPatch,
    },
    SetFilterOperator {
        id: String,
        operator: Operator,
    },
    AddSelections {
        selections: Vec<Filter>,
        #[serde(default)]
        merge: Option<bool>,
        #[serde(default)]
        clear: bool,
        #[serde(default)]
        skip_state: bool,
    },
    SetSelections {
        selections: Vec<Filter>,
        #[serde(default)]
        skip_state: bool,
    },
    ClearSelections {
        #[serde(default)]
        skip_state: bool,
    },
    RemoveSelection {
        id: String,
        #[serde(default)]
        unique_name: Option<String>,
    },
    UpdateSelection {
        id: String,
        patch: FilterPatch,
    },
    MoveSelectionToFilter,
    MembersComplete {
        #[serde(default = "default_true")]
        skip_state: bool,
    },
    Private {
        name: String,
        selection: PrivateSelection,
    },
    RemovePrivate {
        name: String,
    },
    Group {
        label: String,
        filters: Vec<Filter>,
    },
    Custom {
        view: String,
        key: String,
        value: Value,
    },
}

impl Step {
    const fn loads(&self) -> bool {
        matches!(self, Self::Load { .. })
    }

    const fn attaches(&self) -> bool {
        matches!(self, Self::Attach)
    }
}

/// Final state after a replay.
#[derive(Debug, Serialize)]
pub struct ReplayReport {
    pub steps: usize,
    pub ready: bool,
    pub data_source_ready: bool,
    pub filters: Vec<Filter>,
    pub selections: Vec<Filter>,
    pub channels: BTreeMap<String, Vec<Constraint>>,
    pub data_source_calls: usize,
    pub events: Vec<StateEvent>,
    pub history_len: usize,
    pub storage_error: Option<String>,
}

type Synchronizer = StateSynchronizer<NamedFilterTable>;

pub fn parse_script(text: &str) -> Result<Vec<Step>> {
    serde_json::from_str(text).context("Failed to parse replay script")
}

fn read_script(path: &Path) -> Result<String> {
    if path.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .context("Failed to read replay script from stdin")?;
        return Ok(text);
    }
    std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))
}

/// Run `steps` against a fresh synchronizer backed by `storage`.
pub fn replay(
    workspace: &Workspace,
    storage: Box<dyn StateStorage>,
    steps: Vec<Step>,
    detached: bool,
) -> ReplayReport {
    let mut sync = Synchronizer::new(workspace.config.clone(), storage);
    let events = Rc::new(RefCell::new(Vec::new()));
    for kind in EventKind::ALL {
        let sink = Rc::clone(&events);
        sync.on(kind, move |event| sink.borrow_mut().push(event.clone()));
    }

    let count = steps.len();
    let explicit_load = steps.iter().any(Step::loads);
    let explicit_attach = steps.iter().any(Step::attaches);
    if !explicit_load {
        sync.load_state(None);
    }

    for (i, step) in steps.into_iter().enumerate() {
        debug!(step = i, ?step, "replay step");
        apply(&mut sync, step);
    }

    if !explicit_attach && !detached {
        sync.attach_data_source(NamedFilterTable::new());
    }

    let (channels, data_source_calls) = sync
        .data_source()
        .map(|table| (table.channels().clone(), table.calls().len()))
        .unwrap_or_default();

    info!(steps = count, events = events.borrow().len(), "replay finished");

    let events = events.borrow().clone();
    ReplayReport {
        steps: count,
        ready: sync.is_ready(),
        data_source_ready: sync.is_data_source_ready(),
        filters: sync.filters().to_vec(),
        selections: sync.selections().to_vec(),
        channels,
        data_source_calls,
        events,
        history_len: sync.history().len(),
        storage_error: sync.last_storage_error().map(ToString::to_string),
    }
}

fn apply(sync: &mut Synchronizer, step: Step) {
    let opts = |skip_state: bool| MutationOptions {
        skip_state,
        ..MutationOptions::default()
    };

    match step {
        Step::Load { index } => sync.load_state(index),
        Step::LoadFilters { index } => sync.load_filters(index),
        Step::Attach => sync.attach_data_source(NamedFilterTable::new()),
        Step::Hold { token } => {
            sync.hold_ready(token);
        }
        Step::Release { token } => {
            sync.release_ready(&token);
        }
        Step::AddFilters {
            filters,
            merge,
            skip_state,
        } => sync.add_filters(
            filters,
            MutationOptions {
                skip_state,
                merge,
                clear: false,
            },
        ),
        Step::PrependFilter { filter } => sync.prepend_filter(filter, MutationOptions::default()),
        Step::SetFilters {
            filters,
            skip_state,
        } => sync.set_filters(filters, opts(skip_state)),
        Step::ClearFilters { skip_state } => sync.clear_filters(opts(skip_state)),
        Step::RemoveFilter { id, unique_name } => sync.remove_filter(&id, unique_name.as_deref()),
        Step::UpdateFilter { id, patch } => sync.update_filter(&id, &patch),
        Step::SetFilterOperator { id, operator } => sync.set_filter_operator(&id, operator),
        Step::AddSelections {
            selections,
            merge,
            clear,
            skip_state,
        } => sync.add_selections(
            selections,
            MutationOptions {
                skip_state,
                merge,
                clear,
            },
        ),
        Step::SetSelections {
            selections,
            skip_state,
        } => sync.set_selections(selections, opts(skip_state)),
        Step::ClearSelections { skip_state } => sync.clear_selections(opts(skip_state)),
        Step::RemoveSelection { id, unique_name } => {
            sync.remove_selection(&id, unique_name.as_deref());
        }
        Step::UpdateSelection { id, patch } => sync.update_selection(&id, &patch),
        Step::MoveSelectionToFilter => sync.move_selection_to_filter(),
        Step::MembersComplete { skip_state } => sync.update_filter_members_complete(skip_state),
        Step::Private { name, selection } => sync.add_private_selection(name, selection, None),
        Step::RemovePrivate { name } => sync.remove_private_selection(name),
        Step::Group { label, filters } => sync.add_group(&label, filters),
        Step::Custom { view, key, value } => {
            sync.set_custom_state(view, key, value);
            sync.update_state();
        }
    }
}

pub fn run_replay(args: &ReplayArgs, output: OutputMode, workspace: &Workspace) -> Result<()> {
    let steps = parse_script(&read_script(&args.script)?)?;
    let storage: Box<dyn StateStorage> = if args.in_memory {
        Box::new(MemoryStorage::new())
    } else {
        Box::new(workspace.storage())
    };

    let report = replay(workspace, storage, steps, args.detached);

    render_mode(
        output,
        &report,
        |r, w| {
            for f in &r.filters {
                writeln!(w, "filter\t{}\t{}\t{}", f.id, f.hierarchy_name, f.members.join(","))?;
            }
            for s in &r.selections {
                writeln!(w, "selection\t{}\t{}\t{}", s.id, s.hierarchy_name, s.members.join(","))?;
            }
            for (name, constraints) in &r.channels {
                writeln!(w, "channel\t{name}\t{}", constraints.len())?;
            }
            for event in &r.events {
                writeln!(w, "event\t{}", event.kind())?;
            }
            writeln!(w, "history\t{}", r.history_len)
        },
        |r, w| {
            pretty_section(w, &format!("Replay ({} steps)", r.steps))?;
            pretty_kv(w, "ready", format!("state={} source={}", r.ready, r.data_source_ready))?;
            pretty_kv(w, "history", r.history_len.to_string())?;
            if let Some(err) = &r.storage_error {
                pretty_kv(w, "storage", err)?;
            }
            pretty_rule(w)?;
            writeln!(w, "filters ({})", r.filters.len())?;
            for f in &r.filters {
                writeln!(w, "  {} {} {} [{}]", f.id, f.hierarchy_name, f.operator, f.members.join(", "))?;
            }
            writeln!(w, "selections ({})", r.selections.len())?;
            for s in &r.selections {
                writeln!(w, "  {} {} {} [{}]", s.id, s.hierarchy_name, s.operator, s.members.join(", "))?;
            }
            pretty_rule(w)?;
            writeln!(w, "channels ({}, {} calls)", r.channels.len(), r.data_source_calls)?;
            for (name, constraints) in &r.channels {
                writeln!(w, "  {name}: {} constraints", constraints.len())?;
            }
            let names: Vec<&str> = r.events.iter().map(|e| e.kind().name()).collect();
            pretty_kv(w, "events", names.join(" "))
        },
    )
}
