//! Executes schedules against a real synchronizer over in-memory storage and
//! an in-memory data source, recording everything the oracle inspects.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::rc::Rc;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use viewsync_core::config::{HistoryConfig, MergeConfig};
use viewsync_core::{
    Constraint, EngineConfig, EventKind, Filter, FilterPatch, HistoryStore, MemoryStorage,
    MutationOptions, NamedFilterTable, PrivateSelection, Snapshot, StateSynchronizer,
};

use crate::rng::DeterministicRng;
use crate::schedule::{self, HOLD_TOKEN, Op, PRIVATE_CHANNELS, ScheduleConfig};

type Synchronizer = StateSynchronizer<NamedFilterTable>;

/// Filters and selections of one history entry.
pub type SetPair = (Vec<Filter>, Vec<Filter>);

/// Parameters for one simulated session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SimulationConfig {
    pub seed: u64,
    pub mutations: usize,
    pub history_limit: usize,
    /// Process-wide merge default for filters.
    pub merge_filters: bool,
    pub hold_percent: u8,
    pub callback_percent: u8,
    pub fault_quota_percent: u8,
    pub fault_io_percent: u8,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            seed: 0,
            mutations: 40,
            history_limit: 5,
            merge_filters: false,
            hold_percent: 30,
            callback_percent: 15,
            fault_quota_percent: 8,
            fault_io_percent: 4,
        }
    }
}

impl SimulationConfig {
    #[must_use]
    pub const fn schedule_config(&self) -> ScheduleConfig {
        ScheduleConfig {
            mutations: self.mutations,
            history_limit: self.history_limit,
            hold_percent: self.hold_percent,
            callback_percent: self.callback_percent,
            fault_quota_percent: self.fault_quota_percent,
            fault_io_percent: self.fault_io_percent,
        }
    }

    fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            history: HistoryConfig {
                limit: self.history_limit,
                ..HistoryConfig::default()
            },
            merge: MergeConfig {
                filters: self.merge_filters,
                selections: false,
            },
            ..EngineConfig::default()
        }
    }
}

/// State observed after one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceEvent {
    pub step: usize,
    pub op: String,
    pub filters: usize,
    pub selections: usize,
    pub history: usize,
    pub storage_error: bool,
}

/// Everything recorded while running one schedule.
#[derive(Debug, Clone, PartialEq)]
pub struct RunOutcome {
    pub trace: Vec<TraceEvent>,
    pub state_ready: bool,
    pub data_source_ready: bool,
    pub filters: Vec<Filter>,
    pub selections: Vec<Filter>,
    /// Channels installed on the data source at the end.
    pub channels: BTreeMap<String, Vec<Constraint>>,
    /// Constraints each private channel should hold, from the synchronizer's
    /// own record of private selections.
    pub private_expected: BTreeMap<String, Vec<Constraint>>,
    pub history: Vec<SetPair>,
    /// History as re-read from storage; `None` when the last write failed.
    pub persisted: Option<Vec<SetPair>>,
    pub event_counts: BTreeMap<&'static str, usize>,
    pub ready_registered: Vec<u32>,
    pub ready_ran: Vec<u32>,
    pub source_registered: Vec<u32>,
    pub source_ran: Vec<u32>,
    pub storage_errors: usize,
}

/// A simulated session and its attach-first reference run.
#[derive(Debug, Clone, PartialEq)]
pub struct SimulationResult {
    pub config: SimulationConfig,
    pub schedule: Vec<Op>,
    pub run: RunOutcome,
    pub reference: RunOutcome,
    /// At least one write failed during the run.
    pub interesting_state_reached: bool,
}

#[derive(Debug, Clone)]
pub struct Simulator {
    config: SimulationConfig,
}

impl Simulator {
    /// # Errors
    ///
    /// Returns an error for a zero history limit.
    pub fn new(config: SimulationConfig) -> Result<Self> {
        if config.history_limit == 0 {
            bail!("history_limit must be > 0");
        }
        Ok(Self { config })
    }

    /// Generate the seed's schedule, run it, then run it again with the data
    /// source attached first.
    ///
    /// # Errors
    ///
    /// Reserved for harness failures; invariant violations are reported by
    /// the oracle instead.
    pub fn run(&mut self) -> Result<SimulationResult> {
        let mut rng = DeterministicRng::new(self.config.seed);
        let schedule = schedule::generate(&self.config.schedule_config(), &mut rng);
        debug!(seed = self.config.seed, steps = schedule.len(), "schedule generated");

        let run = execute(&self.config, &schedule);
        let reference = execute(&self.config, &schedule::attach_first(&schedule));
        let interesting_state_reached = run.storage_errors > 0;

        info!(
            seed = self.config.seed,
            steps = schedule.len(),
            storage_errors = run.storage_errors,
            "simulation complete"
        );

        Ok(SimulationResult {
            config: self.config,
            schedule,
            run,
            reference,
            interesting_state_reached,
        })
    }
}

#[derive(Default)]
struct Recorder {
    events: BTreeMap<&'static str, usize>,
    ready_ran: Vec<u32>,
    source_ran: Vec<u32>,
}

/// Run `ops` against a fresh synchronizer.
#[must_use]
pub fn execute(config: &SimulationConfig, ops: &[Op]) -> RunOutcome {
    let storage = MemoryStorage::new();
    let engine_config = config.engine_config();
    let mut sync = Synchronizer::new(engine_config.clone(), Box::new(storage.clone()));

    let recorder = Rc::new(RefCell::new(Recorder::default()));
    for kind in EventKind::ALL {
        let sink = Rc::clone(&recorder);
        sync.on(kind, move |event| {
            *sink.borrow_mut().events.entry(event.kind().name()).or_default() += 1;
        });
    }

    let mut trace = Vec::with_capacity(ops.len());
    let mut ready_registered = Vec::new();
    let mut source_registered = Vec::new();
    let mut storage_errors = 0;

    for (step, op) in ops.iter().enumerate() {
        match op {
            Op::OnReady { id } => {
                ready_registered.push(*id);
                let sink = Rc::clone(&recorder);
                let id = *id;
                sync.on_ready(move |_| sink.borrow_mut().ready_ran.push(id));
            }
            Op::OnDataSource { id } => {
                source_registered.push(*id);
                let sink = Rc::clone(&recorder);
                let id = *id;
                sync.on_data_source_ready(move |_| sink.borrow_mut().source_ran.push(id));
            }
            Op::Fault { fault } => storage.inject((*fault).into()),
            other => apply(&mut sync, other),
        }

        let failed = sync.last_storage_error().is_some();
        if failed {
            storage_errors += 1;
        }
        trace.push(TraceEvent {
            step,
            op: op.label().to_string(),
            filters: sync.filters().len(),
            selections: sync.selections().len(),
            history: sync.history().len(),
            storage_error: failed,
        });
    }

    let history = set_pairs(sync.history().entries());
    let persisted = sync.last_storage_error().is_none().then(|| {
        let mut reread = HistoryStore::new(
            Box::new(storage.clone()),
            engine_config.history.storage_key.clone(),
            engine_config.history.limit,
        );
        set_pairs(reread.load(None))
    });

    let channels = sync
        .data_source()
        .map(|table| table.channels().clone())
        .unwrap_or_default();

    let private_expected = PRIVATE_CHANNELS
        .iter()
        .filter_map(|name| match sync.private_selection(name) {
            Some(PrivateSelection::Filters(filters)) => Some((
                (*name).to_string(),
                filters.iter().map(Constraint::from).collect(),
            )),
            _ => None,
        })
        .collect();

    let recorded = std::mem::take(&mut *recorder.borrow_mut());

    RunOutcome {
        trace,
        state_ready: sync.is_ready(),
        data_source_ready: sync.is_data_source_ready(),
        filters: sync.filters().to_vec(),
        selections: sync.selections().to_vec(),
        channels,
        private_expected,
        history,
        persisted,
        event_counts: recorded.events,
        ready_registered,
        ready_ran: recorded.ready_ran,
        source_registered,
        source_ran: recorded.source_ran,
        storage_errors,
    }
}

fn set_pairs(entries: &[Snapshot]) -> Vec<SetPair> {
    entries
        .iter()
        .map(|s| (s.filters.clone(), s.selections.clone()))
        .collect()
}

fn apply(sync: &mut Synchronizer, op: &Op) {
    match op.clone() {
        Op::Load => sync.load_state(None),
        Op::LoadIndex { index } => sync.load_state(Some(index)),
        Op::LoadFilters { index } => sync.load_filters(index),
        Op::Attach => sync.attach_data_source(NamedFilterTable::new()),
        Op::Hold => {
            sync.hold_ready(HOLD_TOKEN);
        }
        Op::Release => {
            sync.release_ready(HOLD_TOKEN);
        }
        Op::AddFilters { filters, merge } => sync.add_filters(
            filters,
            MutationOptions {
                merge,
                ..MutationOptions::default()
            },
        ),
        Op::SetFilters { filters } => sync.set_filters(filters, MutationOptions::default()),
        Op::ClearFilters => sync.clear_filters(MutationOptions::default()),
        Op::RemoveFilter { id, member } => sync.remove_filter(&id, member.as_deref()),
        Op::UpdateFilterMembers { id, members } => {
            sync.update_filter(&id, &FilterPatch::members(members));
        }
        Op::SetOperator { id, operator } => sync.set_filter_operator(&id, operator),
        Op::AddSelections { selections, clear } => {
            let options = if clear {
                MutationOptions::default().with_clear()
            } else {
                MutationOptions::default()
            };
            sync.add_selections(selections, options);
        }
        Op::ClearSelections => sync.clear_selections(MutationOptions::default()),
        Op::RemoveSelection { id, member } => sync.remove_selection(&id, member.as_deref()),
        Op::MoveSelectionToFilter => sync.move_selection_to_filter(),
        Op::MembersComplete => sync.update_filter_members_complete(true),
        Op::Private { name, filters } => {
            sync.add_private_selection(name, PrivateSelection::Filters(filters), None);
        }
        Op::RemovePrivate { name } => sync.remove_private_selection(name),
        Op::OnReady { .. } | Op::OnDataSource { .. } | Op::Fault { .. } => {}
    }
}
