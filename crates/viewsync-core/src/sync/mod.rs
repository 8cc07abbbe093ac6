//! The state synchronizer: one explicit context object owning the current
//! filter and selection sets, the snapshot history, the readiness gates and
//! the data source.
//!
//! # Ordering
//!
//! A mutation updates the in-memory set right away. Its snapshot (unless
//! `skip_state`) waits for the state gate, so a mutation made before
//! [`StateSynchronizer::load_state`] never hides the persisted session.
//! Projection onto the data source and the matching change event are
//! deferred until both the state and the data-source gates are open. Deferred
//! work reads the sets as they are when it runs.
//!
//! # Failure
//!
//! No mutation returns an error. A failed snapshot write is logged and kept
//! in [`StateSynchronizer::last_storage_error`]; the in-memory state stays
//! authoritative.

mod mutation;
mod private;
mod projection;

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::config::EngineConfig;
use crate::datasource::DataSource;
use crate::events::{EventKind, ListenerId, Listeners, StateEvent};
use crate::history::{HistoryStore, StateStorage, StorageError};
use crate::model::filter::Filter;
use crate::model::snapshot::{CustomState, Snapshot, ViewState};
use crate::readiness::{self, GateKind, Gated, ReadinessCoordinator};

pub use mutation::MutationOptions;
pub use private::{GROUP_SELECTION, PrivateSelection};

pub struct StateSynchronizer<D: DataSource> {
    config: EngineConfig,
    history: HistoryStore,
    filters: Vec<Filter>,
    selections: Vec<Filter>,
    view_state: ViewState,
    custom_state: CustomState,
    private_selections: BTreeMap<String, PrivateSelection>,
    data_source: Option<D>,
    readiness: ReadinessCoordinator<Self>,
    listeners: Listeners,
    last_storage_error: Option<StorageError>,
}

impl<D: DataSource> std::fmt::Debug for StateSynchronizer<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateSynchronizer")
            .field("history", &self.history)
            .field("filters", &self.filters.len())
            .field("selections", &self.selections.len())
            .field("readiness", &self.readiness)
            .field("attached", &self.data_source.is_some())
            .finish_non_exhaustive()
    }
}

impl<D: DataSource> Gated for StateSynchronizer<D> {
    fn readiness(&mut self) -> &mut ReadinessCoordinator<Self> {
        &mut self.readiness
    }
}

impl<D: DataSource + 'static> StateSynchronizer<D> {
    /// Build a synchronizer and load persisted history for the configured
    /// partition. Nothing is applied until [`load_state`](Self::load_state).
    pub fn new(config: EngineConfig, storage: Box<dyn StateStorage>) -> Self {
        let mut history = HistoryStore::new(
            storage,
            config.history.storage_key.clone(),
            config.history.limit,
        );
        history.load(config.session.partition.as_deref());

        Self {
            config,
            history,
            filters: Vec::new(),
            selections: Vec::new(),
            view_state: ViewState::new(),
            custom_state: CustomState::new(),
            private_selections: BTreeMap::new(),
            data_source: None,
            readiness: ReadinessCoordinator::new(),
            listeners: Listeners::new(),
            last_storage_error: None,
        }
    }

    /// Apply the snapshot at `index` (default: most recent), trim history to
    /// the bound, and mark state as loaded.
    ///
    /// The first call opens the state gate (unless held) and emits
    /// `stateready`. Later calls re-apply history without re-firing it.
    pub fn load_state(&mut self, index: Option<usize>) {
        let target = index.or_else(|| self.history.len().checked_sub(1));

        match target.and_then(|i| self.history.get(i)).cloned() {
            Some(snapshot) => self.apply_snapshot(snapshot),
            None if index.is_some() => warn!(?index, "no snapshot at index; nothing applied"),
            None => debug!("history empty; starting from blank state"),
        }

        if let Err(err) = self.history.trim() {
            self.record_storage_error(err);
        }

        self.readiness.mark_loaded();
        self.check_ready();
    }

    fn apply_snapshot(&mut self, snapshot: Snapshot) {
        self.view_state.extend(snapshot.view_state);
        self.custom_state = snapshot.custom_state;

        if !snapshot.filters.is_empty() {
            self.set_filters(snapshot.filters, MutationOptions::skip_state());
        }
        if !snapshot.selections.is_empty() {
            self.set_selections(snapshot.selections, MutationOptions::skip_state());
        }
    }

    /// Replace the current filters with those of history entry `index`.
    pub fn load_filters(&mut self, index: usize) {
        match self.history.get(index) {
            Some(snapshot) => {
                let filters = snapshot.filters.clone();
                self.set_filters(filters, MutationOptions::default());
            }
            None => warn!(index, "unable to find filters for history entry"),
        }
    }

    fn check_ready(&mut self) {
        if !self.readiness.can_open_state() {
            return;
        }
        let ran = readiness::open_gate(self, GateKind::State);
        info!(
            filters = self.filters.len(),
            selections = self.selections.len(),
            deferred = ran,
            "state ready"
        );
        self.emit(&StateEvent::StateReady);
    }

    /// Keep `stateready` from firing until `token` is released.
    pub fn hold_ready(&mut self, token: impl Into<String>) -> bool {
        self.readiness.hold(token)
    }

    /// Release a blocker. Fires `stateready` if loading already finished and
    /// this was the last blocker.
    pub fn release_ready(&mut self, token: &str) -> bool {
        let released = self.readiness.release(token);
        if released {
            self.check_ready();
        }
        released
    }

    /// Store the data source and run callbacks waiting on it, in order.
    pub fn attach_data_source(&mut self, source: D) {
        let replaced = self.data_source.replace(source).is_some();
        let ran = readiness::open_gate(self, GateKind::DataSource);
        info!(replaced, deferred = ran, "data source attached");
    }

    /// Run `callback` once state is loaded.
    pub fn on_ready(&mut self, callback: impl FnOnce(&mut Self) + 'static) {
        readiness::submit(self, GateKind::State, Box::new(callback));
    }

    /// Run `callback` with the data source once it is attached.
    pub fn on_data_source_ready(&mut self, callback: impl FnOnce(&mut D) + 'static) {
        readiness::submit(
            self,
            GateKind::DataSource,
            Box::new(move |sync: &mut Self| {
                if let Some(source) = sync.data_source.as_mut() {
                    callback(source);
                }
            }),
        );
    }

    #[must_use]
    pub const fn is_ready(&self) -> bool {
        self.readiness.is_state_ready()
    }

    #[must_use]
    pub const fn is_data_source_ready(&self) -> bool {
        self.readiness.is_data_source_ready()
    }

    pub fn on(&mut self, kind: EventKind, listener: impl FnMut(&StateEvent) + 'static) -> ListenerId {
        self.listeners.on(kind, listener)
    }

    pub fn off(&mut self, id: ListenerId) -> bool {
        self.listeners.off(id)
    }

    fn emit(&mut self, event: &StateEvent) {
        debug!(event = %event.kind(), "emit");
        self.listeners.emit(event);
    }

    /// Append a snapshot of the current sets to history.
    pub fn update_state(&mut self) {
        let snapshot = Snapshot::capture(
            self.config.session.partition.clone(),
            self.custom_state.clone(),
            self.filters.clone(),
            self.selections.clone(),
        );
        match self.history.append(vec![snapshot]) {
            Ok(()) => self.last_storage_error = None,
            Err(err) => self.record_storage_error(err),
        }
    }

    fn record_storage_error(&mut self, err: StorageError) {
        warn!(code = %err.code(), error = %err, "snapshot not persisted; state kept in memory");
        self.last_storage_error = Some(err);
    }

    /// The error from the most recent failed write, cleared by the next
    /// successful one.
    #[must_use]
    pub const fn last_storage_error(&self) -> Option<&StorageError> {
        self.last_storage_error.as_ref()
    }

    // ------------------------------------------------------------------
    // History navigation
    // ------------------------------------------------------------------

    #[must_use]
    pub fn current_state(&self) -> Option<&Snapshot> {
        self.history.current()
    }

    #[must_use]
    pub fn previous_state_index(&self) -> Option<usize> {
        self.history.previous_index()
    }

    /// Scan history backwards from `start` (default: newest) for the first
    /// snapshot accepted by `predicate`.
    pub fn find_state<F>(&self, predicate: F, start: Option<usize>) -> Option<usize>
    where
        F: FnMut(usize, &Snapshot) -> bool,
    {
        self.history.find(predicate, start)
    }

    #[must_use]
    pub const fn history(&self) -> &HistoryStore {
        &self.history
    }

    // ------------------------------------------------------------------
    // Custom and view state
    // ------------------------------------------------------------------

    pub fn set_custom_state(&mut self, view: impl Into<String>, key: impl Into<String>, value: Value) {
        self.custom_state
            .entry(view.into())
            .or_default()
            .insert(key.into(), value);
    }

    #[must_use]
    pub fn custom_state(&self, view: &str, key: &str) -> Option<&Value> {
        self.custom_state.get(view).and_then(|entries| entries.get(key))
    }

    /// Custom value from the most recent persisted snapshot, or `default`.
    #[must_use]
    pub fn stored_state(&self, view: &str, key: &str, default: Value) -> Value {
        self.history
            .current()
            .and_then(|snapshot| snapshot.custom_value(view, key))
            .cloned()
            .unwrap_or(default)
    }

    #[must_use]
    pub const fn view_state(&self) -> &ViewState {
        &self.view_state
    }

    // ------------------------------------------------------------------
    // Accessors
    // ------------------------------------------------------------------

    #[must_use]
    pub const fn config(&self) -> &EngineConfig {
        &self.config
    }

    #[must_use]
    pub const fn data_source(&self) -> Option<&D> {
        self.data_source.as_ref()
    }

    pub const fn data_source_mut(&mut self) -> Option<&mut D> {
        self.data_source.as_mut()
    }
}

