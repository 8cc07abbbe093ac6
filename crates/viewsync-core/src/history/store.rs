//! Bounded, persisted snapshot history.
//!
//! # Invariants
//!
//! - Snapshots are append-only; a persisted entry is never edited.
//! - After every committed append, `len() <= limit()`; eviction is FIFO by
//!   position.
//! - A quota failure triggers at most one trim-and-retry cycle. If the
//!   retry fails too, the error is returned and the in-memory history stays
//!   authoritative.

use tracing::{debug, instrument, warn};

use super::storage::{StateStorage, StorageError};
use crate::model::snapshot::Snapshot;

/// Persist attempts per append: the first write plus one retry after trimming.
const MAX_PERSIST_ATTEMPTS: usize = 2;

/// Ordered, size-bounded sequence of snapshots backed by a [`StateStorage`].
pub struct HistoryStore {
    storage: Box<dyn StateStorage>,
    key: String,
    limit: usize,
    entries: Vec<Snapshot>,
}

impl std::fmt::Debug for HistoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HistoryStore")
            .field("key", &self.key)
            .field("limit", &self.limit)
            .field("entries", &self.entries.len())
            .finish_non_exhaustive()
    }
}

impl HistoryStore {
    /// Create an empty store. A `limit` of zero is raised to one.
    pub fn new(storage: Box<dyn StateStorage>, key: impl Into<String>, limit: usize) -> Self {
        Self {
            storage,
            key: key.into(),
            limit: limit.max(1),
            entries: Vec::new(),
        }
    }

    /// Replace the in-memory history with what the backend holds.
    ///
    /// Absent, unreadable or corrupt storage yields an empty history.
    /// Individual records that fail to decode are skipped. With a
    /// `partition`, snapshots named for another partition are dropped and
    /// the remainder is written back.
    #[instrument(skip(self), fields(key = %self.key))]
    pub fn load(&mut self, partition: Option<&str>) -> &[Snapshot] {
        self.entries = self.read_entries();

        if let Some(partition) = partition {
            let before = self.entries.len();
            self.entries.retain(|snapshot| snapshot.in_partition(partition));
            let discarded = before - self.entries.len();

            if discarded > 0 {
                debug!(partition, discarded, "discarding snapshots from foreign partition");
                if let Err(err) = self.persist() {
                    warn!(error = %err, "failed to resync history after partition filter");
                }
            }
        }

        debug!(entries = self.entries.len(), "history loaded");
        &self.entries
    }

    fn read_entries(&self) -> Vec<Snapshot> {
        let payload = match self.storage.read(&self.key) {
            Ok(Some(payload)) => payload,
            Ok(None) => return Vec::new(),
            Err(err) => {
                warn!(error = %err, "history storage unreadable; starting empty");
                return Vec::new();
            }
        };

        let records: Vec<serde_json::Value> = match serde_json::from_str(&payload) {
            Ok(records) => records,
            Err(err) => {
                warn!(error = %err, "history payload corrupt; starting empty");
                return Vec::new();
            }
        };

        records
            .into_iter()
            .enumerate()
            .filter_map(|(index, record)| match serde_json::from_value(record) {
                Ok(snapshot) => Some(snapshot),
                Err(err) => {
                    warn!(index, error = %err, "skipping undecodable snapshot");
                    None
                }
            })
            .collect()
    }

    /// Append `snapshots` and persist.
    ///
    /// The in-memory append always happens. On a quota failure the history
    /// is trimmed to the bound and persisted once more.
    ///
    /// # Errors
    ///
    /// Returns the storage error when persistence still fails after the
    /// trim-and-retry cycle, or immediately for non-quota failures. The
    /// in-memory history is bounded and current either way.
    #[instrument(skip(self, snapshots), fields(key = %self.key, incoming = snapshots.len()))]
    pub fn append(&mut self, snapshots: Vec<Snapshot>) -> Result<(), StorageError> {
        self.entries.extend(snapshots);

        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.persist() {
                Ok(()) => break,
                Err(err) if err.is_quota_exceeded() && attempt < MAX_PERSIST_ATTEMPTS => {
                    let evicted = self.evict_overflow();
                    warn!(evicted, error = %err, "storage quota exceeded; trimmed history and retrying");
                }
                Err(err) => {
                    self.evict_overflow();
                    warn!(error = %err, entries = self.entries.len(), "history kept in memory only");
                    return Err(err);
                }
            }
        }

        if self.evict_overflow() > 0 {
            self.persist()?;
        }
        Ok(())
    }

    /// Evict from the front until the bound holds, then re-persist.
    ///
    /// Returns the number of evicted snapshots.
    ///
    /// # Errors
    ///
    /// Returns the storage error if the re-persist fails.
    pub fn trim(&mut self) -> Result<usize, StorageError> {
        let evicted = self.evict_overflow();
        if evicted > 0 {
            self.persist()?;
        }
        Ok(evicted)
    }

    /// Remove everything, in memory and in storage.
    ///
    /// # Errors
    ///
    /// Returns the storage error if the backend cannot be cleared.
    pub fn clear(&mut self) -> Result<(), StorageError> {
        self.entries.clear();
        self.storage.remove(&self.key)
    }

    fn evict_overflow(&mut self) -> usize {
        let overflow = self.entries.len().saturating_sub(self.limit);
        if overflow > 0 {
            self.entries.drain(..overflow);
            debug!(evicted = overflow, limit = self.limit, "evicted oldest snapshots");
        }
        overflow
    }

    fn persist(&mut self) -> Result<(), StorageError> {
        let payload = serde_json::to_string(&self.entries)?;
        self.storage.write(&self.key, &payload)
    }

    /// Most recent snapshot.
    #[must_use]
    pub fn current(&self) -> Option<&Snapshot> {
        self.entries.last()
    }

    /// Index of the snapshot before the current one.
    #[must_use]
    pub fn previous_index(&self) -> Option<usize> {
        self.entries.len().checked_sub(2)
    }

    #[must_use]
    pub fn get(&self, index: usize) -> Option<&Snapshot> {
        self.entries.get(index)
    }

    /// Scan backwards from `start` (default: newest) for the first snapshot
    /// accepted by `predicate`.
    pub fn find<F>(&self, mut predicate: F, start: Option<usize>) -> Option<usize>
    where
        F: FnMut(usize, &Snapshot) -> bool,
    {
        let newest = self.entries.len().checked_sub(1)?;
        let from = start.map_or(newest, |s| s.min(newest));
        (0..=from)
            .rev()
            .find(|&index| predicate(index, &self.entries[index]))
    }

    #[must_use]
    pub fn entries(&self) -> &[Snapshot] {
        &self.entries
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub const fn limit(&self) -> usize {
        self.limit
    }

    /// Change the bound. Takes effect on the next append or trim.
    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit.max(1);
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }
}
