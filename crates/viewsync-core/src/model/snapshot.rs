//! Persisted view-state snapshots.
//!
//! A [`Snapshot`] is one moment of synchronizer state. Older writers stored
//! filters either flat or wrapped in a `{ "data": { .. } }` envelope; both
//! shapes are resolved into plain [`Filter`] values here, once, on decode.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::filter::Filter;

/// Opaque key/value bag restored onto the synchronizer on load.
pub type ViewState = BTreeMap<String, Value>;

/// Custom state namespaced by view, then by key.
pub type CustomState = BTreeMap<String, BTreeMap<String, Value>>;

/// One persisted moment of application state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "SnapshotRecord")]
pub struct Snapshot {
    pub name: Option<String>,
    pub view_state: ViewState,
    pub custom_state: CustomState,
    pub filters: Vec<Filter>,
    pub selections: Vec<Filter>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,
}

impl Snapshot {
    /// Capture the current sets as a new snapshot.
    ///
    /// View state is restored on load but never re-captured, so it is always
    /// empty here.
    #[must_use]
    pub fn capture(
        name: Option<String>,
        custom_state: CustomState,
        filters: Vec<Filter>,
        selections: Vec<Filter>,
    ) -> Self {
        Self {
            name,
            view_state: ViewState::new(),
            custom_state,
            filters,
            selections,
            saved_at: Some(Utc::now()),
        }
    }

    /// Look up a custom-state value for `view`/`key`.
    #[must_use]
    pub fn custom_value(&self, view: &str, key: &str) -> Option<&Value> {
        self.custom_state.get(view).and_then(|entries| entries.get(key))
    }

    /// `true` when this snapshot belongs to `partition`.
    #[must_use]
    pub fn in_partition(&self, partition: &str) -> bool {
        self.name.as_deref() == Some(partition)
    }
}

/// A filter as found in persisted history.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum FilterRecord {
    /// Model-instance envelope: `{ "data": { ..filter.. } }`.
    Wrapped { data: Filter },
    /// Plain filter fields.
    Plain(Filter),
}

impl From<FilterRecord> for Filter {
    fn from(record: FilterRecord) -> Self {
        match record {
            FilterRecord::Wrapped { data } | FilterRecord::Plain(data) => data,
        }
    }
}

/// Decode-side shape of [`Snapshot`]; every field may be missing or null.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SnapshotRecord {
    name: Option<String>,
    view_state: Option<ViewState>,
    custom_state: Option<CustomState>,
    filters: Option<Vec<FilterRecord>>,
    selections: Option<Vec<FilterRecord>>,
    saved_at: Option<DateTime<Utc>>,
}

impl From<SnapshotRecord> for Snapshot {
    fn from(record: SnapshotRecord) -> Self {
        let resolve = |records: Option<Vec<FilterRecord>>| -> Vec<Filter> {
            records
                .unwrap_or_default()
                .into_iter()
                .map(Filter::from)
                .collect()
        };

        Self {
            name: record.name,
            view_state: record.view_state.unwrap_or_default(),
            custom_state: record.custom_state.unwrap_or_default(),
            filters: resolve(record.filters),
            selections: resolve(record.selections),
            saved_at: record.saved_at,
        }
    }
}
