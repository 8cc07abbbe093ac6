//! Boundary to the external query/aggregation engine.
//!
//! The synchronizer never queries the data source; it only installs or
//! clears named filter channels on it. [`NamedFilterTable`] is an in-memory
//! implementation that records every call, used by the simulator, the CLI
//! replay command and tests.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::filter::{Filter, FilterRange, Operator};

/// A filter translated into the data source's constraint vocabulary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Constraint {
    pub hierarchy: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<String>,
    pub operator: Operator,
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<FilterRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub members_query: Option<String>,
}

impl Constraint {
    /// Constraint selecting the members returned by a raw query.
    pub fn members_query(hierarchy: impl Into<String>, query: impl Into<String>) -> Self {
        Self {
            hierarchy: hierarchy.into(),
            level: None,
            operator: Operator::Union,
            members: Vec::new(),
            range: None,
            members_query: Some(query.into()),
        }
    }

    /// A constraint with nothing to match on. Such constraints are never sent.
    #[must_use]
    pub fn has_no_arguments(&self) -> bool {
        self.members.is_empty() && self.range.is_none() && self.members_query.is_none()
    }
}

impl From<&Filter> for Constraint {
    fn from(filter: &Filter) -> Self {
        Self {
            hierarchy: filter.hierarchy_name.clone(),
            level: filter.unique_name.clone(),
            operator: filter.operator,
            members: filter.members.clone(),
            range: filter.range,
            members_query: None,
        }
    }
}

/// Narrow interface consumed on the external data source.
pub trait DataSource {
    /// Install `constraints` under `channel`, replacing what was there.
    fn set_named_filter(&mut self, channel: &str, constraints: Vec<Constraint>);

    /// Remove whatever is installed under `channel`.
    fn clear_named_filter(&mut self, channel: &str);

    /// Currently installed constraints for `channel`, if the source exposes them.
    fn named_filter(&self, _channel: &str) -> Option<&[Constraint]> {
        None
    }
}

/// One call observed by [`NamedFilterTable`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum DataSourceCall {
    Set {
        channel: String,
        constraints: Vec<Constraint>,
    },
    Clear {
        channel: String,
    },
}

/// In-memory data source: a table of named channels plus a call log.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NamedFilterTable {
    channels: BTreeMap<String, Vec<Constraint>>,
    calls: Vec<DataSourceCall>,
}

impl NamedFilterTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call in arrival order.
    #[must_use]
    pub fn calls(&self) -> &[DataSourceCall] {
        &self.calls
    }

    /// Installed channels and their constraints.
    #[must_use]
    pub const fn channels(&self) -> &BTreeMap<String, Vec<Constraint>> {
        &self.channels
    }
}

impl DataSource for NamedFilterTable {
    fn set_named_filter(&mut self, channel: &str, constraints: Vec<Constraint>) {
        self.calls.push(DataSourceCall::Set {
            channel: channel.to_string(),
            constraints: constraints.clone(),
        });
        self.channels.insert(channel.to_string(), constraints);
    }

    fn clear_named_filter(&mut self, channel: &str) {
        self.calls.push(DataSourceCall::Clear {
            channel: channel.to_string(),
        });
        self.channels.remove(channel);
    }

    fn named_filter(&self, channel: &str) -> Option<&[Constraint]> {
        self.channels.get(channel).map(Vec::as_slice)
    }
}
