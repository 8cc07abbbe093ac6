//! Private selections: named side channels on the data source that live
//! outside the filter/selection history.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::StateSynchronizer;
use crate::datasource::{Constraint, DataSource};
use crate::events::StateEvent;
use crate::model::filter::Filter;
use crate::readiness::{self, GateKind};

/// Channel name used by [`StateSynchronizer::add_group`].
pub const GROUP_SELECTION: &str = "groupselection";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivateSelection {
    Filters(Vec<Filter>),
    /// Raw members query evaluated against the session subject hierarchy.
    MembersQuery(String),
}

type SourceCallback<D> = Box<dyn FnOnce(&mut D)>;

impl<D: DataSource + 'static> StateSynchronizer<D> {
    /// Install `selection` on channel `name` once the data source is ready.
    ///
    /// `callback` runs with the data source right after installation.
    pub fn add_private_selection(
        &mut self,
        name: impl Into<String>,
        selection: PrivateSelection,
        callback: Option<SourceCallback<D>>,
    ) {
        let name = name.into();
        readiness::submit(
            self,
            GateKind::DataSource,
            Box::new(move |sync: &mut Self| sync.install_private(name, selection, callback)),
        );
    }

    fn install_private(
        &mut self,
        name: String,
        selection: PrivateSelection,
        callback: Option<SourceCallback<D>>,
    ) {
        let constraints = match &selection {
            PrivateSelection::Filters(filters) => filters.iter().map(Constraint::from).collect(),
            PrivateSelection::MembersQuery(query) => {
                let Some(subject) = self.config.session.subject_name.as_deref() else {
                    warn!(channel = %name, "members query without session.subject_name; skipped");
                    return;
                };
                vec![Constraint::members_query(subject, query.as_str())]
            }
        };

        let Some(source) = self.data_source.as_mut() else {
            return;
        };
        source.set_named_filter(&name, constraints.clone());
        if let Some(callback) = callback {
            callback(source);
        }

        debug!(channel = %name, constraints = constraints.len(), "private selection installed");
        self.private_selections.insert(name.clone(), selection);
        self.emit(&StateEvent::PrivateSelectionChange { name, constraints });
    }

    /// Clear channel `name` once the data source is ready.
    pub fn remove_private_selection(&mut self, name: impl Into<String>) {
        let name = name.into();
        readiness::submit(
            self,
            GateKind::DataSource,
            Box::new(move |sync: &mut Self| {
                if let Some(source) = sync.data_source.as_mut() {
                    source.clear_named_filter(&name);
                }
                sync.private_selections.remove(&name);
                sync.emit(&StateEvent::PrivateSelectionChange {
                    name,
                    constraints: Vec::new(),
                });
            }),
        );
    }

    #[must_use]
    pub fn private_selection(&self, name: &str) -> Option<&PrivateSelection> {
        self.private_selections.get(name)
    }

    /// Label every filter with `label` and install them on the
    /// [`GROUP_SELECTION`] channel.
    pub fn add_group(&mut self, label: &str, filters: Vec<Filter>) {
        if filters.is_empty() {
            return;
        }
        let labelled = filters
            .into_iter()
            .map(|mut filter| {
                filter.group_label = Some(label.to_string());
                filter
            })
            .collect();
        self.add_private_selection(GROUP_SELECTION, PrivateSelection::Filters(labelled), None);
    }
}
