use tracing::{debug, warn};

use super::StateSynchronizer;
use crate::datasource::{Constraint, DataSource};
use crate::events::StateEvent;
use crate::model::filter::Filter;
use crate::readiness::{self, GateKind};

/// Which named channel a projection targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    Filters,
    Selections,
}

impl<D: DataSource + 'static> StateSynchronizer<D> {
    /// Snapshot (unless `skip_state`) once state is loaded, then project
    /// filters once ready.
    pub(super) fn request_filter_update(&mut self, skip_state: bool, operator_changed: bool, silent: bool) {
        if !skip_state {
            self.request_snapshot();
        }
        readiness::when_ready(
            self,
            Box::new(move |sync: &mut Self| {
                sync.project(Channel::Filters, operator_changed, silent);
            }),
        );
    }

    /// Snapshot (unless `skip_state`) once state is loaded, then project
    /// selections once ready.
    pub(super) fn request_selection_update(&mut self, skip_state: bool, operator_changed: bool) {
        if !skip_state {
            self.request_snapshot();
        }
        readiness::when_ready(
            self,
            Box::new(move |sync: &mut Self| {
                sync.project(Channel::Selections, operator_changed, false);
            }),
        );
    }

    /// Append a snapshot behind the state gate.
    ///
    /// Before the gate opens the newest history entry is still the one
    /// persisted by an earlier session, and `load_state` must restore it. The
    /// deferred snapshot captures whatever the sets hold when the gate opens.
    fn request_snapshot(&mut self) {
        readiness::submit(self, GateKind::State, Box::new(Self::update_state));
    }

    /// Install the current set on its channel and emit the change event.
    ///
    /// A set containing a filter with nothing to match on is not projected
    /// and no event is emitted.
    fn project(&mut self, channel: Channel, operator_changed: bool, silent: bool) {
        let (set, name) = match channel {
            Channel::Filters => (&self.filters, self.config.channels.filters.as_str()),
            Channel::Selections => (&self.selections, self.config.channels.selections.as_str()),
        };

        let constraints: Vec<Constraint> = set.iter().map(Constraint::from).collect();
        if let Some(empty) = set
            .iter()
            .zip(&constraints)
            .find_map(|(filter, c)| c.has_no_arguments().then_some(filter))
        {
            warn!(
                channel = name,
                id = %empty.id,
                hierarchy = %empty.hierarchy_name,
                "filter has no members or range; projection skipped"
            );
            return;
        }

        let Some(source) = self.data_source.as_mut() else {
            warn!(channel = name, "no data source attached; projection dropped");
            return;
        };

        if constraints.is_empty() {
            source.clear_named_filter(name);
        } else {
            debug!(channel = name, constraints = constraints.len(), "projecting");
            source.set_named_filter(name, constraints);
        }

        if silent {
            return;
        }

        let current: Vec<Filter> = set.clone();
        let event = match channel {
            Channel::Filters => StateEvent::FilterChange {
                filters: current,
                operator_changed,
            },
            Channel::Selections => StateEvent::SelectionChange {
                selections: current,
                operator_changed,
            },
        };
        self.emit(&event);
    }
}
