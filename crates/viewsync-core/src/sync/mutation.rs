use serde_json::Value;
use tracing::{debug, warn};

use super::StateSynchronizer;
use crate::algebra;
use crate::datasource::DataSource;
use crate::events::StateEvent;
use crate::model::filter::{Filter, FilterPatch, Operator};

/// Per-call knobs for filter and selection mutations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MutationOptions {
    /// Do not append a snapshot for this change.
    pub skip_state: bool,
    /// Override the configured merge default for this call.
    pub merge: Option<bool>,
    /// Empty the target set before adding (selections only).
    pub clear: bool,
}

impl MutationOptions {
    #[must_use]
    pub const fn skip_state() -> Self {
        Self {
            skip_state: true,
            merge: None,
            clear: false,
        }
    }

    #[must_use]
    pub const fn merge(merge: bool) -> Self {
        Self {
            skip_state: false,
            merge: Some(merge),
            clear: false,
        }
    }

    #[must_use]
    pub const fn with_clear(mut self) -> Self {
        self.clear = true;
        self
    }

    #[must_use]
    pub const fn with_skip_state(mut self) -> Self {
        self.skip_state = true;
        self
    }
}

impl<D: DataSource + 'static> StateSynchronizer<D> {
    // ------------------------------------------------------------------
    // Filters
    // ------------------------------------------------------------------

    pub fn add_filter(&mut self, filter: Filter, options: MutationOptions) {
        self.add_filters(vec![filter], options);
    }

    /// Merge or append `filters` into the current set.
    pub fn add_filters(&mut self, filters: Vec<Filter>, options: MutationOptions) {
        let use_merge = options.merge.unwrap_or(self.config.merge.filters);
        let current = std::mem::take(&mut self.filters);

        self.filters = if use_merge {
            algebra::merge_set(current, filters)
        } else {
            let mut appended = current;
            appended.extend(filters);
            appended
        };

        debug!(filters = self.filters.len(), merged = use_merge, "filters added");
        self.request_filter_update(options.skip_state, false, false);
    }

    /// Put `filter` in front of the current set.
    pub fn prepend_filter(&mut self, filter: Filter, options: MutationOptions) {
        let mut filters = Vec::with_capacity(self.filters.len() + 1);
        filters.push(filter);
        filters.extend(self.filters.iter().cloned());
        self.set_filters(filters, options);
    }

    pub fn set_filters(&mut self, filters: Vec<Filter>, options: MutationOptions) {
        self.filters = filters;
        self.request_filter_update(options.skip_state, false, false);
    }

    pub fn clear_filters(&mut self, options: MutationOptions) {
        self.filters.clear();
        self.request_filter_update(options.skip_state, false, false);
    }

    /// Remove a filter, or just `unique_name` from it.
    ///
    /// Grid and plot filters, and filters left without members, are removed
    /// whole. Emits `filterremove` immediately with the remaining set.
    pub fn remove_filter(&mut self, filter_id: &str, unique_name: Option<&str>) {
        let remaining = algebra::remove_from_set(self.filters.clone(), filter_id, unique_name);

        if remaining.is_empty() {
            self.clear_filters(MutationOptions::default());
        } else {
            self.set_filters(remaining, MutationOptions::default());
        }

        let event = StateEvent::FilterRemove {
            filters: self.filters.clone(),
        };
        self.emit(&event);
    }

    /// Overwrite the given fields of filter `id`. Unknown ids are ignored.
    pub fn update_filter(&mut self, id: &str, patch: &FilterPatch) {
        let Some(filter) = self.filters.iter_mut().find(|f| f.id == id) else {
            debug!(id, "update_filter: no such filter");
            return;
        };
        filter.apply_patch(patch);
        self.request_filter_update(false, false, false);
    }

    /// Change the operator of a selection or, failing that, a filter.
    /// Selections are searched first.
    pub fn set_filter_operator(&mut self, id: &str, operator: Operator) {
        if let Some(selection) = self.selections.iter_mut().find(|s| s.id == id) {
            selection.operator = operator;
            self.request_selection_update(false, true);
            return;
        }

        if let Some(filter) = self.filters.iter_mut().find(|f| f.id == id) {
            filter.operator = operator;
            self.request_filter_update(false, true, false);
            return;
        }

        debug!(id, %operator, "set_filter_operator: no such filter or selection");
    }

    /// Re-project filters without `filterchange`, then emit `filtercount`.
    pub fn update_filter_members_complete(&mut self, skip_state: bool) {
        self.request_filter_update(skip_state, false, true);
        let event = StateEvent::FilterCount {
            filters: self.filters.clone(),
        };
        self.emit(&event);
    }

    #[must_use]
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Filters as plain JSON objects, detached from the live set.
    #[must_use]
    pub fn filters_flat(&self) -> Vec<Value> {
        flatten(&self.filters)
    }

    #[must_use]
    pub fn has_filters(&self) -> bool {
        !self.filters.is_empty()
    }

    #[must_use]
    pub fn is_filter(&self, id: &str) -> bool {
        algebra::contains_id(&self.filters, id)
    }

    // ------------------------------------------------------------------
    // Selections
    // ------------------------------------------------------------------

    pub fn add_selection(&mut self, selection: Filter, options: MutationOptions) {
        self.add_selections(vec![selection], options);
    }

    /// Merge or append `selections`, optionally clearing the set first.
    pub fn add_selections(&mut self, selections: Vec<Filter>, options: MutationOptions) {
        if options.clear {
            self.selections.clear();
        }

        let use_merge = options.merge.unwrap_or(self.config.merge.selections);
        let current = std::mem::take(&mut self.selections);

        self.selections = if use_merge {
            algebra::merge_set(current, selections)
        } else {
            let mut appended = current;
            appended.extend(selections);
            appended
        };

        debug!(selections = self.selections.len(), merged = use_merge, "selections added");
        self.request_selection_update(options.skip_state, false);
    }

    /// Replace the selection set.
    pub fn set_selections(&mut self, selections: Vec<Filter>, options: MutationOptions) {
        self.selections = selections;
        self.request_selection_update(options.skip_state, false);
    }

    /// Empty the selection set. A no-op when it is already empty.
    pub fn clear_selections(&mut self, options: MutationOptions) {
        if self.selections.is_empty() {
            return;
        }
        self.selections.clear();
        self.request_selection_update(options.skip_state, false);
    }

    /// Remove a selection, or just `unique_name` from it. Emits
    /// `selectionremove` immediately with the remaining set.
    pub fn remove_selection(&mut self, selection_id: &str, unique_name: Option<&str>) {
        let remaining =
            algebra::remove_from_set(self.selections.clone(), selection_id, unique_name);

        if remaining.is_empty() {
            self.clear_selections(MutationOptions::default());
        } else {
            self.add_selections(remaining, MutationOptions::merge(true).with_clear());
        }

        let event = StateEvent::SelectionRemove {
            selections: self.selections.clone(),
        };
        self.emit(&event);
    }

    pub fn update_selection(&mut self, id: &str, patch: &FilterPatch) {
        let Some(selection) = self.selections.iter_mut().find(|s| s.id == id) else {
            debug!(id, "update_selection: no such selection");
            return;
        };
        selection.apply_patch(patch);
        self.request_selection_update(false, false);
    }

    #[must_use]
    pub fn selections(&self) -> &[Filter] {
        &self.selections
    }

    #[must_use]
    pub fn selections_flat(&self) -> Vec<Value> {
        flatten(&self.selections)
    }

    #[must_use]
    pub fn has_selections(&self) -> bool {
        !self.selections.is_empty()
    }

    #[must_use]
    pub fn is_selection(&self, id: &str) -> bool {
        algebra::contains_id(&self.selections, id)
    }

    /// Promote selections to filters.
    ///
    /// Selections are cleared without a snapshot; those with no equal
    /// counterpart among the filters are then added to them under the
    /// configured merge default.
    pub fn move_selection_to_filter(&mut self) {
        let selections = self.selections.clone();
        self.clear_selections(MutationOptions::skip_state());
        let promoted = algebra::prune_left_outer(&selections, &self.filters);
        debug!(promoted = promoted.len(), "moving selections to filters");
        self.add_filters(promoted, MutationOptions::default());
    }
}

fn flatten(set: &[Filter]) -> Vec<Value> {
    set.iter()
        .filter_map(|filter| match serde_json::to_value(filter) {
            Ok(value) => Some(value),
            Err(err) => {
                warn!(id = %filter.id, error = %err, "filter dropped from flat view");
                None
            }
        })
        .collect()
}
