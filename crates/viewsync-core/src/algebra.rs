//! Set algebra over filters and selections.
//!
//! Everything here is a pure function of its inputs. [`can_merge`] is total:
//! incompatible filters are never an error, they are simply appended by
//! [`merge_set`].
//!
//! # Equality
//!
//! Two filters are equal (see [`filters_equal`]) when they share an id, or
//! when they constrain the same hierarchy with the same operator and the
//! same member set (order-insensitive). Identity is never compared.
//!
//! # Fan-out
//!
//! [`merge_set`] lets one incoming filter merge into *every* compatible
//! existing entry, not just the first. One incoming constraint may broaden
//! several partial filters on the same hierarchy.

use std::collections::HashSet;

use crate::model::filter::{Filter, FilterRange};

/// Join `other` into `self` in place.
pub trait Merge {
    fn merge(&mut self, other: &Self);
}

impl Merge for FilterRange {
    fn merge(&mut self, other: &Self) {
        self.widen(other);
    }
}

/// Member union plus range widening. The id, kind and labels of `self` win.
impl Merge for Filter {
    fn merge(&mut self, other: &Self) {
        merge_ranges(self, other);
        for member in &other.members {
            if !self.has_member(member) {
                self.members.push(member.clone());
            }
        }
    }
}

/// `true` iff combining `a` and `b` still describes one coherent constraint.
#[must_use]
pub fn can_merge(a: &Filter, b: &Filter) -> bool {
    !a.is_atomic()
        && !b.is_atomic()
        && a.hierarchy_name == b.hierarchy_name
        && a.operator == b.operator
        && a.range.is_some() == b.range.is_some()
}

/// Widen the range of `target` to enclose the range of `incoming`.
pub fn merge_ranges(target: &mut Filter, incoming: &Filter) {
    if let (Some(range), Some(other)) = (target.range.as_mut(), incoming.range.as_ref()) {
        range.merge(other);
    }
}

/// Return `a` with `b` merged into it.
#[must_use]
pub fn merge(a: &Filter, b: &Filter) -> Filter {
    let mut merged = a.clone();
    merged.merge(b);
    merged
}

/// Merge each incoming filter into the existing set.
///
/// Incoming filters are visited in order. Each one merges into every
/// compatible entry of the working set; if none accepted it, it is appended
/// and becomes a merge target for the incoming filters after it.
#[must_use]
pub fn merge_set(existing: Vec<Filter>, incoming: Vec<Filter>) -> Vec<Filter> {
    let mut filters = existing;

    for nf in incoming {
        let mut merged = false;
        for target in &mut filters {
            if can_merge(&nf, target) {
                target.merge(&nf);
                merged = true;
            }
        }

        if !merged {
            filters.push(nf);
        }
    }

    filters
}

/// Structural filter equality used for pruning and deduplication.
///
/// Range bounds count as members: two range filters on one hierarchy are
/// equal only when their bounds match.
#[must_use]
pub fn filters_equal(a: &Filter, b: &Filter) -> bool {
    if a.id == b.id {
        return true;
    }

    if a.hierarchy_name != b.hierarchy_name || a.operator != b.operator || a.range != b.range {
        return false;
    }

    let left: HashSet<&str> = a.members.iter().map(String::as_str).collect();
    let right: HashSet<&str> = b.members.iter().map(String::as_str).collect();
    left == right
}

/// Elements of `new_set` with no equal counterpart in `old_set`
/// (`new LEFT OUTER JOIN old`, keeping only the unmatched rows).
#[must_use]
pub fn prune_left_outer(new_set: &[Filter], old_set: &[Filter]) -> Vec<Filter> {
    new_set
        .iter()
        .filter(|candidate| !old_set.iter().any(|old| filters_equal(candidate, old)))
        .cloned()
        .collect()
}

/// Members left after removing `unique_name`.
///
/// Atomic filters are returned unchanged; callers must delete the whole
/// filter instead.
#[must_use]
pub fn remove_member(filter: &Filter, unique_name: &str) -> Vec<String> {
    if filter.is_atomic() {
        return filter.members.clone();
    }

    filter
        .members
        .iter()
        .filter(|member| member.as_str() != unique_name)
        .cloned()
        .collect()
}

/// Remove `filter_id` (or one of its members) from `set`.
///
/// - Atomic targets are dropped whole.
/// - With `unique_name`, a non-atomic target loses that member and is
///   dropped only if no members remain.
/// - Without `unique_name`, the target is dropped whole.
#[must_use]
pub fn remove_from_set(set: Vec<Filter>, filter_id: &str, unique_name: Option<&str>) -> Vec<Filter> {
    set.into_iter()
        .filter_map(|mut filter| {
            if filter.id != filter_id {
                return Some(filter);
            }
            if filter.is_atomic() {
                return None;
            }

            let member = unique_name?;
            let remaining = remove_member(&filter, member);
            if remaining.is_empty() {
                None
            } else {
                filter.members = remaining;
                Some(filter)
            }
        })
        .collect()
}

/// `true` when `set` contains a filter with `id`.
#[must_use]
pub fn contains_id(set: &[Filter], id: &str) -> bool {
    set.iter().any(|filter| filter.id == id)
}
