//! Typed change events and the listener registry.

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;

use crate::datasource::Constraint;
use crate::model::filter::Filter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    StateReady,
    FilterChange,
    SelectionChange,
    FilterRemove,
    SelectionRemove,
    FilterCount,
    PrivateSelectionChange,
}

impl EventKind {
    pub const ALL: [Self; 7] = [
        Self::StateReady,
        Self::FilterChange,
        Self::SelectionChange,
        Self::FilterRemove,
        Self::SelectionRemove,
        Self::FilterCount,
        Self::PrivateSelectionChange,
    ];

    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::StateReady => "stateready",
            Self::FilterChange => "filterchange",
            Self::SelectionChange => "selectionchange",
            Self::FilterRemove => "filterremove",
            Self::SelectionRemove => "selectionremove",
            Self::FilterCount => "filtercount",
            Self::PrivateSelectionChange => "privateselectionchange",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// An event and its payload. Payloads are snapshots of the set at emit time.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "lowercase")]
pub enum StateEvent {
    StateReady,
    FilterChange {
        filters: Vec<Filter>,
        operator_changed: bool,
    },
    SelectionChange {
        selections: Vec<Filter>,
        operator_changed: bool,
    },
    FilterRemove {
        filters: Vec<Filter>,
    },
    SelectionRemove {
        selections: Vec<Filter>,
    },
    FilterCount {
        filters: Vec<Filter>,
    },
    PrivateSelectionChange {
        name: String,
        constraints: Vec<Constraint>,
    },
}

impl StateEvent {
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::StateReady => EventKind::StateReady,
            Self::FilterChange { .. } => EventKind::FilterChange,
            Self::SelectionChange { .. } => EventKind::SelectionChange,
            Self::FilterRemove { .. } => EventKind::FilterRemove,
            Self::SelectionRemove { .. } => EventKind::SelectionRemove,
            Self::FilterCount { .. } => EventKind::FilterCount,
            Self::PrivateSelectionChange { .. } => EventKind::PrivateSelectionChange,
        }
    }
}

/// Handle returned by [`Listeners::on`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ListenerId(u64);

type Listener = Box<dyn FnMut(&StateEvent)>;

/// Listener registry keyed by event kind. Listeners for one kind run in
/// subscription order.
#[derive(Default)]
pub struct Listeners {
    next_id: u64,
    by_kind: BTreeMap<EventKind, Vec<(ListenerId, Listener)>>,
}

impl fmt::Debug for Listeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let counts: BTreeMap<&str, usize> = self
            .by_kind
            .iter()
            .map(|(kind, list)| (kind.name(), list.len()))
            .collect();
        f.debug_struct("Listeners").field("counts", &counts).finish()
    }
}

impl Listeners {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn on(&mut self, kind: EventKind, listener: impl FnMut(&StateEvent) + 'static) -> ListenerId {
        self.next_id += 1;
        let id = ListenerId(self.next_id);
        self.by_kind
            .entry(kind)
            .or_default()
            .push((id, Box::new(listener)));
        id
    }

    /// Returns `true` if `id` was subscribed.
    pub fn off(&mut self, id: ListenerId) -> bool {
        for list in self.by_kind.values_mut() {
            if let Some(pos) = list.iter().position(|(lid, _)| *lid == id) {
                list.remove(pos);
                return true;
            }
        }
        false
    }

    pub fn emit(&mut self, event: &StateEvent) {
        if let Some(list) = self.by_kind.get_mut(&event.kind()) {
            for (_, listener) in list.iter_mut() {
                listener(event);
            }
        }
    }

    #[must_use]
    pub fn count(&self, kind: EventKind) -> usize {
        self.by_kind.get(&kind).map_or(0, Vec::len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[test]
    fn names_match_wire_event_names() {
        let names: Vec<&str> = EventKind::ALL.iter().map(|k| k.name()).collect();
        assert_eq!(
            names,
            vec![
                "stateready",
                "filterchange",
                "selectionchange",
                "filterremove",
                "selectionremove",
                "filtercount",
                "privateselectionchange",
            ]
        );
    }

    #[test]
    fn emit_reaches_only_matching_listeners_in_order() {
        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut listeners = Listeners::new();

        let a = Rc::clone(&seen);
        listeners.on(EventKind::FilterChange, move |_| a.borrow_mut().push("a"));
        let b = Rc::clone(&seen);
        listeners.on(EventKind::FilterChange, move |_| b.borrow_mut().push("b"));
        let c = Rc::clone(&seen);
        listeners.on(EventKind::SelectionChange, move |_| c.borrow_mut().push("c"));

        listeners.emit(&StateEvent::FilterChange {
            filters: Vec::new(),
            operator_changed: false,
        });

        assert_eq!(*seen.borrow(), vec!["a", "b"]);
    }

    #[test]
    fn off_unsubscribes() {
        let hits = Rc::new(RefCell::new(0));
        let mut listeners = Listeners::new();
        let h = Rc::clone(&hits);
        let id = listeners.on(EventKind::StateReady, move |_| *h.borrow_mut() += 1);

        listeners.emit(&StateEvent::StateReady);
        assert!(listeners.off(id));
        assert!(!listeners.off(id));
        listeners.emit(&StateEvent::StateReady);

        assert_eq!(*hits.borrow(), 1);
        assert_eq!(listeners.count(EventKind::StateReady), 0);
    }
}
