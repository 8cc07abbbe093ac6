//! One-way readiness gates with FIFO callback queues.
//!
//! A [`Gate`] starts closed. Callbacks submitted while it is closed are
//! queued; once it opens, later callbacks run immediately. Opening drains the
//! queue front to back *before* flipping the flag, so a callback submitted by
//! another callback during the drain is queued behind the ones already
//! waiting and still runs exactly once, in order.
//!
//! Callbacks receive `&mut T`, the owner of the coordinator. The owner
//! exposes its coordinator through [`Gated`]; [`submit`] and [`open_gate`]
//! borrow the coordinator only long enough to move a callback in or out, so
//! callbacks are free to mutate the owner, including its gates.

use std::collections::{BTreeSet, VecDeque};

use tracing::trace;

/// Deferred work run against the gate owner.
pub type Callback<T> = Box<dyn FnOnce(&mut T)>;

/// Which of the two readiness signals a callback waits on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateKind {
    /// History loaded and the most recent snapshot applied.
    State,
    /// External data source attached.
    DataSource,
}

pub struct Gate<T> {
    open: bool,
    queue: VecDeque<Callback<T>>,
}

impl<T> Default for Gate<T> {
    fn default() -> Self {
        Self {
            open: false,
            queue: VecDeque::new(),
        }
    }
}

impl<T> std::fmt::Debug for Gate<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gate")
            .field("open", &self.open)
            .field("pending", &self.queue.len())
            .finish()
    }
}

impl<T> Gate<T> {
    #[must_use]
    pub const fn is_open(&self) -> bool {
        self.open
    }

    #[must_use]
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Queue `callback`, or hand it back for immediate execution when open.
    pub fn submit(&mut self, callback: Callback<T>) -> Option<Callback<T>> {
        if self.open {
            Some(callback)
        } else {
            self.queue.push_back(callback);
            None
        }
    }

    pub fn pop_pending(&mut self) -> Option<Callback<T>> {
        self.queue.pop_front()
    }

    pub const fn mark_open(&mut self) {
        self.open = true;
    }
}

/// The two readiness gates plus the state-ready bookkeeping.
///
/// The state gate opens only once loading has finished *and* every
/// blocker registered through [`hold`](Self::hold) was released.
pub struct ReadinessCoordinator<T> {
    state: Gate<T>,
    data_source: Gate<T>,
    loaded: bool,
    blockers: BTreeSet<String>,
}

impl<T> Default for ReadinessCoordinator<T> {
    fn default() -> Self {
        Self {
            state: Gate::default(),
            data_source: Gate::default(),
            loaded: false,
            blockers: BTreeSet::new(),
        }
    }
}

impl<T> std::fmt::Debug for ReadinessCoordinator<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReadinessCoordinator")
            .field("state", &self.state)
            .field("data_source", &self.data_source)
            .field("loaded", &self.loaded)
            .field("blockers", &self.blockers)
            .finish()
    }
}

impl<T> ReadinessCoordinator<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub const fn gate_mut(&mut self, kind: GateKind) -> &mut Gate<T> {
        match kind {
            GateKind::State => &mut self.state,
            GateKind::DataSource => &mut self.data_source,
        }
    }

    #[must_use]
    pub const fn gate(&self, kind: GateKind) -> &Gate<T> {
        match kind {
            GateKind::State => &self.state,
            GateKind::DataSource => &self.data_source,
        }
    }

    #[must_use]
    pub const fn is_state_ready(&self) -> bool {
        self.state.is_open()
    }

    #[must_use]
    pub const fn is_data_source_ready(&self) -> bool {
        self.data_source.is_open()
    }

    #[must_use]
    pub const fn is_fully_ready(&self) -> bool {
        self.state.is_open() && self.data_source.is_open()
    }

    pub const fn mark_loaded(&mut self) {
        self.loaded = true;
    }

    /// Keep the state gate closed until `token` is released. Returns `false`
    /// if the gate already opened or the token is already held.
    pub fn hold(&mut self, token: impl Into<String>) -> bool {
        if self.state.is_open() {
            return false;
        }
        self.blockers.insert(token.into())
    }

    /// Returns `true` if `token` was held.
    pub fn release(&mut self, token: &str) -> bool {
        self.blockers.remove(token)
    }

    #[must_use]
    pub fn blockers(&self) -> impl Iterator<Item = &str> {
        self.blockers.iter().map(String::as_str)
    }

    /// `true` when the state gate is closed but nothing keeps it closed.
    #[must_use]
    pub fn can_open_state(&self) -> bool {
        self.loaded && self.blockers.is_empty() && !self.state.is_open()
    }
}

/// Owner of a [`ReadinessCoordinator`] whose callbacks run against it.
pub trait Gated: Sized {
    fn readiness(&mut self) -> &mut ReadinessCoordinator<Self>;
}

/// Run `callback` now if the gate is open, else queue it.
pub fn submit<T: Gated>(target: &mut T, kind: GateKind, callback: Callback<T>) {
    if let Some(now) = target.readiness().gate_mut(kind).submit(callback) {
        now(target);
    }
}

/// Queue `callback` behind the state gate, then behind the data-source gate.
pub fn when_ready<T: Gated + 'static>(target: &mut T, callback: Callback<T>) {
    submit(
        target,
        GateKind::State,
        Box::new(move |inner: &mut T| submit(inner, GateKind::DataSource, callback)),
    );
}

/// Drain the gate's queue FIFO, then open it. Returns the number of queued
/// callbacks that ran. Opening an open gate is a no-op.
pub fn open_gate<T: Gated>(target: &mut T, kind: GateKind) -> usize {
    if target.readiness().gate(kind).is_open() {
        return 0;
    }

    let mut ran = 0;
    while let Some(callback) = target.readiness().gate_mut(kind).pop_pending() {
        callback(target);
        ran += 1;
    }
    target.readiness().gate_mut(kind).mark_open();
    trace!(?kind, ran, "gate opened");
    ran
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recorder {
        readiness: ReadinessCoordinator<Self>,
        log: Vec<&'static str>,
    }

    impl Gated for Recorder {
        fn readiness(&mut self) -> &mut ReadinessCoordinator<Self> {
            &mut self.readiness
        }
    }

    fn push(label: &'static str) -> Callback<Recorder> {
        Box::new(move |r: &mut Recorder| r.log.push(label))
    }

    #[test]
    fn queued_callbacks_run_fifo_then_later_ones_run_immediately() {
        let mut r = Recorder::default();
        submit(&mut r, GateKind::DataSource, push("c1"));
        submit(&mut r, GateKind::DataSource, push("c2"));
        assert!(r.log.is_empty());

        assert_eq!(open_gate(&mut r, GateKind::DataSource), 2);
        submit(&mut r, GateKind::DataSource, push("c3"));

        assert_eq!(r.log, vec!["c1", "c2", "c3"]);
        assert_eq!(open_gate(&mut r, GateKind::DataSource), 0);
        assert_eq!(r.log.len(), 3);
    }

    #[test]
    fn callback_submitted_during_drain_runs_after_earlier_queue() {
        let mut r = Recorder::default();
        submit(
            &mut r,
            GateKind::State,
            Box::new(|r: &mut Recorder| {
                r.log.push("first");
                submit(r, GateKind::State, push("nested"));
            }),
        );
        submit(&mut r, GateKind::State, push("second"));

        open_gate(&mut r, GateKind::State);

        assert_eq!(r.log, vec!["first", "second", "nested"]);
    }

    #[test]
    fn when_ready_waits_for_both_gates_in_either_order() {
        let mut a = Recorder::default();
        when_ready(&mut a, push("x"));
        open_gate(&mut a, GateKind::DataSource);
        assert!(a.log.is_empty());
        open_gate(&mut a, GateKind::State);
        assert_eq!(a.log, vec!["x"]);

        let mut b = Recorder::default();
        when_ready(&mut b, push("y"));
        open_gate(&mut b, GateKind::State);
        assert!(b.log.is_empty());
        open_gate(&mut b, GateKind::DataSource);
        assert_eq!(b.log, vec!["y"]);
    }

    #[test]
    fn blockers_hold_the_state_gate() {
        let mut c: ReadinessCoordinator<Recorder> = ReadinessCoordinator::new();
        assert!(!c.can_open_state());
        assert!(c.hold("column-service"));
        assert!(!c.hold("column-service"));
        c.mark_loaded();
        assert!(!c.can_open_state());
        assert!(c.release("column-service"));
        assert!(!c.release("column-service"));
        assert!(c.can_open_state());

        c.gate_mut(GateKind::State).mark_open();
        assert!(!c.can_open_state());
        assert!(!c.hold("late"));
    }
}
