//! Callback ordering across the state and data-source gates.

use std::cell::RefCell;
use std::rc::Rc;

use viewsync_core::{EngineConfig, EventKind, MemoryStorage, NamedFilterTable, StateSynchronizer};

type Log = Rc<RefCell<Vec<&'static str>>>;

fn fresh() -> (StateSynchronizer<NamedFilterTable>, Log) {
    let sync = StateSynchronizer::new(EngineConfig::default(), Box::new(MemoryStorage::new()));
    (sync, Rc::new(RefCell::new(Vec::new())))
}

fn note(log: &Log, label: &'static str) -> impl FnOnce(&mut NamedFilterTable) + 'static {
    let log = Rc::clone(log);
    move |_: &mut NamedFilterTable| log.borrow_mut().push(label)
}

#[test]
fn data_source_callbacks_fire_in_registration_order_once_each() {
    let (mut sync, log) = fresh();
    sync.on_data_source_ready(note(&log, "c1"));
    sync.on_data_source_ready(note(&log, "c2"));

    sync.attach_data_source(NamedFilterTable::new());
    sync.on_data_source_ready(note(&log, "c3"));
    sync.attach_data_source(NamedFilterTable::new());

    assert_eq!(*log.borrow(), vec!["c1", "c2", "c3"]);
}

#[test]
fn ready_callbacks_run_before_stateready_listeners() {
    let (mut sync, log) = fresh();
    let listener_log = Rc::clone(&log);
    sync.on(EventKind::StateReady, move |_| listener_log.borrow_mut().push("event"));
    let early = Rc::clone(&log);
    sync.on_ready(move |_| early.borrow_mut().push("early"));

    sync.load_state(None);
    let late = Rc::clone(&log);
    sync.on_ready(move |_| late.borrow_mut().push("late"));

    assert_eq!(*log.borrow(), vec!["early", "event", "late"]);
}

#[test]
fn callback_registered_inside_a_flush_keeps_fifo_order() {
    let (mut sync, log) = fresh();
    let outer = Rc::clone(&log);
    sync.on_ready(move |sync| {
        outer.borrow_mut().push("first");
        let inner = Rc::clone(&outer);
        sync.on_ready(move |_| inner.borrow_mut().push("nested"));
    });
    let second = Rc::clone(&log);
    sync.on_ready(move |_| second.borrow_mut().push("second"));

    sync.load_state(None);

    assert_eq!(*log.borrow(), vec!["first", "second", "nested"]);
}

#[test]
fn held_state_fires_ready_only_after_release() {
    let (mut sync, log) = fresh();
    let ready = Rc::clone(&log);
    sync.on(EventKind::StateReady, move |_| ready.borrow_mut().push("ready"));

    assert!(sync.hold_ready("columns"));
    sync.load_state(None);
    assert!(!sync.is_ready());
    assert!(log.borrow().is_empty());

    assert!(sync.release_ready("columns"));
    assert!(sync.is_ready());
    assert!(!sync.release_ready("columns"));
    assert_eq!(*log.borrow(), vec!["ready"]);
}
