//! End-to-end behavior of the synchronizer against an in-memory data source.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::json;
use viewsync_core::datasource::DataSourceCall;
use viewsync_core::{
    DataSource, EngineConfig, EventKind, Filter, FilterKind, FilterPatch, MemoryStorage,
    MutationOptions, NamedFilterTable, Operator, PrivateSelection, Snapshot, StateEvent,
    StateSynchronizer,
};

const FILTERS: &str = "statefilter";
const SELECTIONS: &str = "stateSelectionFilter";

type Synchronizer = StateSynchronizer<NamedFilterTable>;

fn new_sync(config: EngineConfig, storage: &MemoryStorage) -> Synchronizer {
    StateSynchronizer::new(config, Box::new(storage.clone()))
}

fn ready(config: EngineConfig) -> (Synchronizer, MemoryStorage) {
    let storage = MemoryStorage::new();
    let mut sync = new_sync(config, &storage);
    sync.load_state(None);
    sync.attach_data_source(NamedFilterTable::new());
    (sync, storage)
}

fn record(sync: &mut Synchronizer, kind: EventKind) -> Rc<RefCell<Vec<StateEvent>>> {
    let log = Rc::new(RefCell::new(Vec::new()));
    let sink = Rc::clone(&log);
    sync.on(kind, move |event| sink.borrow_mut().push(event.clone()));
    log
}

fn channel(sync: &Synchronizer, name: &str) -> Option<usize> {
    sync.data_source()
        .and_then(|ds| ds.named_filter(name))
        .map(<[_]>::len)
}

#[test]
fn range_filters_on_same_hierarchy_merge_into_widened_range() {
    let (mut sync, _) = ready(EngineConfig::default());

    sync.add_filter(Filter::range("[Visit].[Day]", 0.0, 10.0), MutationOptions::merge(true));
    sync.add_filter(Filter::range("[Visit].[Day]", 5.0, 20.0), MutationOptions::merge(true));

    assert_eq!(sync.filters().len(), 1);
    let range = sync.filters()[0].range.expect("range kept");
    assert_eq!((range.min, range.max), (Some(0.0), Some(20.0)));
}

#[test]
fn merge_default_comes_from_config() {
    let mut config = EngineConfig::default();
    config.merge.filters = true;
    let (mut sync, _) = ready(config);

    sync.add_filter(Filter::with_id("a", "[H]", ["1"]), MutationOptions::default());
    sync.add_filter(Filter::with_id("b", "[H]", ["2"]), MutationOptions::default());
    assert_eq!(sync.filters().len(), 1);
    assert_eq!(sync.filters()[0].members, vec!["1", "2"]);

    sync.add_filter(Filter::with_id("c", "[H]", ["3"]), MutationOptions::merge(false));
    assert_eq!(sync.filters().len(), 2);
}

#[test]
fn removing_a_member_from_a_grid_filter_removes_the_filter() {
    let (mut sync, _) = ready(EngineConfig::default());
    let grid = Filter::with_id("g", "[Subject].[Race]", ["A", "B"]).with_kind(FilterKind::Grid);
    let simple = Filter::with_id("s", "[Subject].[Sex]", ["F", "M"]);
    sync.set_filters(vec![grid, simple], MutationOptions::default());
    let removed = record(&mut sync, EventKind::FilterRemove);

    sync.remove_filter("g", Some("A"));
    assert!(!sync.is_filter("g"));

    sync.remove_filter("s", Some("F"));
    assert_eq!(sync.filters()[0].members, vec!["M"]);

    sync.remove_filter("s", Some("M"));
    assert!(!sync.has_filters());
    assert_eq!(channel(&sync, FILTERS), None);

    let events = removed.borrow();
    assert_eq!(events.len(), 3);
    assert_eq!(events[2], StateEvent::FilterRemove { filters: Vec::new() });
}

#[test]
fn data_source_callback_registered_early_runs_once_on_attach() {
    let storage = MemoryStorage::new();
    let mut sync = new_sync(EngineConfig::default(), &storage);
    let calls = Rc::new(RefCell::new(0));

    let counter = Rc::clone(&calls);
    sync.on_data_source_ready(move |ds: &mut NamedFilterTable| {
        ds.set_named_filter("warmup", Vec::new());
        *counter.borrow_mut() += 1;
    });
    assert_eq!(*calls.borrow(), 0);
    assert!(!sync.is_data_source_ready());

    sync.attach_data_source(NamedFilterTable::new());
    sync.attach_data_source(NamedFilterTable::new());

    assert_eq!(*calls.borrow(), 1);
    assert!(sync.is_data_source_ready());
}

#[test]
fn projection_waits_for_both_gates() {
    let storage = MemoryStorage::new();
    let mut sync = new_sync(EngineConfig::default(), &storage);
    let changes = record(&mut sync, EventKind::FilterChange);

    sync.add_filter(Filter::with_id("a", "[H]", ["1"]), MutationOptions::default());
    assert!(sync.history().is_empty(), "snapshot waits for state");

    sync.attach_data_source(NamedFilterTable::new());
    assert!(changes.borrow().is_empty());
    assert_eq!(channel(&sync, FILTERS), None);

    sync.load_state(None);
    assert_eq!(sync.history().len(), 1);
    assert_eq!(channel(&sync, FILTERS), Some(1));
    assert!(!changes.borrow().is_empty());
}

#[test]
fn mutation_before_load_does_not_hide_persisted_session() {
    let storage = MemoryStorage::new();
    {
        let mut sync = new_sync(EngineConfig::default(), &storage);
        sync.load_state(None);
        sync.add_filter(Filter::with_id("A", "[H]", ["1"]), MutationOptions::default());
    }

    let mut sync = new_sync(EngineConfig::default(), &storage);
    sync.add_filter(Filter::with_id("B", "[H]", ["2"]), MutationOptions::default());
    assert_eq!(sync.history().len(), 1);

    sync.load_state(None);

    let ids: Vec<&str> = sync.filters().iter().map(|f| f.id.as_str()).collect();
    assert_eq!(ids, vec!["A"]);
    assert_eq!(sync.history().len(), 2);
    assert_eq!(sync.current_state().map(|s| s.filters[0].id.as_str()), Some("A"));
}

#[test]
fn attach_before_or_after_load_projects_the_same_state() {
    fn drive(attach_first: bool) -> NamedFilterTable {
        let storage = MemoryStorage::new();
        let mut sync = new_sync(EngineConfig::default(), &storage);
        if attach_first {
            sync.attach_data_source(NamedFilterTable::new());
        }
        sync.add_filter(Filter::with_id("a", "[H]", ["1"]), MutationOptions::default());
        sync.add_selection(Filter::with_id("s", "[S]", ["x"]), MutationOptions::default());
        sync.load_state(None);
        if !attach_first {
            sync.attach_data_source(NamedFilterTable::new());
        }
        sync.data_source().cloned().expect("attached")
    }

    assert_eq!(drive(true).channels(), drive(false).channels());
}

#[test]
fn load_state_restores_most_recent_snapshot_and_fires_stateready_once() {
    let storage = MemoryStorage::new();
    {
        let mut sync = new_sync(EngineConfig::default(), &storage);
        sync.load_state(None);
        sync.set_custom_state("learn", "dim", json!("Subject"));
        sync.add_filter(Filter::with_id("a", "[H]", ["1"]), MutationOptions::default());
        sync.add_selection(Filter::with_id("s", "[S]", ["x"]), MutationOptions::default());
    }

    let mut sync = new_sync(EngineConfig::default(), &storage);
    let ready = record(&mut sync, EventKind::StateReady);
    assert!(!sync.is_ready());

    sync.load_state(None);
    sync.load_state(Some(0));

    assert_eq!(ready.borrow().len(), 1);
    assert_eq!(sync.custom_state("learn", "dim"), Some(&json!("Subject")));
    assert_eq!(sync.stored_state("learn", "dim", json!(null)), json!("Subject"));
    assert_eq!(sync.stored_state("learn", "missing", json!(7)), json!(7));
    assert!(sync.is_filter("a"));
    assert_eq!(sync.history().len(), 2, "re-applying history does not append");
}

#[test]
fn partitioned_load_discards_foreign_snapshots() {
    let storage = MemoryStorage::new();
    for partition in ["home", "away", "home"] {
        let mut config = EngineConfig::default();
        config.session.partition = Some(partition.to_string());
        let mut sync = new_sync(config, &storage);
        sync.load_state(None);
        sync.add_filter(Filter::with_id(partition, "[H]", ["1"]), MutationOptions::default());
    }

    let mut config = EngineConfig::default();
    config.session.partition = Some("home".to_string());
    let sync = new_sync(config, &storage);

    assert!(sync.history().entries().iter().all(|s| s.in_partition("home")));
    assert!(!storage.raw("connectorStateProxy").unwrap_or_default().contains("away"));
}

#[test]
fn move_selection_to_filter_promotes_only_new_selections() {
    let (mut sync, _) = ready(EngineConfig::default());
    sync.add_filter(Filter::with_id("f", "[H]", ["1"]), MutationOptions::default());
    sync.add_selections(
        vec![
            Filter::with_id("s1", "[H]", ["1"]),
            Filter::with_id("s2", "[Other]", ["2"]),
        ],
        MutationOptions::default(),
    );
    let history_before = sync.history().len();

    sync.move_selection_to_filter();

    assert!(!sync.has_selections());
    assert_eq!(channel(&sync, SELECTIONS), None);
    let ids: Vec<&str> = sync.filters().iter().map(|f| f.id.as_str()).collect();
    assert_eq!(ids, vec!["f", "s2"]);
    assert_eq!(sync.history().len(), history_before + 1);
}

#[test]
fn promoting_a_disjoint_range_selection_adds_it_to_filters() {
    let (mut sync, _) = ready(EngineConfig::default());
    sync.add_filter(Filter::range("[Visit].[Day]", 0.0, 10.0), MutationOptions::default());
    sync.add_selection(Filter::range("[Visit].[Day]", 50.0, 60.0), MutationOptions::default());

    sync.move_selection_to_filter();

    let ranges: Vec<_> = sync
        .filters()
        .iter()
        .filter_map(|f| f.range)
        .map(|r| (r.min, r.max))
        .collect();
    assert_eq!(ranges, vec![(Some(0.0), Some(10.0)), (Some(50.0), Some(60.0))]);
    assert!(!sync.has_selections());
}

#[test]
fn set_filter_operator_prefers_selections_and_flags_operator_change() {
    let (mut sync, _) = ready(EngineConfig::default());
    sync.add_filter(Filter::with_id("x", "[H]", ["1"]), MutationOptions::default());
    sync.add_selection(Filter::with_id("x", "[H]", ["1"]), MutationOptions::default());
    let selection_changes = record(&mut sync, EventKind::SelectionChange);
    let filter_changes = record(&mut sync, EventKind::FilterChange);

    sync.set_filter_operator("x", Operator::Intersect);

    assert_eq!(sync.selections()[0].operator, Operator::Intersect);
    assert_eq!(sync.filters()[0].operator, Operator::Equals);
    assert!(filter_changes.borrow().is_empty());
    assert!(matches!(
        selection_changes.borrow()[0],
        StateEvent::SelectionChange { operator_changed: true, .. }
    ));
}

#[test]
fn update_filter_patches_only_given_fields() {
    let (mut sync, _) = ready(EngineConfig::default());
    sync.add_filter(Filter::with_id("a", "[H]", ["1"]), MutationOptions::default());

    sync.update_filter("a", &FilterPatch::members(["1", "2"]));
    sync.update_filter("missing", &FilterPatch::members(["z"]));
    sync.update_selection("missing", &FilterPatch::members(["z"]));

    assert_eq!(sync.filters()[0].members, vec!["1", "2"]);
    assert_eq!(sync.filters()[0].hierarchy_name, "[H]");
    let projected = sync.data_source().and_then(|ds| ds.named_filter(FILTERS)).expect("projected");
    assert_eq!(projected[0].members, vec!["1", "2"]);
}

#[test]
fn remove_selection_re_adds_remaining_with_merge() {
    let (mut sync, _) = ready(EngineConfig::default());
    sync.add_selections(
        vec![
            Filter::with_id("a", "[H]", ["1", "2"]),
            Filter::with_id("b", "[H]", ["3"]),
        ],
        MutationOptions::default(),
    );
    let removed = record(&mut sync, EventKind::SelectionRemove);

    sync.remove_selection("a", Some("1"));

    assert_eq!(sync.selections().len(), 1);
    assert_eq!(sync.selections()[0].members, vec!["2", "3"]);
    assert_eq!(removed.borrow().len(), 1);
}

#[test]
fn filter_without_arguments_is_not_projected() {
    let (mut sync, _) = ready(EngineConfig::default());
    let changes = record(&mut sync, EventKind::FilterChange);

    sync.add_filter(
        Filter::with_id("empty", "[H]", Vec::<String>::new()),
        MutationOptions::default(),
    );

    assert!(sync.is_filter("empty"));
    assert_eq!(channel(&sync, FILTERS), None);
    assert!(changes.borrow().is_empty());
}

#[test]
fn silent_member_update_emits_count_but_not_change() {
    let (mut sync, _) = ready(EngineConfig::default());
    sync.add_filter(Filter::with_id("a", "[H]", ["1"]), MutationOptions::default());
    let changes = record(&mut sync, EventKind::FilterChange);
    let counts = record(&mut sync, EventKind::FilterCount);
    let history_before = sync.history().len();

    sync.update_filter_members_complete(true);

    assert!(changes.borrow().is_empty());
    assert_eq!(counts.borrow().len(), 1);
    assert_eq!(sync.history().len(), history_before);
}

#[test]
fn clear_selections_on_empty_set_is_a_noop() {
    let (mut sync, _) = ready(EngineConfig::default());
    let history_before = sync.history().len();
    sync.clear_selections(MutationOptions::default());
    assert_eq!(sync.history().len(), history_before);

    sync.clear_filters(MutationOptions::default());
    assert_eq!(sync.history().len(), history_before + 1);
}

#[test]
fn prepend_and_flat_accessors() {
    let (mut sync, _) = ready(EngineConfig::default());
    sync.add_filter(Filter::with_id("b", "[B]", ["1"]), MutationOptions::default());
    sync.prepend_filter(Filter::with_id("a", "[A]", ["1"]), MutationOptions::skip_state());

    let flat = sync.filters_flat();
    assert_eq!(flat[0]["id"], "a");
    assert_eq!(flat[1]["hierarchyName"], "[B]");
    assert!(sync.selections_flat().is_empty());
    assert_eq!(sync.history().len(), 1);
}

#[test]
fn flat_view_keeps_one_entry_per_filter() {
    let (mut sync, _) = ready(EngineConfig::default());
    let mut open_ended = Filter::range("[Visit].[Day]", 0.0, 1.0);
    open_ended.range = Some(viewsync_core::FilterRange::new(f64::NAN, 1.0));
    sync.set_filters(
        vec![Filter::with_id("a", "[A]", ["1"]), open_ended],
        MutationOptions::skip_state(),
    );

    let flat = sync.filters_flat();

    assert_eq!(flat.len(), 2);
    assert_eq!(flat[1]["range"]["min"], serde_json::Value::Null);
    assert_eq!(flat[1]["range"]["max"], 1.0);
}

#[test]
fn private_selections_use_their_own_channels() {
    let mut config = EngineConfig::default();
    config.session.subject_name = Some("[Subject]".to_string());
    let storage = MemoryStorage::new();
    let mut sync = new_sync(config, &storage);
    let events = record(&mut sync, EventKind::PrivateSelectionChange);

    sync.add_private_selection("hover", PrivateSelection::MembersQuery("SELECT 1".into()), None);
    sync.add_group("Cohort A", vec![Filter::with_id("g", "[Subject].[Race]", ["A"])]);
    assert!(events.borrow().is_empty());

    sync.attach_data_source(NamedFilterTable::new());

    let ds = sync.data_source().expect("attached");
    let hover = ds.named_filter("hover").expect("hover installed");
    assert_eq!(hover[0].members_query.as_deref(), Some("SELECT 1"));
    assert_eq!(hover[0].hierarchy, "[Subject]");
    assert!(ds.named_filter("groupselection").is_some());
    match sync.private_selection("groupselection") {
        Some(PrivateSelection::Filters(filters)) => {
            assert_eq!(filters[0].group_label.as_deref(), Some("Cohort A"));
        }
        other => panic!("unexpected group selection: {other:?}"),
    }
    assert_eq!(events.borrow().len(), 2);

    sync.remove_private_selection("hover");
    assert!(sync.private_selection("hover").is_none());
    assert!(matches!(
        sync.data_source().expect("attached").calls().last(),
        Some(DataSourceCall::Clear { channel }) if channel == "hover"
    ));
}

fn first_filter_is(id: &'static str) -> impl FnMut(usize, &Snapshot) -> bool {
    move |_, snapshot| snapshot.filters[0].id == id
}

#[test]
fn find_state_scans_backwards() {
    let (mut sync, _) = ready(EngineConfig::default());
    for id in ["a", "b", "c"] {
        sync.set_filters(vec![Filter::with_id(id, "[H]", ["1"])], MutationOptions::default());
    }

    assert_eq!(sync.find_state(first_filter_is("a"), None), Some(0));
    assert_eq!(sync.find_state(first_filter_is("c"), Some(1)), None);
    assert_eq!(sync.previous_state_index(), Some(1));
    assert_eq!(sync.current_state().map(|s| s.filters[0].id.as_str()), Some("c"));

    sync.load_filters(0);
    assert!(sync.is_filter("a"));
    assert_eq!(sync.history().len(), 4);
}
