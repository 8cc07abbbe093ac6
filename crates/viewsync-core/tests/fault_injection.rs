//! Storage failure paths seen through the synchronizer.
//!
//! - quota failure once, then success: trimmed history with the new snapshot
//! - persistent quota failure: mutation still applied, error reported
//! - corrupt persisted payload: synchronizer starts from a blank state
//! - file storage with a byte ceiling behaves like a quota-limited store

use tempfile::TempDir;
use viewsync_core::config::EngineConfig;
use viewsync_core::history::storage::InjectedFault;
use viewsync_core::{
    FileStorage, Filter, HistoryStore, MemoryStorage, MutationOptions, NamedFilterTable,
    StateSynchronizer,
};

fn config(limit: usize) -> EngineConfig {
    let mut config = EngineConfig::default();
    config.history.limit = limit;
    config
}

fn ready_sync(storage: &MemoryStorage, limit: usize) -> StateSynchronizer<NamedFilterTable> {
    let mut sync = StateSynchronizer::new(config(limit), Box::new(storage.clone()));
    sync.load_state(None);
    sync.attach_data_source(NamedFilterTable::new());
    sync
}

fn history_ids(history: &HistoryStore) -> Vec<String> {
    history
        .entries()
        .iter()
        .map(|s| s.filters.last().map(|f| f.id.clone()).unwrap_or_default())
        .collect()
}

#[test]
fn seven_adds_with_limit_five_keep_latest_five() {
    let storage = MemoryStorage::new();
    let mut sync = ready_sync(&storage, 5);

    for i in 0..7 {
        sync.add_filter(
            Filter::with_id(format!("f{i}"), format!("[H{i}]"), ["m"]),
            MutationOptions::default(),
        );
    }

    assert_eq!(sync.history().len(), 5);
    assert_eq!(history_ids(sync.history()), vec!["f2", "f3", "f4", "f5", "f6"]);
    assert!(sync.last_storage_error().is_none());

    let reloaded: StateSynchronizer<NamedFilterTable> =
        StateSynchronizer::new(config(5), Box::new(storage));
    assert_eq!(reloaded.history().len(), 5);
}

#[test]
fn quota_failure_once_recovers_with_new_snapshot_present() {
    let storage = MemoryStorage::new();
    let mut sync = ready_sync(&storage, 3);
    for i in 0..3 {
        sync.add_filter(
            Filter::with_id(format!("f{i}"), format!("[H{i}]"), ["m"]),
            MutationOptions::default(),
        );
    }
    let writes_before = storage.write_attempts();

    storage.inject(InjectedFault::Quota);
    sync.add_filter(Filter::with_id("new", "[New]", ["m"]), MutationOptions::default());

    assert_eq!(storage.write_attempts() - writes_before, 2);
    assert_eq!(history_ids(sync.history()), vec!["f1", "f2", "new"]);
    assert!(sync.last_storage_error().is_none());
    assert!(storage.raw("connectorStateProxy").is_some_and(|raw| raw.contains("\"new\"")));
}

#[test]
fn persistent_quota_failure_is_reported_not_thrown() {
    let storage = MemoryStorage::new();
    let mut sync = ready_sync(&storage, 5);
    for _ in 0..4 {
        storage.inject(InjectedFault::Quota);
    }

    sync.add_filter(Filter::with_id("a", "[A]", ["1"]), MutationOptions::default());

    assert!(sync.is_filter("a"));
    assert_eq!(sync.history().len(), 1);
    let err = sync.last_storage_error().expect("error recorded");
    assert!(err.is_quota_exceeded());

    sync.add_filter(Filter::with_id("b", "[B]", ["1"]), MutationOptions::default());
    assert!(sync.last_storage_error().is_some());

    sync.add_filter(Filter::with_id("c", "[C]", ["1"]), MutationOptions::default());
    assert!(sync.last_storage_error().is_none());
}

#[test]
fn byte_quota_never_blocks_mutations() {
    let one_entry = {
        let storage = MemoryStorage::new();
        let mut sync = ready_sync(&storage, 5);
        sync.add_filter(Filter::with_id("p", "[P]", ["1"]), MutationOptions::default());
        storage.raw("connectorStateProxy").map_or(0, |raw| raw.len())
    };

    let storage = MemoryStorage::with_quota(one_entry * 2);
    let mut sync = ready_sync(&storage, 5);
    for i in 0..6 {
        sync.set_filters(
            vec![Filter::with_id(format!("f{i}"), "[P]", ["1"])],
            MutationOptions::default(),
        );
    }

    assert!(sync.history().len() <= 5);
    assert_eq!(sync.filters()[0].id, "f5");
}

#[test]
fn corrupt_payload_starts_blank_and_recovers_on_next_write() {
    let storage = MemoryStorage::new();
    storage.put_raw("connectorStateProxy", "[{\"filters\": 12");

    let mut sync = ready_sync(&storage, 5);
    assert!(sync.filters().is_empty());
    assert!(sync.is_ready());

    sync.add_filter(Filter::with_id("a", "[A]", ["1"]), MutationOptions::default());
    let reloaded: StateSynchronizer<NamedFilterTable> =
        StateSynchronizer::new(config(5), Box::new(storage));
    assert_eq!(reloaded.history().len(), 1);
}

#[test]
fn file_storage_persists_across_instances() {
    let dir = TempDir::new().expect("create temp dir");

    {
        let mut sync: StateSynchronizer<NamedFilterTable> =
            StateSynchronizer::new(config(5), Box::new(FileStorage::new(dir.path())));
        sync.load_state(None);
        sync.add_filter(Filter::with_id("a", "[A]", ["1"]), MutationOptions::default());
        sync.add_selection(Filter::with_id("s", "[S]", ["x"]), MutationOptions::default());
    }

    let mut sync: StateSynchronizer<NamedFilterTable> =
        StateSynchronizer::new(config(5), Box::new(FileStorage::new(dir.path())));
    sync.load_state(None);

    assert!(sync.is_filter("a"));
    assert!(sync.is_selection("s"));
    assert_eq!(sync.history().len(), 2);
}

#[test]
fn file_storage_byte_ceiling_maps_to_quota() {
    let dir = TempDir::new().expect("create temp dir");
    let storage = FileStorage::new(dir.path()).with_max_bytes(16);
    let mut sync: StateSynchronizer<NamedFilterTable> =
        StateSynchronizer::new(config(5), Box::new(storage));
    sync.load_state(None);

    sync.add_filter(Filter::with_id("a", "[A]", ["1"]), MutationOptions::default());

    assert!(sync.is_filter("a"));
    let err = sync.last_storage_error().expect("ceiling enforced");
    assert!(err.is_quota_exceeded());
}
