//! Snapshot history: storage backends and the bounded store on top of them.

pub mod storage;
pub mod store;

pub use storage::{FileStorage, MemoryStorage, StateStorage, StorageError};
pub use store::HistoryStore;
