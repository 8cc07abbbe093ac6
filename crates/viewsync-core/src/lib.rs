//! viewsync-core library.
//!
//! Keeps a bounded, persisted history of view-state snapshots, merges filter
//! and selection sets, and projects them onto an external data source once
//! both the history and the data source are ready.
//!
//! # Conventions
//!
//! - **Errors**: library errors are `thiserror` enums carrying an [`error::ErrorCode`];
//!   configuration loading uses `anyhow::Result`.
//! - **Logging**: Use `tracing` macros (`info!`, `warn!`, `error!`, `debug!`, `trace!`).
//! - **Threading**: single-threaded and cooperative. Nothing here is `Send`.

pub mod algebra;
pub mod config;
pub mod datasource;
pub mod error;
pub mod events;
pub mod history;
pub mod lock;
pub mod model;
pub mod readiness;
pub mod sync;

pub use config::EngineConfig;
pub use datasource::{Constraint, DataSource, NamedFilterTable};
pub use events::{EventKind, StateEvent};
pub use history::{FileStorage, HistoryStore, MemoryStorage, StateStorage, StorageError};
pub use model::filter::{Filter, FilterKind, FilterPatch, FilterRange, Operator};
pub use model::snapshot::Snapshot;
pub use sync::{MutationOptions, PrivateSelection, StateSynchronizer};
