//! Deterministic simulation harness for viewsync.
//!
//! Each seed generates a schedule of mutations interleaved with state
//! loading, data-source attachment, readiness holds, gated callbacks and
//! injected storage faults. The schedule runs twice, once as generated and
//! once with the data source attached first; [`oracle::SessionOracle`]
//! checks history bounds, persistence, projection, callback ordering and
//! that the attach point does not change the outcome.

pub mod campaign;
pub mod oracle;
pub mod rng;
pub mod schedule;
pub mod simulator;

pub use simulator::{RunOutcome, SimulationConfig, SimulationResult, Simulator, TraceEvent};
