//! Campaign runner: executes many seeds, collects pass/fail results and
//! names the first failing seed for replay.

use std::ops::Range;

use anyhow::{Result, bail};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::oracle::{InvariantViolation, OracleResult, SessionOracle};
use crate::{SimulationConfig, SimulationResult, Simulator};

/// Campaign-level parameters applied to every seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignConfig {
    pub seed_range: Range<u64>,
    /// Mutation steps per seed.
    pub mutations: usize,
    pub history_limit: usize,
    pub merge_filters: bool,
    /// Chance (percent) that a seed holds readiness behind a blocker.
    pub hold_percent: u8,
    /// Per-step chance of registering a gated callback.
    pub callback_percent: u8,
    /// Per-step chance of queueing a quota failure on the next write.
    pub fault_quota_percent: u8,
    /// Per-step chance of queueing an I/O failure on the next write.
    pub fault_io_percent: u8,
}

impl Default for CampaignConfig {
    fn default() -> Self {
        let sim = SimulationConfig::default();
        Self {
            seed_range: 0..100,
            mutations: sim.mutations,
            history_limit: sim.history_limit,
            merge_filters: sim.merge_filters,
            hold_percent: sim.hold_percent,
            callback_percent: sim.callback_percent,
            fault_quota_percent: sim.fault_quota_percent,
            fault_io_percent: sim.fault_io_percent,
        }
    }
}

impl CampaignConfig {
    #[must_use]
    pub const fn sim_config_for_seed(&self, seed: u64) -> SimulationConfig {
        SimulationConfig {
            seed,
            mutations: self.mutations,
            history_limit: self.history_limit,
            merge_filters: self.merge_filters,
            hold_percent: self.hold_percent,
            callback_percent: self.callback_percent,
            fault_quota_percent: self.fault_quota_percent,
            fault_io_percent: self.fault_io_percent,
        }
    }

    /// # Errors
    ///
    /// Returns an error if any parameter is out of range.
    pub fn validate(&self) -> Result<()> {
        if self.seed_range.is_empty() {
            bail!("seed_range must not be empty");
        }
        if self.history_limit == 0 {
            bail!("history_limit must be > 0");
        }
        if self.mutations == 0 {
            bail!("mutations must be > 0");
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedFailure {
    pub seed: u64,
    pub violations: Vec<String>,
}

/// Aggregate report produced by a campaign run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CampaignReport {
    pub seeds_run: usize,
    pub seeds_passed: usize,
    /// First seed that failed (for prioritized replay).
    pub first_failure: Option<u64>,
    pub failures: Vec<SeedFailure>,
    /// Seeds in which at least one history write failed.
    pub interesting_states_reached: usize,
}

impl CampaignReport {
    #[must_use]
    pub const fn all_passed(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Full result and oracle verdict for one seed.
#[derive(Debug, Clone)]
pub struct DetailedTrace {
    pub result: SimulationResult,
    pub oracle: OracleResult,
}

/// Run every seed in `config.seed_range`.
///
/// # Errors
///
/// Returns an error if config validation fails or a simulation encounters
/// an internal error.
pub fn run_campaign(config: &CampaignConfig) -> Result<CampaignReport> {
    config.validate()?;

    let mut report = CampaignReport {
        seeds_run: 0,
        seeds_passed: 0,
        first_failure: None,
        failures: Vec::new(),
        interesting_states_reached: 0,
    };

    for seed in config.seed_range.clone() {
        report.seeds_run += 1;
        let trace = run_seed(seed, config)?;

        if trace.result.interesting_state_reached {
            report.interesting_states_reached += 1;
        }

        if trace.oracle.passed {
            report.seeds_passed += 1;
        } else {
            warn!(seed, violations = trace.oracle.violations.len(), "seed failed");
            report.first_failure.get_or_insert(seed);
            report.failures.push(SeedFailure {
                seed,
                violations: trace.oracle.violations.iter().map(format_violation).collect(),
            });
        }
    }

    Ok(report)
}

/// Run one seed; `Ok(Err(..))` carries invariant violations.
///
/// # Errors
///
/// Returns an error when the simulation itself cannot run.
pub fn run_single_seed(
    seed: u64,
    config: &CampaignConfig,
) -> Result<std::result::Result<(), Vec<InvariantViolation>>> {
    let trace = run_seed(seed, config)?;
    if trace.oracle.passed {
        Ok(Ok(()))
    } else {
        Ok(Err(trace.oracle.violations))
    }
}

/// Replay one seed with its full trace, for debugging a failure.
///
/// # Errors
///
/// Returns an error when config validation or simulation fails.
pub fn replay_seed(seed: u64, config: &CampaignConfig) -> Result<DetailedTrace> {
    config.validate()?;
    run_seed(seed, config)
}

fn run_seed(seed: u64, config: &CampaignConfig) -> Result<DetailedTrace> {
    let mut simulator = Simulator::new(config.sim_config_for_seed(seed))?;
    let result = simulator.run()?;
    let oracle = SessionOracle::check_all(&result);
    Ok(DetailedTrace { result, oracle })
}

fn format_violation(v: &InvariantViolation) -> String {
    match v {
        InvariantViolation::HistoryBound { step, len, limit } => {
            format!("HistoryBound: step {step} holds {len} snapshots (limit {limit})")
        }
        InvariantViolation::PersistedDivergence {
            in_memory,
            persisted,
            first_mismatch,
        } => format!(
            "PersistedDivergence: {in_memory} in memory vs {persisted} persisted \
             (first mismatch at {first_mismatch:?})"
        ),
        InvariantViolation::GateClosed { gate } => {
            format!("GateClosed: {gate} gate still closed after the schedule")
        }
        InvariantViolation::Projection {
            channel,
            expected,
            actual,
        } => format!(
            "Projection: channel '{channel}' holds {actual:?} constraints, expected {expected:?}"
        ),
        InvariantViolation::CallbackOrder {
            gate,
            registered,
            ran,
        } => format!("CallbackOrder: {gate} gate registered {registered:?} but ran {ran:?}"),
        InvariantViolation::AttachOrder { aspect } => {
            format!("AttachOrder: {aspect} differ when the data source is attached first")
        }
    }
}
