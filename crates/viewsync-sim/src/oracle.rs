use viewsync_core::config::{DEFAULT_FILTER_CHANNEL, DEFAULT_SELECTION_CHANNEL};
use viewsync_core::{Constraint, Filter};

use crate::simulator::{RunOutcome, SimulationResult};
use crate::schedule::PRIVATE_CHANNELS;

// ── Core result types ─────────────────────────────────────────────────────────

/// Outcome of one or more invariant checks.
#[derive(Debug, Clone, PartialEq)]
pub struct OracleResult {
    /// `true` iff no violations were found.
    pub passed: bool,
    pub violations: Vec<InvariantViolation>,
}

impl OracleResult {
    #[must_use]
    const fn pass() -> Self {
        Self {
            passed: true,
            violations: Vec::new(),
        }
    }

    #[must_use]
    fn from_violations(violations: Vec<InvariantViolation>) -> Self {
        Self {
            passed: violations.is_empty(),
            violations,
        }
    }

    /// Merge another result into this one (failures accumulate).
    #[must_use]
    fn merge(mut self, other: Self) -> Self {
        if !other.passed {
            self.passed = false;
            self.violations.extend(other.violations);
        }
        self
    }
}

// ── Invariant violation diagnostics ──────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub enum InvariantViolation {
    /// History held more entries than the bound after a step.
    HistoryBound { step: usize, len: usize, limit: usize },

    /// The last write succeeded but storage does not hold the in-memory history.
    PersistedDivergence {
        in_memory: usize,
        persisted: usize,
        first_mismatch: Option<usize>,
    },

    /// A gate was still closed after the whole schedule ran.
    GateClosed { gate: &'static str },

    /// A channel on the data source does not reflect the current set.
    Projection {
        channel: String,
        expected: Option<usize>,
        actual: Option<usize>,
    },

    /// A gated callback ran out of order, twice, or not at all.
    CallbackOrder {
        gate: &'static str,
        registered: Vec<u32>,
        ran: Vec<u32>,
    },

    /// Attaching the data source first produced a different end state.
    AttachOrder { aspect: &'static str },
}

/// Invariant checks over a [`SimulationResult`].
pub struct SessionOracle;

impl SessionOracle {
    /// History length never exceeds `limit`.
    #[must_use]
    pub fn check_history_bound(run: &RunOutcome, limit: usize) -> OracleResult {
        let violations = run
            .trace
            .iter()
            .filter(|t| t.history > limit)
            .map(|t| InvariantViolation::HistoryBound {
                step: t.step,
                len: t.history,
                limit,
            })
            .collect();
        OracleResult::from_violations(violations)
    }

    /// After a successful final write, storage round-trips the history.
    #[must_use]
    pub fn check_persistence(run: &RunOutcome) -> OracleResult {
        let Some(persisted) = &run.persisted else {
            return OracleResult::pass();
        };
        if *persisted == run.history {
            return OracleResult::pass();
        }
        let first_mismatch = run
            .history
            .iter()
            .zip(persisted)
            .position(|(a, b)| a != b);
        OracleResult::from_violations(vec![InvariantViolation::PersistedDivergence {
            in_memory: run.history.len(),
            persisted: persisted.len(),
            first_mismatch,
        }])
    }

    /// Once both gates are open, each channel holds exactly the constraints
    /// of the current set (absent when the set is empty), and each private
    /// channel holds its recorded selection.
    #[must_use]
    pub fn check_projection(run: &RunOutcome) -> OracleResult {
        let mut violations = Vec::new();
        if !run.state_ready {
            violations.push(InvariantViolation::GateClosed { gate: "state" });
        }
        if !run.data_source_ready {
            violations.push(InvariantViolation::GateClosed { gate: "data_source" });
        }
        if !violations.is_empty() {
            return OracleResult::from_violations(violations);
        }

        let expected_for = |set: &[Filter]| -> Option<Vec<Constraint>> {
            (!set.is_empty()).then(|| set.iter().map(Constraint::from).collect())
        };

        let mut expect = |channel: &str, expected: Option<&Vec<Constraint>>| {
            let actual = run.channels.get(channel);
            if actual != expected {
                violations.push(InvariantViolation::Projection {
                    channel: channel.to_string(),
                    expected: expected.map(Vec::len),
                    actual: actual.map(Vec::len),
                });
            }
        };

        expect(DEFAULT_FILTER_CHANNEL, expected_for(&run.filters).as_ref());
        expect(DEFAULT_SELECTION_CHANNEL, expected_for(&run.selections).as_ref());
        for name in PRIVATE_CHANNELS {
            expect(name, run.private_expected.get(name));
        }

        OracleResult::from_violations(violations)
    }

    /// Gated callbacks run exactly once each, in registration order.
    #[must_use]
    pub fn check_callbacks(run: &RunOutcome) -> OracleResult {
        let mut violations = Vec::new();
        if run.ready_ran != run.ready_registered {
            violations.push(InvariantViolation::CallbackOrder {
                gate: "state",
                registered: run.ready_registered.clone(),
                ran: run.ready_ran.clone(),
            });
        }
        if run.source_ran != run.source_registered {
            violations.push(InvariantViolation::CallbackOrder {
                gate: "data_source",
                registered: run.source_registered.clone(),
                ran: run.source_ran.clone(),
            });
        }
        OracleResult::from_violations(violations)
    }

    /// The end state does not depend on when the data source was attached.
    #[must_use]
    pub fn check_attach_order(run: &RunOutcome, reference: &RunOutcome) -> OracleResult {
        let aspects: [(&'static str, bool); 6] = [
            ("filters", run.filters == reference.filters),
            ("selections", run.selections == reference.selections),
            ("channels", run.channels == reference.channels),
            ("history", run.history == reference.history),
            ("event_counts", run.event_counts == reference.event_counts),
            (
                "callbacks",
                run.ready_ran == reference.ready_ran && run.source_ran == reference.source_ran,
            ),
        ];
        let violations = aspects
            .into_iter()
            .filter(|(_, same)| !same)
            .map(|(aspect, _)| InvariantViolation::AttachOrder { aspect })
            .collect();
        OracleResult::from_violations(violations)
    }

    /// Every check, on the run and (where meaningful) on the reference.
    #[must_use]
    pub fn check_all(result: &SimulationResult) -> OracleResult {
        let limit = result.config.history_limit;
        Self::check_history_bound(&result.run, limit)
            .merge(Self::check_persistence(&result.run))
            .merge(Self::check_projection(&result.run))
            .merge(Self::check_projection(&result.reference))
            .merge(Self::check_callbacks(&result.run))
            .merge(Self::check_attach_order(&result.run, &result.reference))
    }
}
