//! Randomized operation schedules.
//!
//! A schedule is a flat list of [`Op`]s containing exactly one `Load` and
//! one `Attach`, with any readiness hold released before the end, so every
//! gate is open once the schedule has run.

use serde::{Deserialize, Serialize};
use viewsync_core::history::storage::InjectedFault;
use viewsync_core::{Filter, FilterKind, FilterRange, Operator};

use crate::rng::DeterministicRng;

pub const HIERARCHIES: [&str; 4] = [
    "[Study].[Name]",
    "[Subject].[Race]",
    "[Subject].[Sex]",
    "[Visit].[Label]",
];
pub const MEMBERS: [&str; 6] = ["A", "B", "C", "D", "E", "F"];
pub const PRIVATE_CHANNELS: [&str; 2] = ["priv0", "priv1"];
pub const HOLD_TOKEN: &str = "sim";

const OPERATORS: [Operator; 4] = [
    Operator::Equals,
    Operator::Union,
    Operator::Intersect,
    Operator::ContainsGroup,
];

/// Storage fault queued ahead of the next write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Fault {
    Quota,
    Io,
}

impl From<Fault> for InjectedFault {
    fn from(fault: Fault) -> Self {
        match fault {
            Fault::Quota => Self::Quota,
            Fault::Io => Self::Io,
        }
    }
}

/// One step of a simulated session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Op {
    Load,
    LoadIndex { index: usize },
    LoadFilters { index: usize },
    Attach,
    Hold,
    Release,
    AddFilters { filters: Vec<Filter>, merge: Option<bool> },
    SetFilters { filters: Vec<Filter> },
    ClearFilters,
    RemoveFilter { id: String, member: Option<String> },
    UpdateFilterMembers { id: String, members: Vec<String> },
    SetOperator { id: String, operator: Operator },
    AddSelections { selections: Vec<Filter>, clear: bool },
    ClearSelections,
    RemoveSelection { id: String, member: Option<String> },
    MoveSelectionToFilter,
    MembersComplete,
    Private { name: String, filters: Vec<Filter> },
    RemovePrivate { name: String },
    OnReady { id: u32 },
    OnDataSource { id: u32 },
    Fault { fault: Fault },
}

impl Op {
    /// Short label for traces.
    #[must_use]
    pub const fn label(&self) -> &'static str {
        match self {
            Self::Load => "load",
            Self::LoadIndex { .. } => "load_index",
            Self::LoadFilters { .. } => "load_filters",
            Self::Attach => "attach",
            Self::Hold => "hold",
            Self::Release => "release",
            Self::AddFilters { .. } => "add_filters",
            Self::SetFilters { .. } => "set_filters",
            Self::ClearFilters => "clear_filters",
            Self::RemoveFilter { .. } => "remove_filter",
            Self::UpdateFilterMembers { .. } => "update_filter",
            Self::SetOperator { .. } => "set_operator",
            Self::AddSelections { .. } => "add_selections",
            Self::ClearSelections => "clear_selections",
            Self::RemoveSelection { .. } => "remove_selection",
            Self::MoveSelectionToFilter => "move_selection_to_filter",
            Self::MembersComplete => "members_complete",
            Self::Private { .. } => "private",
            Self::RemovePrivate { .. } => "remove_private",
            Self::OnReady { .. } => "on_ready",
            Self::OnDataSource { .. } => "on_data_source",
            Self::Fault { .. } => "fault",
        }
    }
}

/// Knobs for [`generate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Number of mutation steps (readiness steps come on top).
    pub mutations: usize,
    /// Bound on indexes used by `load_index` / `load_filters`.
    pub history_limit: usize,
    pub hold_percent: u8,
    pub callback_percent: u8,
    pub fault_quota_percent: u8,
    pub fault_io_percent: u8,
}

/// Build a schedule for `config` from `rng`.
#[must_use]
pub fn generate(config: &ScheduleConfig, rng: &mut DeterministicRng) -> Vec<Op> {
    let mut generator = Generator::default();
    let mut ops = Vec::with_capacity(config.mutations * 2 + 4);

    let slots = config.mutations + 1;
    let load_at = rng.next_index(slots);
    let attach_at = rng.next_index(slots);
    let release_at = rng
        .hit_rate_percent(config.hold_percent)
        .then(|| rng.next_index(slots));

    if release_at.is_some() {
        ops.push(Op::Hold);
    }

    for slot in 0..slots {
        if slot == load_at {
            ops.push(Op::Load);
        }
        if slot == attach_at {
            ops.push(Op::Attach);
        }
        if release_at == Some(slot) {
            ops.push(Op::Release);
        }
        if slot == config.mutations {
            break;
        }

        if rng.hit_rate_percent(config.fault_quota_percent) {
            ops.push(Op::Fault { fault: Fault::Quota });
        } else if rng.hit_rate_percent(config.fault_io_percent) {
            ops.push(Op::Fault { fault: Fault::Io });
        }
        if rng.hit_rate_percent(config.callback_percent) {
            ops.push(generator.callback(rng));
        }
        ops.push(generator.mutation(rng, config.history_limit));
    }

    ops
}

/// Move the single `Attach` to the front, keeping everything else in order.
#[must_use]
pub fn attach_first(ops: &[Op]) -> Vec<Op> {
    let mut reordered = Vec::with_capacity(ops.len());
    reordered.push(Op::Attach);
    reordered.extend(ops.iter().filter(|op| **op != Op::Attach).cloned());
    reordered
}

#[derive(Debug, Default)]
struct Generator {
    next_filter: u32,
    next_callback: u32,
    filter_ids: Vec<String>,
    selection_ids: Vec<String>,
}

impl Generator {
    fn callback(&mut self, rng: &mut DeterministicRng) -> Op {
        self.next_callback += 1;
        let id = self.next_callback;
        if rng.coin() {
            Op::OnReady { id }
        } else {
            Op::OnDataSource { id }
        }
    }

    fn members(rng: &mut DeterministicRng, max: usize) -> Vec<String> {
        let want = 1 + rng.next_index(max);
        let mut members: Vec<String> = Vec::with_capacity(want);
        for _ in 0..want {
            if let Some(m) = rng.pick(&MEMBERS)
                && !members.iter().any(|x| x == m)
            {
                members.push((*m).to_string());
            }
        }
        members
    }

    /// A filter that always has something to match on.
    fn filter(&mut self, rng: &mut DeterministicRng) -> Filter {
        self.next_filter += 1;
        let id = format!("f{}", self.next_filter);
        let hierarchy = rng.pick(&HIERARCHIES).copied().unwrap_or(HIERARCHIES[0]);

        match rng.next_bounded(10) {
            0 => {
                let lo = f64::from(u32::try_from(rng.next_bounded(50)).unwrap_or(0));
                let width = f64::from(u32::try_from(rng.next_bounded(50)).unwrap_or(0));
                Filter::with_id(id, hierarchy, Vec::<String>::new())
                    .with_operator(Operator::InRange)
                    .with_range(FilterRange::new(lo, lo + width))
            }
            1 => Filter::with_id(id, hierarchy, Self::members(rng, 2)).with_kind(FilterKind::Grid),
            _ => Filter::with_id(id, hierarchy, Self::members(rng, 3)),
        }
    }

    fn filters(&mut self, rng: &mut DeterministicRng) -> Vec<Filter> {
        let count = 1 + rng.next_index(2);
        (0..count).map(|_| self.filter(rng)).collect()
    }

    fn known_filter(&self, rng: &mut DeterministicRng) -> Option<String> {
        rng.pick(&self.filter_ids).cloned()
    }

    fn known_selection(&self, rng: &mut DeterministicRng) -> Option<String> {
        rng.pick(&self.selection_ids).cloned()
    }

    fn maybe_member(rng: &mut DeterministicRng) -> Option<String> {
        if rng.coin() {
            rng.pick(&MEMBERS).map(|m| (*m).to_string())
        } else {
            None
        }
    }

    fn remember_filters(&mut self, filters: &[Filter]) {
        self.filter_ids.extend(filters.iter().map(|f| f.id.clone()));
    }

    fn mutation(&mut self, rng: &mut DeterministicRng, history_limit: usize) -> Op {
        match rng.next_bounded(20) {
            4 => {
                let filters = self.filters(rng);
                self.remember_filters(&filters);
                Op::SetFilters { filters }
            }
            5 => Op::ClearFilters,
            6 | 7 => self.known_filter(rng).map_or(Op::ClearFilters, |id| Op::RemoveFilter {
                id,
                member: Self::maybe_member(rng),
            }),
            8 => match self.known_filter(rng) {
                Some(id) => Op::UpdateFilterMembers {
                    id,
                    members: Self::members(rng, 3),
                },
                None => Op::MembersComplete,
            },
            9 => {
                let id = if rng.coin() {
                    self.known_selection(rng)
                } else {
                    self.known_filter(rng)
                };
                let operator = rng.pick(&OPERATORS).copied().unwrap_or_default();
                id.map_or(Op::MembersComplete, |id| Op::SetOperator { id, operator })
            }
            10..=12 => {
                let selections = vec![self.filter(rng)];
                self.selection_ids.extend(selections.iter().map(|s| s.id.clone()));
                Op::AddSelections {
                    selections,
                    clear: rng.coin(),
                }
            }
            13 => Op::ClearSelections,
            14 => self.known_selection(rng).map_or(Op::ClearSelections, |id| {
                Op::RemoveSelection {
                    id,
                    member: Self::maybe_member(rng),
                }
            }),
            15 => {
                // Promoted selections keep their ids.
                let promoted = self.selection_ids.clone();
                self.filter_ids.extend(promoted);
                Op::MoveSelectionToFilter
            }
            16 => Op::MembersComplete,
            17 => {
                let name = rng.pick(&PRIVATE_CHANNELS).copied().unwrap_or(PRIVATE_CHANNELS[0]);
                Op::Private {
                    name: name.to_string(),
                    filters: vec![self.filter(rng)],
                }
            }
            18 => {
                let name = rng.pick(&PRIVATE_CHANNELS).copied().unwrap_or(PRIVATE_CHANNELS[0]);
                Op::RemovePrivate {
                    name: name.to_string(),
                }
            }
            19 => {
                let index = rng.next_index(history_limit.max(1));
                if rng.coin() {
                    Op::LoadIndex { index }
                } else {
                    Op::LoadFilters { index }
                }
            }
            _ => {
                let filters = self.filters(rng);
                self.remember_filters(&filters);
                let merge = match rng.next_bounded(3) {
                    0 => Some(true),
                    1 => Some(false),
                    _ => None,
                };
                Op::AddFilters { filters, merge }
            }
        }
    }
}
