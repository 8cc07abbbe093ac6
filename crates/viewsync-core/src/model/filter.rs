//! Filter and selection entities.
//!
//! Filters and selections share one shape ([`Filter`]); the role is decided by
//! which set of the synchronizer holds the value. Filters are value-like:
//! every snapshot owns its own copies and edits only ever touch the current
//! in-memory set.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};
use std::{fmt, str::FromStr};

use super::{ParseEnumError, normalize};

/// How a filter participates in member-level edits.
///
/// Grid and plot filters are atomic: they were produced by a whole-table or
/// whole-chart gesture, so removing one member removes the entire filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FilterKind {
    Grid,
    Plot,
    Group,
    #[default]
    Simple,
}

impl FilterKind {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Grid => "grid",
            Self::Plot => "plot",
            Self::Group => "group",
            Self::Simple => "simple",
        }
    }

    /// `true` for kinds whose members cannot be removed one at a time.
    #[must_use]
    pub const fn is_atomic(self) -> bool {
        matches!(self, Self::Grid | Self::Plot)
    }
}

/// Comparison/combination operator applied to a filter's members.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Operator {
    #[default]
    Equals,
    Union,
    Intersect,
    InRange,
    ContainsGroup,
}

impl Operator {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Equals => "equals",
            Self::Union => "union",
            Self::Intersect => "intersect",
            Self::InRange => "in-range",
            Self::ContainsGroup => "contains-group",
        }
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FilterKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).as_str() {
            "grid" => Ok(Self::Grid),
            "plot" => Ok(Self::Plot),
            "group" => Ok(Self::Group),
            "simple" => Ok(Self::Simple),
            _ => Err(ParseEnumError {
                expected: "kind",
                got: s.to_string(),
            }),
        }
    }
}

impl FromStr for Operator {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match normalize(s).replace('_', "-").as_str() {
            "equals" | "eq" => Ok(Self::Equals),
            "union" | "or" => Ok(Self::Union),
            "intersect" | "and" => Ok(Self::Intersect),
            "in-range" | "range" => Ok(Self::InRange),
            "contains-group" => Ok(Self::ContainsGroup),
            _ => Err(ParseEnumError {
                expected: "operator",
                got: s.to_string(),
            }),
        }
    }
}

/// Numeric bounds of a range filter. `None` on either side means unbounded.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct FilterRange {
    #[serde(default)]
    pub min: Option<f64>,
    #[serde(default)]
    pub max: Option<f64>,
}

impl FilterRange {
    #[must_use]
    pub const fn new(min: f64, max: f64) -> Self {
        Self {
            min: Some(min),
            max: Some(max),
        }
    }

    /// Widen `self` so it encloses `other`.
    ///
    /// An unbounded side stays unbounded.
    pub fn widen(&mut self, other: &Self) {
        self.min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            _ => None,
        };
        self.max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            _ => None,
        };
    }
}

static NEXT_FILTER_SEQ: AtomicU64 = AtomicU64::new(0);

/// Derive a short, process-unique filter id.
fn generate_id(hierarchy_name: &str, members: &[String]) -> String {
    let seq = NEXT_FILTER_SEQ.fetch_add(1, Ordering::Relaxed);
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |d| d.as_nanos());

    let mut hasher = blake3::Hasher::new();
    hasher.update(hierarchy_name.as_bytes());
    for member in members {
        hasher.update(b"\x1f");
        hasher.update(member.as_bytes());
    }
    hasher.update(&seq.to_le_bytes());
    hasher.update(&nanos.to_le_bytes());

    let hex = hasher.finalize().to_hex();
    format!("f-{}", &hex.as_str()[..10])
}

/// One filter or selection constraint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Filter {
    pub id: String,
    #[serde(default)]
    pub operator: Operator,
    #[serde(default)]
    pub members: Vec<String>,
    pub hierarchy_name: String,
    #[serde(default)]
    pub unique_name: Option<String>,
    #[serde(default)]
    pub kind: FilterKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub range: Option<FilterRange>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group_label: Option<String>,
}

impl Filter {
    /// Create a simple `equals` filter with a freshly generated id.
    pub fn new<I, S>(hierarchy_name: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let hierarchy_name = hierarchy_name.into();
        let members: Vec<String> = members.into_iter().map(Into::into).collect();
        let id = generate_id(&hierarchy_name, &members);
        Self::with_id(id, hierarchy_name, members)
    }

    /// Create a filter with a caller-assigned id.
    pub fn with_id<I, S>(id: impl Into<String>, hierarchy_name: impl Into<String>, members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            id: id.into(),
            operator: Operator::default(),
            members: members.into_iter().map(Into::into).collect(),
            hierarchy_name: hierarchy_name.into(),
            unique_name: None,
            kind: FilterKind::default(),
            range: None,
            group_label: None,
        }
    }

    /// Create an `in-range` filter with no members.
    pub fn range(hierarchy_name: impl Into<String>, min: f64, max: f64) -> Self {
        let mut filter = Self::new(hierarchy_name, Vec::<String>::new());
        filter.operator = Operator::InRange;
        filter.range = Some(FilterRange::new(min, max));
        filter
    }

    #[must_use]
    pub const fn with_operator(mut self, operator: Operator) -> Self {
        self.operator = operator;
        self
    }

    #[must_use]
    pub const fn with_kind(mut self, kind: FilterKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn with_unique_name(mut self, unique_name: impl Into<String>) -> Self {
        self.unique_name = Some(unique_name.into());
        self
    }

    #[must_use]
    pub const fn with_range(mut self, range: FilterRange) -> Self {
        self.range = Some(range);
        self
    }

    #[must_use]
    pub const fn is_grid(&self) -> bool {
        matches!(self.kind, FilterKind::Grid)
    }

    #[must_use]
    pub const fn is_plot(&self) -> bool {
        matches!(self.kind, FilterKind::Plot)
    }

    #[must_use]
    pub const fn is_atomic(&self) -> bool {
        self.kind.is_atomic()
    }

    #[must_use]
    pub fn has_member(&self, member: &str) -> bool {
        self.members.iter().any(|m| m == member)
    }

    /// Overwrite only the fields present in `patch`. Returns `true` if any
    /// field changed.
    pub fn apply_patch(&mut self, patch: &FilterPatch) -> bool {
        let before = self.clone();

        if let Some(operator) = patch.operator {
            self.operator = operator;
        }
        if let Some(members) = &patch.members {
            self.members.clone_from(members);
        }
        if let Some(hierarchy_name) = &patch.hierarchy_name {
            self.hierarchy_name.clone_from(hierarchy_name);
        }
        if let Some(unique_name) = &patch.unique_name {
            self.unique_name = Some(unique_name.clone());
        }
        if let Some(kind) = patch.kind {
            self.kind = kind;
        }
        if let Some(range) = patch.range {
            self.range = Some(range);
        }
        if let Some(label) = &patch.group_label {
            self.group_label = Some(label.clone());
        }

        *self != before
    }
}

/// Partial field set for `update_filter` / `update_selection`.
///
/// Absent fields are left untouched. The id is never patchable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FilterPatch {
    pub operator: Option<Operator>,
    pub members: Option<Vec<String>>,
    pub hierarchy_name: Option<String>,
    pub unique_name: Option<String>,
    pub kind: Option<FilterKind>,
    pub range: Option<FilterRange>,
    pub group_label: Option<String>,
}

impl FilterPatch {
    #[must_use]
    pub fn members<I, S>(members: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            members: Some(members.into_iter().map(Into::into).collect()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn operator(operator: Operator) -> Self {
        Self {
            operator: Some(operator),
            ..Self::default()
        }
    }
}
