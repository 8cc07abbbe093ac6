use serde::{Deserialize, Serialize};

/// Small deterministic RNG driving schedule generation.
///
/// Reproducible across platforms so a failing seed replays exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeterministicRng {
    state: u64,
}

impl DeterministicRng {
    #[must_use]
    pub const fn new(seed: u64) -> Self {
        Self {
            state: seed ^ 0x9E37_79B9_7F4A_7C15,
        }
    }

    #[must_use]
    pub const fn next_u64(&mut self) -> u64 {
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        self.state
    }

    /// Next value in `[0, upper_exclusive)`.
    #[must_use]
    pub const fn next_bounded(&mut self, upper_exclusive: u64) -> u64 {
        if upper_exclusive == 0 {
            return 0;
        }
        // High bits of an LCG are far better distributed than the low ones.
        (self.next_u64() >> 33) % upper_exclusive
    }

    /// Next index in `[0, len)`; `0` when `len` is zero.
    #[must_use]
    pub fn next_index(&mut self, len: usize) -> usize {
        let bound = u64::try_from(len).unwrap_or(u64::MAX);
        usize::try_from(self.next_bounded(bound)).unwrap_or(0)
    }

    /// Bernoulli trial with integer percent.
    #[must_use]
    pub fn hit_rate_percent(&mut self, percent: u8) -> bool {
        if percent == 0 {
            return false;
        }
        if percent >= 100 {
            return true;
        }
        self.next_bounded(100) < u64::from(percent)
    }

    #[must_use]
    pub const fn coin(&mut self) -> bool {
        self.next_bounded(2) == 1
    }

    /// A uniformly chosen element, or `None` for an empty slice.
    pub fn pick<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        if items.is_empty() {
            return None;
        }
        items.get(self.next_index(items.len()))
    }
}
