use proptest::prelude::*;
use viewsync_core::algebra::{can_merge, filters_equal, merge, merge_set, prune_left_outer, remove_member};

use generators::*;

/// Mutual inclusion under filter equality.
fn set_equal(a: &[viewsync_core::Filter], b: &[viewsync_core::Filter]) -> bool {
    let covered = |xs: &[viewsync_core::Filter], ys: &[viewsync_core::Filter]| {
        xs.iter().all(|x| ys.iter().any(|y| filters_equal(x, y)))
    };
    covered(a, b) && covered(b, a)
}

proptest! {
    #![proptest_config(proptest::test_runner::Config::with_cases(2000))]

    #[test]
    fn merge_set_is_idempotent(set in arb_disjoint_set()) {
        let merged = merge_set(set.clone(), set.clone());
        prop_assert!(set_equal(&merged, &set));
    }

    #[test]
    fn merge_set_with_empty_incoming_is_identity(set in arb_filter_set()) {
        prop_assert_eq!(merge_set(set.clone(), Vec::new()), set);
    }

    #[test]
    fn merge_set_never_loses_members(existing in arb_filter_set(), incoming in arb_filter_set()) {
        let out = merge_set(existing.clone(), incoming.clone());
        for filter in existing.iter().chain(&incoming) {
            for member in &filter.members {
                prop_assert!(
                    out.iter().any(|f| f.hierarchy_name == filter.hierarchy_name && f.has_member(member)),
                    "member {} of {} lost", member, filter.id
                );
            }
        }
        prop_assert!(out.len() <= existing.len() + incoming.len());
        prop_assert!(out.len() >= existing.len());
    }

    #[test]
    fn can_merge_is_symmetric(a in arb_filter(), b in arb_filter()) {
        prop_assert_eq!(can_merge(&a, &b), can_merge(&b, &a));
    }

    #[test]
    fn merged_range_encloses_both(a in arb_filter(), b in arb_filter()) {
        prop_assume!(can_merge(&a, &b));
        let m = merge(&a, &b);
        if let (Some(r), Some(ra), Some(rb)) = (m.range, a.range, b.range) {
            prop_assert!(r.min <= ra.min && r.min <= rb.min);
            prop_assert!(r.max >= ra.max && r.max >= rb.max);
        }
    }

    #[test]
    fn prune_is_left_outer_difference(a in arb_filter_set(), b in arb_filter_set()) {
        let pruned = prune_left_outer(&a, &b);
        for kept in &pruned {
            prop_assert!(a.contains(kept));
            prop_assert!(!b.iter().any(|old| filters_equal(kept, old)));
        }
        for candidate in &a {
            if !b.iter().any(|old| filters_equal(candidate, old)) {
                prop_assert!(pruned.contains(candidate));
            }
        }
    }

    #[test]
    fn prune_against_self_is_empty(a in arb_filter_set()) {
        prop_assert!(prune_left_outer(&a, &a).is_empty());
    }

    #[test]
    fn remove_member_is_noop_on_atomic(f in arb_filter(), member in "[a-e]") {
        let remaining = remove_member(&f, &member);
        if f.is_atomic() {
            prop_assert_eq!(remaining, f.members.clone());
        } else {
            prop_assert!(!remaining.contains(&member));
            prop_assert!(remaining.len() + 1 >= f.members.len());
        }
    }
}
