//! Keyed collection diff between a desired list (from a spec) and an observed
//! list (from the provider).
//!
//! Every key of `desired ∪ observed` lands in exactly one of `to_create`,
//! `to_update`, `to_delete` or `to_reconcile_status_only`. Items that share a
//! key with an earlier item of the same side are set aside in `duplicates`
//! (desired) or `shadowed` (observed) and never acted upon directly.

use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug)]
pub struct DiffPlan<'a, K, D, O> {
    pub to_create: Vec<&'a D>,
    pub to_update: BTreeMap<K, (&'a D, &'a O)>,
    pub to_delete: BTreeMap<K, &'a O>,
    pub to_reconcile_status_only: BTreeMap<K, &'a O>,
    /// Second and later desired items with an already-claimed key.
    pub duplicates: Vec<&'a D>,
    /// Observed items that lost the per-key reduction.
    pub shadowed: Vec<&'a O>,
}

impl<K, D, O> DiffPlan<'_, K, D, O> {
    /// True when applying the plan would not call the provider.
    pub fn is_noop(&self) -> bool {
        self.to_create.is_empty()
            && self.to_update.is_empty()
            && self.to_delete.is_empty()
    }
}

/// Diff where the last observed item wins when keys collide.
pub fn diff<'a, K, D, O>(
    desired: &'a [D],
    observed: &'a [O],
    desired_key: impl Fn(&D) -> K,
    observed_key: impl Fn(&O) -> K,
    equal: impl Fn(&D, &O) -> bool,
) -> DiffPlan<'a, K, D, O>
where
    K: Ord + Clone,
{
    diff_preferring(desired, observed, desired_key, observed_key, equal, |_, _| {
        true
    })
}

/// Like [`diff`], but `prefer(candidate, current)` decides whether a later
/// observed item replaces the one already indexed under the same key.
pub fn diff_preferring<'a, K, D, O>(
    desired: &'a [D],
    observed: &'a [O],
    desired_key: impl Fn(&D) -> K,
    observed_key: impl Fn(&O) -> K,
    equal: impl Fn(&D, &O) -> bool,
    prefer: impl Fn(&O, &O) -> bool,
) -> DiffPlan<'a, K, D, O>
where
    K: Ord + Clone,
{
    let mut shadowed = Vec::new();
    let mut observed_by_key: BTreeMap<K, &'a O> = BTreeMap::new();
    for o in observed {
        let k = observed_key(o);
        match observed_by_key.get(&k) {
            Some(current) if !prefer(o, *current) => shadowed.push(o),
            Some(current) => {
                shadowed.push(*current);
                observed_by_key.insert(k, o);
            }
            None => {
                observed_by_key.insert(k, o);
            }
        }
    }

    let mut plan = DiffPlan {
        to_create: Vec::new(),
        to_update: BTreeMap::new(),
        to_delete: BTreeMap::new(),
        to_reconcile_status_only: BTreeMap::new(),
        duplicates: Vec::new(),
        shadowed,
    };

    let mut claimed: BTreeSet<K> = BTreeSet::new();
    for d in desired {
        let k = desired_key(d);
        if !claimed.insert(k.clone()) {
            plan.duplicates.push(d);
            continue;
        }
        match observed_by_key.get(&k) {
            None => plan.to_create.push(d),
            Some(o) if equal(d, *o) => {
                plan.to_reconcile_status_only.insert(k, *o);
            }
            Some(o) => {
                plan.to_update.insert(k, (d, *o));
            }
        }
    }

    for (k, o) in observed_by_key {
        if !claimed.contains(&k) {
            plan.to_delete.insert(k, o);
        }
    }

    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, PartialEq)]
    struct Item {
        name: &'static str,
        rev: u32,
    }

    fn item(name: &'static str, rev: u32) -> Item {
        Item { name, rev }
    }

    fn run<'a>(
        desired: &'a [Item],
        observed: &'a [Item],
    ) -> DiffPlan<'a, &'static str, Item, Item> {
        diff(desired, observed, |d| d.name, |o| o.name, |d, o| d.rev == o.rev)
    }

    #[test]
    fn create_update_delete_and_status_only() {
        let desired = [item("idx1", 1), item("idx2", 1), item("idx4", 2)];
        let observed = [item("idx2", 1), item("idx3", 1), item("idx4", 1)];
        let plan = run(&desired, &observed);

        assert_eq!(plan.to_create, vec![&desired[0]]);
        assert_eq!(
            plan.to_reconcile_status_only.keys().copied().collect::<Vec<_>>(),
            vec!["idx2"]
        );
        assert_eq!(plan.to_delete.keys().copied().collect::<Vec<_>>(), vec!["idx3"]);
        let (d, o) = plan.to_update["idx4"];
        assert_eq!((d.rev, o.rev), (2, 1));
        assert!(!plan.is_noop());
    }

    #[test]
    fn every_key_lands_in_exactly_one_bucket() {
        let cases: Vec<(Vec<Item>, Vec<Item>)> = vec![
            (vec![], vec![]),
            (vec![item("a", 1)], vec![]),
            (vec![], vec![item("a", 1)]),
            (vec![item("a", 1), item("b", 2)], vec![item("b", 1), item("c", 1)]),
            (vec![item("a", 1), item("b", 1)], vec![item("a", 1), item("b", 1)]),
        ];
        for (desired, observed) in &cases {
            let plan = run(desired, observed);
            let mut keys: Vec<&str> = desired
                .iter()
                .chain(observed.iter())
                .map(|i| i.name)
                .collect();
            keys.sort();
            keys.dedup();
            for k in keys {
                let hits = plan.to_create.iter().filter(|d| d.name == k).count()
                    + plan.to_update.contains_key(k) as usize
                    + plan.to_delete.contains_key(k) as usize
                    + plan.to_reconcile_status_only.contains_key(k) as usize;
                assert_eq!(hits, 1, "key {k} must be in exactly one bucket");
            }
        }
    }

    #[test]
    fn applying_the_plan_converges_to_a_noop() {
        let desired = [item("a", 2), item("b", 1)];
        let observed = [item("a", 1), item("c", 1)];
        let plan = run(&desired, &observed);
        assert!(!plan.is_noop());

        // what the provider looks like after the plan was applied
        let converged = [item("a", 2), item("b", 1)];
        let again = run(&desired, &converged);
        assert!(again.is_noop());
        assert_eq!(again.to_reconcile_status_only.len(), 2);
    }

    #[test]
    fn duplicate_desired_keys_are_never_created_twice() {
        let desired = [item("a", 1), item("a", 2), item("b", 1)];
        let plan = run(&desired, &[]);
        assert_eq!(plan.to_create.len(), 2);
        assert_eq!(plan.duplicates, vec![&desired[1]]);
        assert_eq!(plan.to_create[0].rev, 1, "first occurrence is authoritative");
    }

    #[test]
    fn last_observed_wins_by_default() {
        let observed = [item("a", 1), item("a", 2)];
        let desired = [item("a", 2)];
        let plan = run(&desired, &observed);
        assert!(plan.to_reconcile_status_only.contains_key("a"));
        assert_eq!(plan.shadowed, vec![&observed[0]]);
    }

    #[test]
    fn preference_keeps_the_better_observed_item() {
        let observed = [item("a", 5), item("a", 1)];
        let desired = [item("a", 5)];
        let plan = diff_preferring(
            &desired,
            &observed,
            |d| d.name,
            |o| o.name,
            |d, o| d.rev == o.rev,
            |candidate, current| candidate.rev > current.rev,
        );
        assert!(plan.to_reconcile_status_only.contains_key("a"));
        assert_eq!(plan.shadowed, vec![&observed[1]]);
    }
}
