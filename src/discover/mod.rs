//! Discovery diffing for container snapshots
//!
//! A discovery tick captures the set of child item ids currently visible in
//! a container (a board's listing). Work is triggered by *disappearance*:
//! an id present in the previous snapshot but absent from the current one
//! has left the listing, which means the item is complete and safe to crawl
//! in full exactly once.

use std::collections::HashSet;

/// The child item ids observed for one source unit at one discovery tick
///
/// Snapshots are never persisted. Each tick captures one, diffs it against
/// the previous tick's snapshot, and forwards it as scheduling state in the
/// next discovery job's arguments.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerSnapshot {
    /// The source unit this snapshot belongs to
    pub source_unit: String,

    /// Child item ids in the order the listing returned them
    pub item_ids: Vec<String>,
}

impl ContainerSnapshot {
    pub fn new(source_unit: impl Into<String>, item_ids: Vec<String>) -> Self {
        Self {
            source_unit: source_unit.into(),
            item_ids,
        }
    }

    /// The snapshot's ids as a set, for diffing
    pub fn id_set(&self) -> HashSet<&str> {
        self.item_ids.iter().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.item_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.item_ids.is_empty()
    }
}

/// Computes the dead set between two successive snapshots
///
/// Returns `previous − current`: ids that were present at the last tick and
/// are gone now. Items still present are carried forward implicitly by the
/// current snapshot becoming the next tick's previous, so every id is
/// eventually diffed out and queued exactly once, on departure.
///
/// The first tick for a unit has an empty previous set and therefore an
/// empty dead set; producing work starts at the second tick.
///
/// # Example
///
/// ```
/// use std::collections::HashSet;
/// use driftnet::discover::diff;
///
/// let previous: HashSet<&str> = ["a", "b", "c"].into_iter().collect();
/// let current: HashSet<&str> = ["b", "c", "d"].into_iter().collect();
///
/// let dead = diff(&previous, &current);
/// assert_eq!(dead, ["a"].into_iter().collect());
/// ```
pub fn diff<'a>(previous: &HashSet<&'a str>, current: &HashSet<&'a str>) -> HashSet<&'a str> {
    previous.difference(current).copied().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn set(ids: &[&'static str]) -> HashSet<&'static str> {
        ids.iter().copied().collect()
    }

    #[test]
    fn test_diff_is_set_difference() {
        let dead = diff(&set(&["a", "b", "c"]), &set(&["b", "c"]));
        assert_eq!(dead, set(&["a"]));
    }

    #[test]
    fn test_diff_empty_previous_is_empty() {
        // First tick ever: nothing can have disappeared
        let dead = diff(&set(&[]), &set(&["a", "b"]));
        assert!(dead.is_empty());
    }

    #[test]
    fn test_diff_empty_current_returns_previous() {
        let dead = diff(&set(&["a", "b"]), &set(&[]));
        assert_eq!(dead, set(&["a", "b"]));
    }

    #[test]
    fn test_diff_disjoint_sets() {
        let dead = diff(&set(&["a", "b"]), &set(&["c", "d"]));
        assert_eq!(dead, set(&["a", "b"]));
    }

    #[test]
    fn test_diff_identical_sets() {
        let dead = diff(&set(&["a", "b"]), &set(&["a", "b"]));
        assert!(dead.is_empty());
    }

    #[test]
    fn test_new_items_produce_no_work() {
        // An id appearing for the first time is retained via the current
        // snapshot, not queued
        let dead = diff(&set(&["a"]), &set(&["a", "b", "c"]));
        assert!(dead.is_empty());
    }

    #[test]
    fn test_snapshot_id_set() {
        let snapshot = ContainerSnapshot::new(
            "memes",
            vec!["1".to_string(), "2".to_string(), "2".to_string()],
        );
        assert_eq!(snapshot.len(), 3);
        assert_eq!(snapshot.id_set().len(), 2);
    }

    #[test]
    fn test_two_tick_lifecycle() {
        // Tick 1: previous is empty, snapshot {A,B,C} captured
        let tick1 = ContainerSnapshot::new("memes", vec!["A".into(), "B".into(), "C".into()]);
        let dead1 = diff(&HashSet::new(), &tick1.id_set());
        assert!(dead1.is_empty());

        // Tick 2: A has left the listing
        let tick2 = ContainerSnapshot::new("memes", vec!["B".into(), "C".into()]);
        let dead2 = diff(&tick1.id_set(), &tick2.id_set());
        assert_eq!(dead2, set(&["A"]));
    }
}
