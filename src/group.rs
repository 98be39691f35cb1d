//! Partitioning of mutants into bounded execution units.

use serde::{Deserialize, Serialize};

use crate::mutant::MutantDescriptor;

/// An ordered batch of mutants executed sequentially inside one worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationUnit {
    /// Identifier, unique within one run. A crash retry keeps the id of
    /// the unit it replaces.
    pub id: u64,
    /// Members, in dispatch order.
    pub mutants: Vec<MutantDescriptor>,
    /// True once this unit is the one-shot re-dispatch of a crashed unit.
    #[serde(default)]
    pub retried: bool,
}

impl MutationUnit {
    /// Build a unit from an id and its members.
    pub fn new(id: u64, mutants: Vec<MutantDescriptor>) -> Self {
        Self {
            id,
            mutants,
            retried: false,
        }
    }

    /// Number of mutants in the unit.
    pub fn len(&self) -> usize {
        self.mutants.len()
    }

    /// True when the unit holds no mutants.
    pub fn is_empty(&self) -> bool {
        self.mutants.is_empty()
    }

    /// Coverage runtime hint for the whole unit, used for deadline scaling.
    pub fn coverage_runtime_ms(&self) -> u64 {
        self.mutants
            .iter()
            .map(|m| m.covering_runtime_ms)
            .fold(0u64, u64::saturating_add)
    }
}

/// Strategy for partitioning an ordered mutant sequence into units.
///
/// Implementations must produce an exact partition: every input mutant
/// appears in exactly one output unit, in input order, and no unit
/// exceeds `max_unit_size`.
pub trait MutationGrouper: Send + Sync {
    /// Partition `mutants` into units of at most `max_unit_size` members.
    fn group(&self, mutants: Vec<MutantDescriptor>, max_unit_size: usize) -> Vec<MutationUnit>;
}

/// Default grouping: consecutive mutants of one class share a unit.
///
/// A unit closes when it reaches the size cap or when the next mutant
/// belongs to a different class. A single class larger than the cap is
/// sliced into consecutive units; class boundaries are never straddled.
/// Keeping a unit within one class lets a worker reuse one loaded class
/// context across its members.
#[derive(Debug, Default, Clone, Copy)]
pub struct ClassScopedGrouper;

impl MutationGrouper for ClassScopedGrouper {
    fn group(&self, mutants: Vec<MutantDescriptor>, max_unit_size: usize) -> Vec<MutationUnit> {
        let cap = max_unit_size.max(1);
        let mut units = Vec::new();
        let mut current: Vec<MutantDescriptor> = Vec::new();

        for mutant in mutants {
            let boundary = current
                .last()
                .is_some_and(|prev| prev.class_id != mutant.class_id);
            if boundary || current.len() >= cap {
                units.push(MutationUnit::new(units.len() as u64, std::mem::take(&mut current)));
            }
            current.push(mutant);
        }
        if !current.is_empty() {
            units.push(MutationUnit::new(units.len() as u64, current));
        }

        units
    }
}

/// Size-only grouping that ignores class boundaries.
///
/// Useful when the execution context has no per-class state worth
/// reusing and even packing matters more.
#[derive(Debug, Default, Clone, Copy)]
pub struct FixedSizeGrouper;

impl MutationGrouper for FixedSizeGrouper {
    fn group(&self, mutants: Vec<MutantDescriptor>, max_unit_size: usize) -> Vec<MutationUnit> {
        let cap = max_unit_size.max(1);
        let mut units = Vec::new();
        let mut iter = mutants.into_iter().peekable();

        while iter.peek().is_some() {
            let chunk: Vec<MutantDescriptor> = iter.by_ref().take(cap).collect();
            units.push(MutationUnit::new(units.len() as u64, chunk));
        }

        units
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn mutant(id: u64, class_id: &str) -> MutantDescriptor {
        MutantDescriptor {
            id,
            class_id: class_id.to_string(),
            method_id: format!("method_{id}"),
            line: 10 + id as u32,
            mutator: "math".to_string(),
            covering_tests: vec![format!("test_{id}")],
            covering_runtime_ms: 10,
        }
    }

    fn ids(units: &[MutationUnit]) -> Vec<u64> {
        units
            .iter()
            .flat_map(|u| u.mutants.iter().map(|m| m.id))
            .collect()
    }

    #[test]
    fn class_boundary_closes_a_unit() {
        let mutants = vec![
            mutant(1, "A"),
            mutant(2, "A"),
            mutant(3, "B"),
            mutant(4, "B"),
            mutant(5, "B"),
        ];
        let units = ClassScopedGrouper.group(mutants, 10);

        assert_eq!(units.len(), 2);
        assert_eq!(ids(&units[..1]), vec![1, 2]);
        assert_eq!(ids(&units[1..]), vec![3, 4, 5]);
    }

    #[test]
    fn oversized_class_is_sliced_into_consecutive_units() {
        let mutants: Vec<_> = (1..=7).map(|id| mutant(id, "A")).collect();
        let units = ClassScopedGrouper.group(mutants, 3);

        let sizes: Vec<usize> = units.iter().map(MutationUnit::len).collect();
        assert_eq!(sizes, vec![3, 3, 1]);
        assert_eq!(ids(&units), (1..=7).collect::<Vec<_>>());
    }

    #[test]
    fn zero_cap_is_treated_as_one() {
        let mutants = vec![mutant(1, "A"), mutant(2, "A")];
        let units = ClassScopedGrouper.group(mutants, 0);
        assert_eq!(units.len(), 2);
    }

    #[test]
    fn fixed_size_grouper_ignores_class_boundaries() {
        let mutants = vec![mutant(1, "A"), mutant(2, "B"), mutant(3, "C"), mutant(4, "D")];
        let units = FixedSizeGrouper.group(mutants, 3);
        let sizes: Vec<usize> = units.iter().map(MutationUnit::len).collect();
        assert_eq!(sizes, vec![3, 1]);
    }

    #[test]
    fn unit_coverage_runtime_sums_member_hints() {
        let mut a = mutant(1, "A");
        a.covering_runtime_ms = 100;
        let mut b = mutant(2, "A");
        b.covering_runtime_ms = 250;
        let unit = MutationUnit::new(0, vec![a, b]);
        assert_eq!(unit.coverage_runtime_ms(), 350);
    }

    #[test]
    fn empty_input_yields_no_units() {
        assert!(ClassScopedGrouper.group(Vec::new(), 5).is_empty());
        assert!(FixedSizeGrouper.group(Vec::new(), 5).is_empty());
    }

    proptest! {
        #[test]
        fn class_scoped_units_partition_the_input(
            classes in proptest::collection::vec(0u8..5, 0..40),
            cap in 1usize..6,
        ) {
            let mutants: Vec<_> = classes
                .iter()
                .enumerate()
                .map(|(idx, class)| mutant(idx as u64, &format!("class_{class}")))
                .collect();
            let total = mutants.len();
            let units = ClassScopedGrouper.group(mutants, cap);

            // exact partition: sizes sum to the input count, ids unique, order kept
            let flattened = ids(&units);
            prop_assert_eq!(flattened.len(), total);
            prop_assert_eq!(&flattened, &(0..total as u64).collect::<Vec<_>>());

            for unit in &units {
                prop_assert!(unit.len() <= cap);
                prop_assert!(!unit.is_empty());
                let first_class = &unit.mutants[0].class_id;
                prop_assert!(unit.mutants.iter().all(|m| &m.class_id == first_class));
            }
        }
    }
}
