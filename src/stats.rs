//! Aggregation of resolved mutants into scores and run statistics.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::mutant::{DetectionStatus, MutantResult};

/// Per-status counts for one grouping key.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusCounts {
    /// Killed by a covering test.
    pub killed: u64,
    /// Survived every covering test.
    pub survived: u64,
    /// Hit a deadline.
    pub timed_out: u64,
    /// Exhausted worker memory.
    pub memory_errors: u64,
    /// Could not be exercised.
    pub run_errors: u64,
}

impl StatusCounts {
    /// Record one terminal status.
    pub fn record(&mut self, status: DetectionStatus) {
        match status {
            DetectionStatus::Killed => self.killed += 1,
            DetectionStatus::Survived => self.survived += 1,
            DetectionStatus::TimedOut => self.timed_out += 1,
            DetectionStatus::MemoryError => self.memory_errors += 1,
            DetectionStatus::RunError => self.run_errors += 1,
            DetectionStatus::NotStarted | DetectionStatus::Running => {}
        }
    }

    /// Sum of all counts.
    pub fn total(&self) -> u64 {
        self.killed + self.survived + self.timed_out + self.memory_errors + self.run_errors
    }

    /// Mutants the suite is credited with detecting.
    pub fn detected(&self) -> u64 {
        self.killed + self.timed_out + self.memory_errors
    }

    /// Add another set of counts onto this one.
    pub fn merge(&mut self, other: &StatusCounts) {
        self.killed += other.killed;
        self.survived += other.survived;
        self.timed_out += other.timed_out;
        self.memory_errors += other.memory_errors;
        self.run_errors += other.run_errors;
    }
}

/// Counts for a single mutation operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Score {
    /// Mutation operator kind.
    pub mutator: String,
    /// Status counts for that operator.
    pub counts: StatusCounts,
}

/// Summary counts for a run or grouping, immutable once aggregation is
/// done and mergeable by summation across parallel sub-runs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationStatistics {
    /// All resolved mutants.
    pub total_mutations: u64,
    /// Killed, timed out or memory-errored mutants.
    pub total_detected: u64,
    /// Mutants every covering test passed against.
    pub total_survived: u64,
    /// Mutants that could not be exercised.
    pub total_errors: u64,
}

impl MutationStatistics {
    /// Mutants that actually ran to a test-based verdict; run errors are
    /// excluded from the percentage denominator.
    pub fn testable(&self) -> u64 {
        self.total_mutations.saturating_sub(self.total_errors)
    }

    /// Detected share of testable mutants, rounded to whole percent.
    ///
    /// An empty mutant set is vacuously fully covered. Single-precision
    /// arithmetic is deliberate: 1999 of 2000 reads 99%, while 2 of 3
    /// reads 67%.
    pub fn percentage_detected(&self) -> u64 {
        let testable = self.testable();
        if testable == 0 {
            return 100;
        }
        if self.total_detected == 0 {
            return 0;
        }
        (100f32 * self.total_detected as f32 / testable as f32).round() as u64
    }

    /// Sum another statistics block onto this one.
    pub fn merge(&mut self, other: &MutationStatistics) {
        self.total_mutations += other.total_mutations;
        self.total_detected += other.total_detected;
        self.total_survived += other.total_survived;
        self.total_errors += other.total_errors;
    }
}

/// Reduces the resolved-mutant stream into per-mutator scores and an
/// overall statistics block.
#[derive(Debug, Default)]
pub struct StatisticsAggregator {
    per_mutator: BTreeMap<String, StatusCounts>,
}

impl StatisticsAggregator {
    /// Empty aggregator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one resolved mutant.
    pub fn record(&mut self, result: &MutantResult) {
        self.per_mutator
            .entry(result.mutant.mutator.clone())
            .or_default()
            .record(result.status);
    }

    /// Fold another aggregator into this one.
    pub fn merge(&mut self, other: StatisticsAggregator) {
        for (mutator, counts) in other.per_mutator {
            self.per_mutator.entry(mutator).or_default().merge(&counts);
        }
    }

    /// Per-mutator scores, ordered by mutator name.
    pub fn scores(&self) -> Vec<Score> {
        self.per_mutator
            .iter()
            .map(|(mutator, counts)| Score {
                mutator: mutator.clone(),
                counts: *counts,
            })
            .collect()
    }

    /// Overall statistics across every mutator.
    pub fn statistics(&self) -> MutationStatistics {
        let mut stats = MutationStatistics::default();
        for counts in self.per_mutator.values() {
            stats.total_mutations += counts.total();
            stats.total_detected += counts.detected();
            stats.total_survived += counts.survived;
            stats.total_errors += counts.run_errors;
        }
        stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutant::MutantDescriptor;

    fn stats(total: u64, detected: u64, survived: u64, errors: u64) -> MutationStatistics {
        MutationStatistics {
            total_mutations: total,
            total_detected: detected,
            total_survived: survived,
            total_errors: errors,
        }
    }

    fn result(id: u64, mutator: &str, status: DetectionStatus) -> MutantResult {
        MutantResult::new(
            MutantDescriptor {
                id,
                class_id: "com.example.Queue".to_string(),
                method_id: "push".to_string(),
                line: id as u32,
                mutator: mutator.to_string(),
                covering_tests: vec!["queue::push_pops".to_string()],
                covering_runtime_ms: 1,
            },
            status,
        )
    }

    #[test]
    fn not_all_killed_is_not_a_hundred_percent() {
        assert_eq!(stats(2000, 1999, 1, 0).percentage_detected(), 99);
    }

    #[test]
    fn all_killed_is_a_hundred_percent() {
        assert_eq!(stats(2000, 2000, 0, 0).percentage_detected(), 100);
    }

    #[test]
    fn no_mutations_is_a_hundred_percent() {
        assert_eq!(stats(0, 0, 0, 0).percentage_detected(), 100);
    }

    #[test]
    fn two_of_three_rounds_up() {
        assert_eq!(stats(3, 2, 1, 0).percentage_detected(), 67);
    }

    #[test]
    fn run_errors_leave_the_denominator() {
        // 2 detected of 2 testable; the errored mutant does not dilute
        assert_eq!(stats(3, 2, 0, 1).percentage_detected(), 100);
        // all errors means nothing was testable
        assert_eq!(stats(4, 0, 0, 4).percentage_detected(), 100);
    }

    #[test]
    fn nothing_detected_is_zero_percent() {
        assert_eq!(stats(10, 0, 10, 0).percentage_detected(), 0);
    }

    #[test]
    fn aggregator_partitions_counts_by_mutator() {
        let mut aggregator = StatisticsAggregator::new();
        aggregator.record(&result(1, "math", DetectionStatus::Killed));
        aggregator.record(&result(2, "math", DetectionStatus::Survived));
        aggregator.record(&result(3, "negate_conditionals", DetectionStatus::TimedOut));
        aggregator.record(&result(4, "negate_conditionals", DetectionStatus::RunError));

        let scores = aggregator.scores();
        assert_eq!(scores.len(), 2);
        assert_eq!(scores[0].mutator, "math");
        assert_eq!(scores[0].counts.killed, 1);
        assert_eq!(scores[0].counts.survived, 1);
        assert_eq!(scores[1].counts.timed_out, 1);
        assert_eq!(scores[1].counts.run_errors, 1);

        let stats = aggregator.statistics();
        assert_eq!(stats.total_mutations, 4);
        assert_eq!(stats.total_detected, 2);
        assert_eq!(stats.total_survived, 1);
        assert_eq!(stats.total_errors, 1);
        assert_eq!(
            stats.total_detected + stats.total_survived + stats.total_errors,
            stats.total_mutations
        );
    }

    #[test]
    fn merge_sums_counts() {
        let mut left = StatisticsAggregator::new();
        left.record(&result(1, "math", DetectionStatus::Killed));

        let mut right = StatisticsAggregator::new();
        right.record(&result(2, "math", DetectionStatus::Killed));
        right.record(&result(3, "returns", DetectionStatus::Survived));

        left.merge(right);
        let stats = left.statistics();
        assert_eq!(stats.total_mutations, 3);
        assert_eq!(stats.total_detected, 2);

        let mut a = MutationStatistics::default();
        a.merge(&stats);
        a.merge(&stats);
        assert_eq!(a.total_mutations, 6);
    }
}
