//! Mutant descriptors, detection statuses and resolved results.

use serde::{Deserialize, Serialize};

/// One candidate code alteration, as supplied by the upstream generator.
///
/// The descriptor carries everything the coordinator needs to schedule the
/// mutant: where it lives, which tests cover it, and how long those tests
/// took during the coverage phase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutantDescriptor {
    /// Identifier, unique within one run.
    pub id: u64,
    /// Enclosing class (or module) identifier.
    pub class_id: String,
    /// Enclosing method identifier.
    pub method_id: String,
    /// Source line the mutation targets.
    pub line: u32,
    /// Mutation operator kind, e.g. `"negate_conditionals"`.
    pub mutator: String,
    /// Identifiers of the tests that cover this mutant.
    pub covering_tests: Vec<String>,
    /// Runtime of the covering tests observed by the coverage phase, used
    /// to scale the per-unit deadline.
    #[serde(default)]
    pub covering_runtime_ms: u64,
}

impl MutantDescriptor {
    /// Stable identity of this mutant across runs.
    ///
    /// Derived from the identifying fields rather than stored, so it can
    /// never disagree with them.
    pub fn fingerprint(&self) -> u64 {
        let input = format!(
            "{}|{}|{}|{}",
            self.class_id, self.method_id, self.mutator, self.line
        );
        stable_hash(&input)
    }
}

// FNV-1a 64-bit.
fn stable_hash(input: &str) -> u64 {
    const OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const PRIME: u64 = 0x100000001b3;

    let mut hash = OFFSET_BASIS;
    for b in input.as_bytes() {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// Lifecycle status of a mutant within a run.
///
/// Transitions are monotonic: once terminal, a status is only replaced by
/// an explicit crash retry that resets the mutant to [`NotStarted`]
/// before re-dispatch.
///
/// [`NotStarted`]: DetectionStatus::NotStarted
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionStatus {
    /// Scheduled, not yet dispatched.
    NotStarted,
    /// Dispatched to a worker, no terminal outcome yet.
    Running,
    /// A covering test failed against the mutated code.
    Killed,
    /// Every covering test passed against the mutated code.
    Survived,
    /// A deadline fired before the covering tests resolved.
    TimedOut,
    /// The mutated code exhausted worker memory.
    MemoryError,
    /// The mutant could not be exercised (apply failure, worker crash,
    /// protocol violation, cancellation).
    RunError,
}

impl DetectionStatus {
    /// True once the mutant needs no further scheduling.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::NotStarted | Self::Running)
    }

    /// True if the test suite is credited with noticing the mutation.
    pub fn is_detected(&self) -> bool {
        matches!(self, Self::Killed | Self::TimedOut | Self::MemoryError)
    }
}

impl std::fmt::Display for DetectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            Self::NotStarted => "not_started",
            Self::Running => "running",
            Self::Killed => "killed",
            Self::Survived => "survived",
            Self::TimedOut => "timed_out",
            Self::MemoryError => "memory_error",
            Self::RunError => "run_error",
        };
        f.write_str(text)
    }
}

/// Terminal outcome recorded for one mutant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutantResult {
    /// The mutant this outcome belongs to.
    pub mutant: MutantDescriptor,
    /// Terminal status.
    pub status: DetectionStatus,
    /// Optional free-form detail (failing test, crash reason).
    #[serde(default)]
    pub detail: Option<String>,
}

impl MutantResult {
    /// Build a result without detail.
    pub fn new(mutant: MutantDescriptor, status: DetectionStatus) -> Self {
        Self {
            mutant,
            status,
            detail: None,
        }
    }

    /// Build a result with detail text.
    pub fn with_detail(
        mutant: MutantDescriptor,
        status: DetectionStatus,
        detail: impl Into<String>,
    ) -> Self {
        Self {
            mutant,
            status,
            detail: Some(detail.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_mutant(id: u64, class_id: &str) -> MutantDescriptor {
        MutantDescriptor {
            id,
            class_id: class_id.to_string(),
            method_id: "compute".to_string(),
            line: 42,
            mutator: "negate_conditionals".to_string(),
            covering_tests: vec!["tests::compute_works".to_string()],
            covering_runtime_ms: 25,
        }
    }

    #[test]
    fn fingerprint_is_stable_across_calls() {
        let a = test_mutant(1, "com.example.Account");
        let b = test_mutant(2, "com.example.Account");
        // id and covering tests do not participate in the fingerprint
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_distinguishes_location_and_operator() {
        let base = test_mutant(1, "com.example.Account");

        let mut other_class = base.clone();
        other_class.class_id = "com.example.Ledger".to_string();
        assert_ne!(base.fingerprint(), other_class.fingerprint());

        let mut other_line = base.clone();
        other_line.line = 43;
        assert_ne!(base.fingerprint(), other_line.fingerprint());

        let mut other_mutator = base.clone();
        other_mutator.mutator = "math".to_string();
        assert_ne!(base.fingerprint(), other_mutator.fingerprint());
    }

    #[test]
    fn terminal_and_detected_classification() {
        assert!(!DetectionStatus::NotStarted.is_terminal());
        assert!(!DetectionStatus::Running.is_terminal());
        for status in [
            DetectionStatus::Killed,
            DetectionStatus::Survived,
            DetectionStatus::TimedOut,
            DetectionStatus::MemoryError,
            DetectionStatus::RunError,
        ] {
            assert!(status.is_terminal());
        }

        assert!(DetectionStatus::Killed.is_detected());
        assert!(DetectionStatus::TimedOut.is_detected());
        assert!(DetectionStatus::MemoryError.is_detected());
        assert!(!DetectionStatus::Survived.is_detected());
        assert!(!DetectionStatus::RunError.is_detected());
    }

    #[test]
    fn descriptor_json_roundtrip() {
        let mutant = test_mutant(7, "com.example.Account");
        let json = serde_json::to_string(&mutant).expect("descriptor should serialize");
        let decoded: MutantDescriptor =
            serde_json::from_str(&json).expect("descriptor should deserialize");
        assert_eq!(mutant, decoded);
    }
}
