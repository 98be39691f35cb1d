//! Incremental-run history: remembered terminal statuses by fingerprint.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::group::MutationUnit;
use crate::mutant::{DetectionStatus, MutantDescriptor, MutantResult};

/// History layer errors.
#[derive(Debug, Error)]
pub enum HistoryError {
    /// IO failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// Entry could not be serialized.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Persisted mapping from mutant fingerprint to last terminal status.
///
/// Implementations must tolerate concurrent writers; last-write-wins is
/// acceptable because a fingerprint's value is idempotent for a fixed
/// code and test state.
pub trait HistoryStore: Send + Sync {
    /// Remembered terminal status for `fingerprint`, if any.
    fn get(&self, fingerprint: u64) -> Result<Option<DetectionStatus>, HistoryError>;

    /// Record a terminal status for `fingerprint`.
    fn put(&self, fingerprint: u64, status: DetectionStatus) -> Result<(), HistoryError>;

    /// Forget `fingerprint`.
    fn invalidate(&self, fingerprint: u64) -> Result<(), HistoryError>;
}

/// Collaborator that decides whether a remembered status is still valid
/// for a mutant, i.e. neither the mutated code nor its covering tests
/// changed since the status was recorded.
pub trait StalenessCheck: Send + Sync {
    /// True when the remembered status for `mutant` may be reused.
    fn is_current(&self, mutant: &MutantDescriptor) -> bool;
}

/// Trusts the upstream generator to have invalidated changed fingerprints.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeUnchanged;

impl StalenessCheck for AssumeUnchanged {
    fn is_current(&self, _mutant: &MutantDescriptor) -> bool {
        true
    }
}

/// Treats every remembered status as stale, disabling reuse.
#[derive(Debug, Default, Clone, Copy)]
pub struct AssumeStale;

impl StalenessCheck for AssumeStale {
    fn is_current(&self, _mutant: &MutantDescriptor) -> bool {
        false
    }
}

/// Volatile store, used in tests and as a default when no path is given.
#[derive(Debug, Default)]
pub struct InMemoryHistory {
    entries: Mutex<HashMap<u64, DetectionStatus>>,
}

impl InMemoryHistory {
    /// Empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

impl HistoryStore for InMemoryHistory {
    fn get(&self, fingerprint: u64) -> Result<Option<DetectionStatus>, HistoryError> {
        Ok(self
            .entries
            .lock()
            .expect("history entries mutex should lock")
            .get(&fingerprint)
            .copied())
    }

    fn put(&self, fingerprint: u64, status: DetectionStatus) -> Result<(), HistoryError> {
        self.entries
            .lock()
            .expect("history entries mutex should lock")
            .insert(fingerprint, status);
        Ok(())
    }

    fn invalidate(&self, fingerprint: u64) -> Result<(), HistoryError> {
        self.entries
            .lock()
            .expect("history entries mutex should lock")
            .remove(&fingerprint);
        Ok(())
    }
}

/// One line of the on-disk history log.
#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "entry", rename_all = "snake_case")]
enum HistoryEntry {
    Record {
        fingerprint: u64,
        status: DetectionStatus,
    },
    Tombstone {
        fingerprint: u64,
    },
}

/// Append-only JSONL history store.
///
/// Each `put` appends a record line and each `invalidate` a tombstone;
/// the net mapping is rebuilt by replaying the log on open. Malformed
/// lines are counted and skipped so a torn tail from a killed run never
/// poisons later runs.
pub struct JsonFileHistory {
    path: PathBuf,
    inner: Mutex<HashMap<u64, DetectionStatus>>,
}

impl JsonFileHistory {
    /// Open (or create) the log at `path` and replay it.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, HistoryError> {
        let path = path.into();
        let mut entries = HashMap::new();
        let mut malformed = 0usize;

        match std::fs::File::open(&path) {
            Ok(file) => {
                for line in BufReader::new(file).lines() {
                    let line = line?;
                    if line.trim().is_empty() {
                        continue;
                    }
                    match serde_json::from_str::<HistoryEntry>(&line) {
                        Ok(HistoryEntry::Record {
                            fingerprint,
                            status,
                        }) => {
                            entries.insert(fingerprint, status);
                        }
                        Ok(HistoryEntry::Tombstone { fingerprint }) => {
                            entries.remove(&fingerprint);
                        }
                        Err(_) => malformed += 1,
                    }
                }
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }

        if malformed > 0 {
            warn!(path = %path.display(), malformed, "ignored malformed history lines");
        }

        Ok(Self {
            path,
            inner: Mutex::new(entries),
        })
    }

    fn append(&self, entry: &HistoryEntry) -> Result<(), HistoryError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let json = serde_json::to_string(entry)?;
        file.write_all(json.as_bytes())?;
        file.write_all(b"\n")?;
        file.flush()?;
        Ok(())
    }

    /// Path of the backing log.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl HistoryStore for JsonFileHistory {
    fn get(&self, fingerprint: u64) -> Result<Option<DetectionStatus>, HistoryError> {
        Ok(self
            .inner
            .lock()
            .expect("history map mutex should lock")
            .get(&fingerprint)
            .copied())
    }

    fn put(&self, fingerprint: u64, status: DetectionStatus) -> Result<(), HistoryError> {
        self.append(&HistoryEntry::Record {
            fingerprint,
            status,
        })?;
        self.inner
            .lock()
            .expect("history map mutex should lock")
            .insert(fingerprint, status);
        Ok(())
    }

    fn invalidate(&self, fingerprint: u64) -> Result<(), HistoryError> {
        self.append(&HistoryEntry::Tombstone { fingerprint })?;
        self.inner
            .lock()
            .expect("history map mutex should lock")
            .remove(&fingerprint);
        Ok(())
    }
}

/// Outcome of the pre-dispatch history pass.
#[derive(Debug)]
pub struct FilterOutcome {
    /// Mutants resolved from remembered statuses, never dispatched.
    pub resolved: Vec<MutantResult>,
    /// Units that still need a worker; fully short-circuited units are gone.
    pub remaining: Vec<MutationUnit>,
    /// True once a store read failed and the filter fell back to
    /// pass-through for the rest of the run.
    pub store_degraded: bool,
}

/// Short-circuit mutants whose remembered status is still valid.
///
/// Purely an optimization: a degraded or empty store simply dispatches
/// everything.
pub fn filter_units(
    units: Vec<MutationUnit>,
    store: &dyn HistoryStore,
    staleness: &dyn StalenessCheck,
) -> FilterOutcome {
    let mut resolved = Vec::new();
    let mut remaining = Vec::new();
    let mut store_degraded = false;

    for unit in units {
        let mut kept = Vec::with_capacity(unit.mutants.len());
        for mutant in unit.mutants {
            if store_degraded {
                kept.push(mutant);
                continue;
            }
            let remembered = match store.get(mutant.fingerprint()) {
                Ok(remembered) => remembered,
                Err(err) => {
                    warn!(error = %err, "history store unavailable, dispatching all mutants");
                    store_degraded = true;
                    kept.push(mutant);
                    continue;
                }
            };
            match remembered {
                Some(status) if status.is_terminal() && staleness.is_current(&mutant) => {
                    resolved.push(MutantResult::with_detail(
                        mutant,
                        status,
                        "reused from history",
                    ));
                }
                _ => kept.push(mutant),
            }
        }
        if !kept.is_empty() {
            remaining.push(MutationUnit {
                id: unit.id,
                mutants: kept,
                retried: unit.retried,
            });
        }
    }

    FilterOutcome {
        resolved,
        remaining,
        store_degraded,
    }
}
