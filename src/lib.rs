//! # gauntlet
//!
//! `gauntlet` is a mutation-testing coordinator organized around:
//! - `group`: partitioning mutants into bounded execution units
//! - `history`: incremental-run cache keyed by mutant fingerprint
//! - `protocol` / `process`: framed stdio transport to worker processes
//! - `worker` / `exec`: the worker-side loop and covering-test execution
//! - `coordinator`: the bounded pool, deadlines and crash recovery
//! - `stats`: detection statistics and per-mutator scores
//! - `analysis`: the end-to-end pipeline wired through an explicit
//!   [`registry::ComponentRegistry`]
//!
//! Mutation operators, coverage computation and report rendering belong
//! to the surrounding toolchain; `gauntlet` consumes descriptors and
//! hands statistics back.

#![warn(missing_docs)]

pub mod analysis;
pub mod config;
pub mod coordinator;
pub mod exec;
pub mod group;
pub mod history;
pub mod mutant;
pub mod process;
pub mod protocol;
pub mod registry;
pub mod stats;
pub mod worker;

pub use analysis::{AnalysisError, AnalysisOutcome, run_analysis};
pub use config::EngineConfig;
pub use coordinator::{Coordinator, CoordinatorError, WorkerConnection, WorkerFactory};
pub use group::{ClassScopedGrouper, FixedSizeGrouper, MutationGrouper, MutationUnit};
pub use history::{HistoryStore, InMemoryHistory, JsonFileHistory, StalenessCheck};
pub use mutant::{DetectionStatus, MutantDescriptor, MutantResult};
pub use registry::{ComponentRegistry, ResultListener};
pub use stats::{MutationStatistics, Score, StatisticsAggregator};
