//! Run configuration.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// Configuration for one mutation analysis run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    /// Maximum number of mutants per execution unit. Zero is treated as 1.
    pub max_unit_size: usize,
    /// Worker pool capacity. Defaults to the host's available parallelism.
    pub workers: usize,
    /// Flat component of the per-unit deadline, in milliseconds.
    pub base_timeout_ms: u64,
    /// Multiplier applied to a unit's observed coverage runtime when
    /// computing its deadline.
    pub timeout_factor: f64,
    /// Units a worker may serve before it is retired and replaced.
    pub max_worker_reuse: u32,
    /// Re-dispatch the unresolved remainder of a crashed unit once.
    pub retry_on_crash: bool,
    /// Attempts before a worker launch failure aborts the run.
    pub launch_retries: u32,
    /// Grouping strategy name, resolved against the component registry.
    pub grouper: String,
    /// Optional path for the on-disk history store.
    pub history_path: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let workers = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            max_unit_size: 10,
            workers,
            base_timeout_ms: 4_000,
            timeout_factor: 1.25,
            max_worker_reuse: 64,
            retry_on_crash: true,
            launch_retries: 3,
            grouper: "by-class".to_string(),
            history_path: None,
        }
    }
}

impl EngineConfig {
    /// Set maximum unit size.
    pub fn with_max_unit_size(mut self, max_unit_size: usize) -> Self {
        self.max_unit_size = max_unit_size;
        self
    }

    /// Set worker pool capacity.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Set the flat deadline component.
    pub fn with_base_timeout_ms(mut self, base_timeout_ms: u64) -> Self {
        self.base_timeout_ms = base_timeout_ms;
        self
    }

    /// Set the coverage-runtime deadline multiplier.
    pub fn with_timeout_factor(mut self, timeout_factor: f64) -> Self {
        self.timeout_factor = timeout_factor;
        self
    }

    /// Set how many units a worker serves before retirement.
    pub fn with_max_worker_reuse(mut self, max_worker_reuse: u32) -> Self {
        self.max_worker_reuse = max_worker_reuse.max(1);
        self
    }

    /// Enable or disable the single crash retry.
    pub fn with_retry_on_crash(mut self, retry_on_crash: bool) -> Self {
        self.retry_on_crash = retry_on_crash;
        self
    }

    /// Set launch retry attempts.
    pub fn with_launch_retries(mut self, launch_retries: u32) -> Self {
        self.launch_retries = launch_retries;
        self
    }

    /// Select a grouping strategy by registry name.
    pub fn with_grouper(mut self, grouper: impl Into<String>) -> Self {
        self.grouper = grouper.into();
        self
    }

    /// Set the on-disk history store path.
    pub fn with_history_path(mut self, history_path: impl Into<PathBuf>) -> Self {
        self.history_path = Some(history_path.into());
        self
    }

    /// Deadline for a unit whose covering tests ran for
    /// `coverage_runtime_ms` during the coverage phase.
    pub fn unit_deadline_ms(&self, coverage_runtime_ms: u64) -> u64 {
        let scaled = (coverage_runtime_ms as f64 * self.timeout_factor).ceil() as u64;
        self.base_timeout_ms.saturating_add(scaled)
    }
}
