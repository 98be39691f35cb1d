//! End-to-end pipeline: descriptors → units → history filter →
//! coordinator → statistics.

use std::collections::BTreeSet;
use std::sync::atomic::AtomicBool;
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::info;

use crate::config::EngineConfig;
use crate::coordinator::{Coordinator, CoordinatorError, WorkerFactory};
use crate::history::filter_units;
use crate::mutant::{MutantDescriptor, MutantResult};
use crate::registry::ComponentRegistry;
use crate::stats::{MutationStatistics, Score, StatisticsAggregator};

/// Pipeline errors. Only input defects and pool sizing abort a run.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// The generator produced no mutants at all.
    #[error("no mutations found; nothing to analyse")]
    NoMutationsFound,
    /// Two descriptors share an id; results could not be attributed.
    #[error("duplicate mutant id {0} in input")]
    DuplicateMutantId(u64),
    /// The configured grouping strategy is not registered.
    #[error("unknown grouper {0:?}")]
    UnknownGrouper(String),
    /// The worker pool could not be sized.
    #[error(transparent)]
    Coordinator(#[from] CoordinatorError),
}

/// Everything a run produced.
#[derive(Debug)]
pub struct AnalysisOutcome {
    /// One terminal result per input mutant.
    pub results: Vec<MutantResult>,
    /// Overall statistics.
    pub statistics: MutationStatistics,
    /// Per-mutator scores.
    pub scores: Vec<Score>,
    /// Mutants resolved from history without dispatch.
    pub skipped_by_history: usize,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
}

/// Analyse `descriptors` to completion.
///
/// Every input mutant ends with exactly one terminal status: resolved
/// from history, reported by a worker, or degraded to a run error by
/// the coordinator's failure handling.
pub fn run_analysis(
    config: &EngineConfig,
    registry: &mut ComponentRegistry,
    factory: &dyn WorkerFactory,
    descriptors: Vec<MutantDescriptor>,
    cancel: Option<&AtomicBool>,
) -> Result<AnalysisOutcome, AnalysisError> {
    let started = Instant::now();

    if descriptors.is_empty() {
        return Err(AnalysisError::NoMutationsFound);
    }
    let mut seen = BTreeSet::new();
    for descriptor in &descriptors {
        if !seen.insert(descriptor.id) {
            return Err(AnalysisError::DuplicateMutantId(descriptor.id));
        }
    }
    let total = descriptors.len();

    let grouper = registry
        .grouper(&config.grouper)
        .ok_or_else(|| AnalysisError::UnknownGrouper(config.grouper.clone()))?;
    let units = grouper.group(descriptors, config.max_unit_size);
    info!(mutants = total, units = units.len(), "mutants grouped");

    for listener in registry.listeners_mut() {
        listener.run_started(total);
    }

    let (mut results, remaining) = match registry.history() {
        Some(store) => {
            let outcome = filter_units(units, store, registry.staleness_check());
            info!(
                skipped = outcome.resolved.len(),
                degraded = outcome.store_degraded,
                "history filter applied"
            );
            (outcome.resolved, outcome.remaining)
        }
        None => (Vec::new(), units),
    };
    let skipped_by_history = results.len();

    if !remaining.is_empty() {
        let mut coordinator = Coordinator::new(config, factory);
        if let Some(history) = registry.history() {
            coordinator = coordinator.with_history(history);
        }
        if let Some(cancel) = cancel {
            coordinator = coordinator.with_cancel_flag(cancel);
        }
        results.extend(coordinator.run(remaining)?);
    }

    let mut aggregator = StatisticsAggregator::new();
    for result in &results {
        aggregator.record(result);
        for listener in registry.listeners_mut() {
            listener.mutant_resolved(result);
        }
    }
    let statistics = aggregator.statistics();
    for listener in registry.listeners_mut() {
        listener.run_finished(&statistics);
    }

    Ok(AnalysisOutcome {
        results,
        statistics,
        scores: aggregator.scores(),
        skipped_by_history,
        elapsed: started.elapsed(),
    })
}
