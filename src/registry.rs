//! Explicit capability registry.
//!
//! Pluggable pieces (grouping strategies, result listeners, history
//! store, staleness check) are assembled into one table at startup and
//! passed into the pipeline by construction. There is no runtime
//! scanning or ambient lookup: what is not registered does not exist.

use std::collections::BTreeMap;

use crate::group::{ClassScopedGrouper, FixedSizeGrouper, MutationGrouper};
use crate::history::{AssumeUnchanged, HistoryStore, StalenessCheck};
use crate::mutant::MutantResult;
use crate::stats::MutationStatistics;

/// Observer of run progress and outcome.
pub trait ResultListener {
    /// Called once before dispatch with the mutant count.
    fn run_started(&mut self, total_mutants: usize) {
        let _ = total_mutants;
    }

    /// Called for every resolved mutant.
    fn mutant_resolved(&mut self, result: &MutantResult);

    /// Called once with the final statistics.
    fn run_finished(&mut self, statistics: &MutationStatistics) {
        let _ = statistics;
    }
}

/// Capability table consumed by the analysis pipeline.
pub struct ComponentRegistry {
    groupers: BTreeMap<String, Box<dyn MutationGrouper>>,
    listeners: Vec<Box<dyn ResultListener>>,
    history: Option<Box<dyn HistoryStore>>,
    staleness: Box<dyn StalenessCheck>,
}

impl Default for ComponentRegistry {
    /// Registry with the built-in groupers, no listeners, no history and
    /// a staleness check that trusts upstream invalidation.
    fn default() -> Self {
        let mut registry = Self {
            groupers: BTreeMap::new(),
            listeners: Vec::new(),
            history: None,
            staleness: Box::new(AssumeUnchanged),
        };
        registry.register_grouper("by-class", Box::new(ClassScopedGrouper));
        registry.register_grouper("fixed", Box::new(FixedSizeGrouper));
        registry
    }
}

impl ComponentRegistry {
    /// Registry with the built-in capabilities.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register (or replace) a grouping strategy under `name`.
    pub fn register_grouper(&mut self, name: impl Into<String>, grouper: Box<dyn MutationGrouper>) {
        self.groupers.insert(name.into(), grouper);
    }

    /// Look up a grouping strategy.
    pub fn grouper(&self, name: &str) -> Option<&dyn MutationGrouper> {
        self.groupers.get(name).map(Box::as_ref)
    }

    /// Registered grouper names, sorted.
    pub fn grouper_names(&self) -> Vec<&str> {
        self.groupers.keys().map(String::as_str).collect()
    }

    /// Add a result listener.
    pub fn register_listener(&mut self, listener: Box<dyn ResultListener>) {
        self.listeners.push(listener);
    }

    /// Mutable access to the listeners, in registration order.
    pub fn listeners_mut(&mut self) -> &mut [Box<dyn ResultListener>] {
        &mut self.listeners
    }

    /// Install a history store.
    pub fn set_history(&mut self, history: Box<dyn HistoryStore>) {
        self.history = Some(history);
    }

    /// The installed history store, if any.
    pub fn history(&self) -> Option<&dyn HistoryStore> {
        self.history.as_deref()
    }

    /// Replace the staleness check.
    pub fn set_staleness_check(&mut self, staleness: Box<dyn StalenessCheck>) {
        self.staleness = staleness;
    }

    /// The active staleness check.
    pub fn staleness_check(&self) -> &dyn StalenessCheck {
        self.staleness.as_ref()
    }
}
