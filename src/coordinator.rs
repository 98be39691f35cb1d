//! Dispatch of mutation units across a bounded pool of worker processes.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::group::MutationUnit;
use crate::history::HistoryStore;
use crate::mutant::{DetectionStatus, MutantResult};
use crate::protocol::WorkerReply;

/// A worker could not be started.
#[derive(Debug, Error)]
#[error("worker launch failed: {0}")]
pub struct LaunchError(pub String);

/// The connection to a worker broke before the unit resolved.
#[derive(Debug, Error)]
#[error("worker connection lost: {0}")]
pub struct WorkerLost(pub String);

/// Why a bounded message wait produced no message.
#[derive(Debug)]
pub enum RecvFailure {
    /// The wait expired; the worker may be hung.
    TimedOut,
    /// The worker exited or the connection reset.
    Lost(String),
}

/// One live worker as seen by the coordinator.
///
/// Connections are owned by exactly one pool slot at a time; nothing
/// here is shared across concurrent dispatches.
pub trait WorkerConnection: Send {
    /// Send a unit for execution.
    fn dispatch(&mut self, unit: &MutationUnit) -> Result<(), WorkerLost>;

    /// Wait up to `timeout` for the next worker message.
    fn recv(&mut self, timeout: Duration) -> Result<WorkerReply, RecvFailure>;

    /// Ask the worker to finish and exit, then reap it.
    fn shutdown(&mut self);

    /// Forcibly terminate the worker. Hung workers cannot be asked to
    /// yield, so this is the only cancellation path for a running unit.
    fn kill(&mut self);
}

/// Launches fresh workers for the pool.
pub trait WorkerFactory: Send + Sync {
    /// Start one worker and return its connection.
    fn launch(&self) -> Result<Box<dyn WorkerConnection>, LaunchError>;
}

/// Lifecycle of a pooled worker handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Launch in progress.
    Starting,
    /// Connected and free for a unit.
    Idle,
    /// Executing a unit.
    Busy,
    /// Crashed, killed or retired; replaced lazily on next acquire.
    Dead,
}

/// A pooled worker: connection plus lifecycle bookkeeping.
pub struct WorkerHandle {
    connection: Box<dyn WorkerConnection>,
    state: WorkerState,
    units_served: u32,
}

impl WorkerHandle {
    fn new(connection: Box<dyn WorkerConnection>) -> Self {
        Self {
            connection,
            state: WorkerState::Starting,
            units_served: 0,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> WorkerState {
        self.state
    }

    /// Units this worker has completed successfully.
    pub fn units_served(&self) -> u32 {
        self.units_served
    }

    fn kill(&mut self) {
        self.connection.kill();
        self.state = WorkerState::Dead;
    }

    fn retire(&mut self) {
        self.connection.shutdown();
        self.state = WorkerState::Dead;
    }
}

/// Fatal coordination errors. Everything else degrades to a per-mutant
/// status and the run completes.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// No worker could be started within the configured retry budget.
    #[error("could not size worker pool: {0}")]
    WorkerPoolExhausted(#[source] LaunchError),
}

/// Owns the worker pool and drives every unit to resolution.
pub struct Coordinator<'a> {
    config: &'a EngineConfig,
    factory: &'a dyn WorkerFactory,
    history: Option<&'a dyn HistoryStore>,
    cancel: Option<&'a AtomicBool>,
}

impl<'a> Coordinator<'a> {
    /// Coordinator over `factory` with the given configuration.
    pub fn new(config: &'a EngineConfig, factory: &'a dyn WorkerFactory) -> Self {
        Self {
            config,
            factory,
            history: None,
            cancel: None,
        }
    }

    /// Record every resolved mutant into `history` as it arrives.
    pub fn with_history(mut self, history: &'a dyn HistoryStore) -> Self {
        self.history = Some(history);
        self
    }

    /// Observe `cancel`; once set, still-queued units resolve as run
    /// errors instead of being dispatched.
    pub fn with_cancel_flag(mut self, cancel: &'a AtomicBool) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Drive `units` to resolution and return one terminal result per
    /// mutant.
    ///
    /// Units run concurrently across up to `config.workers` worker
    /// processes; results within a unit arrive in dispatch order, units
    /// complete in any order.
    pub fn run(&self, units: Vec<MutationUnit>) -> Result<Vec<MutantResult>, CoordinatorError> {
        let total: usize = units.iter().map(MutationUnit::len).sum();
        let slots = self.config.workers.clamp(1, units.len().max(1));

        let queue = Mutex::new(VecDeque::from(units));
        let sink: Mutex<Vec<MutantResult>> = Mutex::new(Vec::with_capacity(total));
        let fatal: Mutex<Option<CoordinatorError>> = Mutex::new(None);

        std::thread::scope(|scope| {
            let queue = &queue;
            let sink = &sink;
            let fatal = &fatal;
            for slot in 0..slots {
                scope.spawn(move || self.drive(slot, queue, sink, fatal));
            }
        });

        if let Some(err) = fatal.into_inner().expect("fatal mutex should unlock") {
            return Err(err);
        }

        let results = sink.into_inner().expect("result sink mutex should unlock");
        if results.len() != total {
            warn!(
                expected = total,
                resolved = results.len(),
                "result count mismatch at end of run"
            );
        }
        debug_assert_eq!(results.len(), total);
        Ok(results)
    }

    fn cancelled(&self) -> bool {
        self.cancel.is_some_and(|flag| flag.load(Ordering::SeqCst))
    }

    /// One pool slot: pull units until the queue drains or the run dies.
    fn drive(
        &self,
        slot: usize,
        queue: &Mutex<VecDeque<MutationUnit>>,
        sink: &Mutex<Vec<MutantResult>>,
        fatal: &Mutex<Option<CoordinatorError>>,
    ) {
        let mut handle: Option<WorkerHandle> = None;

        loop {
            if fatal.lock().expect("fatal mutex should lock").is_some() {
                break;
            }
            let Some(unit) = queue
                .lock()
                .expect("unit queue mutex should lock")
                .pop_front()
            else {
                break;
            };

            if self.cancelled() {
                self.resolve_all(
                    &unit,
                    0,
                    sink,
                    DetectionStatus::RunError,
                    "cancelled before dispatch",
                );
                continue;
            }

            let mut worker = match handle.take() {
                Some(worker) if worker.state == WorkerState::Idle => worker,
                _ => match self.launch_worker(slot) {
                    Ok(worker) => worker,
                    Err(err) => {
                        *fatal.lock().expect("fatal mutex should lock") =
                            Some(CoordinatorError::WorkerPoolExhausted(err));
                        break;
                    }
                },
            };

            let usable = self.dispatch_unit(&mut worker, unit, queue, sink);
            if usable && worker.units_served < self.config.max_worker_reuse {
                handle = Some(worker);
            } else if usable {
                debug!(slot, served = worker.units_served, "retiring worker after max reuse");
                worker.retire();
            }
        }

        if let Some(mut worker) = handle {
            worker.retire();
        }
    }

    fn launch_worker(&self, slot: usize) -> Result<WorkerHandle, LaunchError> {
        let attempts = self.config.launch_retries.max(1);
        for attempt in 1..attempts {
            match self.factory.launch() {
                Ok(connection) => {
                    let mut handle = WorkerHandle::new(connection);
                    handle.state = WorkerState::Idle;
                    return Ok(handle);
                }
                Err(err) => {
                    warn!(slot, attempt, error = %err, "worker launch failed, retrying");
                }
            }
        }
        self.factory.launch().map(|connection| {
            let mut handle = WorkerHandle::new(connection);
            handle.state = WorkerState::Idle;
            handle
        })
    }

    /// Run one unit on `worker`. Returns true when the worker survived
    /// and may serve another unit.
    fn dispatch_unit(
        &self,
        worker: &mut WorkerHandle,
        unit: MutationUnit,
        queue: &Mutex<VecDeque<MutationUnit>>,
        sink: &Mutex<Vec<MutantResult>>,
    ) -> bool {
        worker.state = WorkerState::Busy;
        debug!(unit = unit.id, mutants = unit.len(), "dispatching unit");

        if let Err(lost) = worker.connection.dispatch(&unit) {
            worker.kill();
            self.resolve_crash(&unit, 0, queue, sink, &lost.to_string());
            return false;
        }

        let deadline = Instant::now()
            + Duration::from_millis(self.config.unit_deadline_ms(unit.coverage_runtime_ms()));
        let mut resolved = 0usize;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                self.resolve_timeout(worker, &unit, resolved, sink);
                return false;
            }

            match worker.connection.recv(remaining) {
                Ok(WorkerReply::MutantResult {
                    mutant_id,
                    status,
                    detail,
                }) => {
                    let expected = unit.mutants.get(resolved);
                    match expected {
                        Some(mutant) if mutant.id == mutant_id && status.is_terminal() => {
                            let result = MutantResult {
                                mutant: mutant.clone(),
                                status,
                                detail,
                            };
                            self.record(sink, result);
                            resolved += 1;
                        }
                        _ => {
                            warn!(
                                unit = unit.id,
                                mutant_id, "out-of-sequence result, treating as crash"
                            );
                            worker.kill();
                            self.resolve_crash(&unit, resolved, queue, sink, "protocol violation");
                            return false;
                        }
                    }
                }
                Ok(WorkerReply::UnitComplete { unit_id }) => {
                    if unit_id == unit.id && resolved == unit.mutants.len() {
                        worker.state = WorkerState::Idle;
                        worker.units_served += 1;
                        return true;
                    }
                    warn!(
                        unit = unit.id,
                        reported = unit_id,
                        resolved,
                        "premature unit completion, treating as crash"
                    );
                    worker.kill();
                    self.resolve_crash(&unit, resolved, queue, sink, "protocol violation");
                    return false;
                }
                Ok(WorkerReply::WorkerError { reason }) => {
                    worker.kill();
                    self.resolve_crash(&unit, resolved, queue, sink, &reason);
                    return false;
                }
                Err(RecvFailure::TimedOut) => {
                    self.resolve_timeout(worker, &unit, resolved, sink);
                    return false;
                }
                Err(RecvFailure::Lost(reason)) => {
                    // the process is already gone; kill is how the
                    // handle reaps it and records the state
                    worker.kill();
                    self.resolve_crash(&unit, resolved, queue, sink, &reason);
                    return false;
                }
            }
        }
    }

    /// Deadline fired: the mutant in flight is timed out, everything
    /// after it never ran, and the worker cannot be trusted to yield.
    fn resolve_timeout(
        &self,
        worker: &mut WorkerHandle,
        unit: &MutationUnit,
        resolved: usize,
        sink: &Mutex<Vec<MutantResult>>,
    ) {
        warn!(unit = unit.id, resolved, "unit deadline expired, killing worker");
        worker.kill();
        if let Some(mutant) = unit.mutants.get(resolved) {
            self.record(
                sink,
                MutantResult::with_detail(
                    mutant.clone(),
                    DetectionStatus::TimedOut,
                    "unit deadline expired",
                ),
            );
        }
        self.resolve_all(
            unit,
            resolved + 1,
            sink,
            DetectionStatus::RunError,
            "aborted after unit timeout",
        );
    }

    /// Connection failed before the unit completed. The unresolved
    /// remainder is retried once when configured, otherwise it errors.
    fn resolve_crash(
        &self,
        unit: &MutationUnit,
        resolved: usize,
        queue: &Mutex<VecDeque<MutationUnit>>,
        sink: &Mutex<Vec<MutantResult>>,
        reason: &str,
    ) {
        let remainder = &unit.mutants[resolved.min(unit.mutants.len())..];
        if remainder.is_empty() {
            return;
        }

        if self.config.retry_on_crash && !unit.retried {
            warn!(
                unit = unit.id,
                remaining = remainder.len(),
                reason,
                "worker crashed, retrying unresolved remainder once"
            );
            queue
                .lock()
                .expect("unit queue mutex should lock")
                .push_back(MutationUnit {
                    id: unit.id,
                    mutants: remainder.to_vec(),
                    retried: true,
                });
            return;
        }

        warn!(
            unit = unit.id,
            remaining = remainder.len(),
            reason,
            "worker crashed, marking unresolved mutants as run errors"
        );
        self.resolve_all(unit, resolved, sink, DetectionStatus::RunError, reason);
    }

    fn resolve_all(
        &self,
        unit: &MutationUnit,
        from: usize,
        sink: &Mutex<Vec<MutantResult>>,
        status: DetectionStatus,
        detail: &str,
    ) {
        for mutant in unit.mutants.iter().skip(from) {
            self.record(
                sink,
                MutantResult::with_detail(mutant.clone(), status, detail),
            );
        }
    }

    fn record(&self, sink: &Mutex<Vec<MutantResult>>, result: MutantResult) {
        if let Some(history) = self.history {
            // transient infrastructure failures are not worth remembering
            if result.status != DetectionStatus::RunError {
                if let Err(err) = history.put(result.mutant.fingerprint(), result.status) {
                    warn!(error = %err, "history write failed");
                }
            }
        }
        sink.lock()
            .expect("result sink mutex should lock")
            .push(result);
    }
}
