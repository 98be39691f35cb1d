//! Worker-process side: apply mutants one at a time and report back.

use std::io::{Read, Write};

use thiserror::Error;
use tracing::debug;

use crate::mutant::{DetectionStatus, MutantDescriptor};
use crate::protocol::{
    CoordinatorRequest, ProtocolError, WorkerReply, read_message, write_message,
};

/// Terminal verdict produced by a [`TestExecutor`] for one mutant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MutantVerdict {
    /// One of the terminal statuses.
    pub status: DetectionStatus,
    /// Optional detail, e.g. the first failing test.
    pub detail: Option<String>,
}

impl MutantVerdict {
    /// Verdict without detail.
    pub fn new(status: DetectionStatus) -> Self {
        Self {
            status,
            detail: None,
        }
    }

    /// Verdict with detail text.
    pub fn with_detail(status: DetectionStatus, detail: impl Into<String>) -> Self {
        Self {
            status,
            detail: Some(detail.into()),
        }
    }
}

/// The mutant's transformation could not be applied or loaded. No tests
/// ran, so only this mutant is affected.
#[derive(Debug, Error)]
#[error("{0}")]
pub struct ApplyFailure(pub String);

/// Execution seam: applies one mutant and runs exactly its covering
/// tests.
///
/// Implementations own the isolation contract between mutants sharing a
/// worker: [`reset`] is called after every mutant and must tear down
/// whatever mutable state the previous execution may have left behind.
/// That teardown is best-effort for global state the harness cannot see,
/// which is why workers are additionally retired after a bounded number
/// of units.
///
/// [`reset`]: TestExecutor::reset
pub trait TestExecutor {
    /// Apply `mutant` and run its covering tests to a terminal verdict.
    fn run_mutant(&mut self, mutant: &MutantDescriptor) -> Result<MutantVerdict, ApplyFailure>;

    /// Tear down state left behind by the previous mutant.
    fn reset(&mut self) {}
}

/// Worker loop failures that warrant a non-zero exit.
#[derive(Debug, Error)]
pub enum WorkerLoopError {
    /// Transport failure on the coordinator connection.
    #[error("transport error: {0}")]
    Transport(#[from] ProtocolError),
}

/// Serve dispatch requests until `Shutdown` or a clean close.
///
/// Each mutant's result is framed and flushed the moment it resolves so
/// the coordinator can record partial progress even if this process dies
/// later in the unit.
pub fn serve<R, W, E>(reader: &mut R, writer: &mut W, executor: &mut E) -> Result<(), WorkerLoopError>
where
    R: Read,
    W: Write,
    E: TestExecutor,
{
    loop {
        let request: CoordinatorRequest = match read_message(reader) {
            Ok(request) => request,
            Err(err) if err.is_clean_close() => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        match request {
            CoordinatorRequest::DispatchUnit { unit_id, mutants } => {
                debug!(unit_id, mutants = mutants.len(), "unit received");
                for mutant in &mutants {
                    let reply = match executor.run_mutant(mutant) {
                        Ok(verdict) => WorkerReply::MutantResult {
                            mutant_id: mutant.id,
                            status: verdict.status,
                            detail: verdict.detail,
                        },
                        Err(failure) => WorkerReply::MutantResult {
                            mutant_id: mutant.id,
                            status: DetectionStatus::RunError,
                            detail: Some(failure.to_string()),
                        },
                    };
                    write_message(writer, &reply)?;
                    executor.reset();
                }
                write_message(writer, &WorkerReply::UnitComplete { unit_id })?;
            }
            CoordinatorRequest::Shutdown => return Ok(()),
        }
    }
}
