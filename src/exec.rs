//! Command-backed test execution.
//!
//! Runs one configured command per covering test, with the mutant's
//! coordinates exported through `GAUNTLET_*` environment variables so an
//! external harness can apply the transformation before running the
//! test. Process-per-test keeps mutants from leaking state into each
//! other, so [`TestExecutor::reset`] has nothing left to tear down.

use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use tracing::debug;

use crate::mutant::{DetectionStatus, MutantDescriptor};
use crate::worker::{ApplyFailure, MutantVerdict, TestExecutor};

// 128 + SIGKILL, the usual kernel OOM-killer signature.
const OOM_EXIT_CODE: i32 = 137;

/// [`TestExecutor`] that shells out once per covering test.
pub struct CommandTestExecutor {
    program: String,
    args: Vec<String>,
    work_dir: Option<PathBuf>,
    per_test_timeout: Duration,
}

impl CommandTestExecutor {
    /// Executor for `program` with fixed leading `args`; the covering
    /// test id is appended as the final argument of every invocation.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            work_dir: None,
            per_test_timeout: Duration::from_secs(30),
        }
    }

    /// Set the working directory for spawned commands.
    pub fn with_work_dir(mut self, work_dir: impl Into<PathBuf>) -> Self {
        self.work_dir = Some(work_dir.into());
        self
    }

    /// Set the local per-test timeout.
    pub fn with_per_test_timeout(mut self, per_test_timeout: Duration) -> Self {
        self.per_test_timeout = per_test_timeout;
        self
    }

    fn spawn_test(
        &self,
        mutant: &MutantDescriptor,
        test_id: &str,
    ) -> Result<std::process::Child, ApplyFailure> {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .arg(test_id)
            .env("GAUNTLET_MUTANT_ID", mutant.id.to_string())
            .env("GAUNTLET_CLASS", &mutant.class_id)
            .env("GAUNTLET_METHOD", &mutant.method_id)
            .env("GAUNTLET_LINE", mutant.line.to_string())
            .env("GAUNTLET_MUTATOR", &mutant.mutator)
            .env("GAUNTLET_TEST", test_id)
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = &self.work_dir {
            cmd.current_dir(dir);
        }
        cmd.spawn()
            .map_err(|err| ApplyFailure(format!("failed to spawn {}: {err}", self.program)))
    }

    /// Wait for the child, killing it when the local timeout expires.
    fn await_outcome(&self, mut child: std::process::Child) -> TestOutcome {
        let start = Instant::now();
        loop {
            match child.try_wait() {
                Ok(Some(status)) => {
                    if status.success() {
                        return TestOutcome::Passed;
                    }
                    if is_memory_exit(&status) {
                        return TestOutcome::OutOfMemory;
                    }
                    return TestOutcome::Failed;
                }
                Ok(None) => {
                    if start.elapsed() > self.per_test_timeout {
                        let _ = child.kill();
                        let _ = child.wait();
                        return TestOutcome::TimedOut;
                    }
                    std::thread::sleep(Duration::from_millis(10));
                }
                Err(_) => return TestOutcome::Failed,
            }
        }
    }
}

enum TestOutcome {
    Passed,
    Failed,
    TimedOut,
    OutOfMemory,
}

fn is_memory_exit(status: &std::process::ExitStatus) -> bool {
    if status.code() == Some(OOM_EXIT_CODE) {
        return true;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if status.signal() == Some(9) {
            return true;
        }
    }
    false
}

impl TestExecutor for CommandTestExecutor {
    fn run_mutant(&mut self, mutant: &MutantDescriptor) -> Result<MutantVerdict, ApplyFailure> {
        for test_id in &mutant.covering_tests {
            debug!(mutant = mutant.id, test = %test_id, "running covering test");
            let child = self.spawn_test(mutant, test_id)?;
            match self.await_outcome(child) {
                TestOutcome::Passed => {}
                TestOutcome::Failed => {
                    return Ok(MutantVerdict::with_detail(
                        DetectionStatus::Killed,
                        test_id.clone(),
                    ));
                }
                TestOutcome::TimedOut => {
                    return Ok(MutantVerdict::with_detail(
                        DetectionStatus::TimedOut,
                        test_id.clone(),
                    ));
                }
                TestOutcome::OutOfMemory => {
                    return Ok(MutantVerdict::with_detail(
                        DetectionStatus::MemoryError,
                        test_id.clone(),
                    ));
                }
            }
        }
        Ok(MutantVerdict::new(DetectionStatus::Survived))
    }
}
