//! Child-process worker connections over framed stdio pipes.

use std::io::BufReader;
use std::process::{Child, ChildStdin, Command, Stdio};
use std::sync::mpsc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::coordinator::{LaunchError, RecvFailure, WorkerConnection, WorkerFactory, WorkerLost};
use crate::group::MutationUnit;
use crate::protocol::{CoordinatorRequest, WorkerReply, read_message, write_message};

const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

/// Program and arguments used to start a worker process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerCommand {
    /// Executable to spawn.
    pub program: String,
    /// Arguments passed to every worker.
    pub args: Vec<String>,
}

impl WorkerCommand {
    /// Command for `program` with the given arguments.
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
        }
    }
}

/// Spawns worker processes wired for the framed stdio protocol.
pub struct ProcessWorkerFactory {
    command: WorkerCommand,
}

impl ProcessWorkerFactory {
    /// Factory spawning `command` for each pool slot.
    pub fn new(command: WorkerCommand) -> Self {
        Self { command }
    }
}

impl WorkerFactory for ProcessWorkerFactory {
    fn launch(&self) -> Result<Box<dyn WorkerConnection>, LaunchError> {
        let mut child = Command::new(&self.command.program)
            .args(&self.command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .spawn()
            .map_err(|err| {
                LaunchError(format!("failed to spawn {}: {err}", self.command.program))
            })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| LaunchError("worker stdin was not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LaunchError("worker stdout was not piped".to_string()))?;

        // Decode frames on a dedicated thread so deadline waits can use
        // channel timeouts; a decode failure or EOF drops the sender and
        // the coordinator observes the disconnect as a crash.
        let (sender, receiver) = mpsc::channel::<WorkerReply>();
        let reader = std::thread::spawn(move || {
            let mut stdout = BufReader::new(stdout);
            loop {
                match read_message::<_, WorkerReply>(&mut stdout) {
                    Ok(reply) => {
                        if sender.send(reply).is_err() {
                            return;
                        }
                    }
                    Err(err) => {
                        if !err.is_clean_close() {
                            warn!(error = %err, "worker stream ended abnormally");
                        }
                        return;
                    }
                }
            }
        });

        debug!(pid = child.id(), "worker process started");
        Ok(Box::new(ProcessWorker {
            child,
            stdin: Some(stdin),
            receiver,
            reader: Some(reader),
        }))
    }
}

/// One live worker process.
pub struct ProcessWorker {
    child: Child,
    stdin: Option<ChildStdin>,
    receiver: mpsc::Receiver<WorkerReply>,
    reader: Option<JoinHandle<()>>,
}

impl ProcessWorker {
    fn send(&mut self, request: &CoordinatorRequest) -> Result<(), WorkerLost> {
        let stdin = self
            .stdin
            .as_mut()
            .ok_or_else(|| WorkerLost("worker stdin already closed".to_string()))?;
        write_message(stdin, request).map_err(|err| WorkerLost(err.to_string()))
    }

    fn reap(&mut self) {
        let _ = self.child.wait();
        if let Some(reader) = self.reader.take() {
            let _ = reader.join();
        }
    }
}

impl WorkerConnection for ProcessWorker {
    fn dispatch(&mut self, unit: &MutationUnit) -> Result<(), WorkerLost> {
        self.send(&CoordinatorRequest::DispatchUnit {
            unit_id: unit.id,
            mutants: unit.mutants.clone(),
        })
    }

    fn recv(&mut self, timeout: Duration) -> Result<WorkerReply, RecvFailure> {
        match self.receiver.recv_timeout(timeout) {
            Ok(reply) => Ok(reply),
            Err(mpsc::RecvTimeoutError::Timeout) => Err(RecvFailure::TimedOut),
            Err(mpsc::RecvTimeoutError::Disconnected) => {
                Err(RecvFailure::Lost("worker process exited".to_string()))
            }
        }
    }

    fn shutdown(&mut self) {
        if self.send(&CoordinatorRequest::Shutdown).is_ok() {
            // closing stdin unblocks a worker waiting on the next frame
            drop(self.stdin.take());
            let deadline = Instant::now() + SHUTDOWN_GRACE;
            while Instant::now() < deadline {
                match self.child.try_wait() {
                    Ok(Some(_)) => {
                        self.reap();
                        return;
                    }
                    Ok(None) => std::thread::sleep(Duration::from_millis(10)),
                    Err(_) => break,
                }
            }
        }
        self.kill();
    }

    fn kill(&mut self) {
        let _ = self.child.kill();
        self.reap();
    }
}

impl Drop for ProcessWorker {
    fn drop(&mut self) {
        let _ = self.child.kill();
        self.reap();
    }
}
