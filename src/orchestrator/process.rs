//! Worker OS processes
//!
//! Each shard runs in a child process started from this binary's hidden
//! `worker` subcommand. The child's stdout is the telemetry pipe (decoded by
//! a pump thread); its stderr is appended to `<shard>.log`.

use crate::channel::{spawn_pump, PumpStats, TelemetrySender};
use crate::config::WorkerArgs;
use crate::error::WorkerError;
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, ExitStatus, Stdio};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Poll interval while waiting for workers to exit on their own
const EXIT_POLL: Duration = Duration::from_millis(50);

/// Control surface a telemetry consumer gets over the running workers
pub trait WorkerControl {
    /// Number of worker processes started
    fn count(&self) -> usize;

    /// Whether every worker has exited
    fn all_exited(&self) -> bool;

    /// Give workers `grace` to exit, then kill the rest
    fn terminate(&self, grace: Duration);
}

/// How one worker process ended
#[derive(Debug, Clone)]
pub struct WorkerExit {
    pub worker_id: String,

    /// `None` when the process could not be waited on
    pub status: Option<ExitStatus>,

    /// Whether the orchestrator killed it
    pub killed: bool,

    pub pump: PumpStats,
}

/// A running worker process and its telemetry pump
#[derive(Debug)]
pub struct WorkerProcess {
    worker_id: String,
    child: Child,
    pump: Option<JoinHandle<PumpStats>>,
    killed: bool,
}

impl WorkerProcess {
    /// Launch `program worker ...` for one shard
    pub fn spawn(
        program: &Path,
        args: &WorkerArgs,
        tx: &TelemetrySender,
    ) -> Result<Self, WorkerError> {
        let spawn_failed = |e: io::Error| WorkerError::SpawnFailed {
            id: args.worker_id.clone(),
            reason: e.to_string(),
        };

        let log = File::create(log_path(&args.shard)).map_err(spawn_failed)?;
        let mut child = Command::new(program)
            .args(args.to_command_args())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::from(log))
            .spawn()
            .map_err(spawn_failed)?;

        let pump = match child.stdout.take() {
            Some(stdout) => spawn_pump(&args.worker_id, stdout, tx.clone()),
            None => Err(io::Error::new(io::ErrorKind::BrokenPipe, "worker stdout not captured")),
        };
        let pump = match pump {
            Ok(pump) => pump,
            Err(e) => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(spawn_failed(e));
            }
        };

        debug!(worker = %args.worker_id, pid = child.id(), shard = %args.shard.display(), "Worker spawned");
        Ok(Self {
            worker_id: args.worker_id.clone(),
            child,
            pump: Some(pump),
            killed: false,
        })
    }

    fn has_exited(&mut self) -> bool {
        match self.child.try_wait() {
            Ok(Some(_)) => true,
            Ok(None) => false,
            Err(e) => {
                warn!(worker = %self.worker_id, error = %e, "Failed to poll worker");
                true
            }
        }
    }

    fn kill(&mut self) {
        if self.has_exited() {
            return;
        }
        match self.child.kill() {
            Ok(()) => {
                self.killed = true;
                info!(worker = %self.worker_id, "Worker killed");
            }
            Err(e) => warn!(worker = %self.worker_id, error = %e, "Failed to kill worker"),
        }
    }

    /// Reap the process and join its pump
    fn wait(mut self) -> WorkerExit {
        let status = match self.child.wait() {
            Ok(status) => Some(status),
            Err(e) => {
                let err = WorkerError::WaitFailed {
                    id: self.worker_id.clone(),
                    reason: e.to_string(),
                };
                warn!(error = %err, "Worker not reaped");
                None
            }
        };

        let pump = match self.pump.take().map(JoinHandle::join) {
            Some(Ok(stats)) => stats,
            Some(Err(_)) => {
                warn!(worker = %self.worker_id, "Telemetry pump panicked");
                PumpStats::default()
            }
            None => PumpStats::default(),
        };

        match status {
            Some(s) if !s.success() && !self.killed => {
                warn!(worker = %self.worker_id, status = %s, "Worker exited abnormally")
            }
            _ => debug!(worker = %self.worker_id, "Worker reaped"),
        }

        WorkerExit {
            worker_id: self.worker_id,
            status,
            killed: self.killed,
            pump,
        }
    }
}

/// All worker processes of a run
#[derive(Debug, Default)]
pub struct WorkerSet {
    procs: Mutex<Vec<WorkerProcess>>,
}

impl WorkerSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, proc: WorkerProcess) {
        self.lock().push(proc);
    }

    /// Kill every worker that is still running
    pub fn kill_all(&self) {
        for proc in self.lock().iter_mut() {
            proc.kill();
        }
    }

    /// Wait for every worker to exit and join every pump
    pub fn wait_all(self) -> Vec<WorkerExit> {
        let procs = self.procs.into_inner().unwrap_or_else(PoisonError::into_inner);
        procs.into_iter().map(WorkerProcess::wait).collect()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<WorkerProcess>> {
        self.procs.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl WorkerControl for WorkerSet {
    fn count(&self) -> usize {
        self.lock().len()
    }

    fn all_exited(&self) -> bool {
        self.lock().iter_mut().all(WorkerProcess::has_exited)
    }

    fn terminate(&self, grace: Duration) {
        let deadline = Instant::now() + grace;
        while Instant::now() < deadline {
            if self.all_exited() {
                return;
            }
            thread::sleep(EXIT_POLL);
        }
        self.kill_all();
    }
}

/// Log file receiving a worker's stderr
pub fn log_path(shard: &Path) -> PathBuf {
    let mut name = shard.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".log");
    shard.with_file_name(name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_path_sits_next_to_shard() {
        assert_eq!(
            log_path(Path::new("/runs/20240101-000000/seeds.txt_02")),
            PathBuf::from("/runs/20240101-000000/seeds.txt_02.log")
        );
    }

    #[test]
    fn test_empty_set() {
        let set = WorkerSet::new();
        assert_eq!(set.count(), 0);
        assert!(set.all_exited());
        set.terminate(Duration::from_millis(10));
        assert!(set.wait_all().is_empty());
    }

    #[test]
    fn test_spawn_missing_program() {
        let dir = tempfile::tempdir().unwrap();
        let (tx, _rx) = crate::channel::telemetry_channels();
        let args = WorkerArgs {
            worker_id: "demo_00".into(),
            shard: dir.path().join("seeds.txt_00"),
            pool_size: 1,
            pool_timeout_ms: 1000,
            probe: "helloworld".into(),
            callback: None,
            verbose: false,
        };
        let err = WorkerProcess::spawn(Path::new("/nonexistent/shardrun"), &args, &tx).unwrap_err();
        assert!(matches!(err, WorkerError::SpawnFailed { ref id, .. } if id == "demo_00"));
    }
}
