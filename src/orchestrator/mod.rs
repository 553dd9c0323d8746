//! Orchestrator - runs one worker process per shard
//!
//! The orchestrator is responsible for:
//! - Splitting the seed file into shards (fails before any launch)
//! - Starting one worker process per shard
//! - Attaching exactly one telemetry consumer
//! - Joining every worker process, whatever the consumer did
//!
//! Worker exit codes are logged, never surfaced as run outcomes: per-seed
//! failures only travel as result exceptions through the callback.

mod process;

pub use process::{log_path, WorkerControl, WorkerExit, WorkerProcess, WorkerSet};

use crate::channel::{telemetry_channels, TelemetryReceiver};
use crate::config::RunConfig;
use crate::error::{Result, RunError};
use crate::sharder;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// What a consumer observed before returning
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConsumerReport {
    /// Aggregate of the last progress count seen per worker
    pub completed: u64,

    /// Output lines received
    pub output_lines: u64,

    /// Whether the consumer stopped because of an operator interrupt
    pub interrupted: bool,
}

/// The single reader of a run's telemetry channels.
///
/// `consume` runs on the orchestrator's thread and returns when the consumer
/// is done; the orchestrator then joins the workers.
pub trait TelemetryConsumer {
    fn consume(
        &mut self,
        rx: &TelemetryReceiver,
        workers: &dyn WorkerControl,
        seed_total: u64,
    ) -> ConsumerReport;
}

/// Result of a completed run
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Seeds in the source file
    pub seeds: u64,

    /// Worker processes started
    pub workers: usize,

    /// Seeds resolved, as counted by the consumer
    pub completed: u64,

    /// Output lines seen by the consumer
    pub output_lines: u64,

    /// Workers that exited unsuccessfully without being killed
    pub abnormal_exits: usize,

    /// Telemetry lines the pumps could not decode
    pub malformed: u64,

    /// Whether the run was interrupted by the operator
    pub interrupted: bool,

    pub duration: Duration,
}

/// Launches and joins the worker processes of a run
pub struct Orchestrator {
    /// Binary that provides the `worker` subcommand
    program: PathBuf,

    shutdown: Arc<AtomicBool>,
}

impl Orchestrator {
    /// Orchestrator re-executing the current binary
    pub fn new() -> Result<Self> {
        Ok(Self::with_program(std::env::current_exe()?))
    }

    /// Orchestrator launching workers from `program`
    pub fn with_program(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get a clone of the shutdown flag (for signal handlers)
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Shard the seed file, run every shard in its own process and wait
    /// for all of them
    pub fn run(&self, config: &RunConfig, consumer: &mut dyn TelemetryConsumer) -> Result<RunSummary> {
        let start = Instant::now();

        let shards = sharder::split(&config.seed_file, config.proc_num)?;
        let seeds: usize = shards.iter().map(|s| s.len).sum();

        info!(
            scan = %config.scan_name,
            seeds,
            workers = shards.len(),
            pool_size = config.pool_size,
            pool_timeout_secs = config.pool_timeout,
            "Starting workers"
        );

        let (tx, rx) = telemetry_channels();
        let workers = WorkerSet::new();
        for shard in &shards {
            let args = config.worker_args(shard.index, &shard.path);
            match WorkerProcess::spawn(&self.program, &args, &tx) {
                Ok(proc) => workers.push(proc),
                Err(e) => {
                    workers.kill_all();
                    workers.wait_all();
                    return Err(RunError::Worker(e));
                }
            }
        }
        // Pumps hold the only senders now; the channels disconnect once every
        // worker has closed its stdout.
        drop(tx);

        let report = consumer.consume(&rx, &workers, seeds as u64);
        drop(rx);

        if report.interrupted || self.shutdown.load(Ordering::Relaxed) {
            warn!("Interrupted, waiting for workers to stop");
        }
        let exits = workers.wait_all();

        let summary = RunSummary {
            seeds: seeds as u64,
            workers: exits.len(),
            completed: report.completed,
            output_lines: report.output_lines,
            abnormal_exits: exits
                .iter()
                .filter(|e| !e.killed && !e.status.is_some_and(|s| s.success()))
                .count(),
            malformed: exits.iter().map(|e| e.pump.malformed).sum(),
            interrupted: report.interrupted || self.shutdown.load(Ordering::Relaxed),
            duration: start.elapsed(),
        };

        info!(
            completed = summary.completed,
            seeds = summary.seeds,
            abnormal_exits = summary.abnormal_exits,
            duration_ms = summary.duration.as_millis() as u64,
            "All workers joined"
        );

        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{FileConfig, RunArgs};
    use crate::error::ConfigError;
    use std::fs;

    struct NeverCalled;

    impl TelemetryConsumer for NeverCalled {
        fn consume(&mut self, _: &TelemetryReceiver, _: &dyn WorkerControl, _: u64) -> ConsumerReport {
            panic!("consumer must not run");
        }
    }

    #[test]
    fn test_too_many_shards_fails_before_launch() {
        let dir = tempfile::tempdir().unwrap();
        let seeds = dir.path().join("seeds.txt");
        fs::write(&seeds, (0..10).map(|i| format!("seed{}\n", i)).collect::<String>()).unwrap();

        let args = RunArgs {
            scan_name: Some("demo".into()),
            seed_file: Some(seeds.clone()),
            task_dir: Some(dir.path().into()),
            proc_num: Some(11),
            pool_size: Some(4),
            pool_timeout: Some(1),
            probe: Some("helloworld".into()),
            ..RunArgs::default()
        };
        let config = RunConfig::resolve(FileConfig::default(), &args).unwrap();

        let orchestrator = Orchestrator::with_program("/nonexistent/shardrun");
        let err = orchestrator.run(&config, &mut NeverCalled).unwrap_err();
        assert!(matches!(
            err,
            RunError::Config(ConfigError::TooManyShards { shards: 11, seeds: 10 })
        ));

        // No shard files were written
        let entries: Vec<_> = fs::read_dir(dir.path()).unwrap().collect();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn test_spawn_failure_is_a_worker_error() {
        let dir = tempfile::tempdir().unwrap();
        let seeds = dir.path().join("seeds.txt");
        fs::write(&seeds, "a\nb\n").unwrap();

        let args = RunArgs {
            scan_name: Some("demo".into()),
            seed_file: Some(seeds),
            task_dir: Some(dir.path().into()),
            proc_num: Some(2),
            pool_size: Some(1),
            pool_timeout: Some(1),
            probe: Some("helloworld".into()),
            ..RunArgs::default()
        };
        let config = RunConfig::resolve(FileConfig::default(), &args).unwrap();

        let err = Orchestrator::with_program("/nonexistent/shardrun")
            .run(&config, &mut NeverCalled)
            .unwrap_err();
        assert!(matches!(err, RunError::Worker(_)));
    }
}
