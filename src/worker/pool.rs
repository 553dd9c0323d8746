//! Bounded probe pool for one shard
//!
//! Runs the probe over every seed of a shard with at most `pool_size`
//! probes in flight, each guarded by `pool_timeout`. Tasks are cooperative:
//! on a current-thread runtime they only switch at `.await` points inside
//! the probe.
//!
//! Per task:
//!
//! ```text
//! Pending ──permit──► Running ──┬─► Completed ─┐
//!                               ├─► TimedOut  ─┼─► callback (once) ─► progress tick (once)
//!                               └─► Failed    ─┘
//! ```
//!
//! The timeout drops the probe future at its next suspension point; a probe
//! that never yields cannot be stopped.

use super::telemetry::{OutputSink, TelemetrySink};
use crate::channel::ProgressMessage;
use crate::error::{ProbeError, WorkerError};
use crate::plugin::{Capabilities, Outcome, ProbeResult};
use crate::sharder::count_lines;
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, trace, warn};

/// How often blocked waits re-check the shutdown flag
const SHUTDOWN_POLL: Duration = Duration::from_millis(50);

/// Concurrency bounds for one worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolSettings {
    /// Maximum probes in flight at once
    pub pool_size: usize,

    /// Time allotted to a single probe
    pub pool_timeout: Duration,
}

/// Lifecycle of a single seed's task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Completed,
    TimedOut,
    Failed,
}

impl From<&Outcome> for TaskState {
    fn from(outcome: &Outcome) -> Self {
        match outcome {
            Outcome::Completed(_) => TaskState::Completed,
            Outcome::TimedOut(_) => TaskState::TimedOut,
            Outcome::Failed(_) => TaskState::Failed,
        }
    }
}

/// Counters for one pool run
#[derive(Debug, Default)]
pub struct PoolStats {
    pub completed: AtomicU64,
    pub succeeded: AtomicU64,
    pub timed_out: AtomicU64,
    pub failed: AtomicU64,
}

impl PoolStats {
    fn record(&self, outcome: &Outcome) {
        let counter = match outcome {
            Outcome::Completed(_) => &self.succeeded,
            Outcome::TimedOut(_) => &self.timed_out,
            Outcome::Failed(_) => &self.failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Count one resolution and return the new completed total
    fn tick(&self) -> u64 {
        self.completed.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// Outcome of running a worker over its shard
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardReport {
    pub worker_id: String,

    /// Seeds in the shard
    pub total: u64,

    /// Seeds that reached a terminal state
    pub completed: u64,
    pub succeeded: u64,
    pub timed_out: u64,
    pub failed: u64,

    /// Whether the run was cut short by an operator interrupt
    pub interrupted: bool,

    pub duration: Duration,
}

/// Runs the probe across one shard under the pool bounds
pub struct BoundedWorker {
    worker_id: Arc<str>,
    settings: PoolSettings,
    caps: Capabilities,
    telemetry: Arc<dyn TelemetrySink>,
    shutdown: Arc<AtomicBool>,
}

impl BoundedWorker {
    pub fn new(
        worker_id: impl Into<String>,
        settings: PoolSettings,
        caps: Capabilities,
        telemetry: Arc<dyn TelemetrySink>,
    ) -> Self {
        let settings = PoolSettings {
            pool_size: settings.pool_size.max(1),
            ..settings
        };
        Self {
            worker_id: Arc::from(worker_id.into()),
            settings,
            caps,
            telemetry,
            shutdown: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that interrupts `run` when set (for signal handlers)
    pub fn shutdown_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.shutdown)
    }

    /// Probe every seed in `shard` and wait until all have resolved.
    ///
    /// If the shutdown flag is raised, outstanding tasks are aborted and the
    /// call returns promptly with `interrupted` set; results already handed
    /// to the callback stand.
    pub async fn run(&self, shard: &Path) -> Result<ShardReport, WorkerError> {
        let start = Instant::now();
        let shard_read = |source| WorkerError::ShardRead {
            path: shard.to_path_buf(),
            source,
        };

        let total = count_lines(shard).map_err(shard_read)? as u64;
        let file = tokio::fs::File::open(shard).await.map_err(shard_read)?;
        let mut reader = BufReader::new(file);
        let mut buf = Vec::with_capacity(256);
        let mut read_error = None;

        info!(
            worker = %self.worker_id,
            seeds = total,
            pool_size = self.settings.pool_size,
            timeout_ms = self.settings.pool_timeout.as_millis() as u64,
            "Worker starting"
        );

        let stats = Arc::new(PoolStats::default());
        let semaphore = Arc::new(Semaphore::new(self.settings.pool_size));
        let mut tasks = JoinSet::new();
        let mut interrupted = false;

        // Feed seeds lazily: a line is only read once a pool slot is free.
        loop {
            let permit = tokio::select! {
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
                _ = shutdown_requested(&self.shutdown) => {
                    interrupted = true;
                    break;
                }
            };

            // Raw bytes: a seed that is not valid UTF-8 is still probed
            buf.clear();
            match reader.read_until(b'\n', &mut buf).await {
                Ok(0) => break,
                Ok(_) => {}
                Err(e) => {
                    error!(worker = %self.worker_id, error = %e, "Shard read failed, no further seeds will start");
                    read_error = Some(e);
                    break;
                }
            }

            let task = SeedTask {
                worker_id: Arc::clone(&self.worker_id),
                seed: String::from_utf8_lossy(&buf).trim().to_string(),
                total,
                timeout: self.settings.pool_timeout,
                caps: self.caps.clone(),
                telemetry: Arc::clone(&self.telemetry),
                stats: Arc::clone(&stats),
            };
            trace!(worker = %self.worker_id, seed = %task.seed, state = ?TaskState::Pending, "Task queued");

            tasks.spawn(async move {
                task.execute().await;
                drop(permit);
            });

            while let Some(joined) = tasks.try_join_next() {
                self.log_join_error(joined);
            }
        }

        // Wait-all barrier
        if !interrupted {
            loop {
                tokio::select! {
                    joined = tasks.join_next() => match joined {
                        Some(joined) => self.log_join_error(joined),
                        None => break,
                    },
                    _ = shutdown_requested(&self.shutdown) => {
                        interrupted = true;
                        break;
                    }
                }
            }
        }

        if interrupted {
            warn!(
                worker = %self.worker_id,
                outstanding = tasks.len(),
                "Interrupted, aborting outstanding tasks"
            );
            tasks.abort_all();
            while let Some(joined) = tasks.join_next().await {
                self.log_join_error(joined);
            }
        }

        // In-flight tasks have been drained above
        if let Some(e) = read_error {
            return Err(shard_read(e));
        }

        let report = ShardReport {
            worker_id: self.worker_id.to_string(),
            total,
            completed: stats.completed.load(Ordering::SeqCst),
            succeeded: stats.succeeded.load(Ordering::Relaxed),
            timed_out: stats.timed_out.load(Ordering::Relaxed),
            failed: stats.failed.load(Ordering::Relaxed),
            interrupted,
            duration: start.elapsed(),
        };

        info!(
            worker = %report.worker_id,
            completed = report.completed,
            total = report.total,
            succeeded = report.succeeded,
            timed_out = report.timed_out,
            failed = report.failed,
            duration_ms = report.duration.as_millis() as u64,
            "Worker finished"
        );

        Ok(report)
    }

    fn log_join_error(&self, joined: Result<(), JoinError>) {
        match joined {
            Ok(()) => {}
            Err(e) if e.is_cancelled() => {}
            Err(e) => error!(worker = %self.worker_id, error = %e, "Task panicked outside the probe"),
        }
    }
}

async fn shutdown_requested(flag: &AtomicBool) {
    while !flag.load(Ordering::Relaxed) {
        tokio::time::sleep(SHUTDOWN_POLL).await;
    }
}

/// One seed bound to the probe
struct SeedTask {
    worker_id: Arc<str>,
    seed: String,
    total: u64,
    timeout: Duration,
    caps: Capabilities,
    telemetry: Arc<dyn TelemetrySink>,
    stats: Arc<PoolStats>,
}

impl SeedTask {
    async fn execute(self) {
        trace!(worker = %self.worker_id, seed = %self.seed, state = ?TaskState::Running, "Task running");

        let probed = tokio::time::timeout(
            self.timeout,
            AssertUnwindSafe(self.caps.probe.probe(&self.seed)).catch_unwind(),
        )
        .await;

        let result = match probed {
            Ok(Ok(Ok(data))) => ProbeResult::completed(self.seed.clone(), data),
            Ok(Ok(Err(e))) => {
                ProbeResult::failed(self.seed.clone(), ProbeError::Execution(format!("{:#}", e)).to_string())
            }
            Ok(Err(panic)) => ProbeResult::failed(
                self.seed.clone(),
                ProbeError::Execution(format!("probe panicked: {}", panic_message(&*panic))).to_string(),
            ),
            Err(_) => ProbeResult::timed_out(
                self.seed.clone(),
                ProbeError::Timeout { after: self.timeout }.to_string(),
            ),
        };

        self.resolve(result);
    }

    /// Terminal transition: callback once, then exactly one progress tick.
    ///
    /// Runs without suspension points, so an abort cannot split the pair.
    fn resolve(&self, result: ProbeResult) {
        let state = TaskState::from(&result.outcome);
        debug!(worker = %self.worker_id, seed = %result.seed, state = ?state, "Task resolved");
        self.stats.record(&result.outcome);

        let out = OutputSink::new(&self.worker_id, self.telemetry.as_ref());
        let callback = &self.caps.callback;
        if let Err(panic) = std::panic::catch_unwind(AssertUnwindSafe(|| callback.on_result(&result, &out))) {
            warn!(
                worker = %self.worker_id,
                seed = %result.seed,
                panic = %panic_message(&*panic),
                "Callback panicked"
            );
        }

        let completed = self.stats.tick();
        self.telemetry.progress(ProgressMessage {
            worker_id: self.worker_id.to_string(),
            completed,
            total: self.total,
        });
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{telemetry_channels, OutputLine, TelemetryReceiver};
    use crate::plugin::{Callback, Probe};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::fs;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// Sleeps 2s for "slow", "forever" for "hang", fails for "bad", panics for "boom"
    #[derive(Default)]
    struct ScriptedProbe {
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    #[async_trait]
    impl Probe for ScriptedProbe {
        async fn probe(&self, seed: &str) -> anyhow::Result<Value> {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let _guard = Decrement(&self.in_flight);

            tokio::time::sleep(Duration::from_millis(20)).await;
            match seed {
                "slow" => tokio::time::sleep(Duration::from_secs(2)).await,
                "hang" => tokio::time::sleep(Duration::from_secs(3600)).await,
                "bad" => anyhow::bail!("connection refused"),
                "boom" => panic!("probe exploded"),
                "null" => return Ok(Value::Null),
                _ => {}
            }
            Ok(json!({ "seed": seed }))
        }
    }

    struct Decrement<'a>(&'a AtomicUsize);

    impl Drop for Decrement<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    #[derive(Default)]
    struct Recorder {
        results: Mutex<Vec<ProbeResult>>,
    }

    impl Callback for Recorder {
        fn on_result(&self, result: &ProbeResult, out: &OutputSink<'_>) {
            self.results.lock().unwrap().push(result.clone());
            out.line(result.to_string());
        }
    }

    struct Fixture {
        _dir: TempDir,
        shard: std::path::PathBuf,
        probe: Arc<ScriptedProbe>,
        recorder: Arc<Recorder>,
        rx: TelemetryReceiver,
        worker: BoundedWorker,
    }

    fn fixture(seeds: &[&str], pool_size: usize, pool_timeout: Duration) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let shard = dir.path().join("seeds.txt_00");
        let body: String = seeds.iter().map(|s| format!("  {}  \n", s)).collect();
        fs::write(&shard, body).unwrap();

        let probe = Arc::new(ScriptedProbe::default());
        let recorder = Arc::new(Recorder::default());
        let (tx, rx) = telemetry_channels();
        let caps = Capabilities {
            probe: probe.clone(),
            callback: recorder.clone(),
        };
        let worker = BoundedWorker::new(
            "scan_00",
            PoolSettings { pool_size, pool_timeout },
            caps,
            Arc::new(tx),
        );

        Fixture {
            _dir: dir,
            shard,
            probe,
            recorder,
            rx,
            worker,
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_slow_seed_times_out_others_complete() {
        let seeds = ["a", "b", "c", "slow", "d", "e", "f", "g", "h", "i"];
        let fx = fixture(&seeds, 4, Duration::from_millis(500));

        let report = fx.worker.run(&fx.shard).await.unwrap();
        assert_eq!(report.total, 10);
        assert_eq!(report.completed, 10);
        assert_eq!(report.succeeded, 9);
        assert_eq!(report.timed_out, 1);
        assert!(!report.interrupted);

        let results = fx.recorder.results.lock().unwrap();
        assert_eq!(results.len(), 10);
        for result in results.iter() {
            assert!(result.data().is_some() ^ result.exception().is_some());
            if result.seed == "slow" {
                assert!(matches!(result.outcome, Outcome::TimedOut(_)));
                assert!(result.exception().unwrap().contains("timed out"));
            } else {
                assert_eq!(result.data(), Some(&json!({ "seed": result.seed })));
            }
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_pool_size_caps_concurrency() {
        let seeds: Vec<String> = (0..20).map(|i| format!("s{}", i)).collect();
        let seeds: Vec<&str> = seeds.iter().map(String::as_str).collect();
        let fx = fixture(&seeds, 3, Duration::from_secs(5));

        fx.worker.run(&fx.shard).await.unwrap();
        let max = fx.probe.max_in_flight.load(Ordering::SeqCst);
        assert!(max <= 3, "max in flight was {}", max);
        assert!(max >= 2, "pool never overlapped probes");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_progress_ticks_match_shard_size() {
        let fx = fixture(&["a", "bad", "boom", "null", "b"], 2, Duration::from_secs(5));

        let report = fx.worker.run(&fx.shard).await.unwrap();
        assert_eq!(report.failed, 2);
        assert_eq!(report.succeeded, 3);

        let ticks = fx.rx.drain_progress().unwrap();
        assert_eq!(ticks.len(), 5);
        let counts: Vec<u64> = ticks.iter().map(|t| t.completed).collect();
        assert_eq!(counts, vec![1, 2, 3, 4, 5]);
        assert!(ticks.iter().all(|t| t.total == 5 && t.worker_id == "scan_00"));

        let output: Vec<OutputLine> = fx.rx.drain_output().unwrap();
        assert_eq!(output.len(), 5);

        let results = fx.recorder.results.lock().unwrap();
        let boom = results.iter().find(|r| r.seed == "boom").unwrap();
        assert!(boom.exception().unwrap().contains("probe exploded"));
        let bad = results.iter().find(|r| r.seed == "bad").unwrap();
        assert_eq!(bad.exception(), Some("connection refused"));
        let null = results.iter().find(|r| r.seed == "null").unwrap();
        assert_eq!(null.data(), Some(&Value::Null));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_interrupt_aborts_outstanding_tasks() {
        let fx = fixture(&["a", "hang", "hang", "hang", "b"], 3, Duration::from_secs(600));
        let flag = fx.worker.shutdown_flag();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            flag.store(true, Ordering::SeqCst);
        });

        let started = Instant::now();
        let report = fx.worker.run(&fx.shard).await.unwrap();
        assert!(report.interrupted);
        assert!(report.completed < report.total);
        assert!(started.elapsed() < Duration::from_secs(5));

        // Every callback that did fire has exactly one matching tick
        let ticks = fx.rx.drain_progress().unwrap_or_default();
        assert_eq!(ticks.len() as u64, report.completed);
        assert_eq!(fx.recorder.results.lock().unwrap().len() as u64, report.completed);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_undecodable_seed_still_resolves() {
        let fx = fixture(&["unused"], 1, Duration::from_secs(5));
        fs::write(&fx.shard, b"Jone,18\n\xff\xfe,1\nAnn,21\nBob,30\n").unwrap();

        let report = fx.worker.run(&fx.shard).await.unwrap();
        assert_eq!(report.total, 4);
        assert_eq!(report.completed, 4);
        assert!(!report.interrupted);

        let ticks = fx.rx.drain_progress().unwrap();
        assert_eq!(ticks.len(), 4);
        assert_eq!(ticks.last().map(|t| t.completed), Some(4));

        let results = fx.recorder.results.lock().unwrap();
        let seeds: Vec<&str> = results.iter().map(|r| r.seed.as_str()).collect();
        assert_eq!(seeds, vec!["Jone,18", "\u{fffd}\u{fffd},1", "Ann,21", "Bob,30"]);
    }

    #[tokio::test(flavor = "current_thread")]
    async fn test_missing_shard_is_an_error() {
        let fx = fixture(&["a"], 1, Duration::from_secs(1));
        let err = fx
            .worker
            .run(Path::new("/nonexistent/shard_00"))
            .await
            .unwrap_err();
        assert!(matches!(err, WorkerError::ShardRead { .. }));
    }
}
