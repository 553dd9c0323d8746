//! shardrun - Lightweight Batch Probe Runner
//!
//! Runs a probe routine against every line ("seed") of a large seed file
//! under two nested concurrency bounds, and aggregates results, live
//! progress and captured output for the operator.
//!
//! # Features
//!
//! - **Process Parallelism**: The seed file is split into balanced shards,
//!   one worker process per shard.
//!
//! - **Bounded Async Pools**: Inside each process a single-threaded tokio
//!   runtime keeps at most `pool_size` probes in flight, each bounded by
//!   `pool_timeout`.
//!
//! - **Uniform Results**: Every seed resolves to exactly one `ProbeResult`
//!   (data or exception) and drives exactly one callback and one progress
//!   tick, whether it completed, timed out or failed.
//!
//! - **Live Dashboard**: Per-worker bars, aggregate counters and an output
//!   tail, fed by non-blocking telemetry channels.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                         Seed File                                │
//! └─────────────────────────────┬───────────────────────────────────┘
//!                               │ sharder::split
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   Worker Processes (1 per shard)                 │
//! │  ┌──────────┐  ┌──────────┐  ┌──────────┐         ┌──────────┐  │
//! │  │ Worker 0 │  │ Worker 1 │  │ Worker 2 │  ...    │ Worker N │  │
//! │  │ pool ≤ M │  │ pool ≤ M │  │ pool ≤ M │         │ pool ≤ M │  │
//! │  └────┬─────┘  └────┬─────┘  └────┬─────┘         └────┬─────┘  │
//! │       │ stdout: JSON lines (progress / output)          │        │
//! └───────┼─────────────┼─────────────┼────────────────────┼────────┘
//!         ▼             ▼             ▼                    ▼
//!      pump thread   pump thread   pump thread   ...   pump thread
//!         │             │             │                    │
//!         └─────────────┴──────┬──────┴────────────────────┘
//!                              ▼
//!            ┌──────────────────────────────────┐
//!            │  progress + output channels      │
//!            │  (crossbeam unbounded, MPSC)     │
//!            └────────────────┬─────────────────┘
//!                             ▼
//!               Dashboard  or  LineLogger
//! ```
//!
//! # Example
//!
//! ```bash
//! # 4 processes, 100 concurrent probes each, 5s per probe
//! shardrun -n web -t hosts.txt --task-dir tasks --proc-num 4 \
//!     --pool-size 100 --pool-timeout 5 -p tcp_connect -b print
//!
//! # Same, from a config file, with the live dashboard
//! shardrun -c scan.json --dashboard
//! ```

pub mod channel;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod orchestrator;
pub mod plugin;
pub mod progress;
pub mod rundir;
pub mod sharder;
pub mod worker;

pub use config::{CliArgs, RunConfig, WorkerArgs};
pub use error::{Result, RunError};
pub use orchestrator::{ConsumerReport, Orchestrator, RunSummary, TelemetryConsumer, WorkerControl};
pub use plugin::{Capabilities, PluginRegistry, ProbeResult};
pub use worker::{BoundedWorker, PoolSettings, ShardReport};
