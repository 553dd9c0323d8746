//! Worker: probes one shard inside a bounded async pool
//!
//! Each worker process runs a single-threaded tokio runtime and drives a
//! [`BoundedWorker`] over its shard file. Results go to the configured
//! callback; progress and callback output go to a [`TelemetrySink`].

mod pool;
mod telemetry;

pub use pool::{BoundedWorker, PoolSettings, PoolStats, ShardReport, TaskState};
pub use telemetry::{OutputSink, StdoutTelemetry, TelemetrySink};
