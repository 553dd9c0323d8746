//! Error types for shardrun
//!
//! This module defines the error hierarchy for a batch run:
//! - Configuration errors (fatal, raised before any worker starts)
//! - Probe errors (recovered locally into a `ProbeResult`)
//! - Telemetry channel errors (consumer degrades, never retried)
//! - Worker process errors
//!
//! Library code returns these structured errors; the binary wraps them
//! with `anyhow` context.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Top-level error type for a shardrun invocation
#[derive(Error, Debug)]
pub enum RunError {
    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Worker process errors
    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    /// Telemetry channel errors
    #[error("Channel error: {0}")]
    Channel(#[from] ChannelError),

    /// I/O errors (run directory, shard files, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Required option has no value after merging file and CLI
    #[error("{0} option required, use -h for help")]
    MissingRequired(&'static str),

    /// Invalid process count
    #[error("Invalid process count {count}: must be between 1 and {max}")]
    InvalidProcessCount { count: usize, max: usize },

    /// Invalid pool size
    #[error("Invalid pool size {size}: must be at least 1")]
    InvalidPoolSize { size: usize },

    /// Invalid pool timeout
    #[error("Invalid pool timeout {secs}s: must be between 1 and {max} seconds")]
    InvalidPoolTimeout { secs: u64, max: u64 },

    /// More shards requested than there are seeds
    #[error("Cannot split {seeds} seeds into {shards} shards: process count exceeds seed count")]
    TooManyShards { shards: usize, seeds: usize },

    /// Seed file does not exist
    #[error("Seed file not found: '{}'", .path.display())]
    SeedFileMissing { path: PathBuf },

    /// JSON configuration file could not be read or parsed
    #[error("Invalid config file '{}': {reason}", .path.display())]
    ConfigFile { path: PathBuf, reason: String },

    /// No probe registered under this name
    #[error("Unknown probe '{0}' (see `shardrun plugins`)")]
    UnknownProbe(String),

    /// No callback registered under this name
    #[error("Unknown callback '{0}' (see `shardrun plugins`)")]
    UnknownCallback(String),
}

/// Errors raised while probing a single seed.
///
/// These never abort a worker: they are folded into the seed's
/// `ProbeResult` as exception text.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    /// Probe did not return within the pool timeout
    #[error("probe timed out after {}", format_timeout(.after))]
    Timeout { after: Duration },

    /// Probe returned an error or panicked
    #[error("{0}")]
    Execution(String),
}

fn format_timeout(after: &Duration) -> String {
    if after.subsec_millis() == 0 {
        let secs = after.as_secs();
        if secs == 1 {
            "1 second".to_string()
        } else {
            format!("{} seconds", secs)
        }
    } else {
        format!("{}ms", after.as_millis())
    }
}

/// Telemetry channel errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    /// Every producer has gone away and the channel is drained
    #[error("Telemetry channel disconnected")]
    Disconnected,

    /// A telemetry line from a worker could not be decoded
    #[error("Malformed telemetry line {line:?}: {reason}")]
    Decode { line: String, reason: String },

    /// The consumer side has gone away
    #[error("Failed to send telemetry: receiver closed")]
    Send,
}

/// Worker process errors
#[derive(Error, Debug)]
pub enum WorkerError {
    /// OS process could not be started
    #[error("Failed to start worker '{id}': {reason}")]
    SpawnFailed { id: String, reason: String },

    /// Shard file could not be read
    #[error("Failed to read shard '{}': {source}", .path.display())]
    ShardRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Waiting on a worker process failed
    #[error("Failed to wait for worker '{id}': {reason}")]
    WaitFailed { id: String, reason: String },

    /// Async runtime could not be built
    #[error("Failed to build runtime for worker '{id}': {reason}")]
    Runtime { id: String, reason: String },
}

/// Result type alias for RunError
pub type Result<T> = std::result::Result<T, RunError>;

/// Result type alias for ConfigError
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeout_message() {
        let err = ProbeError::Timeout {
            after: Duration::from_secs(1),
        };
        assert_eq!(err.to_string(), "probe timed out after 1 second");

        let err = ProbeError::Timeout {
            after: Duration::from_millis(250),
        };
        assert_eq!(err.to_string(), "probe timed out after 250ms");
    }

    #[test]
    fn test_error_conversion() {
        let cfg_err = ConfigError::TooManyShards { shards: 11, seeds: 10 };
        let run_err: RunError = cfg_err.into();
        assert!(matches!(run_err, RunError::Config(ConfigError::TooManyShards { .. })));
    }

    #[test]
    fn test_missing_required_message() {
        let err = ConfigError::MissingRequired("seed_file");
        assert_eq!(err.to_string(), "seed_file option required, use -h for help");
    }
}
