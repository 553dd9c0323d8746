//! Configuration types for shardrun
//!
//! This module defines:
//! - CLI argument parsing using clap derive macros
//! - The JSON configuration file format
//! - The merged, validated [`RunConfig`]
//! - The hidden `worker` subcommand used to launch shard workers

use crate::error::{ConfigError, ConfigResult};
use crate::plugin::DEFAULT_CALLBACK;
use crate::worker::PoolSettings;
use clap::{Args, Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Maximum reasonable worker process count
pub const MAX_PROCESSES: usize = 512;

/// Longest per-probe timeout accepted, in seconds (one day)
pub const MAX_POOL_TIMEOUT_SECS: u64 = 86_400;

/// Default height of the dashboard output tail
pub const DEFAULT_TAIL_LINES: usize = 10;

/// Lightweight batch probe runner
#[derive(Parser, Debug, Clone)]
#[command(
    name = "shardrun",
    version,
    about = "Lightweight batch probe runner",
    long_about = "Runs a probe against every seed of a seed file.\n\n\
                  Seeds are split into one shard per worker process; each worker \
                  runs up to --pool-size probes concurrently, each bounded by \
                  --pool-timeout seconds.",
    after_help = "EXAMPLES:\n    \
        shardrun -n demo -t seeds.txt --task-dir tasks --proc-num 4 --pool-size 100 --pool-timeout 5 -p tcp_connect -b print\n    \
        shardrun -c scan.json --dashboard\n    \
        shardrun plugins",
    args_conflicts_with_subcommands = true
)]
pub struct CliArgs {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub run: RunArgs,
}

/// Options for a batch run; each overrides the config file
#[derive(Args, Debug, Clone, Default)]
pub struct RunArgs {
    /// JSON config file (command-line options override its values)
    #[arg(short = 'c', long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Name of this scan
    #[arg(short = 'n', long, value_name = "NAME")]
    pub scan_name: Option<String>,

    /// Seed file, one target per line
    #[arg(short = 't', long, value_name = "FILE")]
    pub seed_file: Option<PathBuf>,

    /// Directory that receives one timestamped run directory per run
    #[arg(long, value_name = "DIR")]
    pub task_dir: Option<PathBuf>,

    /// Number of worker processes
    #[arg(long, value_name = "NUM")]
    pub proc_num: Option<usize>,

    /// Concurrent probes per worker process
    #[arg(long, value_name = "NUM")]
    pub pool_size: Option<usize>,

    /// Seconds allotted to a single probe
    #[arg(long, value_name = "SECS")]
    pub pool_timeout: Option<u64>,

    /// Probe to run (see `shardrun plugins`)
    #[arg(short = 'p', long, value_name = "NAME")]
    pub probe: Option<String>,

    /// Callback invoked with every result
    #[arg(short = 'b', long, value_name = "NAME")]
    pub callback: Option<String>,

    /// Show the live dashboard instead of streaming output lines
    #[arg(long)]
    pub dashboard: bool,

    /// Output lines kept visible on the dashboard
    #[arg(long, value_name = "LINES")]
    pub tail: Option<usize>,

    /// Verbose output
    #[arg(short = 'v', long)]
    pub verbose: bool,
}

/// Subcommands
#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// List the available probes and callbacks
    Plugins,

    /// Run one shard (launched by the orchestrator)
    #[command(hide = true)]
    Worker(WorkerArgs),
}

/// Settings handed to a single worker process
#[derive(Args, Debug, Clone, PartialEq, Eq)]
pub struct WorkerArgs {
    #[arg(long)]
    pub worker_id: String,

    #[arg(long)]
    pub shard: PathBuf,

    #[arg(long)]
    pub pool_size: usize,

    #[arg(long)]
    pub pool_timeout_ms: u64,

    #[arg(long)]
    pub probe: String,

    #[arg(long)]
    pub callback: Option<String>,

    #[arg(short = 'v', long)]
    pub verbose: bool,
}

impl WorkerArgs {
    /// Arguments that launch this worker through the binary's CLI
    pub fn to_command_args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "worker".into(),
            "--worker-id".into(),
            self.worker_id.clone().into(),
            "--shard".into(),
            self.shard.clone().into(),
            "--pool-size".into(),
            self.pool_size.to_string().into(),
            "--pool-timeout-ms".into(),
            self.pool_timeout_ms.to_string().into(),
            "--probe".into(),
            self.probe.clone().into(),
        ];
        if let Some(callback) = &self.callback {
            args.push("--callback".into());
            args.push(callback.clone().into());
        }
        if self.verbose {
            args.push("--verbose".into());
        }
        args
    }

    pub fn pool_settings(&self) -> PoolSettings {
        PoolSettings {
            pool_size: self.pool_size,
            pool_timeout: Duration::from_millis(self.pool_timeout_ms),
        }
    }
}

/// Contents of a JSON config file. Unknown keys are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FileConfig {
    #[serde(alias = "scanname")]
    pub scan_name: Option<String>,
    #[serde(alias = "seedfile")]
    pub seed_file: Option<PathBuf>,
    pub task_dir: Option<PathBuf>,
    pub proc_num: Option<usize>,
    pub pool_size: Option<usize>,
    pub pool_timeout: Option<u64>,
    pub probe: Option<String>,
    pub callback: Option<String>,
    pub dashboard: Option<bool>,
    pub tail: Option<usize>,
}

impl FileConfig {
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let invalid = |reason: String| ConfigError::ConfigFile {
            path: path.to_path_buf(),
            reason,
        };
        let content = fs::read_to_string(path).map_err(|e| invalid(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| invalid(e.to_string()))
    }
}

/// Validated runtime configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunConfig {
    pub scan_name: String,

    /// Absolute path of the seed file
    pub seed_file: PathBuf,

    /// Absolute path of the task directory
    pub task_dir: PathBuf,

    pub proc_num: usize,
    pub pool_size: usize,

    /// Per-probe timeout in seconds
    pub pool_timeout: u64,

    pub probe: String,
    pub callback: String,

    pub dashboard: bool,
    pub tail: usize,

    #[serde(skip)]
    pub verbose: bool,
}

impl RunConfig {
    /// Load the config file named by `--config` (if any) and merge the
    /// command line over it
    pub fn from_args(args: &RunArgs) -> ConfigResult<Self> {
        let file = match &args.config {
            Some(path) => FileConfig::load(path)?,
            None => FileConfig::default(),
        };
        Self::resolve(file, args)
    }

    /// Merge defaults <- file <- command line, then validate
    pub fn resolve(file: FileConfig, args: &RunArgs) -> ConfigResult<Self> {
        // Checked in the order the options are documented
        let required = |name: &'static str| ConfigError::MissingRequired(name);
        let scan_name = args
            .scan_name
            .clone()
            .or(file.scan_name)
            .ok_or_else(|| required("scan_name"))?;
        let seed_file = args
            .seed_file
            .clone()
            .or(file.seed_file)
            .ok_or_else(|| required("seed_file"))?;
        let task_dir = args
            .task_dir
            .clone()
            .or(file.task_dir)
            .ok_or_else(|| required("task_dir"))?;
        let proc_num = args.proc_num.or(file.proc_num).ok_or_else(|| required("proc_num"))?;
        let pool_size = args.pool_size.or(file.pool_size).ok_or_else(|| required("pool_size"))?;
        let pool_timeout = args
            .pool_timeout
            .or(file.pool_timeout)
            .ok_or_else(|| required("pool_timeout"))?;
        let probe = args.probe.clone().or(file.probe).ok_or_else(|| required("probe"))?;

        if proc_num == 0 || proc_num > MAX_PROCESSES {
            return Err(ConfigError::InvalidProcessCount {
                count: proc_num,
                max: MAX_PROCESSES,
            });
        }
        if pool_size == 0 {
            return Err(ConfigError::InvalidPoolSize { size: pool_size });
        }
        if pool_timeout == 0 || pool_timeout > MAX_POOL_TIMEOUT_SECS {
            return Err(ConfigError::InvalidPoolTimeout {
                secs: pool_timeout,
                max: MAX_POOL_TIMEOUT_SECS,
            });
        }
        if !seed_file.is_file() {
            return Err(ConfigError::SeedFileMissing { path: seed_file });
        }

        Ok(Self {
            scan_name,
            seed_file: absolute(&seed_file),
            task_dir: absolute(&task_dir),
            proc_num,
            pool_size,
            pool_timeout,
            probe,
            callback: args
                .callback
                .clone()
                .or(file.callback)
                .unwrap_or_else(|| DEFAULT_CALLBACK.to_string()),
            dashboard: args.dashboard || file.dashboard.unwrap_or(false),
            tail: args.tail.or(file.tail).unwrap_or(DEFAULT_TAIL_LINES).max(1),
            verbose: args.verbose,
        })
    }

    pub fn pool_timeout(&self) -> Duration {
        Duration::from_secs(self.pool_timeout)
    }

    /// Same configuration reading seeds from `seed_file`
    pub fn with_seed_file(self, seed_file: PathBuf) -> Self {
        Self { seed_file, ..self }
    }

    /// Identifier of the worker that runs shard `index`
    pub fn worker_id(&self, index: usize) -> String {
        format!("{}_{:02}", self.scan_name, index)
    }

    /// Worker settings for one shard
    pub fn worker_args(&self, index: usize, shard: &Path) -> WorkerArgs {
        WorkerArgs {
            worker_id: self.worker_id(index),
            shard: shard.to_path_buf(),
            pool_size: self.pool_size,
            pool_timeout_ms: self.pool_timeout.saturating_mul(1000),
            probe: self.probe.clone(),
            callback: Some(self.callback.clone()),
            verbose: self.verbose,
        }
    }
}

fn absolute(path: &Path) -> PathBuf {
    std::path::absolute(path).unwrap_or_else(|_| path.to_path_buf())
}
