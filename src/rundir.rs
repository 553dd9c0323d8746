//! Per-run working directory
//!
//! Every run gets `task_dir/<YYYYmmdd-HHMMSS>/` holding a copy of the seed
//! file, the resolved `config.json`, the shard files and one log per worker.
//! Nothing in it is removed after the run.

use crate::config::RunConfig;
use crate::error::RunError;
use chrono::Local;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::info;

/// File name of the dumped configuration
pub const CONFIG_FILE: &str = "config.json";

/// A provisioned run directory
#[derive(Debug, Clone)]
pub struct RunDir {
    path: PathBuf,
    config: RunConfig,
}

impl RunDir {
    /// Create the run directory and move the configuration into it.
    ///
    /// The returned config reads seeds from the copy inside the run
    /// directory, so shard files land next to it.
    pub fn provision(config: RunConfig) -> Result<Self, RunError> {
        let stamp = Local::now().format("%Y%m%d-%H%M%S").to_string();
        let path = config.task_dir.join(stamp);
        fs::create_dir_all(&path)?;

        let file_name = config
            .seed_file
            .file_name()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "seed file has no file name"))?;
        let seed_copy = path.join(file_name);
        fs::copy(&config.seed_file, &seed_copy)?;

        let config = config.with_seed_file(seed_copy);
        let dump = serde_json::to_string_pretty(&config).map_err(io::Error::from)?;
        fs::write(path.join(CONFIG_FILE), dump)?;

        info!(run_dir = %path.display(), "Run directory ready");
        Ok(Self { path, config })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Configuration with the seed file rewritten to the run copy
    pub fn config(&self) -> &RunConfig {
        &self.config
    }
}
