//! Build settings file
//!
//! Optional JSON file with the batch settings. Every field has a default, so
//! an empty object (or no file at all) is a valid configuration.

use crate::batch::{BatchOptions, DependentPolicy};
use crate::catalog::{ConfigError, ConfigResult};
use crate::context::BuildContext;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Settings for one batch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BuildSettings {
    /// Target architecture name
    pub arch: String,
    /// Source and build directory
    pub work_dir: PathBuf,
    /// Download cache
    pub downloads_dir: PathBuf,
    /// Staged root filesystem
    pub rootfs_dir: PathBuf,
    /// Continue after failed packages
    pub ignore_errors: bool,
    /// Skip dependents of failed packages instead of attempting them
    pub skip_dependents: bool,
    /// `make -j` parallelism
    pub jobs: usize,
    /// Connect and per-read timeout for downloads, in seconds
    pub download_timeout_secs: u64,
}

impl Default for BuildSettings {
    fn default() -> Self {
        Self {
            arch: "x86_64".to_string(),
            work_dir: PathBuf::from("work/build"),
            downloads_dir: PathBuf::from("work/downloads"),
            rootfs_dir: PathBuf::from("work/build/rootfs"),
            ignore_errors: false,
            skip_dependents: false,
            jobs: num_cpus::get(),
            download_timeout_secs: 60,
        }
    }
}

impl BuildSettings {
    /// Read settings from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Read settings from `path` if given, defaults otherwise.
    ///
    /// # Errors
    ///
    /// See [`BuildSettings::from_file`].
    pub fn load(path: Option<&Path>) -> ConfigResult<Self> {
        path.map_or_else(|| Ok(Self::default()), Self::from_file)
    }

    /// Connect and per-read timeout for downloads.
    #[must_use]
    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    /// Batch options derived from the flags.
    #[must_use]
    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            ignore_errors: self.ignore_errors,
            dependents: if self.skip_dependents {
                DependentPolicy::SkipDependents
            } else {
                DependentPolicy::Attempt
            },
        }
    }

    /// Build context for these settings.
    #[must_use]
    pub fn to_context(&self) -> BuildContext {
        BuildContext {
            arch: self.arch.clone(),
            work_dir: self.work_dir.clone(),
            downloads_dir: self.downloads_dir.clone(),
            rootfs_dir: self.rootfs_dir.clone(),
            jobs: self.jobs.max(1),
            options: self.batch_options(),
        }
    }
}
