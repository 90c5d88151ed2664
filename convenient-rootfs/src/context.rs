//! Shared build context

use crate::batch::{BatchOptions, DependentPolicy};
use std::fs;
use std::io;
use std::path::PathBuf;

/// Everything a batch run needs to know about where and how to build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildContext {
    /// Requested architecture name, validated when the batch starts
    pub arch: String,

    /// Directory sources are extracted and built in
    pub work_dir: PathBuf,

    /// Directory downloaded archives are kept in
    pub downloads_dir: PathBuf,

    /// Staged root filesystem every package installs into
    pub rootfs_dir: PathBuf,

    /// Parallel jobs passed to `make -j`
    pub jobs: usize,

    /// Failure handling for the batch
    pub options: BatchOptions,
}

impl BuildContext {
    /// Context with the default layout below `base` (`build/`,
    /// `downloads/`, `build/rootfs/`).
    pub fn new(arch: impl Into<String>, base: impl Into<PathBuf>) -> Self {
        let base = base.into();
        let work_dir = base.join("build");
        Self {
            arch: arch.into(),
            downloads_dir: base.join("downloads"),
            rootfs_dir: work_dir.join("rootfs"),
            work_dir,
            jobs: num_cpus::get(),
            options: BatchOptions::default(),
        }
    }

    /// Continue after failed packages.
    #[must_use]
    pub fn ignore_errors(mut self, ignore: bool) -> Self {
        self.options.ignore_errors = ignore;
        self
    }

    /// Choose what happens to dependents of a failed package.
    #[must_use]
    pub fn dependents(mut self, policy: DependentPolicy) -> Self {
        self.options.dependents = policy;
        self
    }

    /// Override the `make` parallelism. Zero is treated as one.
    #[must_use]
    pub fn jobs(mut self, jobs: usize) -> Self {
        self.jobs = jobs.max(1);
        self
    }

    /// Create the work, download and rootfs directories.
    ///
    /// # Errors
    ///
    /// Returns the I/O error of the first directory that cannot be created.
    pub fn prepare_dirs(&self) -> io::Result<()> {
        for dir in [&self.work_dir, &self.downloads_dir, &self.rootfs_dir] {
            fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}
