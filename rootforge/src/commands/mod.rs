//! Rootforge command-line interface
//!
//! - `build`: resolve the package catalog and build everything into the rootfs
//! - `order`: print the resolved build order without building

use clap::{Args, Parser, Subcommand};
use convenient_rootfs::BuildSettings;
use std::path::PathBuf;

pub mod build;
pub mod order;

/// Rootforge - cross-compiling package builder for minimal root filesystems
#[derive(Parser)]
#[command(name = "rootforge")]
#[command(about = "Cross-compiling package builder for minimal Linux root filesystems")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Resolve dependencies and build every package into the rootfs
    Build(BuildArgs),

    /// Print the resolved build order
    Order {
        /// Configuration directory containing packages/
        #[arg(short, long, default_value = "configs")]
        configs: PathBuf,
    },
}

/// Options of the `build` command. Flags override the settings file.
#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Configuration directory containing packages/
    #[arg(short, long, default_value = "configs")]
    pub configs: PathBuf,

    /// JSON settings file
    #[arg(short, long)]
    pub settings: Option<PathBuf>,

    /// Target architecture (x86_64, amd64, arm64, aarch64)
    #[arg(short, long)]
    pub arch: Option<String>,

    /// Source and build directory
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Download cache directory
    #[arg(long)]
    pub downloads_dir: Option<PathBuf>,

    /// Staged rootfs directory
    #[arg(long)]
    pub rootfs_dir: Option<PathBuf>,

    /// Keep going after a package fails
    #[arg(long)]
    pub ignore_errors: bool,

    /// Do not attempt packages whose dependencies failed
    #[arg(long)]
    pub skip_dependents: bool,

    /// Parallel make jobs (defaults to the CPU count)
    #[arg(short, long)]
    pub jobs: Option<usize>,

    /// Write the batch report as JSON to this file
    #[arg(long)]
    pub report: Option<PathBuf>,

    /// Hide download progress bars
    #[arg(long)]
    pub no_progress: bool,
}

impl BuildArgs {
    /// Overlay the flags that were given on top of `settings`.
    pub fn apply(&self, settings: &mut BuildSettings) {
        if let Some(arch) = &self.arch {
            settings.arch.clone_from(arch);
        }
        if let Some(dir) = &self.work_dir {
            settings.work_dir.clone_from(dir);
        }
        if let Some(dir) = &self.downloads_dir {
            settings.downloads_dir.clone_from(dir);
        }
        if let Some(dir) = &self.rootfs_dir {
            settings.rootfs_dir.clone_from(dir);
        }
        if let Some(jobs) = self.jobs {
            settings.jobs = jobs;
        }
        settings.ignore_errors |= self.ignore_errors;
        settings.skip_dependents |= self.skip_dependents;
    }
}
