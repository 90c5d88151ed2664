//! Source-control acquisition
//!
//! Clones a repository on first use and pulls on later runs, so repeated
//! builds reuse the existing checkout.

use crate::env::BuildEnv;
use crate::runner::{CommandRunner, CommandSpec, ExecutionResult};
use std::path::Path;
use tracing::info;

/// Clone `repository` into `dest`, or update `dest` if it is already a
/// checkout.
///
/// # Errors
///
/// Propagates the failure of the `git` command.
pub fn sync_repository(
    runner: &dyn CommandRunner,
    name: &str,
    repository: &str,
    dest: &Path,
    env: &BuildEnv,
) -> ExecutionResult<()> {
    let cwd = dest.parent().unwrap_or(dest);
    let dest_arg = dest.to_string_lossy().into_owned();

    let spec = if dest.join(".git").exists() {
        info!("Repository already exists, fetching updates: {}", dest.display());
        CommandSpec::new(["git", "-C", dest_arg.as_str(), "pull"], cwd)
            .describe(format!("{name}: git pull"))
    } else {
        info!("Cloning {} into {}", repository, dest.display());
        CommandSpec::new(["git", "clone", repository, dest_arg.as_str()], cwd)
            .describe(format!("{name}: git clone"))
    };

    runner.run(&spec.with_env(env))
}
