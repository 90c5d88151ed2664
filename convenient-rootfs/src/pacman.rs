//! Package-manager backed acquisition
//!
//! Asks the host `pacman` for the download URLs of a package (and its
//! repository dependencies) without installing anything on the host.

use crate::arch::TargetArch;
use crate::env::BuildEnv;
use crate::runner::{CommandRunner, CommandSpec, ExecutionResult};
use std::path::Path;
use tracing::debug;

/// Command line that prints the download URLs for `package`.
#[must_use]
pub fn url_query(package: &str, target: TargetArch) -> Vec<String> {
    vec![
        "pacman".to_string(),
        "-Sp".to_string(),
        "--noconfirm".to_string(),
        "--arch".to_string(),
        target.canonical_name().to_string(),
        package.to_string(),
    ]
}

/// Extract the URLs from `pacman -Sp` output.
///
/// Blank lines and pacman's `::`-prefixed status lines are ignored.
#[must_use]
pub fn parse_url_list(output: &str) -> Vec<String> {
    output
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && line.contains("://") && !line.starts_with("::"))
        .map(ToString::to_string)
        .collect()
}

/// Resolves package names to download URLs through the host package manager.
pub struct PacmanBackend<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> PacmanBackend<'a> {
    /// Create a backend that runs pacman through `runner`.
    #[must_use]
    pub fn new(runner: &'a dyn CommandRunner) -> Self {
        Self { runner }
    }

    /// Download URLs for `package` built for `target`.
    ///
    /// # Errors
    ///
    /// Propagates the execution error when pacman fails.
    pub fn resolve_urls(
        &self,
        package: &str,
        target: TargetArch,
        cwd: &Path,
        env: &BuildEnv,
    ) -> ExecutionResult<Vec<String>> {
        let spec = CommandSpec::new(url_query(package, target), cwd)
            .with_env(env)
            .describe(format!("{package}: pacman query"));
        let urls = parse_url_list(&self.runner.capture(&spec)?);
        debug!("pacman resolved {} to {} URLs", package, urls.len());
        Ok(urls)
    }
}
