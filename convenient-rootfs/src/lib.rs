//! Package resolver and build orchestrator for minimal Linux root filesystems
//!
//! Takes a catalog of package descriptors, computes a build order in which
//! every package follows its dependencies, and builds each package into a
//! staged rootfs for the requested architecture.
//!
//! # Pipeline
//!
//! 1. [`CatalogLoader`] reads descriptors and adds host-tool pseudo-packages
//! 2. [`BuildOrder::resolve`] sorts the catalog, failing on cycles and
//!    unknown dependencies
//! 3. [`Dispatcher`] acquires, configures, builds and installs one package
//! 4. [`BatchOrchestrator`] runs the dispatcher over the order and collects a
//!    [`BatchReport`]
//!
//! External tools are reached only through the [`CommandRunner`],
//! [`Downloader`] and [`Extractor`] traits.
//!
//! # Example
//!
//! ```no_run
//! use convenient_rootfs::{
//!     ArchiveExtractor, BuildContext, CatalogLoader, Dispatcher, HttpDownloader, SystemRunner,
//!     UreqTransport, resolve_and_build,
//! };
//! use std::path::Path;
//!
//! let catalog = CatalogLoader::new().load(Path::new("configs"))?;
//! let ctx = BuildContext::new("arm64", "work").ignore_errors(true);
//!
//! let runner = SystemRunner::new();
//! let downloader = HttpDownloader::new(UreqTransport::default());
//! let extractor = ArchiveExtractor::new();
//! let dispatcher = Dispatcher::new(&runner, &downloader, &extractor);
//!
//! let report = resolve_and_build(&catalog, &ctx, &dispatcher)?;
//! for (name, err) in report.failures() {
//!     eprintln!("{name}: {err}");
//! }
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

pub mod arch;
pub mod batch;
pub mod catalog;
pub mod context;
pub mod descriptor;
pub mod dispatch;
pub mod env;
pub mod error;
pub mod extract;
pub mod fetch;
pub mod git;
pub mod pacman;
pub mod resolver;
pub mod runner;
pub mod settings;

#[cfg(test)]
mod testing;

pub use arch::{TargetArch, UnsupportedArchitecture};
pub use batch::{
    BatchOptions, BatchOrchestrator, BatchReport, BuildResult, DependentPolicy, PackageOutcome,
    SkipReason,
};
pub use catalog::{Catalog, CatalogLoader, ConfigError, ConfigReader, JsonConfigReader};
pub use context::BuildContext;
pub use descriptor::{Acquisition, HOST_VERSION, PackageDescriptor, SourceKind};
pub use dispatch::{
    BuildError, BuildStep, ConfigureStrategy, DispatchOutcome, Dispatcher, StepFailure,
};
pub use env::BuildEnv;
pub use error::{Error, Result};
pub use extract::{ArchiveExtractor, ArchiveFormat, ExtractError, Extractor};
pub use fetch::{Downloader, FetchError, HttpDownloader, Transport, UreqTransport};
pub use resolver::{BuildOrder, ResolveError};
pub use runner::{CommandRunner, CommandSpec, ExecutionError, SystemRunner};
pub use settings::BuildSettings;

use tracing::info;

/// Resolve the catalog and build every package in dependency order.
///
/// The architecture is validated first, so an unsupported architecture fails
/// before any collaborator is called. Resolution errors fail the whole batch.
///
/// # Errors
///
/// - `Error::Architecture` for an unknown architecture
/// - `Error::Resolve` for cycles or unknown dependencies
/// - `Error::Io` if the build directories cannot be created
/// - `Error::Aborted` when a package fails and `ignore_errors` is off
///
/// With `ignore_errors` on, package failures are reported in the returned
/// [`BatchReport`] instead.
pub fn resolve_and_build(
    catalog: &Catalog,
    context: &BuildContext,
    dispatcher: &Dispatcher<'_>,
) -> Result<BatchReport> {
    let target = TargetArch::parse(&context.arch)?;
    let order = BuildOrder::resolve(catalog)?;
    context.prepare_dirs()?;

    info!(
        "📦 {} packages for {} into {}",
        order.len(),
        target,
        context.rootfs_dir.display()
    );

    let report =
        BatchOrchestrator::new(dispatcher, context.options).run(catalog, &order, target, context);
    if report.is_aborted() {
        return Err(Error::Aborted(Box::new(report)));
    }

    info!(
        "Batch finished: {} succeeded, {} failed, {} skipped",
        report.succeeded().len(),
        report.failures().len(),
        report.skipped().len()
    );
    Ok(report)
}
