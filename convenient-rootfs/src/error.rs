//! Top-level error for a batch run

use crate::arch::UnsupportedArchitecture;
use crate::batch::BatchReport;
use crate::catalog::ConfigError;
use crate::resolver::ResolveError;
use thiserror::Error;

/// Errors that stop a batch as a whole
#[derive(Debug, Error)]
pub enum Error {
    /// The catalog or settings could not be loaded
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// No valid build order exists
    #[error(transparent)]
    Resolve(#[from] ResolveError),

    /// The requested architecture is not supported
    #[error(transparent)]
    Architecture(#[from] UnsupportedArchitecture),

    /// The build directories could not be created
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A package failed and errors were not ignored. The report holds every
    /// outcome up to and including the failure.
    #[error("Batch aborted: {}", aborted_cause(.0))]
    Aborted(Box<BatchReport>),
}

fn aborted_cause(report: &BatchReport) -> String {
    report
        .failures()
        .last()
        .map_or_else(|| "unknown failure".to_string(), |(_, err)| err.to_string())
}

/// Result type for batch runs
pub type Result<T> = std::result::Result<T, Error>;
