//! Package descriptors
//!
//! A descriptor is the declarative record for one package: where its sources
//! come from, what it depends on and how it is configured. Descriptors are
//! read from JSON (see [`crate::catalog`]) and never change after loading.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Version sentinel marking a tool that is expected on the build host.
pub const HOST_VERSION: &str = "host";

/// Where a package's sources come from, as written in the `source` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    /// Download `urls` and extract
    Archive,
    /// Ask the host pacman for download URLs
    Pacman,
    /// Clone `repository`
    Git,
}

/// How the dispatcher obtains a package's sources.
///
/// Selected from descriptor fields by [`PackageDescriptor::acquisition`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Acquisition<'a> {
    /// Present on the host, nothing to do
    Host,
    /// Clone or update a source-control checkout
    GitClone {
        /// Repository URL
        repository: &'a str,
    },
    /// Resolve download URLs through the host package manager
    PackageManager,
    /// Download from the mirror list and extract
    Archive {
        /// Mirror URLs, tried in order
        urls: &'a [String],
    },
}

/// Declarative description of one package.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageDescriptor {
    /// Unique package name
    pub name: String,

    /// Version string, or [`HOST_VERSION`]
    pub version: String,

    /// Source directory template; `{version}` is substituted
    #[serde(default, rename = "src_dir")]
    pub source_template: String,

    /// Mirror URLs for the source archive
    #[serde(default)]
    pub urls: Vec<String>,

    /// Names of packages that must be built first
    #[serde(default)]
    pub deps: Vec<String>,

    /// Explicit configure command line. Empty means auto-detect.
    #[serde(default, rename = "configure")]
    pub configure_args: Vec<String>,

    /// Flags appended to an auto-detected autotools or CMake configure
    #[serde(default)]
    pub extra_configure_flags: Vec<String>,

    /// Explicit acquisition source
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<SourceKind>,

    /// Repository URL for `source: "git"`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    /// Binary package: extract straight into the rootfs, no build
    #[serde(default)]
    pub prebuilt: bool,
}

impl PackageDescriptor {
    /// Create a descriptor with the given name and version and nothing else.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            source_template: String::new(),
            urls: Vec::new(),
            deps: Vec::new(),
            configure_args: Vec::new(),
            extra_configure_flags: Vec::new(),
            source: None,
            repository: None,
            prebuilt: false,
        }
    }

    /// Pseudo-descriptor for a tool assumed present on the host.
    pub fn host_tool(name: impl Into<String>) -> Self {
        Self::new(name, HOST_VERSION)
    }

    /// Whether this package is a host tool that is never built.
    #[must_use]
    pub fn is_host_tool(&self) -> bool {
        self.version == HOST_VERSION
    }

    /// Select the acquisition strategy for this package.
    ///
    /// Host tools win over everything. An explicit `source` is honored next;
    /// without one, an empty URL list means the package manager is asked.
    #[must_use]
    pub fn acquisition(&self) -> Acquisition<'_> {
        if self.is_host_tool() {
            return Acquisition::Host;
        }
        match (self.source, self.repository.as_deref()) {
            (Some(SourceKind::Git), Some(repository)) => Acquisition::GitClone { repository },
            (Some(SourceKind::Pacman), _) => Acquisition::PackageManager,
            (None, _) if self.urls.is_empty() => Acquisition::PackageManager,
            _ => Acquisition::Archive { urls: &self.urls },
        }
    }

    /// Resolved source directory, if a template is set.
    ///
    /// Relative paths are taken relative to `work_dir`.
    #[must_use]
    pub fn source_dir(&self, work_dir: &Path) -> Option<PathBuf> {
        if self.source_template.trim().is_empty() {
            return None;
        }
        let path = PathBuf::from(self.source_template.replace("{version}", &self.version));
        if path.is_absolute() {
            Some(path)
        } else {
            Some(work_dir.join(path))
        }
    }

    /// Add dependencies that are not already listed. Returns how many were
    /// added.
    pub fn merge_deps<I, S>(&mut self, extra: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut added = 0;
        for dep in extra {
            let dep = dep.as_ref();
            if !self.deps.iter().any(|d| d == dep) {
                self.deps.push(dep.to_string());
                added += 1;
            }
        }
        added
    }

    /// Configure arguments with `{arch}`, `{rootfs}` and `{triple}` filled in.
    #[must_use]
    pub fn substituted_configure(&self, arch: &str, rootfs: &Path, triple: &str) -> Vec<String> {
        let rootfs = rootfs.to_string_lossy();
        self.configure_args
            .iter()
            .map(|part| {
                part.replace("{arch}", arch)
                    .replace("{rootfs}", &rootfs)
                    .replace("{triple}", triple)
            })
            .collect()
    }
}
