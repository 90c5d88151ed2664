//! Package catalog loading
//!
//! The catalog maps package names to descriptors. It is seeded with one
//! pseudo-descriptor per known host tool, then filled from the JSON files in
//! `<configs>/packages/` (and one level of subdirectories below it). Files are
//! processed in sorted path order; a name that is defined again replaces the
//! earlier definition with a warning.

use crate::descriptor::{PackageDescriptor, SourceKind};
use serde_json::Value;
use std::collections::BTreeMap;
use std::collections::btree_map;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Tools that are expected on the build host and never built.
pub const HOST_TOOLS: &[&str] = &[
    "perl",
    "python3",
    "glib2",
    "pkgconf",
    "device-mapper",
    "libudev",
    "libusb",
    "bash",
    "util-linux",
    "meson",
    "ninja",
    "gpgme",
    "json-glib",
    "libsoup",
    "libdevmapper",
];

/// Host dependencies that some packages need but do not declare.
pub const PACKAGE_HOST_DEPS: &[(&str, &[&str])] = &[
    ("fwupd", &["libusb"]),
    ("lvm2", &["device-mapper"]),
    ("inxi", &["perl"]),
];

/// Errors from reading package descriptors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The file could not be read
    #[error("Failed to read {path}: {source}")]
    Read {
        /// File being read
        path: PathBuf,
        /// Underlying read error
        #[source]
        source: io::Error,
    },

    /// The file is not valid JSON for its type
    #[error("Malformed descriptor {path}: {source}")]
    Parse {
        /// File being parsed
        path: PathBuf,
        /// Underlying parse error
        #[source]
        source: serde_json::Error,
    },

    /// A required field is absent or empty
    #[error("Descriptor {path} is missing mandatory field `{field}`")]
    MissingField {
        /// Offending descriptor
        path: PathBuf,
        /// Name of the missing field
        field: &'static str,
    },

    /// The descriptor parses but makes no sense, e.g. a git source without
    /// a repository
    #[error("Descriptor {path}: {message}")]
    Invalid {
        /// Offending descriptor
        path: PathBuf,
        /// What is wrong with it
        message: String,
    },

    /// The configuration directory could not be walked
    #[error("Failed to scan {path}: {source}")]
    Walk {
        /// Directory being scanned
        path: PathBuf,
        /// Underlying walk error
        #[source]
        source: walkdir::Error,
    },
}

/// Result type for configuration loading
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Turns one configuration file into a descriptor.
pub trait ConfigReader {
    /// Load the descriptor stored at `path`.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` when the file cannot be read, is malformed or
    /// lacks a mandatory field.
    fn load(&self, path: &Path) -> ConfigResult<PackageDescriptor>;
}

/// Reads descriptors from JSON files.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonConfigReader;

impl JsonConfigReader {
    /// Parse a descriptor from JSON text. `path` is only used in errors.
    ///
    /// # Errors
    ///
    /// See [`ConfigReader::load`].
    pub fn parse(path: &Path, text: &str) -> ConfigResult<PackageDescriptor> {
        let parse_err = |source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        };
        let value: Value = serde_json::from_str(text).map_err(parse_err)?;

        for field in ["name", "version"] {
            match value.get(field) {
                Some(Value::String(s)) if !s.trim().is_empty() => {}
                _ => {
                    return Err(ConfigError::MissingField {
                        path: path.to_path_buf(),
                        field,
                    });
                }
            }
        }

        let desc: PackageDescriptor = serde_json::from_value(value).map_err(parse_err)?;
        if desc.source == Some(SourceKind::Git) && desc.repository.is_none() {
            return Err(ConfigError::Invalid {
                path: path.to_path_buf(),
                message: "source \"git\" requires a `repository`".to_string(),
            });
        }
        Ok(desc)
    }
}

impl ConfigReader for JsonConfigReader {
    fn load(&self, path: &Path) -> ConfigResult<PackageDescriptor> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(path, &text)
    }
}

/// Mapping from package name to descriptor.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    packages: BTreeMap<String, PackageDescriptor>,
}

impl Catalog {
    /// Create an empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a catalog holding a host-tool descriptor for each name.
    pub fn with_host_tools<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut catalog = Self::new();
        for name in names {
            let _ = catalog.insert(PackageDescriptor::host_tool(name));
        }
        catalog
    }

    /// Insert a descriptor, replacing and returning any previous one with the
    /// same name. A replacement is logged as a warning.
    pub fn insert(&mut self, desc: PackageDescriptor) -> Option<PackageDescriptor> {
        let previous = self.packages.insert(desc.name.clone(), desc);
        if let Some(old) = &previous {
            warn!(
                "⚠️  Overriding existing package {} (version {})",
                old.name, old.version
            );
        }
        previous
    }

    /// Look up a package.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&PackageDescriptor> {
        self.packages.get(name)
    }

    /// Whether a package with this name exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.packages.contains_key(name)
    }

    /// Number of packages, host tools included.
    #[must_use]
    pub fn len(&self) -> usize {
        self.packages.len()
    }

    /// Whether the catalog is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Iterate over descriptors in name order.
    pub fn iter(&self) -> btree_map::Values<'_, String, PackageDescriptor> {
        self.packages.values()
    }

    /// Iterate over package names in order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.packages.keys().map(String::as_str)
    }
}

impl FromIterator<PackageDescriptor> for Catalog {
    fn from_iter<T: IntoIterator<Item = PackageDescriptor>>(iter: T) -> Self {
        let mut catalog = Self::new();
        for desc in iter {
            let _ = catalog.insert(desc);
        }
        catalog
    }
}

impl<'a> IntoIterator for &'a Catalog {
    type Item = &'a PackageDescriptor;
    type IntoIter = btree_map::Values<'a, String, PackageDescriptor>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Builds a [`Catalog`] from a configuration directory.
#[derive(Debug, Clone)]
pub struct CatalogLoader<R = JsonConfigReader> {
    reader: R,
    host_tools: Vec<String>,
    host_deps: BTreeMap<String, Vec<String>>,
}

impl Default for CatalogLoader<JsonConfigReader> {
    fn default() -> Self {
        Self::new()
    }
}

impl CatalogLoader<JsonConfigReader> {
    /// Loader using JSON descriptors and the built-in host tool tables.
    #[must_use]
    pub fn new() -> Self {
        Self::with_reader(JsonConfigReader)
    }
}

impl<R: ConfigReader> CatalogLoader<R> {
    /// Loader using a custom reader and the built-in host tool tables.
    pub fn with_reader(reader: R) -> Self {
        Self {
            reader,
            host_tools: HOST_TOOLS.iter().map(ToString::to_string).collect(),
            host_deps: PACKAGE_HOST_DEPS
                .iter()
                .map(|(name, deps)| {
                    (name.to_string(), deps.iter().map(ToString::to_string).collect())
                })
                .collect(),
        }
    }

    /// Replace the list of host tools that get pseudo-descriptors.
    #[must_use]
    pub fn host_tools<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.host_tools = names.into_iter().map(Into::into).collect();
        self
    }

    /// Declare extra host dependencies for a package.
    #[must_use]
    pub fn host_deps<I, S>(mut self, package: impl Into<String>, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let _ = self
            .host_deps
            .insert(package.into(), deps.into_iter().map(Into::into).collect());
        self
    }

    /// Load the catalog from `<configs_dir>/packages`.
    ///
    /// A missing packages directory yields a catalog of host tools only.
    ///
    /// # Errors
    ///
    /// The first descriptor that fails to load aborts the whole load; no
    /// partial catalog is returned.
    pub fn load(&self, configs_dir: &Path) -> ConfigResult<Catalog> {
        let mut catalog = Catalog::with_host_tools(self.host_tools.iter().cloned());
        let packages_dir = configs_dir.join("packages");

        if !packages_dir.is_dir() {
            warn!("No packages directory at {}", packages_dir.display());
            return Ok(catalog);
        }

        let files = descriptor_files(&packages_dir)?;
        info!(
            "Loading {} package descriptors from {}",
            files.len(),
            packages_dir.display()
        );

        for path in files {
            let mut desc = self.reader.load(&path)?;
            if let Some(extra) = self.host_deps.get(&desc.name) {
                let added = desc.merge_deps(extra);
                if added > 0 {
                    debug!("Added {} host dependencies to {}", added, desc.name);
                }
            }
            debug!("Loaded {} {} from {}", desc.name, desc.version, path.display());
            let _ = catalog.insert(desc);
        }

        Ok(catalog)
    }
}

/// JSON files directly in `dir` or one directory below it, sorted by path.
///
/// # Errors
///
/// Returns `ConfigError::Walk` if the directory cannot be scanned.
pub fn descriptor_files(dir: &Path) -> ConfigResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).min_depth(1).max_depth(2) {
        let entry = entry.map_err(|source| ConfigError::Walk {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().is_some_and(|ext| ext == "json") {
            files.push(path.to_path_buf());
        }
    }
    files.sort();
    Ok(files)
}
