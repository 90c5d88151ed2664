//! Target architecture mapping
//!
//! Maps the user-facing architecture names to the compiler triple, the
//! cross-compiler prefix and the names the autotools and pacman worlds use.

use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Requested architecture is not one we know how to build for.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Unsupported architecture: {0} (expected x86_64, amd64, arm64 or aarch64)")]
pub struct UnsupportedArchitecture(pub String);

/// A supported build target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetArch {
    /// 64-bit x86, built with the native host toolchain
    X86_64,
    /// 64-bit ARM, built with the `aarch64-linux-gnu-` cross toolchain
    Aarch64,
}

impl TargetArch {
    /// Parse an architecture name. Accepts `x86_64`/`amd64` and
    /// `arm64`/`aarch64`.
    ///
    /// # Errors
    ///
    /// Returns `UnsupportedArchitecture` for any other value.
    pub fn parse(name: &str) -> Result<Self, UnsupportedArchitecture> {
        match name.trim() {
            "x86_64" | "amd64" => Ok(Self::X86_64),
            "arm64" | "aarch64" => Ok(Self::Aarch64),
            other => Err(UnsupportedArchitecture(other.to_string())),
        }
    }

    /// GNU host triple passed to `--host=`.
    #[must_use]
    pub fn triple(self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64-unknown-linux-gnu",
            Self::Aarch64 => "aarch64-unknown-linux-gnu",
        }
    }

    /// Prefix prepended to toolchain binaries. Empty for native builds.
    #[must_use]
    pub fn cross_prefix(self) -> &'static str {
        match self {
            Self::X86_64 => "",
            Self::Aarch64 => "aarch64-linux-gnu-",
        }
    }

    /// Architecture name as used by autotools and pacman.
    #[must_use]
    pub fn canonical_name(self) -> &'static str {
        match self {
            Self::X86_64 => "x86_64",
            Self::Aarch64 => "aarch64",
        }
    }

    /// Name of a toolchain binary for this target, e.g. `aarch64-linux-gnu-gcc`.
    #[must_use]
    pub fn tool(self, name: &str) -> String {
        format!("{}{name}", self.cross_prefix())
    }

    /// Whether this target needs a cross toolchain.
    #[must_use]
    pub fn is_cross(self) -> bool {
        !self.cross_prefix().is_empty()
    }
}

impl FromStr for TargetArch {
    type Err = UnsupportedArchitecture;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for TargetArch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_name())
    }
}
