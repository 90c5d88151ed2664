//! Per-package build environment
//!
//! A [`BuildEnv`] is a plain map of environment variables. It is captured from
//! the process once and then cloned for every package before the toolchain
//! overlay is applied, so no package ever sees another package's changes and
//! the process environment itself is never modified.

use crate::arch::TargetArch;
use std::collections::BTreeMap;

/// Environment variables handed to every command of one package build.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BuildEnv {
    vars: BTreeMap<String, String>,
}

impl BuildEnv {
    /// Snapshot of the current process environment.
    ///
    /// Variables whose name or value is not valid UTF-8 are left out.
    #[must_use]
    pub fn from_process() -> Self {
        Self::from_vars(
            std::env::vars_os()
                .filter_map(|(k, v)| Some((k.into_string().ok()?, v.into_string().ok()?))),
        )
    }

    /// Build an environment from explicit pairs.
    pub fn from_vars<I, K, V>(vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            vars: vars
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    /// Copy of `self` with the compiler variables for `target` overlaid.
    ///
    /// Sets `CC`, `CXX`, `LD` and `AR`, plus `CROSS_COMPILE` when the target
    /// needs a cross toolchain. `ARCH` is left alone: kernel-style makefiles
    /// read it and expect their own spelling (`arm64`), not ours.
    #[must_use]
    pub fn for_target(&self, target: TargetArch) -> Self {
        let mut env = self.clone();
        env.set("CC", target.tool("gcc"));
        env.set("CXX", target.tool("g++"));
        env.set("LD", target.tool("ld"));
        env.set("AR", target.tool("ar"));
        if target.is_cross() {
            env.set("CROSS_COMPILE", target.cross_prefix());
        } else {
            let _ = env.vars.remove("CROSS_COMPILE");
        }
        env
    }

    /// Set a variable, replacing any previous value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        let _ = self.vars.insert(key.into(), value.into());
    }

    /// Look up a variable.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars.get(key).map(String::as_str)
    }

    /// All variables in name order.
    #[must_use]
    pub fn vars(&self) -> &BTreeMap<String, String> {
        &self.vars
    }

    /// Number of variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Whether no variable is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}
