//! Build order resolution
//!
//! Thin layer over [`convenient_graph::DependencyGraph`] that maps graph
//! errors to package-level ones.

use crate::catalog::Catalog;
use convenient_graph::{DependencyGraph, OrderError};
use thiserror::Error;
use tracing::debug;

/// Errors that prevent computing any build order
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ResolveError {
    /// A package depends on a name that is not in the catalog.
    #[error("Unknown dependency {missing} for package {referenced_by}")]
    UnknownDependency {
        /// The dependency that could not be found
        missing: String,
        /// The package declaring it
        referenced_by: String,
    },

    /// The dependency graph contains a cycle.
    #[error("Circular dependency detected at {package} ({})", .cycle.join(" -> "))]
    CircularDependency {
        /// Package that closed the cycle
        package: String,
        /// In-progress chain, starting and ending at `package`
        cycle: Vec<String>,
    },
}

impl From<OrderError> for ResolveError {
    fn from(err: OrderError) -> Self {
        match err {
            OrderError::CycleDetected { node, cycle } => Self::CircularDependency {
                package: node,
                cycle,
            },
            OrderError::UnknownNode {
                missing,
                referenced_by,
            } => Self::UnknownDependency {
                missing,
                referenced_by,
            },
        }
    }
}

/// Result type for resolution
pub type ResolveResult<T> = Result<T, ResolveError>;

/// Dependency graph of every package in the catalog.
#[must_use]
pub fn dependency_graph(catalog: &Catalog) -> DependencyGraph<String> {
    let mut graph = DependencyGraph::new();
    for desc in catalog {
        let _ = graph.add_node(desc.name.clone(), desc.deps.iter().cloned());
    }
    graph
}

/// Packages in an order where each one follows all of its dependencies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOrder {
    names: Vec<String>,
}

impl BuildOrder {
    /// Resolve the build order of the whole catalog.
    ///
    /// # Errors
    ///
    /// Fails on the first unknown dependency or cycle found. No partial order
    /// is returned.
    pub fn resolve(catalog: &Catalog) -> ResolveResult<Self> {
        let names = dependency_graph(catalog).build_order()?;
        debug!("Resolved build order: {}", names.join(", "));
        Ok(Self { names })
    }

    /// Package names in build order.
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.names
    }

    /// Iterate over package names in build order.
    pub fn iter(&self) -> std::slice::Iter<'_, String> {
        self.names.iter()
    }

    /// Number of packages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.names.len()
    }

    /// Whether there is nothing to build.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Position of a package in the order.
    #[must_use]
    pub fn position(&self, name: &str) -> Option<usize> {
        self.names.iter().position(|n| n == name)
    }

    /// Consume into the name list.
    #[must_use]
    pub fn into_vec(self) -> Vec<String> {
        self.names
    }
}

impl<'a> IntoIterator for &'a BuildOrder {
    type Item = &'a String;
    type IntoIter = std::slice::Iter<'a, String>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
