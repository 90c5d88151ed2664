//! Generic dependency graph library for build ordering.
//!
//! This crate provides a keyed dependency graph that can be used for:
//! - Package build ordering
//! - Detecting circular dependencies
//! - Detecting references to nodes that were never declared
//! - Finding every node affected by a failed dependency
//!
//! # Features
//!
//! - Nodes are addressed by their key (any `Ord + Clone + Display` type)
//! - Dependencies are kept in declaration order
//! - Depth-first, post-order topological sort with three-state markers
//! - Cycle and unknown-reference reporting that names the offending nodes
//!
//! # Example
//!
//! ```
//! use convenient_graph::DependencyGraph;
//!
//! let mut graph = DependencyGraph::new();
//! graph.add_node("zlib", Vec::<&str>::new());
//! graph.add_node("openssl", vec!["zlib"]);
//! graph.add_node("curl", vec!["openssl", "zlib"]);
//!
//! let order = graph.build_order().unwrap();
//! let pos = |k: &str| order.iter().position(|n| *n == k).unwrap();
//! assert!(pos("zlib") < pos("openssl"));
//! assert!(pos("openssl") < pos("curl"));
//! ```

#![warn(missing_docs)]
#![deny(unsafe_code)]
#![warn(unused_results)]

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::fmt;

/// Errors that prevent computing a build order.
///
/// Keys are rendered to strings so the error does not carry the key type.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OrderError {
    /// A node was reached again while it was still being visited.
    #[error("Circular dependency detected at {node} ({})", .cycle.join(" -> "))]
    CycleDetected {
        /// Node that closed the cycle
        node: String,
        /// The chain of in-progress nodes, starting and ending at `node`
        cycle: Vec<String>,
    },

    /// A dependency references a node that is not part of the graph.
    #[error("Unknown dependency {missing} referenced by {referenced_by}")]
    UnknownNode {
        /// The key that could not be found
        missing: String,
        /// The node whose dependency list mentions `missing`
        referenced_by: String,
    },
}

/// Error types for graph queries.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// Node not found
    #[error("Node {0} not found in graph")]
    NodeNotFound(String),
}

/// Result type for graph queries.
pub type GraphResult<T> = Result<T, GraphError>;

/// Result type for build ordering.
pub type OrderResult<T> = Result<T, OrderError>;

/// Visitation marker used by the depth-first traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Visit {
    Unvisited,
    InProgress,
    Done,
}

/// Directed dependency graph keyed by node name.
///
/// Edges point from a node to the nodes it depends on. Dependencies may name
/// keys that were never added; such references are reported by
/// [`DependencyGraph::build_order`] rather than rejected on insertion, so a
/// graph can be assembled from sources in any order.
#[derive(Debug, Clone)]
pub struct DependencyGraph<K: Ord> {
    nodes: BTreeMap<K, Vec<K>>,
}

impl<K: Ord> Default for DependencyGraph<K> {
    fn default() -> Self {
        Self {
            nodes: BTreeMap::new(),
        }
    }
}

impl<K> DependencyGraph<K>
where
    K: Ord + Clone + fmt::Display,
{
    /// Create a new empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node with its dependencies.
    ///
    /// Re-adding an existing key replaces its dependency list and returns
    /// the previous one. Duplicate dependencies are collapsed, keeping the
    /// first occurrence.
    pub fn add_node<I, D>(&mut self, key: K, deps: I) -> Option<Vec<K>>
    where
        I: IntoIterator<Item = D>,
        D: Into<K>,
    {
        let mut unique: Vec<K> = Vec::new();
        for dep in deps {
            let dep = dep.into();
            if !unique.contains(&dep) {
                unique.push(dep);
            }
        }
        self.nodes.insert(key, unique)
    }

    /// Check whether a node exists.
    #[must_use]
    pub fn contains(&self, key: &K) -> bool {
        self.nodes.contains_key(key)
    }

    /// Get the number of nodes in the graph.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Get the number of dependency edges in the graph.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.nodes.values().map(Vec::len).sum()
    }

    /// Iterate over all node keys in key order.
    pub fn keys(&self) -> impl Iterator<Item = &K> {
        self.nodes.keys()
    }

    /// Get the direct dependencies of a node.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::NodeNotFound` if the node doesn't exist.
    pub fn dependencies(&self, key: &K) -> GraphResult<&[K]> {
        self.nodes
            .get(key)
            .map(Vec::as_slice)
            .ok_or_else(|| GraphError::NodeNotFound(key.to_string()))
    }

    /// Get the direct dependents of a node (nodes listing it as a dependency).
    ///
    /// # Errors
    ///
    /// Returns `GraphError::NodeNotFound` if the node doesn't exist.
    pub fn dependents(&self, key: &K) -> GraphResult<Vec<K>> {
        if !self.nodes.contains_key(key) {
            return Err(GraphError::NodeNotFound(key.to_string()));
        }
        Ok(self
            .nodes
            .iter()
            .filter(|(_, deps)| deps.contains(key))
            .map(|(k, _)| k.clone())
            .collect())
    }

    /// Get every node that depends on `key`, directly or transitively.
    ///
    /// The node itself is not part of the result.
    ///
    /// # Errors
    ///
    /// Returns `GraphError::NodeNotFound` if the node doesn't exist.
    pub fn transitive_dependents(&self, key: &K) -> GraphResult<BTreeSet<K>> {
        if !self.nodes.contains_key(key) {
            return Err(GraphError::NodeNotFound(key.to_string()));
        }

        // Reverse adjacency, built once per query
        let mut reverse: BTreeMap<&K, Vec<&K>> = BTreeMap::new();
        for (node, deps) in &self.nodes {
            for dep in deps {
                reverse.entry(dep).or_default().push(node);
            }
        }

        let mut found = BTreeSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(key);

        while let Some(current) = queue.pop_front() {
            if let Some(parents) = reverse.get(current) {
                for &parent in parents {
                    if parent != key && found.insert(parent.clone()) {
                        queue.push_back(parent);
                    }
                }
            }
        }

        Ok(found)
    }

    /// Compute a build order with a depth-first, post-order traversal.
    ///
    /// Every node appears after all of its dependencies. The relative order
    /// of unrelated nodes is an implementation detail and must not be relied
    /// upon.
    ///
    /// # Errors
    ///
    /// - `OrderError::UnknownNode` if a dependency names a key that is not in
    ///   the graph
    /// - `OrderError::CycleDetected` if a node is reached while still in
    ///   progress
    pub fn build_order(&self) -> OrderResult<Vec<K>> {
        let mut marks: BTreeMap<&K, Visit> =
            self.nodes.keys().map(|k| (k, Visit::Unvisited)).collect();
        let mut order = Vec::with_capacity(self.nodes.len());

        for root in self.nodes.keys() {
            if marks.get(root) == Some(&Visit::Unvisited) {
                self.visit(root, &mut marks, &mut order)?;
            }
        }

        Ok(order)
    }

    /// Iterative DFS from `root`. The explicit stack holds each in-progress
    /// node together with the index of the next dependency to look at.
    fn visit<'a>(
        &'a self,
        root: &'a K,
        marks: &mut BTreeMap<&'a K, Visit>,
        order: &mut Vec<K>,
    ) -> OrderResult<()> {
        let mut stack: Vec<(&'a K, usize)> = vec![(root, 0)];
        let _ = marks.insert(root, Visit::InProgress);

        while let Some((node, next)) = stack.last_mut() {
            let node: &'a K = *node;
            let deps = self.nodes.get(node).map(Vec::as_slice).unwrap_or_default();

            let Some(dep) = deps.get(*next) else {
                // All dependencies done: post-order append
                let _ = marks.insert(node, Visit::Done);
                order.push(node.clone());
                let _ = stack.pop();
                continue;
            };
            *next += 1;

            let Some((dep_key, _)) = self.nodes.get_key_value(dep) else {
                return Err(OrderError::UnknownNode {
                    missing: dep.to_string(),
                    referenced_by: node.to_string(),
                });
            };

            match marks.get(dep_key).copied().unwrap_or(Visit::Unvisited) {
                Visit::Done => {}
                Visit::InProgress => {
                    let start = stack
                        .iter()
                        .position(|(k, _)| *k == dep_key)
                        .unwrap_or_default();
                    let mut cycle: Vec<String> =
                        stack[start..].iter().map(|(k, _)| k.to_string()).collect();
                    cycle.push(dep_key.to_string());
                    return Err(OrderError::CycleDetected {
                        node: dep_key.to_string(),
                        cycle,
                    });
                }
                Visit::Unvisited => {
                    let _ = marks.insert(dep_key, Visit::InProgress);
                    stack.push((dep_key, 0));
                }
            }
        }

        Ok(())
    }
}
