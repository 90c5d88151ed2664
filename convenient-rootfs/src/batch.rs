//! Batch orchestration
//!
//! Runs the dispatcher over a resolved build order and collects one outcome
//! per package. With `ignore_errors` unset the first failure stops the batch;
//! otherwise failures are recorded and the batch moves on. What happens to
//! packages depending on a failed one is governed by [`DependentPolicy`].

use crate::arch::TargetArch;
use crate::catalog::Catalog;
use crate::context::BuildContext;
use crate::dispatch::{BuildError, DispatchOutcome, Dispatcher};
use crate::resolver::{BuildOrder, dependency_graph};
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;
use tracing::{error, info, warn};

/// What to do with packages that depend on a failed package.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DependentPolicy {
    /// Build them anyway; they will most likely fail on their own
    #[default]
    Attempt,
    /// Mark every transitive dependent as skipped without building it
    SkipDependents,
}

/// Failure handling for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchOptions {
    /// Record failures and continue instead of stopping at the first one
    pub ignore_errors: bool,
    /// Treatment of dependents of failed packages
    pub dependents: DependentPolicy,
}

/// Why a package was not built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Host tool, never built
    HostTool,
    /// A (transitive) dependency failed
    DependencyFailed(String),
}

/// Result of one package in a batch.
#[derive(Debug, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BuildResult {
    /// Built and installed, or prebuilt and extracted
    Succeeded,
    /// Failed with the given error
    Failed {
        /// The failure
        #[serde(serialize_with = "serialize_display")]
        error: BuildError,
    },
    /// Not attempted
    Skipped {
        /// Why
        reason: SkipReason,
    },
}

fn serialize_display<S: Serializer>(err: &BuildError, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.collect_str(err)
}

/// Outcome of one package.
#[derive(Debug, Serialize)]
pub struct PackageOutcome {
    /// Package name
    pub name: String,
    /// What happened
    #[serde(flatten)]
    pub result: BuildResult,
}

/// Outcomes of a whole batch, in build order.
#[derive(Debug, Default, Serialize)]
pub struct BatchReport {
    outcomes: Vec<PackageOutcome>,
    aborted: bool,
}

impl BatchReport {
    fn record(&mut self, name: &str, result: BuildResult) {
        self.outcomes.push(PackageOutcome {
            name: name.to_string(),
            result,
        });
    }

    /// Every outcome in build order.
    #[must_use]
    pub fn outcomes(&self) -> &[PackageOutcome] {
        &self.outcomes
    }

    /// Names of packages that succeeded.
    #[must_use]
    pub fn succeeded(&self) -> Vec<&str> {
        self.outcomes
            .iter()
            .filter(|o| matches!(o.result, BuildResult::Succeeded))
            .map(|o| o.name.as_str())
            .collect()
    }

    /// Failed packages with their errors.
    #[must_use]
    pub fn failures(&self) -> Vec<(&str, &BuildError)> {
        self.outcomes
            .iter()
            .filter_map(|o| match &o.result {
                BuildResult::Failed { error } => Some((o.name.as_str(), error)),
                _ => None,
            })
            .collect()
    }

    /// Skipped packages with the reason.
    #[must_use]
    pub fn skipped(&self) -> Vec<(&str, &SkipReason)> {
        self.outcomes
            .iter()
            .filter_map(|o| match &o.result {
                BuildResult::Skipped { reason } => Some((o.name.as_str(), reason)),
                _ => None,
            })
            .collect()
    }

    /// Outcome of a single package, if it was reached.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&BuildResult> {
        self.outcomes
            .iter()
            .find(|o| o.name == name)
            .map(|o| &o.result)
    }

    /// Whether the batch stopped at a failure before the end of the order.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.aborted
    }

    /// True iff no package failed and the batch ran to completion.
    #[must_use]
    pub fn is_success(&self) -> bool {
        !self.aborted && self.failures().is_empty()
    }
}

/// Drives the dispatcher over a build order.
pub struct BatchOrchestrator<'d, 'a> {
    dispatcher: &'d Dispatcher<'a>,
    options: BatchOptions,
}

impl<'d, 'a> BatchOrchestrator<'d, 'a> {
    /// Create an orchestrator.
    #[must_use]
    pub fn new(dispatcher: &'d Dispatcher<'a>, options: BatchOptions) -> Self {
        Self {
            dispatcher,
            options,
        }
    }

    /// Build every package in `order`.
    ///
    /// The returned report is marked aborted when a package failed and
    /// errors are not ignored; no package after the failure is reached.
    pub fn run(
        &self,
        catalog: &Catalog,
        order: &BuildOrder,
        target: TargetArch,
        ctx: &BuildContext,
    ) -> BatchReport {
        let mut report = BatchReport::default();
        let graph = (self.options.dependents == DependentPolicy::SkipDependents)
            .then(|| dependency_graph(catalog));
        // dependent -> failed package that blocks it
        let mut blocked: BTreeMap<String, String> = BTreeMap::new();

        info!("Building {} packages for {}", order.len(), target);

        for name in order {
            if let Some(root) = blocked.get(name) {
                warn!("Skipping {} because {} failed", name, root);
                report.record(
                    name,
                    BuildResult::Skipped {
                        reason: SkipReason::DependencyFailed(root.clone()),
                    },
                );
                continue;
            }

            let Some(pkg) = catalog.get(name) else {
                warn!("{} is in the build order but not in the catalog", name);
                continue;
            };

            match self.dispatcher.dispatch(pkg, target, ctx) {
                Ok(DispatchOutcome::HostTool) => report.record(
                    name,
                    BuildResult::Skipped {
                        reason: SkipReason::HostTool,
                    },
                ),
                Ok(DispatchOutcome::Built | DispatchOutcome::Extracted) => {
                    report.record(name, BuildResult::Succeeded);
                }
                Err(err) => {
                    error!("❌ {}", err);
                    report.record(name, BuildResult::Failed { error: err });

                    if !self.options.ignore_errors {
                        report.aborted = true;
                        return report;
                    }
                    warn!("➡️  Ignoring error and continuing");

                    if let Some(graph) = &graph {
                        if let Ok(dependents) = graph.transitive_dependents(name) {
                            for dependent in dependents {
                                let _ = blocked.entry(dependent).or_insert_with(|| name.clone());
                            }
                        }
                    }
                }
            }
        }

        report
    }
}
