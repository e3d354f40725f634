//! Adapter for running foreign test runners as nodes in the tree.
//!
//! A foreign runner owns its own discovery and execution; the adapter
//! wraps it in a single node with externally driven children. Exclusion
//! requests are pushed into the runner when it supports filtering; the
//! prune step decides what a partially filterable runner leaves behind.

mod description;
mod filter;
mod notifier;
mod scheduler;

pub use description::ForeignDescription;
pub use filter::{CombinedFilter, ExcludeDescription, ForeignFilter};
pub use notifier::ForeignNotifier;
pub use scheduler::{ForeignScheduler, ForeignWork, PoolSchedulerBridge};

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::error::FailureResult;
use crate::node::TestNode;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AdapterError {
    /// Applying the filter would leave the runner with nothing to run.
    #[error("no tests remain after applying filters")]
    NoTestsRemain,
    /// The runner does not support filtering at all.
    #[error("runner does not support filtering")]
    FilteringUnsupported,
}

/// A test runner implemented outside this engine.
#[async_trait]
pub trait ForeignRunner: Send + Sync {
    /// The plan this runner intends to execute.
    fn description(&self) -> ForeignDescription;

    /// Narrow the plan. Runners that cannot filter keep the default.
    fn filter(&mut self, _filter: &dyn ForeignFilter) -> Result<(), AdapterError> {
        Err(AdapterError::FilteringUnsupported)
    }

    /// Execute the plan, reporting progress through `notifier` and handing
    /// internal parallel work to `scheduler`.
    async fn run(
        &self,
        notifier: &ForeignNotifier,
        scheduler: &dyn ForeignScheduler,
    ) -> FailureResult<()>;
}

/// What pruning decided about a filtered adapter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PruneOutcome {
    /// The runner satisfied every exclusion (or none were requested).
    Keep,
    /// Everything was excluded; drop the adapter node entirely.
    RemoveNode,
    /// The runner could not satisfy some exclusions and will run those
    /// units anyway.
    RunCompletely { warning: String },
}

/// Wraps a [`ForeignRunner`] through filtering and into a schedulable
/// node.
pub struct RunnerAdapter {
    runner: Box<dyn ForeignRunner>,
    pending_exclusions: Vec<String>,
    rejected_exclusions: Vec<String>,
    all_excluded: bool,
    filtering_unsupported: bool,
}

impl RunnerAdapter {
    pub fn new(runner: Box<dyn ForeignRunner>) -> Self {
        RunnerAdapter {
            runner,
            pending_exclusions: Vec::new(),
            rejected_exclusions: Vec::new(),
            all_excluded: false,
            filtering_unsupported: false,
        }
    }

    pub fn description(&self) -> ForeignDescription {
        self.runner.description()
    }

    /// Queue a request to drop one advertised unit.
    pub fn request_exclusion(&mut self, name: impl Into<String>) {
        self.pending_exclusions.push(name.into());
    }

    /// Exclusions the runner refused; these units will run regardless.
    pub fn rejected_exclusions(&self) -> &[String] {
        &self.rejected_exclusions
    }

    /// Push queued exclusions into the runner as one combined filter.
    pub fn apply_filters(&mut self) {
        if self.pending_exclusions.is_empty() {
            return;
        }
        let targets: Vec<String> = self.pending_exclusions.drain(..).collect();
        let combined = CombinedFilter::excluding(targets.iter().cloned());
        match self.runner.filter(&combined) {
            Ok(()) => {
                // a runner may honor the filter only partially; units it
                // still advertises will run regardless
                let description = self.runner.description();
                self.rejected_exclusions.extend(
                    targets
                        .into_iter()
                        .filter(|target| description.find(target).is_some()),
                );
            }
            Err(AdapterError::NoTestsRemain) => self.all_excluded = true,
            Err(AdapterError::FilteringUnsupported) => {
                self.filtering_unsupported = true;
                self.rejected_exclusions.extend(targets);
            }
        }
    }

    /// Apply pending filters and decide what is left.
    pub fn prune(&mut self) -> PruneOutcome {
        self.apply_filters();
        if self.all_excluded {
            return PruneOutcome::RemoveNode;
        }
        if self.rejected_exclusions.is_empty() {
            return PruneOutcome::Keep;
        }
        let description = self.runner.description();
        let direct: Vec<&str> = description
            .children()
            .iter()
            .map(ForeignDescription::name)
            .collect();
        let covers_all = !direct.is_empty()
            && direct
                .iter()
                .all(|name| self.rejected_exclusions.iter().any(|r| r == name));
        if covers_all {
            // every direct child was supposed to go away; removing the
            // whole node satisfies the requests the runner refused
            return PruneOutcome::RemoveNode;
        }
        // one diagnostic per runner: either it cannot filter at all, or it
        // accepted the filter but satisfied it only partially
        let warning = if self.filtering_unsupported {
            format!(
                "runner for '{}' does not support filtering and will therefore be run completely",
                description.name()
            )
        } else {
            format!(
                "runner for '{}' was not able to satisfy all filter requests; {} excluded unit(s) will run anyway",
                description.name(),
                self.rejected_exclusions.len()
            )
        };
        tracing::warn!("{warning}");
        PruneOutcome::RunCompletely { warning }
    }

    /// Wrap the remaining plan as an externally driven node. The runner's
    /// advertised units appear as children for structure and reporting,
    /// but the runner itself executes them.
    pub fn into_node(self) -> TestNode {
        let description = self.runner.description();
        let runner: Arc<dyn ForeignRunner> = Arc::from(self.runner);
        let plan = description.clone();
        let mut node = TestNode::container(description.name())
            .with_segment("runner", description.name())
            .external_children()
            .on_execute(move |ctx, _registrar| {
                let runner = runner.clone();
                let plan = plan.clone();
                async move {
                    let notifier = ForeignNotifier::new(
                        ctx.unique_id().clone(),
                        &plan,
                        ctx.emitter().clone(),
                    );
                    let bridge = PoolSchedulerBridge::new(ctx.cancel_signal().clone());
                    runner.run(&notifier, &bridge).await?;
                    bridge.finished().await
                }
            });
        for child in description.children() {
            node = node.child(plan_to_node(child));
        }
        node
    }
}

fn plan_to_node(description: &ForeignDescription) -> TestNode {
    if description.is_test() {
        TestNode::test(description.name())
    } else {
        let mut node = TestNode::container(description.name());
        for child in description.children() {
            node = node.child(plan_to_node(child));
        }
        node
    }
}
