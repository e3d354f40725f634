//! Node outcomes and skip results.

use crate::error::Failure;

/// Terminal outcome of an executed node.
///
/// `Aborted` is distinct from `Failed`: it signals an intentional early
/// stop and is never aggregated with ordinary failures when composing
/// parent results.
#[derive(Debug, Clone)]
pub enum TestOutcome {
    Passed,
    Aborted(Option<String>),
    Failed(Failure),
}

impl TestOutcome {
    pub fn is_passed(&self) -> bool {
        matches!(self, TestOutcome::Passed)
    }

    pub fn is_aborted(&self) -> bool {
        matches!(self, TestOutcome::Aborted(_))
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, TestOutcome::Failed(_))
    }

    pub fn failure(&self) -> Option<&Failure> {
        match self {
            TestOutcome::Failed(failure) => Some(failure),
            _ => None,
        }
    }
}

/// Result of a node's skip predicate, evaluated once before any lifecycle
/// hook runs.
#[derive(Debug, Clone)]
pub struct SkipResult {
    skipped: bool,
    reason: Option<String>,
}

impl SkipResult {
    /// Do not skip; execute the node normally.
    pub fn run() -> Self {
        SkipResult {
            skipped: false,
            reason: None,
        }
    }

    /// Skip the node and its whole subtree, with a reason string.
    pub fn skip(reason: impl Into<String>) -> Self {
        SkipResult {
            skipped: true,
            reason: Some(reason.into()),
        }
    }

    pub fn is_skipped(&self) -> bool {
        self.skipped
    }

    pub fn reason(&self) -> Option<&str> {
        self.reason.as_deref()
    }
}
