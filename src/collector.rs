//! Failure-capturing executor.
//!
//! A [`FailureCollector`] runs a sequence of fallible actions, capturing
//! failures instead of short-circuiting, so that later actions (after-hooks,
//! cleanup) still run when earlier ones failed. Captured failures surface as
//! a single failure or a composite, in original capture order.

use std::future::Future;
use std::sync::Arc;

use crate::error::{Failure, FailureResult};

/// Decides whether a captured failure is fatal.
///
/// Classification consults [`Failure::classification_target`], so wrapper
/// errors are unwrapped one level before the predicate sees them.
pub type FatalPredicate = Arc<dyn Fn(&Failure) -> bool + Send + Sync>;

/// The default predicate: only failures of kind `Fatal` are fatal.
pub fn default_fatal_predicate() -> FatalPredicate {
    Arc::new(|failure| failure.is_fatal())
}

/// Executes fallible actions and aggregates their failures.
///
/// Once a fatal failure is captured the batch is poisoned: further
/// `execute` calls are no-ops and the fatal failure propagates alone,
/// never merged into a composite.
pub struct FailureCollector {
    failures: Vec<Failure>,
    fatal: Option<Failure>,
    predicate: FatalPredicate,
}

impl FailureCollector {
    pub fn new() -> Self {
        Self::with_predicate(default_fatal_predicate())
    }

    pub fn with_predicate(predicate: FatalPredicate) -> Self {
        FailureCollector {
            failures: Vec::new(),
            fatal: None,
            predicate,
        }
    }

    /// Run a synchronous action, capturing its failure.
    pub fn execute<F>(&mut self, action: F)
    where
        F: FnOnce() -> FailureResult<()>,
    {
        if self.fatal.is_some() {
            return;
        }
        if let Err(failure) = action() {
            self.record(failure);
        }
    }

    /// Run an async action, capturing its failure.
    pub async fn execute_async<F>(&mut self, action: F)
    where
        F: Future<Output = FailureResult<()>>,
    {
        if self.fatal.is_some() {
            return;
        }
        if let Err(failure) = action.await {
            self.record(failure);
        }
    }

    /// Record a failure directly.
    pub fn record(&mut self, failure: Failure) {
        if (self.predicate)(failure.classification_target()) {
            if self.fatal.is_none() {
                self.fatal = Some(failure);
            }
        } else {
            self.failures.push(failure);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fatal.is_none() && self.failures.is_empty()
    }

    pub fn has_fatal(&self) -> bool {
        self.fatal.is_some()
    }

    pub fn fatal(&self) -> Option<&Failure> {
        self.fatal.as_ref()
    }

    pub fn failures(&self) -> &[Failure] {
        &self.failures
    }

    /// True when at least one failure was captured and every one is an
    /// intentional abort.
    pub fn all_aborts(&self) -> bool {
        self.fatal.is_none()
            && !self.failures.is_empty()
            && self.failures.iter().all(Failure::is_abort)
    }

    /// Raise the collected result without consuming the collector.
    pub fn assert_empty(&self) -> FailureResult<()> {
        if let Some(fatal) = &self.fatal {
            return Err(fatal.clone());
        }
        match self.failures.len() {
            0 => Ok(()),
            1 => Err(self.failures[0].clone()),
            _ => Err(Failure::composite(self.failures.clone())),
        }
    }

    /// Consume the collector: `Ok` if nothing was captured, the single
    /// failure if one, a composite otherwise. A fatal failure propagates
    /// alone and unmodified.
    pub fn into_result(mut self) -> FailureResult<()> {
        if let Some(fatal) = self.fatal.take() {
            return Err(fatal);
        }
        match self.failures.len() {
            0 => Ok(()),
            1 => Err(self.failures.remove(0)),
            _ => Err(Failure::composite(self.failures)),
        }
    }
}

impl Default for FailureCollector {
    fn default() -> Self {
        Self::new()
    }
}
