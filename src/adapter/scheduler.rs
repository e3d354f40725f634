//! Work submission bridge between a foreign runner and the pool.
//!
//! Some foreign runners parallelize internally by handing work units to an
//! executor of the host's choosing. [`PoolSchedulerBridge`] accepts those
//! units, spawns them as tasks, and lets the adapter node wait for all of
//! them before it is reported finished.

use std::future::Future;
use std::pin::Pin;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::task::JoinHandle;

use crate::collector::FailureCollector;
use crate::error::{Failure, FailureResult};
use crate::timeout::CancelSignal;

/// One unit of work a foreign runner hands off.
pub type ForeignWork = Pin<Box<dyn Future<Output = FailureResult<()>> + Send + 'static>>;

/// Receives work units from a foreign runner during its run.
#[async_trait]
pub trait ForeignScheduler: Send + Sync {
    fn schedule(&self, work: ForeignWork);

    /// Wait for every scheduled unit, including units scheduled while
    /// waiting, and surface their failures as one aggregate.
    async fn finished(&self) -> FailureResult<()>;
}

pub struct PoolSchedulerBridge {
    handles: Mutex<Vec<JoinHandle<FailureResult<()>>>>,
    cancel: CancelSignal,
}

impl PoolSchedulerBridge {
    /// `cancel` is the hosting node's signal; a cancellation captured in a
    /// work unit is re-raised through it instead of being folded into the
    /// failure aggregate.
    pub fn new(cancel: CancelSignal) -> Self {
        PoolSchedulerBridge {
            handles: Mutex::new(Vec::new()),
            cancel,
        }
    }
}

#[async_trait]
impl ForeignScheduler for PoolSchedulerBridge {
    fn schedule(&self, work: ForeignWork) {
        self.handles.lock().push(tokio::spawn(work));
    }

    async fn finished(&self) -> FailureResult<()> {
        let mut collector = FailureCollector::new();
        let mut cancelled: Option<Failure> = None;
        loop {
            let batch = std::mem::take(&mut *self.handles.lock());
            if batch.is_empty() {
                break;
            }
            for handle in batch {
                match handle.await {
                    Ok(result) => {
                        if let Err(failure) = result {
                            if failure.is_cancellation() {
                                cancelled.get_or_insert(failure);
                            } else {
                                collector.record(failure);
                            }
                        }
                    }
                    Err(join_error) => {
                        collector.record(Failure::error(format!(
                            "scheduled work panicked: {join_error}"
                        )));
                    }
                }
            }
        }
        if let Some(cancellation) = cancelled {
            self.cancel.cancel();
            // real failures still win the report; the signal carries the
            // cancellation to the rest of the tree
            return if collector.is_empty() {
                Err(cancellation)
            } else {
                collector.into_result()
            };
        }
        collector.into_result()
    }
}
