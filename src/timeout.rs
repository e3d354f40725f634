//! Cooperative and preemptive timeout disciplines.
//!
//! Cooperative timeouts measure wall-clock elapsed time around a call and
//! fail after it returns; the call is never interrupted. Preemptive
//! timeouts run the call on a separate worker, signal cooperative
//! cancellation on deadline, and fail the caller immediately; the worker
//! may keep running in the background and its eventual result is
//! discarded. Side effects performed by cancelled work after the caller
//! has moved on are a documented hazard of the preemptive discipline.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::{Failure, FailureResult};

/// Cooperative cancellation signal.
///
/// A signal requests, never forces, a running unit to stop at its next
/// check; a unit that ignores it keeps running but its result is ignored
/// by the requester.
#[derive(Clone)]
pub struct CancelSignal {
    token: CancellationToken,
}

impl CancelSignal {
    pub fn new() -> Self {
        CancelSignal {
            token: CancellationToken::new(),
        }
    }

    /// A child signal: cancelled when this signal is cancelled, but may be
    /// cancelled on its own without affecting this one.
    pub fn child_signal(&self) -> Self {
        CancelSignal {
            token: self.token.child_token(),
        }
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolve when the signal fires.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Run `action` to completion and fail afterwards if it took longer than
/// `budget`. The failure message states the configured budget and the
/// overage in milliseconds.
pub async fn assert_timeout<T, F>(budget: Duration, action: F) -> FailureResult<T>
where
    F: Future<Output = FailureResult<T>>,
{
    let start = Instant::now();
    let value = action.await?;
    let elapsed = start.elapsed();
    if elapsed > budget {
        return Err(Failure::assertion(format!(
            "execution exceeded timeout of {} ms by {} ms",
            budget.as_millis(),
            (elapsed - budget).as_millis()
        )));
    }
    Ok(value)
}

/// Run `action` on its own worker and fail the caller as soon as `budget`
/// elapses, firing the action's [`CancelSignal`] without waiting for it to
/// stop.
pub async fn assert_timeout_preemptively<T, F, Fut>(budget: Duration, action: F) -> FailureResult<T>
where
    F: FnOnce(CancelSignal) -> Fut,
    Fut: Future<Output = FailureResult<T>> + Send + 'static,
    T: Send + 'static,
{
    let signal = CancelSignal::new();
    let mut handle = tokio::spawn(action(signal.clone()));
    match tokio::time::timeout(budget, &mut handle).await {
        Ok(Ok(result)) => result,
        Ok(Err(join_error)) => Err(Failure::error(format!(
            "timed-out worker panicked: {join_error}"
        ))),
        Err(_elapsed) => {
            signal.cancel();
            // the worker keeps running detached; whatever it produces is
            // discarded
            Err(timeout_failure(budget))
        }
    }
}

/// The failure raised when a preemptive budget elapses.
pub fn timeout_failure(budget: Duration) -> Failure {
    Failure::assertion(format!(
        "execution timed out after {} ms",
        budget.as_millis()
    ))
}
