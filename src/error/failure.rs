//! Test failure values.
//!
//! A [`Failure`] is the unit of captured test failure flowing through the
//! engine: hook results, collector aggregates, and reported outcomes all
//! carry `Failure` values. Failures are data, not control flow; the engine
//! never panics on a failing test.

use std::sync::Arc;

use thiserror::Error;

/// Classification of a captured failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// An assertion-level failure raised by test code.
    Assertion,
    /// An unexpected error raised by test or hook code.
    Error,
    /// A non-recoverable failure. Propagates alone and halts the remaining
    /// actions in its collector batch.
    Fatal,
    /// An intentional early stop (assumption failure). Reported distinctly
    /// from ordinary failures.
    Aborted,
    /// A cooperative-cancellation signal surfaced as a failure value.
    Cancelled,
}

/// A captured test failure.
///
/// Failures are cheap to clone: the optional cause is `Arc`-shared and the
/// suppressed list is only populated for composites.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct Failure {
    message: String,
    kind: FailureKind,
    cause: Option<Arc<Failure>>,
    suppressed: Vec<Failure>,
}

impl Failure {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Failure {
            message: message.into(),
            kind,
            cause: None,
            suppressed: Vec::new(),
        }
    }

    /// An assertion failure.
    pub fn assertion(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Assertion, message)
    }

    /// An unexpected error.
    pub fn error(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Error, message)
    }

    /// A fatal, non-recoverable failure.
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Fatal, message)
    }

    /// An intentional early stop with the given reason.
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self::new(FailureKind::Aborted, reason)
    }

    /// A cooperative-cancellation marker.
    pub fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "execution cancelled")
    }

    /// Attach an underlying cause, keeping this failure's message.
    pub fn with_cause(mut self, cause: Failure) -> Self {
        self.cause = Some(Arc::new(cause));
        self
    }

    /// Build a composite failure from two or more member failures.
    ///
    /// The message carries a heading plus one line per member, and the
    /// members are attached in capture order as suppressed failures.
    pub fn composite(members: Vec<Failure>) -> Self {
        let mut message = format!("Multiple Failures ({} failures)", members.len());
        for member in &members {
            message.push_str("\n    ");
            message.push_str(member.message());
        }
        Failure {
            message,
            kind: FailureKind::Assertion,
            cause: None,
            suppressed: members,
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> FailureKind {
        self.kind
    }

    pub fn cause(&self) -> Option<&Failure> {
        self.cause.as_deref()
    }

    /// Member failures of a composite, in original capture order.
    pub fn suppressed(&self) -> &[Failure] {
        &self.suppressed
    }

    pub fn is_fatal(&self) -> bool {
        self.kind == FailureKind::Fatal
    }

    pub fn is_abort(&self) -> bool {
        self.kind == FailureKind::Aborted
    }

    pub fn is_cancellation(&self) -> bool {
        self.kind == FailureKind::Cancelled
    }

    /// The failure to consult for fatal-vs-aggregable classification.
    ///
    /// Wrapper errors are unwrapped one level so that classification sees
    /// the real cause instead of the assertion-layer envelope.
    pub fn classification_target(&self) -> &Failure {
        match (&self.kind, self.cause()) {
            (FailureKind::Error, Some(cause)) => cause,
            _ => self,
        }
    }
}
