//! Engine infrastructure errors.

use thiserror::Error;

/// Errors of the engine itself, distinct from test [`Failure`](super::Failure)s
/// which are data flowing through execution.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("malformed unique id: {0}")]
    MalformedUniqueId(String),
}
