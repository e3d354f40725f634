pub mod engine_error;
pub mod failure;

pub use engine_error::EngineError;
pub use failure::{Failure, FailureKind};

/// Result alias for fallible hook and store operations.
pub type FailureResult<T> = Result<T, Failure>;
