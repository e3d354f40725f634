//! canopy, a pluggable hierarchical test-execution runtime.
//!
//! Test front-ends describe their work as a tree of [`node::TestNode`]s;
//! the [`engine::HierarchicalEngine`] walks the tree, honoring per-node
//! concurrency modes, named resource locks, timeouts, and lifecycle
//! hooks, and reports progress as a stream of
//! [`events::ExecutionEvent`]s. Runners implemented outside the engine
//! plug in through the [`adapter`] module.

pub mod adapter;
pub mod collector;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod lock;
pub mod node;
pub mod store;
pub mod timeout;

pub use collector::FailureCollector;
pub use config::EngineConfig;
pub use engine::{ExecutionSummary, HierarchicalEngine};
pub use error::{EngineError, Failure, FailureResult};
pub use events::{EventReceiver, ExecutionEvent};
pub use lock::{LockMode, ResourceRequirement, GLOBAL_RESOURCE};
pub use node::{
    DynamicRegistrar, ExecutionMode, NodeKind, NodeTimeout, SkipResult, TestNode, TestOutcome,
    UniqueId,
};
pub use store::{Namespace, NodeContext};
pub use timeout::CancelSignal;
