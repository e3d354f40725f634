//! Node execution contexts.

use std::sync::Arc;

use crate::config::EngineConfig;
use crate::error::FailureResult;
use crate::events::EventEmitter;
use crate::node::{ExecutionMode, UniqueId};
use crate::store::{NamespacedStore, Namespace, StoreValue};
use crate::timeout::CancelSignal;

/// The activation record for one executing node.
///
/// Contexts form a tree mirroring the executed node tree: each child links
/// to its parent and owns a child store scope reading through to the
/// parent's. A context is created when its node begins execution and torn
/// down, close callbacks invoked innermost first, when the node's
/// subtree finishes.
pub struct NodeContext {
    unique_id: UniqueId,
    display_name: String,
    parent: Option<Arc<NodeContext>>,
    store: Arc<NamespacedStore>,
    execution_mode: ExecutionMode,
    config: Arc<EngineConfig>,
    cancel: CancelSignal,
    emitter: EventEmitter,
}

impl NodeContext {
    pub(crate) fn root(
        unique_id: UniqueId,
        display_name: String,
        config: Arc<EngineConfig>,
        execution_mode: ExecutionMode,
        cancel: CancelSignal,
        emitter: EventEmitter,
    ) -> Arc<Self> {
        Arc::new(NodeContext {
            unique_id,
            display_name,
            parent: None,
            store: NamespacedStore::new(),
            execution_mode,
            config,
            cancel,
            emitter,
        })
    }

    pub(crate) fn child(
        self: &Arc<Self>,
        unique_id: UniqueId,
        display_name: String,
        execution_mode: ExecutionMode,
        cancel: CancelSignal,
    ) -> Arc<Self> {
        Arc::new(NodeContext {
            unique_id,
            display_name,
            parent: Some(self.clone()),
            store: NamespacedStore::child(&self.store),
            execution_mode,
            config: self.config.clone(),
            cancel,
            emitter: self.emitter.clone(),
        })
    }

    pub fn unique_id(&self) -> &UniqueId {
        &self.unique_id
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn parent(&self) -> Option<&Arc<NodeContext>> {
        self.parent.as_ref()
    }

    /// This node's store scope.
    pub fn store(&self) -> &Arc<NamespacedStore> {
        &self.store
    }

    /// Convenience read-through lookup on the store chain.
    pub fn get(&self, namespace: &Namespace, key: &str) -> Option<StoreValue> {
        self.store.get(namespace, key)
    }

    /// The execution mode resolved from this node and its ancestors.
    pub fn execution_mode(&self) -> ExecutionMode {
        self.execution_mode
    }

    /// The immutable configuration snapshot for this execution pass.
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// This node's cooperative cancellation signal.
    pub fn cancel_signal(&self) -> &CancelSignal {
        &self.cancel
    }

    /// The engine's event emitter, for collaborators that report on behalf
    /// of externally executed children.
    pub fn emitter(&self) -> &EventEmitter {
        &self.emitter
    }

    /// Tear down this context's own store scope.
    pub(crate) fn close(&self) -> FailureResult<()> {
        self.store.close()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn root_ctx() -> Arc<NodeContext> {
        NodeContext::root(
            UniqueId::root("engine", "canopy"),
            "root".into(),
            Arc::new(EngineConfig::default()),
            ExecutionMode::SameThread,
            CancelSignal::new(),
            EventEmitter::disabled(),
        )
    }

    #[test]
    fn test_child_context_reads_parent_store() {
        let root = root_ctx();
        let ns = Namespace::global();
        root.store().put(&ns, "setting", Arc::new(String::from("on")));

        let child = root.child(
            root.unique_id().append("test", "leaf"),
            "leaf".into(),
            ExecutionMode::SameThread,
            CancelSignal::new(),
        );
        let value = child.get(&ns, "setting").unwrap();
        assert_eq!(*value.downcast::<String>().unwrap(), "on");
    }

    #[test]
    fn test_child_writes_do_not_leak_upward() {
        let root = root_ctx();
        let ns = Namespace::global();
        let child = root.child(
            root.unique_id().append("test", "leaf"),
            "leaf".into(),
            ExecutionMode::Concurrent,
            CancelSignal::new(),
        );
        child.store().put(&ns, "local", Arc::new(1_usize));
        assert!(root.get(&ns, "local").is_none());
        assert_eq!(child.execution_mode(), ExecutionMode::Concurrent);
        assert!(child.parent().is_some());
    }
}
