//! The executable node tree.
//!
//! A [`TestNode`] is one container or leaf test unit. Instead of a deep
//! hierarchy of lifecycle interfaces, each node carries a set of typed
//! callback slots (skip, prepare, before, execute, after, cleanup), any of
//! which may be absent. Discovery front-ends build the tree once; the
//! engine walks it.

mod outcome;
mod unique_id;

pub use outcome::{SkipResult, TestOutcome};
pub use unique_id::{Segment, UniqueId};

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::error::FailureResult;
use crate::lock::ResourceRequirement;
use crate::store::NodeContext;

/// Whether a node is a grouping container or an executable test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NodeKind {
    Container,
    Test,
}

/// Declared concurrency mode of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    SameThread,
    Concurrent,
}

impl Default for ExecutionMode {
    fn default() -> Self {
        ExecutionMode::SameThread
    }
}

/// Per-node timeout applied around the execute slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NodeTimeout {
    pub budget: Duration,
    pub preemptive: bool,
}

impl NodeTimeout {
    /// Measure around the call; never interrupt it.
    pub fn cooperative(budget: Duration) -> Self {
        NodeTimeout {
            budget,
            preemptive: false,
        }
    }

    /// Run on a separate worker and signal cancellation on deadline.
    pub fn preemptive(budget: Duration) -> Self {
        NodeTimeout {
            budget,
            preemptive: true,
        }
    }
}

pub type HookFuture = Pin<Box<dyn Future<Output = FailureResult<()>> + Send>>;
pub type Hook = Arc<dyn Fn(Arc<NodeContext>) -> HookFuture + Send + Sync>;
pub type SkipFuture = Pin<Box<dyn Future<Output = SkipResult> + Send>>;
pub type SkipCheck = Arc<dyn Fn(Arc<NodeContext>) -> SkipFuture + Send + Sync>;
pub type Body = Arc<dyn Fn(Arc<NodeContext>, DynamicRegistrar) -> HookFuture + Send + Sync>;

/// The optional lifecycle callbacks a node registered.
#[derive(Default, Clone)]
pub(crate) struct CapabilitySlots {
    pub(crate) skip: Option<SkipCheck>,
    pub(crate) prepare: Option<Hook>,
    pub(crate) before: Option<Hook>,
    pub(crate) execute: Option<Body>,
    pub(crate) after: Option<Hook>,
    pub(crate) cleanup: Option<Hook>,
}

/// Registers dynamically produced children during a node's execute phase.
///
/// Registered nodes are scheduled exactly like static children and must
/// complete before the parent is reported.
#[derive(Clone)]
pub struct DynamicRegistrar {
    tx: mpsc::UnboundedSender<TestNode>,
}

impl DynamicRegistrar {
    pub(crate) fn channel() -> (Self, mpsc::UnboundedReceiver<TestNode>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (DynamicRegistrar { tx }, rx)
    }

    pub fn register(&self, node: TestNode) {
        let _ = self.tx.send(node);
    }
}

/// One schedulable unit in the execution tree.
pub struct TestNode {
    segment: Segment,
    pub(crate) unique_id: UniqueId,
    display_name: String,
    kind: NodeKind,
    execution_mode: Option<ExecutionMode>,
    resources: Vec<ResourceRequirement>,
    timeout: Option<NodeTimeout>,
    external_children: bool,
    pub(crate) slots: CapabilitySlots,
    pub(crate) children: Vec<TestNode>,
}

impl TestNode {
    fn new(kind: NodeKind, segment_type: &str, display_name: impl Into<String>) -> Self {
        let display_name = display_name.into();
        let segment = Segment::new(segment_type, display_name.clone());
        TestNode {
            unique_id: UniqueId::root(segment.segment_type(), segment.value()),
            segment,
            display_name,
            kind,
            execution_mode: None,
            resources: Vec::new(),
            timeout: None,
            external_children: false,
            slots: CapabilitySlots::default(),
            children: Vec::new(),
        }
    }

    /// A container node grouping other nodes.
    pub fn container(display_name: impl Into<String>) -> Self {
        Self::new(NodeKind::Container, "container", display_name)
    }

    /// A leaf test node.
    pub fn test(display_name: impl Into<String>) -> Self {
        Self::new(NodeKind::Test, "test", display_name)
    }

    /// Override the id segment, keeping the display name.
    pub fn with_segment(mut self, segment_type: impl Into<String>, value: impl Into<String>) -> Self {
        self.segment = Segment::new(segment_type, value);
        self.unique_id = UniqueId::root(self.segment.segment_type(), self.segment.value());
        self
    }

    /// Declare the concurrency mode. Absent means: inherit the engine
    /// default.
    pub fn execution_mode(mut self, mode: ExecutionMode) -> Self {
        self.execution_mode = Some(mode);
        self
    }

    /// Declare a resource this node locks before running.
    pub fn resource(mut self, requirement: ResourceRequirement) -> Self {
        self.resources.push(requirement);
        self
    }

    /// Apply a timeout around the execute slot.
    pub fn timeout(mut self, timeout: NodeTimeout) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Mark this node as executing its children internally (foreign runner
    /// delegation); the engine will not schedule them itself.
    pub fn external_children(mut self) -> Self {
        self.external_children = true;
        self
    }

    /// Register the skip predicate, evaluated once before any hook.
    pub fn skip_when<F, Fut>(mut self, check: F) -> Self
    where
        F: Fn(Arc<NodeContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = SkipResult> + Send + 'static,
    {
        self.slots.skip = Some(Arc::new(move |ctx| Box::pin(check(ctx))));
        self
    }

    pub fn on_prepare<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<NodeContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FailureResult<()>> + Send + 'static,
    {
        self.slots.prepare = Some(Arc::new(move |ctx| Box::pin(hook(ctx))));
        self
    }

    pub fn on_before<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<NodeContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FailureResult<()>> + Send + 'static,
    {
        self.slots.before = Some(Arc::new(move |ctx| Box::pin(hook(ctx))));
        self
    }

    pub fn on_execute<F, Fut>(mut self, body: F) -> Self
    where
        F: Fn(Arc<NodeContext>, DynamicRegistrar) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FailureResult<()>> + Send + 'static,
    {
        self.slots.execute = Some(Arc::new(move |ctx, registrar| Box::pin(body(ctx, registrar))));
        self
    }

    pub fn on_after<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<NodeContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FailureResult<()>> + Send + 'static,
    {
        self.slots.after = Some(Arc::new(move |ctx| Box::pin(hook(ctx))));
        self
    }

    pub fn on_cleanup<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<NodeContext>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = FailureResult<()>> + Send + 'static,
    {
        self.slots.cleanup = Some(Arc::new(move |ctx| Box::pin(hook(ctx))));
        self
    }

    /// Append a child. Insertion order is execution and reporting order
    /// for same-thread siblings.
    pub fn child(mut self, node: TestNode) -> Self {
        self.children.push(node);
        self
    }

    pub fn with_children(mut self, nodes: impl IntoIterator<Item = TestNode>) -> Self {
        self.children.extend(nodes);
        self
    }

    pub fn display_name(&self) -> &str {
        &self.display_name
    }

    pub fn kind(&self) -> NodeKind {
        self.kind
    }

    pub fn declared_mode(&self) -> Option<ExecutionMode> {
        self.execution_mode
    }

    pub fn resources(&self) -> &[ResourceRequirement] {
        &self.resources
    }

    pub fn declared_timeout(&self) -> Option<NodeTimeout> {
        self.timeout
    }

    pub fn has_external_children(&self) -> bool {
        self.external_children
    }

    pub fn unique_id(&self) -> &UniqueId {
        &self.unique_id
    }

    pub fn children(&self) -> &[TestNode] {
        &self.children
    }

    /// Keep only the children matching the predicate.
    pub fn retain_children<F>(&mut self, predicate: F)
    where
        F: FnMut(&TestNode) -> bool,
    {
        self.children.retain(predicate);
    }

    /// Remove containers rendered childless by filtering, bottom-up. A
    /// container with an execute slot of its own is never removed.
    pub fn prune(&mut self) {
        for child in &mut self.children {
            child.prune();
        }
        self.children.retain(|child| {
            child.kind != NodeKind::Container
                || !child.children.is_empty()
                || child.slots.execute.is_some()
        });
    }

    /// Number of nodes in this subtree, this node included.
    pub fn subtree_size(&self) -> usize {
        1 + self.children.iter().map(TestNode::subtree_size).sum::<usize>()
    }

    /// Assign hierarchical ids below `parent`, recursively.
    pub(crate) fn assign_ids(&mut self, parent: &UniqueId) {
        self.unique_id = parent.append(self.segment.segment_type(), self.segment.value());
        let own = self.unique_id.clone();
        for child in &mut self.children {
            child.assign_ids(&own);
        }
    }

    /// Assign this node's id as a tree root, recursing into children.
    pub(crate) fn assign_root_ids(&mut self, root: UniqueId) {
        self.unique_id = root;
        let own = self.unique_id.clone();
        for child in &mut self.children {
            child.assign_ids(&own);
        }
    }

    /// Pull descendant resource declarations up into the highest node of
    /// each path that declares resources itself, so every lock set along a
    /// root-to-leaf path is acquired in one sorted batch at one node.
    /// Nested acquisition while an ancestor guard is held would otherwise
    /// deadlock two subtrees locking the same resources in opposite order.
    /// An emptied subtree loses its concurrency and is run inline under
    /// the hoisting node. Returns whether this subtree declares resources.
    pub(crate) fn hoist_resources(&mut self) -> bool {
        let mut below = false;
        for child in &mut self.children {
            below |= child.hoist_resources();
        }
        if below && !self.resources.is_empty() {
            for child in &mut self.children {
                child.collect_resources_into(&mut self.resources);
                child.force_same_thread();
            }
        }
        below || !self.resources.is_empty()
    }

    fn collect_resources_into(&mut self, into: &mut Vec<ResourceRequirement>) {
        into.append(&mut self.resources);
        for child in &mut self.children {
            child.collect_resources_into(into);
        }
    }

    fn force_same_thread(&mut self) {
        self.execution_mode = Some(ExecutionMode::SameThread);
        for child in &mut self.children {
            child.force_same_thread();
        }
    }
}

impl fmt::Debug for TestNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestNode")
            .field("unique_id", &self.unique_id.to_string())
            .field("kind", &self.kind)
            .field("execution_mode", &self.execution_mode)
            .field("children", &self.children.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_assembles_tree() {
        let root = TestNode::container("suite")
            .child(TestNode::test("one"))
            .child(
                TestNode::container("nested")
                    .child(TestNode::test("two"))
                    .child(TestNode::test("three")),
            );
        assert_eq!(root.kind(), NodeKind::Container);
        assert_eq!(root.children().len(), 2);
        assert_eq!(root.subtree_size(), 5);
    }

    #[test]
    fn test_assign_ids_follows_tree_shape() {
        let mut root = TestNode::container("suite")
            .child(TestNode::container("inner").child(TestNode::test("leaf")));
        root.assign_root_ids(UniqueId::root("engine", "canopy").append("container", "suite"));
        let leaf = &root.children()[0].children()[0];
        assert_eq!(
            leaf.unique_id().to_string(),
            "[engine:canopy]/[container:suite]/[container:inner]/[test:leaf]"
        );
    }

    #[test]
    fn test_prune_removes_childless_containers() {
        let mut root = TestNode::container("suite")
            .child(TestNode::container("empty"))
            .child(TestNode::container("kept").child(TestNode::test("leaf")))
            .child(TestNode::container("becomes-empty").child(TestNode::container("inner")));
        root.prune();
        let names: Vec<_> = root.children().iter().map(|c| c.display_name()).collect();
        assert_eq!(names, vec!["kept"]);
    }

    #[test]
    fn test_prune_keeps_containers_with_a_body() {
        let mut root = TestNode::container("suite")
            .child(TestNode::container("adapter").on_execute(|_, _| async { Ok(()) }));
        root.prune();
        assert_eq!(root.children().len(), 1);
    }

    #[test]
    fn test_retain_children() {
        let mut root = TestNode::container("suite")
            .child(TestNode::test("keep"))
            .child(TestNode::test("drop"));
        root.retain_children(|c| c.display_name() != "drop");
        assert_eq!(root.children().len(), 1);
        assert_eq!(root.children()[0].display_name(), "keep");
    }

    #[test]
    fn test_hoist_pulls_descendant_resources_into_the_declaring_ancestor() {
        let mut root = TestNode::container("suite").child(
            TestNode::container("locker")
                .execution_mode(ExecutionMode::Concurrent)
                .resource(ResourceRequirement::read_write("m"))
                .child(
                    TestNode::test("leaf")
                        .execution_mode(ExecutionMode::Concurrent)
                        .resource(ResourceRequirement::read_write("a")),
                ),
        );
        root.hoist_resources();
        // "suite" declares nothing, so acquisition stays at "locker"
        assert!(root.resources().is_empty());
        let locker = &root.children()[0];
        let names: Vec<_> = locker.resources().iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["m", "a"]);
        let leaf = &locker.children()[0];
        assert!(leaf.resources().is_empty());
        assert_eq!(leaf.declared_mode(), Some(ExecutionMode::SameThread));
    }

    #[test]
    fn test_hoist_leaves_independent_lock_sets_in_place() {
        let mut root = TestNode::container("suite")
            .child(TestNode::test("a").resource(ResourceRequirement::read("x")))
            .child(TestNode::test("b").resource(ResourceRequirement::read("y")));
        root.hoist_resources();
        assert!(root.resources().is_empty());
        assert_eq!(root.children()[0].resources().len(), 1);
        assert_eq!(root.children()[1].resources().len(), 1);
        assert_eq!(root.children()[0].declared_mode(), None);
    }

    #[test]
    fn test_execution_mode_serde_names() {
        let json = serde_json::to_string(&ExecutionMode::SameThread).unwrap();
        assert_eq!(json, "\"SAME_THREAD\"");
        let parsed: ExecutionMode = serde_json::from_str("\"CONCURRENT\"").unwrap();
        assert_eq!(parsed, ExecutionMode::Concurrent);
    }
}
