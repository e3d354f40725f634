//! Hierarchical scheduler, the main execution driver.
//!
//! [`HierarchicalEngine`] walks a [`TestNode`] tree depth-first, resolving
//! each node's effective concurrency mode, acquiring its ordered resource
//! locks, and driving the lifecycle state machine
//! (`skip | prepare → before → execute → children → after → cleanup`).
//! Same-thread children run inline in declared order; concurrent children
//! are spawned onto the worker pool and joined before the parent's
//! after-hooks run.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinSet;

use crate::collector::{default_fatal_predicate, FailureCollector, FatalPredicate};
use crate::config::EngineConfig;
use crate::error::Failure;
use crate::events::{EventEmitter, EventReceiver, ExecutionEvent};
use crate::lock::{LockManager, LockMode, ResourceRequirement};
use crate::node::{
    DynamicRegistrar, ExecutionMode, HookFuture, NodeTimeout, TestNode, TestOutcome, UniqueId,
};
use crate::store::NodeContext;
use crate::timeout::{assert_timeout, timeout_failure, CancelSignal};

/// Aggregate result of one execution pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ExecutionSummary {
    pub passed: usize,
    pub failed: usize,
    pub aborted: usize,
    pub skipped: usize,
}

impl ExecutionSummary {
    pub fn total(&self) -> usize {
        self.passed + self.failed + self.aborted + self.skipped
    }

    /// The process exit code a console front-end should translate this
    /// summary into: 0 when nothing failed, non-zero otherwise.
    pub fn exit_code(&self) -> i32 {
        if self.failed > 0 {
            1
        } else {
            0
        }
    }
}

/// Terminal classification of one node, folded into parent aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Terminal {
    Skipped,
    Passed,
    Aborted,
    Failed,
}

struct NodeReport {
    terminal: Terminal,
    fatal: Option<Failure>,
}

/// Constraints a node inherits from its ancestors.
#[derive(Clone)]
struct Inherited {
    /// An ancestor declared `SAME_THREAD`; every descendant serializes.
    forced_same_thread: bool,
    /// Locks held by ancestors, so descendants do not re-acquire them.
    held: Arc<Vec<ResourceRequirement>>,
    depth: usize,
}

/// Tracks node bodies currently executing, for timeout diagnostics.
#[derive(Clone)]
struct RunningRegistry {
    inner: Arc<Mutex<BTreeSet<String>>>,
}

impl RunningRegistry {
    fn new() -> Self {
        RunningRegistry {
            inner: Arc::new(Mutex::new(BTreeSet::new())),
        }
    }

    fn register(&self, id: String) -> RunningGuard {
        self.inner.lock().insert(id.clone());
        RunningGuard {
            inner: self.inner.clone(),
            id,
        }
    }

    fn dump(&self) -> String {
        self.inner
            .lock()
            .iter()
            .map(|id| format!("  {id}"))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

struct RunningGuard {
    inner: Arc<Mutex<BTreeSet<String>>>,
    id: String,
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        self.inner.lock().remove(&self.id);
    }
}

/// The hierarchical test executor.
pub struct HierarchicalEngine {
    config: Arc<EngineConfig>,
    lock_manager: Arc<LockManager>,
    emitter: EventEmitter,
    fatal_predicate: FatalPredicate,
    stop: CancelSignal,
}

impl HierarchicalEngine {
    pub fn new(config: EngineConfig) -> Self {
        HierarchicalEngine {
            config: Arc::new(config),
            lock_manager: Arc::new(LockManager::new()),
            emitter: EventEmitter::disabled(),
            fatal_predicate: default_fatal_predicate(),
            stop: CancelSignal::new(),
        }
    }

    /// Attach a listener; events flow through the returned receiver.
    pub fn subscribe(&mut self) -> EventReceiver {
        let (emitter, rx) = EventEmitter::channel();
        self.emitter = emitter;
        rx
    }

    /// Override which failures count as fatal.
    pub fn with_fatal_predicate(mut self, predicate: FatalPredicate) -> Self {
        self.fatal_predicate = predicate;
        self
    }

    /// Cooperative stop signal: firing it skips all not-yet-started work.
    pub fn stop_signal(&self) -> CancelSignal {
        self.stop.clone()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Execute a discovered node tree to completion.
    ///
    /// Emits exactly one `Started` and one terminal event per node that
    /// reaches the scheduler.
    pub async fn execute(&self, mut root: TestNode) -> ExecutionSummary {
        let engine_id = UniqueId::root("engine", "canopy");
        root.assign_ids(&engine_id);
        root.hoist_resources();

        let inner = Arc::new(EngineInner {
            config: self.config.clone(),
            lock_manager: self.lock_manager.clone(),
            emitter: self.emitter.clone(),
            fatal_predicate: self.fatal_predicate.clone(),
            semaphore: Arc::new(Semaphore::new(self.config.effective_workers())),
            stop: self.stop.clone(),
            running: RunningRegistry::new(),
            passed: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            aborted: AtomicUsize::new(0),
            skipped: AtomicUsize::new(0),
        });

        let inherited = Inherited {
            forced_same_thread: false,
            held: Arc::new(Vec::new()),
            depth: 0,
        };
        let _report = inner.clone().run_node(root, None, inherited, None).await;

        ExecutionSummary {
            passed: inner.passed.load(Ordering::SeqCst),
            failed: inner.failed.load(Ordering::SeqCst),
            aborted: inner.aborted.load(Ordering::SeqCst),
            skipped: inner.skipped.load(Ordering::SeqCst),
        }
    }
}

struct EngineInner {
    config: Arc<EngineConfig>,
    lock_manager: Arc<LockManager>,
    emitter: EventEmitter,
    fatal_predicate: FatalPredicate,
    semaphore: Arc<Semaphore>,
    stop: CancelSignal,
    running: RunningRegistry,
    passed: AtomicUsize,
    failed: AtomicUsize,
    aborted: AtomicUsize,
    skipped: AtomicUsize,
}

impl EngineInner {
    fn emit(&self, event: ExecutionEvent) {
        self.emitter.emit(event);
    }

    /// Intersect the node's declared mode with ancestor constraints and
    /// the configuration snapshot.
    fn resolve_mode(&self, node: &TestNode, inherited: &Inherited) -> ExecutionMode {
        if !self.config.parallel_enabled || inherited.forced_same_thread {
            return ExecutionMode::SameThread;
        }
        node.declared_mode()
            .unwrap_or(self.config.default_execution_mode)
    }

    /// Compute the locks this node must acquire itself: its declared set,
    /// plus the implied global read lock for top-level nodes, minus
    /// everything an ancestor already holds in a sufficient mode.
    ///
    /// Returns the acquisition list and whether the node requested an
    /// exclusive lock under an ancestor's read lock. The scheduler answers
    /// that by serializing the node with its ancestor instead of
    /// attempting a re-entrant upgrade.
    fn plan_locks(
        &self,
        node: &TestNode,
        inherited: &Inherited,
    ) -> (Vec<ResourceRequirement>, bool) {
        let mut requirements = node.resources().to_vec();
        if inherited.depth == 1 && !requirements.iter().any(ResourceRequirement::is_global) {
            requirements.push(ResourceRequirement::global_read());
        }

        let mut to_acquire = Vec::new();
        let mut conflict = false;
        for requirement in requirements {
            let held_mode = inherited
                .held
                .iter()
                .filter(|held| held.name == requirement.name)
                .map(|held| held.mode)
                .min();
            match held_mode {
                None => to_acquire.push(requirement),
                Some(LockMode::ReadWrite) => {}
                Some(LockMode::Read) => {
                    if requirement.mode == LockMode::ReadWrite {
                        conflict = true;
                    }
                }
            }
        }
        (to_acquire, conflict)
    }

    fn run_node(
        self: Arc<Self>,
        mut node: TestNode,
        parent: Option<Arc<NodeContext>>,
        inherited: Inherited,
        permit: Option<OwnedSemaphorePermit>,
    ) -> BoxFuture<'static, NodeReport> {
        Box::pin(async move {
            let mut permit = permit;
            let unique_id = node.unique_id().clone();
            let display_name = node.display_name().to_string();

            let mut effective_mode = self.resolve_mode(&node, &inherited);
            let (to_acquire, conflict) = self.plan_locks(&node, &inherited);
            if conflict {
                tracing::warn!(
                    node = %unique_id,
                    "exclusive resource requested under an ancestor read lock; serializing with the ancestor"
                );
                effective_mode = ExecutionMode::SameThread;
            }
            let lock = self.lock_manager.lock_for(&to_acquire);
            let _guards = lock.acquire().await;

            let cancel = match &parent {
                Some(parent) => parent.cancel_signal().child_signal(),
                None => self.stop.child_signal(),
            };
            let ctx = match &parent {
                Some(parent) => parent.child(
                    unique_id.clone(),
                    display_name.clone(),
                    effective_mode,
                    cancel,
                ),
                None => NodeContext::root(
                    unique_id.clone(),
                    display_name.clone(),
                    self.config.clone(),
                    effective_mode,
                    cancel,
                    self.emitter.clone(),
                ),
            };

            self.emit(ExecutionEvent::Started {
                unique_id: unique_id.clone(),
                display_name: display_name.clone(),
                timestamp: Utc::now(),
            });

            // The skip predicate runs before any lifecycle hook; a skipped
            // node's children are never visited.
            if let Some(check) = node.slots.skip.clone() {
                let decision = check(ctx.clone()).await;
                if decision.is_skipped() {
                    let reason = decision.reason().unwrap_or("skipped").to_string();
                    if let Err(failure) = ctx.close() {
                        tracing::warn!(node = %unique_id, error = %failure, "store close failed for skipped node");
                    }
                    self.skipped.fetch_add(1, Ordering::SeqCst);
                    self.emit(ExecutionEvent::Skipped {
                        unique_id,
                        reason,
                        timestamp: Utc::now(),
                    });
                    return NodeReport {
                        terminal: Terminal::Skipped,
                        fatal: None,
                    };
                }
            }

            let mut collector = FailureCollector::with_predicate(self.fatal_predicate.clone());

            if let Some(hook) = node.slots.prepare.clone() {
                collector.execute_async(hook(ctx.clone())).await;
            }
            if collector.is_empty() {
                if let Some(hook) = node.slots.before.clone() {
                    collector.execute_async(hook(ctx.clone())).await;
                }
            }

            let (registrar, mut dynamic_rx) = DynamicRegistrar::channel();
            if collector.is_empty() {
                if let Some(body) = node.slots.execute.clone() {
                    let _running = self.running.register(unique_id.to_string());
                    let future = body(ctx.clone(), registrar.clone());
                    match node.declared_timeout() {
                        None => collector.execute_async(future).await,
                        Some(timeout) if !timeout.preemptive => {
                            collector
                                .execute_async(assert_timeout(timeout.budget, future))
                                .await;
                        }
                        Some(timeout) => {
                            self.run_preemptive(timeout, future, &ctx, &mut collector)
                                .await;
                        }
                    }
                }
            }
            drop(registrar);

            let child_inherited = Inherited {
                forced_same_thread: inherited.forced_same_thread
                    || node.declared_mode() == Some(ExecutionMode::SameThread),
                held: Arc::new(
                    inherited
                        .held
                        .iter()
                        .cloned()
                        .chain(to_acquire.iter().cloned())
                        .collect(),
                ),
                depth: inherited.depth + 1,
            };

            let static_children = std::mem::take(&mut node.children);
            let mut child_reports: Vec<NodeReport> = Vec::new();
            let mut child_fatal: Option<Failure> = None;
            // children run only when discovery and setup succeeded; nodes
            // with externally executed children report them through their
            // own driver
            if collector.is_empty() && !node.has_external_children() {
                // the pool slot is released while joining on children so
                // that descendants can make progress on a saturated pool
                permit.take();

                let (reports, fatal) = self
                    .clone()
                    .run_children(static_children, &ctx, &child_inherited)
                    .await;
                child_reports = reports;
                child_fatal = fatal;

                if child_fatal.is_none() {
                    let mut dynamic = Vec::new();
                    while let Ok(mut produced) = dynamic_rx.try_recv() {
                        produced.assign_ids(&unique_id);
                        self.emit(ExecutionEvent::Registered {
                            unique_id: produced.unique_id().clone(),
                            display_name: produced.display_name().to_string(),
                            timestamp: Utc::now(),
                        });
                        dynamic.push(produced);
                    }
                    if !dynamic.is_empty() {
                        let (reports, fatal) = self
                            .clone()
                            .run_children(dynamic, &ctx, &child_inherited)
                            .await;
                        child_reports.extend(reports);
                        child_fatal = fatal;
                    }
                }
            }
            drop(permit);

            // after-hooks and cleanup always run, even when earlier phases
            // failed; their failures merge into the node's aggregate
            if let Some(hook) = node.slots.after.clone() {
                collector.execute_async(hook(ctx.clone())).await;
            }
            if let Some(hook) = node.slots.cleanup.clone() {
                collector.execute_async(hook(ctx.clone())).await;
            }
            collector.execute(|| ctx.close());

            let fatal_failure = collector.fatal().cloned();
            let failed_children = child_reports
                .iter()
                .filter(|report| report.terminal == Terminal::Failed)
                .count();
            let child_aborted = child_reports
                .iter()
                .any(|report| report.terminal == Terminal::Aborted);
            let all_aborts = collector.all_aborts();
            let own = collector.into_result().err();

            let outcome = if let Some(fatal) = fatal_failure.clone() {
                TestOutcome::Failed(fatal)
            } else {
                match own {
                    Some(failure) if all_aborts && failed_children == 0 => {
                        TestOutcome::Aborted(Some(failure.message().to_string()))
                    }
                    Some(failure) => TestOutcome::Failed(failure),
                    None if failed_children > 0 => TestOutcome::Failed(Failure::error(format!(
                        "{failed_children} child node(s) failed"
                    ))),
                    None if child_aborted => TestOutcome::Aborted(None),
                    None => TestOutcome::Passed,
                }
            };

            let terminal = match &outcome {
                TestOutcome::Passed => {
                    self.passed.fetch_add(1, Ordering::SeqCst);
                    Terminal::Passed
                }
                TestOutcome::Aborted(_) => {
                    self.aborted.fetch_add(1, Ordering::SeqCst);
                    Terminal::Aborted
                }
                TestOutcome::Failed(_) => {
                    self.failed.fetch_add(1, Ordering::SeqCst);
                    Terminal::Failed
                }
            };
            self.emit(ExecutionEvent::Finished {
                unique_id,
                outcome,
                timestamp: Utc::now(),
            });

            NodeReport {
                terminal,
                fatal: fatal_failure.or(child_fatal),
            }
        })
    }

    /// Dispatch a sibling group: same-thread children inline in declared
    /// order, concurrent children onto the pool, then join everything. A
    /// fatal failure cancels not-yet-started siblings in the batch;
    /// already-dispatched concurrent siblings run to completion.
    async fn run_children(
        self: Arc<Self>,
        children: Vec<TestNode>,
        parent_ctx: &Arc<NodeContext>,
        inherited: &Inherited,
    ) -> (Vec<NodeReport>, Option<Failure>) {
        let mut reports = Vec::new();
        let mut fatal: Option<Failure> = None;
        let mut join_set: JoinSet<NodeReport> = JoinSet::new();

        for child in children {
            if fatal.is_some() || self.stop.is_cancelled() {
                reports.push(self.report_cancelled_subtree(&child));
                continue;
            }
            let mode = self.resolve_mode(&child, inherited);
            let (_, conflict) = self.plan_locks(&child, inherited);
            if mode == ExecutionMode::Concurrent && !conflict {
                let inner = self.clone();
                let parent_ctx = parent_ctx.clone();
                let inherited = inherited.clone();
                join_set.spawn(async move {
                    match inner.semaphore.clone().acquire_owned().await {
                        Ok(permit) => {
                            inner
                                .clone()
                                .run_node(child, Some(parent_ctx), inherited, Some(permit))
                                .await
                        }
                        // the pool was shut down before this unit started
                        Err(_) => inner.report_cancelled_subtree(&child),
                    }
                });
            } else {
                let report = self
                    .clone()
                    .run_node(child, Some(parent_ctx.clone()), inherited.clone(), None)
                    .await;
                if let Some(failure) = &report.fatal {
                    fatal = Some(failure.clone());
                }
                reports.push(report);
            }
        }

        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok(report) => {
                    if let Some(failure) = &report.fatal {
                        fatal.get_or_insert(failure.clone());
                    }
                    reports.push(report);
                }
                Err(join_error) => {
                    tracing::error!(error = %join_error, "child task failed to join");
                    reports.push(NodeReport {
                        terminal: Terminal::Failed,
                        fatal: None,
                    });
                }
            }
        }
        (reports, fatal)
    }

    async fn run_preemptive(
        &self,
        timeout: NodeTimeout,
        future: HookFuture,
        ctx: &Arc<NodeContext>,
        collector: &mut FailureCollector,
    ) {
        let mut handle = tokio::spawn(future);
        match tokio::time::timeout(timeout.budget, &mut handle).await {
            Ok(Ok(result)) => {
                if let Err(failure) = result {
                    collector.record(failure);
                }
            }
            Ok(Err(join_error)) => {
                collector.record(Failure::error(format!(
                    "timed-out worker panicked: {join_error}"
                )));
            }
            Err(_elapsed) => {
                // the body keeps running detached; its eventual result is
                // discarded and the cancel signal tells it to wind down
                ctx.cancel_signal().cancel();
                let mut failure = timeout_failure(timeout.budget);
                if self.config.task_dump_on_timeout {
                    failure = Failure::assertion(format!(
                        "{}\nlive nodes at timeout:\n{}",
                        failure.message(),
                        self.running.dump()
                    ));
                }
                collector.record(failure);
            }
        }
    }

    /// Report a unit (and its whole subtree) that never got to start as a
    /// cancellation-equivalent skip, keeping exactly-once reporting.
    fn report_cancelled_subtree(&self, node: &TestNode) -> NodeReport {
        self.emit_cancelled(node);
        NodeReport {
            terminal: Terminal::Skipped,
            fatal: None,
        }
    }

    fn emit_cancelled(&self, node: &TestNode) {
        self.emit(ExecutionEvent::Started {
            unique_id: node.unique_id().clone(),
            display_name: node.display_name().to_string(),
            timestamp: Utc::now(),
        });
        self.skipped.fetch_add(1, Ordering::SeqCst);
        self.emit(ExecutionEvent::Skipped {
            unique_id: node.unique_id().clone(),
            reason: "execution cancelled before start".to_string(),
            timestamp: Utc::now(),
        });
        for child in node.children() {
            self.emit_cancelled(child);
        }
    }
}
