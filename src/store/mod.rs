//! Scoped, inheritable key/value stores.
//!
//! A [`NamespacedStore`] is one scope in a parent-linked chain: lookups
//! read through ancestors, writes stay local, and closing a scope runs the
//! close actions of its local entries in reverse insertion order.

mod context;

pub use context::NodeContext;

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::collector::FailureCollector;
use crate::error::FailureResult;

/// A namespace scoping store keys, so independent extensions cannot
/// collide on key names.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace {
    parts: Vec<String>,
}

impl Namespace {
    /// The default namespace shared by everything that does not care.
    pub fn global() -> Self {
        Namespace {
            parts: vec!["global".to_string()],
        }
    }

    pub fn of<I, S>(parts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Namespace {
            parts: parts.into_iter().map(Into::into).collect(),
        }
    }

    pub fn parts(&self) -> &[String] {
        &self.parts
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.parts.join("/"))
    }
}

/// A stored value. Values are type-erased and shared.
pub type StoreValue = Arc<dyn Any + Send + Sync>;

/// Cleanup callback invoked with the stored value when the owning scope is
/// torn down. Closing is transitive only one level: the stored value, not
/// its contents.
pub type CloseAction = Box<dyn FnOnce(StoreValue) -> FailureResult<()> + Send>;

#[derive(Clone, PartialEq, Eq, Hash)]
struct CompositeKey {
    namespace: Namespace,
    key: String,
}

struct StoredEntry {
    value: StoreValue,
    close: Option<CloseAction>,
    order: u64,
    instance_scoped: bool,
}

struct StoreState {
    entries: HashMap<CompositeKey, StoredEntry>,
    next_order: u64,
    closed: bool,
}

/// One scope of the hierarchical store.
pub struct NamespacedStore {
    parent: Option<Arc<NamespacedStore>>,
    state: Mutex<StoreState>,
}

impl NamespacedStore {
    /// A root scope with no parent.
    pub fn new() -> Arc<Self> {
        Arc::new(NamespacedStore {
            parent: None,
            state: Mutex::new(StoreState {
                entries: HashMap::new(),
                next_order: 0,
                closed: false,
            }),
        })
    }

    /// A child scope reading through to `parent`.
    pub fn child(parent: &Arc<NamespacedStore>) -> Arc<Self> {
        Arc::new(NamespacedStore {
            parent: Some(parent.clone()),
            state: Mutex::new(StoreState {
                entries: HashMap::new(),
                next_order: 0,
                closed: false,
            }),
        })
    }

    /// Look up a value, checking the local scope first and then walking
    /// ancestors.
    pub fn get(&self, namespace: &Namespace, key: &str) -> Option<StoreValue> {
        let composite = CompositeKey {
            namespace: namespace.clone(),
            key: key.to_string(),
        };
        {
            let state = self.state.lock();
            if let Some(entry) = state.entries.get(&composite) {
                return Some(entry.value.clone());
            }
        }
        self.parent
            .as_ref()
            .and_then(|parent| parent.get(namespace, key))
    }

    /// Typed lookup via downcast.
    pub fn get_typed<T>(&self, namespace: &Namespace, key: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        self.get(namespace, key)
            .and_then(|value| value.downcast::<T>().ok())
    }

    /// Write a value into the local scope. A previous local entry under the
    /// same key is replaced; its close action is dropped.
    pub fn put(&self, namespace: &Namespace, key: impl Into<String>, value: StoreValue) {
        self.insert(namespace, key.into(), value, None, false);
    }

    /// Write a value with a cleanup action invoked at [`close`](Self::close).
    pub fn put_closeable(
        &self,
        namespace: &Namespace,
        key: impl Into<String>,
        value: StoreValue,
        close: CloseAction,
    ) {
        self.insert(namespace, key.into(), value, Some(close), false);
    }

    /// Write a value bound to the current test instance; evicted by
    /// [`invalidate_instance`](Self::invalidate_instance) even if the
    /// structural scope survives.
    pub fn put_instance_scoped(
        &self,
        namespace: &Namespace,
        key: impl Into<String>,
        value: StoreValue,
        close: Option<CloseAction>,
    ) {
        self.insert(namespace, key.into(), value, close, true);
    }

    fn insert(
        &self,
        namespace: &Namespace,
        key: String,
        value: StoreValue,
        close: Option<CloseAction>,
        instance_scoped: bool,
    ) {
        let composite = CompositeKey {
            namespace: namespace.clone(),
            key,
        };
        let mut state = self.state.lock();
        if state.closed {
            // nothing will ever close this scope again; run the late
            // entry's cleanup now instead of leaking it
            drop(state);
            tracing::warn!(
                namespace = %namespace,
                key = %composite.key,
                "value stored after close; running its close action immediately"
            );
            if let Some(close) = close {
                if let Err(failure) = close(value) {
                    tracing::warn!(error = %failure, "late close action failed");
                }
            }
            return;
        }
        let order = state.next_order;
        state.next_order += 1;
        state.entries.insert(
            composite,
            StoredEntry {
                value,
                close,
                order,
                instance_scoped,
            },
        );
    }

    /// Get the value for `(namespace, key)` or compute and store it.
    ///
    /// Idempotent per key within the owning scope: concurrent computes race
    /// benignly and the first stored value wins. The factory runs outside
    /// the store lock, so it may itself touch the store.
    pub fn get_or_compute<F>(&self, namespace: &Namespace, key: &str, factory: F) -> StoreValue
    where
        F: FnOnce() -> StoreValue,
    {
        if let Some(existing) = self.get(namespace, key) {
            return existing;
        }
        let computed = factory();
        let composite = CompositeKey {
            namespace: namespace.clone(),
            key: key.to_string(),
        };
        let mut state = self.state.lock();
        if let Some(entry) = state.entries.get(&composite) {
            return entry.value.clone();
        }
        if state.closed {
            return computed;
        }
        let order = state.next_order;
        state.next_order += 1;
        state.entries.insert(
            composite,
            StoredEntry {
                value: computed.clone(),
                close: None,
                order,
                instance_scoped: false,
            },
        );
        computed
    }

    /// Remove a local entry, returning its value. Ancestor scopes are never
    /// touched. The entry's close action is not run.
    pub fn remove(&self, namespace: &Namespace, key: &str) -> Option<StoreValue> {
        let composite = CompositeKey {
            namespace: namespace.clone(),
            key: key.to_string(),
        };
        let mut state = self.state.lock();
        state.entries.remove(&composite).map(|entry| entry.value)
    }

    /// Evict all instance-scoped entries, running their close actions in
    /// reverse insertion order and collecting failures.
    pub fn invalidate_instance(&self) -> FailureResult<()> {
        let evicted = {
            let mut state = self.state.lock();
            let keys: Vec<CompositeKey> = state
                .entries
                .iter()
                .filter(|(_, entry)| entry.instance_scoped)
                .map(|(key, _)| key.clone())
                .collect();
            let mut evicted: Vec<StoredEntry> = keys
                .into_iter()
                .filter_map(|key| state.entries.remove(&key))
                .collect();
            evicted.sort_by(|a, b| b.order.cmp(&a.order));
            evicted
        };
        Self::close_entries(evicted)
    }

    /// Tear the scope down: run every local close action in reverse
    /// insertion order, collecting (not short-circuiting on) failures, then
    /// assert empty. Idempotent; a second close is a no-op.
    pub fn close(&self) -> FailureResult<()> {
        let drained = {
            let mut state = self.state.lock();
            if state.closed {
                return Ok(());
            }
            state.closed = true;
            let mut drained: Vec<StoredEntry> = state.entries.drain().map(|(_, e)| e).collect();
            drained.sort_by(|a, b| b.order.cmp(&a.order));
            drained
        };
        Self::close_entries(drained)
    }

    fn close_entries(entries: Vec<StoredEntry>) -> FailureResult<()> {
        let mut collector = FailureCollector::new();
        for entry in entries {
            if let Some(close) = entry.close {
                collector.execute(|| close(entry.value));
            }
        }
        collector.into_result()
    }
}
