//! Named resource locks and deadlock-free ordered acquisition.
//!
//! Nodes declare the shared resources they touch as
//! [`ResourceRequirement`]s. Before a node body runs, the
//! [`LockManager`] materializes the effective set into a single
//! [`ResourceLock`] that acquires all underlying locks in one globally
//! consistent order: lexicographic by resource name, exclusive before
//! shared on ties. That total order is the sole deadlock-avoidance
//! mechanism; no lock is ever acquired out of order.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};

/// The well-known resource name expressing global isolation.
///
/// A node requiring `GLOBAL_RESOURCE` exclusively runs isolated from every
/// concurrently scheduled node; top-level nodes implicitly hold it in read
/// mode while they run.
pub const GLOBAL_RESOURCE: &str = "canopy.global";

/// Access mode of a declared resource.
///
/// `ReadWrite` sorts before `Read` so that ties on the same name acquire
/// the exclusive lock first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LockMode {
    ReadWrite,
    Read,
}

/// A named resource with its access mode.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceRequirement {
    pub name: String,
    pub mode: LockMode,
}

impl ResourceRequirement {
    pub fn read(name: impl Into<String>) -> Self {
        ResourceRequirement {
            name: name.into(),
            mode: LockMode::Read,
        }
    }

    pub fn read_write(name: impl Into<String>) -> Self {
        ResourceRequirement {
            name: name.into(),
            mode: LockMode::ReadWrite,
        }
    }

    pub fn global_read() -> Self {
        Self::read(GLOBAL_RESOURCE)
    }

    pub fn global_read_write() -> Self {
        Self::read_write(GLOBAL_RESOURCE)
    }

    pub fn is_global(&self) -> bool {
        self.name == GLOBAL_RESOURCE
    }
}

/// Interns one reader-writer lock per resource name and builds ordered
/// [`ResourceLock`]s over them.
pub struct LockManager {
    locks: Mutex<HashMap<String, Arc<RwLock<()>>>>,
}

impl LockManager {
    pub fn new() -> Self {
        LockManager {
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn handle(&self, name: &str) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock();
        locks
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(())))
            .clone()
    }

    /// Build the ordered lock for a requirement set.
    ///
    /// Duplicate names are collapsed, `ReadWrite` winning over `Read`, and
    /// the result is sorted into the global acquisition order.
    pub fn lock_for(&self, requirements: &[ResourceRequirement]) -> ResourceLock {
        let mut merged: BTreeMap<String, LockMode> = BTreeMap::new();
        for requirement in requirements {
            merged
                .entry(requirement.name.clone())
                .and_modify(|mode| {
                    if requirement.mode == LockMode::ReadWrite {
                        *mode = LockMode::ReadWrite;
                    }
                })
                .or_insert(requirement.mode);
        }
        let entries = merged
            .into_iter()
            .map(|(name, mode)| LockEntry {
                handle: self.handle(&name),
                name,
                mode,
            })
            .collect();
        ResourceLock { entries }
    }
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new()
    }
}

struct LockEntry {
    name: String,
    mode: LockMode,
    handle: Arc<RwLock<()>>,
}

/// An ordered set of resource locks, ready to acquire.
pub struct ResourceLock {
    entries: Vec<LockEntry>,
}

impl ResourceLock {
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Resource names and modes in acquisition order.
    pub fn requirements(&self) -> Vec<(&str, LockMode)> {
        self.entries
            .iter()
            .map(|entry| (entry.name.as_str(), entry.mode))
            .collect()
    }

    /// Acquire every lock, strictly in the pre-sorted order, blocking the
    /// current task until all are held. The returned guard releases on
    /// drop.
    pub async fn acquire(&self) -> ResourceGuards {
        let mut guards = Vec::with_capacity(self.entries.len());
        for entry in &self.entries {
            let guard = match entry.mode {
                LockMode::ReadWrite => OwnedGuard::Write(entry.handle.clone().write_owned().await),
                LockMode::Read => OwnedGuard::Read(entry.handle.clone().read_owned().await),
            };
            guards.push(guard);
        }
        ResourceGuards { _guards: guards }
    }
}

enum OwnedGuard {
    Read(OwnedRwLockReadGuard<()>),
    Write(OwnedRwLockWriteGuard<()>),
}

/// RAII guard over an acquired lock set. Held for the whole node subtree,
/// dynamic children included.
pub struct ResourceGuards {
    _guards: Vec<OwnedGuard>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lock_for_sorts_by_name() {
        let manager = LockManager::new();
        let lock = manager.lock_for(&[
            ResourceRequirement::read("zeta"),
            ResourceRequirement::read_write("alpha"),
            ResourceRequirement::read("mike"),
        ]);
        let order: Vec<_> = lock.requirements().iter().map(|(n, _)| *n).collect();
        assert_eq!(order, vec!["alpha", "mike", "zeta"]);
    }

    #[test]
    fn test_lock_for_collapses_duplicates_exclusive_wins() {
        let manager = LockManager::new();
        let lock = manager.lock_for(&[
            ResourceRequirement::read("db"),
            ResourceRequirement::read_write("db"),
            ResourceRequirement::read("db"),
        ]);
        assert_eq!(lock.requirements(), vec![("db", LockMode::ReadWrite)]);
    }

    #[test]
    fn test_read_write_sorts_before_read() {
        assert!(LockMode::ReadWrite < LockMode::Read);
    }

    #[tokio::test]
    async fn test_shared_readers_coexist() {
        let manager = LockManager::new();
        let lock_a = manager.lock_for(&[ResourceRequirement::read("shared")]);
        let lock_b = manager.lock_for(&[ResourceRequirement::read("shared")]);
        let _guard_a = lock_a.acquire().await;
        // A second reader must not block.
        let _guard_b = lock_b.acquire().await;
    }

    #[tokio::test]
    async fn test_exclusive_lock_blocks_second_writer() {
        let manager = Arc::new(LockManager::new());
        let lock = manager.lock_for(&[ResourceRequirement::read_write("db")]);
        let guard = lock.acquire().await;

        let other = manager.lock_for(&[ResourceRequirement::read_write("db")]);
        let attempt = tokio::time::timeout(std::time::Duration::from_millis(20), other.acquire());
        assert!(attempt.await.is_err(), "second writer should block");
        drop(guard);

        let other = manager.lock_for(&[ResourceRequirement::read_write("db")]);
        let _reacquired = other.acquire().await;
    }

    #[test]
    fn test_global_requirement_helpers() {
        assert!(ResourceRequirement::global_read().is_global());
        assert_eq!(
            ResourceRequirement::global_read_write().mode,
            LockMode::ReadWrite
        );
        assert!(!ResourceRequirement::read("db").is_global());
    }
}
