use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::operators::ReadWriteOperator;
use crate::types::{CommitId, TransactionId};

/*
    Minimal MVCC transaction machinery: monotonically increasing transaction
    ids, a single commit point that assigns commit ids and drives the
    registered read-write operators, and a registry of active snapshot ids
    so chunk cleanup knows which versions may still be read.

    Commits are serialized by the commit mutex. An operator's on_commit
    effects are applied before the new commit id is published, so readers
    either see none or all of them.
*/

struct TransactionManagerInner {
    next_transaction_id: AtomicU32,
    last_commit_id: AtomicU32,
    commit_mutex: Mutex<()>,
    // snapshot commit id -> number of active transactions holding it
    active_snapshots: Mutex<BTreeMap<CommitId, usize>>,
}

#[derive(Clone)]
pub struct TransactionManager {
    inner: Arc<TransactionManagerInner>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackReason {
    Conflict,
    User,
}

impl TransactionManager {
    pub fn new() -> TransactionManager {
        TransactionManager {
            inner: Arc::new(TransactionManagerInner {
                // tid 0 marks unlocked rows, real transactions start at 1
                next_transaction_id: AtomicU32::new(1),
                last_commit_id: AtomicU32::new(0),
                commit_mutex: Mutex::new(()),
                active_snapshots: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    pub fn last_commit_id(&self) -> CommitId {
        self.inner.last_commit_id.load(Ordering::Acquire)
    }

    pub fn new_transaction_context(&self) -> TransactionContext {
        let transaction_id = self.inner.next_transaction_id.fetch_add(1, Ordering::Relaxed);
        let snapshot_commit_id = self.inner.last_commit_id.load(Ordering::Acquire);
        *self
            .inner
            .active_snapshots
            .lock()
            .entry(snapshot_commit_id)
            .or_insert(0) += 1;
        TransactionContext { manager: self.clone(), transaction_id, snapshot_commit_id }
    }

    /// The oldest snapshot any active transaction might still read, or None
    /// when no transaction is running.
    pub fn lowest_active_snapshot_commit_id(&self) -> Option<CommitId> {
        self.inner.active_snapshots.lock().keys().next().copied()
    }

    fn release_snapshot(&self, snapshot_commit_id: CommitId) {
        let mut snapshots = self.inner.active_snapshots.lock();
        match snapshots.get_mut(&snapshot_commit_id) {
            Some(count) if *count > 1 => *count -= 1,
            Some(_) => {
                snapshots.remove(&snapshot_commit_id);
            }
            None => unreachable!("snapshot was not registered"),
        }
    }
}

impl Default for TransactionManager {
    fn default() -> Self {
        TransactionManager::new()
    }
}

pub struct TransactionContext {
    manager: TransactionManager,
    transaction_id: TransactionId,
    snapshot_commit_id: CommitId,
}

impl TransactionContext {
    pub fn transaction_id(&self) -> TransactionId {
        self.transaction_id
    }

    pub fn snapshot_commit_id(&self) -> CommitId {
        self.snapshot_commit_id
    }

    /// Assign the next commit id, apply every operator's commit records and
    /// publish the id. Consumes the context; the snapshot is released on
    /// drop.
    pub fn commit(self, operators: &mut [&mut dyn ReadWriteOperator]) -> CommitId {
        let guard = self.manager.inner.commit_mutex.lock();
        let commit_id = self.manager.inner.last_commit_id.load(Ordering::Relaxed) + 1;
        for operator in operators.iter_mut() {
            assert!(
                !operator.failed(),
                "committing a failed {} operator",
                operator.name()
            );
            operator.on_commit(commit_id);
        }
        self.manager.inner.last_commit_id.store(commit_id, Ordering::Release);
        drop(guard);
        commit_id
    }

    pub fn rollback(self, operators: &mut [&mut dyn ReadWriteOperator], _reason: RollbackReason) {
        for operator in operators.iter_mut() {
            operator.on_rollback();
        }
    }
}

impl Drop for TransactionContext {
    fn drop(&mut self) {
        self.manager.release_snapshot(self.snapshot_commit_id);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn transaction_ids_are_unique_and_nonzero() {
        let manager = TransactionManager::new();
        let a = manager.new_transaction_context();
        let b = manager.new_transaction_context();
        assert_ne!(a.transaction_id(), 0);
        assert_ne!(a.transaction_id(), b.transaction_id());
    }

    #[test]
    fn commit_advances_the_commit_id() {
        let manager = TransactionManager::new();
        assert_eq!(manager.last_commit_id(), 0);
        let context = manager.new_transaction_context();
        let commit_id = context.commit(&mut []);
        assert_eq!(commit_id, 1);
        assert_eq!(manager.last_commit_id(), 1);
    }

    #[test]
    fn snapshot_registry_tracks_active_transactions() {
        let manager = TransactionManager::new();
        assert_eq!(manager.lowest_active_snapshot_commit_id(), None);

        let old = manager.new_transaction_context();
        manager.new_transaction_context().commit(&mut []);
        let newer = manager.new_transaction_context();

        assert_eq!(manager.lowest_active_snapshot_commit_id(), Some(0));
        assert_eq!(newer.snapshot_commit_id(), 1);
        drop(old);
        assert_eq!(manager.lowest_active_snapshot_commit_id(), Some(1));
        drop(newer);
        assert_eq!(manager.lowest_active_snapshot_commit_id(), None);
    }

    #[test]
    fn snapshots_do_not_see_later_commits() {
        let manager = TransactionManager::new();
        let reader = manager.new_transaction_context();
        manager.new_transaction_context().commit(&mut []);
        assert!(reader.snapshot_commit_id() < manager.last_commit_id());
    }
}
