use std::sync::atomic::{AtomicU32, Ordering};

use parking_lot::RwLock;

use crate::types::{CommitId, TransactionId, MAX_COMMIT_ID, UNLOCKED_TID};

/*
    Per-row MVCC state of a chunk:

      begin_cid  commit id since which the row is visible
      end_cid    commit id at which the row was invalidated, MAX while alive
      tid        transaction currently holding the row lock, 0 if none

    Row locks are taken by compare-and-swap on tid. There is no blocking, a
    failed swap means somebody else holds the row and the caller has to
    roll back. The vectors grow while the owning chunk is still mutable
    (appends are serialized by the table's append mutex); all per-slot
    mutation goes through atomics so readers never need the write lock.
*/

struct MvccRows {
    begin_cids: Vec<AtomicU32>,
    end_cids: Vec<AtomicU32>,
    tids: Vec<AtomicU32>,
}

pub struct MvccData {
    inner: RwLock<MvccRows>,
}

impl MvccData {
    pub fn new(size: usize, begin_cid: CommitId) -> MvccData {
        let rows = MvccRows {
            begin_cids: (0..size).map(|_| AtomicU32::new(begin_cid)).collect(),
            end_cids: (0..size).map(|_| AtomicU32::new(MAX_COMMIT_ID)).collect(),
            tids: (0..size).map(|_| AtomicU32::new(UNLOCKED_TID)).collect(),
        };
        MvccData { inner: RwLock::new(rows) }
    }

    pub fn size(&self) -> usize {
        self.inner.read().begin_cids.len()
    }

    pub fn grow_by(&self, rows: usize, begin_cid: CommitId) {
        let mut inner = self.inner.write();
        for _ in 0..rows {
            inner.begin_cids.push(AtomicU32::new(begin_cid));
            inner.end_cids.push(AtomicU32::new(MAX_COMMIT_ID));
            inner.tids.push(AtomicU32::new(UNLOCKED_TID));
        }
    }

    pub fn get_begin_cid(&self, offset: usize) -> CommitId {
        self.inner.read().begin_cids[offset].load(Ordering::Acquire)
    }

    pub fn set_begin_cid(&self, offset: usize, begin_cid: CommitId) {
        self.inner.read().begin_cids[offset].store(begin_cid, Ordering::Release);
    }

    pub fn get_end_cid(&self, offset: usize) -> CommitId {
        self.inner.read().end_cids[offset].load(Ordering::Acquire)
    }

    pub fn set_end_cid(&self, offset: usize, end_cid: CommitId) {
        self.inner.read().end_cids[offset].store(end_cid, Ordering::Release);
    }

    pub fn get_tid(&self, offset: usize) -> TransactionId {
        self.inner.read().tids[offset].load(Ordering::Acquire)
    }

    /// Atomically take or release the row lock. Returns false if the slot
    /// did not hold `expected`.
    pub fn compare_exchange_tid(
        &self,
        offset: usize,
        expected: TransactionId,
        new: TransactionId,
    ) -> bool {
        self.inner.read().tids[offset]
            .compare_exchange(expected, new, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn fresh_rows_are_alive_and_unlocked() {
        let mvcc = MvccData::new(3, 7);
        assert_eq!(mvcc.size(), 3);
        for offset in 0..3 {
            assert_eq!(mvcc.get_begin_cid(offset), 7);
            assert_eq!(mvcc.get_end_cid(offset), MAX_COMMIT_ID);
            assert_eq!(mvcc.get_tid(offset), UNLOCKED_TID);
        }
    }

    #[test]
    fn lock_is_exclusive() {
        let mvcc = MvccData::new(1, 0);
        assert!(mvcc.compare_exchange_tid(0, UNLOCKED_TID, 42));
        assert!(!mvcc.compare_exchange_tid(0, UNLOCKED_TID, 43));
        assert_eq!(mvcc.get_tid(0), 42);
        // Release and relock.
        assert!(mvcc.compare_exchange_tid(0, 42, UNLOCKED_TID));
        assert!(mvcc.compare_exchange_tid(0, UNLOCKED_TID, 43));
    }

    #[test]
    fn grow_appends_alive_rows() {
        let mvcc = MvccData::new(1, 0);
        mvcc.grow_by(2, 9);
        assert_eq!(mvcc.size(), 3);
        assert_eq!(mvcc.get_begin_cid(0), 0);
        assert_eq!(mvcc.get_begin_cid(2), 9);
        assert_eq!(mvcc.get_end_cid(2), MAX_COMMIT_ID);
    }
}
