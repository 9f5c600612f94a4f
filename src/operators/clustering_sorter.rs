use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::warn;

use crate::operators::sort::Sort;
use crate::operators::validate::Validate;
use crate::operators::{OperatorError, ReadWriteOperator};
use crate::pool::WorkerPool;
use crate::storage::chunk::Chunk;
use crate::storage::dictionary::encode_chunk;
use crate::storage::mvcc::MvccData;
use crate::storage::table::Table;
use crate::transaction::TransactionContext;
use crate::types::{ChunkId, ColumnId, CommitId, TransactionId, MAX_COMMIT_ID, UNLOCKED_TID};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SorterState {
    Unstarted,
    Sorted,
    Locked,
    Committed,
    RolledBack,
}

/*
    Sorts the chunks of one cluster on the sort column and swaps the sorted
    result in under MVCC, in four phases:

      1. Snapshot each input chunk's invalid row count and sort off-line: a
         fresh sorting table references the input segments and MVCC data
         without copying, is validated against the caller's transaction and
         sorted with forced materialization.
      2. Lock every live row of the input chunks by compare-and-swap on its
         tid. Any failed swap or a drifted invalid row count marks the
         operator failed; the caller rolls back.
      3. On commit, invalidate the input rows, append the sorted chunks to
         the table (finalized, sorted_by carried over, dictionary-encoded,
         rows beginning at the commit id) and tag the input chunks with the
         cleanup commit id. All locks are released.
      4. On rollback, release all locks; no visible state change.

    Nobody may insert into the input chunks while this runs; the clustering
    deployment guarantees that and the commit asserts it.
*/
pub struct ClusteringSorter<'a> {
    table: Arc<Table>,
    chunk_ids: BTreeSet<ChunkId>,
    sort_column_id: ColumnId,
    pool: &'a WorkerPool,
    transaction_id: TransactionId,
    num_locks: usize,
    invalid_row_counts: Vec<usize>,
    sorted_chunks: Vec<Arc<Chunk>>,
    installed_chunk_ids: Vec<ChunkId>,
    state: SorterState,
    failed: bool,
}

impl<'a> ClusteringSorter<'a> {
    pub fn new(
        table: Arc<Table>,
        chunk_ids: BTreeSet<ChunkId>,
        sort_column_id: ColumnId,
        pool: &'a WorkerPool,
    ) -> ClusteringSorter<'a> {
        assert!(!chunk_ids.is_empty(), "nothing to sort");
        for chunk_id in &chunk_ids {
            assert!(table.get_chunk(*chunk_id).is_some(), "chunk disappeared");
        }
        ClusteringSorter {
            table,
            chunk_ids,
            sort_column_id,
            pool,
            transaction_id: UNLOCKED_TID,
            num_locks: 0,
            invalid_row_counts: Vec::new(),
            sorted_chunks: Vec::new(),
            installed_chunk_ids: Vec::new(),
            state: SorterState::Unstarted,
            failed: false,
        }
    }

    /// Chunk ids the sorted result was installed under, valid after commit.
    pub fn installed_chunk_ids(&self) -> &[ChunkId] {
        &self.installed_chunk_ids
    }

    pub fn execute(&mut self, context: &TransactionContext) -> Result<(), OperatorError> {
        assert_eq!(self.state, SorterState::Unstarted);
        self.transaction_id = context.transaction_id();

        // Phase 1: snapshot and sort off-line. The sorting table shares the
        // input segments and MVCC data, nothing is copied.
        let sorting_table =
            Arc::new(Table::new(self.table.column_definitions().to_vec(), self.table.target_chunk_size()));
        for chunk_id in &self.chunk_ids {
            let chunk = self.table.get_chunk(*chunk_id).expect("chunk disappeared");
            self.invalid_row_counts.push(chunk.invalid_row_count());
            sorting_table.append_chunk(Arc::new(Chunk::from_segments(
                chunk.segments(),
                Some(chunk.mvcc_data().clone()),
            )));
        }

        let visible = Validate::new(&sorting_table).execute(context);
        let mut sort = Sort::new(
            sorting_table,
            visible,
            self.sort_column_id,
            self.table.target_chunk_size(),
            self.pool,
        );
        self.sorted_chunks = sort.execute();
        self.state = SorterState::Sorted;

        // Phase 2: lock the live rows of every input chunk.
        for (index, chunk_id) in self.chunk_ids.clone().iter().enumerate() {
            let chunk = self.table.get_chunk(*chunk_id).expect("chunk disappeared");
            if !self.lock_chunk(&chunk) {
                self.failed = true;
                return Err(OperatorError::Conflict(format!(
                    "failed to lock all rows of chunk {}",
                    chunk_id
                )));
            }
            if chunk.invalid_row_count() != self.invalid_row_counts[index] {
                // Chunk was modified between sorting and locking.
                warn!(
                    chunk_id,
                    before = self.invalid_row_counts[index],
                    now = chunk.invalid_row_count(),
                    "invalid row count drifted between sort and lock"
                );
                self.failed = true;
                return Err(OperatorError::Conflict(format!(
                    "invalid row count of chunk {} drifted",
                    chunk_id
                )));
            }
        }
        self.state = SorterState::Locked;
        Ok(())
    }

    fn lock_chunk(&mut self, chunk: &Chunk) -> bool {
        let mvcc = chunk.mvcc_data();
        for offset in 0..chunk.size() {
            if mvcc.get_end_cid(offset) != MAX_COMMIT_ID {
                // Invalidated rows count as locked by whoever invalidated
                // them.
                continue;
            }
            if !mvcc.compare_exchange_tid(offset, UNLOCKED_TID, self.transaction_id) {
                return false;
            }
            self.num_locks += 1;
        }
        true
    }

    fn unlock_chunk(&mut self, chunk: &Chunk) {
        let mvcc = chunk.mvcc_data();
        for offset in 0..chunk.size() {
            if mvcc.get_tid(offset) == self.transaction_id {
                let released =
                    mvcc.compare_exchange_tid(offset, self.transaction_id, UNLOCKED_TID);
                assert!(released, "unable to release a lock held by our own transaction");
                self.num_locks -= 1;
            }
        }
    }

    fn unlock_all(&mut self) {
        for chunk_id in self.chunk_ids.clone() {
            let chunk = self.table.get_chunk(chunk_id).expect("chunk disappeared");
            self.unlock_chunk(&chunk);
        }
        assert_eq!(self.num_locks, 0, "locks remained after release");
    }
}

impl ReadWriteOperator for ClusteringSorter<'_> {
    fn name(&self) -> &'static str {
        "ClusteringSorter"
    }

    fn on_commit(&mut self, commit_id: CommitId) {
        assert_eq!(self.state, SorterState::Locked);

        // Invalidate the unsorted originals.
        for chunk_id in &self.chunk_ids {
            let chunk = self.table.get_chunk(*chunk_id).expect("chunk disappeared");
            let mvcc = chunk.mvcc_data();
            let mut invalidated = 0u32;
            for offset in 0..chunk.size() {
                if mvcc.get_end_cid(offset) == MAX_COMMIT_ID {
                    // A row we did not lock means somebody inserted into the
                    // chunk after locking, which the protocol forbids.
                    assert_eq!(
                        mvcc.get_tid(offset),
                        self.transaction_id,
                        "row {} was not locked, did the chunk grow?",
                        offset
                    );
                    mvcc.set_end_cid(offset, commit_id);
                    invalidated += 1;
                }
            }
            chunk.increase_invalid_row_count(invalidated);
        }

        // Install the sorted chunks as new, finalized, encoded chunks whose
        // rows begin at this commit.
        for sorted in std::mem::take(&mut self.sorted_chunks) {
            let chunk = Arc::new(Chunk::from_segments(
                sorted.segments(),
                Some(Arc::new(MvccData::new(sorted.size(), commit_id))),
            ));
            {
                let _append_lock = self.table.acquire_append_mutex();
                self.installed_chunk_ids.push(self.table.append_chunk(chunk.clone()));
            }
            chunk.finalize();
            let sorted_by = sorted.sorted_by();
            assert!(!sorted_by.is_empty(), "sorted chunk has no sorting information");
            chunk.set_sorted_by(sorted_by);
            encode_chunk(&chunk);
        }

        for chunk_id in &self.chunk_ids {
            let chunk = self.table.get_chunk(*chunk_id).expect("chunk disappeared");
            chunk.set_cleanup_commit_id(commit_id);
        }

        self.unlock_all();
        self.state = SorterState::Committed;
    }

    fn on_rollback(&mut self) {
        self.unlock_all();
        self.state = SorterState::RolledBack;
    }

    fn failed(&self) -> bool {
        self.failed
    }
}
