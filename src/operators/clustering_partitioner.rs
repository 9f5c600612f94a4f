use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use crate::clustering::boundaries::ClusterKey;
use crate::operators::{OperatorError, ReadWriteOperator};
use crate::storage::chunk::Chunk;
use crate::storage::table::Table;
use crate::transaction::TransactionContext;
use crate::types::{ChunkId, ChunkOffset, CommitId, TransactionId, Value, MAX_COMMIT_ID, UNLOCKED_TID};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PartitionerState {
    Unstarted,
    Staged,
    Committed,
    RolledBack,
}

/// Open target chunks and the accumulated chunk sets per cluster, shared
/// across the partitioner runs of one clustering pass.
#[derive(Default)]
pub struct ClusterChunks {
    /// Cluster key to the currently open (still mutable) chunk.
    pub open_chunks: BTreeMap<ClusterKey, (ChunkId, Arc<Chunk>)>,
    /// Every chunk that holds rows of a cluster.
    pub chunk_ids_per_cluster: BTreeMap<ClusterKey, BTreeSet<ChunkId>>,
}

impl ClusterChunks {
    pub fn new() -> ClusterChunks {
        ClusterChunks::default()
    }
}

/*
    Transactionally moves every live row of one chunk into the open chunk of
    its cluster. Same protocol as the sorter: lock all live rows by CAS,
    verify that the chunk did not change since the cluster keys were
    computed, stage the row values, and at commit append them to the cluster
    chunks (rows begin at the commit id) while invalidating the source rows.
    Target chunks are created on demand, appended to the table and only
    finalized by the orchestrator once no more rows will land in them.
*/
pub struct ClusteringPartitioner<'a> {
    table: Arc<Table>,
    chunk_id: ChunkId,
    chunk: Arc<Chunk>,
    cluster_keys: Vec<ClusterKey>,
    expected_invalid_row_count: usize,
    clusters: &'a mut ClusterChunks,
    transaction_id: TransactionId,
    locked_offsets: Vec<ChunkOffset>,
    staged_rows: BTreeMap<ClusterKey, Vec<Vec<Option<Value>>>>,
    state: PartitionerState,
    failed: bool,
}

impl<'a> ClusteringPartitioner<'a> {
    /// `expected_invalid_row_count` is the chunk's invalid row count at the
    /// time the cluster keys were computed; any drift fails the operator.
    pub fn new(
        table: Arc<Table>,
        chunk_id: ChunkId,
        chunk: Arc<Chunk>,
        cluster_keys: Vec<ClusterKey>,
        expected_invalid_row_count: usize,
        clusters: &'a mut ClusterChunks,
    ) -> ClusteringPartitioner<'a> {
        ClusteringPartitioner {
            table,
            chunk_id,
            chunk,
            cluster_keys,
            expected_invalid_row_count,
            clusters,
            transaction_id: UNLOCKED_TID,
            locked_offsets: Vec::new(),
            staged_rows: BTreeMap::new(),
            state: PartitionerState::Unstarted,
            failed: false,
        }
    }

    pub fn execute(&mut self, context: &TransactionContext) -> Result<(), OperatorError> {
        assert_eq!(self.state, PartitionerState::Unstarted);
        self.transaction_id = context.transaction_id();

        if self.cluster_keys.len() != self.chunk.size() {
            // Rows were appended after the keys were computed.
            self.failed = true;
            return Err(OperatorError::Conflict(format!(
                "chunk {} grew from {} to {} rows since cluster keys were computed",
                self.chunk_id,
                self.cluster_keys.len(),
                self.chunk.size()
            )));
        }

        let mvcc = self.chunk.mvcc_data();
        for offset in 0..self.chunk.size() {
            if mvcc.get_end_cid(offset) != MAX_COMMIT_ID {
                continue;
            }
            if !mvcc.compare_exchange_tid(offset, UNLOCKED_TID, self.transaction_id) {
                self.failed = true;
                return Err(OperatorError::Conflict(format!(
                    "failed to lock row {} of chunk {}",
                    offset, self.chunk_id
                )));
            }
            self.locked_offsets.push(offset as ChunkOffset);
        }

        if self.chunk.invalid_row_count() != self.expected_invalid_row_count {
            self.failed = true;
            return Err(OperatorError::Conflict(format!(
                "chunk {} was modified since cluster keys were computed",
                self.chunk_id
            )));
        }

        // Rows are locked now, nobody can invalidate them under us.
        for offset in &self.locked_offsets {
            let key = self.cluster_keys[*offset as usize].clone();
            self.staged_rows
                .entry(key)
                .or_default()
                .push(self.chunk.get_row(*offset as usize));
        }

        self.state = PartitionerState::Staged;
        Ok(())
    }

    fn unlock_all(&mut self) {
        let mvcc = self.chunk.mvcc_data();
        for offset in std::mem::take(&mut self.locked_offsets) {
            let released =
                mvcc.compare_exchange_tid(offset as usize, self.transaction_id, UNLOCKED_TID);
            assert!(released, "unable to release a lock held by our own transaction");
        }
    }

    fn append_to_cluster(&mut self, key: &ClusterKey, row: &[Option<Value>], commit_id: CommitId) {
        let target_chunk_size = self.table.target_chunk_size();
        if let Some((_, open)) = self.clusters.open_chunks.get(key) {
            if open.size() >= target_chunk_size {
                // Chunk is full, no more rows will land in it.
                open.finalize();
                self.clusters.open_chunks.remove(key);
            }
        }
        if !self.clusters.open_chunks.contains_key(key) {
            let chunk = Arc::new(Chunk::new_mutable(&self.table.column_types()));
            let chunk_id = {
                let _append_lock = self.table.acquire_append_mutex();
                self.table.append_chunk(chunk.clone())
            };
            self.clusters.open_chunks.insert(key.clone(), (chunk_id, chunk));
            self.clusters
                .chunk_ids_per_cluster
                .entry(key.clone())
                .or_default()
                .insert(chunk_id);
        }
        let (_, open) = &self.clusters.open_chunks[key];
        open.append_row(row, commit_id);
    }
}

impl ReadWriteOperator for ClusteringPartitioner<'_> {
    fn name(&self) -> &'static str {
        "ClusteringPartitioner"
    }

    fn on_commit(&mut self, commit_id: CommitId) {
        assert_eq!(self.state, PartitionerState::Staged);

        for (key, rows) in std::mem::take(&mut self.staged_rows) {
            for row in rows {
                self.append_to_cluster(&key, &row, commit_id);
            }
        }

        // Invalidate the source rows and release the locks.
        let mvcc = self.chunk.mvcc_data();
        for offset in &self.locked_offsets {
            mvcc.set_end_cid(*offset as usize, commit_id);
        }
        self.chunk.increase_invalid_row_count(self.locked_offsets.len() as u32);
        self.chunk.set_cleanup_commit_id(commit_id);
        self.unlock_all();
        self.state = PartitionerState::Committed;
    }

    fn on_rollback(&mut self) {
        self.unlock_all();
        self.state = PartitionerState::RolledBack;
    }

    fn failed(&self) -> bool {
        self.failed
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::storage::mvcc::MvccData;
    use crate::storage::segment::{Segment, ValueSegment};
    use crate::storage::table::{ColumnDefinition, Table};
    use crate::transaction::{RollbackReason, TransactionManager};
    use crate::types::DataType;

    fn table_with_chunk(values: &[Option<i64>]) -> (Arc<Table>, Arc<Chunk>) {
        let table = Arc::new(Table::new(
            vec![ColumnDefinition::new("a", DataType::Int, true)],
            4,
        ));
        let segment =
            ValueSegment::from_values(DataType::Int, values.iter().map(|v| v.map(Value::Int)));
        let chunk = Arc::new(Chunk::from_segments(
            vec![Arc::new(Segment::Value(segment))],
            Some(Arc::new(MvccData::new(values.len(), 0))),
        ));
        chunk.finalize();
        table.append_chunk(chunk.clone());
        (table, chunk)
    }

    #[test]
    fn moves_rows_into_cluster_chunks() {
        let (table, source) = table_with_chunk(&[Some(1), Some(10), Some(2), Some(11)]);
        let manager = TransactionManager::new();
        let mut clusters = ClusterChunks::new();

        // Rows below 10 go to cluster 0, the rest to cluster 1.
        let keys = vec![vec![0], vec![1], vec![0], vec![1]];
        let context = manager.new_transaction_context();
        let mut partitioner =
            ClusteringPartitioner::new(table.clone(), 0, source.clone(), keys, 0, &mut clusters);
        partitioner.execute(&context).unwrap();
        let commit_id = context.commit(&mut [&mut partitioner]);

        assert_eq!(source.invalid_row_count(), 4);
        assert_eq!(source.cleanup_commit_id(), Some(commit_id));

        assert_eq!(clusters.open_chunks.len(), 2);
        let (low_id, low) = &clusters.open_chunks[&vec![0usize]];
        let (high_id, high) = &clusters.open_chunks[&vec![1usize]];
        assert_ne!(low_id, high_id);
        assert_eq!(low.size(), 2);
        assert_eq!(high.size(), 2);
        assert_eq!(low.get_segment(0).get(0), Some(Value::Int(1)));
        assert_eq!(low.get_segment(0).get(1), Some(Value::Int(2)));
        assert_eq!(low.mvcc_data().get_begin_cid(0), commit_id);
        assert_eq!(table.live_row_count(), 4);
    }

    #[test]
    fn full_target_chunks_are_finalized_and_replaced() {
        // Target chunk size is 4; 6 rows of one cluster need two chunks.
        let values: Vec<Option<i64>> = (0..6).map(Some).collect();
        let (table, source) = table_with_chunk(&values);
        let manager = TransactionManager::new();
        let mut clusters = ClusterChunks::new();
        let keys = vec![vec![0]; 6];
        let context = manager.new_transaction_context();
        let mut partitioner =
            ClusteringPartitioner::new(table.clone(), 0, source, keys, 0, &mut clusters);
        partitioner.execute(&context).unwrap();
        context.commit(&mut [&mut partitioner]);

        let chunk_ids = &clusters.chunk_ids_per_cluster[&vec![0usize]];
        assert_eq!(chunk_ids.len(), 2);
        let sizes: Vec<usize> = chunk_ids
            .iter()
            .map(|id| table.get_chunk(*id).unwrap().size())
            .collect();
        assert_eq!(sizes.iter().sum::<usize>(), 6);
        assert!(sizes.contains(&4));
    }

    #[test]
    fn conflict_rolls_back_without_moving_rows() {
        let (table, source) = table_with_chunk(&[Some(1), Some(2)]);
        let manager = TransactionManager::new();
        let mut clusters = ClusterChunks::new();

        // Foreign lock on row 1.
        assert!(source.mvcc_data().compare_exchange_tid(1, UNLOCKED_TID, 77));

        let context = manager.new_transaction_context();
        let mut partitioner = ClusteringPartitioner::new(
            table.clone(),
            0,
            source.clone(),
            vec![vec![0], vec![0]],
            0,
            &mut clusters,
        );
        assert!(partitioner.execute(&context).is_err());
        assert!(partitioner.failed());
        context.rollback(&mut [&mut partitioner], RollbackReason::Conflict);

        assert_eq!(source.mvcc_data().get_tid(0), UNLOCKED_TID);
        assert_eq!(source.mvcc_data().get_tid(1), 77);
        assert_eq!(source.invalid_row_count(), 0);
        assert_eq!(table.chunk_count(), 1);
        assert!(clusters.open_chunks.is_empty());
    }

    #[test]
    fn null_rows_follow_their_cluster_key() {
        let (table, source) = table_with_chunk(&[None, Some(5)]);
        let manager = TransactionManager::new();
        let mut clusters = ClusterChunks::new();
        let keys = vec![vec![0], vec![1]];
        let context = manager.new_transaction_context();
        let mut partitioner =
            ClusteringPartitioner::new(table.clone(), 0, source, keys, 0, &mut clusters);
        partitioner.execute(&context).unwrap();
        context.commit(&mut [&mut partitioner]);

        let (_, null_chunk) = &clusters.open_chunks[&vec![0usize]];
        assert_eq!(null_chunk.get_segment(0).get(0), None);
    }
}
