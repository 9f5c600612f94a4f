use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard, RwLock};

use crate::storage::chunk::Chunk;
use crate::types::{ChunkId, ColumnId, DataType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDefinition {
    pub name: String,
    pub data_type: DataType,
    pub nullable: bool,
}

impl ColumnDefinition {
    pub fn new(name: &str, data_type: DataType, nullable: bool) -> ColumnDefinition {
        ColumnDefinition { name: name.to_string(), data_type, nullable }
    }
}

/*
    A table is an ordered sequence of chunks. Chunk ids are stable: chunks
    are only ever appended, never renumbered, and removal tombstones the
    slot. Appends are serialized by the append mutex, reads of the chunk
    list only take the read side.
*/
pub struct Table {
    column_definitions: Vec<ColumnDefinition>,
    target_chunk_size: usize,
    chunks: RwLock<Vec<Option<Arc<Chunk>>>>,
    append_mutex: Mutex<()>,
}

impl Table {
    pub fn new(column_definitions: Vec<ColumnDefinition>, target_chunk_size: usize) -> Table {
        assert!(!column_definitions.is_empty(), "table needs at least one column");
        assert!(target_chunk_size > 0);
        Table {
            column_definitions,
            target_chunk_size,
            chunks: RwLock::new(Vec::new()),
            append_mutex: Mutex::new(()),
        }
    }

    pub fn column_definitions(&self) -> &[ColumnDefinition] {
        &self.column_definitions
    }

    pub fn column_count(&self) -> usize {
        self.column_definitions.len()
    }

    pub fn column_types(&self) -> Vec<DataType> {
        self.column_definitions.iter().map(|column| column.data_type).collect()
    }

    pub fn column_id_by_name(&self, name: &str) -> Option<ColumnId> {
        self.column_definitions
            .iter()
            .position(|column| column.name == name)
            .map(|index| index as ColumnId)
    }

    pub fn column_name(&self, column_id: ColumnId) -> &str {
        &self.column_definitions[column_id as usize].name
    }

    pub fn column_data_type(&self, column_id: ColumnId) -> DataType {
        self.column_definitions[column_id as usize].data_type
    }

    pub fn column_is_nullable(&self, column_id: ColumnId) -> bool {
        self.column_definitions[column_id as usize].nullable
    }

    pub fn target_chunk_size(&self) -> usize {
        self.target_chunk_size
    }

    /// Number of chunk slots, including tombstoned ones.
    pub fn chunk_count(&self) -> ChunkId {
        self.chunks.read().len() as ChunkId
    }

    pub fn get_chunk(&self, chunk_id: ChunkId) -> Option<Arc<Chunk>> {
        self.chunks.read().get(chunk_id as usize).cloned().flatten()
    }

    pub fn last_chunk(&self) -> Option<Arc<Chunk>> {
        self.chunks.read().iter().rev().find_map(|chunk| chunk.clone())
    }

    /// Callers that need append + id assignment to be atomic with other
    /// appends hold the append mutex across the call.
    pub fn append_chunk(&self, chunk: Arc<Chunk>) -> ChunkId {
        assert_eq!(chunk.column_count(), self.column_count());
        let mut chunks = self.chunks.write();
        chunks.push(Some(chunk));
        (chunks.len() - 1) as ChunkId
    }

    /// Tombstone a fully invalidated chunk. The id is never reused.
    pub fn remove_chunk(&self, chunk_id: ChunkId) {
        let mut chunks = self.chunks.write();
        let slot = &mut chunks[chunk_id as usize];
        if let Some(chunk) = slot {
            assert_eq!(
                chunk.size(),
                chunk.invalid_row_count(),
                "only fully invalidated chunks can be removed"
            );
            *slot = None;
        }
    }

    /// All rows in all present chunks, including invalidated ones.
    pub fn row_count(&self) -> usize {
        self.chunks.read().iter().flatten().map(|chunk| chunk.size()).sum()
    }

    /// Rows that have not been invalidated.
    pub fn live_row_count(&self) -> usize {
        self.chunks
            .read()
            .iter()
            .flatten()
            .map(|chunk| chunk.size() - chunk.invalid_row_count())
            .sum()
    }

    pub fn acquire_append_mutex(&self) -> MutexGuard<'_, ()> {
        self.append_mutex.lock()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::storage::mvcc::MvccData;
    use crate::storage::segment::{Segment, ValueSegment};
    use crate::types::Value;

    fn int_chunk(values: &[i64]) -> Arc<Chunk> {
        let segment = ValueSegment::from_values(
            DataType::Int,
            values.iter().map(|v| Some(Value::Int(*v))),
        );
        Arc::new(Chunk::from_segments(
            vec![Arc::new(Segment::Value(segment))],
            Some(Arc::new(MvccData::new(values.len(), 0))),
        ))
    }

    fn test_table() -> Table {
        Table::new(vec![ColumnDefinition::new("a", DataType::Int, false)], 1024)
    }

    #[test]
    fn chunk_ids_are_stable_across_removal() {
        let table = test_table();
        let first = table.append_chunk(int_chunk(&[1, 2]));
        let second = table.append_chunk(int_chunk(&[3]));
        assert_eq!((first, second), (0, 1));
        assert_eq!(table.row_count(), 3);

        let chunk = table.get_chunk(first).unwrap();
        chunk.mvcc_data().set_end_cid(0, 1);
        chunk.mvcc_data().set_end_cid(1, 1);
        chunk.increase_invalid_row_count(2);
        table.remove_chunk(first);

        assert!(table.get_chunk(first).is_none());
        assert!(table.get_chunk(second).is_some());
        assert_eq!(table.chunk_count(), 2);
        assert_eq!(table.row_count(), 1);
    }

    #[test]
    #[should_panic]
    fn removing_a_live_chunk_panics() {
        let table = test_table();
        let id = table.append_chunk(int_chunk(&[1]));
        table.remove_chunk(id);
    }

    #[test]
    fn column_lookup() {
        let table = Table::new(
            vec![
                ColumnDefinition::new("a", DataType::Int, false),
                ColumnDefinition::new("b", DataType::Text, true),
            ],
            1024,
        );
        assert_eq!(table.column_id_by_name("b"), Some(1));
        assert_eq!(table.column_id_by_name("missing"), None);
        assert_eq!(table.column_data_type(1), DataType::Text);
        assert!(table.column_is_nullable(1));
    }
}
