use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::storage::mvcc::MvccData;
use crate::storage::segment::{Segment, ValueSegment};
use crate::types::{ColumnId, CommitId, DataType, SortColumnDefinition, Value, MAX_COMMIT_ID};

/// An append-only block of rows. Chunks are built privately or behind the
/// table's append mutex, finalized, and only then treated as immutable by
/// readers. Row visibility and invalidation live in the attached MVCC data;
/// `sorted_by` records orderings guaranteed by construction.
pub struct Chunk {
    segments: RwLock<Vec<Arc<Segment>>>,
    mvcc: Option<Arc<MvccData>>,
    sorted_by: RwLock<Vec<SortColumnDefinition>>,
    finalized: AtomicBool,
    invalid_row_count: AtomicU32,
    // MAX_COMMIT_ID doubles as "not set".
    cleanup_commit_id: AtomicU32,
}

impl Chunk {
    /// A growable chunk with empty value segments and MVCC slots, the target
    /// of transactional appends.
    pub fn new_mutable(column_types: &[DataType]) -> Chunk {
        let segments = column_types
            .iter()
            .map(|data_type| Arc::new(Segment::Value(ValueSegment::new(*data_type))))
            .collect();
        Chunk {
            segments: RwLock::new(segments),
            mvcc: Some(Arc::new(MvccData::new(0, 0))),
            sorted_by: RwLock::new(Vec::new()),
            finalized: AtomicBool::new(false),
            invalid_row_count: AtomicU32::new(0),
            cleanup_commit_id: AtomicU32::new(MAX_COMMIT_ID),
        }
    }

    pub fn from_segments(segments: Vec<Arc<Segment>>, mvcc: Option<Arc<MvccData>>) -> Chunk {
        assert!(!segments.is_empty(), "chunk needs at least one column");
        let size = segments[0].len();
        for segment in &segments {
            assert_eq!(segment.len(), size, "all segments must have the same length");
        }
        if let Some(mvcc) = &mvcc {
            assert_eq!(mvcc.size(), size, "MVCC data must cover every row");
        }
        Chunk {
            segments: RwLock::new(segments),
            mvcc,
            sorted_by: RwLock::new(Vec::new()),
            finalized: AtomicBool::new(false),
            invalid_row_count: AtomicU32::new(0),
            cleanup_commit_id: AtomicU32::new(MAX_COMMIT_ID),
        }
    }

    pub fn size(&self) -> usize {
        self.segments.read()[0].len()
    }

    pub fn column_count(&self) -> usize {
        self.segments.read().len()
    }

    pub fn get_segment(&self, column_id: ColumnId) -> Arc<Segment> {
        self.segments.read()[column_id as usize].clone()
    }

    pub fn segments(&self) -> Vec<Arc<Segment>> {
        self.segments.read().clone()
    }

    /// Swap in an encoded replacement for a column. The replacement must
    /// describe the same rows.
    pub fn replace_segment(&self, column_id: ColumnId, segment: Arc<Segment>) {
        let mut segments = self.segments.write();
        assert_eq!(segments[column_id as usize].len(), segment.len());
        segments[column_id as usize] = segment;
    }

    pub fn mvcc_data(&self) -> &Arc<MvccData> {
        self.mvcc.as_ref().expect("chunk has no MVCC data")
    }

    pub fn has_mvcc_data(&self) -> bool {
        self.mvcc.is_some()
    }

    pub fn get_row(&self, offset: usize) -> Vec<Option<Value>> {
        let segments = self.segments.read();
        segments.iter().map(|segment| segment.get(offset)).collect()
    }

    /// Append one row. Callers serialize through the owning table's append
    /// mutex; the chunk must not be finalized yet.
    pub fn append_row(&self, values: &[Option<Value>], begin_cid: CommitId) {
        assert!(!self.is_finalized(), "cannot append to a finalized chunk");
        let segments = self.segments.read();
        assert_eq!(values.len(), segments.len());
        for (segment, value) in segments.iter().zip(values) {
            match segment.as_ref() {
                Segment::Value(segment) => segment.append(value.as_ref()),
                Segment::Dictionary(_) => unreachable!("mutable chunks are never encoded"),
            }
        }
        self.mvcc_data().grow_by(1, begin_cid);
    }

    /// No further appends; the chunk becomes visible to readers.
    pub fn finalize(&self) {
        self.finalized.store(true, Ordering::Release);
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized.load(Ordering::Acquire)
    }

    pub fn invalid_row_count(&self) -> usize {
        self.invalid_row_count.load(Ordering::Acquire) as usize
    }

    pub fn increase_invalid_row_count(&self, by: u32) {
        self.invalid_row_count.fetch_add(by, Ordering::AcqRel);
    }

    pub fn set_cleanup_commit_id(&self, commit_id: CommitId) {
        self.cleanup_commit_id.store(commit_id, Ordering::Release);
    }

    pub fn cleanup_commit_id(&self) -> Option<CommitId> {
        let commit_id = self.cleanup_commit_id.load(Ordering::Acquire);
        (commit_id != MAX_COMMIT_ID).then_some(commit_id)
    }

    pub fn set_sorted_by(&self, sorted_by: Vec<SortColumnDefinition>) {
        *self.sorted_by.write() = sorted_by;
    }

    pub fn sorted_by(&self) -> Vec<SortColumnDefinition> {
        self.sorted_by.read().clone()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::types::Value;

    #[test]
    fn mutable_chunk_grows_row_by_row() {
        let chunk = Chunk::new_mutable(&[DataType::Int, DataType::Text]);
        assert_eq!(chunk.size(), 0);
        chunk.append_row(&[Some(Value::Int(1)), Some(Value::Text("a".to_string()))], 5);
        chunk.append_row(&[Some(Value::Int(2)), None], 5);

        assert_eq!(chunk.size(), 2);
        assert_eq!(chunk.mvcc_data().size(), 2);
        assert_eq!(chunk.mvcc_data().get_begin_cid(1), 5);
        assert_eq!(chunk.get_row(1), vec![Some(Value::Int(2)), None]);
    }

    #[test]
    #[should_panic]
    fn append_after_finalize_panics() {
        let chunk = Chunk::new_mutable(&[DataType::Int]);
        chunk.finalize();
        chunk.append_row(&[Some(Value::Int(1))], 0);
    }

    #[test]
    fn cleanup_commit_id_starts_unset() {
        let chunk = Chunk::new_mutable(&[DataType::Int]);
        assert_eq!(chunk.cleanup_commit_id(), None);
        chunk.set_cleanup_commit_id(12);
        assert_eq!(chunk.cleanup_commit_id(), Some(12));
    }
}
