use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use crossbeam::channel;

use crate::operators::{OperatorPerformance, RowReference};
use crate::pool::WorkerPool;
use crate::storage::chunk::Chunk;
use crate::storage::segment::{Segment, ValueSegment};
use crate::storage::table::Table;
use crate::types::{ColumnId, SortColumnDefinition, Value};

/// Materializing ascending sort. Reads the given row references from the
/// input table, sorts them on one column (NULLs first), and writes fresh
/// value segments split into chunks of the requested size. Output chunks
/// carry the sorted_by annotation. Materialization of the output chunks runs
/// on the worker pool.
pub struct Sort<'a> {
    table: Arc<Table>,
    input_rows: Vec<RowReference>,
    sort_column_id: ColumnId,
    output_chunk_size: usize,
    pool: &'a WorkerPool,
    performance: OperatorPerformance,
}

impl<'a> Sort<'a> {
    pub fn new(
        table: Arc<Table>,
        input_rows: Vec<RowReference>,
        sort_column_id: ColumnId,
        output_chunk_size: usize,
        pool: &'a WorkerPool,
    ) -> Sort<'a> {
        assert!((sort_column_id as usize) < table.column_count());
        assert!(output_chunk_size > 0);
        Sort {
            table,
            input_rows,
            sort_column_id,
            output_chunk_size,
            pool,
            performance: OperatorPerformance::default(),
        }
    }

    pub fn name(&self) -> &'static str {
        "Sort"
    }

    pub fn performance(&self) -> OperatorPerformance {
        self.performance
    }

    pub fn execute(&mut self) -> Vec<Arc<Chunk>> {
        let start = Instant::now();

        // Pull the sort keys, one segment fetch per input chunk.
        let mut segments: BTreeMap<u32, Arc<Segment>> = BTreeMap::new();
        let mut keyed: Vec<(Option<Value>, RowReference)> =
            Vec::with_capacity(self.input_rows.len());
        for row in &self.input_rows {
            let segment = segments.entry(row.0).or_insert_with(|| {
                self.table
                    .get_chunk(row.0)
                    .expect("input chunk disappeared")
                    .get_segment(self.sort_column_id)
            });
            keyed.push((segment.get(row.1 as usize), *row));
        }

        keyed.sort_by(|a, b| match (&a.0, &b.0) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(left), Some(right)) => left.total_cmp(right),
        });

        let sorted_rows: Vec<RowReference> = keyed.into_iter().map(|(_, row)| row).collect();

        // Materialize each output chunk on the pool.
        let (sender, receiver) = channel::unbounded();
        let slices: Vec<Vec<RowReference>> = sorted_rows
            .chunks(self.output_chunk_size)
            .map(|slice| slice.to_vec())
            .collect();
        let output_count = slices.len();
        for (index, rows) in slices.into_iter().enumerate() {
            let table = self.table.clone();
            let sender = sender.clone();
            self.pool.execute(move || {
                let segments = materialize(&table, &rows);
                sender.send((index, segments)).expect("sort result channel closed");
            });
        }
        drop(sender);

        let mut materialized: Vec<Option<Vec<Arc<Segment>>>> = (0..output_count).map(|_| None).collect();
        for (index, segments) in receiver {
            materialized[index] = Some(segments);
        }

        let sorted_by = vec![SortColumnDefinition::ascending(self.sort_column_id)];
        let chunks: Vec<Arc<Chunk>> = materialized
            .into_iter()
            .map(|segments| {
                let chunk = Chunk::from_segments(segments.expect("worker died"), None);
                chunk.set_sorted_by(sorted_by.clone());
                Arc::new(chunk)
            })
            .collect();

        self.performance = OperatorPerformance {
            walltime: start.elapsed(),
            output_rows: sorted_rows.len() as u64,
        };
        chunks
    }
}

fn materialize(table: &Table, rows: &[RowReference]) -> Vec<Arc<Segment>> {
    let mut segments = Vec::with_capacity(table.column_count());
    for column_id in 0..table.column_count() as u32 {
        let output = ValueSegment::new(table.column_data_type(column_id));
        let mut input: BTreeMap<u32, Arc<Segment>> = BTreeMap::new();
        for row in rows {
            let segment = input.entry(row.0).or_insert_with(|| {
                table.get_chunk(row.0).expect("input chunk disappeared").get_segment(column_id)
            });
            output.append(segment.get(row.1 as usize).as_ref());
        }
        segments.push(Arc::new(Segment::Value(output)));
    }
    segments
}
