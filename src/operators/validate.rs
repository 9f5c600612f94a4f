use std::time::Instant;

use crate::operators::{OperatorPerformance, RowReference};
use crate::storage::table::Table;
use crate::transaction::TransactionContext;
use crate::types::{CommitId, TransactionId, MAX_COMMIT_ID};

/// Snapshot visibility: a row is visible when it was committed at or before
/// the snapshot and not invalidated at or before it, or when it is this
/// transaction's own uncommitted insert.
pub fn is_row_visible(
    our_tid: TransactionId,
    snapshot_commit_id: CommitId,
    row_tid: TransactionId,
    begin_cid: CommitId,
    end_cid: CommitId,
) -> bool {
    if row_tid == our_tid && begin_cid == MAX_COMMIT_ID && end_cid == MAX_COMMIT_ID {
        return true;
    }
    begin_cid <= snapshot_commit_id && snapshot_commit_id < end_cid
}

/// Filters a table down to the row references visible to a transaction.
pub struct Validate<'a> {
    table: &'a Table,
    performance: OperatorPerformance,
}

impl<'a> Validate<'a> {
    pub fn new(table: &'a Table) -> Validate<'a> {
        Validate { table, performance: OperatorPerformance::default() }
    }

    pub fn name(&self) -> &'static str {
        "Validate"
    }

    pub fn execute(&mut self, context: &TransactionContext) -> Vec<RowReference> {
        let start = Instant::now();
        let mut visible = Vec::new();
        for chunk_id in 0..self.table.chunk_count() {
            let chunk = match self.table.get_chunk(chunk_id) {
                Some(chunk) => chunk,
                None => continue,
            };
            let mvcc = chunk.mvcc_data();
            for offset in 0..chunk.size() {
                if is_row_visible(
                    context.transaction_id(),
                    context.snapshot_commit_id(),
                    mvcc.get_tid(offset),
                    mvcc.get_begin_cid(offset),
                    mvcc.get_end_cid(offset),
                ) {
                    visible.push((chunk_id, offset as u32));
                }
            }
        }
        self.performance =
            OperatorPerformance { walltime: start.elapsed(), output_rows: visible.len() as u64 };
        visible
    }

    pub fn performance(&self) -> OperatorPerformance {
        self.performance
    }
}
