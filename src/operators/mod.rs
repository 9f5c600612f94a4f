use std::error::Error;
use std::fmt::Display;
use std::time::Duration;

use crate::types::{ChunkId, ChunkOffset, CommitId};

pub mod clustering_partitioner;
pub mod clustering_sorter;
pub mod sort;
pub mod validate;

pub type RowReference = (ChunkId, ChunkOffset);

#[derive(Debug)]
pub enum OperatorError {
    /// Transient MVCC conflict (failed row lock, invalid-row-count drift).
    /// The caller rolls back and may retry.
    Conflict(String),
}

impl Display for OperatorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OperatorError::Conflict(reason) => write!(f, "transaction conflict: {}", reason),
        }
    }
}

impl Error for OperatorError {}

/// The commit protocol of operators that modify MVCC state. `execute` runs
/// under a transaction context first (each operator has its own signature
/// for that); the transaction manager then drives exactly one of on_commit
/// or on_rollback. Every row lock taken during execute is released on both
/// paths.
pub trait ReadWriteOperator {
    fn name(&self) -> &'static str;
    fn on_commit(&mut self, commit_id: CommitId);
    fn on_rollback(&mut self);
    fn failed(&self) -> bool;
}

/// Wall-clock and row accounting every operator exposes.
#[derive(Debug, Clone, Copy, Default)]
pub struct OperatorPerformance {
    pub walltime: Duration,
    pub output_rows: u64,
}
