use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::Display;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam::channel;
use serde::Serialize;
use tracing::{info, warn};

pub mod boundaries;

use boundaries::{cluster_keys_for_chunk, plan_boundaries_for, ClusterBoundaries};
#[cfg(feature = "merge-small-chunks")]
use boundaries::{ClusterKey, MERGE_CLUSTER_INDEX};

use crate::engine::Engine;
use crate::operators::clustering_partitioner::{ClusterChunks, ClusteringPartitioner};
use crate::operators::clustering_sorter::ClusteringSorter;
use crate::statistics::{build_column_histogram, ColumnHistogram, StatisticsError};
use crate::storage::chunk::Chunk;
use crate::storage::dictionary::encode_chunk;
use crate::storage::table::Table;
use crate::transaction::RollbackReason;
use crate::types::{ChunkId, ColumnId};

/// Per table: the clustering dimensions as (column name, cluster count)
/// pairs. An entry with a cluster count of 1 means "sort on this column but
/// do not partition by it"; the last entry names the sort column.
pub type ClusteringByTable = BTreeMap<String, Vec<(String, usize)>>;

#[derive(Debug, Default, Serialize)]
pub struct TableRunStatistics {
    /// Step name to duration in nanoseconds.
    pub steps: BTreeMap<String, u128>,
    pub total_ns: u128,
}

#[derive(Debug, Default, Serialize)]
pub struct ClusteringRunStatistics {
    pub tables: BTreeMap<String, TableRunStatistics>,
    pub total_ns: u128,
}

impl ClusteringRunStatistics {
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("statistics serialize without fail")
    }
}

#[derive(Debug)]
pub enum ClusteringError {
    UnknownTable(String),
    UnknownColumn { table: String, column: String },
    Statistics(StatisticsError),
}

impl Display for ClusteringError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusteringError::UnknownTable(name) => write!(f, "unknown table: {}", name),
            ClusteringError::UnknownColumn { table, column } => {
                write!(f, "table {} has no column {}", table, column)
            }
            ClusteringError::Statistics(error) => write!(f, "{}", error),
        }
    }
}

impl Error for ClusteringError {}

impl From<StatisticsError> for ClusteringError {
    fn from(error: StatisticsError) -> Self {
        ClusteringError::Statistics(error)
    }
}

struct Timer(Instant);

impl Timer {
    fn new() -> Timer {
        Timer(Instant::now())
    }

    fn lap(&mut self) -> Duration {
        let elapsed = self.0.elapsed();
        self.0 = Instant::now();
        elapsed
    }
}

/*
    Drives the whole reorganisation of the configured tables:

      0. boundaries  histograms (statistics cache) -> boundary planner
      1. partition   every pre-existing chunk through the partitioner,
                     retrying a chunk until it goes through
      2. merge       coalesce small cluster chunks into a shared merge chunk
                     (compile-time feature)
      3. sort        every cluster's chunk set through the sorter, skipping
                     clusters that keep conflicting
      4. encode      dictionary-encode the installed chunks
      5. cleanup     drop fully invalidated chunks no active snapshot needs

    Transient conflicts are logged and retried or skipped here; invariant
    breaches in the planner or the key assigner are never caught.
*/
pub struct DisjointClustersAlgo<'a> {
    engine: &'a Engine,
    clustering_by_table: ClusteringByTable,
}

impl<'a> DisjointClustersAlgo<'a> {
    pub fn new(engine: &'a Engine, clustering_by_table: ClusteringByTable) -> DisjointClustersAlgo<'a> {
        DisjointClustersAlgo { engine, clustering_by_table }
    }

    pub fn description(&self) -> &'static str {
        "DisjointClustersAlgo"
    }

    pub fn run(&mut self) -> Result<ClusteringRunStatistics, ClusteringError> {
        let mut statistics = ClusteringRunStatistics::default();
        let mut total_timer = Timer::new();

        for (table_name, config) in self.clustering_by_table.clone() {
            info!(table = %table_name, "clustering table");
            let mut table_timer = Timer::new();
            let mut table_statistics = self.cluster_table(&table_name, &config)?;
            table_statistics.total_ns = table_timer.lap().as_nanos();
            info!(
                table = %table_name,
                duration_ms = (table_statistics.total_ns / 1_000_000) as u64,
                "clustering table done"
            );
            statistics.tables.insert(table_name, table_statistics);
        }

        statistics.total_ns = total_timer.lap().as_nanos();
        Ok(statistics)
    }

    fn cluster_table(
        &self,
        table_name: &str,
        config: &[(String, usize)],
    ) -> Result<TableRunStatistics, ClusteringError> {
        let table = self
            .engine
            .storage
            .get_table(table_name)
            .ok_or_else(|| ClusteringError::UnknownTable(table_name.to_string()))?;

        let column_id = |column: &str| {
            table.column_id_by_name(column).ok_or_else(|| ClusteringError::UnknownColumn {
                table: table_name.to_string(),
                column: column.to_string(),
            })
        };

        // A cluster count of 1 only selects the sort column.
        let mut clustering_column_ids: Vec<ColumnId> = Vec::new();
        let mut num_clusters_per_dimension: Vec<usize> = Vec::new();
        for (column_name, num_clusters) in config {
            if *num_clusters > 1 {
                clustering_column_ids.push(column_id(column_name)?);
                num_clusters_per_dimension.push(*num_clusters);
            }
        }
        let sort_column_id = column_id(&config.last().expect("empty clustering config").0)?;

        let mut step_timer = Timer::new();
        let mut statistics = TableRunStatistics::default();

        // Phase 0: histograms and boundaries.
        let boundaries = self.all_cluster_boundaries(
            table_name,
            &table,
            &clustering_column_ids,
            &num_clusters_per_dimension,
        )?;
        statistics.steps.insert("boundaries".to_string(), step_timer.lap().as_nanos());

        // Phase 1: partition every pre-existing chunk into its clusters.
        let chunk_count_before = table.chunk_count();
        let mut clusters = ClusterChunks::new();
        let mut chunk_id: ChunkId = 0;
        while chunk_id < chunk_count_before {
            let chunk = match table.get_chunk(chunk_id) {
                Some(chunk) => chunk,
                None => {
                    chunk_id += 1;
                    continue;
                }
            };
            let expected_invalid_row_count = chunk.invalid_row_count();
            let cluster_keys =
                cluster_keys_for_chunk(&chunk, &clustering_column_ids, &boundaries);

            let context = self.engine.transaction_manager.new_transaction_context();
            let mut partitioner = ClusteringPartitioner::new(
                table.clone(),
                chunk_id,
                chunk,
                cluster_keys,
                expected_invalid_row_count,
                &mut clusters,
            );
            match partitioner.execute(&context) {
                Ok(()) => {
                    context.commit(&mut [&mut partitioner]);
                    chunk_id += 1;
                }
                Err(error) => {
                    // Retry the same chunk until it goes through.
                    warn!(chunk_id, %error, "partitioning conflict, trying again");
                    context.rollback(&mut [&mut partitioner], RollbackReason::Conflict);
                }
            }
        }
        // Finalize the new cluster chunks, no more rows will land in them.
        for chunk_ids in clusters.chunk_ids_per_cluster.values() {
            for chunk_id in chunk_ids {
                table.get_chunk(*chunk_id).expect("chunk disappeared").finalize();
            }
        }
        statistics.steps.insert("partition".to_string(), step_timer.lap().as_nanos());

        // Phase 1.5: merge small cluster chunks into a shared merge chunk.
        #[cfg(feature = "merge-small-chunks")]
        {
            self.merge_small_chunks(&table, &clustering_column_ids, &mut clusters);
            statistics.steps.insert("merge".to_string(), step_timer.lap().as_nanos());
        }

        // Phase 2: sort each cluster and swap the sorted chunks in.
        let mut new_chunk_ids: Vec<ChunkId> = Vec::new();
        for (key, chunk_ids) in &clusters.chunk_ids_per_cluster {
            if chunk_ids.is_empty() {
                continue;
            }
            let context = self.engine.transaction_manager.new_transaction_context();
            let mut sorter = ClusteringSorter::new(
                table.clone(),
                chunk_ids.clone(),
                sort_column_id,
                &self.engine.pool,
            );
            match sorter.execute(&context) {
                Ok(()) => {
                    context.commit(&mut [&mut sorter]);
                    new_chunk_ids.extend_from_slice(sorter.installed_chunk_ids());
                }
                Err(error) => {
                    warn!(cluster = ?key, %error, "failed to sort a cluster, skipping it");
                    context.rollback(&mut [&mut sorter], RollbackReason::Conflict);
                }
            }
        }
        statistics.steps.insert("sort".to_string(), step_timer.lap().as_nanos());

        // Phase 2.5: make sure every installed chunk is dictionary-encoded.
        for chunk_id in &new_chunk_ids {
            let chunk = table.get_chunk(*chunk_id).expect("chunk must not be deleted");
            encode_chunk(&chunk);
        }
        statistics.steps.insert("encode".to_string(), step_timer.lap().as_nanos());

        // Phase 3: drop fully invalidated chunks nobody can still read.
        let mut invalid_chunks = 0usize;
        let mut removed_chunks = 0usize;
        for chunk_id in 0..table.chunk_count() {
            let chunk = match table.get_chunk(chunk_id) {
                Some(chunk) => chunk,
                None => continue,
            };
            if chunk.size() == chunk.invalid_row_count() {
                invalid_chunks += 1;
                if self.can_delete_chunk(chunk.as_ref()) {
                    table.remove_chunk(chunk_id);
                    removed_chunks += 1;
                }
            }
        }
        statistics.steps.insert("cleanup".to_string(), step_timer.lap().as_nanos());

        info!(
            table = %table_name,
            chunks_before = chunk_count_before,
            chunks_now = table.chunk_count(),
            invalid_chunks,
            removed_chunks,
            "cleanup done"
        );

        Ok(statistics)
    }

    /// Histograms for all clustering columns (built in parallel on the
    /// worker pool and cached), then boundary planning per dimension.
    fn all_cluster_boundaries(
        &self,
        table_name: &str,
        table: &Arc<Table>,
        clustering_column_ids: &[ColumnId],
        num_clusters_per_dimension: &[usize],
    ) -> Result<Vec<ClusterBoundaries>, ClusteringError> {
        let row_count = table.row_count();

        let mut histograms: Vec<Option<Arc<ColumnHistogram>>> =
            (0..clustering_column_ids.len()).map(|_| None).collect();

        let (sender, receiver) = channel::unbounded();
        let mut pending = 0usize;
        for (dimension, column_id) in clustering_column_ids.iter().enumerate() {
            if let Some(histogram) = self.engine.statistics.histogram(table_name, *column_id) {
                histograms[dimension] = Some(histogram);
                continue;
            }
            pending += 1;
            let table = table.clone();
            let column_id = *column_id;
            let target_bins = self.engine.config.histogram_bins;
            let sender = sender.clone();
            self.engine.pool.execute(move || {
                let histogram = build_column_histogram(&table, column_id, target_bins);
                sender.send((dimension, histogram)).expect("histogram channel closed");
            });
        }
        drop(sender);
        for _ in 0..pending {
            let (dimension, histogram) = receiver.recv().expect("histogram worker died");
            let histogram = self.engine.statistics.insert(
                table_name,
                clustering_column_ids[dimension],
                histogram?,
            );
            histograms[dimension] = Some(histogram);
        }

        let mut boundaries = Vec::with_capacity(clustering_column_ids.len());
        for (dimension, column_id) in clustering_column_ids.iter().enumerate() {
            let histogram = histograms[dimension].as_ref().expect("histogram was built");
            let nullable = table.column_is_nullable(*column_id);
            info!(
                column = table.column_name(*column_id),
                nulls = row_count.saturating_sub(histogram.total_count() as usize),
                requested = num_clusters_per_dimension[dimension],
                "planning boundaries"
            );
            let planned = plan_boundaries_for(
                histogram,
                row_count,
                num_clusters_per_dimension[dimension],
                nullable,
            );
            info!(
                column = table.column_name(*column_id),
                produced = planned.len(),
                "boundaries planned"
            );
            boundaries.push(planned);
        }
        Ok(boundaries)
    }

    #[cfg(feature = "merge-small-chunks")]
    fn merge_small_chunks(
        &self,
        table: &Arc<Table>,
        clustering_column_ids: &[ColumnId],
        clusters: &mut ClusterChunks,
    ) {
        let threshold = self.engine.config.small_chunk_threshold;
        let merge_key: ClusterKey = vec![MERGE_CLUSTER_INDEX; clustering_column_ids.len()];

        let candidates: Vec<(ClusterKey, ChunkId)> = clusters
            .open_chunks
            .iter()
            .filter(|(key, _)| **key != merge_key)
            .map(|(key, (chunk_id, _))| (key.clone(), *chunk_id))
            .collect();

        for (key, chunk_id) in candidates {
            let chunk = table.get_chunk(chunk_id).expect("chunk disappeared");
            if chunk.size() > threshold {
                continue;
            }
            assert!(chunk.size() > 0, "there should not be an empty chunk");

            // Re-partition the whole chunk into the shared merge cluster.
            let cluster_keys = vec![merge_key.clone(); chunk.size()];
            let expected_invalid_row_count = chunk.invalid_row_count();
            let context = self.engine.transaction_manager.new_transaction_context();
            let mut partitioner = ClusteringPartitioner::new(
                table.clone(),
                chunk_id,
                chunk,
                cluster_keys,
                expected_invalid_row_count,
                &mut *clusters,
            );
            match partitioner.execute(&context) {
                Ok(()) => {
                    context.commit(&mut [&mut partitioner]);
                    // The rows moved, drop the chunk from its old cluster.
                    clusters
                        .chunk_ids_per_cluster
                        .get_mut(&key)
                        .expect("cluster has a chunk set")
                        .remove(&chunk_id);
                    clusters.open_chunks.remove(&key);
                }
                Err(error) => {
                    warn!(chunk_id, %error, "chunk was modified during the merge, skipping it");
                    context.rollback(&mut [&mut partitioner], RollbackReason::Conflict);
                }
            }
        }

        // Finalize the merge chunks.
        if let Some(chunk_ids) = clusters.chunk_ids_per_cluster.get(&merge_key) {
            for chunk_id in chunk_ids {
                table.get_chunk(*chunk_id).expect("chunk disappeared").finalize();
            }
        }
    }

    fn can_delete_chunk(&self, chunk: &Chunk) -> bool {
        // Active transactions with a snapshot before the cleanup commit id
        // may still read the chunk's rows.
        let cleanup_commit_id = chunk.cleanup_commit_id().expect("expected a cleanup commit id");
        match self.engine.transaction_manager.lowest_active_snapshot_commit_id() {
            Some(lowest_snapshot) => cleanup_commit_id <= lowest_snapshot,
            None => true,
        }
    }
}

#[cfg(test)]
mod test {
    use super::boundaries::cluster_index;
    use super::*;
    use crate::config::EngineConfig;
    use crate::storage::table::ColumnDefinition;
    use crate::types::{DataType, Value, MAX_COMMIT_ID};
    use std::collections::BTreeSet;

    fn test_engine(small_chunk_threshold: usize) -> Engine {
        Engine::with_config(EngineConfig {
            n_threads: 4,
            target_chunk_size: 25_000,
            histogram_bins: 100,
            small_chunk_threshold,
        })
    }

    fn build_sales_table(rows: usize, rows_per_chunk: usize) -> Arc<Table> {
        let table = Arc::new(Table::new(
            vec![
                ColumnDefinition::new("region", DataType::Int, false),
                ColumnDefinition::new("amount", DataType::Int, false),
            ],
            25_000,
        ));
        let mut row = 0usize;
        while row < rows {
            let chunk = Chunk::new_mutable(&table.column_types());
            for _ in 0..rows_per_chunk.min(rows - row) {
                let region = ((row * 7919) % 97) as i64;
                let amount = ((row * 104_729) % 50_021) as i64;
                chunk.append_row(&[Some(Value::Int(region)), Some(Value::Int(amount))], 0);
                row += 1;
            }
            chunk.finalize();
            table.append_chunk(Arc::new(chunk));
        }
        table
    }

    fn live_rows(table: &Table) -> Vec<(i64, i64)> {
        let mut rows = Vec::new();
        for chunk_id in 0..table.chunk_count() {
            let chunk = match table.get_chunk(chunk_id) {
                Some(chunk) => chunk,
                None => continue,
            };
            let mvcc = chunk.mvcc_data();
            for offset in 0..chunk.size() {
                if mvcc.get_end_cid(offset) == MAX_COMMIT_ID {
                    rows.push((
                        chunk.get_segment(0).get(offset).unwrap().as_int(),
                        chunk.get_segment(1).get(offset).unwrap().as_int(),
                    ));
                }
            }
        }
        rows
    }

    #[test]
    fn clustering_round_trip() {
        // A zero threshold disables small-chunk merging so every installed
        // chunk belongs to exactly one cluster.
        let engine = test_engine(0);
        let table = build_sales_table(100_000, 10_000);
        engine.storage.add_table("sales", table.clone());

        let mut before = live_rows(&table);

        // Pre-build the histogram; the planner is deterministic, so the
        // boundaries recomputed here match the ones the run uses.
        let histogram = engine.statistics.get_or_build("sales", &table, 0).unwrap();
        let planned = plan_boundaries_for(&histogram, table.row_count(), 10, false);

        let config = BTreeMap::from([(
            "sales".to_string(),
            vec![("region".to_string(), 10usize), ("amount".to_string(), 1usize)],
        )]);
        let statistics = DisjointClustersAlgo::new(&engine, config).run().unwrap();

        assert_eq!(table.live_row_count(), 100_000);

        let mut after = Vec::new();
        for chunk_id in 0..table.chunk_count() {
            let chunk = match table.get_chunk(chunk_id) {
                Some(chunk) => chunk,
                None => continue,
            };
            if chunk.size() == chunk.invalid_row_count() {
                continue;
            }
            // Installed chunks are fully live, finalized, encoded and carry
            // the sort annotation.
            assert_eq!(chunk.invalid_row_count(), 0);
            assert!(chunk.is_finalized());
            assert!(chunk.get_segment(0).is_encoded());
            assert!(!chunk.sorted_by().is_empty());

            let regions: Vec<i64> = (0..chunk.size())
                .map(|offset| chunk.get_segment(0).get(offset).unwrap().as_int())
                .collect();
            let amounts: Vec<i64> = (0..chunk.size())
                .map(|offset| chunk.get_segment(1).get(offset).unwrap().as_int())
                .collect();

            // Every row of the chunk falls into the same region cluster.
            let clusters: BTreeSet<usize> = regions
                .iter()
                .map(|region| cluster_index(&planned, Some(&Value::Int(*region))))
                .collect();
            assert_eq!(clusters.len(), 1, "chunk {} spans clusters", chunk_id);

            // Sorted ascending on the sort column.
            assert!(amounts.windows(2).all(|pair| pair[0] <= pair[1]));

            after.extend(regions.into_iter().zip(amounts));
        }

        // No row lost, none duplicated.
        before.sort_unstable();
        after.sort_unstable();
        assert_eq!(before, after);

        // The pre-clustering chunks are gone; no snapshot could still see
        // them.
        for chunk_id in 0..10 {
            assert!(table.get_chunk(chunk_id).is_none());
        }

        let sales = &statistics.tables["sales"];
        let mut expected_steps = vec!["boundaries", "partition", "sort", "encode", "cleanup"];
        if cfg!(feature = "merge-small-chunks") {
            expected_steps.push("merge");
        }
        for step in expected_steps {
            assert!(sales.steps.contains_key(step), "missing step {}", step);
        }
        assert!(statistics.total_ns > 0);
    }

    #[cfg(feature = "merge-small-chunks")]
    #[test]
    fn small_clusters_are_coalesced() {
        // Every cluster stays far below the threshold, so all of them get
        // merged into one shared chunk before sorting.
        let engine = test_engine(10_000);
        let table = build_sales_table(2_000, 500);
        engine.storage.add_table("sales", table.clone());

        let before_count = table.live_row_count();
        let config = BTreeMap::from([(
            "sales".to_string(),
            vec![("region".to_string(), 4usize), ("amount".to_string(), 1usize)],
        )]);
        DisjointClustersAlgo::new(&engine, config).run().unwrap();

        assert_eq!(table.live_row_count(), before_count);
        let live_chunks: Vec<Arc<Chunk>> = (0..table.chunk_count())
            .filter_map(|chunk_id| table.get_chunk(chunk_id))
            .filter(|chunk| chunk.invalid_row_count() < chunk.size())
            .collect();
        assert_eq!(live_chunks.len(), 1, "all small clusters merge into one chunk");
        let merged = &live_chunks[0];
        assert!(merged.is_finalized());
        // The merged chunk mixes regions from more than one cluster but is
        // still sorted on the sort column.
        let amounts: Vec<i64> = (0..merged.size())
            .map(|offset| merged.get_segment(1).get(offset).unwrap().as_int())
            .collect();
        assert!(amounts.windows(2).all(|pair| pair[0] <= pair[1]));
    }

    #[test]
    fn unknown_table_is_reported() {
        let engine = test_engine(0);
        let config =
            BTreeMap::from([("missing".to_string(), vec![("a".to_string(), 2usize)])]);
        let result = DisjointClustersAlgo::new(&engine, config).run();
        assert!(matches!(result, Err(ClusteringError::UnknownTable(_))));
    }

    #[test]
    fn unknown_column_is_reported() {
        let engine = test_engine(0);
        let table = build_sales_table(100, 100);
        engine.storage.add_table("sales", table);
        let config =
            BTreeMap::from([("sales".to_string(), vec![("nope".to_string(), 2usize)])]);
        let result = DisjointClustersAlgo::new(&engine, config).run();
        assert!(matches!(result, Err(ClusteringError::UnknownColumn { .. })));
    }

    #[test]
    fn old_snapshots_keep_invalidated_chunks_alive() {
        let engine = test_engine(0);
        let table = build_sales_table(1_000, 500);
        engine.storage.add_table("sales", table.clone());

        // A long-running reader pins the pre-clustering snapshot.
        let reader = engine.transaction_manager.new_transaction_context();

        let config = BTreeMap::from([(
            "sales".to_string(),
            vec![("region".to_string(), 4usize), ("amount".to_string(), 1usize)],
        )]);
        DisjointClustersAlgo::new(&engine, config).run().unwrap();

        // The original chunks are invalidated but must not be removed while
        // the reader could still see them.
        assert!(table.get_chunk(0).is_some());
        assert_eq!(table.live_row_count(), 1_000);
        drop(reader);
    }
}
