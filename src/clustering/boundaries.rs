use itertools::Itertools;
use tracing::debug;

use crate::statistics::histogram::domain::HistogramDomain;
use crate::statistics::histogram::Histogram;
use crate::statistics::ColumnHistogram;
use crate::storage::chunk::Chunk;
use crate::types::{ColumnId, Value};

/// One cluster index per clustering dimension. Rows with equal keys land in
/// the same cluster.
pub type ClusterKey = Vec<usize>;

/// Sentinel index marking the shared merge cluster for small chunks.
pub const MERGE_CLUSTER_INDEX: usize = usize::MAX;

#[derive(Debug, Clone, PartialEq)]
pub enum ClusterRange {
    /// NULL bucket, always the first entry of a nullable dimension.
    Null,
    /// Half-open value range [lower, upper); the last range is unbounded.
    Range { lower: Value, upper: Option<Value> },
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClusterBoundaries {
    ranges: Vec<ClusterRange>,
}

impl ClusterBoundaries {
    pub fn ranges(&self) -> &[ClusterRange] {
        &self.ranges
    }

    pub fn len(&self) -> usize {
        self.ranges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ranges.is_empty()
    }
}

/// Derive disjoint, gap-free value ranges from a histogram so that each
/// range holds roughly the same number of rows.
///
/// The returned cluster count may be lower than requested: the greedy pass
/// sacrifices the exact count rather than the balance when bins do not
/// divide evenly.
pub fn plan_boundaries<D: HistogramDomain>(
    histogram: &dyn Histogram<D>,
    row_count: usize,
    num_clusters: usize,
    nullable: bool,
) -> ClusterBoundaries {
    assert!(
        num_clusters > 1,
        "having less than 2 clusters does not make sense ({} requested)",
        num_clusters
    );
    assert!(
        num_clusters <= histogram.bin_count(),
        "more clusters ({}) than histogram bins ({})",
        num_clusters,
        histogram.bin_count()
    );

    // The histogram never stores NULLs, the difference to the table's row
    // count is the NULL count. The NULL bucket's presence is driven by the
    // column's nullability alone.
    let null_count = row_count.saturating_sub(histogram.total_count() as usize);
    let ideal_rows_per_cluster = 1.max((row_count - null_count) / num_clusters);

    let mut ranges = Vec::new();
    if nullable {
        ranges.push(ClusterRange::Null);
    }

    let bin_count = histogram.bin_count();
    let mut lower: Option<D::Value> = None;
    let mut rows_in_cluster = 0usize;
    let mut bin = 0;
    while bin < bin_count {
        let is_last_bin = bin + 1 == bin_count;
        if lower.is_none() {
            lower = Some(histogram.bin_minimum(bin));
        }
        let bin_size = histogram.bin_height(bin) as usize;

        // A cluster always swallows whole bins, so no single bin may dwarf
        // the target size.
        assert!(
            bin_size < 2 * ideal_rows_per_cluster,
            "bin is too large: {} rows, but a cluster should have about {} rows",
            bin_size,
            ideal_rows_per_cluster
        );

        if rows_in_cluster + bin_size < ideal_rows_per_cluster {
            // Cluster has not reached its target size yet.
            rows_in_cluster += bin_size;
            bin += 1;
        } else if rows_in_cluster + bin_size - ideal_rows_per_cluster
            < ideal_rows_per_cluster - rows_in_cluster
        {
            // Cluster overshoots with this bin but lands closer to the
            // target than without it.
            let upper = (!is_last_bin)
                .then(|| histogram.domain().to_value(&histogram.bin_minimum(bin + 1)));
            ranges.push(ClusterRange::Range {
                lower: histogram.domain().to_value(&lower.take().unwrap()),
                upper,
            });
            rows_in_cluster = 0;
            bin += 1;
        } else {
            // Cluster would overshoot too far, close it before this bin and
            // process the bin again for the next cluster.
            ranges.push(ClusterRange::Range {
                lower: histogram.domain().to_value(&lower.take().unwrap()),
                upper: Some(histogram.domain().to_value(&histogram.bin_minimum(bin))),
            });
            rows_in_cluster = 0;
        }
    }
    if let Some(lower) = lower.take() {
        ranges.push(ClusterRange::Range {
            lower: histogram.domain().to_value(&lower),
            upper: None,
        });
    }

    let boundaries = ClusterBoundaries { ranges };
    assert_boundaries_touch(&boundaries);
    debug!(
        requested = num_clusters,
        produced = boundaries.len(),
        "planned cluster boundaries"
    );
    boundaries
}

/// Adjacent non-NULL ranges must share their bound, the last one must be
/// unbounded.
fn assert_boundaries_touch(boundaries: &ClusterBoundaries) {
    let value_ranges = || {
        boundaries.ranges.iter().filter_map(|range| match range {
            ClusterRange::Null => None,
            ClusterRange::Range { lower, upper } => Some((lower, upper)),
        })
    };
    for ((_, upper), (lower, _)) in value_ranges().tuple_windows() {
        assert_eq!(
            upper.as_ref(),
            Some(lower),
            "hole between adjacent cluster boundaries"
        );
    }
    if let Some((_, upper)) = value_ranges().last() {
        assert!(upper.is_none(), "last cluster range must be unbounded");
    }
}

pub fn plan_boundaries_for(
    histogram: &ColumnHistogram,
    row_count: usize,
    num_clusters: usize,
    nullable: bool,
) -> ClusterBoundaries {
    match histogram {
        ColumnHistogram::Int(histogram) => {
            plan_boundaries(histogram.as_ref(), row_count, num_clusters, nullable)
        }
        ColumnHistogram::Float(histogram) => {
            plan_boundaries(histogram.as_ref(), row_count, num_clusters, nullable)
        }
        ColumnHistogram::Text(histogram) => {
            plan_boundaries(histogram.as_ref(), row_count, num_clusters, nullable)
        }
    }
}

/// The unique cluster index of a value. NULLs always map to index 0 (the
/// NULL bucket of a nullable dimension sits at the front). A value outside
/// every range breaks the coverage invariant and fails fast.
pub fn cluster_index(boundaries: &ClusterBoundaries, value: Option<&Value>) -> usize {
    let value = match value {
        None => return 0,
        Some(value) => value,
    };
    for (index, range) in boundaries.ranges.iter().enumerate() {
        match range {
            ClusterRange::Null => continue,
            ClusterRange::Range { lower, upper } => {
                if lower <= value && upper.as_ref().map_or(true, |upper| value < upper) {
                    return index;
                }
            }
        }
    }
    panic!("no matching cluster for value {}", value);
}

/// Per-row cluster keys of a chunk over all clustering dimensions.
pub fn cluster_keys_for_chunk(
    chunk: &Chunk,
    clustering_column_ids: &[ColumnId],
    boundaries: &[ClusterBoundaries],
) -> Vec<ClusterKey> {
    assert_eq!(clustering_column_ids.len(), boundaries.len());
    let mut keys = vec![Vec::with_capacity(boundaries.len()); chunk.size()];
    for (dimension, column_id) in clustering_column_ids.iter().enumerate() {
        let segment = chunk.get_segment(*column_id);
        for (offset, key) in keys.iter_mut().enumerate() {
            let value = segment.get(offset);
            key.push(cluster_index(&boundaries[dimension], value.as_ref()));
        }
    }
    keys
}

/// Cluster key of a chunk that is known to hold rows of a single cluster,
/// derived from its first row.
pub fn cluster_key_for_chunk(
    chunk: &Chunk,
    clustering_column_ids: &[ColumnId],
    boundaries: &[ClusterBoundaries],
) -> ClusterKey {
    assert!(chunk.size() > 0, "cannot classify an empty chunk");
    let mut key = Vec::with_capacity(boundaries.len());
    for (dimension, column_id) in clustering_column_ids.iter().enumerate() {
        let value = chunk.get_segment(*column_id).get(0);
        key.push(cluster_index(&boundaries[dimension], value.as_ref()));
    }
    key
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::statistics::histogram::domain::IntDomain;
    use crate::statistics::histogram::EqualDistinctCountHistogram;
    use crate::storage::mvcc::MvccData;
    use crate::storage::segment::{Segment, ValueSegment};
    use crate::types::DataType;
    use std::sync::Arc;

    fn histogram(pairs: &[(i64, u64)], bins: usize) -> EqualDistinctCountHistogram<IntDomain> {
        EqualDistinctCountHistogram::from_distribution(pairs.to_vec(), bins, IntDomain).unwrap()
    }

    fn range(lower: i64, upper: Option<i64>) -> ClusterRange {
        ClusterRange::Range { lower: Value::Int(lower), upper: upper.map(Value::Int) }
    }

    #[test]
    fn balances_rows_across_clusters() {
        // 4 bins with 10 rows each, 2 clusters of about 20 rows.
        let hist = histogram(&[(0, 5), (1, 5), (10, 5), (11, 5), (20, 5), (21, 5), (30, 5), (31, 5)], 4);
        let boundaries = plan_boundaries(&hist, 40, 2, false);

        assert_eq!(boundaries.ranges(), &[range(0, Some(20)), range(20, None)]);
    }

    #[test]
    fn nullable_dimension_gets_a_null_bucket() {
        let hist = histogram(&[(0, 5), (1, 5), (10, 5), (11, 5)], 2);
        // 4 of the 24 rows are NULL and live outside the histogram.
        let boundaries = plan_boundaries(&hist, 24, 2, true);
        assert_eq!(boundaries.ranges()[0], ClusterRange::Null);
        assert_eq!(boundaries.len(), 3);
        // Non-nullable never gets one, whatever the counts say.
        let boundaries = plan_boundaries(&hist, 20, 2, false);
        assert!(!boundaries.ranges().iter().any(|r| matches!(r, ClusterRange::Null)));
    }

    #[test]
    fn planner_is_deterministic() {
        let pairs: Vec<(i64, u64)> = (0..20).map(|v| (v, 3)).collect();
        let first = plan_boundaries(&histogram(&pairs, 10), 60, 5, false);
        let second = plan_boundaries(&histogram(&pairs, 10), 60, 5, false);
        assert_eq!(first, second);
    }

    #[test]
    fn may_return_fewer_clusters_than_requested() {
        // One heavy bin per cluster target makes the greedy pass close
        // clusters early.
        let hist = histogram(&[(0, 9), (10, 9), (20, 9)], 3);
        let boundaries = plan_boundaries(&hist, 27, 3, false);
        assert!(boundaries.len() <= 3);
        assert_boundaries_touch(&boundaries);
    }

    #[test]
    #[should_panic(expected = "bin is too large")]
    fn oversized_bin_is_rejected() {
        let hist = histogram(&[(0, 100), (10, 1), (20, 1), (30, 1)], 4);
        plan_boundaries(&hist, 103, 4, false);
    }

    #[test]
    fn cluster_index_covers_the_domain() {
        let hist = histogram(&[(0, 5), (1, 5), (10, 5), (11, 5), (20, 5), (21, 5), (30, 5), (31, 5)], 4);
        let boundaries = plan_boundaries(&hist, 40, 2, false);

        assert_eq!(cluster_index(&boundaries, Some(&Value::Int(0))), 0);
        assert_eq!(cluster_index(&boundaries, Some(&Value::Int(19))), 0);
        assert_eq!(cluster_index(&boundaries, Some(&Value::Int(20))), 1);
        // The last range is unbounded.
        assert_eq!(cluster_index(&boundaries, Some(&Value::Int(1_000_000))), 1);
        // NULL maps to the first bucket.
        assert_eq!(cluster_index(&boundaries, None), 0);
    }

    #[test]
    #[should_panic(expected = "no matching cluster")]
    fn value_below_all_ranges_fails_fast() {
        let hist = histogram(&[(10, 5), (11, 5), (20, 5), (21, 5)], 2);
        let boundaries = plan_boundaries(&hist, 20, 2, false);
        cluster_index(&boundaries, Some(&Value::Int(5)));
    }

    #[test]
    fn keys_for_chunk_cover_all_dimensions() {
        let hist = histogram(&[(0, 2), (1, 2), (10, 2), (11, 2)], 2);
        let boundaries = vec![plan_boundaries(&hist, 8, 2, true)];
        let segment = ValueSegment::from_values(
            DataType::Int,
            vec![Some(Value::Int(0)), None, Some(Value::Int(11))],
        );
        let chunk = Chunk::from_segments(
            vec![Arc::new(Segment::Value(segment))],
            Some(Arc::new(MvccData::new(3, 0))),
        );

        let keys = cluster_keys_for_chunk(&chunk, &[0], &boundaries);
        // Index 0 is the NULL bucket, value ranges start at 1.
        assert_eq!(keys, vec![vec![1], vec![0], vec![2]]);
        assert_eq!(cluster_key_for_chunk(&chunk, &[0], &boundaries), vec![1]);
    }
}
