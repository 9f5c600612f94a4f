use crate::statistics::StatisticsError;
use crate::storage::segment::ValueSegment;

use super::domain::{BinId, HistogramDomain};
use super::{
    bin_for_value_in, ceil_div, next_bin_for_value_in, value_distribution_from_segment, Histogram,
};

/// Bins hold an equal number of distinct values; bin edges follow the sorted
/// distinct values of the column, so gaps between bins carry real pruning
/// information.
pub struct EqualDistinctCountHistogram<D: HistogramDomain> {
    domain: D,
    bin_minima: Vec<D::Value>,
    bin_maxima: Vec<D::Value>,
    bin_heights: Vec<u64>,
    distinct_count_per_bin: u64,
    total_count: u64,
    total_distinct_count: u64,
}

impl<D: HistogramDomain> EqualDistinctCountHistogram<D> {
    pub fn from_segment(
        segment: &ValueSegment,
        target_bins: usize,
        domain: D,
    ) -> Result<EqualDistinctCountHistogram<D>, StatisticsError> {
        let distribution = value_distribution_from_segment(segment, &domain)?;
        Self::from_distribution(distribution, target_bins, domain)
    }

    pub fn from_distribution(
        distribution: Vec<(D::Value, u64)>,
        target_bins: usize,
        domain: D,
    ) -> Result<EqualDistinctCountHistogram<D>, StatisticsError> {
        assert!(target_bins > 0, "histogram needs at least one bin");
        if distribution.is_empty() {
            return Err(StatisticsError::EmptyColumn);
        }

        let total_distinct_count = distribution.len() as u64;
        let distinct_count_per_bin = ceil_div(total_distinct_count, target_bins as u64);

        let mut bin_minima = Vec::new();
        let mut bin_maxima = Vec::new();
        let mut bin_heights = Vec::new();
        let mut total_count = 0u64;

        for bin in distribution.chunks(distinct_count_per_bin as usize) {
            bin_minima.push(bin[0].0.clone());
            bin_maxima.push(bin[bin.len() - 1].0.clone());
            let height: u64 = bin.iter().map(|(_, count)| count).sum();
            bin_heights.push(height);
            total_count += height;
        }

        Ok(EqualDistinctCountHistogram {
            domain,
            bin_minima,
            bin_maxima,
            bin_heights,
            distinct_count_per_bin,
            total_count,
            total_distinct_count,
        })
    }
}

impl<D: HistogramDomain> Histogram<D> for EqualDistinctCountHistogram<D> {
    fn domain(&self) -> &D {
        &self.domain
    }

    fn histogram_name(&self) -> &'static str {
        "EqualDistinctCountHistogram"
    }

    fn bin_count(&self) -> usize {
        self.bin_minima.len()
    }

    fn bin_minimum(&self, bin: BinId) -> D::Value {
        self.bin_minima[bin].clone()
    }

    fn bin_maximum(&self, bin: BinId) -> D::Value {
        self.bin_maxima[bin].clone()
    }

    fn bin_height(&self, bin: BinId) -> u64 {
        self.bin_heights[bin]
    }

    fn bin_distinct_count(&self, bin: BinId) -> u64 {
        debug_assert!(bin < self.bin_count());
        if bin == self.bin_count() - 1 {
            // Only the last bin may hold fewer distinct values.
            self.total_distinct_count - self.distinct_count_per_bin * (self.bin_count() as u64 - 1)
        } else {
            self.distinct_count_per_bin
        }
    }

    fn bin_for_value(&self, value: &D::Value) -> Option<BinId> {
        bin_for_value_in(&self.bin_minima, &self.bin_maxima, value)
    }

    fn next_bin_for_value(&self, value: &D::Value) -> Option<BinId> {
        next_bin_for_value_in(&self.bin_minima, value)
    }

    fn total_count(&self) -> u64 {
        self.total_count
    }

    fn total_distinct_count(&self) -> u64 {
        self.total_distinct_count
    }
}

#[cfg(test)]
mod test {
    use super::super::domain::IntDomain;
    use super::*;

    fn distribution(pairs: &[(i64, u64)]) -> Vec<(i64, u64)> {
        pairs.to_vec()
    }

    #[test]
    fn builds_balanced_bins() {
        let hist = EqualDistinctCountHistogram::from_distribution(
            distribution(&[(12, 1), (123, 1), (17_000, 1), (123_456, 1)]),
            2,
            IntDomain,
        )
        .unwrap();

        assert_eq!(hist.bin_count(), 2);
        assert_eq!(hist.bin_minimum(0), 12);
        assert_eq!(hist.bin_maximum(0), 123);
        assert_eq!(hist.bin_minimum(1), 17_000);
        assert_eq!(hist.bin_maximum(1), 123_456);
        assert_eq!(hist.bin_distinct_count(0), 2);
        assert_eq!(hist.bin_distinct_count(1), 2);
        assert_eq!(hist.total_count(), 4);
        assert_eq!(hist.total_distinct_count(), 4);
    }

    #[test]
    fn last_bin_may_hold_fewer_distinct_values() {
        let hist = EqualDistinctCountHistogram::from_distribution(
            distribution(&[(1, 3), (2, 1), (3, 2), (4, 1), (5, 4)]),
            2,
            IntDomain,
        )
        .unwrap();

        // ceil(5 / 2) = 3 distinct per bin, the tail bin gets the rest.
        assert_eq!(hist.bin_count(), 2);
        assert_eq!(hist.bin_distinct_count(0), 3);
        assert_eq!(hist.bin_distinct_count(1), 2);
        assert_eq!(hist.bin_height(0), 6);
        assert_eq!(hist.bin_height(1), 5);
        assert_eq!(hist.total_count(), 11);
    }

    #[test]
    fn bin_lookup() {
        let hist = EqualDistinctCountHistogram::from_distribution(
            distribution(&[(12, 1), (123, 1), (17_000, 1), (123_456, 1)]),
            2,
            IntDomain,
        )
        .unwrap();

        assert_eq!(hist.bin_for_value(&12), Some(0));
        assert_eq!(hist.bin_for_value(&100), Some(0));
        assert_eq!(hist.bin_for_value(&124), None);
        assert_eq!(hist.bin_for_value(&17_000), Some(1));
        assert_eq!(hist.bin_for_value(&1_000_000), None);
        assert_eq!(hist.next_bin_for_value(&11), Some(0));
        assert_eq!(hist.next_bin_for_value(&124), Some(1));
        assert_eq!(hist.next_bin_for_value(&123_456), None);
    }

    #[test]
    fn empty_column_is_rejected() {
        let result = EqualDistinctCountHistogram::from_distribution(Vec::new(), 2, IntDomain);
        assert!(matches!(result, Err(StatisticsError::EmptyColumn)));
    }
}
