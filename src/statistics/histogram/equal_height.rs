use crate::statistics::StatisticsError;
use crate::storage::segment::ValueSegment;

use super::domain::{BinId, HistogramDomain};
use super::{
    bin_for_value_in, ceil_div, next_bin_for_value_in, value_distribution_from_segment, Histogram,
};

/// Bins are grown until each holds approximately total_count / target_bins
/// rows. All bins share a single count_per_bin; the last bin's true height
/// may be smaller, which is why estimators cap at total_count(). Bins touch
/// (each minimum is the successor of the previous maximum), so there are no
/// gaps.
pub struct EqualHeightHistogram<D: HistogramDomain> {
    domain: D,
    bin_minima: Vec<D::Value>,
    bin_maxima: Vec<D::Value>,
    count_per_bin: u64,
    bin_distinct_counts: Vec<u64>,
    total_count: u64,
    total_distinct_count: u64,
}

impl<D: HistogramDomain> EqualHeightHistogram<D> {
    pub fn from_segment(
        segment: &ValueSegment,
        target_bins: usize,
        domain: D,
    ) -> Result<EqualHeightHistogram<D>, StatisticsError> {
        let distribution = value_distribution_from_segment(segment, &domain)?;
        Self::from_distribution(distribution, target_bins, domain)
    }

    pub fn from_distribution(
        distribution: Vec<(D::Value, u64)>,
        target_bins: usize,
        domain: D,
    ) -> Result<EqualHeightHistogram<D>, StatisticsError> {
        assert!(target_bins > 0, "histogram needs at least one bin");
        if distribution.is_empty() {
            return Err(StatisticsError::EmptyColumn);
        }

        let total_count: u64 = distribution.iter().map(|(_, count)| count).sum();
        let total_distinct_count = distribution.len() as u64;
        let count_per_bin = ceil_div(total_count, target_bins as u64);

        let mut bin_maxima = Vec::new();
        let mut bin_distinct_counts = Vec::new();
        let mut rows_in_bin = 0u64;
        let mut distinct_in_bin = 0u64;
        for (value, count) in &distribution {
            rows_in_bin += count;
            distinct_in_bin += 1;
            // A single value's rows never split across bins, bins fill until
            // they reach the shared count.
            if rows_in_bin >= count_per_bin {
                bin_maxima.push(value.clone());
                bin_distinct_counts.push(distinct_in_bin);
                rows_in_bin = 0;
                distinct_in_bin = 0;
            }
        }
        if distinct_in_bin > 0 {
            bin_maxima.push(distribution[distribution.len() - 1].0.clone());
            bin_distinct_counts.push(distinct_in_bin);
        }

        // Bins touch: every minimum is the successor of the previous maximum.
        let mut bin_minima = Vec::with_capacity(bin_maxima.len());
        bin_minima.push(distribution[0].0.clone());
        for bin in 1..bin_maxima.len() {
            bin_minima.push(domain.next_value(&bin_maxima[bin - 1]));
        }

        Ok(EqualHeightHistogram {
            domain,
            bin_minima,
            bin_maxima,
            count_per_bin,
            bin_distinct_counts,
            total_count,
            total_distinct_count,
        })
    }

    pub fn count_per_bin(&self) -> u64 {
        self.count_per_bin
    }
}

impl<D: HistogramDomain> Histogram<D> for EqualHeightHistogram<D> {
    fn domain(&self) -> &D {
        &self.domain
    }

    fn histogram_name(&self) -> &'static str {
        "EqualHeightHistogram"
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

    fn bin_height(&self, _bin: BinId) -> u64 {
        self.count_per_bin
    }

    fn bin_distinct_count(&self, bin: BinId) -> u64 {
        self.bin_distinct_counts[bin]
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

    #[test]
    fn bins_touch_and_share_a_count() {
        let hist = EqualHeightHistogram::from_distribution(
            vec![(1i64, 4), (5, 1), (10, 3), (20, 2), (30, 2)],
            3,
            IntDomain,
        )
        .unwrap();

        // ceil(12 / 3) = 4 rows per bin.
        assert_eq!(hist.count_per_bin(), 4);
        assert_eq!(hist.total_count(), 12);
        for bin in 0..hist.bin_count() {
            assert_eq!(hist.bin_height(bin), 4);
        }
        for bin in 1..hist.bin_count() {
            assert_eq!(hist.bin_minimum(bin), hist.bin_maximum(bin - 1) + 1);
        }
        assert_eq!(hist.minimum(), 1);
        assert_eq!(hist.maximum(), 30);
    }

    #[test]
    fn tail_bin_may_be_smaller() {
        let hist = EqualHeightHistogram::from_distribution(
            vec![(1i64, 3), (2, 3), (3, 1)],
            2,
            IntDomain,
        )
        .unwrap();

        // 4 rows per bin; values 1 and 2 fill the first bin, the tail only
        // holds one row although it reports the shared count.
        assert_eq!(hist.count_per_bin(), 4);
        assert_eq!(hist.bin_count(), 2);
        assert_eq!(hist.bin_height(1), 4);
        assert_eq!(hist.total_count(), 7);
        assert_eq!(hist.bin_distinct_count(0), 2);
        assert_eq!(hist.bin_distinct_count(1), 1);
    }

    #[test]
    fn heavy_value_overflows_its_bin() {
        let hist = EqualHeightHistogram::from_distribution(
            vec![(1i64, 10), (2, 1)],
            3,
            IntDomain,
        )
        .unwrap();

        // 1's ten rows cannot split, the first bin simply overflows.
        assert_eq!(hist.bin_count(), 2);
        assert_eq!(hist.bin_maximum(0), 1);
        assert_eq!(hist.bin_minimum(1), 2);
    }
}
