use crate::statistics::StatisticsError;
use crate::storage::segment::ValueSegment;

use super::domain::{BinId, HistogramDomain};
use super::{value_distribution_from_segment, Histogram};

/// The value range [min, max] is split into ranges of equal width (for text
/// columns: equal width of the numeric representation after stripping the
/// common prefix of the column extrema). Bins may be empty, which makes
/// equality and range pruning inside the covered range possible.
pub struct EqualWidthHistogram<D: HistogramDomain> {
    domain: D,
    bin_minima: Vec<D::Value>,
    bin_maxima: Vec<D::Value>,
    bin_heights: Vec<u64>,
    bin_distinct_counts: Vec<u64>,
    total_count: u64,
    total_distinct_count: u64,
}

impl<D: HistogramDomain> EqualWidthHistogram<D> {
    pub fn from_segment(
        segment: &ValueSegment,
        target_bins: usize,
        domain: D,
    ) -> Result<EqualWidthHistogram<D>, StatisticsError> {
        let distribution = value_distribution_from_segment(segment, &domain)?;
        Self::from_distribution(distribution, target_bins, domain)
    }

    pub fn from_distribution(
        distribution: Vec<(D::Value, u64)>,
        target_bins: usize,
        domain: D,
    ) -> Result<EqualWidthHistogram<D>, StatisticsError> {
        assert!(target_bins > 0, "histogram needs at least one bin");
        if distribution.is_empty() {
            return Err(StatisticsError::EmptyColumn);
        }

        let minimum = distribution[0].0.clone();
        let maximum = distribution[distribution.len() - 1].0.clone();
        let ranges = domain.split_equal_width(&minimum, &maximum, target_bins);
        let bin_count = ranges.len();

        let mut bin_heights = vec![0u64; bin_count];
        let mut bin_distinct_counts = vec![0u64; bin_count];
        let mut total_count = 0u64;
        for (value, count) in &distribution {
            // Assignment uses the same width arithmetic as the split, so no
            // value can fall between two bins.
            let bin = domain.equal_width_bin_index(&minimum, &maximum, bin_count, value);
            bin_heights[bin] += count;
            bin_distinct_counts[bin] += 1;
            total_count += count;
        }

        let (bin_minima, bin_maxima) = ranges.into_iter().unzip();
        Ok(EqualWidthHistogram {
            domain,
            bin_minima,
            bin_maxima,
            bin_heights,
            bin_distinct_counts,
            total_count,
            total_distinct_count: distribution.len() as u64,
        })
    }
}

impl<D: HistogramDomain> Histogram<D> for EqualWidthHistogram<D> {
    fn domain(&self) -> &D {
        &self.domain
    }

    fn histogram_name(&self) -> &'static str {
        "EqualWidthHistogram"
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
        self.bin_distinct_counts[bin]
    }

    fn bin_for_value(&self, value: &D::Value) -> Option<BinId> {
        if *value < self.bin_minima[0] || *value > self.bin_maxima[self.bin_count() - 1] {
            return None;
        }
        Some(self.domain.equal_width_bin_index(
            &self.bin_minima[0],
            &self.bin_maxima[self.bin_count() - 1],
            self.bin_count(),
            value,
        ))
    }

    fn next_bin_for_value(&self, value: &D::Value) -> Option<BinId> {
        // There are no gaps inside the covered range; only values outside of
        // it can miss every bin.
        if *value < self.bin_minima[0] {
            Some(0)
        } else {
            None
        }
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
    use super::super::domain::{IntDomain, TextDomain};
    use super::*;

    #[test]
    fn empty_bins_are_kept() {
        let hist = EqualWidthHistogram::from_distribution(
            vec![(0i64, 2), (1, 1), (9, 3)],
            5,
            IntDomain,
        )
        .unwrap();

        assert_eq!(hist.bin_count(), 5);
        assert_eq!(hist.bin_minimum(0), 0);
        assert_eq!(hist.bin_maximum(4), 9);
        assert_eq!(hist.bin_height(0), 3);
        assert_eq!(hist.bin_height(1), 0);
        assert_eq!(hist.bin_height(4), 3);
        assert_eq!(hist.total_count(), 6);
        assert_eq!(hist.total_distinct_count(), 3);
    }

    #[test]
    fn bins_touch_without_gaps() {
        let hist = EqualWidthHistogram::from_distribution(
            vec![(0i64, 1), (99, 1)],
            4,
            IntDomain,
        )
        .unwrap();
        for bin in 1..hist.bin_count() {
            assert_eq!(hist.bin_minimum(bin), hist.bin_maximum(bin - 1) + 1);
        }
        // Every value of the range hits exactly one bin.
        for value in 0..=99 {
            assert!(hist.bin_for_value(&value).is_some());
        }
        assert_eq!(hist.bin_for_value(&-1), None);
        assert_eq!(hist.bin_for_value(&100), None);
    }

    #[test]
    fn narrow_domain_caps_bin_count() {
        let hist = EqualWidthHistogram::from_distribution(
            vec![(1i64, 1), (2, 1), (3, 1)],
            10,
            IntDomain,
        )
        .unwrap();
        assert_eq!(hist.bin_count(), 3);
        assert_eq!(hist.bin_height(0), 1);
    }

    #[test]
    fn text_bins_are_assigned_consistently() {
        let domain = TextDomain::new("abcdefghijklmnopqrstuvwxyz", 4).unwrap();
        let values = ["abcd", "abcz", "mmmm", "yyzz", "zzzz"];
        let distribution: Vec<(String, u64)> =
            values.iter().map(|v| (v.to_string(), 1)).collect();
        let hist =
            EqualWidthHistogram::from_distribution(distribution, 4, domain).unwrap();

        assert_eq!(hist.total_count(), 5);
        assert_eq!(hist.minimum(), "abcd");
        assert_eq!(hist.maximum(), "zzzz");
        let total: u64 = (0..hist.bin_count()).map(|b| hist.bin_height(b)).sum();
        assert_eq!(total, 5);
        // Values land in the bin their width arithmetic picks.
        for value in values {
            let bin = hist.bin_for_value(&value.to_string()).unwrap();
            assert!(hist.bin_height(bin) > 0);
        }
    }
}
