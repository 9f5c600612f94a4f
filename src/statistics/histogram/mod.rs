use crate::statistics::StatisticsError;
use crate::storage::segment::ValueSegment;
use crate::types::{PredicateCondition, Value};

pub mod domain;
pub mod equal_distinct_count;
pub mod equal_height;
pub mod equal_width;

use domain::{BinId, HistogramDomain, LikePatternBounds};

pub use equal_distinct_count::EqualDistinctCountHistogram;
pub use equal_height::EqualHeightHistogram;
pub use equal_width::EqualWidthHistogram;

/*
    The histogram core. Concrete histograms only provide bin storage and
    lookup (the methods up to total_distinct_count); pruning, cardinality
    estimation and slicing are implemented once on top of those accessors.

    Pruning must be sound: does_not_contain may only return true when the
    histogram proves that no matching row can exist. Cardinality estimates
    are approximations and carry an is_exact flag for the rare cases where
    the structure of the bins makes them precise.
*/

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CardinalityEstimate {
    pub cardinality: f32,
    pub is_exact: bool,
}

impl CardinalityEstimate {
    fn exact(cardinality: f32) -> CardinalityEstimate {
        CardinalityEstimate { cardinality, is_exact: true }
    }

    fn inexact(cardinality: f32) -> CardinalityEstimate {
        CardinalityEstimate { cardinality, is_exact: false }
    }
}

/// Ordered (value, count) pairs over the non-null entries of a segment. The
/// input of every histogram constructor.
pub fn value_distribution_from_segment<D: HistogramDomain>(
    segment: &ValueSegment,
    domain: &D,
) -> Result<Vec<(D::Value, u64)>, StatisticsError> {
    let mut values = Vec::with_capacity(segment.len());
    for offset in 0..segment.len() {
        if let Some(value) = segment.get(offset) {
            values.push(domain.value_from(&value)?);
        }
    }
    Ok(value_distribution_from_values(values))
}

pub fn value_distribution_from_values<V: PartialOrd>(mut values: Vec<V>) -> Vec<(V, u64)> {
    values.sort_by(|a, b| a.partial_cmp(b).expect("unordered value in column"));
    let mut distribution: Vec<(V, u64)> = Vec::new();
    for value in values {
        match distribution.last_mut() {
            Some((last, count)) if *last == value => *count += 1,
            _ => distribution.push((value, 1)),
        }
    }
    distribution
}

/// Merge several ordered distributions (one per chunk) into one.
pub fn merge_value_distributions<V: PartialOrd>(
    distributions: Vec<Vec<(V, u64)>>,
) -> Vec<(V, u64)> {
    let mut pairs: Vec<(V, u64)> = distributions.into_iter().flatten().collect();
    pairs.sort_by(|a, b| a.0.partial_cmp(&b.0).expect("unordered value in column"));
    let mut merged: Vec<(V, u64)> = Vec::with_capacity(pairs.len());
    for (value, count) in pairs {
        match merged.last_mut() {
            Some((last, last_count)) if *last == value => *last_count += count,
            _ => merged.push((value, count)),
        }
    }
    merged
}

pub(crate) fn ceil_div(dividend: u64, divisor: u64) -> u64 {
    dividend / divisor + u64::from(dividend % divisor > 0)
}

pub(crate) fn bin_for_value_in<V: PartialOrd>(
    minima: &[V],
    maxima: &[V],
    value: &V,
) -> Option<BinId> {
    let index = maxima.partition_point(|m| m < value);
    if index < minima.len() && &minima[index] <= value {
        Some(index)
    } else {
        None
    }
}

pub(crate) fn next_bin_for_value_in<V: PartialOrd>(minima: &[V], value: &V) -> Option<BinId> {
    let index = minima.partition_point(|m| m <= value);
    (index < minima.len()).then_some(index)
}

pub trait Histogram<D: HistogramDomain>: Send + Sync {
    fn domain(&self) -> &D;
    fn histogram_name(&self) -> &'static str;
    fn bin_count(&self) -> usize;
    fn bin_minimum(&self, bin: BinId) -> D::Value;
    fn bin_maximum(&self, bin: BinId) -> D::Value;
    fn bin_height(&self, bin: BinId) -> u64;
    fn bin_distinct_count(&self, bin: BinId) -> u64;
    /// Bin whose inclusive range contains `value`, if any.
    fn bin_for_value(&self, value: &D::Value) -> Option<BinId>;
    /// First bin whose minimum lies above `value`, if any.
    fn next_bin_for_value(&self, value: &D::Value) -> Option<BinId>;
    fn total_count(&self) -> u64;
    fn total_distinct_count(&self) -> u64;

    fn minimum(&self) -> D::Value {
        self.bin_minimum(0)
    }

    fn maximum(&self) -> D::Value {
        self.bin_maximum(self.bin_count() - 1)
    }

    fn share_of_bin_below(&self, bin: BinId, value: &D::Value) -> f32 {
        self.domain()
            .share_below(&self.bin_minimum(bin), &self.bin_maximum(bin), value)
    }

    fn description(&self) -> String {
        let mut out = String::new();
        out.push_str(self.histogram_name());
        out.push('\n');
        out.push_str(&format!("  distinct    {}\n", self.total_distinct_count()));
        out.push_str(&format!("  min         {}\n", self.minimum()));
        out.push_str(&format!("  max         {}\n", self.maximum()));
        out.push_str(&format!("  bins        {}\n", self.bin_count()));
        out.push_str("  edges / counts\n");
        for bin in 0..self.bin_count() {
            out.push_str(&format!(
                "              [{}, {}]: {}\n",
                self.bin_minimum(bin),
                self.bin_maximum(bin),
                self.bin_height(bin)
            ));
        }
        out
    }

    /// True only when the histogram proves that no row matches.
    fn does_not_contain(
        &self,
        condition: PredicateCondition,
        value: &Value,
        value2: Option<&Value>,
    ) -> Result<bool, StatisticsError> {
        match condition {
            PredicateCondition::Like | PredicateCondition::NotLike => {
                let pattern = match value {
                    Value::Text(pattern) => pattern.as_str(),
                    _ => {
                        return Err(StatisticsError::UnsupportedPredicate(
                            "LIKE is only supported on text columns",
                        ))
                    }
                };
                let bounds = self.domain().like_pattern_bounds(pattern)?;
                if condition == PredicateCondition::Like {
                    Ok(self.prune_like(bounds))
                } else {
                    Ok(self.prune_not_like(bounds, pattern))
                }
            }
            PredicateCondition::In
            | PredicateCondition::IsNull
            | PredicateCondition::IsNotNull => {
                // Histograms never store NULLs and do not model IN; nothing
                // can be proven here.
                Ok(false)
            }
            _ => {
                let typed = self.domain().value_from(value)?;
                let typed2 = match value2 {
                    Some(value2) => Some(self.domain().value_from(value2)?),
                    None => None,
                };
                Ok(self.prune_typed(condition, &typed, typed2.as_ref()))
            }
        }
    }

    #[doc(hidden)]
    fn prune_typed(
        &self,
        condition: PredicateCondition,
        value: &D::Value,
        value2: Option<&D::Value>,
    ) -> bool {
        match condition {
            PredicateCondition::Equals => match self.bin_for_value(value) {
                // Equal-width histograms may contain empty bins.
                None => true,
                Some(bin) => self.bin_height(bin) == 0,
            },
            PredicateCondition::NotEquals => {
                self.minimum() == *value && self.maximum() == *value
            }
            PredicateCondition::LessThan => *value <= self.minimum(),
            PredicateCondition::LessThanEquals => *value < self.minimum(),
            PredicateCondition::GreaterThanEquals => *value > self.maximum(),
            PredicateCondition::GreaterThan => *value >= self.maximum(),
            PredicateCondition::Between => {
                let value2 = value2.expect("BETWEEN needs a second value");
                if self.prune_typed(PredicateCondition::GreaterThanEquals, value, None) {
                    return true;
                }
                if self.prune_typed(PredicateCondition::LessThanEquals, value2, None)
                    || value2 < value
                {
                    return true;
                }

                let value_bin = self.bin_for_value(value);
                let value2_bin = self.bin_for_value(value2);

                // Both endpoints in the same gap between bins. At least two
                // bins are needed to rule out value < min and value2 > max.
                if value_bin.is_none()
                    && value2_bin.is_none()
                    && self.bin_count() > 1
                    && self.next_bin_for_value(value) == self.next_bin_for_value(value2)
                {
                    return true;
                }

                // Both endpoints in empty bins with only empty bins between.
                if let (Some(bin), Some(bin2)) = (value_bin, value2_bin) {
                    if self.bin_height(bin) == 0 && self.bin_height(bin2) == 0 {
                        return (bin + 1..bin2).all(|between| self.bin_height(between) == 0);
                    }
                }

                false
            }
            // Do not prune predicates we cannot handle.
            _ => false,
        }
    }

    #[doc(hidden)]
    fn prune_like(&self, bounds: LikePatternBounds<D::Value>) -> bool {
        match bounds {
            LikePatternBounds::Exact(value) => {
                self.prune_typed(PredicateCondition::Equals, &value, None)
            }
            LikePatternBounds::MatchAll | LikePatternBounds::Unprunable => false,
            LikePatternBounds::Prefix { lower, upper, at_domain_max } => {
                /*
                    A prefix pattern 'q%...' matches only values in [q, q+)
                    where q+ is the successor of q within its own length. The
                    pattern is prunable when that half-open range provably
                    holds no rows.
                */
                if self.prune_typed(PredicateCondition::GreaterThanEquals, &lower, None) {
                    return true;
                }
                if at_domain_max {
                    // No successor within the prefix length, the range is
                    // unbounded above.
                    return false;
                }
                if self.prune_typed(PredicateCondition::LessThan, &upper, None) {
                    return true;
                }

                let lower_bin = self.bin_for_value(&lower);
                let upper_bin = self.bin_for_value(&upper);

                if lower_bin.is_none() {
                    let next_after_lower = self.next_bin_for_value(&lower);

                    // Both bounds in the same gap between bins.
                    if upper_bin.is_none()
                        && self.bin_count() > 1
                        && next_after_lower == self.next_bin_for_value(&upper)
                    {
                        return true;
                    }

                    // The upper bound is exactly the minimum of the next bin.
                    // It is the first value after the pattern range, so that
                    // bin holds no match either.
                    if let Some(upper_bin) = upper_bin {
                        if next_after_lower == Some(upper_bin)
                            && self.bin_minimum(upper_bin) == upper
                        {
                            return true;
                        }
                    }
                }

                // Both bounds in empty bins with only empty bins in between.
                if let (Some(lower_bin), Some(upper_bin)) = (lower_bin, upper_bin) {
                    if self.bin_height(lower_bin) == 0
                        && (self.bin_height(upper_bin) == 0
                            || self.bin_minimum(upper_bin) == upper)
                    {
                        return (lower_bin + 1..upper_bin)
                            .all(|between| self.bin_height(between) == 0);
                    }
                }

                false
            }
        }
    }

    #[doc(hidden)]
    fn prune_not_like(&self, bounds: LikePatternBounds<D::Value>, pattern: &str) -> bool {
        match bounds {
            LikePatternBounds::Exact(value) => {
                self.prune_typed(PredicateCondition::NotEquals, &value, None)
            }
            // NOT LIKE '%' matches nothing.
            LikePatternBounds::MatchAll => true,
            LikePatternBounds::Unprunable => false,
            LikePatternBounds::Prefix { .. } => {
                // Prunable iff every value of the histogram starts with the
                // literal prefix of the pattern.
                let prefix = &pattern[..pattern.find('%').expect("prefix bounds imply a wildcard")];
                self.domain().value_has_prefix(&self.minimum(), prefix)
                    && self.domain().value_has_prefix(&self.maximum(), prefix)
            }
        }
    }

    fn estimate_cardinality(
        &self,
        condition: PredicateCondition,
        value: &Value,
        value2: Option<&Value>,
    ) -> Result<CardinalityEstimate, StatisticsError> {
        match condition {
            PredicateCondition::Like | PredicateCondition::NotLike => {
                let pattern = match value {
                    Value::Text(pattern) => pattern.as_str(),
                    _ => {
                        return Err(StatisticsError::UnsupportedPredicate(
                            "LIKE is only supported on text columns",
                        ))
                    }
                };
                let bounds = self.domain().like_pattern_bounds(pattern)?;
                if condition == PredicateCondition::Like {
                    if self.prune_like(bounds.clone()) {
                        return Ok(CardinalityEstimate::exact(0.0));
                    }
                    Ok(self.estimate_like(bounds, pattern))
                } else {
                    if self.prune_not_like(bounds.clone(), pattern) {
                        return Ok(CardinalityEstimate::exact(0.0));
                    }
                    Ok(self.estimate_not_like(bounds, pattern))
                }
            }
            PredicateCondition::In
            | PredicateCondition::IsNull
            | PredicateCondition::IsNotNull => {
                Ok(CardinalityEstimate::inexact(self.total_count() as f32))
            }
            _ => {
                let typed = self.domain().value_from(value)?;
                let typed2 = match value2 {
                    Some(value2) => Some(self.domain().value_from(value2)?),
                    None => None,
                };
                Ok(self.estimate_checked(condition, &typed, typed2.as_ref()))
            }
        }
    }

    #[doc(hidden)]
    fn estimate_checked(
        &self,
        condition: PredicateCondition,
        value: &D::Value,
        value2: Option<&D::Value>,
    ) -> CardinalityEstimate {
        if self.prune_typed(condition, value, value2) {
            return CardinalityEstimate::exact(0.0);
        }
        let total = self.total_count() as f32;
        match condition {
            PredicateCondition::Equals => {
                let bin = self
                    .bin_for_value(value)
                    .expect("pruning catches values outside every bin");
                let distinct = self.bin_distinct_count(bin);
                debug_assert!(distinct > 0, "0 distinct values in a non-pruned bin");
                CardinalityEstimate {
                    cardinality: self.bin_height(bin) as f32 / distinct as f32,
                    is_exact: distinct == 1,
                }
            }
            PredicateCondition::NotEquals => {
                let equals = match self.bin_for_value(value) {
                    Some(_) => self.estimate_checked(PredicateCondition::Equals, value, None),
                    None => CardinalityEstimate::exact(0.0),
                };
                CardinalityEstimate {
                    cardinality: total - equals.cardinality,
                    is_exact: equals.is_exact,
                }
            }
            PredicateCondition::LessThan => {
                if *value > self.maximum() {
                    return CardinalityEstimate::exact(total);
                }
                debug_assert!(
                    *value >= self.minimum(),
                    "pruning catches values below the histogram minimum"
                );

                let (complete_bins_below, partial, is_exact) = match self.bin_for_value(value) {
                    Some(bin) => {
                        (bin, self.share_of_bin_below(bin, value) * self.bin_height(bin) as f32, false)
                    }
                    None => {
                        // The value sits in a gap; every bin below it counts
                        // completely and the estimate is structurally exact.
                        let next = self
                            .next_bin_for_value(value)
                            .expect("value is within the histogram range");
                        (next, 0.0, true)
                    }
                };

                let mut cardinality = partial;
                for bin in 0..complete_bins_below {
                    cardinality += self.bin_height(bin) as f32;
                }

                // Equal-height histograms share one count per bin whose last
                // bin may actually be smaller, so cap at the real total.
                CardinalityEstimate { cardinality: cardinality.min(total), is_exact }
            }
            PredicateCondition::LessThanEquals => {
                self.estimate_checked(PredicateCondition::LessThan, &self.domain().next_value(value), None)
            }
            PredicateCondition::GreaterThanEquals => {
                let below = self.estimate_checked(PredicateCondition::LessThan, value, None);
                CardinalityEstimate {
                    cardinality: total - below.cardinality,
                    is_exact: below.is_exact,
                }
            }
            PredicateCondition::GreaterThan => {
                let below = self.estimate_checked(PredicateCondition::LessThanEquals, value, None);
                CardinalityEstimate {
                    cardinality: total - below.cardinality,
                    is_exact: below.is_exact,
                }
            }
            PredicateCondition::Between => {
                let value2 = value2.expect("BETWEEN needs a second value");
                if value2 < value {
                    return CardinalityEstimate::exact(0.0);
                }
                let below_upper =
                    self.estimate_checked(PredicateCondition::LessThanEquals, value2, None);
                let below_lower = self.estimate_checked(PredicateCondition::LessThan, value, None);
                CardinalityEstimate {
                    cardinality: below_upper.cardinality - below_lower.cardinality,
                    is_exact: below_upper.is_exact && below_lower.is_exact,
                }
            }
            _ => CardinalityEstimate::inexact(total),
        }
    }

    #[doc(hidden)]
    fn estimate_like(&self, bounds: LikePatternBounds<D::Value>, pattern: &str) -> CardinalityEstimate {
        let total = self.total_count() as f32;
        if let LikePatternBounds::Exact(value) = bounds {
            return self.estimate_checked(PredicateCondition::Equals, &value, None);
        }
        // SingleChar wildcards are not modelled.
        if pattern.contains('_') {
            return CardinalityEstimate::inexact(total);
        }
        if pattern == "%" {
            return CardinalityEstimate::exact(total);
        }

        let any_chars_count = pattern.bytes().filter(|b| *b == b'%').count();
        match bounds {
            LikePatternBounds::Prefix { lower, upper, at_domain_max } => {
                /*
                    Estimate the simple prefix range [q, q+) and assume a
                    uniform character distribution for every literal character
                    after the first wildcard ('foo%bar' divides the 'foo%'
                    estimate by alphabet^3).
                */
                let prefix_len = pattern.find('%').expect("prefix bounds imply a wildcard");
                let additional_characters = pattern.len() - prefix_len - any_chars_count;

                let below_upper = if at_domain_max {
                    total
                } else {
                    self.estimate_checked(PredicateCondition::LessThan, &upper, None).cardinality
                };
                let below_lower =
                    self.estimate_checked(PredicateCondition::LessThan, &lower, None).cardinality;

                CardinalityEstimate::inexact(
                    (below_upper - below_lower)
                        / self.domain().fixed_character_divisor(additional_characters),
                )
            }
            // Suffix or contains search: the prefix arithmetic cannot help,
            // assume uniform distribution over the fixed characters.
            _ => {
                let fixed_characters = pattern.len() - any_chars_count;
                CardinalityEstimate::inexact(
                    total / self.domain().fixed_character_divisor(fixed_characters),
                )
            }
        }
    }

    #[doc(hidden)]
    fn estimate_not_like(
        &self,
        bounds: LikePatternBounds<D::Value>,
        pattern: &str,
    ) -> CardinalityEstimate {
        let total = self.total_count() as f32;
        if let LikePatternBounds::Exact(value) = bounds {
            return self.estimate_checked(PredicateCondition::NotEquals, &value, None);
        }
        if pattern.contains('_') {
            return CardinalityEstimate::inexact(total);
        }
        let like = if self.prune_like(bounds.clone()) {
            CardinalityEstimate::exact(0.0)
        } else {
            self.estimate_like(bounds, pattern)
        };
        CardinalityEstimate {
            cardinality: total - like.cardinality,
            is_exact: like.is_exact,
        }
    }

    fn estimate_selectivity(
        &self,
        condition: PredicateCondition,
        value: &Value,
        value2: Option<&Value>,
    ) -> Result<CardinalityEstimate, StatisticsError> {
        let estimate = self.estimate_cardinality(condition, value, value2)?;
        Ok(CardinalityEstimate {
            cardinality: estimate.cardinality / self.total_count() as f32,
            is_exact: estimate.is_exact,
        })
    }

    /// Construct the histogram of exactly the rows matching the predicate,
    /// scaling the affected bins proportionally. Slicing with a predicate
    /// that pruning proves empty is a caller bug and panics.
    fn slice_with_predicate(
        &self,
        condition: PredicateCondition,
        value: &Value,
        value2: Option<&Value>,
    ) -> Result<GenericHistogram<D>, StatisticsError> {
        match condition {
            PredicateCondition::Like | PredicateCondition::NotLike => {
                return Err(StatisticsError::UnsupportedPredicate(
                    "(NOT) LIKE slicing is not supported",
                ))
            }
            PredicateCondition::In
            | PredicateCondition::IsNull
            | PredicateCondition::IsNotNull => {
                return Err(StatisticsError::UnsupportedPredicate(
                    "predicate is not supported by histogram slicing",
                ))
            }
            _ => {}
        }

        let typed = self.domain().value_from(value)?;
        let typed2 = match value2 {
            Some(value2) => Some(self.domain().value_from(value2)?),
            None => None,
        };
        assert!(
            !self.prune_typed(condition, &typed, typed2.as_ref()),
            "slicing with a predicate that was proven to match nothing"
        );

        let mut minima: Vec<D::Value> = Vec::new();
        let mut maxima: Vec<D::Value> = Vec::new();
        let mut heights: Vec<u64> = Vec::new();
        let mut distinct_counts: Vec<u64> = Vec::new();

        match condition {
            PredicateCondition::Equals => {
                let equals = self.estimate_checked(PredicateCondition::Equals, &typed, None);
                minima.push(typed.clone());
                maxima.push(typed);
                heights.push(equals.cardinality.ceil() as u64);
                distinct_counts.push(1);
            }

            PredicateCondition::NotEquals => {
                let value_bin = self.bin_for_value(&typed);
                for bin in 0..self.bin_count() {
                    if Some(bin) == value_bin {
                        let distinct = self.bin_distinct_count(bin);
                        // Do not create an empty bin.
                        if distinct == 1 {
                            continue;
                        }
                        let equals =
                            self.estimate_checked(PredicateCondition::Equals, &typed, None);
                        minima.push(self.bin_minimum(bin));
                        maxima.push(self.bin_maximum(bin));
                        heights.push(self.bin_height(bin) - equals.cardinality.ceil() as u64);
                        distinct_counts.push(distinct - 1);
                    } else {
                        minima.push(self.bin_minimum(bin));
                        maxima.push(self.bin_maximum(bin));
                        heights.push(self.bin_height(bin));
                        distinct_counts.push(self.bin_distinct_count(bin));
                    }
                }
            }

            PredicateCondition::LessThan | PredicateCondition::LessThanEquals => {
                let sliced_bin_count = match self.bin_for_value(&typed) {
                    None => match self.next_bin_for_value(&typed) {
                        // Value above the maximum, the whole histogram stays.
                        None => self.bin_count(),
                        Some(next) => next,
                    },
                    // LessThan at a lower bin edge excludes that bin.
                    Some(bin)
                        if condition == PredicateCondition::LessThan
                            && typed == self.bin_minimum(bin) =>
                    {
                        bin
                    }
                    Some(bin) => bin + 1,
                };
                assert!(sliced_bin_count > 0, "caught by pruning");

                for bin in 0..sliced_bin_count {
                    minima.push(self.bin_minimum(bin));
                    maxima.push(self.bin_maximum(bin));
                    heights.push(self.bin_height(bin));
                    distinct_counts.push(self.bin_distinct_count(bin));
                }

                // Scale the last bin if the value cuts into it.
                let last = sliced_bin_count - 1;
                if typed < self.bin_maximum(last) {
                    let bound = if condition == PredicateCondition::LessThan {
                        typed.clone()
                    } else {
                        self.domain().next_value(&typed)
                    };
                    let share = self.share_of_bin_below(last, &bound);
                    maxima[last] = typed;
                    heights[last] = (self.bin_height(last) as f32 * share).ceil() as u64;
                    distinct_counts[last] =
                        (self.bin_distinct_count(last) as f32 * share).ceil() as u64;
                }
            }

            PredicateCondition::GreaterThan | PredicateCondition::GreaterThanEquals => {
                let bin_count = self.bin_count();
                let sliced_bin_count = match self.bin_for_value(&typed) {
                    None => match self.next_bin_for_value(&typed) {
                        None => 0,
                        // Value below the minimum, the whole histogram stays.
                        Some(0) => bin_count,
                        Some(next) => bin_count - next,
                    },
                    // GreaterThan at an upper bin edge excludes that bin.
                    Some(bin)
                        if condition == PredicateCondition::GreaterThan
                            && typed == self.bin_maximum(bin) =>
                    {
                        bin_count - bin - 1
                    }
                    Some(bin) => bin_count - bin,
                };
                assert!(sliced_bin_count > 0, "caught by pruning");

                let first = bin_count - sliced_bin_count;
                for bin in first..bin_count {
                    minima.push(self.bin_minimum(bin));
                    maxima.push(self.bin_maximum(bin));
                    heights.push(self.bin_height(bin));
                    distinct_counts.push(self.bin_distinct_count(bin));
                }

                // Scale the first bin if the value cuts into it.
                if typed > self.bin_minimum(first) {
                    let share = 1.0 - self.share_of_bin_below(first, &typed);
                    minima[0] = if condition == PredicateCondition::GreaterThan {
                        self.domain().next_value(&typed)
                    } else {
                        typed
                    };
                    heights[0] = (self.bin_height(first) as f32 * share).ceil() as u64;
                    distinct_counts[0] =
                        (self.bin_distinct_count(first) as f32 * share).ceil() as u64;
                }
            }

            PredicateCondition::Between => {
                let value2 = value2.expect("BETWEEN needs a second value");
                return self
                    .slice_with_predicate(PredicateCondition::GreaterThanEquals, value, None)?
                    .slice_with_predicate(PredicateCondition::LessThanEquals, value2, None);
            }

            _ => unreachable!(),
        }

        Ok(GenericHistogram::new(
            self.domain().clone(),
            minima,
            maxima,
            heights,
            distinct_counts,
        ))
    }
}

/// Histogram with explicitly stored bins, the output of slicing.
pub struct GenericHistogram<D: HistogramDomain> {
    domain: D,
    bin_minima: Vec<D::Value>,
    bin_maxima: Vec<D::Value>,
    bin_heights: Vec<u64>,
    bin_distinct_counts: Vec<u64>,
    total_count: u64,
    total_distinct_count: u64,
}

impl<D: HistogramDomain> GenericHistogram<D> {
    pub fn new(
        domain: D,
        bin_minima: Vec<D::Value>,
        bin_maxima: Vec<D::Value>,
        bin_heights: Vec<u64>,
        bin_distinct_counts: Vec<u64>,
    ) -> GenericHistogram<D> {
        assert!(!bin_minima.is_empty(), "histogram needs at least one bin");
        assert!(
            bin_minima.len() == bin_maxima.len()
                && bin_minima.len() == bin_heights.len()
                && bin_minima.len() == bin_distinct_counts.len()
        );
        for bin in 0..bin_minima.len() {
            debug_assert!(bin_minima[bin] <= bin_maxima[bin]);
            debug_assert!(bin_heights[bin] >= bin_distinct_counts[bin]);
            if bin > 0 {
                debug_assert!(
                    bin_maxima[bin - 1] < bin_minima[bin],
                    "bins must be disjoint and ordered"
                );
            }
        }
        let total_count = bin_heights.iter().sum();
        let total_distinct_count = bin_distinct_counts.iter().sum();
        GenericHistogram {
            domain,
            bin_minima,
            bin_maxima,
            bin_heights,
            bin_distinct_counts,
            total_count,
            total_distinct_count,
        }
    }
}

impl<D: HistogramDomain> Histogram<D> for GenericHistogram<D> {
    fn domain(&self) -> &D {
        &self.domain
    }

    fn histogram_name(&self) -> &'static str {
        "GenericHistogram"
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
