use std::collections::BTreeMap;
use std::error::Error;
use std::fmt::Display;
use std::sync::Arc;

use parking_lot::RwLock;

pub mod histogram;

use histogram::domain::{FloatDomain, HistogramDomain, IntDomain, TextDomain};
use histogram::{
    merge_value_distributions, value_distribution_from_segment, CardinalityEstimate,
    EqualDistinctCountHistogram, Histogram,
};

use crate::storage::table::Table;
use crate::types::{ColumnId, DataType, PredicateCondition, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum StatisticsError {
    /// A search value or column value uses characters outside the domain.
    UnsupportedCharacters { value: String },
    /// Bad supported-character range or prefix length.
    InvalidDomain(String),
    TypeMismatch { expected: DataType, found: DataType },
    /// Predicate shape histograms do not handle (LIKE on numerics, IS NULL
    /// or IN in slicing).
    UnsupportedPredicate(&'static str),
    EmptyColumn,
}

impl Display for StatisticsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StatisticsError::UnsupportedCharacters { value } => {
                write!(f, "value {:?} contains unsupported characters", value)
            }
            StatisticsError::InvalidDomain(reason) => write!(f, "invalid string domain: {}", reason),
            StatisticsError::TypeMismatch { expected, found } => {
                write!(f, "expected a {} search value, got {}", expected, found)
            }
            StatisticsError::UnsupportedPredicate(reason) => write!(f, "{}", reason),
            StatisticsError::EmptyColumn => {
                write!(f, "cannot build a histogram over an empty column")
            }
        }
    }
}

impl Error for StatisticsError {}

/// A column's histogram, type-erased over the value domain so the cache and
/// the clustering code can hold histograms of mixed columns.
pub enum ColumnHistogram {
    Int(Box<dyn Histogram<IntDomain>>),
    Float(Box<dyn Histogram<FloatDomain>>),
    Text(Box<dyn Histogram<TextDomain>>),
}

impl ColumnHistogram {
    pub fn data_type(&self) -> DataType {
        match self {
            ColumnHistogram::Int(_) => DataType::Int,
            ColumnHistogram::Float(_) => DataType::Float,
            ColumnHistogram::Text(_) => DataType::Text,
        }
    }

    pub fn bin_count(&self) -> usize {
        match self {
            ColumnHistogram::Int(histogram) => histogram.bin_count(),
            ColumnHistogram::Float(histogram) => histogram.bin_count(),
            ColumnHistogram::Text(histogram) => histogram.bin_count(),
        }
    }

    pub fn total_count(&self) -> u64 {
        match self {
            ColumnHistogram::Int(histogram) => histogram.total_count(),
            ColumnHistogram::Float(histogram) => histogram.total_count(),
            ColumnHistogram::Text(histogram) => histogram.total_count(),
        }
    }

    pub fn total_distinct_count(&self) -> u64 {
        match self {
            ColumnHistogram::Int(histogram) => histogram.total_distinct_count(),
            ColumnHistogram::Float(histogram) => histogram.total_distinct_count(),
            ColumnHistogram::Text(histogram) => histogram.total_distinct_count(),
        }
    }

    pub fn does_not_contain(
        &self,
        condition: PredicateCondition,
        value: &Value,
        value2: Option<&Value>,
    ) -> Result<bool, StatisticsError> {
        match self {
            ColumnHistogram::Int(histogram) => histogram.does_not_contain(condition, value, value2),
            ColumnHistogram::Float(histogram) => {
                histogram.does_not_contain(condition, value, value2)
            }
            ColumnHistogram::Text(histogram) => histogram.does_not_contain(condition, value, value2),
        }
    }

    pub fn estimate_cardinality(
        &self,
        condition: PredicateCondition,
        value: &Value,
        value2: Option<&Value>,
    ) -> Result<CardinalityEstimate, StatisticsError> {
        match self {
            ColumnHistogram::Int(histogram) => {
                histogram.estimate_cardinality(condition, value, value2)
            }
            ColumnHistogram::Float(histogram) => {
                histogram.estimate_cardinality(condition, value, value2)
            }
            ColumnHistogram::Text(histogram) => {
                histogram.estimate_cardinality(condition, value, value2)
            }
        }
    }

    pub fn description(&self) -> String {
        match self {
            ColumnHistogram::Int(histogram) => histogram.description(),
            ColumnHistogram::Float(histogram) => histogram.description(),
            ColumnHistogram::Text(histogram) => histogram.description(),
        }
    }
}

/// Build an equi-distinct-count histogram over every present chunk of a
/// column. Text columns use the lowercase default domain.
pub fn build_column_histogram(
    table: &Table,
    column_id: ColumnId,
    target_bins: usize,
) -> Result<ColumnHistogram, StatisticsError> {
    fn distribution_over_chunks<D: HistogramDomain>(
        table: &Table,
        column_id: ColumnId,
        domain: &D,
    ) -> Result<Vec<(D::Value, u64)>, StatisticsError> {
        let mut distributions = Vec::new();
        for chunk_id in 0..table.chunk_count() {
            let chunk = match table.get_chunk(chunk_id) {
                Some(chunk) => chunk,
                None => continue,
            };
            let segment = chunk.get_segment(column_id);
            match segment.as_value_segment() {
                Some(value_segment) => {
                    distributions.push(value_distribution_from_segment(value_segment, domain)?)
                }
                None => {
                    // Encoded segment, fall back to the row accessor.
                    let mut values = Vec::with_capacity(segment.len());
                    for offset in 0..segment.len() {
                        if let Some(value) = segment.get(offset) {
                            values.push(domain.value_from(&value)?);
                        }
                    }
                    distributions.push(histogram::value_distribution_from_values(values));
                }
            }
        }
        Ok(merge_value_distributions(distributions))
    }

    match table.column_data_type(column_id) {
        DataType::Int => {
            let distribution = distribution_over_chunks(table, column_id, &IntDomain)?;
            Ok(ColumnHistogram::Int(Box::new(
                EqualDistinctCountHistogram::from_distribution(distribution, target_bins, IntDomain)?,
            )))
        }
        DataType::Float => {
            let distribution = distribution_over_chunks(table, column_id, &FloatDomain)?;
            Ok(ColumnHistogram::Float(Box::new(
                EqualDistinctCountHistogram::from_distribution(
                    distribution,
                    target_bins,
                    FloatDomain,
                )?,
            )))
        }
        DataType::Text => {
            let domain = TextDomain::lowercase();
            let distribution = distribution_over_chunks(table, column_id, &domain)?;
            Ok(ColumnHistogram::Text(Box::new(
                EqualDistinctCountHistogram::from_distribution(distribution, target_bins, domain)?,
            )))
        }
    }
}

/// Per-engine histogram cache. Histograms are immutable once built; entries
/// are dropped wholesale when a table's data changes shape.
pub struct StatisticsCache {
    histogram_bins: usize,
    histograms: RwLock<BTreeMap<(String, ColumnId), Arc<ColumnHistogram>>>,
}

impl StatisticsCache {
    pub fn new(histogram_bins: usize) -> StatisticsCache {
        StatisticsCache { histogram_bins, histograms: RwLock::new(BTreeMap::new()) }
    }

    pub fn histogram(&self, table_name: &str, column_id: ColumnId) -> Option<Arc<ColumnHistogram>> {
        self.histograms.read().get(&(table_name.to_string(), column_id)).cloned()
    }

    pub fn insert(
        &self,
        table_name: &str,
        column_id: ColumnId,
        histogram: ColumnHistogram,
    ) -> Arc<ColumnHistogram> {
        let histogram = Arc::new(histogram);
        self.histograms
            .write()
            .insert((table_name.to_string(), column_id), histogram.clone());
        histogram
    }

    pub fn get_or_build(
        &self,
        table_name: &str,
        table: &Table,
        column_id: ColumnId,
    ) -> Result<Arc<ColumnHistogram>, StatisticsError> {
        if let Some(histogram) = self.histogram(table_name, column_id) {
            return Ok(histogram);
        }
        let histogram = build_column_histogram(table, column_id, self.histogram_bins)?;
        Ok(self.insert(table_name, column_id, histogram))
    }

    pub fn invalidate_table(&self, table_name: &str) {
        self.histograms.write().retain(|(name, _), _| name != table_name);
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::storage::chunk::Chunk;
    use crate::storage::mvcc::MvccData;
    use crate::storage::segment::{Segment, ValueSegment};
    use crate::storage::table::ColumnDefinition;

    fn int_table(chunks: &[&[i64]]) -> Table {
        let table = Table::new(vec![ColumnDefinition::new("a", DataType::Int, false)], 1024);
        for values in chunks {
            let segment = ValueSegment::from_values(
                DataType::Int,
                values.iter().map(|v| Some(Value::Int(*v))),
            );
            table.append_chunk(Arc::new(Chunk::from_segments(
                vec![Arc::new(Segment::Value(segment))],
                Some(Arc::new(MvccData::new(values.len(), 0))),
            )));
        }
        table
    }

    #[test]
    fn builds_over_all_chunks() {
        let table = int_table(&[&[1, 2, 3], &[3, 4, 5]]);
        let histogram = build_column_histogram(&table, 0, 2).unwrap();
        assert_eq!(histogram.total_count(), 6);
        assert_eq!(histogram.total_distinct_count(), 5);
    }

    #[test]
    fn cache_reuses_built_histograms() {
        let table = int_table(&[&[1, 2, 3]]);
        let cache = StatisticsCache::new(4);
        assert!(cache.histogram("t", 0).is_none());
        let first = cache.get_or_build("t", &table, 0).unwrap();
        let second = cache.get_or_build("t", &table, 0).unwrap();
        assert!(Arc::ptr_eq(&first, &second));

        cache.invalidate_table("t");
        assert!(cache.histogram("t", 0).is_none());
    }

    #[test]
    fn empty_table_yields_an_error() {
        let table = int_table(&[]);
        assert!(matches!(
            build_column_histogram(&table, 0, 2),
            Err(StatisticsError::EmptyColumn)
        ));
    }
}
