use std::sync::Arc;

use crate::storage::chunk::Chunk;
use crate::storage::segment::{Segment, ValueSegment};
use crate::types::{DataType, Value};

/// Immutable dictionary encoding of a finalized value segment: a sorted
/// dictionary of the distinct non-null values plus one code per row. The
/// null code is one past the dictionary.
pub struct DictionarySegment {
    data_type: DataType,
    dictionary: Vec<Value>,
    attribute_vector: Vec<u32>,
}

impl DictionarySegment {
    pub fn from_value_segment(segment: &ValueSegment) -> DictionarySegment {
        let mut dictionary: Vec<Value> = Vec::new();
        for offset in 0..segment.len() {
            if let Some(value) = segment.get(offset) {
                dictionary.push(value);
            }
        }
        dictionary.sort_by(|a, b| a.total_cmp(b));
        dictionary.dedup_by(|a, b| a == b);

        let null_code = dictionary.len() as u32;
        let mut attribute_vector = Vec::with_capacity(segment.len());
        for offset in 0..segment.len() {
            match segment.get(offset) {
                Some(value) => {
                    let code = dictionary
                        .binary_search_by(|probe| probe.total_cmp(&value))
                        .expect("dictionary was built from this segment");
                    attribute_vector.push(code as u32);
                }
                None => attribute_vector.push(null_code),
            }
        }

        DictionarySegment { data_type: segment.data_type(), dictionary, attribute_vector }
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn len(&self) -> usize {
        self.attribute_vector.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attribute_vector.is_empty()
    }

    pub fn unique_values_count(&self) -> usize {
        self.dictionary.len()
    }

    pub fn get(&self, offset: usize) -> Option<Value> {
        let code = self.attribute_vector[offset] as usize;
        if code == self.dictionary.len() {
            None
        } else {
            Some(self.dictionary[code].clone())
        }
    }
}

/// Dictionary-encode every still unencoded segment of a finalized chunk.
/// Safe to call repeatedly.
pub fn encode_chunk(chunk: &Chunk) {
    assert!(chunk.is_finalized(), "only finalized chunks are encoded");
    for column_id in 0..chunk.column_count() {
        let segment = chunk.get_segment(column_id as u32);
        if let Some(value_segment) = segment.as_value_segment() {
            let encoded = DictionarySegment::from_value_segment(value_segment);
            chunk.replace_segment(column_id as u32, Arc::new(Segment::Dictionary(encoded)));
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_through_encoding() {
        let segment = ValueSegment::from_values(
            DataType::Text,
            vec![
                Some(Value::Text("cherry".to_string())),
                Some(Value::Text("apple".to_string())),
                None,
                Some(Value::Text("apple".to_string())),
                Some(Value::Text("banana".to_string())),
            ],
        );
        let encoded = DictionarySegment::from_value_segment(&segment);

        assert_eq!(encoded.len(), 5);
        assert_eq!(encoded.unique_values_count(), 3);
        for offset in 0..segment.len() {
            assert_eq!(encoded.get(offset), segment.get(offset), "row {}", offset);
        }
    }

    #[test]
    fn int_dictionary_is_sorted() {
        let segment = ValueSegment::from_values(
            DataType::Int,
            vec![Some(Value::Int(5)), Some(Value::Int(-1)), Some(Value::Int(5)), None],
        );
        let encoded = DictionarySegment::from_value_segment(&segment);
        assert_eq!(encoded.unique_values_count(), 2);
        assert_eq!(encoded.get(0), Some(Value::Int(5)));
        assert_eq!(encoded.get(1), Some(Value::Int(-1)));
        assert_eq!(encoded.get(3), None);
    }
}
