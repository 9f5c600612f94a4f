use bitvec::vec::BitVec;
use parking_lot::RwLock;

use crate::storage::dictionary::DictionarySegment;
use crate::types::{DataType, Value};

/// Typed columnar storage. Rows can be appended until the owning chunk is
/// finalized; reads go through an offset based accessor. Nulls are tracked
/// in a separate bitmap, the data vector carries a default at null slots.
pub enum ColumnData {
    Int(Vec<i64>),
    Float(Vec<f64>),
    Text(Vec<String>),
}

impl ColumnData {
    fn new(data_type: DataType) -> ColumnData {
        match data_type {
            DataType::Int => ColumnData::Int(Vec::new()),
            DataType::Float => ColumnData::Float(Vec::new()),
            DataType::Text => ColumnData::Text(Vec::new()),
        }
    }

    fn len(&self) -> usize {
        match self {
            ColumnData::Int(values) => values.len(),
            ColumnData::Float(values) => values.len(),
            ColumnData::Text(values) => values.len(),
        }
    }

    fn push(&mut self, value: Option<&Value>) {
        match (self, value) {
            (ColumnData::Int(values), Some(Value::Int(v))) => values.push(*v),
            (ColumnData::Int(values), None) => values.push(0),
            (ColumnData::Float(values), Some(Value::Float(v))) => values.push(*v),
            (ColumnData::Float(values), None) => values.push(0.0),
            (ColumnData::Text(values), Some(Value::Text(v))) => values.push(v.clone()),
            (ColumnData::Text(values), None) => values.push(String::new()),
            _ => panic!("value type does not match the segment type"),
        }
    }

    fn get(&self, offset: usize) -> Value {
        match self {
            ColumnData::Int(values) => Value::Int(values[offset]),
            ColumnData::Float(values) => Value::Float(values[offset]),
            ColumnData::Text(values) => Value::Text(values[offset].clone()),
        }
    }
}

struct SegmentData {
    data: ColumnData,
    nulls: BitVec,
}

pub struct ValueSegment {
    data_type: DataType,
    inner: RwLock<SegmentData>,
}

impl ValueSegment {
    pub fn new(data_type: DataType) -> ValueSegment {
        ValueSegment {
            data_type,
            inner: RwLock::new(SegmentData { data: ColumnData::new(data_type), nulls: BitVec::new() }),
        }
    }

    pub fn from_values<I: IntoIterator<Item = Option<Value>>>(
        data_type: DataType,
        values: I,
    ) -> ValueSegment {
        let segment = ValueSegment::new(data_type);
        for value in values {
            segment.append(value.as_ref());
        }
        segment
    }

    pub fn data_type(&self) -> DataType {
        self.data_type
    }

    pub fn len(&self) -> usize {
        self.inner.read().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_null(&self, offset: usize) -> bool {
        self.inner.read().nulls[offset]
    }

    pub fn get(&self, offset: usize) -> Option<Value> {
        let inner = self.inner.read();
        if inner.nulls[offset] {
            None
        } else {
            Some(inner.data.get(offset))
        }
    }

    pub fn append(&self, value: Option<&Value>) {
        if let Some(value) = value {
            assert!(
                value.data_type() == self.data_type,
                "cannot append a {} value to a {} segment",
                value.data_type(),
                self.data_type
            );
        }
        let mut inner = self.inner.write();
        inner.data.push(value);
        inner.nulls.push(value.is_none());
    }
}

pub enum Segment {
    Value(ValueSegment),
    Dictionary(DictionarySegment),
}

impl Segment {
    pub fn data_type(&self) -> DataType {
        match self {
            Segment::Value(segment) => segment.data_type(),
            Segment::Dictionary(segment) => segment.data_type(),
        }
    }

    pub fn len(&self) -> usize {
        match self {
            Segment::Value(segment) => segment.len(),
            Segment::Dictionary(segment) => segment.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn get(&self, offset: usize) -> Option<Value> {
        match self {
            Segment::Value(segment) => segment.get(offset),
            Segment::Dictionary(segment) => segment.get(offset),
        }
    }

    pub fn as_value_segment(&self) -> Option<&ValueSegment> {
        match self {
            Segment::Value(segment) => Some(segment),
            Segment::Dictionary(_) => None,
        }
    }

    pub fn is_encoded(&self) -> bool {
        matches!(self, Segment::Dictionary(_))
    }
}
