//! Hierarchical record model shared by the flattener, expander, and CSV writer.
//!
//! A [`Value`] is one node of an input record: a mapping (insertion-ordered),
//! a sequence, or a scalar. JSON sources produce the JSON subset of variants;
//! typed tabular sources additionally carry timestamps, time-of-day encodings,
//! and raw bytes (see `format` for how each renders).

pub mod expand;
pub mod flatten;
pub mod format;

use indexmap::IndexMap;
use serde::de::{MapAccess, SeqAccess, Visitor};
use serde::ser::{Serialize, Serializer};
use serde::{Deserialize, Deserializer};

/// One node of a hierarchical record.
///
/// Mapping keys are unique and keep their insertion order, which is what
/// ultimately determines output column order.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    /// Raw byte string from a typed tabular source; rendered as lossy UTF-8.
    Bytes(Vec<u8>),
    /// Calendar timestamp from a typed tabular source.
    Timestamp(chrono::NaiveDateTime),
    /// Seconds since midnight, by source-format convention.
    TimeOfDay(f64),
    Sequence(Vec<Value>),
    Mapping(IndexMap<String, Value>),
}

impl Value {
    /// True when this node is a mapping.
    pub fn is_mapping(&self) -> bool {
        matches!(self, Value::Mapping(_))
    }

    /// True when this node is a sequence.
    pub fn is_sequence(&self) -> bool {
        matches!(self, Value::Sequence(_))
    }
}

/// One field of a partially flattened row: either finished text, or an
/// array-of-record value retained for the expander.
#[derive(Debug, Clone, PartialEq)]
pub enum Field {
    Text(String),
    Nested(Vec<Value>),
}

impl Field {
    /// Finished textual form of this field; a still-nested sequence renders
    /// opaquely, the same as a sequence the flattener classified as scalar.
    pub fn into_text(self) -> String {
        match self {
            Field::Text(text) => text,
            Field::Nested(elements) => format::sequence_text(&elements),
        }
    }
}

/// A flattened row that may still hold array-of-record fields.
pub type PartialRow = IndexMap<String, Field>;

/// A fully flat row: field path to scalar text, in first-seen order.
pub type FlatRow = IndexMap<String, String>;

impl Serialize for Value {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Value::Null => serializer.serialize_unit(),
            Value::Bool(value) => serializer.serialize_bool(*value),
            Value::Int(value) => serializer.serialize_i64(*value),
            // serde_json renders non-finite floats as null.
            Value::Float(value) => serializer.serialize_f64(*value),
            Value::Text(value) => serializer.serialize_str(value),
            Value::Bytes(value) => serializer.serialize_str(&String::from_utf8_lossy(value)),
            Value::Timestamp(value) => serializer.serialize_str(&format::timestamp_text(*value)),
            Value::TimeOfDay(value) => serializer.serialize_str(&format::time_of_day_text(*value)),
            Value::Sequence(items) => serializer.collect_seq(items),
            Value::Mapping(fields) => serializer.collect_map(fields),
        }
    }
}

impl<'de> Deserialize<'de> for Value {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ValueVisitor)
    }
}

struct ValueVisitor;

impl<'de> Visitor<'de> for ValueVisitor {
    type Value = Value;

    fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.write_str("a JSON value")
    }

    fn visit_unit<E>(self) -> Result<Value, E> {
        Ok(Value::Null)
    }

    fn visit_bool<E>(self, value: bool) -> Result<Value, E> {
        Ok(Value::Bool(value))
    }

    fn visit_i64<E>(self, value: i64) -> Result<Value, E> {
        Ok(Value::Int(value))
    }

    fn visit_u64<E>(self, value: u64) -> Result<Value, E> {
        // Beyond i64 range the value folds to a float.
        match i64::try_from(value) {
            Ok(value) => Ok(Value::Int(value)),
            Err(_) => Ok(Value::Float(value as f64)),
        }
    }

    fn visit_f64<E>(self, value: f64) -> Result<Value, E> {
        Ok(Value::Float(value))
    }

    fn visit_str<E: serde::de::Error>(self, value: &str) -> Result<Value, E> {
        Ok(Value::Text(value.to_owned()))
    }

    fn visit_string<E>(self, value: String) -> Result<Value, E> {
        Ok(Value::Text(value))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Value, A::Error> {
        let mut items = Vec::with_capacity(seq.size_hint().unwrap_or(0));
        while let Some(item) = seq.next_element()? {
            items.push(item);
        }
        Ok(Value::Sequence(items))
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Value, A::Error> {
        let mut fields = IndexMap::with_capacity(map.size_hint().unwrap_or(0));
        while let Some((key, value)) = map.next_entry::<String, Value>()? {
            fields.insert(key, value);
        }
        Ok(Value::Mapping(fields))
    }
}
