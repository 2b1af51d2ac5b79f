//! Canonical textual form for scalar values.
//!
//! Every scalar has a defined rendering; this module never fails. Nulls and
//! NaN floats render as empty cells, timestamps collapse to a date when the
//! time-of-day is zero, and seconds-since-midnight encodings render as
//! `HH:MM:SS`. Sequences that the flattener classified as scalar render as a
//! single opaque JSON text blob rather than expanding into columns.

use chrono::{NaiveDateTime, NaiveTime};

use super::Value;

/// Render one scalar as its canonical cell text.
pub fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(value) => value.to_string(),
        Value::Int(value) => value.to_string(),
        Value::Float(value) if value.is_nan() => String::new(),
        Value::Float(value) => value.to_string(),
        Value::Text(value) => value.clone(),
        Value::Bytes(value) => String::from_utf8_lossy(value).into_owned(),
        Value::Timestamp(value) => timestamp_text(*value),
        Value::TimeOfDay(value) => time_of_day_text(*value),
        Value::Sequence(items) => sequence_text(items),
        Value::Mapping(_) => opaque_text(value),
    }
}

/// `YYYY-MM-DD` when the time-of-day component is zero, otherwise
/// `YYYY-MM-DD HH:MM:SS`.
pub fn timestamp_text(value: NaiveDateTime) -> String {
    if value.time() == NaiveTime::MIN {
        value.format("%Y-%m-%d").to_string()
    } else {
        value.format("%Y-%m-%d %H:%M:%S").to_string()
    }
}

/// Seconds since midnight as zero-padded `HH:MM:SS`, rounded to the nearest
/// second before splitting into parts (so 86399.6 renders as `24:00:00`).
/// Values outside `[0, 86400)` fall back to plain numeric text.
pub fn time_of_day_text(value: f64) -> String {
    if !(0.0..86400.0).contains(&value) {
        return if value.is_nan() {
            String::new()
        } else {
            value.to_string()
        };
    }
    let total = value.round() as u32;
    format!("{:02}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}

/// One opaque JSON text blob for a sequence of scalars.
pub fn sequence_text(items: &[Value]) -> String {
    serde_json::to_string(items).expect("in-memory JSON serialization cannot fail")
}

fn opaque_text(value: &Value) -> String {
    serde_json::to_string(value).expect("in-memory JSON serialization cannot fail")
}
