//! Flattening of one hierarchical record into a single-level row.
//!
//! Nested mapping keys concatenate into `_`-joined paths. Scalars render
//! through `format`. Sequences are classified by their first element: a
//! sequence of mappings is retained whole for the expander; anything else
//! (including an empty sequence) becomes one opaque JSON text cell.

use super::{format, Field, PartialRow, Value};

/// Flatten one record. Array-of-record fields stay unexpanded inside the
/// returned row, pending [`expand`](super::expand::expand).
pub fn flatten(record: Value) -> PartialRow {
    flatten_at(record, String::new())
}

/// Flatten with every produced path prefixed; the expander uses this to
/// prefix an array element's fields with the array's own field name.
pub(crate) fn flatten_at(record: Value, prefix: String) -> PartialRow {
    let mut row = PartialRow::new();
    walk(record, prefix, &mut row);
    row
}

fn walk(value: Value, path: String, row: &mut PartialRow) {
    match value {
        Value::Mapping(fields) => {
            for (key, child) in fields {
                walk(child, format!("{path}{key}_"), row);
            }
        }
        Value::Sequence(items) => {
            let field = if items.first().is_some_and(Value::is_mapping) {
                Field::Nested(items)
            } else {
                Field::Text(format::sequence_text(&items))
            };
            row.insert(strip_separator(&path), field);
        }
        scalar => {
            row.insert(strip_separator(&path), Field::Text(format::scalar_text(&scalar)));
        }
    }
}

fn strip_separator(path: &str) -> String {
    path.strip_suffix('_').unwrap_or(path).to_owned()
}
