//! Row multiplication for array-of-record fields.
//!
//! One expandable field is chosen per pass: the first retained sequence in
//! the row's stored field order. Each of its elements is flattened under the
//! field's name and merged over a copy of the remaining fields, yielding one
//! output row per element. Other retained sequences in the same row are NOT
//! cross-joined against the chosen one; they are carried through as opaque
//! JSON text. Elements whose own fields contain further retained sequences
//! re-enter the worklist, so nesting expands one field at a time until every
//! row is flat.
//!
//! The invariant this buys: a record with several independent repeating
//! groups never multiplies into their Cartesian product.

use std::collections::VecDeque;

use super::flatten::flatten_at;
use super::{format, Field, FlatRow, PartialRow, Value};

/// Expand one partially flattened row into fully flat rows.
pub fn expand(row: PartialRow) -> Expansion {
    Expansion {
        worklist: VecDeque::from([row]),
    }
}

/// Lazy, finite, single-pass iterator over the expansion of one row.
pub struct Expansion {
    worklist: VecDeque<PartialRow>,
}

impl Iterator for Expansion {
    type Item = FlatRow;

    fn next(&mut self) -> Option<FlatRow> {
        while let Some(row) = self.worklist.pop_front() {
            match split(row) {
                Split::Flat(flat) => return Some(flat),
                Split::Expandable {
                    base,
                    name,
                    elements,
                } => {
                    for element in elements {
                        let mut merged = base.clone();
                        for (path, field) in flatten_at(element, format!("{name}_")) {
                            merged.insert(path, field);
                        }
                        self.worklist.push_back(merged);
                    }
                }
            }
        }
        None
    }
}

enum Split {
    Flat(FlatRow),
    Expandable {
        base: PartialRow,
        name: String,
        elements: Vec<Value>,
    },
}

/// Pull out the first retained sequence; every other retained sequence in
/// the row collapses to opaque text in the base.
fn split(row: PartialRow) -> Split {
    let mut chosen: Option<(String, Vec<Value>)> = None;
    let mut base = PartialRow::with_capacity(row.len());

    for (name, field) in row {
        match field {
            Field::Nested(elements) if chosen.is_none() => {
                chosen = Some((name, elements));
            }
            Field::Nested(elements) => {
                base.insert(name, Field::Text(format::sequence_text(&elements)));
            }
            text => {
                base.insert(name, text);
            }
        }
    }

    match chosen {
        Some((name, elements)) => Split::Expandable {
            base,
            name,
            elements,
        },
        None => Split::Flat(base.into_iter().map(|(k, v)| (k, v.into_text())).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::super::flatten::flatten;
    use super::*;

    fn rows(input: &str) -> Vec<FlatRow> {
        let record: Value = serde_json::from_str(input).unwrap();
        expand(flatten(record)).collect()
    }

    fn pairs(row: &FlatRow) -> Vec<(&str, &str)> {
        row.iter().map(|(k, v)| (k.as_str(), v.as_str())).collect()
    }

    #[test]
    fn test_row_without_arrays_passes_through_unchanged() {
        let out = rows(r#"{"id": 1, "name": "ada"}"#);
        assert_eq!(out.len(), 1);
        assert_eq!(pairs(&out[0]), [("id", "1"), ("name", "ada")]);
    }

    #[test]
    fn test_scalar_array_stays_opaque() {
        let out = rows(r#"{"id": 1, "tags": ["a", "b"]}"#);
        assert_eq!(out.len(), 1);
        assert_eq!(pairs(&out[0]), [("id", "1"), ("tags", r#"["a","b"]"#)]);
    }

    #[test]
    fn test_single_array_yields_one_row_per_element() {
        let out = rows(r#"{"id": 1, "items": [{"x": 10}, {"x": 20}]}"#);
        assert_eq!(out.len(), 2);
        assert_eq!(pairs(&out[0]), [("id", "1"), ("items_x", "10")]);
        assert_eq!(pairs(&out[1]), [("id", "1"), ("items_x", "20")]);
    }

    #[test]
    fn test_base_fields_are_shared_across_elements() {
        let out = rows(r#"{"a": 1, "items": [{"x": 1}, {"x": 2}, {"x": 3}], "z": 9}"#);
        assert_eq!(out.len(), 3);
        for row in &out {
            assert_eq!(row["a"], "1");
            assert_eq!(row["z"], "9");
        }
    }

    #[test]
    fn test_two_arrays_do_not_cross_join() {
        let out = rows(
            r#"{"id": 1,
                "items": [{"x": 1}, {"x": 2}],
                "notes": [{"n": "a"}, {"n": "b"}, {"n": "c"}]}"#,
        );
        // First array in field order expands; the other rides along opaquely.
        assert_eq!(out.len(), 2);
        for row in &out {
            assert_eq!(row["notes"], r#"[{"n":"a"},{"n":"b"},{"n":"c"}]"#);
        }
        assert_eq!(out[0]["items_x"], "1");
        assert_eq!(out[1]["items_x"], "2");
    }

    #[test]
    fn test_first_array_in_stored_order_is_chosen() {
        let out = rows(r#"{"b": [{"v": 1}], "a": [{"v": 2}]}"#);
        assert_eq!(out.len(), 1);
        assert_eq!(pairs(&out[0]), [("a", r#"[{"v":2}]"#), ("b_v", "1")]);
    }

    #[test]
    fn test_nested_arrays_inside_elements_expand_recursively() {
        let out = rows(
            r#"{"id": 1,
                "items": [
                    {"x": 1, "subs": [{"s": 9}, {"s": 8}]},
                    {"x": 2}
                ]}"#,
        );
        // Worklist order: the sub-free element flushes before the requeued
        // sub-expansions of the first element.
        assert_eq!(out.len(), 3);
        assert_eq!(pairs(&out[0]), [("id", "1"), ("items_x", "2")]);
        assert_eq!(
            pairs(&out[1]),
            [("id", "1"), ("items_x", "1"), ("items_subs_s", "9")]
        );
        assert_eq!(
            pairs(&out[2]),
            [("id", "1"), ("items_x", "1"), ("items_subs_s", "8")]
        );
    }

    #[test]
    fn test_element_field_overwrites_base_in_place() {
        let record: Value = serde_json::from_str(
            r#"{"items_x": "base", "items": [{"x": 10}], "tail": 1}"#,
        )
        .unwrap();
        let out: Vec<FlatRow> = expand(flatten(record)).collect();
        assert_eq!(out.len(), 1);
        // The colliding path keeps its original position but takes the
        // element's value.
        assert_eq!(pairs(&out[0]), [("items_x", "10"), ("tail", "1")]);
    }

    #[test]
    fn test_non_mapping_elements_land_on_the_array_name() {
        let out = rows(r#"{"id": 1, "items": [{"x": 1}, 5]}"#);
        assert_eq!(out.len(), 2);
        assert_eq!(pairs(&out[0]), [("id", "1"), ("items_x", "1")]);
        assert_eq!(pairs(&out[1]), [("id", "1"), ("items", "5")]);
    }

    #[test]
    fn test_expansion_is_single_pass_and_finite() {
        let mut expansion = expand(flatten(
            serde_json::from_str(r#"{"items": [{"x": 1}, {"x": 2}]}"#).unwrap(),
        ));
        assert!(expansion.next().is_some());
        assert!(expansion.next().is_some());
        assert!(expansion.next().is_none());
        assert!(expansion.next().is_none());
    }
}
