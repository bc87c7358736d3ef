//! `$sort` and the sort step of window and fill stages
//!
//! Stable, multi-key, total order over values. A missing field sorts as null.

use std::cmp::Ordering;

use crate::planner::{SortDirection, SortSpec};
use crate::value::{compare_values, Document, Value};

/// Sorts documents
pub struct ResultSorter;

impl ResultSorter {
    /// Sorts documents according to the sort specification.
    ///
    /// Sort is stable: documents with equal keys keep their input order.
    pub fn sort(documents: &mut [Document], spec: &SortSpec) {
        if spec.keys.is_empty() {
            return;
        }
        // Resolve keys once instead of per comparison
        let mut keyed: Vec<(Vec<Value>, Document)> = documents
            .iter_mut()
            .map(|slot| {
                let doc = std::mem::take(slot);
                (Self::sort_keys(&doc, spec), doc)
            })
            .collect();
        keyed.sort_by(|(a, _), (b, _)| Self::compare_keys(a, b, spec));
        for (slot, (_, doc)) in documents.iter_mut().zip(keyed) {
            *slot = doc;
        }
    }

    pub fn sort_keys(doc: &Document, spec: &SortSpec) -> Vec<Value> {
        spec.keys.iter().map(|k| doc.lookup(&k.path)).collect()
    }

    /// Compares precomputed key tuples under the spec's directions
    pub fn compare_keys(a: &[Value], b: &[Value], spec: &SortSpec) -> Ordering {
        for ((av, bv), key) in a.iter().zip(b).zip(&spec.keys) {
            let ordering = compare_values(av, bv);
            let ordering = match key.direction {
                SortDirection::Asc => ordering,
                SortDirection::Desc => ordering.reverse(),
            };
            if ordering != Ordering::Equal {
                return ordering;
            }
        }
        Ordering::Equal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::planner::SortKey;
    use serde_json::json;

    fn docs(json: serde_json::Value) -> Vec<Document> {
        json.as_array()
            .unwrap()
            .iter()
            .map(|d| Document::from_json(d.clone()).unwrap())
            .collect()
    }

    fn spec(keys: &[(&str, SortDirection)]) -> SortSpec {
        SortSpec {
            keys: keys
                .iter()
                .map(|(p, d)| SortKey {
                    path: p.to_string(),
                    direction: *d,
                })
                .collect(),
        }
    }

    fn field(documents: &[Document], name: &str) -> Vec<Value> {
        documents.iter().map(|d| d.lookup(name)).collect()
    }

    #[test]
    fn test_sort_ascending_and_descending() {
        let mut documents = docs(json!([{"t": 3}, {"t": 1}, {"t": 2}]));
        ResultSorter::sort(&mut documents, &spec(&[("t", SortDirection::Asc)]));
        assert_eq!(field(&documents, "t"), vec![Value::from(1.0), Value::from(2.0), Value::from(3.0)]);

        ResultSorter::sort(&mut documents, &spec(&[("t", SortDirection::Desc)]));
        assert_eq!(field(&documents, "t"), vec![Value::from(3.0), Value::from(2.0), Value::from(1.0)]);
    }

    #[test]
    fn test_sort_is_stable() {
        let mut documents = docs(json!([
            {"loc": "B", "n": 1},
            {"loc": "A", "n": 2},
            {"loc": "B", "n": 3},
            {"loc": "A", "n": 4}
        ]));
        ResultSorter::sort(&mut documents, &spec(&[("loc", SortDirection::Asc)]));
        assert_eq!(
            field(&documents, "n"),
            vec![Value::from(2.0), Value::from(4.0), Value::from(1.0), Value::from(3.0)]
        );
    }

    #[test]
    fn test_multi_key_and_missing() {
        let mut documents = docs(json!([
            {"loc": "A", "t": 5},
            {"loc": "A"},
            {"loc": "B", "t": 1},
            {"loc": "A", "t": 7}
        ]));
        ResultSorter::sort(
            &mut documents,
            &spec(&[("loc", SortDirection::Asc), ("t", SortDirection::Desc)]),
        );
        assert_eq!(
            field(&documents, "t"),
            vec![Value::from(7.0), Value::from(5.0), Value::Null, Value::from(1.0)]
        );
    }

    #[test]
    fn test_mixed_types_follow_type_order() {
        let mut documents = docs(json!([{"v": "x"}, {"v": 1}, {"v": null}, {"v": true}]));
        ResultSorter::sort(&mut documents, &spec(&[("v", SortDirection::Asc)]));
        assert_eq!(
            field(&documents, "v"),
            vec![Value::Null, Value::from(1.0), Value::from("x"), Value::from(true)]
        );
    }
}
