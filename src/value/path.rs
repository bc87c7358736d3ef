//! Dotted field paths
//!
//! `a.b.c` walks nested documents. When a segment lands on an array, the
//! remainder of the path is applied to every element that is a document
//! and the hits are collected into an array, so `events.location` over
//! `events: [{location: "A"}, {location: "B"}]` yields `["A", "B"]`.

use super::document::Document;
use super::value::Value;

/// Resolves `path` against `doc`. `None` means the path is missing.
pub fn get_path(doc: &Document, path: &str) -> Option<Value> {
    let segments: Vec<&str> = path.split('.').collect();
    resolve_in_document(doc, &segments)
}

/// Resolves `path` against an arbitrary value, such as a bound variable
pub fn get_value_path(value: &Value, path: &str) -> Option<Value> {
    let segments: Vec<&str> = path.split('.').collect();
    resolve_in_value(value, &segments)
}

fn resolve_in_document(doc: &Document, segments: &[&str]) -> Option<Value> {
    let (head, rest) = segments.split_first()?;
    let value = doc.get(head)?;
    if rest.is_empty() {
        return Some(value.clone());
    }
    resolve_in_value(value, rest)
}

fn resolve_in_value(value: &Value, segments: &[&str]) -> Option<Value> {
    match value {
        Value::Object(doc) => resolve_in_document(doc, segments),
        Value::Array(items) => {
            let hits: Vec<Value> = items
                .iter()
                .filter_map(|item| match item {
                    Value::Object(_) | Value::Array(_) => resolve_in_value(item, segments),
                    _ => None,
                })
                .collect();
            Some(Value::Array(hits))
        }
        _ => None,
    }
}

/// Sets `path` in `doc`, creating or overwriting intermediate documents
pub fn set_path(doc: &mut Document, path: &str, value: Value) {
    match path.split_once('.') {
        None => {
            doc.insert(path, value);
        }
        Some((head, rest)) => {
            let needs_object = !matches!(doc.get(head), Some(Value::Object(_)));
            if needs_object {
                doc.insert(head, Value::Object(Document::new()));
            }
            if let Some(Value::Object(child)) = doc.get_mut(head) {
                set_path(child, rest, value);
            }
        }
    }
}

/// Removes `path` from `doc`, returning the removed value
pub fn remove_path(doc: &mut Document, path: &str) -> Option<Value> {
    match path.split_once('.') {
        None => doc.remove(path),
        Some((head, rest)) => match doc.get_mut(head) {
            Some(Value::Object(child)) => remove_path(child, rest),
            Some(Value::Array(items)) => {
                let mut removed = Vec::new();
                for item in items.iter_mut() {
                    if let Value::Object(child) = item {
                        if let Some(v) = remove_path(child, rest) {
                            removed.push(v);
                        }
                    }
                }
                if removed.is_empty() {
                    None
                } else {
                    Some(Value::Array(removed))
                }
            }
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn doc(json: serde_json::Value) -> Document {
        Document::from_json(json).unwrap()
    }

    #[test]
    fn test_nested_get() {
        let d = doc(json!({"station": {"coords": {"lat": 50.1}}}));
        assert_eq!(get_path(&d, "station.coords.lat"), Some(Value::Number(50.1)));
        assert_eq!(get_path(&d, "station.coords.lon"), None);
    }

    #[test]
    fn test_get_traverses_array_of_documents() {
        let d = doc(json!({
            "related_events": [
                {"location": "Prague"},
                {"location": "Brno"},
                {"other": 1}
            ]
        }));
        assert_eq!(
            get_path(&d, "related_events.location"),
            Some(Value::from(json!(["Prague", "Brno"])))
        );
    }

    #[test]
    fn test_set_creates_intermediate_documents() {
        let mut d = doc(json!({"a": 1}));
        set_path(&mut d, "stats.temp.avg", Value::Number(15.0));
        assert_eq!(d.to_json(), json!({"a": 1, "stats": {"temp": {"avg": 15}}}));
    }

    #[test]
    fn test_set_overwrites_scalar_parent() {
        let mut d = doc(json!({"a": 1}));
        set_path(&mut d, "a.b", Value::Bool(true));
        assert_eq!(d.to_json(), json!({"a": {"b": true}}));
    }

    #[test]
    fn test_remove_nested() {
        let mut d = doc(json!({"a": {"b": 1, "c": 2}}));
        assert_eq!(remove_path(&mut d, "a.b"), Some(Value::Number(1.0)));
        assert_eq!(d.to_json(), json!({"a": {"c": 2}}));
        assert_eq!(remove_path(&mut d, "x.y"), None);
    }
}
