//! Insertion-ordered document

use indexmap::IndexMap;
use serde::ser::{Serialize, SerializeMap, Serializer};

use super::path;
use super::value::Value;

/// A record: unique field names mapped to values.
///
/// Iteration follows insertion order. Equality ignores it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    fields: IndexMap<String, Value>,
}

impl Document {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            fields: IndexMap::with_capacity(capacity),
        }
    }

    /// Returns the top-level field with the given name
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.fields.get(key)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut Value> {
        self.fields.get_mut(key)
    }

    /// Resolves a dotted path, traversing arrays of sub-documents.
    ///
    /// Returns `None` when the path is missing.
    pub fn get_path(&self, path: &str) -> Option<Value> {
        path::get_path(self, path)
    }

    /// Resolves a dotted path, mapping a missing path to `Null`
    pub fn lookup(&self, path: &str) -> Value {
        self.get_path(path).unwrap_or(Value::Null)
    }

    /// Inserts or replaces a top-level field, keeping its position if present
    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.fields.insert(key.into(), value.into())
    }

    /// Sets a dotted path, creating intermediate sub-documents as needed
    pub fn set_path(&mut self, path: &str, value: Value) {
        path::set_path(self, path, value)
    }

    /// Removes a top-level field, preserving the order of the rest
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.fields.shift_remove(key)
    }

    /// Removes a dotted path if present
    pub fn remove_path(&mut self, path: &str) -> Option<Value> {
        path::remove_path(self, path)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.fields.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.fields.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.fields.keys()
    }

    pub fn to_json(&self) -> serde_json::Value {
        let map = self
            .fields
            .iter()
            .map(|(k, v)| (k.clone(), v.to_json()))
            .collect();
        serde_json::Value::Object(map)
    }

    /// Builds a document from a JSON value.
    ///
    /// Returns `None` if the value is not a JSON object.
    pub fn from_json(json: serde_json::Value) -> Option<Self> {
        match json {
            serde_json::Value::Object(map) => Some(Self::from_json_map(map)),
            _ => None,
        }
    }

    pub(crate) fn from_json_map(map: serde_json::Map<String, serde_json::Value>) -> Self {
        Self {
            fields: map.into_iter().map(|(k, v)| (k, Value::from(v))).collect(),
        }
    }
}

impl IntoIterator for Document {
    type Item = (String, Value);
    type IntoIter = indexmap::map::IntoIter<String, Value>;

    fn into_iter(self) -> Self::IntoIter {
        self.fields.into_iter()
    }
}

impl FromIterator<(String, Value)> for Document {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        Self {
            fields: iter.into_iter().collect(),
        }
    }
}

impl Serialize for Document {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.fields.len()))?;
        for (key, value) in &self.fields {
            map.serialize_entry(key, value)?;
        }
        map.end()
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
    fn test_insertion_order_preserved() {
        let d = doc(json!({"z": 1, "a": 2, "m": 3}));
        let keys: Vec<_> = d.keys().cloned().collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn test_remove_keeps_remaining_order() {
        let mut d = doc(json!({"a": 1, "b": 2, "c": 3}));
        d.remove("b");
        let keys: Vec<_> = d.keys().cloned().collect();
        assert_eq!(keys, vec!["a", "c"]);
    }

    #[test]
    fn test_serialize_round_trips_through_serde_json() {
        let d = doc(json!({"location": "Prague", "temperature_c": 15}));
        let out = serde_json::to_value(&d).unwrap();
        assert_eq!(out, json!({"location": "Prague", "temperature_c": 15}));
    }

    #[test]
    fn test_lookup_missing_is_null() {
        let d = doc(json!({"a": 1}));
        assert_eq!(d.lookup("b.c"), Value::Null);
    }
}
