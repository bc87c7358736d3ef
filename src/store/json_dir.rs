//! Read-only store over a directory of JSON files
//!
//! Collection `name` lives in `<root>/name.json`, holding either a JSON
//! array of objects or one object per line.

use std::fs;
use std::path::{Path, PathBuf};

use super::errors::{StoreError, StoreResult};
use super::DocumentStore;
use crate::value::Document;

#[derive(Debug, Clone)]
pub struct JsonDirStore {
    root: PathBuf,
}

impl JsonDirStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn collection_path(&self, collection: &str) -> StoreResult<PathBuf> {
        // names map straight to file names; no path traversal
        if collection.is_empty() || collection.contains(['/', '\\']) || collection.starts_with('.') {
            return Err(StoreError::CollectionNotFound(collection.to_string()));
        }
        Ok(self.root.join(format!("{}.json", collection)))
    }

    fn parse(collection: &str, content: &str) -> StoreResult<Vec<Document>> {
        let invalid = |reason: String| StoreError::InvalidDocument {
            collection: collection.to_string(),
            reason,
        };
        let to_doc = |json: serde_json::Value| {
            Document::from_json(json).ok_or_else(|| invalid("document is not an object".into()))
        };

        if content.trim_start().starts_with('[') {
            let items: Vec<serde_json::Value> =
                serde_json::from_str(content).map_err(|e| invalid(e.to_string()))?;
            items.into_iter().map(to_doc).collect()
        } else {
            content
                .lines()
                .filter(|line| !line.trim().is_empty())
                .map(|line| {
                    let json = serde_json::from_str(line).map_err(|e| invalid(e.to_string()))?;
                    to_doc(json)
                })
                .collect()
        }
    }
}

impl DocumentStore for JsonDirStore {
    fn scan(&self, collection: &str) -> StoreResult<Vec<Document>> {
        let path = self.collection_path(collection)?;
        if !path.is_file() {
            return Err(StoreError::CollectionNotFound(collection.to_string()));
        }
        let content = fs::read_to_string(&path)?;
        Self::parse(collection, &content)
    }

    fn contains(&self, collection: &str) -> bool {
        self.collection_path(collection)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use tempfile::TempDir;

    #[test]
    fn test_reads_json_array() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("globalClimate.json"),
            r#"[{"location": "Prague", "temperature_c": 10}, {"location": "Oslo", "temperature_c": -3}]"#,
        )
        .unwrap();

        let store = JsonDirStore::new(dir.path());
        let docs = store.scan("globalClimate").unwrap();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[1].lookup("temperature_c"), Value::Number(-3.0));
    }

    #[test]
    fn test_reads_json_lines() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("events.json"), "{\"a\": 1}\n\n{\"a\": 2}\n").unwrap();

        let store = JsonDirStore::new(dir.path());
        assert_eq!(store.scan("events").unwrap().len(), 2);
    }

    #[test]
    fn test_missing_and_unsafe_names() {
        let dir = TempDir::new().unwrap();
        let store = JsonDirStore::new(dir.path());
        assert!(matches!(store.scan("absent"), Err(StoreError::CollectionNotFound(_))));
        assert!(matches!(store.scan("../etc"), Err(StoreError::CollectionNotFound(_))));
        assert!(!store.contains("absent"));
    }

    #[test]
    fn test_malformed_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("bad.json"), "[1, 2]").unwrap();
        let store = JsonDirStore::new(dir.path());
        assert!(matches!(store.scan("bad"), Err(StoreError::InvalidDocument { .. })));
    }
}
