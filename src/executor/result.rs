//! Result type for query execution

use serde::Serialize;
use serde_json::{json, Value as Json};
use uuid::Uuid;

use crate::value::Document;

/// Full, ordered result of one query.
///
/// Either a complete `QueryOutput` is returned or an error; a query never
/// yields a partial result.
#[derive(Debug, Clone, Serialize)]
pub struct QueryOutput {
    pub query_id: Uuid,
    /// Documents in result order
    pub documents: Vec<Document>,
    pub count: usize,
}

impl QueryOutput {
    pub fn new(query_id: Uuid, documents: Vec<Document>) -> Self {
        Self {
            query_id,
            count: documents.len(),
            documents,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn len(&self) -> usize {
        self.count
    }

    pub fn documents(&self) -> &[Document] {
        &self.documents
    }

    /// `{"count": n, "documents": [...]}`
    pub fn to_json(&self) -> Json {
        json!({
            "count": self.count,
            "documents": self.documents.iter().map(Document::to_json).collect::<Vec<_>>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_matches_documents() {
        let docs = vec![
            Document::from_json(json!({"location": "Prague", "count": 3})).unwrap(),
            Document::from_json(json!({"location": "Brno", "count": 1})).unwrap(),
        ];
        let output = QueryOutput::new(Uuid::new_v4(), docs);
        assert_eq!(output.len(), 2);
        assert!(!output.is_empty());
        assert_eq!(
            output.to_json(),
            json!({
                "count": 2,
                "documents": [{"location": "Prague", "count": 3}, {"location": "Brno", "count": 1}]
            })
        );
    }

    #[test]
    fn test_empty() {
        let output = QueryOutput::new(Uuid::new_v4(), Vec::new());
        assert!(output.is_empty());
        assert_eq!(output.to_json()["count"], json!(0));
    }
}
