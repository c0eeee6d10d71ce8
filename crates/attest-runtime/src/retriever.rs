//! Content retrieval boundary.
//!
//! The document store and its search index are external. The pipeline only
//! needs ranked passages with stable ids it can cite, scoped to the
//! documents bound to an evaluation.

use async_trait::async_trait;
use attest_core::{DocumentId, Passage};
use parking_lot::RwLock;
use std::collections::{BTreeSet, HashMap};
use thiserror::Error;

/// Errors from content retrieval. All of them are retryable at the
/// criterion level.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RetrieverError {
    #[error("Document not found: {0}")]
    DocumentNotFound(DocumentId),

    #[error("Retriever unavailable: {0}")]
    Unavailable(String),
}

/// A passage search scoped to a document set.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrievalQuery {
    pub documents: Vec<DocumentId>,
    pub text: String,
    pub top_k: usize,
}

impl RetrievalQuery {
    pub fn new(documents: Vec<DocumentId>, text: impl Into<String>, top_k: usize) -> Self {
        Self {
            documents,
            text: text.into(),
            top_k,
        }
    }
}

/// Retrieval abstraction over the external search index.
#[async_trait]
pub trait ContentRetriever: Send + Sync {
    /// Ranked passages, best first, at most `query.top_k`.
    async fn retrieve(&self, query: &RetrievalQuery) -> Result<Vec<Passage>, RetrieverError>;
}

/// Keyword-overlap retriever over passages held in memory.
///
/// Passage ids are `<document id>#<index>` and stay stable for the
/// lifetime of the document.
#[derive(Debug, Default)]
pub struct InMemoryRetriever {
    documents: RwLock<HashMap<DocumentId, Vec<Passage>>>,
}

impl InMemoryRetriever {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a document as an ordered list of `(text, location)` chunks.
    pub fn add_document<I, S>(&self, document_id: DocumentId, chunks: I)
    where
        I: IntoIterator<Item = (S, Option<String>)>,
        S: Into<String>,
    {
        let passages = chunks
            .into_iter()
            .enumerate()
            .map(|(index, (text, location))| Passage {
                id: format!("{}#{}", document_id, index),
                document_id,
                text: text.into(),
                relevance: 0.0,
                location,
            })
            .collect();
        self.documents.write().insert(document_id, passages);
    }

    pub fn remove_document(&self, document_id: DocumentId) {
        self.documents.write().remove(&document_id);
    }
}

#[async_trait]
impl ContentRetriever for InMemoryRetriever {
    async fn retrieve(&self, query: &RetrievalQuery) -> Result<Vec<Passage>, RetrieverError> {
        let documents = self.documents.read();
        let terms = terms(&query.text);

        let mut candidates = Vec::new();
        for document_id in &query.documents {
            let passages = documents
                .get(document_id)
                .ok_or(RetrieverError::DocumentNotFound(*document_id))?;
            candidates.extend(passages.iter().cloned());
        }

        if terms.is_empty() {
            candidates.truncate(query.top_k);
            return Ok(candidates);
        }

        let mut scored: Vec<Passage> = candidates
            .into_iter()
            .filter_map(|mut passage| {
                let passage_terms = self::terms(&passage.text);
                let overlap = terms.intersection(&passage_terms).count();
                if overlap == 0 {
                    return None;
                }
                passage.relevance = overlap as f32 / terms.len() as f32;
                Some(passage)
            })
            .collect();

        // Stable: equal relevance keeps document order.
        scored.sort_by(|a, b| b.relevance.total_cmp(&a.relevance));
        scored.truncate(query.top_k);
        Ok(scored)
    }
}

fn terms(text: &str) -> BTreeSet<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.chars().count() >= 3)
        .map(str::to_lowercase)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn retriever(doc: DocumentId) -> InMemoryRetriever {
        let retriever = InMemoryRetriever::new();
        retriever.add_document(
            doc,
            vec![
                ("Purpose and scope of this policy.", Some("Section 1".to_string())),
                ("Backups are encrypted at rest using AES-256.", Some("Section 4".to_string())),
                ("Access rights are reviewed quarterly.", None),
            ],
        );
        retriever
    }

    #[tokio::test]
    async fn test_ranks_by_keyword_overlap() {
        let doc = DocumentId::new();
        let passages = retriever(doc)
            .retrieve(&RetrievalQuery::new(vec![doc], "Are backups encrypted?", 5))
            .await
            .unwrap();

        assert_eq!(passages.len(), 1);
        assert_eq!(passages[0].id, format!("{}#1", doc));
        assert_eq!(passages[0].location.as_deref(), Some("Section 4"));
        assert!(passages[0].relevance > 0.0);
    }

    #[tokio::test]
    async fn test_empty_query_returns_leading_passages() {
        let doc = DocumentId::new();
        let passages = retriever(doc)
            .retrieve(&RetrievalQuery::new(vec![doc], "", 2))
            .await
            .unwrap();
        assert_eq!(passages.len(), 2);
        assert_eq!(passages[0].id, format!("{}#0", doc));
    }

    #[tokio::test]
    async fn test_unknown_document_is_an_error() {
        let doc = DocumentId::new();
        let missing = DocumentId::new();
        let err = retriever(doc)
            .retrieve(&RetrievalQuery::new(vec![doc, missing], "backups", 5))
            .await
            .unwrap_err();
        assert_eq!(err, RetrieverError::DocumentNotFound(missing));
    }
}
