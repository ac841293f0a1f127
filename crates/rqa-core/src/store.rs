//! Document store seam and a lexical in-memory implementation.
//!
//! The production backend is an embedding store owned by the ingestion
//! pipeline; everything above this module only sees [`DocumentStore`].

use crate::document::{Document, scalar_to_string};
use crate::filter::{ContentFilter, Filter, FilterError};
use std::collections::{BTreeMap, HashSet};

/// Text substituted when a query carries no text.
pub const WILDCARD: &str = "*";

const STOP_WORDS: &[&str] = &[
    "a", "an", "the", "of", "is", "are", "was", "what", "who", "whose", "which", "when", "where",
    "in", "on", "at", "for", "and", "or", "to", "me", "my", "show", "list", "give", "tell",
    "please", "do", "does", "with", "about", "all",
];

/// Errors a store backend may report.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("invalid filter: {0}")]
    InvalidFilter(#[from] FilterError),
    #[error("store backend error: {0}")]
    Backend(String),
}

/// One store query. Every part is optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreQuery {
    pub text: Option<String>,
    pub filter: Option<Filter>,
    pub document_filter: Option<ContentFilter>,
    /// Case-insensitive substring match against collection names.
    pub collection_filter: Option<String>,
    pub limit: Option<usize>,
}

impl StoreQuery {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_filter(mut self, filter: Option<Filter>) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn with_document_filter(mut self, filter: Option<ContentFilter>) -> Self {
        self.document_filter = filter;
        self
    }

    #[must_use]
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection_filter = Some(collection.into());
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Query text, with the wildcard substituted when absent or blank.
    pub fn effective_text(&self) -> &str {
        match self.text.as_deref().map(str::trim) {
            Some(t) if !t.is_empty() => t,
            _ => WILDCARD,
        }
    }

    /// True for a plain text search: no metadata, content or collection scoping.
    pub fn is_broad(&self) -> bool {
        self.filter.is_none() && self.document_filter.is_none() && self.collection_filter.is_none()
    }
}

/// Read-only document retrieval.
pub trait DocumentStore: Send + Sync {
    fn query(&self, query: &StoreQuery) -> Result<Vec<Document>, StoreError>;

    /// Every stored document, used to build the schema alias map.
    fn all_documents(&self) -> Vec<Document>;

    fn collection_names(&self) -> Vec<String>;
}

/// Lexical store over in-memory collections.
///
/// Relevance is the fraction of (non-stop-word) query tokens found in a
/// document's content or metadata values. Ties keep insertion order.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    collections: BTreeMap<String, Vec<Document>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_documents(documents: impl IntoIterator<Item = Document>) -> Self {
        let mut store = Self::new();
        for doc in documents {
            store.insert(doc);
        }
        store
    }

    pub fn insert(&mut self, document: Document) {
        self.collections
            .entry(document.source_collection.clone())
            .or_default()
            .push(document);
    }

    pub fn collections(&self) -> &BTreeMap<String, Vec<Document>> {
        &self.collections
    }

    pub fn len(&self) -> usize {
        self.collections.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DocumentStore for InMemoryStore {
    fn query(&self, query: &StoreQuery) -> Result<Vec<Document>, StoreError> {
        let text = query.effective_text();
        let terms = query_terms(text);
        let scope = query.collection_filter.as_deref().map(str::to_lowercase);

        let mut scored: Vec<(f64, &Document)> = Vec::new();
        for (name, docs) in &self.collections {
            if let Some(ref scope) = scope
                && !name.to_lowercase().contains(scope.as_str())
            {
                continue;
            }
            for doc in docs {
                if let Some(ref filter) = query.filter
                    && !filter.matches(&doc.metadata)
                {
                    continue;
                }
                if let Some(ref content_filter) = query.document_filter
                    && !content_filter.matches(&doc.content)
                {
                    continue;
                }
                let score = if text == WILDCARD {
                    1.0
                } else {
                    relevance(&terms, doc)
                };
                if score > 0.0 {
                    scored.push((score, doc));
                }
            }
        }

        // Stable sort keeps collection/insertion order among equal scores.
        scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        let limit = query.limit.unwrap_or(usize::MAX);
        Ok(scored
            .into_iter()
            .take(limit)
            .map(|(_, doc)| doc.clone())
            .collect())
    }

    fn all_documents(&self) -> Vec<Document> {
        self.collections.values().flatten().cloned().collect()
    }

    fn collection_names(&self) -> Vec<String> {
        self.collections.keys().cloned().collect()
    }
}

fn tokenize(text: &str) -> impl Iterator<Item = String> + '_ {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
}

/// Query tokens minus stop words; all tokens if nothing else remains.
fn query_terms(text: &str) -> Vec<String> {
    let all: Vec<String> = tokenize(text).collect();
    let content: Vec<String> = all
        .iter()
        .filter(|t| !STOP_WORDS.contains(&t.as_str()))
        .cloned()
        .collect();
    let mut seen = HashSet::new();
    let terms = if content.is_empty() { all } else { content };
    terms.into_iter().filter(|t| seen.insert(t.clone())).collect()
}

fn relevance(terms: &[String], doc: &Document) -> f64 {
    if terms.is_empty() {
        return 0.0;
    }
    let mut haystack: HashSet<String> = tokenize(&doc.content).collect();
    for value in doc.metadata.values() {
        if let Some(s) = scalar_to_string(value) {
            haystack.extend(tokenize(&s));
        }
    }
    let hits = terms.iter().filter(|t| haystack.contains(*t)).count();
    hits as f64 / terms.len() as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::Condition;
    use serde_json::json;

    fn store() -> InMemoryStore {
        InMemoryStore::from_documents(vec![
            Document::new("students", "Lee Pace BSCS 2A").with_meta("full_name", "Lee Pace"),
            Document::new("students", "Ana Cruz BSIT 1B").with_meta("full_name", "Ana Cruz"),
            Document::new("schedules_bscs", "CS101 Monday 8:00 Lee Pace")
                .with_meta("adviser", "Lee Pace"),
        ])
    }

    #[test]
    fn test_wildcard_returns_everything() {
        let docs = store().query(&StoreQuery::default()).unwrap();
        assert_eq!(docs.len(), 3);
    }

    #[test]
    fn test_text_ranking_and_stop_words() {
        let docs = store()
            .query(&StoreQuery::text("what is the schedule of Ana Cruz?"))
            .unwrap();
        assert_eq!(docs[0].content, "Ana Cruz BSIT 1B");
    }

    #[test]
    fn test_collection_filter_is_substring() {
        let docs = store()
            .query(&StoreQuery::text("Lee Pace").with_collection("SCHEDULE"))
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].source_collection, "schedules_bscs");
    }

    #[test]
    fn test_filter_without_text_uses_wildcard() {
        let query = StoreQuery::default().with_filter(Some(Filter::field(
            "full_name",
            Condition::Eq(json!("Ana Cruz")),
        )));
        assert_eq!(query.effective_text(), WILDCARD);
        let docs = store().query(&query).unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[test]
    fn test_limit_and_no_match() {
        let docs = store().query(&StoreQuery::text("Pace").with_limit(1)).unwrap();
        assert_eq!(docs.len(), 1);
        let none = store().query(&StoreQuery::text("Zebulon")).unwrap();
        assert!(none.is_empty());
    }

    #[test]
    fn test_is_broad() {
        assert!(StoreQuery::text("x").is_broad());
        assert!(!StoreQuery::text("x").with_collection("students").is_broad());
    }
}
