//! Record model: documents retrieved from the store, resolved person identities,
//! and the per-step results threaded through a plan.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// Document metadata, keyed by whatever spelling the ingestion source used.
pub type Metadata = BTreeMap<String, Value>;

/// A retrieved record. Immutable once it leaves the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub source_collection: String,
    pub content: String,
    #[serde(default)]
    pub metadata: Metadata,
}

impl Document {
    pub fn new(source_collection: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            source_collection: source_collection.into(),
            content: content.into(),
            metadata: Metadata::new(),
        }
    }

    /// Builder-style metadata insertion, mostly for fixtures and ingestion glue.
    #[must_use]
    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Metadata value under `key`, stringified if it is a scalar.
    pub fn meta_str(&self, key: &str) -> Option<String> {
        self.metadata.get(key).and_then(scalar_to_string)
    }
}

/// Stringify a JSON scalar. Arrays, objects and null yield `None`.
pub fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// A resolved person identity.
///
/// `aliases` always contains `primary_name` for a non-empty entity. An empty
/// entity is the "not found" value, not an error.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub primary_name: String,
    pub aliases: BTreeSet<String>,
    pub primary_document: Option<Document>,
}

impl Entity {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn new(primary_name: impl Into<String>) -> Self {
        let primary_name = primary_name.into();
        let mut aliases = BTreeSet::new();
        aliases.insert(primary_name.clone());
        Self {
            primary_name,
            aliases,
            primary_document: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.primary_name.is_empty()
    }

    /// Replace the primary name, keeping it inside the alias set.
    pub fn set_primary(&mut self, name: impl Into<String>) {
        let name = name.into();
        self.aliases.insert(name.clone());
        self.primary_name = name;
    }

    pub fn has_alias(&self, name: &str) -> bool {
        self.aliases.contains(name)
    }

    /// Read a field off the entity record, then off its primary document's metadata.
    pub fn field(&self, field: &str) -> Option<Value> {
        match field {
            "primary_name" | "name" => Some(Value::String(self.primary_name.clone())),
            "aliases" => Some(Value::Array(
                self.aliases.iter().cloned().map(Value::String).collect(),
            )),
            "primary_document" => self
                .primary_document
                .as_ref()
                .and_then(|doc| serde_json::to_value(doc).ok()),
            other => self
                .primary_document
                .as_ref()
                .and_then(|doc| doc.metadata.get(other).cloned()),
        }
    }
}

/// Status carried by the sentinel a tool returns instead of documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutcomeStatus {
    Error,
    Empty,
}

/// The `{status, summary}` sentinel object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: OutcomeStatus,
    pub summary: String,
}

impl StatusReport {
    pub fn error(summary: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Error,
            summary: summary.into(),
        }
    }

    pub fn empty(summary: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Empty,
            summary: summary.into(),
        }
    }
}

/// Output of one executed plan step, keyed by step index for placeholder lookup.
#[derive(Debug, Clone, PartialEq)]
pub enum StepResult {
    Documents(Vec<Document>),
    Entity(Entity),
}

/// Step results of the plan currently executing.
pub type StepResults = BTreeMap<usize, StepResult>;
