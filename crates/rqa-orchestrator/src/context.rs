//! The evidence object handed to the synthesizer.

use crate::tool::ToolOutput;
use rqa_core::document::{Document, Entity, OutcomeStatus};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextStatus {
    Success,
    Empty,
    Error,
}

impl ContextStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Empty => "empty",
            Self::Error => "error",
        }
    }
}

/// `{status, query, tool, summary, documents, entity}` as sent to synthesis.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EvidenceContext {
    pub status: ContextStatus,
    pub query: String,
    pub tool: Option<String>,
    pub summary: String,
    pub documents: Vec<Document>,
    pub entity: Option<Entity>,
}

impl EvidenceContext {
    /// Flatten tool outputs into one context, keeping at most `limit` documents.
    ///
    /// Any document or non-empty entity makes it `success`. Otherwise the first
    /// error status wins over `empty`.
    pub fn from_outputs(
        query: &str,
        tool: Option<&str>,
        outputs: &[ToolOutput],
        limit: usize,
    ) -> Self {
        let mut documents = Vec::new();
        let mut entity: Option<Entity> = None;
        let mut error: Option<String> = None;
        let mut empty: Option<String> = None;
        for output in outputs {
            match output {
                ToolOutput::Documents(docs) => documents.extend(docs.iter().cloned()),
                ToolOutput::Entity(e) if !e.is_empty() => {
                    entity.get_or_insert_with(|| e.clone());
                }
                ToolOutput::Entity(_) => {}
                ToolOutput::Status(report) => {
                    let slot = match report.status {
                        OutcomeStatus::Error => &mut error,
                        OutcomeStatus::Empty => &mut empty,
                    };
                    slot.get_or_insert_with(|| report.summary.clone());
                }
            }
        }

        let total = documents.len();
        documents.truncate(limit);
        let (status, summary) = if total > 0 || entity.is_some() {
            let mut summary = format!("Found {} record(s).", total);
            if total > limit {
                summary.push_str(&format!(" Showing the first {}.", limit));
            }
            (ContextStatus::Success, summary)
        } else if let Some(message) = error {
            (ContextStatus::Error, message)
        } else {
            (
                ContextStatus::Empty,
                empty.unwrap_or_else(|| "No matching records were found.".to_string()),
            )
        };

        Self {
            status,
            query: query.to_string(),
            tool: tool.map(str::to_string),
            summary,
            documents,
            entity,
        }
    }

    pub fn error(query: &str, tool: Option<&str>, summary: impl Into<String>) -> Self {
        Self {
            status: ContextStatus::Error,
            query: query.to_string(),
            tool: tool.map(str::to_string),
            summary: summary.into(),
            documents: Vec::new(),
            entity: None,
        }
    }

    /// True when there is neither a document nor an entity to report.
    pub fn has_evidence(&self) -> bool {
        !self.documents.is_empty() || self.entity.is_some()
    }

    /// Put an earlier summary in front, so the synthesizer knows why a broad search ran.
    pub fn prefix_summary(&mut self, earlier: &str) {
        if !earlier.is_empty() {
            self.summary = format!("{} {}", earlier, self.summary);
        }
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_else(|_| "{}".to_string())
    }
}
