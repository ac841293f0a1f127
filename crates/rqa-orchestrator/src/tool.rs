//! The tool seam: typed parameters in, documents / an entity / a status out.

use rqa_core::config::ResolutionConfig;
use rqa_core::document::{Document, Entity, StatusReport, StepResult, scalar_to_string};
use rqa_core::filter::FilterError;
use rqa_core::schema::SchemaAliasMap;
use rqa_core::store::{DocumentStore, StoreError};
use rqa_resolve::entity::EntityResolver;
use rqa_resolve::normalize::FilterNormalizer;
use serde::de::{DeserializeOwned, Error as _};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Errors a tool may raise. Dispatch turns every one of them into a
/// `{"status": "error"}` evidence item.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("invalid parameters for '{tool}': {reason}")]
    InvalidParameters { tool: String, reason: String },
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Filter(#[from] FilterError),
}

/// What a tool returns.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ToolOutput {
    Documents(Vec<Document>),
    Entity(Entity),
    Status(StatusReport),
}

impl ToolOutput {
    pub fn unknown_person(name: &str) -> Self {
        Self::Status(StatusReport::error(format!(
            "Could not find anyone matching '{}'.",
            name
        )))
    }

    pub fn empty(summary: impl Into<String>) -> Self {
        Self::Status(StatusReport::empty(summary))
    }

    pub fn error(summary: impl Into<String>) -> Self {
        Self::Status(StatusReport::error(summary))
    }

    /// Documents, or the `empty` status when there are none.
    pub fn documents_or(docs: Vec<Document>, empty_summary: impl Into<String>) -> Self {
        if docs.is_empty() {
            Self::empty(empty_summary)
        } else {
            Self::Documents(docs)
        }
    }

    /// The value placeholders in later steps read from.
    pub fn to_step_result(&self) -> StepResult {
        match self {
            Self::Documents(docs) => StepResult::Documents(docs.clone()),
            Self::Entity(entity) => StepResult::Entity(entity.clone()),
            Self::Status(_) => StepResult::Documents(Vec::new()),
        }
    }
}

/// Read-only collaborators a tool runs against.
pub struct ToolContext<'a> {
    pub store: &'a dyn DocumentStore,
    pub aliases: &'a SchemaAliasMap,
    pub normalizer: &'a FilterNormalizer,
    pub resolution: &'a ResolutionConfig,
}

impl<'a> ToolContext<'a> {
    pub fn resolver(&self) -> EntityResolver<'a> {
        EntityResolver::new(self.store, self.aliases, self.resolution)
    }
}

/// A named capability the planner may invoke.
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    /// One line shown to the planner.
    fn description(&self) -> &str;

    /// JSON schema of the parameter object.
    fn parameters_schema(&self) -> Value;

    fn run(&self, params: &Map<String, Value>, ctx: &ToolContext<'_>)
    -> Result<ToolOutput, ToolError>;
}

/// Deserialize a tool's typed parameters from the resolved parameter mapping.
pub fn parse_params<T: DeserializeOwned>(
    tool: &str,
    params: &Map<String, Value>,
) -> Result<T, ToolError> {
    serde_json::from_value(Value::Object(params.clone())).map_err(|e| {
        ToolError::InvalidParameters {
            tool: tool.to_string(),
            reason: e.to_string(),
        }
    })
}

/// JSON schema for a parameter type, as a plain value.
pub fn schema_of<T: schemars::JsonSchema>() -> Value {
    serde_json::to_value(schemars::schema_for!(T)).unwrap_or(Value::Null)
}

/// A plain string out of a literal or a normalized condition (`$eq`, first `$in`).
fn flatten_condition(value: &Value) -> Option<String> {
    match value {
        Value::Object(map) => map.get("$eq").and_then(scalar_to_string).or_else(|| {
            map.get("$in")
                .and_then(Value::as_array)
                .and_then(|items| items.first())
                .and_then(scalar_to_string)
        }),
        Value::Array(items) => items.first().and_then(scalar_to_string),
        other => scalar_to_string(other),
    }
}

/// `deserialize_with` helper for string parameters fed by placeholders.
pub fn loose_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    let value = Value::deserialize(deserializer)?;
    flatten_condition(&value).ok_or_else(|| D::Error::custom("expected a string"))
}

/// Optional variant of [`loose_string`].
pub fn loose_opt_string<'de, D: Deserializer<'de>>(
    deserializer: D,
) -> Result<Option<String>, D::Error> {
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(flatten_condition))
}
