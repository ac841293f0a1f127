//! Name → tool lookup, validated at registration.

use crate::tool::Tool;
use crate::tools;
use rqa_core::plan::FINISH_PLAN;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("tool name must not be empty")]
    EmptyName,
    #[error("tool '{0}' is already registered")]
    Duplicate(String),
    #[error("'finish_plan' is reserved for plan termination")]
    Reserved,
    #[error("tool '{name}' has an invalid parameter schema: {reason}")]
    InvalidSchema { name: String, reason: String },
}

/// Registered tools, ordered by name.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: BTreeMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding every builtin tool.
    pub fn with_builtin_tools() -> Result<Self, RegistryError> {
        let mut registry = Self::new();
        for tool in tools::builtin_tools() {
            registry.register(tool)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<(), RegistryError> {
        let name = tool.name().trim().to_string();
        if name.is_empty() {
            return Err(RegistryError::EmptyName);
        }
        if name == FINISH_PLAN {
            return Err(RegistryError::Reserved);
        }
        if self.tools.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        check_schema(&name, &tool.parameters_schema())?;
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.tools.keys().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool catalogue for the planner prompt: name, description, parameters.
    pub fn describe(&self) -> String {
        self.tools
            .values()
            .map(|tool| {
                let schema = tool.parameters_schema();
                let params = schema.get("properties").cloned().unwrap_or(Value::Null);
                let required = schema.get("required").cloned().unwrap_or(Value::Null);
                format!(
                    "- {}: {}\n  parameters: {}\n  required: {}",
                    tool.name(),
                    tool.description(),
                    params,
                    required
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn check_schema(name: &str, schema: &Value) -> Result<(), RegistryError> {
    let invalid = |reason: &str| RegistryError::InvalidSchema {
        name: name.to_string(),
        reason: reason.to_string(),
    };
    let object = schema
        .as_object()
        .ok_or_else(|| invalid("schema must be a JSON object"))?;
    match object.get("type") {
        Some(Value::String(t)) if t == "object" => {}
        _ => return Err(invalid("schema type must be \"object\"")),
    }
    if let Some(props) = object.get("properties")
        && !props.is_object()
    {
        return Err(invalid("\"properties\" must be a mapping"));
    }
    Ok(())
}
