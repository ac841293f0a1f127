//! Placeholder substitution between plan steps.
//!
//! Grammar: `'$' field "_from_step_" digits`, where `field` is one or more
//! ASCII alphanumerics or underscores and the split happens at the last
//! `_from_step_`. Placeholders may only reference strictly earlier steps.

use crate::normalize::FilterNormalizer;
use rqa_core::document::{Document, StepResult, StepResults};
use rqa_core::schema::SchemaAliasMap;
use serde_json::{Map, Value};

const MARKER: &str = "_from_step_";

/// Errors for tokens that look like placeholders but cannot be honored.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PlaceholderError {
    #[error("malformed placeholder '{0}'")]
    Malformed(String),
    #[error("placeholder '{token}' references step {step}, which does not precede step {current}")]
    ForwardReference {
        token: String,
        step: usize,
        current: usize,
    },
}

/// A parsed `$<field>_from_step_<N>` token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Placeholder {
    pub field: String,
    pub step: usize,
}

impl Placeholder {
    /// `Ok(None)` for ordinary strings, `Err` for placeholder-shaped strings
    /// that break the grammar.
    pub fn parse(token: &str) -> Result<Option<Self>, PlaceholderError> {
        let token = token.trim();
        let Some(body) = token.strip_prefix('$') else {
            return Ok(None);
        };
        let Some((field, step)) = body.rsplit_once(MARKER) else {
            return Ok(None);
        };
        let malformed = || PlaceholderError::Malformed(token.to_string());
        if field.is_empty()
            || !field
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(malformed());
        }
        if step.is_empty() || !step.chars().all(|c| c.is_ascii_digit()) {
            return Err(malformed());
        }
        let step: usize = step.parse().map_err(|_| malformed())?;
        if step == 0 {
            return Err(malformed());
        }
        Ok(Some(Self {
            field: field.to_string(),
            step,
        }))
    }
}

/// Fills placeholders in step parameters from earlier step results.
pub struct PlaceholderResolver<'a> {
    aliases: &'a SchemaAliasMap,
    normalizer: &'a FilterNormalizer,
}

impl<'a> PlaceholderResolver<'a> {
    pub fn new(aliases: &'a SchemaAliasMap, normalizer: &'a FilterNormalizer) -> Self {
        Self {
            aliases,
            normalizer,
        }
    }

    /// Resolve every placeholder in `parameters` for the step numbered `current_step`.
    ///
    /// Placeholders whose value cannot be found are dropped: a mapping loses the
    /// key, a sequence loses the element.
    pub fn resolve(
        &self,
        parameters: &Map<String, Value>,
        results: &StepResults,
        current_step: usize,
    ) -> Result<Map<String, Value>, PlaceholderError> {
        let mut out = Map::with_capacity(parameters.len());
        for (key, value) in parameters {
            if let Some(resolved) = self.resolve_value(value, results, current_step)? {
                out.insert(key.clone(), resolved);
            } else {
                tracing::warn!(
                    "step {}: parameter '{}' left unresolved, treating it as absent",
                    current_step,
                    key
                );
            }
        }
        Ok(out)
    }

    fn resolve_value(
        &self,
        value: &Value,
        results: &StepResults,
        current_step: usize,
    ) -> Result<Option<Value>, PlaceholderError> {
        match value {
            Value::String(s) => match Placeholder::parse(s)? {
                None => Ok(Some(value.clone())),
                Some(placeholder) => {
                    if placeholder.step >= current_step {
                        return Err(PlaceholderError::ForwardReference {
                            token: s.clone(),
                            step: placeholder.step,
                            current: current_step,
                        });
                    }
                    Ok(self.lookup(&placeholder, results))
                }
            },
            Value::Object(map) => Ok(Some(Value::Object(
                self.resolve(map, results, current_step)?,
            ))),
            Value::Array(items) => {
                let mut out = Vec::with_capacity(items.len());
                for item in items {
                    out.extend(self.resolve_value(item, results, current_step)?);
                }
                Ok(Some(Value::Array(out)))
            }
            other => Ok(Some(other.clone())),
        }
    }

    fn lookup(&self, placeholder: &Placeholder, results: &StepResults) -> Option<Value> {
        match results.get(&placeholder.step)? {
            StepResult::Entity(entity) if entity.is_empty() => None,
            StepResult::Entity(entity) => entity.field(&placeholder.field),
            StepResult::Documents(docs) => {
                let first = docs.first()?;
                if placeholder.field == "content" {
                    return Some(Value::String(first.content.clone()));
                }
                let canonical = self.aliases.canonical_of(&placeholder.field);
                let raw = self.document_field(first, &placeholder.field, &canonical)?;
                Some(self.normalizer.expand(&canonical, &raw))
            }
        }
    }

    /// Literal key first, then any spelling of the canonical field.
    fn document_field(&self, doc: &Document, field: &str, canonical: &str) -> Option<Value> {
        doc.metadata
            .get(field)
            .or_else(|| self.aliases.lookup(&doc.metadata, canonical))
            .cloned()
    }
}
