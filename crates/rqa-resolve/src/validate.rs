//! Structural plan validation with best-effort filter repair.
//!
//! Runs before any tool executes. Shape violations reject the plan; range
//! operators the store cannot honor are stripped in place instead.

use rqa_core::config::ValidationConfig;
use rqa_core::plan::{FINISH_PLAN, Plan};
use serde_json::{Map, Value};
use std::collections::BTreeSet;

/// Minimum normalized Levenshtein similarity for a "did you mean" hint.
const SUGGESTION_THRESHOLD: f64 = 0.6;

/// Why a plan was rejected. The display string is shown to the synthesizer.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("the plan must be a mapping with a 'plan' list")]
    MissingPlan,
    #[error("the plan has no steps")]
    EmptyPlan,
    #[error("step {index}: {reason}")]
    MalformedStep { index: usize, reason: String },
    #[error("step {index}: '{param}' must be a mapping")]
    FilterNotMapping { index: usize, param: String },
    #[error("step {index}: every '$or' branch must be a mapping with exactly one key")]
    InvalidOrBranch { index: usize },
    #[error("step {index}: unknown tool '{name}'{}", hint_suffix(.hint))]
    UnknownTool {
        index: usize,
        name: String,
        hint: Option<String>,
    },
    #[error("the last step must call 'finish_plan'")]
    MissingFinish,
    #[error("malformed plan: {0}")]
    Malformed(String),
}

fn hint_suffix(hint: &Option<String>) -> String {
    hint.as_ref()
        .map(|h| format!(" (did you mean '{}'?)", h))
        .unwrap_or_default()
}

/// Checks planner output against the tool registry and the filter rules.
#[derive(Debug, Clone)]
pub struct PlanValidator {
    known_tools: BTreeSet<String>,
    search_tool: String,
    unsupported_operators: Vec<String>,
}

impl PlanValidator {
    pub fn new<I, S>(tools: I, settings: &ValidationConfig) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            known_tools: tools.into_iter().map(Into::into).collect(),
            search_tool: settings.search_tool.clone(),
            unsupported_operators: settings.unsupported_operators.clone(),
        }
    }

    /// Validate (and repair in place) a raw plan, then parse it.
    pub fn validate(&self, raw: &mut Value) -> Result<Plan, ValidationError> {
        let steps = raw
            .as_object_mut()
            .and_then(|m| m.get_mut("plan"))
            .and_then(Value::as_array_mut)
            .ok_or(ValidationError::MissingPlan)?;
        if steps.is_empty() {
            return Err(ValidationError::EmptyPlan);
        }

        for (pos, step) in steps.iter().enumerate() {
            check_step_shape(pos + 1, step)?;
        }

        for (pos, step) in steps.iter_mut().enumerate() {
            let index = pos + 1;
            let Some(call) = step.get_mut("tool_call").and_then(Value::as_object_mut) else {
                continue;
            };
            if call.get("tool_name").and_then(Value::as_str) != Some(self.search_tool.as_str()) {
                continue;
            }
            let Some(params) = call.get_mut("parameters").and_then(Value::as_object_mut) else {
                continue;
            };
            check_filter_shapes(index, params)?;
            self.strip_unsupported(index, params);
        }

        for (pos, step) in steps.iter().enumerate() {
            let name = step
                .pointer("/tool_call/tool_name")
                .and_then(Value::as_str)
                .unwrap_or_default();
            if name != FINISH_PLAN && !self.known_tools.contains(name) {
                return Err(ValidationError::UnknownTool {
                    index: pos + 1,
                    name: name.to_string(),
                    hint: self.suggest(name),
                });
            }
        }

        let last = steps
            .last()
            .and_then(|s| s.pointer("/tool_call/tool_name"))
            .and_then(Value::as_str);
        if last != Some(FINISH_PLAN) {
            return Err(ValidationError::MissingFinish);
        }

        let mut plan: Plan = serde_json::from_value(raw.clone())
            .map_err(|e| ValidationError::Malformed(e.to_string()))?;
        plan.normalize_indices();
        Ok(plan)
    }

    fn strip_unsupported(&self, index: usize, params: &mut Map<String, Value>) {
        let Some(filters) = params.get_mut("filters") else {
            return;
        };
        if !strip_operators(filters, &self.unsupported_operators) {
            return;
        }
        if is_hollow(filters) {
            params.remove("filters");
        }
        params.remove("sort");
        params.remove("limit");
        tracing::warn!(
            "step {}: removed unsupported range operators ({}) and dropped sort/limit",
            index,
            self.unsupported_operators.join(", ")
        );
    }

    /// Closest registered tool name, if any is close enough.
    fn suggest(&self, name: &str) -> Option<String> {
        self.known_tools
            .iter()
            .map(|known| (strsim::normalized_levenshtein(name, known), known))
            .filter(|(score, _)| *score >= SUGGESTION_THRESHOLD)
            .max_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(_, known)| known.clone())
    }
}

fn check_step_shape(index: usize, step: &Value) -> Result<(), ValidationError> {
    let malformed = |reason: &str| ValidationError::MalformedStep {
        index,
        reason: reason.to_string(),
    };
    let step = step
        .as_object()
        .ok_or_else(|| malformed("step must be a mapping"))?;
    let call = step
        .get("tool_call")
        .and_then(Value::as_object)
        .ok_or_else(|| malformed("missing 'tool_call' mapping"))?;
    match call.get("tool_name").and_then(Value::as_str) {
        Some(name) if !name.trim().is_empty() => Ok(()),
        _ => Err(malformed("'tool_name' must be a non-empty string")),
    }
}

fn check_filter_shapes(index: usize, params: &Map<String, Value>) -> Result<(), ValidationError> {
    for param in ["filters", "document_filter"] {
        match params.get(param) {
            None | Some(Value::Null) => {}
            Some(value @ Value::Object(_)) => {
                if !or_branches_ok(value) {
                    return Err(ValidationError::InvalidOrBranch { index });
                }
            }
            Some(_) => {
                return Err(ValidationError::FilterNotMapping {
                    index,
                    param: param.to_string(),
                });
            }
        }
    }
    Ok(())
}

/// Every `$or` at any depth must be a list of single-key mappings.
fn or_branches_ok(value: &Value) -> bool {
    match value {
        Value::Object(map) => map.iter().all(|(key, child)| {
            if key == "$or" {
                let Some(branches) = child.as_array() else {
                    return false;
                };
                branches
                    .iter()
                    .all(|b| b.as_object().is_some_and(|m| m.len() == 1))
                    && branches.iter().all(or_branches_ok)
            } else {
                or_branches_ok(child)
            }
        }),
        Value::Array(items) => items.iter().all(or_branches_ok),
        _ => true,
    }
}

/// Remove unsupported operator keys at any depth. Containers emptied by the
/// removal are removed too. Returns whether anything was stripped.
fn strip_operators(value: &mut Value, unsupported: &[String]) -> bool {
    let mut stripped = false;
    match value {
        Value::Object(map) => {
            let keys: Vec<String> = map.keys().cloned().collect();
            for key in keys {
                if unsupported.contains(&key) {
                    map.remove(&key);
                    stripped = true;
                    continue;
                }
                if let Some(child) = map.get_mut(&key)
                    && strip_operators(child, unsupported)
                {
                    stripped = true;
                    if is_hollow(child) {
                        map.remove(&key);
                    }
                }
            }
        }
        Value::Array(items) => {
            for item in items.iter_mut() {
                stripped |= strip_operators(item, unsupported);
            }
            if stripped {
                items.retain(|item| !is_hollow(item));
            }
        }
        _ => {}
    }
    stripped
}

fn is_hollow(value: &Value) -> bool {
    match value {
        Value::Object(m) => m.is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn validator() -> PlanValidator {
        PlanValidator::new(
            ["search_database", "resolve_person", "get_person_schedule"],
            &ValidationConfig::default(),
        )
    }

    fn finish() -> Value {
        json!({"step": 9, "thought": "done", "tool_call": {"tool_name": "finish_plan", "parameters": {}}})
    }

    fn search_step(params: Value) -> Value {
        json!({"step": 1, "thought": "search", "tool_call": {"tool_name": "search_database", "parameters": params}})
    }

    #[test]
    fn test_valid_plan_parses() {
        let mut raw = json!({"plan": [
            {"thought": "resolve", "tool_call": {"tool_name": "resolve_person",
                "parameters": {"person_name": "Lee Pace"}}},
            {"tool_call": {"tool_name": "get_person_schedule",
                "parameters": {"person_name": "$name_from_step_1"}}},
            {"tool_call": {"tool_name": "finish_plan"}}
        ]});
        let plan = validator().validate(&mut raw).unwrap();
        assert_eq!(plan.steps.len(), 3);
        assert_eq!(plan.steps[1].index, 2);
        assert!(plan.is_terminated());
    }

    #[test]
    fn test_zero_based_steps_are_renumbered() {
        let mut raw = json!({"plan": [
            {"step": 0, "tool_call": {"tool_name": "resolve_person",
                "parameters": {"person_name": "Lee Pace"}}},
            {"step": 1, "tool_call": {"tool_name": "get_person_schedule",
                "parameters": {"person_name": "$primary_name_from_step_1"}}},
            {"step": 2, "tool_call": {"tool_name": "finish_plan"}}
        ]});
        let plan = validator().validate(&mut raw).unwrap();
        let indices: Vec<usize> = plan.steps.iter().map(|s| s.index).collect();
        assert_eq!(indices, vec![1, 2, 3]);
    }

    #[test]
    fn test_rejects_missing_plan() {
        let mut raw = json!({"steps": []});
        assert_eq!(
            validator().validate(&mut raw).unwrap_err(),
            ValidationError::MissingPlan
        );
        let mut raw = json!("search everything");
        assert_eq!(
            validator().validate(&mut raw).unwrap_err(),
            ValidationError::MissingPlan
        );
    }

    #[test]
    fn test_rejects_empty_plan() {
        let mut raw = json!({"plan": []});
        assert_eq!(
            validator().validate(&mut raw).unwrap_err(),
            ValidationError::EmptyPlan
        );
    }

    #[test]
    fn test_rejects_missing_tool_name() {
        let mut raw = json!({"plan": [{"tool_call": {"tool_name": ""}}, finish()]});
        assert!(matches!(
            validator().validate(&mut raw).unwrap_err(),
            ValidationError::MalformedStep { index: 1, .. }
        ));
        let mut raw = json!({"plan": [{"thought": "no call"}, finish()]});
        assert!(matches!(
            validator().validate(&mut raw).unwrap_err(),
            ValidationError::MalformedStep { index: 1, .. }
        ));
    }

    #[test]
    fn test_rejects_missing_finish() {
        let mut raw = json!({"plan": [search_step(json!({"query": "BSCS"}))]});
        assert_eq!(
            validator().validate(&mut raw).unwrap_err(),
            ValidationError::MissingFinish
        );
    }

    #[test]
    fn test_rejects_or_branch_with_two_keys() {
        let mut raw = json!({"plan": [
            search_step(json!({"filters": {"$or": [{"program": "BSCS", "section": "A"}]}})),
            finish()
        ]});
        assert_eq!(
            validator().validate(&mut raw).unwrap_err(),
            ValidationError::InvalidOrBranch { index: 1 }
        );
    }

    #[test]
    fn test_rejects_nested_bad_or() {
        let mut raw = json!({"plan": [
            search_step(json!({"filters": {"$and": [{"$or": [{"a": 1}, {"b": 2, "c": 3}]}]}})),
            finish()
        ]});
        assert_eq!(
            validator().validate(&mut raw).unwrap_err(),
            ValidationError::InvalidOrBranch { index: 1 }
        );
    }

    #[test]
    fn test_rejects_non_mapping_filters() {
        let mut raw = json!({"plan": [search_step(json!({"filters": "program = BSCS"})), finish()]});
        assert_eq!(
            validator().validate(&mut raw).unwrap_err(),
            ValidationError::FilterNotMapping {
                index: 1,
                param: "filters".into()
            }
        );
    }

    #[test]
    fn test_null_filters_are_accepted() {
        let mut raw = json!({"plan": [search_step(json!({"filters": null, "query": "x"})), finish()]});
        assert!(validator().validate(&mut raw).is_ok());
    }

    #[test]
    fn test_unknown_tool_suggests_closest() {
        let mut raw = json!({"plan": [
            {"tool_call": {"tool_name": "get_person_schedul", "parameters": {}}},
            finish()
        ]});
        let err = validator().validate(&mut raw).unwrap_err();
        assert_eq!(
            err,
            ValidationError::UnknownTool {
                index: 1,
                name: "get_person_schedul".into(),
                hint: Some("get_person_schedule".into()),
            }
        );
        assert!(err.to_string().contains("did you mean 'get_person_schedule'"));

        let mut raw = json!({"plan": [{"tool_call": {"tool_name": "launch_rockets"}}, finish()]});
        assert!(matches!(
            validator().validate(&mut raw).unwrap_err(),
            ValidationError::UnknownTool { hint: None, .. }
        ));
    }

    #[test]
    fn test_strips_range_operators_and_sort_limit() {
        let mut raw = json!({"plan": [
            search_step(json!({
                "query": "grades",
                "filters": {"program": "BSCS", "grade": {"$gte": 90}},
                "sort": "grade",
                "limit": 5
            })),
            finish()
        ]});
        let plan = validator().validate(&mut raw).unwrap();
        let params = &plan.steps[0].tool_call.parameters;
        assert_eq!(params["filters"], json!({"program": "BSCS"}));
        assert!(!params.contains_key("sort"));
        assert!(!params.contains_key("limit"));
        // Repairs land in the caller's value too.
        assert_eq!(
            raw.pointer("/plan/0/tool_call/parameters/filters"),
            Some(&json!({"program": "BSCS"}))
        );
    }

    #[test]
    fn test_strip_removes_emptied_combinators() {
        let mut raw = json!({"plan": [
            search_step(json!({"filters": {"$and": [{"year": {"$gt": 2}}, {"grade": {"$lt": 75}}]}})),
            finish()
        ]});
        let plan = validator().validate(&mut raw).unwrap();
        assert!(!plan.steps[0].tool_call.parameters.contains_key("filters"));
    }

    #[test]
    fn test_untouched_filters_keep_sort_and_limit() {
        let mut raw = json!({"plan": [
            search_step(json!({"filters": {"program": {"$in": ["BSCS"]}}, "limit": 5})),
            finish()
        ]});
        let plan = validator().validate(&mut raw).unwrap();
        assert_eq!(plan.steps[0].tool_call.parameters["limit"], json!(5));
    }

    #[test]
    fn test_non_search_tools_are_not_repaired() {
        let mut raw = json!({"plan": [
            {"tool_call": {"tool_name": "resolve_person",
                "parameters": {"person_name": "Lee", "filters": {"x": {"$gt": 1}}}}},
            finish()
        ]});
        let plan = validator().validate(&mut raw).unwrap();
        assert_eq!(
            plan.steps[0].tool_call.parameters["filters"],
            json!({"x": {"$gt": 1}})
        );
    }
}
