//! Prompt templates for the planner and synthesis phases.

use crate::registry::ToolRegistry;
use rqa_core::config::PlanningMode;
use rqa_core::schema::SchemaAliasMap;

/// Planner prompt for one tool call per turn.
const PLANNER_SINGLE_SYSTEM: &str = include_str!("prompts/planner_single.md");

/// Planner prompt for multi-step plans with placeholders.
const PLANNER_PLAN_SYSTEM: &str = include_str!("prompts/planner_plan.md");

/// Synthesis prompt: answer from evidence, cite collections, hide errors.
pub const SYNTH_SYSTEM: &str = include_str!("prompts/synthesis.md");

/// Planner system prompt with the tool catalogue and field spellings filled in.
pub fn planner_system(mode: PlanningMode, registry: &ToolRegistry, aliases: &SchemaAliasMap) -> String {
    let template = match mode {
        PlanningMode::Single => PLANNER_SINGLE_SYSTEM,
        PlanningMode::Plan => PLANNER_PLAN_SYSTEM,
    };
    let fields = aliases.summary();
    let fields = if fields.is_empty() {
        "(no records loaded)".to_string()
    } else {
        fields
    };
    template
        .replace("{tools}", &registry.describe())
        .replace("{fields}", &fields)
}

pub fn planner_user(query: &str) -> String {
    format!("Question: {}", query.trim())
}

/// User message for synthesis: the question followed by the evidence JSON.
pub fn synth_user(query: &str, evidence_json: &str) -> String {
    format!(
        "Question: {}\n\nEvidence:\n{}",
        query.trim(),
        evidence_json
    )
}

/// Structured message for a planner that named a tool nobody registered.
pub fn unknown_tool_summary(name: &str, available: &[String]) -> String {
    format!(
        "The request needed a lookup that is not available ('{}'). Available lookups: {}.",
        name,
        available.join(", ")
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use rqa_core::document::Document;

    #[test]
    fn test_planner_prompt_lists_tools_and_fields() {
        let registry = ToolRegistry::with_builtin_tools().unwrap();
        let docs = [Document::new("students", "x").with_meta("yr", "2")];
        let aliases = SchemaAliasMap::from_documents(&docs);
        let prompt = planner_system(PlanningMode::Single, &registry, &aliases);
        assert!(prompt.contains("- get_person_schedule:"));
        assert!(prompt.contains("year_level: yr"));
        assert!(!prompt.contains("{tools}"));
        assert!(!prompt.contains("_from_step_"));
    }

    #[test]
    fn test_plan_prompt_explains_placeholders() {
        let registry = ToolRegistry::with_builtin_tools().unwrap();
        let prompt = planner_system(PlanningMode::Plan, &registry, &SchemaAliasMap::builtin());
        assert!(prompt.contains("$program_from_step_1"));
        assert!(prompt.contains("finish_plan"));
        assert!(prompt.contains("(no records loaded)"));
    }

    #[test]
    fn test_synthesis_prompt_demands_citations() {
        assert!(SYNTH_SYSTEM.contains("source_collection"));
        assert!(synth_user(" hi ", "{}").starts_with("Question: hi\n"));
    }
}
