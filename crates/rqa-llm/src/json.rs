//! Pull a JSON object out of model output.
//!
//! Models wrap JSON in `<think>` blocks, `<solution>` tags, Markdown fences
//! or a sentence of prose, whatever the prompt says.

use serde::de::DeserializeOwned;

/// Remove `<think>...</think>` blocks. An unclosed block truncates the text.
pub fn strip_think_blocks(text: &str) -> String {
    let mut result = text.to_string();
    while let Some(start) = result.find("<think>") {
        if let Some(end_offset) = result[start..].find("</think>") {
            let end = start + end_offset + "</think>".len();
            result.replace_range(start..end, "");
        } else {
            result.truncate(start);
            break;
        }
    }
    result
}

fn between<'a>(text: &'a str, open: &str, close: &str) -> Option<&'a str> {
    let start = text.find(open)? + open.len();
    let end = text[start..].find(close)?;
    Some(text[start..start + end].trim())
}

/// The JSON text inside a model reply.
pub fn extract_json(text: &str) -> String {
    let text = strip_think_blocks(text);
    if let Some(inner) = between(&text, "<solution>", "</solution>") {
        return inner.to_string();
    }
    let trimmed = text.trim();
    if trimmed.starts_with('{') || trimmed.starts_with('[') {
        return trimmed.to_string();
    }
    if let Some(inner) = between(&text, "```json", "```").or_else(|| between(&text, "```", "```")) {
        return inner.to_string();
    }
    // Prose around a bare object: take the outermost braces.
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if start < end => trimmed[start..=end].to_string(),
        _ => trimmed.to_string(),
    }
}

/// Extract and deserialize the JSON in a model reply.
pub fn parse_json_response<T: DeserializeOwned>(text: &str) -> Result<T, serde_json::Error> {
    serde_json::from_str(&extract_json(text))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::{Value, json};

    #[test]
    fn test_plain_object() {
        let v: Value = parse_json_response(r#"{"tool_name": "search_database"}"#).unwrap();
        assert_eq!(v["tool_name"], "search_database");
    }

    #[test]
    fn test_think_block_and_fence() {
        let text = "<think>the user wants a schedule</think>\nHere you go:\n```json\n{\"tool_name\": \"get_person_schedule\"}\n```";
        let v: Value = parse_json_response(text).unwrap();
        assert_eq!(v, json!({"tool_name": "get_person_schedule"}));
    }

    #[test]
    fn test_solution_tags() {
        let v: Value = parse_json_response("<solution>{\"a\": 1}</solution> done").unwrap();
        assert_eq!(v, json!({"a": 1}));
    }

    #[test]
    fn test_prose_around_object() {
        let v: Value =
            parse_json_response("Sure! {\"tool_name\": \"list_people\", \"parameters\": {}} Hope that helps.")
                .unwrap();
        assert_eq!(v["tool_name"], "list_people");
    }

    #[test]
    fn test_unclosed_think_block_truncates() {
        assert_eq!(strip_think_blocks("{}<think>never ends"), "{}");
    }

    #[test]
    fn test_garbage_fails() {
        assert!(parse_json_response::<Value>("I cannot help with that.").is_err());
    }
}
