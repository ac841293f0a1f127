//! Plan wire format: `{"plan": [{"step", "thought", "tool_call": {...}}, ...]}`.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Sentinel tool name that terminates every plan.
pub const FINISH_PLAN: &str = "finish_plan";

/// A named tool invocation proposed by the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool_name: String,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub parameters: Map<String, Value>,
}

impl ToolCall {
    pub fn new(tool_name: impl Into<String>, parameters: Map<String, Value>) -> Self {
        Self {
            tool_name: tool_name.into(),
            parameters,
        }
    }

    pub fn finish() -> Self {
        Self::new(FINISH_PLAN, Map::new())
    }

    pub fn is_finish(&self) -> bool {
        self.tool_name == FINISH_PLAN
    }
}

/// One entry in a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    #[serde(rename = "step", default)]
    pub index: usize,
    #[serde(rename = "thought", default)]
    pub rationale: String,
    pub tool_call: ToolCall,
}

/// An ordered sequence of steps ending with [`FINISH_PLAN`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Plan {
    #[serde(rename = "plan")]
    pub steps: Vec<Step>,
}

impl Plan {
    /// Wrap a single planner tool call into a two-step plan.
    pub fn single(call: ToolCall, rationale: impl Into<String>) -> Self {
        Self {
            steps: vec![
                Step {
                    index: 1,
                    rationale: rationale.into(),
                    tool_call: call,
                },
                Step {
                    index: 2,
                    rationale: String::new(),
                    tool_call: ToolCall::finish(),
                },
            ],
        }
    }

    /// Steps that invoke a real tool (everything but the finish sentinel).
    pub fn tool_steps(&self) -> impl Iterator<Item = &Step> {
        self.steps.iter().filter(|s| !s.tool_call.is_finish())
    }

    pub fn is_terminated(&self) -> bool {
        self.steps.last().is_some_and(|s| s.tool_call.is_finish())
    }

    /// Keep the planner's step numbers when they are positive and strictly
    /// increasing, since placeholders refer to them. Otherwise (missing,
    /// zero-based, repeated or out of order) number every step by position.
    pub fn normalize_indices(&mut self) {
        let usable = self.steps.first().is_some_and(|s| s.index > 0)
            && self.steps.windows(2).all(|w| w[0].index < w[1].index);
        if usable {
            return;
        }
        for (pos, step) in self.steps.iter_mut().enumerate() {
            step.index = pos + 1;
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Map<String, Value>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Map<String, Value>>::deserialize(deserializer)?.unwrap_or_default())
}
