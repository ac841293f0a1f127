//! Chat model providers.
//!
//! Supports the Anthropic Messages API and OpenAI-compatible chat completions
//! (OpenAI itself, Ollama, and other local servers). Uses blocking HTTP via
//! `ureq`, one request per call, bounded by the configured timeout.

use rqa_core::config::ModelProfile;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

/// Errors from provider calls.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("HTTP request failed: {0}")]
    Http(String),
    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
    #[error("response parse error: {0}")]
    Parse(String),
    #[error("empty response from LLM")]
    EmptyResponse,
    #[error("environment variable {0} is not set")]
    MissingApiKey(String),
    #[error("unknown provider: '{name}'. Available: {available}")]
    UnknownProvider { name: String, available: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
        }
    }
}

/// One chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// A completed chat response.
#[derive(Debug, Clone)]
pub struct LlmResponse {
    pub text: String,
    /// Input tokens used (from API response, if reported).
    pub input_tokens: Option<u64>,
    /// Output tokens used (from API response, if reported).
    pub output_tokens: Option<u64>,
}

/// Abstraction over chat API providers.
pub trait LlmProvider: Send + Sync {
    /// Send the conversation and return the assistant reply.
    fn complete(&self, messages: &[ChatMessage]) -> Result<LlmResponse, ProviderError>;

    /// The model name (for display/logging).
    fn model_name(&self) -> &str;

    fn provider_name(&self) -> &str;
}

fn http_agent(timeout: Duration) -> ureq::Agent {
    ureq::Agent::new_with_config(
        ureq::config::Config::builder()
            .timeout_global(Some(timeout))
            .build(),
    )
}

fn transport_error(err: ureq::Error) -> ProviderError {
    match err {
        ureq::Error::StatusCode(status) => ProviderError::Api {
            status,
            message: format!("HTTP status {}", status),
        },
        other => ProviderError::Http(other.to_string()),
    }
}

fn api_error(json: &Value) -> Option<ProviderError> {
    let err = json.get("error")?;
    let message = err
        .get("message")
        .and_then(Value::as_str)
        .or_else(|| err.as_str())
        .unwrap_or("unknown error");
    Some(ProviderError::Api {
        status: 400,
        message: message.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Anthropic Messages API
// ---------------------------------------------------------------------------

/// Anthropic provider using the Messages API.
#[cfg(feature = "anthropic")]
pub struct AnthropicProvider {
    api_key: String,
    model: String,
    max_tokens: u32,
    temperature: Option<f64>,
    agent: ureq::Agent,
}

#[cfg(feature = "anthropic")]
impl AnthropicProvider {
    pub const DEFAULT_MODEL: &str = "claude-haiku-4-5-20251001";
    const API_URL: &str = "https://api.anthropic.com/v1/messages";

    pub fn new(api_key: String, profile: &ModelProfile, timeout: Duration) -> Self {
        let model = if profile.model.is_empty() {
            Self::DEFAULT_MODEL.to_string()
        } else {
            profile.model.clone()
        };
        Self {
            api_key,
            model,
            max_tokens: profile.max_tokens,
            temperature: profile.temperature,
            agent: http_agent(timeout),
        }
    }
}

#[cfg(feature = "anthropic")]
impl LlmProvider for AnthropicProvider {
    fn complete(&self, messages: &[ChatMessage]) -> Result<LlmResponse, ProviderError> {
        // The Messages API takes the system prompt out of band.
        let system = messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str())
            .collect::<Vec<_>>()
            .join("\n\n");
        let turns: Vec<Value> = messages
            .iter()
            .filter(|m| m.role != Role::System)
            .map(|m| serde_json::json!({"role": m.role.as_str(), "content": m.content}))
            .collect();

        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "system": system,
            "messages": turns,
        });
        if let Some(t) = self.temperature {
            body["temperature"] = serde_json::json!(t);
        }

        let mut response = self
            .agent
            .post(Self::API_URL)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", "2023-06-01")
            .header("content-type", "application/json")
            .send_json(&body)
            .map_err(transport_error)?;

        let json: Value = response
            .body_mut()
            .read_json()
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        if let Some(err) = api_error(&json) {
            return Err(err);
        }

        let text = json
            .get("content")
            .and_then(Value::as_array)
            .and_then(|arr| {
                arr.iter()
                    .find_map(|block| block.get("text").and_then(Value::as_str))
            })
            .filter(|t| !t.trim().is_empty())
            .ok_or(ProviderError::EmptyResponse)?
            .to_string();

        let usage = |key: &str| {
            json.get("usage")
                .and_then(|u| u.get(key))
                .and_then(Value::as_u64)
        };
        Ok(LlmResponse {
            text,
            input_tokens: usage("input_tokens"),
            output_tokens: usage("output_tokens"),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &str {
        "anthropic"
    }
}

// ---------------------------------------------------------------------------
// OpenAI-compatible Chat Completions API
// ---------------------------------------------------------------------------

/// OpenAI-compatible provider (OpenAI, Ollama, local proxies).
#[cfg(feature = "openai")]
pub struct OpenAiProvider {
    label: &'static str,
    api_key: Option<String>,
    model: String,
    base_url: String,
    max_tokens: u32,
    temperature: Option<f64>,
    agent: ureq::Agent,
}

#[cfg(feature = "openai")]
impl OpenAiProvider {
    pub const DEFAULT_MODEL: &str = "gpt-4o-mini";
    pub const DEFAULT_BASE_URL: &str = "https://api.openai.com";
    pub const OLLAMA_BASE_URL: &str = "http://localhost:11434";

    pub fn new(api_key: String, profile: &ModelProfile, timeout: Duration) -> Self {
        Self::build("openai", Some(api_key), profile, Self::DEFAULT_BASE_URL, timeout)
    }

    /// Ollama's OpenAI-compatible endpoint. No API key.
    pub fn ollama(profile: &ModelProfile, timeout: Duration) -> Self {
        Self::build("ollama", None, profile, Self::OLLAMA_BASE_URL, timeout)
    }

    fn build(
        label: &'static str,
        api_key: Option<String>,
        profile: &ModelProfile,
        default_base: &str,
        timeout: Duration,
    ) -> Self {
        let model = if profile.model.is_empty() {
            Self::DEFAULT_MODEL.to_string()
        } else {
            profile.model.clone()
        };
        Self {
            label,
            api_key,
            model,
            base_url: profile
                .base_url
                .clone()
                .unwrap_or_else(|| default_base.to_string()),
            max_tokens: profile.max_tokens,
            temperature: profile.temperature,
            agent: http_agent(timeout),
        }
    }
}

#[cfg(feature = "openai")]
impl LlmProvider for OpenAiProvider {
    fn complete(&self, messages: &[ChatMessage]) -> Result<LlmResponse, ProviderError> {
        let url = format!(
            "{}/v1/chat/completions",
            self.base_url.trim_end_matches('/')
        );

        let mut body = serde_json::json!({
            "model": self.model,
            "max_tokens": self.max_tokens,
            "messages": messages,
        });
        if let Some(t) = self.temperature {
            body["temperature"] = serde_json::json!(t);
        }

        let mut request = self.agent.post(&url).header("content-type", "application/json");
        if let Some(ref key) = self.api_key {
            request = request.header("Authorization", &format!("Bearer {}", key));
        }
        let mut response = request.send_json(&body).map_err(transport_error)?;

        let json: Value = response
            .body_mut()
            .read_json()
            .map_err(|e| ProviderError::Parse(e.to_string()))?;

        if let Some(err) = api_error(&json) {
            return Err(err);
        }

        let text = json
            .get("choices")
            .and_then(Value::as_array)
            .and_then(|arr| arr.first())
            .and_then(|choice| choice.pointer("/message/content"))
            .and_then(Value::as_str)
            .filter(|t| !t.trim().is_empty())
            .ok_or(ProviderError::EmptyResponse)?
            .to_string();

        let usage = |key: &str| {
            json.get("usage")
                .and_then(|u| u.get(key))
                .and_then(Value::as_u64)
        };
        Ok(LlmResponse {
            text,
            input_tokens: usage("prompt_tokens"),
            output_tokens: usage("completion_tokens"),
        })
    }

    fn model_name(&self) -> &str {
        &self.model
    }

    fn provider_name(&self) -> &str {
        self.label
    }
}

/// Read the profile's API key from its environment variable.
fn api_key(profile: &ModelProfile, default_env: &str) -> Result<String, ProviderError> {
    let var = profile.api_key_env.as_deref().unwrap_or(default_env);
    std::env::var(var)
        .ok()
        .filter(|k| !k.trim().is_empty())
        .ok_or_else(|| ProviderError::MissingApiKey(var.to_string()))
}

/// Create a provider for a configured model profile.
pub fn create_provider(
    profile: &ModelProfile,
    timeout: Duration,
) -> Result<Box<dyn LlmProvider>, ProviderError> {
    match profile.provider.trim().to_lowercase().as_str() {
        #[cfg(feature = "anthropic")]
        "anthropic" => Ok(Box::new(AnthropicProvider::new(
            api_key(profile, "ANTHROPIC_API_KEY")?,
            profile,
            timeout,
        ))),
        #[cfg(feature = "openai")]
        "openai" => Ok(Box::new(OpenAiProvider::new(
            api_key(profile, "OPENAI_API_KEY")?,
            profile,
            timeout,
        ))),
        #[cfg(feature = "openai")]
        "ollama" | "local" => Ok(Box::new(OpenAiProvider::ollama(profile, timeout))),
        other => Err(ProviderError::UnknownProvider {
            name: other.to_string(),
            available: available_providers().join(", "),
        }),
    }
}

/// List compiled-in provider names.
pub fn available_providers() -> Vec<&'static str> {
    vec![
        #[cfg(feature = "anthropic")]
        "anthropic",
        #[cfg(feature = "openai")]
        "openai",
        #[cfg(feature = "openai")]
        "ollama",
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_provider() {
        let profile = ModelProfile {
            provider: "carrier-pigeon".into(),
            ..ModelProfile::default()
        };
        let err = create_provider(&profile, Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(err.to_string().contains("carrier-pigeon"));
    }

    #[cfg(feature = "openai")]
    #[test]
    fn test_ollama_needs_no_key() {
        let provider = create_provider(&ModelProfile::local(), Duration::from_secs(1)).unwrap();
        assert_eq!(provider.provider_name(), "ollama");
        assert_eq!(provider.model_name(), "qwen2.5:7b-instruct");
    }

    #[cfg(feature = "openai")]
    #[test]
    fn test_missing_api_key_is_reported() {
        let profile = ModelProfile {
            api_key_env: Some("RQA_TEST_KEY_THAT_IS_NEVER_SET".into()),
            ..ModelProfile::default()
        };
        let err = create_provider(&profile, Duration::from_secs(1))
            .err()
            .unwrap();
        assert!(matches!(err, ProviderError::MissingApiKey(var) if var == "RQA_TEST_KEY_THAT_IS_NEVER_SET"));
    }

    #[test]
    fn test_message_wire_shape() {
        let msg = ChatMessage::assistant("hi");
        assert_eq!(
            serde_json::to_value(&msg).unwrap(),
            serde_json::json!({"role": "assistant", "content": "hi"})
        );
    }
}
