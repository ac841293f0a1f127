//! The retrying, never-failing language model client.

use crate::provider::{ChatMessage, LlmProvider, ProviderError, create_provider};
use rqa_core::config::{LlmConfig, Phase};
use rqa_core::session::Turn;
use std::time::Duration;

/// Returned when every attempt failed. Starts with the `[error]` marker.
pub const LLM_UNAVAILABLE_MESSAGE: &str =
    "[error] I'm sorry, the language model is unavailable right now. Please try again in a moment.";

/// Appended to the system prompt when a JSON reply is required.
pub const JSON_MODE_INSTRUCTION: &str = "Respond with a single raw JSON object only. \
Do not add explanations, prose, or Markdown code fences.";

/// Prefix of every reply produced by the client itself rather than a model.
pub const ERROR_MARKER: &str = "[error]";

/// True for the error-marked text the client returns on exhaustion.
pub fn is_unavailable(text: &str) -> bool {
    text.trim_start().starts_with(ERROR_MARKER)
}

/// The reply as a user should read it, without the `[error]` marker.
pub fn strip_error_marker(text: &str) -> &str {
    text.trim_start()
        .strip_prefix(ERROR_MARKER)
        .map_or(text, str::trim_start)
}

/// One request to the model.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub system: String,
    pub user: String,
    pub json_mode: bool,
    pub history: Vec<Turn>,
    /// Overrides the configured retry budget.
    pub retries: Option<usize>,
    pub phase: Phase,
}

impl ChatRequest {
    pub fn new(phase: Phase, system: impl Into<String>, user: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            user: user.into(),
            json_mode: false,
            history: Vec::new(),
            retries: None,
            phase,
        }
    }

    #[must_use]
    pub fn json(mut self) -> Self {
        self.json_mode = true;
        self
    }

    #[must_use]
    pub fn with_history(mut self, history: &[Turn]) -> Self {
        self.history = history.to_vec();
        self
    }

    #[must_use]
    pub fn with_retries(mut self, retries: usize) -> Self {
        self.retries = Some(retries);
        self
    }

    /// System message, then each history turn as a user/assistant pair, then the user message.
    pub fn messages(&self) -> Vec<ChatMessage> {
        let system = if self.json_mode {
            format!("{}\n\n{}", self.system.trim_end(), JSON_MODE_INSTRUCTION)
        } else {
            self.system.clone()
        };
        let mut messages = Vec::with_capacity(self.history.len() * 2 + 2);
        messages.push(ChatMessage::system(system));
        for turn in &self.history {
            messages.push(ChatMessage::user(turn.query.as_str()));
            messages.push(ChatMessage::assistant(turn.answer.as_str()));
        }
        messages.push(ChatMessage::user(self.user.as_str()));
        messages
    }
}

/// What the orchestrator needs from a language model: text in, text out, no errors.
pub trait LanguageModel: Send + Sync {
    fn execute(&self, request: &ChatRequest) -> String;
}

/// Per-phase providers for the configured mode, with fixed-delay retries.
pub struct LanguageModelClient {
    planner: Box<dyn LlmProvider>,
    synth: Box<dyn LlmProvider>,
    retries: usize,
    retry_delay: Duration,
}

impl LanguageModelClient {
    /// Build the planner and synth providers for the active mode.
    pub fn from_config(config: &LlmConfig) -> Result<Self, ProviderError> {
        let timeout = Duration::from_secs(config.timeout_secs);
        Ok(Self {
            planner: create_provider(config.profile(Phase::Planner), timeout)?,
            synth: create_provider(config.profile(Phase::Synth), timeout)?,
            retries: config.retries,
            retry_delay: Duration::from_millis(config.retry_delay_ms),
        })
    }

    pub fn with_providers(
        planner: Box<dyn LlmProvider>,
        synth: Box<dyn LlmProvider>,
        retries: usize,
        retry_delay: Duration,
    ) -> Self {
        Self {
            planner,
            synth,
            retries,
            retry_delay,
        }
    }

    pub fn provider(&self, phase: Phase) -> &dyn LlmProvider {
        match phase {
            Phase::Planner => self.planner.as_ref(),
            Phase::Synth => self.synth.as_ref(),
        }
    }

    fn call_with_retry(
        &self,
        provider: &dyn LlmProvider,
        messages: &[ChatMessage],
        max_retries: usize,
    ) -> Result<String, ProviderError> {
        let mut last_err = ProviderError::EmptyResponse;
        for attempt in 0..=max_retries {
            match provider.complete(messages) {
                Ok(response) => {
                    tracing::debug!(
                        "{} replied ({} in / {} out tokens)",
                        provider.model_name(),
                        response.input_tokens.unwrap_or(0),
                        response.output_tokens.unwrap_or(0)
                    );
                    return Ok(response.text);
                }
                Err(e) => {
                    tracing::warn!(
                        "LLM call attempt {} of {} failed: {}",
                        attempt + 1,
                        max_retries + 1,
                        e
                    );
                    last_err = e;
                    if attempt < max_retries && !self.retry_delay.is_zero() {
                        std::thread::sleep(self.retry_delay);
                    }
                }
            }
        }
        Err(last_err)
    }
}

impl LanguageModel for LanguageModelClient {
    fn execute(&self, request: &ChatRequest) -> String {
        let provider = self.provider(request.phase);
        let retries = request.retries.unwrap_or(self.retries);
        match self.call_with_retry(provider, &request.messages(), retries) {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(
                    "{} phase: {} ({}) unavailable: {}",
                    request.phase.as_str(),
                    provider.provider_name(),
                    provider.model_name(),
                    e
                );
                LLM_UNAVAILABLE_MESSAGE.to_string()
            }
        }
    }
}
