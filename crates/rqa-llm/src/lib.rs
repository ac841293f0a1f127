//! Language model access for rqa.
//!
//! [`provider`] speaks to chat APIs over blocking HTTP. [`client`] picks the
//! provider for a phase, retries, and never fails. [`json`] pulls the JSON
//! object out of a chatty model reply.

pub mod client;
pub mod json;
pub mod provider;

pub use client::{ChatRequest, LLM_UNAVAILABLE_MESSAGE, LanguageModel, LanguageModelClient};
pub use provider::{ChatMessage, LlmProvider, ProviderError, Role};
