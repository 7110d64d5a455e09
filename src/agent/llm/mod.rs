//! LLM chat abstraction layer.
//!
//! This module provides:
//! - [`Chat`] trait: one stateful conversation with a provider
//! - [`LlmClient`] trait: starts chats for a provider
//! - [`ProviderRegistry`] for dynamic provider creation
//! - Concrete adapters: OpenAI Responses, OpenAI-compatible chat
//!   completions (streaming), Gemini
//! - [`ChatLogger`] decorator that records every turn
//!
//! # Adding a New Provider
//!
//! 1. Create a new file (e.g., `anthropic.rs`)
//! 2. Implement `LlmClient` and `Chat`, mapping native output onto
//!    [`Part::Text`] / [`Part::FunctionCalls`]
//! 3. Add to `ProviderRegistry::create()`

mod types;

pub mod chat_logger;
pub mod gemini;
pub mod openai_compat;
pub mod openai_response;
pub mod retry;

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::agent::message::Message;
use crate::config::Config;
use crate::error::Error;
use crate::journal::JournalingClient;
use crate::Result;

pub use chat_logger::ChatLogger;
pub use gemini::GeminiClient;
pub use openai_compat::OpenAiCompatClient;
pub use openai_response::OpenAiResponseClient;
pub use retry::{default_is_retryable_error, RetryPolicy};
pub use types::*;

/// A streamed model turn: finite, single-consumer, not restartable.
pub type ChatResponseStream = BoxStream<'static, Result<ChatResponse>>;

/// One conversation with a model provider.
///
/// The chat owns the provider-native history. Every call to
/// [`Chat::send_streaming`] appends the given contents and the model's
/// reply to that history.
#[async_trait]
pub trait Chat: Send {
    /// Replace the active tool schema.
    fn set_function_definitions(&mut self, definitions: &[FunctionDefinition]) -> Result<()>;

    /// Non-streaming turn. Providers that only stream return
    /// [`Error::Unsupported`].
    async fn send(&mut self, contents: Vec<Content>) -> Result<ChatResponse> {
        let _ = contents;
        Err(Error::Unsupported)
    }

    /// Start a turn and stream the model output.
    async fn send_streaming(&mut self, contents: Vec<Content>) -> Result<ChatResponseStream>;

    /// Reset provider history from persisted messages (best-effort).
    fn initialize(&mut self, history: &[Message]) -> Result<()>;

    /// Whether `err` is transient and the turn may be retried.
    fn is_retryable_error(&self, err: &Error) -> bool {
        default_is_retryable_error(err)
    }
}

/// LLM client trait - swappable provider abstraction.
pub trait LlmClient: Send + Sync {
    /// Start a new conversation.
    fn start_chat(&self, system_prompt: &str, model: &str) -> Box<dyn Chat>;

    /// Provider identifier recorded in session metadata.
    fn provider_id(&self) -> &str;

    /// Get the default model for this provider.
    fn default_model(&self) -> &str;
}

/// Provider registry - creates LLM clients dynamically.
///
/// # Example
///
/// ```ignore
/// let client = ProviderRegistry::create(&config, JournalingClient::default())?;
/// let mut chat = client.start_chat(&prompt, &config.model);
/// ```
pub struct ProviderRegistry;

impl ProviderRegistry {
    /// Create an LLM client from configuration.
    ///
    /// Supported providers:
    /// - `"openai"`: OpenAI Responses API
    /// - `"openai-compat"`: any Chat Completions endpoint, streamed
    /// - `"gemini"`: Gemini `generateContent`
    pub fn create(config: &Config, transport: JournalingClient) -> Result<Arc<dyn LlmClient>> {
        let api_key = config.resolve_api_key();
        match config.provider.as_str() {
            "openai" => Ok(Arc::new(OpenAiResponseClient::new(
                transport,
                &api_key,
                config.base_url.as_deref(),
                &config.model,
            ))),
            "openai-compat" => Ok(Arc::new(OpenAiCompatClient::new(
                transport,
                &api_key,
                config.base_url.as_deref(),
                &config.model,
            ))),
            "gemini" => Ok(Arc::new(GeminiClient::new(
                transport,
                &api_key,
                config.base_url.as_deref(),
                &config.model,
            ))),
            other => Err(Error::Config(format!("Unknown provider: {other}"))),
        }
    }

    /// List available provider names.
    pub fn available() -> &'static [&'static str] {
        &["openai", "openai-compat", "gemini"]
    }
}

#[cfg(test)]
pub use fake::{FakeChatState, FakeLlmClient, FakeTurn};


#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;

    #[tokio::test]
    async fn test_fake_llm_client() {
        let client = FakeLlmClient::with_texts(vec!["Hello!", "World!"]);
        let mut chat = client.start_chat("", "fake-model");

        let mut turn = chat.send_streaming(vec![Content::text("hi")]).await.unwrap();
        let resp1 = turn.next().await.unwrap().unwrap();
        assert_eq!(resp1.candidates[0].parts[0].as_text(), Some("Hello!"));
        assert!(turn.next().await.is_none());

        let mut turn = chat.send_streaming(vec![]).await.unwrap();
        let resp2 = turn.next().await.unwrap().unwrap();
        assert_eq!(resp2.candidates[0].parts[0].as_text(), Some("World!"));
        assert_eq!(client.state().send_calls(), 2);
    }

    #[tokio::test]
    async fn test_default_send_is_unsupported() {
        let client = FakeLlmClient::with_texts(vec![]);
        let mut chat = client.start_chat("", "fake-model");
        let err = chat.send(vec![Content::text("hi")]).await.unwrap_err();
        assert!(matches!(err, Error::Unsupported));
    }

    #[test]
    fn test_registry_rejects_unknown_provider() {
        let config = Config {
            provider: "nope".to_string(),
            ..Config::default()
        };
        let err = ProviderRegistry::create(&config, JournalingClient::default()).err();
        assert!(matches!(err, Some(Error::Config(_))));
    }
}
