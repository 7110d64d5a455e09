//! Agent module - core agent logic.
//!
//! This module contains:
//! - Message types exchanged with callers and persisted to history
//! - The provider-agnostic chat contract and its adapters
//! - The agent loop (controller state machine)
//! - Context builder for the system prompt
//!
//! # Adding a New LLM Provider
//!
//! See [`llm::ProviderRegistry`] for instructions.

mod context;
mod loop_impl;
mod message;

// LLM providers in submodule
pub mod llm;

// Re-exports for convenience
pub use context::Context;
pub use llm::{Chat, ChatLogger, LlmClient, ProviderRegistry, RetryPolicy};
pub use loop_impl::{AgentHandle, AgentLoop, AgentOptions};
pub use message::{
    AgentState, InboundMessage, Message, MessageSource, MessageType, ToolCallRequest,
    ToolCallResponse, UserChoiceOption, UserChoiceRequest,
};
