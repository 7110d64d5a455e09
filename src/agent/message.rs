//! Message types exchanged between the agent and its caller

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageSource {
    User,
    Agent,
    Model,
}

/// What kind of content a message carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MessageType {
    Text,
    Error,
    UserInputRequest,
    UserChoiceRequest,
    ToolCallRequest,
    ToolCallResponse,
    /// Raw request recorded by the chat logger.
    ChatRequest,
    /// Raw response recorded by the chat logger.
    ChatResponse,
}

/// One unit of conversation.
///
/// Messages are immutable once persisted; ordering is append order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub source: MessageSource,
    #[serde(rename = "type")]
    pub message_type: MessageType,
    #[serde(default)]
    pub payload: Value,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    pub fn new(source: MessageSource, message_type: MessageType, payload: Value) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source,
            message_type,
            payload,
            timestamp: Utc::now(),
        }
    }

    /// Create a plain text message
    pub fn text(source: MessageSource, text: impl Into<String>) -> Self {
        Self::new(source, MessageType::Text, Value::String(text.into()))
    }

    /// Create an error text message from the agent
    pub fn error(text: impl Into<String>) -> Self {
        Self::new(MessageSource::Agent, MessageType::Error, Value::String(text.into()))
    }

    /// Create a prompt asking the caller for the next query
    pub fn input_request(prompt: impl Into<String>) -> Self {
        Self::new(
            MessageSource::Agent,
            MessageType::UserInputRequest,
            Value::String(prompt.into()),
        )
    }

    pub fn choice_request(request: &UserChoiceRequest) -> Self {
        Self::new(
            MessageSource::Agent,
            MessageType::UserChoiceRequest,
            serde_json::to_value(request).unwrap_or(Value::Null),
        )
    }

    pub fn tool_call_request(request: &ToolCallRequest) -> Self {
        Self::new(
            MessageSource::Agent,
            MessageType::ToolCallRequest,
            serde_json::to_value(request).unwrap_or(Value::Null),
        )
    }

    pub fn tool_call_response(response: &ToolCallResponse) -> Self {
        Self::new(
            MessageSource::Agent,
            MessageType::ToolCallResponse,
            serde_json::to_value(response).unwrap_or(Value::Null),
        )
    }

    /// Payload as text, if it is a string
    pub fn payload_text(&self) -> Option<&str> {
        self.payload.as_str()
    }

    /// Decode the payload into a typed value.
    pub fn payload_as<T: serde::de::DeserializeOwned>(&self) -> Option<T> {
        serde_json::from_value(self.payload.clone()).ok()
    }
}

/// One selectable option of a choice request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserChoiceOption {
    pub value: String,
    pub label: String,
}

/// Payload of a `user-choice-request` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserChoiceRequest {
    pub prompt: String,
    pub options: Vec<UserChoiceOption>,
}

/// Payload of a `tool-call-request` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub arguments: Map<String, Value>,
    pub description: String,
}

/// Payload of a `tool-call-response` message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResponse {
    pub id: String,
    pub name: String,
    pub result: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub declined: bool,
}

/// Everything a caller may send to the agent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundMessage {
    /// A free-text query or meta-command.
    UserInput { query: String },
    /// Answer to a choice request, 1-based.
    UserChoice { choice: usize },
}

impl InboundMessage {
    pub fn query(query: impl Into<String>) -> Self {
        Self::UserInput { query: query.into() }
    }

    pub fn choice(choice: usize) -> Self {
        Self::UserChoice { choice }
    }
}

/// Lifecycle state of the agent loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AgentState {
    #[default]
    Idle,
    Greeting,
    WaitingForInput,
    Processing,
    WaitingForApproval,
    Done,
    Error,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Idle => "idle",
            AgentState::Greeting => "greeting",
            AgentState::WaitingForInput => "waiting-for-input",
            AgentState::Processing => "processing",
            AgentState::WaitingForApproval => "waiting-for-approval",
            AgentState::Done => "done",
            AgentState::Error => "error",
        }
    }

    /// True once the loop has stopped for good.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AgentState::Done)
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
