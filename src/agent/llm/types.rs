//! Provider-agnostic chat types.
//!
//! Every adapter maps its native output onto [`ChatResponse`] /
//! [`Candidate`] / [`Part`] before the agent loop sees it.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// Tool schema handed to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionDefinition {
    pub name: String,
    pub description: String,
    /// JSON Schema for the arguments object.
    pub parameters: Value,
}

/// A model-requested tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCall {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

impl FunctionCall {
    /// Build a call from the model's raw argument string.
    ///
    /// Arguments that are not a JSON object decode to an empty map; the
    /// tool validates what it needs.
    pub fn from_raw(id: impl Into<String>, name: impl Into<String>, raw_arguments: &str) -> Self {
        let name = name.into();
        let arguments = parse_arguments(&name, raw_arguments);
        Self {
            id: id.into(),
            name,
            arguments,
        }
    }
}

/// Decode a raw argument string into a key/value map.
pub fn parse_arguments(function: &str, raw: &str) -> Map<String, Value> {
    if raw.trim().is_empty() {
        return Map::new();
    }
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            debug!(function, "arguments are not an object: {}", other);
            Map::new()
        }
        Err(e) => {
            debug!(function, "failed to decode arguments: {}", e);
            Map::new()
        }
    }
}

/// Result of one tool invocation, sent back to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FunctionCallResult {
    pub id: String,
    pub name: String,
    pub result: Value,
}

/// One item of input for a model turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Content {
    Text { text: String },
    FunctionResult(FunctionCallResult),
}

impl Content {
    pub fn text(text: impl Into<String>) -> Self {
        Content::Text { text: text.into() }
    }
}

/// One piece of a candidate: either text or function calls, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Part {
    Text { text: String },
    FunctionCalls { calls: Vec<FunctionCall> },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Part::Text { text: text.into() }
    }

    pub fn function_calls(calls: Vec<FunctionCall>) -> Self {
        Part::FunctionCalls { calls }
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Part::Text { text } => Some(text),
            Part::FunctionCalls { .. } => None,
        }
    }

    pub fn as_function_calls(&self) -> Option<&[FunctionCall]> {
        match self {
            Part::FunctionCalls { calls } => Some(calls),
            Part::Text { .. } => None,
        }
    }
}

/// One model output item for a turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub parts: Vec<Part>,
}

/// Token usage information.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

/// One element of a streamed turn.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatResponse {
    pub candidates: Vec<Candidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl ChatResponse {
    /// A single-candidate response.
    pub fn with_parts(parts: Vec<Part>) -> Self {
        Self {
            candidates: vec![Candidate { parts }],
            usage: None,
        }
    }

    /// Create a simple text response.
    pub fn text(text: impl Into<String>) -> Self {
        Self::with_parts(vec![Part::text(text)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_arguments_object() {
        let args = parse_arguments("kubectl", r#"{"command":"kubectl get pods"}"#);
        assert_eq!(args.get("command"), Some(&json!("kubectl get pods")));
    }

    #[test]
    fn test_parse_arguments_degrades_to_empty() {
        assert!(parse_arguments("kubectl", "{not json").is_empty());
        assert!(parse_arguments("kubectl", "[1,2]").is_empty());
        assert!(parse_arguments("kubectl", "").is_empty());
    }

    #[test]
    fn test_part_is_text_or_calls() {
        let text = Part::text("hi");
        assert_eq!(text.as_text(), Some("hi"));
        assert!(text.as_function_calls().is_none());

        let calls = Part::function_calls(vec![FunctionCall::from_raw("1", "get_pods", "{}")]);
        assert!(calls.as_text().is_none());
        assert_eq!(calls.as_function_calls().map(|c| c.len()), Some(1));
    }
}
