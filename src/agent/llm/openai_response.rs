//! OpenAI Responses API adapter.
//!
//! The provider returns a list of output items per turn. Messages and
//! function calls become candidates; reasoning items are only folded
//! back into history so the next request carries them.

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{
    Candidate, Chat, ChatResponse, ChatResponseStream, Content, FunctionCall, FunctionDefinition,
    LlmClient, Part, Usage,
};
use crate::agent::message::Message;
use crate::journal::JournalingClient;
use crate::Result;

const OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// OpenAI client for the Responses API.
#[derive(Clone)]
pub struct OpenAiResponseClient {
    transport: JournalingClient,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiResponseClient {
    pub fn new(
        transport: JournalingClient,
        api_key: &str,
        base_url: Option<&str>,
        model: &str,
    ) -> Self {
        Self {
            transport,
            api_key: api_key.to_string(),
            base_url: base_url
                .unwrap_or(OPENAI_API_URL)
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
        }
    }
}

impl LlmClient for OpenAiResponseClient {
    fn start_chat(&self, system_prompt: &str, model: &str) -> Box<dyn Chat> {
        Box::new(OpenAiResponseChat {
            transport: self.transport.clone(),
            url: format!("{}/responses", self.base_url),
            api_key: self.api_key.clone(),
            model: model.to_string(),
            instructions: system_prompt.to_string(),
            history: Vec::new(),
            tools: Vec::new(),
        })
    }

    fn provider_id(&self) -> &str {
        "openai"
    }

    fn default_model(&self) -> &str {
        &self.model
    }
}

/// Provider-native history item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum InputItem {
    Message {
        role: String,
        content: Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<String>,
    },
    FunctionCall {
        call_id: String,
        name: String,
        arguments: String,
    },
    FunctionCallOutput {
        call_id: String,
        output: String,
    },
    Reasoning {
        id: String,
        #[serde(default)]
        summary: Vec<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        encrypted_content: Option<String>,
    },
}

/// Output item of one response.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum OutputItem {
    Message {
        id: String,
        #[serde(default)]
        status: Option<String>,
        #[serde(default)]
        content: Vec<OutputContent>,
    },
    FunctionCall {
        call_id: String,
        name: String,
        #[serde(default)]
        arguments: String,
    },
    Reasoning {
        id: String,
        #[serde(default)]
        summary: Vec<Value>,
        #[serde(default)]
        encrypted_content: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub(crate) enum OutputContent {
    OutputText { text: String },
    Refusal { refusal: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
struct ResponsesApiResponse {
    #[serde(default)]
    output: Vec<OutputItem>,
    #[serde(default)]
    usage: Option<ResponsesUsage>,
}

#[derive(Debug, Deserialize)]
struct ResponsesUsage {
    #[serde(default)]
    input_tokens: u64,
    #[serde(default)]
    output_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

/// Fold one turn's output into history and return the visible candidates.
pub(crate) fn fold_output(history: &mut Vec<InputItem>, output: Vec<OutputItem>) -> Vec<Candidate> {
    let mut candidates = Vec::new();

    for item in output {
        match item {
            OutputItem::Message {
                id,
                status,
                content,
            } => {
                let text: String = content
                    .iter()
                    .filter_map(|c| match c {
                        OutputContent::OutputText { text } => Some(text.as_str()),
                        OutputContent::Refusal { refusal } => Some(refusal.as_str()),
                        OutputContent::Other => None,
                    })
                    .collect();
                history.push(InputItem::Message {
                    role: "assistant".to_string(),
                    content: json!([{ "type": "output_text", "text": text, "annotations": [] }]),
                    id: Some(id),
                    status,
                });
                if !text.is_empty() {
                    candidates.push(Candidate {
                        parts: vec![Part::text(text)],
                    });
                }
            }
            OutputItem::FunctionCall {
                call_id,
                name,
                arguments,
            } => {
                let call = FunctionCall::from_raw(call_id.clone(), name.clone(), &arguments);
                history.push(InputItem::FunctionCall {
                    call_id,
                    name,
                    arguments,
                });
                candidates.push(Candidate {
                    parts: vec![Part::function_calls(vec![call])],
                });
            }
            OutputItem::Reasoning {
                id,
                summary,
                encrypted_content,
            } => {
                debug!(%id, "recording reasoning item");
                history.push(InputItem::Reasoning {
                    id,
                    summary,
                    encrypted_content,
                });
            }
            OutputItem::Unknown => {
                debug!("skipping unknown output item");
            }
        }
    }

    candidates
}

/// Convert turn inputs into history items.
pub(crate) fn contents_to_items(contents: Vec<Content>) -> Result<Vec<InputItem>> {
    contents
        .into_iter()
        .map(|content| match content {
            Content::Text { text } => Ok(InputItem::Message {
                role: "user".to_string(),
                content: Value::String(text),
                id: None,
                status: None,
            }),
            Content::FunctionResult(result) => Ok(InputItem::FunctionCallOutput {
                call_id: result.id,
                output: serde_json::to_string(&result.result)?,
            }),
        })
        .collect()
}

struct OpenAiResponseChat {
    transport: JournalingClient,
    url: String,
    api_key: String,
    model: String,
    instructions: String,
    history: Vec<InputItem>,
    tools: Vec<Value>,
}

#[async_trait]
impl Chat for OpenAiResponseChat {
    fn set_function_definitions(&mut self, definitions: &[FunctionDefinition]) -> Result<()> {
        self.tools = definitions
            .iter()
            .map(|def| {
                json!({
                    "type": "function",
                    "name": def.name,
                    "description": def.description,
                    "parameters": def.parameters,
                })
            })
            .collect();
        info!("Set {} function definitions for OpenAI chat session", self.tools.len());
        Ok(())
    }

    async fn send_streaming(&mut self, contents: Vec<Content>) -> Result<ChatResponseStream> {
        let pending = contents_to_items(contents)?;
        let mut input = self.history.clone();
        input.extend(pending.iter().cloned());

        let mut body = json!({
            "model": self.model,
            "input": input,
        });
        if !self.instructions.is_empty() {
            body["instructions"] = json!(self.instructions);
        }
        if !self.tools.is_empty() {
            body["tools"] = json!(self.tools);
        }

        debug!(
            model = %self.model,
            items = input.len(),
            tools = self.tools.len(),
            "sending request to OpenAI Responses API"
        );
        let request = self
            .transport
            .post(&self.url)
            .bearer_auth(&self.api_key)
            .json(&body);
        let response = self.transport.execute(request).await?.error_for_status()?;
        let parsed: ResponsesApiResponse = response.json()?;

        // Inputs are committed only once the provider accepted the turn,
        // so a retried turn does not duplicate them.
        self.history.extend(pending);
        let candidates = fold_output(&mut self.history, parsed.output);
        let usage = parsed.usage.map(|u| Usage {
            prompt_tokens: u.input_tokens,
            completion_tokens: u.output_tokens,
            total_tokens: u.total_tokens,
        });

        let chat_response = ChatResponse { candidates, usage };
        Ok(stream::iter(vec![Ok(chat_response)]).boxed())
    }

    fn initialize(&mut self, history: &[Message]) -> Result<()> {
        if history.is_empty() {
            debug!(dropped = self.history.len(), "resetting chat history");
            self.history.clear();
            return Ok(());
        }
        warn!("chat history persistence is not supported for provider 'openai', using in-memory chat history");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::llm::FunctionCallResult;

    fn output(value: Value) -> Vec<OutputItem> {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_reasoning_is_recorded_but_not_surfaced() {
        let mut history = Vec::new();
        let items = output(json!([
            {"type": "reasoning", "id": "rs_1", "summary": []},
            {"type": "function_call", "id": "fc_1", "call_id": "call_1",
             "name": "kubectl", "arguments": "{\"command\":\"kubectl get pods\"}", "status": "completed"},
        ]));

        let candidates = fold_output(&mut history, items);

        assert_eq!(history.len(), 2);
        assert!(matches!(history[0], InputItem::Reasoning { .. }));
        assert_eq!(candidates.len(), 1);
        let calls = candidates[0].parts[0].as_function_calls().unwrap();
        assert_eq!(calls[0].id, "call_1");
        assert_eq!(calls[0].arguments["command"], "kubectl get pods");
    }

    #[test]
    fn test_message_and_call_are_separate_candidates() {
        let mut history = Vec::new();
        let items = output(json!([
            {"type": "message", "id": "msg_1", "status": "completed", "role": "assistant",
             "content": [{"type": "output_text", "text": "Let me check.", "annotations": []}]},
            {"type": "function_call", "call_id": "call_2", "name": "bash", "arguments": "not json"},
            {"type": "web_search_call", "id": "ws_1"},
        ]));

        let candidates = fold_output(&mut history, items);

        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].parts[0].as_text(), Some("Let me check."));
        let calls = candidates[1].parts[0].as_function_calls().unwrap();
        assert!(calls[0].arguments.is_empty());
        assert_eq!(history.len(), 2);
    }

    #[test]
    fn test_contents_to_items() {
        let items = contents_to_items(vec![
            Content::text("list pods"),
            Content::FunctionResult(FunctionCallResult {
                id: "call_1".to_string(),
                name: "kubectl".to_string(),
                result: json!({"pods": []}),
            }),
        ])
        .unwrap();

        let wire = serde_json::to_value(&items).unwrap();
        assert_eq!(wire[0]["type"], "message");
        assert_eq!(wire[0]["content"], "list pods");
        assert_eq!(wire[1]["type"], "function_call_output");
        assert_eq!(wire[1]["output"], "{\"pods\":[]}");
    }

    #[test]
    fn test_initialize_empty_drops_dangling_calls() {
        let mut chat = OpenAiResponseChat {
            transport: JournalingClient::default(),
            url: "http://localhost/responses".to_string(),
            api_key: String::new(),
            model: "gpt-4.1".to_string(),
            instructions: "You are Steward.".to_string(),
            history: contents_to_items(vec![Content::text("loop forever")]).unwrap(),
            tools: Vec::new(),
        };
        // A call whose output never made it back to the provider.
        fold_output(
            &mut chat.history,
            output(json!([
                {"type": "function_call", "call_id": "call_9", "name": "kubectl",
                 "arguments": "{\"command\":\"kubectl get pods\"}"},
            ])),
        );
        assert_eq!(chat.history.len(), 2);

        chat.initialize(&[]).unwrap();

        assert!(chat.history.is_empty());
        assert_eq!(chat.instructions, "You are Steward.");
    }

    #[tokio::test]
    async fn test_send_is_unsupported() {
        let client = OpenAiResponseClient::new(JournalingClient::default(), "k", None, "gpt-4.1");
        let mut chat = client.start_chat("", "gpt-4.1");
        assert!(matches!(
            chat.send(vec![Content::text("hi")]).await,
            Err(crate::error::Error::Unsupported)
        ));
        assert!(chat.initialize(&[]).is_ok());
    }
}
