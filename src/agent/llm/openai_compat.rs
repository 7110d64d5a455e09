//! OpenAI-compatible Chat Completions adapter (streamed).
//!
//! Works against any server that speaks `/chat/completions` with
//! `stream: true`. The transport buffers the body, so each turn is decoded
//! whole: text deltas are joined into one text part and tool calls are
//! surfaced once, after every fragment has been folded.

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use super::{
    Chat, ChatResponse, ChatResponseStream, Content, FunctionCall, FunctionDefinition, LlmClient,
    Part, Usage,
};
use crate::agent::message::Message;
use crate::journal::{parse_sse_line, DeltaAccumulator, JournalingClient, SseEvent};
use crate::Result;

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Client for OpenAI-compatible chat completion endpoints.
#[derive(Clone)]
pub struct OpenAiCompatClient {
    transport: JournalingClient,
    api_key: String,
    base_url: String,
    model: String,
}

impl OpenAiCompatClient {
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
                .unwrap_or(DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
        }
    }
}

impl LlmClient for OpenAiCompatClient {
    fn start_chat(&self, system_prompt: &str, model: &str) -> Box<dyn Chat> {
        let mut history = Vec::new();
        if !system_prompt.is_empty() {
            history.push(json!({ "role": "system", "content": system_prompt }));
        }
        Box::new(OpenAiCompatChat {
            transport: self.transport.clone(),
            url: format!("{}/chat/completions", self.base_url),
            api_key: self.api_key.clone(),
            model: model.to_string(),
            history,
            tools: Vec::new(),
        })
    }

    fn provider_id(&self) -> &str {
        "openai-compat"
    }

    fn default_model(&self) -> &str {
        &self.model
    }
}

struct OpenAiCompatChat {
    transport: JournalingClient,
    url: String,
    api_key: String,
    model: String,
    history: Vec<Value>,
    tools: Vec<Value>,
}

fn contents_to_messages(contents: Vec<Content>) -> Result<Vec<Value>> {
    contents
        .into_iter()
        .map(|content| match content {
            Content::Text { text } => Ok(json!({ "role": "user", "content": text })),
            Content::FunctionResult(result) => Ok(json!({
                "role": "tool",
                "tool_call_id": result.id,
                "content": serde_json::to_string(&result.result)?,
            })),
        })
        .collect()
}

fn parse_usage(value: &Value) -> Option<Usage> {
    let usage = value.get("usage").filter(|u| !u.is_null())?;
    let field = |name: &str| usage.get(name).and_then(Value::as_u64).unwrap_or(0);
    Some(Usage {
        prompt_tokens: field("prompt_tokens"),
        completion_tokens: field("completion_tokens"),
        total_tokens: field("total_tokens"),
    })
}

/// Decoded turn: responses to yield plus the assistant message for history.
struct DecodedTurn {
    responses: Vec<ChatResponse>,
    assistant: Value,
}

/// Decode an SSE body into one response: the joined text, then the calls.
fn decode_event_stream(body: &str) -> DecodedTurn {
    let mut acc = DeltaAccumulator::new();
    let mut usage = None;

    for line in body.lines() {
        match parse_sse_line(line.trim_end_matches('\r')) {
            Some(SseEvent::Done) => break,
            Some(SseEvent::Data(chunk)) => {
                if let Some(u) = parse_usage(&chunk) {
                    usage = Some(u);
                }
                acc.apply_chunk(&chunk);
            }
            None => continue,
        }
    }

    let assembled = acc.tool_calls();
    let calls: Vec<FunctionCall> = assembled
        .iter()
        .map(|call| {
            FunctionCall::from_raw(
                call.id
                    .clone()
                    .unwrap_or_else(|| format!("call_{}", call.index)),
                call.name.clone().unwrap_or_default(),
                &call.arguments,
            )
        })
        .collect();

    let mut parts = Vec::new();
    if !acc.text().is_empty() {
        parts.push(Part::text(acc.text()));
    }
    let mut assistant = json!({ "role": "assistant", "content": acc.text() });
    if !assembled.is_empty() {
        assistant["tool_calls"] = assembled
            .iter()
            .zip(&calls)
            .map(|(raw, call)| {
                json!({
                    "id": call.id,
                    "type": "function",
                    "function": { "name": call.name, "arguments": raw.arguments },
                })
            })
            .collect();
        parts.push(Part::function_calls(calls));
    }

    let responses = if !parts.is_empty() {
        let mut response = ChatResponse::with_parts(parts);
        response.usage = usage;
        vec![response]
    } else if usage.is_some() {
        vec![ChatResponse {
            candidates: Vec::new(),
            usage,
        }]
    } else {
        Vec::new()
    };

    DecodedTurn {
        responses,
        assistant,
    }
}

/// Decode a plain (non-SSE) completion body.
fn decode_completion(body: &Value) -> DecodedTurn {
    let message = body
        .get("choices")
        .and_then(|c| c.get(0))
        .and_then(|c| c.get("message"))
        .cloned()
        .unwrap_or_else(|| json!({ "role": "assistant", "content": "" }));

    let mut parts = Vec::new();
    if let Some(text) = message.get("content").and_then(Value::as_str) {
        if !text.is_empty() {
            parts.push(Part::text(text));
        }
    }
    let calls: Vec<FunctionCall> = message
        .get("tool_calls")
        .and_then(Value::as_array)
        .map(|calls| {
            calls
                .iter()
                .enumerate()
                .map(|(i, call)| {
                    let id = call
                        .get("id")
                        .and_then(Value::as_str)
                        .map(str::to_string)
                        .unwrap_or_else(|| format!("call_{i}"));
                    let function = call.get("function");
                    let name = function
                        .and_then(|f| f.get("name"))
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    let arguments = function
                        .and_then(|f| f.get("arguments"))
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    FunctionCall::from_raw(id, name, arguments)
                })
                .collect()
        })
        .unwrap_or_default();
    if !calls.is_empty() {
        parts.push(Part::function_calls(calls));
    }

    let mut response = ChatResponse::with_parts(parts);
    response.usage = parse_usage(body);
    DecodedTurn {
        responses: vec![response],
        assistant: message,
    }
}

#[async_trait]
impl Chat for OpenAiCompatChat {
    fn set_function_definitions(&mut self, definitions: &[FunctionDefinition]) -> Result<()> {
        self.tools = definitions
            .iter()
            .map(|def| {
                json!({
                    "type": "function",
                    "function": {
                        "name": def.name,
                        "description": def.description,
                        "parameters": def.parameters,
                    }
                })
            })
            .collect();
        info!("Set {} function definitions for chat completions", self.tools.len());
        Ok(())
    }

    async fn send_streaming(&mut self, contents: Vec<Content>) -> Result<ChatResponseStream> {
        let pending = contents_to_messages(contents)?;
        let mut messages = self.history.clone();
        messages.extend(pending.iter().cloned());

        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "stream": true,
            "stream_options": { "include_usage": true },
        });
        if !self.tools.is_empty() {
            body["tools"] = json!(self.tools);
        }

        debug!(model = %self.model, messages = messages.len(), "sending chat completion request");
        let mut request = self.transport.post(&self.url).json(&body);
        if !self.api_key.is_empty() {
            request = request.bearer_auth(&self.api_key);
        }
        let response = self.transport.execute(request).await?.error_for_status()?;

        let is_event_stream = response
            .content_type
            .as_deref()
            .map(|ct| ct.contains("text/event-stream"))
            .unwrap_or(false);
        let decoded = if is_event_stream {
            decode_event_stream(&response.text())
        } else {
            match response.json::<Value>() {
                Ok(value) => decode_completion(&value),
                Err(_) => {
                    warn!("response is neither SSE nor JSON, decoding as event stream");
                    decode_event_stream(&response.text())
                }
            }
        };

        self.history.extend(pending);
        self.history.push(decoded.assistant);

        Ok(stream::iter(decoded.responses.into_iter().map(Ok)).boxed())
    }

    fn initialize(&mut self, history: &[Message]) -> Result<()> {
        if history.is_empty() {
            debug!(dropped = self.history.len(), "resetting chat history");
            self.history.retain(|m| m["role"] == "system");
            return Ok(());
        }
        warn!("chat history persistence is not supported for provider 'openai-compat', using in-memory chat history");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::llm::FunctionCallResult;

    const STREAM: &str = concat!(
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"Checking \"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"the cluster.\"}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"type\":\"function\",\"function\":{\"name\":\"kubectl\",\"arguments\":\"{\\\"command\\\":\"}}]}}]}\n\n",
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\\\"kubectl get pods\\\"}\"}}]}}]}\n\n",
        "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":10,\"completion_tokens\":5,\"total_tokens\":15}}\n\n",
        "data: [DONE]\n\n",
    );

    #[test]
    fn test_decode_event_stream() {
        let decoded = decode_event_stream(STREAM);

        assert_eq!(decoded.responses.len(), 1);
        let last = &decoded.responses[0];
        let parts = &last.candidates[0].parts;
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].as_text(), Some("Checking the cluster."));

        let calls = parts[1].as_function_calls().unwrap();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "call_0");
        assert_eq!(calls[0].name, "kubectl");
        assert_eq!(calls[0].arguments["command"], "kubectl get pods");
        assert_eq!(last.usage.map(|u| u.total_tokens), Some(15));

        assert_eq!(decoded.assistant["content"], "Checking the cluster.");
        assert_eq!(decoded.assistant["tool_calls"][0]["id"], "call_0");
    }

    #[test]
    fn test_decode_text_only_stream() {
        let decoded = decode_event_stream(concat!(
            "data: {\"choices\":[{\"delta\":{\"content\":\"No \"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"pods \"}}]}\n\n",
            "data: {\"choices\":[{\"delta\":{\"content\":\"found.\"}}]}\n\n",
            "data: [DONE]\n\n",
        ));
        assert_eq!(decoded.responses.len(), 1);
        let parts = &decoded.responses[0].candidates[0].parts;
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].as_text(), Some("No pods found."));
        assert!(decoded.assistant.get("tool_calls").is_none());
    }

    #[test]
    fn test_empty_stream_yields_nothing() {
        let decoded = decode_event_stream("data: [DONE]\n\n");
        assert!(decoded.responses.is_empty());
        assert_eq!(decoded.assistant["content"], "");
    }

    fn chat_with_history(history: Vec<Value>) -> OpenAiCompatChat {
        OpenAiCompatChat {
            transport: JournalingClient::default(),
            url: "http://localhost/chat/completions".to_string(),
            api_key: String::new(),
            model: "llama".to_string(),
            history,
            tools: Vec::new(),
        }
    }

    #[test]
    fn test_initialize_empty_keeps_only_system_prompt() {
        let decoded = decode_event_stream(STREAM);
        let mut chat = chat_with_history(vec![
            json!({ "role": "system", "content": "You are Steward." }),
            json!({ "role": "user", "content": "list pods" }),
            decoded.assistant,
        ]);

        chat.initialize(&[]).unwrap();

        assert_eq!(chat.history.len(), 1);
        assert_eq!(chat.history[0]["role"], "system");
    }

    #[test]
    fn test_initialize_with_history_keeps_memory() {
        let mut chat = chat_with_history(vec![
            json!({ "role": "system", "content": "You are Steward." }),
            json!({ "role": "user", "content": "list pods" }),
        ]);
        let persisted = [Message::text(crate::agent::MessageSource::User, "list pods")];

        chat.initialize(&persisted).unwrap();

        assert_eq!(chat.history.len(), 2);
    }

    #[test]
    fn test_decode_completion_fallback() {
        let body = json!({
            "choices": [{"message": {
                "role": "assistant",
                "content": null,
                "tool_calls": [{"id": "call_x", "type": "function",
                    "function": {"name": "bash", "arguments": "{\"command\":\"ls\"}"}}]
            }}],
            "usage": {"prompt_tokens": 1, "completion_tokens": 2, "total_tokens": 3}
        });
        let decoded = decode_completion(&body);
        let parts = &decoded.responses[0].candidates[0].parts;
        assert_eq!(parts.len(), 1);
        assert_eq!(parts[0].as_function_calls().unwrap()[0].id, "call_x");
        assert_eq!(decoded.responses[0].usage.map(|u| u.prompt_tokens), Some(1));
    }

    #[test]
    fn test_contents_to_messages() {
        let messages = contents_to_messages(vec![
            Content::text("hello"),
            Content::FunctionResult(FunctionCallResult {
                id: "call_0".to_string(),
                name: "kubectl".to_string(),
                result: json!({"exit_code": 0}),
            }),
        ])
        .unwrap();
        assert_eq!(messages[0]["role"], "user");
        assert_eq!(messages[1]["role"], "tool");
        assert_eq!(messages[1]["tool_call_id"], "call_0");
        assert_eq!(messages[1]["content"], "{\"exit_code\":0}");
    }

    #[test]
    fn test_base_url_is_trimmed() {
        let client = OpenAiCompatClient::new(JournalingClient::default(), "", Some("http://localhost:8080/v1/"), "llama");
        assert_eq!(client.base_url, "http://localhost:8080/v1");
        assert_eq!(client.provider_id(), "openai-compat");
    }
}
