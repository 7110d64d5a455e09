//! Gemini LLM client implementation (API key authentication).

use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::{debug, info};

use super::{
    Candidate, Chat, ChatResponse, ChatResponseStream, Content, FunctionCall, FunctionDefinition,
    LlmClient, Part, Usage,
};
use crate::agent::message::{Message, MessageSource, MessageType};
use crate::error::Error;
use crate::journal::JournalingClient;
use crate::Result;

const GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta/models";

/// Gemini API client using API key authentication.
#[derive(Clone)]
pub struct GeminiClient {
    transport: JournalingClient,
    api_key: String,
    base_url: String,
    model: String,
}

impl GeminiClient {
    /// Create a new Gemini client with API key.
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
                .unwrap_or(GEMINI_API_URL)
                .trim_end_matches('/')
                .to_string(),
            model: model.to_string(),
        }
    }
}

impl LlmClient for GeminiClient {
    fn start_chat(&self, system_prompt: &str, model: &str) -> Box<dyn Chat> {
        Box::new(GeminiChat {
            transport: self.transport.clone(),
            url: format!("{}/{}:generateContent", self.base_url, model),
            api_key: self.api_key.clone(),
            system_prompt: system_prompt.to_string(),
            history: Vec::new(),
            tools: None,
        })
    }

    fn provider_id(&self) -> &str {
        "gemini"
    }

    fn default_model(&self) -> &str {
        &self.model
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<GeminiCandidate>,
    #[serde(default)]
    usage_metadata: Option<GeminiUsage>,
}

#[derive(Debug, Deserialize)]
struct GeminiCandidate {
    #[serde(default)]
    content: Option<Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiUsage {
    prompt_token_count: Option<u64>,
    candidates_token_count: Option<u64>,
    total_token_count: Option<u64>,
}

struct GeminiChat {
    transport: JournalingClient,
    url: String,
    api_key: String,
    system_prompt: String,
    history: Vec<Value>,
    tools: Option<Value>,
}

/// Group turn inputs into Gemini contents.
fn convert_contents(contents: Vec<Content>) -> Vec<Value> {
    let mut texts = Vec::new();
    let mut results = Vec::new();
    for content in contents {
        match content {
            Content::Text { text } => texts.push(json!({ "text": text })),
            Content::FunctionResult(result) => results.push(json!({
                "functionResponse": {
                    "name": result.name,
                    "response": { "result": result.result },
                }
            })),
        }
    }

    let mut converted = Vec::new();
    if !results.is_empty() {
        converted.push(json!({ "role": "function", "parts": results }));
    }
    if !texts.is_empty() {
        converted.push(json!({ "role": "user", "parts": texts }));
    }
    converted
}

/// Map one candidate's raw content onto provider-agnostic parts.
fn parse_candidate(content: &Value) -> Candidate {
    let mut parts = Vec::new();
    let mut calls = Vec::new();
    let raw_parts = content
        .get("parts")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    for part in &raw_parts {
        if part.get("thought").and_then(Value::as_bool).unwrap_or(false) {
            debug!("skipping thought part");
            continue;
        }
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            if !text.is_empty() {
                parts.push(Part::text(text));
            }
        }
        if let Some(fc) = part.get("functionCall") {
            let name = fc.get("name").and_then(Value::as_str).unwrap_or_default();
            let arguments = fc
                .get("args")
                .and_then(Value::as_object)
                .cloned()
                .unwrap_or_default();
            calls.push(FunctionCall {
                id: format!("tc_{}", calls.len()),
                name: name.to_string(),
                arguments,
            });
        }
    }
    if !calls.is_empty() {
        parts.push(Part::function_calls(calls));
    }
    Candidate { parts }
}

impl GeminiChat {
    fn build_request(&self, contents: &[Value]) -> Value {
        let mut request = json!({ "contents": contents });
        if !self.system_prompt.is_empty() {
            request["systemInstruction"] = json!({
                "parts": [{"text": self.system_prompt}]
            });
        }
        if let Some(tools) = &self.tools {
            request["tools"] = tools.clone();
        }
        request
    }

    fn parse_response(&mut self, response: GeminiResponse) -> Result<ChatResponse> {
        // Only the first candidate continues the conversation.
        let content = response
            .candidates
            .into_iter()
            .next()
            .ok_or_else(|| Error::Llm("No candidates in response".to_string()))?
            .content
            .unwrap_or_else(|| json!({ "role": "model", "parts": [] }));

        let candidates = vec![parse_candidate(&content)];
        self.history.push(content);

        let usage = response.usage_metadata.map(|u| Usage {
            prompt_tokens: u.prompt_token_count.unwrap_or(0),
            completion_tokens: u.candidates_token_count.unwrap_or(0),
            total_tokens: u.total_token_count.unwrap_or(0),
        });

        Ok(ChatResponse { candidates, usage })
    }
}

#[async_trait]
impl Chat for GeminiChat {
    fn set_function_definitions(&mut self, definitions: &[FunctionDefinition]) -> Result<()> {
        if definitions.is_empty() {
            self.tools = None;
            return Ok(());
        }
        let function_declarations: Vec<Value> = definitions
            .iter()
            .map(|t| {
                json!({
                    "name": t.name,
                    "description": t.description,
                    "parameters": t.parameters
                })
            })
            .collect();
        info!("Set {} function definitions for Gemini chat session", function_declarations.len());
        self.tools = Some(json!([{ "functionDeclarations": function_declarations }]));
        Ok(())
    }

    async fn send(&mut self, contents: Vec<Content>) -> Result<ChatResponse> {
        let pending = convert_contents(contents);
        let mut all = self.history.clone();
        all.extend(pending.iter().cloned());

        let request = self
            .transport
            .post(&self.url)
            .header("x-goog-api-key", &self.api_key)
            .json(&self.build_request(&all));
        let response = self.transport.execute(request).await?.error_for_status()?;
        let parsed: GeminiResponse = response.json()?;

        self.history.extend(pending);
        self.parse_response(parsed)
    }

    async fn send_streaming(&mut self, contents: Vec<Content>) -> Result<ChatResponseStream> {
        let response = self.send(contents).await?;
        Ok(stream::iter(vec![Ok(response)]).boxed())
    }

    fn initialize(&mut self, history: &[Message]) -> Result<()> {
        self.history = history
            .iter()
            .filter(|m| m.message_type == MessageType::Text)
            .filter_map(|m| {
                let role = match m.source {
                    MessageSource::User => "user",
                    MessageSource::Model => "model",
                    MessageSource::Agent => return None,
                };
                let text = m.payload_text()?;
                Some(json!({ "role": role, "parts": [{"text": text}] }))
            })
            .collect();
        debug!(turns = self.history.len(), "replayed chat history into Gemini session");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::llm::FunctionCallResult;

    fn chat() -> GeminiChat {
        GeminiChat {
            transport: JournalingClient::default(),
            url: String::new(),
            api_key: String::new(),
            system_prompt: "be helpful".to_string(),
            history: Vec::new(),
            tools: None,
        }
    }

    #[test]
    fn test_parse_response_maps_parts() {
        let mut chat = chat();
        let response: GeminiResponse = serde_json::from_value(json!({
            "candidates": [{"content": {"role": "model", "parts": [
                {"text": "thinking...", "thought": true},
                {"text": "Listing pods."},
                {"functionCall": {"name": "kubectl", "args": {"command": "kubectl get pods"}}}
            ]}}],
            "usageMetadata": {"promptTokenCount": 7, "candidatesTokenCount": 3, "totalTokenCount": 10}
        }))
        .unwrap();

        let parsed = chat.parse_response(response).unwrap();
        let parts = &parsed.candidates[0].parts;
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].as_text(), Some("Listing pods."));
        let calls = parts[1].as_function_calls().unwrap();
        assert_eq!(calls[0].name, "kubectl");
        assert_eq!(calls[0].arguments["command"], "kubectl get pods");
        assert_eq!(parsed.usage.map(|u| u.total_tokens), Some(10));
        // The raw content, thought part included, is kept for the next turn.
        assert_eq!(chat.history.len(), 1);
        assert_eq!(chat.history[0]["parts"].as_array().map(Vec::len), Some(3));
    }

    #[test]
    fn test_no_candidates_is_an_error() {
        let mut chat = chat();
        let response: GeminiResponse = serde_json::from_value(json!({"candidates": []})).unwrap();
        assert!(matches!(chat.parse_response(response), Err(Error::Llm(_))));
    }

    #[test]
    fn test_convert_contents_groups_function_results() {
        let converted = convert_contents(vec![
            Content::FunctionResult(FunctionCallResult {
                id: "tc_0".to_string(),
                name: "kubectl".to_string(),
                result: json!({"exit_code": 0}),
            }),
            Content::text("and now?"),
        ]);
        assert_eq!(converted.len(), 2);
        assert_eq!(converted[0]["role"], "function");
        assert_eq!(converted[0]["parts"][0]["functionResponse"]["name"], "kubectl");
        assert_eq!(converted[1]["role"], "user");
    }

    #[test]
    fn test_initialize_replays_text_messages() {
        let mut chat = chat();
        chat.initialize(&[
            Message::text(MessageSource::User, "list pods"),
            Message::text(MessageSource::Agent, "Hey there"),
            Message::text(MessageSource::Model, "Here are the pods"),
            Message::error("boom"),
        ])
        .unwrap();
        assert_eq!(chat.history.len(), 2);
        assert_eq!(chat.history[1]["role"], "model");
    }

    #[test]
    fn test_request_carries_system_instruction_and_tools() {
        let mut chat = chat();
        chat.set_function_definitions(&[FunctionDefinition {
            name: "bash".to_string(),
            description: "run".to_string(),
            parameters: json!({"type": "object"}),
        }])
        .unwrap();
        let request = chat.build_request(&[]);
        assert_eq!(request["systemInstruction"]["parts"][0]["text"], "be helpful");
        assert_eq!(request["tools"][0]["functionDeclarations"][0]["name"], "bash");
    }
}
