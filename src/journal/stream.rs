//! Server-sent-event reassembly for chat completion streams.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// A parsed `data:` line.
#[derive(Debug, Clone, PartialEq)]
pub enum SseEvent {
    Data(Value),
    Done,
}

/// Parse one SSE line. Non-data lines and malformed JSON yield `None`.
pub fn parse_sse_line(line: &str) -> Option<SseEvent> {
    let data = line.strip_prefix("data:")?.trim();
    if data == "[DONE]" {
        return Some(SseEvent::Done);
    }
    serde_json::from_str(data).ok().map(SseEvent::Data)
}

/// A tool call reassembled from its fragments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AssembledToolCall {
    pub index: u64,
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: Option<String>,
    pub name: Option<String>,
    pub arguments: String,
}

impl AssembledToolCall {
    fn to_value(&self) -> Value {
        json!({
            "index": self.index,
            "id": self.id,
            "type": self.kind,
            "function": {
                "name": self.name,
                "arguments": self.arguments,
            }
        })
    }
}

/// Folds chat-completion deltas into full text and complete tool calls.
///
/// Tool call fragments are keyed by their integer index and appended in
/// arrival order.
#[derive(Debug, Default)]
pub struct DeltaAccumulator {
    text: String,
    calls: BTreeMap<u64, AssembledToolCall>,
}

impl DeltaAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one chunk, returning the text delta it carried.
    pub fn apply_chunk(&mut self, chunk: &Value) -> Option<String> {
        let delta = chunk.get("choices")?.get(0)?.get("delta")?;

        if let Some(fragments) = delta.get("tool_calls").and_then(Value::as_array) {
            for fragment in fragments {
                self.apply_tool_fragment(fragment);
            }
        }

        match delta.get("content").and_then(Value::as_str) {
            Some(content) if !content.is_empty() => {
                self.text.push_str(content);
                Some(content.to_string())
            }
            _ => None,
        }
    }

    fn apply_tool_fragment(&mut self, fragment: &Value) {
        let Some(index) = fragment.get("index").and_then(Value::as_u64) else {
            return;
        };
        let call = self.calls.entry(index).or_insert_with(|| AssembledToolCall {
            index,
            ..AssembledToolCall::default()
        });

        if call.id.is_none() {
            call.id = fragment.get("id").and_then(Value::as_str).map(str::to_string);
        }
        if call.kind.is_none() {
            call.kind = fragment.get("type").and_then(Value::as_str).map(str::to_string);
        }
        if let Some(function) = fragment.get("function") {
            if call.name.is_none() {
                call.name = function.get("name").and_then(Value::as_str).map(str::to_string);
            }
            if let Some(args) = function.get("arguments").and_then(Value::as_str) {
                call.arguments.push_str(args);
            }
        }
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    /// Completed tool calls ordered by index.
    pub fn tool_calls(&self) -> Vec<AssembledToolCall> {
        self.calls.values().cloned().collect()
    }
}

/// Summarize an SSE body into aggregated text and complete tool calls.
///
/// Stops at `[DONE]` or at the end of the body, whichever comes first.
pub fn summarize_event_stream(body: &[u8]) -> Value {
    let mut acc = DeltaAccumulator::new();
    let body = String::from_utf8_lossy(body);

    for line in body.lines() {
        match parse_sse_line(line.trim_end_matches('\r')) {
            Some(SseEvent::Done) => break,
            Some(SseEvent::Data(chunk)) => {
                acc.apply_chunk(&chunk);
            }
            None => continue,
        }
    }

    let significant_events: Vec<Value> = acc
        .tool_calls()
        .iter()
        .map(|call| json!({ "tool_calls": [call.to_value()] }))
        .collect();

    json!({
        "aggregated_text": acc.text(),
        "significant_events": significant_events,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = concat!(
        ": keep-alive\n",
        "data: {\"choices\":[{\"delta\":{\"role\":\"assistant\",\"content\":\"Checking \"}}]}\n",
        "\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"pods\"}}]}\n",
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_a\",\"type\":\"function\",\"function\":{\"name\":\"kubectl\",\"arguments\":\"\"}}]}}]}\n",
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":1,\"id\":\"call_b\",\"type\":\"function\",\"function\":{\"name\":\"bash\",\"arguments\":\"{\\\"command\\\"\"}}]}}]}\n",
        "data: {not json at all\n",
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"{\\\"command\\\":\"}}]}}]}\n",
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"\\\"kubectl get pods\\\"}\"}}]}}]}\n",
        "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":1,\"function\":{\"arguments\":\":\\\"ls\\\"}\"}}]}}]}\n",
        "data: [DONE]\n",
        "data: {\"choices\":[{\"delta\":{\"content\":\"after done\"}}]}\n",
    );

    #[test]
    fn test_summary_aggregates_text_and_calls() {
        let summary = summarize_event_stream(STREAM.as_bytes());
        assert_eq!(summary["aggregated_text"], "Checking pods");

        let events = summary["significant_events"].as_array().unwrap();
        assert_eq!(events.len(), 2);
        let first = &events[0]["tool_calls"][0];
        assert_eq!(first["id"], "call_a");
        assert_eq!(first["function"]["name"], "kubectl");
        assert_eq!(
            first["function"]["arguments"],
            "{\"command\":\"kubectl get pods\"}"
        );
        let second = &events[1]["tool_calls"][0];
        assert_eq!(second["function"]["arguments"], "{\"command\":\"ls\"}");
    }

    #[test]
    fn test_summary_finalizes_on_exhaustion() {
        let body = "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":3,\"function\":{\"name\":\"bash\",\"arguments\":\"{}\"}}]}}]}";
        let summary = summarize_event_stream(body.as_bytes());
        let events = summary["significant_events"].as_array().unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0]["tool_calls"][0]["index"], 3);
    }

    #[test]
    fn test_parse_sse_line() {
        assert_eq!(parse_sse_line("data: [DONE]"), Some(SseEvent::Done));
        assert_eq!(parse_sse_line("event: ping"), None);
        assert_eq!(parse_sse_line("data: {oops"), None);
        assert!(matches!(parse_sse_line("data:{}"), Some(SseEvent::Data(_))));
    }
}
