//! Chat decorator that records every turn to a message store.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use tracing::error;

use super::{Chat, ChatResponse, ChatResponseStream, Content, FunctionDefinition};
use crate::agent::message::{Message, MessageSource, MessageType};
use crate::error::Error;
use crate::sessions::ChatMessageStore;
use crate::Result;

/// Wraps a [`Chat`], forwarding every call and recording requests and
/// responses. Recording never blocks or fails the conversation.
pub struct ChatLogger {
    underlying: Box<dyn Chat>,
    store: Arc<dyn ChatMessageStore>,
}

impl ChatLogger {
    pub fn new(underlying: Box<dyn Chat>, store: Arc<dyn ChatMessageStore>) -> Self {
        Self { underlying, store }
    }
}

fn write_record(store: &dyn ChatMessageStore, source: MessageSource, kind: MessageType, payload: Value) {
    if let Err(e) = store.add_chat_message(&Message::new(source, kind, payload)) {
        error!("Failed to add chat message to store: {}", e);
    }
}

fn record_request(store: &dyn ChatMessageStore, contents: &[Content]) {
    let payload = serde_json::to_value(contents).unwrap_or(Value::Null);
    write_record(store, MessageSource::User, MessageType::ChatRequest, payload);
}

fn record_response(store: &dyn ChatMessageStore, response: &ChatResponse) {
    let payload = serde_json::to_value(response).unwrap_or(Value::Null);
    write_record(store, MessageSource::Model, MessageType::ChatResponse, payload);
}

#[async_trait]
impl Chat for ChatLogger {
    fn set_function_definitions(&mut self, definitions: &[FunctionDefinition]) -> Result<()> {
        self.underlying.set_function_definitions(definitions)
    }

    async fn send(&mut self, contents: Vec<Content>) -> Result<ChatResponse> {
        record_request(self.store.as_ref(), &contents);
        let response = self.underlying.send(contents).await?;
        record_response(self.store.as_ref(), &response);
        Ok(response)
    }

    async fn send_streaming(&mut self, contents: Vec<Content>) -> Result<ChatResponseStream> {
        record_request(self.store.as_ref(), &contents);
        let stream = self.underlying.send_streaming(contents).await?;

        let store = self.store.clone();
        Ok(stream
            .inspect(move |item| {
                // Errors pass through unrecorded.
                if let Ok(response) = item {
                    record_response(store.as_ref(), response);
                }
            })
            .boxed())
    }

    fn initialize(&mut self, history: &[Message]) -> Result<()> {
        self.underlying.initialize(history)
    }

    fn is_retryable_error(&self, err: &Error) -> bool {
        self.underlying.is_retryable_error(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::llm::{FakeLlmClient, FakeTurn, LlmClient};
    use crate::sessions::InMemoryChatStore;

    #[tokio::test]
    async fn test_logger_records_request_and_responses() {
        let client = FakeLlmClient::new(vec![FakeTurn::Responses(vec![
            ChatResponse::text("one"),
            ChatResponse::text("two"),
        ])]);
        let store = Arc::new(InMemoryChatStore::new());
        let mut chat = ChatLogger::new(client.start_chat("", "m"), store.clone());

        let stream = chat
            .send_streaming(vec![Content::text("hello")])
            .await
            .unwrap();
        let responses: Vec<_> = stream.collect().await;
        assert_eq!(responses.len(), 2);

        let records = store.chat_messages();
        let kinds: Vec<_> = records.iter().map(|m| m.message_type).collect();
        assert_eq!(
            kinds,
            vec![
                MessageType::ChatRequest,
                MessageType::ChatResponse,
                MessageType::ChatResponse
            ]
        );
        assert_eq!(records[0].source, MessageSource::User);
        assert_eq!(records[0].payload[0]["text"], "hello");
    }

    #[tokio::test]
    async fn test_logger_forwards_errors() {
        let client = FakeLlmClient::new(vec![FakeTurn::ApiError(503)]);
        let store = Arc::new(InMemoryChatStore::new());
        let mut chat = ChatLogger::new(client.start_chat("", "m"), store.clone());

        let err = chat.send_streaming(vec![Content::text("x")]).await.err();
        assert!(matches!(err, Some(Error::Api { status: 503, .. })));
        assert!(chat.is_retryable_error(&err.unwrap()));
        // Only the request was recorded.
        assert_eq!(store.chat_messages().len(), 1);
    }
}
