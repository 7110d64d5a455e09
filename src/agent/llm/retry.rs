//! Retry classification and bounded backoff for model turns.

use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use super::{Chat, ChatResponseStream, Content};
use crate::config::RetryConfig;
use crate::error::Error;
use crate::Result;

/// HTTP statuses worth another attempt.
const RETRYABLE_STATUSES: [u16; 5] = [429, 500, 502, 503, 504];

/// Classify transport and API errors as transient or fatal.
pub fn default_is_retryable_error(err: &Error) -> bool {
    match err {
        Error::Api { status, .. } => RETRYABLE_STATUSES.contains(status),
        Error::Http(e) => {
            e.is_timeout()
                || e.is_connect()
                || e
                    .status()
                    .map(|s| RETRYABLE_STATUSES.contains(&s.as_u16()))
                    .unwrap_or(false)
        }
        _ => false,
    }
}

/// Exponential backoff with jitter, bounded by an attempt count.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            initial_backoff: Duration::from_millis(config.initial_backoff_ms),
            max_backoff: Duration::from_millis(config.max_backoff_ms),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let base = self
            .initial_backoff
            .saturating_mul(1u32 << exp)
            .min(self.max_backoff);
        let jitter_ms = (base.as_millis() as u64) / 5;
        if jitter_ms == 0 {
            return base;
        }
        let jitter = rand::thread_rng().gen_range(0..=jitter_ms);
        (base + Duration::from_millis(jitter)).min(self.max_backoff)
    }
}

/// Start a streamed turn, retrying transient failures.
///
/// Only the call that opens the stream is retried; errors yielded by the
/// stream itself are left to the caller.
pub async fn send_streaming_with_retry(
    chat: &mut dyn Chat,
    contents: &[Content],
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<ChatResponseStream> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        let err = match chat.send_streaming(contents.to_vec()).await {
            Ok(stream) => return Ok(stream),
            Err(e) => e,
        };

        if attempt >= policy.max_attempts || !chat.is_retryable_error(&err) {
            return Err(err);
        }

        let delay = policy.backoff(attempt);
        warn!(attempt, ?delay, "retrying model turn after error: {}", err);
        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::llm::{ChatResponse, FakeLlmClient, FakeTurn, LlmClient};

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            initial_backoff: Duration::from_millis(1),
            max_backoff: Duration::from_millis(2),
        }
    }

    #[test]
    fn test_classification() {
        assert!(default_is_retryable_error(&Error::Api {
            status: 429,
            message: String::new()
        }));
        assert!(default_is_retryable_error(&Error::Api {
            status: 503,
            message: String::new()
        }));
        assert!(!default_is_retryable_error(&Error::Api {
            status: 400,
            message: String::new()
        }));
        assert!(!default_is_retryable_error(&Error::Llm("bad".into())));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff: Duration::from_millis(100),
            max_backoff: Duration::from_millis(500),
        };
        assert!(policy.backoff(1) >= Duration::from_millis(100));
        assert!(policy.backoff(1) <= Duration::from_millis(120));
        assert_eq!(policy.backoff(8), Duration::from_millis(500));
    }

    #[tokio::test]
    async fn test_retries_transient_errors() {
        let client = FakeLlmClient::new(vec![
            FakeTurn::ApiError(503),
            FakeTurn::Responses(vec![ChatResponse::text("ok")]),
        ]);
        let mut chat = client.start_chat("", "m");
        let cancel = CancellationToken::new();

        let result = send_streaming_with_retry(chat.as_mut(), &[], &fast_policy(3), &cancel).await;
        assert!(result.is_ok());
        assert_eq!(client.state().send_calls(), 2);
    }

    #[tokio::test]
    async fn test_fatal_errors_are_not_retried() {
        let client = FakeLlmClient::new(vec![
            FakeTurn::ApiError(401),
            FakeTurn::Responses(vec![ChatResponse::text("unreachable")]),
        ]);
        let mut chat = client.start_chat("", "m");
        let cancel = CancellationToken::new();

        let result = send_streaming_with_retry(chat.as_mut(), &[], &fast_policy(3), &cancel).await;
        assert!(matches!(result, Err(Error::Api { status: 401, .. })));
        assert_eq!(client.state().send_calls(), 1);
    }

    #[tokio::test]
    async fn test_attempts_are_bounded() {
        let client = FakeLlmClient::new(vec![
            FakeTurn::ApiError(500),
            FakeTurn::ApiError(500),
            FakeTurn::ApiError(500),
        ]);
        let mut chat = client.start_chat("", "m");
        let cancel = CancellationToken::new();

        let result = send_streaming_with_retry(chat.as_mut(), &[], &fast_policy(2), &cancel).await;
        tokio_test::assert_err!(result.map(|_| ()));
        assert_eq!(client.state().send_calls(), 2);
    }
}
