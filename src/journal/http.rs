//! HTTP transport that journals every exchange.

use std::sync::Arc;

use reqwest::header::{HeaderMap, CONTENT_TYPE};
use reqwest::{Client, Request, RequestBuilder};
use serde::de::DeserializeOwned;
use serde_json::{json, Map, Value};
use tracing::error;

use super::{
    summarize_event_stream, Event, NoopRecorder, Recorder, ACTION_HTTP_ERROR, ACTION_HTTP_REQUEST,
    ACTION_HTTP_RESPONSE,
};
use crate::error::Error;
use crate::Result;

/// Headers never written to the journal.
const REDACTED_HEADERS: [&str; 3] = ["authorization", "x-goog-api-key", "api-key"];

/// A fully buffered HTTP response.
///
/// `body` is exactly what the server sent.
#[derive(Debug, Clone)]
pub struct JournaledResponse {
    pub status: u16,
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

impl JournaledResponse {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    pub fn json<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_slice(&self.body)?)
    }

    /// Convert a non-2xx response into an API error.
    pub fn error_for_status(self) -> Result<Self> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(Error::Api {
                status: self.status,
                message: self.text(),
            })
        }
    }
}

/// `reqwest::Client` wrapper that records requests and responses.
#[derive(Clone)]
pub struct JournalingClient {
    client: Client,
    recorder: Arc<dyn Recorder>,
}

impl Default for JournalingClient {
    fn default() -> Self {
        Self::new(Client::new(), Arc::new(NoopRecorder))
    }
}

impl JournalingClient {
    pub fn new(client: Client, recorder: Arc<dyn Recorder>) -> Self {
        Self { client, recorder }
    }

    pub fn post(&self, url: &str) -> RequestBuilder {
        self.client.post(url)
    }

    /// Send a request, journaling both directions.
    pub async fn execute(&self, builder: RequestBuilder) -> Result<JournaledResponse> {
        let request = builder.build()?;
        self.record(Event::new(
            ACTION_HTTP_REQUEST,
            json!({ "request": dump_request(&request) }),
        ));

        let response = match self.client.execute(request).await {
            Ok(response) => response,
            Err(e) => {
                error!("HTTP transport error: {}", e);
                self.record(Event::new(
                    ACTION_HTTP_ERROR,
                    json!({ "error": "http transport failed", "detail": e.to_string() }),
                ));
                return Err(e.into());
            }
        };

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?.to_vec();

        let content_type = headers
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let is_event_stream = content_type
            .as_deref()
            .map(|ct| ct.contains("text/event-stream"))
            .unwrap_or(false);

        let logged_body = if is_event_stream {
            summarize_event_stream(&body)
        } else {
            Value::String(String::from_utf8_lossy(&body).into_owned())
        };
        self.record(Event::new(
            ACTION_HTTP_RESPONSE,
            json!({
                "status": status.to_string(),
                "headers": headers_to_value(&headers),
                "body": logged_body,
            }),
        ));

        Ok(JournaledResponse {
            status: status.as_u16(),
            content_type,
            body,
        })
    }

    fn record(&self, event: Event) {
        if let Err(e) = self.recorder.write(&event) {
            error!("Error writing to journal: {}", e);
        }
    }
}

fn headers_to_value(headers: &HeaderMap) -> Value {
    let mut map = Map::new();
    for (name, value) in headers {
        let name = name.as_str();
        let value = if REDACTED_HEADERS.contains(&name) {
            "<redacted>".to_string()
        } else {
            value.to_str().unwrap_or("<binary>").to_string()
        };
        map.insert(name.to_string(), Value::String(value));
    }
    Value::Object(map)
}

fn dump_request(request: &Request) -> Value {
    let body = request
        .body()
        .and_then(|b| b.as_bytes())
        .map(|b| String::from_utf8_lossy(b).into_owned());
    json!({
        "method": request.method().as_str(),
        "url": request.url().as_str(),
        "headers": headers_to_value(request.headers()),
        "body": body,
    })
}
