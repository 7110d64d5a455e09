//! Journal module - write-only record of raw provider traffic.
//!
//! Nothing here feeds back into the agent loop. A [`Recorder`] receives
//! [`Event`]s; [`JournalingClient`] produces them around every HTTP call
//! the provider adapters make.

mod http;
mod stream;

pub use http::{JournaledResponse, JournalingClient};
pub use stream::{parse_sse_line, summarize_event_stream, AssembledToolCall, DeltaAccumulator, SseEvent};

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;

pub const ACTION_HTTP_REQUEST: &str = "http.request";
pub const ACTION_HTTP_RESPONSE: &str = "http.response";
pub const ACTION_HTTP_ERROR: &str = "http.error";

/// One journal entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub payload: Value,
}

impl Event {
    pub fn new(action: impl Into<String>, payload: Value) -> Self {
        Self {
            timestamp: Utc::now(),
            action: action.into(),
            payload,
        }
    }
}

/// Write-only sink for journal events.
pub trait Recorder: Send + Sync {
    fn write(&self, event: &Event) -> Result<()>;
}

/// Discards everything.
pub struct NoopRecorder;

impl Recorder for NoopRecorder {
    fn write(&self, _event: &Event) -> Result<()> {
        Ok(())
    }
}

/// Appends events as JSON lines to a file.
pub struct FileRecorder {
    path: PathBuf,
    file: Mutex<File>,
}

impl FileRecorder {
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Recorder for FileRecorder {
    fn write(&self, event: &Event) -> Result<()> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let mut file = self.file.lock().unwrap_or_else(|e| e.into_inner());
        file.write_all(&line)?;
        Ok(())
    }
}
