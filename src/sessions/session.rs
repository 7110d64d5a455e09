//! A single on-disk chat session.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ChatMessageStore, JsonlStore};
use crate::agent::Message;
use crate::Result;

const METADATA_FILE_NAME: &str = "metadata.toml";
const HISTORY_FILE_NAME: &str = "history.jsonl";
const TRANSCRIPT_FILE_NAME: &str = "transcript.jsonl";

/// Session metadata, rewritten as a whole on every update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Metadata {
    pub provider_id: String,
    pub model_id: String,
    pub created_at: DateTime<Utc>,
    pub last_accessed: DateTime<Utc>,
    #[serde(default)]
    pub total_tokens: u64,
    #[serde(default)]
    pub total_cost: f64,
    #[serde(default)]
    pub message_count: u64,
}

impl Metadata {
    pub fn new(provider_id: impl Into<String>, model_id: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            provider_id: provider_id.into(),
            model_id: model_id.into(),
            created_at: now,
            last_accessed: now,
            total_tokens: 0,
            total_cost: 0.0,
            message_count: 0,
        }
    }
}

impl fmt::Display for Metadata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "ProviderID: {}", self.provider_id)?;
        writeln!(f, "ModelID: {}", self.model_id)?;
        writeln!(f, "CreatedAt: {}", self.created_at)?;
        writeln!(f, "LastAccessed: {}", self.last_accessed)?;
        writeln!(f, "TotalTokens: {}", self.total_tokens)?;
        writeln!(f, "TotalCost: {:.2}", self.total_cost)?;
        writeln!(f, "MessageCount: {}", self.message_count)
    }
}

/// One chat session directory.
pub struct Session {
    pub id: String,
    pub path: PathBuf,
    history: JsonlStore,
    metadata_lock: Mutex<()>,
}

impl Session {
    pub fn new(id: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        Self {
            id: id.into(),
            history: JsonlStore::new(path.join(HISTORY_FILE_NAME)),
            path,
            metadata_lock: Mutex::new(()),
        }
    }

    pub fn history_path(&self) -> &Path {
        self.history.path()
    }

    pub fn metadata_path(&self) -> PathBuf {
        self.path.join(METADATA_FILE_NAME)
    }

    /// Separate log for raw model turns recorded by the chat logger.
    pub fn transcript_store(&self) -> JsonlStore {
        JsonlStore::new(self.path.join(TRANSCRIPT_FILE_NAME))
    }

    pub fn load_metadata(&self) -> Result<Metadata> {
        let _guard = self.metadata_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.read_metadata()
    }

    pub fn save_metadata(&self, metadata: &Metadata) -> Result<()> {
        let _guard = self.metadata_lock.lock().unwrap_or_else(|e| e.into_inner());
        self.write_metadata(metadata)
    }

    pub fn update_last_accessed(&self) -> Result<()> {
        self.modify_metadata(|meta| meta.last_accessed = Utc::now())
    }

    /// Add usage counters and bump the access time.
    pub fn update_usage(&self, tokens: u64, cost: f64, message_count: u64) -> Result<()> {
        self.modify_metadata(|meta| {
            meta.total_tokens += tokens;
            meta.total_cost += cost;
            meta.message_count += message_count;
            meta.last_accessed = Utc::now();
        })
    }

    fn modify_metadata(&self, update: impl FnOnce(&mut Metadata)) -> Result<()> {
        let _guard = self.metadata_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut meta = self.read_metadata()?;
        update(&mut meta);
        self.write_metadata(&meta)
    }

    fn read_metadata(&self) -> Result<Metadata> {
        let content = std::fs::read_to_string(self.metadata_path())?;
        Ok(toml::from_str(&content)?)
    }

    fn write_metadata(&self, metadata: &Metadata) -> Result<()> {
        let content = toml::to_string(metadata)?;
        let path = self.metadata_path();
        let tmp = path.with_extension("toml.tmp");
        std::fs::write(&tmp, content)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }
}

impl ChatMessageStore for Session {
    fn add_chat_message(&self, message: &Message) -> Result<()> {
        self.history.add_chat_message(message)
    }

    fn set_chat_messages(&self, messages: &[Message]) -> Result<()> {
        self.history.set_chat_messages(messages)
    }

    fn chat_messages(&self) -> Vec<Message> {
        self.history.chat_messages()
    }

    fn clear_chat_messages(&self) -> Result<()> {
        self.history.clear_chat_messages()
    }
}
