//! Session directory management.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{Local, Utc};
use rand::Rng;
use tracing::{debug, info};

use super::{Metadata, Session};
use crate::error::Error;
use crate::Result;

const ID_DATE_FORMAT: &str = "%Y%m%d";
const MAX_ID_ATTEMPTS: usize = 32;

/// Creates, lists and deletes sessions under one root directory.
pub struct SessionManager {
    base_path: PathBuf,
}

impl SessionManager {
    /// Create a manager rooted at `base_path`, creating the directory.
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path)?;
        Ok(Self { base_path })
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Create a session whose id is the creation date plus a random suffix.
    pub fn new_session(&self, mut metadata: Metadata) -> Result<Session> {
        let date = Local::now().format(ID_DATE_FORMAT).to_string();
        let mut rng = rand::thread_rng();

        for _ in 0..MAX_ID_ATTEMPTS {
            let id = format!("{}-{:04}", date, rng.gen_range(0..10_000));
            let path = self.base_path.join(&id);
            match std::fs::create_dir(&path) {
                Ok(()) => {
                    let session = Session::new(id, path);
                    let now = Utc::now();
                    metadata.created_at = now;
                    metadata.last_accessed = now;
                    session.save_metadata(&metadata)?;
                    info!(id = %session.id, "created session");
                    return Ok(session);
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    debug!(%id, "session id collision, retrying");
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(Error::Session(
            "could not allocate a unique session id".to_string(),
        ))
    }

    /// All sessions, newest first.
    pub fn list_sessions(&self) -> Result<Vec<Session>> {
        let mut sessions = Vec::new();
        for entry in std::fs::read_dir(&self.base_path)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let id = entry.file_name().to_string_lossy().into_owned();
            sessions.push(Session::new(id, entry.path()));
        }
        sessions.sort_by(|a, b| b.id.cmp(&a.id));
        Ok(sessions)
    }

    pub fn latest_session(&self) -> Result<Option<Session>> {
        Ok(self.list_sessions()?.into_iter().next())
    }

    pub fn find_session_by_id(&self, id: &str) -> Result<Session> {
        self.list_sessions()?
            .into_iter()
            .find(|s| s.id == id)
            .ok_or_else(|| Error::Session(format!("session with ID {id:?} not found")))
    }

    /// Delete a session and all its data.
    pub fn delete_session(&self, id: &str) -> Result<()> {
        let session = self.find_session_by_id(id)?;
        std::fs::remove_dir_all(&session.path)?;
        info!(%id, "deleted session");
        Ok(())
    }

    /// Session together with its metadata.
    pub fn session_info(&self, id: &str) -> Result<(Session, Metadata)> {
        let session = self.find_session_by_id(id)?;
        let metadata = session.load_metadata()?;
        Ok((session, metadata))
    }
}
