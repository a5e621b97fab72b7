//! Session state
//!
//! A session is the mutable record shared by consecutive turns of one
//! conversation: the active agent override, the working directory and the
//! history of turns. Turns of one session never overlap; the dispatcher
//! holds the session lock for the whole turn.

mod store;

pub use store::{SessionLimits, SessionStore};

use crate::error::{Result, SessionError};
use crate::types::{HistoryEntry, SessionSummary};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::info;

/// Shared, turn-serializing handle to a session
pub type SessionHandle = Arc<tokio::sync::Mutex<SessionState>>;

#[derive(Debug, Clone)]
pub struct SessionState {
    pub id: String,
    active_agent: Option<String>,
    working_directory: PathBuf,
    history: Vec<HistoryEntry>,
    pub created_at: chrono::DateTime<chrono::Utc>,
}

impl SessionState {
    pub fn new(id: impl Into<String>, working_directory: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            active_agent: None,
            working_directory: working_directory.into(),
            history: Vec::new(),
            created_at: chrono::Utc::now(),
        }
    }

    /// New session with a random id rooted at the process working directory
    pub fn ephemeral() -> Self {
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Self::new(uuid::Uuid::new_v4().to_string(), cwd)
    }

    pub fn into_handle(self) -> SessionHandle {
        Arc::new(tokio::sync::Mutex::new(self))
    }

    pub fn active_agent(&self) -> Option<&str> {
        self.active_agent.as_deref()
    }

    /// Set or clear the persistent agent override.
    ///
    /// Validation against the registry is the dispatcher's job.
    pub fn set_active_agent(&mut self, agent: Option<String>) {
        info!(session_id = %self.id, agent = ?agent, "Active agent changed");
        self.active_agent = agent;
    }

    pub fn working_directory(&self) -> &Path {
        &self.working_directory
    }

    /// Change the working directory; the target must be an existing directory.
    ///
    /// Relative paths resolve against the current working directory.
    pub fn change_directory(&mut self, path: impl AsRef<Path>) -> Result<&Path> {
        let path = path.as_ref();
        let target = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.working_directory.join(path)
        };

        if !target.is_dir() {
            return Err(SessionError::DirectoryNotFound(target).into());
        }

        let target = target.canonicalize().unwrap_or(target);
        info!(session_id = %self.id, cwd = %target.display(), "Working directory changed");
        self.working_directory = target;
        Ok(&self.working_directory)
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history
    }

    /// Append the record of a finished turn
    pub fn apply_turn(&mut self, entry: HistoryEntry) {
        self.history.push(entry);
    }

    pub fn turn_count(&self) -> usize {
        self.history.len()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            session_id: self.id.clone(),
            active_agent: self.active_agent.clone(),
            working_directory: self.working_directory.clone(),
            turn_count: self.history.len(),
            created_at: self.created_at,
        }
    }
}
