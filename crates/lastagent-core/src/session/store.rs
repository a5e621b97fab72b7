//! In-memory session store keyed by session id

use super::{SessionHandle, SessionState};
use crate::types::SessionSummary;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

/// Bounds on how many sessions a long-running front-end keeps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionLimits {
    /// Sessions untouched for this long are dropped
    pub idle_ttl: Option<Duration>,
    /// Least recently used sessions are dropped beyond this count
    pub max_sessions: Option<usize>,
}

impl Default for SessionLimits {
    fn default() -> Self {
        Self {
            idle_ttl: Some(Duration::from_secs(60 * 60)),
            max_sessions: Some(1000),
        }
    }
}

impl SessionLimits {
    pub fn unbounded() -> Self {
        Self {
            idle_ttl: None,
            max_sessions: None,
        }
    }
}

#[derive(Debug)]
struct Entry {
    handle: SessionHandle,
    last_used: Instant,
}

impl Entry {
    /// Nobody outside the store holds the session and no turn is running on it
    fn is_evictable(&self) -> bool {
        Arc::strong_count(&self.handle) == 1 && self.handle.try_lock().is_ok()
    }
}

/// Sessions shared by repeated front-end calls bearing the same id.
///
/// Eviction runs whenever a session is created and never touches a session
/// that is in use.
#[derive(Debug)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, Entry>>,
    default_directory: PathBuf,
    limits: SessionLimits,
}

impl SessionStore {
    /// New sessions start in `default_directory`
    pub fn new(default_directory: impl Into<PathBuf>) -> Self {
        Self::with_limits(default_directory, SessionLimits::default())
    }

    pub fn with_limits(default_directory: impl Into<PathBuf>, limits: SessionLimits) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            default_directory: default_directory.into(),
            limits,
        }
    }

    pub fn limits(&self) -> SessionLimits {
        self.limits
    }

    pub fn get(&self, id: &str) -> Option<SessionHandle> {
        let mut sessions = self.sessions.lock();
        sessions.get_mut(id).map(|entry| {
            entry.last_used = Instant::now();
            Arc::clone(&entry.handle)
        })
    }

    /// Existing session for `id`, or a fresh one
    pub fn get_or_create(&self, id: &str) -> SessionHandle {
        let now = Instant::now();
        let mut sessions = self.sessions.lock();
        if let Some(entry) = sessions.get_mut(id) {
            entry.last_used = now;
            return Arc::clone(&entry.handle);
        }

        self.make_room(&mut sessions, now);
        debug!(session_id = %id, "Session created");
        let handle = SessionState::new(id, self.default_directory.clone()).into_handle();
        sessions.insert(
            id.to_string(),
            Entry {
                handle: Arc::clone(&handle),
                last_used: now,
            },
        );
        handle
    }

    /// Session with a fresh random id
    pub fn create(&self) -> (String, SessionHandle) {
        let id = uuid::Uuid::new_v4().to_string();
        let handle = self.get_or_create(&id);
        (id, handle)
    }

    pub fn remove(&self, id: &str) -> Option<SessionHandle> {
        self.sessions.lock().remove(id).map(|entry| entry.handle)
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.lock().is_empty()
    }

    /// Drop sessions idle for longer than the TTL, returning how many went
    pub fn evict_idle(&self) -> usize {
        let mut sessions = self.sessions.lock();
        let before = sessions.len();
        self.expire(&mut sessions, Instant::now());
        before - sessions.len()
    }

    fn expire(&self, sessions: &mut HashMap<String, Entry>, now: Instant) {
        let Some(ttl) = self.limits.idle_ttl else {
            return;
        };
        sessions.retain(|id, entry| {
            let keep = now.duration_since(entry.last_used) < ttl || !entry.is_evictable();
            if !keep {
                debug!(session_id = %id, "Idle session evicted");
            }
            keep
        });
    }

    /// Expire idle sessions, then drop least recently used ones until a new
    /// session fits
    fn make_room(&self, sessions: &mut HashMap<String, Entry>, now: Instant) {
        self.expire(sessions, now);

        let Some(max) = self.limits.max_sessions.map(|m| m.max(1)) else {
            return;
        };
        while sessions.len() >= max {
            let oldest = sessions
                .iter()
                .filter(|(_, entry)| entry.is_evictable())
                .min_by_key(|(_, entry)| entry.last_used)
                .map(|(id, _)| id.clone());
            match oldest {
                Some(id) => {
                    debug!(session_id = %id, "Least recently used session evicted");
                    sessions.remove(&id);
                }
                None => break,
            }
        }
    }

    /// Summaries of sessions not currently running a turn
    pub fn summaries(&self) -> Vec<SessionSummary> {
        let handles: Vec<SessionHandle> = self
            .sessions
            .lock()
            .values()
            .map(|entry| Arc::clone(&entry.handle))
            .collect();
        handles
            .iter()
            .filter_map(|h| h.try_lock().ok().map(|s| s.summary()))
            .collect()
    }
}
