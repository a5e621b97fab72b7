//! LastAgent front-ends
//!
//! Every front-end builds a [`TaskRequest`](lastagent_core::TaskRequest),
//! calls [`Dispatcher::route_and_run`] and renders the resulting events:
//! - `cli`      - argument parsing and dispatch
//! - `commands` - one-shot `chat`, `agents` and `workflow` commands
//! - `repl`     - interactive session
//! - `server`   - OpenAI-compatible REST API
//! - `mcp`      - JSON-RPC tool server over stdio

pub mod cli;
pub mod commands;
pub mod logging;
pub mod mcp;
pub mod render;
pub mod repl;
pub mod server;

use lastagent_core::{Dispatcher, SessionStore, Settings};
use std::path::PathBuf;
use std::sync::Arc;

/// Settings plus the dispatcher and sessions built from them, shared by all front-ends
#[derive(Clone)]
pub struct AppContext {
    pub settings: Arc<Settings>,
    pub dispatcher: Arc<Dispatcher>,
    pub sessions: Arc<SessionStore>,
}

impl AppContext {
    pub fn new(settings: Settings) -> lastagent_core::Result<Self> {
        let dispatcher = settings.build_dispatcher()?;
        let cwd = std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        Ok(Self::with_dispatcher(settings, dispatcher, cwd))
    }

    pub fn with_dispatcher(
        settings: Settings,
        dispatcher: Dispatcher,
        cwd: impl Into<PathBuf>,
    ) -> Self {
        let sessions = SessionStore::with_limits(cwd, settings.session_limits());
        Self {
            settings: Arc::new(settings),
            dispatcher: Arc::new(dispatcher),
            sessions: Arc::new(sessions),
        }
    }
}
