//! Shared state for the REST server

use crate::AppContext;
use std::time::Instant;

pub struct ServerState {
    pub ctx: AppContext,

    /// Server start time (for health checks)
    pub started_at: Instant,
}

impl ServerState {
    pub fn new(ctx: AppContext) -> Self {
        Self {
            ctx,
            started_at: Instant::now(),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
