//! LastAgent Core Library
//!
//! This crate provides the dispatch engine behind every LastAgent front-end:
//! - Agent registry with availability probing
//! - Routing a task to exactly one agent
//! - Supervising the agent subprocess with timeout and cancellation
//! - Normalizing its output into a uniform event stream
//! - Per-session state shared across turns
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     lastagent-core                          │
//! ├─────────────────────────────────────────────────────────────┤
//! │  agent/        - Registry, availability probe, router       │
//! │  process/      - Subprocess supervisor                      │
//! │  normalize.rs  - Raw output to NormalizedEvent              │
//! │  session/      - Session state and store                    │
//! │  dispatch/     - route_and_run, turns, decision log         │
//! │  config.rs     - TOML settings                              │
//! │  workflow.rs   - Fixed-phase delivery workflow              │
//! │  types/        - Shared type definitions                    │
//! │  error.rs      - Error types                                │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod agent;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod normalize;
pub mod process;
pub mod session;
pub mod types;
pub mod workflow;

// Re-export commonly used types
pub use error::{Error, NoAgentReason, Result, RoutingError};
pub use types::*;

pub use agent::{
    AgentRegistry, AvailabilityMode, AvailabilityProbe, PathProbe, Router, RouterConfig,
};
pub use config::{LogRotation, LoggingSettings, Settings};
pub use dispatch::{DecisionLog, Dispatcher, EventStream, Turn, TurnTranscript};
pub use normalize::{normalize, Normalizer};
pub use process::{RawChunk, Supervisor, SupervisorConfig};
pub use session::{SessionHandle, SessionLimits, SessionState, SessionStore};
pub use workflow::{WorkflowDriver, WorkflowEvent, WorkflowPhase, WorkflowReport};
