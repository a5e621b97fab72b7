//! Core type definitions for LastAgent
//!
//! Shared vocabulary between the registry, router, supervisor, normalizer
//! and the front-ends.

mod agent_types;
mod event_types;
mod session_types;
mod task_types;

pub use agent_types::*;
pub use event_types::*;
pub use session_types::*;
pub use task_types::*;
