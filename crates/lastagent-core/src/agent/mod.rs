//! Agent registry and routing
//!
//! This module handles:
//! - The declared table of agents and their availability
//! - Selecting exactly one agent for a task

mod availability;
mod registry;
mod router;

pub use availability::{AvailabilityMode, AvailabilityProbe, PathProbe};
pub use registry::AgentRegistry;
pub use router::{Router, RouterConfig};
