//! Error types for LastAgent Core

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for LastAgent operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Whether this error means no agent could take the turn.
    pub fn is_no_agent_available(&self) -> bool {
        matches!(self, Error::Routing(RoutingError::NoAgentAvailable(_)))
    }
}

/// Routing errors. Always raised before any process is spawned.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RoutingError {
    #[error("No agent available: {0}")]
    NoAgentAvailable(NoAgentReason),
}

/// Why the router could not pick an agent
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum NoAgentReason {
    /// The forced agent name is not registered
    UnknownAgent { name: String },
    /// The forced agent is registered but its executable is missing
    AgentUnavailable { name: String },
    /// No available agent carries any of the requested capabilities
    NoCapabilityMatch { capabilities: Vec<String> },
    /// Nothing in the registry is available
    NoneAvailable,
}

impl std::fmt::Display for NoAgentReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::UnknownAgent { name } => write!(f, "agent '{}' is not registered", name),
            Self::AgentUnavailable { name } => write!(f, "agent '{}' is not installed", name),
            Self::NoCapabilityMatch { capabilities } => write!(
                f,
                "no available agent has any of the capabilities [{}]",
                capabilities.join(", ")
            ),
            Self::NoneAvailable => write!(f, "no registered agent is installed"),
        }
    }
}

/// Session errors
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Directory not found: {0}")]
    DirectoryNotFound(PathBuf),

    #[error("Unknown agent: {0}")]
    UnknownAgent(String),
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

impl serde::Serialize for Error {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;
