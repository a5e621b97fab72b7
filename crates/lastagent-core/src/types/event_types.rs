//! Normalized event vocabulary shared by every front-end

use serde::{Deserialize, Serialize};

/// Non-terminal error categories surfaced inside the event stream
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// A line the agent wrote to stderr
    AgentStderr,
    /// The executable vanished between the availability check and spawn
    AgentUnavailable,
}

/// How a turn ended
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TurnOutcome {
    Success,
    ExecutionFailed { code: Option<i32> },
    TimedOut,
    Cancelled,
    AgentUnavailable,
    /// Rejected before any process was spawned (routing or precondition)
    NotStarted { reason: String },
}

impl TurnOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::ExecutionFailed { .. } => "execution_failed",
            Self::TimedOut => "timed_out",
            Self::Cancelled => "cancelled",
            Self::AgentUnavailable => "agent_unavailable",
            Self::NotStarted { .. } => "not_started",
        }
    }
}

impl std::fmt::Display for TurnOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ExecutionFailed { code: Some(code) } => {
                write!(f, "agent exited with code {}", code)
            }
            Self::ExecutionFailed { code: None } => write!(f, "agent terminated by signal"),
            Self::TimedOut => write!(f, "timed out"),
            Self::Cancelled => write!(f, "cancelled"),
            Self::AgentUnavailable => write!(f, "agent unavailable"),
            Self::NotStarted { reason } => write!(f, "not started: {}", reason),
            Self::Success => write!(f, "success"),
        }
    }
}

/// Payload of the terminal `Done` event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TurnSummary {
    pub agent: String,
    pub outcome: TurnOutcome,
    pub exit_code: Option<i32>,
    /// Characters of text emitted during the turn
    pub chars: usize,
    pub duration_ms: u64,
    pub pid: Option<u32>,
    /// Last stderr bytes, kept only for unsuccessful turns
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr_tail: Option<String>,
}

/// Uniform event produced from an agent's raw output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NormalizedEvent {
    TextDelta { text: String },
    ToolCall { name: String, args: serde_json::Value },
    Error { kind: ErrorKind, message: String },
    Done(TurnSummary),
}

impl NormalizedEvent {
    pub fn text(text: impl Into<String>) -> Self {
        Self::TextDelta { text: text.into() }
    }

    pub fn stderr(message: impl Into<String>) -> Self {
        Self::Error {
            kind: ErrorKind::AgentStderr,
            message: message.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done(_))
    }

    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::TextDelta { text } => Some(text),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_event_wire_format() {
        let event = NormalizedEvent::stderr("warning: slow");
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"type": "error", "kind": "agent_stderr", "message": "warning: slow"})
        );
    }

    #[test]
    fn test_done_event_wire_format() {
        let event = NormalizedEvent::Done(TurnSummary {
            agent: "claude".to_string(),
            outcome: TurnOutcome::ExecutionFailed { code: Some(2) },
            exit_code: Some(2),
            chars: 10,
            duration_ms: 42,
            pid: None,
            stderr_tail: None,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "done");
        assert_eq!(json["outcome"]["status"], "execution_failed");
        assert_eq!(json["outcome"]["code"], 2);
        assert!(event.is_terminal());
    }

    #[test]
    fn test_outcome_display() {
        assert_eq!(
            TurnOutcome::ExecutionFailed { code: Some(3) }.to_string(),
            "agent exited with code 3"
        );
        assert!(!TurnOutcome::TimedOut.is_success());
    }
}
