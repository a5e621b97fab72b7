//! Session history types

use super::{Rationale, TurnOutcome};
use serde::{Deserialize, Serialize};

/// One completed `route_and_run` call as remembered by its session
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub turn_id: uuid::Uuid,
    pub prompt_preview: String,
    pub agent: Option<String>,
    pub rationale: Option<Rationale>,
    pub outcome: TurnOutcome,
    pub chars: usize,
    pub duration_ms: u64,
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// Audit record of one routing decision
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct DecisionRecord {
    pub turn_id: uuid::Uuid,
    pub session_id: String,
    pub agent: String,
    pub rationale: Rationale,
    pub alternatives: Vec<String>,
    pub outcome: Option<TurnOutcome>,
    pub decided_at: chrono::DateTime<chrono::Utc>,
}

/// Session summary for listing
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub session_id: String,
    pub active_agent: Option<String>,
    pub working_directory: std::path::PathBuf,
    pub turn_count: usize,
    pub created_at: chrono::DateTime<chrono::Utc>,
}
