//! HTTP route handlers for agents, decisions and sessions.

use super::ServerState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use lastagent_core::error::SessionError;
use lastagent_core::{AgentSummary, DecisionRecord, HistoryEntry, SessionSummary};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error};

const MAX_DECISIONS: usize = 1000;

/// API error rendered as an OpenAI-style error body
#[derive(Debug)]
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
    pub kind: &'static str,
    pub code: &'static str,
}

#[derive(Debug, Serialize)]
struct ErrorBody<'a> {
    error: ErrorDetail<'a>,
}

#[derive(Debug, Serialize)]
struct ErrorDetail<'a> {
    message: &'a str,
    #[serde(rename = "type")]
    kind: &'a str,
    code: &'a str,
}

impl ApiError {
    pub fn new(
        status: StatusCode,
        kind: &'static str,
        code: &'static str,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status,
            message: message.into(),
            kind,
            code,
        }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "invalid_request_error", "invalid_request", message)
    }

    pub fn not_found(code: &'static str, message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "invalid_request_error", code, message)
    }
}

impl From<lastagent_core::Error> for ApiError {
    fn from(err: lastagent_core::Error) -> Self {
        use lastagent_core::Error;
        match &err {
            Error::Routing(_) => Self::new(
                StatusCode::SERVICE_UNAVAILABLE,
                "service_unavailable",
                "no_agent_available",
                err.to_string(),
            ),
            Error::Session(SessionError::DirectoryNotFound(_)) => {
                Self::bad_request(err.to_string())
            }
            Error::Session(SessionError::UnknownAgent(_)) => {
                Self::not_found("agent_not_found", err.to_string())
            }
            _ => {
                error!(error = %err, "Request failed");
                Self::new(
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "server_error",
                    "internal_error",
                    err.to_string(),
                )
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                message: &self.message,
                kind: self.kind,
                code: self.code,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

#[derive(Debug, Serialize)]
pub struct RootResponse {
    pub name: &'static str,
    pub version: &'static str,
    pub description: &'static str,
}

pub async fn root() -> Json<RootResponse> {
    Json(RootResponse {
        name: "LastAgent",
        version: env!("CARGO_PKG_VERSION"),
        description: "Routes tasks to command-line coding agents",
    })
}

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub uptime_seconds: u64,
    pub agents_available: usize,
    pub agents_total: usize,
}

pub async fn health(State(state): State<Arc<ServerState>>) -> Json<HealthResponse> {
    let agents = state.ctx.dispatcher.list_agents(None);

    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        uptime_seconds: state.uptime_seconds(),
        agents_available: agents.iter().filter(|a| a.available).count(),
        agents_total: agents.len(),
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct AgentsQuery {
    pub capability: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct AgentsResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub capability: Option<String>,
    pub agents: Vec<AgentSummary>,
    pub count: usize,
}

impl AgentsResponse {
    fn new(capability: Option<String>, agents: Vec<AgentSummary>) -> Self {
        Self {
            capability,
            count: agents.len(),
            agents,
        }
    }
}

pub async fn list_agents(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<AgentsQuery>,
) -> Json<AgentsResponse> {
    let agents = state.ctx.dispatcher.list_agents(query.capability.as_deref());
    Json(AgentsResponse::new(query.capability, agents))
}

pub async fn get_agent(
    State(state): State<Arc<ServerState>>,
    Path(name): Path<String>,
) -> Result<Json<AgentSummary>, ApiError> {
    let registry = state.ctx.dispatcher.registry();
    let descriptor = registry
        .get(&name)
        .ok_or_else(|| {
            ApiError::not_found("agent_not_found", format!("Agent not found: {}", name))
        })?;

    Ok(Json(AgentSummary::from_descriptor(
        descriptor,
        registry.check_availability(descriptor),
    )))
}

pub async fn agents_by_capability(
    State(state): State<Arc<ServerState>>,
    Path(capability): Path<String>,
) -> Json<AgentsResponse> {
    let agents = state.ctx.dispatcher.list_agents(Some(&capability));
    Json(AgentsResponse::new(Some(capability), agents))
}

#[derive(Debug, Default, Deserialize)]
pub struct DecisionsQuery {
    pub limit: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct DecisionsResponse {
    pub decisions: Vec<DecisionRecord>,
    pub count: usize,
}

pub async fn recent_decisions(
    State(state): State<Arc<ServerState>>,
    Query(query): Query<DecisionsQuery>,
) -> Json<DecisionsResponse> {
    let limit = query.limit.unwrap_or(50).min(MAX_DECISIONS);
    let decisions = state.ctx.dispatcher.recent_decisions(limit);
    Json(DecisionsResponse {
        count: decisions.len(),
        decisions,
    })
}

#[derive(Debug, Serialize)]
pub struct SessionsResponse {
    pub sessions: Vec<SessionSummary>,
    pub count: usize,
}

pub async fn list_sessions(State(state): State<Arc<ServerState>>) -> Json<SessionsResponse> {
    let sessions = state.ctx.sessions.summaries();
    Json(SessionsResponse {
        count: sessions.len(),
        sessions,
    })
}

#[derive(Debug, Serialize)]
pub struct HistoryResponse {
    pub session: SessionSummary,
    pub history: Vec<HistoryEntry>,
}

/// Waits for the session's running turn, if any, to finish
pub async fn session_history(
    State(state): State<Arc<ServerState>>,
    Path(session_id): Path<String>,
) -> Result<Json<HistoryResponse>, ApiError> {
    debug!(session_id = %session_id, "Getting session history");

    let session = state.ctx.sessions.get(&session_id).ok_or_else(|| {
        ApiError::not_found("session_not_found", format!("Session not found: {}", session_id))
    })?;

    let session = session.lock().await;
    Ok(Json(HistoryResponse {
        session: session.summary(),
        history: session.history().to_vec(),
    }))
}

/// Forget a session; a turn already running on it still completes
pub async fn delete_session(
    State(state): State<Arc<ServerState>>,
    Path(session_id): Path<String>,
) -> Result<StatusCode, ApiError> {
    match state.ctx.sessions.remove(&session_id) {
        Some(_) => {
            debug!(session_id = %session_id, "Session deleted");
            Ok(StatusCode::NO_CONTENT)
        }
        None => Err(ApiError::not_found(
            "session_not_found",
            format!("Session not found: {}", session_id),
        )),
    }
}
