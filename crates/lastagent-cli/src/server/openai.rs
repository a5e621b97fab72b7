//! OpenAI-compatible chat completions
//!
//! `model` names the agent to force; `auto` (or `lastagent`, or nothing)
//! lets the router choose. Requests carrying the same `x-session-id` header
//! (or `user` field) share a session and therefore run one after another.

use super::routes::ApiError;
use super::ServerState;
use axum::{
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use futures::{stream, StreamExt};
use lastagent_core::{
    NormalizedEvent, SessionHandle, SessionState, TaskRequest, TurnOutcome, TurnSummary,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::convert::Infallible;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub const SESSION_HEADER: &str = "x-session-id";
pub const AGENT_HEADER: &str = "x-lastagent-agent";

const AUTO_MODELS: [&str; 2] = ["auto", "lastagent"];

#[derive(Debug, Clone, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    #[serde(default)]
    pub content: MessageContent,
}

/// Plain string or an array of typed parts; only text parts are kept
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl Default for MessageContent {
    fn default() -> Self {
        Self::Text(String::new())
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub text: Option<String>,
}

impl MessageContent {
    pub fn text(&self) -> String {
        match self {
            Self::Text(text) => text.clone(),
            Self::Parts(parts) => parts
                .iter()
                .filter(|p| p.kind == "text")
                .filter_map(|p| p.text.as_deref())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChatCompletionRequest {
    #[serde(default)]
    pub model: Option<String>,
    pub messages: Vec<ChatMessage>,
    #[serde(default)]
    pub stream: bool,
    #[serde(default)]
    pub user: Option<String>,
    /// Routing hint, not part of the OpenAI schema
    #[serde(default)]
    pub capabilities: Vec<String>,
    #[serde(default)]
    pub working_directory: Option<PathBuf>,
    /// Seconds
    #[serde(default)]
    pub timeout: Option<u64>,
}

impl ChatCompletionRequest {
    /// Forced agent named by `model`, if any
    pub fn forced_agent(&self) -> Option<&str> {
        self.model
            .as_deref()
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .filter(|m| !AUTO_MODELS.iter().any(|auto| m.eq_ignore_ascii_case(auto)))
    }

    /// System messages become the system prompt, the last user message the prompt
    pub fn to_task_request(&self) -> Result<TaskRequest, ApiError> {
        let prompt = self
            .messages
            .iter()
            .rev()
            .find(|m| m.role == "user")
            .map(|m| m.content.text())
            .filter(|p| !p.trim().is_empty())
            .ok_or_else(|| {
                ApiError::bad_request("messages must contain a non-empty user message")
            })?;

        let system: Vec<String> = self
            .messages
            .iter()
            .filter(|m| m.role == "system")
            .map(|m| m.content.text())
            .filter(|s| !s.trim().is_empty())
            .collect();

        let mut request = TaskRequest::new(prompt)
            .with_capabilities(self.capabilities.iter().cloned())
            .with_stream(self.stream);
        if !system.is_empty() {
            request = request.with_system_prompt(system.join("\n\n"));
        }
        if let Some(agent) = self.forced_agent() {
            request = request.with_agent(agent);
        }
        if let Some(dir) = &self.working_directory {
            request = request.with_working_directory(dir.clone());
        }
        if let Some(secs) = self.timeout {
            request = request.with_timeout(Duration::from_secs(secs));
        }
        Ok(request)
    }
}

#[derive(Debug, Serialize)]
pub struct ChatCompletion {
    pub id: String,
    pub object: &'static str,
    pub created: i64,
    pub model: String,
    pub choices: Vec<Choice>,
    pub usage: Usage,
}

#[derive(Debug, Serialize)]
pub struct Choice {
    pub index: u32,
    pub message: AssistantMessage,
    pub finish_reason: &'static str,
}

#[derive(Debug, Serialize)]
pub struct AssistantMessage {
    pub role: &'static str,
    pub content: String,
}

/// Agents report no token counts
#[derive(Debug, Default, Serialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

#[derive(Debug, Serialize)]
pub struct ModelList {
    pub object: &'static str,
    pub data: Vec<Model>,
}

#[derive(Debug, Serialize)]
pub struct Model {
    pub id: String,
    pub object: &'static str,
    pub owned_by: &'static str,
}

/// `GET /v1/models`: `auto` followed by every available agent
pub async fn list_models(State(state): State<Arc<ServerState>>) -> Json<ModelList> {
    let agents = state.ctx.dispatcher.list_agents(None);
    let data = std::iter::once("auto".to_string())
        .chain(agents.into_iter().filter(|a| a.available).map(|a| a.name))
        .map(|id| Model {
            id,
            object: "model",
            owned_by: "lastagent",
        })
        .collect();

    Json(ModelList { object: "list", data })
}

/// `POST /v1/chat/completions`
pub async fn chat_completions(
    State(state): State<Arc<ServerState>>,
    headers: HeaderMap,
    Json(body): Json<ChatCompletionRequest>,
) -> Result<Response, ApiError> {
    let request = body.to_task_request()?;
    let session = resolve_session(&state, &headers, body.user.as_deref());

    info!(
        model = body.model.as_deref().unwrap_or("auto"),
        stream = body.stream,
        prompt = %request.preview(),
        "Chat completion request"
    );

    let turn = state.ctx.dispatcher.route_and_run(request, session).await?;
    let agent = turn.agent().to_string();
    let id = format!("chatcmpl-{}", turn.id.simple());
    let created = chrono::Utc::now().timestamp();

    let mut response = if body.stream {
        let head = chunk(&id, created, &agent, json!({ "role": "assistant" }), None);
        let model = agent.clone();
        let deltas = turn
            .into_events()
            .flat_map(move |event| stream::iter(frames_for(&id, created, &model, event)));
        let frames = stream::once(async move { head })
            .chain(deltas)
            .chain(stream::once(async { Event::default().data("[DONE]") }))
            .map(Ok::<_, Infallible>);

        Sse::new(frames).keep_alive(KeepAlive::default()).into_response()
    } else {
        let transcript = turn.collect().await;
        match transcript.summary.as_ref() {
            Some(summary) if summary.outcome.is_success() => Json(ChatCompletion {
                id,
                object: "chat.completion",
                created,
                model: agent.clone(),
                choices: vec![Choice {
                    index: 0,
                    message: AssistantMessage {
                        role: "assistant",
                        content: transcript.text(),
                    },
                    finish_reason: "stop",
                }],
                usage: Usage::default(),
            })
            .into_response(),
            summary => return Err(turn_failed(&agent, summary)),
        }
    };

    if let Ok(value) = HeaderValue::from_str(&agent) {
        response.headers_mut().insert(AGENT_HEADER, value);
    }
    Ok(response)
}

/// Header first, then `user`; anonymous requests get a throwaway session
fn resolve_session(state: &ServerState, headers: &HeaderMap, user: Option<&str>) -> SessionHandle {
    let key = headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .or(user)
        .map(str::trim)
        .filter(|k| !k.is_empty());

    match key {
        Some(key) => state.ctx.sessions.get_or_create(key),
        None => SessionState::ephemeral().into_handle(),
    }
}

fn chunk(
    id: &str,
    created: i64,
    model: &str,
    delta: serde_json::Value,
    finish_reason: Option<&str>,
) -> Event {
    let payload = json!({
        "id": id,
        "object": "chat.completion.chunk",
        "created": created,
        "model": model,
        "choices": [{ "index": 0, "delta": delta, "finish_reason": finish_reason }],
    });
    Event::default().data(payload.to_string())
}

fn frames_for(id: &str, created: i64, model: &str, event: NormalizedEvent) -> Vec<Event> {
    match event {
        NormalizedEvent::TextDelta { text } => {
            vec![chunk(id, created, model, json!({ "content": format!("{}\n", text) }), None)]
        }
        NormalizedEvent::ToolCall { .. } | NormalizedEvent::Error { .. } => Vec::new(),
        NormalizedEvent::Done(summary) if summary.outcome.is_success() => {
            vec![chunk(id, created, model, json!({}), Some("stop"))]
        }
        NormalizedEvent::Done(summary) => {
            let error = turn_failed(model, Some(&summary));
            let payload = json!({
                "error": { "message": error.message, "type": error.kind, "code": error.code }
            });
            vec![
                Event::default().data(payload.to_string()),
                chunk(id, created, model, json!({}), Some("stop")),
            ]
        }
    }
}

fn turn_failed(agent: &str, summary: Option<&TurnSummary>) -> ApiError {
    let Some(summary) = summary else {
        return ApiError::new(
            StatusCode::BAD_GATEWAY,
            "agent_error",
            "agent_failed",
            format!("agent {} ended without a result", agent),
        );
    };

    let mut message = format!("agent {}: {}", agent, summary.outcome);
    if let Some(tail) = summary.stderr_tail.as_deref().map(str::trim).filter(|t| !t.is_empty()) {
        message.push('\n');
        message.push_str(tail);
    }
    warn!(agent, outcome = summary.outcome.label(), "Turn failed");

    match summary.outcome {
        TurnOutcome::TimedOut => {
            ApiError::new(StatusCode::GATEWAY_TIMEOUT, "agent_error", "timed_out", message)
        }
        _ => ApiError::new(
            StatusCode::BAD_GATEWAY,
            "agent_error",
            summary.outcome.label(),
            message,
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn request(value: serde_json::Value) -> ChatCompletionRequest {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_model_selects_forced_agent() {
        let messages = json!([{ "role": "user", "content": "hi" }]);
        let forced = |model: &str| {
            request(json!({ "model": model, "messages": messages }))
                .forced_agent()
                .map(str::to_string)
        };
        assert_eq!(forced("aider"), Some("aider".to_string()));
        assert_eq!(forced("auto"), None);
        assert_eq!(forced("LastAgent"), None);
        assert_eq!(request(json!({ "messages": messages })).forced_agent(), None);
    }

    #[test]
    fn test_to_task_request_uses_system_and_last_user_message() {
        let body = request(json!({
            "messages": [
                { "role": "system", "content": "be brief" },
                { "role": "user", "content": "first" },
                { "role": "assistant", "content": "ok" },
                { "role": "user", "content": [{ "type": "text", "text": "second" }] }
            ],
            "stream": true,
            "capabilities": ["git"],
            "timeout": 5
        }));

        let task = body.to_task_request().unwrap();
        assert_eq!(task.full_prompt(), "be brief\n\nsecond");
        assert_eq!(task.capabilities, vec!["git".to_string()]);
        assert_eq!(task.timeout, Some(Duration::from_secs(5)));
        assert!(task.stream);
    }

    #[test]
    fn test_missing_user_message_is_bad_request() {
        let body = request(json!({ "messages": [{ "role": "system", "content": "x" }] }));
        let err = body.to_task_request().unwrap_err();
        assert_eq!(err.status, StatusCode::BAD_REQUEST);
    }

    #[test]
    fn test_timed_out_maps_to_gateway_timeout() {
        let summary = TurnSummary {
            agent: "slow".to_string(),
            outcome: TurnOutcome::TimedOut,
            exit_code: None,
            chars: 0,
            duration_ms: 1000,
            pid: None,
            stderr_tail: Some("still thinking".to_string()),
        };
        let err = turn_failed("slow", Some(&summary));
        assert_eq!(err.status, StatusCode::GATEWAY_TIMEOUT);
        assert!(err.message.contains("still thinking"));
    }
}
