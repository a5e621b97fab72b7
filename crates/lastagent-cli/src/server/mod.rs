//! OpenAI-compatible REST server
//!
//! # Endpoints
//!
//! - `GET /` - Service banner
//! - `GET /health` - Health check
//! - `GET /v1/models` - Agents exposed as models
//! - `POST /v1/chat/completions` - Route a chat to an agent (JSON or SSE)
//! - `GET /v1/agents` - List agents, `?capability=` to filter
//! - `GET /v1/agents/:name` - One agent
//! - `GET /v1/agents/by-capability/:capability` - Agents with a capability
//! - `GET /v1/decisions` - Recent routing decisions, `?limit=`
//! - `GET /v1/sessions` - Known sessions
//! - `GET /v1/sessions/:id/history` - Turns of one session
//! - `DELETE /v1/sessions/:id` - Forget a session

pub mod openai;
pub mod routes;
pub mod state;

use axum::{
    extract::Request,
    http::HeaderValue,
    middleware::{self, Next},
    response::Response,
    routing::{delete, get, post},
    Router,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, info_span, Instrument};

pub use state::ServerState;

/// Request/response correlation header
pub const TRACE_ID_HEADER: &str = "x-trace-id";

/// Create the API router with all routes configured.
pub fn create_router(state: Arc<ServerState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/", get(routes::root))
        .route("/health", get(routes::health))
        // OpenAI-compatible surface
        .route("/v1/models", get(openai::list_models))
        .route("/v1/chat/completions", post(openai::chat_completions))
        // Agents and routing
        .route("/v1/agents", get(routes::list_agents))
        .route("/v1/agents/by-capability/:capability", get(routes::agents_by_capability))
        .route("/v1/agents/:name", get(routes::get_agent))
        .route("/v1/decisions", get(routes::recent_decisions))
        .route("/v1/sessions", get(routes::list_sessions))
        .route("/v1/sessions/:id", delete(routes::delete_session))
        .route("/v1/sessions/:id/history", get(routes::session_history))
        // Middleware
        .layer(middleware::from_fn(trace_id))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// Start the API server on the given address.
pub async fn serve(state: Arc<ServerState>, addr: SocketAddr) -> anyhow::Result<()> {
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Starting LastAgent API server");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutting down");
        })
        .await?;

    Ok(())
}

/// 16 hex chars of a random uuid
pub fn generate_trace_id() -> String {
    let mut id = uuid::Uuid::new_v4().simple().to_string();
    id.truncate(16);
    id
}

/// Tag every request with a trace id, reusing the caller's when present
async fn trace_id(request: Request, next: Next) -> Response {
    let trace_id = request
        .headers()
        .get(TRACE_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty() && v.len() <= 64)
        .map(str::to_string)
        .unwrap_or_else(generate_trace_id);

    let span = info_span!(
        "request",
        trace_id = %trace_id,
        method = %request.method(),
        path = %request.uri().path(),
    );

    let mut response = next.run(request).instrument(span).await;
    if let Ok(value) = HeaderValue::from_str(&trace_id) {
        response.headers_mut().insert(TRACE_ID_HEADER, value);
    }
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_trace_id() {
        let id = generate_trace_id();
        assert_eq!(id.len(), 16);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(id, generate_trace_id());
    }
}
