//! Daemon HTTP Server
//!
//! Exposes relay sessions over HTTP:
//!
//! ```text
//!   submitter ── POST /message ──────────┐
//!   (X-Session-Id: abc)                   │
//!                                         ▼
//!                                SessionRegistry ── "abc" ──► ConversationSession
//!                                         │                        │ broadcast
//!   viewer ──── GET /connect?session_id=abc ◄──── SSE frames ──────┘
//! ```
//!
//! - `POST /message`: submit a user message; replies once the stream ended
//! - `GET /connect`: attach as a viewer; one SSE `data` event per broadcast
//! - `POST /system-prompt`: reset a session's history with a new system prompt
//! - `GET /health`: liveness and session count
//!
//! Cancelling the shutdown token ends every open SSE stream so a graceful
//! shutdown does not wait on connected viewers.

use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;

use axum::body::Bytes;
use axum::extract::{Query, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::{Stream, StreamExt};
use serde::Deserialize;
use thiserror::Error;
use tower_http::cors::CorsLayer;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info};

use relay_core::{ConversationSession, RelayError, SessionRegistry};

/// Header carrying the submitter's session id
pub const SESSION_HEADER: &str = "x-session-id";

/// Interval between SSE keep-alive comments
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    /// All sessions
    pub registry: Arc<SessionRegistry>,
    /// Cancelled when the daemon shuts down
    pub shutdown: CancellationToken,
}

impl AppState {
    /// Create state around a registry
    pub fn new(registry: SessionRegistry, shutdown: CancellationToken) -> Self {
        Self {
            registry: Arc::new(registry),
            shutdown,
        }
    }
}

/// Errors returned by handlers
#[derive(Debug, Error)]
pub enum ApiError {
    /// No usable `X-Session-Id` header
    #[error("Missing X-Session-Id header")]
    MissingSessionHeader,

    /// No usable `session_id` query parameter
    #[error("Missing session_id query parameter")]
    MissingSessionQuery,

    /// The request body could not be understood
    #[error("Invalid request body: {0}")]
    InvalidBody(String),

    /// The relay rejected or failed the operation
    #[error(transparent)]
    Relay(#[from] RelayError),

    /// The submission task died
    #[error("internal error: {0}")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::MissingSessionHeader
            | Self::MissingSessionQuery
            | Self::InvalidBody(_)
            | Self::Relay(RelayError::MissingSessionIdentifier) => StatusCode::BAD_REQUEST,
            Self::Relay(RelayError::SessionBusy(_)) => StatusCode::CONFLICT,
            Self::Relay(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            error!(error = %self, "Request failed");
        } else {
            debug!(error = %self, status = %status, "Request rejected");
        }
        (status, self.to_string()).into_response()
    }
}

#[derive(Deserialize)]
struct MessageBody {
    message: String,
}

#[derive(Deserialize)]
struct SystemPromptBody {
    prompt: String,
}

#[derive(Deserialize)]
struct ConnectParams {
    session_id: Option<String>,
}

/// Build the router
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/message", post(message_handler))
        .route("/connect", get(connect_handler))
        .route("/system-prompt", post(system_prompt_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Resolve the session named by the `X-Session-Id` header
fn session_from_headers(
    state: &AppState,
    headers: &HeaderMap,
) -> Result<Arc<ConversationSession>, ApiError> {
    let id = headers
        .get(SESSION_HEADER)
        .and_then(|value| value.to_str().ok())
        .filter(|id| !id.trim().is_empty())
        .ok_or(ApiError::MissingSessionHeader)?;
    Ok(state.registry.get_or_create(id)?)
}

/// Extract the user message from a JSON or plain-text body
fn message_text(headers: &HeaderMap, body: &Bytes) -> Result<String, ApiError> {
    let is_plain_text = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .is_some_and(|ct| ct.starts_with("text/plain"));

    if is_plain_text {
        return String::from_utf8(body.to_vec()).map_err(|e| ApiError::InvalidBody(e.to_string()));
    }

    serde_json::from_slice::<MessageBody>(body)
        .map(|parsed| parsed.message)
        .map_err(|e| ApiError::InvalidBody(e.to_string()))
}

async fn message_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<StatusCode, ApiError> {
    let text = message_text(&headers, &body)?;
    let session = session_from_headers(&state, &headers)?;
    info!(session_id = %session.id(), chars = text.len(), "Message received");

    // The submission outlives this request if the submitter hangs up
    let completion = tokio::spawn(async move { session.submit_user_message(text).await })
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;

    debug!(sentences = completion.sentences, "Message relayed");
    Ok(StatusCode::OK)
}

async fn connect_handler(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let id = params
        .session_id
        .filter(|id| !id.trim().is_empty())
        .ok_or(ApiError::MissingSessionQuery)?;
    let session = state.registry.get_or_create(&id)?;

    let subscription = session.attach_viewer();
    info!(
        session_id = %session.id(),
        viewer_id = %subscription.id(),
        viewers = session.viewers().count(),
        "Viewer connected"
    );

    // Dropping the stream (client gone) drops the subscription, which detaches it
    let stream = subscription
        .take_until(state.shutdown.clone().cancelled_owned())
        .map(|frame| Ok::<_, Infallible>(Event::default().data(frame)));

    Ok(Sse::new(stream).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL)))
}

async fn system_prompt_handler(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(body): Json<SystemPromptBody>,
) -> Result<StatusCode, ApiError> {
    let session = session_from_headers(&state, &headers)?;
    session.set_system_prompt(body.prompt)?;
    Ok(StatusCode::OK)
}

async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "provider": state.registry.provider().name(),
        "sessions": state.registry.len(),
    }))
}
