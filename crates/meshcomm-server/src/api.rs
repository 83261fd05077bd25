//! Request handlers.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::{
        IntoResponse, Response, Sse,
        sse::{Event as SseEvent, KeepAlive},
    },
};
use futures::stream::Stream;
use meshcomm_core::{Category, MeshCommError, Message, User};
use meshcomm_mesh::{LoopState, PublishOutcome};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, warn};

use crate::AppState;

// ── Errors ─────────────────────────────────────────────────────

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

#[derive(Serialize)]
struct ErrorResponse {
    code: &'static str,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }
}

impl From<MeshCommError> for ApiError {
    fn from(err: MeshCommError) -> Self {
        match err {
            MeshCommError::UnknownCategory(_) => Self::bad_request(err.to_string()),
            MeshCommError::NotJoined(_) => {
                Self::new(StatusCode::CONFLICT, "NOT_JOINED", err.to_string())
            }
            MeshCommError::Publish { .. } => {
                Self::new(StatusCode::BAD_GATEWAY, "PUBLISH_FAILED", err.to_string())
            }
            other => Self::new(
                StatusCode::INTERNAL_SERVER_ERROR,
                "INTERNAL",
                other.to_string(),
            ),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let payload = ErrorResponse {
            code: self.code,
            message: self.message,
        };
        (self.status, Json(payload)).into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

// ── Health ─────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    node_id: String,
    topics: Vec<TopicStatus>,
}

#[derive(Serialize)]
pub struct TopicStatus {
    category: Category,
    state: String,
    running: bool,
    accepted: u64,
    self_echo: u64,
    malformed: u64,
}

/// `503` as soon as any dispatch loop has stopped.
pub async fn health(State(state): State<Arc<AppState>>) -> (StatusCode, Json<HealthResponse>) {
    let network = &state.network;
    let topics: Vec<TopicStatus> = network
        .health()
        .into_iter()
        .map(|h| TopicStatus {
            category: h.category,
            running: matches!(h.state, LoopState::Running),
            state: h.state.to_string(),
            accepted: h.accepted,
            self_echo: h.self_echo,
            malformed: h.malformed,
        })
        .collect();

    let healthy = topics.iter().all(|t| t.running);
    let status = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (
        status,
        Json(HealthResponse {
            status: if healthy { "ok" } else { "degraded" },
            version: env!("CARGO_PKG_VERSION"),
            node_id: network.node_id().to_string(),
            topics,
        }),
    )
}

// ── Messages ───────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct MessagesQuery {
    category: Option<String>,
}

pub async fn list_messages(
    State(state): State<Arc<AppState>>,
    Query(query): Query<MessagesQuery>,
) -> ApiResult<Json<Vec<Message>>> {
    let messages = match query.category.as_deref() {
        Some(raw) => state.network.messages_in(raw.parse()?),
        None => state.network.messages(),
    };
    Ok(Json(messages))
}

#[derive(Deserialize)]
pub struct SendRequest {
    message: String,
    #[serde(default)]
    category: Option<String>,
}

pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Json(req): Json<SendRequest>,
) -> ApiResult<Response> {
    if req.message.trim().is_empty() {
        return Err(ApiError::bad_request("message must not be empty"));
    }
    let category = match req.category.as_deref() {
        Some(raw) => raw.parse()?,
        None => Category::General,
    };

    match state.network.publish(req.message, category).await {
        Ok(PublishOutcome::Sent(message)) => Ok(Json(message).into_response()),
        Ok(PublishOutcome::NotJoined(category)) => Ok((
            StatusCode::ACCEPTED,
            Json(serde_json::json!({
                "status": "not_joined",
                "category": category,
            })),
        )
            .into_response()),
        Err(e) => {
            warn!(category = %category, error = %e, "failed to publish message");
            Err(e.into())
        }
    }
}

// ── Node ───────────────────────────────────────────────────────

#[derive(Serialize)]
pub struct NodeInfo {
    user: User,
    categories: Vec<Category>,
    healthy: bool,
}

pub async fn node_info(State(state): State<Arc<AppState>>) -> Json<NodeInfo> {
    let network = &state.network;
    Json(NodeInfo {
        user: network.user().clone(),
        categories: network.joined_categories(),
        healthy: network.is_healthy(),
    })
}

// ── Stream ─────────────────────────────────────────────────────

/// One `message` event per accepted message, starting from now.
pub async fn stream_messages(
    State(state): State<Arc<AppState>>,
) -> Sse<impl Stream<Item = Result<SseEvent, Infallible>>> {
    let mut rx = state.feed.subscribe();

    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(message) => {
                    let data = match serde_json::to_string(&message) {
                        Ok(data) => data,
                        Err(e) => {
                            warn!(id = %message.id, error = %e, "failed to encode message for SSE");
                            continue;
                        }
                    };
                    yield Ok(SseEvent::default().event("message").data(data));
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!(skipped, "SSE client lagging, messages skipped");
                }
                Err(RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
