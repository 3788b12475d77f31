//! Streamable HTTP endpoint for the Model Context Protocol
//!
//! - `POST /mcp` carries one JSON-RPC message or a batch
//! - `GET /mcp` opens the server push stream (SSE) of a session
//! - `DELETE /mcp` terminates a session
//!
//! A request without an `mcp-session-id` header must be an `initialize`
//! request; its response carries the new session id in that header.

use std::convert::Infallible;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderName, HeaderValue, StatusCode},
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::post,
};
use futures::{Stream, StreamExt};
use tokio_stream::wrappers::ReceiverStream;

use super::ApiState;
use crate::mcp::{JsonRpcError, JsonRpcMessage, JsonRpcResponse, SessionTransport};

/// Session header name
pub const MCP_SESSION_ID: &str = "mcp-session-id";

/// Failure answered before a message reaches a session
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Missing mcp-session-id or non-initialize request.")]
    SessionRequired,

    #[error("Missing mcp-session-id")]
    MissingSession,

    #[error("Invalid mcp-session-id")]
    UnknownSession,

    #[error("Push stream already open for this session")]
    StreamConflict,

    #[error("internal error: {0}")]
    Internal(#[from] crate::Error),
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        match self {
            Self::Parse(_) | Self::InvalidRequest(_) => {
                let code = if matches!(self, Self::Parse(_)) {
                    JsonRpcError::PARSE_ERROR
                } else {
                    JsonRpcError::INVALID_REQUEST
                };
                let body = JsonRpcResponse::error(None, JsonRpcError::new(code, self.to_string()));
                (StatusCode::BAD_REQUEST, Json(body)).into_response()
            }
            Self::SessionRequired | Self::MissingSession | Self::UnknownSession => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "error": self.to_string() })),
            )
                .into_response(),
            Self::StreamConflict => (
                StatusCode::CONFLICT,
                Json(serde_json::json!({ "error": self.to_string() })),
            )
                .into_response(),
            Self::Internal(e) => {
                tracing::error!(error = %e, "mcp request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(serde_json::json!({ "error": "Internal server error" })),
                )
                    .into_response()
            }
        }
    }
}

type GatewayResult<T> = std::result::Result<T, GatewayError>;

/// Build the protocol router
pub fn router() -> Router<Arc<ApiState>> {
    Router::new().route("/mcp", post(post_mcp).get(open_stream).delete(delete_session))
}

/// Session id sent by the client; a header that is present but unreadable
/// never names a session
fn session_header(headers: &HeaderMap) -> GatewayResult<Option<&str>> {
    let Some(value) = headers.get(MCP_SESSION_ID) else {
        return Ok(None);
    };
    let id = value.to_str().map_err(|_| GatewayError::UnknownSession)?;
    Ok(Some(id).filter(|id| !id.is_empty()))
}

/// Split a request body into messages; `true` if it was a batch
fn parse_body(body: &[u8]) -> GatewayResult<(Vec<JsonRpcMessage>, bool)> {
    let payload: serde_json::Value =
        serde_json::from_slice(body).map_err(|e| GatewayError::Parse(e.to_string()))?;

    let (items, batch) = match payload {
        serde_json::Value::Array(items) => (items, true),
        single => (vec![single], false),
    };
    if items.is_empty() {
        return Err(GatewayError::InvalidRequest("empty batch".to_string()));
    }

    let messages = items
        .into_iter()
        .map(serde_json::from_value)
        .collect::<std::result::Result<Vec<JsonRpcMessage>, _>>()
        .map_err(|e| GatewayError::InvalidRequest(e.to_string()))?;
    Ok((messages, batch))
}

fn respond(mut responses: Vec<JsonRpcResponse>, batch: bool) -> Response {
    if responses.is_empty() {
        return StatusCode::ACCEPTED.into_response();
    }
    if batch {
        return Json(responses).into_response();
    }
    let single = responses.swap_remove(0);
    Json(single).into_response()
}

async fn post_mcp(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
    body: Bytes,
) -> GatewayResult<Response> {
    let (messages, batch) = parse_body(&body)?;

    let Some(session_id) = session_header(&headers)? else {
        return initialize(&state, messages, batch).await;
    };

    let session = state
        .sessions
        .lookup(session_id)
        .map_err(|_| GatewayError::UnknownSession)?;

    let mut responses = Vec::new();
    for message in messages {
        let routed = session.transport.handle(message).await.map_err(|e| match e {
            // Ended by a concurrent DELETE or disconnect
            crate::Error::Protocol(_) => GatewayError::UnknownSession,
            other => GatewayError::Internal(other),
        })?;
        if let Some(response) = routed {
            responses.push(response);
        }
    }
    Ok(respond(responses, batch))
}

async fn initialize(
    state: &ApiState,
    mut messages: Vec<JsonRpcMessage>,
    batch: bool,
) -> GatewayResult<Response> {
    if !messages.iter().any(JsonRpcMessage::is_initialize_request) {
        return Err(GatewayError::SessionRequired);
    }
    if messages.len() > 1 {
        return Err(GatewayError::InvalidRequest(
            "initialize must be sent on its own".to_string(),
        ));
    }

    let handshake = state.sessions.begin_session(messages.remove(0)).await?;
    let mut response = respond(handshake.response.into_iter().collect(), batch);

    if let Some(id) = handshake.session_id {
        let value = HeaderValue::from_str(&id)
            .map_err(|e| crate::Error::Protocol(format!("session id not a header value: {e}")))?;
        response
            .headers_mut()
            .insert(HeaderName::from_static(MCP_SESSION_ID), value);
    }
    Ok(response)
}

async fn open_stream(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> GatewayResult<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>> {
    let session_id = session_header(&headers)?.ok_or(GatewayError::MissingSession)?;
    let session = state
        .sessions
        .lookup(session_id)
        .map_err(|_| GatewayError::UnknownSession)?;

    let rx = session
        .transport
        .open_stream()
        .map_err(|_| GatewayError::StreamConflict)?;
    tracing::debug!(session_id, "push stream opened");

    let stream = PushStream {
        inner: ReceiverStream::new(rx),
        transport: session.transport.clone(),
    }
    .map(|message| {
        Ok(Event::default()
            .event("message")
            .json_data(&message)
            .unwrap_or_else(|e| Event::default().event("error").data(e.to_string())))
    });

    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn delete_session(
    State(state): State<Arc<ApiState>>,
    headers: HeaderMap,
) -> GatewayResult<StatusCode> {
    let session_id = session_header(&headers)?.ok_or(GatewayError::MissingSession)?;
    if !state.sessions.end_session(session_id) {
        return Err(GatewayError::UnknownSession);
    }
    Ok(StatusCode::OK)
}

/// Server push stream that reports a disconnect to its transport when dropped
struct PushStream {
    inner: ReceiverStream<JsonRpcMessage>,
    transport: Arc<SessionTransport>,
}

impl Stream for PushStream {
    type Item = JsonRpcMessage;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.get_mut().inner).poll_next(cx)
    }
}

impl Drop for PushStream {
    fn drop(&mut self) {
        self.transport.disconnected();
    }
}
