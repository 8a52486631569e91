use crate::config::AppState;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use std::sync::Arc;
use toolbridge_core::{decode, methods, DecodeError, JsonRpcError, JsonRpcResponse, RequestId};
use uuid::Uuid;

/// Header carrying the session assigned by `initialize`.
pub const SESSION_HEADER: &str = "mcp-session-id";

/// Handle one JSON-RPC message posted to `/mcp`
///
/// A request naming a session this host never issued, or one already
/// ended, is refused with 404. Requests without the header are served.
pub async fn handle_message(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if let Some(session) = headers.get(SESSION_HEADER) {
        let known = match session.to_str() {
            Ok(session) => state.sessions.lock().await.contains(session),
            Err(_) => false,
        };
        if !known {
            tracing::warn!(session = ?session, "Unknown session");
            return (
                StatusCode::NOT_FOUND,
                Json(JsonRpcResponse::error(
                    None,
                    JsonRpcError::invalid_request("unknown session"),
                )),
            )
                .into_response();
        }
    }

    let message = match std::str::from_utf8(&body) {
        Ok(text) => match decode(text) {
            Ok(message) => message,
            Err(DecodeError::InvalidRequest { id, reason }) => {
                return rejected(Some(id), JsonRpcError::invalid_request(reason));
            }
            Err(DecodeError::InvalidMessage(reason)) => {
                return rejected(None, JsonRpcError::invalid_request(reason));
            }
            Err(e) => return rejected(None, JsonRpcError::parse_error(e.to_string())),
        },
        Err(e) => {
            return rejected(None, JsonRpcError::parse_error(format!("body is not UTF-8: {}", e)))
        }
    };

    let is_initialize = message.method() == Some(methods::INITIALIZE);
    let response = state.server.lock().await.handle_message(message).await;

    // Notifications and stray responses get no reply.
    let Some(response) = response else {
        return StatusCode::ACCEPTED.into_response();
    };

    let mut headers = HeaderMap::new();
    if is_initialize && !response.is_error() {
        let session = Uuid::new_v4().to_string();
        if let Ok(value) = HeaderValue::from_str(&session) {
            headers.insert(SESSION_HEADER, value);
        }
        tracing::info!(session = %session, "Session opened");
        state.sessions.lock().await.insert(session);
    }

    (StatusCode::OK, headers, Json(response)).into_response()
}

/// Forget the session named in the `Mcp-Session-Id` header
pub async fn end_session(State(state): State<Arc<AppState>>, headers: HeaderMap) -> StatusCode {
    let Some(session) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) else {
        return StatusCode::BAD_REQUEST;
    };

    if state.sessions.lock().await.remove(session) {
        tracing::info!(session = %session, "Session closed");
        StatusCode::NO_CONTENT
    } else {
        StatusCode::NOT_FOUND
    }
}

fn rejected(id: Option<RequestId>, error: JsonRpcError) -> Response {
    tracing::warn!(error = %error, "Rejecting undecodable message");
    (
        StatusCode::BAD_REQUEST,
        Json(JsonRpcResponse::error(id, error)),
    )
        .into_response()
}
