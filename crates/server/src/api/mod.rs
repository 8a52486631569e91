use crate::config::AppState;
use anyhow::Result;
use axum::{
    extract::State,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tokio::net::TcpListener;
use toolbridge_mcp::McpServer;
use tower_http::trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer};

mod handlers;

pub use handlers::SESSION_HEADER;

/// Bind `addr` and serve the tool host until the process stops.
pub async fn serve(addr: &str, server: McpServer) -> Result<()> {
    let listener = TcpListener::bind(addr).await?;
    serve_on(listener, server).await
}

/// Serve the tool host on an already bound listener.
pub async fn serve_on(listener: TcpListener, server: McpServer) -> Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!("MCP endpoint listening on http://{}/mcp", addr);

    axum::serve(listener, router(server)).await?;

    Ok(())
}

/// Create the HTTP router around a tool host.
pub fn router(server: McpServer) -> Router {
    create_router(AppState::new(server))
}

fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .route(
            "/mcp",
            post(handlers::handle_message).delete(handlers::end_session),
        )
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().include_headers(true))
                .on_response(DefaultOnResponse::new().include_headers(true)),
        )
        .with_state(Arc::new(state))
}

/// Health check endpoint
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let server = state.server.lock().await;
    Json(serde_json::json!({
        "status": "ok",
        "service": server.info().name,
        "version": server.info().version,
        "tools": server.registry().len(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use toolbridge_core::ServerInfo;
    use toolbridge_mcp::ToolRegistry;
    use tower::ServiceExt;

    fn echo_router() -> Router {
        let mut registry = ToolRegistry::new();
        registry.register_fn("echo", "Echo the text back", |args| {
            Ok(args.get("text").cloned().unwrap_or(Value::Null))
        });
        router(McpServer::new(ServerInfo::new("echo-host", "1.0.0"), registry))
    }

    fn post_mcp(body: impl Into<Body>) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri("/mcp")
            .header("content-type", "application/json")
            .body(body.into())
            .unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health_reports_host() {
        let response = echo_router()
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["service"], "echo-host");
        assert_eq!(body["tools"], 1);
    }

    #[tokio::test]
    async fn test_initialize_assigns_session() {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {"name": "test", "version": "0"}
            }
        });
        let response = echo_router()
            .oneshot(post_mcp(request.to_string()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let session = response
            .headers()
            .get(SESSION_HEADER)
            .expect("session header")
            .to_str()
            .unwrap()
            .to_string();
        assert!(uuid::Uuid::parse_str(&session).is_ok());

        let body = body_json(response).await;
        assert_eq!(body["id"], 1);
        assert_eq!(body["result"]["protocolVersion"], "2024-11-05");
        assert_eq!(body["result"]["serverInfo"]["name"], "echo-host");
    }

    #[tokio::test]
    async fn test_notification_is_accepted_without_body() {
        let notification = json!({"jsonrpc": "2.0", "method": "notifications/initialized"});
        let response = echo_router()
            .oneshot(post_mcp(notification.to_string()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_body_is_parse_error() {
        let response = echo_router().oneshot(post_mcp("{not json")).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], -32700);
        assert_eq!(body["id"], Value::Null);
    }

    #[tokio::test]
    async fn test_invalid_message_shape_is_rejected() {
        let response = echo_router()
            .oneshot(post_mcp(json!({"jsonrpc": "2.0", "id": 4}).to_string()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn test_invalid_request_is_answered_under_its_id() {
        let response = echo_router()
            .oneshot(post_mcp(json!({"jsonrpc": "2.0", "id": 1, "method": 5}).to_string()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["id"], 1);
        assert_eq!(body["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn test_unknown_session_is_refused() {
        let mut request = post_mcp(json!({"jsonrpc": "2.0", "id": 2, "method": "ping"}).to_string());
        request
            .headers_mut()
            .insert(SESSION_HEADER, axum::http::HeaderValue::from_static("not-a-session"));
        let response = echo_router().oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn test_tools_call_over_http() {
        let request = json!({
            "jsonrpc": "2.0",
            "id": "call-1",
            "method": "tools/call",
            "params": {"name": "echo", "arguments": {"text": "hi"}}
        });
        let response = echo_router()
            .oneshot(post_mcp(request.to_string()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().get(SESSION_HEADER).is_none());
        let body = body_json(response).await;
        assert_eq!(body["id"], "call-1");
        assert_eq!(body["result"]["content"][0]["type"], "text");
        assert_eq!(body["result"]["content"][0]["text"], "hi");
    }

    #[tokio::test]
    async fn test_unknown_tool_is_json_rpc_error() {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 9,
            "method": "tools/call",
            "params": {"name": "missing", "arguments": {}}
        });
        let response = echo_router()
            .oneshot(post_mcp(request.to_string()))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["error"]["code"], -32601);
        assert_eq!(body["error"]["message"], "Unknown tool: missing");
    }

    #[tokio::test]
    async fn test_end_session() {
        let app = echo_router();
        let request = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {"protocolVersion": "2024-11-05", "capabilities": {}, "clientInfo": {"name": "t", "version": "0"}}
        });
        let response = app.clone().oneshot(post_mcp(request.to_string())).await.unwrap();
        let session = response.headers().get(SESSION_HEADER).unwrap().clone();

        let delete = |session: Option<axum::http::HeaderValue>| {
            let mut builder = Request::builder().method("DELETE").uri("/mcp");
            if let Some(session) = session {
                builder = builder.header(SESSION_HEADER, session);
            }
            builder.body(Body::empty()).unwrap()
        };

        let ping = |session: axum::http::HeaderValue| {
            let mut request =
                post_mcp(json!({"jsonrpc": "2.0", "id": 2, "method": "ping"}).to_string());
            request.headers_mut().insert(SESSION_HEADER, session);
            request
        };
        let response = app.clone().oneshot(ping(session.clone())).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app.clone().oneshot(delete(Some(session.clone()))).await.unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let response = app.clone().oneshot(ping(session.clone())).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app.clone().oneshot(delete(Some(session))).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        let response = app.oneshot(delete(None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }
}
