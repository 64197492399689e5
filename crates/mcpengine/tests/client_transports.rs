//! Client transports against real HTTP and SSE listeners.

#![cfg(feature = "http")]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::Router;
use serde_json::{json, Map, Value};

use mcpengine::auth::{AuthBackend, BearerTokenBackend, NoAuth};
use mcpengine::client::{ClientSession, HttpClientTransport, SseClientTransport};
use mcpengine::server::McpServer;
use mcpengine::session::RequestContext;
use mcpengine::tools::{echo, Tool};
use mcpengine::transport::http::{self, HttpState};
use mcpengine::transport::sse::{self, SseState};
use mcpengine::types::*;
use mcpengine_auth::{AuthError, AuthResult, Claims, TokenVerifier};

// ─────────────────────── helpers ───────────────────────

/// Tokens are `"<subject>:<scopes>"`.
struct FakeVerifier;

#[async_trait]
impl TokenVerifier for FakeVerifier {
    async fn verify(&self, token: &str) -> AuthResult<Claims> {
        let (sub, scope) = token
            .split_once(':')
            .ok_or_else(|| AuthError::authentication("Invalid credentials"))?;
        Ok(Claims {
            sub: Some(sub.to_string()),
            scope: Some(scope.to_string()),
            ..Claims::default()
        })
    }
}

async fn whoami(_args: Map<String, Value>, ctx: RequestContext) -> McpResult<ToolCallResult> {
    Ok(ToolCallResult::text(ctx.require_auth()?.subject.clone()))
}

async fn roots(_args: Map<String, Value>, ctx: RequestContext) -> McpResult<ToolCallResult> {
    let listed = ctx.list_roots().await?;
    Ok(ToolCallResult::text(listed.roots.len().to_string()))
}

async fn sample(_args: Map<String, Value>, ctx: RequestContext) -> McpResult<ToolCallResult> {
    let params = CreateMessageParams::new(vec![SamplingMessage::user("ping?")], 16);
    let reply = ctx.create_message(&params).await?;
    Ok(ToolCallResult::text(reply.model))
}

fn server() -> Arc<McpServer> {
    McpServer::builder("remote")
        .tool(echo::tool())
        .tool(Tool::new("whoami", whoami).scopes(["notes:write"]))
        .tool(Tool::new("roots", roots))
        .tool(Tool::new("sample", sample))
        .build()
}

fn bearer(server: &Arc<McpServer>) -> Arc<dyn AuthBackend> {
    Arc::new(BearerTokenBackend::new(FakeVerifier, server.scopes().clone()))
}

async fn listen(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn http_client() -> reqwest::Client {
    reqwest::Client::builder().no_proxy().build().unwrap()
}

fn echo_args(message: &str) -> Map<String, Value> {
    let mut args = Map::new();
    args.insert("message".into(), json!(message));
    args
}

fn client_info() -> Implementation {
    Implementation::new("transport-test", "0.1.0")
}

// ═══════════════════════════════════════════════════════
// HTTP
// ═══════════════════════════════════════════════════════

#[tokio::test]
async fn http_client_works_against_stateless_server() {
    let server = server();
    let addr = listen(http::router(HttpState::new(server, Arc::new(NoAuth)), "/mcp")).await;

    let transport = Arc::new(
        HttpClientTransport::with_http_client(&format!("http://{addr}/mcp"), http_client()).unwrap(),
    );
    let client = ClientSession::with_timeout(transport.clone(), Duration::from_secs(5));

    let info = client.initialize(client_info()).await.unwrap();
    assert_eq!(info.server_info.name, "remote");
    assert!(transport.session_id().is_none());

    let tools = client.list_tools().await.unwrap();
    assert!(tools.iter().any(|t| t.name == "echo"));

    let result = client.call_tool("echo", echo_args("over http")).await.unwrap();
    assert_eq!(result.content[0].as_text(), Some("over http"));
    client.close().await;
}

#[tokio::test]
async fn http_client_echoes_and_ends_tracked_session() {
    let server = server();
    let state = HttpState::with_sessions(server, Arc::new(NoAuth), http::DEFAULT_SESSION_IDLE);
    let addr = listen(http::router(state.clone(), "/mcp")).await;

    let transport = Arc::new(
        HttpClientTransport::with_http_client(&format!("http://{addr}/mcp"), http_client()).unwrap(),
    );
    let client = ClientSession::with_timeout(transport.clone(), Duration::from_secs(5));
    client.initialize(client_info()).await.unwrap();

    assert!(transport.session_id().is_some());
    assert_eq!(state.session_count().await, 1);

    let result = client.call_tool("echo", echo_args("tracked")).await.unwrap();
    assert_eq!(result.content[0].as_text(), Some("tracked"));

    client.close().await;
    assert_eq!(state.session_count().await, 0);
}

#[tokio::test]
async fn http_auth_failures_surface_as_errors() {
    let server = server();
    let auth = bearer(&server);
    let addr = listen(http::router(HttpState::new(server, auth), "/mcp")).await;
    let url = format!("http://{addr}/mcp");

    let anonymous = ClientSession::with_timeout(
        Arc::new(HttpClientTransport::with_http_client(&url, http_client()).unwrap()),
        Duration::from_secs(5),
    );
    anonymous.initialize(client_info()).await.unwrap();
    let err = anonymous.call_tool("whoami", Map::new()).await.unwrap_err();
    assert_eq!(err.code(), -32900);
    assert!(err.to_string().contains("No valid auth header"), "{err}");

    let reader_only = ClientSession::with_timeout(
        Arc::new(
            HttpClientTransport::with_http_client(&url, http_client())
                .unwrap()
                .with_bearer_token("bob:notes:read"),
        ),
        Duration::from_secs(5),
    );
    let err = reader_only.call_tool("whoami", Map::new()).await.unwrap_err();
    assert_eq!(err.code(), -32901);

    let writer = ClientSession::with_timeout(
        Arc::new(
            HttpClientTransport::with_http_client(&url, http_client())
                .unwrap()
                .with_bearer_token("ada:notes:write"),
        ),
        Duration::from_secs(5),
    );
    let result = writer.call_tool("whoami", Map::new()).await.unwrap();
    assert_eq!(result.content[0].as_text(), Some("ada"));
}

#[tokio::test]
async fn http_client_reports_unreachable_server() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = ClientSession::with_timeout(
        Arc::new(
            HttpClientTransport::with_http_client(&format!("http://{addr}/mcp"), http_client())
                .unwrap(),
        ),
        Duration::from_secs(5),
    );
    let err = client.ping().await.unwrap_err();
    assert!(err.to_string().contains("POST failed"), "{err}");
}

// ═══════════════════════════════════════════════════════
// SSE
// ═══════════════════════════════════════════════════════

async fn sse_server(auth: Option<Arc<dyn AuthBackend>>) -> (Arc<SseState>, String) {
    let server = server();
    let auth = auth.unwrap_or_else(|| Arc::new(NoAuth));
    let state = SseState::new(server, auth, "/messages/");
    let addr = listen(sse::router(state.clone(), "/sse")).await;
    (state, format!("http://{addr}/sse"))
}

#[tokio::test]
async fn sse_client_round_trip_with_callbacks() {
    let (state, url) = sse_server(None).await;

    let transport = SseClientTransport::connect_with_client(&url, None, http_client())
        .await
        .unwrap();
    assert_eq!(transport.message_url().path(), "/messages/");
    assert_eq!(state.session_count(), 1);

    let client = ClientSession::builder(Arc::new(transport))
        .timeout(Duration::from_secs(5))
        .roots(vec![Root::new("file:///a"), Root::new("file:///b")])
        .sampling_handler(|_params: CreateMessageParams| async move {
            Ok::<_, McpError>(CreateMessageResult {
                role: Role::Assistant,
                content: ToolContent::text("pong"),
                model: "sse-model".to_string(),
                stop_reason: None,
            })
        })
        .connect();
    client.initialize(client_info()).await.unwrap();

    let result = client.call_tool("echo", echo_args("over sse")).await.unwrap();
    assert_eq!(result.content[0].as_text(), Some("over sse"));

    let result = client.call_tool("roots", Map::new()).await.unwrap();
    assert_eq!(result.content[0].as_text(), Some("2"));

    let result = client.call_tool("sample", Map::new()).await.unwrap();
    assert_eq!(result.content[0].as_text(), Some("sse-model"));
    client.close().await;
}

#[tokio::test]
async fn sse_rejected_posts_fail_the_request() {
    let server = server();
    let auth = bearer(&server);
    let (_state, url) = sse_server(Some(auth)).await;

    let transport = SseClientTransport::connect_with_client(&url, None, http_client())
        .await
        .unwrap();
    let client = ClientSession::with_timeout(Arc::new(transport), Duration::from_secs(5));
    client.initialize(client_info()).await.unwrap();

    let err = client.call_tool("whoami", Map::new()).await.unwrap_err();
    assert_eq!(err.code(), -32900);

    let transport = SseClientTransport::connect_with_client(
        &url,
        Some("ada:notes:write".to_string()),
        http_client(),
    )
    .await
    .unwrap();
    let client = ClientSession::with_timeout(Arc::new(transport), Duration::from_secs(5));
    client.initialize(client_info()).await.unwrap();
    let result = client.call_tool("whoami", Map::new()).await.unwrap();
    assert_eq!(result.content[0].as_text(), Some("ada"));
}

#[tokio::test]
async fn sse_connect_fails_without_listener() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let err = SseClientTransport::connect_with_client(&format!("http://{addr}/sse"), None, http_client())
        .await
        .err()
        .unwrap();
    assert!(matches!(err, McpError::Transport(_)));
}
