//! Unary HTTP transport: one JSON-RPC message per POST.
//!
//! Each POST stands alone by default: it runs on a fresh session that is
//! already initialized and is discarded with the reply. Tracked sessions are
//! an opt-in: `initialize` then issues an `mcp-session-id` header, later
//! exchanges presenting it share one session, and idle sessions expire.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Json as AxumJson, Response},
    routing::{get, post},
    Router,
};
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::{challenge_response, AuthBackend};
use crate::server::McpServer;
use crate::session::Session;
use crate::types::{
    error_codes, EnvelopeError, JsonRpcError, JsonRpcMessage, McpError, McpResult, RequestId,
};

use super::Inbound;

/// Header carrying the logical connection id.
pub const SESSION_HEADER: &str = "mcp-session-id";

pub const DEFAULT_SESSION_IDLE: Duration = Duration::from_secs(600);

struct TrackedSession {
    session: Arc<Session>,
    last_seen: Instant,
}

/// Sessions opened by `initialize`, dropped after `idle` without traffic.
struct SessionTable {
    idle: Duration,
    entries: Mutex<HashMap<String, TrackedSession>>,
}

impl SessionTable {
    fn sweep(&self, entries: &mut HashMap<String, TrackedSession>, now: Instant) {
        entries.retain(|id, tracked| {
            let alive = now.duration_since(tracked.last_seen) < self.idle;
            if !alive {
                tracked.session.close();
                tracing::info!(session = %id, "HTTP session expired");
            }
            alive
        });
    }

    async fn touch(&self, session_id: &str) -> Option<Arc<Session>> {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        self.sweep(&mut entries, now);
        entries.get_mut(session_id).map(|tracked| {
            tracked.last_seen = now;
            tracked.session.clone()
        })
    }

    async fn insert(&self, session: Arc<Session>) {
        let now = Instant::now();
        let mut entries = self.entries.lock().await;
        self.sweep(&mut entries, now);
        tracing::info!(session = %session.id(), "HTTP session created");
        entries.insert(
            session.id().to_string(),
            TrackedSession {
                session,
                last_seen: now,
            },
        );
    }

    async fn remove(&self, session_id: &str) -> Option<Arc<Session>> {
        self.entries
            .lock()
            .await
            .remove(session_id)
            .map(|tracked| tracked.session)
    }

    async fn len(&self) -> usize {
        let mut entries = self.entries.lock().await;
        self.sweep(&mut entries, Instant::now());
        entries.len()
    }

    async fn close_all(&self) {
        for (_, tracked) in self.entries.lock().await.drain() {
            tracked.session.close();
        }
    }
}

/// Shared state for the unary binding.
pub struct HttpState {
    server: Arc<McpServer>,
    auth: Arc<dyn AuthBackend>,
    sessions: Option<SessionTable>,
}

impl HttpState {
    /// Every exchange stands alone; no session header is issued.
    pub fn new(server: Arc<McpServer>, auth: Arc<dyn AuthBackend>) -> Arc<Self> {
        Arc::new(Self {
            server,
            auth,
            sessions: None,
        })
    }

    /// `initialize` opens a tracked session that expires after `idle` without traffic.
    pub fn with_sessions(
        server: Arc<McpServer>,
        auth: Arc<dyn AuthBackend>,
        idle: Duration,
    ) -> Arc<Self> {
        Arc::new(Self {
            server,
            auth,
            sessions: Some(SessionTable {
                idle,
                entries: Mutex::new(HashMap::new()),
            }),
        })
    }

    pub fn server(&self) -> &Arc<McpServer> {
        &self.server
    }

    pub async fn session_count(&self) -> usize {
        match &self.sessions {
            Some(table) => table.len().await,
            None => 0,
        }
    }

    /// Close every tracked session.
    pub async fn close_sessions(&self) {
        if let Some(table) = &self.sessions {
            table.close_all().await;
        }
    }
}

/// Routes: `POST`/`DELETE` on `mcp_path`, plus an unauthenticated `GET /health`.
pub fn router(state: Arc<HttpState>, mcp_path: &str) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([header::HeaderName::from_static(SESSION_HEADER)]);

    Router::new()
        .route(mcp_path, post(handle_post).delete(handle_delete))
        .route("/health", get(handle_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until Ctrl-C, then close sessions and run shutdown hooks.
pub async fn serve(state: Arc<HttpState>, addr: SocketAddr, mcp_path: &str) -> McpResult<()> {
    let app = router(state.clone(), mcp_path);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(McpError::Io)?;

    tracing::info!("HTTP transport listening on http://{addr}{mcp_path}");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| McpError::Transport(e.to_string()));

    state.close_sessions().await;
    state.server.shutdown().await;
    served
}

pub(crate) async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("Shutdown signal received");
}

/// A JSON-RPC error body under a non-200 status.
pub(crate) fn rpc_error_response(status: StatusCode, error: JsonRpcError) -> Response {
    (status, AxumJson(error)).into_response()
}

pub(crate) fn envelope_rejection(err: EnvelopeError) -> Response {
    tracing::warn!(code = err.code, "Rejected HTTP body: {err}");
    rpc_error_response(StatusCode::BAD_REQUEST, err.to_json_rpc_error())
}

pub(crate) fn authorization_header(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
}

/// Run the auth backend for `message`; on failure the ready-made 401/403.
pub(crate) async fn authenticate(
    auth: &dyn AuthBackend,
    headers: &HeaderMap,
    message: JsonRpcMessage,
) -> Result<Inbound, Response> {
    match auth
        .authenticate(authorization_header(headers), &message)
        .await
    {
        Ok(ctx) => Ok(Inbound::new(message).with_auth(ctx)),
        Err(e) => {
            tracing::info!(method = ?message.method(), "Auth rejected: {e}");
            Err(challenge_response(&e, &auth.application_scopes()))
        }
    }
}

fn session_header(headers: &HeaderMap) -> Option<&str> {
    headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok())
}

fn missing_session(id: RequestId) -> Response {
    rpc_error_response(
        StatusCode::BAD_REQUEST,
        JsonRpcError::new(
            id,
            error_codes::INVALID_REQUEST,
            format!("Missing {SESSION_HEADER} header"),
        ),
    )
}

fn unknown_session(id: RequestId, session_id: &str) -> Response {
    rpc_error_response(
        StatusCode::NOT_FOUND,
        JsonRpcError::new(
            id,
            error_codes::INVALID_REQUEST,
            format!("Unknown session: {session_id}"),
        ),
    )
}

/// Which session an exchange runs on.
enum Exchange {
    /// Named by the session header.
    Tracked(Arc<Session>),
    /// `initialize` that will be tracked once it succeeds.
    Opening(Arc<Session>),
    /// Discarded after the reply.
    OneShot(Arc<Session>),
}

impl Exchange {
    fn session(&self) -> &Arc<Session> {
        match self {
            Exchange::Tracked(s) | Exchange::Opening(s) | Exchange::OneShot(s) => s,
        }
    }
}

async fn handle_post(
    State(state): State<Arc<HttpState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let message = match JsonRpcMessage::parse(&body) {
        Ok(message) => message,
        Err(err) => return envelope_rejection(err),
    };
    let id = message.id().cloned().unwrap_or(RequestId::Null);
    let is_initialize = message.method() == Some("initialize");

    // Server-to-client requests have nowhere to go on this binding, so the
    // outbound half of every session made here is dropped.
    let exchange = match (&state.sessions, session_header(&headers)) {
        (Some(table), Some(session_id)) => match table.touch(session_id).await {
            Some(session) => Exchange::Tracked(session),
            None => return unknown_session(id, session_id),
        },
        (Some(_), None) if is_initialize => Exchange::Opening(Session::new(state.server.clone()).0),
        (_, _) if is_initialize => Exchange::OneShot(Session::new(state.server.clone()).0),
        (_, _) => Exchange::OneShot(Session::stateless(state.server.clone())),
    };

    let inbound = match authenticate(state.auth.as_ref(), &headers, message).await {
        Ok(inbound) => inbound,
        Err(response) => return response,
    };

    let reply = exchange.session().handle(inbound).await;
    let accepted = !matches!(reply, Some(JsonRpcMessage::Error(_)));

    let mut response = match reply {
        Some(reply) => AxumJson(reply).into_response(),
        None => AxumJson(json!({})).into_response(),
    };

    let issued = match exchange {
        Exchange::Tracked(session) => Some(session),
        Exchange::Opening(session) if accepted => {
            if let Some(table) = &state.sessions {
                table.insert(session.clone()).await;
            }
            Some(session)
        }
        Exchange::Opening(session) | Exchange::OneShot(session) => {
            session.close();
            None
        }
    };
    if let Some(session) = issued {
        if let Ok(value) = HeaderValue::from_str(session.id()) {
            response.headers_mut().insert(SESSION_HEADER, value);
        }
    }
    response
}

async fn handle_delete(State(state): State<Arc<HttpState>>, headers: HeaderMap) -> Response {
    let Some(table) = &state.sessions else {
        return (StatusCode::METHOD_NOT_ALLOWED, "Sessions are not tracked").into_response();
    };
    let Some(session_id) = session_header(&headers) else {
        return missing_session(RequestId::Null);
    };
    match table.remove(session_id).await {
        Some(session) => {
            session.close();
            tracing::info!(session = %session_id, "HTTP session closed by client");
            StatusCode::NO_CONTENT.into_response()
        }
        None => unknown_session(RequestId::Null, session_id),
    }
}

/// Health check endpoint — no auth required.
async fn handle_health(State(state): State<Arc<HttpState>>) -> AxumJson<serde_json::Value> {
    AxumJson(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.session_count().await,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::NoAuth;
    use crate::server::demo_server;
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt as _;

    const INIT: &str = r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{"protocolVersion":"2025-03-26","capabilities":{},"clientInfo":{"name":"t","version":"0"}}}"#;

    fn stateless_app() -> (Arc<HttpState>, Router) {
        let state = HttpState::new(demo_server().unwrap(), Arc::new(NoAuth));
        (state.clone(), router(state, "/mcp"))
    }

    fn tracked_app(idle: Duration) -> (Arc<HttpState>, Router) {
        let state = HttpState::with_sessions(demo_server().unwrap(), Arc::new(NoAuth), idle);
        (state.clone(), router(state, "/mcp"))
    }

    fn post_json(body: &str, session: Option<&str>) -> Request<Body> {
        let mut req = Request::post("/mcp").header(header::CONTENT_TYPE, "application/json");
        if let Some(id) = session {
            req = req.header(SESSION_HEADER, id);
        }
        req.body(Body::from(body.to_string())).unwrap()
    }

    async fn body_json(resp: Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    async fn open(app: &Router) -> String {
        let resp = app.clone().oneshot(post_json(INIT, None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        resp.headers()[SESSION_HEADER].to_str().unwrap().to_string()
    }

    #[tokio::test]
    async fn malformed_body_is_bad_request() {
        let (_, app) = stateless_app();
        let resp = app.oneshot(post_json("{oops", None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = body_json(resp).await;
        assert_eq!(body["error"]["code"], -32700);
        assert_eq!(body["id"], serde_json::Value::Null);
    }

    #[tokio::test]
    async fn bare_exchanges_need_no_session() {
        let (state, app) = stateless_app();

        let resp = app.clone().oneshot(post_json(INIT, None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().get(SESSION_HEADER).is_none());
        assert_eq!(body_json(resp).await["result"]["protocolVersion"], "2025-03-26");

        let note = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        let resp = app.clone().oneshot(post_json(note, None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_json(resp).await, json!({}));

        let call = r#"{"jsonrpc":"2.0","id":2,"method":"tools/call","params":{"name":"echo","arguments":{"message":"hi"}}}"#;
        let resp = app.oneshot(post_json(call, None)).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["id"], 2);
        assert_eq!(body["result"]["content"][0]["text"], "hi");

        assert_eq!(state.session_count().await, 0);
    }

    #[tokio::test]
    async fn stateless_mode_keeps_nothing_after_many_initializes() {
        let (state, app) = stateless_app();
        for _ in 0..20 {
            app.clone().oneshot(post_json(INIT, None)).await.unwrap();
        }
        assert_eq!(state.session_count().await, 0);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let (_, app) = tracked_app(DEFAULT_SESSION_IDLE);
        let resp = app
            .oneshot(post_json(
                r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#,
                Some("nope"),
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_json(resp).await["error"]["code"], -32600);
    }

    #[tokio::test]
    async fn tracked_session_follows_the_handshake() {
        let (state, app) = tracked_app(DEFAULT_SESSION_IDLE);
        let session_id = open(&app).await;
        assert_eq!(state.session_count().await, 1);

        let list = r#"{"jsonrpc":"2.0","id":2,"method":"tools/list"}"#;
        let resp = app
            .clone()
            .oneshot(post_json(list, Some(&session_id)))
            .await
            .unwrap();
        assert_eq!(body_json(resp).await["error"]["code"], -32600);

        let note = r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#;
        app.clone()
            .oneshot(post_json(note, Some(&session_id)))
            .await
            .unwrap();
        let resp = app.oneshot(post_json(list, Some(&session_id))).await.unwrap();
        assert_eq!(resp.headers()[SESSION_HEADER], session_id.as_str());
        assert!(body_json(resp).await["result"]["tools"].is_array());
    }

    #[tokio::test]
    async fn tracked_mode_still_serves_bare_calls() {
        let (state, app) = tracked_app(DEFAULT_SESSION_IDLE);
        let resp = app
            .oneshot(post_json(
                r#"{"jsonrpc":"2.0","id":3,"method":"tools/list"}"#,
                None,
            ))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().get(SESSION_HEADER).is_none());
        assert!(body_json(resp).await["result"]["tools"].is_array());
        assert_eq!(state.session_count().await, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_sessions_expire() {
        let (state, app) = tracked_app(Duration::from_secs(60));
        let stale = open(&app).await;

        tokio::time::advance(Duration::from_secs(30)).await;
        let fresh = open(&app).await;
        assert_eq!(state.session_count().await, 2);

        tokio::time::advance(Duration::from_secs(45)).await;
        assert_eq!(state.session_count().await, 1);

        let ping = r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#;
        let resp = app.clone().oneshot(post_json(ping, Some(&stale))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let resp = app.oneshot(post_json(ping, Some(&fresh))).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn delete_removes_tracked_session() {
        let (state, app) = tracked_app(DEFAULT_SESSION_IDLE);
        let session_id = open(&app).await;

        let resp = app
            .clone()
            .oneshot(
                Request::delete("/mcp")
                    .header(SESSION_HEADER, &session_id)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert_eq!(state.session_count().await, 0);
    }

    #[tokio::test]
    async fn delete_without_tracking_is_not_allowed() {
        let (_, app) = stateless_app();
        let resp = app
            .oneshot(
                Request::delete("/mcp")
                    .header(SESSION_HEADER, "x")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::METHOD_NOT_ALLOWED);
    }

    #[tokio::test]
    async fn failed_initialize_opens_nothing() {
        let (state, app) = tracked_app(DEFAULT_SESSION_IDLE);
        let bad = r#"{"jsonrpc":"2.0","id":1,"method":"initialize","params":{}}"#;
        let resp = app.oneshot(post_json(bad, None)).await.unwrap();
        assert!(resp.headers().get(SESSION_HEADER).is_none());
        assert_eq!(body_json(resp).await["error"]["code"], -32602);
        assert_eq!(state.session_count().await, 0);
    }

    #[tokio::test]
    async fn health_reports_sessions() {
        let (_, app) = tracked_app(DEFAULT_SESSION_IDLE);
        open(&app).await;
        let resp = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_json(resp).await;
        assert_eq!(body["status"], "ok");
        assert_eq!(body["sessions"], 1);
    }
}
