//! SSE transport — an event stream for server messages, POSTs for client messages.

use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex as StdMutex, MutexGuard};

use async_trait::async_trait;
use axum::{
    body::Bytes,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Json as AxumJson, Response,
    },
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{mpsc, watch, Mutex};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::auth::AuthBackend;
use crate::server::McpServer;
use crate::session::Session;
use crate::types::{JsonRpcMessage, McpError, McpResult};

use super::http::{authenticate, envelope_rejection, shutdown_signal};
use super::{closed_signal, Inbound, Transport};

/// Session-side half of one event stream.
pub struct SseTransport {
    incoming: Mutex<mpsc::Receiver<Inbound>>,
    events: mpsc::UnboundedSender<JsonRpcMessage>,
    closed: watch::Sender<bool>,
}

impl SseTransport {
    pub fn new(
        incoming: mpsc::Receiver<Inbound>,
        events: mpsc::UnboundedSender<JsonRpcMessage>,
    ) -> Self {
        let (closed, _) = watch::channel(false);
        Self {
            incoming: Mutex::new(incoming),
            events,
            closed,
        }
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

#[async_trait]
impl Transport for SseTransport {
    async fn receive(&self) -> Option<Inbound> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return None;
        }
        let mut incoming = self.incoming.lock().await;
        tokio::select! {
            inbound = incoming.recv() => inbound,
            _ = closed_signal(&mut closed) => None,
        }
    }

    async fn send(&self, message: JsonRpcMessage) -> McpResult<()> {
        if self.is_closed() {
            return Err(McpError::ConnectionClosed);
        }
        self.events
            .send(message)
            .map_err(|_| McpError::ConnectionClosed)
    }

    async fn close(&self) {
        self.closed.send_replace(true);
    }
}

struct StreamEntry {
    session: Arc<Session>,
    incoming: mpsc::Sender<Inbound>,
}

/// Shared state for the SSE binding.
pub struct SseState {
    server: Arc<McpServer>,
    auth: Arc<dyn AuthBackend>,
    message_path: String,
    streams: StdMutex<HashMap<String, StreamEntry>>,
}

impl SseState {
    pub fn new(
        server: Arc<McpServer>,
        auth: Arc<dyn AuthBackend>,
        message_path: impl Into<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            server,
            auth,
            message_path: message_path.into(),
            streams: StdMutex::new(HashMap::new()),
        })
    }

    fn streams(&self) -> MutexGuard<'_, HashMap<String, StreamEntry>> {
        self.streams
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn session_count(&self) -> usize {
        self.streams().len()
    }

    /// Close the session behind every open stream.
    pub fn close_sessions(&self) {
        let sessions: Vec<Arc<Session>> = self
            .streams()
            .drain()
            .map(|(_, entry)| entry.session)
            .collect();
        for session in sessions {
            session.close();
        }
    }

    fn lookup(&self, session_id: &str) -> Option<mpsc::Sender<Inbound>> {
        self.streams()
            .get(session_id)
            .map(|entry| entry.incoming.clone())
    }
}

/// Closes the session when its event stream is dropped.
struct StreamGuard {
    state: Arc<SseState>,
    session: Arc<Session>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        self.state.streams().remove(self.session.id());
        self.session.close();
        tracing::info!(session = %self.session.id(), "SSE stream disconnected");
    }
}

/// Routes: `GET sse_path`, `POST message_path`, and an unauthenticated `GET /health`.
pub fn router(state: Arc<SseState>, sse_path: &str) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);
    let message_path = state.message_path.clone();

    Router::new()
        .route(sse_path, get(handle_stream))
        .route(&message_path, post(handle_message))
        .route("/health", get(handle_health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Bind `addr` and serve until Ctrl-C, then close sessions and run shutdown hooks.
pub async fn serve(
    server: Arc<McpServer>,
    auth: Arc<dyn AuthBackend>,
    addr: SocketAddr,
    sse_path: &str,
    message_path: &str,
) -> McpResult<()> {
    let state = SseState::new(server.clone(), auth, message_path);
    let app = router(state.clone(), sse_path);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(McpError::Io)?;

    tracing::info!("SSE transport listening on http://{addr}{sse_path}");

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|e| McpError::Transport(e.to_string()));

    state.close_sessions();
    server.shutdown().await;
    served
}

async fn handle_stream(
    State(state): State<Arc<SseState>>,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let (session, outbound) = Session::new(state.server.clone());
    let (incoming_tx, incoming_rx) = mpsc::channel(64);
    let (events_tx, mut events_rx) = mpsc::unbounded_channel();
    let transport = Arc::new(SseTransport::new(incoming_rx, events_tx));

    state.streams().insert(
        session.id().to_string(),
        StreamEntry {
            session: session.clone(),
            incoming: incoming_tx,
        },
    );
    tracing::info!(session = %session.id(), "SSE stream opened");

    let endpoint = format!("{}?session_id={}", state.message_path, session.id());
    tokio::spawn(session.clone().run(transport, outbound));

    let guard = StreamGuard {
        state: state.clone(),
        session,
    };

    let stream = async_stream::stream! {
        let _guard = guard;
        yield Ok(Event::default().event("endpoint").data(endpoint));
        while let Some(message) = events_rx.recv().await {
            match serde_json::to_string(&message) {
                Ok(json) => yield Ok(Event::default().event("message").data(json)),
                Err(e) => tracing::warn!("Dropping unserializable message: {e}"),
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

#[derive(Deserialize, Default)]
struct MessageParams {
    session_id: Option<String>,
}

fn bad_request(message: &str) -> Response {
    (StatusCode::BAD_REQUEST, message.to_string()).into_response()
}

async fn handle_message(
    State(state): State<Arc<SseState>>,
    Query(params): Query<MessageParams>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(raw_id) = params.session_id else {
        return bad_request("session_id is required");
    };
    let Ok(session_id) = uuid::Uuid::parse_str(&raw_id) else {
        tracing::warn!(session_id = %raw_id, "Received invalid session ID");
        return bad_request("Invalid session ID");
    };
    let session_id = session_id.to_string();

    let Some(incoming) = state.lookup(&session_id) else {
        tracing::warn!(session = %session_id, "Could not find session");
        return (StatusCode::NOT_FOUND, "Could not find session").into_response();
    };

    let message = match JsonRpcMessage::parse(&body) {
        Ok(message) => message,
        Err(err) => return envelope_rejection(err),
    };

    let inbound = match authenticate(state.auth.as_ref(), &headers, message).await {
        Ok(inbound) => inbound,
        Err(response) => return response,
    };

    tracing::debug!(session = %session_id, method = ?inbound.message.method(), "Received");
    if incoming.send(inbound).await.is_err() {
        return (StatusCode::NOT_FOUND, "Could not find session").into_response();
    }
    StatusCode::ACCEPTED.into_response()
}

async fn handle_health(State(state): State<Arc<SseState>>) -> AxumJson<serde_json::Value> {
    AxumJson(json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.session_count(),
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

    fn app() -> (Arc<SseState>, Router) {
        let state = SseState::new(demo_server().unwrap(), Arc::new(NoAuth), "/messages/");
        (state.clone(), router(state, "/sse"))
    }

    fn post(uri: &str, body: &str) -> Request<Body> {
        Request::post(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    #[tokio::test]
    async fn missing_and_invalid_session_ids_are_bad_requests() {
        let (_, app) = app();
        let resp = app.clone().oneshot(post("/messages/", "{}")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = app
            .oneshot(post("/messages/?session_id=not-a-uuid", "{}"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn unknown_session_is_not_found() {
        let (_, app) = app();
        let uri = format!("/messages/?session_id={}", uuid::Uuid::new_v4());
        let resp = app
            .oneshot(post(&uri, r#"{"jsonrpc":"2.0","id":1,"method":"ping"}"#))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn close_sessions_fails_pending_server_requests() {
        let (state, app) = app();
        let resp = app
            .oneshot(Request::get("/sse").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(state.session_count(), 1);

        let session = state
            .streams()
            .values()
            .next()
            .map(|entry| entry.session.clone())
            .unwrap();
        let pending = {
            let session = session.clone();
            tokio::spawn(async move { session.peer().request("roots/list", None, None).await })
        };
        while session.peer().pending().is_empty() {
            tokio::task::yield_now().await;
        }

        state.close_sessions();
        assert_eq!(state.session_count(), 0);
        assert!(session.is_closed());
        assert!(matches!(
            pending.await.unwrap(),
            Err(McpError::ConnectionClosed)
        ));
        drop(resp);
    }

    #[tokio::test]
    async fn transport_send_fails_after_close() {
        let (_in_tx, in_rx) = mpsc::channel(1);
        let (ev_tx, mut ev_rx) = mpsc::unbounded_channel();
        let transport = SseTransport::new(in_rx, ev_tx);

        transport
            .send(crate::types::JsonRpcNotification::new("x", None).into())
            .await
            .unwrap();
        assert!(ev_rx.recv().await.is_some());

        transport.close().await;
        assert!(transport.receive().await.is_none());
        assert!(matches!(
            transport
                .send(crate::types::JsonRpcNotification::new("x", None).into())
                .await,
            Err(McpError::ConnectionClosed)
        ));
    }
}
