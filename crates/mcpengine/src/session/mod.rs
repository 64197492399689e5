//! Per-connection session: handshake phases, request correlation and dispatch.

pub mod context;
pub mod peer;
pub mod pending;

pub use context::{LevelFilter, RequestContext};
pub use peer::Peer;
pub use pending::PendingRequests;

use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};

use futures::FutureExt;
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;

use mcpengine_auth::AuthContext;

use crate::protocol::handler::parse_params;
use crate::protocol::validator::validate_request;
use crate::protocol::{Handshake, Phase, ProtocolHandler};
use crate::server::McpServer;
use crate::transport::{closed_signal, Inbound, Transport};
use crate::types::{
    CancelledParams, InitializeParams, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest,
    JsonRpcResponse, McpError, McpResult, RequestMeta, NOTIFICATION_CANCELLED,
    NOTIFICATION_INITIALIZED,
};

/// One logical connection to a client.
pub struct Session {
    id: String,
    handler: ProtocolHandler,
    handshake: Mutex<Handshake>,
    peer: Peer,
    log_level: LevelFilter,
    closed: watch::Sender<bool>,
}

impl Session {
    /// Create a session. Messages for the client arrive on the returned receiver;
    /// dropping it makes server-to-client requests fail with connection-closed.
    pub fn new(server: Arc<McpServer>) -> (Arc<Self>, mpsc::UnboundedReceiver<JsonRpcMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = Peer::new(tx, Arc::new(PendingRequests::new()), server.request_timeout());
        let (closed, _) = watch::channel(false);
        let session = Arc::new(Self {
            id: uuid::Uuid::new_v4().to_string(),
            handler: ProtocolHandler::new(server),
            handshake: Mutex::new(Handshake::default()),
            peer,
            log_level: LevelFilter::default(),
            closed,
        });
        (session, rx)
    }

    /// A session that starts out `Initialized`, for exchanges that stand alone.
    /// Server-to-client requests on it fail with connection-closed.
    pub fn stateless(server: Arc<McpServer>) -> Arc<Self> {
        let (session, _outbound) = Self::new(server);
        session.handshake().assume_initialized();
        session
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn server(&self) -> &Arc<McpServer> {
        self.handler.server()
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    fn handshake(&self) -> MutexGuard<'_, Handshake> {
        self.handshake
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn phase(&self) -> Phase {
        self.handshake().phase()
    }

    pub fn is_closed(&self) -> bool {
        self.phase() == Phase::Closed
    }

    /// Move to `Closed` and fail every outstanding server-to-client request.
    pub fn close(&self) {
        self.handshake().close();
        let failed = self.peer.pending().close_all();
        self.closed.send_replace(true);
        tracing::debug!(session = %self.id, failed, "Session closed");
    }

    /// Drive the session over `transport` until the peer hangs up or [`close`](Self::close) is called.
    ///
    /// Requests run as independent tasks; notifications are handled in arrival order.
    /// On end of input, requests already running are allowed to finish and their
    /// responses are flushed; on an explicit close they are aborted.
    pub async fn run<T: Transport + 'static>(
        self: Arc<Self>,
        transport: Arc<T>,
        outbound: mpsc::UnboundedReceiver<JsonRpcMessage>,
    ) {
        tracing::info!(session = %self.id, "Session started");

        let (stop_tx, stop_rx) = oneshot::channel();
        let writer = tokio::spawn(write_loop(transport.clone(), outbound, stop_rx));

        let (inbound_tx, mut inbound_rx) = mpsc::channel::<Inbound>(64);
        let reader = {
            let transport = transport.clone();
            tokio::spawn(async move {
                while let Some(inbound) = transport.receive().await {
                    if inbound_tx.send(inbound).await.is_err() {
                        break;
                    }
                }
            })
        };

        let mut closed = self.closed.subscribe();
        let mut in_flight = JoinSet::new();
        let mut explicitly_closed = false;

        loop {
            tokio::select! {
                inbound = inbound_rx.recv() => match inbound {
                    Some(inbound) => self.route(inbound, &mut in_flight).await,
                    None => {
                        tracing::info!(session = %self.id, "Transport reached end of input");
                        break;
                    }
                },
                Some(_) = in_flight.join_next(), if !in_flight.is_empty() => {}
                _ = closed_signal(&mut closed) => {
                    explicitly_closed = true;
                    break;
                }
            }
        }

        self.close();
        if explicitly_closed {
            in_flight.abort_all();
        }
        while in_flight.join_next().await.is_some() {}

        let _ = stop_tx.send(());
        let _ = writer.await;
        transport.close().await;
        reader.abort();
        tracing::info!(session = %self.id, "Session ended");
    }

    async fn route(self: &Arc<Self>, inbound: Inbound, in_flight: &mut JoinSet<()>) {
        let Inbound { message, auth } = inbound;
        match message {
            JsonRpcMessage::Request(request) => {
                let this = Arc::clone(self);
                in_flight.spawn(async move {
                    let response = this.respond(request, auth).await;
                    if this.peer.send(response).is_err() {
                        tracing::debug!(session = %this.id, "Dropping response; writer gone");
                    }
                });
            }
            JsonRpcMessage::Notification(notification) => {
                self.handle_notification(notification).await;
            }
            response => self.peer.pending().resolve_message(response),
        }
    }

    /// Handle one inbound message and return the reply, if any. Used by unary bindings.
    pub async fn handle(self: &Arc<Self>, inbound: Inbound) -> Option<JsonRpcMessage> {
        let Inbound { message, auth } = inbound;
        match message {
            JsonRpcMessage::Request(request) => Some(self.respond(request, auth).await),
            JsonRpcMessage::Notification(notification) => {
                self.handle_notification(notification).await;
                None
            }
            response => {
                self.peer.pending().resolve_message(response);
                None
            }
        }
    }

    /// Produce the single terminal response for `request`. Handler panics become `-32603`.
    async fn respond(
        self: &Arc<Self>,
        request: JsonRpcRequest,
        auth: Option<AuthContext>,
    ) -> JsonRpcMessage {
        let id = request.id.clone();
        let method = request.method.clone();
        tracing::debug!(session = %self.id, %id, %method, "Handling request");

        match AssertUnwindSafe(self.process(request, auth))
            .catch_unwind()
            .await
        {
            Ok(Ok(result)) => JsonRpcResponse::new(id, result).into(),
            Ok(Err(e)) => {
                let e = if e.is_local() {
                    McpError::handler(e.to_string())
                } else {
                    e
                };
                tracing::debug!(%id, %method, code = e.code(), "Request failed: {e}");
                e.to_json_rpc_error(id).into()
            }
            Err(_) => {
                tracing::error!(%id, %method, "Handler panicked");
                McpError::InternalError(format!("Handler for '{method}' panicked"))
                    .to_json_rpc_error(id)
                    .into()
            }
        }
    }

    async fn process(
        self: &Arc<Self>,
        request: JsonRpcRequest,
        auth: Option<AuthContext>,
    ) -> McpResult<Value> {
        validate_request(&request)?;

        match request.method.as_str() {
            "initialize" => {
                let params: InitializeParams = parse_params(request.params, "initialize")?;
                let result = self.handshake().begin(params, self.server())?;
                serde_json::to_value(result).map_err(|e| McpError::InternalError(e.to_string()))
            }
            "ping" => {
                if self.is_closed() {
                    return Err(McpError::InvalidRequest("Session is closed".to_string()));
                }
                Ok(json!({}))
            }
            method => {
                self.handshake().admit(method)?;
                let meta = RequestMeta::from_params(request.params.as_ref());
                let ctx = RequestContext::new(
                    request.id,
                    auth,
                    self.server().lifespan().clone(),
                    self.peer.clone(),
                    self.log_level.clone(),
                )
                .with_progress_token(meta.progress_token);
                self.handler.dispatch(method, request.params, ctx).await
            }
        }
    }

    async fn handle_notification(&self, notification: JsonRpcNotification) {
        let method = notification.method.as_str();
        match method {
            NOTIFICATION_INITIALIZED => {
                let completed = self.handshake().complete();
                if !completed && self.phase() == Phase::Initialized {
                    tracing::debug!(session = %self.id, "Already initialized");
                } else if !completed {
                    tracing::warn!(
                        session = %self.id,
                        phase = ?self.phase(),
                        "Ignoring out-of-order initialized notification"
                    );
                }
            }
            NOTIFICATION_CANCELLED => {
                match notification
                    .params
                    .clone()
                    .map(serde_json::from_value::<CancelledParams>)
                {
                    Some(Ok(p)) => tracing::info!(
                        request_id = %p.request_id,
                        reason = p.reason.as_deref().unwrap_or(""),
                        "Client cancelled request"
                    ),
                    _ => tracing::warn!("Malformed cancellation notification"),
                }
            }
            _ => {}
        }

        let handlers = self.server().notification_handlers(method);
        if handlers.is_empty()
            && method != NOTIFICATION_INITIALIZED
            && method != NOTIFICATION_CANCELLED
        {
            tracing::debug!(method, "No handler for notification");
        }
        for handler in handlers {
            let outcome = AssertUnwindSafe(handler.handle(notification.params.clone(), self.peer.clone()))
                .catch_unwind()
                .await;
            match outcome {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(method, "Notification handler failed: {e}"),
                Err(_) => tracing::error!(method, "Notification handler panicked"),
            }
        }
    }
}

async fn write_loop<T: Transport + ?Sized>(
    transport: Arc<T>,
    mut outbound: mpsc::UnboundedReceiver<JsonRpcMessage>,
    mut stop: oneshot::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            message = outbound.recv() => {
                let Some(message) = message else { break };
                if let Err(e) = transport.send(message).await {
                    tracing::warn!("Transport write failed: {e}");
                    break;
                }
            }
            _ = &mut stop => {
                while let Ok(message) = outbound.try_recv() {
                    if transport.send(message).await.is_err() {
                        break;
                    }
                }
                break;
            }
        }
    }
}

#[cfg(test)]
pub(crate) fn test_context() -> RequestContext {
    let (tx, _rx) = mpsc::unbounded_channel();
    let peer = Peer::new(
        tx,
        Arc::new(PendingRequests::new()),
        std::time::Duration::from_secs(1),
    );
    RequestContext::new(
        crate::types::RequestId::Number(1),
        None,
        Arc::new(()),
        peer,
        LevelFilter::default(),
    )
}
