//! Client side of the unary HTTP binding: one POST per message.

use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use reqwest::{header, StatusCode};
use tokio::sync::{mpsc, watch, Mutex};
use url::Url;

use crate::transport::http::SESSION_HEADER;
use crate::transport::{closed_signal, Inbound, Transport};
use crate::types::{JsonRpcMessage, McpError, McpResult};

/// Where POSTs go and what they carry.
#[derive(Clone)]
pub(crate) struct Endpoint {
    pub http: reqwest::Client,
    pub url: Url,
    pub bearer: Option<String>,
}

impl Endpoint {
    pub fn request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let builder = self.http.request(method, url);
        match &self.bearer {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

pub(crate) fn parse_url(raw: &str) -> McpResult<Url> {
    Url::parse(raw).map_err(|e| McpError::Transport(format!("Invalid endpoint {raw}: {e}")))
}

pub(crate) fn default_client() -> McpResult<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| McpError::Transport(format!("Failed to build HTTP client: {e}")))
}

/// Map a non-2xx status to the error the caller should see.
///
/// A JSON-RPC error body is passed through as the reply.
pub(crate) fn status_error(status: StatusCode, body: &str) -> Result<JsonRpcMessage, McpError> {
    match status {
        StatusCode::UNAUTHORIZED => Err(McpError::Authentication(body.to_string())),
        StatusCode::FORBIDDEN => Err(McpError::Authorization(body.to_string())),
        _ => match JsonRpcMessage::parse(body.as_bytes()) {
            Ok(reply @ JsonRpcMessage::Error(_)) => Ok(reply),
            _ => Err(McpError::Transport(format!("HTTP {status}: {body}"))),
        },
    }
}

/// Answer a request locally with `err`, so the waiting caller sees it.
pub(crate) fn fail_request(
    inbound: &mpsc::UnboundedSender<Inbound>,
    message: &JsonRpcMessage,
    err: McpError,
) {
    match message {
        JsonRpcMessage::Request(request) => {
            let reply = err.to_json_rpc_error(request.id.clone());
            let _ = inbound.send(Inbound::new(reply.into()));
        }
        _ => tracing::warn!(method = ?message.method(), "Dropping failed message: {err}"),
    }
}

/// State shared with the per-request tasks.
struct Shared {
    endpoint: Endpoint,
    session_id: StdMutex<Option<String>>,
}

impl Shared {
    fn session_id(&self) -> Option<String> {
        self.session_id
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    fn remember_session(&self, id: String) {
        *self
            .session_id
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(id);
    }

    /// POST one message; `Ok(None)` when the server had nothing to say.
    async fn post(&self, message: &JsonRpcMessage) -> McpResult<Option<JsonRpcMessage>> {
        let mut builder = self
            .endpoint
            .request(reqwest::Method::POST, self.endpoint.url.clone())
            .header(header::ACCEPT, "application/json")
            .json(message);
        if let Some(id) = self.session_id() {
            builder = builder.header(SESSION_HEADER, id);
        }

        let resp = builder
            .send()
            .await
            .map_err(|e| McpError::Transport(format!("POST failed: {e}")))?;
        let status = resp.status();
        if let Some(id) = resp
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
        {
            self.remember_session(id.to_string());
        }
        let body = resp
            .text()
            .await
            .map_err(|e| McpError::Transport(format!("Failed to read response body: {e}")))?;

        if !status.is_success() {
            return status_error(status, &body).map(Some);
        }
        let trimmed = body.trim();
        if trimmed.is_empty() || trimmed == "{}" {
            return Ok(None);
        }
        JsonRpcMessage::parse(trimmed.as_bytes())
            .map(Some)
            .map_err(|e| McpError::Transport(format!("Unreadable reply: {e}")))
    }
}

/// [`Transport`] over the unary HTTP binding.
///
/// Requests are posted concurrently and their replies surface through
/// [`receive`](Transport::receive). HTTP failures on a request come back as
/// JSON-RPC errors for that request: 401 as an authentication error, 403 as an
/// authorization error. A session header issued by the server is echoed on
/// every later POST and ended with `DELETE` on close.
pub struct HttpClientTransport {
    shared: Arc<Shared>,
    inbound_tx: mpsc::UnboundedSender<Inbound>,
    inbound: Mutex<mpsc::UnboundedReceiver<Inbound>>,
    closed: watch::Sender<bool>,
}

impl HttpClientTransport {
    pub fn new(endpoint: &str) -> McpResult<Self> {
        Self::with_http_client(endpoint, default_client()?)
    }

    /// Use a preconfigured client for proxies, TLS roots or timeouts.
    pub fn with_http_client(endpoint: &str, http: reqwest::Client) -> McpResult<Self> {
        let (inbound_tx, inbound) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        Ok(Self {
            shared: Arc::new(Shared {
                endpoint: Endpoint {
                    http,
                    url: parse_url(endpoint)?,
                    bearer: None,
                },
                session_id: StdMutex::new(None),
            }),
            inbound_tx,
            inbound: Mutex::new(inbound),
            closed,
        })
    }

    /// Send `Authorization: Bearer <token>` with every POST.
    ///
    /// Call before the transport is shared.
    pub fn with_bearer_token(mut self, token: impl Into<String>) -> Self {
        if let Some(shared) = Arc::get_mut(&mut self.shared) {
            shared.endpoint.bearer = Some(token.into());
        }
        self
    }

    /// The session the server issued, if it tracks one.
    pub fn session_id(&self) -> Option<String> {
        self.shared.session_id()
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

#[async_trait]
impl Transport for HttpClientTransport {
    async fn receive(&self) -> Option<Inbound> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow() {
            return None;
        }
        let mut inbound = self.inbound.lock().await;
        tokio::select! {
            message = inbound.recv() => message,
            _ = closed_signal(&mut closed) => None,
        }
    }

    async fn send(&self, message: JsonRpcMessage) -> McpResult<()> {
        if self.is_closed() {
            return Err(McpError::ConnectionClosed);
        }
        let shared = self.shared.clone();
        let inbound = self.inbound_tx.clone();
        let is_request = matches!(message, JsonRpcMessage::Request(_));
        let exchange = async move {
            match shared.post(&message).await {
                Ok(Some(reply)) => {
                    let _ = inbound.send(Inbound::new(reply));
                }
                Ok(None) if is_request => {
                    let err = McpError::Transport(format!("Empty reply to {:?}", message.method()));
                    fail_request(&inbound, &message, err);
                }
                Ok(None) => {}
                Err(e) => fail_request(&inbound, &message, e),
            }
        };

        // Requests may wait on slow tools; everything else goes out in order.
        if is_request {
            tokio::spawn(exchange);
        } else {
            exchange.await;
        }
        Ok(())
    }

    async fn close(&self) {
        if self.closed.send_replace(true) {
            return;
        }
        let Some(id) = self.shared.session_id() else {
            return;
        };
        let endpoint = &self.shared.endpoint;
        let deleted = endpoint
            .request(reqwest::Method::DELETE, endpoint.url.clone())
            .header(SESSION_HEADER, &id)
            .send()
            .await;
        match deleted {
            Ok(resp) => tracing::debug!(session = %id, status = %resp.status(), "Ended HTTP session"),
            Err(e) => tracing::debug!(session = %id, "Failed to end HTTP session: {e}"),
        }
    }
}
