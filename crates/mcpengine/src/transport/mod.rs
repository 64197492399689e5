//! Transport bindings: stdio pipes, unary HTTP and Server-Sent Events.

use async_trait::async_trait;
use tokio::sync::watch;

use mcpengine_auth::AuthContext;

use crate::types::{JsonRpcMessage, McpResult};

pub mod framing;
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub mod sse;
pub mod stdio;

#[cfg(feature = "http")]
pub use http::HttpState;
#[cfg(feature = "http")]
pub use sse::{SseState, SseTransport};
pub use stdio::StdioTransport;

/// An inbound message plus the identity the binding established for it.
#[derive(Debug, Clone)]
pub struct Inbound {
    pub message: JsonRpcMessage,
    pub auth: Option<AuthContext>,
}

impl Inbound {
    pub fn new(message: JsonRpcMessage) -> Self {
        Self {
            message,
            auth: None,
        }
    }

    pub fn with_auth(mut self, auth: Option<AuthContext>) -> Self {
        self.auth = auth;
        self
    }
}

impl From<JsonRpcMessage> for Inbound {
    fn from(message: JsonRpcMessage) -> Self {
        Inbound::new(message)
    }
}

/// A bidirectional message channel owned by one session.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Next inbound message; `None` once the peer hung up or [`close`](Self::close) was called.
    async fn receive(&self) -> Option<Inbound>;

    /// Write one message. Concurrent callers are serialized.
    async fn send(&self, message: JsonRpcMessage) -> McpResult<()>;

    /// Unblock pending `receive` and `send` calls. Idempotent.
    async fn close(&self);
}

/// Resolves once `closed` flips to true or its sender is gone.
///
/// Keeps the `watch::Ref` out of `select!` output so callers stay `Send`.
pub(crate) async fn closed_signal(closed: &mut watch::Receiver<bool>) {
    let _ = closed.wait_for(|c| *c).await;
}
