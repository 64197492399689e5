//! Handle for talking back to the remote side of a session.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;

use crate::types::{
    JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, McpError, McpResult,
};

use super::pending::PendingRequests;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Sends requests and notifications through the session's single writer.
#[derive(Clone)]
pub struct Peer {
    outbound: mpsc::UnboundedSender<JsonRpcMessage>,
    pending: Arc<PendingRequests>,
    timeout: Duration,
}

impl Peer {
    pub fn new(
        outbound: mpsc::UnboundedSender<JsonRpcMessage>,
        pending: Arc<PendingRequests>,
        timeout: Duration,
    ) -> Self {
        Self {
            outbound,
            pending,
            timeout,
        }
    }

    pub fn pending(&self) -> &Arc<PendingRequests> {
        &self.pending
    }

    pub fn default_timeout(&self) -> Duration {
        self.timeout
    }

    /// Queue a message for the writer.
    pub fn send(&self, message: JsonRpcMessage) -> McpResult<()> {
        self.outbound
            .send(message)
            .map_err(|_| McpError::ConnectionClosed)
    }

    pub fn notify(&self, method: &str, params: Option<Value>) -> McpResult<()> {
        self.send(JsonRpcNotification::new(method, params).into())
    }

    /// Send a request and wait for its response.
    ///
    /// On timeout the entry is dropped locally and no cancellation is sent;
    /// a response arriving afterwards is discarded.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> McpResult<Value> {
        let timeout = timeout.unwrap_or(self.timeout);
        let (id, rx) = self.pending.register()?;

        tracing::debug!(%id, method, "Sending request");
        if let Err(e) = self.send(JsonRpcRequest::new(id.clone(), method, params).into()) {
            self.pending.remove(&id);
            return Err(e);
        }

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(McpError::ConnectionClosed),
            Err(_) => {
                self.pending.remove(&id);
                tracing::warn!(%id, method, ?timeout, "Request timed out");
                Err(McpError::RequestTimeout(timeout))
            }
        }
    }

    /// [`request`](Self::request) with typed params and result.
    pub async fn request_typed<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: &P,
        timeout: Option<Duration>,
    ) -> McpResult<R> {
        let params = serde_json::to_value(params)?;
        let params = (!params.is_null()).then_some(params);
        let result = self.request(method, params, timeout).await?;
        serde_json::from_value(result)
            .map_err(|e| McpError::InvalidParams(format!("Unexpected {method} result: {e}")))
    }
}
