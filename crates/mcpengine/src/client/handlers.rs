//! Callbacks answering server-initiated requests on the client side.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use crate::protocol::handler::parse_params;
use crate::types::{
    ClientCapabilities, CreateMessageParams, CreateMessageResult, JsonRpcMessage, JsonRpcRequest,
    JsonRpcResponse, ListRootsResult, McpError, McpResult, Root, RootsCapability,
    SamplingCapability, METHOD_CREATE_MESSAGE, METHOD_LIST_ROOTS,
};

/// Answers `sampling/createMessage`.
#[async_trait]
pub trait SamplingHandler: Send + Sync {
    async fn create_message(&self, params: CreateMessageParams) -> McpResult<CreateMessageResult>;
}

#[async_trait]
impl<F, Fut> SamplingHandler for F
where
    F: Fn(CreateMessageParams) -> Fut + Send + Sync,
    Fut: Future<Output = McpResult<CreateMessageResult>> + Send + 'static,
{
    async fn create_message(&self, params: CreateMessageParams) -> McpResult<CreateMessageResult> {
        (self)(params).await
    }
}

/// Answers `roots/list`.
#[async_trait]
pub trait RootsHandler: Send + Sync {
    async fn list_roots(&self) -> McpResult<ListRootsResult>;
}

#[async_trait]
impl<F, Fut> RootsHandler for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = McpResult<ListRootsResult>> + Send + 'static,
{
    async fn list_roots(&self) -> McpResult<ListRootsResult> {
        (self)().await
    }
}

/// A fixed set of roots.
pub struct StaticRoots(pub Vec<Root>);

#[async_trait]
impl RootsHandler for StaticRoots {
    async fn list_roots(&self) -> McpResult<ListRootsResult> {
        Ok(ListRootsResult {
            roots: self.0.clone(),
        })
    }
}

/// Everything the client answers on its own. Unknown methods get method-not-found.
#[derive(Clone, Default)]
pub(crate) struct ServerRequestHandlers {
    pub sampling: Option<Arc<dyn SamplingHandler>>,
    pub roots: Option<Arc<dyn RootsHandler>>,
}

impl ServerRequestHandlers {
    /// What `initialize` advertises.
    pub fn capabilities(&self) -> ClientCapabilities {
        ClientCapabilities {
            sampling: self.sampling.as_ref().map(|_| SamplingCapability::default()),
            roots: self.roots.as_ref().map(|_| RootsCapability::default()),
            ..ClientCapabilities::default()
        }
    }

    pub async fn answer(&self, request: JsonRpcRequest) -> JsonRpcMessage {
        let JsonRpcRequest {
            id, method, params, ..
        } = request;
        match self.dispatch(&method, params).await {
            Ok(result) => JsonRpcResponse::new(id, result).into(),
            Err(e) => {
                tracing::debug!(%method, code = e.code(), "Refusing server request: {e}");
                let e = if e.is_local() {
                    McpError::handler(e.to_string())
                } else {
                    e
                };
                e.to_json_rpc_error(id).into()
            }
        }
    }

    async fn dispatch(&self, method: &str, params: Option<Value>) -> McpResult<Value> {
        match method {
            "ping" => Ok(json!({})),
            METHOD_CREATE_MESSAGE => {
                let handler = self
                    .sampling
                    .as_ref()
                    .ok_or_else(|| McpError::MethodNotFound(method.to_string()))?;
                let params: CreateMessageParams = parse_params(params, method)?;
                Ok(serde_json::to_value(handler.create_message(params).await?)?)
            }
            METHOD_LIST_ROOTS => {
                let handler = self
                    .roots
                    .as_ref()
                    .ok_or_else(|| McpError::MethodNotFound(method.to_string()))?;
                Ok(serde_json::to_value(handler.list_roots().await?)?)
            }
            _ => Err(McpError::MethodNotFound(method.to_string())),
        }
    }
}
