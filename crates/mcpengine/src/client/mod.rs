//! The consuming side of a connection: handshake, calls and listings against a server.

pub mod handlers;
#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "http")]
pub mod sse;

pub use handlers::{RootsHandler, SamplingHandler, StaticRoots};
#[cfg(feature = "http")]
pub use http::HttpClientTransport;
#[cfg(feature = "http")]
pub use sse::SseClientTransport;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Map, Value};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::session::peer::DEFAULT_REQUEST_TIMEOUT;
use crate::session::{PendingRequests, Peer};
use crate::transport::Transport;
use crate::types::*;

use handlers::ServerRequestHandlers;

/// Configures a [`ClientSession`] before its tasks start.
pub struct ClientSessionBuilder {
    transport: Arc<dyn Transport>,
    timeout: Duration,
    handlers: ServerRequestHandlers,
}

impl ClientSessionBuilder {
    /// Default per-request timeout.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Answer `sampling/createMessage` and advertise the sampling capability.
    pub fn sampling_handler(mut self, handler: impl SamplingHandler + 'static) -> Self {
        self.handlers.sampling = Some(Arc::new(handler));
        self
    }

    /// Answer `roots/list` and advertise the roots capability.
    pub fn roots_handler(mut self, handler: impl RootsHandler + 'static) -> Self {
        self.handlers.roots = Some(Arc::new(handler));
        self
    }

    pub fn roots(self, roots: Vec<Root>) -> Self {
        self.roots_handler(StaticRoots(roots))
    }

    /// Start the reader and writer tasks.
    pub fn connect(self) -> ClientSession {
        let (tx, rx) = mpsc::unbounded_channel();
        let peer = Peer::new(tx, Arc::new(PendingRequests::new()), self.timeout);
        let capabilities = self.handlers.capabilities();

        let writer = tokio::spawn(write_loop(self.transport.clone(), rx));
        let reader = tokio::spawn(read_loop(
            self.transport.clone(),
            peer.clone(),
            Arc::new(self.handlers),
        ));

        ClientSession {
            peer,
            transport: self.transport,
            capabilities,
            initialized: Mutex::new(None),
            reader,
            writer,
        }
    }
}

/// A client connection driving one [`Transport`].
///
/// Server pings are answered automatically. `sampling/createMessage` and
/// `roots/list` go to the handlers given to the builder; anything else is
/// refused with method-not-found.
pub struct ClientSession {
    peer: Peer,
    transport: Arc<dyn Transport>,
    capabilities: ClientCapabilities,
    initialized: Mutex<Option<InitializeResult>>,
    reader: JoinHandle<()>,
    writer: JoinHandle<()>,
}

impl ClientSession {
    pub fn builder(transport: Arc<dyn Transport>) -> ClientSessionBuilder {
        ClientSessionBuilder {
            transport,
            timeout: DEFAULT_REQUEST_TIMEOUT,
            handlers: ServerRequestHandlers::default(),
        }
    }

    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self::builder(transport).connect()
    }

    /// Like [`new`](Self::new) with a default per-request timeout.
    pub fn with_timeout(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self::builder(transport).timeout(timeout).connect()
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    /// The server's answer to `initialize`, once the handshake has run.
    pub fn server_info(&self) -> Option<InitializeResult> {
        self.initialized
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Run the handshake: `initialize`, then `notifications/initialized`.
    pub async fn initialize(&self, client_info: Implementation) -> McpResult<InitializeResult> {
        let params = InitializeParams {
            protocol_version: LATEST_PROTOCOL_VERSION.to_string(),
            capabilities: self.capabilities.clone(),
            client_info,
        };
        let result: InitializeResult = self.peer.request_typed("initialize", &params, None).await?;

        if !SUPPORTED_PROTOCOL_VERSIONS.contains(&result.protocol_version.as_str()) {
            return Err(McpError::InvalidRequest(format!(
                "Unsupported protocol version from server: {}",
                result.protocol_version
            )));
        }

        self.peer.notify(NOTIFICATION_INITIALIZED, None)?;
        tracing::info!(
            server = %result.server_info.name,
            version = %result.protocol_version,
            "Connected"
        );

        *self
            .initialized
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(result.clone());
        Ok(result)
    }

    /// Raw request with an optional per-call timeout.
    pub async fn request(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> McpResult<Value> {
        self.peer.request(method, params, timeout).await
    }

    pub async fn ping(&self) -> McpResult<()> {
        self.peer.request("ping", None, None).await.map(|_| ())
    }

    pub async fn list_tools(&self) -> McpResult<Vec<ToolDefinition>> {
        let result: ToolListResult = self.peer.request_typed("tools/list", &json!({}), None).await?;
        Ok(result.tools)
    }

    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> McpResult<ToolCallResult> {
        let params = ToolCallParams {
            name: name.to_string(),
            arguments: Some(arguments),
        };
        self.peer.request_typed("tools/call", &params, None).await
    }

    pub async fn list_resources(&self) -> McpResult<Vec<ResourceDefinition>> {
        let result: ResourceListResult = self
            .peer
            .request_typed("resources/list", &json!({}), None)
            .await?;
        Ok(result.resources)
    }

    pub async fn list_resource_templates(&self) -> McpResult<Vec<ResourceTemplateDefinition>> {
        let result: ResourceTemplateListResult = self
            .peer
            .request_typed("resources/templates/list", &json!({}), None)
            .await?;
        Ok(result.resource_templates)
    }

    pub async fn read_resource(&self, uri: &str) -> McpResult<ReadResourceResult> {
        let params = ResourceReadParams {
            uri: uri.to_string(),
        };
        self.peer.request_typed("resources/read", &params, None).await
    }

    pub async fn list_prompts(&self) -> McpResult<Vec<PromptDefinition>> {
        let result: PromptListResult = self
            .peer
            .request_typed("prompts/list", &json!({}), None)
            .await?;
        Ok(result.prompts)
    }

    pub async fn get_prompt(
        &self,
        name: &str,
        arguments: Map<String, Value>,
    ) -> McpResult<PromptGetResult> {
        let params = PromptGetParams {
            name: name.to_string(),
            arguments: Some(arguments),
        };
        self.peer.request_typed("prompts/get", &params, None).await
    }

    pub async fn set_log_level(&self, level: LogLevel) -> McpResult<()> {
        self.peer
            .request_typed::<_, EmptyResult>("logging/setLevel", &SetLevelParams { level }, None)
            .await
            .map(|_| ())
    }

    /// Tell the server the roots changed; it may ask again with `roots/list`.
    pub fn notify_roots_changed(&self) -> McpResult<()> {
        self.peer.notify("notifications/roots/list_changed", None)
    }

    /// Close the transport and fail every outstanding request.
    pub async fn close(&self) {
        self.transport.close().await;
        self.peer.pending().close_all();
        self.reader.abort();
        self.writer.abort();
    }
}

impl Drop for ClientSession {
    fn drop(&mut self) {
        self.reader.abort();
        self.writer.abort();
    }
}

async fn write_loop(transport: Arc<dyn Transport>, mut outbound: mpsc::UnboundedReceiver<JsonRpcMessage>) {
    while let Some(message) = outbound.recv().await {
        if let Err(e) = transport.send(message).await {
            tracing::warn!("Client write failed: {e}");
            break;
        }
    }
}

async fn read_loop(transport: Arc<dyn Transport>, peer: Peer, handlers: Arc<ServerRequestHandlers>) {
    while let Some(inbound) = transport.receive().await {
        match inbound.message {
            JsonRpcMessage::Request(request) => {
                let peer = peer.clone();
                let handlers = handlers.clone();
                tokio::spawn(async move {
                    let reply = handlers.answer(request).await;
                    if peer.send(reply).is_err() {
                        tracing::debug!("Dropping reply to server; writer gone");
                    }
                });
            }
            JsonRpcMessage::Notification(notification) => {
                tracing::debug!(method = %notification.method, "Server notification");
            }
            response => peer.pending().resolve_message(response),
        }
    }
    let failed = peer.pending().close_all();
    tracing::info!(failed, "Server connection ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{demo_server, McpServer};
    use crate::session::{RequestContext, Session};
    use crate::tools::Tool;
    use crate::transport::StdioTransport;
    use tokio::io::BufReader;

    fn serve(server: Arc<McpServer>) -> Arc<dyn Transport> {
        let (client_io, server_io) = tokio::io::duplex(4096);

        let (read, write) = tokio::io::split(server_io);
        let server_transport = Arc::new(StdioTransport::from_handles(BufReader::new(read), write));
        let (session, outbound) = Session::new(server);
        tokio::spawn(session.run(server_transport, outbound));

        let (read, write) = tokio::io::split(client_io);
        Arc::new(StdioTransport::from_handles(BufReader::new(read), write))
    }

    fn connect() -> ClientSession {
        ClientSession::with_timeout(serve(demo_server().unwrap()), Duration::from_secs(5))
    }

    async fn roots_tool(_args: Map<String, Value>, ctx: RequestContext) -> McpResult<ToolCallResult> {
        let listed = ctx.list_roots().await?;
        let uris: Vec<&str> = listed.roots.iter().map(|r| r.uri.as_str()).collect();
        Ok(ToolCallResult::text(uris.join(",")))
    }

    async fn sample_tool(_args: Map<String, Value>, ctx: RequestContext) -> McpResult<ToolCallResult> {
        let params = CreateMessageParams::new(vec![SamplingMessage::user("summarize")], 64);
        let reply = ctx.create_message(&params).await?;
        Ok(ToolCallResult::text(format!(
            "{}: {}",
            reply.model,
            reply.content.as_text().unwrap_or_default()
        )))
    }

    fn asking_server() -> Arc<McpServer> {
        McpServer::builder("asking")
            .tool(Tool::new("roots", roots_tool))
            .tool(Tool::new("sample", sample_tool))
            .build()
    }

    fn text_of(result: &ToolCallResult) -> &str {
        result.content[0].as_text().unwrap_or_default()
    }

    #[tokio::test]
    async fn handshake_then_call() {
        let client = connect();
        let info = client
            .initialize(Implementation::new("test-client", "0.1.0"))
            .await
            .unwrap();
        assert_eq!(info.protocol_version, LATEST_PROTOCOL_VERSION);
        assert!(client.server_info().is_some());

        let mut args = Map::new();
        args.insert("message".into(), json!("hi"));
        let result = client.call_tool("echo", args).await.unwrap();
        assert_eq!(result.content[0].as_text(), Some("hi"));
    }

    #[tokio::test]
    async fn calls_before_handshake_are_refused() {
        let client = connect();
        client.ping().await.unwrap();
        let err = client.list_tools().await.unwrap_err();
        assert_eq!(err.code(), -32600);
    }

    #[tokio::test]
    async fn close_fails_pending_calls() {
        let client = connect();
        client.close().await;
        assert!(matches!(
            client.ping().await,
            Err(McpError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn server_requests_reach_client_callbacks() {
        let client = ClientSession::builder(serve(asking_server()))
            .timeout(Duration::from_secs(5))
            .roots(vec![Root::new("file:///work"), Root::new("file:///notes")])
            .sampling_handler(|params: CreateMessageParams| async move {
                Ok::<_, McpError>(CreateMessageResult {
                    role: Role::Assistant,
                    content: ToolContent::text(format!("{} message(s)", params.messages.len())),
                    model: "stub-model".to_string(),
                    stop_reason: None,
                })
            })
            .connect();
        client
            .initialize(Implementation::new("test-client", "0.1.0"))
            .await
            .unwrap();

        let result = client.call_tool("roots", Map::new()).await.unwrap();
        assert_eq!(text_of(&result), "file:///work,file:///notes");

        let result = client.call_tool("sample", Map::new()).await.unwrap();
        assert_eq!(text_of(&result), "stub-model: 1 message(s)");
        client.notify_roots_changed().unwrap();
    }

    #[tokio::test]
    async fn unconfigured_callbacks_fail_the_server_tool() {
        let client = ClientSession::with_timeout(serve(asking_server()), Duration::from_secs(5));
        client
            .initialize(Implementation::new("test-client", "0.1.0"))
            .await
            .unwrap();

        let err = client.call_tool("roots", Map::new()).await.unwrap_err();
        assert!(err.to_string().contains("roots/list"), "{err}");
    }
}
