//! The server definition shared by every session: registries, scopes and lifespan state.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;

use crate::auth::ScopeMapping;
use crate::prompts::{Prompt, PromptRegistry};
use crate::resources::{Resource, ResourceRegistry};
use crate::session::peer::DEFAULT_REQUEST_TIMEOUT;
use crate::session::Peer;
use crate::tools::{Tool, ToolRegistry};
use crate::types::{Implementation, McpResult, ServerCapabilities, SERVER_NAME, SERVER_VERSION};

/// Reacts to a client notification. Every registered handler runs on every delivery.
#[async_trait]
pub trait NotificationHandler: Send + Sync {
    async fn handle(&self, params: Option<Value>, peer: Peer) -> McpResult<()>;
}

#[async_trait]
impl<F, Fut> NotificationHandler for F
where
    F: Fn(Option<Value>, Peer) -> Fut + Send + Sync,
    Fut: Future<Output = McpResult<()>> + Send + 'static,
{
    async fn handle(&self, params: Option<Value>, peer: Peer) -> McpResult<()> {
        (self)(params, peer).await
    }
}

/// Releases lifespan resources; receives the lifespan state.
pub type ShutdownHook =
    Box<dyn Fn(Arc<dyn Any + Send + Sync>) -> BoxFuture<'static, ()> + Send + Sync>;

/// Read-only after [`McpServerBuilder::build`]; shared by all sessions.
pub struct McpServer {
    info: Implementation,
    instructions: Option<String>,
    tools: ToolRegistry,
    resources: ResourceRegistry,
    prompts: PromptRegistry,
    scopes: Arc<ScopeMapping>,
    lifespan: Arc<dyn Any + Send + Sync>,
    notification_handlers: HashMap<String, Vec<Arc<dyn NotificationHandler>>>,
    request_timeout: Duration,
    shutdown_hooks: Vec<ShutdownHook>,
    shut_down: AtomicBool,
}

impl McpServer {
    pub fn builder(name: impl Into<String>) -> McpServerBuilder {
        McpServerBuilder::new(name)
    }

    pub fn info(&self) -> &Implementation {
        &self.info
    }

    pub fn instructions(&self) -> Option<&str> {
        self.instructions.as_deref()
    }

    pub fn tools(&self) -> &ToolRegistry {
        &self.tools
    }

    pub fn resources(&self) -> &ResourceRegistry {
        &self.resources
    }

    pub fn prompts(&self) -> &PromptRegistry {
        &self.prompts
    }

    pub fn scopes(&self) -> &Arc<ScopeMapping> {
        &self.scopes
    }

    pub fn lifespan(&self) -> &Arc<dyn Any + Send + Sync> {
        &self.lifespan
    }

    pub fn request_timeout(&self) -> Duration {
        self.request_timeout
    }

    pub fn notification_handlers(&self, method: &str) -> &[Arc<dyn NotificationHandler>] {
        self.notification_handlers
            .get(method)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    /// Run the shutdown hooks in registration order. Later calls do nothing.
    pub async fn shutdown(&self) {
        if self.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        for hook in &self.shutdown_hooks {
            hook(self.lifespan.clone()).await;
        }
        tracing::info!(server = %self.info.name, hooks = self.shutdown_hooks.len(), "Server shut down");
    }

    pub fn capabilities(&self) -> ServerCapabilities {
        ServerCapabilities::for_registries(
            !self.tools.is_empty(),
            !self.resources.is_empty(),
            !self.prompts.is_empty(),
        )
    }
}

pub struct McpServerBuilder {
    name: String,
    version: String,
    instructions: Option<String>,
    tools: Vec<Tool>,
    resources: Vec<Resource>,
    prompts: Vec<Prompt>,
    scopes: ScopeMapping,
    lifespan: Arc<dyn Any + Send + Sync>,
    notification_handlers: HashMap<String, Vec<Arc<dyn NotificationHandler>>>,
    request_timeout: Duration,
    warn_on_duplicates: bool,
    shutdown_hooks: Vec<ShutdownHook>,
}

impl McpServerBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: SERVER_VERSION.to_string(),
            instructions: None,
            tools: Vec::new(),
            resources: Vec::new(),
            prompts: Vec::new(),
            scopes: ScopeMapping::new(),
            lifespan: Arc::new(()),
            notification_handlers: HashMap::new(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            warn_on_duplicates: true,
            shutdown_hooks: Vec::new(),
        }
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn tool(mut self, tool: Tool) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn resource(mut self, resource: Resource) -> Self {
        self.resources.push(resource);
        self
    }

    pub fn prompt(mut self, prompt: Prompt) -> Self {
        self.prompts.push(prompt);
        self
    }

    /// Extra scope requirements on top of those declared on each item.
    pub fn scopes(mut self, scopes: ScopeMapping) -> Self {
        self.scopes = scopes;
        self
    }

    /// State available to handlers through `RequestContext::lifespan`.
    pub fn lifespan<T: Any + Send + Sync>(mut self, state: T) -> Self {
        self.lifespan = Arc::new(state);
        self
    }

    /// Run `hook` once when the server stops serving.
    pub fn on_shutdown<F, Fut>(mut self, hook: F) -> Self
    where
        F: Fn(Arc<dyn Any + Send + Sync>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.shutdown_hooks
            .push(Box::new(move |state| hook(state).boxed()));
        self
    }

    pub fn on_notification(
        mut self,
        method: impl Into<String>,
        handler: impl NotificationHandler + 'static,
    ) -> Self {
        self.notification_handlers
            .entry(method.into())
            .or_default()
            .push(Arc::new(handler));
        self
    }

    /// Default timeout for server-to-client requests.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn warn_on_duplicates(mut self, warn: bool) -> Self {
        self.warn_on_duplicates = warn;
        self
    }

    pub fn build(self) -> Arc<McpServer> {
        let mut tools = ToolRegistry::new(self.warn_on_duplicates);
        let mut resources = ResourceRegistry::new(self.warn_on_duplicates);
        let mut prompts = PromptRegistry::new(self.warn_on_duplicates);
        let mut scopes = self.scopes;

        for tool in self.tools {
            if !tool.scopes.is_empty() {
                scopes = scopes.tool(tool.name(), tool.scopes.iter().cloned());
            }
            tools.add(tool);
        }
        for resource in self.resources {
            if !resource.scopes.is_empty() {
                scopes = scopes.resource(resource.uri.as_str(), resource.scopes.iter().cloned());
            }
            resources.add(resource);
        }
        for prompt in self.prompts {
            if !prompt.scopes.is_empty() {
                scopes = scopes.prompt(prompt.name(), prompt.scopes.iter().cloned());
            }
            prompts.add(prompt);
        }

        tracing::debug!(
            server = %self.name,
            tools = tools.len(),
            "Server built"
        );

        Arc::new(McpServer {
            info: Implementation::new(self.name, self.version),
            instructions: self.instructions,
            tools,
            resources,
            prompts,
            scopes: Arc::new(scopes),
            lifespan: self.lifespan,
            notification_handlers: self.notification_handlers,
            request_timeout: self.request_timeout,
            shutdown_hooks: self.shutdown_hooks,
            shut_down: AtomicBool::new(false),
        })
    }
}

/// The server the `mcpengine` binary serves: one tool, one prompt, one resource.
pub fn demo_server() -> McpResult<Arc<McpServer>> {
    use crate::prompts::greeting;
    use crate::resources::server_info::{self, ServerStarted};
    use crate::tools::echo;

    Ok(McpServer::builder(SERVER_NAME)
        .instructions("Demo server: call `echo`, render `greeting`, read `info://server`.")
        .tool(echo::tool())
        .prompt(greeting::prompt())
        .resource(server_info::resource()?)
        .lifespan(ServerStarted {
            at: chrono::Utc::now(),
        })
        .build())
}
