//! Tool registration and dispatch.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::session::RequestContext;
use crate::types::{McpError, McpResult, ToolCallParams, ToolCallResult, ToolDefinition};

/// Something that can be called as a tool.
///
/// Implemented for any `Fn(arguments, ctx) -> impl Future<Output = McpResult<ToolCallResult>>`.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn call(
        &self,
        arguments: Map<String, Value>,
        ctx: RequestContext,
    ) -> McpResult<ToolCallResult>;
}

#[async_trait]
impl<F, Fut> ToolHandler for F
where
    F: Fn(Map<String, Value>, RequestContext) -> Fut + Send + Sync,
    Fut: Future<Output = McpResult<ToolCallResult>> + Send + 'static,
{
    async fn call(
        &self,
        arguments: Map<String, Value>,
        ctx: RequestContext,
    ) -> McpResult<ToolCallResult> {
        (self)(arguments, ctx).await
    }
}

/// A registered tool: its advertised definition, required scopes and handler.
#[derive(Clone)]
pub struct Tool {
    pub definition: ToolDefinition,
    pub scopes: BTreeSet<String>,
    handler: Arc<dyn ToolHandler>,
}

impl Tool {
    pub fn new(name: impl Into<String>, handler: impl ToolHandler + 'static) -> Self {
        Self {
            definition: ToolDefinition {
                name: name.into(),
                description: None,
                input_schema: json!({ "type": "object", "properties": {} }),
            },
            scopes: BTreeSet::new(),
            handler: Arc::new(handler),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.definition.description = Some(description.into());
        self
    }

    pub fn input_schema(mut self, schema: Value) -> Self {
        self.definition.input_schema = schema;
        self
    }

    pub fn scopes<I, S>(mut self, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scopes = scopes.into_iter().map(Into::into).collect();
        self
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }
}

#[derive(Default)]
pub struct ToolRegistry {
    tools: Vec<Tool>,
    index: HashMap<String, usize>,
    warn_on_duplicate: bool,
}

impl ToolRegistry {
    pub fn new(warn_on_duplicate: bool) -> Self {
        Self {
            warn_on_duplicate,
            ..Self::default()
        }
    }

    /// Register `tool`. The first registration of a name wins; returns false for a duplicate.
    pub fn add(&mut self, tool: Tool) -> bool {
        if self.index.contains_key(tool.name()) {
            if self.warn_on_duplicate {
                tracing::warn!(tool = tool.name(), "Tool already exists");
            }
            return false;
        }
        self.index.insert(tool.name().to_string(), self.tools.len());
        self.tools.push(tool);
        true
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    pub fn list(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition.clone()).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Tool> {
        self.tools.iter()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub async fn call(
        &self,
        params: ToolCallParams,
        ctx: RequestContext,
    ) -> McpResult<ToolCallResult> {
        self.invoke(&params.name, params.arguments.unwrap_or_default(), ctx)
            .await
    }

    /// Look up `name` and run its handler.
    pub async fn invoke(
        &self,
        name: &str,
        arguments: Map<String, Value>,
        ctx: RequestContext,
    ) -> McpResult<ToolCallResult> {
        let tool = self
            .get(name)
            .ok_or_else(|| McpError::ToolNotFound(name.to_string()))?;

        tracing::debug!(tool = %name, request_id = %ctx.request_id, "Calling tool");
        tool.handler.call(arguments, ctx).await.map_err(|e| {
            tracing::error!(tool = %name, "Tool failed: {e}");
            e
        })
    }
}
