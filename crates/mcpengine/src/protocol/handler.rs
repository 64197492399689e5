//! Dispatch of post-handshake requests to the server's registries.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::server::McpServer;
use crate::session::RequestContext;
use crate::types::*;

/// Parse request params into `T`, failing with invalid-params when absent or malformed.
pub fn parse_params<T: DeserializeOwned>(params: Option<Value>, method: &str) -> McpResult<T> {
    params
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| McpError::InvalidParams(e.to_string()))?
        .ok_or_else(|| McpError::InvalidParams(format!("{method} params required")))
}

fn to_result(value: impl Serialize) -> McpResult<Value> {
    serde_json::to_value(value).map_err(|e| McpError::InternalError(e.to_string()))
}

/// Routes tool, resource, prompt and logging requests.
#[derive(Clone)]
pub struct ProtocolHandler {
    server: Arc<McpServer>,
}

impl ProtocolHandler {
    pub fn new(server: Arc<McpServer>) -> Self {
        Self { server }
    }

    pub fn server(&self) -> &Arc<McpServer> {
        &self.server
    }

    pub async fn dispatch(
        &self,
        method: &str,
        params: Option<Value>,
        ctx: RequestContext,
    ) -> McpResult<Value> {
        match method {
            "tools/list" => self.handle_tools_list(),
            "tools/call" => self.handle_tools_call(params, ctx).await,

            "resources/list" => self.handle_resources_list(),
            "resources/templates/list" => self.handle_resource_templates_list(),
            "resources/read" => self.handle_resources_read(params, ctx).await,

            "prompts/list" => self.handle_prompts_list(),
            "prompts/get" => self.handle_prompts_get(params, ctx).await,

            "logging/setLevel" => self.handle_set_level(params, &ctx),

            _ => Err(McpError::MethodNotFound(method.to_string())),
        }
    }

    fn handle_tools_list(&self) -> McpResult<Value> {
        to_result(ToolListResult {
            tools: self.server.tools().list(),
            next_cursor: None,
        })
    }

    async fn handle_tools_call(
        &self,
        params: Option<Value>,
        ctx: RequestContext,
    ) -> McpResult<Value> {
        let call: ToolCallParams = parse_params(params, "tools/call")?;
        to_result(self.server.tools().call(call, ctx).await?)
    }

    fn handle_resources_list(&self) -> McpResult<Value> {
        to_result(ResourceListResult {
            resources: self.server.resources().list(),
            next_cursor: None,
        })
    }

    fn handle_resource_templates_list(&self) -> McpResult<Value> {
        to_result(ResourceTemplateListResult {
            resource_templates: self.server.resources().list_templates(),
            next_cursor: None,
        })
    }

    async fn handle_resources_read(
        &self,
        params: Option<Value>,
        ctx: RequestContext,
    ) -> McpResult<Value> {
        let read: ResourceReadParams = parse_params(params, "resources/read")?;
        to_result(self.server.resources().read(&read.uri, ctx).await?)
    }

    fn handle_prompts_list(&self) -> McpResult<Value> {
        to_result(PromptListResult {
            prompts: self.server.prompts().list(),
            next_cursor: None,
        })
    }

    async fn handle_prompts_get(
        &self,
        params: Option<Value>,
        ctx: RequestContext,
    ) -> McpResult<Value> {
        let get: PromptGetParams = parse_params(params, "prompts/get")?;
        to_result(self.server.prompts().get_prompt(get, ctx).await?)
    }

    fn handle_set_level(&self, params: Option<Value>, ctx: &RequestContext) -> McpResult<Value> {
        let SetLevelParams { level } = parse_params(params, "logging/setLevel")?;
        ctx.log_filter().set(level);
        tracing::debug!(%level, "Client log level changed");
        to_result(EmptyResult {})
    }
}
