//! Tool: echo — return the given message unchanged.

use serde::Deserialize;
use serde_json::{json, Map, Value};

use crate::session::RequestContext;
use crate::types::{McpError, McpResult, ToolCallResult};

use super::Tool;

#[derive(Debug, Deserialize)]
struct EchoParams {
    message: String,
}

pub fn tool() -> Tool {
    Tool::new("echo", execute)
        .description("Echo a message back to the caller")
        .input_schema(json!({
            "type": "object",
            "properties": {
                "message": { "type": "string", "description": "Text to echo" }
            },
            "required": ["message"]
        }))
}

async fn execute(args: Map<String, Value>, ctx: RequestContext) -> McpResult<ToolCallResult> {
    let params: EchoParams = serde_json::from_value(Value::Object(args))
        .map_err(|e| McpError::InvalidParams(e.to_string()))?;

    if let Some(auth) = ctx.auth() {
        tracing::debug!(subject = %auth.subject, "echo on behalf of caller");
    }
    Ok(ToolCallResult::text(params.message))
}
