//! Prompt: greeting — ask the model to greet someone by name.

use serde_json::{Map, Value};

use crate::session::RequestContext;
use crate::types::{McpResult, PromptMessage};

use super::Prompt;

pub fn prompt() -> Prompt {
    Prompt::new("greeting", render)
        .description("Greet a person by name")
        .argument("name", "Who to greet", true)
}

async fn render(args: Map<String, Value>, _ctx: RequestContext) -> McpResult<Vec<PromptMessage>> {
    let name = args.get("name").and_then(Value::as_str).unwrap_or("there");
    Ok(vec![PromptMessage::user(format!(
        "Write a short, friendly greeting for {name}."
    ))])
}
