//! Message framing for newline-delimited JSON.

use crate::types::{EnvelopeError, JsonRpcMessage, McpError, McpResult};

/// Parse a single line of text as a JSON-RPC message.
pub fn parse_message(line: &str) -> Result<JsonRpcMessage, EnvelopeError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(EnvelopeError::parse("Empty message"));
    }
    JsonRpcMessage::parse(trimmed.as_bytes())
}

/// Serialize a message to a JSON line (with trailing newline).
pub fn frame_message(message: &JsonRpcMessage) -> McpResult<String> {
    let mut json = serde_json::to_string(message).map_err(McpError::Json)?;
    json.push('\n');
    Ok(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{JsonRpcRequest, RequestId};

    #[test]
    fn frames_one_line_per_message() {
        let msg: JsonRpcMessage = JsonRpcRequest::new(RequestId::Number(1), "ping", None).into();
        let line = frame_message(&msg).unwrap();
        assert!(line.ends_with('\n'));
        assert_eq!(line.matches('\n').count(), 1);
        assert_eq!(parse_message(&line).unwrap(), msg);
    }

    #[test]
    fn empty_line_is_parse_error() {
        assert_eq!(parse_message("   ").unwrap_err().code, -32700);
    }
}
