//! Error types and JSON-RPC error codes.

use std::time::Duration;

use serde_json::Value;

use mcpengine_auth::AuthError;

use super::message::{JsonRpcError, JsonRpcErrorObject, RequestId, JSONRPC_VERSION};

/// Standard JSON-RPC 2.0 error codes.
pub mod error_codes {
    pub const PARSE_ERROR: i32 = -32700;
    pub const INVALID_REQUEST: i32 = -32600;
    pub const METHOD_NOT_FOUND: i32 = -32601;
    pub const INVALID_PARAMS: i32 = -32602;
    pub const INTERNAL_ERROR: i32 = -32603;
}

/// MCP and application error codes.
pub mod mcp_error_codes {
    /// Generic failure raised by a tool, resource or prompt handler.
    pub const APPLICATION_ERROR: i32 = -32000;
    pub const REQUEST_CANCELLED: i32 = -32800;
    /// Authentication failure raised inside a handler body.
    pub const AUTHENTICATION_ERROR: i32 = -32900;
    /// Authorization failure raised inside a handler body.
    pub const AUTHORIZATION_ERROR: i32 = -32901;
}

/// All errors that can flow through dispatch or surface to a local caller.
#[derive(thiserror::Error, Debug)]
pub enum McpError {
    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Invalid request state: '{0}' is not allowed before initialization completes")]
    NotInitialized(String),

    #[error("Method not found: {0}")]
    MethodNotFound(String),

    #[error("Invalid params: {0}")]
    InvalidParams(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("{0}")]
    Handler(String),

    #[error("Request cancelled")]
    RequestCancelled,

    #[error("Unknown resource: {0}")]
    ResourceNotFound(String),

    #[error("Unknown tool: {0}")]
    ToolNotFound(String),

    #[error("Unknown prompt: {0}")]
    PromptNotFound(String),

    #[error("{0}")]
    Authentication(String),

    #[error("{0}")]
    Authorization(String),

    #[error("Request timed out after {0:?}")]
    RequestTimeout(Duration),

    #[error("Connection closed")]
    ConnectionClosed,

    /// Error response received from the remote side.
    #[error("{message} (code {code})")]
    Remote {
        code: i32,
        message: String,
        data: Option<Value>,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl McpError {
    pub fn handler(message: impl Into<String>) -> Self {
        McpError::Handler(message.into())
    }

    pub fn code(&self) -> i32 {
        use error_codes::*;
        use mcp_error_codes::*;
        match self {
            McpError::ParseError(_) => PARSE_ERROR,
            McpError::InvalidRequest(_) | McpError::NotInitialized(_) => INVALID_REQUEST,
            McpError::MethodNotFound(_)
            | McpError::ResourceNotFound(_)
            | McpError::ToolNotFound(_)
            | McpError::PromptNotFound(_) => METHOD_NOT_FOUND,
            McpError::InvalidParams(_) | McpError::Json(_) => INVALID_PARAMS,
            McpError::InternalError(_) | McpError::Transport(_) | McpError::Io(_) => {
                INTERNAL_ERROR
            }
            McpError::Handler(_) => APPLICATION_ERROR,
            McpError::RequestCancelled => REQUEST_CANCELLED,
            McpError::Authentication(_) => AUTHENTICATION_ERROR,
            McpError::Authorization(_) => AUTHORIZATION_ERROR,
            McpError::RequestTimeout(_) | McpError::ConnectionClosed => INTERNAL_ERROR,
            McpError::Remote { code, .. } => *code,
        }
    }

    /// True for failures that only ever surface to a local caller.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            McpError::RequestTimeout(_) | McpError::ConnectionClosed
        )
    }

    pub fn to_json_rpc_error(&self, id: RequestId) -> JsonRpcError {
        let (message, data) = match self {
            McpError::Remote { message, data, .. } => (message.clone(), data.clone()),
            other => (other.to_string(), None),
        };
        JsonRpcError {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error: JsonRpcErrorObject {
                code: self.code(),
                message,
                data,
            },
        }
    }
}

impl From<JsonRpcErrorObject> for McpError {
    fn from(e: JsonRpcErrorObject) -> Self {
        McpError::Remote {
            code: e.code,
            message: e.message,
            data: e.data,
        }
    }
}

impl From<AuthError> for McpError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Authentication(msg) => McpError::Authentication(msg),
            AuthError::Authorization(msg) => McpError::Authorization(msg),
        }
    }
}

pub type McpResult<T> = Result<T, McpError>;

/// A frame that could not be turned into a message.
///
/// Stays inside the transport bindings; `id` is `Null` when none was recoverable.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
#[error("{message}")]
pub struct EnvelopeError {
    pub id: RequestId,
    pub code: i32,
    pub message: String,
}

impl EnvelopeError {
    pub fn parse(detail: impl std::fmt::Display) -> Self {
        Self {
            id: RequestId::Null,
            code: error_codes::PARSE_ERROR,
            message: format!("Parse error: {detail}"),
        }
    }

    pub fn invalid(id: RequestId, detail: impl std::fmt::Display) -> Self {
        Self {
            id,
            code: error_codes::INVALID_REQUEST,
            message: format!("Invalid request: {detail}"),
        }
    }

    pub fn to_json_rpc_error(&self) -> JsonRpcError {
        JsonRpcError::new(self.id.clone(), self.code, self.message.clone())
    }
}
