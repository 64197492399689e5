//! JSON-RPC 2.0 message types for the MCP protocol.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use super::error::EnvelopeError;

/// JSON-RPC 2.0 protocol version.
pub const JSONRPC_VERSION: &str = "2.0";

/// Unique request identifier — a string or an integer.
///
/// `Null` only appears on error responses to messages whose id could not be recovered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    String(String),
    Number(i64),
    Null,
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RequestId::String(s) => write!(f, "{s}"),
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::Null => write!(f, "null"),
        }
    }
}

impl From<i64> for RequestId {
    fn from(n: i64) -> Self {
        RequestId::Number(n)
    }
}

impl From<&str> for RequestId {
    fn from(s: &str) -> Self {
        RequestId::String(s.to_string())
    }
}

/// A JSON-RPC 2.0 request message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcRequest {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// A JSON-RPC 2.0 success response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcResponse {
    pub jsonrpc: String,
    pub id: RequestId,
    pub result: Value,
}

/// A JSON-RPC 2.0 error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcError {
    pub jsonrpc: String,
    pub id: RequestId,
    pub error: JsonRpcErrorObject,
}

/// Error object within a JSON-RPC error response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcErrorObject {
    pub code: i32,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A JSON-RPC 2.0 notification (no id, no response expected).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JsonRpcNotification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub params: Option<Value>,
}

/// Union type for any JSON-RPC message.
///
/// Serializes as the inner message. Deserialization goes through
/// [`JsonRpcMessage::from_value`], which discriminates by field presence.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum JsonRpcMessage {
    Request(JsonRpcRequest),
    Response(JsonRpcResponse),
    Error(JsonRpcError),
    Notification(JsonRpcNotification),
}

impl JsonRpcMessage {
    /// Parse raw bytes into a message.
    ///
    /// Invalid JSON fails with `-32700`; JSON of the wrong shape fails with
    /// `-32600` and carries the request id when one could be recovered.
    pub fn parse(bytes: &[u8]) -> Result<Self, EnvelopeError> {
        let value: Value =
            serde_json::from_slice(bytes).map_err(|e| EnvelopeError::parse(e.to_string()))?;
        Self::from_value(value)
    }

    pub fn from_value(value: Value) -> Result<Self, EnvelopeError> {
        let Value::Object(obj) = value else {
            return Err(EnvelopeError::invalid(
                RequestId::Null,
                "Message must be a JSON object",
            ));
        };

        let id = recover_id(&obj);

        if obj.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(EnvelopeError::invalid(
                id,
                format!("Expected jsonrpc version \"{JSONRPC_VERSION}\""),
            ));
        }

        if let Some(params) = obj.get("params") {
            if !(params.is_object() || params.is_array() || params.is_null()) {
                return Err(EnvelopeError::invalid(
                    id,
                    "params must be an object or an array",
                ));
            }
        }

        let has_id = obj.contains_key("id");
        let has_method = obj.contains_key("method");
        let has_result = obj.contains_key("result");
        let has_error = obj.contains_key("error");
        let value = Value::Object(obj);

        let parsed = if has_method && has_id {
            if id == RequestId::Null {
                return Err(EnvelopeError::invalid(
                    id,
                    "Request id must be a string or an integer",
                ));
            }
            serde_json::from_value(value).map(JsonRpcMessage::Request)
        } else if has_method {
            serde_json::from_value(value).map(JsonRpcMessage::Notification)
        } else if has_id && has_result && !has_error {
            serde_json::from_value(value).map(JsonRpcMessage::Response)
        } else if has_id && has_error && !has_result {
            serde_json::from_value(value).map(JsonRpcMessage::Error)
        } else {
            return Err(EnvelopeError::invalid(
                id,
                "Message is not a request, notification, or response",
            ));
        };

        parsed.map_err(|e| EnvelopeError::invalid(id, e.to_string()))
    }

    /// Serialize to compact JSON bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    pub fn method(&self) -> Option<&str> {
        match self {
            JsonRpcMessage::Request(r) => Some(&r.method),
            JsonRpcMessage::Notification(n) => Some(&n.method),
            _ => None,
        }
    }

    pub fn id(&self) -> Option<&RequestId> {
        match self {
            JsonRpcMessage::Request(r) => Some(&r.id),
            JsonRpcMessage::Response(r) => Some(&r.id),
            JsonRpcMessage::Error(e) => Some(&e.id),
            JsonRpcMessage::Notification(_) => None,
        }
    }
}

impl<'de> Deserialize<'de> for JsonRpcMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        JsonRpcMessage::from_value(value).map_err(serde::de::Error::custom)
    }
}

fn recover_id(obj: &Map<String, Value>) -> RequestId {
    match obj.get("id") {
        Some(Value::String(s)) => RequestId::String(s.clone()),
        Some(Value::Number(n)) => n.as_i64().map(RequestId::Number).unwrap_or(RequestId::Null),
        _ => RequestId::Null,
    }
}

impl From<JsonRpcRequest> for JsonRpcMessage {
    fn from(r: JsonRpcRequest) -> Self {
        JsonRpcMessage::Request(r)
    }
}

impl From<JsonRpcResponse> for JsonRpcMessage {
    fn from(r: JsonRpcResponse) -> Self {
        JsonRpcMessage::Response(r)
    }
}

impl From<JsonRpcError> for JsonRpcMessage {
    fn from(e: JsonRpcError) -> Self {
        JsonRpcMessage::Error(e)
    }
}

impl From<JsonRpcNotification> for JsonRpcMessage {
    fn from(n: JsonRpcNotification) -> Self {
        JsonRpcMessage::Notification(n)
    }
}

impl JsonRpcRequest {
    pub fn new(id: RequestId, method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            method: method.into(),
            params,
        }
    }

    /// `params.<key>` as a string, when present.
    pub fn param_str(&self, key: &str) -> Option<&str> {
        self.params.as_ref()?.get(key)?.as_str()
    }
}

impl JsonRpcResponse {
    pub fn new(id: RequestId, result: Value) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            result,
        }
    }
}

impl JsonRpcError {
    pub fn new(id: RequestId, code: i32, message: String) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            id,
            error: JsonRpcErrorObject {
                code,
                message,
                data: None,
            },
        }
    }
}

impl JsonRpcNotification {
    pub fn new(method: impl Into<String>, params: Option<Value>) -> Self {
        Self {
            jsonrpc: JSONRPC_VERSION.to_string(),
            method: method.into(),
            params,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::error_codes::{INVALID_REQUEST, PARSE_ERROR};
    use serde_json::json;

    fn parse(value: Value) -> Result<JsonRpcMessage, EnvelopeError> {
        JsonRpcMessage::parse(value.to_string().as_bytes())
    }

    #[test]
    fn discriminates_by_field_presence() {
        let req = parse(json!({"jsonrpc": "2.0", "id": 1, "method": "ping"})).unwrap();
        assert!(matches!(req, JsonRpcMessage::Request(_)));

        let notif = parse(json!({"jsonrpc": "2.0", "method": "notifications/initialized"})).unwrap();
        assert!(matches!(notif, JsonRpcMessage::Notification(_)));

        let ok = parse(json!({"jsonrpc": "2.0", "id": "a", "result": {}})).unwrap();
        assert!(matches!(ok, JsonRpcMessage::Response(_)));

        let err = parse(json!({
            "jsonrpc": "2.0", "id": "a",
            "error": {"code": -32601, "message": "nope"}
        }))
        .unwrap();
        assert!(matches!(err, JsonRpcMessage::Error(_)));
    }

    #[test]
    fn bad_json_is_parse_error() {
        let err = JsonRpcMessage::parse(br#"{"broken":"#).unwrap_err();
        assert_eq!(err.code, PARSE_ERROR);
        assert_eq!(err.id, RequestId::Null);
    }

    #[test]
    fn wrong_shape_keeps_recoverable_id() {
        let err = parse(json!({"jsonrpc": "2.0", "id": 7, "result": {}, "error": {}})).unwrap_err();
        assert_eq!(err.code, INVALID_REQUEST);
        assert_eq!(err.id, RequestId::Number(7));

        let err = parse(json!({"jsonrpc": "1.0", "id": "x", "method": "ping"})).unwrap_err();
        assert_eq!(err.code, INVALID_REQUEST);
        assert_eq!(err.id, RequestId::String("x".into()));
    }

    #[test]
    fn rejects_non_object_and_bad_ids() {
        assert_eq!(parse(json!([1, 2])).unwrap_err().code, INVALID_REQUEST);
        assert_eq!(
            parse(json!({"jsonrpc": "2.0", "id": null, "method": "ping"}))
                .unwrap_err()
                .code,
            INVALID_REQUEST
        );
        assert_eq!(
            parse(json!({"jsonrpc": "2.0", "id": 1.5, "method": "ping"}))
                .unwrap_err()
                .code,
            INVALID_REQUEST
        );
        assert_eq!(
            parse(json!({"jsonrpc": "2.0", "id": 1, "method": "x", "params": "str"}))
                .unwrap_err()
                .code,
            INVALID_REQUEST
        );
    }

    #[test]
    fn serialization_omits_absent_fields() {
        let msg: JsonRpcMessage = JsonRpcNotification::new("notifications/initialized", None).into();
        let text = String::from_utf8(msg.to_bytes().unwrap()).unwrap();
        assert_eq!(text, r#"{"jsonrpc":"2.0","method":"notifications/initialized"}"#);

        let msg: JsonRpcMessage = JsonRpcError::new(RequestId::Null, -32700, "Parse error".into()).into();
        let text = String::from_utf8(msg.to_bytes().unwrap()).unwrap();
        assert_eq!(
            text,
            r#"{"jsonrpc":"2.0","id":null,"error":{"code":-32700,"message":"Parse error"}}"#
        );
    }

    #[test]
    fn parse_inverts_serialize() {
        let messages: Vec<JsonRpcMessage> = vec![
            JsonRpcRequest::new("req-1".into(), "tools/call", Some(json!({"name": "echo"}))).into(),
            JsonRpcRequest::new(RequestId::Number(-3), "ping", None).into(),
            JsonRpcNotification::new("notifications/cancelled", Some(json!({"requestId": 4}))).into(),
            JsonRpcResponse::new(RequestId::Number(9), json!({"tools": []})).into(),
            JsonRpcError {
                jsonrpc: JSONRPC_VERSION.to_string(),
                id: "e".into(),
                error: JsonRpcErrorObject {
                    code: -32000,
                    message: "boom".into(),
                    data: Some(json!({"detail": 1})),
                },
            }
            .into(),
        ];

        for msg in messages {
            let bytes = msg.to_bytes().unwrap();
            assert_eq!(JsonRpcMessage::parse(&bytes).unwrap(), msg);
        }
    }
}
