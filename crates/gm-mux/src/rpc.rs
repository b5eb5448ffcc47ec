//! JSON-RPC message types for the upstream protocol
//!
//! Four message categories cross the session transport: requests (carry an
//! `id` and expect a response), responses (`result` or `error`),
//! notifications (no `id`), and channel messages, which are notifications
//! with a `channelId` in their params.

use gm_core::GmError;
use serde::{Deserialize, Serialize};

/// Method names used on the wire.
pub mod method {
    pub const INITIALIZE: &str = "initialize";
    pub const INITIALIZED: &str = "initialized";
    pub const TOOLS_LIST: &str = "tools/list";
    pub const TOOLS_CALL: &str = "tools/call";
    pub const CHANNELS_OPEN: &str = "channels/open";
    pub const CHANNELS_CLOSE: &str = "channels/close";
    pub const CHANNELS_LIST: &str = "channels/list";
    pub const CHANNELS_PUBLISH: &str = "channels/publish";
    pub const CHANNELS_INCOMING: &str = "channels/incoming";
    pub const CHANNELS_CHANGED: &str = "channels/changed";
    pub const STATE_CHECKPOINT: &str = "state/checkpoint";
    pub const STATE_ROLLBACK: &str = "state/rollback";
    pub const SHUTDOWN: &str = "shutdown";
}

/// Request ID (string or number, echoed verbatim in the response)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RequestId {
    Number(i64),
    String(String),
}

/// A JSON-RPC request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub jsonrpc: String,
    pub id: RequestId,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// A JSON-RPC notification (no id, no response expected)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub jsonrpc: String,
    pub method: String,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub params: serde_json::Value,
}

impl Notification {
    pub fn new(method: &str, params: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
        }
    }
}

/// A JSON-RPC response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Response {
    pub jsonrpc: String,
    pub id: RequestId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
}

/// JSON-RPC error object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcError {
    pub code: i32,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl Response {
    pub fn success(id: RequestId, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(result),
            error: None,
        }
    }

    pub fn error(id: RequestId, code: i32, message: impl Into<String>) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code,
                message: message.into(),
                data: None,
            }),
        }
    }

    /// Build an error response from the taxonomy, attaching the wire shape
    /// as `error.data`.
    pub fn from_gm_error(id: RequestId, err: &GmError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            id,
            result: None,
            error: Some(RpcError {
                code: err.rpc_code(),
                message: err.to_string(),
                data: Some(err.to_wire()),
            }),
        }
    }
}

/// A classified incoming frame.
#[derive(Debug, Clone)]
pub enum IncomingMessage {
    Request(Request),
    Notification(Notification),
}

/// Classify one decoded JSON frame as a request or notification.
///
/// Frames with an `id` and a `method` are requests; frames with only a
/// `method` are notifications. Anything else is a protocol error (the
/// GameManager never receives responses: it initiates no upstream requests).
pub fn classify(value: serde_json::Value) -> Result<IncomingMessage, GmError> {
    let has_id = value.get("id").map(|v| !v.is_null()).unwrap_or(false);
    let has_method = value.get("method").map(|v| v.is_string()).unwrap_or(false);

    match (has_id, has_method) {
        (true, true) => {
            let req: Request = serde_json::from_value(value)
                .map_err(|e| GmError::Protocol(format!("malformed request: {}", e)))?;
            Ok(IncomingMessage::Request(req))
        }
        (false, true) => {
            let notif: Notification = serde_json::from_value(value)
                .map_err(|e| GmError::Protocol(format!("malformed notification: {}", e)))?;
            Ok(IncomingMessage::Notification(notif))
        }
        _ => Err(GmError::Protocol("frame is neither request nor notification".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_request() {
        let value: serde_json::Value =
            serde_json::from_str(r#"{"jsonrpc":"2.0","id":1,"method":"tools/list"}"#).unwrap();
        match classify(value).unwrap() {
            IncomingMessage::Request(req) => {
                assert_eq!(req.method, "tools/list");
                assert_eq!(req.id, RequestId::Number(1));
            }
            other => panic!("expected request, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_notification() {
        let value: serde_json::Value =
            serde_json::from_str(r#"{"jsonrpc":"2.0","method":"initialized"}"#).unwrap();
        match classify(value).unwrap() {
            IncomingMessage::Notification(notif) => assert_eq!(notif.method, "initialized"),
            other => panic!("expected notification, got {:?}", other),
        }
    }

    #[test]
    fn test_classify_garbage() {
        let value: serde_json::Value = serde_json::from_str(r#"{"foo": 1}"#).unwrap();
        assert!(classify(value).is_err());
    }

    #[test]
    fn test_string_request_id_roundtrip() {
        let resp = Response::success(
            RequestId::String("req-7".into()),
            serde_json::json!({"ok": true}),
        );
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["id"], "req-7");
        assert!(json.get("error").is_none());
    }

    #[test]
    fn test_error_response_carries_wire_shape() {
        let err = GmError::ChannelClosed("game:local-1".into());
        let resp = Response::from_gm_error(RequestId::Number(3), &err);
        let data = resp.error.unwrap().data.unwrap();
        assert_eq!(data["code"], "channel-closed");
    }
}
