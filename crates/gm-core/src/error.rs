//! Error taxonomy for the GameManager

use thiserror::Error;

/// Result type for GameManager operations
pub type Result<T> = std::result::Result<T, GmError>;

/// GameManager error kinds
///
/// Every kind surfaces upstream with a single wire shape
/// `{ code, message, details? }`; nothing is swallowed and retries are never
/// implicit.
#[derive(Debug, Error)]
pub enum GmError {
    /// Malformed upstream frame or unknown method
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Client did not negotiate the channels extension
    #[error("Channels extension required: {0}")]
    ChannelsRequired(String),

    /// Tool argument failed schema validation
    #[error("Validation error: {0}")]
    Validation(String),

    /// Upstream or downstream socket failure
    #[error("Transport error: {0}")]
    Transport(String),

    /// Lobby authentication failed
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// Publish or close against a non-open channel
    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// Engine subprocess failed to start, died, or never handshook
    #[error("Engine error: {0}")]
    Engine(String),

    /// Bridge IPC handshake failure, framing error, or disconnect
    #[error("Bridge error: {0}")]
    Bridge(String),

    /// Bridge refused a command
    #[error("Command error: {0}")]
    CommandError(String),

    /// Inbound command queue full
    #[error("Backpressure: command queue full")]
    Backpressure,

    /// Unexpected invariant violation
    #[error("Internal error: {0}")]
    Internal(String),
}

impl GmError {
    /// Stable string code for the wire shape.
    pub fn code(&self) -> &'static str {
        match self {
            GmError::Protocol(_) => "protocol",
            GmError::ChannelsRequired(_) => "channels-required",
            GmError::Validation(_) => "validation",
            GmError::Transport(_) => "transport",
            GmError::Auth(_) => "auth",
            GmError::ChannelClosed(_) => "channel-closed",
            GmError::Engine(_) => "engine",
            GmError::Bridge(_) => "bridge",
            GmError::CommandError(_) => "command-error",
            GmError::Backpressure => "backpressure",
            GmError::Internal(_) => "internal",
        }
    }

    /// JSON-RPC numeric code.
    pub fn rpc_code(&self) -> i32 {
        match self {
            GmError::Protocol(_) => -32600,
            GmError::Validation(_) => -32602,
            GmError::ChannelsRequired(_) => rpc_codes::CHANNELS_REQUIRED,
            GmError::Transport(_) => rpc_codes::TRANSPORT,
            GmError::Auth(_) => rpc_codes::AUTH,
            GmError::ChannelClosed(_) => rpc_codes::CHANNEL_CLOSED,
            GmError::Engine(_) => rpc_codes::ENGINE,
            GmError::Bridge(_) => rpc_codes::BRIDGE,
            GmError::CommandError(_) => rpc_codes::COMMAND_ERROR,
            GmError::Backpressure => rpc_codes::BACKPRESSURE,
            GmError::Internal(_) => -32603,
        }
    }

    /// The `{ code, message }` wire shape surfaced upstream.
    pub fn to_wire(&self) -> serde_json::Value {
        serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
        })
    }

    /// Wire shape with an attached details object.
    pub fn to_wire_with(&self, details: serde_json::Value) -> serde_json::Value {
        serde_json::json!({
            "code": self.code(),
            "message": self.to_string(),
            "details": details,
        })
    }
}

impl From<serde_json::Error> for GmError {
    fn from(err: serde_json::Error) -> Self {
        GmError::Protocol(err.to_string())
    }
}

impl From<std::io::Error> for GmError {
    fn from(err: std::io::Error) -> Self {
        GmError::Transport(err.to_string())
    }
}

/// JSON-RPC error codes for GameManager-specific failures
pub mod rpc_codes {
    pub const TRANSPORT: i32 = -32000;
    pub const AUTH: i32 = -32001;
    pub const CHANNEL_CLOSED: i32 = -32002;
    pub const ENGINE: i32 = -32003;
    pub const BRIDGE: i32 = -32004;
    pub const COMMAND_ERROR: i32 = -32005;
    pub const BACKPRESSURE: i32 = -32006;
    pub const CHANNELS_REQUIRED: i32 = -32010;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(GmError::ChannelClosed("x".into()).code(), "channel-closed");
        assert_eq!(GmError::Backpressure.code(), "backpressure");
        assert_eq!(
            GmError::ChannelsRequired("lobby_start_game".into()).rpc_code(),
            rpc_codes::CHANNELS_REQUIRED
        );
    }

    #[test]
    fn test_wire_shape() {
        let wire = GmError::Engine("exit code 1".into()).to_wire();
        assert_eq!(wire["code"], "engine");
        assert!(wire["message"].as_str().unwrap().contains("exit code 1"));
        assert!(wire.get("details").is_none());

        let wire = GmError::Backpressure.to_wire_with(serde_json::json!({"capacity": 1024}));
        assert_eq!(wire["details"]["capacity"], 1024);
    }
}
