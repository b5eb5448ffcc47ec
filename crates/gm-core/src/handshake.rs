//! Bridge IPC handshake frames
//!
//! First frame from the bridge: `hello` with its handshake token. First
//! frame back from the GameManager: `welcome`. Everything after is events
//! one way and commands the other.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HandshakeFrame {
    Hello { token: String, version: String },
    Welcome,
}
