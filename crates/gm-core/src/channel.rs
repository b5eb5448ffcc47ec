//! Channel identifiers and lifecycle

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a bidirectional message stream within a session.
///
/// Local game instances are `game:local-N`, lobby rooms `lobby:<room>`, and
/// non-room lobby traffic rides the global `lobby` channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(pub String);

impl ChannelId {
    pub fn local_game(n: u32) -> Self {
        ChannelId(format!("game:local-{}", n))
    }

    pub fn lobby_room(room: &str) -> Self {
        ChannelId(format!("lobby:{}", room))
    }

    pub fn lobby_global() -> Self {
        ChannelId("lobby".to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True for `game:*` channels.
    pub fn is_game(&self) -> bool {
        self.0.starts_with("game:")
    }

    /// Room name for `lobby:<room>` channels.
    pub fn lobby_room_name(&self) -> Option<&str> {
        self.0.strip_prefix("lobby:")
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ChannelId {
    fn from(s: &str) -> Self {
        ChannelId(s.to_string())
    }
}

/// What kind of resource owns a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelKind {
    LobbyChat,
    GameInstance,
    Replay,
}

/// Channel lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChannelState {
    Opening,
    Open,
    Closing,
    Closed,
}

/// Channel description carried in `channels/changed` notifications
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelDescriptor {
    pub id: ChannelId,
    pub kind: ChannelKind,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_channel_id_forms() {
        assert_eq!(ChannelId::local_game(1).as_str(), "game:local-1");
        assert_eq!(ChannelId::lobby_room("main").as_str(), "lobby:main");
        assert!(ChannelId::local_game(2).is_game());
        assert_eq!(
            ChannelId::lobby_room("zk").lobby_room_name(),
            Some("zk")
        );
        assert_eq!(ChannelId::lobby_global().lobby_room_name(), None);
    }

    #[test]
    fn test_descriptor_serialization() {
        let desc = ChannelDescriptor {
            id: ChannelId::local_game(1),
            kind: ChannelKind::GameInstance,
            label: "Game on SimpleChess".into(),
            metadata: Some(serde_json::json!({"map": "SimpleChess"})),
        };
        let json = serde_json::to_value(&desc).unwrap();
        assert_eq!(json["id"], "game:local-1");
        assert_eq!(json["kind"], "game-instance");
        assert_eq!(json["metadata"]["map"], "SimpleChess");
    }
}
