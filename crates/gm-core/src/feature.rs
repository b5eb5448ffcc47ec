//! Feature-set declarations for session negotiation

use serde::{Deserialize, Serialize};

/// A named capability bundle negotiated at session start.
///
/// Flags govern what the set contributes once acknowledged: tools in the
/// registry, server-initiated push events, channel ownership, and declared
/// reversibility (checkpoint/restore).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeatureSet {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub tools: bool,
    pub push_events: bool,
    pub channels: bool,
    pub rollback: bool,
}

/// The feature sets this GameManager declares.
pub fn declared_feature_sets() -> Vec<FeatureSet> {
    vec![
        FeatureSet {
            name: "lobby".into(),
            description: Some("Lobby operations: connect, chat, battles, matchmaking".into()),
            tools: true,
            push_events: true,
            channels: true,
            rollback: false,
        },
        FeatureSet {
            name: "game".into(),
            description: Some("Local game instances: commands, observation, savestates".into()),
            tools: true,
            push_events: true,
            channels: true,
            rollback: true,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_declared_sets() {
        let sets = declared_feature_sets();
        assert_eq!(sets.len(), 2);
        let game = sets.iter().find(|s| s.name == "game").unwrap();
        assert!(game.rollback);
        let lobby = sets.iter().find(|s| s.name == "lobby").unwrap();
        assert!(!lobby.rollback);
        assert!(lobby.channels);
    }

    #[test]
    fn test_serialization_casing() {
        let json = serde_json::to_value(declared_feature_sets()).unwrap();
        assert_eq!(json[0]["pushEvents"], true);
    }
}
