//! Session state: negotiation and the open-channel table
//!
//! One `Session` per upstream connection. The session owns the negotiated
//! feature-set list and the channel table; every open channel maps to exactly
//! one owning resource tag, and the table is mutated only by the session task
//! that owns it.

use crate::checkpoint::CheckpointTree;
use gm_core::{declared_feature_sets, ChannelId, ChannelKind, ChannelState, FeatureSet, GmError};
use std::collections::HashMap;

/// The resource that owns a channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelOwner {
    /// A lobby chat room (room name) or the global lobby stream.
    Lobby(String),
    /// An engine instance, keyed by its channel id.
    Engine,
    /// A replay reader (path).
    Replay(String),
}

#[derive(Debug)]
pub struct ChannelEntry {
    pub kind: ChannelKind,
    pub state: ChannelState,
    pub owner: ChannelOwner,
}

/// Per-connection session state.
pub struct Session {
    /// Protocol version acknowledged at initialize.
    pub protocol_version: Option<String>,
    /// Feature sets the client acknowledged. Empty before initialize.
    acked_sets: Vec<String>,
    /// Whether the client opted into the channels extension.
    channels_extension: bool,
    channels: HashMap<ChannelId, ChannelEntry>,
    /// One checkpoint tree per rollback-enabled feature set.
    checkpoints: HashMap<String, CheckpointTree>,
}

impl Session {
    pub fn new() -> Self {
        Self {
            protocol_version: None,
            acked_sets: Vec::new(),
            channels_extension: false,
            channels: HashMap::new(),
            checkpoints: HashMap::new(),
        }
    }

    /// Apply the client's initialize params. The server advertises every
    /// declared set; the client acks the subset it understands. Unknown names
    /// in the ack are ignored.
    pub fn negotiate(&mut self, params: &serde_json::Value) {
        self.protocol_version = params
            .get("protocolVersion")
            .and_then(|v| v.as_str())
            .map(String::from);

        let declared = declared_feature_sets();
        let acked: Vec<String> = params
            .get("capabilities")
            .and_then(|c| c.get("featureSets"))
            .and_then(|f| f.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str())
                    .filter(|name| declared.iter().any(|d| d.name == *name))
                    .map(String::from)
                    .collect()
            })
            // A client that says nothing about feature sets gets the tool
            // subset of every declared set but no channel extension.
            .unwrap_or_else(|| declared.iter().map(|d| d.name.clone()).collect());

        self.channels_extension = params
            .get("capabilities")
            .and_then(|c| c.get("channels"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        for set in declared.iter().filter(|d| d.rollback) {
            if acked.contains(&set.name) {
                self.checkpoints
                    .entry(set.name.clone())
                    .or_insert_with(CheckpointTree::new);
            }
        }
        self.acked_sets = acked;
    }

    pub fn initialized(&self) -> bool {
        self.protocol_version.is_some()
    }

    pub fn channels_extension(&self) -> bool {
        self.channels_extension
    }

    pub fn set_acknowledged(&self, name: &str) -> bool {
        self.acked_sets.iter().any(|s| s == name)
    }

    /// Feature sets advertised to the client at initialize.
    pub fn advertised_sets(&self) -> Vec<FeatureSet> {
        declared_feature_sets()
    }

    /// Guard for channel-owning operations: legacy clients without the
    /// channels extension get a `channels-required` error instead.
    pub fn require_channels(&self, operation: &str) -> Result<(), GmError> {
        if self.channels_extension {
            Ok(())
        } else {
            Err(GmError::ChannelsRequired(operation.to_string()))
        }
    }

    // ── Channel table ──

    pub fn open_channel(&mut self, id: ChannelId, kind: ChannelKind, owner: ChannelOwner) {
        self.channels.insert(
            id,
            ChannelEntry {
                kind,
                state: ChannelState::Open,
                owner,
            },
        );
    }

    /// Look up an open channel; `Closing`/`Closed` entries count as gone.
    pub fn channel(&self, id: &ChannelId) -> Result<&ChannelEntry, GmError> {
        match self.channels.get(id) {
            Some(entry) if entry.state == ChannelState::Open => Ok(entry),
            _ => Err(GmError::ChannelClosed(id.to_string())),
        }
    }

    pub fn mark_closing(&mut self, id: &ChannelId) {
        if let Some(entry) = self.channels.get_mut(id) {
            entry.state = ChannelState::Closing;
        }
    }

    /// Drop a channel from the table entirely.
    pub fn remove_channel(&mut self, id: &ChannelId) -> Option<ChannelEntry> {
        self.channels.remove(id)
    }

    pub fn open_channels(&self) -> impl Iterator<Item = (&ChannelId, &ChannelEntry)> {
        self.channels
            .iter()
            .filter(|(_, e)| e.state == ChannelState::Open)
    }

    /// Ids of open lobby channels, for teardown on lobby disconnect.
    pub fn lobby_channel_ids(&self) -> Vec<ChannelId> {
        self.channels
            .iter()
            .filter(|(_, e)| matches!(e.owner, ChannelOwner::Lobby(_)))
            .map(|(id, _)| id.clone())
            .collect()
    }

    // ── Checkpoints ──

    pub fn checkpoint_tree(&mut self, feature_set: &str) -> Result<&mut CheckpointTree, GmError> {
        self.checkpoints.get_mut(feature_set).ok_or_else(|| {
            GmError::Validation(format!(
                "feature set '{}' is not rollback-enabled for this session",
                feature_set
            ))
        })
    }
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn init_params(sets: &[&str], channels: bool) -> serde_json::Value {
        serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {
                "featureSets": sets,
                "channels": channels,
            }
        })
    }

    #[test]
    fn test_negotiation_acks_subset() {
        let mut session = Session::new();
        session.negotiate(&init_params(&["lobby"], true));
        assert!(session.set_acknowledged("lobby"));
        assert!(!session.set_acknowledged("game"));
        assert!(session.channels_extension());
        // game was not acked, so no checkpoint tree for it.
        assert!(session.checkpoint_tree("game").is_err());
    }

    #[test]
    fn test_unknown_set_names_ignored() {
        let mut session = Session::new();
        session.negotiate(&init_params(&["lobby", "telepathy"], true));
        assert!(session.set_acknowledged("lobby"));
        assert!(!session.set_acknowledged("telepathy"));
    }

    #[test]
    fn test_legacy_client_gets_tools_not_channels() {
        let mut session = Session::new();
        session.negotiate(&serde_json::json!({
            "protocolVersion": "2024-11-05",
            "capabilities": {}
        }));
        assert!(session.set_acknowledged("lobby"));
        assert!(session.set_acknowledged("game"));
        assert!(!session.channels_extension());
        match session.require_channels("lobby_start_game") {
            Err(GmError::ChannelsRequired(op)) => assert_eq!(op, "lobby_start_game"),
            other => panic!("expected channels-required, got {:?}", other),
        }
    }

    #[test]
    fn test_channel_table_lifecycle() {
        let mut session = Session::new();
        let id = ChannelId::local_game(1);
        session.open_channel(id.clone(), ChannelKind::GameInstance, ChannelOwner::Engine);
        assert!(session.channel(&id).is_ok());

        session.mark_closing(&id);
        match session.channel(&id) {
            Err(GmError::ChannelClosed(s)) => assert_eq!(s, "game:local-1"),
            other => panic!("expected channel-closed, got {:?}", other),
        }

        session.remove_channel(&id);
        assert!(session.channel(&id).is_err());
    }

    #[test]
    fn test_rollback_tree_per_session() {
        let mut session = Session::new();
        session.negotiate(&init_params(&["game"], true));
        let tree = session.checkpoint_tree("game").unwrap();
        let a = tree.checkpoint();
        tree.rollback(&a).unwrap();
        let b = tree.checkpoint();
        assert!(tree.ancestry(&b).contains(&a));
    }
}
