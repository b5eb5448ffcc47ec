//! Game events emitted by the in-engine bridge
//!
//! Serialized as internally tagged JSON (`{"type": "unit_created", ...}`),
//! one object per IPC frame. Unit-bearing events carry optional resolved
//! definition names next to the raw ids, and a sim frame number the host can
//! use for local ordering.

use serde::{Deserialize, Serialize};

/// An event received from a bridge instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameEvent {
    Init {
        frame: i32,
        saved_game: bool,
    },

    /// Throttled heartbeat; frame numbers are monotone.
    Update {
        frame: i32,
    },

    Message {
        player: i32,
        text: String,
        #[serde(default)]
        frame: i32,
    },

    UnitCreated {
        unit: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit_name: Option<String>,
        builder: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        builder_name: Option<String>,
        #[serde(default)]
        frame: i32,
    },

    UnitFinished {
        unit: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit_name: Option<String>,
        #[serde(default)]
        frame: i32,
    },

    UnitIdle {
        unit: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit_name: Option<String>,
        #[serde(default)]
        frame: i32,
    },

    UnitMoveFailed {
        unit: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit_name: Option<String>,
        #[serde(default)]
        frame: i32,
    },

    UnitDamaged {
        unit: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit_name: Option<String>,
        attacker: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attacker_name: Option<String>,
        damage: f32,
        weapon_def_id: i32,
        paralyzer: bool,
        #[serde(default)]
        frame: i32,
    },

    UnitDestroyed {
        unit: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit_name: Option<String>,
        attacker: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attacker_name: Option<String>,
        weapon_def_id: i32,
        #[serde(default)]
        frame: i32,
    },

    UnitGiven {
        unit: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit_name: Option<String>,
        old_team: i32,
        new_team: i32,
        #[serde(default)]
        frame: i32,
    },

    UnitCaptured {
        unit: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit_name: Option<String>,
        old_team: i32,
        new_team: i32,
        #[serde(default)]
        frame: i32,
    },

    EnemyEnterLos {
        enemy: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        enemy_name: Option<String>,
        #[serde(default)]
        frame: i32,
    },

    EnemyLeaveLos {
        enemy: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        enemy_name: Option<String>,
        #[serde(default)]
        frame: i32,
    },

    EnemyEnterRadar {
        enemy: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        enemy_name: Option<String>,
        #[serde(default)]
        frame: i32,
    },

    EnemyLeaveRadar {
        enemy: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        enemy_name: Option<String>,
        #[serde(default)]
        frame: i32,
    },

    EnemyDamaged {
        enemy: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        enemy_name: Option<String>,
        attacker: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attacker_name: Option<String>,
        damage: f32,
        weapon_def_id: i32,
        paralyzer: bool,
        #[serde(default)]
        frame: i32,
    },

    EnemyDestroyed {
        enemy: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        enemy_name: Option<String>,
        attacker: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        attacker_name: Option<String>,
        #[serde(default)]
        frame: i32,
    },

    EnemyCreated {
        enemy: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        enemy_name: Option<String>,
        #[serde(default)]
        frame: i32,
    },

    EnemyFinished {
        enemy: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        enemy_name: Option<String>,
        #[serde(default)]
        frame: i32,
    },

    WeaponFired {
        unit: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit_name: Option<String>,
        weapon_def_id: i32,
        #[serde(default)]
        frame: i32,
    },

    CommandFinished {
        unit: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        unit_name: Option<String>,
        command_id: i32,
        command_topic: i32,
        #[serde(default)]
        frame: i32,
    },

    /// A command the bridge refused; `command` echoes the offending JSON.
    CommandError {
        error: String,
        command: serde_json::Value,
        #[serde(default)]
        frame: i32,
    },

    LuaMessage {
        data: String,
        #[serde(default)]
        frame: i32,
    },

    Release {
        reason: i32,
    },
}

impl GameEvent {
    /// The sim frame this event was observed on, if it carries one.
    pub fn frame(&self) -> Option<i32> {
        match self {
            GameEvent::Init { frame, .. }
            | GameEvent::Update { frame }
            | GameEvent::Message { frame, .. }
            | GameEvent::UnitCreated { frame, .. }
            | GameEvent::UnitFinished { frame, .. }
            | GameEvent::UnitIdle { frame, .. }
            | GameEvent::UnitMoveFailed { frame, .. }
            | GameEvent::UnitDamaged { frame, .. }
            | GameEvent::UnitDestroyed { frame, .. }
            | GameEvent::UnitGiven { frame, .. }
            | GameEvent::UnitCaptured { frame, .. }
            | GameEvent::EnemyEnterLos { frame, .. }
            | GameEvent::EnemyLeaveLos { frame, .. }
            | GameEvent::EnemyEnterRadar { frame, .. }
            | GameEvent::EnemyLeaveRadar { frame, .. }
            | GameEvent::EnemyDamaged { frame, .. }
            | GameEvent::EnemyDestroyed { frame, .. }
            | GameEvent::EnemyCreated { frame, .. }
            | GameEvent::EnemyFinished { frame, .. }
            | GameEvent::WeaponFired { frame, .. }
            | GameEvent::CommandFinished { frame, .. }
            | GameEvent::CommandError { frame, .. }
            | GameEvent::LuaMessage { frame, .. } => Some(*frame),
            GameEvent::Release { .. } => None,
        }
    }

    /// True for the throttled heartbeat; used by queue coalescing.
    pub fn is_update(&self) -> bool {
        matches!(self, GameEvent::Update { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tagged_serialization() {
        let event = GameEvent::UnitCreated {
            unit: 12,
            unit_name: Some("cloakraid".into()),
            builder: 4,
            builder_name: None,
            frame: 90,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "unit_created");
        assert_eq!(json["unit"], 12);
        assert_eq!(json["unit_name"], "cloakraid");
        assert!(json.get("builder_name").is_none());
    }

    #[test]
    fn test_deserialize_without_frame() {
        // Older bridges omit the frame field.
        let event: GameEvent =
            serde_json::from_str(r#"{"type":"unit_idle","unit":7}"#).unwrap();
        match event {
            GameEvent::UnitIdle { unit, frame, .. } => {
                assert_eq!(unit, 7);
                assert_eq!(frame, 0);
            }
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_command_error_echoes_command() {
        let event = GameEvent::CommandError {
            error: "unknown unit".into(),
            command: serde_json::json!({"type": "move", "unit_id": 999999}),
            frame: 31,
        };
        let json = serde_json::to_string(&event).unwrap();
        let back: GameEvent = serde_json::from_str(&json).unwrap();
        match back {
            GameEvent::CommandError { command, .. } => {
                assert_eq!(command["unit_id"], 999999);
            }
            other => panic!("wrong variant: {:?}", other),
        }
    }
}
