//! Commands sent to the in-engine bridge
//!
//! Serialized as internally tagged JSON, one object per IPC frame. Unit
//! orders take `queue: bool`: false replaces the unit's current order queue,
//! true appends.

use serde::{Deserialize, Serialize};

/// A command for a bridge instance.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GameCommand {
    Move {
        unit_id: i32,
        x: f32,
        y: f32,
        z: f32,
        #[serde(default)]
        queue: bool,
    },

    Stop {
        unit_id: i32,
    },

    Attack {
        unit_id: i32,
        target_id: i32,
        #[serde(default)]
        queue: bool,
    },

    /// Build at a position. The target is named either by numeric def id or
    /// by def name (resolved in-engine); `snap` moves the position to the
    /// nearest valid build site.
    Build {
        unit_id: i32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        build_def_id: Option<i32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        build_def_name: Option<String>,
        x: f32,
        y: f32,
        z: f32,
        #[serde(default)]
        facing: i32,
        #[serde(default = "default_snap")]
        snap: bool,
        #[serde(default)]
        queue: bool,
    },

    Patrol {
        unit_id: i32,
        x: f32,
        y: f32,
        z: f32,
        #[serde(default)]
        queue: bool,
    },

    Fight {
        unit_id: i32,
        x: f32,
        y: f32,
        z: f32,
        #[serde(default)]
        queue: bool,
    },

    Guard {
        unit_id: i32,
        guard_id: i32,
        #[serde(default)]
        queue: bool,
    },

    Repair {
        unit_id: i32,
        repair_id: i32,
        #[serde(default)]
        queue: bool,
    },

    Reclaim {
        unit_id: i32,
        reclaim_id: i32,
        #[serde(default)]
        queue: bool,
    },

    SetFireState {
        unit_id: i32,
        state: i32,
    },

    SetMoveState {
        unit_id: i32,
        state: i32,
    },

    SendChat {
        text: String,
    },

    Pause,

    Unpause,

    SetSpeed {
        speed: f32,
    },
}

fn default_snap() -> bool {
    true
}

impl GameCommand {
    /// The unit a command targets, if any.
    pub fn unit_id(&self) -> Option<i32> {
        match self {
            GameCommand::Move { unit_id, .. }
            | GameCommand::Stop { unit_id }
            | GameCommand::Attack { unit_id, .. }
            | GameCommand::Build { unit_id, .. }
            | GameCommand::Patrol { unit_id, .. }
            | GameCommand::Fight { unit_id, .. }
            | GameCommand::Guard { unit_id, .. }
            | GameCommand::Repair { unit_id, .. }
            | GameCommand::Reclaim { unit_id, .. }
            | GameCommand::SetFireState { unit_id, .. }
            | GameCommand::SetMoveState { unit_id, .. } => Some(*unit_id),
            GameCommand::SendChat { .. }
            | GameCommand::Pause
            | GameCommand::Unpause
            | GameCommand::SetSpeed { .. } => None,
        }
    }
}
