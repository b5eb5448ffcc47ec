//! Engine event decoding
//!
//! Maps the C `topicId` + opaque data pointer the engine delivers to
//! `handleEvent` into `gm_core::GameEvent` values, stamped with the current
//! sim frame and enriched with resolved definition names where that is
//! cheap (one vtable call per id).

use crate::callbacks::EngineCallbacks;
use gm_core::GameEvent;
use std::ffi::{c_char, c_float, c_int, c_void, CStr};

// ── Event topic constants (engine ABI) ──

pub const EVENT_INIT: c_int = 1;
pub const EVENT_RELEASE: c_int = 2;
pub const EVENT_UPDATE: c_int = 3;
pub const EVENT_MESSAGE: c_int = 4;
pub const EVENT_UNIT_CREATED: c_int = 5;
pub const EVENT_UNIT_FINISHED: c_int = 6;
pub const EVENT_UNIT_IDLE: c_int = 7;
pub const EVENT_UNIT_MOVE_FAILED: c_int = 8;
pub const EVENT_UNIT_DAMAGED: c_int = 9;
pub const EVENT_UNIT_DESTROYED: c_int = 10;
pub const EVENT_UNIT_GIVEN: c_int = 11;
pub const EVENT_UNIT_CAPTURED: c_int = 12;
pub const EVENT_ENEMY_ENTER_LOS: c_int = 13;
pub const EVENT_ENEMY_LEAVE_LOS: c_int = 14;
pub const EVENT_ENEMY_ENTER_RADAR: c_int = 15;
pub const EVENT_ENEMY_LEAVE_RADAR: c_int = 16;
pub const EVENT_ENEMY_DAMAGED: c_int = 17;
pub const EVENT_ENEMY_DESTROYED: c_int = 18;
pub const EVENT_WEAPON_FIRED: c_int = 19;
pub const EVENT_COMMAND_FINISHED: c_int = 22;
pub const EVENT_ENEMY_CREATED: c_int = 25;
pub const EVENT_ENEMY_FINISHED: c_int = 26;
pub const EVENT_LUA_MESSAGE: c_int = 27;

// ── C event data structs (layouts fixed by the engine ABI) ──

#[repr(C)]
pub struct SInitEvent {
    pub skirmish_ai_id: c_int,
    pub callback: *const crate::callbacks::SSkirmishAICallback,
    pub saved_game: bool,
}

#[repr(C)]
pub struct SReleaseEvent {
    pub reason: c_int,
}

#[repr(C)]
pub struct SUpdateEvent {
    pub frame: c_int,
}

#[repr(C)]
pub struct SMessageEvent {
    pub player: c_int,
    pub message: *const c_char,
}

#[repr(C)]
pub struct SUnitCreatedEvent {
    pub unit: c_int,
    pub builder: c_int,
}

#[repr(C)]
pub struct SUnitEvent {
    pub unit: c_int,
}

#[repr(C)]
pub struct SUnitDamagedEvent {
    pub unit: c_int,
    pub attacker: c_int,
    pub damage: c_float,
    pub dir: *const [c_float; 3],
    pub weapon_def_id: c_int,
    pub paralyzer: bool,
}

#[repr(C)]
pub struct SUnitDestroyedEvent {
    pub unit: c_int,
    pub attacker: c_int,
    pub weapon_def_id: c_int,
}

#[repr(C)]
pub struct SUnitTeamChangeEvent {
    pub unit_id: c_int,
    pub old_team_id: c_int,
    pub new_team_id: c_int,
}

#[repr(C)]
pub struct SEnemyEvent {
    pub enemy: c_int,
}

#[repr(C)]
pub struct SEnemyDamagedEvent {
    pub enemy: c_int,
    pub attacker: c_int,
    pub damage: c_float,
    pub dir: *const [c_float; 3],
    pub weapon_def_id: c_int,
    pub paralyzer: bool,
}

#[repr(C)]
pub struct SEnemyDestroyedEvent {
    pub enemy: c_int,
    pub attacker: c_int,
}

#[repr(C)]
pub struct SWeaponFiredEvent {
    pub unit_id: c_int,
    pub weapon_def_id: c_int,
}

#[repr(C)]
pub struct SCommandFinishedEvent {
    pub unit_id: c_int,
    pub command_id: c_int,
    pub command_topic_id: c_int,
}

#[repr(C)]
pub struct SLuaMessageEvent {
    pub in_data: *const c_char,
}

/// Decode a raw engine event into a `GameEvent`, stamped with `frame`.
///
/// Returns None for topics the bridge does not forward.
///
/// # Safety
/// `data` must point to the correct struct for `topic`.
pub unsafe fn parse_event(topic: c_int, data: *const c_void, frame: i32) -> Option<GameEvent> {
    match topic {
        EVENT_INIT => {
            let e = &*(data as *const SInitEvent);
            Some(GameEvent::Init {
                frame: 0,
                saved_game: e.saved_game,
            })
        }
        EVENT_RELEASE => {
            let e = &*(data as *const SReleaseEvent);
            Some(GameEvent::Release { reason: e.reason })
        }
        EVENT_UPDATE => {
            let e = &*(data as *const SUpdateEvent);
            Some(GameEvent::Update { frame: e.frame })
        }
        EVENT_MESSAGE => {
            let e = &*(data as *const SMessageEvent);
            Some(GameEvent::Message {
                player: e.player,
                text: cstr_or_empty(e.message),
                frame,
            })
        }
        EVENT_UNIT_CREATED => {
            let e = &*(data as *const SUnitCreatedEvent);
            Some(GameEvent::UnitCreated {
                unit: e.unit,
                unit_name: None,
                builder: e.builder,
                builder_name: None,
                frame,
            })
        }
        EVENT_UNIT_FINISHED => {
            let e = &*(data as *const SUnitEvent);
            Some(GameEvent::UnitFinished {
                unit: e.unit,
                unit_name: None,
                frame,
            })
        }
        EVENT_UNIT_IDLE => {
            let e = &*(data as *const SUnitEvent);
            Some(GameEvent::UnitIdle {
                unit: e.unit,
                unit_name: None,
                frame,
            })
        }
        EVENT_UNIT_MOVE_FAILED => {
            let e = &*(data as *const SUnitEvent);
            Some(GameEvent::UnitMoveFailed {
                unit: e.unit,
                unit_name: None,
                frame,
            })
        }
        EVENT_UNIT_DAMAGED => {
            let e = &*(data as *const SUnitDamagedEvent);
            Some(GameEvent::UnitDamaged {
                unit: e.unit,
                unit_name: None,
                attacker: e.attacker,
                attacker_name: None,
                damage: e.damage,
                weapon_def_id: e.weapon_def_id,
                paralyzer: e.paralyzer,
                frame,
            })
        }
        EVENT_UNIT_DESTROYED => {
            let e = &*(data as *const SUnitDestroyedEvent);
            Some(GameEvent::UnitDestroyed {
                unit: e.unit,
                unit_name: None,
                attacker: e.attacker,
                attacker_name: None,
                weapon_def_id: e.weapon_def_id,
                frame,
            })
        }
        EVENT_UNIT_GIVEN => {
            let e = &*(data as *const SUnitTeamChangeEvent);
            Some(GameEvent::UnitGiven {
                unit: e.unit_id,
                unit_name: None,
                old_team: e.old_team_id,
                new_team: e.new_team_id,
                frame,
            })
        }
        EVENT_UNIT_CAPTURED => {
            let e = &*(data as *const SUnitTeamChangeEvent);
            Some(GameEvent::UnitCaptured {
                unit: e.unit_id,
                unit_name: None,
                old_team: e.old_team_id,
                new_team: e.new_team_id,
                frame,
            })
        }
        EVENT_ENEMY_ENTER_LOS => {
            let e = &*(data as *const SEnemyEvent);
            Some(GameEvent::EnemyEnterLos {
                enemy: e.enemy,
                enemy_name: None,
                frame,
            })
        }
        EVENT_ENEMY_LEAVE_LOS => {
            let e = &*(data as *const SEnemyEvent);
            Some(GameEvent::EnemyLeaveLos {
                enemy: e.enemy,
                enemy_name: None,
                frame,
            })
        }
        EVENT_ENEMY_ENTER_RADAR => {
            let e = &*(data as *const SEnemyEvent);
            Some(GameEvent::EnemyEnterRadar {
                enemy: e.enemy,
                enemy_name: None,
                frame,
            })
        }
        EVENT_ENEMY_LEAVE_RADAR => {
            let e = &*(data as *const SEnemyEvent);
            Some(GameEvent::EnemyLeaveRadar {
                enemy: e.enemy,
                enemy_name: None,
                frame,
            })
        }
        EVENT_ENEMY_DAMAGED => {
            let e = &*(data as *const SEnemyDamagedEvent);
            Some(GameEvent::EnemyDamaged {
                enemy: e.enemy,
                enemy_name: None,
                attacker: e.attacker,
                attacker_name: None,
                damage: e.damage,
                weapon_def_id: e.weapon_def_id,
                paralyzer: e.paralyzer,
                frame,
            })
        }
        EVENT_ENEMY_DESTROYED => {
            let e = &*(data as *const SEnemyDestroyedEvent);
            Some(GameEvent::EnemyDestroyed {
                enemy: e.enemy,
                enemy_name: None,
                attacker: e.attacker,
                attacker_name: None,
                frame,
            })
        }
        EVENT_ENEMY_CREATED => {
            let e = &*(data as *const SEnemyEvent);
            Some(GameEvent::EnemyCreated {
                enemy: e.enemy,
                enemy_name: None,
                frame,
            })
        }
        EVENT_ENEMY_FINISHED => {
            let e = &*(data as *const SEnemyEvent);
            Some(GameEvent::EnemyFinished {
                enemy: e.enemy,
                enemy_name: None,
                frame,
            })
        }
        EVENT_WEAPON_FIRED => {
            let e = &*(data as *const SWeaponFiredEvent);
            Some(GameEvent::WeaponFired {
                unit: e.unit_id,
                unit_name: None,
                weapon_def_id: e.weapon_def_id,
                frame,
            })
        }
        EVENT_COMMAND_FINISHED => {
            let e = &*(data as *const SCommandFinishedEvent);
            Some(GameEvent::CommandFinished {
                unit: e.unit_id,
                unit_name: None,
                command_id: e.command_id,
                command_topic: e.command_topic_id,
                frame,
            })
        }
        EVENT_LUA_MESSAGE => {
            let e = &*(data as *const SLuaMessageEvent);
            Some(GameEvent::LuaMessage {
                data: cstr_or_empty(e.in_data),
                frame,
            })
        }
        _ => None,
    }
}

unsafe fn cstr_or_empty(ptr: *const c_char) -> String {
    if ptr.is_null() {
        String::new()
    } else {
        CStr::from_ptr(ptr).to_string_lossy().into_owned()
    }
}

/// Resolve a unit id to its definition name. Ids <= 0 mean "nobody".
fn resolve_unit_name(cb: &EngineCallbacks, unit_id: i32) -> Option<String> {
    if unit_id <= 0 {
        return None;
    }
    let def_id = cb.unit_def_of(unit_id);
    if def_id < 0 {
        return None;
    }
    cb.unit_def_name(def_id)
}

/// Fill the optional `*_name` fields from the engine.
pub fn enrich_event(event: &mut GameEvent, cb: &EngineCallbacks) {
    match event {
        GameEvent::UnitCreated {
            unit,
            unit_name,
            builder,
            builder_name,
            ..
        } => {
            *unit_name = resolve_unit_name(cb, *unit);
            *builder_name = resolve_unit_name(cb, *builder);
        }
        GameEvent::UnitFinished { unit, unit_name, .. }
        | GameEvent::UnitIdle { unit, unit_name, .. }
        | GameEvent::UnitMoveFailed { unit, unit_name, .. }
        | GameEvent::UnitGiven { unit, unit_name, .. }
        | GameEvent::UnitCaptured { unit, unit_name, .. }
        | GameEvent::WeaponFired { unit, unit_name, .. }
        | GameEvent::CommandFinished { unit, unit_name, .. } => {
            *unit_name = resolve_unit_name(cb, *unit);
        }
        GameEvent::UnitDamaged {
            unit,
            unit_name,
            attacker,
            attacker_name,
            ..
        }
        | GameEvent::UnitDestroyed {
            unit,
            unit_name,
            attacker,
            attacker_name,
            ..
        } => {
            *unit_name = resolve_unit_name(cb, *unit);
            *attacker_name = resolve_unit_name(cb, *attacker);
        }
        GameEvent::EnemyEnterLos { enemy, enemy_name, .. }
        | GameEvent::EnemyLeaveLos { enemy, enemy_name, .. }
        | GameEvent::EnemyEnterRadar { enemy, enemy_name, .. }
        | GameEvent::EnemyLeaveRadar { enemy, enemy_name, .. }
        | GameEvent::EnemyCreated { enemy, enemy_name, .. }
        | GameEvent::EnemyFinished { enemy, enemy_name, .. } => {
            *enemy_name = resolve_unit_name(cb, *enemy);
        }
        GameEvent::EnemyDamaged {
            enemy,
            enemy_name,
            attacker,
            attacker_name,
            ..
        }
        | GameEvent::EnemyDestroyed {
            enemy,
            enemy_name,
            attacker,
            attacker_name,
            ..
        } => {
            *enemy_name = resolve_unit_name(cb, *enemy);
            *attacker_name = resolve_unit_name(cb, *attacker);
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_update() {
        let raw = SUpdateEvent { frame: 90 };
        let event =
            unsafe { parse_event(EVENT_UPDATE, &raw as *const _ as *const c_void, 90) }.unwrap();
        assert!(matches!(event, GameEvent::Update { frame: 90 }));
    }

    #[test]
    fn test_parse_unit_destroyed() {
        let raw = SUnitDestroyedEvent {
            unit: 12,
            attacker: 40,
            weapon_def_id: 3,
        };
        let event =
            unsafe { parse_event(EVENT_UNIT_DESTROYED, &raw as *const _ as *const c_void, 500) }
                .unwrap();
        match event {
            GameEvent::UnitDestroyed {
                unit,
                attacker,
                frame,
                ..
            } => {
                assert_eq!(unit, 12);
                assert_eq!(attacker, 40);
                assert_eq!(frame, 500);
            }
            other => panic!("wrong variant: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_topic_ignored() {
        let raw = SUpdateEvent { frame: 1 };
        let event = unsafe { parse_event(9999, &raw as *const _ as *const c_void, 1) };
        assert!(event.is_none());
    }

    #[test]
    fn test_null_message_text() {
        let raw = SMessageEvent {
            player: 1,
            message: std::ptr::null(),
        };
        let event =
            unsafe { parse_event(EVENT_MESSAGE, &raw as *const _ as *const c_void, 2) }.unwrap();
        match event {
            GameEvent::Message { text, .. } => assert_eq!(text, ""),
            other => panic!("wrong variant: {:?}", other),
        }
    }
}
