//! Command dispatch to the engine
//!
//! Converts `GameCommand` values into the engine's C command structs and
//! issues them through the callback table. A failed or malformed command
//! returns an error string; the caller turns it into a `command_error`
//! event. Nothing here ever terminates the bridge.

use crate::callbacks::*;
use gm_core::GameCommand;
use std::ffi::{c_float, c_int, c_void, CString};

/// How far around the requested position to search for a build site.
const BUILD_SEARCH_RADIUS: f32 = 500.0;

fn queue_options(queue: bool) -> i16 {
    if queue {
        UNIT_COMMAND_OPTION_SHIFT_KEY
    } else {
        0
    }
}

/// Execute one command via the engine callbacks.
pub fn dispatch(cb: &EngineCallbacks, cmd: &GameCommand) -> Result<(), String> {
    // Unit orders must name a plausible unit before they reach the engine;
    // ids are positive, 0 and below mean "nobody".
    if let Some(unit_id) = cmd.unit_id() {
        if unit_id <= 0 {
            return Err(format!("invalid unit id: {}", unit_id));
        }
    }

    let result = match cmd {
        GameCommand::Move { unit_id, x, y, z, queue } => {
            let mut pos: [c_float; 3] = [*x, *y, *z];
            let mut data = SMoveUnitCommand {
                unit_id: *unit_id,
                group_id: -1,
                options: queue_options(*queue),
                time_out: i32::MAX,
                to_pos: &mut pos,
            };
            cb.handle_command(0, COMMAND_UNIT_MOVE, &mut data as *mut _ as *mut c_void)
        }

        GameCommand::Stop { unit_id } => {
            let mut data = SStopUnitCommand {
                unit_id: *unit_id,
                group_id: -1,
                options: 0,
                time_out: i32::MAX,
            };
            cb.handle_command(0, COMMAND_UNIT_STOP, &mut data as *mut _ as *mut c_void)
        }

        GameCommand::Attack { unit_id, target_id, queue } => {
            let mut data = SAttackUnitCommand {
                unit_id: *unit_id,
                group_id: -1,
                options: queue_options(*queue),
                time_out: i32::MAX,
                to_attack_unit_id: *target_id,
            };
            cb.handle_command(0, COMMAND_UNIT_ATTACK, &mut data as *mut _ as *mut c_void)
        }

        GameCommand::Build {
            unit_id,
            build_def_id,
            build_def_name,
            x,
            y,
            z,
            facing,
            snap,
            queue,
        } => {
            let def_id = match (build_def_id, build_def_name) {
                (Some(id), _) => *id,
                (None, Some(name)) => cb
                    .unit_def_by_name(name)
                    .ok_or_else(|| format!("unknown build def: {}", name))?,
                (None, None) => {
                    return Err("build requires build_def_id or build_def_name".into());
                }
            };

            let mut pos: [c_float; 3] = [*x, *y, *z];
            if *snap {
                if let Some(site) =
                    cb.find_closest_build_site(def_id, pos, BUILD_SEARCH_RADIUS, 0, *facing)
                {
                    pos = site;
                }
            }

            let mut data = SBuildUnitCommand {
                unit_id: *unit_id,
                group_id: -1,
                options: queue_options(*queue),
                time_out: i32::MAX,
                to_build_unit_def_id: def_id,
                build_pos: &mut pos,
                facing: *facing,
            };
            cb.handle_command(0, COMMAND_UNIT_BUILD, &mut data as *mut _ as *mut c_void)
        }

        GameCommand::Patrol { unit_id, x, y, z, queue } => {
            let mut pos: [c_float; 3] = [*x, *y, *z];
            let mut data = SPatrolUnitCommand {
                unit_id: *unit_id,
                group_id: -1,
                options: queue_options(*queue),
                time_out: i32::MAX,
                to_pos: &mut pos,
            };
            cb.handle_command(0, COMMAND_UNIT_PATROL, &mut data as *mut _ as *mut c_void)
        }

        GameCommand::Fight { unit_id, x, y, z, queue } => {
            let mut pos: [c_float; 3] = [*x, *y, *z];
            let mut data = SFightUnitCommand {
                unit_id: *unit_id,
                group_id: -1,
                options: queue_options(*queue),
                time_out: i32::MAX,
                to_pos: &mut pos,
            };
            cb.handle_command(0, COMMAND_UNIT_FIGHT, &mut data as *mut _ as *mut c_void)
        }

        GameCommand::Guard { unit_id, guard_id, queue } => {
            let mut data = SGuardUnitCommand {
                unit_id: *unit_id,
                group_id: -1,
                options: queue_options(*queue),
                time_out: i32::MAX,
                to_guard_unit_id: *guard_id,
            };
            cb.handle_command(0, COMMAND_UNIT_GUARD, &mut data as *mut _ as *mut c_void)
        }

        GameCommand::Repair { unit_id, repair_id, queue } => {
            let mut data = SRepairUnitCommand {
                unit_id: *unit_id,
                group_id: -1,
                options: queue_options(*queue),
                time_out: i32::MAX,
                to_repair_unit_id: *repair_id,
            };
            cb.handle_command(0, COMMAND_UNIT_REPAIR, &mut data as *mut _ as *mut c_void)
        }

        GameCommand::Reclaim { unit_id, reclaim_id, queue } => {
            let mut data = SReclaimUnitCommand {
                unit_id: *unit_id,
                group_id: -1,
                options: queue_options(*queue),
                time_out: i32::MAX,
                to_reclaim_unit_id_or_feature_id: *reclaim_id,
            };
            cb.handle_command(
                0,
                COMMAND_UNIT_RECLAIM_UNIT,
                &mut data as *mut _ as *mut c_void,
            )
        }

        GameCommand::SetFireState { unit_id, state } => {
            let mut data = SSetFireStateUnitCommand {
                unit_id: *unit_id,
                group_id: -1,
                options: 0,
                time_out: i32::MAX,
                fire_state: *state,
            };
            cb.handle_command(
                0,
                COMMAND_UNIT_SET_FIRE_STATE,
                &mut data as *mut _ as *mut c_void,
            )
        }

        GameCommand::SetMoveState { unit_id, state } => {
            let mut data = SSetMoveStateUnitCommand {
                unit_id: *unit_id,
                group_id: -1,
                options: 0,
                time_out: i32::MAX,
                move_state: *state,
            };
            cb.handle_command(
                0,
                COMMAND_UNIT_SET_MOVE_STATE,
                &mut data as *mut _ as *mut c_void,
            )
        }

        GameCommand::SendChat { text } => {
            let c_text = CString::new(text.as_str()).map_err(|e| e.to_string())?;
            let mut data = SSendTextMessageCommand {
                text: c_text.as_ptr(),
                zone: 0,
            };
            cb.handle_command(
                0,
                COMMAND_SEND_TEXT_MESSAGE,
                &mut data as *mut _ as *mut c_void,
            )
        }

        GameCommand::Pause => pause(cb, true),
        GameCommand::Unpause => pause(cb, false),

        GameCommand::SetSpeed { speed } => {
            let mut data = SSetGameSpeedCommand { speed: *speed };
            cb.handle_command(
                0,
                COMMAND_SET_GAME_SPEED,
                &mut data as *mut _ as *mut c_void,
            )
        }
    };

    if result == 0 {
        Ok(())
    } else {
        Err(format!("engine rejected command (status {})", result))
    }
}

fn pause(cb: &EngineCallbacks, enable: bool) -> c_int {
    let mut data = SPauseCommand {
        enable,
        is_message: false,
    };
    cb.handle_command(0, COMMAND_PAUSE, &mut data as *mut _ as *mut c_void)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::callbacks::SSkirmishAICallback;

    #[test]
    fn test_nonpositive_unit_ids_rejected_before_engine_contact() {
        // Validation fires before any vtable use, so a null table is safe.
        let raw = SSkirmishAICallback {
            vtable: [std::ptr::null(); 596],
        };
        let cb = unsafe { EngineCallbacks::new(0, &raw) };

        let err = dispatch(&cb, &GameCommand::Stop { unit_id: 0 }).unwrap_err();
        assert!(err.contains("invalid unit id"));
        let err = dispatch(
            &cb,
            &GameCommand::Move {
                unit_id: -3,
                x: 0.0,
                y: 0.0,
                z: 0.0,
                queue: false,
            },
        )
        .unwrap_err();
        assert!(err.contains("invalid unit id"));
    }
}
