//! Safe adapter over the engine's skirmish AI callback table
//!
//! The engine hands every AI a `SSkirmishAICallback`: a struct of several
//! hundred function pointers for state queries and order issuance. We
//! represent it as an opaque pointer array and reach specific entries by
//! their known indices, taken from the field order in the engine's public
//! `SSkirmishAICallback.h`. All unsafe ABI contact lives in this module; the
//! rest of the bridge sees typed methods.

use std::ffi::{c_char, c_float, c_int, c_void, CStr, CString};
use std::os::raw::c_short;

/// Total number of function-pointer fields in SSkirmishAICallback.
const CALLBACK_FIELD_COUNT: usize = 596;

/// The raw callback struct, one pointer per field.
#[repr(C)]
pub struct SSkirmishAICallback {
    pub vtable: [*const (); CALLBACK_FIELD_COUNT],
}

// Field indices, 0-based, from the header's field order.
const IDX_ENGINE_HANDLE_COMMAND: usize = 0;
const IDX_AI_INFO_VALUE_BY_KEY: usize = 22;
const IDX_AI_OPTION_VALUE_BY_KEY: usize = 26;
const IDX_LOG_LOG: usize = 27;
const IDX_GAME_CURRENT_FRAME: usize = 36;
const IDX_GAME_MY_TEAM: usize = 38;
const IDX_UNIT_DEF_BY_NAME: usize = 88;
const IDX_UNIT_DEF_NAME: usize = 91;
const IDX_UNIT_GET_DEF: usize = 293;
const IDX_MAP_FIND_CLOSEST_BUILD_SITE: usize = 398;

/// Typed view of the callback table for one AI instance.
pub struct EngineCallbacks {
    ai_id: c_int,
    raw: *const SSkirmishAICallback,
}

// SAFETY: the callback table is valid for the AI's entire lifetime (between
// init() and release()); the engine owns the memory and all calls happen on
// the sim thread.
unsafe impl Send for EngineCallbacks {}

impl EngineCallbacks {
    /// # Safety
    /// `raw` must be a valid, non-null pointer that outlives this value.
    pub unsafe fn new(ai_id: c_int, raw: *const SSkirmishAICallback) -> Self {
        Self { ai_id, raw }
    }

    unsafe fn fn_at<F>(&self, idx: usize) -> F {
        debug_assert!(idx < CALLBACK_FIELD_COUNT);
        let ptr = (*self.raw).vtable[idx];
        std::mem::transmute_copy(&ptr)
    }

    // ── Game state ──

    pub fn current_frame(&self) -> i32 {
        type Fn = unsafe extern "C" fn(c_int) -> c_int;
        unsafe { self.fn_at::<Fn>(IDX_GAME_CURRENT_FRAME)(self.ai_id) }
    }

    pub fn my_team(&self) -> i32 {
        type Fn = unsafe extern "C" fn(c_int) -> c_int;
        unsafe { self.fn_at::<Fn>(IDX_GAME_MY_TEAM)(self.ai_id) }
    }

    // ── Unit definitions ──

    /// Resolve a unit definition name (e.g. "cloakraid") to its numeric id.
    pub fn unit_def_by_name(&self, name: &str) -> Option<i32> {
        let c_name = CString::new(name).ok()?;
        type Fn = unsafe extern "C" fn(c_int, *const c_char) -> c_int;
        let id = unsafe { self.fn_at::<Fn>(IDX_UNIT_DEF_BY_NAME)(self.ai_id, c_name.as_ptr()) };
        (id >= 0).then_some(id)
    }

    /// Definition id of a live unit.
    pub fn unit_def_of(&self, unit_id: i32) -> i32 {
        type Fn = unsafe extern "C" fn(c_int, c_int) -> c_int;
        unsafe { self.fn_at::<Fn>(IDX_UNIT_GET_DEF)(self.ai_id, unit_id) }
    }

    /// Internal name of a unit definition.
    pub fn unit_def_name(&self, unit_def_id: i32) -> Option<String> {
        type Fn = unsafe extern "C" fn(c_int, c_int) -> *const c_char;
        unsafe {
            let ptr = self.fn_at::<Fn>(IDX_UNIT_DEF_NAME)(self.ai_id, unit_def_id);
            (!ptr.is_null()).then(|| CStr::from_ptr(ptr).to_string_lossy().into_owned())
        }
    }

    // ── Map ──

    /// Nearest valid build position for a definition around `pos`.
    pub fn find_closest_build_site(
        &self,
        unit_def_id: i32,
        pos: [f32; 3],
        search_radius: f32,
        min_dist: i32,
        facing: i32,
    ) -> Option<[f32; 3]> {
        let mut pos_in = pos;
        let mut pos_out = [0.0f32; 3];
        type Fn = unsafe extern "C" fn(
            c_int,
            c_int,
            *mut c_float,
            c_float,
            c_int,
            c_int,
            *mut c_float,
        ) -> c_int;
        let ok = unsafe {
            self.fn_at::<Fn>(IDX_MAP_FIND_CLOSEST_BUILD_SITE)(
                self.ai_id,
                unit_def_id,
                pos_in.as_mut_ptr(),
                search_radius,
                min_dist,
                facing,
                pos_out.as_mut_ptr(),
            )
        };
        // The engine signals "no site" with a negative y.
        (ok == 0 && pos_out[1] >= 0.0).then_some(pos_out)
    }

    // ── Logging ──

    /// Log through the engine (shows up in infolog.txt).
    pub fn log(&self, msg: &str) {
        if let Ok(c_msg) = CString::new(msg) {
            type Fn = unsafe extern "C" fn(c_int, *const c_char);
            unsafe { self.fn_at::<Fn>(IDX_LOG_LOG)(self.ai_id, c_msg.as_ptr()) }
        }
    }

    // ── AI info / options ──

    pub fn info_value(&self, key: &str) -> Option<String> {
        self.string_by_key(IDX_AI_INFO_VALUE_BY_KEY, key)
    }

    pub fn option_value(&self, key: &str) -> Option<String> {
        self.string_by_key(IDX_AI_OPTION_VALUE_BY_KEY, key)
    }

    fn string_by_key(&self, idx: usize, key: &str) -> Option<String> {
        let c_key = CString::new(key).ok()?;
        type Fn = unsafe extern "C" fn(c_int, *const c_char) -> *const c_char;
        unsafe {
            let ptr = self.fn_at::<Fn>(idx)(self.ai_id, c_key.as_ptr());
            (!ptr.is_null()).then(|| CStr::from_ptr(ptr).to_string_lossy().into_owned())
        }
    }

    // ── Orders ──

    /// Issue a command through Engine_handleCommand.
    pub fn handle_command(
        &self,
        command_id: c_int,
        command_topic: c_int,
        command_data: *mut c_void,
    ) -> c_int {
        type Fn = unsafe extern "C" fn(c_int, c_int, c_int, c_int, *mut c_void) -> c_int;
        unsafe {
            self.fn_at::<Fn>(IDX_ENGINE_HANDLE_COMMAND)(
                self.ai_id,
                COMMAND_TO_ID_ENGINE,
                command_id,
                command_topic,
                command_data,
            )
        }
    }
}

// ── Command constants ──

pub const COMMAND_TO_ID_ENGINE: c_int = -1;

pub const COMMAND_PAUSE: c_int = 5;
pub const COMMAND_SEND_TEXT_MESSAGE: c_int = 6;
pub const COMMAND_SET_GAME_SPEED: c_int = 7;
pub const COMMAND_UNIT_BUILD: c_int = 35;
pub const COMMAND_UNIT_STOP: c_int = 36;
pub const COMMAND_UNIT_MOVE: c_int = 42;
pub const COMMAND_UNIT_PATROL: c_int = 43;
pub const COMMAND_UNIT_FIGHT: c_int = 44;
pub const COMMAND_UNIT_ATTACK: c_int = 45;
pub const COMMAND_UNIT_GUARD: c_int = 47;
pub const COMMAND_UNIT_REPAIR: c_int = 51;
pub const COMMAND_UNIT_SET_FIRE_STATE: c_int = 52;
pub const COMMAND_UNIT_SET_MOVE_STATE: c_int = 53;
pub const COMMAND_UNIT_RECLAIM_UNIT: c_int = 63;

/// Append-to-queue option flag on unit commands.
pub const UNIT_COMMAND_OPTION_SHIFT_KEY: c_short = 1 << 5;

// ── Command data structs (layouts fixed by the engine ABI) ──

#[repr(C)]
pub struct SMoveUnitCommand {
    pub unit_id: c_int,
    pub group_id: c_int,
    pub options: c_short,
    pub time_out: c_int,
    pub to_pos: *mut [c_float; 3],
}

#[repr(C)]
pub struct SStopUnitCommand {
    pub unit_id: c_int,
    pub group_id: c_int,
    pub options: c_short,
    pub time_out: c_int,
}

#[repr(C)]
pub struct SAttackUnitCommand {
    pub unit_id: c_int,
    pub group_id: c_int,
    pub options: c_short,
    pub time_out: c_int,
    pub to_attack_unit_id: c_int,
}

#[repr(C)]
pub struct SBuildUnitCommand {
    pub unit_id: c_int,
    pub group_id: c_int,
    pub options: c_short,
    pub time_out: c_int,
    pub to_build_unit_def_id: c_int,
    pub build_pos: *mut [c_float; 3],
    pub facing: c_int,
}

#[repr(C)]
pub struct SPatrolUnitCommand {
    pub unit_id: c_int,
    pub group_id: c_int,
    pub options: c_short,
    pub time_out: c_int,
    pub to_pos: *mut [c_float; 3],
}

#[repr(C)]
pub struct SFightUnitCommand {
    pub unit_id: c_int,
    pub group_id: c_int,
    pub options: c_short,
    pub time_out: c_int,
    pub to_pos: *mut [c_float; 3],
}

#[repr(C)]
pub struct SGuardUnitCommand {
    pub unit_id: c_int,
    pub group_id: c_int,
    pub options: c_short,
    pub time_out: c_int,
    pub to_guard_unit_id: c_int,
}

#[repr(C)]
pub struct SRepairUnitCommand {
    pub unit_id: c_int,
    pub group_id: c_int,
    pub options: c_short,
    pub time_out: c_int,
    pub to_repair_unit_id: c_int,
}

#[repr(C)]
pub struct SReclaimUnitCommand {
    pub unit_id: c_int,
    pub group_id: c_int,
    pub options: c_short,
    pub time_out: c_int,
    pub to_reclaim_unit_id_or_feature_id: c_int,
}

#[repr(C)]
pub struct SSetFireStateUnitCommand {
    pub unit_id: c_int,
    pub group_id: c_int,
    pub options: c_short,
    pub time_out: c_int,
    pub fire_state: c_int,
}

#[repr(C)]
pub struct SSetMoveStateUnitCommand {
    pub unit_id: c_int,
    pub group_id: c_int,
    pub options: c_short,
    pub time_out: c_int,
    pub move_state: c_int,
}

#[repr(C)]
pub struct SSendTextMessageCommand {
    pub text: *const c_char,
    pub zone: c_int,
}

#[repr(C)]
pub struct SPauseCommand {
    pub enable: bool,
    pub is_message: bool,
}

#[repr(C)]
pub struct SSetGameSpeedCommand {
    pub speed: c_float,
}
