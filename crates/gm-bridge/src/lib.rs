//! # gm-bridge
//!
//! The skirmish AI shared library loaded into the game engine. Exports the
//! C-linkage entry points `init`, `release` and `handleEvent`, translates
//! engine events into JSON frames for the GameManager, and executes
//! commands received back through the callback table.
//!
//! Threading: every engine callback runs on the sim thread; the socket is
//! owned by a dedicated IPC thread (see `worker` and `ipc`). The two meet
//! at a bounded command queue and an unbounded, update-coalescing event
//! queue.

pub mod callbacks;
pub mod commands;
pub mod events;
pub mod ipc;
pub mod worker;

use callbacks::{EngineCallbacks, SSkirmishAICallback};
use events::{enrich_event, parse_event, SInitEvent, SUpdateEvent, EVENT_INIT, EVENT_RELEASE, EVENT_UPDATE};
use gm_core::GameEvent;
use ipc::{IpcClient, IpcConfig};
use std::ffi::{c_int, c_void};
use std::sync::Mutex;
use worker::{queue_pair, SimEndpoint, COMMAND_QUEUE_CAPACITY};

/// Forward one `update` event per this many frames (~1 Hz at 30 fps).
const UPDATE_INTERVAL: u32 = 30;

/// Per-AI state. The engine ABI has no user-data pointer, so instances live
/// in a static table indexed by skirmish AI id. The engine supports up to
/// 255 AIs; in practice there is one.
struct AiInstance {
    callbacks: EngineCallbacks,
    sim: Option<SimEndpoint>,
    io_thread: Option<std::thread::JoinHandle<()>>,
    frame: i32,
    frame_counter: u32,
}

static INSTANCES: Mutex<Vec<Option<AiInstance>>> = Mutex::new(Vec::new());

/// Locate the socket path and handshake token, in priority order:
/// `connection.json` in the AI data dir (written by the supervisor before
/// each launch), the start-script `[Options]` block, environment variables,
/// then defaults.
fn resolve_ipc_config(cb: &EngineCallbacks) -> IpcConfig {
    if let Some(data_dir) = cb.info_value("dataDir") {
        let path = format!("{}/connection.json", data_dir.trim_end_matches('/'));
        if let Ok(contents) = std::fs::read_to_string(&path) {
            if let Ok(config) = serde_json::from_str::<serde_json::Value>(&contents) {
                if let (Some(socket), Some(token)) = (
                    config.get("socket_path").and_then(|v| v.as_str()),
                    config.get("handshake_token").and_then(|v| v.as_str()),
                ) {
                    cb.log(&format!("[gm-bridge] connection config from {}", path));
                    return IpcConfig {
                        socket_path: socket.to_string(),
                        token: token.to_string(),
                    };
                }
            }
        }
    }

    if let (Some(socket), Some(token)) = (
        cb.option_value("socket_path"),
        cb.option_value("handshake_token"),
    ) {
        cb.log("[gm-bridge] connection config from AI options");
        return IpcConfig {
            socket_path: socket,
            token,
        };
    }

    if let Ok(socket) = std::env::var("GM_SOCKET_PATH") {
        cb.log("[gm-bridge] connection config from environment");
        return IpcConfig {
            socket_path: socket,
            token: std::env::var("GM_HANDSHAKE_TOKEN").unwrap_or_default(),
        };
    }

    cb.log("[gm-bridge] using default socket path");
    IpcConfig {
        socket_path: "/tmp/game-manager.sock".into(),
        token: String::new(),
    }
}

/// Called by the engine when this AI is instantiated.
///
/// # Safety
/// Called by the engine with a valid callback pointer.
#[no_mangle]
pub unsafe extern "C" fn init(
    skirmish_ai_id: c_int,
    callback: *const SSkirmishAICallback,
) -> c_int {
    let cb = EngineCallbacks::new(skirmish_ai_id, callback);
    cb.log("[gm-bridge] initializing");

    let config = resolve_ipc_config(&cb);
    let (sim, io_thread) = match IpcClient::connect_and_handshake(&config) {
        Ok(client) => {
            cb.log(&format!(
                "[gm-bridge] connected to GameManager at {}",
                config.socket_path
            ));
            let (sim, io) = queue_pair(COMMAND_QUEUE_CAPACITY);
            let handle = std::thread::Builder::new()
                .name("gm-bridge-ipc".into())
                .spawn(move || ipc::run_io_loop(client, io))
                .ok();
            (Some(sim), handle)
        }
        Err(e) => {
            cb.log(&format!(
                "[gm-bridge] connection to {} failed: {}",
                config.socket_path, e
            ));
            (None, None)
        }
    };

    let instance = AiInstance {
        callbacks: cb,
        sim,
        io_thread,
        frame: 0,
        frame_counter: 0,
    };

    let mut instances = INSTANCES.lock().unwrap();
    let id = skirmish_ai_id as usize;
    while instances.len() <= id {
        instances.push(None);
    }
    instances[id] = Some(instance);
    0
}

/// Called by the engine when this AI is removed. Flushes the event queue,
/// sends the final release frame and joins the IPC thread.
///
/// # Safety
/// Called by the engine.
#[no_mangle]
pub unsafe extern "C" fn release(skirmish_ai_id: c_int) -> c_int {
    let instance = {
        let mut instances = INSTANCES.lock().unwrap();
        instances
            .get_mut(skirmish_ai_id as usize)
            .and_then(|slot| slot.take())
    };

    if let Some(instance) = instance {
        instance.callbacks.log("[gm-bridge] releasing");
        if let Some(sim) = &instance.sim {
            sim.push_event(GameEvent::Release { reason: 0 });
        }
        drop(instance.sim);
        if let Some(handle) = instance.io_thread {
            let _ = handle.join();
        }
    }
    0
}

/// Main event handler, called by the engine for every game event on the sim
/// thread.
///
/// # Safety
/// `data` must point to the event struct matching `topic`.
#[no_mangle]
pub unsafe extern "C" fn handleEvent(
    skirmish_ai_id: c_int,
    topic: c_int,
    data: *const c_void,
) -> c_int {
    let mut instances = INSTANCES.lock().unwrap();
    let instance = match instances
        .get_mut(skirmish_ai_id as usize)
        .and_then(|i| i.as_mut())
    {
        Some(i) => i,
        None => return -1,
    };

    // EVENT_INIT carries a fresh callback pointer.
    if topic == EVENT_INIT {
        let init_data = &*(data as *const SInitEvent);
        instance.callbacks = EngineCallbacks::new(skirmish_ai_id, init_data.callback);
        if let Some(sim) = &instance.sim {
            sim.push_event(GameEvent::Init {
                frame: 0,
                saved_game: init_data.saved_game,
            });
        }
        return 0;
    }

    if topic == EVENT_UPDATE {
        let update = &*(data as *const SUpdateEvent);
        instance.frame = update.frame;
        instance.frame_counter += 1;

        // Execute whatever the GameManager queued since last frame.
        if let Some(sim) = &instance.sim {
            for command in sim.drain_commands() {
                if let Err(error) = commands::dispatch(&instance.callbacks, &command) {
                    instance
                        .callbacks
                        .log(&format!("[gm-bridge] command failed: {}", error));
                    sim.push_event(GameEvent::CommandError {
                        error,
                        command: serde_json::to_value(&command)
                            .unwrap_or(serde_json::Value::Null),
                        frame: update.frame,
                    });
                }
            }
        }

        // Update ticks are throttled; the rest of the taxonomy is not.
        if instance.frame_counter % UPDATE_INTERVAL != 0 {
            return 0;
        }
    }

    if let Some(mut event) = parse_event(topic, data, instance.frame) {
        if topic != EVENT_RELEASE {
            enrich_event(&mut event, &instance.callbacks);
        }
        if let Some(sim) = &instance.sim {
            sim.push_event(event);
        }
    }

    0
}
