//! Tool surface
//!
//! Concrete tool definitions for the lobby and game feature sets, plus the
//! dispatch that translates validated arguments into service requests.
//! Handlers run as spawned tasks; side effects that touch the channel table
//! go through the session's ordered outgoing queue so notifications are
//! enqueued before the response.

use crate::session::Outgoing;
use gm_core::{ChannelDescriptor, ChannelId, ChannelKind, GmError};
use gm_engine::{EngineHandle, EngineRequest, GameConfig};
use gm_lobby::{LobbyHandle, LobbyRequest};
use gm_mux::ToolDef;
use tokio::sync::{mpsc, oneshot};

/// Everything a tool handler may touch.
#[derive(Clone)]
pub struct ToolCtx {
    pub lobby: LobbyHandle,
    pub engine: EngineHandle,
    pub out: mpsc::Sender<Outgoing>,
    /// Whether this session negotiated the channels extension.
    pub channels_extension: bool,
}

/// All tool definitions, grouped by feature set.
pub fn tool_defs() -> Vec<ToolDef> {
    let mut tools = vec![
        ToolDef {
            name: "lobby_connect".into(),
            description: "Connect to the lobby server".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "host": { "type": "string", "default": "zero-k.info" },
                    "port": { "type": "integer", "default": 8200 }
                }
            }),
            feature_set: "lobby".into(),
            opens_channel: false,
        },
        ToolDef {
            name: "lobby_disconnect".into(),
            description: "Disconnect from the lobby server".into(),
            input_schema: serde_json::json!({ "type": "object", "properties": {} }),
            feature_set: "lobby".into(),
            opens_channel: false,
        },
        ToolDef {
            name: "lobby_login".into(),
            description: "Authenticate with the lobby".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "username": { "type": "string" },
                    "password": { "type": "string" }
                },
                "required": ["username", "password"]
            }),
            feature_set: "lobby".into(),
            opens_channel: false,
        },
        ToolDef {
            name: "lobby_register".into(),
            description: "Register a new lobby account".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "username": { "type": "string" },
                    "password": { "type": "string" },
                    "email": { "type": "string" }
                },
                "required": ["username", "password", "email"]
            }),
            feature_set: "lobby".into(),
            opens_channel: false,
        },
        ToolDef {
            name: "lobby_say".into(),
            description: "Send chat to a channel (place 0) or user (place 4)".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "target": { "type": "string", "description": "Channel name or username" },
                    "text": { "type": "string" },
                    "place": { "type": "integer", "default": 0 }
                },
                "required": ["target", "text"]
            }),
            feature_set: "lobby".into(),
            opens_channel: false,
        },
        ToolDef {
            name: "lobby_join_channel".into(),
            description: "Join a lobby chat channel".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string" }
                },
                "required": ["name"]
            }),
            feature_set: "lobby".into(),
            // Degraded without the channels extension: the join happens but
            // no message stream is opened.
            opens_channel: false,
        },
        ToolDef {
            name: "lobby_leave_channel".into(),
            description: "Leave a lobby chat channel".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "name": { "type": "string" }
                },
                "required": ["name"]
            }),
            feature_set: "lobby".into(),
            opens_channel: false,
        },
        ToolDef {
            name: "lobby_list_battles".into(),
            description: "List open battles".into(),
            input_schema: serde_json::json!({ "type": "object", "properties": {} }),
            feature_set: "lobby".into(),
            opens_channel: false,
        },
        ToolDef {
            name: "lobby_list_users".into(),
            description: "List online users".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "limit": { "type": "integer", "default": 50 }
                }
            }),
            feature_set: "lobby".into(),
            opens_channel: false,
        },
        ToolDef {
            name: "lobby_join_battle".into(),
            description: "Join a battle room".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "battle_id": { "type": "integer" },
                    "password": { "type": "string", "default": "" }
                },
                "required": ["battle_id"]
            }),
            feature_set: "lobby".into(),
            opens_channel: false,
        },
        ToolDef {
            name: "lobby_leave_battle".into(),
            description: "Leave the current battle".into(),
            input_schema: serde_json::json!({ "type": "object", "properties": {} }),
            feature_set: "lobby".into(),
            opens_channel: false,
        },
        ToolDef {
            name: "lobby_matchmaker_join".into(),
            description: "Join matchmaker queues (names arrive on login)".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "queues": { "type": "array", "items": { "type": "string" } }
                },
                "required": ["queues"]
            }),
            feature_set: "lobby".into(),
            opens_channel: false,
        },
        ToolDef {
            name: "lobby_matchmaker_leave".into(),
            description: "Leave all matchmaker queues".into(),
            input_schema: serde_json::json!({ "type": "object", "properties": {} }),
            feature_set: "lobby".into(),
            opens_channel: false,
        },
        ToolDef {
            name: "lobby_matchmaker_accept".into(),
            description: "Accept or decline a matchmaker ready-check".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "ready": { "type": "boolean" }
                },
                "required": ["ready"]
            }),
            feature_set: "lobby".into(),
            opens_channel: false,
        },
        ToolDef {
            name: "lobby_matchmaker_status".into(),
            description: "Current matchmaker queues and counts".into(),
            input_schema: serde_json::json!({ "type": "object", "properties": {} }),
            feature_set: "lobby".into(),
            opens_channel: false,
        },
        ToolDef {
            name: "lobby_start_game".into(),
            description: "Start a local game against an AI opponent; returns a game channel id".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "map": { "type": "string" },
                    "game": { "type": "string", "default": "Zero-K v1.12.1.0" },
                    "opponent": { "type": "string", "default": "NullAI" },
                    "headless": { "type": "boolean", "default": true }
                },
                "required": ["map"]
            }),
            feature_set: "lobby".into(),
            opens_channel: true,
        },
    ];

    tools.extend([
        ToolDef {
            name: "channel_list".into(),
            description: "List active game instances".into(),
            input_schema: serde_json::json!({ "type": "object", "properties": {} }),
            feature_set: "game".into(),
            opens_channel: false,
        },
        ToolDef {
            name: "channel_close".into(),
            description: "Stop a running game instance".into(),
            input_schema: serde_json::json!({
                "type": "object",
                "properties": {
                    "channel_id": { "type": "string" }
                },
                "required": ["channel_id"]
            }),
            feature_set: "game".into(),
            opens_channel: false,
        },
    ]);

    tools
}

fn arg_str(args: &serde_json::Value, key: &str) -> String {
    args.get(key).and_then(|v| v.as_str()).unwrap_or("").to_string()
}

async fn lobby_call<F>(ctx: &ToolCtx, make: F) -> Result<serde_json::Value, GmError>
where
    F: FnOnce(oneshot::Sender<Result<(), GmError>>) -> LobbyRequest,
{
    let (tx, rx) = oneshot::channel();
    ctx.lobby.request(make(tx)).await?;
    rx.await
        .map_err(|_| GmError::Internal("lobby reply dropped".into()))??;
    Ok(serde_json::json!({ "success": true }))
}

async fn lobby_query<F>(ctx: &ToolCtx, make: F) -> Result<serde_json::Value, GmError>
where
    F: FnOnce(oneshot::Sender<Result<serde_json::Value, GmError>>) -> LobbyRequest,
{
    let (tx, rx) = oneshot::channel();
    ctx.lobby.request(make(tx)).await?;
    rx.await
        .map_err(|_| GmError::Internal("lobby reply dropped".into()))?
}

/// Execute one validated tool call.
pub async fn dispatch_tool(
    name: &str,
    args: serde_json::Value,
    ctx: ToolCtx,
) -> Result<serde_json::Value, GmError> {
    match name {
        "lobby_connect" => {
            let host = arg_str(&args, "host");
            let port = args.get("port").and_then(|v| v.as_u64()).unwrap_or(8200) as u16;
            let result = lobby_call(&ctx, |reply| LobbyRequest::Connect {
                host: host.clone(),
                port,
                reply,
            })
            .await?;

            // The global lobby stream carries non-room push events.
            if ctx.channels_extension {
                let id = ChannelId::lobby_global();
                let _ = ctx
                    .out
                    .send(Outgoing::OpenChannel {
                        id: id.clone(),
                        kind: ChannelKind::LobbyChat,
                        room: None,
                        descriptor: ChannelDescriptor {
                            id,
                            kind: ChannelKind::LobbyChat,
                            label: format!("Lobby {}:{}", host, port),
                            metadata: None,
                        },
                    })
                    .await;
            }
            Ok(result)
        }
        "lobby_disconnect" => {
            lobby_call(&ctx, |reply| LobbyRequest::Disconnect { reply }).await
        }
        "lobby_login" => {
            let username = arg_str(&args, "username");
            let password = arg_str(&args, "password");
            lobby_call(&ctx, |reply| LobbyRequest::Login {
                username,
                password,
                reply,
            })
            .await
        }
        "lobby_register" => {
            let username = arg_str(&args, "username");
            let password = arg_str(&args, "password");
            let email = arg_str(&args, "email");
            lobby_call(&ctx, |reply| LobbyRequest::Register {
                username,
                password,
                email,
                reply,
            })
            .await
        }
        "lobby_say" => {
            let target = arg_str(&args, "target");
            let text = arg_str(&args, "text");
            let place = args.get("place").and_then(|v| v.as_i64()).unwrap_or(0) as i32;
            lobby_call(&ctx, |reply| LobbyRequest::Say {
                target,
                text,
                place,
                reply,
            })
            .await
        }
        "lobby_join_channel" => {
            let name = arg_str(&args, "name");
            lobby_call(&ctx, |reply| LobbyRequest::JoinChannel { name, reply }).await
        }
        "lobby_leave_channel" => {
            let name = arg_str(&args, "name");
            let result =
                lobby_call(&ctx, |reply| LobbyRequest::LeaveChannel {
                    name: name.clone(),
                    reply,
                })
                .await?;
            if ctx.channels_extension {
                let _ = ctx
                    .out
                    .send(Outgoing::CloseChannel {
                        id: ChannelId::lobby_room(&name),
                        error: None,
                    })
                    .await;
            }
            Ok(result)
        }
        "lobby_list_battles" => {
            lobby_query(&ctx, |reply| LobbyRequest::ListBattles { reply }).await
        }
        "lobby_list_users" => {
            let limit = args.get("limit").and_then(|v| v.as_u64()).unwrap_or(50) as usize;
            lobby_query(&ctx, |reply| LobbyRequest::ListUsers { limit, reply }).await
        }
        "lobby_join_battle" => {
            let battle_id = args
                .get("battle_id")
                .and_then(|v| v.as_i64())
                .ok_or_else(|| GmError::Validation("battle_id must be an integer".into()))?;
            let password = arg_str(&args, "password");
            lobby_call(&ctx, |reply| LobbyRequest::JoinBattle {
                battle_id,
                password,
                reply,
            })
            .await
        }
        "lobby_leave_battle" => {
            lobby_call(&ctx, |reply| LobbyRequest::LeaveBattle { reply }).await
        }
        "lobby_matchmaker_join" => {
            let queues = args
                .get("queues")
                .and_then(|v| v.as_array())
                .map(|arr| {
                    arr.iter()
                        .filter_map(|v| v.as_str())
                        .map(String::from)
                        .collect()
                })
                .unwrap_or_default();
            lobby_call(&ctx, |reply| LobbyRequest::MatchmakerJoin { queues, reply }).await
        }
        "lobby_matchmaker_leave" => {
            lobby_call(&ctx, |reply| LobbyRequest::MatchmakerLeave { reply }).await
        }
        "lobby_matchmaker_accept" => {
            let ready = args.get("ready").and_then(|v| v.as_bool()).unwrap_or(false);
            lobby_call(&ctx, |reply| LobbyRequest::MatchmakerAccept { ready, reply }).await
        }
        "lobby_matchmaker_status" => {
            lobby_query(&ctx, |reply| LobbyRequest::MatchmakerStatus { reply }).await
        }
        "lobby_start_game" => start_game(args, ctx).await,
        "channel_list" => {
            let (tx, rx) = oneshot::channel();
            ctx.engine.request(EngineRequest::List { reply: tx }).await?;
            rx.await
                .map_err(|_| GmError::Internal("engine reply dropped".into()))?
        }
        "channel_close" => {
            let id = ChannelId::from(arg_str(&args, "channel_id").as_str());
            let (tx, rx) = oneshot::channel();
            ctx.engine
                .request(EngineRequest::StopGame {
                    channel_id: id.clone(),
                    reply: tx,
                })
                .await?;
            rx.await
                .map_err(|_| GmError::Internal("engine reply dropped".into()))??;
            let _ = ctx
                .out
                .send(Outgoing::CloseChannel { id, error: None })
                .await;
            Ok(serde_json::json!({ "success": true }))
        }
        other => Err(GmError::Validation(format!("unknown tool: {}", other))),
    }
}

/// Start a local game and open its channel.
pub async fn start_game(
    args: serde_json::Value,
    ctx: ToolCtx,
) -> Result<serde_json::Value, GmError> {
    let map = arg_str(&args, "map");
    let game = arg_str(&args, "game");
    let opponent = arg_str(&args, "opponent");
    let headless = args
        .get("headless")
        .and_then(|v| v.as_bool())
        .unwrap_or(true);

    let (tx, rx) = oneshot::channel();
    ctx.engine
        .request(EngineRequest::StartGame {
            config: GameConfig {
                map: map.clone(),
                game: game.clone(),
                opponent: opponent.clone(),
                headless,
            },
            reply: tx,
        })
        .await?;
    let channel_id = rx
        .await
        .map_err(|_| GmError::Internal("engine reply dropped".into()))??;

    let descriptor = ChannelDescriptor {
        id: channel_id.clone(),
        kind: ChannelKind::GameInstance,
        label: format!("Game on {}", map),
        metadata: Some(serde_json::json!({
            "map": map,
            "game": game,
            "opponent": opponent,
            "status": "loading",
        })),
    };
    let _ = ctx
        .out
        .send(Outgoing::OpenChannel {
            id: channel_id.clone(),
            kind: ChannelKind::GameInstance,
            room: None,
            descriptor,
        })
        .await;

    Ok(serde_json::json!({
        "success": true,
        "channelId": channel_id,
    }))
}
