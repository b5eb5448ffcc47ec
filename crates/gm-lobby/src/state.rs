//! Tracked lobby state
//!
//! An in-memory model of everything seen since login: users, battles, joined
//! chat rooms, matchmaker queues. `apply` dispatches each incoming command
//! to a handler that decodes its payload, mutates the model, and reports the
//! resulting `LobbyEvent`s for the session layer to forward. Payloads that
//! fail to decode are logged and skipped; they never abort the connection.

use crate::protocol::*;
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use tracing::{trace, warn};

type Events = Vec<LobbyEvent>;

/// What the server said about itself in its greeting.
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    pub engine: String,
    pub game: String,
    pub user_count: i32,
}

/// One online user, as last reported by the server.
#[derive(Debug, Clone)]
pub struct UserInfo {
    pub name: String,
    pub account_id: i64,
    pub clan: String,
    pub country: String,
    pub level: i32,
    pub elo: f64,
    pub is_bot: bool,
    pub is_admin: bool,
    pub battle_id: Option<i64>,
}

impl From<UserData> for UserInfo {
    fn from(d: UserData) -> Self {
        Self {
            name: d.name,
            account_id: d.account_id,
            clan: d.clan,
            country: d.country,
            level: d.level,
            elo: d.effective_elo,
            is_bot: d.is_bot,
            is_admin: d.is_admin,
            battle_id: d.battle_id,
        }
    }
}

/// One open battle, as last reported by the server.
#[derive(Debug, Clone)]
pub struct BattleInfo {
    pub battle_id: i64,
    pub title: String,
    pub founder: String,
    pub map: String,
    pub game: String,
    pub engine: String,
    pub max_players: i32,
    pub player_count: i32,
    pub spectator_count: i32,
    pub is_running: bool,
    pub is_password_protected: bool,
    pub mode: Option<String>,
}

impl From<&BattleHeader> for BattleInfo {
    fn from(h: &BattleHeader) -> Self {
        Self {
            battle_id: h.battle_id,
            title: h.title.clone(),
            founder: h.founder.clone(),
            map: h.map.clone(),
            game: h.game.clone(),
            engine: h.engine.clone(),
            max_players: h.max_players,
            player_count: h.player_count,
            spectator_count: h.spectator_count,
            is_running: h.is_running,
            is_password_protected: h.is_password_protected,
            mode: h.mode.clone(),
        }
    }
}

/// A chat room we are a member of.
#[derive(Debug, Clone, Default)]
pub struct ChannelInfo {
    pub name: String,
    pub topic: Option<String>,
    pub users: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct MatchmakerInfo {
    pub possible_queues: Vec<String>,
    pub joined_queues: Vec<String>,
    pub queue_counts: HashMap<String, i32>,
}

/// State change emitted for forwarding upstream.
#[derive(Debug, Clone)]
pub enum LobbyEvent {
    Connected { engine: String, game: String },
    Disconnected { reason: String },
    LoggedIn { username: String },
    LoginFailed { code: i32, message: String },
    RegisterSuccess,
    RegisterFailed { code: i32, reason: String },
    UserJoined(UserInfo),
    UserLeft { name: String, reason: String },
    ChatMessage { user: String, text: String, target: String, place: i32, is_emote: bool },
    BattleOpened(BattleInfo),
    BattleUpdated(BattleInfo),
    BattleClosed { battle_id: i64 },
    ChannelJoined { channel: String, users: Vec<String>, topic: Option<String> },
    ChannelJoinFailed { channel: String, reason: String },
    ChannelUserJoined { channel: String, user: String },
    ChannelUserLeft { channel: String, user: String },
    MatchmakerStatus { joined: Vec<String> },
    MatchFound { seconds_remaining: i32 },
    ConnectHostedGame(ConnectSpringData),
}

/// Tracked lobby state, updated as commands arrive.
#[derive(Debug, Default)]
pub struct LobbyState {
    pub greeted: bool,
    pub logged_in: bool,
    pub my_username: Option<String>,
    pub server: ServerInfo,
    pub users: HashMap<String, UserInfo>,
    pub battles: HashMap<i64, BattleInfo>,
    pub channels: HashMap<String, ChannelInfo>,
    pub my_battle: Option<i64>,
    pub matchmaker: MatchmakerInfo,
}

/// Decode one command payload, logging and skipping undecodable ones.
fn decode<T: DeserializeOwned>(command: &str, data: &serde_json::Value) -> Option<T> {
    match serde_json::from_value(data.clone()) {
        Ok(value) => Some(value),
        Err(e) => {
            warn!("undecodable {} payload: {}", command, e);
            None
        }
    }
}

impl LobbyState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply one incoming command and return the events to forward.
    pub fn apply(&mut self, msg: &LobbyMessage) -> Events {
        let mut out = Events::new();
        match msg.command.as_str() {
            "Welcome" => self.on_welcome(&msg.data, &mut out),
            "LoginResponse" => self.on_login_response(&msg.data, &mut out),
            "RegisterResponse" => self.on_register_response(&msg.data, &mut out),
            "User" => self.on_user(&msg.data, &mut out),
            "UserDisconnected" => self.on_user_gone(&msg.data, &mut out),
            "Say" => self.on_say(&msg.data, &mut out),
            "BattleAdded" | "BattleUpdate" => self.on_battle(&msg.command, &msg.data, &mut out),
            "BattleRemoved" => self.on_battle_removed(&msg.data, &mut out),
            "JoinChannelResponse" => self.on_channel_joined(&msg.data, &mut out),
            "ChannelUserAdded" => self.on_room_user_added(&msg.data, &mut out),
            "ChannelUserRemoved" => self.on_room_user_removed(&msg.data, &mut out),
            "MatchMakerSetup" => self.on_matchmaker_setup(&msg.data),
            "MatchMakerStatus" => self.on_matchmaker_status(&msg.data, &mut out),
            "AreYouReady" => self.on_ready_check(&msg.data, &mut out),
            "ConnectSpring" => self.on_connect_spring(&msg.data, &mut out),
            // Keepalive is answered by the service task, not tracked here.
            "Ping" => {}
            other => trace!("unhandled lobby command: {}", other),
        }
        out
    }

    fn on_welcome(&mut self, data: &serde_json::Value, out: &mut Events) {
        let Some(data) = decode::<WelcomeData>("Welcome", data) else {
            return;
        };
        self.greeted = true;
        self.server = ServerInfo {
            engine: data.engine.clone(),
            game: data.game.clone(),
            user_count: data.user_count,
        };
        out.push(LobbyEvent::Connected {
            engine: data.engine,
            game: data.game,
        });
    }

    fn on_login_response(&mut self, data: &serde_json::Value, out: &mut Events) {
        let Some(data) = decode::<LoginResponseData>("LoginResponse", data) else {
            return;
        };
        if data.result_code == LOGIN_OK {
            self.logged_in = true;
            self.my_username = Some(data.name.clone());
            out.push(LobbyEvent::LoggedIn {
                username: data.name,
            });
        } else {
            out.push(LobbyEvent::LoginFailed {
                code: data.result_code,
                message: data.message,
            });
        }
    }

    fn on_register_response(&mut self, data: &serde_json::Value, out: &mut Events) {
        let Some(data) = decode::<RegisterResponseData>("RegisterResponse", data) else {
            return;
        };
        out.push(if data.result_code == REGISTER_OK {
            LobbyEvent::RegisterSuccess
        } else {
            LobbyEvent::RegisterFailed {
                code: data.result_code,
                reason: data.ban_reason.unwrap_or_default(),
            }
        });
    }

    fn on_user(&mut self, data: &serde_json::Value, out: &mut Events) {
        let Some(data) = decode::<UserData>("User", data) else {
            return;
        };
        let info = UserInfo::from(data);
        // The server re-sends User on every status change; only the first
        // sighting is a join.
        if self.users.insert(info.name.clone(), info.clone()).is_none() {
            out.push(LobbyEvent::UserJoined(info));
        }
    }

    fn on_user_gone(&mut self, data: &serde_json::Value, out: &mut Events) {
        let Some(data) = decode::<UserDisconnectedData>("UserDisconnected", data) else {
            return;
        };
        self.users.remove(&data.name);
        out.push(LobbyEvent::UserLeft {
            name: data.name,
            reason: data.reason,
        });
    }

    fn on_say(&mut self, data: &serde_json::Value, out: &mut Events) {
        let Some(data) = decode::<SayData>("Say", data) else {
            return;
        };
        out.push(LobbyEvent::ChatMessage {
            user: data.user,
            text: data.text,
            target: data.target,
            place: data.place,
            is_emote: data.is_emote,
        });
    }

    /// Adds and updates share one path: an update for a battle we never saw
    /// opened is treated as an open with partial fields, and a re-announced
    /// battle as an update.
    fn on_battle(&mut self, command: &str, data: &serde_json::Value, out: &mut Events) {
        let Some(data) = decode::<BattleUpdateData>(command, data) else {
            return;
        };
        let info = BattleInfo::from(&data.header);
        let known = self.battles.insert(info.battle_id, info.clone()).is_some();
        out.push(if known {
            LobbyEvent::BattleUpdated(info)
        } else {
            LobbyEvent::BattleOpened(info)
        });
    }

    fn on_battle_removed(&mut self, data: &serde_json::Value, out: &mut Events) {
        let Some(data) = decode::<BattleRemovedData>("BattleRemoved", data) else {
            return;
        };
        self.battles.remove(&data.battle_id);
        if self.my_battle == Some(data.battle_id) {
            self.my_battle = None;
        }
        out.push(LobbyEvent::BattleClosed {
            battle_id: data.battle_id,
        });
    }

    fn on_channel_joined(&mut self, data: &serde_json::Value, out: &mut Events) {
        let Some(data) = decode::<JoinChannelResponseData>("JoinChannelResponse", data) else {
            return;
        };
        if !data.success {
            out.push(LobbyEvent::ChannelJoinFailed {
                channel: data.channel_name,
                reason: data.reason.unwrap_or_default(),
            });
            return;
        }

        let details = data.channel.unwrap_or_default();
        let info = ChannelInfo {
            name: data.channel_name.clone(),
            topic: details.topic.map(|t| t.text),
            users: details.users,
        };
        out.push(LobbyEvent::ChannelJoined {
            channel: data.channel_name.clone(),
            users: info.users.clone(),
            topic: info.topic.clone(),
        });
        self.channels.insert(data.channel_name, info);
    }

    fn on_room_user_added(&mut self, data: &serde_json::Value, out: &mut Events) {
        let Some(data) = decode::<ChannelUserAddedData>("ChannelUserAdded", data) else {
            return;
        };
        if let Some(room) = self.channels.get_mut(&data.channel_name) {
            if !room.users.iter().any(|u| u == &data.user_name) {
                room.users.push(data.user_name.clone());
            }
        }
        out.push(LobbyEvent::ChannelUserJoined {
            channel: data.channel_name,
            user: data.user_name,
        });
    }

    fn on_room_user_removed(&mut self, data: &serde_json::Value, out: &mut Events) {
        let Some(data) = decode::<ChannelUserRemovedData>("ChannelUserRemoved", data) else {
            return;
        };
        if let Some(room) = self.channels.get_mut(&data.channel_name) {
            room.users.retain(|u| u != &data.user_name);
        }
        out.push(LobbyEvent::ChannelUserLeft {
            channel: data.channel_name,
            user: data.user_name,
        });
    }

    fn on_matchmaker_setup(&mut self, data: &serde_json::Value) {
        let Some(data) = decode::<MatchMakerSetupData>("MatchMakerSetup", data) else {
            return;
        };
        self.matchmaker.possible_queues =
            data.possible_queues.into_iter().map(|q| q.name).collect();
    }

    fn on_matchmaker_status(&mut self, data: &serde_json::Value, out: &mut Events) {
        let Some(data) = decode::<MatchMakerStatusData>("MatchMakerStatus", data) else {
            return;
        };
        self.matchmaker.joined_queues = data.joined_queues.clone();
        self.matchmaker.queue_counts = data.queue_counts;
        out.push(LobbyEvent::MatchmakerStatus {
            joined: data.joined_queues,
        });
    }

    fn on_ready_check(&mut self, data: &serde_json::Value, out: &mut Events) {
        let Some(data) = decode::<AreYouReadyData>("AreYouReady", data) else {
            return;
        };
        out.push(LobbyEvent::MatchFound {
            seconds_remaining: data.seconds_remaining,
        });
    }

    fn on_connect_spring(&mut self, data: &serde_json::Value, out: &mut Events) {
        let Some(data) = decode::<ConnectSpringData>("ConnectSpring", data) else {
            return;
        };
        out.push(LobbyEvent::ConnectHostedGame(data));
    }
}
