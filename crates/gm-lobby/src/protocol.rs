//! Lobby wire protocol
//!
//! Every line is `CommandName JSON\n` in both directions; a bare command name
//! means empty args. Field names are PascalCase on the wire; the shapes here
//! interoperate with a fixed external server and must not drift.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;

/// A single lobby line: command word, then optional JSON args.
#[derive(Debug, Clone)]
pub struct LobbyMessage {
    pub command: String,
    pub data: serde_json::Value,
}

impl LobbyMessage {
    pub fn new(command: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            command: command.into(),
            data,
        }
    }

    /// Parse one received line (line terminator tolerated). Blank lines
    /// yield None; a bare command word gets empty args; a tail that is not
    /// JSON is kept as a string so nothing the server said is dropped.
    pub fn parse(line: &str) -> Option<Self> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        let (command, tail) = line.split_once(' ').unwrap_or((line, ""));
        let data = match tail.trim() {
            "" => serde_json::json!({}),
            tail => serde_json::from_str(tail)
                .unwrap_or_else(|_| serde_json::Value::String(tail.to_owned())),
        };
        Some(Self {
            command: command.to_owned(),
            data,
        })
    }
}

impl fmt::Display for LobbyMessage {
    /// Wire form, without the line terminator; the writer appends `\n`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.command, self.data)
    }
}

/// Digested password for Login/Register: base64(md5(password)).
pub fn hash_password(password: &str) -> String {
    use base64::Engine;
    use md5::Digest;

    let mut hasher = md5::Md5::new();
    hasher.update(password.as_bytes());
    base64::engine::general_purpose::STANDARD.encode(hasher.finalize())
}

// ── Chat places ──

pub const PLACE_CHANNEL: i32 = 0;
pub const PLACE_BATTLE: i32 = 1;
pub const PLACE_BATTLE_PRIVATE: i32 = 2;
pub const PLACE_MESSAGE_BOX: i32 = 3;
pub const PLACE_USER: i32 = 4;
pub const PLACE_SERVER: i32 = 5;

// ── Result codes ──

pub const LOGIN_OK: i32 = 0;
pub const LOGIN_INVALID_NAME: i32 = 1;
pub const LOGIN_INVALID_PASSWORD: i32 = 2;
pub const LOGIN_BANNED: i32 = 4;
pub const REGISTER_OK: i32 = 0;

// ── Client → Server ──

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoginCommand {
    pub name: String,
    pub password_hash: String,
    #[serde(default)]
    pub user_id: i64,
    #[serde(default, rename = "InstallID")]
    pub install_id: i64,
    #[serde(default)]
    pub lobby_version: i64,
    #[serde(default)]
    pub steam_auth_token: String,
    #[serde(default)]
    pub dlc: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RegisterCommand {
    pub name: String,
    pub password_hash: String,
    pub email: String,
    #[serde(rename = "UserID", default)]
    pub user_id: i64,
    #[serde(rename = "InstallID", default)]
    pub install_id: String,
    #[serde(default)]
    pub steam_auth_token: String,
    #[serde(default)]
    pub dlc: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SayCommand {
    pub place: i32,
    pub target: String,
    pub text: String,
    pub is_emote: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JoinChannelCommand {
    pub channel_name: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LeaveChannelCommand {
    pub channel_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JoinBattleCommand {
    #[serde(rename = "BattleID")]
    pub battle_id: i64,
    #[serde(default)]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LeaveBattleCommand {
    #[serde(rename = "BattleID", skip_serializing_if = "Option::is_none")]
    pub battle_id: Option<i64>,
}

/// Join/leave matchmaker queues; an empty list leaves all queues.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MatchMakerQueueRequestCommand {
    pub queues: Vec<String>,
}

/// Accept or decline a matchmaker ready-check.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AreYouReadyResponseCommand {
    pub ready: bool,
}

// ── Server → Client ──

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct WelcomeData {
    #[serde(default)]
    pub engine: String,
    #[serde(default)]
    pub game: String,
    #[serde(default)]
    pub user_count: i32,
    #[serde(default)]
    pub version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct LoginResponseData {
    pub result_code: i32,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub ban_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct RegisterResponseData {
    pub result_code: i32,
    #[serde(default)]
    pub ban_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserData {
    #[serde(rename = "AccountID", default)]
    pub account_id: i64,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub clan: String,
    #[serde(default)]
    pub country: String,
    #[serde(default)]
    pub is_bot: bool,
    #[serde(default)]
    pub is_admin: bool,
    #[serde(default)]
    pub level: i32,
    #[serde(default)]
    pub effective_elo: f64,
    #[serde(rename = "BattleID", default)]
    pub battle_id: Option<i64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserDisconnectedData {
    pub name: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct SayData {
    #[serde(default)]
    pub user: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub time: String,
    #[serde(default)]
    pub target: String,
    #[serde(default)]
    pub place: i32,
    #[serde(default)]
    pub is_emote: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BattleHeader {
    #[serde(rename = "BattleID", default)]
    pub battle_id: i64,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub founder: String,
    #[serde(default)]
    pub map: String,
    #[serde(default)]
    pub game: String,
    #[serde(default)]
    pub engine: String,
    #[serde(default)]
    pub max_players: i32,
    #[serde(default)]
    pub player_count: i32,
    #[serde(default)]
    pub spectator_count: i32,
    #[serde(default)]
    pub is_running: bool,
    #[serde(default)]
    pub is_password_protected: bool,
    #[serde(default)]
    pub mode: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BattleAddedData {
    pub header: BattleHeader,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BattleUpdateData {
    pub header: BattleHeader,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct BattleRemovedData {
    #[serde(rename = "BattleID")]
    pub battle_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct JoinChannelResponseData {
    pub channel_name: String,
    pub success: bool,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub channel: Option<ChannelData>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChannelData {
    #[serde(default)]
    pub topic: Option<TopicData>,
    #[serde(default)]
    pub users: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct TopicData {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub set_by: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChannelUserAddedData {
    pub channel_name: String,
    pub user_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ChannelUserRemovedData {
    pub channel_name: String,
    pub user_name: String,
}

/// Server instruction to connect to a hosted game.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct ConnectSpringData {
    #[serde(default)]
    pub engine: String,
    #[serde(default)]
    pub game: String,
    #[serde(default)]
    pub ip: String,
    #[serde(default)]
    pub port: i32,
    #[serde(default)]
    pub map: String,
    #[serde(default)]
    pub script_password: String,
    #[serde(default)]
    pub is_spectator: bool,
}

/// Sent on login; lists the matchmaker queues the server offers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MatchMakerSetupData {
    #[serde(default)]
    pub possible_queues: Vec<QueueInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct QueueInfo {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub maps: Vec<String>,
    #[serde(default)]
    pub game: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct MatchMakerStatusData {
    #[serde(default)]
    pub joined_queues: Vec<String>,
    #[serde(default)]
    pub queue_counts: HashMap<String, i32>,
    #[serde(default)]
    pub ingame_counts: HashMap<String, i32>,
    #[serde(default)]
    pub user_count: i32,
}

/// Match found; the server is asking whether we are ready.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AreYouReadyData {
    #[serde(default)]
    pub quick_play: bool,
    #[serde(default)]
    pub seconds_remaining: i32,
}
