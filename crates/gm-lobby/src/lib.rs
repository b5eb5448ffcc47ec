//! # gm-lobby
//!
//! Client for the lobby server's line-framed TCP protocol:
//! - Wire format `Command JSON\n`, digested-password authentication
//! - Tracked in-memory model of users, battles and joined chat rooms
//! - A service task owning the connection behind an mpsc inbox
//!
//! Reconnection is an explicit operation that rebuilds state from scratch;
//! the client never re-joins rooms or retries on its own.

pub mod client;
pub mod protocol;
pub mod service;
pub mod state;

pub use client::{AuthState, LobbyClient};
pub use protocol::{hash_password, LobbyMessage};
pub use service::{spawn_lobby_service, LobbyHandle, LobbyRequest};
pub use state::{BattleInfo, LobbyEvent, LobbyState, UserInfo};
