//! # gm-core
//!
//! Core types shared across the GameManager workspace.
//!
//! This crate provides the foundational types used by the multiplexer, the
//! lobby client, the engine supervisor and the in-engine bridge:
//! - Channel identifiers, lifecycle states and descriptors
//! - Feature-set declarations for session negotiation
//! - The game event and command taxonomies carried over bridge IPC
//! - The error taxonomy and its wire shape

pub mod channel;
pub mod command;
pub mod error;
pub mod event;
pub mod feature;
pub mod handshake;

pub use channel::{ChannelDescriptor, ChannelId, ChannelKind, ChannelState};
pub use command::GameCommand;
pub use error::{GmError, Result};
pub use event::GameEvent;
pub use feature::{declared_feature_sets, FeatureSet};
pub use handshake::HandshakeFrame;
