//! # gm-mux
//!
//! The upstream protocol surface of the GameManager:
//! - Line-delimited JSON-RPC request/response/notification framing
//! - Session state: feature-set negotiation, open-channel table
//! - Tool registry with schema validation
//! - Per-session checkpoint tree for rollback-enabled feature sets
//!
//! Clients that do not opt into the channels extension are still served by
//! the tool subset alone; channel-owning operations fail for them with a
//! `channels-required` error.

pub mod checkpoint;
pub mod connection;
pub mod rpc;
pub mod session;
pub mod tools;

pub use checkpoint::CheckpointTree;
pub use connection::{MuxConnection, MuxReader, MuxWriter};
pub use rpc::{IncomingMessage, Notification, Request, RequestId, Response, RpcError};
pub use session::Session;
pub use tools::{ToolDef, ToolRegistry};
