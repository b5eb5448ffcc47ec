//! # game-manager
//!
//! Session wiring for the GameManager binary: the upstream session event
//! loop and the concrete tool surface. Split out as a library so the
//! integration tests can drive a full session over in-memory transports.

pub mod session;
pub mod tools;
