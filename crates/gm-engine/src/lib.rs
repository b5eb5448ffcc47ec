//! # gm-engine
//!
//! Everything between the GameManager and a running engine process:
//! - Per-instance write-directory preparation (sandbox + symlinked content)
//! - Start-script generation with bridge and opponent AI slots
//! - Subprocess spawn, log capture, exit observation and reaping
//! - The IPC router that binds each bridge connection to its expected
//!   instance by handshake token
//!
//! Engine instances and channels reference each other only by id; the
//! supervisor owns instances and the service task owns both tables.

pub mod router;
pub mod script;
pub mod service;
pub mod supervisor;
pub mod write_dir;

pub use router::{IpcRouter, RouterMsg};
pub use script::StartScript;
pub use service::{spawn_engine_service, EngineHandle, EngineNotice, EngineRequest};
pub use supervisor::{EngineStatus, EngineSupervisor, GameConfig, SupervisorPaths};
pub use write_dir::WriteDirLayout;
