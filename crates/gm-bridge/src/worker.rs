//! Queues between the sim thread and the IPC thread
//!
//! The engine ABI is single-threaded: every callback runs on the sim thread
//! at frame rate, and the socket must never block it. The bridge therefore
//! splits work across two queues:
//!
//! - a **bounded** command queue (IPC thread → sim thread); when full, the
//!   IPC thread rejects the command with a `command_error` of reason
//!   `backpressure` instead of queueing it
//! - an **unbounded** event queue (sim thread → IPC thread); successive
//!   `update` events coalesce to the newest while queued

use gm_core::{GameCommand, GameEvent};
use std::sync::mpsc::{sync_channel, Receiver, Sender, SyncSender, TrySendError};

/// Bound of the inbound command queue.
pub const COMMAND_QUEUE_CAPACITY: usize = 1024;

/// Sim-thread side of the queue pair.
pub struct SimEndpoint {
    commands: Receiver<GameCommand>,
    events: Sender<GameEvent>,
}

/// IPC-thread side of the queue pair.
pub struct IoEndpoint {
    commands: SyncSender<GameCommand>,
    events: Receiver<GameEvent>,
}

/// Outcome of submitting a command from the IPC thread.
pub enum Submit {
    Queued,
    /// Queue full; the command was dropped.
    Backpressure,
    /// Sim side is gone.
    Closed,
}

pub fn queue_pair(capacity: usize) -> (SimEndpoint, IoEndpoint) {
    let (cmd_tx, cmd_rx) = sync_channel(capacity);
    let (event_tx, event_rx) = std::sync::mpsc::channel();
    (
        SimEndpoint {
            commands: cmd_rx,
            events: event_tx,
        },
        IoEndpoint {
            commands: cmd_tx,
            events: event_rx,
        },
    )
}

impl SimEndpoint {
    /// Take every command currently queued. Never blocks.
    pub fn drain_commands(&self) -> Vec<GameCommand> {
        let mut commands = Vec::new();
        while let Ok(cmd) = self.commands.try_recv() {
            commands.push(cmd);
        }
        commands
    }

    /// Hand an event to the IPC thread. Never blocks; if the IPC side is
    /// gone the event is dropped.
    pub fn push_event(&self, event: GameEvent) {
        let _ = self.events.send(event);
    }
}

impl IoEndpoint {
    /// Offer a decoded command to the sim thread.
    pub fn submit_command(&self, command: GameCommand) -> Submit {
        match self.commands.try_send(command) {
            Ok(()) => Submit::Queued,
            Err(TrySendError::Full(_)) => Submit::Backpressure,
            Err(TrySendError::Disconnected(_)) => Submit::Closed,
        }
    }

    /// Take every queued event, coalescing update ticks. Never blocks.
    pub fn drain_events(&self) -> Vec<GameEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        coalesce_updates(events)
    }
}

/// Collapse queued `update` events to the newest one, keeping its position.
/// All other events keep their relative order.
pub fn coalesce_updates(events: Vec<GameEvent>) -> Vec<GameEvent> {
    let last_update = events.iter().rposition(|e| e.is_update());
    events
        .into_iter()
        .enumerate()
        .filter(|(i, e)| !e.is_update() || Some(*i) == last_update)
        .map(|(_, e)| e)
        .collect()
}
