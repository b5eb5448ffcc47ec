//! IPC-thread side of the bridge
//!
//! The IPC thread owns the socket. It performs the `hello`/`welcome`
//! handshake, then loops: drain the event queue to outbound frames, poll the
//! socket for command frames (short read timeout keeps the loop live), and
//! feed decoded commands into the bounded queue. The sim thread never
//! touches the socket.
//!
//! No async runtime here: the bridge lives inside the engine process and
//! uses plain blocking I/O on its own thread.

use crate::worker::{IoEndpoint, Submit, COMMAND_QUEUE_CAPACITY};
use gm_core::{GameCommand, GameEvent, HandshakeFrame};
use std::io::{self, BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::time::Duration;

/// Socket poll interval; bounds how long outbound events can sit queued.
const READ_TIMEOUT: Duration = Duration::from_millis(20);
/// The GameManager must answer `hello` within this window.
const WELCOME_TIMEOUT: Duration = Duration::from_secs(10);

/// Where to connect and how to identify ourselves.
#[derive(Debug, Clone)]
pub struct IpcConfig {
    pub socket_path: String,
    pub token: String,
}

/// Connected, handshaken socket.
pub struct IpcClient {
    stream: UnixStream,
    reader: BufReader<UnixStream>,
}

impl IpcClient {
    /// Connect and complete the `hello`/`welcome` exchange.
    pub fn connect_and_handshake(config: &IpcConfig) -> io::Result<Self> {
        let stream = UnixStream::connect(&config.socket_path)?;
        let reader_stream = stream.try_clone()?;
        let mut client = Self {
            stream,
            reader: BufReader::new(reader_stream),
        };

        let hello = HandshakeFrame::Hello {
            token: config.token.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        };
        client.send_json(&serde_json::to_string(&hello).map_err(io::Error::other)?)?;

        client.stream.set_read_timeout(Some(WELCOME_TIMEOUT))?;
        let mut line = String::new();
        client.reader.read_line(&mut line)?;
        let frame: HandshakeFrame =
            serde_json::from_str(line.trim()).map_err(io::Error::other)?;
        match frame {
            HandshakeFrame::Welcome => {}
            other => {
                return Err(io::Error::other(format!(
                    "expected welcome, got {:?}",
                    other
                )));
            }
        }

        client.stream.set_read_timeout(Some(READ_TIMEOUT))?;
        Ok(client)
    }

    pub fn send_event(&mut self, event: &GameEvent) -> io::Result<()> {
        let json = serde_json::to_string(event).map_err(io::Error::other)?;
        self.send_json(&json)
    }

    fn send_json(&mut self, json: &str) -> io::Result<()> {
        self.stream.write_all(json.as_bytes())?;
        self.stream.write_all(b"\n")?;
        self.stream.flush()
    }
}

/// Body of the IPC thread. Returns when the release event has been flushed,
/// the socket dies, or the sim side disappears.
pub fn run_io_loop(mut client: IpcClient, endpoint: IoEndpoint) {
    // Partial inbound line carried across poll timeouts.
    let mut acc: Vec<u8> = Vec::new();

    loop {
        // Outbound: drain queued events (update ticks already coalesced).
        for event in endpoint.drain_events() {
            let releasing = matches!(event, GameEvent::Release { .. });
            if client.send_event(&event).is_err() {
                return;
            }
            if releasing {
                // Final frame sent; close the socket by dropping it.
                return;
            }
        }

        // Inbound: poll for one command frame.
        match client.reader.read_until(b'\n', &mut acc) {
            Ok(0) => return, // EOF: GameManager went away.
            Ok(_) => {
                if acc.last() == Some(&b'\n') {
                    let line = String::from_utf8_lossy(&acc).trim().to_string();
                    acc.clear();
                    if !line.is_empty() {
                        handle_command_line(&line, &endpoint, &mut client);
                    }
                }
            }
            Err(e)
                if e.kind() == io::ErrorKind::WouldBlock
                    || e.kind() == io::ErrorKind::TimedOut =>
            {
                // No complete frame yet; loop around to flush events.
            }
            Err(_) => return,
        }
    }
}

/// Decode one inbound frame and offer it to the sim thread. Rejections are
/// answered directly on the socket as `command_error` events.
fn handle_command_line(line: &str, endpoint: &IoEndpoint, client: &mut IpcClient) {
    let raw: serde_json::Value =
        serde_json::from_str(line).unwrap_or(serde_json::Value::Null);

    match serde_json::from_str::<GameCommand>(line) {
        Ok(command) => match endpoint.submit_command(command) {
            Submit::Queued => {}
            Submit::Backpressure => {
                let _ = client.send_event(&GameEvent::CommandError {
                    error: format!("backpressure: command queue full ({})", COMMAND_QUEUE_CAPACITY),
                    command: raw,
                    frame: 0,
                });
            }
            Submit::Closed => {}
        },
        Err(e) => {
            let _ = client.send_event(&GameEvent::CommandError {
                error: format!("invalid command: {}", e),
                command: raw,
                frame: 0,
            });
        }
    }
}
