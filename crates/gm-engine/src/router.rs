//! IPC router for bridge connections
//!
//! Each pending engine instance gets its own unix listener; the first frame
//! on any accepted connection must be a `hello` whose token matches that
//! instance. Unmatched tokens are dropped, duplicate handshakes close the
//! second connection. After `welcome`, a reader task forwards event frames
//! to the engine service in FIFO order and a writer task drains commands.
//!
//! Framing is newline-delimited JSON in both directions.

use gm_core::{ChannelId, GameCommand, GameEvent, GmError, HandshakeFrame};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Handshake must complete promptly once the bridge connects.
const HANDSHAKE_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(10);

/// Messages from router tasks to the engine service.
#[derive(Debug)]
pub enum RouterMsg {
    /// A bridge handshook for this channel; commands go into the sender.
    Connected {
        channel_id: ChannelId,
        commands: mpsc::Sender<GameCommand>,
        version: String,
    },
    /// One event frame from the bridge.
    Event {
        channel_id: ChannelId,
        event: GameEvent,
    },
    /// The bridge socket closed or failed.
    Disconnected {
        channel_id: ChannelId,
        reason: String,
    },
}

struct Expectation {
    socket_path: PathBuf,
    accept_task: tokio::task::JoinHandle<()>,
    bound: Arc<AtomicBool>,
}

/// Listener/connection table. Owned by the engine service task.
pub struct IpcRouter {
    msg_tx: mpsc::Sender<RouterMsg>,
    expected: HashMap<ChannelId, Expectation>,
    writers: HashMap<ChannelId, mpsc::Sender<GameCommand>>,
}

impl IpcRouter {
    pub fn new() -> (Self, mpsc::Receiver<RouterMsg>) {
        let (msg_tx, msg_rx) = mpsc::channel(256);
        (
            Self {
                msg_tx,
                expected: HashMap::new(),
                writers: HashMap::new(),
            },
            msg_rx,
        )
    }

    /// Start listening for the bridge of a pending instance.
    pub fn expect(
        &mut self,
        channel_id: ChannelId,
        token: String,
        socket_path: &Path,
    ) -> Result<(), GmError> {
        // A stale socket file from a previous run would fail the bind.
        let _ = std::fs::remove_file(socket_path);

        let listener = UnixListener::bind(socket_path)
            .map_err(|e| GmError::Bridge(format!("bind {}: {}", socket_path.display(), e)))?;
        info!("expecting bridge for {} at {}", channel_id, socket_path.display());

        let bound = Arc::new(AtomicBool::new(false));
        let accept_task = tokio::spawn(accept_loop(
            listener,
            channel_id.clone(),
            token,
            bound.clone(),
            self.msg_tx.clone(),
        ));

        self.expected.insert(
            channel_id,
            Expectation {
                socket_path: socket_path.to_path_buf(),
                accept_task,
                bound,
            },
        );
        Ok(())
    }

    /// Record the command sender once a bridge handshakes.
    pub fn bind_writer(&mut self, channel_id: ChannelId, commands: mpsc::Sender<GameCommand>) {
        self.writers.insert(channel_id, commands);
    }

    /// Drop the writer after a disconnect; the listener stays for a respawn.
    pub fn unbind_writer(&mut self, channel_id: &ChannelId) {
        self.writers.remove(channel_id);
        if let Some(exp) = self.expected.get(channel_id) {
            exp.bound.store(false, Ordering::SeqCst);
        }
    }

    pub fn is_connected(&self, channel_id: &ChannelId) -> bool {
        self.writers.contains_key(channel_id)
    }

    /// Forward a command to the bridge for this channel.
    pub async fn send(
        &mut self,
        channel_id: &ChannelId,
        command: GameCommand,
    ) -> Result<(), GmError> {
        let writer = self
            .writers
            .get(channel_id)
            .ok_or_else(|| GmError::Bridge(format!("no bridge connected for {}", channel_id)))?;
        writer
            .send(command)
            .await
            .map_err(|_| GmError::Bridge(format!("bridge writer gone for {}", channel_id)))
    }

    /// Stop listening and drop any live connection for a channel.
    pub fn close(&mut self, channel_id: &ChannelId) {
        self.writers.remove(channel_id);
        if let Some(exp) = self.expected.remove(channel_id) {
            exp.accept_task.abort();
            let _ = std::fs::remove_file(&exp.socket_path);
        }
    }
}

async fn accept_loop(
    listener: UnixListener,
    channel_id: ChannelId,
    token: String,
    bound: Arc<AtomicBool>,
    msg_tx: mpsc::Sender<RouterMsg>,
) {
    loop {
        let (stream, _) = match listener.accept().await {
            Ok(pair) => pair,
            Err(e) => {
                warn!("bridge accept failed for {}: {}", channel_id, e);
                return;
            }
        };

        if bound.load(Ordering::SeqCst) {
            warn!("duplicate bridge handshake for {}, closing", channel_id);
            drop(stream);
            continue;
        }

        match tokio::time::timeout(HANDSHAKE_TIMEOUT, handshake(stream, &token)).await {
            Ok(Ok((stream, version))) => {
                bound.store(true, Ordering::SeqCst);
                debug!("bridge v{} bound to {}", version, channel_id);
                spawn_connection(
                    stream,
                    channel_id.clone(),
                    version,
                    bound.clone(),
                    msg_tx.clone(),
                )
                .await;
            }
            Ok(Err(e)) => warn!("rejecting bridge for {}: {}", channel_id, e),
            Err(_) => warn!("bridge handshake timed out for {}", channel_id),
        }
    }
}

/// Read the `hello`, verify the token, answer `welcome`.
async fn handshake(stream: UnixStream, token: &str) -> Result<(UnixStream, String), GmError> {
    let mut stream = stream;
    let mut line = String::new();
    {
        let mut reader = BufReader::new(&mut stream);
        reader
            .read_line(&mut line)
            .await
            .map_err(|e| GmError::Bridge(format!("handshake read: {}", e)))?;
    }

    let frame: HandshakeFrame = serde_json::from_str(line.trim())
        .map_err(|e| GmError::Bridge(format!("handshake frame: {}", e)))?;
    let version = match frame {
        HandshakeFrame::Hello {
            token: presented,
            version,
        } => {
            if presented != token {
                return Err(GmError::Bridge("handshake token mismatch".into()));
            }
            version
        }
        HandshakeFrame::Welcome => {
            return Err(GmError::Bridge("unexpected welcome from bridge".into()));
        }
    };

    let welcome = serde_json::to_string(&HandshakeFrame::Welcome)
        .map_err(|e| GmError::Internal(e.to_string()))?;
    stream
        .write_all(format!("{}\n", welcome).as_bytes())
        .await
        .map_err(|e| GmError::Bridge(format!("handshake write: {}", e)))?;

    Ok((stream, version))
}

async fn spawn_connection(
    stream: UnixStream,
    channel_id: ChannelId,
    version: String,
    bound: Arc<AtomicBool>,
    msg_tx: mpsc::Sender<RouterMsg>,
) {
    let (read_half, write_half) = stream.into_split();
    let (cmd_tx, cmd_rx) = mpsc::channel::<GameCommand>(64);

    tokio::spawn(writer_task(write_half, cmd_rx, channel_id.clone()));
    tokio::spawn(reader_task(
        read_half,
        channel_id.clone(),
        bound,
        msg_tx.clone(),
    ));

    let _ = msg_tx
        .send(RouterMsg::Connected {
            channel_id,
            commands: cmd_tx,
            version,
        })
        .await;
}

async fn writer_task(
    mut write_half: tokio::net::unix::OwnedWriteHalf,
    mut cmd_rx: mpsc::Receiver<GameCommand>,
    channel_id: ChannelId,
) {
    while let Some(cmd) = cmd_rx.recv().await {
        let json = match serde_json::to_string(&cmd) {
            Ok(j) => j,
            Err(e) => {
                warn!("command serialization for {}: {}", channel_id, e);
                continue;
            }
        };
        debug!("{} ← {}", channel_id, json);
        if write_half
            .write_all(format!("{}\n", json).as_bytes())
            .await
            .is_err()
        {
            break;
        }
    }
}

async fn reader_task(
    read_half: tokio::net::unix::OwnedReadHalf,
    channel_id: ChannelId,
    bound: Arc<AtomicBool>,
    msg_tx: mpsc::Sender<RouterMsg>,
) {
    let mut reader = BufReader::new(read_half);
    let mut line = String::new();
    let reason = loop {
        line.clear();
        match reader.read_line(&mut line).await {
            Ok(0) => break "bridge closed connection".to_string(),
            Ok(_) => {
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match serde_json::from_str::<GameEvent>(trimmed) {
                    Ok(event) => {
                        debug!("{} → {}", channel_id, trimmed);
                        if msg_tx
                            .send(RouterMsg::Event {
                                channel_id: channel_id.clone(),
                                event,
                            })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                    Err(e) => {
                        // Framing noise is logged and dropped, not fatal.
                        warn!("unparseable bridge frame from {}: {}", channel_id, e);
                    }
                }
            }
            Err(e) => break format!("bridge read error: {}", e),
        }
    };

    bound.store(false, Ordering::SeqCst);
    let _ = msg_tx
        .send(RouterMsg::Disconnected { channel_id, reason })
        .await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    async fn fake_bridge(path: &Path, token: &str) -> Result<UnixStream, GmError> {
        let mut stream = UnixStream::connect(path)
            .await
            .map_err(|e| GmError::Bridge(e.to_string()))?;
        let hello = serde_json::to_string(&HandshakeFrame::Hello {
            token: token.into(),
            version: "0.1.0".into(),
        })
        .unwrap();
        stream
            .write_all(format!("{}\n", hello).as_bytes())
            .await
            .unwrap();

        let mut line = String::new();
        {
            let mut reader = BufReader::new(&mut stream);
            reader.read_line(&mut line).await.unwrap();
        }
        let frame: HandshakeFrame = serde_json::from_str(line.trim())
            .map_err(|e| GmError::Bridge(format!("no welcome: {}", e)))?;
        match frame {
            HandshakeFrame::Welcome => Ok(stream),
            other => Err(GmError::Bridge(format!("unexpected frame: {:?}", other))),
        }
    }

    #[tokio::test]
    async fn test_matching_token_binds() {
        let tmp = tempfile::tempdir().unwrap();
        let socket = tmp.path().join("gm-1.sock");
        let (mut router, mut msgs) = IpcRouter::new();
        let channel = ChannelId::local_game(1);
        router
            .expect(channel.clone(), "tok-1".into(), &socket)
            .unwrap();

        let mut bridge = fake_bridge(&socket, "tok-1").await.unwrap();

        let commands = match msgs.recv().await.unwrap() {
            RouterMsg::Connected {
                channel_id,
                commands,
                ..
            } => {
                assert_eq!(channel_id, channel);
                commands
            }
            other => panic!("expected Connected, got {:?}", other),
        };
        router.bind_writer(channel.clone(), commands);

        // Event frame flows bridge → router.
        bridge
            .write_all(b"{\"type\":\"init\",\"frame\":0,\"saved_game\":false}\n")
            .await
            .unwrap();
        match msgs.recv().await.unwrap() {
            RouterMsg::Event { event, .. } => {
                assert!(matches!(event, GameEvent::Init { frame: 0, .. }))
            }
            other => panic!("expected Event, got {:?}", other),
        }

        // Command flows router → bridge.
        router
            .send(&channel, GameCommand::Pause)
            .await
            .unwrap();
        let mut reader = BufReader::new(&mut bridge);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let cmd: serde_json::Value = serde_json::from_str(line.trim()).unwrap();
        assert_eq!(cmd["type"], "pause");
    }

    #[tokio::test]
    async fn test_mismatched_token_dropped() {
        let tmp = tempfile::tempdir().unwrap();
        let socket = tmp.path().join("gm-2.sock");
        let (mut router, _msgs) = IpcRouter::new();
        router
            .expect(ChannelId::local_game(2), "tok-good".into(), &socket)
            .unwrap();

        // The hello with a wrong token never receives a welcome; the
        // connection just closes.
        match fake_bridge(&socket, "tok-evil").await {
            Err(GmError::Bridge(_)) => {}
            Ok(_) => panic!("mismatched token was accepted"),
            Err(other) => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_duplicate_handshake_closes_second() {
        let tmp = tempfile::tempdir().unwrap();
        let socket = tmp.path().join("gm-3.sock");
        let (mut router, mut msgs) = IpcRouter::new();
        let channel = ChannelId::local_game(3);
        router
            .expect(channel.clone(), "tok-3".into(), &socket)
            .unwrap();

        let _first = fake_bridge(&socket, "tok-3").await.unwrap();
        match msgs.recv().await.unwrap() {
            RouterMsg::Connected { .. } => {}
            other => panic!("expected Connected, got {:?}", other),
        }

        // The second connection is closed without a welcome.
        let mut second = UnixStream::connect(&socket).await.unwrap();
        let hello = serde_json::to_string(&HandshakeFrame::Hello {
            token: "tok-3".into(),
            version: "0.1.0".into(),
        })
        .unwrap();
        second
            .write_all(format!("{}\n", hello).as_bytes())
            .await
            .unwrap();
        let mut buf = Vec::new();
        let n = second.read_to_end(&mut buf).await.unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_send_without_connection_is_bridge_error() {
        let (mut router, _msgs) = IpcRouter::new();
        match router
            .send(&ChannelId::local_game(9), GameCommand::Pause)
            .await
        {
            Err(GmError::Bridge(_)) => {}
            other => panic!("expected bridge error, got {:?}", other),
        }
    }
}
