//! TCP connection to the lobby server

use crate::protocol::LobbyMessage;
use gm_core::GmError;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Authentication progress on a lobby connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// Connected, awaiting (or past) the server greeting, not logged in.
    Greeted,
    /// Login accepted.
    Authenticated,
    /// Socket gone; the connection object should be dropped.
    Dead,
}

/// One TCP lobby connection. Single reader, single writer; owned by the
/// lobby service task.
pub struct LobbyClient {
    writer: tokio::io::WriteHalf<TcpStream>,
    reader: BufReader<tokio::io::ReadHalf<TcpStream>>,
    pub auth: AuthState,
    line: String,
}

impl LobbyClient {
    /// Connect to a lobby server. The server greets first; callers drive the
    /// read loop to observe the `Welcome`.
    pub async fn connect(host: &str, port: u16) -> Result<Self, GmError> {
        let addr = format!("{}:{}", host, port);
        info!("connecting to lobby server at {}", addr);
        let stream = TcpStream::connect(&addr)
            .await
            .map_err(|e| GmError::Transport(format!("lobby connect to {}: {}", addr, e)))?;
        let (reader, writer) = tokio::io::split(stream);
        Ok(Self {
            writer,
            reader: BufReader::new(reader),
            auth: AuthState::Greeted,
            line: String::new(),
        })
    }

    pub async fn send(&mut self, msg: &LobbyMessage) -> Result<(), GmError> {
        let wire = format!("{}\n", msg);
        debug!("lobby → {}", wire.trim_end());
        self.writer
            .write_all(wire.as_bytes())
            .await
            .map_err(|e| GmError::Transport(format!("lobby write: {}", e)))?;
        self.writer
            .flush()
            .await
            .map_err(|e| GmError::Transport(format!("lobby flush: {}", e)))?;
        Ok(())
    }

    /// Serialize and send a typed command.
    pub async fn send_command(
        &mut self,
        command: &str,
        data: &impl serde::Serialize,
    ) -> Result<(), GmError> {
        let value = serde_json::to_value(data)
            .map_err(|e| GmError::Internal(format!("lobby command serialization: {}", e)))?;
        self.send(&LobbyMessage::new(command, value)).await
    }

    /// Read the next message. Malformed lines are skipped, not fatal.
    pub async fn recv(&mut self) -> Result<LobbyMessage, GmError> {
        loop {
            self.line.clear();
            let bytes = self
                .reader
                .read_line(&mut self.line)
                .await
                .map_err(|e| GmError::Transport(format!("lobby read: {}", e)))?;
            if bytes == 0 {
                self.auth = AuthState::Dead;
                return Err(GmError::Transport("lobby connection closed".into()));
            }
            if let Some(msg) = LobbyMessage::parse(&self.line) {
                let preview = msg.data.to_string();
                debug!(
                    "lobby ← {} {}",
                    msg.command,
                    &preview[..preview.len().min(200)]
                );
                return Ok(msg);
            }
        }
    }
}
