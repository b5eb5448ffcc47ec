//! Line-framed JSON connection for the upstream transport
//!
//! One frame per line. Works over any `AsyncRead`/`AsyncWrite` pair, so the
//! same code serves stdio and TCP. Logging stays on stderr; stdout belongs
//! to the transport in stdio mode.
//!
//! `read_line` is not cancellation safe, so the session loop never polls the
//! reader inside a `select!` directly: it splits the connection and drives
//! the `MuxReader` from a dedicated task feeding an mpsc channel.

use crate::rpc::{classify, IncomingMessage, Notification, RequestId, Response};
use gm_core::GmError;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, warn};

/// Read half of a framed upstream connection.
pub struct MuxReader {
    reader: BufReader<Box<dyn AsyncRead + Unpin + Send>>,
    line: String,
}

/// Write half of a framed upstream connection. Single writer per session.
pub struct MuxWriter {
    writer: Box<dyn AsyncWrite + Unpin + Send>,
}

/// A framed upstream connection.
pub struct MuxConnection {
    reader: MuxReader,
    writer: MuxWriter,
}

impl MuxConnection {
    /// Wrap separate read and write halves (stdio, duplex test pipes).
    pub fn from_parts(
        reader: Box<dyn AsyncRead + Unpin + Send>,
        writer: Box<dyn AsyncWrite + Unpin + Send>,
    ) -> Self {
        Self {
            reader: MuxReader {
                reader: BufReader::new(reader),
                line: String::new(),
            },
            writer: MuxWriter { writer },
        }
    }

    /// Wrap a TCP stream.
    pub fn from_tcp(stream: tokio::net::TcpStream) -> Self {
        let (read_half, write_half) = stream.into_split();
        Self::from_parts(Box::new(read_half), Box::new(write_half))
    }

    /// Split into independently owned halves.
    pub fn split(self) -> (MuxReader, MuxWriter) {
        (self.reader, self.writer)
    }

    pub async fn next_message(&mut self) -> Result<IncomingMessage, GmError> {
        self.reader.next_message().await
    }

    pub async fn send_response(&mut self, response: &Response) -> Result<(), GmError> {
        self.writer.send_response(response).await
    }

    pub async fn send_notification(
        &mut self,
        notification: &Notification,
    ) -> Result<(), GmError> {
        self.writer.send_notification(notification).await
    }
}

impl MuxReader {
    /// Read and classify the next frame.
    ///
    /// Returns `Transport` on EOF or socket failure. Unparseable lines are
    /// surfaced as `Protocol` errors so the caller can answer with an error
    /// response and keep the session.
    pub async fn next_message(&mut self) -> Result<IncomingMessage, GmError> {
        loop {
            self.line.clear();
            let bytes = self
                .reader
                .read_line(&mut self.line)
                .await
                .map_err(|e| GmError::Transport(format!("upstream read failed: {}", e)))?;
            if bytes == 0 {
                return Err(GmError::Transport("upstream closed".into()));
            }

            let trimmed = self.line.trim();
            if trimmed.is_empty() {
                continue;
            }
            debug!("upstream ← {}", trimmed);

            let value: serde_json::Value = match serde_json::from_str(trimmed) {
                Ok(v) => v,
                Err(e) => {
                    warn!("dropping malformed upstream frame: {}", e);
                    return Err(GmError::Protocol(format!("invalid JSON frame: {}", e)));
                }
            };
            return classify(value);
        }
    }
}

impl MuxWriter {
    pub async fn send_response(&mut self, response: &Response) -> Result<(), GmError> {
        let json = serde_json::to_string(response)
            .map_err(|e| GmError::Internal(format!("response serialization: {}", e)))?;
        self.write_line(&json).await
    }

    pub async fn send_notification(
        &mut self,
        notification: &Notification,
    ) -> Result<(), GmError> {
        let json = serde_json::to_string(notification)
            .map_err(|e| GmError::Internal(format!("notification serialization: {}", e)))?;
        self.write_line(&json).await
    }

    /// Respond to a failed request from the error taxonomy, keeping the
    /// session alive.
    pub async fn send_error(&mut self, id: RequestId, err: &GmError) -> Result<(), GmError> {
        self.send_response(&Response::from_gm_error(id, err)).await
    }

    async fn write_line(&mut self, json: &str) -> Result<(), GmError> {
        debug!("upstream → {}", json);
        self.writer
            .write_all(json.as_bytes())
            .await
            .map_err(|e| GmError::Transport(format!("upstream write failed: {}", e)))?;
        self.writer
            .write_all(b"\n")
            .await
            .map_err(|e| GmError::Transport(format!("upstream write failed: {}", e)))?;
        self.writer
            .flush()
            .await
            .map_err(|e| GmError::Transport(format!("upstream flush failed: {}", e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::method;

    #[tokio::test]
    async fn test_duplex_roundtrip() {
        let (client, server) = tokio::io::duplex(4096);
        let (client_read, mut client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);

        let mut conn = MuxConnection::from_parts(Box::new(server_read), Box::new(server_write));

        client_write
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"tools/list\"}\n")
            .await
            .unwrap();

        match conn.next_message().await.unwrap() {
            IncomingMessage::Request(req) => assert_eq!(req.method, method::TOOLS_LIST),
            other => panic!("expected request, got {:?}", other),
        }

        conn.send_response(&Response::success(
            RequestId::Number(1),
            serde_json::json!({"tools": []}),
        ))
        .await
        .unwrap();

        let mut reader = BufReader::new(client_read);
        let mut line = String::new();
        reader.read_line(&mut line).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["id"], 1);
        assert_eq!(value["result"]["tools"], serde_json::json!([]));
    }

    #[tokio::test]
    async fn test_malformed_frame_keeps_connection() {
        let (client, server) = tokio::io::duplex(4096);
        let (_client_read, mut client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);

        let mut conn = MuxConnection::from_parts(Box::new(server_read), Box::new(server_write));

        client_write.write_all(b"not json\n").await.unwrap();
        client_write
            .write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"initialized\"}\n")
            .await
            .unwrap();

        // First frame errors as protocol, not transport.
        match conn.next_message().await {
            Err(GmError::Protocol(_)) => {}
            other => panic!("expected protocol error, got {:?}", other),
        }
        // Connection still delivers the next frame.
        match conn.next_message().await.unwrap() {
            IncomingMessage::Notification(n) => assert_eq!(n.method, "initialized"),
            other => panic!("expected notification, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_split_halves_work_independently() {
        let (client, server) = tokio::io::duplex(4096);
        let (client_read, mut client_write) = tokio::io::split(client);
        let (server_read, server_write) = tokio::io::split(server);

        let conn = MuxConnection::from_parts(Box::new(server_read), Box::new(server_write));
        let (mut reader, mut writer) = conn.split();

        client_write
            .write_all(b"{\"jsonrpc\":\"2.0\",\"method\":\"initialized\"}\n")
            .await
            .unwrap();
        assert!(matches!(
            reader.next_message().await.unwrap(),
            IncomingMessage::Notification(_)
        ));

        writer
            .send_notification(&Notification::new(
                method::CHANNELS_CHANGED,
                serde_json::json!({"added": []}),
            ))
            .await
            .unwrap();

        let mut buf_reader = BufReader::new(client_read);
        let mut line = String::new();
        buf_reader.read_line(&mut line).await.unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["method"], "channels/changed");
    }
}
