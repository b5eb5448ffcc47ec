//! Session integration tests over in-memory transports
//!
//! Each test drives a full `SessionRunner` through a duplex pipe, with the
//! real lobby and engine services behind it (the engine binary is `true`,
//! which exits immediately; the lobby talks to an in-process stub server).

use game_manager::session::SessionRunner;
use gm_engine::{spawn_engine_service, SupervisorPaths};
use gm_lobby::spawn_lobby_service;
use gm_lobby::LobbyMessage;
use gm_mux::MuxConnection;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpListener;

struct TestClient {
    writer: tokio::io::WriteHalf<tokio::io::DuplexStream>,
    reader: BufReader<tokio::io::ReadHalf<tokio::io::DuplexStream>>,
    _tmp: tempfile::TempDir,
}

impl TestClient {
    async fn send(&mut self, value: serde_json::Value) {
        let mut line = value.to_string();
        line.push('\n');
        self.writer.write_all(line.as_bytes()).await.unwrap();
    }

    /// Read the next frame; None on EOF.
    async fn recv(&mut self) -> Option<serde_json::Value> {
        let mut line = String::new();
        let n = self.reader.read_line(&mut line).await.unwrap();
        if n == 0 {
            return None;
        }
        Some(serde_json::from_str(line.trim()).unwrap())
    }

    /// Read frames until the response for `id` arrives, returning it and any
    /// notifications seen on the way.
    async fn recv_response(&mut self, id: i64) -> (serde_json::Value, Vec<serde_json::Value>) {
        let mut notifications = Vec::new();
        loop {
            let frame = self.recv().await.expect("transport closed early");
            if frame.get("id").and_then(|v| v.as_i64()) == Some(id) {
                return (frame, notifications);
            }
            notifications.push(frame);
        }
    }

    /// Read frames until a notification with the given method arrives.
    async fn recv_notification(&mut self, method: &str) -> serde_json::Value {
        loop {
            let frame = self.recv().await.expect("transport closed early");
            if frame.get("method").and_then(|v| v.as_str()) == Some(method) {
                return frame;
            }
        }
    }

    /// Read `channels/incoming` frames until one carries a body of the given
    /// type, returning (channelId, body).
    async fn recv_incoming_of_type(&mut self, body_type: &str) -> (String, serde_json::Value) {
        loop {
            let frame = self.recv_notification("channels/incoming").await;
            let channel = frame["params"]["channelId"].as_str().unwrap().to_string();
            let text = frame["params"]["content"][0]["text"].as_str().unwrap();
            let body: serde_json::Value = serde_json::from_str(text).unwrap();
            if body["type"] == body_type {
                return (channel, body);
            }
        }
    }

    async fn initialize(&mut self, feature_sets: &[&str], channels: bool) {
        self.send(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2024-11-05",
                "capabilities": {
                    "featureSets": feature_sets,
                    "channels": channels,
                }
            }
        }))
        .await;
        let (response, _) = self.recv_response(1).await;
        assert!(response.get("result").is_some());
    }
}

fn spawn_session() -> TestClient {
    let tmp = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(tmp.path().join("home")).unwrap();

    let (client, server) = tokio::io::duplex(64 * 1024);
    let (server_read, server_write) = tokio::io::split(server);
    let conn = MuxConnection::from_parts(Box::new(server_read), Box::new(server_write));

    let (lobby, lobby_events) = spawn_lobby_service();
    let mut paths = SupervisorPaths::new(
        PathBuf::from("true"),
        tmp.path().join("home"),
        tmp.path().join("instances"),
    );
    paths.socket_dir = tmp.path().to_path_buf();
    let (engine, engine_notices) = spawn_engine_service(paths);

    let runner =
        SessionRunner::new(conn, lobby, lobby_events, engine, engine_notices).unwrap();
    tokio::spawn(runner.run());

    let (client_read, client_write) = tokio::io::split(client);
    TestClient {
        writer: client_write,
        reader: BufReader::new(client_read),
        _tmp: tmp,
    }
}

#[tokio::test]
async fn test_initialize_advertises_feature_sets() {
    let mut client = spawn_session();
    client
        .send(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": {
                "protocolVersion": "2024-11-05",
                "capabilities": { "featureSets": ["lobby", "game"], "channels": true }
            }
        }))
        .await;

    let (response, _) = client.recv_response(1).await;
    let sets = response["result"]["capabilities"]["featureSets"]
        .as_array()
        .unwrap();
    assert_eq!(sets.len(), 2);
    let names: Vec<&str> = sets.iter().map(|s| s["name"].as_str().unwrap()).collect();
    assert!(names.contains(&"lobby"));
    assert!(names.contains(&"game"));
    assert_eq!(response["result"]["capabilities"]["channels"], true);
}

#[tokio::test]
async fn test_requests_before_initialize_are_protocol_errors() {
    let mut client = spawn_session();
    client
        .send(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 5,
            "method": "tools/list"
        }))
        .await;
    let (response, _) = client.recv_response(5).await;
    assert_eq!(response["error"]["data"]["code"], "protocol");
}

#[tokio::test]
async fn test_tools_list_filters_by_acked_sets() {
    let mut client = spawn_session();
    client.initialize(&["lobby"], true).await;

    client
        .send(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "tools/list"
        }))
        .await;
    let (response, _) = client.recv_response(2).await;
    let names: Vec<&str> = response["result"]["tools"]
        .as_array()
        .unwrap()
        .iter()
        .map(|t| t["name"].as_str().unwrap())
        .collect();
    assert!(names.contains(&"lobby_connect"));
    assert!(names.contains(&"lobby_start_game"));
    // The game set was not acknowledged.
    assert!(!names.contains(&"channel_list"));

    // Calling a suppressed tool fails without leaking its existence.
    client
        .send(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "tools/call",
            "params": { "name": "channel_list", "arguments": {} }
        }))
        .await;
    let (response, _) = client.recv_response(3).await;
    assert_eq!(response["error"]["data"]["code"], "validation");
}

#[tokio::test]
async fn test_legacy_client_tools_only() {
    // A client that never mentions channels still gets the tool surface.
    let mut client = spawn_session();
    client
        .send(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": "initialize",
            "params": { "protocolVersion": "2024-11-05", "capabilities": {} }
        }))
        .await;
    client.recv_response(1).await;

    client
        .send(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "tools/call",
            "params": { "name": "lobby_list_battles", "arguments": {} }
        }))
        .await;
    let (response, _) = client.recv_response(2).await;
    // Tracked state is empty but the tool itself succeeds.
    assert_eq!(response["result"]["isError"], false);
    let text = response["result"]["content"][0]["text"].as_str().unwrap();
    assert_eq!(text, "[]");

    // Channel-owning tools report that the channels extension is required.
    client
        .send(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "tools/call",
            "params": { "name": "lobby_start_game", "arguments": { "map": "SimpleChess" } }
        }))
        .await;
    let (response, _) = client.recv_response(3).await;
    assert_eq!(response["error"]["data"]["code"], "channels-required");
}

#[tokio::test]
async fn test_validation_errors_keep_session() {
    let mut client = spawn_session();
    client.initialize(&["lobby", "game"], true).await;

    // Missing required argument.
    client
        .send(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "tools/call",
            "params": { "name": "lobby_login", "arguments": { "username": "bot" } }
        }))
        .await;
    let (response, _) = client.recv_response(2).await;
    assert_eq!(response["error"]["data"]["code"], "validation");

    // Wrong type.
    client
        .send(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "tools/call",
            "params": { "name": "lobby_say", "arguments": { "target": 42, "text": "hi" } }
        }))
        .await;
    let (response, _) = client.recv_response(3).await;
    assert_eq!(response["error"]["data"]["code"], "validation");

    // The session is still alive.
    client
        .send(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 4,
            "method": "tools/list"
        }))
        .await;
    let (response, _) = client.recv_response(4).await;
    assert!(response.get("result").is_some());
}

#[tokio::test]
async fn test_unknown_method() {
    let mut client = spawn_session();
    client.initialize(&["lobby", "game"], true).await;

    client
        .send(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "tarot/draw"
        }))
        .await;
    let (response, _) = client.recv_response(2).await;
    assert_eq!(response["error"]["code"], -32601);
}

#[tokio::test]
async fn test_publish_on_unknown_channel_is_channel_closed() {
    let mut client = spawn_session();
    client.initialize(&["lobby", "game"], true).await;

    client
        .send(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "channels/publish",
            "params": {
                "channelId": "game:local-99",
                "content": [{ "type": "text", "text": "{\"type\":\"pause\"}" }]
            }
        }))
        .await;
    let (response, _) = client.recv_response(2).await;
    assert_eq!(response["error"]["data"]["code"], "channel-closed");
}

#[tokio::test]
async fn test_checkpoint_requires_rollback_enabled_set() {
    let mut client = spawn_session();
    client.initialize(&["lobby"], true).await;

    client
        .send(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "state/checkpoint",
            "params": { "featureSet": "game", "channelId": "game:local-1" }
        }))
        .await;
    let (response, _) = client.recv_response(2).await;
    assert_eq!(response["error"]["data"]["code"], "validation");
}

#[tokio::test]
async fn test_shutdown_is_graceful() {
    let mut client = spawn_session();
    client.initialize(&["lobby", "game"], true).await;

    client
        .send(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "shutdown"
        }))
        .await;
    let (response, _) = client.recv_response(2).await;
    assert!(response.get("result").is_some());

    // The server side hangs up after the response.
    assert!(client.recv().await.is_none());
}

#[tokio::test]
async fn test_start_game_opens_channel_before_response() {
    let mut client = spawn_session();
    client.initialize(&["lobby", "game"], true).await;

    client
        .send(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "tools/call",
            "params": { "name": "lobby_start_game", "arguments": { "map": "SimpleChess" } }
        }))
        .await;

    let (response, notifications) = client.recv_response(2).await;
    let text = response["result"]["content"][0]["text"].as_str().unwrap();
    let payload: serde_json::Value = serde_json::from_str(text).unwrap();
    assert_eq!(payload["success"], true);
    let channel_id = payload["channelId"].as_str().unwrap().to_string();
    assert!(channel_id.starts_with("game:local-"));

    // channels/changed with the addition was enqueued before the response.
    let changed = notifications
        .iter()
        .find(|n| n["method"] == "channels/changed")
        .expect("expected a channels/changed before the response");
    assert_eq!(changed["params"]["added"][0]["id"], channel_id);

    // The fake engine (`true`) exits at once without a handshake, so the
    // channel is removed with an engine error payload.
    let removal = client.recv_notification("channels/changed").await;
    assert_eq!(removal["params"]["removed"][0]["id"], channel_id);
    assert_eq!(removal["params"]["removed"][0]["error"]["code"], "engine");

    // Publishing after the removal is channel-closed.
    client
        .send(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "channels/publish",
            "params": {
                "channelId": channel_id,
                "content": [{ "type": "text", "text": "{\"type\":\"pause\"}" }]
            }
        }))
        .await;
    let (response, _) = client.recv_response(3).await;
    assert_eq!(response["error"]["data"]["code"], "channel-closed");
}

/// A stub lobby server good enough for connect/login/join/say flows.
async fn stub_lobby_server(listener: TcpListener) {
    let (stream, _) = listener.accept().await.unwrap();
    let (read_half, mut write_half) = stream.into_split();
    let mut reader = BufReader::new(read_half);

    write_half
        .write_all(b"Welcome {\"Engine\":\"105.1\",\"Game\":\"Test\",\"UserCount\":2}\n")
        .await
        .unwrap();

    let mut line = String::new();
    loop {
        line.clear();
        if reader.read_line(&mut line).await.unwrap() == 0 {
            break;
        }
        let msg = match LobbyMessage::parse(&line) {
            Some(msg) => msg,
            None => continue,
        };
        match msg.command.as_str() {
            "Login" => {
                let name = msg.data["Name"].as_str().unwrap_or("").to_string();
                let reply =
                    format!("LoginResponse {{\"ResultCode\":0,\"Name\":\"{}\"}}\n", name);
                write_half.write_all(reply.as_bytes()).await.unwrap();
            }
            "JoinChannel" => {
                let channel = msg.data["ChannelName"].as_str().unwrap_or("").to_string();
                let reply = format!(
                    "JoinChannelResponse {{\"ChannelName\":\"{}\",\"Success\":true,\"Channel\":{{\"Users\":[\"gm-bot\"]}}}}\n",
                    channel
                );
                write_half.write_all(reply.as_bytes()).await.unwrap();
            }
            "Say" => {
                // Echo the chat line back, as the real server does.
                let mut data = msg.data.clone();
                data["User"] = serde_json::json!("gm-bot");
                let reply = format!("{}\n", LobbyMessage::new("Say", data));
                write_half.write_all(reply.as_bytes()).await.unwrap();
            }
            _ => {}
        }
    }
}

#[tokio::test]
async fn test_lobby_chat_roundtrip() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(stub_lobby_server(listener));

    let mut client = spawn_session();
    client.initialize(&["lobby", "game"], true).await;

    // Connect: the global lobby channel opens.
    client
        .send(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 2,
            "method": "tools/call",
            "params": {
                "name": "lobby_connect",
                "arguments": { "host": addr.ip().to_string(), "port": addr.port() }
            }
        }))
        .await;
    let (response, notifications) = client.recv_response(2).await;
    assert_eq!(response["result"]["isError"], false);
    assert!(notifications
        .iter()
        .any(|n| n["method"] == "channels/changed"
            && n["params"]["added"][0]["id"] == "lobby"));

    // Login outcome arrives as channels/incoming on the global stream.
    client
        .send(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 3,
            "method": "tools/call",
            "params": {
                "name": "lobby_login",
                "arguments": { "username": "gm-bot", "password": "pw" }
            }
        }))
        .await;
    client.recv_response(3).await;
    let (channel, body) = client.recv_incoming_of_type("logged_in").await;
    assert_eq!(channel, "lobby");
    assert_eq!(body["username"], "gm-bot");

    // Join a room: channels/changed adds lobby:main.
    client
        .send(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 4,
            "method": "tools/call",
            "params": { "name": "lobby_join_channel", "arguments": { "name": "main" } }
        }))
        .await;
    // The room channel opens when the server confirms the join, which may
    // land before or after the tool response.
    let (_, notifications) = client.recv_response(4).await;
    let changed = match notifications
        .iter()
        .find(|n| n["method"] == "channels/changed")
    {
        Some(n) => n.clone(),
        None => client.recv_notification("channels/changed").await,
    };
    assert_eq!(changed["params"]["added"][0]["id"], "lobby:main");

    // Publish on the room channel; the echoed chat comes back on it.
    client
        .send(serde_json::json!({
            "jsonrpc": "2.0",
            "id": 5,
            "method": "channels/publish",
            "params": { "channelId": "lobby:main", "body": "hello" }
        }))
        .await;
    let (response, _) = client.recv_response(5).await;
    assert_eq!(response["result"]["delivered"], true);

    let (channel, body) = client.recv_incoming_of_type("chat").await;
    assert_eq!(channel, "lobby:main");
    assert_eq!(body["text"], "hello");
    assert_eq!(body["user"], "gm-bot");
}
