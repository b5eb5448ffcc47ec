//! Lobby service task
//!
//! The connection and tracked state are owned by a single task and mutated
//! only through its inbox; callers hold a cloneable `LobbyHandle`. Push
//! events flow out on a separate channel for the session layer to forward.
//!
//! Send-style requests (login, say, join) resolve when the command is on the
//! wire; outcomes arrive later as push events. Reconnect is explicit: a new
//! `Connect` drops any previous connection and starts from empty state.

use crate::client::{AuthState, LobbyClient};
use crate::protocol::*;
use crate::state::{LobbyEvent, LobbyState};
use gm_core::GmError;
use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

type Reply<T> = oneshot::Sender<Result<T, GmError>>;

/// Requests accepted by the lobby service.
pub enum LobbyRequest {
    Connect { host: String, port: u16, reply: Reply<()> },
    Disconnect { reply: Reply<()> },
    Login { username: String, password: String, reply: Reply<()> },
    Register { username: String, password: String, email: String, reply: Reply<()> },
    Say { target: String, text: String, place: i32, reply: Reply<()> },
    JoinChannel { name: String, reply: Reply<()> },
    LeaveChannel { name: String, reply: Reply<()> },
    JoinBattle { battle_id: i64, password: String, reply: Reply<()> },
    LeaveBattle { reply: Reply<()> },
    MatchmakerJoin { queues: Vec<String>, reply: Reply<()> },
    MatchmakerLeave { reply: Reply<()> },
    MatchmakerAccept { ready: bool, reply: Reply<()> },
    MatchmakerStatus { reply: Reply<serde_json::Value> },
    ListBattles { reply: Reply<serde_json::Value> },
    ListUsers { limit: usize, reply: Reply<serde_json::Value> },
    Shutdown,
}

/// Cloneable handle to the lobby service task.
#[derive(Clone)]
pub struct LobbyHandle {
    tx: mpsc::Sender<LobbyRequest>,
}

impl LobbyHandle {
    pub async fn request(&self, req: LobbyRequest) -> Result<(), GmError> {
        self.tx
            .send(req)
            .await
            .map_err(|_| GmError::Internal("lobby service gone".into()))
    }
}

/// Spawn the lobby service. Returns the handle and the push-event stream.
pub fn spawn_lobby_service() -> (LobbyHandle, mpsc::Receiver<LobbyEvent>) {
    let (tx, rx) = mpsc::channel(64);
    let (event_tx, event_rx) = mpsc::channel(256);
    tokio::spawn(lobby_service(rx, event_tx));
    (LobbyHandle { tx }, event_rx)
}

struct LobbyService {
    client: Option<LobbyClient>,
    state: LobbyState,
    event_tx: mpsc::Sender<LobbyEvent>,
}

async fn lobby_service(
    mut inbox: mpsc::Receiver<LobbyRequest>,
    event_tx: mpsc::Sender<LobbyEvent>,
) {
    let mut svc = LobbyService {
        client: None,
        state: LobbyState::new(),
        event_tx,
    };

    loop {
        let incoming = async {
            match &mut svc.client {
                Some(client) => client.recv().await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            req = inbox.recv() => {
                match req {
                    Some(LobbyRequest::Shutdown) | None => break,
                    Some(req) => svc.handle_request(req).await,
                }
            }
            result = incoming => {
                match result {
                    Ok(msg) => svc.handle_message(msg).await,
                    Err(e) => {
                        error!("lobby connection lost: {}", e);
                        svc.client = None;
                        svc.state = LobbyState::new();
                        svc.emit(LobbyEvent::Disconnected { reason: e.to_string() }).await;
                    }
                }
            }
        }
    }
    info!("lobby service stopped");
}

impl LobbyService {
    async fn emit(&self, event: LobbyEvent) {
        if self.event_tx.send(event).await.is_err() {
            warn!("lobby event receiver dropped");
        }
    }

    fn connected(&mut self) -> Result<&mut LobbyClient, GmError> {
        self.client
            .as_mut()
            .ok_or_else(|| GmError::Transport("not connected to lobby".into()))
    }

    fn authenticated(&mut self) -> Result<&mut LobbyClient, GmError> {
        if !self.state.logged_in {
            return Err(GmError::Auth("not logged in".into()));
        }
        self.connected()
    }

    async fn handle_message(&mut self, msg: LobbyMessage) {
        // Keepalive is answered transparently.
        if msg.command == "Ping" {
            if let Some(client) = &mut self.client {
                if let Err(e) = client.send(&LobbyMessage::new("Ping", serde_json::json!({}))).await
                {
                    error!("lobby ping reply failed: {}", e);
                }
            }
            return;
        }

        for event in self.state.apply(&msg) {
            if let LobbyEvent::LoggedIn { .. } = &event {
                if let Some(client) = &mut self.client {
                    client.auth = AuthState::Authenticated;
                }
            }
            self.emit(event).await;
        }
    }

    async fn handle_request(&mut self, req: LobbyRequest) {
        match req {
            LobbyRequest::Connect { host, port, reply } => {
                // Explicit reconnect: previous connection and state are gone.
                self.client = None;
                self.state = LobbyState::new();
                let result = LobbyClient::connect(&host, port).await.map(|client| {
                    self.client = Some(client);
                });
                let _ = reply.send(result);
            }
            LobbyRequest::Disconnect { reply } => {
                self.client = None;
                self.state = LobbyState::new();
                let _ = reply.send(Ok(()));
            }
            LobbyRequest::Login { username, password, reply } => {
                let cmd = LoginCommand {
                    name: username,
                    password_hash: hash_password(&password),
                    user_id: 0,
                    install_id: 0,
                    lobby_version: 0,
                    steam_auth_token: String::new(),
                    dlc: String::new(),
                };
                let result = match self.connected() {
                    Ok(client) => client.send_command("Login", &cmd).await,
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            LobbyRequest::Register { username, password, email, reply } => {
                let cmd = RegisterCommand {
                    name: username,
                    password_hash: hash_password(&password),
                    email,
                    user_id: 0,
                    install_id: String::new(),
                    steam_auth_token: String::new(),
                    dlc: String::new(),
                };
                let result = match self.connected() {
                    Ok(client) => client.send_command("Register", &cmd).await,
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            LobbyRequest::Say { target, text, place, reply } => {
                let cmd = SayCommand {
                    place,
                    target,
                    text,
                    is_emote: false,
                };
                let result = match self.authenticated() {
                    Ok(client) => client.send_command("Say", &cmd).await,
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            LobbyRequest::JoinChannel { name, reply } => {
                let cmd = JoinChannelCommand {
                    channel_name: name,
                    password: String::new(),
                };
                let result = match self.authenticated() {
                    Ok(client) => client.send_command("JoinChannel", &cmd).await,
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            LobbyRequest::LeaveChannel { name, reply } => {
                let cmd = LeaveChannelCommand {
                    channel_name: name.clone(),
                };
                let result = match self.authenticated() {
                    Ok(client) => client.send_command("LeaveChannel", &cmd).await,
                    Err(e) => Err(e),
                };
                if result.is_ok() {
                    self.state.channels.remove(&name);
                }
                let _ = reply.send(result);
            }
            LobbyRequest::JoinBattle { battle_id, password, reply } => {
                let cmd = JoinBattleCommand {
                    battle_id,
                    password,
                };
                let result = match self.authenticated() {
                    Ok(client) => client.send_command("JoinBattle", &cmd).await,
                    Err(e) => Err(e),
                };
                if result.is_ok() {
                    self.state.my_battle = Some(battle_id);
                }
                let _ = reply.send(result);
            }
            LobbyRequest::LeaveBattle { reply } => {
                let cmd = LeaveBattleCommand { battle_id: None };
                let result = match self.authenticated() {
                    Ok(client) => client.send_command("LeaveBattle", &cmd).await,
                    Err(e) => Err(e),
                };
                if result.is_ok() {
                    self.state.my_battle = None;
                }
                let _ = reply.send(result);
            }
            LobbyRequest::MatchmakerJoin { queues, reply } => {
                let cmd = MatchMakerQueueRequestCommand { queues };
                let result = match self.authenticated() {
                    Ok(client) => client.send_command("MatchMakerQueueRequest", &cmd).await,
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            LobbyRequest::MatchmakerLeave { reply } => {
                let cmd = MatchMakerQueueRequestCommand { queues: vec![] };
                let result = match self.authenticated() {
                    Ok(client) => client.send_command("MatchMakerQueueRequest", &cmd).await,
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            LobbyRequest::MatchmakerAccept { ready, reply } => {
                let cmd = AreYouReadyResponseCommand { ready };
                let result = match self.authenticated() {
                    Ok(client) => client.send_command("AreYouReadyResponse", &cmd).await,
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            LobbyRequest::MatchmakerStatus { reply } => {
                let mm = &self.state.matchmaker;
                let _ = reply.send(Ok(serde_json::json!({
                    "possibleQueues": mm.possible_queues,
                    "joinedQueues": mm.joined_queues,
                    "queueCounts": mm.queue_counts,
                })));
            }
            LobbyRequest::ListBattles { reply } => {
                let battles: Vec<serde_json::Value> = self
                    .state
                    .battles
                    .values()
                    .map(|b| {
                        serde_json::json!({
                            "id": b.battle_id,
                            "title": b.title,
                            "founder": b.founder,
                            "map": b.map,
                            "players": b.player_count,
                            "maxPlayers": b.max_players,
                            "spectators": b.spectator_count,
                            "running": b.is_running,
                            "passwordProtected": b.is_password_protected,
                            "mode": b.mode,
                        })
                    })
                    .collect();
                let _ = reply.send(Ok(serde_json::Value::Array(battles)));
            }
            LobbyRequest::ListUsers { limit, reply } => {
                let total = self.state.users.len();
                let users: Vec<serde_json::Value> = self
                    .state
                    .users
                    .values()
                    .take(limit)
                    .map(|u| {
                        serde_json::json!({
                            "name": u.name,
                            "level": u.level,
                            "elo": u.elo,
                            "clan": u.clan,
                            "country": u.country,
                            "isBot": u.is_bot,
                            "isAdmin": u.is_admin,
                            "battleId": u.battle_id,
                        })
                    })
                    .collect();
                let _ = reply.send(Ok(serde_json::json!({
                    "total": total,
                    "users": users,
                })));
            }
            LobbyRequest::Shutdown => unreachable!("handled by the service loop"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    /// A stub lobby server: greets, accepts any login, echoes Say as chat.
    async fn stub_lobby_server(listener: TcpListener) {
        let (stream, _) = listener.accept().await.unwrap();
        let (read_half, mut write_half) = stream.into_split();
        let mut reader = BufReader::new(read_half);

        write_half
            .write_all(b"Welcome {\"Engine\":\"105.1\",\"Game\":\"Test\",\"UserCount\":1}\n")
            .await
            .unwrap();

        let mut line = String::new();
        loop {
            line.clear();
            if reader.read_line(&mut line).await.unwrap() == 0 {
                break;
            }
            let msg = LobbyMessage::parse(&line).unwrap();
            match msg.command.as_str() {
                "Login" => {
                    let name = msg.data["Name"].as_str().unwrap_or("").to_string();
                    let reply = format!(
                        "LoginResponse {{\"ResultCode\":0,\"Name\":\"{}\"}}\n",
                        name
                    );
                    write_half.write_all(reply.as_bytes()).await.unwrap();
                }
                "Say" => {
                    let reply = format!("{}\n", LobbyMessage::new("Say", msg.data));
                    write_half.write_all(reply.as_bytes()).await.unwrap();
                }
                _ => {}
            }
        }
    }

    #[tokio::test]
    async fn test_connect_login_say_roundtrip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(stub_lobby_server(listener));

        let (handle, mut events) = spawn_lobby_service();

        let (tx, rx) = oneshot::channel();
        handle
            .request(LobbyRequest::Connect {
                host: addr.ip().to_string(),
                port: addr.port(),
                reply: tx,
            })
            .await
            .unwrap();
        rx.await.unwrap().unwrap();

        // Greeting arrives as a push event.
        match events.recv().await.unwrap() {
            LobbyEvent::Connected { engine, .. } => assert_eq!(engine, "105.1"),
            other => panic!("expected Connected, got {:?}", other),
        }

        let (tx, rx) = oneshot::channel();
        handle
            .request(LobbyRequest::Login {
                username: "bot".into(),
                password: "pw".into(),
                reply: tx,
            })
            .await
            .unwrap();
        rx.await.unwrap().unwrap();

        match events.recv().await.unwrap() {
            LobbyEvent::LoggedIn { username } => assert_eq!(username, "bot"),
            other => panic!("expected LoggedIn, got {:?}", other),
        }

        let (tx, rx) = oneshot::channel();
        handle
            .request(LobbyRequest::Say {
                target: "main".into(),
                text: "hi".into(),
                place: PLACE_CHANNEL,
                reply: tx,
            })
            .await
            .unwrap();
        rx.await.unwrap().unwrap();

        match events.recv().await.unwrap() {
            LobbyEvent::ChatMessage { text, target, .. } => {
                assert_eq!(text, "hi");
                assert_eq!(target, "main");
            }
            other => panic!("expected ChatMessage, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_requests_fail_before_connect() {
        let (handle, _events) = spawn_lobby_service();

        let (tx, rx) = oneshot::channel();
        handle
            .request(LobbyRequest::Login {
                username: "bot".into(),
                password: "pw".into(),
                reply: tx,
            })
            .await
            .unwrap();
        match rx.await.unwrap() {
            Err(GmError::Transport(_)) => {}
            other => panic!("expected transport error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_say_requires_login() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(stub_lobby_server(listener));

        let (handle, _events) = spawn_lobby_service();

        let (tx, rx) = oneshot::channel();
        handle
            .request(LobbyRequest::Connect {
                host: addr.ip().to_string(),
                port: addr.port(),
                reply: tx,
            })
            .await
            .unwrap();
        rx.await.unwrap().unwrap();

        let (tx, rx) = oneshot::channel();
        handle
            .request(LobbyRequest::Say {
                target: "main".into(),
                text: "hi".into(),
                place: PLACE_CHANNEL,
                reply: tx,
            })
            .await
            .unwrap();
        match rx.await.unwrap() {
            Err(GmError::Auth(_)) => {}
            other => panic!("expected auth error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_disconnect_clears_state() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(stub_lobby_server(listener));

        let (handle, mut events) = spawn_lobby_service();

        let (tx, rx) = oneshot::channel();
        handle
            .request(LobbyRequest::Connect {
                host: addr.ip().to_string(),
                port: addr.port(),
                reply: tx,
            })
            .await
            .unwrap();
        rx.await.unwrap().unwrap();
        let _ = events.recv().await; // Welcome

        let (tx, rx) = oneshot::channel();
        handle
            .request(LobbyRequest::Disconnect { reply: tx })
            .await
            .unwrap();
        rx.await.unwrap().unwrap();

        // After disconnect the model is empty: no battles listed.
        let (tx, rx) = oneshot::channel();
        handle
            .request(LobbyRequest::ListBattles { reply: tx })
            .await
            .unwrap();
        let battles = rx.await.unwrap().unwrap();
        assert_eq!(battles, serde_json::json!([]));
    }
}
