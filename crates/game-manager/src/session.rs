//! The session event loop
//!
//! One `SessionRunner` per upstream connection. The loop owns the transport
//! writer and the channel table; spawned tool handlers report back through
//! an ordered outgoing queue, which is what guarantees that side-effect
//! notifications are enqueued before the response that triggered them.

use crate::tools::{dispatch_tool, start_game, tool_defs, ToolCtx};
use gm_core::{ChannelDescriptor, ChannelId, ChannelKind, GameEvent, GmError};
use gm_engine::{EngineHandle, EngineNotice, EngineRequest};
use gm_lobby::{LobbyEvent, LobbyHandle, LobbyRequest};
use gm_mux::rpc::method;
use gm_mux::session::ChannelOwner;
use gm_mux::{
    IncomingMessage, MuxConnection, MuxWriter, Notification, Request, Response, Session,
    ToolRegistry,
};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

/// Default deadline for a tool invocation; `params.timeoutMs` overrides.
const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(60);

/// How the session ended, mapped to the process exit code.
#[derive(Debug, PartialEq, Eq)]
pub enum SessionEnd {
    /// `shutdown` request honored.
    Graceful,
    /// Upstream transport died without a shutdown.
    TransportLost,
}

/// Items on the ordered outgoing queue.
pub enum Outgoing {
    /// Open a channel in the table and announce it.
    OpenChannel {
        id: ChannelId,
        kind: ChannelKind,
        /// Lobby room name; None for the global lobby stream or games.
        room: Option<String>,
        descriptor: ChannelDescriptor,
    },
    /// Remove a channel, announcing the removal (with an error payload when
    /// the resource failed).
    CloseChannel {
        id: ChannelId,
        error: Option<serde_json::Value>,
    },
    Notification(Notification),
    Response(Response),
}

enum Flow {
    Continue,
    Stop,
}

pub struct SessionRunner {
    writer: MuxWriter,
    /// Frames from the dedicated reader task (read_line is not cancel safe,
    /// so it never sits in the select below).
    frames: mpsc::Receiver<Result<IncomingMessage, GmError>>,
    session: Session,
    registry: ToolRegistry,
    lobby: LobbyHandle,
    lobby_events: mpsc::Receiver<LobbyEvent>,
    engine: EngineHandle,
    engine_notices: mpsc::Receiver<EngineNotice>,
    out_tx: mpsc::Sender<Outgoing>,
    out_rx: mpsc::Receiver<Outgoing>,
}

impl SessionRunner {
    pub fn new(
        conn: MuxConnection,
        lobby: LobbyHandle,
        lobby_events: mpsc::Receiver<LobbyEvent>,
        engine: EngineHandle,
        engine_notices: mpsc::Receiver<EngineNotice>,
    ) -> Result<Self, GmError> {
        let (mut reader, writer) = conn.split();
        let (frame_tx, frames) = mpsc::channel(64);
        tokio::spawn(async move {
            loop {
                let msg = reader.next_message().await;
                let fatal = matches!(&msg, Err(GmError::Transport(_)));
                if frame_tx.send(msg).await.is_err() || fatal {
                    break;
                }
            }
        });

        let (out_tx, out_rx) = mpsc::channel(256);
        Ok(Self {
            writer,
            frames,
            session: Session::new(),
            registry: ToolRegistry::new(tool_defs())?,
            lobby,
            lobby_events,
            engine,
            engine_notices,
            out_tx,
            out_rx,
        })
    }

    pub async fn run(mut self) -> SessionEnd {
        loop {
            let step = tokio::select! {
                frame = self.frames.recv() => {
                    match frame {
                        Some(Ok(IncomingMessage::Request(req))) => {
                            self.handle_request(req).await
                        }
                        Some(Ok(IncomingMessage::Notification(notif))) => {
                            self.handle_notification(notif);
                            Ok(Flow::Continue)
                        }
                        // A malformed frame keeps the session; there is no
                        // id to answer, so it is only logged.
                        Some(Err(GmError::Protocol(e))) => {
                            warn!("dropped malformed upstream frame: {}", e);
                            Ok(Flow::Continue)
                        }
                        Some(Err(e)) => {
                            info!("upstream transport ended: {}", e);
                            return SessionEnd::TransportLost;
                        }
                        None => return SessionEnd::TransportLost,
                    }
                }
                Some(out) = self.out_rx.recv() => {
                    self.apply_outgoing(out).await.map(|_| Flow::Continue)
                }
                Some(event) = self.lobby_events.recv() => {
                    self.handle_lobby_event(event).await.map(|_| Flow::Continue)
                }
                Some(notice) = self.engine_notices.recv() => {
                    self.handle_engine_notice(notice).await.map(|_| Flow::Continue)
                }
            };

            match step {
                Ok(Flow::Continue) => {}
                Ok(Flow::Stop) => return SessionEnd::Graceful,
                Err(e) => {
                    info!("session ended: {}", e);
                    return SessionEnd::TransportLost;
                }
            }
        }
    }

    // ── Requests ──

    async fn handle_request(&mut self, req: Request) -> Result<Flow, GmError> {
        if !self.session.initialized() && req.method != method::INITIALIZE {
            let err = GmError::Protocol(format!("{} before initialize", req.method));
            self.writer.send_error(req.id, &err).await?;
            return Ok(Flow::Continue);
        }

        match req.method.as_str() {
            method::INITIALIZE => self.handle_initialize(req).await?,
            method::TOOLS_LIST => self.handle_tools_list(req).await?,
            method::TOOLS_CALL => self.handle_tools_call(req).await?,
            method::CHANNELS_OPEN => self.handle_channels_open(req).await?,
            method::CHANNELS_CLOSE => self.handle_channels_close(req).await?,
            method::CHANNELS_LIST => self.handle_channels_list(req).await?,
            method::CHANNELS_PUBLISH => self.handle_channels_publish(req).await?,
            method::STATE_CHECKPOINT => self.handle_checkpoint(req).await?,
            method::STATE_ROLLBACK => self.handle_rollback(req).await?,
            method::SHUTDOWN => {
                self.writer
                    .send_response(&Response::success(req.id, serde_json::json!({})))
                    .await?;
                info!("shutdown requested");
                return Ok(Flow::Stop);
            }
            other => {
                warn!("unknown method: {}", other);
                self.writer
                    .send_response(&Response::error(
                        req.id,
                        -32601,
                        format!("Method not found: {}", other),
                    ))
                    .await?;
            }
        }
        Ok(Flow::Continue)
    }

    fn handle_notification(&mut self, notif: Notification) {
        match notif.method.as_str() {
            method::INITIALIZED => debug!("client initialized"),
            other => debug!("unhandled notification: {}", other),
        }
    }

    async fn handle_initialize(&mut self, req: Request) -> Result<(), GmError> {
        self.session.negotiate(&req.params);
        let sets = self.session.advertised_sets();
        let result = serde_json::json!({
            "protocolVersion": "2024-11-05",
            "serverInfo": {
                "name": env!("CARGO_PKG_NAME"),
                "version": env!("CARGO_PKG_VERSION"),
            },
            "capabilities": {
                "tools": {},
                "channels": true,
                "featureSets": sets,
            }
        });
        self.writer
            .send_response(&Response::success(req.id, result))
            .await
    }

    async fn handle_tools_list(&mut self, req: Request) -> Result<(), GmError> {
        let session = &self.session;
        let tools = serde_json::json!({
            "tools": self
                .registry
                .visible(|set| session.set_acknowledged(set))
                .collect::<Vec<_>>(),
        });
        self.writer
            .send_response(&Response::success(req.id, tools))
            .await
    }

    async fn handle_tools_call(&mut self, req: Request) -> Result<(), GmError> {
        let name = req
            .params
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let arguments = req
            .params
            .get("arguments")
            .cloned()
            .unwrap_or(serde_json::Value::Null);

        let session = &self.session;
        let tool = match self
            .registry
            .resolve(&name, |set| session.set_acknowledged(set))
        {
            Ok(tool) => tool,
            Err(e) => {
                self.writer.send_error(req.id, &e).await?;
                return Ok(());
            }
        };

        // Channel-owning tools need the channels extension.
        if tool.opens_channel {
            if let Err(e) = self.session.require_channels(&name) {
                self.writer.send_error(req.id, &e).await?;
                return Ok(());
            }
        }

        let args = match gm_mux::tools::validate_args(&tool.input_schema, &arguments) {
            Ok(args) => args,
            Err(e) => {
                self.writer.send_error(req.id, &e).await?;
                return Ok(());
            }
        };

        let timeout = req
            .params
            .get("timeoutMs")
            .and_then(|v| v.as_u64())
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_TOOL_TIMEOUT);

        let ctx = ToolCtx {
            lobby: self.lobby.clone(),
            engine: self.engine.clone(),
            out: self.out_tx.clone(),
            channels_extension: self.session.channels_extension(),
        };
        let out = self.out_tx.clone();
        let id = req.id;

        // Handlers run concurrently with other requests on this session;
        // hitting the deadline cancels the task.
        tokio::spawn(async move {
            let outgoing = match tokio::time::timeout(timeout, dispatch_tool(&name, args, ctx))
                .await
            {
                Ok(Ok(value)) => Outgoing::Response(Response::success(id, tool_envelope(value))),
                Ok(Err(e)) => Outgoing::Response(Response::from_gm_error(id, &e)),
                Err(_) => Outgoing::Response(Response::from_gm_error(
                    id,
                    &GmError::Transport(format!("tool '{}' deadline exceeded", name)),
                )),
            };
            let _ = out.send(outgoing).await;
        });
        Ok(())
    }

    async fn handle_channels_open(&mut self, req: Request) -> Result<(), GmError> {
        if let Err(e) = self.session.require_channels("channels/open") {
            return self.writer.send_error(req.id, &e).await;
        }
        let address = req.params.get("address").cloned().unwrap_or_default();
        let args = serde_json::json!({
            "map": address.get("map").and_then(|v| v.as_str()).unwrap_or("SimpleChess"),
            "game": address.get("game").and_then(|v| v.as_str()).unwrap_or("Zero-K v1.12.1.0"),
            "opponent": address.get("opponent").and_then(|v| v.as_str()).unwrap_or("NullAI"),
            "headless": true,
        });

        let ctx = ToolCtx {
            lobby: self.lobby.clone(),
            engine: self.engine.clone(),
            out: self.out_tx.clone(),
            channels_extension: true,
        };
        let out = self.out_tx.clone();
        let id = req.id;
        tokio::spawn(async move {
            let outgoing = match start_game(args, ctx).await {
                Ok(value) => Outgoing::Response(Response::success(id, value)),
                Err(e) => Outgoing::Response(Response::from_gm_error(id, &e)),
            };
            let _ = out.send(outgoing).await;
        });
        Ok(())
    }

    async fn handle_channels_close(&mut self, req: Request) -> Result<(), GmError> {
        let id = match req.params.get("channelId").and_then(|v| v.as_str()) {
            Some(id) => ChannelId::from(id),
            None => {
                let err = GmError::Validation("missing channelId".into());
                return self.writer.send_error(req.id, &err).await;
            }
        };

        let result = self.close_channel_resource(&id).await;
        match result {
            Ok(()) => {
                self.apply_outgoing(Outgoing::CloseChannel { id, error: None })
                    .await?;
                self.writer
                    .send_response(&Response::success(
                        req.id,
                        serde_json::json!({ "closed": true }),
                    ))
                    .await
            }
            Err(e) => self.writer.send_error(req.id, &e).await,
        }
    }

    /// Tear down the resource behind a channel (engine stop or lobby part).
    async fn close_channel_resource(&mut self, id: &ChannelId) -> Result<(), GmError> {
        let entry = self.session.channel(id)?;
        match &entry.owner {
            ChannelOwner::Engine => {
                let (tx, rx) = oneshot::channel();
                self.engine
                    .request(EngineRequest::StopGame {
                        channel_id: id.clone(),
                        reply: tx,
                    })
                    .await?;
                rx.await
                    .map_err(|_| GmError::Internal("engine reply dropped".into()))?
            }
            ChannelOwner::Lobby(room) if !room.is_empty() => {
                let (tx, rx) = oneshot::channel();
                self.lobby
                    .request(LobbyRequest::LeaveChannel {
                        name: room.clone(),
                        reply: tx,
                    })
                    .await?;
                rx.await
                    .map_err(|_| GmError::Internal("lobby reply dropped".into()))?
            }
            // The global lobby stream has no backing resource to release.
            ChannelOwner::Lobby(_) => Ok(()),
            ChannelOwner::Replay(_) => Ok(()),
        }
    }

    async fn handle_channels_list(&mut self, req: Request) -> Result<(), GmError> {
        let channels: Vec<serde_json::Value> = self
            .session
            .open_channels()
            .map(|(id, entry)| {
                serde_json::json!({
                    "id": id,
                    "kind": entry.kind,
                    "state": entry.state,
                })
            })
            .collect();
        self.writer
            .send_response(&Response::success(
                req.id,
                serde_json::json!({ "channels": channels }),
            ))
            .await
    }

    async fn handle_channels_publish(&mut self, req: Request) -> Result<(), GmError> {
        let channel_id = match req.params.get("channelId").and_then(|v| v.as_str()) {
            Some(id) => ChannelId::from(id),
            None => {
                let err = GmError::Validation("missing channelId".into());
                return self.writer.send_error(req.id, &err).await;
            }
        };
        let body = publish_body(&req.params);

        let owner = match self.session.channel(&channel_id) {
            Ok(entry) => entry.owner.clone(),
            Err(e) => return self.writer.send_error(req.id, &e).await,
        };

        let result = match owner {
            ChannelOwner::Engine => match serde_json::from_str(&body) {
                Ok(command) => {
                    let (tx, rx) = oneshot::channel();
                    self.engine
                        .request(EngineRequest::SendCommand {
                            channel_id: channel_id.clone(),
                            command,
                            reply: tx,
                        })
                        .await?;
                    rx.await
                        .map_err(|_| GmError::Internal("engine reply dropped".into()))?
                }
                Err(e) => Err(GmError::CommandError(format!("invalid command: {}", e))),
            },
            ChannelOwner::Lobby(room) if !room.is_empty() => {
                let (tx, rx) = oneshot::channel();
                self.lobby
                    .request(LobbyRequest::Say {
                        target: room,
                        text: body,
                        place: 0,
                        reply: tx,
                    })
                    .await?;
                rx.await
                    .map_err(|_| GmError::Internal("lobby reply dropped".into()))?
            }
            ChannelOwner::Lobby(_) => Err(GmError::Validation(
                "the global lobby channel is read-only; publish to a room channel".into(),
            )),
            ChannelOwner::Replay(_) => {
                Err(GmError::Validation("replay channels are read-only".into()))
            }
        };

        match result {
            Ok(()) => {
                self.writer
                    .send_response(&Response::success(
                        req.id,
                        serde_json::json!({
                            "delivered": true,
                            "messageId": uuid::Uuid::new_v4().to_string(),
                        }),
                    ))
                    .await
            }
            Err(e) => self.writer.send_error(req.id, &e).await,
        }
    }

    async fn handle_checkpoint(&mut self, req: Request) -> Result<(), GmError> {
        let feature_set = req
            .params
            .get("featureSet")
            .and_then(|v| v.as_str())
            .unwrap_or("game")
            .to_string();
        let channel_id = req
            .params
            .get("channelId")
            .and_then(|v| v.as_str())
            .map(ChannelId::from);

        // The tree must exist (rollback-enabled, acknowledged set).
        if let Err(e) = self.session.checkpoint_tree(&feature_set) {
            return self.writer.send_error(req.id, &e).await;
        }

        let channel_id = match channel_id {
            Some(id) => id,
            None => {
                let err = GmError::Validation("missing channelId".into());
                return self.writer.send_error(req.id, &err).await;
            }
        };

        let (tx, rx) = oneshot::channel();
        self.engine
            .request(EngineRequest::Checkpoint {
                channel_id,
                reply: tx,
            })
            .await?;
        match rx
            .await
            .map_err(|_| GmError::Internal("engine reply dropped".into()))?
        {
            Ok(checkpoint_id) => {
                // The component mints the id; the session tree only links it.
                self.session
                    .checkpoint_tree(&feature_set)
                    .expect("tree checked above")
                    .record(checkpoint_id.clone());
                self.writer
                    .send_response(&Response::success(
                        req.id,
                        serde_json::json!({ "checkpointId": checkpoint_id }),
                    ))
                    .await
            }
            Err(e) => self.writer.send_error(req.id, &e).await,
        }
    }

    async fn handle_rollback(&mut self, req: Request) -> Result<(), GmError> {
        let feature_set = req
            .params
            .get("featureSet")
            .and_then(|v| v.as_str())
            .unwrap_or("game")
            .to_string();
        let checkpoint = req
            .params
            .get("checkpoint")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let channel_id = match req.params.get("channelId").and_then(|v| v.as_str()) {
            Some(id) => ChannelId::from(id),
            None => {
                let err = GmError::Validation("missing channelId".into());
                return self.writer.send_error(req.id, &err).await;
            }
        };

        let tree = match self.session.checkpoint_tree(&feature_set) {
            Ok(tree) => tree,
            Err(e) => return self.writer.send_error(req.id, &e).await,
        };
        if let Err(e) = tree.rollback(&checkpoint) {
            let err = GmError::Validation(e.to_string());
            return self.writer.send_error(req.id, &err).await;
        }

        let (tx, rx) = oneshot::channel();
        self.engine
            .request(EngineRequest::Rollback {
                channel_id: channel_id.clone(),
                checkpoint_id: checkpoint.clone(),
                reply: tx,
            })
            .await?;
        match rx
            .await
            .map_err(|_| GmError::Internal("engine reply dropped".into()))?
        {
            Ok(()) => {
                // Channel id is preserved across the respawn; callers see a
                // continuous channel.
                self.writer
                    .send_response(&Response::success(
                        req.id,
                        serde_json::json!({
                            "success": true,
                            "checkpoint": checkpoint,
                            "channelId": channel_id,
                        }),
                    ))
                    .await
            }
            Err(e) => self.writer.send_error(req.id, &e).await,
        }
    }

    // ── Outgoing queue ──

    async fn apply_outgoing(&mut self, out: Outgoing) -> Result<(), GmError> {
        match out {
            Outgoing::OpenChannel {
                id,
                kind,
                room,
                descriptor,
            } => {
                let owner = match kind {
                    ChannelKind::GameInstance => ChannelOwner::Engine,
                    ChannelKind::LobbyChat => ChannelOwner::Lobby(room.unwrap_or_default()),
                    ChannelKind::Replay => ChannelOwner::Replay(room.unwrap_or_default()),
                };
                self.session.open_channel(id, kind, owner);
                if self.session.channels_extension() {
                    self.writer
                        .send_notification(&channels_changed(
                            vec![descriptor],
                            vec![],
                            vec![],
                        ))
                        .await?;
                }
            }
            Outgoing::CloseChannel { id, error } => {
                if self.session.remove_channel(&id).is_some()
                    && self.session.channels_extension()
                {
                    let removal = match error {
                        Some(error) => serde_json::json!({ "id": id, "error": error }),
                        None => serde_json::json!({ "id": id }),
                    };
                    self.writer
                        .send_notification(&channels_changed(vec![], vec![removal], vec![]))
                        .await?;
                }
            }
            Outgoing::Notification(notif) => self.writer.send_notification(&notif).await?,
            Outgoing::Response(resp) => self.writer.send_response(&resp).await?,
        }
        Ok(())
    }

    // ── Lobby events ──

    async fn handle_lobby_event(&mut self, event: LobbyEvent) -> Result<(), GmError> {
        if !self.session.channels_extension() {
            return Ok(());
        }

        match event {
            // High-frequency churn is tracked in the lobby model but not
            // forwarded; list tools expose it on demand.
            LobbyEvent::UserJoined(_)
            | LobbyEvent::UserLeft { .. }
            | LobbyEvent::BattleUpdated(_)
            | LobbyEvent::ChannelUserJoined { .. }
            | LobbyEvent::ChannelUserLeft { .. } => Ok(()),

            LobbyEvent::ChannelJoined { channel, users, topic } => {
                let id = ChannelId::lobby_room(&channel);
                let descriptor = ChannelDescriptor {
                    id: id.clone(),
                    kind: ChannelKind::LobbyChat,
                    label: format!("#{}", channel),
                    metadata: Some(serde_json::json!({
                        "users": users.len(),
                        "topic": topic,
                    })),
                };
                self.apply_outgoing(Outgoing::OpenChannel {
                    id,
                    kind: ChannelKind::LobbyChat,
                    room: Some(channel),
                    descriptor,
                })
                .await
            }

            LobbyEvent::ChatMessage {
                ref user,
                ref text,
                ref target,
                place,
                ..
            } => {
                // Room chat rides the room channel; everything else the
                // global lobby stream.
                let room_channel = ChannelId::lobby_room(target);
                let id = if place == 0 && self.session.channel(&room_channel).is_ok() {
                    room_channel
                } else {
                    ChannelId::lobby_global()
                };
                let body = serde_json::json!({
                    "type": "chat",
                    "user": user,
                    "text": text,
                    "target": target,
                    "place": place,
                });
                self.forward_incoming(&id, "lobby", user, &body.to_string(), None)
                    .await
            }

            LobbyEvent::Disconnected { ref reason } => {
                let error = GmError::Transport(reason.clone()).to_wire();
                for id in self.session.lobby_channel_ids() {
                    self.apply_outgoing(Outgoing::CloseChannel {
                        id,
                        error: Some(error.clone()),
                    })
                    .await?;
                }
                Ok(())
            }

            // Everything else is forwarded on the global lobby stream with
            // the full body preserved.
            other => {
                let id = ChannelId::lobby_global();
                if self.session.channel(&id).is_err() {
                    return Ok(());
                }
                let body = lobby_event_body(&other);
                self.forward_incoming(&id, "lobby", "lobby", &body.to_string(), None)
                    .await
            }
        }
    }

    // ── Engine notices ──

    async fn handle_engine_notice(&mut self, notice: EngineNotice) -> Result<(), GmError> {
        match notice {
            EngineNotice::BridgeConnected { channel_id } => {
                if self.session.channels_extension()
                    && self.session.channel(&channel_id).is_ok()
                {
                    let descriptor = ChannelDescriptor {
                        id: channel_id.clone(),
                        kind: ChannelKind::GameInstance,
                        label: channel_id.to_string(),
                        metadata: Some(serde_json::json!({ "status": "running" })),
                    };
                    self.writer
                        .send_notification(&channels_changed(vec![], vec![], vec![descriptor]))
                        .await?;
                }
                Ok(())
            }
            EngineNotice::Event { channel_id, event } => {
                if self.session.channel(&channel_id).is_err() {
                    return Ok(());
                }
                let body = serde_json::to_string(&event)
                    .map_err(|e| GmError::Internal(e.to_string()))?;
                self.forward_incoming(&channel_id, "engine", "Game Engine", &body, event.frame())
                    .await?;
                // The release event is the resource saying goodbye.
                if matches!(event, GameEvent::Release { .. }) {
                    self.session.mark_closing(&channel_id);
                }
                Ok(())
            }
            EngineNotice::Ended {
                channel_id,
                error,
                exit_code: _,
            } => {
                self.apply_outgoing(Outgoing::CloseChannel {
                    id: channel_id,
                    error: error.map(|e| e.to_wire()),
                })
                .await
            }
        }
    }

    /// One resource payload becomes one `channels/incoming` notification.
    /// Game events carry their sim frame at the top level so the host can
    /// order messages locally without parsing the body.
    async fn forward_incoming(
        &mut self,
        channel_id: &ChannelId,
        author_id: &str,
        author_name: &str,
        body: &str,
        frame: Option<i32>,
    ) -> Result<(), GmError> {
        if !self.session.channels_extension() {
            return Ok(());
        }
        let mut params = serde_json::json!({
            "channelId": channel_id,
            "messageId": uuid::Uuid::new_v4().to_string(),
            "author": { "id": author_id, "name": author_name },
            "content": [{ "type": "text", "text": body }],
            "timestamp": chrono::Utc::now().to_rfc3339(),
        });
        if let Some(frame) = frame {
            params["frame"] = frame.into();
        }
        let notif = Notification::new(method::CHANNELS_INCOMING, params);
        self.writer.send_notification(&notif).await
    }
}

/// Wrap a tool result in the upstream content envelope.
fn tool_envelope(value: serde_json::Value) -> serde_json::Value {
    let text = match &value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    };
    serde_json::json!({
        "content": [{ "type": "text", "text": text }],
        "isError": false,
    })
}

fn channels_changed(
    added: Vec<ChannelDescriptor>,
    removed: Vec<serde_json::Value>,
    updated: Vec<ChannelDescriptor>,
) -> Notification {
    let mut params = serde_json::Map::new();
    if !added.is_empty() {
        params.insert("added".into(), serde_json::json!(added));
    }
    if !removed.is_empty() {
        params.insert("removed".into(), serde_json::json!(removed));
    }
    if !updated.is_empty() {
        params.insert("updated".into(), serde_json::json!(updated));
    }
    Notification::new(method::CHANNELS_CHANGED, serde_json::Value::Object(params))
}

/// The publish body: either MCP-style content blocks or a bare `body`.
fn publish_body(params: &serde_json::Value) -> String {
    if let Some(text) = params
        .get("content")
        .and_then(|c| c.as_array())
        .and_then(|arr| arr.first())
        .and_then(|block| block.get("text"))
        .and_then(|v| v.as_str())
    {
        return text.to_string();
    }
    match params.get("body") {
        Some(serde_json::Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => String::new(),
    }
}

/// Serialize a lobby event for the global channel, preserving its fields.
fn lobby_event_body(event: &LobbyEvent) -> serde_json::Value {
    match event {
        LobbyEvent::Connected { engine, game } => serde_json::json!({
            "type": "connected", "engine": engine, "game": game,
        }),
        LobbyEvent::LoggedIn { username } => serde_json::json!({
            "type": "logged_in", "username": username,
        }),
        LobbyEvent::LoginFailed { code, message } => serde_json::json!({
            "type": "login_failed", "code": code, "message": message,
        }),
        LobbyEvent::RegisterSuccess => serde_json::json!({ "type": "register_success" }),
        LobbyEvent::RegisterFailed { code, reason } => serde_json::json!({
            "type": "register_failed", "code": code, "reason": reason,
        }),
        LobbyEvent::BattleOpened(b) => serde_json::json!({
            "type": "battle_opened",
            "battleId": b.battle_id,
            "title": b.title,
            "founder": b.founder,
            "map": b.map,
            "players": b.player_count,
            "maxPlayers": b.max_players,
        }),
        LobbyEvent::BattleClosed { battle_id } => serde_json::json!({
            "type": "battle_closed", "battleId": battle_id,
        }),
        LobbyEvent::ChannelJoinFailed { channel, reason } => serde_json::json!({
            "type": "channel_join_failed", "channel": channel, "reason": reason,
        }),
        LobbyEvent::MatchmakerStatus { joined } => serde_json::json!({
            "type": "matchmaker_status", "joined": joined,
        }),
        LobbyEvent::MatchFound { seconds_remaining } => serde_json::json!({
            "type": "match_found", "secondsRemaining": seconds_remaining,
        }),
        LobbyEvent::ConnectHostedGame(data) => serde_json::json!({
            "type": "connect_hosted_game",
            "ip": data.ip,
            "port": data.port,
            "map": data.map,
            "game": data.game,
        }),
        // Filtered variants never reach here; give them a minimal body
        // anyway rather than panicking.
        other => serde_json::json!({ "type": format!("{:?}", other) }),
    }
}
