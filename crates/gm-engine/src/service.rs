//! Engine service task
//!
//! One task owns the supervisor's instance table and the IPC router; callers
//! hold a cloneable `EngineHandle`. Unsolicited endings (crash, handshake
//! expiry, bridge disconnect) surface as `EngineNotice`s for the session
//! layer to turn into channel closure.

use crate::router::{IpcRouter, RouterMsg};
use crate::supervisor::{EngineStatus, EngineSupervisor, ExitReport, GameConfig, SupervisorPaths};
use gm_core::{ChannelId, GameCommand, GameEvent, GmError};
use tokio::sync::{mpsc, oneshot};
use tracing::{info, warn};

/// How often the service polls for engine exits and handshake expiry.
const REAP_INTERVAL: std::time::Duration = std::time::Duration::from_millis(500);

type Reply<T> = oneshot::Sender<Result<T, GmError>>;

pub enum EngineRequest {
    StartGame { config: GameConfig, reply: Reply<ChannelId> },
    StopGame { channel_id: ChannelId, reply: Reply<()> },
    SendCommand { channel_id: ChannelId, command: GameCommand, reply: Reply<()> },
    Checkpoint { channel_id: ChannelId, reply: Reply<String> },
    Rollback { channel_id: ChannelId, checkpoint_id: String, reply: Reply<()> },
    List { reply: Reply<serde_json::Value> },
    Shutdown,
}

/// Unsolicited engine-side happenings.
#[derive(Debug)]
pub enum EngineNotice {
    /// The bridge handshook; the instance is live.
    BridgeConnected { channel_id: ChannelId },
    /// One event frame from the bridge.
    Event { channel_id: ChannelId, event: GameEvent },
    /// The instance is gone. `error` is None only for a clean end.
    Ended {
        channel_id: ChannelId,
        error: Option<GmError>,
        exit_code: Option<i32>,
    },
}

#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    pub async fn request(&self, req: EngineRequest) -> Result<(), GmError> {
        self.tx
            .send(req)
            .await
            .map_err(|_| GmError::Internal("engine service gone".into()))
    }
}

/// Spawn the engine service. Returns the handle and the notice stream.
pub fn spawn_engine_service(paths: SupervisorPaths) -> (EngineHandle, mpsc::Receiver<EngineNotice>) {
    let (tx, rx) = mpsc::channel(64);
    let (notice_tx, notice_rx) = mpsc::channel(256);
    tokio::spawn(engine_service(paths, rx, notice_tx));
    (EngineHandle { tx }, notice_rx)
}

struct EngineService {
    supervisor: EngineSupervisor,
    router: IpcRouter,
    notice_tx: mpsc::Sender<EngineNotice>,
}

async fn engine_service(
    paths: SupervisorPaths,
    mut inbox: mpsc::Receiver<EngineRequest>,
    notice_tx: mpsc::Sender<EngineNotice>,
) {
    let (router, mut router_rx) = IpcRouter::new();
    let mut svc = EngineService {
        supervisor: EngineSupervisor::new(paths),
        router,
        notice_tx,
    };
    let mut reap = tokio::time::interval(REAP_INTERVAL);
    reap.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            req = inbox.recv() => {
                match req {
                    Some(EngineRequest::Shutdown) | None => break,
                    Some(req) => svc.handle_request(req).await,
                }
            }
            Some(msg) = router_rx.recv() => {
                svc.handle_router_msg(msg).await;
            }
            _ = reap.tick() => {
                let reports = svc.supervisor.check_all().await;
                for report in reports {
                    svc.handle_exit(report).await;
                }
            }
        }
    }

    // Reap everything on the way out.
    let ids: Vec<ChannelId> = svc.supervisor.instances().map(|i| i.channel_id.clone()).collect();
    for id in ids {
        svc.router.close(&id);
        let _ = svc.supervisor.stop_game(&id).await;
    }
    info!("engine service stopped");
}

impl EngineService {
    async fn notice(&self, notice: EngineNotice) {
        if self.notice_tx.send(notice).await.is_err() {
            warn!("engine notice receiver dropped");
        }
    }

    async fn handle_request(&mut self, req: EngineRequest) {
        match req {
            EngineRequest::StartGame { config, reply } => {
                let result = match self.supervisor.start_game(config).await {
                    Ok(channel_id) => {
                        let binding = self
                            .supervisor
                            .instance(&channel_id)
                            .map(|i| (i.token.clone(), i.socket_path.clone()));
                        match binding {
                            Some((token, socket)) => {
                                match self.router.expect(channel_id.clone(), token, &socket) {
                                    Ok(()) => Ok(channel_id),
                                    Err(e) => {
                                        // A game nobody can reach is useless; undo.
                                        let _ = self.supervisor.stop_game(&channel_id).await;
                                        Err(e)
                                    }
                                }
                            }
                            None => Err(GmError::Internal(format!(
                                "instance {} vanished after start",
                                channel_id
                            ))),
                        }
                    }
                    Err(e) => Err(e),
                };
                let _ = reply.send(result);
            }
            EngineRequest::StopGame { channel_id, reply } => {
                self.router.close(&channel_id);
                let result = self.supervisor.stop_game(&channel_id).await;
                let _ = reply.send(result);
            }
            EngineRequest::SendCommand { channel_id, command, reply } => {
                // Track pause state so channel listings reflect it.
                match &command {
                    GameCommand::Pause => {
                        if let Some(i) = self.supervisor.instance_mut(&channel_id) {
                            i.status = EngineStatus::Paused;
                        }
                    }
                    GameCommand::Unpause => {
                        if let Some(i) = self.supervisor.instance_mut(&channel_id) {
                            i.status = EngineStatus::Running;
                        }
                    }
                    _ => {}
                }
                let result = self.router.send(&channel_id, command).await;
                let _ = reply.send(result);
            }
            EngineRequest::Checkpoint { channel_id, reply } => {
                let _ = reply.send(self.supervisor.checkpoint(&channel_id));
            }
            EngineRequest::Rollback { channel_id, checkpoint_id, reply } => {
                self.router.unbind_writer(&channel_id);
                let result = self.supervisor.rollback(&channel_id, &checkpoint_id).await;
                let _ = reply.send(result);
            }
            EngineRequest::List { reply } => {
                let list: Vec<serde_json::Value> = self
                    .supervisor
                    .instances()
                    .map(|i| {
                        serde_json::json!({
                            "id": i.channel_id,
                            "map": i.config.map,
                            "game": i.config.game,
                            "opponent": i.config.opponent,
                            "status": format!("{:?}", i.status).to_lowercase(),
                            "bridgeConnected": self.router.is_connected(&i.channel_id),
                            "generation": i.generation,
                        })
                    })
                    .collect();
                let _ = reply.send(Ok(serde_json::Value::Array(list)));
            }
            EngineRequest::Shutdown => unreachable!("handled by the service loop"),
        }
    }

    async fn handle_router_msg(&mut self, msg: RouterMsg) {
        match msg {
            RouterMsg::Connected { channel_id, commands, version } => {
                info!("bridge v{} connected for {}", version, channel_id);
                self.router.bind_writer(channel_id.clone(), commands);
                if let Some(instance) = self.supervisor.instance_mut(&channel_id) {
                    instance.handshaken = true;
                    instance.status = EngineStatus::Running;
                }
                self.notice(EngineNotice::BridgeConnected { channel_id }).await;
            }
            RouterMsg::Event { channel_id, event } => {
                self.notice(EngineNotice::Event { channel_id, event }).await;
            }
            RouterMsg::Disconnected { channel_id, reason } => {
                self.router.unbind_writer(&channel_id);
                // A disconnect only matters for a live, handshaken instance:
                // an un-handshaken one is either still booting or a rollback
                // respawn, and the stale disconnect belongs to the previous
                // process.
                let live = self
                    .supervisor
                    .instance(&channel_id)
                    .map(|i| i.handshaken && !i.respawning)
                    .unwrap_or(false);
                if !live {
                    return;
                }
                // An unexpected bridge disconnect takes the engine with it.
                warn!("bridge lost for {} ({}), killing engine", channel_id, reason);
                self.router.close(&channel_id);
                let _ = self.supervisor.stop_game(&channel_id).await;
                self.notice(EngineNotice::Ended {
                    channel_id,
                    error: Some(GmError::Bridge(reason)),
                    exit_code: None,
                })
                .await;
            }
        }
    }

    async fn handle_exit(&mut self, report: ExitReport) {
        let ExitReport {
            channel_id,
            exit_code,
            success,
            handshaken,
            runtime,
            handshake_timeout,
        } = report;

        info!(
            "engine for {} ended: code={:?} runtime={:?}",
            channel_id, exit_code, runtime
        );
        self.router.close(&channel_id);

        let error = if handshake_timeout {
            Some(GmError::Engine(
                "engine never produced a bridge handshake".into(),
            ))
        } else if !handshaken {
            Some(GmError::Engine(format!(
                "engine exited before bridge handshake (code {:?})",
                exit_code
            )))
        } else if !success {
            Some(GmError::Engine(format!(
                "engine exited abnormally (code {:?})",
                exit_code
            )))
        } else {
            None
        };

        self.notice(EngineNotice::Ended {
            channel_id,
            error,
            exit_code,
        })
        .await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn test_paths(tmp: &std::path::Path) -> SupervisorPaths {
        let mut p = SupervisorPaths::new(
            PathBuf::from("true"),
            tmp.join("home"),
            tmp.join("instances"),
        );
        p.socket_dir = tmp.to_path_buf();
        p
    }

    #[tokio::test]
    async fn test_start_then_crash_emits_ended() {
        let tmp = tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("home")).unwrap();
        let (handle, mut notices) = spawn_engine_service(test_paths(tmp.path()));

        let (tx, rx) = oneshot::channel();
        handle
            .request(EngineRequest::StartGame {
                config: GameConfig {
                    map: "m".into(),
                    game: "g".into(),
                    opponent: "NullAI".into(),
                    headless: true,
                },
                reply: tx,
            })
            .await
            .unwrap();
        let channel_id = rx.await.unwrap().unwrap();
        assert!(channel_id.is_game());

        // `true` exits immediately and never handshakes: the ending carries
        // an engine error.
        match notices.recv().await.unwrap() {
            EngineNotice::Ended { channel_id: id, error, .. } => {
                assert_eq!(id, channel_id);
                assert!(matches!(error, Some(GmError::Engine(_))));
            }
            other => panic!("expected Ended, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_commands_to_unknown_channel_fail() {
        let tmp = tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("home")).unwrap();
        let (handle, _notices) = spawn_engine_service(test_paths(tmp.path()));

        let (tx, rx) = oneshot::channel();
        handle
            .request(EngineRequest::SendCommand {
                channel_id: ChannelId::local_game(42),
                command: GameCommand::Pause,
                reply: tx,
            })
            .await
            .unwrap();
        match rx.await.unwrap() {
            Err(GmError::Bridge(_)) => {}
            other => panic!("expected bridge error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_list_reports_instances() {
        let tmp = tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("home")).unwrap();
        let (handle, _notices) = spawn_engine_service(test_paths(tmp.path()));

        let (tx, rx) = oneshot::channel();
        handle
            .request(EngineRequest::List { reply: tx })
            .await
            .unwrap();
        assert_eq!(rx.await.unwrap().unwrap(), serde_json::json!([]));
    }
}
