//! Engine subprocess supervision
//!
//! The supervisor owns every engine instance: it prepares the write-dir,
//! renders the start-script, spawns the process with captured output, and
//! observes exits. Instances are keyed by channel id; destruction cascades
//! to channel closure in the service layer.

use crate::script::StartScript;
use crate::write_dir::WriteDirLayout;
use gm_core::{ChannelId, GmError};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Skirmish AI identity the engine looks the bridge up under.
pub const BRIDGE_AI_NAME: &str = "GMBridge";
pub const BRIDGE_AI_VERSION: &str = "0.1";

/// Paths and knobs shared by all instances.
#[derive(Debug, Clone)]
pub struct SupervisorPaths {
    pub engine_binary: PathBuf,
    /// Optional dedicated headless binary; falls back to `engine_binary`.
    pub engine_binary_headless: Option<PathBuf>,
    pub content_home: PathBuf,
    /// Per-instance write-dirs are created under this root.
    pub write_dir_root: PathBuf,
    pub socket_dir: PathBuf,
    pub bridge_lib: Option<PathBuf>,
    pub bridge_data: Option<PathBuf>,
    pub widget_source: Option<PathBuf>,
    /// How long a spawned engine may run before its bridge must handshake.
    pub handshake_deadline: Duration,
}

impl SupervisorPaths {
    pub fn new(engine_binary: PathBuf, content_home: PathBuf, write_dir_root: PathBuf) -> Self {
        Self {
            engine_binary,
            engine_binary_headless: None,
            content_home,
            write_dir_root,
            socket_dir: std::env::temp_dir(),
            bridge_lib: None,
            bridge_data: None,
            widget_source: None,
            handshake_deadline: Duration::from_secs(60),
        }
    }
}

/// What a local game runs.
#[derive(Debug, Clone)]
pub struct GameConfig {
    pub map: String,
    pub game: String,
    pub opponent: String,
    pub headless: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineStatus {
    Loading,
    Running,
    Paused,
    Ended,
}

/// Launch recipe recorded at checkpoint time; rollback respawns from it.
#[derive(Debug, Clone)]
pub struct CheckpointRecipe {
    pub config: GameConfig,
    pub savestate: PathBuf,
}

/// One engine process bound to one channel.
pub struct EngineInstance {
    pub channel_id: ChannelId,
    pub config: GameConfig,
    pub status: EngineStatus,
    pub write_dir: PathBuf,
    pub socket_path: PathBuf,
    pub token: String,
    pub handshaken: bool,
    /// Bumped on every rollback respawn; surfaced in channel metadata.
    pub generation: u32,
    /// Suppresses exit/disconnect reports while a rollback respawn is
    /// in flight.
    pub respawning: bool,
    pub checkpoints: HashMap<String, CheckpointRecipe>,
    child: Option<Child>,
    started: Instant,
}

/// Why an instance left the process table.
#[derive(Debug)]
pub struct ExitReport {
    pub channel_id: ChannelId,
    pub exit_code: Option<i32>,
    pub success: bool,
    pub handshaken: bool,
    pub runtime: Duration,
    pub handshake_timeout: bool,
}

/// Owns all engine instances. Mutated only by the engine service task.
pub struct EngineSupervisor {
    pub paths: SupervisorPaths,
    instances: HashMap<ChannelId, EngineInstance>,
    next_id: u32,
}

impl EngineSupervisor {
    pub fn new(paths: SupervisorPaths) -> Self {
        Self {
            paths,
            instances: HashMap::new(),
            next_id: 1,
        }
    }

    pub fn instance(&self, id: &ChannelId) -> Option<&EngineInstance> {
        self.instances.get(id)
    }

    pub fn instance_mut(&mut self, id: &ChannelId) -> Option<&mut EngineInstance> {
        self.instances.get_mut(id)
    }

    pub fn instances(&self) -> impl Iterator<Item = &EngineInstance> {
        self.instances.values()
    }

    /// Prepare a write-dir, render the script, spawn the engine and register
    /// the instance. Returns the assigned channel id.
    pub async fn start_game(&mut self, config: GameConfig) -> Result<ChannelId, GmError> {
        let id = self.next_id;
        self.next_id += 1;
        let channel_id = ChannelId::local_game(id);
        let token = Uuid::new_v4().to_string();
        let socket_path = self
            .paths
            .socket_dir
            .join(format!("game-manager-{}.sock", token));
        let write_dir = self.paths.write_dir_root.join(format!("instance-{}", id));

        let layout = WriteDirLayout {
            base: write_dir.clone(),
            content_home: self.paths.content_home.clone(),
            bridge_lib: self.paths.bridge_lib.clone(),
            bridge_data: self.paths.bridge_data.clone(),
            widget_source: self.paths.widget_source.clone(),
            ai_name: BRIDGE_AI_NAME.into(),
            ai_version: BRIDGE_AI_VERSION.into(),
            player_name: "gm".into(),
        };
        layout.prepare()?;
        layout.write_connection_config(&socket_path, &token)?;

        let mut instance = EngineInstance {
            channel_id: channel_id.clone(),
            config,
            status: EngineStatus::Loading,
            write_dir,
            socket_path,
            token,
            handshaken: false,
            generation: 0,
            respawning: false,
            checkpoints: HashMap::new(),
            child: None,
            started: Instant::now(),
        };
        spawn_instance(&self.paths, &mut instance).await?;
        self.instances.insert(channel_id.clone(), instance);
        info!("started engine for {}", channel_id);
        Ok(channel_id)
    }

    /// Kill and reap an instance's process, removing it from the table.
    pub async fn stop_game(&mut self, channel_id: &ChannelId) -> Result<(), GmError> {
        let mut instance = self
            .instances
            .remove(channel_id)
            .ok_or_else(|| GmError::ChannelClosed(channel_id.to_string()))?;
        if let Some(mut child) = instance.child.take() {
            let _ = child.kill().await;
        }
        instance.status = EngineStatus::Ended;
        info!("stopped engine for {}", channel_id);
        Ok(())
    }

    /// Record a checkpoint recipe for an instance. Returns the new id.
    pub fn checkpoint(&mut self, channel_id: &ChannelId) -> Result<String, GmError> {
        let instance = self
            .instances
            .get_mut(channel_id)
            .ok_or_else(|| GmError::ChannelClosed(channel_id.to_string()))?;
        let id = Uuid::new_v4().to_string();
        let savestate = instance
            .write_dir
            .join("demos")
            .join(format!("checkpoint-{}.ssf", id));
        instance.checkpoints.insert(
            id.clone(),
            CheckpointRecipe {
                config: instance.config.clone(),
                savestate,
            },
        );
        debug!("recorded checkpoint {} for {}", id, channel_id);
        Ok(id)
    }

    /// Tear the process down and respawn from a recorded checkpoint. The
    /// channel id, write-dir, token and socket are all preserved, so the
    /// agent host sees a continuous channel.
    pub async fn rollback(
        &mut self,
        channel_id: &ChannelId,
        checkpoint_id: &str,
    ) -> Result<(), GmError> {
        let paths = self.paths.clone();
        let instance = self
            .instances
            .get_mut(channel_id)
            .ok_or_else(|| GmError::ChannelClosed(channel_id.to_string()))?;
        let recipe = instance
            .checkpoints
            .get(checkpoint_id)
            .ok_or_else(|| {
                GmError::Validation(format!("unknown checkpoint: {}", checkpoint_id))
            })?
            .clone();

        instance.respawning = true;
        if let Some(mut child) = instance.child.take() {
            let _ = child.kill().await;
        }
        instance.config = recipe.config;
        instance.generation += 1;

        spawn_instance(&paths, instance).await?;
        instance.respawning = false;
        info!(
            "rolled back {} to checkpoint {} (generation {})",
            channel_id, checkpoint_id, instance.generation
        );
        Ok(())
    }

    /// Poll every instance for exit and handshake expiry.
    ///
    /// Exited or expired instances are removed from the table and reported;
    /// the engine service turns reports into channel closure. An instance
    /// mid-rollback is left alone.
    pub async fn check_all(&mut self) -> Vec<ExitReport> {
        let mut reports = Vec::new();
        let deadline = self.paths.handshake_deadline;

        let ids: Vec<ChannelId> = self.instances.keys().cloned().collect();
        for id in ids {
            let instance = match self.instances.get_mut(&id) {
                Some(i) if !i.respawning => i,
                _ => continue,
            };

            let report = match &mut instance.child {
                Some(child) => match child.try_wait() {
                    Ok(Some(status)) => Some(ExitReport {
                        channel_id: id.clone(),
                        exit_code: status.code(),
                        success: status.success(),
                        handshaken: instance.handshaken,
                        runtime: instance.started.elapsed(),
                        handshake_timeout: false,
                    }),
                    Ok(None) => {
                        if !instance.handshaken && instance.started.elapsed() > deadline {
                            warn!("bridge handshake deadline expired for {}", id);
                            let _ = child.kill().await;
                            Some(ExitReport {
                                channel_id: id.clone(),
                                exit_code: None,
                                success: false,
                                handshaken: false,
                                runtime: instance.started.elapsed(),
                                handshake_timeout: true,
                            })
                        } else {
                            None
                        }
                    }
                    Err(e) => {
                        warn!("wait on engine for {} failed: {}", id, e);
                        Some(ExitReport {
                            channel_id: id.clone(),
                            exit_code: None,
                            success: false,
                            handshaken: instance.handshaken,
                            runtime: instance.started.elapsed(),
                            handshake_timeout: false,
                        })
                    }
                },
                None => None,
            };

            if let Some(report) = report {
                self.instances.remove(&id);
                reports.push(report);
            }
        }
        reports
    }
}

/// Render the script and launch the engine process for an instance.
async fn spawn_instance(
    paths: &SupervisorPaths,
    instance: &mut EngineInstance,
) -> Result<(), GmError> {
    let script = StartScript {
        map: instance.config.map.clone(),
        game: instance.config.game.clone(),
        ai_name: BRIDGE_AI_NAME.into(),
        opponent: instance.config.opponent.clone(),
        player_name: "gm".into(),
    };
    let script_path = instance.write_dir.join("temp/startscript.txt");
    tokio::fs::write(
        &script_path,
        script.render(&instance.socket_path, &instance.token),
    )
    .await
    .map_err(|e| GmError::Engine(format!("write start-script: {}", e)))?;

    let binary = if instance.config.headless {
        paths
            .engine_binary_headless
            .as_ref()
            .unwrap_or(&paths.engine_binary)
    } else {
        &paths.engine_binary
    };

    let mut child = Command::new(binary)
        .arg("--write-dir")
        .arg(&instance.write_dir)
        .arg(&script_path)
        .env("GM_SOCKET_PATH", &instance.socket_path)
        .env("GM_HANDSHAKE_TOKEN", &instance.token)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| GmError::Engine(format!("spawn {}: {}", binary.display(), e)))?;

    forward_output(&instance.channel_id, &mut child);

    instance.child = Some(child);
    instance.status = EngineStatus::Loading;
    instance.handshaken = false;
    instance.started = Instant::now();
    Ok(())
}

/// Re-log engine output line-by-line, tagged with the channel id.
fn forward_output(channel_id: &ChannelId, child: &mut Child) {
    if let Some(stdout) = child.stdout.take() {
        let id = channel_id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("[{} stdout] {}", id, line);
            }
        });
    }
    if let Some(stderr) = child.stderr.take() {
        let id = channel_id.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                debug!("[{} stderr] {}", id, line);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn paths(tmp: &std::path::Path, engine: &str) -> SupervisorPaths {
        let mut p = SupervisorPaths::new(
            PathBuf::from(engine),
            tmp.join("home"),
            tmp.join("instances"),
        );
        p.socket_dir = tmp.to_path_buf();
        p
    }

    #[tokio::test]
    async fn test_start_assigns_channel_ids() {
        let tmp = tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("home")).unwrap();
        // `true` exits immediately; good enough for spawn bookkeeping.
        let mut sup = EngineSupervisor::new(paths(tmp.path(), "true"));

        let config = GameConfig {
            map: "SimpleChess".into(),
            game: "TestGame".into(),
            opponent: "NullAI".into(),
            headless: true,
        };
        let a = sup.start_game(config.clone()).await.unwrap();
        let b = sup.start_game(config).await.unwrap();
        assert_eq!(a.as_str(), "game:local-1");
        assert_eq!(b.as_str(), "game:local-2");
        assert!(sup.instance(&a).unwrap().write_dir.join("temp/startscript.txt").exists());
    }

    #[tokio::test]
    async fn test_exited_engine_is_reaped() {
        let tmp = tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("home")).unwrap();
        let mut sup = EngineSupervisor::new(paths(tmp.path(), "true"));

        let id = sup
            .start_game(GameConfig {
                map: "m".into(),
                game: "g".into(),
                opponent: "NullAI".into(),
                headless: true,
            })
            .await
            .unwrap();

        // `true` exits at once; poll until the supervisor notices.
        let mut reports = Vec::new();
        for _ in 0..50 {
            reports = sup.check_all().await;
            if !reports.is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].channel_id, id);
        assert!(reports[0].success);
        assert!(!reports[0].handshaken);
        assert!(sup.instance(&id).is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_handshake_deadline_kills_engine() {
        use std::os::unix::fs::PermissionsExt;

        let tmp = tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("home")).unwrap();

        // A fake engine that ignores its arguments and lingers.
        let engine = tmp.path().join("fake-engine.sh");
        std::fs::write(&engine, "#!/bin/sh\nsleep 30\n").unwrap();
        std::fs::set_permissions(&engine, std::fs::Permissions::from_mode(0o755)).unwrap();

        let mut p = paths(tmp.path(), engine.to_str().unwrap());
        p.handshake_deadline = Duration::from_millis(100);
        let mut sup = EngineSupervisor::new(p);

        let id = sup
            .start_game(GameConfig {
                map: "m".into(),
                game: "g".into(),
                opponent: "NullAI".into(),
                headless: true,
            })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(150)).await;
        let reports = sup.check_all().await;
        assert_eq!(reports.len(), 1);
        assert!(reports[0].handshake_timeout);
        // No orphan entry stays behind.
        assert!(sup.instance(&id).is_none());
    }

    #[tokio::test]
    async fn test_checkpoint_and_stop() {
        let tmp = tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("home")).unwrap();
        let mut sup = EngineSupervisor::new(paths(tmp.path(), "true"));

        let id = sup
            .start_game(GameConfig {
                map: "m".into(),
                game: "g".into(),
                opponent: "NullAI".into(),
                headless: true,
            })
            .await
            .unwrap();

        let cp = sup.checkpoint(&id).unwrap();
        assert!(sup.instance(&id).unwrap().checkpoints.contains_key(&cp));
        assert!(sup.rollback(&id, "bogus").await.is_err());

        sup.stop_game(&id).await.unwrap();
        assert!(sup.instance(&id).is_none());
        assert!(sup.stop_game(&id).await.is_err());
    }
}
