//! Per-instance write-directory preparation
//!
//! Each game instance gets an isolated directory tree: empty subdirectories
//! for AI, UI, replay and temp output, symlinks into the shared content home
//! for archives and engine binaries, the bridge shared library and its
//! metadata installed under the AI path, a bootstrap widget that hands team
//! control to the bridge, and headless-compatible engine settings.
//!
//! Missing symlink sources are non-fatal: the engine may fail later over a
//! missing map, but directory preparation itself must succeed.

use gm_core::GmError;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Directories symlinked from the shared content home into the write-dir.
/// The engine's archive cache is intentionally excluded: it stores absolute
/// paths and would be clobbered across write-dirs.
const SHARED_DIRS: &[&str] = &["pool", "packages", "maps", "games", "engine", "rapid"];

/// Engine settings for a headless-compatible run: minimal resolution,
/// rendering features and audio all off.
const HEADLESS_SETTINGS: &str = "\
XResolution=1
YResolution=1
WindowState=0
Fullscreen=0
VSync=0
3DTrees=0
GroundDetail=1
GrassDetail=0
MaxParticles=0
GroundDecals=0
UnitIconDist=0
MaxSounds=0
snd_volmaster=0
";

/// Layout of one instance's write-directory.
#[derive(Debug, Clone)]
pub struct WriteDirLayout {
    /// Root of this instance's sandbox.
    pub base: PathBuf,
    /// Shared content home (`~/.spring` equivalent).
    pub content_home: PathBuf,
    /// Bridge shared library to install, if built.
    pub bridge_lib: Option<PathBuf>,
    /// Directory holding `AIInfo.lua` / `AIOptions.lua`.
    pub bridge_data: Option<PathBuf>,
    /// Bootstrap widget source file.
    pub widget_source: Option<PathBuf>,
    /// Skirmish AI short name and version, as the engine looks them up.
    pub ai_name: String,
    pub ai_version: String,
    /// Player name keyed in the bootstrap config.
    pub player_name: String,
}

impl WriteDirLayout {
    /// Directory the engine exposes to the bridge as its data dir.
    pub fn ai_dir(&self) -> PathBuf {
        self.base
            .join("AI/Skirmish")
            .join(&self.ai_name)
            .join(&self.ai_version)
    }

    /// Create the full directory tree. Idempotent.
    pub fn prepare(&self) -> Result<(), GmError> {
        info!("preparing write-dir {}", self.base.display());
        let io = |e: std::io::Error| GmError::Engine(format!("write-dir: {}", e));

        std::fs::create_dir_all(&self.base).map_err(io)?;

        let subdirs = [
            self.ai_dir(),
            self.base.join("AI/Interfaces"),
            self.base.join("LuaUI/Widgets"),
            self.base.join("LuaUI/Config"),
            self.base.join("demos"),
            self.base.join("temp"),
        ];
        for dir in &subdirs {
            std::fs::create_dir_all(dir).map_err(io)?;
        }

        self.link_shared_content()?;
        self.install_bridge()?;
        self.install_widget()?;
        self.write_bootstrap_config()?;
        self.write_settings()?;

        Ok(())
    }

    /// Record the IPC socket path and handshake token where the bridge will
    /// find them (`connection.json` in its data dir).
    pub fn write_connection_config(
        &self,
        socket_path: &Path,
        token: &str,
    ) -> Result<(), GmError> {
        let config = serde_json::json!({
            "socket_path": socket_path,
            "handshake_token": token,
        });
        let path = self.ai_dir().join("connection.json");
        std::fs::write(
            &path,
            serde_json::to_string_pretty(&config)
                .map_err(|e| GmError::Internal(e.to_string()))?,
        )
        .map_err(|e| GmError::Engine(format!("connection.json: {}", e)))?;
        Ok(())
    }

    fn link_shared_content(&self) -> Result<(), GmError> {
        for dir_name in SHARED_DIRS {
            let target = self.content_home.join(dir_name);
            let link = self.base.join(dir_name);

            if link.symlink_metadata().is_ok() {
                continue;
            }
            if !target.exists() {
                warn!("shared content {} missing, skipping symlink", target.display());
                continue;
            }
            #[cfg(unix)]
            std::os::unix::fs::symlink(&target, &link)
                .map_err(|e| GmError::Engine(format!("symlink {}: {}", dir_name, e)))?;
        }

        // Share the installed AI interfaces if the content home has them and
        // our placeholder directory is still empty.
        let target = self.content_home.join("AI/Interfaces");
        let link = self.base.join("AI/Interfaces");
        if target.exists() && dir_is_empty(&link) {
            std::fs::remove_dir(&link)
                .map_err(|e| GmError::Engine(format!("AI/Interfaces: {}", e)))?;
            #[cfg(unix)]
            std::os::unix::fs::symlink(&target, &link)
                .map_err(|e| GmError::Engine(format!("AI/Interfaces: {}", e)))?;
        }
        Ok(())
    }

    fn install_bridge(&self) -> Result<(), GmError> {
        let ai_dir = self.ai_dir();

        match &self.bridge_lib {
            Some(lib) if lib.exists() => {
                let dest = ai_dir.join("libSkirmishAI.so");
                if should_update(&dest, lib)? {
                    std::fs::copy(lib, &dest)
                        .map_err(|e| GmError::Engine(format!("install bridge: {}", e)))?;
                    info!("installed bridge library into {}", ai_dir.display());
                }
            }
            Some(lib) => warn!("bridge library {} not found", lib.display()),
            None => warn!("no bridge library configured"),
        }

        if let Some(data) = &self.bridge_data {
            for name in ["AIInfo.lua", "AIOptions.lua"] {
                let src = data.join(name);
                let dest = ai_dir.join(name);
                if src.exists() && should_update(&dest, &src)? {
                    std::fs::copy(&src, &dest)
                        .map_err(|e| GmError::Engine(format!("install {}: {}", name, e)))?;
                }
            }
        }
        Ok(())
    }

    fn install_widget(&self) -> Result<(), GmError> {
        let dest = self.base.join("LuaUI/Widgets/gm_bootstrap.lua");
        match &self.widget_source {
            Some(src) if src.exists() => {
                if should_update(&dest, src)? {
                    std::fs::copy(src, &dest)
                        .map_err(|e| GmError::Engine(format!("install widget: {}", e)))?;
                }
            }
            _ => {
                // Fall back to the built-in bootstrap so a fresh checkout
                // still produces a working write-dir.
                if !dest.exists() {
                    std::fs::write(&dest, default_bootstrap_widget(&self.ai_name))
                        .map_err(|e| GmError::Engine(format!("install widget: {}", e)))?;
                }
            }
        }
        Ok(())
    }

    fn write_bootstrap_config(&self) -> Result<(), GmError> {
        let path = self.base.join("LuaUI/Config/gm_bootstrap.json");
        if path.exists() {
            return Ok(());
        }
        let config = serde_json::json!({
            "players": {
                &self.player_name: {
                    "ai": &self.ai_name,
                    "version": &self.ai_version,
                }
            }
        });
        std::fs::write(
            &path,
            serde_json::to_string_pretty(&config)
                .map_err(|e| GmError::Internal(e.to_string()))?,
        )
        .map_err(|e| GmError::Engine(format!("bootstrap config: {}", e)))?;
        Ok(())
    }

    fn write_settings(&self) -> Result<(), GmError> {
        let path = self.base.join("springsettings.cfg");
        if !path.exists() {
            std::fs::write(&path, HEADLESS_SETTINGS)
                .map_err(|e| GmError::Engine(format!("settings: {}", e)))?;
        }
        Ok(())
    }
}

/// Minimal widget that hands team control to the bridge AI on game start.
fn default_bootstrap_widget(ai_name: &str) -> String {
    format!(
        r#"function widget:GetInfo()
    return {{
        name    = "GM Bootstrap",
        desc    = "Hands team control to the {ai} skirmish AI on game start",
        author  = "game-manager",
        layer   = 0,
        enabled = true,
    }}
end

function widget:GameStart()
    Spring.SendCommands("aicontrol {ai}")
    widgetHandler:RemoveWidget(self)
end
"#,
        ai = ai_name
    )
}

/// True when dest is missing or older than src.
fn should_update(dest: &Path, src: &Path) -> Result<bool, GmError> {
    if !dest.exists() {
        return Ok(true);
    }
    let err = |e: std::io::Error| GmError::Engine(format!("stat: {}", e));
    let src_mod = std::fs::metadata(src).map_err(err)?.modified().map_err(err)?;
    let dest_mod = std::fs::metadata(dest).map_err(err)?.modified().map_err(err)?;
    Ok(src_mod > dest_mod)
}

fn dir_is_empty(path: &Path) -> bool {
    path.is_dir()
        && std::fs::read_dir(path)
            .map(|mut d| d.next().is_none())
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn layout(base: &Path, home: &Path) -> WriteDirLayout {
        WriteDirLayout {
            base: base.to_path_buf(),
            content_home: home.to_path_buf(),
            bridge_lib: None,
            bridge_data: None,
            widget_source: None,
            ai_name: "GMBridge".into(),
            ai_version: "0.1".into(),
            player_name: "gm".into(),
        }
    }

    #[test]
    fn test_prepare_creates_tree() {
        let tmp = tempdir().unwrap();
        let base = tmp.path().join("instance-1");
        let home = tmp.path().join("home");
        std::fs::create_dir_all(home.join("maps")).unwrap();

        let layout = layout(&base, &home);
        layout.prepare().unwrap();

        assert!(base.join("AI/Skirmish/GMBridge/0.1").is_dir());
        assert!(base.join("LuaUI/Widgets/gm_bootstrap.lua").is_file());
        assert!(base.join("LuaUI/Config/gm_bootstrap.json").is_file());
        assert!(base.join("demos").is_dir());
        assert!(base.join("temp").is_dir());
        assert!(base.join("springsettings.cfg").is_file());

        let settings = std::fs::read_to_string(base.join("springsettings.cfg")).unwrap();
        assert!(settings.contains("XResolution=1"));
        assert!(settings.contains("snd_volmaster=0"));
    }

    #[cfg(unix)]
    #[test]
    fn test_missing_symlink_sources_nonfatal() {
        let tmp = tempdir().unwrap();
        let base = tmp.path().join("instance-1");
        let home = tmp.path().join("home");
        // Only maps exists; pool/packages/games/engine/rapid are absent.
        std::fs::create_dir_all(home.join("maps")).unwrap();

        layout(&base, &home).prepare().unwrap();

        assert!(base.join("maps").symlink_metadata().is_ok());
        assert!(base.join("pool").symlink_metadata().is_err());
    }

    #[test]
    fn test_prepare_is_idempotent() {
        let tmp = tempdir().unwrap();
        let base = tmp.path().join("instance-1");
        let home = tmp.path().join("home");
        std::fs::create_dir_all(&home).unwrap();

        let layout = layout(&base, &home);
        layout.prepare().unwrap();
        layout.prepare().unwrap();
    }

    #[test]
    fn test_connection_config() {
        let tmp = tempdir().unwrap();
        let base = tmp.path().join("instance-1");
        let home = tmp.path().join("home");
        std::fs::create_dir_all(&home).unwrap();

        let layout = layout(&base, &home);
        layout.prepare().unwrap();
        layout
            .write_connection_config(Path::new("/tmp/gm-abc.sock"), "tok-123")
            .unwrap();

        let raw =
            std::fs::read_to_string(layout.ai_dir().join("connection.json")).unwrap();
        let config: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(config["socket_path"], "/tmp/gm-abc.sock");
        assert_eq!(config["handshake_token"], "tok-123");
    }

    #[test]
    fn test_bootstrap_config_keyed_by_player() {
        let tmp = tempdir().unwrap();
        let base = tmp.path().join("instance-1");
        let home = tmp.path().join("home");
        std::fs::create_dir_all(&home).unwrap();

        layout(&base, &home).prepare().unwrap();

        let raw =
            std::fs::read_to_string(base.join("LuaUI/Config/gm_bootstrap.json")).unwrap();
        let config: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(config["players"]["gm"]["ai"], "GMBridge");
    }
}
