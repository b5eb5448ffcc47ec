//! Start-script generation
//!
//! The engine takes a `[GAME]` text script describing map, game archive,
//! teams and AI slots. Local games use a fixed layout: slot 0 is the
//! bridge-controlled team, slot 1 the configured opponent AI. The handshake
//! token and socket path ride in the bridge slot's `[Options]` block so the
//! bridge can prove its identity to the IPC router.

use std::path::Path;

/// Inputs for one start-script.
#[derive(Debug, Clone)]
pub struct StartScript {
    pub map: String,
    pub game: String,
    pub ai_name: String,
    pub opponent: String,
    pub player_name: String,
}

impl StartScript {
    /// Render the script text.
    pub fn render(&self, socket_path: &Path, token: &str) -> String {
        format!(
            r#"[GAME]
{{
    Mapname={map};
    Gametype={game};
    IsHost=1;
    MyPlayerNum=0;
    MyPlayerName={player};
    StartPosType=2;
    NumPlayers=0;
    NumUsers=2;
    NumTeams=2;
    NumAllyTeams=2;

    [TEAM0]
    {{
        TeamLeader=0;
        AllyTeam=0;
    }}

    [TEAM1]
    {{
        TeamLeader=0;
        AllyTeam=1;
    }}

    [AI0]
    {{
        Name={ai};
        ShortName={ai};
        Team=0;
        IsFromDemo=0;
        Host=0;
        [Options]
        {{
            socket_path={socket};
            handshake_token={token};
        }}
    }}

    [AI1]
    {{
        Name={opponent};
        ShortName={opponent};
        Team=1;
        IsFromDemo=0;
        Host=0;
    }}

    [ALLYTEAM0]
    {{
        NumAllies=0;
    }}

    [ALLYTEAM1]
    {{
        NumAllies=0;
    }}
}}"#,
            map = self.map,
            game = self.game,
            player = self.player_name,
            ai = self.ai_name,
            opponent = self.opponent,
            socket = socket_path.display(),
            token = token,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_script_slots() {
        let script = StartScript {
            map: "SimpleChess".into(),
            game: "Zero-K v1.12".into(),
            ai_name: "GMBridge".into(),
            opponent: "NullAI".into(),
            player_name: "gm".into(),
        };
        let text = script.render(Path::new("/tmp/gm-1.sock"), "tok-1");

        assert!(text.contains("Mapname=SimpleChess;"));
        assert!(text.contains("Gametype=Zero-K v1.12;"));
        assert!(text.contains("ShortName=GMBridge;"));
        assert!(text.contains("ShortName=NullAI;"));
        assert!(text.contains("socket_path=/tmp/gm-1.sock;"));
        assert!(text.contains("handshake_token=tok-1;"));
        // Two ally teams, bridge on team 0.
        assert!(text.contains("[ALLYTEAM1]"));
        assert!(text.contains("Team=0;"));
    }
}
