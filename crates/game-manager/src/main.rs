//! GameManager entry point
//!
//! Serves one agent-host session over stdio (`--stdio`) or TCP
//! (`--tcp <port>`). Logging always goes to stderr; stdout belongs to the
//! transport in stdio mode.
//!
//! Exit codes: 0 normal shutdown, 1 fatal configuration error, 2 upstream
//! transport lost without graceful shutdown.

use game_manager::session::{SessionEnd, SessionRunner};
use gm_engine::{spawn_engine_service, SupervisorPaths};
use gm_lobby::spawn_lobby_service;
use gm_mux::MuxConnection;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::net::TcpListener;
use tracing::info;

struct Cli {
    stdio: bool,
    tcp_port: u16,
    write_dir: Option<PathBuf>,
}

fn parse_args() -> anyhow::Result<Cli> {
    let mut cli = Cli {
        stdio: false,
        tcp_port: 9800,
        write_dir: None,
    };
    let mut args = std::env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--stdio" => cli.stdio = true,
            "--tcp" => {
                let port = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--tcp requires a port"))?;
                cli.tcp_port = port
                    .parse()
                    .map_err(|_| anyhow::anyhow!("invalid port: {}", port))?;
            }
            "--write-dir" => {
                let path = args
                    .next()
                    .ok_or_else(|| anyhow::anyhow!("--write-dir requires a path"))?;
                cli.write_dir = Some(PathBuf::from(path));
            }
            other => anyhow::bail!("unknown argument: {}", other),
        }
    }
    Ok(cli)
}

fn supervisor_paths(cli: &Cli) -> SupervisorPaths {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".into());

    let engine_binary = std::env::var("ENGINE_PATH")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from("/usr/local/bin/spring-dedicated"));
    let content_home = std::env::var("SPRING_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| PathBuf::from(format!("{}/.spring", home)));
    let write_dir_root = cli
        .write_dir
        .clone()
        .or_else(|| std::env::var("GM_WRITE_DIR").ok().map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(format!("{}/.game-manager", home)));

    let mut paths = SupervisorPaths::new(engine_binary, content_home, write_dir_root);
    if let Ok(dir) = std::env::var("SOCKET_DIR") {
        paths.socket_dir = PathBuf::from(dir);
    }
    if let Ok(lib) = std::env::var("GM_BRIDGE_LIB") {
        paths.bridge_lib = Some(PathBuf::from(lib));
    }
    if let Ok(data) = std::env::var("GM_BRIDGE_DATA") {
        paths.bridge_data = Some(PathBuf::from(data));
    }
    if let Ok(widget) = std::env::var("GM_WIDGET_SOURCE") {
        paths.widget_source = Some(PathBuf::from(widget));
    }
    paths
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "game_manager=info,gm_mux=info,gm_lobby=info,gm_engine=info"
                    .parse()
                    .expect("default filter is valid")
            }),
        )
        .init();

    let cli = match parse_args() {
        Ok(cli) => cli,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(1);
        }
    };

    let (lobby, lobby_events) = spawn_lobby_service();
    let (engine, engine_notices) = spawn_engine_service(supervisor_paths(&cli));

    let conn = if cli.stdio {
        info!("serving session on stdio");
        MuxConnection::from_parts(
            Box::new(tokio::io::stdin()),
            Box::new(tokio::io::stdout()),
        )
    } else {
        let addr = format!("127.0.0.1:{}", cli.tcp_port);
        let listener = match TcpListener::bind(&addr).await {
            Ok(l) => l,
            Err(e) => {
                eprintln!("error: cannot bind {}: {}", addr, e);
                return ExitCode::from(1);
            }
        };
        info!("listening on {}", addr);
        match listener.accept().await {
            Ok((stream, peer)) => {
                info!("client connected from {}", peer);
                MuxConnection::from_tcp(stream)
            }
            Err(e) => {
                eprintln!("error: accept failed: {}", e);
                return ExitCode::from(1);
            }
        }
    };

    let runner = match SessionRunner::new(conn, lobby, lobby_events, engine, engine_notices) {
        Ok(runner) => runner,
        Err(e) => {
            eprintln!("error: {}", e);
            return ExitCode::from(1);
        }
    };

    match runner.run().await {
        SessionEnd::Graceful => {
            info!("session closed gracefully");
            ExitCode::SUCCESS
        }
        SessionEnd::TransportLost => {
            info!("session transport lost");
            ExitCode::from(2)
        }
    }
}
