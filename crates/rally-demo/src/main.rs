//! Demo binary that hosts or joins a Rally session over TCP.
//!
//! Configuration is loaded from `config.ron` and can be overridden via CLI flags.
//! Run `rally host --port 9000` in one terminal and `rally join --port 9000`
//! in another; every line typed on stdin is sent to the other side.
//! On the host, `/list` prints connected peers and `/kick <peer>` disconnects one.

use std::process::ExitCode;

use clap::Parser;
use rally_config::{CliArgs, Config, Role, default_config_dir};
use rally_net::{
    ClientConfig, ClientEvent, GameClient, GameServer, NetError, PeerId, ServerConfig,
    ServerEvent,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> ExitCode {
    let args = CliArgs::parse();

    let mut config = match args.config.clone().map_or_else(default_config_dir, Ok) {
        Ok(dir) => Config::load_or_create(&dir).unwrap_or_else(|e| {
            eprintln!("Using default config: {e}");
            Config::default()
        }),
        Err(e) => {
            eprintln!("Using default config: {e}");
            Config::default()
        }
    };
    config.apply_cli_overrides(&args);
    rally_log::init_logging(
        config.debug.log_dir.as_deref(),
        cfg!(debug_assertions),
        Some(&config),
    );

    let result = match args.role {
        Role::Host => host(config.server).await,
        Role::Join => join(config.client).await,
    };
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

async fn host(config: ServerConfig) -> Result<(), NetError> {
    let (server, mut events) = GameServer::new(config)?;
    let addr = server.start().await?;
    info!("Hosting on {addr}");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    ServerEvent::Connected(peer) => info!("{peer} joined"),
                    ServerEvent::Disconnected(peer, reason) => info!("{peer} left ({reason:?})"),
                    ServerEvent::Data(peer, bytes) => {
                        println!("{peer}: {}", String::from_utf8_lossy(&bytes));
                    }
                }
            }
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => host_command(&server, &line).await,
                    Ok(None) => stdin_open = false,
                    Err(e) => {
                        warn!("stdin: {e}");
                        stdin_open = false;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    server.shutdown().await;
    Ok(())
}

async fn host_command(server: &GameServer, line: &str) {
    if line == "/list" {
        for peer in server.clients().await {
            println!("{peer}");
        }
    } else if let Some(peer) = line.strip_prefix("/kick ") {
        server.disconnect_client(&PeerId::from(peer.trim())).await;
    } else {
        let delivered = server.broadcast(line.as_bytes()).await;
        tracing::debug!("Sent to {delivered} peers");
    }
}

async fn join(config: ClientConfig) -> Result<(), NetError> {
    let (client, mut events) = GameClient::connect(config).await?;
    info!("Joined {}", client.server_addr());

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Some(ClientEvent::Connected) => {}
                    Some(ClientEvent::Data(bytes)) => {
                        println!("host: {}", String::from_utf8_lossy(&bytes));
                    }
                    Some(ClientEvent::Disconnected) | None => {
                        info!("Host closed the connection");
                        break;
                    }
                }
            }
            line = lines.next_line(), if stdin_open => {
                match line {
                    Ok(Some(line)) => client.send_text(&line).await?,
                    Ok(None) => stdin_open = false,
                    Err(e) => {
                        warn!("stdin: {e}");
                        stdin_open = false;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    client.disconnect().await;
    Ok(())
}
