//! Standalone chat client.
//!
//! Usage:
//!   cargo run -p pktnet_client -- [--addr 127.0.0.1:40000] [--config net.json]
//!                                 [--group lobby] [--name player]
//!
//! Lines typed on stdin are sent as chat to the current lobby.
//!
//! Console commands:
//!   /join <group>  - Move to another lobby
//!   /nick <name>   - Change display name
//!   /quit          - Exit client

use std::collections::HashMap;
use std::env;
use std::io::BufRead;
use std::net::SocketAddr;
use std::time::Duration;

use anyhow::Context;
use pktnet_client::{tcp, Connection};
use pktnet_shared::chat::{chat_registry, Chat, JoinLobby, Nick, DEFAULT_LOBBY};
use pktnet_shared::config::NetworkConfig;
use pktnet_shared::context::NetContext;
use pktnet_shared::packet::Message;
use tokio::sync::mpsc;
use tracing::{info, warn};

struct Args {
    addr: String,
    config: Option<String>,
    group: String,
    name: String,
}

fn parse_args() -> Args {
    let mut out = Args {
        addr: "127.0.0.1:40000".into(),
        config: None,
        group: DEFAULT_LOBBY.into(),
        name: "player".into(),
    };
    let args: Vec<String> = env::args().collect();
    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--addr" if i + 1 < args.len() => {
                out.addr = args[i + 1].clone();
                i += 2;
            }
            "--config" if i + 1 < args.len() => {
                out.config = Some(args[i + 1].clone());
                i += 2;
            }
            "--group" if i + 1 < args.len() => {
                out.group = args[i + 1].clone();
                i += 2;
            }
            "--name" if i + 1 < args.len() => {
                out.name = args[i + 1].clone();
                i += 2;
            }
            _ => i += 1,
        }
    }
    out
}

fn load_config(path: Option<&str>) -> anyhow::Result<NetworkConfig> {
    match path {
        Some(path) => {
            let text = std::fs::read_to_string(path).with_context(|| format!("read {path}"))?;
            NetworkConfig::from_json_str(&text).with_context(|| format!("parse {path}"))
        }
        None => Ok(NetworkConfig::default()),
    }
}

/// Prints every queued packet and consumes it.
fn drain_inbound(conn: &Connection, names: &mut HashMap<i16, String>) {
    while let Some(packet) = conn.next_packet() {
        let sender = packet.meta().sender_id;
        if let Some(chat) = packet.downcast_ref::<Chat>() {
            let who = names.get(&sender).cloned().unwrap_or_else(|| format!("#{sender}"));
            println!("<{who}> {}", chat.text);
        } else if let Some(nick) = packet.downcast_ref::<Nick>() {
            println!("* #{sender} is now known as {}", nick.name);
            names.insert(sender, nick.name.clone());
        } else if let Some(join) = packet.downcast_ref::<JoinLobby>() {
            println!("-- now in '{}'", join.group);
        } else if let Some(notice) = packet.downcast_ref::<Message>() {
            println!("-- {}", notice.text);
        } else {
            warn!(packet = packet.type_name(), "unexpected packet");
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = parse_args();
    let cfg = load_config(args.config.as_deref())?;
    let addr: SocketAddr = args.addr.parse().context("parse --addr")?;
    info!(server = %addr, group = %args.group, name = %args.name, "Starting client");

    let ctx = NetContext::new(cfg, chat_registry().context("build packet registry")?);
    let conn = tcp::connect(ctx, addr).await.context("connect")?;

    let id = {
        let conn = conn.clone();
        let opts = conn.wait_options();
        tokio::task::spawn_blocking(move || conn.wait_for_id(opts))
            .await
            .context("join id wait")?
            .context("wait for id")?
    };
    info!(client_id = id, "Connected to server");

    conn.send(&Nick::new(args.name.clone())).context("send nick")?;
    conn.send(&JoinLobby::new(args.group.clone())).context("join lobby")?;

    // Set up console input channel.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        loop {
            let mut line = String::new();
            match stdin.lock().read_line(&mut line) {
                Ok(0) | Err(_) => break,
                Ok(_) => {}
            }
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Joined '{}'. Type to chat, '/quit' to exit.", args.group);

    let tick = Duration::from_millis(50);
    let mut names = HashMap::new();
    let mut last = tokio::time::Instant::now();

    loop {
        while let Ok(line) = console_rx.try_recv() {
            let result = if let Some(group) = line.strip_prefix("/join ") {
                conn.send(&JoinLobby::new(group.trim().to_string()))
            } else if let Some(name) = line.strip_prefix("/nick ") {
                conn.send(&Nick::new(name.trim().to_string()))
            } else if line == "/quit" {
                conn.disconnect();
                return Ok(());
            } else {
                conn.send(&Chat::sanitized(&line))
            };
            if let Err(e) = result {
                println!("Error: {e}");
            }
        }

        let now = tokio::time::Instant::now();
        conn.update(now - last).context("update")?;
        last = now;

        drain_inbound(&conn, &mut names);

        if !conn.is_connected() {
            println!("Disconnected from server.");
            break;
        }

        tokio::time::sleep(tick).await;
    }

    Ok(())
}
