//! Standalone chat lobby server.
//!
//! Usage:
//!   cargo run -p pktnet_server -- [--addr 127.0.0.1:40000] [--config net.json] [--tick-hz 20]
//!
//! Console commands:
//!   status         - Show connected clients per lobby
//!   say <message>  - Broadcast a notice to everyone
//!   quit           - Shutdown server

use std::env;
use std::io::BufRead;
use std::time::Duration;

use anyhow::Context;
use pktnet_server::lobby::{self, Nickname};
use pktnet_server::Server;
use pktnet_shared::chat::chat_registry;
use pktnet_shared::config::NetworkConfig;
use pktnet_shared::context::NetContext;
use pktnet_shared::packet::Message;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tracing::{info, warn};

struct Args {
    addr: String,
    config: Option<String>,
    tick_hz: u32,
}

fn parse_args() -> Args {
    let mut out = Args {
        addr: "127.0.0.1:40000".into(),
        config: None,
        tick_hz: 20,
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
            "--tick-hz" if i + 1 < args.len() => {
                out.tick_hz = args[i + 1].parse().unwrap_or(20).max(1);
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

/// Returns false when the server should stop.
fn exec_console(server: &Server, line: &str) -> anyhow::Result<bool> {
    let (cmd, rest) = line.split_once(' ').unwrap_or((line, ""));
    match cmd {
        "status" => {
            println!("{} client(s)", server.client_count());
            for group in server.group_names() {
                let names: Vec<String> = server
                    .group_members(&group)
                    .iter()
                    .map(|c| match c.info_as::<Nickname>() {
                        Some(nick) => format!("{} (#{})", nick.0, c.id()),
                        None => format!("#{}", c.id()),
                    })
                    .collect();
                println!("  {group}: {}", names.join(", "));
            }
        }
        "say" => {
            let sent = server
                .broadcast(&Message::new(rest), None, None)
                .context("broadcast notice")?;
            println!("sent to {sent} client(s)");
        }
        "quit" => return Ok(false),
        other => println!("Unknown command: {other}"),
    }
    Ok(true)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let args = parse_args();
    let cfg = load_config(args.config.as_deref())?;
    info!(addr = %args.addr, tick_hz = args.tick_hz, "Starting server");

    let ctx = NetContext::new(cfg, chat_registry().context("build packet registry")?);
    let server = Server::new(ctx);
    let listener = TcpListener::bind(args.addr.as_str()).await.context("tcp bind")?;
    info!(local = %listener.local_addr()?, "Server listening");
    let acceptor = lobby::spawn_acceptor(server.clone(), listener);

    // Set up console input channel.
    let (console_tx, mut console_rx) = mpsc::channel::<String>(32);

    // Spawn stdin reader thread.
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            let line = line.trim().to_string();
            if !line.is_empty() && console_tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    println!("Server ready. Type 'status' for info, 'quit' to exit.");

    let tick_interval = Duration::from_secs_f32(1.0 / args.tick_hz as f32);
    let mut next_tick = tokio::time::Instant::now();

    'run: loop {
        while let Ok(line) = console_rx.try_recv() {
            match exec_console(&server, &line) {
                Ok(true) => {}
                Ok(false) => break 'run,
                Err(e) => println!("Error: {e:#}"),
            }
        }

        server.update();
        if let Err(err) = lobby::process_packets(&server) {
            warn!(error = %err, "packet handling failed");
        }

        next_tick += tick_interval;
        tokio::time::sleep_until(next_tick).await;
    }

    acceptor.abort();
    server.shutdown();
    info!("Server stopped");
    Ok(())
}
