//! Ping cycle under simulated elapsed time.

use std::sync::Arc;
use std::time::Duration;

use pktnet_server::Server;
use pktnet_shared::clock::ManualClock;
use pktnet_shared::config::NetworkConfig;
use pktnet_shared::context::NetContext;
use pktnet_shared::transport::Transport;
use pktnet_tests::{init_tracing, Link};

fn setup(cfg: NetworkConfig) -> anyhow::Result<(Server, Arc<ManualClock>, Link)> {
    init_tracing();
    let clock = Arc::new(ManualClock::new(0));
    let ctx = NetContext::builder(cfg).clock(clock.clone()).build();
    let server = Server::new(ctx.clone());
    let link = Link::connect(&server, ctx)?;
    server.update();
    Ok((server, clock, link))
}

#[test]
fn client_pings_and_server_echoes() -> anyhow::Result<()> {
    let (server, clock, mut link) = setup(NetworkConfig::default())?;

    for _ in 0..5 {
        clock.advance(Duration::from_secs(1));
        link.client.update(Duration::from_secs(1))?;
    }
    assert_eq!(link.pump()?, 0, "no ping before the interval");

    clock.advance(Duration::from_secs(1));
    link.client.update(Duration::from_secs(1))?;
    assert_eq!(link.client.last_ping_sent_at(), Some(6_000));
    assert_eq!(link.pump()?, 2, "ping out, echo back");

    assert_eq!(link.server_side.last_ping_received_at(), Some(6_000));
    assert_eq!(link.client.last_ping_received_at(), Some(6_000));
    assert!(!link.server_side.has_packets());
    assert!(!link.client.has_packets());
    assert!(server.clients_with_packets().is_empty());
    Ok(())
}

#[test]
fn pings_keep_a_quiet_client_alive() -> anyhow::Result<()> {
    let (server, clock, mut link) = setup(NetworkConfig::default())?;

    for _ in 0..20 {
        clock.advance(Duration::from_secs(3));
        link.client.update(Duration::from_secs(3))?;
        link.pump()?;
        server.update();
    }
    assert_eq!(server.active_clients().len(), 1);
    assert!(link.client.is_connected());
    Ok(())
}

#[test]
fn silent_client_is_dropped() -> anyhow::Result<()> {
    let cfg = NetworkConfig {
        ping_interval_ms: -1,
        connection_timeout_ms: 10_000,
        ..NetworkConfig::default()
    };
    let (server, clock, mut link) = setup(cfg)?;

    clock.advance(Duration::from_secs(9));
    link.client.update(Duration::from_secs(9))?;
    assert_eq!(link.pump()?, 0);
    server.update();
    assert_eq!(server.active_clients().len(), 1);

    clock.advance(Duration::from_secs(2));
    server.update();
    assert!(server.active_clients().is_empty());
    assert!(link.server_side.is_closed());
    assert!(!link.server_transport.is_connected());
    Ok(())
}
