//! Demo chat lobby on top of [`Server`].
//!
//! Handles the `chat` protocol: clients start in [`DEFAULT_LOBBY`], can move
//! with `JoinLobby` (confirmed by an echo carrying the request's code), name
//! themselves with `Nick`, and every `Chat` line is relayed to the sender's
//! lobby.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pktnet_client::tcp::TcpTransport;
use pktnet_client::Connection;
use pktnet_shared::chat::{chat_registry, Chat, JoinLobby, Nick, DEFAULT_LOBBY};
use pktnet_shared::config::NetworkConfig;
use pktnet_shared::context::NetContext;
use pktnet_shared::error::{NetError, NetResult};
use pktnet_shared::packet::Packet;

use crate::server::Server;

/// Display name stored in a connection's info slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nickname(pub String);

/// Places a newly accepted connection in the default lobby.
pub fn welcome(conn: &Arc<Connection>) {
    conn.set_group(Some(DEFAULT_LOBBY));
}

/// Consumes and handles every queued packet. Returns how many were handled.
///
/// A packet that fails for one client is logged and skipped; only fatal
/// protocol errors stop the pass.
pub fn process_packets(server: &Server) -> NetResult<usize> {
    let mut handled = 0;
    for conn in server.clients_with_packets() {
        while let Some(packet) = conn.next_packet() {
            match handle(server, &conn, packet.as_ref()) {
                Ok(()) => handled += 1,
                Err(err) if err.is_fatal() => return Err(err),
                Err(err) => {
                    warn!(client_id = conn.id(), packet = packet.type_name(), error = %err, "packet dropped");
                }
            }
        }
    }
    Ok(handled)
}

fn handle(server: &Server, conn: &Arc<Connection>, packet: &dyn Packet) -> NetResult<()> {
    let group = conn.group();
    if packet.is::<Chat>() {
        debug!(client_id = conn.id(), group = ?group, "relaying chat");
        server.broadcast(packet, group.as_deref(), Some(conn))?;
    } else if let Some(join) = packet.downcast_ref::<JoinLobby>() {
        server.set_group(conn, Some(&join.group));
        let mut reply = JoinLobby::new(join.group.clone());
        reply.meta.reply_to(packet.meta());
        match conn.send(&reply) {
            // The failed send already disconnected and unregistered the client.
            Err(NetError::Transport(err)) => {
                debug!(client_id = conn.id(), error = %err, "lobby reply not delivered");
                return Ok(());
            }
            other => other?,
        }
        info!(client_id = conn.id(), group = %join.group, "client changed lobby");
    } else if let Some(nick) = packet.downcast_ref::<Nick>() {
        conn.set_info(Nickname(nick.name.clone()));
        server.broadcast(packet, group.as_deref(), Some(conn))?;
    } else {
        warn!(client_id = conn.id(), packet = packet.type_name(), "unhandled packet");
    }
    Ok(())
}

/// Accepts TCP clients forever, registering each with `server`.
pub fn spawn_acceptor(server: Server, listener: TcpListener) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let (stream, addr) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(err) => {
                    warn!(error = %err, "tcp accept failed");
                    continue;
                }
            };
            let (transport, reader) = match TcpTransport::spawn(stream) {
                Ok(split) => split,
                Err(err) => {
                    warn!(%addr, error = %err, "tcp setup failed");
                    continue;
                }
            };
            match server.accept(transport) {
                Ok(conn) => {
                    welcome(&conn);
                    reader.pump(conn.clone());
                    info!(%addr, client_id = conn.id(), "client accepted");
                }
                Err(err) => warn!(%addr, error = %err, "rejecting client"),
            }
        }
    })
}

/// Binds a lobby server to an ephemeral localhost port.
pub async fn bind_ephemeral(cfg: NetworkConfig) -> anyhow::Result<(Server, TcpListener, SocketAddr)> {
    let listener = TcpListener::bind("127.0.0.1:0").await.context("tcp bind")?;
    let addr = listener.local_addr()?;
    let ctx = NetContext::new(cfg, chat_registry().context("build packet registry")?);
    Ok((Server::new(ctx), listener, addr))
}

#[cfg(test)]
mod tests {
    use pktnet_shared::chat::JOIN_LOBBY_ID;
    use pktnet_shared::transport::MemoryTransport;

    use super::*;

    #[test]
    fn join_moves_group_and_replies_with_code() {
        let ctx = NetContext::new(NetworkConfig::default(), chat_registry().unwrap());
        let server = Server::new(ctx.clone());
        let (transport, mut rx) = MemoryTransport::new();
        let conn = server.accept(transport).unwrap();
        welcome(&conn);
        server.update();
        assert_eq!(server.group_members(DEFAULT_LOBBY).len(), 1);

        let request = JoinLobby::new("arena".into());
        conn.on_bytes_received(&ctx.packets.pack(&request).unwrap()).unwrap();
        assert_eq!(process_packets(&server).unwrap(), 1);

        assert!(server.group_members(DEFAULT_LOBBY).is_empty());
        assert_eq!(server.group_members("arena").len(), 1);

        let _ack = rx.try_recv().unwrap();
        let reply = ctx.packets.unpack(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(reply.wire_id(), JOIN_LOBBY_ID);
        assert_eq!(reply.meta().code, request.meta.code);
        assert_eq!(reply.downcast_ref::<JoinLobby>().unwrap().group, "arena");
    }

    #[test]
    fn one_broken_client_does_not_stall_the_tick() {
        let ctx = NetContext::new(NetworkConfig::default(), chat_registry().unwrap());
        let server = Server::new(ctx.clone());
        let (a_transport, _a_rx) = MemoryTransport::new();
        let a = server.accept(a_transport.clone()).unwrap();
        let (b_transport, _b_rx) = MemoryTransport::new();
        let b = server.accept(b_transport).unwrap();
        let (c_transport, mut c_rx) = MemoryTransport::new();
        let c = server.accept(c_transport).unwrap();
        for conn in [&a, &b, &c] {
            welcome(conn);
        }
        server.update();
        while c_rx.try_recv().is_ok() {}

        a.on_bytes_received(&ctx.packets.pack(&JoinLobby::new("arena".into())).unwrap())
            .unwrap();
        b.on_bytes_received(&ctx.packets.pack(&Chat::new("still here".into())).unwrap())
            .unwrap();
        assert!(Arc::ptr_eq(&server.clients_with_packets()[0], &a));
        a_transport.break_pipe();

        assert_eq!(process_packets(&server).unwrap(), 2);
        assert!(!b.has_packets());
        assert!(a.is_closed());
        assert_eq!(server.client_count(), 2);

        let relayed = ctx.packets.unpack(&c_rx.try_recv().unwrap()).unwrap();
        assert_eq!(relayed.downcast_ref::<Chat>().unwrap().text, "still here");
    }

    #[test]
    fn nick_lands_in_the_info_slot() {
        let ctx = NetContext::new(NetworkConfig::default(), chat_registry().unwrap());
        let server = Server::new(ctx.clone());
        let (transport, _rx) = MemoryTransport::new();
        let conn = server.accept(transport).unwrap();
        server.update();

        conn.on_bytes_received(&ctx.packets.pack(&Nick::new("ada".into())).unwrap())
            .unwrap();
        process_packets(&server).unwrap();
        assert_eq!(
            conn.info_as::<Nickname>().as_deref(),
            Some(&Nickname("ada".into()))
        );
    }
}
