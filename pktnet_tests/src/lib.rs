//! Helpers shared by the integration tests.
//!
//! [`Link`] joins a client-side and a server-side [`Connection`] through two
//! in-memory transports; [`Link::pump`] moves queued frames across, standing
//! in for the socket reader tasks.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc::UnboundedReceiver;

use pktnet_client::Connection;
use pktnet_server::Server;
use pktnet_shared::context::NetContext;
use pktnet_shared::error::NetResult;
use pktnet_shared::transport::MemoryTransport;

/// One client wired to a server over memory transports.
pub struct Link {
    pub client: Arc<Connection>,
    pub server_side: Arc<Connection>,
    pub client_transport: Arc<MemoryTransport>,
    pub server_transport: Arc<MemoryTransport>,
    to_server: UnboundedReceiver<Bytes>,
    to_client: UnboundedReceiver<Bytes>,
}

impl Link {
    /// Accepts a new client on `server` and delivers the id acknowledgement.
    pub fn connect(server: &Server, ctx: Arc<NetContext>) -> NetResult<Self> {
        let (client_transport, to_server) = MemoryTransport::new();
        let (server_transport, to_client) = MemoryTransport::new();
        let server_side = server.accept(server_transport.clone())?;
        let client = Connection::client(ctx, client_transport.clone());
        let mut link = Self {
            client,
            server_side,
            client_transport,
            server_transport,
            to_server,
            to_client,
        };
        link.pump()?;
        Ok(link)
    }

    /// Delivers every queued frame in both directions until both are idle.
    /// Returns the number of frames moved.
    pub fn pump(&mut self) -> NetResult<usize> {
        let mut moved = 0;
        loop {
            let mut progressed = false;
            while let Ok(frame) = self.to_server.try_recv() {
                self.server_side.on_bytes_received(&frame)?;
                moved += 1;
                progressed = true;
            }
            while let Ok(frame) = self.to_client.try_recv() {
                self.client.on_bytes_received(&frame)?;
                moved += 1;
                progressed = true;
            }
            if !progressed {
                return Ok(moved);
            }
        }
    }
}

/// Installs a test-friendly tracing subscriber once per process.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("info")
        .with_test_writer()
        .try_init();
}
