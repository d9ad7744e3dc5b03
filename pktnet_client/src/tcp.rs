//! TCP transport with `u32` big-endian length-prefixed frames.
//!
//! The socket is split in two tokio tasks:
//! - a writer fed by an unbounded channel, so [`Transport::send`] never blocks
//!   the game loop,
//! - a reader ([`FrameReader::pump`]) that hands each frame to
//!   [`Connection::on_bytes_received`].

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::{BufMut, Bytes, BytesMut};
use parking_lot::Mutex;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pktnet_shared::context::NetContext;
use pktnet_shared::transport::Transport;

use crate::connection::Connection;

/// Frames larger than this are treated as a corrupt stream.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

#[derive(Debug)]
struct LinkState {
    connected: AtomicBool,
    shutdown: Notify,
}

impl LinkState {
    fn close(&self) {
        if self.connected.swap(false, Ordering::AcqRel) {
            self.shutdown.notify_one();
        }
    }
}

/// Sending half of a TCP link.
#[derive(Debug)]
pub struct TcpTransport {
    tx: Mutex<Option<mpsc::UnboundedSender<Bytes>>>,
    link: Arc<LinkState>,
    peer: SocketAddr,
}

impl TcpTransport {
    /// Splits `stream` and spawns the writer task. Must run inside a tokio runtime.
    pub fn spawn(stream: TcpStream) -> io::Result<(Arc<Self>, FrameReader)> {
        let peer = stream.peer_addr()?;
        stream.set_nodelay(true)?;
        let (read, write) = stream.into_split();
        let link = Arc::new(LinkState {
            connected: AtomicBool::new(true),
            shutdown: Notify::new(),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(write_loop(write, rx, link.clone(), peer));

        let transport = Arc::new(Self {
            tx: Mutex::new(Some(tx)),
            link: link.clone(),
            peer,
        });
        Ok((transport, FrameReader { read, link, peer }))
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }
}

impl Transport for TcpTransport {
    fn send(&self, frame: Bytes) -> io::Result<()> {
        if !self.is_connected() {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "tcp link closed"));
        }
        match self.tx.lock().as_ref() {
            Some(tx) => tx
                .send(frame)
                .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "tcp writer gone")),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "tcp link closed")),
        }
    }

    fn close(&self) -> io::Result<()> {
        // Dropping the sender lets the writer flush queued frames and shut down.
        self.tx.lock().take();
        self.link.close();
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.link.connected.load(Ordering::Acquire)
    }
}

async fn write_loop(
    mut write: OwnedWriteHalf,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    link: Arc<LinkState>,
    peer: SocketAddr,
) {
    while let Some(frame) = rx.recv().await {
        let mut buf = BytesMut::with_capacity(4 + frame.len());
        buf.put_u32(frame.len() as u32);
        buf.extend_from_slice(&frame);
        if let Err(err) = write.write_all(&buf).await {
            warn!(%peer, error = %err, "tcp write failed");
            link.close();
            return;
        }
    }
    if let Err(err) = write.shutdown().await {
        debug!(%peer, error = %err, "tcp shutdown failed");
    }
    debug!(%peer, "tcp writer finished");
}

/// Receiving half of a TCP link.
#[derive(Debug)]
pub struct FrameReader {
    read: OwnedReadHalf,
    link: Arc<LinkState>,
    peer: SocketAddr,
}

impl FrameReader {
    /// Reads one length-prefixed frame.
    pub async fn recv(&mut self) -> io::Result<Bytes> {
        let len = self.read.read_u32().await? as usize;
        if len > MAX_FRAME_LEN {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("frame of {len} bytes exceeds limit"),
            ));
        }
        let mut payload = vec![0u8; len];
        self.read.read_exact(&mut payload).await?;
        Ok(Bytes::from(payload))
    }

    /// Spawns the task that feeds frames into `conn` until either side closes.
    ///
    /// Frames that fail to decode are logged and dropped; fatal protocol
    /// errors disconnect the peer.
    pub fn pump(mut self, conn: Arc<Connection>) -> JoinHandle<()> {
        let link = self.link.clone();
        tokio::spawn(async move {
            loop {
                let frame = tokio::select! {
                    frame = self.recv() => frame,
                    _ = link.shutdown.notified() => {
                        conn.disconnect_silently();
                        break;
                    }
                };
                match frame {
                    Ok(frame) => {
                        if let Err(err) = conn.on_bytes_received(&frame) {
                            warn!(peer = %self.peer, client_id = conn.id(), error = %err, "bad frame");
                            if err.is_fatal() {
                                conn.disconnect();
                                break;
                            }
                        }
                    }
                    Err(err) => {
                        if err.kind() == io::ErrorKind::UnexpectedEof {
                            info!(peer = %self.peer, client_id = conn.id(), "peer closed connection");
                        } else {
                            warn!(peer = %self.peer, error = %err, "tcp read failed");
                        }
                        link.close();
                        conn.disconnect_silently();
                        break;
                    }
                }
            }
            debug!(peer = %self.peer, "tcp reader finished");
        })
    }
}

/// Connects to `addr` and starts a client-side connection over it.
pub async fn connect(ctx: Arc<NetContext>, addr: SocketAddr) -> io::Result<Arc<Connection>> {
    let stream = TcpStream::connect(addr).await?;
    let (transport, reader) = TcpTransport::spawn(stream)?;
    let conn = Connection::client(ctx, transport);
    reader.pump(conn.clone());
    info!(%addr, "connected");
    Ok(conn)
}
