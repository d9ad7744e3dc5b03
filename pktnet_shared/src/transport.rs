//! Transport abstraction.
//!
//! The protocol core never touches sockets. A transport moves whole frames
//! and reports liveness; inbound frames are pushed into the connection by
//! whoever owns the socket (a reader task, a callback, a test).

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

/// Frame-oriented byte pipe to one peer.
pub trait Transport: Send + Sync {
    /// Queues one frame. Must not block the game loop.
    fn send(&self, frame: Bytes) -> io::Result<()>;

    fn close(&self) -> io::Result<()>;

    fn is_connected(&self) -> bool;
}

/// In-process transport: sent frames land on an unbounded channel.
///
/// Used by tests and by embedders that shuttle frames themselves.
#[derive(Debug)]
pub struct MemoryTransport {
    tx: mpsc::UnboundedSender<Bytes>,
    connected: AtomicBool,
    fail_sends: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Bytes>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::new(Self {
            tx,
            connected: AtomicBool::new(true),
            fail_sends: AtomicBool::new(false),
        });
        (transport, rx)
    }

    /// Makes every following send fail with `BrokenPipe`.
    pub fn break_pipe(&self) {
        self.fail_sends.store(true, Ordering::SeqCst);
    }

    pub fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::SeqCst);
    }
}

impl Transport for MemoryTransport {
    fn send(&self, frame: Bytes) -> io::Result<()> {
        if self.fail_sends.load(Ordering::SeqCst) || !self.is_connected() {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "memory transport closed"));
        }
        self.tx
            .send(frame)
            .map_err(|_| io::Error::new(io::ErrorKind::BrokenPipe, "receiver dropped"))
    }

    fn close(&self) -> io::Result<()> {
        self.connected.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frames_arrive_in_order() {
        let (transport, mut rx) = MemoryTransport::new();
        transport.send(Bytes::from_static(b"a")).unwrap();
        transport.send(Bytes::from_static(b"b")).unwrap();
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"a"));
        assert_eq!(rx.try_recv().unwrap(), Bytes::from_static(b"b"));
    }

    #[test]
    fn broken_or_closed_transport_rejects_sends() {
        let (transport, _rx) = MemoryTransport::new();
        transport.break_pipe();
        assert!(transport.send(Bytes::new()).is_err());

        let (transport, _rx) = MemoryTransport::new();
        transport.close().unwrap();
        assert!(!transport.is_connected());
        assert_eq!(
            transport.send(Bytes::new()).unwrap_err().kind(),
            io::ErrorKind::BrokenPipe
        );
    }
}
