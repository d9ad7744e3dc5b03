//! Per-peer protocol state.
//!
//! A [`Connection`] owns one transport and tracks:
//! - the id the server assigned (or [`UNASSIGNED_ID`]),
//! - group membership and an opaque info slot,
//! - keepalive timers,
//! - the inbound packet buffer.
//!
//! The same type serves both ends. Client-side connections ping on a timer
//! and read the id acknowledgement as their first frame; server-side
//! connections echo pings and report new packets to their owner.
//!
//! The inbound buffer is replaced copy-on-write, so readers on the game
//! thread never see a list the transport thread is halfway through editing.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicI16, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, trace, warn};

use pktnet_shared::context::NetContext;
use pktnet_shared::error::{NetError, NetResult};
use pktnet_shared::packet::{Packet, Ping};
use pktnet_shared::transport::Transport;

/// Id of a connection the server has not acknowledged yet.
pub const UNASSIGNED_ID: i16 = -1;

/// Which end of the link a connection represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Client,
    Server,
}

/// Callbacks from a server-side connection to the registry that holds it.
///
/// Implementations must not call back into the connection's disconnect path
/// while holding their own locks.
pub trait ConnectionOwner: Send + Sync {
    /// A packet was queued on `conn`.
    fn on_packets_pending(&self, conn: &Arc<Connection>);

    /// `conn` is disconnecting and must leave every set it is in.
    fn on_detach(&self, conn: &Arc<Connection>);

    /// `conn` moved from `old` to its current group.
    fn on_group_changed(&self, conn: &Arc<Connection>, old: Option<&str>);
}

type Info = Arc<dyn Any + Send + Sync>;
type Inbound = Arc<Vec<Arc<dyn Packet>>>;

#[derive(Debug, Default)]
struct Keepalive {
    interval: Option<Duration>,
    since_last_ping: Duration,
    last_sent_at: Option<u64>,
    last_received_at: Option<u64>,
}

pub struct Connection {
    ctx: Arc<NetContext>,
    transport: Arc<dyn Transport>,
    side: Side,
    id: AtomicI16,
    closed: AtomicBool,
    group: Mutex<Option<String>>,
    info: Mutex<Option<Info>>,
    keepalive: Mutex<Keepalive>,
    last_traffic_at: AtomicU64,
    inbound: RwLock<Inbound>,
    owner: Mutex<Option<Weak<dyn ConnectionOwner>>>,
}

impl Connection {
    /// Client end: pings every `ping_interval_ms`, waits for its id.
    pub fn client(ctx: Arc<NetContext>, transport: Arc<dyn Transport>) -> Arc<Self> {
        let interval = ctx.config.ping_interval();
        Self::with_side(ctx, transport, Side::Client, interval)
    }

    /// Server end: no ping timer, echoes the peer's pings.
    pub fn server_side(ctx: Arc<NetContext>, transport: Arc<dyn Transport>) -> Arc<Self> {
        Self::with_side(ctx, transport, Side::Server, None)
    }

    fn with_side(
        ctx: Arc<NetContext>,
        transport: Arc<dyn Transport>,
        side: Side,
        ping_interval: Option<Duration>,
    ) -> Arc<Self> {
        let now = ctx.now_millis();
        Arc::new(Self {
            ctx,
            transport,
            side,
            id: AtomicI16::new(UNASSIGNED_ID),
            closed: AtomicBool::new(false),
            group: Mutex::new(None),
            info: Mutex::new(None),
            keepalive: Mutex::new(Keepalive {
                interval: ping_interval,
                ..Keepalive::default()
            }),
            last_traffic_at: AtomicU64::new(now),
            inbound: RwLock::new(Arc::new(Vec::new())),
            owner: Mutex::new(None),
        })
    }

    pub fn context(&self) -> &Arc<NetContext> {
        &self.ctx
    }

    pub fn side(&self) -> Side {
        self.side
    }

    pub fn id(&self) -> i16 {
        self.id.load(Ordering::Acquire)
    }

    pub fn set_id(&self, id: i16) {
        self.id.store(id, Ordering::Release);
    }

    pub fn is_assigned(&self) -> bool {
        self.id() != UNASSIGNED_ID
    }

    /// Not disconnected and the transport still reports a live link.
    pub fn is_connected(&self) -> bool {
        !self.closed.load(Ordering::Acquire) && self.transport.is_connected()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    // ---- owner ----

    pub fn set_owner(&self, owner: Weak<dyn ConnectionOwner>) {
        *self.owner.lock() = Some(owner);
    }

    /// Forgets the owner without notifying it.
    pub fn detach(&self) {
        self.owner.lock().take();
    }

    fn owner(&self) -> Option<Arc<dyn ConnectionOwner>> {
        self.owner.lock().as_ref().and_then(Weak::upgrade)
    }

    // ---- group / info ----

    pub fn group(&self) -> Option<String> {
        self.group.lock().clone()
    }

    /// Moves the connection to `group`; `None` or an empty name leaves all groups.
    pub fn set_group(self: &Arc<Self>, group: Option<&str>) {
        let new = group.filter(|g| !g.is_empty()).map(str::to_owned);
        let old = {
            let mut slot = self.group.lock();
            if *slot == new {
                return;
            }
            std::mem::replace(&mut *slot, new)
        };
        debug!(client_id = self.id(), from = ?old, to = ?self.group(), "group changed");
        if let Some(owner) = self.owner() {
            owner.on_group_changed(self, old.as_deref());
        }
    }

    pub fn info(&self) -> Option<Info> {
        self.info.lock().clone()
    }

    pub fn set_info<T: Any + Send + Sync>(&self, info: T) {
        *self.info.lock() = Some(Arc::new(info));
    }

    /// The info slot, if it holds a `T`.
    pub fn info_as<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.info().and_then(|info| info.downcast::<T>().ok())
    }

    // ---- keepalive ----

    pub fn ping_interval(&self) -> Option<Duration> {
        self.keepalive.lock().interval
    }

    /// `None` disables the ping timer.
    pub fn set_ping_interval(&self, interval: Option<Duration>) {
        let mut keepalive = self.keepalive.lock();
        keepalive.interval = interval;
        keepalive.since_last_ping = Duration::ZERO;
    }

    pub fn last_ping_sent_at(&self) -> Option<u64> {
        self.keepalive.lock().last_sent_at
    }

    pub fn last_ping_received_at(&self) -> Option<u64> {
        self.keepalive.lock().last_received_at
    }

    /// Clock millis of the last inbound frame, or of creation.
    pub fn last_traffic_at(&self) -> u64 {
        self.last_traffic_at.load(Ordering::Acquire)
    }

    /// Sweeps the inbound buffer, then advances the ping timer by `elapsed`.
    pub fn update(self: &Arc<Self>, elapsed: Duration) -> NetResult<()> {
        self.sweep();

        let due = {
            let mut keepalive = self.keepalive.lock();
            match keepalive.interval {
                Some(interval) => {
                    keepalive.since_last_ping += elapsed;
                    if keepalive.since_last_ping >= interval {
                        keepalive.since_last_ping = Duration::ZERO;
                        true
                    } else {
                        false
                    }
                }
                None => false,
            }
        };

        if due && self.is_connected() {
            self.send(&Ping::new())?;
            self.keepalive.lock().last_sent_at = Some(self.ctx.now_millis());
            trace!(client_id = self.id(), "ping sent");
        }
        Ok(())
    }

    // ---- sending ----

    /// Encodes and sends `packet`.
    ///
    /// A transport failure disconnects this connection silently and is
    /// returned as [`NetError::Transport`].
    pub fn send(self: &Arc<Self>, packet: &dyn Packet) -> NetResult<()> {
        if !self.is_connected() {
            return Err(NetError::NotConnected);
        }
        let sender = match self.side {
            Side::Client => Some(self.id()),
            Side::Server => None,
        };
        let frame = self.ctx.packets.pack_as(packet, sender)?;
        self.send_frame(frame)
    }

    /// Sends an already-encoded frame.
    pub fn send_frame(self: &Arc<Self>, frame: Bytes) -> NetResult<()> {
        if !self.is_connected() {
            return Err(NetError::NotConnected);
        }
        if let Err(err) = self.transport.send(frame) {
            warn!(client_id = self.id(), error = %err, "send failed, dropping connection");
            self.disconnect_silently();
            return Err(NetError::Transport(err));
        }
        Ok(())
    }

    // ---- disconnect ----

    pub fn disconnect(self: &Arc<Self>) {
        if self.close() {
            info!(client_id = self.id(), group = ?self.group(), "disconnected");
        }
    }

    /// Like [`disconnect`](Self::disconnect) without the info log.
    pub fn disconnect_silently(self: &Arc<Self>) {
        if self.close() {
            debug!(client_id = self.id(), "disconnected silently");
        }
    }

    /// Detaches from the owner, then closes the transport. False if already closed.
    fn close(self: &Arc<Self>) -> bool {
        if self.closed.swap(true, Ordering::AcqRel) {
            return false;
        }
        let owner = self.owner.lock().take().and_then(|weak| weak.upgrade());
        if let Some(owner) = owner {
            owner.on_detach(self);
        }
        if let Err(err) = self.transport.close() {
            debug!(client_id = self.id(), error = %err, "transport close failed");
        }
        true
    }

    // ---- receiving ----

    /// Handles one inbound frame from the transport.
    pub fn on_bytes_received(self: &Arc<Self>, frame: &[u8]) -> NetResult<()> {
        let now = self.ctx.now_millis();
        self.last_traffic_at.store(now, Ordering::Release);

        if self.side == Side::Client && !self.is_assigned() {
            let id = self.ctx.packets.unpack_id_ack(frame)?;
            self.set_id(id);
            info!(client_id = id, "id assigned");
            return Ok(());
        }

        let mut packet = self.ctx.packets.unpack(frame)?;
        if packet.is_ping() {
            self.keepalive.lock().last_received_at = Some(now);
            if self.side == Side::Server {
                self.send(&Ping::new())?;
            }
            return Ok(());
        }

        packet.meta_mut().received_at = Some(now);
        trace!(client_id = self.id(), type_id = packet.wire_id(), "packet queued");
        let packet: Arc<dyn Packet> = Arc::from(packet);
        {
            let mut inbound = self.inbound.write();
            Arc::make_mut(&mut inbound).push(packet);
        }

        if self.side == Side::Server {
            if let Some(owner) = self.owner() {
                owner.on_packets_pending(self);
            }
        }
        Ok(())
    }

    // ---- inbound buffer ----

    /// Drops consumed and expired packets. Returns true if live packets remain.
    pub fn sweep(&self) -> bool {
        let now = self.ctx.now_millis();
        let window = self.ctx.config.packet_expiry();
        let mut inbound = self.inbound.write();
        if inbound.iter().any(|p| !p.meta().is_live(now, window)) {
            Arc::make_mut(&mut inbound).retain(|p| p.meta().is_live(now, window));
        }
        !inbound.is_empty()
    }

    fn snapshot(&self) -> Inbound {
        self.inbound.read().clone()
    }

    /// Live packets in arrival order.
    pub fn packets(&self) -> Vec<Arc<dyn Packet>> {
        let now = self.ctx.now_millis();
        let window = self.ctx.config.packet_expiry();
        self.snapshot()
            .iter()
            .filter(|p| p.meta().is_live(now, window))
            .cloned()
            .collect()
    }

    pub fn has_packets(&self) -> bool {
        self.find_packet(|_| true).is_some()
    }

    /// First live packet matching `pred`, left unconsumed.
    pub fn find_packet(&self, pred: impl Fn(&dyn Packet) -> bool) -> Option<Arc<dyn Packet>> {
        let now = self.ctx.now_millis();
        let window = self.ctx.config.packet_expiry();
        self.snapshot()
            .iter()
            .find(|&p| p.meta().is_live(now, window) && pred(&**p))
            .cloned()
    }

    /// Takes the oldest live packet, marking it consumed.
    pub fn next_packet(&self) -> Option<Arc<dyn Packet>> {
        let packet = self.find_packet(|_| true)?;
        packet.consume();
        Some(packet)
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("side", &self.side)
            .field("group", &self.group())
            .field("connected", &self.is_connected())
            .field("queued", &self.snapshot().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pktnet_shared::chat::{chat_registry, Chat};
    use pktnet_shared::clock::ManualClock;
    use pktnet_shared::config::NetworkConfig;
    use pktnet_shared::packet::{Expiry, Message, PING_ID};
    use pktnet_shared::transport::MemoryTransport;
    use tokio::sync::mpsc::UnboundedReceiver;

    fn setup(side: Side) -> (Arc<Connection>, UnboundedReceiver<Bytes>, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let ctx = NetContext::builder(NetworkConfig::default())
            .registry(chat_registry().unwrap())
            .clock(clock.clone())
            .build();
        let (transport, rx) = MemoryTransport::new();
        let conn = match side {
            Side::Client => Connection::client(ctx, transport),
            Side::Server => Connection::server_side(ctx, transport),
        };
        (conn, rx, clock)
    }

    #[test]
    fn client_pings_when_interval_elapses() {
        let (conn, mut rx, _clock) = setup(Side::Client);
        conn.set_id(3);

        conn.update(Duration::from_millis(5_999)).unwrap();
        assert!(rx.try_recv().is_err());

        conn.update(Duration::from_millis(1)).unwrap();
        assert_eq!(rx.try_recv().unwrap().as_ref(), &PING_ID.to_be_bytes());
        assert!(conn.last_ping_sent_at().is_some());

        conn.update(Duration::from_millis(5_999)).unwrap();
        assert!(rx.try_recv().is_err(), "timer resets after each ping");
    }

    #[test]
    fn disabled_interval_never_pings() {
        let (conn, mut rx, _clock) = setup(Side::Client);
        conn.set_ping_interval(None);
        conn.update(Duration::from_secs(3_600)).unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn first_client_frame_is_the_id_ack() {
        let (conn, _rx, _clock) = setup(Side::Client);
        let ack = conn.context().packets.pack_id_ack(12).unwrap();
        conn.on_bytes_received(&ack).unwrap();
        assert_eq!(conn.id(), 12);
        assert!(!conn.has_packets());
    }

    #[test]
    fn server_side_echoes_pings_without_queueing() {
        let (conn, mut rx, _clock) = setup(Side::Server);
        conn.on_bytes_received(&PING_ID.to_be_bytes()).unwrap();
        assert_eq!(rx.try_recv().unwrap().as_ref(), &PING_ID.to_be_bytes());
        assert_eq!(conn.last_ping_received_at(), Some(1_000));
        assert!(conn.packets().is_empty());
    }

    #[test]
    fn received_packets_queue_until_consumed() {
        let (conn, _rx, _clock) = setup(Side::Server);
        let frame = conn.context().packets.pack(&Chat::new("hi".into())).unwrap();
        conn.on_bytes_received(&frame).unwrap();

        let packet = conn.next_packet().unwrap();
        assert_eq!(packet.downcast_ref::<Chat>().unwrap().text, "hi");
        assert_eq!(packet.meta().received_at, Some(1_000));
        assert!(!conn.has_packets());
        assert!(!conn.sweep());
    }

    #[test]
    fn unconsumed_packets_expire() {
        let (conn, _rx, clock) = setup(Side::Server);
        let frame = conn.context().packets.pack(&Message::new("old")).unwrap();
        conn.on_bytes_received(&frame).unwrap();

        clock.advance(Duration::from_millis(29_999));
        assert!(conn.sweep());
        clock.advance(Duration::from_millis(1));
        assert!(conn.packets().is_empty());
        assert!(!conn.sweep());
    }

    pktnet_shared::packet! {
        struct Beacon {
            seq: u32,
        }
    }

    #[test]
    fn never_expiring_type_outlives_the_window() {
        let clock = Arc::new(ManualClock::new(0));
        let mut registry = chat_registry().unwrap();
        registry
            .register_factory(40, || {
                let mut beacon = Beacon::default();
                beacon.meta.expiry = Expiry::Never;
                beacon
            })
            .unwrap();
        let ctx = NetContext::builder(NetworkConfig::default())
            .registry(registry)
            .clock(clock.clone())
            .build();
        let (transport, _rx) = MemoryTransport::new();
        let conn = Connection::server_side(ctx, transport);

        let frame = conn.context().packets.pack(&Beacon::new(1)).unwrap();
        conn.on_bytes_received(&frame).unwrap();
        let frame = conn.context().packets.pack(&Message::new("short-lived")).unwrap();
        conn.on_bytes_received(&frame).unwrap();

        clock.advance(Duration::from_secs(3_600));
        conn.update(Duration::ZERO).unwrap();
        let left = conn.packets();
        assert_eq!(left.len(), 1);
        assert_eq!(left[0].downcast_ref::<Beacon>().unwrap().seq, 1);
    }

    #[test]
    fn send_after_disconnect_is_rejected() {
        let (conn, _rx, _clock) = setup(Side::Client);
        conn.disconnect();
        conn.disconnect();
        assert!(conn.is_closed());
        assert!(matches!(
            conn.send(&Message::new("late")),
            Err(NetError::NotConnected)
        ));
    }

    #[test]
    fn transport_failure_disconnects() {
        let clock = Arc::new(ManualClock::new(0));
        let ctx = NetContext::builder(NetworkConfig::default()).clock(clock).build();
        let (transport, _rx) = MemoryTransport::new();
        let conn = Connection::client(ctx, transport.clone());
        transport.break_pipe();

        assert!(matches!(
            conn.send(&Message::new("x")),
            Err(NetError::Transport(_))
        ));
        assert!(conn.is_closed());
    }

    #[test]
    fn client_stamps_its_id_as_sender() {
        let (conn, mut rx, _clock) = setup(Side::Client);
        conn.set_id(5);
        conn.send(&Chat::new("yo".into())).unwrap();
        let frame = rx.try_recv().unwrap();
        let back = conn.context().packets.unpack(&frame).unwrap();
        assert_eq!(back.meta().sender_id, 5);
    }

    #[test]
    fn group_and_info_slots() {
        let (conn, _rx, _clock) = setup(Side::Server);
        conn.set_group(Some("lobby"));
        assert_eq!(conn.group().as_deref(), Some("lobby"));
        conn.set_group(Some(""));
        assert_eq!(conn.group(), None);

        conn.set_info(String::from("alice"));
        assert_eq!(conn.info_as::<String>().as_deref().map(String::as_str), Some("alice"));
        assert!(conn.info_as::<u32>().is_none());
    }
}
