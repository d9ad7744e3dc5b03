//! Blocking wait API.
//!
//! Every wait is a sleep-poll loop on the calling thread. Never call these
//! from the thread that delivers inbound frames: the wait would starve the
//! very delivery it is waiting for.

use std::sync::Arc;
use std::time::{Duration, Instant};

use pktnet_shared::config::NetworkConfig;
use pktnet_shared::error::{NetError, NetResult};
use pktnet_shared::packet::Packet;

use crate::connection::Connection;

/// Deadline and polling behaviour of one wait call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitOptions {
    /// `None` waits forever.
    pub timeout: Option<Duration>,
    pub poll_interval: Duration,
    /// Run [`Connection::update`] with the real elapsed time on every poll.
    pub pump_update: bool,
}

impl WaitOptions {
    pub fn from_config(config: &NetworkConfig) -> Self {
        Self {
            timeout: config.wait_timeout(),
            poll_interval: config.wait_poll_interval(),
            pump_update: false,
        }
    }

    pub fn timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn pump_update(mut self, pump: bool) -> Self {
        self.pump_update = pump;
        self
    }
}

impl Default for WaitOptions {
    fn default() -> Self {
        Self::from_config(&NetworkConfig::default())
    }
}

impl Connection {
    /// Options built from this connection's configuration.
    pub fn wait_options(&self) -> WaitOptions {
        WaitOptions::from_config(&self.context().config)
    }

    /// Polls `probe` until it yields a value or the deadline passes.
    fn wait_until<R>(
        self: &Arc<Self>,
        opts: WaitOptions,
        what: impl FnOnce() -> String,
        mut probe: impl FnMut(&Self) -> Option<R>,
    ) -> NetResult<R> {
        let started = Instant::now();
        let mut last_pump = started;
        loop {
            if opts.pump_update {
                let now = Instant::now();
                self.update(now - last_pump)?;
                last_pump = now;
            }
            if let Some(found) = probe(&**self) {
                return Ok(found);
            }
            if let Some(timeout) = opts.timeout {
                if started.elapsed() >= timeout {
                    return Err(NetError::Timeout {
                        waited: timeout,
                        what: what(),
                    });
                }
            }
            std::thread::sleep(opts.poll_interval);
        }
    }

    /// First live packet of any type. Left unconsumed.
    pub fn wait_for_packet(self: &Arc<Self>, opts: WaitOptions) -> NetResult<Arc<dyn Packet>> {
        self.wait_until(opts, || "any packet".into(), |conn| conn.find_packet(|_| true))
    }

    /// First live packet with wire type `type_id`. Left unconsumed.
    pub fn wait_for_type(
        self: &Arc<Self>,
        type_id: i16,
        opts: WaitOptions,
    ) -> NetResult<Arc<dyn Packet>> {
        self.wait_until(
            opts,
            || format!("packet type {type_id}"),
            |conn| conn.find_packet(|p| p.wire_id() == type_id),
        )
    }

    /// First live packet of Rust type `T`. Left unconsumed.
    pub fn wait_for<T: Packet + Clone>(self: &Arc<Self>, opts: WaitOptions) -> NetResult<T> {
        self.wait_until(
            opts,
            || std::any::type_name::<T>().to_owned(),
            |conn| {
                conn.find_packet(|p| p.is::<T>())
                    .and_then(|p| p.downcast_ref::<T>().cloned())
            },
        )
    }

    /// The reply carrying correlation `code`. Consumed on return.
    pub fn wait_for_code(self: &Arc<Self>, code: i16, opts: WaitOptions) -> NetResult<Arc<dyn Packet>> {
        let packet = self.wait_until(
            opts,
            || format!("reply with code {code}"),
            |conn| conn.find_packet(|p| p.meta().code == code),
        )?;
        packet.consume();
        Ok(packet)
    }

    /// Blocks until the server's id acknowledgement has arrived.
    pub fn wait_for_id(self: &Arc<Self>, opts: WaitOptions) -> NetResult<i16> {
        self.wait_until(
            opts,
            || "id assignment".into(),
            |conn| conn.is_assigned().then(|| conn.id()),
        )
    }
}

#[cfg(test)]
mod tests {
    use std::thread;

    use super::*;
    use pktnet_shared::chat::{chat_registry, Chat, JoinLobby, JOIN_LOBBY_ID};
    use pktnet_shared::config::NetworkConfig;
    use pktnet_shared::context::NetContext;
    use pktnet_shared::transport::MemoryTransport;

    fn server_side() -> Arc<Connection> {
        let ctx = NetContext::new(NetworkConfig::default(), chat_registry().unwrap());
        let (transport, _rx) = MemoryTransport::new();
        Connection::server_side(ctx, transport)
    }

    fn quick() -> WaitOptions {
        WaitOptions::default()
            .timeout(Some(Duration::from_millis(40)))
            .poll_interval(Duration::from_millis(1))
    }

    #[test]
    fn times_out_with_a_distinct_error() {
        let conn = server_side();
        let err = conn.wait_for_packet(quick()).unwrap_err();
        assert!(err.is_timeout());
        assert!(!err.is_fatal());
    }

    #[test]
    fn code_wait_consumes_the_match() {
        let conn = server_side();
        let request = JoinLobby::new("lobby".into());
        let frame = conn.context().packets.pack(&request).unwrap();
        conn.on_bytes_received(&frame).unwrap();

        let reply = conn.wait_for_code(request.meta.code, quick()).unwrap();
        assert!(reply.meta().is_consumed());
        assert!(!conn.has_packets());
    }

    #[test]
    fn type_wait_leaves_the_packet_queued() {
        let conn = server_side();
        let frame = conn.context().packets.pack(&Chat::new("a".into())).unwrap();
        conn.on_bytes_received(&frame).unwrap();
        let frame = conn.context().packets.pack(&JoinLobby::new("b".into())).unwrap();
        conn.on_bytes_received(&frame).unwrap();

        let join = conn.wait_for_type(JOIN_LOBBY_ID, quick()).unwrap();
        assert_eq!(join.downcast_ref::<JoinLobby>().unwrap().group, "b");
        assert_eq!(conn.packets().len(), 2);

        let chat: Chat = conn.wait_for(quick()).unwrap();
        assert_eq!(chat.text, "a");
    }

    #[test]
    fn wait_observes_packets_from_another_thread() {
        let conn = server_side();
        let frame = conn.context().packets.pack(&Chat::new("late".into())).unwrap();
        let delivery = {
            let conn = conn.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                conn.on_bytes_received(&frame).unwrap();
            })
        };

        let opts = quick().timeout(Some(Duration::from_secs(5))).pump_update(true);
        let chat: Chat = conn.wait_for(opts).unwrap();
        assert_eq!(chat.text, "late");
        delivery.join().unwrap();
    }

    #[test]
    fn id_wait_sees_the_ack() {
        let ctx = NetContext::new(NetworkConfig::default(), chat_registry().unwrap());
        let (transport, _rx) = MemoryTransport::new();
        let conn = Connection::client(ctx, transport);
        assert!(conn.wait_for_id(quick()).unwrap_err().is_timeout());

        let ack = conn.context().packets.pack_id_ack(9).unwrap();
        conn.on_bytes_received(&ack).unwrap();
        assert_eq!(conn.wait_for_id(quick()).unwrap(), 9);
    }
}
