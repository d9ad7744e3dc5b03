//! Connection registry and broadcast engine.
//!
//! The server tracks connections in four sets:
//! - `connecting`: id assigned and acknowledged, not yet promoted,
//! - `active`: promoted on the next [`Server::update`],
//! - `disconnected`: removed since the previous update (one tick only),
//! - `pending`: connections with unconsumed inbound packets.
//!
//! Active connections with a group are also listed in the group index.
//! All of it sits behind one mutex. Connections call back into the server
//! through [`ConnectionOwner`]; the server never triggers a connection's
//! disconnect path while that mutex is held.

use std::sync::{Arc, Weak};

use bytes::Bytes;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use pktnet_client::{Connection, ConnectionOwner};
use pktnet_shared::context::NetContext;
use pktnet_shared::error::{NetError, NetResult};
use pktnet_shared::packet::Packet;
use pktnet_shared::transport::Transport;

use crate::groups::GroupIndex;
use crate::ids::IdAllocator;

#[derive(Debug, Default)]
struct Registry {
    connecting: Vec<Arc<Connection>>,
    active: Vec<Arc<Connection>>,
    disconnected: Vec<Arc<Connection>>,
    pending: Vec<Arc<Connection>>,
    groups: GroupIndex,
    ids: IdAllocator,
}

fn contains(set: &[Arc<Connection>], conn: &Arc<Connection>) -> bool {
    set.iter().any(|c| Arc::ptr_eq(c, conn))
}

fn remove_from(set: &mut Vec<Arc<Connection>>, conn: &Arc<Connection>) -> bool {
    let before = set.len();
    set.retain(|c| !Arc::ptr_eq(c, conn));
    set.len() != before
}

impl Registry {
    fn is_live_id(&self, id: i16) -> bool {
        self.connecting.iter().chain(&self.active).any(|c| c.id() == id)
    }

    /// Takes `conn` out of every live set. Returns false if it was not tracked.
    fn detach(&mut self, conn: &Arc<Connection>) -> bool {
        let was_connecting = remove_from(&mut self.connecting, conn);
        let was_active = remove_from(&mut self.active, conn);
        remove_from(&mut self.pending, conn);
        if was_active {
            self.groups.remove(conn);
        }
        let tracked = was_connecting || was_active;
        if tracked {
            self.disconnected.push(conn.clone());
        }
        tracked
    }
}

#[derive(Debug)]
struct ServerShared {
    ctx: Arc<NetContext>,
    registry: Mutex<Registry>,
}

impl ConnectionOwner for ServerShared {
    fn on_packets_pending(&self, conn: &Arc<Connection>) {
        let mut reg = self.registry.lock();
        let tracked = contains(&reg.active, conn) || contains(&reg.connecting, conn);
        if tracked && !contains(&reg.pending, conn) {
            reg.pending.push(conn.clone());
        }
    }

    fn on_detach(&self, conn: &Arc<Connection>) {
        if self.registry.lock().detach(conn) {
            info!(client_id = conn.id(), "client dropped");
        }
    }

    fn on_group_changed(&self, conn: &Arc<Connection>, old: Option<&str>) {
        let mut reg = self.registry.lock();
        if !contains(&reg.active, conn) {
            return;
        }
        if let Some(old) = old {
            reg.groups.leave(old, conn);
        }
        if let Some(new) = conn.group() {
            reg.groups.join(&new, conn);
        }
    }
}

/// Server-side registry of connections. Cheap to clone.
#[derive(Debug, Clone)]
pub struct Server {
    shared: Arc<ServerShared>,
}

impl Server {
    pub fn new(ctx: Arc<NetContext>) -> Self {
        Self::with_id_allocator(ctx, IdAllocator::new())
    }

    /// Server that hands out ids from `ids` instead of starting at 0.
    pub fn with_id_allocator(ctx: Arc<NetContext>, ids: IdAllocator) -> Self {
        Self {
            shared: Arc::new(ServerShared {
                ctx,
                registry: Mutex::new(Registry {
                    ids,
                    ..Registry::default()
                }),
            }),
        }
    }

    pub fn context(&self) -> &Arc<NetContext> {
        &self.shared.ctx
    }

    /// Wraps a freshly accepted transport and registers it as connecting.
    pub fn accept(&self, transport: Arc<dyn Transport>) -> NetResult<Arc<Connection>> {
        let conn = Connection::server_side(self.shared.ctx.clone(), transport);
        self.add_connecting_client(&conn)?;
        Ok(conn)
    }

    /// Assigns an id, sends the id acknowledgement as the first frame and
    /// tracks `conn` as connecting.
    pub fn add_connecting_client(&self, conn: &Arc<Connection>) -> NetResult<i16> {
        if conn.is_closed() {
            return Err(NetError::NotConnected);
        }
        let mut reg = self.shared.registry.lock();
        let id = {
            let reg = &mut *reg;
            let live = |id: i16| reg.connecting.iter().chain(&reg.active).any(|c| c.id() == id);
            reg.ids.allocate(live)?
        };
        conn.set_id(id);

        // No owner yet, so a failed send cannot re-enter the registry.
        let ack = self.shared.ctx.packets.pack_id_ack(id)?;
        conn.send_frame(ack)?;

        let owner: Weak<ServerShared> = Arc::downgrade(&self.shared);
        conn.set_owner(owner);
        reg.connecting.push(conn.clone());
        info!(client_id = id, "client connecting");
        Ok(id)
    }

    /// Drops `conn` from every set and group, records it as disconnected for
    /// one tick, then closes it. Idempotent.
    pub fn remove_client(&self, conn: &Arc<Connection>) {
        let removed = self.shared.registry.lock().detach(conn);
        conn.detach();
        conn.disconnect_silently();
        if removed {
            info!(client_id = conn.id(), group = ?conn.group(), "client removed");
        }
    }

    /// Runs one server tick:
    /// 1. promotes connecting clients whose transport is up,
    /// 2. clears last tick's disconnected list,
    /// 3. re-sweeps connections with pending packets,
    /// 4. drops connecting and active clients that went silent or lost their
    ///    transport.
    pub fn update(&self) {
        let now = self.shared.ctx.now_millis();
        let timeout = self
            .shared
            .ctx
            .config
            .connection_timeout()
            .map(|t| t.as_millis() as u64);

        let stale: Vec<Arc<Connection>> = {
            let mut reg = self.shared.registry.lock();
            let reg = &mut *reg;

            // Connecting clients whose link never came up stay tracked for
            // this tick and are dropped below with the silent ones.
            let (ready, waiting): (Vec<_>, Vec<_>) =
                std::mem::take(&mut reg.connecting).into_iter().partition(|c| c.is_connected());
            reg.connecting = waiting;
            for conn in ready {
                if let Some(group) = conn.group() {
                    reg.groups.join(&group, &conn);
                }
                debug!(client_id = conn.id(), "client active");
                reg.active.push(conn);
            }

            reg.disconnected.clear();
            reg.pending.retain(|c| c.sweep());

            reg.connecting
                .iter()
                .chain(&reg.active)
                .filter(|c| {
                    let silent = timeout
                        .is_some_and(|limit| now.saturating_sub(c.last_traffic_at()) > limit);
                    silent || !c.is_connected()
                })
                .cloned()
                .collect()
        };

        for conn in stale {
            warn!(client_id = conn.id(), "dropping unresponsive client");
            self.remove_client(&conn);
        }
    }

    /// Encodes `packet` once and sends it to every active client in `group`
    /// (all active clients for `None`), skipping `except`.
    ///
    /// Clients whose send fails are removed. Only encoding errors are returned.
    pub fn broadcast(
        &self,
        packet: &dyn Packet,
        group: Option<&str>,
        except: Option<&Arc<Connection>>,
    ) -> NetResult<usize> {
        let frame = self.shared.ctx.packets.pack(packet)?;
        Ok(self.broadcast_frame(frame, group, except))
    }

    /// Sends an encoded frame like [`broadcast`](Self::broadcast). Returns the
    /// number of clients reached.
    pub fn broadcast_frame(
        &self,
        frame: Bytes,
        group: Option<&str>,
        except: Option<&Arc<Connection>>,
    ) -> usize {
        let targets = match group {
            Some(group) => self.group_members(group),
            None => self.active_clients(),
        };

        let mut delivered = 0;
        for conn in targets {
            if except.is_some_and(|skip| Arc::ptr_eq(skip, &conn)) {
                continue;
            }
            match conn.send_frame(frame.clone()) {
                Ok(()) => delivered += 1,
                Err(err) => {
                    debug!(client_id = conn.id(), error = %err, "broadcast send failed");
                    self.remove_client(&conn);
                }
            }
        }
        delivered
    }

    /// Moves `conn` to `group` and re-indexes it.
    pub fn set_group(&self, conn: &Arc<Connection>, group: Option<&str>) {
        conn.set_group(group);
    }

    /// Active members of `group`; unknown groups are empty.
    pub fn group_members(&self, group: &str) -> Vec<Arc<Connection>> {
        self.shared.registry.lock().groups.members(group)
    }

    pub fn group_names(&self) -> Vec<String> {
        self.shared.registry.lock().groups.names()
    }

    pub fn active_clients(&self) -> Vec<Arc<Connection>> {
        self.shared.registry.lock().active.clone()
    }

    pub fn connecting_clients(&self) -> Vec<Arc<Connection>> {
        self.shared.registry.lock().connecting.clone()
    }

    /// Clients removed since the previous [`update`](Self::update).
    pub fn disconnected_clients(&self) -> Vec<Arc<Connection>> {
        self.shared.registry.lock().disconnected.clone()
    }

    pub fn clients_with_packets(&self) -> Vec<Arc<Connection>> {
        self.shared.registry.lock().pending.clone()
    }

    /// Connecting or active client with `id`.
    pub fn client_by_id(&self, id: i16) -> Option<Arc<Connection>> {
        let reg = self.shared.registry.lock();
        reg.connecting.iter().chain(&reg.active).find(|c| c.id() == id).cloned()
    }

    pub fn is_live_id(&self, id: i16) -> bool {
        self.shared.registry.lock().is_live_id(id)
    }

    /// Connecting plus active.
    pub fn client_count(&self) -> usize {
        let reg = self.shared.registry.lock();
        reg.connecting.len() + reg.active.len()
    }

    /// Disconnects every client.
    pub fn shutdown(&self) {
        let all: Vec<_> = {
            let reg = self.shared.registry.lock();
            reg.connecting.iter().chain(&reg.active).cloned().collect()
        };
        for conn in all {
            self.remove_client(&conn);
        }
    }
}
