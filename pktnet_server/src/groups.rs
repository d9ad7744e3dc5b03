//! Group name -> active members, in join order.

use std::collections::BTreeMap;
use std::sync::Arc;

use pktnet_client::Connection;

#[derive(Debug, Default)]
pub struct GroupIndex {
    groups: BTreeMap<String, Vec<Arc<Connection>>>,
}

impl GroupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `conn` to `group` unless it is already there.
    pub fn join(&mut self, group: &str, conn: &Arc<Connection>) {
        let members = self.groups.entry(group.to_owned()).or_default();
        if !members.iter().any(|m| Arc::ptr_eq(m, conn)) {
            members.push(conn.clone());
        }
    }

    pub fn leave(&mut self, group: &str, conn: &Arc<Connection>) -> bool {
        let Some(members) = self.groups.get_mut(group) else {
            return false;
        };
        let before = members.len();
        members.retain(|m| !Arc::ptr_eq(m, conn));
        let removed = members.len() != before;
        if members.is_empty() {
            self.groups.remove(group);
        }
        removed
    }

    /// Removes `conn` from whatever group holds it.
    pub fn remove(&mut self, conn: &Arc<Connection>) {
        self.groups.retain(|_, members| {
            members.retain(|m| !Arc::ptr_eq(m, conn));
            !members.is_empty()
        });
    }

    /// Members of `group`; unknown groups are empty.
    pub fn members(&self, group: &str) -> Vec<Arc<Connection>> {
        self.groups.get(group).cloned().unwrap_or_default()
    }

    pub fn names(&self) -> Vec<String> {
        self.groups.keys().cloned().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pktnet_shared::config::NetworkConfig;
    use pktnet_shared::context::NetContext;
    use pktnet_shared::transport::MemoryTransport;

    fn conn() -> Arc<Connection> {
        let (transport, _rx) = MemoryTransport::new();
        Connection::server_side(NetContext::raw(NetworkConfig::default()), transport)
    }

    #[test]
    fn join_is_idempotent_and_ordered() {
        let (a, b) = (conn(), conn());
        let mut index = GroupIndex::new();
        index.join("lobby", &a);
        index.join("lobby", &b);
        index.join("lobby", &a);

        let members = index.members("lobby");
        assert_eq!(members.len(), 2);
        assert!(Arc::ptr_eq(&members[0], &a));
    }

    #[test]
    fn empty_groups_disappear() {
        let a = conn();
        let mut index = GroupIndex::new();
        index.join("red", &a);
        assert!(index.leave("red", &a));
        assert!(!index.leave("red", &a));
        assert!(index.is_empty());
        assert!(index.members("red").is_empty());
    }

    #[test]
    fn remove_clears_every_group() {
        let (a, b) = (conn(), conn());
        let mut index = GroupIndex::new();
        index.join("red", &a);
        index.join("blue", &b);
        index.remove(&a);
        assert_eq!(index.names(), vec!["blue".to_string()]);
    }
}
