//! `pktnet_server`
//!
//! Server-side systems:
//! - Connection registry (connecting / active / disconnected / pending)
//! - Id allocation and group index
//! - Encode-once broadcast
//! - Demo chat lobby over TCP

pub mod groups;
pub mod ids;
pub mod lobby;
pub mod server;

pub use server::Server;
