//! `pktnet_client`
//!
//! Connection-side systems:
//! - Per-peer protocol state (id, group, keepalive, inbound queue)
//! - Blocking wait/poll API over the inbound queue
//! - Tokio TCP transport with length-prefixed frames

pub mod connection;
pub mod tcp;
pub mod wait;

pub use connection::{Connection, ConnectionOwner, Side, UNASSIGNED_ID};
pub use wait::WaitOptions;
