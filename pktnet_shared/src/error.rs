//! Error types for the protocol core.
//!
//! Configuration and protocol faults (unregistered types, duplicate ids,
//! raw-mode misuse) indicate a mismatch between peers and are never retried.
//! Transport faults are local to one connection.

use std::time::Duration;

use thiserror::Error;

/// Errors produced by the codec, registry, connections and server.
#[derive(Debug, Error)]
pub enum NetError {
    /// A wait call did not observe a matching packet before its deadline.
    #[error("network timeout after {waited:?} waiting for {what}")]
    Timeout { waited: Duration, what: String },

    /// A packet type without an explicit id was packed but never registered.
    #[error("packet type {type_name} is not registered")]
    UnregisteredType { type_name: &'static str },

    /// A frame carried a type id the registry does not know.
    #[error("no packet type registered for id {0}")]
    UnregisteredId(i16),

    /// An id was registered twice.
    #[error("packet id {id} is already registered to {existing}")]
    DuplicateId { id: i16, existing: &'static str },

    /// A Rust type was registered under a second id.
    #[error("packet type {type_name} is already registered under id {id}")]
    DuplicateType { type_name: &'static str, id: i16 },

    /// The id belongs to a built-in packet or is the unset sentinel.
    #[error("packet id {0} is reserved")]
    ReservedId(i16),

    /// Typed packets need a registry; raw passthrough mode only carries raw bytes.
    #[error("typed packet {type_name} cannot be used without a packet registry")]
    RawMode { type_name: &'static str },

    #[error("frame truncated: needed {needed} bytes, {remaining} remaining")]
    Truncated { needed: usize, remaining: usize },

    /// A string or array exceeds its 16-bit length prefix.
    #[error("{what} too long for the wire: {len}")]
    TooLong { what: &'static str, len: usize },

    #[error("string field is not valid UTF-8")]
    InvalidUtf8,

    #[error("invalid char code point {0:#x}")]
    InvalidChar(u32),

    #[error("compression failed")]
    Compression(#[source] std::io::Error),

    /// A manipulator stage rejected a frame.
    #[error("manipulator {stage}: {reason}")]
    Manipulator { stage: &'static str, reason: String },

    #[error("connection is not connected")]
    NotConnected,

    #[error("transport error")]
    Transport(#[from] std::io::Error),

    /// Every connection id is in use.
    #[error("connection id space exhausted")]
    IdSpaceExhausted,
}

impl NetError {
    /// Returns true for configuration/protocol errors that must not be retried.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            NetError::UnregisteredType { .. }
                | NetError::UnregisteredId(_)
                | NetError::DuplicateId { .. }
                | NetError::DuplicateType { .. }
                | NetError::ReservedId(_)
                | NetError::RawMode { .. }
        )
    }

    /// Returns true if this is a wait deadline expiring.
    pub fn is_timeout(&self) -> bool {
        matches!(self, NetError::Timeout { .. })
    }
}

/// Result alias for protocol operations.
pub type NetResult<T> = Result<T, NetError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_fatal_errors() {
        assert!(NetError::UnregisteredId(9).is_fatal());
        assert!(NetError::RawMode { type_name: "Chat" }.is_fatal());
        assert!(!NetError::NotConnected.is_fatal());
        assert!(!NetError::Timeout {
            waited: Duration::from_millis(5),
            what: "any packet".into(),
        }
        .is_fatal());
    }
}
