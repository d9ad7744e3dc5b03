//! `pktnet_shared`
//!
//! Protocol core used by both client and server.
//!
//! Design goals:
//! - Packet layouts declared once, encoded without runtime reflection.
//! - Clear separation of concerns (wire, codec, registry, transport).
//! - Traits at the seams: manipulators, transports, clocks.
//! - No `unsafe`.

pub mod chat;
pub mod clock;
pub mod compression;
pub mod config;
pub mod context;
pub mod error;
pub mod manager;
pub mod manipulator;
pub mod packet;
pub mod registry;
pub mod transport;
pub mod wire;

pub mod prelude {
    //! Commonly used exports.

    pub use crate::clock::*;
    pub use crate::config::*;
    pub use crate::context::*;
    pub use crate::error::*;
    pub use crate::manager::*;
    pub use crate::manipulator::*;
    pub use crate::packet::*;
    pub use crate::registry::*;
    pub use crate::transport::*;
}
