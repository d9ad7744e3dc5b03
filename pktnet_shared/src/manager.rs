//! Packet codec: type header, optional compression, field payload and the
//! manipulator chain.
//!
//! Frame layout before the chain runs:
//!
//! ```text
//! [i16 type id]
//! [ unless ping:
//!     [ if COMPRESSED: u32 length + deflate of the rest ]
//!     [ if SEND_CODE: i16 code ]
//!     [ if SEND_SENDER: i16 sender id ]
//!     fields in declared order
//! ]
//! ```
//!
//! Without a registry the manager runs in raw passthrough mode: only the
//! built-in `Ping`, `Message` and `RawPacket` types can cross the wire.

use bytes::Bytes;
use tracing::debug;

use crate::compression;
use crate::config::NetworkConfig;
use crate::error::{NetError, NetResult};
use crate::manipulator::ManipulatorChain;
use crate::packet::{
    Message, Packet, Ping, RawPacket, WireFlags, MESSAGE_ID, NO_CODE, NO_SENDER,
    PING_ID, RAW_ID, UNSET_TYPE_ID,
};
use crate::registry::PacketRegistry;
use crate::wire::{WireReader, WireWriter};

/// Encodes and decodes packets for one configuration.
#[derive(Debug)]
pub struct PacketManager {
    defaults: WireFlags,
    registry: Option<PacketRegistry>,
    chain: ManipulatorChain,
    debug_logging: bool,
}

impl PacketManager {
    /// Typed mode.
    pub fn new(config: &NetworkConfig, registry: PacketRegistry) -> Self {
        Self::build(config, Some(registry), ManipulatorChain::new())
    }

    /// Raw passthrough mode.
    pub fn raw(config: &NetworkConfig) -> Self {
        Self::build(config, None, ManipulatorChain::new())
    }

    pub fn build(
        config: &NetworkConfig,
        registry: Option<PacketRegistry>,
        chain: ManipulatorChain,
    ) -> Self {
        Self {
            defaults: config.default_wire_flags(),
            registry,
            chain,
            debug_logging: config.debug_logging,
        }
    }

    pub fn registry(&self) -> Option<&PacketRegistry> {
        self.registry.as_ref()
    }

    pub fn is_raw(&self) -> bool {
        self.registry.is_none()
    }

    pub fn chain(&self) -> &ManipulatorChain {
        &self.chain
    }

    /// Effective wire flags of `packet` under this configuration.
    pub fn flags_of(&self, packet: &dyn Packet) -> WireFlags {
        packet.wire_flags(self.defaults)
    }

    /// Id the frame header will carry for `packet`.
    pub fn resolve_id(&self, packet: &dyn Packet) -> NetResult<i16> {
        let explicit = packet.meta().type_id;
        if explicit != UNSET_TYPE_ID {
            return Ok(explicit);
        }
        match &self.registry {
            Some(registry) => registry
                .id_of_packet(packet)
                .ok_or(NetError::UnregisteredType {
                    type_name: packet.type_name(),
                }),
            None => Err(NetError::RawMode {
                type_name: packet.type_name(),
            }),
        }
    }

    pub fn pack(&self, packet: &dyn Packet) -> NetResult<Bytes> {
        self.pack_as(packet, None)
    }

    /// Encodes `packet`, writing `sender` instead of the packet's own sender id
    /// when the type sends one.
    pub fn pack_as(&self, packet: &dyn Packet, sender: Option<i16>) -> NetResult<Bytes> {
        let id = self.resolve_id(packet)?;
        let mut frame = WireWriter::new();
        frame.put_i16(id);

        if id != PING_ID {
            let flags = self.flags_of(packet);
            let meta = packet.meta();
            let mut body = WireWriter::new();
            if flags.contains(WireFlags::SEND_CODE) {
                body.put_i16(meta.code);
            }
            if flags.contains(WireFlags::SEND_SENDER) {
                body.put_i16(sender.unwrap_or(meta.sender_id));
            }
            packet.write_body(&mut body)?;

            if flags.contains(WireFlags::COMPRESSED) {
                compression::write_framed(&mut frame, body.as_slice())?;
            } else {
                frame.put_slice(body.as_slice());
            }
        }

        if self.debug_logging {
            debug!(type_id = id, packet = packet.type_name(), len = frame.len(), "pack");
        }

        if self.chain.is_empty() {
            Ok(frame.into_bytes())
        } else {
            self.chain.apply(frame.into_vec()).map(Bytes::from)
        }
    }

    /// Decodes one frame. Pings come back without touching the rest of the frame.
    pub fn unpack(&self, frame: &[u8]) -> NetResult<Box<dyn Packet>> {
        let restored;
        let data = if self.chain.is_empty() {
            frame
        } else {
            restored = self.chain.restore(frame.to_vec())?;
            restored.as_slice()
        };

        let mut r = WireReader::new(data);
        let id = r.get_i16()?;
        if id == PING_ID {
            return Ok(Box::new(Ping::new()));
        }

        let mut packet = self.instantiate(id)?;
        let flags = self.flags_of(packet.as_ref());

        let inflated;
        let mut body = if flags.contains(WireFlags::COMPRESSED) {
            inflated = compression::read_framed(&mut r)?;
            WireReader::new(&inflated)
        } else {
            r
        };

        let code = if flags.contains(WireFlags::SEND_CODE) {
            body.get_i16()?
        } else {
            NO_CODE
        };
        let sender = if flags.contains(WireFlags::SEND_SENDER) {
            body.get_i16()?
        } else {
            NO_SENDER
        };
        {
            let meta = packet.meta_mut();
            meta.code = code;
            meta.sender_id = sender;
        }
        packet.read_body(&mut body)?;

        if !body.is_empty() {
            debug!(type_id = id, trailing = body.remaining(), "ignoring trailing bytes");
        }
        if self.debug_logging {
            debug!(type_id = id, packet = packet.type_name(), len = frame.len(), "unpack");
        }
        Ok(packet)
    }

    fn instantiate(&self, id: i16) -> NetResult<Box<dyn Packet>> {
        match id {
            MESSAGE_ID => Ok(Box::new(Message::default())),
            RAW_ID => Ok(Box::new(RawPacket::default())),
            _ => match &self.registry {
                Some(registry) => registry.instantiate(id),
                None => Err(NetError::RawMode {
                    type_name: "unregistered packet",
                }),
            },
        }
    }

    /// Id-assignment acknowledgement: the chain applied to a bare `i16`.
    pub fn pack_id_ack(&self, id: i16) -> NetResult<Bytes> {
        let ack = id.to_be_bytes().to_vec();
        self.chain.apply(ack).map(Bytes::from)
    }

    pub fn unpack_id_ack(&self, frame: &[u8]) -> NetResult<i16> {
        let data = self.chain.restore(frame.to_vec())?;
        WireReader::new(&data).get_i16()
    }
}
