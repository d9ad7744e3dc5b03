//! Packet envelope, declarative packet types and the built-in packets.
//!
//! A packet is a struct with an envelope field named `meta` plus an ordered
//! list of wire fields. The [`packet!`](crate::packet!) macro declares both
//! and generates the field descriptor table and the read/write code:
//!
//! ```ignore
//! pktnet_shared::packet! {
//!     /// One chat line.
//!     pub struct Chat {
//!         pub text: String,
//!     }
//! }
//!
//! pktnet_shared::packet! {
//!     pub struct Login [flags = WireFlags::SEND_CODE | WireFlags::COMPRESSED] {
//!         pub user: String,
//!         pub token: Vec<u8>,
//!     }
//! }
//! ```
//!
//! Types with fields that must stay off the wire implement [`PacketBody`] by
//! hand and then invoke [`impl_packet!`](crate::impl_packet!).

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU16, Ordering};
use std::time::Duration;

use bitflags::bitflags;

use crate::error::NetResult;
use crate::wire::{FieldDesc, FieldKind, WireReader, WireWriter};

/// "No id on the packet, look it up in the registry."
pub const UNSET_TYPE_ID: i16 = i16::MIN;
/// Opaque byte passthrough.
pub const RAW_ID: i16 = i16::MIN + 1;
/// Keepalive.
pub const PING_ID: i16 = -2;
/// Single-string convenience packet.
pub const MESSAGE_ID: i16 = -3;

/// Code carried by packets whose type does not send codes.
pub const NO_CODE: i16 = 0;
/// Sender id of packets that were never stamped.
pub const NO_SENDER: i16 = -1;

/// Returns true for ids user registrations may not claim.
pub fn is_reserved_id(id: i16) -> bool {
    matches!(id, UNSET_TYPE_ID | RAW_ID | PING_ID | MESSAGE_ID)
}

static NEXT_CODE: AtomicU16 = AtomicU16::new(1);

/// Process-unique correlation code. Wraps, never returns [`NO_CODE`].
pub fn next_code() -> i16 {
    loop {
        let code = NEXT_CODE.fetch_add(1, Ordering::Relaxed) as i16;
        if code != NO_CODE {
            return code;
        }
    }
}

bitflags! {
    /// Optional parts of a packet's wire form. A property of the type, so
    /// both peers agree on what follows the header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct WireFlags: u8 {
        /// Body is deflate-compressed.
        const COMPRESSED = 1 << 0;
        /// Body starts with the correlation code.
        const SEND_CODE = 1 << 1;
        /// Body carries the sender's connection id.
        const SEND_SENDER = 1 << 2;
    }
}

/// How long a received packet may sit unconsumed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Expiry {
    /// Use the configured window.
    #[default]
    Default,
    Never,
    After(Duration),
}

/// Envelope state carried by every packet.
pub struct PacketMeta {
    pub type_id: i16,
    pub code: i16,
    pub sender_id: i16,
    pub expiry: Expiry,
    /// Clock millis at which the packet was queued on receipt.
    pub received_at: Option<u64>,
    consumed: AtomicBool,
}

impl PacketMeta {
    /// Fresh envelope with a new correlation code.
    pub fn new() -> Self {
        Self {
            code: next_code(),
            ..Self::blank()
        }
    }

    /// Envelope with no code, used for packets about to be decoded.
    pub fn blank() -> Self {
        Self {
            type_id: UNSET_TYPE_ID,
            code: NO_CODE,
            sender_id: NO_SENDER,
            expiry: Expiry::Default,
            received_at: None,
            consumed: AtomicBool::new(false),
        }
    }

    pub fn with_type_id(mut self, type_id: i16) -> Self {
        self.type_id = type_id;
        self
    }

    /// Copies the correlation code of `request` so the peer can match the reply.
    pub fn reply_to(&mut self, request: &PacketMeta) {
        self.code = request.code;
    }

    pub fn is_consumed(&self) -> bool {
        self.consumed.load(Ordering::Acquire)
    }

    /// Marks the packet consumed; it is dropped on the next sweep.
    pub fn consume(&self) {
        self.consumed.store(true, Ordering::Release);
    }

    /// True once the packet has aged past its window. Packets that were
    /// never received do not expire.
    pub fn is_expired(&self, now_millis: u64, default_window: Option<Duration>) -> bool {
        let window = match self.expiry {
            Expiry::Default => default_window,
            Expiry::Never => None,
            Expiry::After(window) => Some(window),
        };
        match (window, self.received_at) {
            (Some(window), Some(received)) => {
                let age = now_millis.saturating_sub(received);
                u128::from(age) >= window.as_millis()
            }
            _ => false,
        }
    }

    /// Neither consumed nor expired.
    pub fn is_live(&self, now_millis: u64, default_window: Option<Duration>) -> bool {
        !self.is_consumed() && !self.is_expired(now_millis, default_window)
    }
}

impl Default for PacketMeta {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for PacketMeta {
    fn clone(&self) -> Self {
        Self {
            type_id: self.type_id,
            code: self.code,
            sender_id: self.sender_id,
            expiry: self.expiry,
            received_at: self.received_at,
            consumed: AtomicBool::new(self.is_consumed()),
        }
    }
}

impl fmt::Debug for PacketMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PacketMeta")
            .field("type_id", &self.type_id)
            .field("code", &self.code)
            .field("sender_id", &self.sender_id)
            .field("consumed", &self.is_consumed())
            .finish_non_exhaustive()
    }
}

/// Ordered field list of a packet type.
pub trait PacketBody: Send + Sync + 'static {
    const NAME: &'static str;
    const FIELDS: &'static [FieldDesc];

    fn write_fields(&self, w: &mut WireWriter) -> NetResult<()>;

    fn read_fields(&mut self, r: &mut WireReader<'_>) -> NetResult<()>;

    /// Empty instance for the decoder to fill. Must not draw a correlation code.
    fn blank() -> Self
    where
        Self: Sized + Default,
    {
        Self::default()
    }
}

/// Object-safe view of any packet, as handled by the codec and connections.
pub trait Packet: Any + Send + Sync + fmt::Debug {
    fn meta(&self) -> &PacketMeta;

    fn meta_mut(&mut self) -> &mut PacketMeta;

    fn type_name(&self) -> &'static str;

    fn schema(&self) -> &'static [FieldDesc];

    /// Wire flags of this type, derived from the configured defaults.
    fn wire_flags(&self, defaults: WireFlags) -> WireFlags {
        defaults
    }

    fn write_body(&self, w: &mut WireWriter) -> NetResult<()>;

    fn read_body(&mut self, r: &mut WireReader<'_>) -> NetResult<()>;

    fn as_any(&self) -> &dyn Any;
}

impl<'a> dyn Packet + 'a {
    pub fn is<T: Packet>(&self) -> bool {
        self.as_any().is::<T>()
    }

    pub fn downcast_ref<T: Packet>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    pub fn wire_id(&self) -> i16 {
        self.meta().type_id
    }

    pub fn is_ping(&self) -> bool {
        self.meta().type_id == PING_ID
    }

    pub fn consume(&self) {
        self.meta().consume();
    }
}

/// Implements [`Packet`] (and nesting support) for a type that already
/// implements [`PacketBody`] and has a `meta: PacketMeta` field.
#[macro_export]
macro_rules! impl_packet {
    (@flags $defaults:ident) => {
        $defaults
    };
    (@flags $defaults:ident, $flags:expr) => {{
        let _ = $defaults;
        $flags
    }};
    ($name:ident $(, $flags:expr)?) => {
        impl $crate::packet::Packet for $name {
            fn meta(&self) -> &$crate::packet::PacketMeta {
                &self.meta
            }

            fn meta_mut(&mut self) -> &mut $crate::packet::PacketMeta {
                &mut self.meta
            }

            fn type_name(&self) -> &'static str {
                <Self as $crate::packet::PacketBody>::NAME
            }

            fn schema(&self) -> &'static [$crate::wire::FieldDesc] {
                <Self as $crate::packet::PacketBody>::FIELDS
            }

            #[allow(unused_imports)]
            fn wire_flags(&self, defaults: $crate::packet::WireFlags) -> $crate::packet::WireFlags {
                use $crate::packet::WireFlags;
                $crate::impl_packet!(@flags defaults $(, $flags)?)
            }

            fn write_body(&self, w: &mut $crate::wire::WireWriter) -> $crate::error::NetResult<()> {
                <Self as $crate::packet::PacketBody>::write_fields(self, w)
            }

            fn read_body(&mut self, r: &mut $crate::wire::WireReader<'_>) -> $crate::error::NetResult<()> {
                <Self as $crate::packet::PacketBody>::read_fields(self, r)
            }

            fn as_any(&self) -> &dyn ::std::any::Any {
                self
            }
        }

        impl $crate::wire::WireField for $name {
            const KIND: $crate::wire::FieldKind =
                $crate::wire::FieldKind::Nested(<$name as $crate::packet::PacketBody>::NAME);

            fn write_to(&self, w: &mut $crate::wire::WireWriter) -> $crate::error::NetResult<()> {
                <Self as $crate::packet::PacketBody>::write_fields(self, w)
            }

            fn read_from(r: &mut $crate::wire::WireReader<'_>) -> $crate::error::NetResult<Self> {
                let mut value = <Self as $crate::packet::PacketBody>::blank();
                <Self as $crate::packet::PacketBody>::read_fields(&mut value, r)?;
                Ok(value)
            }
        }

        impl $crate::wire::WireElement for $name {
            const ELEMENT: $crate::wire::ElementKind =
                $crate::wire::ElementKind::Nested(<$name as $crate::packet::PacketBody>::NAME);
        }
    };
}

/// Declares a packet struct with an envelope and ordered wire fields.
#[macro_export]
macro_rules! packet {
    (
        $(#[$attr:meta])*
        $vis:vis struct $name:ident $([flags = $flags:expr])? {
            $( $(#[$fattr:meta])* $fvis:vis $field:ident : $fty:ty ),* $(,)?
        }
    ) => {
        $(#[$attr])*
        #[derive(Debug, Clone, Default)]
        $vis struct $name {
            pub meta: $crate::packet::PacketMeta,
            $( $(#[$fattr])* $fvis $field: $fty, )*
        }

        impl $name {
            #[allow(clippy::too_many_arguments, clippy::new_without_default)]
            pub fn new($($field: $fty),*) -> Self {
                Self {
                    meta: $crate::packet::PacketMeta::new(),
                    $($field,)*
                }
            }
        }

        impl $crate::packet::PacketBody for $name {
            const NAME: &'static str = stringify!($name);
            const FIELDS: &'static [$crate::wire::FieldDesc] = &[
                $($crate::wire::FieldDesc {
                    name: stringify!($field),
                    kind: <$fty as $crate::wire::WireField>::KIND,
                },)*
            ];

            #[allow(unused_variables)]
            fn write_fields(&self, w: &mut $crate::wire::WireWriter) -> $crate::error::NetResult<()> {
                $( $crate::wire::WireField::write_to(&self.$field, w)?; )*
                Ok(())
            }

            #[allow(unused_variables)]
            fn read_fields(&mut self, r: &mut $crate::wire::WireReader<'_>) -> $crate::error::NetResult<()> {
                $( self.$field = <$fty as $crate::wire::WireField>::read_from(r)?; )*
                Ok(())
            }

            fn blank() -> Self
            where
                Self: Sized + Default,
            {
                Self {
                    meta: $crate::packet::PacketMeta::blank(),
                    $( $field: ::core::default::Default::default(), )*
                }
            }
        }

        $crate::impl_packet!($name $(, $flags)?);
    };
}

/// Keepalive. No payload, never compressed, never queued.
#[derive(Debug, Clone)]
pub struct Ping {
    pub meta: PacketMeta,
}

impl Ping {
    pub fn new() -> Self {
        Self {
            meta: PacketMeta::blank().with_type_id(PING_ID),
        }
    }
}

impl Default for Ping {
    fn default() -> Self {
        Self::new()
    }
}

impl PacketBody for Ping {
    const NAME: &'static str = "Ping";
    const FIELDS: &'static [FieldDesc] = &[];

    fn write_fields(&self, _w: &mut WireWriter) -> NetResult<()> {
        Ok(())
    }

    fn read_fields(&mut self, _r: &mut WireReader<'_>) -> NetResult<()> {
        Ok(())
    }
}

crate::impl_packet!(Ping, WireFlags::empty());

/// Single-string convenience packet, usable without a registry.
#[derive(Debug, Clone)]
pub struct Message {
    pub meta: PacketMeta,
    pub text: String,
}

impl Message {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            meta: PacketMeta::new().with_type_id(MESSAGE_ID),
            text: text.into(),
        }
    }
}

impl Default for Message {
    fn default() -> Self {
        Self {
            meta: PacketMeta::blank().with_type_id(MESSAGE_ID),
            text: String::new(),
        }
    }
}

impl PacketBody for Message {
    const NAME: &'static str = "Message";
    const FIELDS: &'static [FieldDesc] = &[FieldDesc {
        name: "text",
        kind: FieldKind::Str,
    }];

    fn write_fields(&self, w: &mut WireWriter) -> NetResult<()> {
        w.put_str(&self.text)
    }

    fn read_fields(&mut self, r: &mut WireReader<'_>) -> NetResult<()> {
        self.text = r.get_string()?;
        Ok(())
    }
}

crate::impl_packet!(Message);

/// Opaque bytes after the header. The only payload raw passthrough mode carries.
#[derive(Debug, Clone)]
pub struct RawPacket {
    pub meta: PacketMeta,
    pub data: Vec<u8>,
}

impl RawPacket {
    pub fn new(data: impl Into<Vec<u8>>) -> Self {
        Self {
            meta: PacketMeta::blank().with_type_id(RAW_ID),
            data: data.into(),
        }
    }
}

impl Default for RawPacket {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl PacketBody for RawPacket {
    const NAME: &'static str = "RawPacket";
    const FIELDS: &'static [FieldDesc] = &[];

    fn write_fields(&self, w: &mut WireWriter) -> NetResult<()> {
        w.put_slice(&self.data);
        Ok(())
    }

    fn read_fields(&mut self, r: &mut WireReader<'_>) -> NetResult<()> {
        self.data = r.rest().to_vec();
        Ok(())
    }
}

crate::impl_packet!(RawPacket, WireFlags::empty());
