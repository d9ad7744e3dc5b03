//! Packet type registry: wire id <-> concrete packet type.
//!
//! Three registration styles, all ending in a factory closure:
//! - by type: a fresh `T::blank()` per decoded packet,
//! - by prototype: a clone of a stored value with a blank envelope,
//! - by factory: any closure returning `T`.
//!
//! Every instance handed out has a blank envelope stamped with the registered
//! id. Only the expiry policy survives from the constructed value.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::error::{NetError, NetResult};
use crate::packet::{is_reserved_id, Packet, PacketBody, PacketMeta};
use crate::wire::FieldDesc;

type Factory = Arc<dyn Fn() -> Box<dyn Packet> + Send + Sync>;

struct Registration {
    name: &'static str,
    schema: &'static [FieldDesc],
    factory: Factory,
}

/// Maps 16-bit type ids to packet constructors.
#[derive(Default)]
pub struct PacketRegistry {
    by_id: HashMap<i16, Registration>,
    by_type: HashMap<TypeId, i16>,
}

impl PacketRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `T`; decoding starts from [`PacketBody::blank`].
    pub fn register<T>(&mut self, id: i16) -> NetResult<()>
    where
        T: Packet + PacketBody + Default,
    {
        self.register_factory(id, T::blank)
    }

    /// Registers a prototype; decoding clones it with a blank envelope.
    pub fn register_prototype<T>(&mut self, id: i16, prototype: T) -> NetResult<()>
    where
        T: Packet + PacketBody + Clone,
    {
        self.register_factory(id, move || prototype.clone())
    }

    /// Registers an explicit constructor.
    pub fn register_factory<T, F>(&mut self, id: i16, factory: F) -> NetResult<()>
    where
        T: Packet + PacketBody,
        F: Fn() -> T + Send + Sync + 'static,
    {
        if is_reserved_id(id) {
            return Err(NetError::ReservedId(id));
        }
        if let Some(existing) = self.by_id.get(&id) {
            return Err(NetError::DuplicateId {
                id,
                existing: existing.name,
            });
        }
        if let Some(&other) = self.by_type.get(&TypeId::of::<T>()) {
            return Err(NetError::DuplicateType {
                type_name: T::NAME,
                id: other,
            });
        }

        let factory: Factory = Arc::new(move || {
            let mut packet = factory();
            let meta = packet.meta_mut();
            let expiry = meta.expiry;
            *meta = PacketMeta::blank().with_type_id(id);
            meta.expiry = expiry;
            Box::new(packet) as Box<dyn Packet>
        });
        self.by_id.insert(
            id,
            Registration {
                name: T::NAME,
                schema: T::FIELDS,
                factory,
            },
        );
        self.by_type.insert(TypeId::of::<T>(), id);
        Ok(())
    }

    /// Fresh, blank instance for `id`.
    pub fn instantiate(&self, id: i16) -> NetResult<Box<dyn Packet>> {
        self.by_id
            .get(&id)
            .map(|reg| (reg.factory)())
            .ok_or(NetError::UnregisteredId(id))
    }

    pub fn id_of<T: Packet>(&self) -> Option<i16> {
        self.by_type.get(&TypeId::of::<T>()).copied()
    }

    /// Id registered for the concrete type behind `packet`.
    pub fn id_of_packet(&self, packet: &dyn Packet) -> Option<i16> {
        self.by_type.get(&packet.as_any().type_id()).copied()
    }

    pub fn contains(&self, id: i16) -> bool {
        self.by_id.contains_key(&id)
    }

    pub fn name_of(&self, id: i16) -> Option<&'static str> {
        self.by_id.get(&id).map(|reg| reg.name)
    }

    pub fn schema_of(&self, id: i16) -> Option<&'static [FieldDesc]> {
        self.by_id.get(&id).map(|reg| reg.schema)
    }

    /// Registered ids in ascending order.
    pub fn ids(&self) -> Vec<i16> {
        let mut ids: Vec<_> = self.by_id.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

impl fmt::Debug for PacketRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map()
            .entries(self.ids().into_iter().map(|id| (id, self.by_id[&id].name)))
            .finish()
    }
}
