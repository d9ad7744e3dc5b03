//! The per-process network context: configuration, codec and clock.
//!
//! Built once and shared as `Arc<NetContext>` by every connection and server.

use std::sync::Arc;

use crate::clock::{Clock, SystemClock};
use crate::config::NetworkConfig;
use crate::manager::PacketManager;
use crate::manipulator::{DataManipulator, ManipulatorChain};
use crate::registry::PacketRegistry;

#[derive(Debug)]
pub struct NetContext {
    pub config: NetworkConfig,
    pub packets: PacketManager,
    pub clock: Arc<dyn Clock>,
}

impl NetContext {
    pub fn builder(config: NetworkConfig) -> NetContextBuilder {
        NetContextBuilder {
            config,
            registry: None,
            chain: ManipulatorChain::new(),
            clock: None,
        }
    }

    /// Typed context with the system clock and no manipulators.
    pub fn new(config: NetworkConfig, registry: PacketRegistry) -> Arc<Self> {
        Self::builder(config).registry(registry).build()
    }

    /// Raw passthrough context.
    pub fn raw(config: NetworkConfig) -> Arc<Self> {
        Self::builder(config).build()
    }

    pub fn now_millis(&self) -> u64 {
        self.clock.now_millis()
    }
}

pub struct NetContextBuilder {
    config: NetworkConfig,
    registry: Option<PacketRegistry>,
    chain: ManipulatorChain,
    clock: Option<Arc<dyn Clock>>,
}

impl NetContextBuilder {
    pub fn registry(mut self, registry: PacketRegistry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Appends a manipulator stage; stages apply in call order.
    pub fn manipulator(mut self, stage: impl DataManipulator + 'static) -> Self {
        self.chain.push(stage);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Arc<NetContext> {
        let packets = PacketManager::build(&self.config, self.registry, self.chain);
        Arc::new(NetContext {
            config: self.config,
            packets,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock::new())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::manipulator::XorObfuscator;

    #[test]
    fn builder_wires_everything() {
        let clock = Arc::new(ManualClock::new(42));
        let ctx = NetContext::builder(NetworkConfig::default())
            .registry(PacketRegistry::new())
            .manipulator(XorObfuscator::new(vec![1]))
            .clock(clock.clone())
            .build();
        assert!(!ctx.packets.is_raw());
        assert_eq!(ctx.packets.chain().stage_names(), ["xor"]);
        assert_eq!(ctx.now_millis(), 42);
    }

    #[test]
    fn raw_context_has_no_registry() {
        let ctx = NetContext::raw(NetworkConfig::default());
        assert!(ctx.packets.is_raw());
    }
}
