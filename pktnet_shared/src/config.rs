//! Network configuration.
//!
//! Loads protocol defaults from JSON strings (file IO left to app). Durations
//! are plain milliseconds so config files stay readable; `-1` disables the
//! corresponding timer or deadline.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::packet::WireFlags;

/// Protocol defaults shared by codec, connections and server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Client keepalive period.
    pub ping_interval_ms: i64,
    /// Default `COMPRESSED` flag for packet types.
    pub compress_by_default: bool,
    /// Default `SEND_CODE` flag for packet types.
    pub send_code_by_default: bool,
    /// Default `SEND_SENDER` flag for packet types.
    pub send_sender_by_default: bool,
    /// Age after which an unconsumed received packet is dropped.
    pub packet_expiry_ms: i64,
    /// Sleep between polls in the wait API.
    pub wait_poll_interval_ms: u64,
    /// Default wait deadline.
    pub wait_timeout_ms: i64,
    /// Server drops active connections silent for longer than this.
    pub connection_timeout_ms: i64,
    /// Log every packed/unpacked packet at debug level.
    pub debug_logging: bool,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            ping_interval_ms: 6000,
            compress_by_default: false,
            send_code_by_default: false,
            send_sender_by_default: false,
            packet_expiry_ms: 30_000,
            wait_poll_interval_ms: 5,
            wait_timeout_ms: 10_000,
            connection_timeout_ms: 30_000,
            debug_logging: false,
        }
    }
}

impl NetworkConfig {
    /// Parses config from JSON. Missing keys keep their defaults.
    pub fn from_json_str(s: &str) -> serde_json::Result<Self> {
        serde_json::from_str(s)
    }

    pub fn ping_interval(&self) -> Option<Duration> {
        millis(self.ping_interval_ms)
    }

    pub fn packet_expiry(&self) -> Option<Duration> {
        millis(self.packet_expiry_ms)
    }

    pub fn wait_timeout(&self) -> Option<Duration> {
        millis(self.wait_timeout_ms)
    }

    pub fn wait_poll_interval(&self) -> Duration {
        Duration::from_millis(self.wait_poll_interval_ms)
    }

    pub fn connection_timeout(&self) -> Option<Duration> {
        millis(self.connection_timeout_ms)
    }

    /// Wire flags every packet type starts from.
    pub fn default_wire_flags(&self) -> WireFlags {
        let mut flags = WireFlags::empty();
        flags.set(WireFlags::COMPRESSED, self.compress_by_default);
        flags.set(WireFlags::SEND_CODE, self.send_code_by_default);
        flags.set(WireFlags::SEND_SENDER, self.send_sender_by_default);
        flags
    }
}

/// Negative values mean "disabled".
fn millis(value: i64) -> Option<Duration> {
    u64::try_from(value).ok().map(Duration::from_millis)
}
