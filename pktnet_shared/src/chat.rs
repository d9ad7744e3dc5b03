//! Demo lobby chat protocol shared by the `client` and `server` binaries.
//!
//! - `Chat` (id 7): one line of text.
//! - `JoinLobby` (id 8): asks the server to move the sender into a group.
//! - `Nick` (id 9): display name, sender-stamped so the server can relay it.

use crate::error::NetResult;
use crate::packet::WireFlags;
use crate::registry::PacketRegistry;

pub const CHAT_ID: i16 = 7;
pub const JOIN_LOBBY_ID: i16 = 8;
pub const NICK_ID: i16 = 9;

/// Maximum chat line length in characters.
pub const MAX_MESSAGE_LENGTH: usize = 256;

/// Group every client lands in unless it asks otherwise.
pub const DEFAULT_LOBBY: &str = "lobby";

crate::packet! {
    /// One chat line.
    pub struct Chat [flags = WireFlags::SEND_SENDER] {
        pub text: String,
    }
}

crate::packet! {
    /// Request to join a named lobby.
    pub struct JoinLobby [flags = WireFlags::SEND_CODE] {
        pub group: String,
    }
}

crate::packet! {
    pub struct Nick [flags = WireFlags::SEND_SENDER] {
        pub name: String,
    }
}

impl Chat {
    /// Trims whitespace and caps the line at [`MAX_MESSAGE_LENGTH`] characters.
    pub fn sanitized(text: &str) -> Self {
        Self::new(text.trim().chars().take(MAX_MESSAGE_LENGTH).collect())
    }
}

/// Registry with every demo packet.
pub fn chat_registry() -> NetResult<PacketRegistry> {
    let mut registry = PacketRegistry::new();
    registry.register::<Chat>(CHAT_ID)?;
    registry.register::<JoinLobby>(JOIN_LOBBY_ID)?;
    registry.register::<Nick>(NICK_ID)?;
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NetworkConfig;
    use crate::manager::PacketManager;

    #[test]
    fn chat_frame_is_header_sender_text() {
        let mgr = PacketManager::new(&NetworkConfig::default(), chat_registry().unwrap());
        let bytes = mgr.pack_as(&Chat::new("hi".into()), Some(4)).unwrap();
        assert_eq!(bytes.as_ref(), &[0, 7, 0, 4, 0, 2, b'h', b'i']);

        let back = mgr.unpack(&bytes).unwrap();
        assert_eq!(back.meta().sender_id, 4);
        assert_eq!(back.downcast_ref::<Chat>().unwrap().text, "hi");
    }

    #[test]
    fn sanitize_trims_and_caps() {
        assert_eq!(Chat::sanitized("  hey \n").text, "hey");
        let long = "x".repeat(MAX_MESSAGE_LENGTH + 10);
        assert_eq!(Chat::sanitized(&long).text.chars().count(), MAX_MESSAGE_LENGTH);
    }

    #[test]
    fn registry_lists_demo_ids() {
        let registry = chat_registry().unwrap();
        assert_eq!(registry.ids(), vec![CHAT_ID, JOIN_LOBBY_ID, NICK_ID]);
        assert_eq!(registry.name_of(JOIN_LOBBY_ID), Some("JoinLobby"));
    }
}
