//! Send flags and socket patterns.

use bitflags::bitflags;
use serde::{Deserialize, Serialize};

bitflags! {
    /// Flags accepted by [`Frame::send`](crate::Frame::send)
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
    pub struct SendFlags: u8 {
        /// Frame is a non-final part of a multi-part message
        const MORE = 1;
        /// Caller keeps the frame after sending
        const REUSE = 2;
        /// Fail with `WouldBlock` instead of waiting for queue space
        const DONTWAIT = 4;
    }
}

impl SendFlags {
    /// Flags as seen by the transport. `REUSE` is an ownership concern and is stripped.
    pub fn transport_bits(self) -> SendFlags {
        self - SendFlags::REUSE
    }
}

impl Default for SendFlags {
    fn default() -> Self {
        SendFlags::empty()
    }
}

/// Messaging pattern of an endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Pattern {
    /// Exclusive one-to-one pair
    Pair,
    /// Client side of server/client
    Client,
    /// Server side of server/client, addresses peers by routing id
    Server,
    /// Group publisher
    Radio,
    /// Group subscriber
    Dish,
}

impl Pattern {
    /// Whether frames on this pattern carry a routing id
    pub fn uses_routing_id(self) -> bool {
        matches!(self, Pattern::Server | Pattern::Client)
    }

    /// Whether frames on this pattern carry a group
    pub fn uses_group(self) -> bool {
        matches!(self, Pattern::Radio | Pattern::Dish)
    }

    /// Canonical socket type name, as exchanged in HELLO properties
    pub fn as_str(self) -> &'static str {
        match self {
            Pattern::Pair => "PAIR",
            Pattern::Client => "CLIENT",
            Pattern::Server => "SERVER",
            Pattern::Radio => "RADIO",
            Pattern::Dish => "DISH",
        }
    }

    /// Parse a canonical socket type name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "PAIR" => Some(Pattern::Pair),
            "CLIENT" => Some(Pattern::Client),
            "SERVER" => Some(Pattern::Server),
            "RADIO" => Some(Pattern::Radio),
            "DISH" => Some(Pattern::Dish),
            _ => None,
        }
    }

    /// Whether a peer of pattern `other` may talk to this one
    pub fn is_compatible(self, other: Pattern) -> bool {
        matches!(
            (self, other),
            (Pattern::Pair, Pattern::Pair)
                | (Pattern::Client, Pattern::Server)
                | (Pattern::Server, Pattern::Client)
                | (Pattern::Radio, Pattern::Dish)
                | (Pattern::Dish, Pattern::Radio)
        )
    }
}

impl std::fmt::Display for Pattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flag_values() {
        assert_eq!(SendFlags::MORE.bits(), 1);
        assert_eq!(SendFlags::REUSE.bits(), 2);
        assert_eq!(SendFlags::DONTWAIT.bits(), 4);
    }

    #[test]
    fn test_transport_bits_strip_reuse() {
        let flags = SendFlags::MORE | SendFlags::REUSE | SendFlags::DONTWAIT;
        let wire = flags.transport_bits();
        assert!(wire.contains(SendFlags::MORE));
        assert!(wire.contains(SendFlags::DONTWAIT));
        assert!(!wire.contains(SendFlags::REUSE));
    }

    #[test]
    fn test_pattern_names() {
        for pattern in [
            Pattern::Pair,
            Pattern::Client,
            Pattern::Server,
            Pattern::Radio,
            Pattern::Dish,
        ] {
            assert_eq!(Pattern::from_name(pattern.as_str()), Some(pattern));
        }
        assert_eq!(Pattern::from_name("DEALER"), None);
    }

    #[test]
    fn test_pattern_compatibility() {
        assert!(Pattern::Client.is_compatible(Pattern::Server));
        assert!(Pattern::Radio.is_compatible(Pattern::Dish));
        assert!(!Pattern::Pair.is_compatible(Pattern::Server));
        assert!(!Pattern::Dish.is_compatible(Pattern::Dish));
        assert!(Pattern::Server.uses_routing_id());
        assert!(!Pattern::Pair.uses_group());
    }
}
