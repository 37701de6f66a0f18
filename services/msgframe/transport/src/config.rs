//! Endpoint tuning.

use msgframe_wire::{DEFAULT_MAX_FRAME_SIZE, HARD_MAX_FRAME_SIZE};
use std::time::Duration;

/// Configuration shared by all endpoints
#[derive(Clone, Debug)]
pub struct TransportConfig {
    /// Largest envelope accepted or produced, in bytes
    pub max_frame_size: usize,
    /// Largest multi-part message accepted from a peer, summed over its parts
    pub max_message_size: usize,
    /// Messages queued per direction before senders wait (or get `WouldBlock`)
    pub queue_capacity: usize,
    /// Time allowed for the HELLO exchange on a new connection
    pub handshake_timeout: Duration,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            max_message_size: HARD_MAX_FRAME_SIZE,
            queue_capacity: 1000,
            handshake_timeout: Duration::from_secs(5),
        }
    }
}
