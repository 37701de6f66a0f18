//! The transport boundary frames are sent to and received from.

use crate::error::WireError;
use crate::flags::{Pattern, SendFlags};
use crate::frame::Frame;
use async_trait::async_trait;
use thiserror::Error;

/// Transport failures reported by an [`Endpoint`]
#[derive(Error, Debug)]
pub enum TransportError {
    /// DONTWAIT was set and the frame could not be queued
    #[error("operation would block")]
    WouldBlock,

    /// The wait was interrupted
    #[error("interrupted")]
    Interrupted,

    /// The endpoint or its peer is gone
    #[error("endpoint closed")]
    Closed,

    /// No connected peer has this routing id
    #[error("no route to peer {0}")]
    NoRoute(u32),

    /// Operation not supported by the endpoint's pattern
    #[error("unsupported: {0}")]
    Unsupported(&'static str),

    /// Peer violated the envelope protocol
    #[error("protocol error: {0}")]
    Protocol(#[from] WireError),

    /// I/O error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure of [`Frame::send`]
#[derive(Error, Debug)]
#[error("send failed: {error}")]
pub struct SendError {
    /// What the transport reported
    pub error: TransportError,
    /// The frame, handed back only when the send used `REUSE`
    pub frame: Option<Frame>,
}

/// A socket-like endpoint that accepts and delivers frames.
///
/// Implementations decide which frame metadata crosses the wire: `more` is
/// always derived from [`SendFlags::MORE`], the routing id only means
/// something to server endpoints and the group only to radio/dish endpoints.
#[async_trait]
pub trait Endpoint: Send + Sync {
    /// Messaging pattern of this endpoint
    fn pattern(&self) -> Pattern;

    /// Queue one frame for transmission. `flags` never contains `REUSE`.
    async fn send_frame(&self, frame: Frame, flags: SendFlags) -> Result<(), TransportError>;

    /// Wait for the next frame. `Ok(None)` means the wait was interrupted.
    async fn recv_frame(&self) -> Result<Option<Frame>, TransportError>;

    /// Take the next frame if one is already waiting
    fn try_recv_frame(&self) -> Result<Option<Frame>, TransportError>;
}
