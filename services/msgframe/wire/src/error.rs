//! Frame and wire error types.

use thiserror::Error;

/// Errors raised by frame operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Buffer allocation failed
    #[error("allocation of {0} bytes failed")]
    Alloc(usize),

    /// Group name longer than the cap
    #[error("group too long: {len} bytes (max {max})")]
    GroupTooLong {
        /// Length of the rejected name
        len: usize,
        /// Maximum accepted length
        max: usize,
    },

    /// Frame content is not valid UTF-8
    #[error("frame content is not utf-8")]
    NotUtf8,
}

/// Envelope codec errors
#[derive(Error, Debug)]
pub enum WireError {
    /// Incomplete envelope (need more data)
    #[error("incomplete envelope")]
    Incomplete,

    /// Size limit exceeded
    #[error("size limit exceeded: {0}")]
    Size(usize),

    /// Reserved flag bits nonzero
    #[error("reserved bits nonzero")]
    Reserved,

    /// Unknown envelope kind
    #[error("unknown kind {0}")]
    Kind(u8),

    /// Group field exceeds the cap
    #[error("group length {0} exceeds cap")]
    Group(usize),

    /// Invalid CBOR properties
    #[error("cbor properties invalid")]
    Properties,

    /// Malformed envelope structure
    #[error("malformed envelope")]
    Malformed,
}
