//! Message frames.
//!
//! A [`Frame`] owns one part of a possibly multi-part message: a byte buffer
//! plus local metadata (the `more` indicator, a routing id for server/client
//! endpoints and a group for radio/dish endpoints). Frames are move-only
//! owners of their bytes: [`Frame::send`] consumes the frame, duplication is a
//! deep copy, and there is no way to reach a frame after it has been sent or
//! dropped.

use crate::endpoint::{Endpoint, SendError, TransportError};
use crate::error::FrameError;
use crate::flags::SendFlags;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::fmt;
use std::io;
use std::sync::Arc;
use tracing::trace;

/// Maximum group name length in bytes
pub const MAX_GROUP_LEN: usize = 15;

/// Content longer than this is truncated in diagnostic output (binary content)
const PRINT_MAX_BINARY: usize = 35;
/// Content longer than this is truncated in diagnostic output (text content)
const PRINT_MAX_TEXT: usize = 70;

/// Connection-level properties attached by the receiving endpoint
pub type Properties = BTreeMap<String, String>;

/// One part of a message
#[derive(Clone, Default)]
pub struct Frame {
    data: Vec<u8>,
    more: bool,
    routing_id: u32,
    group: String,
    properties: Option<Arc<Properties>>,
}

impl Frame {
    /// Create a frame holding a copy of `data`
    pub fn new(data: &[u8]) -> Self {
        Self {
            data: data.to_vec(),
            ..Self::default()
        }
    }

    /// Create a frame of `size` zero bytes
    pub fn with_size(size: usize) -> Self {
        Self {
            data: vec![0; size],
            ..Self::default()
        }
    }

    /// Create a frame holding a copy of `data`, reporting allocation failure
    pub fn try_new(data: &[u8]) -> Result<Self, FrameError> {
        let mut buf = alloc(data.len())?;
        buf.extend_from_slice(data);
        Ok(Self::from(buf))
    }

    /// Create a frame of `size` zero bytes, reporting allocation failure
    pub fn try_with_size(size: usize) -> Result<Self, FrameError> {
        let mut buf = alloc(size)?;
        buf.resize(size, 0);
        Ok(Self::from(buf))
    }

    /// Create an empty (zero-sized) frame
    pub fn empty() -> Self {
        Self::default()
    }

    /// Create a frame holding the bytes of `content`, without terminator
    pub fn from_str_content(content: &str) -> Self {
        Self::new(content.as_bytes())
    }

    /// Deep copy of this frame, including `more`, routing id and group
    pub fn duplicate(&self) -> Self {
        self.clone()
    }

    /// Deep copy of an optional frame; `None` in, `None` out
    pub fn duplicate_opt(frame: Option<&Frame>) -> Option<Frame> {
        frame.map(Frame::duplicate)
    }

    /// Number of bytes in the frame
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Whether the frame holds zero bytes
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Read-only view of the frame bytes
    #[inline]
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Mutable view of the frame bytes; the length cannot change through it
    #[inline]
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Consume the frame, keeping only its bytes
    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.data)
    }

    /// Replace the frame content; metadata is left as is
    pub fn reset(&mut self, data: &[u8]) {
        self.data = data.to_vec();
    }

    /// Replace the frame content, reporting allocation failure.
    ///
    /// The new buffer is allocated before the old one is released, so on
    /// error the frame still holds its previous content.
    pub fn try_reset(&mut self, data: &[u8]) -> Result<(), FrameError> {
        self.reset_reserving(data.len(), data)
    }

    fn reset_reserving(&mut self, capacity: usize, data: &[u8]) -> Result<(), FrameError> {
        let mut buf = alloc(capacity)?;
        buf.extend_from_slice(data);
        self.data = buf;
        Ok(())
    }

    /// Content equality of two optional frames. False if either is `None`.
    pub fn eq_opt(this: Option<&Frame>, other: Option<&Frame>) -> bool {
        match (this, other) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        }
    }

    /// Whether the frame bytes equal `content`
    pub fn matches_str(&self, content: &str) -> bool {
        self.data == content.as_bytes()
    }

    /// The MORE indicator: set by the endpoint on receipt, or by [`Frame::set_more`]
    pub fn more(&self) -> bool {
        self.more
    }

    /// Set the MORE indicator. This is NOT used by [`Frame::send`]; pass
    /// [`SendFlags::MORE`] explicitly.
    pub fn set_more(&mut self, more: bool) {
        self.more = more;
    }

    /// Routing id, non-zero only for frames received on a server endpoint
    pub fn routing_id(&self) -> u32 {
        self.routing_id
    }

    /// Set the routing id used when sending to a server endpoint
    pub fn set_routing_id(&mut self, routing_id: u32) {
        self.routing_id = routing_id;
    }

    /// Radio/dish group, empty if none
    pub fn group(&self) -> &str {
        &self.group
    }

    /// Set the radio/dish group. Names longer than [`MAX_GROUP_LEN`] bytes
    /// are rejected and the previous group is kept.
    pub fn set_group(&mut self, group: &str) -> Result<(), FrameError> {
        if group.len() > MAX_GROUP_LEN {
            return Err(FrameError::GroupTooLong {
                len: group.len(),
                max: MAX_GROUP_LEN,
            });
        }
        self.group.clear();
        self.group.push_str(group);
        Ok(())
    }

    /// Connection property reported by the endpoint that received this frame
    pub fn meta(&self, property: &str) -> Option<&str> {
        self.properties
            .as_ref()
            .and_then(|props| props.get(property))
            .map(String::as_str)
    }

    /// Attach connection properties; used by endpoints on receipt
    pub fn set_properties(&mut self, properties: Arc<Properties>) {
        self.properties = Some(properties);
    }

    /// Frame bytes as lowercase hex, two characters per byte
    pub fn to_hex(&self) -> String {
        hex::encode(&self.data)
    }

    /// Frame bytes as an owned string.
    ///
    /// Invalid UTF-8 sequences become U+FFFD, so for binary content the result
    /// is not a byte copy and its length can differ from [`len`](Self::len).
    /// Use [`as_str`](Self::as_str) or [`data`](Self::data) for exact content.
    pub fn to_text(&self) -> String {
        String::from_utf8_lossy(&self.data).into_owned()
    }

    /// Frame bytes as a string slice
    pub fn as_str(&self) -> Result<&str, FrameError> {
        std::str::from_utf8(&self.data).map_err(|_| FrameError::NotUtf8)
    }

    /// Write a one-line dump of the frame to `out`
    pub fn fprint<W: io::Write>(&self, prefix: Option<&str>, out: &mut W) -> io::Result<()> {
        if let Some(prefix) = prefix {
            write!(out, "{}", prefix)?;
        }
        writeln!(out, "{}", self)
    }

    /// Hand the frame to `dest`.
    ///
    /// The frame is consumed whatever the outcome. With [`SendFlags::REUSE`]
    /// the caller keeps it: `Ok(Some(frame))` on success and
    /// `SendError::frame` on failure. The frame's own `more` field is ignored;
    /// pass [`SendFlags::MORE`] for non-final parts.
    pub async fn send(
        self,
        dest: &dyn Endpoint,
        flags: SendFlags,
    ) -> Result<Option<Frame>, SendError> {
        let wire_flags = flags.transport_bits();
        if flags.contains(SendFlags::REUSE) {
            let result = dest.send_frame(self.duplicate(), wire_flags).await;
            match result {
                Ok(()) => Ok(Some(self)),
                Err(error) => Err(SendError {
                    error,
                    frame: Some(self),
                }),
            }
        } else {
            let size = self.len();
            dest.send_frame(self, wire_flags).await.map_err(|error| {
                trace!(size, %error, "send failed, frame dropped");
                SendError { error, frame: None }
            })?;
            Ok(None)
        }
    }

    /// Receive one frame from `source`, waiting until one arrives.
    /// Returns `Ok(None)` if the wait was interrupted.
    pub async fn recv(source: &dyn Endpoint) -> Result<Option<Frame>, TransportError> {
        source.recv_frame().await
    }

    /// Receive one frame if one is already waiting
    pub fn recv_nowait(source: &dyn Endpoint) -> Result<Option<Frame>, TransportError> {
        source.try_recv_frame()
    }

    fn is_binary(&self) -> bool {
        self.data.iter().any(|&b| !(9..=127).contains(&b))
    }
}

/// Release the frame held in `slot`, leaving `None`. Repeated calls are no-ops.
pub fn destroy(slot: &mut Option<Frame>) {
    if let Some(frame) = slot.take() {
        trace!(size = frame.len(), "frame destroyed");
    }
}

fn alloc(size: usize) -> Result<Vec<u8>, FrameError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(size)
        .map_err(|_| FrameError::Alloc(size))?;
    Ok(buf)
}

impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.data == other.data
    }
}

impl Eq for Frame {}

impl PartialEq<[u8]> for Frame {
    fn eq(&self, other: &[u8]) -> bool {
        self.data == other
    }
}

impl PartialEq<str> for Frame {
    fn eq(&self, other: &str) -> bool {
        self.matches_str(other)
    }
}

impl PartialEq<&str> for Frame {
    fn eq(&self, other: &&str) -> bool {
        self.matches_str(other)
    }
}

impl AsRef<[u8]> for Frame {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl From<Vec<u8>> for Frame {
    fn from(data: Vec<u8>) -> Self {
        Self {
            data,
            ..Self::default()
        }
    }
}

impl From<&[u8]> for Frame {
    fn from(data: &[u8]) -> Self {
        Self::new(data)
    }
}

impl From<&str> for Frame {
    fn from(content: &str) -> Self {
        Self::from_str_content(content)
    }
}

impl From<String> for Frame {
    fn from(content: String) -> Self {
        Self::from(content.into_bytes())
    }
}

impl From<Bytes> for Frame {
    fn from(data: Bytes) -> Self {
        Self::from(Vec::from(data))
    }
}

/// `[NNN] content`, where binary content is shown as uppercase hex
impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:03}] ", self.len())?;
        let binary = self.is_binary();
        let max = if binary { PRINT_MAX_BINARY } else { PRINT_MAX_TEXT };
        let shown = &self.data[..self.len().min(max)];
        if binary {
            f.write_str(&hex::encode_upper(shown))?;
        } else {
            for &b in shown {
                write!(f, "{}", b as char)?;
            }
        }
        if self.len() > max {
            f.write_str("...")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let preview = &self.data[..self.len().min(PRINT_MAX_BINARY)];
        f.debug_struct("Frame")
            .field("size", &self.len())
            .field("more", &self.more)
            .field("routing_id", &self.routing_id)
            .field("group", &self.group)
            .field("data", &hex::encode(preview))
            .finish()
    }
}
