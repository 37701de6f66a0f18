//! Message frames, send flags and the endpoint boundary for msgframe.
//!
//! A [`Frame`] is one part of a possibly multi-part message: an owned byte
//! buffer plus local metadata. Frames are handed to an [`Endpoint`] with
//! [`Frame::send`], which consumes them unless [`SendFlags::REUSE`] is set,
//! and read back with [`Frame::recv`].
//!
//! ## Features
//!
//! - **Move-only ownership**: sending or dropping a frame ends its life; use
//!   after send is a compile error
//! - **Deep duplication**: every frame owns its bytes, `duplicate` copies them
//! - **Pattern metadata**: routing id (server/client) and group (radio/dish)
//! - **Diagnostics**: hex and text renderings, one-line dumps to any writer
//! - **Envelope codec**: length-prefixed framing for stream transports
//!
//! ## Example
//!
//! ```rust
//! use msgframe_wire::{Frame, SendFlags};
//!
//! let mut frame = Frame::from("hello");
//! frame.set_more(true);
//! assert!(frame.matches_str("hello"));
//! assert_eq!(frame.to_hex(), "68656c6c6f");
//!
//! let copy = frame.duplicate();
//! assert_eq!(copy, frame);
//! assert!(SendFlags::MORE.contains(SendFlags::MORE));
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod endpoint;
pub mod error;
pub mod flags;
pub mod frame;

// Re-export main types
pub use codec::{
    parse_properties, Envelope, EnvelopeDecoder, EnvelopeKind, PropertiesBuilder,
    DEFAULT_MAX_FRAME_SIZE, HARD_MAX_FRAME_SIZE,
};
pub use endpoint::{Endpoint, SendError, TransportError};
pub use error::{FrameError, WireError};
pub use flags::{Pattern, SendFlags};
pub use frame::{destroy, Frame, Properties, MAX_GROUP_LEN};
