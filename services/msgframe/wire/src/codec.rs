//! Envelope encoding for stream transports.
//!
//! Datagram-free transports such as TCP need a length-prefixed envelope
//! around each frame. Only the payload, the MORE bit and (for radio/dish)
//! the group travel in it; routing ids never do.
//!
//! ```text
//! +----------------------+----------------------------+
//! | u32 body_len         | length of bytes that follow|
//! +----------------------+----------------------------+
//! | u8 kind              | 0 = data, 1 = hello        |
//! +----------------------+----------------------------+
//! | u8 flags             | bit 0 = MORE               |
//! +----------------------+----------------------------+
//! | u8 group_len         | 0..=15                     |
//! +----------------------+----------------------------+
//! | group bytes          | UTF-8                      |
//! +----------------------+----------------------------+
//! | payload              | variable (0..N)            |
//! +----------------------+----------------------------+
//! ```

use crate::error::WireError;
use crate::frame::{Frame, Properties, MAX_GROUP_LEN};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;

/// Maximum envelope size (16 MiB default, 64 MiB hard limit)
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;
/// Hard maximum envelope size limit (64 MiB)
pub const HARD_MAX_FRAME_SIZE: usize = 64 * 1024 * 1024;

/// Bytes between the length prefix and the group
const FIXED_BODY_SIZE: usize = 3;
const FLAG_MORE: u8 = 1 << 0;

/// Envelope kinds
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeKind {
    /// Frame payload
    Data = 0x00,
    /// Connection greeting carrying CBOR properties
    Hello = 0x01,
}

impl TryFrom<u8> for EnvelopeKind {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(EnvelopeKind::Data),
            0x01 => Ok(EnvelopeKind::Hello),
            _ => Err(WireError::Kind(value)),
        }
    }
}

/// One frame as it travels over a stream
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Envelope kind
    pub kind: EnvelopeKind,
    /// Sender passed MORE
    pub more: bool,
    /// Radio/dish group, empty if none
    pub group: String,
    /// Frame bytes or HELLO properties
    pub payload: Bytes,
}

impl Envelope {
    /// Data envelope without group
    pub fn data(payload: Bytes, more: bool) -> Self {
        Self {
            kind: EnvelopeKind::Data,
            more,
            group: String::new(),
            payload,
        }
    }

    /// HELLO envelope carrying encoded properties
    pub fn hello(properties: Bytes) -> Self {
        Self {
            kind: EnvelopeKind::Hello,
            more: false,
            group: String::new(),
            payload: properties,
        }
    }

    /// Set the group
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = group.into();
        self
    }

    /// Total size when encoded, including the length prefix
    pub fn encoded_size(&self) -> usize {
        4 + FIXED_BODY_SIZE + self.group.len() + self.payload.len()
    }

    /// Encode to a contiguous buffer
    pub fn encode(&self, max_frame_size: usize) -> Result<Bytes, WireError> {
        if self.group.len() > MAX_GROUP_LEN {
            return Err(WireError::Group(self.group.len()));
        }

        let total_size = self.encoded_size();
        if total_size > max_frame_size {
            return Err(WireError::Size(total_size));
        }

        let mut buf = BytesMut::with_capacity(total_size);
        buf.put_u32((total_size - 4) as u32);
        buf.put_u8(self.kind as u8);
        buf.put_u8(if self.more { FLAG_MORE } else { 0 });
        buf.put_u8(self.group.len() as u8);
        buf.put_slice(self.group.as_bytes());
        buf.put_slice(&self.payload);

        Ok(buf.freeze())
    }

    /// Turn a data envelope into a received frame. Only `more` is carried over;
    /// group and routing id are the endpoint's decision.
    pub fn into_frame(self) -> Frame {
        let mut frame = Frame::from(self.payload);
        frame.set_more(self.more);
        frame
    }
}

/// Decoder for incoming envelopes
#[derive(Debug)]
pub struct EnvelopeDecoder {
    max_frame_size: usize,
}

impl EnvelopeDecoder {
    /// Create a decoder with the default size limit
    pub fn new() -> Self {
        Self {
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
        }
    }

    /// Create a decoder with a custom size limit, clamped to the hard limit
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size: max_frame_size.min(HARD_MAX_FRAME_SIZE),
        }
    }

    /// Decode one envelope from `buf`, or `None` if more bytes are needed
    pub fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Envelope>, WireError> {
        if buf.len() < 4 {
            return Ok(None);
        }

        let body_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if body_len + 4 > self.max_frame_size {
            return Err(WireError::Size(body_len + 4));
        }
        if body_len < FIXED_BODY_SIZE {
            return Err(WireError::Malformed);
        }
        if buf.len() < 4 + body_len {
            return Ok(None);
        }

        buf.advance(4);
        let mut body = buf.split_to(body_len).freeze();

        let kind = EnvelopeKind::try_from(body.get_u8())?;
        let flags = body.get_u8();
        if flags & !FLAG_MORE != 0 {
            return Err(WireError::Reserved);
        }
        let group_len = body.get_u8() as usize;
        if group_len > MAX_GROUP_LEN {
            return Err(WireError::Group(group_len));
        }
        if body.len() < group_len {
            return Err(WireError::Malformed);
        }
        let group = std::str::from_utf8(&body.split_to(group_len))
            .map_err(|_| WireError::Malformed)?
            .to_string();

        Ok(Some(Envelope {
            kind,
            more: flags & FLAG_MORE != 0,
            group,
            payload: body,
        }))
    }
}

impl Default for EnvelopeDecoder {
    fn default() -> Self {
        Self::new()
    }
}

/// CBOR property map builder for HELLO envelopes
#[derive(Debug, Clone)]
pub struct PropertiesBuilder {
    map: BTreeMap<String, ciborium::Value>,
}

impl PropertiesBuilder {
    /// Create a new properties builder
    pub fn new() -> Self {
        Self {
            map: BTreeMap::new(),
        }
    }

    /// Insert a string property
    pub fn insert_str(mut self, key: &str, value: &str) -> Self {
        self.map
            .insert(key.to_string(), ciborium::Value::Text(value.to_string()));
        self
    }

    /// Build the properties as CBOR bytes
    pub fn build(self) -> Result<Bytes, WireError> {
        let value = ciborium::Value::Map(
            self.map
                .into_iter()
                .map(|(k, v)| (ciborium::Value::Text(k), v))
                .collect(),
        );

        let mut buf = Vec::new();
        ciborium::into_writer(&value, &mut buf).map_err(|_| WireError::Properties)?;

        Ok(Bytes::from(buf))
    }
}

impl Default for PropertiesBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse CBOR properties. Non-text keys and values are skipped.
pub fn parse_properties(raw: &[u8]) -> Result<Properties, WireError> {
    let value: ciborium::Value = ciborium::from_reader(raw).map_err(|_| WireError::Properties)?;

    if let ciborium::Value::Map(map) = value {
        let mut result = Properties::new();
        for (key, value) in map {
            if let (ciborium::Value::Text(key), ciborium::Value::Text(value)) = (key, value) {
                result.insert(key, value);
            }
        }
        Ok(result)
    } else {
        Err(WireError::Properties)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decode_one(bytes: &[u8]) -> Result<Option<Envelope>, WireError> {
        let mut buf = BytesMut::from(bytes);
        EnvelopeDecoder::new().decode(&mut buf)
    }

    #[test]
    fn test_encode_decode_with_group() {
        let env = Envelope::data(Bytes::from_static(b"tick"), true).with_group("prices");
        let bytes = env.encode(DEFAULT_MAX_FRAME_SIZE).unwrap();
        assert_eq!(bytes.len(), env.encoded_size());

        let decoded = decode_one(&bytes).unwrap().unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn test_zero_length_payload() {
        let env = Envelope::data(Bytes::new(), false);
        let bytes = env.encode(DEFAULT_MAX_FRAME_SIZE).unwrap();
        assert_eq!(bytes.as_ref(), &[0u8, 0, 0, 3, 0, 0, 0]);
        let decoded = decode_one(&bytes).unwrap().unwrap();
        assert!(decoded.payload.is_empty());
    }

    #[test]
    fn test_partial_input() {
        let env = Envelope::data(Bytes::from_static(b"hello world"), false);
        let bytes = env.encode(DEFAULT_MAX_FRAME_SIZE).unwrap();

        let mut decoder = EnvelopeDecoder::new();
        let mut buf = BytesMut::from(&bytes[..6]);
        assert!(decoder.decode(&mut buf).unwrap().is_none());
        buf.extend_from_slice(&bytes[6..]);
        let decoded = decoder.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded.payload, Bytes::from_static(b"hello world"));
        assert!(buf.is_empty());
    }

    #[test]
    fn test_two_envelopes_in_one_buffer() {
        let mut buf = BytesMut::new();
        for part in ["A", "B"] {
            let env = Envelope::data(Bytes::from(part), part == "A");
            buf.extend_from_slice(&env.encode(DEFAULT_MAX_FRAME_SIZE).unwrap());
        }
        let mut decoder = EnvelopeDecoder::new();
        let first = decoder.decode(&mut buf).unwrap().unwrap().into_frame();
        let second = decoder.decode(&mut buf).unwrap().unwrap().into_frame();
        assert!(first.matches_str("A") && first.more());
        assert!(second.matches_str("B") && !second.more());
    }

    #[test]
    fn test_size_limit() {
        let env = Envelope::data(Bytes::from(vec![0u8; 64]), false);
        assert!(matches!(env.encode(32), Err(WireError::Size(_))));

        let bytes = env.encode(DEFAULT_MAX_FRAME_SIZE).unwrap();
        let mut buf = BytesMut::from(bytes.as_ref());
        let err = EnvelopeDecoder::with_max_frame_size(32)
            .decode(&mut buf)
            .unwrap_err();
        assert!(matches!(err, WireError::Size(_)));
    }

    #[test]
    fn test_rejects_bad_header() {
        assert!(matches!(
            decode_one(&[0, 0, 0, 3, 9, 0, 0]),
            Err(WireError::Kind(9))
        ));
        assert!(matches!(
            decode_one(&[0, 0, 0, 3, 0, 2, 0]),
            Err(WireError::Reserved)
        ));
        assert!(matches!(
            decode_one(&[0, 0, 0, 3, 0, 0, 16]),
            Err(WireError::Group(16))
        ));
        assert!(matches!(
            decode_one(&[0, 0, 0, 4, 0, 0, 2, b'a']),
            Err(WireError::Malformed)
        ));
        assert!(matches!(decode_one(&[0, 0, 0, 1, 0]), Err(WireError::Malformed)));
    }

    #[test]
    fn test_group_too_long_on_encode() {
        let env = Envelope::data(Bytes::new(), false).with_group("x".repeat(MAX_GROUP_LEN + 1));
        assert!(matches!(
            env.encode(DEFAULT_MAX_FRAME_SIZE),
            Err(WireError::Group(_))
        ));
    }

    #[test]
    fn test_properties() {
        let raw = PropertiesBuilder::new()
            .insert_str("Socket-Type", "CLIENT")
            .insert_str("Identity", "worker-1")
            .build()
            .unwrap();

        let props = parse_properties(&raw).unwrap();
        assert_eq!(props.get("Socket-Type").map(String::as_str), Some("CLIENT"));
        assert_eq!(props.get("Identity").map(String::as_str), Some("worker-1"));
        assert!(parse_properties(b"\xff\x00").is_err());
    }
}
