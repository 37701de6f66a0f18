//! HELLO exchange for stream connections.
//!
//! Both sides send a HELLO envelope with their socket type as soon as the
//! connection is up, then check that the peer's pattern can talk to theirs.

use bytes::BytesMut;
use msgframe_wire::{
    parse_properties, Envelope, EnvelopeDecoder, EnvelopeKind, Pattern, Properties,
    PropertiesBuilder,
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, trace};

/// Property naming the sender's socket type
pub const SOCKET_TYPE: &str = "Socket-Type";
/// Property naming the remote address, added locally on receipt
pub const PEER_ADDRESS: &str = "Peer-Address";

/// Parsed HELLO
#[derive(Debug, Clone)]
pub struct Hello {
    /// Pattern of the sender
    pub pattern: Pattern,
    /// Every property the sender advertised
    pub properties: Properties,
}

/// Send a HELLO envelope announcing `pattern`
pub async fn send_hello<W: AsyncWriteExt + Unpin>(
    mut writer: W,
    pattern: Pattern,
    max_frame_size: usize,
) -> Result<(), anyhow::Error> {
    let properties = PropertiesBuilder::new()
        .insert_str(SOCKET_TYPE, pattern.as_str())
        .build()?;

    let bytes = Envelope::hello(properties).encode(max_frame_size)?;
    writer.write_all(&bytes).await?;
    debug!("Sent HELLO as {}", pattern);
    Ok(())
}

/// Read the next envelope from the stream
pub async fn recv_envelope<R: AsyncReadExt + Unpin>(
    mut reader: R,
    decoder: &mut EnvelopeDecoder,
    buffer: &mut BytesMut,
) -> Result<Envelope, anyhow::Error> {
    loop {
        if let Some(envelope) = decoder.decode(buffer)? {
            return Ok(envelope);
        }

        let bytes_read = reader.read_buf(buffer).await?;
        if bytes_read == 0 {
            anyhow::bail!("EOF while reading envelope");
        }

        trace!(
            "Read {} bytes, buffer now has {} bytes",
            bytes_read,
            buffer.len()
        );
    }
}

/// Parse a HELLO envelope
pub fn parse_hello(envelope: &Envelope) -> Result<Hello, anyhow::Error> {
    if envelope.kind != EnvelopeKind::Hello {
        anyhow::bail!("expected HELLO, got {:?}", envelope.kind);
    }

    let properties = parse_properties(&envelope.payload)?;
    let socket_type = properties
        .get(SOCKET_TYPE)
        .ok_or_else(|| anyhow::anyhow!("HELLO without {}", SOCKET_TYPE))?;
    let pattern = Pattern::from_name(socket_type)
        .ok_or_else(|| anyhow::anyhow!("unknown socket type {}", socket_type))?;

    Ok(Hello {
        pattern,
        properties,
    })
}

/// Run both halves of the handshake and check pattern compatibility
pub async fn exchange_hello<S: AsyncReadExt + AsyncWriteExt + Unpin>(
    stream: &mut S,
    local: Pattern,
    decoder: &mut EnvelopeDecoder,
    buffer: &mut BytesMut,
    max_frame_size: usize,
) -> Result<Hello, anyhow::Error> {
    send_hello(&mut *stream, local, max_frame_size).await?;
    let envelope = recv_envelope(&mut *stream, decoder, buffer).await?;
    let hello = parse_hello(&envelope)?;

    if !local.is_compatible(hello.pattern) {
        anyhow::bail!("{} cannot talk to {}", local, hello.pattern);
    }
    Ok(hello)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use msgframe_wire::DEFAULT_MAX_FRAME_SIZE;
    use std::io::Cursor;

    #[tokio::test]
    async fn test_hello_roundtrip() {
        let mut buffer = Vec::new();
        send_hello(&mut buffer, Pattern::Client, DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap();

        let mut decoder = EnvelopeDecoder::new();
        let mut read_buf = BytesMut::new();
        let envelope = recv_envelope(Cursor::new(buffer), &mut decoder, &mut read_buf)
            .await
            .unwrap();

        let hello = parse_hello(&envelope).unwrap();
        assert_eq!(hello.pattern, Pattern::Client);
        assert_eq!(
            hello.properties.get(SOCKET_TYPE).map(String::as_str),
            Some("CLIENT")
        );
    }

    #[tokio::test]
    async fn test_exchange_rejects_incompatible_peer() {
        let (mut left, mut right) = tokio::io::duplex(1024);
        let right_task = tokio::spawn(async move {
            let mut decoder = EnvelopeDecoder::new();
            let mut buffer = BytesMut::new();
            exchange_hello(
                &mut right,
                Pattern::Pair,
                &mut decoder,
                &mut buffer,
                DEFAULT_MAX_FRAME_SIZE,
            )
            .await
        });

        let mut decoder = EnvelopeDecoder::new();
        let mut buffer = BytesMut::new();
        let result = exchange_hello(
            &mut left,
            Pattern::Client,
            &mut decoder,
            &mut buffer,
            DEFAULT_MAX_FRAME_SIZE,
        )
        .await;
        assert!(result.is_err());
        assert!(right_task.await.unwrap().is_err());
    }

    #[test]
    fn test_data_envelope_is_not_hello() {
        let envelope = Envelope::data(Bytes::from_static(b"x"), false);
        assert!(parse_hello(&envelope).is_err());
    }

    #[tokio::test]
    async fn test_eof_during_hello() {
        let mut decoder = EnvelopeDecoder::new();
        let mut read_buf = BytesMut::new();
        let result = recv_envelope(Cursor::new(vec![0u8, 0]), &mut decoder, &mut read_buf).await;
        assert!(result.is_err());
    }
}
