//! One established TCP connection: handshake, writer task and read loop.

use crate::config::TransportConfig;
use crate::handshake::{exchange_hello, recv_envelope, PEER_ADDRESS, SOCKET_TYPE};
use crate::inbox::Batch;
use crate::outbox::Outbox;
use bytes::{Bytes, BytesMut};
use msgframe_wire::{Envelope, EnvelopeDecoder, EnvelopeKind, Pattern, Properties};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Live connection handles kept by an endpoint
pub(crate) struct Connection {
    /// Encoded messages waiting for the writer task
    pub outbox: Outbox<Bytes, Bytes>,
    /// Remote peer address
    pub peer: SocketAddr,
    /// Pattern the remote announced
    pub remote: Pattern,
}

/// Run the handshake on `stream` and start its writer task.
///
/// The returned [`Reader`] delivers complete messages on `inbound` stamped
/// with `routing_id` once the caller runs it.
pub(crate) async fn establish(
    mut stream: TcpStream,
    local: Pattern,
    routing_id: u32,
    inbound: mpsc::Sender<Batch>,
    config: &TransportConfig,
) -> Result<(Connection, Reader), anyhow::Error> {
    let peer = stream.peer_addr()?;
    stream.set_nodelay(true)?;

    let mut decoder = EnvelopeDecoder::with_max_frame_size(config.max_frame_size);
    let mut buffer = BytesMut::new();
    let hello = tokio::time::timeout(
        config.handshake_timeout,
        exchange_hello(
            &mut stream,
            local,
            &mut decoder,
            &mut buffer,
            config.max_frame_size,
        ),
    )
    .await
    .map_err(|_| anyhow::anyhow!("handshake with {} timed out", peer))??;

    debug!("Handshake with {} complete, remote is {}", peer, hello.pattern);

    let mut props = hello.properties;
    props.insert(SOCKET_TYPE.to_string(), hello.pattern.as_str().to_string());
    props.insert(PEER_ADDRESS.to_string(), peer.to_string());
    let properties = Arc::new(props);

    let (read_half, write_half) = stream.into_split();
    let (outbound, outbound_rx) = mpsc::channel(config.queue_capacity.max(1));

    tokio::spawn(write_loop(write_half, outbound_rx, peer));
    let reader = Reader {
        half: read_half,
        decoder,
        buffer,
        max_message_size: config.max_message_size,
        routing_id,
        properties,
        inbound,
        peer,
    };

    let connection = Connection {
        outbox: Outbox::new(outbound),
        peer,
        remote: hello.pattern,
    };
    Ok((connection, reader))
}

/// Concatenate the encoded envelopes of one message into a single write
pub(crate) fn join_envelopes(mut parts: Vec<Bytes>) -> Bytes {
    if parts.len() == 1 {
        if let Some(only) = parts.pop() {
            return only;
        }
    }
    let mut buf = BytesMut::with_capacity(parts.iter().map(Bytes::len).sum());
    for part in &parts {
        buf.extend_from_slice(part);
    }
    buf.freeze()
}

async fn write_loop(mut writer: OwnedWriteHalf, mut rx: mpsc::Receiver<Bytes>, peer: SocketAddr) {
    while let Some(bytes) = rx.recv().await {
        if let Err(e) = writer.write_all(&bytes).await {
            warn!("Write to {} failed: {}", peer, e);
            return;
        }
    }
    // All senders gone: queued envelopes are flushed, close our side
    let _ = writer.shutdown().await;
    debug!("Writer for {} finished", peer);
}

/// Receive half of a connection
pub(crate) struct Reader {
    half: OwnedReadHalf,
    decoder: EnvelopeDecoder,
    buffer: BytesMut,
    max_message_size: usize,
    routing_id: u32,
    properties: Arc<Properties>,
    inbound: mpsc::Sender<Batch>,
    peer: SocketAddr,
}

impl Reader {
    /// Read envelopes until the peer goes away or the inbox is dropped
    pub(crate) async fn run(mut self) {
        let peer = self.peer;
        let mut parts: Vec<Envelope> = Vec::new();
        let mut message_size = 0usize;
        loop {
            let envelope =
                match recv_envelope(&mut self.half, &mut self.decoder, &mut self.buffer).await {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        debug!("Reader for {} stopped: {}", peer, e);
                        return;
                    }
                };

            if envelope.kind != EnvelopeKind::Data {
                warn!("Unexpected {:?} envelope from {}, closing", envelope.kind, peer);
                return;
            }

            message_size = message_size.saturating_add(envelope.payload.len());
            if message_size > self.max_message_size {
                warn!(
                    "Message from {} exceeds {} bytes after {} parts, closing",
                    peer,
                    self.max_message_size,
                    parts.len() + 1
                );
                return;
            }

            let more = envelope.more;
            parts.push(envelope);
            if more {
                continue;
            }
            message_size = 0;

            let batch = Batch {
                routing_id: self.routing_id,
                properties: Arc::clone(&self.properties),
                parts: std::mem::take(&mut parts),
            };
            if self.inbound.send(batch).await.is_err() {
                debug!("Inbox for {} dropped, reader exiting", peer);
                return;
            }
        }
    }
}
