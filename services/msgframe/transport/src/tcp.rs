//! Single-connection TCP endpoints for pair, client, radio and dish patterns.

use crate::config::TransportConfig;
use crate::conn::{establish, join_envelopes, Connection};
use crate::inbox::Inbox;
use crate::interrupt::Interrupt;
use async_trait::async_trait;
use dashmap::DashSet;
use msgframe_wire::{
    Endpoint, Envelope, Frame, Pattern, SendFlags, TransportError, MAX_GROUP_LEN,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Create a TCP listener bound to the given address
pub async fn listen_tcp(addr: SocketAddr) -> tokio::io::Result<TcpListener> {
    TcpListener::bind(addr).await
}

/// A TCP endpoint talking to exactly one peer
pub struct TcpPeer {
    pattern: Pattern,
    connection: Connection,
    reader: JoinHandle<()>,
    inbox: Mutex<Inbox>,
    groups: Arc<DashSet<String>>,
    interrupt: Interrupt,
    max_frame_size: usize,
}

impl TcpPeer {
    /// Connect to `addr` as `pattern`
    pub async fn connect(
        addr: SocketAddr,
        pattern: Pattern,
        config: &TransportConfig,
    ) -> Result<Self, anyhow::Error> {
        if pattern == Pattern::Server {
            anyhow::bail!("server endpoints are created with TcpServer::bind");
        }
        let stream = TcpStream::connect(addr).await?;
        info!("Connected to {} as {}", addr, pattern);
        Self::from_stream(stream, pattern, config).await
    }

    /// Accept one connection on `listener` as `pattern`
    pub async fn accept(
        listener: &TcpListener,
        pattern: Pattern,
        config: &TransportConfig,
    ) -> Result<Self, anyhow::Error> {
        if pattern == Pattern::Server {
            anyhow::bail!("server endpoints are created with TcpServer::bind");
        }
        let (stream, peer) = listener.accept().await?;
        info!("Accepted {} as {}", peer, pattern);
        Self::from_stream(stream, pattern, config).await
    }

    async fn from_stream(
        stream: TcpStream,
        pattern: Pattern,
        config: &TransportConfig,
    ) -> Result<Self, anyhow::Error> {
        let (inbound_tx, inbound_rx) = mpsc::channel(config.queue_capacity.max(1));
        let (connection, reader) = establish(stream, pattern, 0, inbound_tx, config).await?;
        let reader = tokio::spawn(reader.run());
        let groups = Arc::new(DashSet::new());

        Ok(Self {
            pattern,
            connection,
            reader,
            inbox: Mutex::new(Inbox::new(inbound_rx, pattern, Arc::clone(&groups))),
            groups,
            interrupt: Interrupt::new(),
            max_frame_size: config.max_frame_size,
        })
    }

    /// Replace this endpoint's interrupt with a shared one
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Handle that interrupts blocked receives on this endpoint
    pub fn interrupt_handle(&self) -> Interrupt {
        self.interrupt.clone()
    }

    /// Remote address
    pub fn peer_addr(&self) -> SocketAddr {
        self.connection.peer
    }

    /// Pattern announced by the remote side
    pub fn remote_pattern(&self) -> Pattern {
        self.connection.remote
    }

    /// Start delivering frames of `group`. Dish endpoints only.
    pub fn join(&self, group: &str) -> Result<(), TransportError> {
        if self.pattern != Pattern::Dish {
            return Err(TransportError::Unsupported("only dish endpoints join groups"));
        }
        if group.len() > MAX_GROUP_LEN {
            return Err(TransportError::Unsupported("group name too long"));
        }
        debug!("Joined group {}", group);
        self.groups.insert(group.to_string());
        Ok(())
    }

    /// Stop delivering frames of `group`
    pub fn leave(&self, group: &str) -> bool {
        self.groups.remove(group).is_some()
    }
}

impl Drop for TcpPeer {
    fn drop(&mut self) {
        self.reader.abort();
    }
}

/// Build the envelope for an outgoing frame under `pattern`'s rules
pub(crate) fn outgoing(
    pattern: Pattern,
    frame: Frame,
    flags: SendFlags,
) -> Result<Envelope, TransportError> {
    let more = flags.contains(SendFlags::MORE);
    match pattern {
        Pattern::Dish => Err(TransportError::Unsupported("dish endpoints cannot send")),
        Pattern::Radio => {
            if more {
                return Err(TransportError::Unsupported("radio messages are single-part"));
            }
            if frame.group().is_empty() {
                return Err(TransportError::Unsupported("radio frames need a group"));
            }
            let group = frame.group().to_string();
            Ok(Envelope::data(frame.into_bytes(), more).with_group(group))
        }
        _ => Ok(Envelope::data(frame.into_bytes(), more)),
    }
}

#[async_trait]
impl Endpoint for TcpPeer {
    fn pattern(&self) -> Pattern {
        self.pattern
    }

    async fn send_frame(&self, frame: Frame, flags: SendFlags) -> Result<(), TransportError> {
        let bytes = outgoing(self.pattern, frame, flags)?.encode(self.max_frame_size)?;
        self.connection
            .outbox
            .push(bytes, flags, &self.interrupt, join_envelopes)
            .await
    }

    async fn recv_frame(&self) -> Result<Option<Frame>, TransportError> {
        if self.pattern == Pattern::Radio {
            return Err(TransportError::Unsupported("radio endpoints cannot receive"));
        }
        let mut inbox = self.inbox.lock().await;
        inbox.next(&self.interrupt).await
    }

    fn try_recv_frame(&self) -> Result<Option<Frame>, TransportError> {
        if self.pattern == Pattern::Radio {
            return Err(TransportError::Unsupported("radio endpoints cannot receive"));
        }
        match self.inbox.try_lock() {
            Ok(mut inbox) => inbox.try_next(),
            Err(_) => Ok(None),
        }
    }
}
