//! Multi-peer TCP endpoints: server (addressed by routing id) and radio (fan-out).

use crate::config::TransportConfig;
use crate::conn::{establish, join_envelopes};
use crate::inbox::{Batch, Inbox};
use crate::interrupt::Interrupt;
use crate::outbox::Outbox;
use crate::tcp::{listen_tcp, outgoing};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::{DashMap, DashSet};
use msgframe_wire::{Endpoint, Frame, Pattern, SendFlags, TransportError};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Mutex};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, trace, warn};

/// A connected peer as seen by the server
struct PeerEntry {
    outbox: Arc<Outbox<Bytes, Bytes>>,
    peer: SocketAddr,
}

/// Non-zero routing id allocator
#[derive(Debug)]
struct RoutingIds(AtomicU32);

impl RoutingIds {
    fn starting_at(first: u32) -> Self {
        Self(AtomicU32::new(first))
    }

    fn next(&self) -> u32 {
        loop {
            let id = self.0.fetch_add(1, Ordering::Relaxed);
            if id != 0 {
                return id;
            }
        }
    }
}

/// A TCP endpoint accepting any number of peers.
///
/// As a `Server`, each peer gets a routing id that is stamped on the frames
/// it sends and selects it as destination for outgoing frames. As a `Radio`,
/// every outgoing frame goes to every connected dish; frames that do not fit
/// a peer's queue are dropped for that peer. Radio messages are single-part.
pub struct TcpServer {
    pattern: Pattern,
    local_addr: SocketAddr,
    peers: Arc<DashMap<u32, PeerEntry>>,
    inbox: Mutex<Inbox>,
    accept_task: JoinHandle<()>,
    interrupt: Interrupt,
    max_frame_size: usize,
}

impl TcpServer {
    /// Bind to `addr` and start accepting peers
    pub async fn bind(
        addr: SocketAddr,
        pattern: Pattern,
        config: &TransportConfig,
    ) -> Result<Self, anyhow::Error> {
        let listener = listen_tcp(addr).await?;
        Self::from_listener(listener, pattern, config)
    }

    /// Start accepting peers on an existing listener
    pub fn from_listener(
        listener: TcpListener,
        pattern: Pattern,
        config: &TransportConfig,
    ) -> Result<Self, anyhow::Error> {
        if !matches!(pattern, Pattern::Server | Pattern::Radio) {
            anyhow::bail!("{} endpoints connect with TcpPeer", pattern);
        }

        let local_addr = listener.local_addr()?;
        let (inbound_tx, inbound_rx) = mpsc::channel(config.queue_capacity.max(1));
        let peers = Arc::new(DashMap::new());
        let ids = RoutingIds::starting_at(rand::random::<u32>());

        let accept_task = tokio::spawn(accept_loop(
            listener,
            pattern,
            ids,
            Arc::clone(&peers),
            inbound_tx,
            config.clone(),
        ));
        info!("{} listening on {}", pattern, local_addr);

        Ok(Self {
            pattern,
            local_addr,
            peers,
            inbox: Mutex::new(Inbox::new(inbound_rx, pattern, Arc::new(DashSet::new()))),
            accept_task,
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

    /// Address the listener is bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of peers that completed the handshake and are still connected
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }

    /// Routing ids of the connected peers
    pub fn routing_ids(&self) -> Vec<u32> {
        self.peers.iter().map(|entry| *entry.key()).collect()
    }

    /// Remote address of the peer with `routing_id`
    pub fn peer_addr(&self, routing_id: u32) -> Option<SocketAddr> {
        self.peers.get(&routing_id).map(|entry| entry.peer)
    }

    async fn send_routed(&self, frame: Frame, flags: SendFlags) -> Result<(), TransportError> {
        let routing_id = frame.routing_id();
        // Clone the outbox so no map guard is held across the await
        let outbox = self
            .peers
            .get(&routing_id)
            .map(|entry| Arc::clone(&entry.outbox))
            .ok_or(TransportError::NoRoute(routing_id))?;

        let bytes = outgoing(self.pattern, frame, flags)?.encode(self.max_frame_size)?;
        outbox
            .push(bytes, flags, &self.interrupt, join_envelopes)
            .await
            .map_err(|e| match e {
                TransportError::Closed => TransportError::NoRoute(routing_id),
                other => other,
            })
    }

    fn send_fanout(&self, frame: Frame, flags: SendFlags) -> Result<(), TransportError> {
        let bytes = outgoing(self.pattern, frame, flags)?.encode(self.max_frame_size)?;
        for entry in self.peers.iter() {
            if !entry.outbox.offer(bytes.clone()) {
                trace!("Radio dropped frame for {}", entry.peer);
            }
        }
        Ok(())
    }
}

impl Drop for TcpServer {
    fn drop(&mut self) {
        // Connection tasks live in the accept task's JoinSet and go with it
        self.accept_task.abort();
        self.peers.clear();
    }
}

async fn accept_loop(
    listener: TcpListener,
    pattern: Pattern,
    ids: RoutingIds,
    peers: Arc<DashMap<u32, PeerEntry>>,
    inbound: mpsc::Sender<Batch>,
    config: TransportConfig,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    let routing_id = ids.next();
                    connections.spawn(serve_peer(
                        stream,
                        addr,
                        pattern,
                        routing_id,
                        Arc::clone(&peers),
                        inbound.clone(),
                        config.clone(),
                    ));
                }
                Err(e) => warn!("Accept failed: {}", e),
            },
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
}

async fn serve_peer(
    stream: TcpStream,
    addr: SocketAddr,
    pattern: Pattern,
    routing_id: u32,
    peers: Arc<DashMap<u32, PeerEntry>>,
    inbound: mpsc::Sender<Batch>,
    config: TransportConfig,
) {
    let (connection, reader) = match establish(stream, pattern, routing_id, inbound, &config).await
    {
        Ok(established) => established,
        Err(e) => {
            warn!("Rejected {}: {}", addr, e);
            return;
        }
    };

    // Registered before the first message can be delivered, so replies route
    peers.insert(
        routing_id,
        PeerEntry {
            outbox: Arc::new(connection.outbox),
            peer: connection.peer,
        },
    );
    info!("Peer {} connected with routing id {}", addr, routing_id);

    reader.run().await;
    peers.remove(&routing_id);
    debug!("Peer {} (routing id {}) disconnected", addr, routing_id);
}

#[async_trait]
impl Endpoint for TcpServer {
    fn pattern(&self) -> Pattern {
        self.pattern
    }

    async fn send_frame(&self, frame: Frame, flags: SendFlags) -> Result<(), TransportError> {
        match self.pattern {
            Pattern::Radio => self.send_fanout(frame, flags),
            _ => self.send_routed(frame, flags).await,
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::multipart::{recv_multipart, send_multipart};
    use crate::tcp::TcpPeer;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    fn any_port() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0)
    }

    async fn wait_for_peers(server: &TcpServer, count: usize) {
        for _ in 0..200 {
            if server.peer_count() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("peers did not connect");
    }

    #[test]
    fn test_routing_ids_skip_zero() {
        let ids = RoutingIds::starting_at(u32::MAX);
        assert_eq!(ids.next(), u32::MAX);
        assert_eq!(ids.next(), 1);
        assert_eq!(ids.next(), 2);
    }

    #[tokio::test]
    async fn test_server_stamps_and_routes() {
        let config = TransportConfig::default();
        let server = TcpServer::bind(any_port(), Pattern::Server, &config)
            .await
            .unwrap();
        let client = TcpPeer::connect(server.local_addr(), Pattern::Client, &config)
            .await
            .unwrap();

        Frame::from("ping").send(&client, SendFlags::empty()).await.unwrap();
        let request = Frame::recv(&server).await.unwrap().unwrap();
        assert!(request.matches_str("ping"));
        assert_ne!(request.routing_id(), 0);
        assert_eq!(request.meta("Socket-Type"), Some("CLIENT"));
        assert!(request.meta("Peer-Address").is_some());

        let mut reply = Frame::from("pong");
        reply.set_routing_id(request.routing_id());
        reply.send(&server, SendFlags::empty()).await.unwrap();

        let answer = Frame::recv(&client).await.unwrap().unwrap();
        assert!(answer.matches_str("pong"));
        assert_eq!(answer.routing_id(), 0);
        assert_eq!(answer.meta("Socket-Type"), Some("SERVER"));
    }

    #[tokio::test]
    async fn test_unknown_routing_id() {
        let config = TransportConfig::default();
        let server = TcpServer::bind(any_port(), Pattern::Server, &config)
            .await
            .unwrap();

        let err = Frame::from("lost").send(&server, SendFlags::empty()).await.unwrap_err();
        assert!(matches!(err.error, TransportError::NoRoute(0)));

        let mut frame = Frame::from("lost");
        frame.set_routing_id(12345);
        let err = frame.send(&server, SendFlags::REUSE).await.unwrap_err();
        assert!(matches!(err.error, TransportError::NoRoute(12345)));
        assert_eq!(err.frame.unwrap().routing_id(), 12345);
    }

    #[tokio::test]
    async fn test_multipart_over_tcp() {
        let config = TransportConfig::default();
        let server = TcpServer::bind(any_port(), Pattern::Server, &config)
            .await
            .unwrap();
        let client = TcpPeer::connect(server.local_addr(), Pattern::Client, &config)
            .await
            .unwrap();

        let mut a = Frame::from("A");
        a.set_more(true);
        a.send(&client, SendFlags::MORE).await.unwrap();
        Frame::from("B").send(&client, SendFlags::empty()).await.unwrap();

        let parts = recv_multipart(&server).await.unwrap().unwrap();
        let texts: Vec<String> = parts.iter().map(Frame::to_text).collect();
        assert_eq!(texts, vec!["A", "B"]);
        assert_eq!(parts[0].routing_id(), parts[1].routing_id());

        let routing_id = parts[0].routing_id();
        let replies = parts
            .into_iter()
            .map(|mut frame| {
                frame.set_routing_id(routing_id);
                frame
            })
            .collect();
        send_multipart(&server, replies).await.unwrap();
        let echoed = recv_multipart(&client).await.unwrap().unwrap();
        assert_eq!(echoed.len(), 2);
    }

    #[tokio::test]
    async fn test_oversized_message_drops_peer() {
        let limited = TransportConfig {
            max_message_size: 16,
            ..TransportConfig::default()
        };
        let server = TcpServer::bind(any_port(), Pattern::Server, &limited)
            .await
            .unwrap();
        let client = TcpPeer::connect(server.local_addr(), Pattern::Client, &TransportConfig::default())
            .await
            .unwrap();

        send_multipart(&client, vec![Frame::from("small"), Frame::from("enough")])
            .await
            .unwrap();
        let parts = recv_multipart(&server).await.unwrap().unwrap();
        assert_eq!(parts.len(), 2);
        wait_for_peers(&server, 1).await;

        let parts = (0..4).map(|_| Frame::from("0123456789")).collect();
        send_multipart(&client, parts).await.unwrap();

        for _ in 0..200 {
            if server.peer_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(server.peer_count(), 0);
        assert!(Frame::recv_nowait(&server).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_radio_to_dish() {
        let config = TransportConfig::default();
        let radio = TcpServer::bind(any_port(), Pattern::Radio, &config)
            .await
            .unwrap();
        let dish = TcpPeer::connect(radio.local_addr(), Pattern::Dish, &config)
            .await
            .unwrap();
        dish.join("news").unwrap();
        wait_for_peers(&radio, 1).await;

        let mut sports = Frame::from("goal");
        sports.set_group("sports").unwrap();
        sports.send(&radio, SendFlags::empty()).await.unwrap();

        let mut news = Frame::from("headline");
        news.set_group("news").unwrap();
        news.send(&radio, SendFlags::empty()).await.unwrap();

        let received = Frame::recv(&dish).await.unwrap().unwrap();
        assert!(received.matches_str("headline"));
        assert_eq!(received.group(), "news");

        let err = Frame::from("no group").send(&radio, SendFlags::empty()).await.unwrap_err();
        assert!(matches!(err.error, TransportError::Unsupported(_)));

        let mut part = Frame::from("half");
        part.set_group("news").unwrap();
        let err = part.send(&radio, SendFlags::MORE).await.unwrap_err();
        assert!(matches!(err.error, TransportError::Unsupported(_)));
        assert!(matches!(
            Frame::recv_nowait(&radio),
            Err(TransportError::Unsupported(_))
        ));
    }

    #[tokio::test]
    async fn test_rejects_incompatible_pattern() {
        let config = TransportConfig::default();
        let server = TcpServer::bind(any_port(), Pattern::Server, &config)
            .await
            .unwrap();
        assert!(TcpPeer::connect(server.local_addr(), Pattern::Pair, &config)
            .await
            .is_err());
        assert!(TcpServer::bind(any_port(), Pattern::Dish, &config).await.is_err());
    }

    #[tokio::test]
    async fn test_peer_removed_on_disconnect() {
        let config = TransportConfig::default();
        let server = TcpServer::bind(any_port(), Pattern::Server, &config)
            .await
            .unwrap();
        let client = TcpPeer::connect(server.local_addr(), Pattern::Client, &config)
            .await
            .unwrap();
        wait_for_peers(&server, 1).await;
        let routing_id = server.routing_ids()[0];
        assert!(server.peer_addr(routing_id).is_some());

        drop(client);
        for _ in 0..200 {
            if server.peer_count() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(server.peer_count(), 0);
        assert!(server.peer_addr(routing_id).is_none());
    }
}
