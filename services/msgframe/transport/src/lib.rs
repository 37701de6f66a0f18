//! In-process and TCP endpoints, HELLO handshake, interrupts and multi-part helpers for msgframe.
//!
//! Every endpoint implements [`msgframe_wire::Endpoint`], so frames move
//! through them with [`Frame::send`](msgframe_wire::Frame::send) and
//! [`Frame::recv`](msgframe_wire::Frame::recv).
//!
//! ## Features
//!
//! - **Pipes**: connected in-process pair endpoints over bounded channels
//! - **TCP**: pair, client, dish and radio peers plus multi-peer server and radio listeners
//! - **Handshake**: HELLO exchange announcing the socket type and checking compatibility
//! - **Atomic messages**: the parts of a multi-part message are queued and delivered together
//! - **Interrupts**: a shared handle that wakes every blocked receive
//!
//! ## Example
//!
//! ```rust,no_run
//! use msgframe_transport::{TcpPeer, TcpServer, TransportConfig};
//! use msgframe_wire::{Frame, Pattern, SendFlags};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = TransportConfig::default();
//! let server = TcpServer::bind("127.0.0.1:0".parse()?, Pattern::Server, &config).await?;
//! let client = TcpPeer::connect(server.local_addr(), Pattern::Client, &config).await?;
//!
//! Frame::from("hello").send(&client, SendFlags::empty()).await?;
//! if let Some(request) = Frame::recv(&server).await? {
//!     let mut reply = Frame::from("world");
//!     reply.set_routing_id(request.routing_id());
//!     reply.send(&server, SendFlags::empty()).await?;
//! }
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
mod conn;
pub mod handshake;
mod inbox;
pub mod interrupt;
pub mod multipart;
mod outbox;
pub mod pipe;
pub mod server;
pub mod tcp;

// Re-export main types
pub use config::TransportConfig;
pub use handshake::{exchange_hello, parse_hello, send_hello, Hello, PEER_ADDRESS, SOCKET_TYPE};
pub use interrupt::Interrupt;
pub use multipart::{recv_multipart, send_multipart};
pub use pipe::{pair, PipeEndpoint};
pub use server::TcpServer;
pub use tcp::{listen_tcp, TcpPeer};
