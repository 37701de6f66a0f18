//! msgframe command-line tool.
//!
//! Runs an echoing server, sends multi-part messages to one, or checks the
//! frame round trip over a pipe and a loopback TCP connection.

use anyhow::Context;
use clap::{Parser, Subcommand};
use msgframe_transport::{
    pair, recv_multipart, send_multipart, Interrupt, TcpPeer, TcpServer, TransportConfig,
};
use msgframe_wire::{Endpoint, Frame, Pattern};
use serde::Serialize;
use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod logging;

use config::MsgframeConfig;
use logging::MsgframeLogFormatter;

/// Frame messaging over pipes and TCP
#[derive(Parser, Debug)]
#[command(name = "msgframe", version, about = "Send, receive and inspect message frames")]
struct Args {
    /// Configuration file path
    #[arg(long, default_value = "config.yaml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Print frames as JSON lines instead of dumps
    #[arg(long)]
    json: bool,

    /// Handshake timeout, e.g. 5s (overrides the configuration file)
    #[arg(long)]
    handshake_timeout: Option<humantime::Duration>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Accept clients, print every message and echo it back
    Listen {
        /// Bind address, e.g. 0.0.0.0:5555
        #[arg(long)]
        bind: Option<SocketAddr>,
    },
    /// Send one multi-part message and print the reply
    Send {
        /// Server address, e.g. 127.0.0.1:5555
        #[arg(long)]
        connect: Option<SocketAddr>,

        /// Message parts
        #[arg(required = true)]
        parts: Vec<String>,
    },
    /// Send a two-part message over a pipe and over loopback TCP
    Selftest,
}

/// One received frame, as printed with `--json`
#[derive(Debug, Serialize)]
struct FrameReport<'a> {
    routing_id: u32,
    group: &'a str,
    more: bool,
    size: usize,
    hex: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<&'a str>,
}

impl<'a> From<&'a Frame> for FrameReport<'a> {
    fn from(frame: &'a Frame) -> Self {
        Self {
            routing_id: frame.routing_id(),
            group: frame.group(),
            more: frame.more(),
            size: frame.len(),
            hex: frame.to_hex(),
            text: frame.as_str().ok(),
        }
    }
}

/// Writes received frames to stdout
struct Printer {
    json: bool,
}

impl Printer {
    fn frame(&self, frame: &Frame, prefix: &str) -> anyhow::Result<()> {
        let stdout = std::io::stdout();
        let mut out = stdout.lock();
        if self.json {
            writeln!(out, "{}", serde_json::to_string(&FrameReport::from(frame))?)?;
        } else {
            frame.fprint(Some(prefix), &mut out)?;
        }
        Ok(())
    }

    fn message(&self, parts: &[Frame], prefix: &str) -> anyhow::Result<()> {
        for frame in parts {
            self.frame(frame, prefix)?;
        }
        Ok(())
    }
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let env_filter = EnvFilter::new("info")
        .add_directive(format!("msgframe={}", args.log_level).parse()?)
        .add_directive(format!("msgframe_wire={}", args.log_level).parse()?)
        .add_directive(format!("msgframe_transport={}", args.log_level).parse()?);

    let formatter = MsgframeLogFormatter::new("msgframe".to_string());

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_ansi(true)
        .event_format(formatter)
        .init();

    info!("Starting msgframe v{}", env!("CARGO_PKG_VERSION"));

    let file_config = MsgframeConfig::load_from_file(&args.config)?;
    let mut transport = file_config.to_transport_config();
    if let Some(timeout) = args.handshake_timeout {
        transport.handshake_timeout = timeout.into();
    }
    let default_endpoint: SocketAddr = file_config
        .endpoint
        .parse()
        .with_context(|| format!("invalid endpoint {}", file_config.endpoint))?;

    let interrupt = Interrupt::new();
    spawn_ctrl_c(interrupt.clone());
    let printer = Printer { json: args.json };

    match args.command {
        Command::Listen { bind } => {
            listen(bind.unwrap_or(default_endpoint), &transport, interrupt, &printer).await
        }
        Command::Send { connect, parts } => {
            send(
                connect.unwrap_or(default_endpoint),
                parts,
                &transport,
                interrupt,
                &printer,
            )
            .await
        }
        Command::Selftest => selftest(&transport, &printer).await,
    }
}

fn spawn_ctrl_c(interrupt: Interrupt) {
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                component_info!("signal", "Received Ctrl-C, interrupting");
                interrupt.interrupt();
            }
            Err(e) => component_warn!("signal", "Cannot listen for Ctrl-C: {}", e),
        }
    });
}

async fn listen(
    bind: SocketAddr,
    config: &TransportConfig,
    interrupt: Interrupt,
    printer: &Printer,
) -> anyhow::Result<()> {
    let server = TcpServer::bind(bind, Pattern::Server, config)
        .await?
        .with_interrupt(interrupt);
    component_info!("listen", "Echoing on {}", server.local_addr());

    while let Some(parts) = recv_multipart(&server).await? {
        let routing_id = parts.first().map(Frame::routing_id).unwrap_or_default();
        printer.message(&parts, &format!("{:08x} ", routing_id))?;

        let reply: Vec<Frame> = parts
            .into_iter()
            .map(|mut frame| {
                frame.set_routing_id(routing_id);
                frame
            })
            .collect();
        if let Err(e) = send_multipart(&server, reply).await {
            component_warn!("listen", "Echo to {:08x} failed: {}", routing_id, e);
        }
    }

    component_info!("listen", "Interrupted, {} peers connected", server.peer_count());
    Ok(())
}

async fn send(
    connect: SocketAddr,
    parts: Vec<String>,
    config: &TransportConfig,
    interrupt: Interrupt,
    printer: &Printer,
) -> anyhow::Result<()> {
    let client = TcpPeer::connect(connect, Pattern::Client, config)
        .await?
        .with_interrupt(interrupt);

    let frames = parts.into_iter().map(Frame::from).collect();
    send_multipart(&client, frames).await?;

    match recv_multipart(&client).await? {
        Some(reply) => printer.message(&reply, "reply "),
        None => {
            warn!("Interrupted before the reply arrived");
            Ok(())
        }
    }
}

async fn selftest(config: &TransportConfig, printer: &Printer) -> anyhow::Result<()> {
    let (a, b) = pair(config.queue_capacity);
    roundtrip("pipe", &a, &b, printer).await?;

    let loopback = SocketAddr::from(([127, 0, 0, 1], 0));
    let server = TcpServer::bind(loopback, Pattern::Server, config).await?;
    let client = TcpPeer::connect(server.local_addr(), Pattern::Client, config).await?;
    roundtrip("tcp", &client, &server, printer).await?;

    component_info!("selftest", "All checks passed");
    Ok(())
}

async fn roundtrip(
    name: &str,
    from: &dyn Endpoint,
    to: &dyn Endpoint,
    printer: &Printer,
) -> anyhow::Result<()> {
    send_multipart(from, vec![Frame::from("A"), Frame::from("B")]).await?;
    let parts = recv_multipart(to)
        .await?
        .with_context(|| format!("{}: interrupted", name))?;
    printer.message(&parts, &format!("{} ", name))?;

    let ok = parts.len() == 2
        && parts[0].matches_str("A")
        && parts[0].more()
        && parts[1].matches_str("B")
        && !parts[1].more();
    if !ok {
        component_error!("selftest", "{} round trip mismatch: {:?}", name, parts);
        anyhow::bail!("{} round trip returned unexpected frames", name);
    }
    component_debug!("selftest", "{} round trip ok", name);
    Ok(())
}
