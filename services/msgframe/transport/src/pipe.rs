//! In-process pair endpoints over bounded channels.

use crate::inbox::{Batch, Inbox};
use crate::interrupt::Interrupt;
use crate::outbox::Outbox;
use async_trait::async_trait;
use dashmap::DashSet;
use msgframe_wire::{Endpoint, Envelope, Frame, Pattern, Properties, SendFlags, TransportError};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tracing::debug;

/// One end of an in-process pipe
pub struct PipeEndpoint {
    outbox: Outbox<Envelope, Batch>,
    inbox: Mutex<Inbox>,
    properties: Arc<Properties>,
    interrupt: Interrupt,
}

/// Create two connected pair endpoints, each queueing up to `capacity` messages
pub fn pair(capacity: usize) -> (PipeEndpoint, PipeEndpoint) {
    let capacity = capacity.max(1);
    let (a_tx, a_rx) = mpsc::channel(capacity);
    let (b_tx, b_rx) = mpsc::channel(capacity);

    let mut props = Properties::new();
    props.insert("Socket-Type".to_string(), Pattern::Pair.as_str().to_string());
    let properties = Arc::new(props);

    debug!(capacity, "created pipe pair");
    (
        PipeEndpoint::new(a_tx, b_rx, Arc::clone(&properties)),
        PipeEndpoint::new(b_tx, a_rx, properties),
    )
}

impl PipeEndpoint {
    fn new(tx: mpsc::Sender<Batch>, rx: mpsc::Receiver<Batch>, properties: Arc<Properties>) -> Self {
        Self {
            outbox: Outbox::new(tx),
            inbox: Mutex::new(Inbox::new(rx, Pattern::Pair, Arc::new(DashSet::new()))),
            properties,
            interrupt: Interrupt::new(),
        }
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
}

#[async_trait]
impl Endpoint for PipeEndpoint {
    fn pattern(&self) -> Pattern {
        Pattern::Pair
    }

    async fn send_frame(&self, frame: Frame, flags: SendFlags) -> Result<(), TransportError> {
        let part = Envelope::data(frame.into_bytes(), flags.contains(SendFlags::MORE));
        let properties = &self.properties;
        self.outbox
            .push(part, flags, &self.interrupt, |parts| Batch {
                routing_id: 0,
                properties: Arc::clone(properties),
                parts,
            })
            .await
    }

    async fn recv_frame(&self) -> Result<Option<Frame>, TransportError> {
        let mut inbox = self.inbox.lock().await;
        inbox.next(&self.interrupt).await
    }

    fn try_recv_frame(&self) -> Result<Option<Frame>, TransportError> {
        match self.inbox.try_lock() {
            Ok(mut inbox) => inbox.try_next(),
            // Another task is blocked in recv_frame and will take the next frame
            Err(_) => Ok(None),
        }
    }
}
