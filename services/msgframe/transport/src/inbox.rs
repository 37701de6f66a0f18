//! Receive side shared by all endpoints.
//!
//! Connections deliver whole messages as [`Batch`]es so that the parts of one
//! multi-part message are never interleaved with another peer's. The inbox
//! turns them back into frames, applying the endpoint pattern's metadata
//! rules on the way.

use crate::interrupt::Interrupt;
use dashmap::DashSet;
use msgframe_wire::{Envelope, Frame, Pattern, Properties, TransportError};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::trace;

/// All parts of one message from one peer
#[derive(Debug)]
pub(crate) struct Batch {
    /// Sending peer, 0 unless the receiving endpoint is a server
    pub routing_id: u32,
    /// Properties of the sending connection
    pub properties: Arc<Properties>,
    /// Message parts in order
    pub parts: Vec<Envelope>,
}

pub(crate) struct Inbox {
    rx: mpsc::Receiver<Batch>,
    pending: VecDeque<Frame>,
    pattern: Pattern,
    groups: Arc<DashSet<String>>,
}

impl Inbox {
    pub(crate) fn new(rx: mpsc::Receiver<Batch>, pattern: Pattern, groups: Arc<DashSet<String>>) -> Self {
        Self {
            rx,
            pending: VecDeque::new(),
            pattern,
            groups,
        }
    }

    /// Wait for the next frame; `Ok(None)` once `interrupt` fires
    pub(crate) async fn next(&mut self, interrupt: &Interrupt) -> Result<Option<Frame>, TransportError> {
        loop {
            if interrupt.is_interrupted() {
                return Ok(None);
            }
            if let Some(frame) = self.pending.pop_front() {
                return Ok(Some(frame));
            }
            tokio::select! {
                biased;
                _ = interrupt.interrupted() => return Ok(None),
                batch = self.rx.recv() => match batch {
                    Some(batch) => self.unpack(batch),
                    None => return Err(TransportError::Closed),
                },
            }
        }
    }

    /// Next frame if one is already waiting
    pub(crate) fn try_next(&mut self) -> Result<Option<Frame>, TransportError> {
        loop {
            if let Some(frame) = self.pending.pop_front() {
                return Ok(Some(frame));
            }
            match self.rx.try_recv() {
                Ok(batch) => self.unpack(batch),
                Err(mpsc::error::TryRecvError::Empty) => return Ok(None),
                Err(mpsc::error::TryRecvError::Disconnected) => return Err(TransportError::Closed),
            }
        }
    }

    fn unpack(&mut self, batch: Batch) {
        for envelope in batch.parts {
            let group = envelope.group.clone();
            if self.pattern == Pattern::Dish && !self.groups.contains(&group) {
                trace!(group = %group, "dropping frame for unjoined group");
                continue;
            }

            let mut frame = envelope.into_frame();
            if self.pattern == Pattern::Server {
                frame.set_routing_id(batch.routing_id);
            }
            if self.pattern == Pattern::Dish {
                // Length was checked by the envelope decoder
                let _ = frame.set_group(&group);
            }
            frame.set_properties(Arc::clone(&batch.properties));
            self.pending.push_back(frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn batch(routing_id: u32, parts: Vec<Envelope>) -> Batch {
        let mut props = Properties::new();
        props.insert("Socket-Type".to_string(), "CLIENT".to_string());
        Batch {
            routing_id,
            properties: Arc::new(props),
            parts,
        }
    }

    #[tokio::test]
    async fn test_server_stamps_routing_id() {
        let (tx, rx) = mpsc::channel(4);
        let mut inbox = Inbox::new(rx, Pattern::Server, Arc::new(DashSet::new()));
        tx.send(batch(42, vec![Envelope::data(Bytes::from_static(b"x"), false)]))
            .await
            .unwrap();

        let frame = inbox.next(&Interrupt::new()).await.unwrap().unwrap();
        assert_eq!(frame.routing_id(), 42);
        assert_eq!(frame.meta("Socket-Type"), Some("CLIENT"));
    }

    #[tokio::test]
    async fn test_pair_resets_metadata() {
        let (tx, rx) = mpsc::channel(4);
        let mut inbox = Inbox::new(rx, Pattern::Pair, Arc::new(DashSet::new()));
        let env = Envelope::data(Bytes::from_static(b"x"), true).with_group("g");
        tx.send(batch(7, vec![env])).await.unwrap();

        let frame = inbox.try_next().unwrap().unwrap();
        assert!(frame.more());
        assert_eq!(frame.routing_id(), 0);
        assert_eq!(frame.group(), "");
    }

    #[tokio::test]
    async fn test_dish_filters_groups() {
        let (tx, rx) = mpsc::channel(4);
        let groups = Arc::new(DashSet::new());
        groups.insert("news".to_string());
        let mut inbox = Inbox::new(rx, Pattern::Dish, groups);

        tx.send(batch(
            0,
            vec![
                Envelope::data(Bytes::from_static(b"skip"), false).with_group("sports"),
                Envelope::data(Bytes::from_static(b"keep"), false).with_group("news"),
            ],
        ))
        .await
        .unwrap();

        let frame = inbox.try_next().unwrap().unwrap();
        assert!(frame.matches_str("keep"));
        assert_eq!(frame.group(), "news");
        assert!(inbox.try_next().unwrap().is_none());
    }

    #[tokio::test]
    async fn test_interrupt_and_close() {
        let (tx, rx) = mpsc::channel(4);
        let mut inbox = Inbox::new(rx, Pattern::Pair, Arc::new(DashSet::new()));

        let interrupt = Interrupt::new();
        interrupt.interrupt();
        assert!(inbox.next(&interrupt).await.unwrap().is_none());

        drop(tx);
        assert!(matches!(
            inbox.next(&Interrupt::new()).await,
            Err(TransportError::Closed)
        ));
    }
}
