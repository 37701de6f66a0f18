//! Send side shared by all endpoints.
//!
//! Parts of a multi-part message are held back until the final part arrives
//! and then queued as one item. Queue capacity is reserved when the first
//! part arrives: that is the only point where a send can block, fail with
//! `WouldBlock` or be interrupted. Once a message has started, its remaining
//! parts are always accepted.

use crate::interrupt::Interrupt;
use msgframe_wire::{SendFlags, TransportError};
use tokio::sync::mpsc::{self, OwnedPermit};
use tokio::sync::Mutex;
use tracing::trace;

/// A message whose final part has not been sent yet
struct OpenMessage<P, T> {
    permit: OwnedPermit<T>,
    parts: Vec<P>,
}

/// Queue of whole messages of type `T`, assembled from parts of type `P`
pub(crate) struct Outbox<P, T> {
    queue: mpsc::Sender<T>,
    open: Mutex<Option<OpenMessage<P, T>>>,
}

impl<P, T> Outbox<P, T> {
    pub(crate) fn new(queue: mpsc::Sender<T>) -> Self {
        Self {
            queue,
            open: Mutex::new(None),
        }
    }

    /// Add one part. `seal` turns the parts into the queued item once a part
    /// without MORE completes the message.
    pub(crate) async fn push<F>(
        &self,
        part: P,
        flags: SendFlags,
        interrupt: &Interrupt,
        seal: F,
    ) -> Result<(), TransportError>
    where
        F: FnOnce(Vec<P>) -> T,
    {
        let mut open = self.open.lock().await;
        let mut message = match open.take() {
            Some(message) => message,
            None => OpenMessage {
                permit: self.reserve(flags, interrupt).await?,
                parts: Vec::new(),
            },
        };

        message.parts.push(part);
        if flags.contains(SendFlags::MORE) {
            *open = Some(message);
        } else {
            trace!(parts = message.parts.len(), "message committed");
            message.permit.send(seal(message.parts));
        }
        Ok(())
    }

    /// Queue a complete item if there is room right now
    pub(crate) fn offer(&self, item: T) -> bool {
        self.queue.try_send(item).is_ok()
    }

    async fn reserve(
        &self,
        flags: SendFlags,
        interrupt: &Interrupt,
    ) -> Result<OwnedPermit<T>, TransportError> {
        if flags.contains(SendFlags::DONTWAIT) {
            return self.queue.clone().try_reserve_owned().map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => TransportError::WouldBlock,
                mpsc::error::TrySendError::Closed(_) => TransportError::Closed,
            });
        }

        tokio::select! {
            biased;
            _ = interrupt.interrupted() => Err(TransportError::Interrupted),
            permit = self.queue.clone().reserve_owned() => permit.map_err(|_| TransportError::Closed),
        }
    }
}
