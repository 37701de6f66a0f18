//! Cancellation of blocked endpoint waits.

use std::sync::Arc;
use tokio::sync::watch;

/// Cloneable interrupt flag shared by endpoints and their owners.
///
/// Once fired it stays fired: every blocked and future receive on an
/// endpoint holding this handle returns `Ok(None)`.
#[derive(Debug, Clone)]
pub struct Interrupt {
    tx: Arc<watch::Sender<bool>>,
}

impl Interrupt {
    /// Create an interrupt that has not fired
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    /// Fire the interrupt. Idempotent.
    pub fn interrupt(&self) {
        self.tx.send_replace(true);
    }

    /// Whether the interrupt has fired
    pub fn is_interrupted(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolve once the interrupt has fired
    pub async fn interrupted(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in self, so the channel cannot close under us
        let _ = rx.wait_for(|fired| *fired).await;
    }
}

impl Default for Interrupt {
    fn default() -> Self {
        Self::new()
    }
}
