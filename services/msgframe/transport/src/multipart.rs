//! Whole-message helpers on top of single-frame send and receive.

use msgframe_wire::{Endpoint, Frame, SendError, SendFlags, TransportError};

/// Send `parts` as one message: every part but the last carries MORE.
///
/// Stops at the first failure; parts not yet sent are dropped.
pub async fn send_multipart(dest: &dyn Endpoint, parts: Vec<Frame>) -> Result<(), SendError> {
    let last = parts.len().saturating_sub(1);
    for (index, frame) in parts.into_iter().enumerate() {
        let flags = if index < last {
            SendFlags::MORE
        } else {
            SendFlags::empty()
        };
        frame.send(dest, flags).await?;
    }
    Ok(())
}

/// Receive every part of the next message.
///
/// `Ok(None)` if the wait was interrupted before the final part arrived.
pub async fn recv_multipart(source: &dyn Endpoint) -> Result<Option<Vec<Frame>>, TransportError> {
    let mut parts = Vec::new();
    loop {
        let Some(frame) = Frame::recv(source).await? else {
            return Ok(None);
        };
        let more = frame.more();
        parts.push(frame);
        if !more {
            return Ok(Some(parts));
        }
    }
}
