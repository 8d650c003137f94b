//! Event emitter - hand-off seam between the detector and the event sink
//!
//! Emission is fire-and-forget from the detector's side: `emit` never blocks
//! and never waits on persistence. Uses a bounded mpsc channel so a slow sink
//! cannot grow memory without bound; when the channel is full the event is
//! dropped and the caller is told.

use crate::domain::types::TransitionEvent;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Why an event could not be handed off
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitError {
    /// Sink is backlogged
    ChannelFull,
    /// Sink has shut down
    ChannelClosed,
}

impl std::fmt::Display for EmitError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EmitError::ChannelFull => f.write_str("event channel full"),
            EmitError::ChannelClosed => f.write_str("event channel closed"),
        }
    }
}

impl std::error::Error for EmitError {}

/// Receives finished transition events from the detector
pub trait EventEmitter: Send + Sync {
    fn emit(&self, event: TransitionEvent) -> Result<(), EmitError>;
}

/// Emitter backed by a bounded tokio channel
///
/// Clone this to share across producers.
#[derive(Clone)]
pub struct ChannelEmitter {
    tx: mpsc::Sender<TransitionEvent>,
}

impl ChannelEmitter {
    pub fn new(tx: mpsc::Sender<TransitionEvent>) -> Self {
        Self { tx }
    }
}

impl EventEmitter for ChannelEmitter {
    fn emit(&self, event: TransitionEvent) -> Result<(), EmitError> {
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => EmitError::ChannelFull,
            TrySendError::Closed(_) => EmitError::ChannelClosed,
        })
    }
}

/// Create an event channel
///
/// Returns the emitter (for the detector) and the receiver (for the sink worker)
pub fn create_event_channel(
    capacity: usize,
) -> (ChannelEmitter, mpsc::Receiver<TransitionEvent>) {
    let (tx, rx) = mpsc::channel(capacity);
    (ChannelEmitter::new(tx), rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Coordinate, RegionId, SubjectId};
    use chrono::Utc;

    fn event() -> TransitionEvent {
        TransitionEvent::entry(
            SubjectId::new("s1"),
            RegionId::new("home"),
            Utc::now(),
            &Coordinate::new(40.0, -74.0),
        )
    }

    #[test]
    fn test_emit_delivers_to_receiver() {
        let (emitter, mut rx) = create_event_channel(4);
        let sent = event();
        emitter.emit(sent.clone()).unwrap();

        let received = rx.try_recv().unwrap();
        assert_eq!(received, sent);
    }

    #[test]
    fn test_emit_full_channel() {
        let (emitter, _rx) = create_event_channel(1);
        emitter.emit(event()).unwrap();
        assert_eq!(emitter.emit(event()), Err(EmitError::ChannelFull));
    }

    #[test]
    fn test_emit_closed_channel() {
        let (emitter, rx) = create_event_channel(1);
        drop(rx);
        assert_eq!(emitter.emit(event()), Err(EmitError::ChannelClosed));
    }
}
