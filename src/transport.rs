//! Change transport
//!
//! Itinerary logs hand every accepted or resent change to a
//! `ChangeTransport`. Delivery is at-least-once at best: changes may be lost,
//! duplicated or reordered, and consumers repair that through rectification.

use tokio::sync::broadcast;

use crate::itinerary::Change;
use crate::version::ParticipantId;

/// Outbound path for itinerary changes
pub trait ChangeTransport: Send + Sync {
    /// Deliver one change. Must not block on the consumer.
    fn send(&self, participant: ParticipantId, change: &Change);
}

/// Discards every change
#[derive(Clone, Copy, Debug, Default)]
pub struct NullTransport;

impl ChangeTransport for NullTransport {
    fn send(&self, _participant: ParticipantId, _change: &Change) {}
}

/// In-process fan-out of changes over a tokio broadcast channel.
///
/// Slow subscribers that fall more than the channel capacity behind see
/// `RecvError::Lagged`, which a mirror treats like any other loss.
pub struct BroadcastTransport {
    update_tx: broadcast::Sender<(ParticipantId, Change)>,
}

impl BroadcastTransport {
    pub fn new(capacity: usize) -> Self {
        let (update_tx, _) = broadcast::channel(capacity.max(1));
        Self { update_tx }
    }

    /// Receive every change sent after this call
    pub fn subscribe(&self) -> broadcast::Receiver<(ParticipantId, Change)> {
        self.update_tx.subscribe()
    }

    pub fn receiver_count(&self) -> usize {
        self.update_tx.receiver_count()
    }
}

impl ChangeTransport for BroadcastTransport {
    fn send(&self, participant: ParticipantId, change: &Change) {
        // No subscribers is not an error; the change is simply dropped.
        if self.update_tx.send((participant, change.clone())).is_err() {
            log::trace!(
                "No subscribers for change {} of participant {}",
                change.version,
                participant
            );
        }
    }
}
