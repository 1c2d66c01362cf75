use tokio::sync::broadcast;

use crate::types::RoomEvent;

/// Default capacity for room event fan-out.
pub const DEFAULT_EVENT_BUFFER: usize = 256;

/// Receiving half of a room event subscription.
pub type EventStream = broadcast::Receiver<RoomEvent>;

/// Fan-out sender for one room's live events.
///
/// Emission is best-effort: a subscriber that falls behind observes a lag
/// error on its receiver and is expected to resynchronize, the same way a
/// gapped backend subscription is handled.
#[derive(Debug, Clone)]
pub struct RoomEvents {
    events_tx: broadcast::Sender<RoomEvent>,
}

impl RoomEvents {
    pub fn new(buffer: usize) -> Self {
        let (events_tx, _events_rx) = broadcast::channel(buffer.max(1));
        Self { events_tx }
    }

    /// Open a new subscription starting at the current stream position.
    pub fn subscribe(&self) -> EventStream {
        self.events_tx.subscribe()
    }

    /// Broadcast an event to every live subscriber.
    ///
    /// Dropped silently when nobody is subscribed; events are not queued
    /// for future subscribers.
    pub fn emit(&self, event: RoomEvent) {
        let _ = self.events_tx.send(event);
    }

    pub fn subscriber_count(&self) -> usize {
        self.events_tx.receiver_count()
    }
}

impl Default for RoomEvents {
    fn default() -> Self {
        Self::new(DEFAULT_EVENT_BUFFER)
    }
}
