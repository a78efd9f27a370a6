use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Per-resource broadcast of committed lifecycle events. Lets a
/// caller watch a cubicle for the cancellation that frees a slot, or
/// an invitee surface group-reservation progress, without polling.
///
/// Only events that were persisted and applied are sent; a subscriber
/// never sees a mutation that later failed.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to one resource's events. Creates the channel if
    /// needed. Slow receivers miss events (broadcast semantics), they
    /// are never blocked on.
    pub fn subscribe(&self, resource_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(resource_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, resource_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&resource_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop the channel when its resource is removed.
    pub fn remove(&self, resource_id: &Ulid) {
        self.channels.remove(resource_id);
    }
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}
