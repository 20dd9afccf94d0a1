use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for LISTEN/NOTIFY. Channels are keyed by Ulid and serve
/// both coach channels (slot and booking changes) and user channels
/// (booking lifecycle updates).
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to notifications for a channel. Creates the channel if needed.
    pub fn subscribe(&self, channel_id: Ulid) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(channel_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, channel_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&channel_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Remove a channel (e.g. when a coach is deleted).
    pub fn remove(&self, channel_id: &Ulid) {
        self.channels.remove(channel_id);
    }
}
