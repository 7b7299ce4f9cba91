//! # Event bus.
//!
//! [`Bus`] is a thin wrapper around [`tokio::sync::broadcast`]. Every runtime,
//! informer and worker of a manager publishes into the same bus; the manager
//! forwards what it receives to its [`SubscriberSet`](crate::SubscriberSet).
//!
//! ```text
//! Publishers (many):                  Consumer (one):
//!   Manager    ──┐
//!   Runtime N  ──┼──────► Bus ───────► Manager listener ────► SubscriberSet
//!   Informer N ──┤  (broadcast chan)
//!   Worker N.M ──┘
//! ```
//!
//! ## Rules
//! - `publish()` never blocks.
//! - A single ring buffer of `capacity` events is shared by all receivers;
//!   laggards observe `RecvError::Lagged(n)` and skip `n` items.
//! - Events published while nobody listens are lost.

use tokio::sync::broadcast;

use super::event::Event;

/// Broadcast channel for runtime events. Cheap to clone.
#[derive(Clone, Debug)]
pub struct Bus {
    tx: broadcast::Sender<Event>,
}

impl Bus {
    /// Creates a bus; capacity is clamped to at least 1.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel::<Event>(capacity.max(1));
        Self { tx }
    }

    /// Publishes an event to all current receivers (fire-and-forget).
    pub fn publish(&self, ev: Event) {
        let _ = self.tx.send(ev);
    }

    /// Creates a receiver for events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.tx.subscribe()
    }
}
