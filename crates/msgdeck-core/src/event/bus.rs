//! Broadcast event bus for distributing `LifecycleEvent` to UI observers.
//!
//! Built on `tokio::sync::broadcast`. Publishing never blocks and never
//! awaits; with no subscribers it is a no-op. A subscriber that falls more
//! than `capacity` events behind loses the oldest ones and its next `recv`
//! reports how many were skipped (`RecvError::Lagged(n)`). There is no replay:
//! a new subscriber only sees events published after it subscribed.

use msgdeck_types::account::AccountKey;
use msgdeck_types::event::{LifecycleEvent, LifecycleEventKind};
use tokio::sync::broadcast;

/// Multi-consumer relay for lifecycle events.
///
/// Cloning the bus clones the sender, allowing multiple producers and
/// consumers over one channel.
pub struct EventBus {
    sender: broadcast::Sender<LifecycleEvent>,
}

impl EventBus {
    /// Create a new event bus with the given per-subscriber capacity.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Create a new subscriber that will receive all future events.
    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.sender.subscribe()
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: LifecycleEvent) {
        tracing::debug!(
            account = %event.account_key,
            kind = event.kind.name(),
            "lifecycle event"
        );
        let _ = self.sender.send(event);
    }

    /// Shorthand for `publish(LifecycleEvent::new(key, kind))`.
    pub fn emit(&self, account_key: &AccountKey, kind: LifecycleEventKind) {
        self.publish(LifecycleEvent::new(account_key.clone(), kind));
    }

    /// Number of live subscribers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
        }
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("receiver_count", &self.sender.receiver_count())
            .finish()
    }
}
