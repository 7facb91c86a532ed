//! Process-wide SDK events
//!
//! A small fan-out bus for the closed set of SDK lifecycle events. Emission
//! is fire-and-forget: listeners are plain closures and the emitter never
//! awaits them.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// SDK lifecycle events observable by the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SdkEvent {
    /// Block transfers are queued behind a rate-limit cooldown.
    TransfersPaused,
    /// Block transfers resumed after a cooldown.
    TransfersResumed,
    /// The 429 circuit breaker tripped; requests are refused.
    RequestsThrottled,
    /// The 429 circuit breaker reset.
    RequestsUnthrottled,
}

type Listener = Arc<dyn Fn(SdkEvent) + Send + Sync>;
type ListenerTable = Arc<RwLock<Vec<(u64, Listener)>>>;

/// Fan-out bus for [`SdkEvent`] values.
pub struct SdkEventBus {
    next_id: AtomicU64,
    listeners: ListenerTable,
}

impl SdkEventBus {
    /// Create an empty bus.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            listeners: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Install a listener. Dropping the returned subscription removes it.
    pub fn subscribe(
        &self,
        listener: impl Fn(SdkEvent) + Send + Sync + 'static,
    ) -> SdkEventSubscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().push((id, Arc::new(listener)));
        SdkEventSubscription {
            listeners: Arc::downgrade(&self.listeners),
            id,
        }
    }

    /// Deliver an event to every listener, without awaiting any of them.
    pub fn emit(&self, event: SdkEvent) {
        let listeners: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(event);
        }
    }
}

impl Default for SdkEventBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle keeping one listener installed on an [`SdkEventBus`].
pub struct SdkEventSubscription {
    listeners: Weak<RwLock<Vec<(u64, Listener)>>>,
    id: u64,
}

impl Drop for SdkEventSubscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners
                .write()
                .retain(|(listener_id, _)| *listener_id != self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[test]
    fn emit_reaches_all_listeners() {
        let bus = SdkEventBus::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let seen_a = Arc::clone(&seen);
        let _sub_a = bus.subscribe(move |event| seen_a.lock().push(("a", event)));
        let seen_b = Arc::clone(&seen);
        let _sub_b = bus.subscribe(move |event| seen_b.lock().push(("b", event)));

        bus.emit(SdkEvent::RequestsThrottled);
        let events = seen.lock();
        assert_eq!(events.len(), 2);
    }

    #[test]
    fn dropping_subscription_removes_listener() {
        let bus = SdkEventBus::new();
        let seen = Arc::new(Mutex::new(0u32));

        let seen_inner = Arc::clone(&seen);
        let sub = bus.subscribe(move |_| *seen_inner.lock() += 1);
        bus.emit(SdkEvent::TransfersPaused);
        drop(sub);
        bus.emit(SdkEvent::TransfersResumed);

        assert_eq!(*seen.lock(), 1);
    }
}
