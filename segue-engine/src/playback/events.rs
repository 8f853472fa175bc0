//! Transport event delivery
//!
//! Two paths carry every [`TransportEvent`]:
//! - synchronous listeners registered with [`EventBus::subscribe`], called on
//!   the thread raising the event (possibly with the transport lock held;
//!   they may re-enter the transport)
//! - a `tokio::sync::broadcast` channel for async or blocking consumers

use parking_lot::Mutex;
use segue_common::TransportEvent;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Events buffered per broadcast receiver before it lags
const BROADCAST_CAPACITY: usize = 100;

type Listener = Arc<dyn Fn(&TransportEvent) + Send + Sync>;

struct Registry {
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
}

impl Registry {
    fn remove(&self, id: u64) {
        self.listeners.lock().retain(|(existing, _)| *existing != id);
    }
}

/// Listener registry plus broadcast feed
pub struct EventBus {
    registry: Arc<Registry>,
    tx: broadcast::Sender<TransportEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            registry: Arc::new(Registry {
                listeners: Mutex::new(Vec::new()),
                next_id: AtomicU64::new(1),
            }),
            tx,
        }
    }

    /// Register a listener; it stays registered while the handle lives
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(&TransportEvent) + Send + Sync + 'static,
    {
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.listeners.lock().push((id, Arc::new(listener)));
        debug!("Event listener {} subscribed", id);
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
        }
    }

    pub fn receiver(&self) -> broadcast::Receiver<TransportEvent> {
        self.tx.subscribe()
    }

    pub fn listener_count(&self) -> usize {
        self.registry.listeners.lock().len()
    }

    /// Deliver to every listener, then to the broadcast feed
    pub fn emit(&self, event: TransportEvent) {
        trace!("Emitting {}", event.event_type());
        // Snapshot so listeners can subscribe or unsubscribe re-entrantly
        let listeners: Vec<Listener> = self
            .registry
            .listeners
            .lock()
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect();
        for listener in listeners {
            listener(&event);
        }
        // No receivers is fine
        let _ = self.tx.send(event);
    }
}

/// Unsubscribes its listener when dropped
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    registry: Weak<Registry>,
}

impl Subscription {
    /// Keep the listener registered for the lifetime of the bus
    pub fn detach(mut self) {
        self.registry = Weak::new();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
            debug!("Event listener {} unsubscribed", self.id);
        }
    }
}
