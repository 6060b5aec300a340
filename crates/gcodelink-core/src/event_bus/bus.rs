//! Event bus and the process-wide default instance.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use tokio::sync::broadcast;
use uuid::Uuid;

use super::events::{AppEvent, EventCategory};

/// Slots kept for lagging polling receivers
const BROADCAST_CAPACITY: usize = 1024;

/// Handle returned by [`EventBus::subscribe`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Sub({})", &self.0.simple().to_string()[..8])
    }
}

/// Which events a handler receives
#[derive(Debug, Clone, Default)]
pub enum EventFilter {
    /// Every event.
    #[default]
    All,
    /// Events in any of these categories.
    Categories(Vec<EventCategory>),
}

impl EventFilter {
    pub fn matches(&self, event: &AppEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Categories(categories) => categories.contains(&event.category()),
        }
    }
}

type EventHandler = Box<dyn Fn(AppEvent) + Send + Sync>;

/// Fan-out point between the engine threads and their consumers
///
/// Handlers registered with [`subscribe`](Self::subscribe) run on the
/// publishing thread in no particular order. Polling consumers take a
/// [`receiver`](Self::receiver) instead; a receiver that falls more than
/// 1024 events behind loses the oldest ones.
pub struct EventBus {
    sender: broadcast::Sender<AppEvent>,
    handlers: RwLock<HashMap<SubscriptionId, (EventFilter, EventHandler)>>,
}

impl EventBus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            sender,
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Deliver `event` to every matching handler and every receiver
    ///
    /// Returns how many consumers saw the event.
    pub fn emit(&self, event: impl Into<AppEvent>) -> usize {
        let event = event.into();
        tracing::trace!("event: {}", event.description());

        let handlers = self.handlers.read();
        let mut delivered = 0;
        for (filter, handler) in handlers.values() {
            if filter.matches(&event) {
                handler(event.clone());
                delivered += 1;
            }
        }
        drop(handlers);

        // No receivers is not an error; the event is simply dropped.
        delivered + self.sender.send(event).unwrap_or(0)
    }

    /// Register a handler
    ///
    /// The handler runs on the reader or uploader thread. It must return
    /// quickly and must not subscribe or unsubscribe from inside the call.
    pub fn subscribe<F>(&self, filter: EventFilter, handler: F) -> SubscriptionId
    where
        F: Fn(AppEvent) + Send + Sync + 'static,
    {
        let id = SubscriptionId(Uuid::new_v4());
        self.handlers.write().insert(id, (filter, Box::new(handler)));
        tracing::debug!("Subscription {} added", id);
        id
    }

    /// Remove a handler; false if `id` was unknown
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = self.handlers.write().remove(&id).is_some();
        if removed {
            tracing::debug!("Subscription {} removed", id);
        }
        removed
    }

    /// Receiver for polling consumers; sees events emitted after this call
    pub fn receiver(&self) -> broadcast::Receiver<AppEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.handlers.read().len()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscribers", &self.subscriber_count())
            .field("receivers", &self.sender.receiver_count())
            .finish()
    }
}

static EVENT_BUS: OnceLock<Arc<EventBus>> = OnceLock::new();

/// Process-wide bus used by sessions built without an explicit one
pub fn event_bus() -> Arc<EventBus> {
    EVENT_BUS.get_or_init(|| Arc::new(EventBus::new())).clone()
}
