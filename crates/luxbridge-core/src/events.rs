//! In-process event bus for configuration change notifications
//!
//! Subscribers get a handle whose drop (or explicit `unsubscribe`)
//! removes the handler. Publishing clones the subscriber list under a
//! short lock and invokes handlers outside it, so a handler may
//! subscribe or unsubscribe without deadlocking.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::RwLock;

/// Mapping table changed: a record was created
pub const EVENT_MAPPING_CREATED: &str = "mapping.created";
/// Mapping table changed: a record was updated
pub const EVENT_MAPPING_UPDATED: &str = "mapping.updated";
/// Mapping table changed: a record was deleted
pub const EVENT_MAPPING_DELETED: &str = "mapping.deleted";

/// A published event
#[derive(Debug, Clone)]
pub struct SystemEvent {
    pub event_type: String,
    pub data: serde_json::Value,
}

impl SystemEvent {
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }
}

type Handler = Arc<dyn Fn(&SystemEvent) + Send + Sync>;

#[derive(Default)]
struct Registry {
    handlers: HashMap<String, Vec<(u64, Handler)>>,
}

struct RegistryInner {
    registry: RwLock<Registry>,
    next_id: AtomicU64,
}

impl RegistryInner {
    fn remove(&self, event_type: &str, id: u64) {
        let mut registry = self.registry.write();
        if let Some(entries) = registry.handlers.get_mut(event_type) {
            entries.retain(|(entry_id, _)| *entry_id != id);
            if entries.is_empty() {
                registry.handlers.remove(event_type);
            }
        }
    }
}

/// Event bus instance. Not a process-wide singleton: each service graph
/// owns its own. Cloning shares the underlying registry.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<RegistryInner>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RegistryInner {
                registry: RwLock::new(Registry::default()),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Register a handler for one event type. The returned subscription
    /// removes the handler when dropped.
    pub fn subscribe(
        &self,
        event_type: &str,
        handler: impl Fn(&SystemEvent) + Send + Sync + 'static,
    ) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .registry
            .write()
            .handlers
            .entry(event_type.to_string())
            .or_default()
            .push((id, Arc::new(handler)));

        Subscription {
            inner: Arc::downgrade(&self.inner),
            event_type: event_type.to_string(),
            id,
        }
    }

    /// Deliver an event to every handler registered for its type
    pub fn publish(&self, event: SystemEvent) {
        let handlers: Vec<Handler> = {
            let registry = self.inner.registry.read();
            registry
                .handlers
                .get(&event.event_type)
                .map(|entries| entries.iter().map(|(_, h)| h.clone()).collect())
                .unwrap_or_default()
        };
        for handler in handlers {
            handler(&event);
        }
    }

    /// Number of live handlers for an event type
    pub fn subscriber_count(&self, event_type: &str) -> usize {
        self.inner
            .registry
            .read()
            .handlers
            .get(event_type)
            .map_or(0, Vec::len)
    }
}

/// Handle returned by [`EventBus::subscribe`]
pub struct Subscription {
    inner: Weak<RegistryInner>,
    event_type: String,
    id: u64,
}

impl Subscription {
    /// Remove the handler now instead of at drop
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            inner.remove(&self.event_type, self.id);
        }
    }
}
