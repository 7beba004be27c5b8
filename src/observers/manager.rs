//! Observer registry for broadcasting store change events.

use crate::error::Result;
use crossbeam_channel::{bounded, Sender, TrySendError};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

use super::types::{
    ChangeEvent, DropReason, EventQueue, ObserverConfig, ObserverFilter, ObserverHandle, ObserverId,
};

/// Internal observer state.
struct Observer {
    filter: ObserverFilter,
    queue: Arc<EventQueue>,
    wakeups: Sender<()>,
}

impl Observer {
    /// Queue an event and wake the receiver. Returns false once the
    /// receiving side is gone.
    fn deliver(&self, event: ChangeEvent) -> bool {
        if !self.queue.push(event) {
            debug!("observer behind, event merged");
        }
        match self.wakeups.try_send(()) {
            // Full means a wake-up is already pending
            Ok(()) | Err(TrySendError::Full(())) => true,
            Err(TrySendError::Disconnected(())) => false,
        }
    }
}

/// Manages observers and broadcasts change events.
///
/// Slow observers are never cut off: their backlog is merged per topic.
/// Only observers whose handle was dropped are removed.
pub struct ObserverRegistry {
    /// Active observers by ID.
    observers: RwLock<HashMap<ObserverId, Observer>>,
    /// Counter for generating observer IDs.
    next_id: AtomicU64,
    /// Buffer size used when callers don't pass their own config.
    default_config: ObserverConfig,
}

impl ObserverRegistry {
    /// Create a new registry.
    pub fn new() -> Self {
        Self::with_config(ObserverConfig::default())
    }

    /// Create a new registry with a custom default observer config.
    pub fn with_config(default_config: ObserverConfig) -> Self {
        Self {
            observers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            default_config,
        }
    }

    /// Register a channel-backed observer using the default config.
    pub fn subscribe(&self, filter: ObserverFilter) -> ObserverHandle {
        self.subscribe_with(filter, self.default_config.clone())
    }

    /// Register a channel-backed observer.
    pub fn subscribe_with(&self, filter: ObserverFilter, config: ObserverConfig) -> ObserverHandle {
        self.register(filter, &config)
    }

    /// Register a callback observer.
    ///
    /// The callback runs on a dedicated dispatcher thread, never on the
    /// thread that performed the mutation. The thread exits once the observer
    /// is unsubscribed.
    pub fn subscribe_callback<F>(&self, filter: ObserverFilter, mut callback: F) -> Result<ObserverId>
    where
        F: FnMut(&ChangeEvent) + Send + 'static,
    {
        let handle = self.register(filter, &self.default_config);
        let id = handle.id;

        let spawned = std::thread::Builder::new()
            .name(format!("topic-sync-observer-{}", id.0))
            .spawn(move || {
                while let Ok(event) = handle.recv() {
                    callback(&event);
                }
            });

        if let Err(e) = spawned {
            self.observers.write().remove(&id);
            return Err(e.into());
        }

        Ok(id)
    }

    fn register(&self, filter: ObserverFilter, config: &ObserverConfig) -> ObserverHandle {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::SeqCst));
        let queue = Arc::new(EventQueue::new(config.buffer_size));
        let (wakeups_tx, wakeups_rx) = bounded(1);

        self.observers.write().insert(
            id,
            Observer {
                filter,
                queue: Arc::clone(&queue),
                wakeups: wakeups_tx,
            },
        );
        debug!(observer = id.0, ?filter, "observer registered");

        ObserverHandle {
            id,
            queue,
            wakeups: wakeups_rx,
        }
    }

    /// Unsubscribe and clean up. The observer receives a final
    /// `Dropped { Unsubscribed }` before its handle disconnects.
    pub fn unsubscribe(&self, id: ObserverId) {
        let removed = self.observers.write().remove(&id);
        if let Some(observer) = removed {
            observer.deliver(ChangeEvent::Dropped {
                reason: DropReason::Unsubscribed,
            });
        }
    }

    /// Get observer count.
    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    /// Broadcast an event to matching observers. Observers whose handle was
    /// dropped are removed.
    pub fn publish(&self, event: ChangeEvent) {
        let mut gone = Vec::new();

        {
            let observers = self.observers.read();
            for (id, observer) in observers.iter() {
                if observer.filter.matches(&event) && !observer.deliver(event.clone()) {
                    gone.push(*id);
                }
            }
        }

        if !gone.is_empty() {
            let mut observers = self.observers.write();
            for id in gone {
                observers.remove(&id);
                debug!(observer = id.0, "observer handle dropped, removing");
            }
        }
    }
}

impl Default for ObserverRegistry {
    fn default() -> Self {
        Self::new()
    }
}
