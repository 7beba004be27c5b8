//! Observer types for store change notifications.

use crate::types::TopicId;
use crossbeam_channel::{Receiver, RecvError, RecvTimeoutError, TryRecvError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, VecDeque};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Configuration for an observer.
#[derive(Clone, Debug)]
pub struct ObserverConfig {
    /// Max buffered events. Past this, further events coalesce into one
    /// [`ChangeEvent::TopicChanged`] per topic.
    /// Default: 1000
    pub buffer_size: usize,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self { buffer_size: 1000 }
    }
}

/// Which events an observer receives.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ObserverFilter {
    /// Events for a single subscription.
    Topic(TopicId),
    /// Every event, e.g. for a subscription list view.
    All,
}

impl ObserverFilter {
    pub(crate) fn matches(&self, event: &ChangeEvent) -> bool {
        match self {
            ObserverFilter::All => true,
            ObserverFilter::Topic(topic) => event.topic() == Some(*topic),
        }
    }
}

/// "Something changed for topic X". Observers re-read the store on receipt.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChangeEvent {
    SubscriptionCreated {
        topic: TopicId,
    },

    /// One append batch landed.
    NotificationsAppended {
        topic: TopicId,
        added: usize,
    },

    NotificationsDeleted {
        topic: TopicId,
        removed: usize,
    },

    /// The subscription and all its notifications are gone.
    SubscriptionDeleted {
        topic: TopicId,
    },

    /// Events for the topic overflowed the observer's buffer and were merged.
    TopicChanged {
        topic: TopicId,
    },

    /// The observer was removed from the registry.
    Dropped {
        reason: DropReason,
    },
}

impl ChangeEvent {
    /// Topic the event refers to, if any.
    pub fn topic(&self) -> Option<TopicId> {
        match self {
            ChangeEvent::SubscriptionCreated { topic }
            | ChangeEvent::NotificationsAppended { topic, .. }
            | ChangeEvent::NotificationsDeleted { topic, .. }
            | ChangeEvent::SubscriptionDeleted { topic }
            | ChangeEvent::TopicChanged { topic } => Some(*topic),
            ChangeEvent::Dropped { .. } => None,
        }
    }
}

/// Why an observer was dropped.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
    /// Explicitly unobserved.
    Unsubscribed,
}

/// Unique identifier for an observer.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ObserverId(pub u64);

/// Pending events of one observer.
///
/// Never refuses an event: once `capacity` events are queued, or the topic
/// already has merged events waiting, the event is folded into a per-topic
/// marker delivered after the queue. Per-topic order is preserved.
pub(crate) struct EventQueue {
    capacity: usize,
    state: Mutex<QueueState>,
}

#[derive(Default)]
struct QueueState {
    events: VecDeque<ChangeEvent>,
    merged: BTreeSet<TopicId>,
}

impl EventQueue {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Returns false if the event was merged.
    pub(crate) fn push(&self, event: ChangeEvent) -> bool {
        let mut state = self.state.lock();
        match event.topic() {
            Some(topic) if state.merged.contains(&topic) || state.events.len() >= self.capacity => {
                state.merged.insert(topic);
                false
            }
            _ => {
                state.events.push_back(event);
                true
            }
        }
    }

    fn pop(&self) -> Option<ChangeEvent> {
        let mut state = self.state.lock();
        state.events.pop_front().or_else(|| {
            state
                .merged
                .pop_first()
                .map(|topic| ChangeEvent::TopicChanged { topic })
        })
    }
}

/// Handle to a channel-backed observer.
///
/// Events sit in a shared queue; the channel only carries wake-ups and
/// disconnects once the observer is unsubscribed.
pub struct ObserverHandle {
    pub id: ObserverId,
    pub(crate) queue: Arc<EventQueue>,
    pub(crate) wakeups: Receiver<()>,
}

impl ObserverHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<ChangeEvent, RecvError> {
        loop {
            if let Some(event) = self.queue.pop() {
                return Ok(event);
            }
            if self.wakeups.recv().is_err() {
                return self.queue.pop().ok_or(RecvError);
            }
        }
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<ChangeEvent, TryRecvError> {
        if let Some(event) = self.queue.pop() {
            return Ok(event);
        }
        match self.wakeups.try_recv() {
            Ok(()) => self.queue.pop().ok_or(TryRecvError::Empty),
            Err(TryRecvError::Disconnected) => {
                self.queue.pop().ok_or(TryRecvError::Disconnected)
            }
            Err(TryRecvError::Empty) => Err(TryRecvError::Empty),
        }
    }

    /// Receive with timeout.
    pub fn recv_timeout(&self, timeout: Duration) -> Result<ChangeEvent, RecvTimeoutError> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(event) = self.queue.pop() {
                return Ok(event);
            }
            match self.wakeups.recv_deadline(deadline) {
                Ok(()) => continue,
                Err(RecvTimeoutError::Disconnected) => {
                    return self.queue.pop().ok_or(RecvTimeoutError::Disconnected)
                }
                Err(RecvTimeoutError::Timeout) => {
                    return self.queue.pop().ok_or(RecvTimeoutError::Timeout)
                }
            }
        }
    }

    /// Everything currently buffered.
    pub fn drain(&self) -> Vec<ChangeEvent> {
        std::iter::from_fn(|| self.queue.pop()).collect()
    }
}
