//! In-process message source.

use super::{MessageTransport, OutgoingMessage, RawMessage};
use crate::error::TransportError;
use crate::types::{NotificationId, Timestamp, TopicRoute};
use crossbeam_channel::{bounded, Receiver, Sender};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

/// Holds every fetch until released or dropped.
pub struct FetchGate {
    _sender: Sender<()>,
}

impl FetchGate {
    /// Let held and future fetches proceed.
    pub fn release(self) {}
}

/// Per-route fetch concurrency.
#[derive(Default)]
struct FetchTracker {
    current: usize,
    max: usize,
}

/// A topic server living in memory.
///
/// Published messages are stored and returned by later fetches, so publish
/// followed by poll behaves like a real round trip.
#[derive(Default)]
pub struct MemoryTransport {
    topics: Mutex<HashMap<TopicRoute, Vec<RawMessage>>>,
    published: Mutex<Vec<(TopicRoute, OutgoingMessage)>>,
    deregistered: Mutex<Vec<TopicRoute>>,
    trackers: Mutex<HashMap<TopicRoute, FetchTracker>>,
    gate: Mutex<Option<Receiver<()>>>,
    fetch_delay: Mutex<Duration>,
    fetches_started: AtomicUsize,
    fetches_completed: AtomicUsize,
    fail_publish: AtomicBool,
    fail_fetch: AtomicBool,
    fail_deregister: AtomicBool,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a message on the server side, as if another client published it.
    pub fn inject(&self, route: &TopicRoute, mut message: RawMessage) {
        if message.id.is_none() {
            message.id = Some(NotificationId::generate().0);
        }
        if message.time.is_none() {
            message.time = Some(Timestamp::now());
        }
        self.topics.lock().entry(route.clone()).or_default().push(message);
    }

    /// Block fetches until the returned gate is released.
    pub fn hold_fetches(&self) -> FetchGate {
        let (sender, receiver) = bounded(0);
        *self.gate.lock() = Some(receiver);
        FetchGate { _sender: sender }
    }

    pub fn set_fetch_delay(&self, delay: Duration) {
        *self.fetch_delay.lock() = delay;
    }

    pub fn set_fail_publish(&self, fail: bool) {
        self.fail_publish.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_fetch(&self, fail: bool) {
        self.fail_fetch.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_deregister(&self, fail: bool) {
        self.fail_deregister.store(fail, Ordering::SeqCst);
    }

    /// Fetches that have entered the transport, including held ones.
    pub fn fetches_started(&self) -> usize {
        self.fetches_started.load(Ordering::SeqCst)
    }

    /// Fetches that returned, successfully or not.
    pub fn fetch_count(&self) -> usize {
        self.fetches_completed.load(Ordering::SeqCst)
    }

    /// Highest number of simultaneous fetches seen for a route.
    pub fn max_concurrent_fetches(&self, route: &TopicRoute) -> usize {
        self.trackers.lock().get(route).map_or(0, |t| t.max)
    }

    /// Messages accepted by `publish`, in order.
    pub fn published(&self) -> Vec<(TopicRoute, OutgoingMessage)> {
        self.published.lock().clone()
    }

    pub fn deregistered(&self) -> Vec<TopicRoute> {
        self.deregistered.lock().clone()
    }

    fn enter_fetch(&self, route: &TopicRoute) {
        self.fetches_started.fetch_add(1, Ordering::SeqCst);
        let mut trackers = self.trackers.lock();
        let tracker = trackers.entry(route.clone()).or_default();
        tracker.current += 1;
        tracker.max = tracker.max.max(tracker.current);
    }

    fn exit_fetch(&self, route: &TopicRoute) {
        if let Some(tracker) = self.trackers.lock().get_mut(route) {
            tracker.current = tracker.current.saturating_sub(1);
        }
        self.fetches_completed.fetch_add(1, Ordering::SeqCst);
    }

    fn injected_failure(flag: &AtomicBool) -> Result<(), TransportError> {
        if flag.load(Ordering::SeqCst) {
            return Err(TransportError::Network("injected failure".into()));
        }
        Ok(())
    }
}

impl MessageTransport for MemoryTransport {
    fn publish(&self, route: &TopicRoute, message: &OutgoingMessage) -> Result<(), TransportError> {
        Self::injected_failure(&self.fail_publish)?;

        self.published.lock().push((route.clone(), message.clone()));
        self.inject(
            route,
            RawMessage {
                id: None,
                time: None,
                title: message.title.clone(),
                message: message.body.clone(),
                priority: message.priority,
                tags: message.tags.clone(),
                click: message.click.clone(),
            },
        );
        Ok(())
    }

    fn fetch(
        &self,
        route: &TopicRoute,
        since: Option<Timestamp>,
    ) -> Result<Vec<RawMessage>, TransportError> {
        self.enter_fetch(route);

        // Wait on the gate outside its lock; a dropped sender releases it
        let gate = self.gate.lock().clone();
        if let Some(gate) = gate {
            let _ = gate.recv();
        }

        let delay = *self.fetch_delay.lock();
        if !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let result = Self::injected_failure(&self.fail_fetch).map(|()| {
            self.topics
                .lock()
                .get(route)
                .map(|messages| {
                    messages
                        .iter()
                        .filter(|m| match (since, m.time) {
                            (Some(since), Some(time)) => time >= since,
                            _ => true,
                        })
                        .cloned()
                        .collect()
                })
                .unwrap_or_default()
        });

        self.exit_fetch(route);
        result
    }

    fn deregister(&self, route: &TopicRoute) -> Result<(), TransportError> {
        Self::injected_failure(&self.fail_deregister)?;
        self.deregistered.lock().push(route.clone());
        Ok(())
    }
}
