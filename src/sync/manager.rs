//! Moves notifications between the Store and a remote topic server.
//!
//! Every operation runs on the worker pool and returns a [`JobHandle`].
//! Transport calls never run under a Store lock; the Store serializes the
//! resulting mutations per topic.

use super::worker::{JobHandle, WorkerPool};
use crate::error::{Result, StoreError};
use crate::store::Store;
use crate::transport::{MessageTransport, OutgoingMessage};
use crate::types::{DisplayMetadata, Subscription, Timestamp, TopicId, TopicRoute};
use crossbeam_channel::{bounded, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, instrument, warn, Span};

/// Sync manager configuration.
#[derive(Clone, Debug)]
pub struct SyncConfig {
    /// Worker threads for transport calls.
    pub workers: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self { workers: 4 }
    }
}

/// Who asked for a poll.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollMode {
    /// Periodic or implicit refresh. Transport failures are logged and
    /// reported as [`PollOutcome::NoNewData`].
    Background,
    /// User-initiated refresh. Transport failures are returned.
    Manual,
}

/// What a poll did.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PollOutcome {
    /// The server returned `received` messages, `added` of them new.
    Updated { received: usize, added: usize },
    NoNewData,
    /// Another poll for the topic was already in flight.
    Coalesced,
    /// The subscription was deleted while the fetch was in flight.
    Discarded,
}

struct Shared {
    store: Arc<Store>,
    transport: Arc<dyn MessageTransport>,
    in_flight: Mutex<HashSet<TopicId>>,
}

/// Releases a topic's in-flight slot when the poll ends, however it ends.
struct InFlightGuard {
    shared: Arc<Shared>,
    topic: TopicId,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.shared.in_flight.lock().remove(&self.topic);
    }
}

/// Coordinates polling, publishing and unsubscribing.
pub struct SubscriptionSyncManager {
    shared: Arc<Shared>,
    pool: WorkerPool,
}

impl SubscriptionSyncManager {
    pub fn new(
        store: Arc<Store>,
        transport: Arc<dyn MessageTransport>,
        config: SyncConfig,
    ) -> Result<Self> {
        let pool = WorkerPool::new(config.workers)?;
        Ok(Self {
            shared: Arc::new(Shared {
                store,
                transport,
                in_flight: Mutex::new(HashSet::new()),
            }),
            pool,
        })
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.shared.store
    }

    /// True while a poll for `topic` is queued or running.
    pub fn is_polling(&self, topic: TopicId) -> bool {
        self.shared.in_flight.lock().contains(&topic)
    }

    /// Create a subscription and kick off its first background poll.
    #[instrument(skip_all, fields(route = %route))]
    pub fn subscribe(&self, route: TopicRoute, metadata: DisplayMetadata) -> Result<Subscription> {
        let subscription = self.shared.store.create_subscription(route, metadata)?;
        // Outcome arrives through change events
        drop(self.poll(subscription.id, PollMode::Background));
        Ok(subscription)
    }

    /// Fetch messages newer than the topic's high-water mark and append them.
    ///
    /// At most one poll per topic is in flight; a request made while one is
    /// running resolves to [`PollOutcome::Coalesced`] without touching the
    /// transport.
    #[instrument(skip(self))]
    pub fn poll(&self, topic: TopicId, mode: PollMode) -> JobHandle<PollOutcome> {
        if !self.shared.in_flight.lock().insert(topic) {
            debug!("poll already in flight");
            return JobHandle::ready(Ok(PollOutcome::Coalesced));
        }

        let guard = InFlightGuard {
            shared: Arc::clone(&self.shared),
            topic,
        };
        let span = Span::current();

        self.pool.submit(move || {
            let _enter = span.enter();
            let outcome = run_poll(&guard.shared, topic, mode);
            drop(guard);
            outcome
        })
    }

    /// Poll every subscription.
    pub fn poll_all(&self, mode: PollMode) -> Vec<(TopicId, JobHandle<PollOutcome>)> {
        self.shared
            .store
            .subscriptions()
            .into_iter()
            .map(|subscription| (subscription.id, self.poll(subscription.id, mode)))
            .collect()
    }

    /// Send a message to the topic's server. The Store is not touched; the
    /// message shows up locally once a poll fetches it.
    #[instrument(skip(self, message))]
    pub fn publish(&self, topic: TopicId, message: OutgoingMessage) -> JobHandle<()> {
        let shared = Arc::clone(&self.shared);
        let span = Span::current();

        self.pool.submit(move || {
            let _enter = span.enter();
            let subscription = shared
                .store
                .subscription(topic)
                .ok_or(StoreError::SubscriptionNotFound(topic))?;

            shared
                .transport
                .publish(&subscription.route, &message)
                .map_err(|e| {
                    warn!(route = %subscription.route, error = %e, "publish failed");
                    e
                })?;

            debug!(route = %subscription.route, "message published");
            Ok(())
        })
    }

    /// Publish a synthetic message with random priority and tags.
    pub fn publish_test(
        &self,
        topic: TopicId,
        body: impl Into<String>,
        title: Option<String>,
    ) -> JobHandle<()> {
        let message = OutgoingMessage::test_message(&mut rand::rng(), body, title);
        self.publish(topic, message)
    }

    /// Deregister from the server, then delete the subscription locally.
    ///
    /// Always succeeds: deregistration failures are logged and the local
    /// deletion happens regardless.
    #[instrument(skip(self))]
    pub fn unsubscribe(&self, topic: TopicId) -> JobHandle<()> {
        let shared = Arc::clone(&self.shared);
        let span = Span::current();

        self.pool.submit(move || {
            let _enter = span.enter();
            let Some(subscription) = shared.store.subscription(topic) else {
                debug!("subscription already gone");
                return Ok(());
            };

            if let Err(e) = shared.transport.deregister(&subscription.route) {
                warn!(route = %subscription.route, error = %e, "deregister failed");
            }

            shared.store.delete_subscription(topic);
            info!(route = %subscription.route, "unsubscribed");
            Ok(())
        })
    }

    /// Poll every subscription in the background every `interval`.
    ///
    /// The poller holds a weak reference and exits once the manager is gone.
    pub fn start_background_polling(self: &Arc<Self>, interval: Duration) -> Result<BackgroundPoller> {
        let (stop_tx, stop_rx) = bounded::<()>(0);
        let manager = Arc::downgrade(self);

        let thread = std::thread::Builder::new()
            .name("topic-sync-poller".into())
            .spawn(move || loop {
                match stop_rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => {
                        if !tick(&manager) {
                            break;
                        }
                    }
                    _ => break,
                }
            })?;

        debug!(?interval, "background polling started");
        Ok(BackgroundPoller {
            stop: Some(stop_tx),
            thread: Some(thread),
        })
    }
}

fn tick(manager: &Weak<SubscriptionSyncManager>) -> bool {
    let Some(manager) = manager.upgrade() else {
        return false;
    };
    let dispatched = manager.poll_all(PollMode::Background).len();
    debug!(dispatched, "background tick");
    true
}

fn run_poll(shared: &Shared, topic: TopicId, mode: PollMode) -> Result<PollOutcome> {
    let subscription = shared
        .store
        .subscription(topic)
        .ok_or(StoreError::SubscriptionNotFound(topic))?;

    let fetched = match shared
        .transport
        .fetch(&subscription.route, subscription.last_received)
    {
        Ok(fetched) => fetched,
        Err(e) => {
            warn!(route = %subscription.route, error = %e, ?mode, "poll failed");
            return match mode {
                PollMode::Background => Ok(PollOutcome::NoNewData),
                PollMode::Manual => Err(e.into()),
            };
        }
    };

    let received = fetched.len();
    if received == 0 {
        return Ok(PollOutcome::NoNewData);
    }

    let now = Timestamp::now();
    let notifications = fetched
        .into_iter()
        .map(|raw| raw.into_notification(topic, now))
        .collect();

    match shared.store.append_notifications(topic, notifications) {
        Ok(0) => Ok(PollOutcome::NoNewData),
        Ok(added) => {
            debug!(received, added, "poll applied");
            Ok(PollOutcome::Updated { received, added })
        }
        Err(StoreError::SubscriptionNotFound(_)) => {
            debug!("subscription deleted during poll, discarding result");
            Ok(PollOutcome::Discarded)
        }
        Err(e) => {
            error!(error = %e, "poll result rejected");
            Err(e)
        }
    }
}

/// Handle to the periodic poller. Stops the thread when dropped.
pub struct BackgroundPoller {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl BackgroundPoller {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        // Dropping the sender wakes the ticker
        self.stop.take();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                error!("background poller panicked");
            }
        }
    }
}

impl Drop for BackgroundPoller {
    fn drop(&mut self) {
        self.shutdown();
    }
}
