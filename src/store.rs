//! Main Store struct: the single owner of subscriptions and notifications.

use crate::error::{Result, StoreError};
use crate::observers::{ChangeEvent, ObserverConfig, ObserverFilter, ObserverHandle, ObserverId, ObserverRegistry};
use crate::snapshot::{self, StoreImage, SubscriptionImage, SubscriptionMeta};
use crate::types::{
    DisplayMetadata, Notification, NotificationId, StoreStats, Subscription, Timestamp, TopicId,
    TopicRoute,
};
use indexmap::IndexMap;
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Store configuration.
#[derive(Clone, Debug)]
pub struct StoreConfig {
    /// Directory for the on-disk image. `None` keeps everything in memory.
    pub path: Option<PathBuf>,

    /// Whether to create the store directory if it doesn't exist.
    pub create_if_missing: bool,

    /// Defaults for observers registered without their own config.
    pub observer: ObserverConfig,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            create_if_missing: true,
            observer: ObserverConfig::default(),
        }
    }
}

impl StoreConfig {
    /// File-backed store rooted at `path`.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Default::default()
        }
    }
}

/// Sort newest first; equal times fall back to id, descending.
pub fn sort_newest_first(notifications: &mut [Notification]) {
    notifications.sort_by(|a, b| b.time.cmp(&a.time).then_with(|| b.id.cmp(&a.id)));
}

/// Mutable state of one subscription, guarded by its own lock.
struct TopicState {
    meta: SubscriptionMeta,

    /// Owned notifications in arrival order.
    notifications: IndexMap<NotificationId, Notification>,

    /// Locally deleted ids that a poll could still return. Only ids at the
    /// `last_received` boundary are kept, since older ones are never
    /// fetched again.
    tombstones: HashMap<NotificationId, Timestamp>,

    /// Set when the subscription is removed; appends must fail afterwards.
    deleted: bool,
}

impl TopicState {
    fn new(meta: SubscriptionMeta) -> Self {
        Self {
            meta,
            notifications: IndexMap::new(),
            tombstones: HashMap::new(),
            deleted: false,
        }
    }

    fn from_image(image: SubscriptionImage) -> Self {
        Self {
            meta: image.meta,
            notifications: image
                .notifications
                .into_iter()
                .map(|n| (n.id.clone(), n))
                .collect(),
            tombstones: image.tombstones,
            deleted: false,
        }
    }

    fn to_image(&self) -> SubscriptionImage {
        SubscriptionImage {
            meta: self.meta.clone(),
            notifications: self.notifications.values().cloned().collect(),
            tombstones: self.tombstones.clone(),
        }
    }

    fn snapshot(&self) -> Subscription {
        Subscription {
            id: self.meta.id,
            route: self.meta.route.clone(),
            display_name: self.meta.display_name.clone(),
            created: self.meta.created,
            last_received: self.meta.last_received,
            notification_count: self.notifications.len(),
            last_notification_at: self.notifications.values().map(|n| n.time).max(),
        }
    }

    fn mark_received(&mut self, time: Timestamp) {
        if self.meta.last_received.map_or(true, |last| time > last) {
            self.meta.last_received = Some(time);
            self.tombstones.retain(|_, t| *t >= time);
        }
    }

    fn tombstone(&mut self, notification: &Notification) {
        if self.meta.last_received.map_or(false, |last| notification.time >= last) {
            self.tombstones
                .insert(notification.id.clone(), notification.time);
        }
    }
}

type TopicSlot = Arc<Mutex<TopicState>>;

#[derive(Default)]
struct Catalog {
    topics: HashMap<TopicId, TopicSlot>,
    routes: HashMap<TopicRoute, TopicId>,
}

/// Process-wide repository of subscriptions and their notifications.
///
/// Mutations are serialized per subscription: each topic has its own lock,
/// so work on different topics proceeds in parallel. Lock order is
/// catalog -> topic -> id index -> observer registry. Change events are
/// published while the topic lock is still held, so observers see events for
/// a topic in mutation order.
pub struct Store {
    /// Store configuration.
    config: StoreConfig,

    /// Lock file for exclusive access (file-backed stores only).
    _lock_file: Option<File>,

    /// Subscriptions by id and by route.
    catalog: RwLock<Catalog>,

    /// Owner of every notification id currently held.
    ids: Mutex<HashMap<NotificationId, TopicId>>,

    /// Next topic id to assign.
    next_topic_id: AtomicU64,

    observers: ObserverRegistry,
}

impl Store {
    /// In-memory store with default settings.
    pub fn in_memory() -> Self {
        Self::empty(StoreConfig::default(), None, 1)
    }

    /// Open an existing store or create a new one.
    pub fn open_or_create(config: StoreConfig) -> Result<Self> {
        match &config.path {
            None => Ok(Self::empty(config, None, 1)),
            Some(path) if path.exists() => Self::open(config),
            Some(_) if config.create_if_missing => Self::create(config),
            Some(_) => Err(StoreError::NotInitialized),
        }
    }

    /// Create a new store.
    pub fn create(config: StoreConfig) -> Result<Self> {
        let Some(path) = config.path.clone() else {
            return Ok(Self::empty(config, None, 1));
        };

        fs::create_dir_all(&path)?;
        snapshot::write_manifest(&path)?;
        let lock_file = snapshot::acquire_lock(&path)?;

        info!(path = %path.display(), "created store");
        Ok(Self::empty(config, Some(lock_file), 1))
    }

    /// Open an existing store.
    pub fn open(config: StoreConfig) -> Result<Self> {
        let Some(path) = config.path.clone() else {
            return Ok(Self::empty(config, None, 1));
        };

        snapshot::verify_manifest(&path)?;
        let lock_file = snapshot::acquire_lock(&path)?;
        let image = snapshot::load_image(&path)?.unwrap_or_default();

        let next_topic_id = image.next_topic_id.max(1);
        let (catalog, ids) = Self::restore(image)?;

        let store = Self::empty(config, Some(lock_file), next_topic_id);
        *store.catalog.write() = catalog;
        *store.ids.lock() = ids;

        info!(
            path = %path.display(),
            subscriptions = store.catalog.read().topics.len(),
            "opened store"
        );
        Ok(store)
    }

    fn empty(config: StoreConfig, lock_file: Option<File>, next_topic_id: u64) -> Self {
        let observers = ObserverRegistry::with_config(config.observer.clone());
        Self {
            config,
            _lock_file: lock_file,
            catalog: RwLock::new(Catalog::default()),
            ids: Mutex::new(HashMap::new()),
            next_topic_id: AtomicU64::new(next_topic_id),
            observers,
        }
    }

    /// Rebuild the catalog and id index from an image.
    fn restore(image: StoreImage) -> Result<(Catalog, HashMap<NotificationId, TopicId>)> {
        let mut catalog = Catalog::default();
        let mut ids = HashMap::new();

        for sub in image.subscriptions {
            let topic = sub.meta.id;
            if catalog.routes.contains_key(&sub.meta.route) {
                return Err(StoreError::InvalidFormat(format!(
                    "route {} stored twice",
                    sub.meta.route
                )));
            }
            for n in &sub.notifications {
                if ids.insert(n.id.clone(), topic).is_some() {
                    return Err(StoreError::InvalidFormat(format!(
                        "notification {} stored twice",
                        n.id
                    )));
                }
            }
            catalog.routes.insert(sub.meta.route.clone(), topic);
            catalog
                .topics
                .insert(topic, Arc::new(Mutex::new(TopicState::from_image(sub))));
        }

        Ok((catalog, ids))
    }

    fn slot(&self, topic: TopicId) -> Option<TopicSlot> {
        self.catalog.read().topics.get(&topic).cloned()
    }

    // --- Subscription Operations ---

    /// Start tracking a remote topic.
    pub fn create_subscription(
        &self,
        route: TopicRoute,
        metadata: DisplayMetadata,
    ) -> Result<Subscription> {
        let mut catalog = self.catalog.write();

        if catalog.routes.contains_key(&route) {
            return Err(StoreError::DuplicateSubscription(route));
        }

        let id = TopicId(self.next_topic_id.fetch_add(1, Ordering::SeqCst));
        let state = TopicState::new(SubscriptionMeta {
            id,
            route: route.clone(),
            display_name: metadata.display_name,
            created: Timestamp::now(),
            last_received: None,
        });
        let snapshot = state.snapshot();

        catalog.routes.insert(route, id);
        catalog.topics.insert(id, Arc::new(Mutex::new(state)));

        // Still under the catalog lock so no event for this topic can precede it
        self.observers
            .publish(ChangeEvent::SubscriptionCreated { topic: id });
        drop(catalog);

        info!(topic = %id, route = %snapshot.route, "subscription created");
        Ok(snapshot)
    }

    /// Remove a subscription and every notification it owns.
    ///
    /// Returns false if it was already gone. Appends racing with this call
    /// either land before it (and are removed) or fail with
    /// [`StoreError::SubscriptionNotFound`].
    pub fn delete_subscription(&self, topic: TopicId) -> bool {
        let mut catalog = self.catalog.write();
        let Some(slot) = catalog.topics.remove(&topic) else {
            return false;
        };

        let mut state = slot.lock();
        catalog.routes.remove(&state.meta.route);
        drop(catalog);

        state.deleted = true;
        let removed = state.notifications.len();
        {
            let mut ids = self.ids.lock();
            for id in state.notifications.keys() {
                ids.remove(id);
            }
        }
        state.notifications.clear();
        state.tombstones.clear();

        self.observers
            .publish(ChangeEvent::SubscriptionDeleted { topic });

        info!(topic = %topic, route = %state.meta.route, removed, "subscription deleted");
        true
    }

    /// Get a subscription snapshot.
    pub fn subscription(&self, topic: TopicId) -> Option<Subscription> {
        let slot = self.slot(topic)?;
        let state = slot.lock();
        (!state.deleted).then(|| state.snapshot())
    }

    /// All subscriptions, oldest first.
    pub fn subscriptions(&self) -> Vec<Subscription> {
        let slots: Vec<TopicSlot> = self.catalog.read().topics.values().cloned().collect();

        let mut subs: Vec<Subscription> = slots
            .iter()
            .filter_map(|slot| {
                let state = slot.lock();
                (!state.deleted).then(|| state.snapshot())
            })
            .collect();
        subs.sort_by_key(|s| s.id);
        subs
    }

    /// Look up a subscription by route.
    pub fn find_subscription(&self, route: &TopicRoute) -> Option<Subscription> {
        let topic = *self.catalog.read().routes.get(route)?;
        self.subscription(topic)
    }

    /// Newest message time ever received for the topic.
    pub fn last_received(&self, topic: TopicId) -> Result<Option<Timestamp>> {
        let slot = self
            .slot(topic)
            .ok_or(StoreError::SubscriptionNotFound(topic))?;
        let state = slot.lock();
        if state.deleted {
            return Err(StoreError::SubscriptionNotFound(topic));
        }
        Ok(state.meta.last_received)
    }

    // --- Notification Operations ---

    /// Insert a batch of notifications atomically.
    ///
    /// Ids the topic already holds (or deleted at the poll boundary) are
    /// skipped, so re-delivery is harmless. Returns the number added; one
    /// change event is published when that is non-zero.
    pub fn append_notifications(
        &self,
        topic: TopicId,
        notifications: Vec<Notification>,
    ) -> Result<usize> {
        let slot = self
            .slot(topic)
            .ok_or(StoreError::SubscriptionNotFound(topic))?;
        let mut state = slot.lock();

        if state.deleted {
            return Err(StoreError::SubscriptionNotFound(topic));
        }

        if let Some(stray) = notifications.iter().find(|n| n.topic != topic) {
            return Err(StoreError::InvalidOperation(format!(
                "notification {} belongs to {}, not {}",
                stray.id, stray.topic, topic
            )));
        }

        let mut ids = self.ids.lock();

        // Validate the whole batch before touching anything
        for n in &notifications {
            if let Some(&owner) = ids.get(&n.id) {
                if owner != topic {
                    error!(id = %n.id, existing = %owner, incoming = %topic, "notification id owned by another topic");
                    return Err(StoreError::IdentifierConflict {
                        id: n.id.clone(),
                        existing: owner,
                        incoming: topic,
                    });
                }
            }
        }

        let received = notifications.len();
        let mut added = 0;
        for n in notifications {
            if state.notifications.contains_key(&n.id) || state.tombstones.contains_key(&n.id) {
                continue;
            }
            ids.insert(n.id.clone(), topic);
            state.mark_received(n.time);
            state.notifications.insert(n.id.clone(), n);
            added += 1;
        }
        drop(ids);

        if added > 0 {
            self.observers
                .publish(ChangeEvent::NotificationsAppended { topic, added });
        }

        debug!(topic = %topic, received, added, "appended notifications");
        Ok(added)
    }

    /// Get a notification by id.
    pub fn notification(&self, id: &NotificationId) -> Option<Notification> {
        let topic = *self.ids.lock().get(id)?;
        let slot = self.slot(topic)?;
        let state = slot.lock();
        state.notifications.get(id).cloned()
    }

    /// Ids held by the topic, in arrival order.
    pub fn notification_ids(&self, topic: TopicId) -> Vec<NotificationId> {
        let Some(slot) = self.slot(topic) else {
            return Vec::new();
        };
        let state = slot.lock();
        state.notifications.keys().cloned().collect()
    }

    /// Notifications for the topic, newest first. Empty for unknown topics.
    pub fn sorted_notifications(&self, topic: TopicId) -> Vec<Notification> {
        let Some(slot) = self.slot(topic) else {
            return Vec::new();
        };

        let mut notifications: Vec<Notification> = {
            let state = slot.lock();
            if state.deleted {
                return Vec::new();
            }
            state.notifications.values().cloned().collect()
        };

        sort_newest_first(&mut notifications);
        notifications
    }

    /// Delete one notification. Returns false if it was not present.
    pub fn delete_notification(&self, id: &NotificationId) -> bool {
        let owner = self.ids.lock().get(id).copied();
        match owner {
            Some(topic) => self.remove_from_topic(topic, std::iter::once(id)) > 0,
            None => false,
        }
    }

    /// Delete exactly the named notifications. Absent ids are ignored.
    pub fn delete_notifications<'a, I>(&self, ids: I) -> usize
    where
        I: IntoIterator<Item = &'a NotificationId>,
    {
        let mut by_topic: BTreeMap<TopicId, Vec<&NotificationId>> = BTreeMap::new();
        {
            let index = self.ids.lock();
            for id in ids {
                if let Some(&topic) = index.get(id) {
                    by_topic.entry(topic).or_default().push(id);
                }
            }
        }

        by_topic
            .into_iter()
            .map(|(topic, ids)| self.remove_from_topic(topic, ids.into_iter()))
            .sum()
    }

    /// Delete the named notifications held by `topic`. Ids owned by other
    /// topics are left alone.
    pub fn delete_notifications_in<'a, I>(&self, topic: TopicId, ids: I) -> usize
    where
        I: IntoIterator<Item = &'a NotificationId>,
    {
        self.remove_from_topic(topic, ids.into_iter())
    }

    /// Delete every notification the topic holds right now.
    ///
    /// Appends serialized after this call are untouched. Unknown topics are
    /// a no-op.
    pub fn delete_all_notifications(&self, topic: TopicId) -> usize {
        let Some(slot) = self.slot(topic) else {
            return 0;
        };
        let mut state = slot.lock();
        if state.deleted {
            return 0;
        }

        let drained: Vec<Notification> = state.notifications.drain(..).map(|(_, n)| n).collect();
        {
            let mut ids = self.ids.lock();
            for n in &drained {
                ids.remove(&n.id);
            }
        }
        for n in &drained {
            state.tombstone(n);
        }

        let removed = drained.len();
        if removed > 0 {
            self.observers
                .publish(ChangeEvent::NotificationsDeleted { topic, removed });
        }

        debug!(topic = %topic, removed, "deleted all notifications");
        removed
    }

    fn remove_from_topic<'a>(
        &self,
        topic: TopicId,
        ids: impl Iterator<Item = &'a NotificationId>,
    ) -> usize {
        let Some(slot) = self.slot(topic) else {
            return 0;
        };
        let mut state = slot.lock();
        if state.deleted {
            return 0;
        }

        let mut removed = 0;
        {
            let mut index = self.ids.lock();
            for id in ids {
                if let Some(n) = state.notifications.shift_remove(id) {
                    index.remove(id);
                    state.tombstone(&n);
                    removed += 1;
                }
            }
        }

        if removed > 0 {
            self.observers
                .publish(ChangeEvent::NotificationsDeleted { topic, removed });
        }

        debug!(topic = %topic, removed, "deleted notifications");
        removed
    }

    // --- Observers ---

    /// Watch for changes through a channel.
    pub fn observe(&self, filter: ObserverFilter) -> ObserverHandle {
        self.observers.subscribe(filter)
    }

    /// Watch for changes with an explicit buffer size.
    pub fn observe_with(&self, filter: ObserverFilter, config: ObserverConfig) -> ObserverHandle {
        self.observers.subscribe_with(filter, config)
    }

    /// Run `callback` on a dispatcher thread after every matching change.
    pub fn on_change<F>(&self, filter: ObserverFilter, callback: F) -> Result<ObserverId>
    where
        F: FnMut(&ChangeEvent) + Send + 'static,
    {
        self.observers.subscribe_callback(filter, callback)
    }

    /// Stop delivering events to an observer.
    pub fn unobserve(&self, id: ObserverId) {
        self.observers.unsubscribe(id);
    }

    // --- Store Operations ---

    /// Get store statistics.
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            subscription_count: self.catalog.read().topics.len() as u64,
            notification_count: self.ids.lock().len() as u64,
            observer_count: self.observers.observer_count() as u64,
        }
    }

    /// Write the current contents to disk. No-op for in-memory stores.
    pub fn sync(&self) -> Result<()> {
        let Some(path) = &self.config.path else {
            return Ok(());
        };

        let mut slots: Vec<(TopicId, TopicSlot)> = self
            .catalog
            .read()
            .topics
            .iter()
            .map(|(topic, slot)| (*topic, Arc::clone(slot)))
            .collect();
        slots.sort_by_key(|(topic, _)| *topic);

        // All topics are held together so an id moving between topics is
        // imaged exactly once. Nothing else holds two topic locks.
        let image = {
            let states: Vec<_> = slots.iter().map(|(_, slot)| slot.lock()).collect();
            StoreImage {
                next_topic_id: self.next_topic_id.load(Ordering::SeqCst),
                subscriptions: states
                    .iter()
                    .filter(|state| !state.deleted)
                    .map(|state| state.to_image())
                    .collect(),
            }
        };

        snapshot::save_image(path, &image)?;
        debug!(path = %path.display(), subscriptions = image.subscriptions.len(), "store synced");
        Ok(())
    }

    /// Get the store path, if file-backed.
    pub fn path(&self) -> Option<&Path> {
        self.config.path.as_deref()
    }
}

impl Drop for Store {
    fn drop(&mut self) {
        // Best-effort sync on drop
        if let Err(e) = self.sync() {
            error!(error = %e, "failed to sync store on drop");
        }
    }
}
