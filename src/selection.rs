//! Multi-select editing of one topic's notification list.

use crate::store::Store;
use crate::types::{NotificationId, TopicId};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::debug;

/// Tracks which notifications of a topic the user has selected.
///
/// Selection is local state; nothing touches the Store until
/// [`delete_selected`](Self::delete_selected) or
/// [`delete_all`](Self::delete_all). Selecting implicitly enters edit mode.
pub struct SelectionController {
    store: Arc<Store>,
    topic: TopicId,
    editing: bool,
    selected: BTreeSet<NotificationId>,
}

impl SelectionController {
    pub fn new(store: Arc<Store>, topic: TopicId) -> Self {
        Self {
            store,
            topic,
            editing: false,
            selected: BTreeSet::new(),
        }
    }

    pub fn topic(&self) -> TopicId {
        self.topic
    }

    pub fn is_editing(&self) -> bool {
        self.editing
    }

    pub fn enter_edit_mode(&mut self) {
        self.editing = true;
    }

    /// Leave edit mode and forget the selection.
    pub fn exit_edit_mode(&mut self) {
        self.editing = false;
        self.selected.clear();
    }

    /// Flip an id's selection. Returns whether it is now selected.
    pub fn toggle(&mut self, id: &NotificationId) -> bool {
        if self.selected.remove(id) {
            false
        } else {
            self.select(id.clone());
            true
        }
    }

    pub fn select(&mut self, id: NotificationId) {
        self.editing = true;
        self.selected.insert(id);
    }

    pub fn deselect(&mut self, id: &NotificationId) -> bool {
        self.selected.remove(id)
    }

    /// Select everything currently stored for the topic.
    pub fn select_all(&mut self) -> usize {
        self.editing = true;
        self.selected.extend(self.store.notification_ids(self.topic));
        self.selected.len()
    }

    pub fn clear(&mut self) {
        self.selected.clear();
    }

    pub fn selected(&self) -> impl Iterator<Item = &NotificationId> {
        self.selected.iter()
    }

    pub fn len(&self) -> usize {
        self.selected.len()
    }

    pub fn is_empty(&self) -> bool {
        self.selected.is_empty()
    }

    pub fn is_selected(&self, id: &NotificationId) -> bool {
        self.selected.contains(id)
    }

    /// Delete exactly the selected notifications of this topic. Ids removed
    /// elsewhere in the meantime are skipped. Leaves edit mode.
    pub fn delete_selected(&mut self) -> usize {
        let removed = self.store.delete_notifications_in(self.topic, &self.selected);
        debug!(topic = %self.topic, selected = self.selected.len(), removed, "deleted selection");
        self.exit_edit_mode();
        removed
    }

    /// Delete every notification of the topic. Leaves edit mode.
    pub fn delete_all(&mut self) -> usize {
        let removed = self.store.delete_all_notifications(self.topic);
        debug!(topic = %self.topic, removed, "deleted all");
        self.exit_edit_mode();
        removed
    }
}
