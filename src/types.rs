//! Core types for the notification store.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

/// Unique identifier for a notification, unique across the whole store.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NotificationId(pub String);

impl NotificationId {
    /// Fresh random identifier for messages that arrive without one.
    pub fn generate() -> Self {
        NotificationId(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NotificationId({})", self.0)
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NotificationId {
    fn from(s: &str) -> Self {
        NotificationId(s.to_string())
    }
}

impl From<String> for NotificationId {
    fn from(s: String) -> Self {
        NotificationId(s)
    }
}

/// Store-assigned identifier for a subscription. Never reused within a store.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TopicId(pub u64);

impl fmt::Debug for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TopicId({})", self.0)
    }
}

impl fmt::Display for TopicId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Routable identity of a remote topic: the server base URL plus topic name.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TopicRoute {
    pub server: String,
    pub topic: String,
}

impl TopicRoute {
    /// Trailing slashes on the server are dropped so `https://a/` and
    /// `https://a` name the same route.
    pub fn new(server: impl Into<String>, topic: impl Into<String>) -> Self {
        let server = server.into();
        Self {
            server: server.trim_end_matches('/').to_string(),
            topic: topic.into(),
        }
    }

    /// Full topic URL, e.g. `https://ntfy.sh/alerts`.
    pub fn url(&self) -> String {
        format!("{}/{}", self.server, self.topic)
    }
}

impl fmt::Display for TopicRoute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url())
    }
}

/// Seconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let duration = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Timestamp(duration.as_secs() as i64)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Message priority, 1 (min) through 5 (max).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Priority(u8);

impl Priority {
    pub const MIN: Priority = Priority(1);
    pub const LOW: Priority = Priority(2);
    pub const DEFAULT: Priority = Priority(3);
    pub const HIGH: Priority = Priority(4);
    pub const MAX: Priority = Priority(5);

    /// Returns `None` outside 1..=5.
    pub fn new(value: u8) -> Option<Self> {
        (1..=5).contains(&value).then_some(Priority(value))
    }

    /// Clamp into range. Zero is treated as "unset" and maps to the default.
    pub fn clamped(value: i64) -> Self {
        match value {
            0 => Priority::DEFAULT,
            v if v < 1 => Priority::MIN,
            v if v > 5 => Priority::MAX,
            v => Priority(v as u8),
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::DEFAULT
    }
}

/// A single received message. Immutable once created.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub id: NotificationId,

    /// Owning subscription.
    pub topic: TopicId,

    /// Server publish time (or receipt time when the server sent none).
    pub time: Timestamp,

    pub title: Option<String>,

    /// Message body. May be empty.
    pub message: String,

    pub priority: Priority,

    pub tags: Vec<String>,

    /// URL to open when the notification is tapped.
    pub click: Option<String>,
}

impl Notification {
    /// Minimal notification with default priority and no tags.
    pub fn new(
        id: impl Into<NotificationId>,
        topic: TopicId,
        time: Timestamp,
        message: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            topic,
            time,
            title: None,
            message: message.into(),
            priority: Priority::DEFAULT,
            tags: Vec::new(),
            click: None,
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    pub fn with_click(mut self, click: impl Into<String>) -> Self {
        self.click = Some(click.into());
        self
    }
}

/// User-facing metadata supplied when subscribing.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayMetadata {
    /// Overrides the topic name in lists.
    pub display_name: Option<String>,
}

impl DisplayMetadata {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            display_name: Some(name.into()),
        }
    }
}

/// Read-only snapshot of a subscription.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Subscription {
    pub id: TopicId,
    pub route: TopicRoute,
    pub display_name: Option<String>,
    pub created: Timestamp,

    /// Newest message time ever received. Not lowered by deletions.
    pub last_received: Option<Timestamp>,

    /// Number of notifications currently held.
    pub notification_count: usize,

    /// Time of the newest notification currently held.
    pub last_notification_at: Option<Timestamp>,
}

impl Subscription {
    /// Display name override, falling back to the topic name.
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.route.topic)
    }
}

/// Store statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub subscription_count: u64,
    pub notification_count: u64,
    pub observer_count: u64,
}
