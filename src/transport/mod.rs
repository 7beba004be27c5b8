//! Boundary to the remote message source.
//!
//! A [`MessageTransport`] performs exactly one request per call: no caching,
//! no retries. Two implementations ship with the crate:
//! - [`HttpTransport`] talks to an ntfy-style HTTP server
//! - [`MemoryTransport`] is an in-process message source for tests and demos

mod http;
mod memory;

pub use http::{parse_message_stream, HttpTransport, HttpTransportConfig};
pub use memory::{FetchGate, MemoryTransport};

use crate::error::TransportError;
use crate::types::{Notification, NotificationId, Priority, Timestamp, TopicId, TopicRoute};
use rand::seq::IndexedRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};

/// Tag vocabulary used for generated test messages.
pub const TEST_TAGS: &[&str] = &[
    "warning",
    "rotating_light",
    "tada",
    "partying_face",
    "+1",
    "heavy_check_mark",
    "skull",
    "lock",
    "cd",
    "loudspeaker",
];

/// Message as returned by a fetch, before the store assigns ownership.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    /// Server-assigned id. Generated locally when absent.
    pub id: Option<String>,
    pub time: Option<Timestamp>,
    pub title: Option<String>,
    pub message: String,
    pub priority: Option<Priority>,
    pub tags: Vec<String>,
    pub click: Option<String>,
}

impl RawMessage {
    /// Attach to a subscription, filling in missing id, time and priority.
    pub fn into_notification(self, topic: TopicId, received_at: Timestamp) -> Notification {
        Notification {
            id: self
                .id
                .filter(|id| !id.is_empty())
                .map(NotificationId)
                .unwrap_or_else(NotificationId::generate),
            topic,
            time: self.time.unwrap_or(received_at),
            title: self.title.filter(|t| !t.is_empty()),
            message: self.message,
            priority: self.priority.unwrap_or_default(),
            tags: self.tags,
            click: self.click.filter(|c| !c.is_empty()),
        }
    }
}

/// Message to publish to a topic.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct OutgoingMessage {
    pub body: String,
    pub title: Option<String>,
    pub priority: Option<Priority>,
    pub tags: Vec<String>,
    pub click: Option<String>,
}

impl OutgoingMessage {
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
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

    /// Synthetic test message: random priority in 1..=5 and zero to three
    /// distinct tags from [`TEST_TAGS`].
    pub fn test_message<R: Rng + ?Sized>(
        rng: &mut R,
        body: impl Into<String>,
        title: Option<String>,
    ) -> Self {
        let priority = Priority::clamped(rng.random_range(1..=5));
        let tag_count = rng.random_range(0..=3);
        let tags = TEST_TAGS
            .choose_multiple(rng, tag_count)
            .map(|tag| tag.to_string())
            .collect();

        Self {
            body: body.into(),
            title,
            priority: Some(priority),
            tags,
            click: None,
        }
    }
}

/// Performs single requests against a topic endpoint.
pub trait MessageTransport: Send + Sync {
    /// Publish one message. Success means "accepted by the server".
    fn publish(&self, route: &TopicRoute, message: &OutgoingMessage) -> Result<(), TransportError>;

    /// Fetch messages published at or after `since` (everything when `None`).
    fn fetch(
        &self,
        route: &TopicRoute,
        since: Option<Timestamp>,
    ) -> Result<Vec<RawMessage>, TransportError>;

    /// Stop remote delivery for the topic.
    fn deregister(&self, route: &TopicRoute) -> Result<(), TransportError>;
}
