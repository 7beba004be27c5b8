//! # Topic Sync
//!
//! Client-side core of a push-notification reader: a local store of topic
//! subscriptions and their notifications, kept in step with a remote topic
//! server.
//!
//! ## Core Concepts
//!
//! - **Store**: Thread-safe, optionally persistent home of subscriptions and
//!   notifications, with ordered reads and change events
//! - **Sync**: Background polling, publishing and unsubscribing over a
//!   pluggable transport
//! - **Selection**: Multi-select editing and bulk deletion
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use topic_sync::{
//!     DisplayMetadata, HttpTransport, HttpTransportConfig, PollMode, Store,
//!     SubscriptionSyncManager, SyncConfig, TopicRoute,
//! };
//!
//! let store = Arc::new(Store::in_memory());
//! let transport = Arc::new(HttpTransport::new(HttpTransportConfig::default())?);
//! let sync = SubscriptionSyncManager::new(store.clone(), transport, SyncConfig::default())?;
//!
//! let alerts = sync.subscribe(
//!     TopicRoute::new("https://ntfy.sh", "alerts"),
//!     DisplayMetadata::named("Alerts"),
//! )?;
//! sync.poll(alerts.id, PollMode::Manual).wait()?;
//!
//! for notification in store.sorted_notifications(alerts.id) {
//!     println!("{}", notification.message);
//! }
//! ```

pub mod error;
pub mod observers;
pub mod selection;
mod snapshot;
pub mod store;
pub mod sync;
pub mod transport;
pub mod types;

// Re-exports
pub use error::{Result, StoreError, TransportError};
pub use observers::{
    ChangeEvent, DropReason, ObserverConfig, ObserverFilter, ObserverHandle, ObserverId,
    ObserverRegistry,
};
pub use selection::SelectionController;
pub use store::{sort_newest_first, Store, StoreConfig};
pub use sync::{
    BackgroundPoller, JobHandle, PollMode, PollOutcome, SubscriptionSyncManager, SyncConfig,
    WorkerPool,
};
pub use transport::{
    FetchGate, HttpTransport, HttpTransportConfig, MemoryTransport, MessageTransport,
    OutgoingMessage, RawMessage, TEST_TAGS,
};
pub use types::*;
