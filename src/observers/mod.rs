//! Change notification for store observers.
//!
//! Every store mutation publishes a topic-scoped [`ChangeEvent`]. Observers
//! either hold a channel ([`ObserverHandle`]) or register a callback that runs
//! on its own dispatcher thread.
//!
//! Observers support:
//! - Filtering by topic, or receiving everything
//! - Bounded buffers with slow-observer dropping
//!
//! # Example
//!
//! ```ignore
//! let handle = store.observe(ObserverFilter::Topic(topic));
//!
//! loop {
//!     match handle.recv() {
//!         Ok(ChangeEvent::Dropped { .. }) | Err(_) => break,
//!         Ok(_) => redraw(store.sorted_notifications(topic)),
//!     }
//! }
//! ```

mod manager;
mod types;

pub use manager::ObserverRegistry;
pub use types::{ChangeEvent, DropReason, ObserverConfig, ObserverFilter, ObserverHandle, ObserverId};
