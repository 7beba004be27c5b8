//! Background synchronization with topic servers.

mod manager;
mod worker;

pub use manager::{BackgroundPoller, PollMode, PollOutcome, SubscriptionSyncManager, SyncConfig};
pub use worker::{JobHandle, WorkerPool};
