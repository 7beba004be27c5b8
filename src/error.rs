//! Error types for the notification store and sync operations.

use crate::types::{NotificationId, TopicId, TopicRoute};
use thiserror::Error;

/// Failure reported by a [`MessageTransport`](crate::transport::MessageTransport).
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Server responded with status {code}: {body}")]
    Status { code: u16, body: String },

    #[error("Malformed server response: {0}")]
    Decode(String),
}

/// Main error type for store and sync operations.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Already subscribed to {0}")]
    DuplicateSubscription(TopicRoute),

    #[error("Subscription not found: {0}")]
    SubscriptionNotFound(TopicId),

    #[error("Notification {id} already belongs to {existing}, refusing to add it to {incoming}")]
    IdentifierConflict {
        id: NotificationId,
        existing: TopicId,
        incoming: TopicId,
    },

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Worker pool is no longer running")]
    WorkerUnavailable,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("Checksum mismatch: expected {expected}, got {got}")]
    ChecksumMismatch { expected: u32, got: u32 },

    #[error("Store is locked by another process")]
    Locked,

    #[error("Store not initialized")]
    NotInitialized,

    #[error("Invalid store format: {0}")]
    InvalidFormat(String),
}

impl From<rmp_serde::encode::Error> for StoreError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for StoreError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        StoreError::Deserialization(e.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
