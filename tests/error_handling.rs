//! Error handling and edge case tests.

use std::sync::Arc;
use topic_sync::{
    DisplayMetadata, MemoryTransport, Notification, NotificationId, OutgoingMessage, PollMode,
    PollOutcome, RawMessage, Store, StoreConfig, StoreError, SubscriptionSyncManager, SyncConfig,
    Timestamp, TopicId, TopicRoute, TransportError,
};

fn route(topic: &str) -> TopicRoute {
    TopicRoute::new("https://ntfy.example", topic)
}

fn manager(store: &Arc<Store>, transport: &Arc<MemoryTransport>) -> SubscriptionSyncManager {
    SubscriptionSyncManager::new(store.clone(), transport.clone(), SyncConfig { workers: 2 })
        .unwrap()
}

// --- Store Errors ---

#[test]
fn test_append_to_unknown_topic() {
    let store = Store::in_memory();
    let result = store.append_notifications(
        TopicId(42),
        vec![Notification::new("x", TopicId(42), Timestamp(1), "x")],
    );
    assert!(matches!(result, Err(StoreError::SubscriptionNotFound(TopicId(42)))));
}

#[test]
fn test_append_after_delete_subscription() {
    let store = Store::in_memory();
    let topic = store
        .create_subscription(route("alerts"), DisplayMetadata::default())
        .unwrap()
        .id;
    store
        .append_notifications(topic, vec![Notification::new("a", topic, Timestamp(1), "a")])
        .unwrap();

    assert!(store.delete_subscription(topic));
    assert!(!store.delete_subscription(topic));
    assert!(store.sorted_notifications(topic).is_empty());

    let result =
        store.append_notifications(topic, vec![Notification::new("b", topic, Timestamp(2), "b")]);
    assert!(matches!(result, Err(StoreError::SubscriptionNotFound(_))));
}

#[test]
fn test_identifier_conflict_rejects_whole_batch() {
    let store = Store::in_memory();
    let a = store
        .create_subscription(route("a"), DisplayMetadata::default())
        .unwrap()
        .id;
    let b = store
        .create_subscription(route("b"), DisplayMetadata::default())
        .unwrap()
        .id;
    store
        .append_notifications(a, vec![Notification::new("shared", a, Timestamp(1), "a")])
        .unwrap();

    let result = store.append_notifications(
        b,
        vec![
            Notification::new("fresh", b, Timestamp(2), "b"),
            Notification::new("shared", b, Timestamp(3), "b"),
        ],
    );
    match result {
        Err(StoreError::IdentifierConflict { id, existing, incoming }) => {
            assert_eq!(id, NotificationId::from("shared"));
            assert_eq!(existing, a);
            assert_eq!(incoming, b);
        }
        other => panic!("expected conflict, got {other:?}"),
    }

    assert!(store.sorted_notifications(b).is_empty());
    assert_eq!(store.notification(&NotificationId::from("shared")).unwrap().topic, a);
}

#[test]
fn test_mismatched_topic_in_batch() {
    let store = Store::in_memory();
    let topic = store
        .create_subscription(route("alerts"), DisplayMetadata::default())
        .unwrap()
        .id;

    let result = store.append_notifications(
        topic,
        vec![Notification::new("x", TopicId(999), Timestamp(1), "x")],
    );
    assert!(matches!(result, Err(StoreError::InvalidOperation(_))));
}

#[test]
fn test_deletes_of_missing_ids_are_noops() {
    let store = Store::in_memory();
    let topic = store
        .create_subscription(route("alerts"), DisplayMetadata::default())
        .unwrap()
        .id;

    assert!(!store.delete_notification(&NotificationId::from("ghost")));
    assert_eq!(store.delete_notifications(&[NotificationId::from("ghost")]), 0);
    assert_eq!(store.delete_all_notifications(topic), 0);
    assert_eq!(store.delete_all_notifications(TopicId(77)), 0);
}

#[test]
fn test_open_missing_store_without_create() {
    let dir = tempfile::TempDir::new().unwrap();
    let config = StoreConfig {
        create_if_missing: false,
        ..StoreConfig::at(dir.path().join("absent"))
    };
    assert!(matches!(
        Store::open_or_create(config),
        Err(StoreError::NotInitialized)
    ));
}

// --- Sync Errors ---

#[test]
fn test_manual_poll_reports_transport_error() {
    let store = Arc::new(Store::in_memory());
    let transport = Arc::new(MemoryTransport::new());
    let topic = store
        .create_subscription(route("alerts"), DisplayMetadata::default())
        .unwrap()
        .id;
    let manager = manager(&store, &transport);

    transport.set_fail_fetch(true);
    let result = manager.poll(topic, PollMode::Manual).wait();
    assert!(matches!(
        result,
        Err(StoreError::Transport(TransportError::Network(_)))
    ));

    // Retrying after the outage works
    transport.set_fail_fetch(false);
    transport.inject(
        &route("alerts"),
        RawMessage {
            id: Some("a".into()),
            time: Some(Timestamp(5)),
            message: "back".into(),
            ..Default::default()
        },
    );
    let outcome = manager.poll(topic, PollMode::Manual).wait().unwrap();
    assert_eq!(outcome, PollOutcome::Updated { received: 1, added: 1 });
}

#[test]
fn test_background_poll_swallows_transport_error() {
    let store = Arc::new(Store::in_memory());
    let transport = Arc::new(MemoryTransport::new());
    let topic = store
        .create_subscription(route("alerts"), DisplayMetadata::default())
        .unwrap()
        .id;
    let manager = manager(&store, &transport);

    transport.set_fail_fetch(true);
    let outcome = manager.poll(topic, PollMode::Background).wait().unwrap();
    assert_eq!(outcome, PollOutcome::NoNewData);
}

#[test]
fn test_publish_to_unknown_topic() {
    let store = Arc::new(Store::in_memory());
    let transport = Arc::new(MemoryTransport::new());
    let manager = manager(&store, &transport);

    let result = manager.publish(TopicId(5), OutgoingMessage::new("hi")).wait();
    assert!(matches!(result, Err(StoreError::SubscriptionNotFound(_))));
    assert!(transport.published().is_empty());
}

#[test]
fn test_unsubscribe_succeeds_when_server_refuses() {
    let store = Arc::new(Store::in_memory());
    let transport = Arc::new(MemoryTransport::new());
    let topic = store
        .create_subscription(route("alerts"), DisplayMetadata::default())
        .unwrap()
        .id;
    let manager = manager(&store, &transport);

    transport.set_fail_deregister(true);
    manager.unsubscribe(topic).wait().unwrap();
    assert!(store.subscription(topic).is_none());
    assert!(store.find_subscription(&route("alerts")).is_none());
}

#[test]
fn test_duplicate_subscribe_through_manager() {
    let store = Arc::new(Store::in_memory());
    let transport = Arc::new(MemoryTransport::new());
    let manager = manager(&store, &transport);

    manager
        .subscribe(route("alerts"), DisplayMetadata::default())
        .unwrap();
    let again = manager.subscribe(route("alerts"), DisplayMetadata::default());
    assert!(matches!(again, Err(StoreError::DuplicateSubscription(_))));
}
