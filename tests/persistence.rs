//! Store persistence across reopen.

use std::fs;
use topic_sync::{
    DisplayMetadata, Notification, NotificationId, Priority, Store, StoreConfig, StoreError,
    Timestamp, TopicRoute,
};
use tempfile::TempDir;

fn route(topic: &str) -> TopicRoute {
    TopicRoute::new("https://ntfy.example", topic)
}

fn config(dir: &TempDir) -> StoreConfig {
    StoreConfig::at(dir.path().join("store"))
}

#[test]
fn test_reopen_restores_everything() {
    let dir = TempDir::new().unwrap();

    let topic = {
        let store = Store::open_or_create(config(&dir)).unwrap();
        let topic = store
            .create_subscription(route("alerts"), DisplayMetadata::named("Alerts"))
            .unwrap()
            .id;
        store
            .append_notifications(
                topic,
                vec![
                    Notification::new("a", topic, Timestamp(10), "first")
                        .with_title("disk")
                        .with_priority(Priority::HIGH)
                        .with_tags(vec!["warning".into()]),
                    Notification::new("b", topic, Timestamp(20), "second"),
                ],
            )
            .unwrap();
        store.sync().unwrap();
        topic
    };

    let store = Store::open(config(&dir)).unwrap();
    let sub = store.subscription(topic).unwrap();
    assert_eq!(sub.display_name(), "Alerts");
    assert_eq!(sub.last_received, Some(Timestamp(20)));

    let notifications = store.sorted_notifications(topic);
    assert_eq!(notifications.len(), 2);
    assert_eq!(notifications[1].title.as_deref(), Some("disk"));
    assert_eq!(notifications[1].priority, Priority::HIGH);
    assert_eq!(notifications[1].tags, vec!["warning".to_string()]);

    // Topic ids keep counting after reopen
    let next = store
        .create_subscription(route("news"), DisplayMetadata::default())
        .unwrap();
    assert!(next.id > topic);
}

#[test]
fn test_drop_syncs_and_tombstones_survive() {
    let dir = TempDir::new().unwrap();

    let topic = {
        let store = Store::open_or_create(config(&dir)).unwrap();
        let topic = store
            .create_subscription(route("alerts"), DisplayMetadata::default())
            .unwrap()
            .id;
        store
            .append_notifications(
                topic,
                vec![
                    Notification::new("a", topic, Timestamp(10), "a"),
                    Notification::new("b", topic, Timestamp(10), "b"),
                ],
            )
            .unwrap();
        assert!(store.delete_notification(&NotificationId::from("b")));
        topic
        // dropped without an explicit sync
    };

    let store = Store::open(config(&dir)).unwrap();
    assert_eq!(store.notification_ids(topic), vec![NotificationId::from("a")]);

    // Redelivery at the boundary after restart must not bring "b" back
    let added = store
        .append_notifications(topic, vec![Notification::new("b", topic, Timestamp(10), "b")])
        .unwrap();
    assert_eq!(added, 0);
}

#[test]
fn test_deleted_subscription_not_restored() {
    let dir = TempDir::new().unwrap();

    {
        let store = Store::open_or_create(config(&dir)).unwrap();
        let keep = store
            .create_subscription(route("keep"), DisplayMetadata::default())
            .unwrap()
            .id;
        let gone = store
            .create_subscription(route("gone"), DisplayMetadata::default())
            .unwrap()
            .id;
        store
            .append_notifications(gone, vec![Notification::new("g", gone, Timestamp(1), "g")])
            .unwrap();
        store
            .append_notifications(keep, vec![Notification::new("k", keep, Timestamp(1), "k")])
            .unwrap();
        store.delete_subscription(gone);
    }

    let store = Store::open(config(&dir)).unwrap();
    assert_eq!(store.subscriptions().len(), 1);
    assert!(store.find_subscription(&route("gone")).is_none());
    assert!(store.notification(&NotificationId::from("g")).is_none());
    assert_eq!(store.stats().notification_count, 1);
}

#[test]
fn test_second_open_is_locked() {
    let dir = TempDir::new().unwrap();
    let _store = Store::open_or_create(config(&dir)).unwrap();

    let second = Store::open(config(&dir));
    assert!(matches!(second, Err(StoreError::Locked)));
}

#[test]
fn test_corrupted_image_is_rejected() {
    let dir = TempDir::new().unwrap();
    {
        let store = Store::open_or_create(config(&dir)).unwrap();
        let topic = store
            .create_subscription(route("alerts"), DisplayMetadata::default())
            .unwrap()
            .id;
        store
            .append_notifications(topic, vec![Notification::new("a", topic, Timestamp(1), "a")])
            .unwrap();
    }

    let image = dir.path().join("store").join("store.bin");
    let mut bytes = fs::read(&image).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x5a;
    fs::write(&image, &bytes).unwrap();

    let result = Store::open(config(&dir));
    assert!(matches!(result, Err(StoreError::ChecksumMismatch { .. })));

    // The damaged image is left as is for inspection
    assert_eq!(fs::read(&image).unwrap(), bytes);
}

#[test]
fn test_bogus_image_length_is_rejected() {
    let dir = TempDir::new().unwrap();
    {
        let store = Store::open_or_create(config(&dir)).unwrap();
        let topic = store
            .create_subscription(route("alerts"), DisplayMetadata::default())
            .unwrap()
            .id;
        store
            .append_notifications(topic, vec![Notification::new("a", topic, Timestamp(1), "a")])
            .unwrap();
    }

    // Length field follows the 4 byte magic and the version byte
    let image = dir.path().join("store").join("store.bin");
    let mut bytes = fs::read(&image).unwrap();
    bytes[5..13].copy_from_slice(&(u64::MAX / 2).to_le_bytes());
    fs::write(&image, &bytes).unwrap();

    let result = Store::open(config(&dir));
    assert!(matches!(result, Err(StoreError::InvalidFormat(_))));
}

#[test]
fn test_fresh_store_without_image() {
    let dir = TempDir::new().unwrap();
    Store::create(config(&dir)).unwrap().sync().unwrap();

    let store = Store::open(config(&dir)).unwrap();
    assert!(store.subscriptions().is_empty());
    assert_eq!(store.path(), Some(dir.path().join("store").as_path()));
}
