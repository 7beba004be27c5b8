//! Property tests for store ordering and idempotence.

use proptest::prelude::*;
use std::collections::HashSet;
use topic_sync::{DisplayMetadata, Notification, Store, Timestamp, TopicId, TopicRoute};

fn subscribed_store() -> (Store, TopicId) {
    let store = Store::in_memory();
    let topic = store
        .create_subscription(
            TopicRoute::new("https://ntfy.example", "alerts"),
            DisplayMetadata::default(),
        )
        .unwrap()
        .id;
    (store, topic)
}

/// (id suffix, time) pairs; a small id space forces duplicates and ties.
fn entries() -> impl Strategy<Value = Vec<(u8, i64)>> {
    prop::collection::vec((0u8..40, 0i64..20), 0..60)
}

fn batch(topic: TopicId, entries: &[(u8, i64)]) -> Vec<Notification> {
    entries
        .iter()
        .map(|(id, time)| Notification::new(format!("id-{id:02}"), topic, Timestamp(*time), "x"))
        .collect()
}

fn keys(notifications: &[Notification]) -> Vec<(i64, String)> {
    notifications
        .iter()
        .map(|n| (n.time.0, n.id.0.clone()))
        .collect()
}

proptest! {
    #[test]
    fn appends_are_idempotent(first in entries(), second in entries()) {
        let (store, topic) = subscribed_store();

        store.append_notifications(topic, batch(topic, &first)).unwrap();
        store.append_notifications(topic, batch(topic, &second)).unwrap();
        let before = store.sorted_notifications(topic);

        // Re-delivering everything changes nothing
        let again = store.append_notifications(topic, batch(topic, &first)).unwrap()
            + store.append_notifications(topic, batch(topic, &second)).unwrap();
        prop_assert_eq!(again, 0);
        prop_assert_eq!(store.sorted_notifications(topic), before);

        let distinct: HashSet<u8> = first.iter().chain(&second).map(|(id, _)| *id).collect();
        prop_assert_eq!(store.notification_ids(topic).len(), distinct.len());
    }

    #[test]
    fn sorted_is_newest_first_for_any_arrival_order(
        entries in prop::collection::vec(0i64..10, 1..40),
        seed in any::<u64>(),
    ) {
        let unique: Vec<(u8, i64)> = entries
            .iter()
            .enumerate()
            .map(|(i, time)| (i as u8, *time))
            .collect();

        let (forward, t1) = subscribed_store();
        forward.append_notifications(t1, batch(t1, &unique)).unwrap();

        // Deterministic shuffle from the seed
        let mut shuffled = unique.clone();
        let len = shuffled.len();
        for i in 0..len {
            let j = ((seed.wrapping_mul(i as u64 + 1) >> 7) as usize) % len;
            shuffled.swap(i, j);
        }
        let (reordered, t2) = subscribed_store();
        for entry in &shuffled {
            reordered.append_notifications(t2, batch(t2, std::slice::from_ref(entry))).unwrap();
        }

        let a = keys(&forward.sorted_notifications(t1));
        let b = keys(&reordered.sorted_notifications(t2));
        prop_assert_eq!(&a, &b);

        for pair in a.windows(2) {
            prop_assert!(pair[0] > pair[1], "not strictly descending: {:?}", pair);
        }
    }

    #[test]
    fn delete_all_clears_prior_and_keeps_later(
        before in entries(),
        after_times in prop::collection::vec(20i64..40, 0..20),
    ) {
        let (store, topic) = subscribed_store();
        store.append_notifications(topic, batch(topic, &before)).unwrap();

        store.delete_all_notifications(topic);
        prop_assert!(store.sorted_notifications(topic).is_empty());

        let later: Vec<Notification> = after_times
            .iter()
            .enumerate()
            .map(|(i, t)| Notification::new(format!("later-{i}"), topic, Timestamp(*t), "x"))
            .collect();
        let added = store.append_notifications(topic, later).unwrap();

        prop_assert_eq!(added, after_times.len());
        prop_assert_eq!(store.sorted_notifications(topic).len(), after_times.len());
    }

    #[test]
    fn deleted_ids_stay_deleted_on_redelivery(
        times in prop::collection::vec(0i64..20, 1..60),
        pick in any::<prop::sample::Index>(),
    ) {
        // A server message keeps its time, so ids are unique here
        let entries: Vec<(u8, i64)> = times.iter().enumerate().map(|(i, t)| (i as u8, *t)).collect();
        let (store, topic) = subscribed_store();
        store.append_notifications(topic, batch(topic, &entries)).unwrap();

        let ids = store.notification_ids(topic);
        let victim = ids[pick.index(ids.len())].clone();
        prop_assert!(store.delete_notification(&victim));

        // A poll returns everything at or after the newest time again
        let newest = store.last_received(topic).unwrap().unwrap();
        let redelivered: Vec<(u8, i64)> = entries
            .iter()
            .copied()
            .filter(|(_, t)| Timestamp(*t) >= newest)
            .collect();
        store.append_notifications(topic, batch(topic, &redelivered)).unwrap();

        prop_assert!(store.notification(&victim).is_none());
    }
}
