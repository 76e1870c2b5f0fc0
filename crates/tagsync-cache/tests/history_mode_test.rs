//! Live/history mode switching.

mod common;

use std::sync::Arc;
use std::sync::mpsc;
use std::time::Duration;

use common::*;
use tagsync_cache::InitialDelivery;
use tagsync_core::{QualityStatus, TagId, TagValueUpdate};

#[tokio::test]
async fn test_listeners_move_to_history_and_back() {
    let server = server_with_tags(2);
    let cache = cache_for(&server);
    let (first, l) = RecordingListener::new();
    let (_second, m) = RecordingListener::new();

    cache
        .subscribe(&ids(&[1, 2]), &l, InitialDelivery::Inline)
        .await
        .unwrap();
    cache
        .subscribe(&ids(&[2]), &m, InitialDelivery::Inline)
        .await
        .unwrap();
    cache.await_pending_subscriptions().await;

    assert!(cache.set_history_mode(true));
    assert!(cache.is_history_mode());
    assert_eq!(cache.get_ids_for_listener(&l), ids(&[1, 2]));
    assert_eq!(cache.get_ids_for_listener(&m), ids(&[2]));
    first.clear();

    // live entries keep updating but notify nobody
    server.publish(TagId::new(1), 15.0).unwrap();
    assert_eq!(value_of(&cache, 1), Some(10.0));
    assert!(first.updates().is_empty());

    assert!(cache.set_history_mode(false));
    assert_eq!(value_of(&cache, 1), Some(15.0));
    assert_eq!(cache.get_ids_for_listener(&l), ids(&[1, 2]));
    assert_eq!(cache.get_ids_for_listener(&m), ids(&[2]));

    server.publish(TagId::new(1), 16.0).unwrap();
    assert_eq!(first.updates_for(1).len(), 1);
}

#[tokio::test]
async fn test_history_values_are_applied_without_ordering() {
    let server = server_with_tags(1);
    let cache = cache_for(&server);
    let (listener, handle) = RecordingListener::new();
    cache
        .subscribe(&ids(&[1]), &handle, InitialDelivery::Inline)
        .await
        .unwrap();

    cache.set_history_mode(true);
    listener.clear();

    let rewound = TagValueUpdate::new(
        TagId::new(1),
        3.0,
        chrono::DateTime::<chrono::Utc>::UNIX_EPOCH,
    );
    assert!(cache.apply_history_value(&rewound).unwrap());

    assert_eq!(value_of(&cache, 1), Some(3.0));
    assert_eq!(listener.updates().len(), 1);
    assert!(
        !cache
            .apply_history_value(&TagValueUpdate::new(TagId::new(9), 1.0, server.next_timestamp()))
            .unwrap()
    );

    cache.set_history_mode(false);
    assert_eq!(value_of(&cache, 1), Some(10.0));
}

#[tokio::test]
async fn test_subscribe_in_history_mode_creates_both_entries() {
    let server = server_with_tags(3);
    let cache = cache_for(&server);
    let (listener, handle) = RecordingListener::new();

    cache.set_history_mode(true);
    cache
        .subscribe(&ids(&[3]), &handle, InitialDelivery::Inline)
        .await
        .unwrap();
    cache.await_pending_subscriptions().await;

    assert_eq!(cache.cache_size(), 1);
    assert_eq!(value_of(&cache, 3), Some(30.0));
    // the live entry is the one registered for push updates
    assert_eq!(server.registered_ids(), ids(&[3]));

    cache.set_history_mode(false);
    listener.clear();
    server.publish(TagId::new(3), 31.0).unwrap();
    assert_eq!(listener.updates_for(3).len(), 1);
}

#[tokio::test]
async fn test_unsubscribe_in_history_mode_removes_live_entry() {
    let server = server_with_tags(2);
    let cache = cache_for(&server);
    let (_l, handle) = RecordingListener::new();
    cache
        .subscribe(&ids(&[1, 2]), &handle, InitialDelivery::Inline)
        .await
        .unwrap();
    cache.await_pending_subscriptions().await;

    cache.set_history_mode(true);
    let removed = cache.unsubscribe(&ids(&[1]), &handle).await;

    assert_eq!(removed, ids(&[1]));
    assert_eq!(cache.cache_size(), 1);
    assert_eq!(server.registered_ids(), ids(&[2]));

    cache.set_history_mode(false);
    assert!(cache.get(TagId::new(1)).is_none());
}

#[tokio::test]
async fn test_switching_to_current_mode_is_noop() {
    let server = server_with_tags(1);
    let cache = cache_for(&server);

    assert!(!cache.set_history_mode(false));
    assert!(cache.set_history_mode(true));
    assert!(!cache.set_history_mode(true));
    assert!(cache.set_history_mode(false));
}

#[tokio::test]
async fn test_heartbeat_does_not_touch_history_entries() {
    let server = server_with_tags(1);
    let cache = cache_for(&server);
    let (_l, handle) = RecordingListener::new();
    cache
        .subscribe(&ids(&[1]), &handle, InitialDelivery::Inline)
        .await
        .unwrap();

    cache.set_history_mode(true);
    server.fire_heartbeat_expired();
    cache.await_pending_subscriptions().await;

    assert!(cache.get(TagId::new(1)).unwrap().is_valid());

    cache.set_history_mode(false);
    let live = cache.get(TagId::new(1)).unwrap();
    assert!(live.quality.is_invalid_status_set(QualityStatus::ServerHeartbeatExpired));
}

#[tokio::test]
async fn test_mode_lock_blocks_other_threads() {
    let server = server_with_tags(1);
    let cache = Arc::new(cache_for(&server));

    let guard = cache.lock_history_mode();
    // reentrant for the holder
    assert!(cache.set_history_mode(true));
    assert!(cache.set_history_mode(false));

    let (tx, rx) = mpsc::channel();
    let other = cache.clone();
    let worker = std::thread::spawn(move || {
        let switched = other.set_history_mode(true);
        let _ = tx.send(switched);
    });

    assert!(rx.recv_timeout(Duration::from_millis(100)).is_err());
    drop(guard);
    assert_eq!(rx.recv_timeout(Duration::from_secs(5)), Ok(true));
    worker.join().unwrap();
    assert!(cache.is_history_mode());
}
