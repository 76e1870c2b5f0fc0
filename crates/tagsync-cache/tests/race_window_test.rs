//! Updates published while a subscription is in flight, and concurrent
//! subscribe/unsubscribe traffic.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::*;
use tagsync_cache::{CacheConfig, InitialDelivery, RequestCall, TagSubscriptionListener};
use tagsync_core::{ServiceError, TagId};

#[tokio::test]
async fn test_update_during_registration_is_not_lost() {
    let server = server_with_tags(2);
    let cache = cache_for(&server);
    let (listener, handle) = RecordingListener::new();

    // published after the initial fetch, before the registration takes effect
    server.queue_in_flight_update(TagId::new(1), 77.0);

    cache
        .subscribe(&ids(&[1, 2]), &handle, InitialDelivery::Inline)
        .await
        .unwrap();
    assert_eq!(value_of(&cache, 1), Some(10.0));

    cache.await_pending_subscriptions().await;

    assert_eq!(value_of(&cache, 1), Some(77.0));
    let last = listener.updates_for(1).pop().unwrap();
    assert_eq!(last.value.and_then(|v| v.as_f64()), Some(77.0));
    // the untouched tag was not notified twice
    assert_eq!(listener.updates_for(2).len(), 1);
}

#[tokio::test]
async fn test_refetch_only_covers_newly_registered_tags() {
    let server = server_with_tags(3);
    let cache = cache_for(&server);
    let (_l, first) = RecordingListener::new();
    let (_m, second) = RecordingListener::new();

    cache
        .subscribe(&ids(&[1, 2]), &first, InitialDelivery::Inline)
        .await
        .unwrap();
    cache.await_pending_subscriptions().await;
    server.clear_calls();

    cache
        .subscribe(&ids(&[2, 3]), &second, InitialDelivery::Inline)
        .await
        .unwrap();
    cache.await_pending_subscriptions().await;

    assert_eq!(
        server.calls(),
        vec![
            RequestCall::ByIds(ids(&[3])),
            RequestCall::CurrentValues(ids(&[3])),
        ]
    );
}

#[tokio::test]
async fn test_failed_refetch_keeps_registration() {
    let server = server_with_tags(1);
    let cache = cache_for(&server);
    let (_l, handle) = RecordingListener::new();

    server.queue_in_flight_update(TagId::new(1), 5.0);
    cache
        .subscribe(&ids(&[1]), &handle, InitialDelivery::Inline)
        .await
        .unwrap();
    server.fail_next_request(tagsync_core::ServiceError::transport("lost"));
    cache.await_pending_subscriptions().await;

    // the re-fetch failed, the registration stands and later pushes arrive
    assert_eq!(server.registered_ids(), ids(&[1]));
    assert_eq!(value_of(&cache, 1), Some(10.0));
    server.publish(TagId::new(1), 6.0).unwrap();
    assert_eq!(value_of(&cache, 1), Some(6.0));
}

#[tokio::test]
async fn test_unsubscribe_before_registration_leaves_nothing_registered() {
    let server = server_with_tags(2);
    let cache = cache_for(&server);
    let (_l, handle) = RecordingListener::new();

    cache
        .subscribe(&ids(&[1, 2]), &handle, InitialDelivery::Inline)
        .await
        .unwrap();
    cache.unsubscribe_all(&handle).await;
    cache.await_pending_subscriptions().await;

    assert!(server.registered_ids().is_empty());
    assert!(server.supervised_ids().is_empty());
    assert_eq!(cache.cache_size(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_failed_reinit_keeps_attached_tags_subscribed() {
    let server = server_with_tags(2);
    let config = CacheConfig::builder()
        .request_timeout(Duration::from_secs(1))
        .build()
        .unwrap();
    let cache = Arc::new(cache_with(&server, config));
    let observer = Arc::new(RecordingObserver::default());
    cache.add_subscription_listener(observer.clone() as Arc<dyn TagSubscriptionListener>);

    let (_m, other) = RecordingListener::new();
    cache
        .subscribe(&ids(&[2]), &other, InitialDelivery::Inline)
        .await
        .unwrap();
    cache.await_pending_subscriptions().await;

    server.set_latency(Some(Duration::from_millis(100)));
    let (listener, handle) = RecordingListener::new();
    let subscriber = {
        let cache = cache.clone();
        let handle = handle.clone();
        tokio::spawn(async move {
            cache
                .subscribe(&ids(&[1, 2]), &handle, InitialDelivery::Inline)
                .await
        })
    };

    // tag 1 is being fetched; tag 2 is evicted underneath and can not be
    // fetched again in time
    tokio::time::sleep(Duration::from_millis(10)).await;
    cache.unsubscribe(&ids(&[2]), &other).await;
    server.set_latency(Some(Duration::from_secs(10)));

    let result = subscriber.await.unwrap();
    let err = result.unwrap_err();
    assert_eq!(err.service_cause(), Some(&ServiceError::Timeout { millis: 1000 }));

    server.set_latency(None);
    cache.await_pending_subscriptions().await;

    assert_eq!(cache.get_ids_for_listener(&handle), ids(&[1]));
    assert!(cache.get(TagId::new(2)).is_none());
    assert_eq!(server.registered_ids(), ids(&[1]));
    assert!(observer.subscribed.lock().contains(&ids(&[1])));

    server.publish(TagId::new(1), 99.0).unwrap();
    assert_eq!(value_of(&cache, 1), Some(99.0));
    let last = listener.updates_for(1).pop().unwrap();
    assert_eq!(last.value.and_then(|v| v.as_f64()), Some(99.0));
}

#[tokio::test(start_paused = true)]
async fn test_placeholder_shared_with_failed_subscribe_is_initialised() {
    let server = server_with_tags(1);
    let cache = Arc::new(cache_for(&server));
    server.set_latency(Some(Duration::from_millis(100)));
    server.fail_next_request(ServiceError::transport("broker restarting"));

    let (_a, first) = RecordingListener::new();
    let failing = {
        let cache = cache.clone();
        tokio::spawn(async move {
            cache
                .subscribe(&ids(&[1]), &first, InitialDelivery::Inline)
                .await
        })
    };

    // attaches to the placeholder the first subscriber is still fetching
    tokio::time::sleep(Duration::from_millis(10)).await;
    let (listener, second) = RecordingListener::new();
    cache
        .subscribe(&ids(&[1]), &second, InitialDelivery::Inline)
        .await
        .unwrap();

    assert!(failing.await.unwrap().is_err());
    cache.await_pending_subscriptions().await;

    let tag = cache.get(TagId::new(1)).unwrap();
    assert!(tag.is_existing());
    assert_eq!(value_of(&cache, 1), Some(10.0));
    assert_eq!(server.registered_ids(), ids(&[1]));
    assert_eq!(cache.get_ids_for_listener(&second), ids(&[1]));
    let last = listener.updates_for(1).pop().unwrap();
    assert_eq!(last.value.and_then(|v| v.as_f64()), Some(10.0));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_subscribe_and_unsubscribe() {
    let server = server_with_tags(8);
    let cache = Arc::new(cache_for(&server));

    let mut tasks = Vec::new();
    for worker in 0..8u64 {
        let cache = cache.clone();
        tasks.push(tokio::spawn(async move {
            let (_l, handle) = RecordingListener::new();
            for round in 0..20u64 {
                let a = (worker + round) % 8 + 1;
                let b = (worker * 3 + round) % 8 + 1;
                cache
                    .subscribe(&ids(&[a, b]), &handle, InitialDelivery::Inline)
                    .await
                    .unwrap();

                let attached = cache.get_ids_for_listener(&handle);
                assert!(attached.contains(&TagId::new(a)));
                assert!(attached.contains(&TagId::new(b)));

                cache.unsubscribe(&ids(&[a, b]), &handle).await;
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
    cache.await_pending_subscriptions().await;

    assert_eq!(cache.cache_size(), 0);
    assert!(server.registered_ids().is_empty());
    assert!(server.supervised_ids().is_empty());
}
