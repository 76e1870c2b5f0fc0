//! Subscription and eviction behaviour of the tag cache.

mod common;

use std::sync::{Arc, OnceLock, Weak};

use common::*;
use parking_lot::Mutex;
use tagsync_cache::{
    InitialDelivery, ListenerHandle, RequestCall, TagCache, TagListener, TagSubscriptionListener,
};
use tagsync_core::{
    QualityStatus, RegistryError, Routing, ServiceError, SupervisionEntity, SupervisionEvent,
    SupervisionStatus, Tag, TagId, TagUpdate, TagValueUpdate,
};

#[tokio::test]
async fn test_subscribe_populates_registers_and_refetches() {
    let server = server_with_tags(3);
    let cache = cache_for(&server);
    let (listener, handle) = RecordingListener::new();

    cache
        .subscribe(&ids(&[1, 2, 3]), &handle, InitialDelivery::Inline)
        .await
        .unwrap();

    assert_eq!(value_of(&cache, 1), Some(10.0));
    assert_eq!(value_of(&cache, 2), Some(20.0));
    assert_eq!(value_of(&cache, 3), Some(30.0));
    assert_eq!(cache.get_ids_for_listener(&handle), ids(&[1, 2, 3]));
    assert_eq!(listener.updates().len(), 3);

    cache.await_pending_subscriptions().await;

    assert_eq!(server.registered_ids(), ids(&[1, 2, 3]));
    assert_eq!(
        server.calls(),
        vec![
            RequestCall::ByIds(ids(&[1, 2, 3])),
            RequestCall::CurrentValues(ids(&[1, 2, 3])),
        ]
    );
}

#[tokio::test]
async fn test_unknown_ids_get_placeholders() {
    let server = server_with_tags(1);
    let cache = cache_for(&server);
    let (_listener, handle) = RecordingListener::new();

    cache
        .subscribe(&ids(&[1, 99]), &handle, InitialDelivery::Inline)
        .await
        .unwrap();
    cache.await_pending_subscriptions().await;

    let unknown = cache.get(TagId::new(99)).unwrap();
    assert!(!unknown.is_existing());
    assert_eq!(unknown.name(), Tag::UNKNOWN_NAME);
    assert!(unknown.quality.is_invalid_status_set(QualityStatus::UndefinedTag));

    // unknown tags are never registered for push updates
    assert_eq!(server.registered_ids(), ids(&[1]));
    assert_eq!(cache.cache_size(), 2);
}

#[tokio::test]
async fn test_push_updates_reach_listeners() {
    let server = server_with_tags(2);
    let cache = cache_for(&server);
    let (listener, handle) = RecordingListener::new();

    cache
        .subscribe(&ids(&[1, 2]), &handle, InitialDelivery::Inline)
        .await
        .unwrap();
    cache.await_pending_subscriptions().await;
    listener.clear();

    server.publish(TagId::new(2), 21.5).unwrap();

    assert_eq!(value_of(&cache, 2), Some(21.5));
    let updates = listener.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].id, TagId::new(2));
}

#[tokio::test]
async fn test_older_push_update_is_ignored() {
    let server = server_with_tags(1);
    let cache = cache_for(&server);
    let (listener, handle) = RecordingListener::new();

    cache
        .subscribe(&ids(&[1]), &handle, InitialDelivery::Inline)
        .await
        .unwrap();
    cache.await_pending_subscriptions().await;
    listener.clear();

    let stale = TagValueUpdate::new(
        TagId::new(1),
        -1.0,
        chrono::DateTime::<chrono::Utc>::UNIX_EPOCH,
    );
    assert!(!server.publish_update(&stale));
    assert_eq!(value_of(&cache, 1), Some(10.0));
    assert!(listener.updates().is_empty());
}

#[tokio::test]
async fn test_separate_initial_delivery() {
    let server = server_with_tags(2);
    let cache = cache_for(&server);
    let (listener, handle) = RecordingListener::new();

    cache
        .subscribe(&ids(&[1, 2]), &handle, InitialDelivery::Separate)
        .await
        .unwrap();
    cache.await_pending_subscriptions().await;

    let batches = listener.initial_batches();
    assert_eq!(batches.len(), 1);
    assert_eq!(batches[0].len(), 2);
    assert!(listener.updates().is_empty());

    server.publish(TagId::new(1), 11.0).unwrap();
    assert_eq!(listener.updates_for(1).len(), 1);
}

#[tokio::test]
async fn test_unsubscribe_removes_only_orphaned_entries() {
    let server = server_with_tags(2);
    let cache = cache_for(&server);
    let observer = Arc::new(RecordingObserver::default());
    cache.add_subscription_listener(observer.clone());

    let (_l, first) = RecordingListener::new();
    let (_m, second) = RecordingListener::new();
    cache
        .subscribe(&ids(&[1, 2]), &first, InitialDelivery::Inline)
        .await
        .unwrap();
    cache
        .subscribe(&ids(&[1]), &second, InitialDelivery::Inline)
        .await
        .unwrap();
    cache.await_pending_subscriptions().await;

    let removed = cache.unsubscribe(&ids(&[1, 2]), &first).await;

    assert_eq!(removed, ids(&[2]));
    assert_eq!(*observer.unsubscribed.lock(), vec![ids(&[2])]);
    assert_eq!(cache.cache_size(), 1);
    assert!(cache.get(TagId::new(1)).is_some());
    assert_eq!(server.registered_ids(), ids(&[1]));
    assert_eq!(server.supervised_ids(), ids(&[1]));
}

#[tokio::test]
async fn test_unsubscribe_of_foreign_listener_is_noop() {
    let server = server_with_tags(1);
    let cache = cache_for(&server);
    let (_l, subscribed) = RecordingListener::new();
    let (_m, stranger) = RecordingListener::new();

    cache
        .subscribe(&ids(&[1]), &subscribed, InitialDelivery::Inline)
        .await
        .unwrap();

    assert!(cache.unsubscribe(&ids(&[1]), &stranger).await.is_empty());
    assert!(cache.unsubscribe_all(&stranger).await.is_empty());
    assert_eq!(cache.cache_size(), 1);
}

#[tokio::test]
async fn test_unsubscribe_all() {
    let server = server_with_tags(3);
    let cache = cache_for(&server);
    let (_l, handle) = RecordingListener::new();

    cache
        .subscribe(&ids(&[1, 2, 3]), &handle, InitialDelivery::Inline)
        .await
        .unwrap();
    cache.await_pending_subscriptions().await;
    assert!(cache.is_subscribed(&handle));

    let removed = cache.unsubscribe_all(&handle).await;

    assert_eq!(removed, ids(&[1, 2, 3]));
    assert_eq!(cache.cache_size(), 0);
    assert!(!cache.is_subscribed(&handle));
    assert!(server.registered_ids().is_empty());
    assert_eq!(cache.metrics().tags_removed(), 3);
}

#[tokio::test]
async fn test_unregistration_failure_does_not_block_eviction() {
    let server = server_with_tags(2);
    let cache = cache_for(&server);
    let (_l, handle) = RecordingListener::new();

    cache
        .subscribe(&ids(&[1, 2]), &handle, InitialDelivery::Inline)
        .await
        .unwrap();
    cache.await_pending_subscriptions().await;

    server.fail_unregistrations(Some(RegistryError::unavailable("registry offline")));
    let removed = cache.unsubscribe_all(&handle).await;

    assert_eq!(removed, ids(&[1, 2]));
    assert_eq!(cache.cache_size(), 0);
}

#[tokio::test]
async fn test_failed_subscribe_rolls_back() {
    let server = server_with_tags(2);
    let cache = cache_for(&server);
    let observer = Arc::new(RecordingObserver::default());
    cache.add_subscription_listener(observer.clone());
    let (listener, handle) = RecordingListener::new();

    server.fail_next_request(ServiceError::transport("broker unreachable"));
    let err = cache
        .subscribe(&ids(&[1, 2]), &handle, InitialDelivery::Inline)
        .await
        .unwrap_err();

    assert!(err.is_synchronization());
    assert!(matches!(err.service_cause(), Some(ServiceError::Transport(_))));
    assert_eq!(cache.cache_size(), 0);
    assert!(listener.updates().is_empty());
    assert!(observer.subscribed.lock().is_empty());

    // a retry succeeds once the service is back
    cache
        .subscribe(&ids(&[1, 2]), &handle, InitialDelivery::Inline)
        .await
        .unwrap();
    assert_eq!(cache.cache_size(), 2);
    assert_eq!(*observer.subscribed.lock(), vec![ids(&[1, 2])]);
}

#[tokio::test]
async fn test_failed_subscribe_keeps_existing_entries() {
    let server = server_with_tags(2);
    let cache = cache_for(&server);
    let (_l, handle) = RecordingListener::new();

    cache
        .subscribe(&ids(&[1]), &handle, InitialDelivery::Inline)
        .await
        .unwrap();
    cache.await_pending_subscriptions().await;

    server.fail_next_request(ServiceError::Timeout { millis: 10 });
    assert!(
        cache
            .subscribe(&ids(&[1, 2]), &handle, InitialDelivery::Inline)
            .await
            .is_err()
    );

    assert_eq!(cache.cache_size(), 1);
    assert!(cache.get(TagId::new(1)).unwrap().is_valid());
}

#[tokio::test]
async fn test_subscribe_by_name() {
    let server = Arc::new(tagsync_cache::InMemoryTagServer::new());
    server.define_tag(1, "CP.PRESSURE", 1.0);
    server.define_tag(2, "CP.TEMPERATURE", 2.0);
    server.define_tag(3, "XX.LEVEL", 3.0);
    let cache = cache_for(&server);
    let observer = Arc::new(RecordingObserver::default());
    cache.add_subscription_listener(observer.clone());

    let (_l, first) = RecordingListener::new();
    let matched = cache
        .subscribe_by_name(&["cp.*".to_string()], &first, InitialDelivery::Inline)
        .await
        .unwrap();
    assert_eq!(matched, ids(&[1, 2]));
    assert_eq!(cache.get_ids_for_listener(&first), ids(&[1, 2]));

    // the same pattern from a second listener creates nothing new
    let (_m, second) = RecordingListener::new();
    let matched = cache
        .subscribe_by_name(&["CP.?RESSURE".to_string()], &second, InitialDelivery::Inline)
        .await
        .unwrap();
    assert_eq!(matched, ids(&[1]));
    assert_eq!(*observer.subscribed.lock(), vec![ids(&[1, 2])]);
    assert_eq!(cache.cache_size(), 2);
}

#[tokio::test]
async fn test_subscribe_by_name_without_matches() {
    let server = server_with_tags(1);
    let cache = cache_for(&server);
    let (_l, handle) = RecordingListener::new();

    let matched = cache
        .subscribe_by_name(&["NOTHING.*".to_string()], &handle, InitialDelivery::Inline)
        .await
        .unwrap();
    assert!(matched.is_empty());
    assert_eq!(cache.cache_size(), 0);
}

#[tokio::test]
async fn test_lookups_by_name_and_routing() {
    let server = Arc::new(tagsync_cache::InMemoryTagServer::new());
    let routing = Routing {
        process_ids: [5].into(),
        equipment_ids: [7].into(),
        ..Routing::default()
    };
    server.define(
        TagUpdate::new("EQ.STATUS", TagValueUpdate::new(TagId::new(1), 1.0, server.next_timestamp()))
            .with_routing(routing),
    );
    server.define_tag(2, "OTHER", 2.0);
    let cache = cache_for(&server);
    let (_l, handle) = RecordingListener::new();

    cache
        .subscribe(&ids(&[1, 2]), &handle, InitialDelivery::Inline)
        .await
        .unwrap();

    assert_eq!(cache.get_by_name("eq.status").unwrap().id, TagId::new(1));
    assert!(cache.get_by_name("missing").is_none());
    assert_eq!(cache.get_all_for_process(5).len(), 1);
    assert_eq!(cache.get_all_for_equipment(7).len(), 1);
    assert!(cache.get_all_for_sub_equipment(7).is_empty());
    assert_eq!(cache.get_all_for_listener(&handle).len(), 2);
}

#[tokio::test]
async fn test_equipment_down_invalidates_routed_tags() {
    let server = Arc::new(tagsync_cache::InMemoryTagServer::new());
    let routing = Routing {
        equipment_ids: [7].into(),
        ..Routing::default()
    };
    server.define(
        TagUpdate::new("EQ.VALUE", TagValueUpdate::new(TagId::new(1), 1.0, server.next_timestamp()))
            .with_routing(routing),
    );
    let cache = cache_for(&server);
    let (listener, handle) = RecordingListener::new();
    cache
        .subscribe(&ids(&[1]), &handle, InitialDelivery::Inline)
        .await
        .unwrap();
    listener.clear();

    let down = SupervisionEvent::new(SupervisionEntity::Equipment, 7, SupervisionStatus::Down, "");
    assert_eq!(server.publish_supervision(&down), 1);

    let tag = cache.get(TagId::new(1)).unwrap();
    assert!(tag.quality.is_invalid_status_set(QualityStatus::EquipmentDown));
    assert_eq!(tag.value.and_then(|v| v.as_f64()), Some(1.0));
    assert_eq!(listener.updates().len(), 1);

    let up = SupervisionEvent::new(SupervisionEntity::Equipment, 7, SupervisionStatus::Running, "");
    server.publish_supervision(&up);
    assert!(cache.get(TagId::new(1)).unwrap().is_valid());
}

#[tokio::test]
async fn test_control_tags_are_not_supervised() {
    let server = Arc::new(tagsync_cache::InMemoryTagServer::new());
    server.define(
        TagUpdate::new("COMM.FAULT", TagValueUpdate::new(TagId::new(1), false, server.next_timestamp()))
            .as_control_tag(false),
    );
    server.define(
        TagUpdate::new("ALIVE", TagValueUpdate::new(TagId::new(2), 1, server.next_timestamp()))
            .as_control_tag(true),
    );
    let cache = cache_for(&server);
    let (_l, handle) = RecordingListener::new();

    cache
        .subscribe(&ids(&[1, 2]), &handle, InitialDelivery::Inline)
        .await
        .unwrap();

    assert_eq!(server.supervised_ids(), ids(&[2]));
}

#[tokio::test]
async fn test_uncached_lookups_leave_cache_untouched() {
    let server = server_with_tags(3);
    let cache = cache_for(&server);
    let (_l, handle) = RecordingListener::new();
    cache
        .subscribe(&ids(&[1]), &handle, InitialDelivery::Inline)
        .await
        .unwrap();
    cache.await_pending_subscriptions().await;
    server.clear_calls();

    let tags = cache.get_many(&ids(&[1, 2, 42])).await.unwrap();
    assert_eq!(tags.len(), 3);
    assert_eq!(tags[1].value.as_ref().and_then(|v| v.as_f64()), Some(20.0));
    assert!(!tags[2].is_existing());
    assert_eq!(server.calls(), vec![RequestCall::ByIds(ids(&[2, 42]))]);

    // exact names are served from the cache
    server.clear_calls();
    let found = cache.find_by_name(&["tag.1".to_string()]).await.unwrap();
    assert_eq!(found.len(), 1);
    assert!(server.calls().is_empty());

    let found = cache.find_by_name(&["TAG.*".to_string()]).await.unwrap();
    assert_eq!(found.len(), 3);
    assert_eq!(cache.cache_size(), 1);
}

/// Listener that reads the cache from inside its callback.
#[derive(Default)]
struct ReadBack {
    cache: OnceLock<Weak<TagCache>>,
    seen: Mutex<Vec<Option<Tag>>>,
}

impl TagListener for ReadBack {
    fn on_update(&self, tag: &Tag) {
        if let Some(cache) = self.cache.get().and_then(Weak::upgrade) {
            self.seen.lock().push(cache.get(tag.id));
        }
    }
}

#[tokio::test]
async fn test_listener_may_call_back_into_cache() {
    let server = server_with_tags(1);
    let cache = Arc::new(cache_for(&server));
    let listener = Arc::new(ReadBack::default());
    let _ = listener.cache.set(Arc::downgrade(&cache));
    let handle = ListenerHandle::from(listener.clone());

    cache
        .subscribe(&ids(&[1]), &handle, InitialDelivery::Inline)
        .await
        .unwrap();
    cache.await_pending_subscriptions().await;
    server.publish(TagId::new(1), 12.0).unwrap();

    let seen = listener.seen.lock().clone();
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(Option::is_some));
}

#[tokio::test]
async fn test_observer_can_be_removed() {
    let server = server_with_tags(2);
    let cache = cache_for(&server);
    let observer = Arc::new(RecordingObserver::default());
    let as_dyn: Arc<dyn TagSubscriptionListener> = observer.clone();
    cache.add_subscription_listener(as_dyn.clone());
    cache.remove_subscription_listener(&as_dyn);

    let (_l, handle) = RecordingListener::new();
    cache
        .subscribe(&ids(&[1, 2]), &handle, InitialDelivery::Inline)
        .await
        .unwrap();

    assert!(observer.subscribed.lock().is_empty());
}
