#![allow(dead_code)]
use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tagsync_cache::{
    CacheConfig, InMemoryTagServer, ListenerHandle, TagCache, TagListener,
    TagSubscriptionListener,
};
use tagsync_core::{Tag, TagId};

/// Listener recording every callback it receives.
#[derive(Default)]
pub struct RecordingListener {
    updates: Mutex<Vec<Tag>>,
    initial: Mutex<Vec<Vec<Tag>>>,
}

impl RecordingListener {
    /// Creates a listener together with the handle used to subscribe it.
    pub fn new() -> (Arc<Self>, ListenerHandle) {
        let listener = Arc::new(Self::default());
        let handle = ListenerHandle::from(listener.clone());
        (listener, handle)
    }

    pub fn updates(&self) -> Vec<Tag> {
        self.updates.lock().clone()
    }

    pub fn updates_for(&self, id: u64) -> Vec<Tag> {
        self.updates()
            .into_iter()
            .filter(|t| t.id == TagId::new(id))
            .collect()
    }

    pub fn initial_batches(&self) -> Vec<Vec<Tag>> {
        self.initial.lock().clone()
    }

    pub fn clear(&self) {
        self.updates.lock().clear();
        self.initial.lock().clear();
    }
}

impl TagListener for RecordingListener {
    fn on_update(&self, tag: &Tag) {
        self.updates.lock().push(tag.clone());
    }

    fn on_initial_update(&self, tags: &[Tag]) {
        self.initial.lock().push(tags.to_vec());
    }
}

/// Observer recording subscription notifications.
#[derive(Default)]
pub struct RecordingObserver {
    pub subscribed: Mutex<Vec<BTreeSet<TagId>>>,
    pub unsubscribed: Mutex<Vec<BTreeSet<TagId>>>,
}

impl TagSubscriptionListener for RecordingObserver {
    fn on_new_tag_subscriptions(&self, ids: &BTreeSet<TagId>) {
        self.subscribed.lock().push(ids.clone());
    }

    fn on_unsubscribe(&self, ids: &BTreeSet<TagId>) {
        self.unsubscribed.lock().push(ids.clone());
    }
}

/// Helper to build an id set.
pub fn ids(raw: &[u64]) -> BTreeSet<TagId> {
    raw.iter().copied().map(TagId::new).collect()
}

/// Server with tags `1..=count` named `TAG.<id>` and valued `<id> * 10`.
pub fn server_with_tags(count: u64) -> Arc<InMemoryTagServer> {
    let server = Arc::new(InMemoryTagServer::new());
    for id in 1..=count {
        server.define_tag(id, &format!("TAG.{id}"), (id * 10) as f64);
    }
    server
}

/// Cache with default configuration wired to `server`.
pub fn cache_for(server: &Arc<InMemoryTagServer>) -> TagCache {
    TagCache::builder()
        .in_memory(server)
        .build()
        .expect("cache should build inside a runtime")
}

/// Cache with the given configuration wired to `server`.
pub fn cache_with(server: &Arc<InMemoryTagServer>, config: CacheConfig) -> TagCache {
    TagCache::builder()
        .in_memory(server)
        .config(config)
        .build()
        .expect("cache should build inside a runtime")
}

/// Polls `check` until it holds or a second elapsed.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}

/// Current value of a cached tag as `f64`.
pub fn value_of(cache: &TagCache, id: u64) -> Option<f64> {
    cache.get(TagId::new(id))?.value?.as_f64()
}
