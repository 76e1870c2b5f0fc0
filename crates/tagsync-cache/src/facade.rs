//! Public cache surface.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::ReentrantMutexGuard;
use tokio::runtime::Handle;
use tracing::info;

use tagsync_core::pattern::unescape;
use tagsync_core::{CacheError, Routing, Tag, TagId, TagValueUpdate, has_wildcard};

use crate::collab::{
    Collaborators, InMemoryTagServer, PushRegistry, RequestService, SupervisionSource,
};
use crate::config::CacheConfig;
use crate::coordinator::SubscriptionCoordinator;
use crate::listener::{InitialDelivery, ListenerHandle, TagSubscriptionListener};
use crate::metrics::CacheMetrics;
use crate::store::TagCacheStore;
use crate::sync::{RecoveryHandle, RecoveryScheduler, SyncState, SynchronizationEngine};

/// Client-side tag cache.
///
/// Lookups return value snapshots of the active map. Subscriptions create
/// entries on demand and keep them synchronized with the server until the
/// last listener leaves.
///
/// # Example
///
/// ```ignore
/// use tagsync_cache::{InitialDelivery, ListenerHandle, TagCache};
///
/// let cache = TagCache::builder().in_memory(&server).build()?;
/// cache.subscribe(&ids, &listener, InitialDelivery::Inline).await?;
/// let tag = cache.get(TagId::new(1));
/// ```
pub struct TagCache {
    store: Arc<TagCacheStore>,
    engine: SynchronizationEngine,
    coordinator: SubscriptionCoordinator,
    handle: Handle,
}

impl TagCache {
    /// Creates a new builder for TagCache.
    pub fn builder() -> TagCacheBuilder {
        TagCacheBuilder::default()
    }

    // ============================================
    // Lookups
    // ============================================

    /// Returns the active entry for `id`.
    pub fn get(&self, id: TagId) -> Option<Tag> {
        self.store.read().active().get(&id).map(|e| e.snapshot())
    }

    /// Returns the first active entry named `name`, ignoring case.
    pub fn get_by_name(&self, name: &str) -> Option<Tag> {
        self.store
            .read()
            .active()
            .values()
            .find(|e| e.has_name(name))
            .map(|e| e.snapshot())
    }

    /// Returns every tag `listener` is subscribed to.
    pub fn get_all_for_listener(&self, listener: &ListenerHandle) -> Vec<Tag> {
        let mut tags: Vec<Tag> = self
            .store
            .read()
            .active()
            .values()
            .filter(|e| e.has_listener(listener))
            .map(|e| e.snapshot())
            .collect();
        tags.sort_by_key(|t| t.id);
        tags
    }

    /// Returns the ids `listener` is subscribed to.
    pub fn get_ids_for_listener(&self, listener: &ListenerHandle) -> BTreeSet<TagId> {
        self.store
            .read()
            .active()
            .iter()
            .filter(|(_, e)| e.has_listener(listener))
            .map(|(id, _)| *id)
            .collect()
    }

    /// Returns true if `listener` is subscribed to at least one tag.
    pub fn is_subscribed(&self, listener: &ListenerHandle) -> bool {
        self.store
            .read()
            .active()
            .values()
            .any(|e| e.has_listener(listener))
    }

    /// Returns the tags routed to the given process.
    pub fn get_all_for_process(&self, process_id: u64) -> Vec<Tag> {
        self.routed(|r| r.process_ids.contains(&process_id))
    }

    /// Returns the tags routed to the given equipment.
    pub fn get_all_for_equipment(&self, equipment_id: u64) -> Vec<Tag> {
        self.routed(|r| r.equipment_ids.contains(&equipment_id))
    }

    /// Returns the tags routed to the given sub-equipment.
    pub fn get_all_for_sub_equipment(&self, sub_equipment_id: u64) -> Vec<Tag> {
        self.routed(|r| r.sub_equipment_ids.contains(&sub_equipment_id))
    }

    fn routed(&self, filter: impl Fn(&Routing) -> bool) -> Vec<Tag> {
        let mut tags: Vec<Tag> = self
            .store
            .read()
            .active()
            .values()
            .map(|e| e.snapshot())
            .filter(|t| filter(&t.routing))
            .collect();
        tags.sort_by_key(|t| t.id);
        tags
    }

    /// Number of live entries.
    ///
    /// History mode never resizes the live map, so this is the live size in
    /// both modes.
    pub fn cache_size(&self) -> usize {
        self.store.live_size()
    }

    // ============================================
    // Uncached lookups
    // ============================================

    /// Returns snapshots for `ids`, fetching the ones not cached from the
    /// server without adding them to the cache.
    pub async fn get_many(&self, ids: &BTreeSet<TagId>) -> Result<Vec<Tag>, CacheError> {
        let mut found = BTreeMap::new();
        let mut missing = BTreeSet::new();
        {
            let maps = self.store.read();
            for id in ids {
                match maps.active().get(id) {
                    Some(entry) => {
                        found.insert(*id, entry.snapshot());
                    },
                    None => {
                        missing.insert(*id);
                    },
                }
            }
        }

        for tag in self.engine.fetch_detached(&missing).await? {
            found.insert(tag.id, tag);
        }
        Ok(found.into_values().collect())
    }

    /// Resolves tags by name patterns without adding them to the cache.
    ///
    /// A pattern without wildcards is looked up in the cache first.
    pub async fn find_by_name(&self, patterns: &[String]) -> Result<Vec<Tag>, CacheError> {
        let mut found = BTreeMap::new();
        let mut remote = Vec::new();

        for pattern in patterns {
            let cached = if has_wildcard(pattern) {
                None
            } else {
                self.get_by_name(&unescape(pattern))
            };
            match cached {
                Some(tag) => {
                    found.insert(tag.id, tag);
                },
                None => remote.push(pattern.clone()),
            }
        }

        for tag in self.engine.fetch_detached_by_pattern(&remote).await? {
            found.entry(tag.id).or_insert(tag);
        }
        Ok(found.into_values().collect())
    }

    // ============================================
    // Subscriptions
    // ============================================

    /// Subscribes `listener` to `ids`.
    ///
    /// # Errors
    ///
    /// Returns a synchronization error if tags not cached yet could not be
    /// fetched; the listener is then not attached to any of them.
    pub async fn subscribe(
        &self,
        ids: &BTreeSet<TagId>,
        listener: &ListenerHandle,
        delivery: InitialDelivery,
    ) -> Result<(), CacheError> {
        self.coordinator.subscribe(ids, listener, delivery).await
    }

    /// Subscribes `listener` to every tag matching one of the name patterns.
    ///
    /// Returns the matched ids.
    pub async fn subscribe_by_name(
        &self,
        patterns: &[String],
        listener: &ListenerHandle,
        delivery: InitialDelivery,
    ) -> Result<BTreeSet<TagId>, CacheError> {
        self.coordinator
            .subscribe_by_pattern(patterns, listener, delivery)
            .await
    }

    /// Unsubscribes `listener` from `ids`. Returns the ids evicted from the
    /// cache.
    pub async fn unsubscribe(
        &self,
        ids: &BTreeSet<TagId>,
        listener: &ListenerHandle,
    ) -> BTreeSet<TagId> {
        self.coordinator.unsubscribe(ids, listener).await
    }

    /// Unsubscribes `listener` from every tag.
    pub async fn unsubscribe_all(&self, listener: &ListenerHandle) -> BTreeSet<TagId> {
        self.coordinator.unsubscribe_all(listener).await
    }

    /// Registers an observer of tags entering and leaving the cache.
    pub fn add_subscription_listener(&self, observer: Arc<dyn TagSubscriptionListener>) {
        self.coordinator.add_observer(observer);
    }

    /// Removes a subscription observer.
    pub fn remove_subscription_listener(&self, observer: &Arc<dyn TagSubscriptionListener>) {
        self.coordinator.remove_observer(observer);
    }

    // ============================================
    // Synchronization
    // ============================================

    /// Refreshes the whole live cache.
    pub async fn refresh(&self) -> Result<(), CacheError> {
        self.engine.refresh(None).await
    }

    /// Refreshes the given live entries.
    pub async fn refresh_tags(&self, ids: &BTreeSet<TagId>) -> Result<(), CacheError> {
        self.engine.refresh(Some(ids)).await
    }

    /// Waits until every background subscription task and queued signal has
    /// been handled.
    pub async fn await_pending_subscriptions(&self) {
        self.engine.await_idle().await;
    }

    /// Starts retrying failed refreshes in the background.
    ///
    /// Recovery stops when the returned handle is dropped.
    pub fn start_recovery(&self) -> RecoveryHandle {
        let scheduler =
            RecoveryScheduler::new(self.engine.clone(), self.engine.config().recovery().clone());
        scheduler.start(&self.handle)
    }

    // ============================================
    // History mode
    // ============================================

    /// Switches between the live and the history map.
    ///
    /// Returns false if the cache already was in the requested mode.
    pub fn set_history_mode(&self, enable: bool) -> bool {
        self.store.set_history_mode(enable)
    }

    /// Returns true if the history map is active.
    pub fn is_history_mode(&self) -> bool {
        self.store.is_history_mode()
    }

    /// Prevents mode switches by other threads while the guard is held.
    ///
    /// The lock is reentrant: the holder may still switch modes itself.
    pub fn lock_history_mode(&self) -> ReentrantMutexGuard<'_, ()> {
        self.store.lock_mode()
    }

    /// Applies a playback value to the history entry of `update.id`.
    ///
    /// Timestamps are not checked, playback may go backwards. Returns false
    /// if the tag has no history entry.
    ///
    /// # Errors
    ///
    /// Returns an error outside of history mode.
    pub fn apply_history_value(&self, update: &TagValueUpdate) -> Result<bool, CacheError> {
        let entry = {
            let maps = self.store.read();
            if !maps.is_history_mode() {
                return Err(CacheError::invalid_argument(
                    "history values can only be applied in history mode",
                ));
            }
            maps.history().get(&update.id).cloned()
        };

        Ok(entry.is_some_and(|e| e.replace_value(update)))
    }

    // ============================================
    // Introspection
    // ============================================

    /// Returns the cache metrics.
    pub fn metrics(&self) -> &CacheMetrics {
        self.engine.metrics()
    }

    /// Returns the synchronization state.
    pub fn sync_state(&self) -> &Arc<SyncState> {
        self.engine.state()
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CacheConfig {
        self.engine.config()
    }
}

/// Builder for TagCache.
#[derive(Default)]
pub struct TagCacheBuilder {
    config: Option<CacheConfig>,
    service: Option<Arc<dyn RequestService>>,
    registry: Option<Arc<dyn PushRegistry>>,
    supervision: Option<Arc<dyn SupervisionSource>>,
    metrics: Option<CacheMetrics>,
    handle: Option<Handle>,
}

impl TagCacheBuilder {
    /// Sets the configuration.
    pub fn config(mut self, config: CacheConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Sets the remote request service.
    pub fn request_service(mut self, service: Arc<dyn RequestService>) -> Self {
        self.service = Some(service);
        self
    }

    /// Sets the push-update registry.
    pub fn push_registry(mut self, registry: Arc<dyn PushRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Sets the supervision signal source.
    pub fn supervision_source(mut self, supervision: Arc<dyn SupervisionSource>) -> Self {
        self.supervision = Some(supervision);
        self
    }

    /// Sets all three collaborators.
    pub fn collaborators(self, collaborators: Collaborators) -> Self {
        self.request_service(collaborators.service)
            .push_registry(collaborators.registry)
            .supervision_source(collaborators.supervision)
    }

    /// Uses one in-memory server for all three collaborators.
    pub fn in_memory(self, server: &Arc<InMemoryTagServer>) -> Self {
        self.collaborators(Collaborators::in_memory(server))
    }

    /// Shares metrics with other components.
    pub fn metrics(mut self, metrics: CacheMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Sets the runtime background tasks are spawned on.
    ///
    /// Defaults to the runtime `build` is called from.
    pub fn runtime(mut self, handle: Handle) -> Self {
        self.handle = Some(handle);
        self
    }

    /// Builds the cache and registers it for heartbeat and connection
    /// signals.
    ///
    /// # Errors
    ///
    /// Returns an error if a collaborator is missing, the configuration is
    /// invalid or no tokio runtime is available.
    pub fn build(self) -> Result<TagCache, CacheError> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let service = self
            .service
            .ok_or_else(|| CacheError::invalid_config("request service is required"))?;
        let registry = self
            .registry
            .ok_or_else(|| CacheError::invalid_config("push registry is required"))?;
        let supervision = self
            .supervision
            .ok_or_else(|| CacheError::invalid_config("supervision source is required"))?;

        let handle = match self.handle {
            Some(handle) => handle,
            None => Handle::try_current().map_err(|e| {
                CacheError::invalid_config(format!("no tokio runtime available: {e}"))
            })?,
        };

        let store = Arc::new(TagCacheStore::new());
        let engine = SynchronizationEngine::new(
            store.clone(),
            Collaborators {
                service,
                registry,
                supervision,
            },
            config,
            self.metrics.unwrap_or_default(),
            handle.clone(),
        );
        engine.listen_for_signals(&handle);

        info!(
            workers = engine.config().subscription_workers(),
            timeout = ?engine.config().request_timeout(),
            "Tag cache created"
        );

        Ok(TagCache {
            store,
            coordinator: SubscriptionCoordinator::new(engine.clone()),
            engine,
            handle,
        })
    }
}
