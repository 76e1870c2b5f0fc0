//! Synchronization between the cache and the server.
//!
//! The engine creates missing entries from the request service, refreshes
//! and removes entries, registers them for push updates and reacts to
//! heartbeat and connection signals.
//!
//! # Locking
//!
//! Store guards are only held in synchronous sections: entries are collected
//! under the store lock, the lock is released, and only then are entries
//! mutated (which notifies listeners) or the service awaited. Refreshes,
//! initial fetches and signal handling are serialized by an async refresh
//! mutex.

use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

use tokio::runtime::Handle;
use tokio::sync::{Mutex as AsyncMutex, Notify, mpsc};
use tracing::{debug, error, info, warn};

use tagsync_core::{
    CacheError, NamePattern, QualityStatus, ServiceError, Tag, TagId, TagUpdate,
};

use super::state::SyncState;
use super::worker::WorkerPool;
use crate::collab::{
    Collaborators, ConnectionListener, HeartbeatListener, PushRegistry, RequestService,
    SupervisionSource,
};
use crate::config::CacheConfig;
use crate::entry::TagEntry;
use crate::metrics::CacheMetrics;
use crate::store::{StoreWriteGuard, TagCacheStore};

const HEARTBEAT_EXPIRED_MSG: &str = "Server heartbeat has expired.";
const CONNECTION_LOST_MSG: &str = "Connection to the update broker is down.";

/// Ids resolved by a name-pattern initialisation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatternMatch {
    /// Ids added to the cache by this call.
    pub created: BTreeSet<TagId>,
    /// Every id matching the patterns, new or already cached.
    pub matched: BTreeSet<TagId>,
}

/// Outcome of a structural removal.
#[derive(Debug, Default)]
pub(crate) struct Removal {
    /// Ids removed from the active map.
    pub ids: BTreeSet<TagId>,
    /// Known live entries that must be unregistered.
    pub entries: Vec<Arc<TagEntry>>,
}

/// Keeps the cache synchronized with the server.
#[derive(Clone)]
pub struct SynchronizationEngine {
    store: Arc<TagCacheStore>,
    service: Arc<dyn RequestService>,
    registry: Arc<dyn PushRegistry>,
    supervision: Arc<dyn SupervisionSource>,
    state: Arc<SyncState>,
    refresh_lock: Arc<AsyncMutex<()>>,
    workers: Arc<WorkerPool>,
    signals: Arc<SignalTracker>,
    metrics: CacheMetrics,
    config: Arc<CacheConfig>,
}

impl SynchronizationEngine {
    /// Creates an engine working on `store`.
    ///
    /// Subscription tasks are spawned on `handle`.
    pub fn new(
        store: Arc<TagCacheStore>,
        collaborators: Collaborators,
        config: CacheConfig,
        metrics: CacheMetrics,
        handle: Handle,
    ) -> Self {
        Self {
            store,
            service: collaborators.service,
            registry: collaborators.registry,
            supervision: collaborators.supervision,
            state: Arc::new(SyncState::new()),
            refresh_lock: Arc::new(AsyncMutex::new(())),
            workers: Arc::new(WorkerPool::new(handle, config.subscription_workers())),
            signals: Arc::new(SignalTracker::default()),
            metrics,
            config: Arc::new(config),
        }
    }

    /// Returns the synchronization state.
    pub fn state(&self) -> &Arc<SyncState> {
        &self.state
    }

    /// Returns the configuration.
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Returns the metrics recorder.
    pub fn metrics(&self) -> &CacheMetrics {
        &self.metrics
    }

    /// Returns the store the engine works on.
    pub fn store(&self) -> &Arc<TagCacheStore> {
        &self.store
    }

    /// Registers the engine for heartbeat and connection signals.
    ///
    /// Signals are handled in arrival order by a task spawned on `handle`.
    pub fn listen_for_signals(&self, handle: &Handle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let forwarder = Arc::new(SignalForwarder {
            tx,
            tracker: self.signals.clone(),
        });

        self.supervision.add_heartbeat_listener(forwarder.clone());
        self.supervision.add_connection_listener(forwarder);

        handle.spawn(self.clone().dispatch_signals(rx));
    }

    // ============================================
    // Initialisation
    // ============================================

    /// Adds placeholders for ids missing from the live map and populates them
    /// from the server.
    ///
    /// Returns the ids that were added. On failure the placeholders added by
    /// this call are removed again, unless a concurrent subscriber attached
    /// a listener to them in the meantime.
    pub async fn init_tags(&self, ids: &BTreeSet<TagId>) -> Result<BTreeSet<TagId>, CacheError> {
        let created = self.insert_placeholders(ids);
        if created.is_empty() {
            return Ok(created);
        }

        debug!(count = created.len(), "Initialising new tags");
        let _refresh = self.refresh_lock.lock().await;

        let updates = match self
            .call("fetch_by_ids", self.service.fetch_by_ids(&created))
            .await
        {
            Ok(updates) => updates,
            Err(cause) => {
                let (removed, kept) = self.rollback_placeholders(&created);
                warn!(
                    count = created.len(),
                    removed,
                    kept = kept.len(),
                    error = %cause,
                    "Tag initialisation failed"
                );
                self.retry_kept_placeholders(kept);
                return Err(CacheError::synchronization(
                    format!("could not initialise {} tags", created.len()),
                    cause,
                ));
            },
        };

        self.apply_updates(&updates, true);
        self.metrics.record_tags_created(created.len());
        self.metrics.update_entry_count(self.store.live_size());
        Ok(created)
    }

    /// Resolves tags by wildcard name patterns, adding the ones not cached yet.
    pub async fn init_tags_by_pattern(
        &self,
        patterns: &[String],
    ) -> Result<PatternMatch, CacheError> {
        for pattern in patterns {
            NamePattern::new(pattern)?;
        }
        if patterns.is_empty() {
            return Ok(PatternMatch::default());
        }

        let _refresh = self.refresh_lock.lock().await;
        let updates = self
            .call(
                "fetch_by_name_patterns",
                self.service.fetch_by_name_patterns(patterns),
            )
            .await
            .map_err(|cause| {
                CacheError::synchronization(
                    format!("could not resolve tags for patterns {patterns:?}"),
                    cause,
                )
            })?;

        let mut outcome = PatternMatch::default();
        let mut fresh = Vec::new();
        {
            let mut maps = self.store.write();
            let history = maps.is_history_mode();

            for update in &updates {
                let id = update.id();
                outcome.matched.insert(id);

                if !maps.live().contains_key(&id) {
                    let entry = Arc::new(TagEntry::unknown(id));
                    entry.apply_tag_update(update);
                    maps.live_mut().insert(id, entry.clone());
                    outcome.created.insert(id);
                    fresh.push(entry);
                }
                if history && !maps.history().contains_key(&id) {
                    if let Some(copy) = maps.live().get(&id).map(|l| Arc::new(l.clone_detached())) {
                        maps.history_mut().insert(id, copy);
                    }
                }
            }
            self.metrics.update_entry_count(maps.live().len());
        }

        self.supervise(fresh.into_iter().filter(|e| e.is_existing()).collect());
        self.metrics.record_tags_created(outcome.created.len());

        debug!(
            matched = outcome.matched.len(),
            created = outcome.created.len(),
            "Resolved tags by name pattern"
        );
        Ok(outcome)
    }

    fn insert_placeholders(&self, ids: &BTreeSet<TagId>) -> BTreeSet<TagId> {
        let mut maps = self.store.write();
        let history = maps.is_history_mode();
        let mut created = BTreeSet::new();

        for id in ids {
            if !maps.live().contains_key(id) {
                maps.live_mut().insert(*id, Arc::new(TagEntry::unknown(*id)));
                created.insert(*id);
            }
            // tags added in history mode also need a history counterpart
            if history && !maps.history().contains_key(id) {
                let copy = match maps.live().get(id) {
                    Some(live) => live.clone_detached(),
                    None => TagEntry::unknown(*id),
                };
                maps.history_mut().insert(*id, Arc::new(copy));
            }
        }

        created
    }

    /// Removes the placeholders of a failed initialisation. Returns how many
    /// were removed and the ids kept because a concurrent subscriber attached
    /// to them in the meantime.
    fn rollback_placeholders(&self, created: &BTreeSet<TagId>) -> (usize, BTreeSet<TagId>) {
        let mut maps = self.store.write();
        let mut removed = 0;
        let mut kept = BTreeSet::new();

        for id in created {
            let Some(entry) = maps.live().get(id) else {
                continue;
            };
            if entry.is_existing() {
                continue;
            }
            let in_use = entry.has_listeners()
                || maps.history().get(id).is_some_and(|e| e.has_listeners());
            if in_use {
                kept.insert(*id);
                continue;
            }

            maps.live_mut().remove(id);
            maps.history_mut().remove(id);
            removed += 1;
        }

        (removed, kept)
    }

    /// Fetches kept placeholders again in the background. A successful
    /// refresh makes them known and registers them for push updates; a
    /// failed one leaves the engine in need of recovery.
    fn retry_kept_placeholders(&self, kept: BTreeSet<TagId>) {
        if kept.is_empty() {
            return;
        }
        let engine = self.clone();
        self.workers.spawn(async move {
            if let Err(e) = engine.refresh(Some(&kept)).await {
                error!(count = kept.len(), error = %e, "Could not initialise tags kept after a failed subscription");
            }
        });
    }

    /// Applies full descriptions to live entries (and, for new tags, to their
    /// history counterparts). Returns the ids the server described.
    fn apply_updates(&self, updates: &[TagUpdate], with_history: bool) -> BTreeSet<TagId> {
        let targets: Vec<(&TagUpdate, Arc<TagEntry>, Option<Arc<TagEntry>>)> = {
            let maps = self.store.read();
            updates
                .iter()
                .filter_map(|update| {
                    let id = update.id();
                    let live = maps.live().get(&id)?.clone();
                    let history = if with_history {
                        maps.history().get(&id).cloned()
                    } else {
                        None
                    };
                    Some((update, live, history))
                })
                .collect()
        };

        let mut known = BTreeSet::new();
        let mut newly_known = Vec::new();
        for (update, live, history) in targets {
            let was_unknown = !live.is_existing();
            live.apply_tag_update(update);
            if let Some(history) = history {
                history.apply_tag_update(update);
            }
            if was_unknown && live.is_existing() {
                newly_known.push(live);
            }
            known.insert(update.id());
        }

        self.supervise(newly_known);
        known
    }

    /// Registers entries for supervision events, then withdraws the ones a
    /// concurrent unsubscribe evicted in the meantime.
    fn supervise(&self, entries: Vec<Arc<TagEntry>>) {
        // comm-fault and status control tags are not supervised
        let entries: Vec<Arc<TagEntry>> = entries
            .into_iter()
            .filter(|e| e.accepts_supervision())
            .collect();

        for entry in &entries {
            if let Err(e) = self
                .supervision
                .add_supervision_listener(entry, &entry.routing())
            {
                warn!(tag_id = %entry.id(), error = %e, "Could not register tag for supervision events");
            }
        }

        let evicted: Vec<&Arc<TagEntry>> = {
            let maps = self.store.read();
            entries
                .iter()
                .filter(|e| !maps.live().get(&e.id()).is_some_and(|live| Arc::ptr_eq(live, e)))
                .collect()
        };
        for entry in evicted {
            if let Err(e) = self.supervision.remove_supervision_listener(entry) {
                warn!(tag_id = %entry.id(), error = %e, "Could not remove tag from supervision routing");
            }
        }
    }

    // ============================================
    // Removal
    // ============================================

    /// Removes entries from the active map and unregisters known tags.
    ///
    /// Returns the ids actually removed.
    pub async fn remove_tags(&self, ids: &BTreeSet<TagId>) -> BTreeSet<TagId> {
        let removal = {
            let mut maps = self.store.write();
            self.remove_tags_locked(&mut maps, ids)
        };

        self.unregister_entries(removal.entries).await;
        removal.ids
    }

    /// Removes entries while the caller holds the write lock.
    ///
    /// The returned entries must be passed to [`unregister_entries`] once the
    /// lock is released.
    ///
    /// [`unregister_entries`]: SynchronizationEngine::unregister_entries
    pub(crate) fn remove_tags_locked(
        &self,
        maps: &mut StoreWriteGuard<'_>,
        ids: &BTreeSet<TagId>,
    ) -> Removal {
        let history = maps.is_history_mode();
        let mut removal = Removal::default();

        for id in ids {
            let Some(entry) = maps.active_mut().remove(id) else {
                continue;
            };
            removal.ids.insert(*id);

            // in history mode the registered entry is the live one
            let registered = if history {
                maps.live_mut().remove(id)
            } else {
                Some(entry)
            };
            if let Some(live) = registered.filter(|e| e.is_existing()) {
                removal.entries.push(live);
            }
        }

        if !removal.ids.is_empty() {
            info!(count = removal.ids.len(), "Removed tags from the cache");
            self.metrics.record_tags_removed(removal.ids.len());
            self.metrics.update_entry_count(maps.live().len());
        }
        removal
    }

    /// Unregisters entries from the push registry and supervision routing.
    ///
    /// Failures are logged and otherwise ignored.
    pub(crate) async fn unregister_entries(&self, entries: Vec<Arc<TagEntry>>) {
        for entry in entries {
            let id = entry.id();
            if self.registry.is_registered(id, &entry) {
                if let Err(e) = self.registry.unregister(id, &entry).await {
                    warn!(tag_id = %id, error = %e, "Could not unregister tag from the push registry");
                }
            }
            if let Err(e) = self.supervision.remove_supervision_listener(&entry) {
                warn!(tag_id = %id, error = %e, "Could not remove tag from supervision routing");
            }
        }
    }

    // ============================================
    // Refresh
    // ============================================

    /// Re-reads tags from the server.
    ///
    /// With `None`, or while a connectivity fault is outstanding, the whole
    /// live map is refreshed. Tags the server no longer returns are flagged
    /// unknown and unregistered. Success clears the fault flags.
    pub async fn refresh(&self, ids: Option<&BTreeSet<TagId>>) -> Result<(), CacheError> {
        self.supervision.refresh_supervision_status();
        let _refresh = self.refresh_lock.lock().await;
        self.synchronize(ids).await
    }

    async fn synchronize(&self, ids: Option<&BTreeSet<TagId>>) -> Result<(), CacheError> {
        let targets: BTreeSet<TagId> = {
            let maps = self.store.read();
            match ids {
                Some(ids) if !self.state.has_fault() => ids
                    .iter()
                    .filter(|id| maps.live().contains_key(id))
                    .copied()
                    .collect(),
                _ => maps.live().keys().copied().collect(),
            }
        };

        if !targets.is_empty() {
            info!(count = targets.len(), "Synchronizing live cache entries with the server");

            let updates = match self
                .call("fetch_by_ids", self.service.fetch_by_ids(&targets))
                .await
            {
                Ok(updates) => updates,
                Err(cause) => {
                    warn!(error = %cause, "Live cache refresh failed");
                    self.state.record_failure(cause.to_string());
                    self.metrics.record_refresh(false);
                    return Err(CacheError::synchronization(
                        "could not refresh tags in the live cache",
                        cause,
                    ));
                },
            };

            let unknown_before: BTreeSet<TagId> = {
                let maps = self.store.read();
                targets
                    .iter()
                    .filter(|id| maps.live().get(id).is_some_and(|e| !e.is_existing()))
                    .copied()
                    .collect()
            };

            let known = self.apply_updates(&updates, false);
            let (vanished, revived): (Vec<Arc<TagEntry>>, BTreeSet<TagId>) = {
                let maps = self.store.read();
                let vanished = targets
                    .difference(&known)
                    .filter_map(|id| maps.live().get(id).cloned())
                    .filter(|e| e.is_existing())
                    .collect();
                let revived = unknown_before
                    .intersection(&known)
                    .filter(|id| maps.live().get(id).is_some_and(|e| e.is_existing()))
                    .copied()
                    .collect();
                (vanished, revived)
            };

            // tags the server learned about since they were cached
            if !revived.is_empty() {
                debug!(count = revived.len(), "Previously unknown tags are now known");
                self.subscribe_tags(revived);
            }

            if !vanished.is_empty() {
                warn!(count = vanished.len(), "Tags no longer known by the server");
                self.unregister_entries(vanished.clone()).await;
                for entry in &vanished {
                    entry.mark_unknown();
                }
            }
        }

        self.state.record_success();
        self.metrics.record_refresh(true);
        Ok(())
    }

    // ============================================
    // Push-update subscription
    // ============================================

    /// Registers the given tags for push updates in the background.
    ///
    /// The task first registers every cached and known tag that is not yet
    /// registered, then fetches the current values of exactly those tags.
    /// The second step catches updates the server published between the
    /// initial fetch and the moment the registration took effect.
    pub fn subscribe_tags(&self, ids: BTreeSet<TagId>) {
        if ids.is_empty() {
            return;
        }
        let engine = self.clone();
        self.workers
            .spawn(async move { engine.run_subscription_task(ids).await });
    }

    async fn run_subscription_task(&self, ids: BTreeSet<TagId>) {
        self.metrics.record_subscription_task();

        let entries: Vec<Arc<TagEntry>> = {
            let maps = self.store.read();
            ids.iter()
                .filter_map(|id| maps.live().get(id).cloned())
                .filter(|e| e.is_existing())
                .collect()
        };

        let mut registered = BTreeMap::new();
        for entry in entries {
            let id = entry.id();
            if self.registry.is_registered(id, &entry) {
                continue;
            }
            match self.registry.register(id, entry.clone()).await {
                Ok(()) => {
                    registered.insert(id, entry);
                },
                Err(e) => {
                    warn!(tag_id = %id, error = %e, "Could not register tag for push updates");
                },
            }
        }

        // entries removed while we were registering must not stay registered
        let stale: Vec<Arc<TagEntry>> = {
            let maps = self.store.read();
            registered
                .values()
                .filter(|e| !maps.live().get(&e.id()).is_some_and(|live| Arc::ptr_eq(live, e)))
                .cloned()
                .collect()
        };
        for entry in &stale {
            registered.remove(&entry.id());
        }
        if !stale.is_empty() {
            self.unregister_entries(stale).await;
        }

        if registered.is_empty() {
            return;
        }

        let newly: BTreeSet<TagId> = registered.keys().copied().collect();
        match self
            .call("fetch_current_values", self.service.fetch_current_values(&newly))
            .await
        {
            Ok(values) => {
                for value in &values {
                    if let Some(entry) = registered.get(&value.id) {
                        entry.apply_value_update(value);
                    }
                }
                debug!(count = newly.len(), "Subscribed tags to push updates");
            },
            Err(e) => {
                error!(
                    count = newly.len(),
                    error = %e,
                    "Could not synchronize values of newly subscribed tags"
                );
            },
        }
    }

    /// Waits until every queued signal and subscription task is done.
    pub async fn await_idle(&self) {
        self.signals.wait_idle().await;
        self.workers.drain().await;
    }

    // ============================================
    // Uncached lookups
    // ============================================

    /// Fetches tags without adding them to the cache.
    ///
    /// Ids the server does not know come back as unknown placeholders.
    pub async fn fetch_detached(&self, ids: &BTreeSet<TagId>) -> Result<Vec<Tag>, CacheError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let updates = self
            .call("fetch_by_ids", self.service.fetch_by_ids(ids))
            .await
            .map_err(|cause| {
                CacheError::synchronization(format!("could not fetch {} tags", ids.len()), cause)
            })?;

        let mut found: BTreeMap<TagId, Tag> = updates
            .iter()
            .map(|u| (u.id(), detached_snapshot(u)))
            .collect();

        Ok(ids
            .iter()
            .map(|id| found.remove(id).unwrap_or_else(|| Tag::unknown(*id)))
            .collect())
    }

    /// Resolves tags by name patterns without adding them to the cache.
    pub async fn fetch_detached_by_pattern(
        &self,
        patterns: &[String],
    ) -> Result<Vec<Tag>, CacheError> {
        if patterns.is_empty() {
            return Ok(Vec::new());
        }

        let updates = self
            .call(
                "fetch_by_name_patterns",
                self.service.fetch_by_name_patterns(patterns),
            )
            .await
            .map_err(|cause| {
                CacheError::synchronization(
                    format!("could not resolve tags for patterns {patterns:?}"),
                    cause,
                )
            })?;

        Ok(updates.iter().map(detached_snapshot).collect())
    }

    // ============================================
    // Heartbeat and connection signals
    // ============================================

    /// Invalidates the live cache after the server heartbeat expired.
    pub async fn handle_heartbeat_expired(&self) {
        let _refresh = self.refresh_lock.lock().await;
        if self.state.is_heartbeat_expired() {
            return;
        }

        info!("Server heartbeat expired, invalidating the live cache");
        self.invalidate_live(QualityStatus::ServerHeartbeatExpired, HEARTBEAT_EXPIRED_MSG);
        self.state.set_heartbeat_expired(true);
    }

    /// Clears the heartbeat invalidation and refreshes if a fault was
    /// outstanding.
    pub async fn handle_heartbeat_resumed(&self) {
        let _refresh = self.refresh_lock.lock().await;
        self.validate_live(QualityStatus::ServerHeartbeatExpired);

        if self.state.has_fault() {
            info!("Server heartbeat resumed, refreshing the live cache");
            if let Err(e) = self.synchronize(None).await {
                error!(error = %e, "Could not refresh the live cache after heartbeat resumed");
            }
        }
    }

    /// Invalidates the live cache after the broker connection was lost.
    pub async fn handle_connection_lost(&self) {
        let _refresh = self.refresh_lock.lock().await;
        if self.state.is_connection_down() {
            return;
        }

        info!("Broker connection lost, invalidating the live cache");
        self.invalidate_live(QualityStatus::ConnectionDown, CONNECTION_LOST_MSG);
        self.state.set_connection_down(true);
    }

    /// Clears the connection invalidation and refreshes if a fault was
    /// outstanding.
    pub async fn handle_connection_established(&self) {
        let _refresh = self.refresh_lock.lock().await;
        self.validate_live(QualityStatus::ConnectionDown);

        if self.state.has_fault() {
            info!("Broker connection established, refreshing the live cache");
            if let Err(e) = self.synchronize(None).await {
                error!(error = %e, "Could not refresh the live cache after reconnection");
            }
        }
    }

    fn live_entries(&self) -> Vec<Arc<TagEntry>> {
        self.store.read().live().values().cloned().collect()
    }

    fn invalidate_live(&self, status: QualityStatus, description: &str) {
        for entry in self.live_entries() {
            entry.invalidate(status, description);
        }
    }

    fn validate_live(&self, status: QualityStatus) {
        for entry in self.live_entries() {
            entry.validate(status);
        }
    }

    async fn dispatch_signals(self, mut rx: mpsc::UnboundedReceiver<Signal>) {
        while let Some(signal) = rx.recv().await {
            debug!(?signal, "Handling signal");
            match signal {
                Signal::HeartbeatExpired => self.handle_heartbeat_expired().await,
                Signal::HeartbeatResumed => self.handle_heartbeat_resumed().await,
                Signal::ConnectionLost => self.handle_connection_lost().await,
                Signal::ConnectionEstablished => self.handle_connection_established().await,
            }
            self.signals.finish();
        }
    }

    /// Runs a service call with the configured timeout and records its
    /// duration.
    async fn call<T, F>(&self, operation: &'static str, request: F) -> Result<T, ServiceError>
    where
        F: Future<Output = Result<T, ServiceError>>,
    {
        let timeout = self.config.request_timeout();
        let started = Instant::now();

        let result = tokio::time::timeout(timeout, request)
            .await
            .unwrap_or_else(|_| {
                Err(ServiceError::Timeout {
                    millis: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
                })
            });

        self.metrics.record_request(operation, started.elapsed());
        result
    }
}

fn detached_snapshot(update: &TagUpdate) -> Tag {
    let entry = TagEntry::unknown(update.id());
    entry.apply_tag_update(update);
    entry.snapshot()
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    HeartbeatExpired,
    HeartbeatResumed,
    ConnectionLost,
    ConnectionEstablished,
}

/// Counts signals queued but not yet handled.
#[derive(Debug, Default)]
struct SignalTracker {
    pending: AtomicUsize,
    idle: Notify,
}

impl SignalTracker {
    fn start(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    fn finish(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }

    async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Listener registered with the supervision source. Forwards signals from
/// transport threads to the engine's dispatcher task.
struct SignalForwarder {
    tx: mpsc::UnboundedSender<Signal>,
    tracker: Arc<SignalTracker>,
}

impl SignalForwarder {
    fn forward(&self, signal: Signal) {
        self.tracker.start();
        if self.tx.send(signal).is_err() {
            self.tracker.finish();
            debug!(?signal, "Signal dispatcher stopped, dropping signal");
        }
    }
}

impl HeartbeatListener for SignalForwarder {
    fn on_heartbeat_expired(&self) {
        self.forward(Signal::HeartbeatExpired);
    }

    fn on_heartbeat_resumed(&self) {
        self.forward(Signal::HeartbeatResumed);
    }
}

impl ConnectionListener for SignalForwarder {
    fn on_connection_lost(&self) {
        self.forward(Signal::ConnectionLost);
    }

    fn on_connection_established(&self) {
        self.forward(Signal::ConnectionEstablished);
    }
}
