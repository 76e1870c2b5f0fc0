//! Listener attachment and subscription bookkeeping.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, info};

use tagsync_core::{CacheError, Tag, TagId};

use crate::entry::TagEntry;
use crate::listener::{InitialDelivery, ListenerHandle, TagSubscriptionListener};
use crate::store::TagCacheStore;
use crate::sync::SynchronizationEngine;

/// Attaches and detaches listeners, creating and evicting entries as needed.
pub struct SubscriptionCoordinator {
    store: Arc<TagCacheStore>,
    engine: SynchronizationEngine,
    observers: Mutex<Vec<Arc<dyn TagSubscriptionListener>>>,
}

impl SubscriptionCoordinator {
    /// Creates a coordinator working on the engine's store.
    pub fn new(engine: SynchronizationEngine) -> Self {
        Self {
            store: engine.store().clone(),
            engine,
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Subscribes `listener` to every id in `ids`.
    ///
    /// Ids not cached yet are initialised from the server first; if that
    /// fails nothing is attached and the error is returned. The listener
    /// then receives the current state of every id, either inline or through
    /// one `on_initial_update` call.
    ///
    /// Tags evicted by a concurrent unsubscribe before the listener could be
    /// attached are initialised again. If that second initialisation fails
    /// the error is returned, but the listener stays attached to the tags it
    /// already received, and those are registered for push updates.
    pub async fn subscribe(
        &self,
        ids: &BTreeSet<TagId>,
        listener: &ListenerHandle,
        delivery: InitialDelivery,
    ) -> Result<(), CacheError> {
        if ids.is_empty() {
            return Ok(());
        }

        let created = self.engine.init_tags(ids).await?;
        self.attach_all(ids, listener, delivery, created).await
    }

    /// Subscribes `listener` to every tag whose name matches one of
    /// `patterns`. Returns the matched ids.
    pub async fn subscribe_by_pattern(
        &self,
        patterns: &[String],
        listener: &ListenerHandle,
        delivery: InitialDelivery,
    ) -> Result<BTreeSet<TagId>, CacheError> {
        let outcome = self.engine.init_tags_by_pattern(patterns).await?;
        if outcome.matched.is_empty() {
            debug!(?patterns, "No tag matches the subscription patterns");
            return Ok(outcome.matched);
        }

        self.attach_all(&outcome.matched, listener, delivery, outcome.created)
            .await?;
        Ok(outcome.matched)
    }

    async fn attach_all(
        &self,
        ids: &BTreeSet<TagId>,
        listener: &ListenerHandle,
        delivery: InitialDelivery,
        mut created: BTreeSet<TagId>,
    ) -> Result<(), CacheError> {
        let mut pending = ids.clone();
        loop {
            let missing = self.attach(&pending, listener, delivery);
            if missing.is_empty() {
                break;
            }

            // evicted by a concurrent unsubscribe between init and attach
            debug!(count = missing.len(), "Re-initialising evicted tags");
            tokio::task::yield_now().await;
            match self.engine.init_tags(&missing).await {
                Ok(more) => created.extend(more),
                Err(e) => {
                    // the listener keeps the entries it is already attached to
                    self.announce(created);
                    return Err(e);
                },
            }
            pending = missing;
        }

        self.announce(created);
        Ok(())
    }

    /// Registers new tags for push updates and notifies the observers.
    fn announce(&self, created: BTreeSet<TagId>) {
        if created.is_empty() {
            return;
        }
        self.notify_new_subscriptions(&created);
        self.engine.subscribe_tags(created);
    }

    /// Attaches the listener to the active entries of `ids` and delivers
    /// their initial state. Returns the ids that had no entry.
    ///
    /// Runs under the mode lock so that a history mode switch can not move
    /// listeners away between the passes.
    fn attach(
        &self,
        ids: &BTreeSet<TagId>,
        listener: &ListenerHandle,
        delivery: InitialDelivery,
    ) -> BTreeSet<TagId> {
        let _mode = self.store.lock_mode();

        match delivery {
            InitialDelivery::Inline => {
                let (attached, missing) = self.add_to_entries(ids, listener, None);
                for (entry, _) in &attached {
                    entry.send_initial_update(listener, None);
                }
                missing
            },
            InitialDelivery::Separate => {
                let snapshots: Vec<Tag> = {
                    let maps = self.store.read();
                    ids.iter()
                        .filter_map(|id| maps.active().get(id))
                        .map(|entry| entry.snapshot())
                        .collect()
                };
                if !snapshots.is_empty() {
                    listener.on_initial_update(&snapshots);
                }

                let (attached, missing) = self.add_to_entries(ids, listener, Some(&snapshots));
                for (entry, initial) in &attached {
                    entry.send_initial_update(listener, initial.as_ref());
                }
                missing
            },
        }
    }

    /// Adds the listener to every present entry while holding the read lock,
    /// so that no entry can be evicted in between.
    #[allow(clippy::type_complexity)]
    fn add_to_entries(
        &self,
        ids: &BTreeSet<TagId>,
        listener: &ListenerHandle,
        snapshots: Option<&[Tag]>,
    ) -> (Vec<(Arc<TagEntry>, Option<Tag>)>, BTreeSet<TagId>) {
        let maps = self.store.read();
        let mut attached = Vec::with_capacity(ids.len());
        let mut missing = BTreeSet::new();

        for id in ids {
            let Some(entry) = maps.active().get(id) else {
                missing.insert(*id);
                continue;
            };
            entry.add_listener(listener.clone());

            let initial = snapshots
                .and_then(|s| s.iter().find(|tag| tag.id == *id))
                .cloned();
            attached.push((entry.clone(), initial));
        }

        (attached, missing)
    }

    /// Removes `listener` from the given ids. Entries left without listeners
    /// are evicted; returns the evicted ids.
    pub async fn unsubscribe(
        &self,
        ids: &BTreeSet<TagId>,
        listener: &ListenerHandle,
    ) -> BTreeSet<TagId> {
        let removal = {
            let mut maps = self.store.write();
            let mut orphaned = BTreeSet::new();

            for id in ids {
                if let Some(entry) = maps.active().get(id) {
                    if entry.remove_listener(listener) && !entry.has_listeners() {
                        orphaned.insert(*id);
                    }
                }
            }
            self.engine.remove_tags_locked(&mut maps, &orphaned)
        };

        self.finish_removal(removal).await
    }

    /// Removes `listener` from every entry it is attached to.
    pub async fn unsubscribe_all(&self, listener: &ListenerHandle) -> BTreeSet<TagId> {
        let removal = {
            let mut maps = self.store.write();
            let mut orphaned = BTreeSet::new();

            for (id, entry) in maps.active() {
                if entry.remove_listener(listener) && !entry.has_listeners() {
                    orphaned.insert(*id);
                }
            }
            self.engine.remove_tags_locked(&mut maps, &orphaned)
        };

        self.finish_removal(removal).await
    }

    async fn finish_removal(&self, removal: crate::sync::Removal) -> BTreeSet<TagId> {
        let removed = removal.ids;
        self.engine.unregister_entries(removal.entries).await;

        if !removed.is_empty() {
            info!(count = removed.len(), "Unsubscribed tags removed from the cache");
            for observer in self.observers() {
                observer.on_unsubscribe(&removed);
            }
        }
        removed
    }

    /// Registers an observer of tags entering and leaving the cache.
    pub fn add_observer(&self, observer: Arc<dyn TagSubscriptionListener>) {
        let mut observers = self.observers.lock();
        if !observers.iter().any(|o| same_observer(o, &observer)) {
            observers.push(observer);
        }
    }

    /// Removes an observer. Removing an unknown observer is a no-op.
    pub fn remove_observer(&self, observer: &Arc<dyn TagSubscriptionListener>) {
        self.observers.lock().retain(|o| !same_observer(o, observer));
    }

    fn observers(&self) -> Vec<Arc<dyn TagSubscriptionListener>> {
        self.observers.lock().clone()
    }

    fn notify_new_subscriptions(&self, ids: &BTreeSet<TagId>) {
        for observer in self.observers() {
            observer.on_new_tag_subscriptions(ids);
        }
    }
}

fn same_observer(a: &Arc<dyn TagSubscriptionListener>, b: &Arc<dyn TagSubscriptionListener>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}
