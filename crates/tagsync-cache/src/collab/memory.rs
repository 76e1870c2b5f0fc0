//! In-memory collaborators.
//!
//! [`InMemoryTagServer`] plays the server side of every collaborator at once:
//! it answers requests from a tag table held in memory, delivers published
//! values to registered entries and forwards heartbeat, connection and
//! supervision signals. It records the requests it receives and can be told
//! to fail, which makes it the test double for the whole cache.

use std::collections::{BTreeMap, BTreeSet, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::debug;

use tagsync_core::{
    NamePattern, RegistryError, Routing, ServiceError, SupervisionEvent, TagId, TagUpdate,
    TagValueUpdate,
};

use super::traits::{
    ConnectionListener, HeartbeatListener, PushRegistry, RequestService, SupervisionSource,
};
use crate::entry::TagEntry;

/// A request received by the in-memory server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RequestCall {
    ByIds(BTreeSet<TagId>),
    ByNamePatterns(Vec<String>),
    CurrentValues(BTreeSet<TagId>),
}

/// Server-side state shared by all in-memory collaborators.
#[derive(Default)]
pub struct InMemoryTagServer {
    tags: RwLock<BTreeMap<TagId, TagUpdate>>,
    registered: Mutex<HashMap<TagId, Arc<TagEntry>>>,
    supervised: Mutex<HashMap<TagId, (Arc<TagEntry>, Routing)>>,
    heartbeat_listeners: Mutex<Vec<Arc<dyn HeartbeatListener>>>,
    connection_listeners: Mutex<Vec<Arc<dyn ConnectionListener>>>,
    one_shot_failures: Mutex<VecDeque<ServiceError>>,
    persistent_failure: Mutex<Option<ServiceError>>,
    registry_failure: Mutex<Option<RegistryError>>,
    in_flight: Mutex<HashMap<TagId, Value>>,
    calls: Mutex<Vec<RequestCall>>,
    latency: Mutex<Option<Duration>>,
    clock: AtomicI64,
}

impl InMemoryTagServer {
    /// Creates an empty server.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a fresh server timestamp, strictly increasing per server.
    pub fn next_timestamp(&self) -> DateTime<Utc> {
        let tick = self.clock.fetch_add(1, Ordering::Relaxed) + 1;
        DateTime::<Utc>::UNIX_EPOCH + TimeDelta::days(20_000) + TimeDelta::milliseconds(tick)
    }

    // ============================================
    // Server-side tag table
    // ============================================

    /// Adds or replaces a tag description.
    pub fn define(&self, update: TagUpdate) {
        self.tags.write().insert(update.id(), update);
    }

    /// Defines a tag with the given name and value, timestamped now.
    pub fn define_tag(&self, id: u64, name: &str, value: impl Into<Value>) -> TagUpdate {
        let id = TagId::new(id);
        let update = TagUpdate::new(name, TagValueUpdate::new(id, value, self.next_timestamp()));
        self.define(update.clone());
        update
    }

    /// Removes a tag from the server.
    pub fn forget(&self, id: TagId) -> bool {
        self.tags.write().remove(&id).is_some()
    }

    /// Returns the server-side description of a tag.
    pub fn tag(&self, id: TagId) -> Option<TagUpdate> {
        self.tags.read().get(&id).cloned()
    }

    /// Changes a tag value on the server without publishing it.
    ///
    /// Returns the resulting value update, or `None` for unknown tags.
    pub fn set_value(&self, id: TagId, value: impl Into<Value>) -> Option<TagValueUpdate> {
        let ts = self.next_timestamp();
        let mut tags = self.tags.write();
        let tag = tags.get_mut(&id)?;
        tag.value.value = Some(value.into());
        tag.value.server_timestamp = Some(ts);
        Some(tag.value.clone())
    }

    /// Changes a tag value and pushes it to the registered entry, if any.
    pub fn publish(&self, id: TagId, value: impl Into<Value>) -> Option<TagValueUpdate> {
        let update = self.set_value(id, value)?;
        self.publish_update(&update);
        Some(update)
    }

    /// Pushes an arbitrary update to the registered entry, if any.
    pub fn publish_update(&self, update: &TagValueUpdate) -> bool {
        let entry = self.registered.lock().get(&update.id).cloned();
        match entry {
            Some(entry) => entry.apply_value_update(update),
            None => false,
        }
    }

    /// Arranges for `value` to be published for `id` while its registration
    /// is in flight: the server state changes, but the entry is not yet
    /// registered and does not receive the push.
    pub fn queue_in_flight_update(&self, id: TagId, value: impl Into<Value>) {
        self.in_flight.lock().insert(id, value.into());
    }

    // ============================================
    // Failure injection and inspection
    // ============================================

    /// Fails the next request with `error`.
    pub fn fail_next_request(&self, error: ServiceError) {
        self.one_shot_failures.lock().push_back(error);
    }

    /// Fails every request with `error` until cleared with `None`.
    pub fn fail_all_requests(&self, error: Option<ServiceError>) {
        *self.persistent_failure.lock() = error;
    }

    /// Fails every unregistration with `error` until cleared with `None`.
    pub fn fail_unregistrations(&self, error: Option<RegistryError>) {
        *self.registry_failure.lock() = error;
    }

    /// Delays every request by `latency`.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.latency.lock() = latency;
    }

    /// Requests received so far.
    pub fn calls(&self) -> Vec<RequestCall> {
        self.calls.lock().clone()
    }

    /// Forgets the recorded requests.
    pub fn clear_calls(&self) {
        self.calls.lock().clear();
    }

    /// Returns true if an entry is registered for push updates of `id`.
    pub fn is_registered_id(&self, id: TagId) -> bool {
        self.registered.lock().contains_key(&id)
    }

    /// Ids registered for push updates.
    pub fn registered_ids(&self) -> BTreeSet<TagId> {
        self.registered.lock().keys().copied().collect()
    }

    /// Ids registered for supervision routing.
    pub fn supervised_ids(&self) -> BTreeSet<TagId> {
        self.supervised.lock().keys().copied().collect()
    }

    // ============================================
    // Signals
    // ============================================

    /// Signals that the server heartbeat expired.
    pub fn fire_heartbeat_expired(&self) {
        for listener in self.heartbeat_listeners.lock().clone() {
            listener.on_heartbeat_expired();
        }
    }

    /// Signals that the server heartbeat resumed.
    pub fn fire_heartbeat_resumed(&self) {
        for listener in self.heartbeat_listeners.lock().clone() {
            listener.on_heartbeat_resumed();
        }
    }

    /// Signals that the broker connection was lost.
    pub fn fire_connection_lost(&self) {
        for listener in self.connection_listeners.lock().clone() {
            listener.on_connection_lost();
        }
    }

    /// Signals that the broker connection is up.
    pub fn fire_connection_established(&self) {
        for listener in self.connection_listeners.lock().clone() {
            listener.on_connection_established();
        }
    }

    /// Delivers a supervision event to every routed entry.
    ///
    /// Returns the number of entries that accepted the event.
    pub fn publish_supervision(&self, event: &SupervisionEvent) -> usize {
        let entries: Vec<Arc<TagEntry>> = self
            .supervised
            .lock()
            .values()
            .map(|(entry, _)| entry.clone())
            .collect();

        entries
            .iter()
            .filter(|entry| entry.on_supervision_event(event))
            .count()
    }

    async fn begin_request(&self, call: RequestCall) -> Result<(), ServiceError> {
        self.calls.lock().push(call);

        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }

        if let Some(error) = self.one_shot_failures.lock().pop_front() {
            return Err(error);
        }
        match self.persistent_failure.lock().clone() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl RequestService for InMemoryTagServer {
    async fn fetch_by_ids(&self, ids: &BTreeSet<TagId>) -> Result<Vec<TagUpdate>, ServiceError> {
        self.begin_request(RequestCall::ByIds(ids.clone())).await?;

        let tags = self.tags.read();
        Ok(ids.iter().filter_map(|id| tags.get(id).cloned()).collect())
    }

    async fn fetch_by_name_patterns(
        &self,
        patterns: &[String],
    ) -> Result<Vec<TagUpdate>, ServiceError> {
        self.begin_request(RequestCall::ByNamePatterns(patterns.to_vec()))
            .await?;

        let compiled = patterns
            .iter()
            .map(|p| NamePattern::new(p).map_err(|e| ServiceError::rejected(e.to_string())))
            .collect::<Result<Vec<_>, _>>()?;

        let tags = self.tags.read();
        Ok(tags
            .values()
            .filter(|tag| compiled.iter().any(|p| p.matches(&tag.name)))
            .cloned()
            .collect())
    }

    async fn fetch_current_values(
        &self,
        ids: &BTreeSet<TagId>,
    ) -> Result<Vec<TagValueUpdate>, ServiceError> {
        self.begin_request(RequestCall::CurrentValues(ids.clone()))
            .await?;

        let tags = self.tags.read();
        Ok(ids
            .iter()
            .filter_map(|id| tags.get(id).map(|t| t.value.clone()))
            .collect())
    }
}

#[async_trait]
impl PushRegistry for InMemoryTagServer {
    async fn register(&self, id: TagId, entry: Arc<TagEntry>) -> Result<(), RegistryError> {
        let pending = self.in_flight.lock().remove(&id);
        if let Some(value) = pending {
            debug!(tag_id = %id, "Publishing update while registration is in flight");
            self.set_value(id, value);
        }

        self.registered.lock().insert(id, entry);
        Ok(())
    }

    async fn unregister(&self, id: TagId, entry: &Arc<TagEntry>) -> Result<(), RegistryError> {
        if let Some(error) = self.registry_failure.lock().clone() {
            return Err(error);
        }

        let mut registered = self.registered.lock();
        if registered.get(&id).is_some_and(|e| Arc::ptr_eq(e, entry)) {
            registered.remove(&id);
        }
        Ok(())
    }

    fn is_registered(&self, id: TagId, entry: &Arc<TagEntry>) -> bool {
        self.registered
            .lock()
            .get(&id)
            .is_some_and(|e| Arc::ptr_eq(e, entry))
    }
}

impl SupervisionSource for InMemoryTagServer {
    fn add_heartbeat_listener(&self, listener: Arc<dyn HeartbeatListener>) {
        self.heartbeat_listeners.lock().push(listener);
    }

    fn add_connection_listener(&self, listener: Arc<dyn ConnectionListener>) {
        self.connection_listeners.lock().push(listener);
    }

    fn add_supervision_listener(
        &self,
        entry: &Arc<TagEntry>,
        routing: &Routing,
    ) -> Result<(), RegistryError> {
        self.supervised
            .lock()
            .insert(entry.id(), (entry.clone(), routing.clone()));
        Ok(())
    }

    fn remove_supervision_listener(&self, entry: &Arc<TagEntry>) -> Result<(), RegistryError> {
        if let Some(error) = self.registry_failure.lock().clone() {
            return Err(error);
        }

        let mut supervised = self.supervised.lock();
        if supervised
            .get(&entry.id())
            .is_some_and(|(e, _)| Arc::ptr_eq(e, entry))
        {
            supervised.remove(&entry.id());
        }
        Ok(())
    }
}
