//! Cache entries.
//!
//! A [`TagEntry`] owns the mutable state of one tag and the set of listeners
//! subscribed to it. Value state is guarded by an entry-local lock so that
//! push updates for the same tag, arriving on different transport threads,
//! are applied one at a time. Listeners are always notified after that lock
//! has been released.

use std::collections::BTreeMap;

use indexmap::IndexSet;
use parking_lot::{Mutex, RwLock};
use tracing::trace;

use tagsync_core::{
    QualityStatus, Routing, SupervisionEntity, SupervisionEvent, Tag, TagId, TagQuality,
    TagUpdate, TagValueUpdate,
};

use crate::listener::ListenerHandle;

/// One tag in the cache.
#[derive(Debug)]
pub struct TagEntry {
    id: TagId,
    state: RwLock<EntryState>,
    listeners: Mutex<IndexSet<ListenerHandle>>,
}

#[derive(Debug, Clone)]
struct EntryState {
    tag: Tag,
    /// Last supervision event per routed entity.
    supervision: BTreeMap<(SupervisionEntity, u64), SupervisionEvent>,
}

impl TagEntry {
    /// Creates a placeholder for a tag the server has not described yet.
    pub fn unknown(id: TagId) -> Self {
        Self::from_snapshot(Tag::unknown(id))
    }

    /// Creates an entry holding the given snapshot and no listeners.
    pub fn from_snapshot(tag: Tag) -> Self {
        Self {
            id: tag.id,
            state: RwLock::new(EntryState {
                tag,
                supervision: BTreeMap::new(),
            }),
            listeners: Mutex::new(IndexSet::new()),
        }
    }

    /// Returns an independent copy of this entry's value state.
    ///
    /// The copy starts with an empty listener set and shares nothing with the
    /// original.
    pub fn clone_detached(&self) -> Self {
        let state = self.state.read().clone();
        Self {
            id: self.id,
            state: RwLock::new(state),
            listeners: Mutex::new(IndexSet::new()),
        }
    }

    /// Returns the tag id.
    pub fn id(&self) -> TagId {
        self.id
    }

    /// Returns a snapshot of the current state.
    pub fn snapshot(&self) -> Tag {
        self.state.read().tag.clone()
    }

    /// Returns true if the server knows this tag.
    pub fn is_existing(&self) -> bool {
        self.state.read().tag.is_existing()
    }

    /// Returns true if the tag name equals `name`, ignoring case.
    pub fn has_name(&self, name: &str) -> bool {
        self.state
            .read()
            .tag
            .name
            .as_deref()
            .is_some_and(|n| n.eq_ignore_ascii_case(name))
    }

    /// Returns the supervision routing of the tag.
    pub fn routing(&self) -> Routing {
        self.state.read().tag.routing.clone()
    }

    /// Returns true if supervision events must be routed to this entry.
    pub fn accepts_supervision(&self) -> bool {
        self.state.read().tag.accepts_supervision()
    }

    // ============================================
    // Value updates
    // ============================================

    /// Applies a full tag description.
    ///
    /// Returns false if the update is older than the current state.
    pub fn apply_tag_update(&self, update: &TagUpdate) -> bool {
        let snapshot = {
            let mut state = self.state.write();
            if !is_valid_update(&state.tag, &update.value, true) {
                return false;
            }

            apply_values(&mut state.tag, &update.value);

            let tag = &mut state.tag;
            tag.name = Some(update.name.clone());
            tag.unit = update.unit.clone();
            tag.topic_name = update.topic_name.clone();
            tag.routing = update.routing.clone();
            tag.alive_tag = update.alive_tag;
            tag.control_tag = update.control_tag;
            tag.rule_expression = update.rule_expression.clone();
            tag.metadata = update.metadata.clone();

            let routing = update.routing.clone();
            state
                .supervision
                .retain(|(entity, id), _| routes(&routing, *entity, *id));

            state.tag.clone()
        };

        self.notify(&snapshot);
        true
    }

    /// Applies a value update received from the push feed or a value request.
    ///
    /// Returns false if the update is older than the current state.
    pub fn apply_value_update(&self, update: &TagValueUpdate) -> bool {
        let snapshot = {
            let mut state = self.state.write();
            if !is_valid_update(&state.tag, update, false) {
                return false;
            }
            apply_values(&mut state.tag, update);
            state.tag.clone()
        };

        self.notify(&snapshot);
        true
    }

    /// Overwrites the value state without any ordering check.
    ///
    /// Used for history entries, where playback may move backwards in time.
    pub fn replace_value(&self, update: &TagValueUpdate) -> bool {
        if update.id != self.id {
            return false;
        }

        let snapshot = {
            let mut state = self.state.write();
            let tag = &mut state.tag;
            tag.value = update.value.clone();
            tag.value_description = update.value_description.clone();
            tag.description = update.description.clone();
            tag.quality = update.quality.clone();
            tag.mode = update.mode;
            tag.simulated = update.simulated;
            if let Some(ts) = update.server_timestamp {
                tag.server_timestamp = ts;
            }
            tag.daq_timestamp = update.daq_timestamp;
            tag.source_timestamp = update.source_timestamp;
            state.tag.clone()
        };

        self.notify(&snapshot);
        true
    }

    /// Adds an invalid status, keeping the current value.
    pub fn invalidate(&self, status: QualityStatus, description: &str) {
        let snapshot = {
            let mut state = self.state.write();
            if !state.tag.quality.add_invalid_status(status, description) {
                return;
            }
            state.tag.clone()
        };

        trace!(tag_id = %self.id, %status, "Tag invalidated");
        self.notify(&snapshot);
    }

    /// Removes an invalid status, if it was set.
    pub fn validate(&self, status: QualityStatus) {
        let snapshot = {
            let mut state = self.state.write();
            if !state.tag.quality.remove_invalid_status(status) {
                return;
            }
            state.tag.clone()
        };

        trace!(tag_id = %self.id, %status, "Tag validated");
        self.notify(&snapshot);
    }

    /// Flags the tag as unknown to the server, keeping listeners and value.
    pub fn mark_unknown(&self) {
        let snapshot = {
            let mut state = self.state.write();
            state.tag.quality = TagQuality::unknown();
            state.supervision.clear();
            state.tag.clone()
        };

        self.notify(&snapshot);
    }

    /// Applies a supervision event if the tag is routed to its entity.
    ///
    /// Returns true if the event was accepted.
    pub fn on_supervision_event(&self, event: &SupervisionEvent) -> bool {
        let snapshot = {
            let mut state = self.state.write();
            if !state.tag.accepts_supervision()
                || !routes(&state.tag.routing, event.entity, event.entity_id)
            {
                return false;
            }

            let previous = state
                .supervision
                .insert((event.entity, event.entity_id), event.clone());

            let down: Vec<String> = state
                .supervision
                .iter()
                .filter(|((entity, _), e)| *entity == event.entity && e.status.is_down())
                .map(|((entity, id), e)| {
                    if e.message.is_empty() {
                        format!("{entity} {id} is down")
                    } else {
                        e.message.clone()
                    }
                })
                .collect();

            let status = event.entity.down_status();
            let quality_changed = if down.is_empty() {
                state.tag.quality.remove_invalid_status(status)
            } else {
                state.tag.quality.add_invalid_status(status, down.join("; "))
            };

            if !quality_changed && previous.as_ref() == Some(event) {
                return true;
            }
            state.tag.clone()
        };

        self.notify(&snapshot);
        true
    }

    // ============================================
    // Listeners
    // ============================================

    /// Adds a listener without notifying it. Returns false if it was already
    /// registered.
    pub fn add_listener(&self, listener: ListenerHandle) -> bool {
        self.listeners.lock().insert(listener)
    }

    /// Sends the current state to a listener unless it equals `initial`.
    pub fn send_initial_update(&self, listener: &ListenerHandle, initial: Option<&Tag>) {
        let snapshot = self.snapshot();
        if initial != Some(&snapshot) {
            listener.on_update(&snapshot);
        }
    }

    /// Removes a listener. Removing an absent listener is a no-op.
    pub fn remove_listener(&self, listener: &ListenerHandle) -> bool {
        self.listeners.lock().shift_remove(listener)
    }

    /// Returns true if the listener is registered on this entry.
    pub fn has_listener(&self, listener: &ListenerHandle) -> bool {
        self.listeners.lock().contains(listener)
    }

    /// Returns true if at least one listener is registered.
    pub fn has_listeners(&self) -> bool {
        !self.listeners.lock().is_empty()
    }

    /// Returns the registered listeners in registration order.
    pub fn listeners(&self) -> Vec<ListenerHandle> {
        self.listeners.lock().iter().cloned().collect()
    }

    /// Removes and returns every listener.
    pub fn take_listeners(&self) -> IndexSet<ListenerHandle> {
        std::mem::take(&mut *self.listeners.lock())
    }

    /// Adds the given listeners without notifying them.
    pub fn adopt_listeners(&self, listeners: IndexSet<ListenerHandle>) {
        self.listeners.lock().extend(listeners);
    }

    fn notify(&self, snapshot: &Tag) {
        let listeners = self.listeners();
        for listener in listeners {
            listener.on_update(snapshot);
        }
    }
}

fn routes(routing: &Routing, entity: SupervisionEntity, id: u64) -> bool {
    match entity {
        SupervisionEntity::Process => routing.process_ids.contains(&id),
        SupervisionEntity::Equipment => routing.equipment_ids.contains(&id),
        SupervisionEntity::SubEquipment => routing.sub_equipment_ids.contains(&id),
    }
}

/// Decides whether an incoming update is newer than the current state.
///
/// Server timestamps are compared first, then DAQ timestamps, then source
/// timestamps. Source timestamps need not be monotonic, so any change is
/// accepted on a tie. Full descriptions (`full`) are also accepted on an
/// exact tie, and always for tags the server did not describe before.
fn is_valid_update(current: &Tag, update: &TagValueUpdate, full: bool) -> bool {
    if update.id != current.id {
        return false;
    }
    let Some(server_ts) = update.server_timestamp else {
        return false;
    };
    if full && !current.is_existing() {
        return true;
    }
    if server_ts != current.server_timestamp {
        return server_ts > current.server_timestamp;
    }

    let Some(daq_ts) = update.daq_timestamp else {
        return false;
    };
    let Some(current_daq) = current.daq_timestamp else {
        return true;
    };
    if daq_ts != current_daq {
        return daq_ts > current_daq;
    }

    match (update.source_timestamp, current.source_timestamp) {
        (Some(_), None) => true,
        (Some(new), Some(old)) => full || new != old,
        (None, None) => full,
        (None, Some(_)) => false,
    }
}

fn apply_values(tag: &mut Tag, update: &TagValueUpdate) {
    merge_quality(&mut tag.quality, &update.quality);
    tag.value = update.value.clone();
    tag.value_description = update.value_description.clone();
    tag.description = update.description.clone();
    tag.mode = update.mode;
    tag.simulated = update.simulated;
    if let Some(ts) = update.server_timestamp {
        tag.server_timestamp = ts;
    }
    tag.daq_timestamp = update.daq_timestamp;
    tag.source_timestamp = update.source_timestamp;
}

/// Takes the incoming quality but keeps supervision down flags while the tag
/// is inaccessible; those are owned by supervision events, not by updates.
fn merge_quality(current: &mut TagQuality, incoming: &TagQuality) {
    if current.is_accessible() {
        *current = incoming.clone();
        return;
    }

    let kept: Vec<(QualityStatus, String)> = current
        .invalid_states()
        .iter()
        .filter(|(status, _)| status.is_supervision_status())
        .map(|(status, desc)| (*status, desc.clone()))
        .collect();

    *current = incoming.clone();
    for (status, desc) in kept {
        current.add_invalid_status(status, desc);
    }
}
