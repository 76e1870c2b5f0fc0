//! Tag identity and value snapshots.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::quality::TagQuality;

/// Unique identifier of a tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TagId(u64);

impl TagId {
    /// Creates a new tag id.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw id.
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl From<u64> for TagId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for TagId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operational mode of a tag as configured on the server.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagMode {
    /// Tag is in operation.
    Operational,
    /// Tag is being tested.
    #[default]
    Test,
    /// Tag is under maintenance.
    Maintenance,
}

/// Routing metadata used to target supervision events at a tag.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Routing {
    /// Owning process ids.
    #[serde(default)]
    pub process_ids: BTreeSet<u64>,
    /// Owning equipment ids.
    #[serde(default)]
    pub equipment_ids: BTreeSet<u64>,
    /// Owning sub-equipment ids.
    #[serde(default)]
    pub sub_equipment_ids: BTreeSet<u64>,
}

impl Routing {
    /// Returns true if no routing ids are set.
    pub fn is_empty(&self) -> bool {
        self.process_ids.is_empty()
            && self.equipment_ids.is_empty()
            && self.sub_equipment_ids.is_empty()
    }
}

/// Value snapshot of one tag.
///
/// Snapshots are plain values: cloning one never shares state with the cache
/// entry it came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    /// Unique identifier.
    pub id: TagId,
    /// Display name, `None` until the server described the tag.
    pub name: Option<String>,
    /// Current value.
    pub value: Option<Value>,
    /// Description of the current value.
    #[serde(default)]
    pub value_description: String,
    /// Static tag description.
    #[serde(default)]
    pub description: String,
    /// Engineering unit.
    pub unit: Option<String>,
    /// Quality of the current value.
    pub quality: TagQuality,
    /// Server configured mode.
    #[serde(default)]
    pub mode: TagMode,
    /// True if the value is simulated.
    #[serde(default)]
    pub simulated: bool,
    /// Time the server cached the value.
    pub server_timestamp: DateTime<Utc>,
    /// Time the data acquisition layer sent the value.
    pub daq_timestamp: Option<DateTime<Utc>>,
    /// Time the value was produced at the source.
    pub source_timestamp: Option<DateTime<Utc>>,
    /// Supervision routing metadata.
    #[serde(default)]
    pub routing: Routing,
    /// True for alive (heartbeat) control tags.
    #[serde(default)]
    pub alive_tag: bool,
    /// True for control tags (alive, comm-fault, status).
    #[serde(default)]
    pub control_tag: bool,
    /// Topic on which push updates for this tag are published.
    pub topic_name: Option<String>,
    /// Rule expression for rule tags.
    pub rule_expression: Option<String>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl Tag {
    /// Name reported for tags the server did not describe.
    pub const UNKNOWN_NAME: &'static str = "UNKNOWN";

    /// Creates an empty, uninitialised tag.
    pub fn new(id: TagId) -> Self {
        Self {
            id,
            name: None,
            value: None,
            value_description: String::new(),
            description: String::new(),
            unit: None,
            quality: TagQuality::default(),
            mode: TagMode::default(),
            simulated: false,
            server_timestamp: DateTime::<Utc>::UNIX_EPOCH,
            daq_timestamp: None,
            source_timestamp: None,
            routing: Routing::default(),
            alive_tag: false,
            control_tag: false,
            topic_name: None,
            rule_expression: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Creates a placeholder for a tag unknown to the server.
    pub fn unknown(id: TagId) -> Self {
        let mut tag = Self::new(id);
        tag.quality = TagQuality::unknown();
        tag
    }

    /// Returns the display name, or `UNKNOWN`.
    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or(Self::UNKNOWN_NAME)
    }

    /// Returns true if the server knows this tag.
    pub fn is_existing(&self) -> bool {
        self.quality.is_existing_tag()
    }

    /// Returns true if the current value can be trusted.
    pub fn is_valid(&self) -> bool {
        self.quality.is_valid()
    }

    /// Returns true if the tag is a rule tag.
    pub fn is_rule_tag(&self) -> bool {
        self.rule_expression.is_some()
    }

    /// Returns true if supervision events must be routed to this tag.
    ///
    /// Comm-fault and status control tags are excluded, alive tags are not.
    pub fn accepts_supervision(&self) -> bool {
        !self.control_tag || self.alive_tag
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_tag() {
        let tag = Tag::unknown(TagId::new(7));
        assert_eq!(tag.id, TagId::new(7));
        assert_eq!(tag.name(), "UNKNOWN");
        assert!(!tag.is_existing());
        assert!(tag.value.is_none());
        assert_eq!(tag.server_timestamp, DateTime::<Utc>::UNIX_EPOCH);
    }

    #[test]
    fn test_supervision_acceptance() {
        let mut tag = Tag::new(TagId::new(1));
        assert!(tag.accepts_supervision());

        tag.control_tag = true;
        assert!(!tag.accepts_supervision());

        tag.alive_tag = true;
        assert!(tag.accepts_supervision());
    }

    #[test]
    fn test_tag_id_serializes_transparently() {
        let json = serde_json::to_string(&TagId::new(123)).unwrap();
        assert_eq!(json, "123");
        assert_eq!(TagId::from(9u64).to_string(), "9");
    }

    #[test]
    fn test_snapshot_clone_is_independent() {
        let mut original = Tag::new(TagId::new(3));
        original.value = Some(Value::from(1.5));

        let mut copy = original.clone();
        copy.value = Some(Value::from(2.5));
        copy.routing.process_ids.insert(10);

        assert_eq!(original.value, Some(Value::from(1.5)));
        assert!(original.routing.is_empty());
    }
}
