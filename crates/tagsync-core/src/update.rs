//! Update messages delivered by the server.
//!
//! A [`TagValueUpdate`] carries the dynamic part of a tag (value, quality,
//! timestamps) and is what the push-update feed publishes. A [`TagUpdate`]
//! additionally carries the static description of the tag and is returned
//! when the cache initialises or refreshes tags.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::quality::TagQuality;
use crate::tag::{Routing, TagId, TagMode};

/// Dynamic state of a tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagValueUpdate {
    /// Tag the update belongs to.
    pub id: TagId,
    /// New value.
    pub value: Option<Value>,
    /// Description of the value.
    #[serde(default)]
    pub value_description: String,
    /// Tag description.
    #[serde(default)]
    pub description: String,
    /// Quality as computed by the server.
    #[serde(default)]
    pub quality: TagQuality,
    /// Server configured mode.
    #[serde(default)]
    pub mode: TagMode,
    /// True if the value is simulated.
    #[serde(default)]
    pub simulated: bool,
    /// Server cache timestamp. Updates without one are ignored.
    pub server_timestamp: Option<DateTime<Utc>>,
    /// DAQ timestamp.
    pub daq_timestamp: Option<DateTime<Utc>>,
    /// Source timestamp.
    pub source_timestamp: Option<DateTime<Utc>>,
}

impl TagValueUpdate {
    /// Creates a valid update with the given value and server timestamp.
    pub fn new(id: TagId, value: impl Into<Value>, server_timestamp: DateTime<Utc>) -> Self {
        Self {
            id,
            value: Some(value.into()),
            value_description: String::new(),
            description: String::new(),
            quality: TagQuality::valid(),
            mode: TagMode::Operational,
            simulated: false,
            server_timestamp: Some(server_timestamp),
            daq_timestamp: None,
            source_timestamp: None,
        }
    }

    /// Sets the DAQ timestamp.
    pub fn with_daq_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.daq_timestamp = Some(ts);
        self
    }

    /// Sets the source timestamp.
    pub fn with_source_timestamp(mut self, ts: DateTime<Utc>) -> Self {
        self.source_timestamp = Some(ts);
        self
    }

    /// Sets the quality.
    pub fn with_quality(mut self, quality: TagQuality) -> Self {
        self.quality = quality;
        self
    }
}

/// Full description of a tag: static configuration plus current value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TagUpdate {
    /// Current value part.
    #[serde(flatten)]
    pub value: TagValueUpdate,
    /// Tag name.
    pub name: String,
    /// Engineering unit.
    pub unit: Option<String>,
    /// Push topic.
    pub topic_name: Option<String>,
    /// Supervision routing.
    #[serde(default)]
    pub routing: Routing,
    /// Alive control tag flag.
    #[serde(default)]
    pub alive_tag: bool,
    /// Control tag flag.
    #[serde(default)]
    pub control_tag: bool,
    /// Rule expression for rule tags.
    pub rule_expression: Option<String>,
    /// Free-form metadata.
    #[serde(default)]
    pub metadata: BTreeMap<String, Value>,
}

impl TagUpdate {
    /// Creates a tag description from a value update and a name.
    pub fn new(name: impl Into<String>, value: TagValueUpdate) -> Self {
        Self {
            value,
            name: name.into(),
            unit: None,
            topic_name: None,
            routing: Routing::default(),
            alive_tag: false,
            control_tag: false,
            rule_expression: None,
            metadata: BTreeMap::new(),
        }
    }

    /// Returns the tag id.
    pub fn id(&self) -> TagId {
        self.value.id
    }

    /// Sets the supervision routing.
    pub fn with_routing(mut self, routing: Routing) -> Self {
        self.routing = routing;
        self
    }

    /// Sets the unit.
    pub fn with_unit(mut self, unit: impl Into<String>) -> Self {
        self.unit = Some(unit.into());
        self
    }

    /// Marks the tag as a control tag.
    pub fn as_control_tag(mut self, alive: bool) -> Self {
        self.control_tag = true;
        self.alive_tag = alive;
        self
    }
}
