//! Tag quality: a set of invalidity flags with free-text descriptions.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A single reason why a tag value may not be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum QualityStatus {
    /// The server does not know the tag.
    UndefinedTag,
    /// No value was ever received for the tag.
    Uninitialised,
    /// The source reported the value as inaccessible.
    Inaccessible,
    /// The value is outside its configured range.
    ValueOutOfBounds,
    /// The value could not be converted to the tag's type.
    UnsupportedType,
    /// The value is older than its expiry window.
    ValueExpired,
    /// The owning process is down.
    ProcessDown,
    /// The owning equipment is down.
    EquipmentDown,
    /// The owning sub-equipment is down.
    SubEquipmentDown,
    /// The server heartbeat is no longer received.
    ServerHeartbeatExpired,
    /// The connection to the update broker is down.
    ConnectionDown,
    /// Any other reason.
    UnknownReason,
}

impl QualityStatus {
    /// Returns true if this status makes the tag inaccessible.
    pub fn blocks_access(self) -> bool {
        matches!(
            self,
            Self::ProcessDown
                | Self::EquipmentDown
                | Self::SubEquipmentDown
                | Self::Inaccessible
                | Self::ServerHeartbeatExpired
                | Self::ConnectionDown
        )
    }

    /// Returns true for statuses driven by supervision events.
    pub fn is_supervision_status(self) -> bool {
        matches!(
            self,
            Self::ProcessDown | Self::EquipmentDown | Self::SubEquipmentDown
        )
    }
}

impl fmt::Display for QualityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::UndefinedTag => "UNDEFINED_TAG",
            Self::Uninitialised => "UNINITIALISED",
            Self::Inaccessible => "INACCESSIBLE",
            Self::ValueOutOfBounds => "VALUE_OUT_OF_BOUNDS",
            Self::UnsupportedType => "UNSUPPORTED_TYPE",
            Self::ValueExpired => "VALUE_EXPIRED",
            Self::ProcessDown => "PROCESS_DOWN",
            Self::EquipmentDown => "EQUIPMENT_DOWN",
            Self::SubEquipmentDown => "SUBEQUIPMENT_DOWN",
            Self::ServerHeartbeatExpired => "SERVER_HEARTBEAT_EXPIRED",
            Self::ConnectionDown => "CONNECTION_DOWN",
            Self::UnknownReason => "UNKNOWN_REASON",
        };
        f.write_str(s)
    }
}

/// Quality of a tag value.
///
/// A tag is valid when no invalid status is set. Each status keeps its own
/// description so that it can be cleared independently of the others.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagQuality {
    #[serde(default)]
    invalid: BTreeMap<QualityStatus, String>,
}

impl TagQuality {
    /// Creates a valid quality.
    pub fn valid() -> Self {
        Self::default()
    }

    /// Creates a quality with one invalid status.
    pub fn invalid(status: QualityStatus, description: impl Into<String>) -> Self {
        let mut quality = Self::default();
        quality.add_invalid_status(status, description);
        quality
    }

    /// Quality of a tag unknown to the server.
    pub fn unknown() -> Self {
        Self::invalid(QualityStatus::UndefinedTag, "Tag is not known by the system")
    }

    /// Returns true if no invalid status is set.
    pub fn is_valid(&self) -> bool {
        self.invalid.is_empty()
    }

    /// Returns true unless the tag is flagged as unknown to the server.
    pub fn is_existing_tag(&self) -> bool {
        !self.invalid.contains_key(&QualityStatus::UndefinedTag)
    }

    /// Returns true unless the tag never received a value.
    pub fn is_initialised(&self) -> bool {
        !self.invalid.contains_key(&QualityStatus::Uninitialised)
    }

    /// Returns true if no access-blocking status is set.
    pub fn is_accessible(&self) -> bool {
        !self.invalid.keys().any(|s| s.blocks_access())
    }

    /// Returns true if the given status is set.
    pub fn is_invalid_status_set(&self, status: QualityStatus) -> bool {
        self.invalid.contains_key(&status)
    }

    /// Returns the description attached to a status.
    pub fn status_description(&self, status: QualityStatus) -> Option<&str> {
        self.invalid.get(&status).map(String::as_str)
    }

    /// Adds (or replaces) an invalid status. Returns true if the quality changed.
    pub fn add_invalid_status(&mut self, status: QualityStatus, description: impl Into<String>) -> bool {
        let description = description.into();
        match self.invalid.insert(status, description.clone()) {
            Some(previous) => previous != description,
            None => true,
        }
    }

    /// Clears every status and sets only the given one.
    pub fn set_invalid_status(&mut self, status: QualityStatus, description: impl Into<String>) {
        self.invalid.clear();
        self.invalid.insert(status, description.into());
    }

    /// Removes a status. Returns true if it was set.
    pub fn remove_invalid_status(&mut self, status: QualityStatus) -> bool {
        self.invalid.remove(&status).is_some()
    }

    /// Replaces all statuses with the given ones.
    pub fn set_invalid_states(&mut self, states: BTreeMap<QualityStatus, String>) {
        self.invalid = states;
    }

    /// Returns all invalid statuses with their descriptions.
    pub fn invalid_states(&self) -> &BTreeMap<QualityStatus, String> {
        &self.invalid
    }

    /// Resets the quality to valid.
    pub fn validate(&mut self) {
        self.invalid.clear();
    }

    /// Human readable description joining all status descriptions.
    pub fn description(&self) -> String {
        if self.invalid.is_empty() {
            return "OK".to_string();
        }
        self.invalid
            .iter()
            .map(|(status, desc)| {
                if desc.is_empty() {
                    status.to_string()
                } else {
                    format!("{status}: {desc}")
                }
            })
            .collect::<Vec<_>>()
            .join("; ")
    }
}

impl fmt::Display for TagQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.description())
    }
}
