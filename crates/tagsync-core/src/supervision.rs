//! Supervision events describing process and equipment health.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::quality::QualityStatus;

/// Kind of entity a supervision event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SupervisionEntity {
    Process,
    Equipment,
    SubEquipment,
}

impl SupervisionEntity {
    /// Quality status set on tags when an entity of this kind is down.
    pub fn down_status(self) -> QualityStatus {
        match self {
            Self::Process => QualityStatus::ProcessDown,
            Self::Equipment => QualityStatus::EquipmentDown,
            Self::SubEquipment => QualityStatus::SubEquipmentDown,
        }
    }
}

impl fmt::Display for SupervisionEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Process => f.write_str("process"),
            Self::Equipment => f.write_str("equipment"),
            Self::SubEquipment => f.write_str("sub-equipment"),
        }
    }
}

/// Health of a supervised entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SupervisionStatus {
    Running,
    Down,
    Stopped,
    Uncertain,
}

impl SupervisionStatus {
    /// Returns true for statuses that invalidate the entity's tags.
    pub fn is_down(self) -> bool {
        matches!(self, Self::Down | Self::Stopped)
    }
}

/// A change in health of one process, equipment or sub-equipment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SupervisionEvent {
    pub entity: SupervisionEntity,
    pub entity_id: u64,
    pub status: SupervisionStatus,
    #[serde(default)]
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

impl SupervisionEvent {
    /// Creates an event timestamped now.
    pub fn new(
        entity: SupervisionEntity,
        entity_id: u64,
        status: SupervisionStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            entity,
            entity_id,
            status,
            message: message.into(),
            timestamp: Utc::now(),
        }
    }
}
