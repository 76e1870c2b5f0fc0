//! Tagsync Core - Domain types for the client tag cache
//!
//! This crate provides the types shared by every tagsync layer: tag
//! identity and value snapshots, quality flags, server update messages,
//! supervision events, wildcard name patterns and the error taxonomy.

pub mod error;
pub mod pattern;
pub mod quality;
pub mod supervision;
pub mod tag;
pub mod update;

pub use error::{CacheError, RegistryError, Result, ServiceError};
pub use pattern::{NamePattern, has_wildcard};
pub use quality::{QualityStatus, TagQuality};
pub use supervision::{SupervisionEntity, SupervisionEvent, SupervisionStatus};
pub use tag::{Routing, Tag, TagId, TagMode};
pub use update::{TagUpdate, TagValueUpdate};

/// Returns the crate version.
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
