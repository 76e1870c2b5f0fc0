//! # Tagsync Cache
//!
//! Client-side tag cache kept in sync with the tag server.
//!
//! This crate provides the cache store, the synchronization engine and the
//! subscription coordinator behind the [`TagCache`] facade.
//!
//! ## Features
//!
//! - Live and history maps with listener transplantation on mode switch
//! - On-demand entry creation with rollback when the initial fetch fails
//! - Two-phase push-update registration (register, then re-fetch)
//! - Invalidation on heartbeat expiry and broker disconnection
//! - Background recovery of failed refreshes with backoff
//! - Async trait-based collaborator abstraction with an in-memory server
//!
//! ## Example
//!
//! ```ignore
//! use tagsync_cache::{InMemoryTagServer, InitialDelivery, ListenerHandle, TagCache};
//!
//! let server = Arc::new(InMemoryTagServer::new());
//! server.define_tag(1, "CP.PRESSURE", 4.2);
//!
//! let cache = TagCache::builder().in_memory(&server).build()?;
//! cache.subscribe(&ids, &listener, InitialDelivery::Inline).await?;
//! ```

pub mod collab;
pub mod config;
pub mod coordinator;
pub mod entry;
pub mod facade;
pub mod listener;
pub mod metrics;
pub mod store;
pub mod sync;

// Re-exports
pub use collab::{
    Collaborators, ConnectionListener, HeartbeatListener, InMemoryTagServer, PushRegistry,
    RequestCall, RequestService, SupervisionSource,
};
pub use config::{CacheConfig, CacheConfigBuilder, RecoveryConfig};
pub use coordinator::SubscriptionCoordinator;
pub use entry::TagEntry;
pub use facade::{TagCache, TagCacheBuilder};
pub use listener::{InitialDelivery, ListenerHandle, TagListener, TagSubscriptionListener};
pub use metrics::{CacheMetrics, describe_cache_metrics};
pub use store::{CacheMode, TagCacheStore, TagMap};
pub use sync::{
    PatternMatch, RecoveryHandle, RecoveryScheduler, SyncState, SynchronizationEngine, WorkerPool,
};

// Re-export tagsync_core for consumers
pub use tagsync_core;
