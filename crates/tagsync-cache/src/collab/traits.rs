//! Collaborator contracts consumed by the cache.

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;

use tagsync_core::{RegistryError, Routing, ServiceError, TagId, TagUpdate, TagValueUpdate};

use crate::entry::TagEntry;

/// Remote service resolving tag descriptions and values.
///
/// This trait abstracts over the transport used to reach the server. The
/// cache wraps every failure into a synchronization error and applies its
/// own timeout around each call.
///
/// # Implementors
///
/// - `InMemoryTagServer` - serves tags from process memory (tests, demos)
///
/// # Example
///
/// ```ignore
/// use tagsync_cache::RequestService;
///
/// struct MyService;
///
/// #[async_trait]
/// impl RequestService for MyService {
///     async fn fetch_by_ids(&self, ids: &BTreeSet<TagId>) -> Result<Vec<TagUpdate>, ServiceError> {
///         // Implementation here
///     }
///     // ...
/// }
/// ```
#[async_trait]
pub trait RequestService: Send + Sync {
    /// Fetches the full description and current value of the given tags.
    ///
    /// Ids the server does not know are simply absent from the result.
    async fn fetch_by_ids(&self, ids: &BTreeSet<TagId>) -> Result<Vec<TagUpdate>, ServiceError>;

    /// Fetches every tag whose name matches one of the wildcard patterns.
    ///
    /// Patterns are case-insensitive; `?` matches one character and `*` any
    /// sequence, both escapable with `\`.
    async fn fetch_by_name_patterns(
        &self,
        patterns: &[String],
    ) -> Result<Vec<TagUpdate>, ServiceError>;

    /// Fetches only the current values of the given tags.
    async fn fetch_current_values(
        &self,
        ids: &BTreeSet<TagId>,
    ) -> Result<Vec<TagValueUpdate>, ServiceError>;
}

/// Registry delivering push updates to cache entries.
///
/// Once registered, the registry calls [`TagEntry::apply_value_update`] from
/// its own threads for every update published on the tag's topic.
#[async_trait]
pub trait PushRegistry: Send + Sync {
    /// Starts delivering updates for `id` to `entry`.
    ///
    /// Registering an already registered entry is a no-op.
    async fn register(&self, id: TagId, entry: Arc<TagEntry>) -> Result<(), RegistryError>;

    /// Stops delivering updates for `id` to `entry`.
    ///
    /// Unregistering an entry that is not registered is a no-op.
    async fn unregister(&self, id: TagId, entry: &Arc<TagEntry>) -> Result<(), RegistryError>;

    /// Returns true if `entry` currently receives updates for `id`.
    fn is_registered(&self, id: TagId, entry: &Arc<TagEntry>) -> bool;
}

/// Receives server heartbeat signals.
pub trait HeartbeatListener: Send + Sync {
    /// The server heartbeat was not received in time.
    fn on_heartbeat_expired(&self);

    /// The server heartbeat is received again.
    fn on_heartbeat_resumed(&self);
}

/// Receives broker connection signals.
pub trait ConnectionListener: Send + Sync {
    /// The connection to the update broker was lost.
    fn on_connection_lost(&self);

    /// The connection to the update broker is (re-)established.
    fn on_connection_established(&self);
}

/// Source of heartbeat, connection and supervision signals.
pub trait SupervisionSource: Send + Sync {
    /// Registers a heartbeat listener.
    fn add_heartbeat_listener(&self, listener: Arc<dyn HeartbeatListener>);

    /// Registers a connection listener.
    fn add_connection_listener(&self, listener: Arc<dyn ConnectionListener>);

    /// Routes supervision events for the given entities to `entry`.
    fn add_supervision_listener(
        &self,
        entry: &Arc<TagEntry>,
        routing: &Routing,
    ) -> Result<(), RegistryError>;

    /// Stops routing supervision events to `entry`.
    fn remove_supervision_listener(&self, entry: &Arc<TagEntry>) -> Result<(), RegistryError>;

    /// Asks the source to re-send the current supervision status.
    ///
    /// Called before each refresh. The default implementation is a no-op.
    fn refresh_supervision_status(&self) {}
}
