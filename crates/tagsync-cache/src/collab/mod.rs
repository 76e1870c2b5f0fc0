//! Collaborators of the cache: the remote request service, the push-update
//! registry and the supervision signal source.
//!
//! The cache only depends on the traits in this module. An in-memory
//! implementation of all three is provided for tests and demos.

mod memory;
mod traits;

use std::sync::Arc;

pub use memory::{InMemoryTagServer, RequestCall};
pub use traits::{
    ConnectionListener, HeartbeatListener, PushRegistry, RequestService, SupervisionSource,
};

/// The three collaborators a cache is wired to.
#[derive(Clone)]
pub struct Collaborators {
    pub service: Arc<dyn RequestService>,
    pub registry: Arc<dyn PushRegistry>,
    pub supervision: Arc<dyn SupervisionSource>,
}

impl Collaborators {
    /// Uses one in-memory server for all three roles.
    pub fn in_memory(server: &Arc<InMemoryTagServer>) -> Self {
        Self {
            service: server.clone(),
            registry: server.clone(),
            supervision: server.clone(),
        }
    }
}
