//! Synchronization with the server.
//!
//! This module keeps cache entries in line with the server: initial fetches,
//! refreshes, push-update registration, heartbeat and connection handling
//! and background recovery of failed refreshes.

mod engine;
mod scheduler;
mod state;
mod worker;

pub use engine::{PatternMatch, SynchronizationEngine};
pub(crate) use engine::Removal;
pub use scheduler::{RecoveryHandle, RecoveryScheduler};
pub use state::SyncState;
pub use worker::WorkerPool;
