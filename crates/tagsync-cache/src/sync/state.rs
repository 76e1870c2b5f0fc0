//! Synchronization state tracking.

use std::time::{Duration, Instant};

use parking_lot::RwLock;

/// Tracks connectivity faults and the outcome of cache resynchronizations.
#[derive(Debug)]
pub struct SyncState {
    /// The broker connection is down.
    connection_down: RwLock<bool>,
    /// The server heartbeat expired.
    heartbeat_expired: RwLock<bool>,
    /// The last successful resynchronization time.
    last_refresh: RwLock<Option<Instant>>,
    /// The last error message, if any.
    last_error: RwLock<Option<String>>,
    /// Number of consecutive failures.
    failure_count: RwLock<u32>,
}

impl SyncState {
    /// Creates a new SyncState with no outstanding fault.
    pub fn new() -> Self {
        Self {
            connection_down: RwLock::new(false),
            heartbeat_expired: RwLock::new(false),
            last_refresh: RwLock::new(None),
            last_error: RwLock::new(None),
            failure_count: RwLock::new(0),
        }
    }

    /// Returns true if the broker connection is down.
    pub fn is_connection_down(&self) -> bool {
        *self.connection_down.read()
    }

    /// Sets the connection-down flag.
    pub fn set_connection_down(&self, down: bool) {
        *self.connection_down.write() = down;
    }

    /// Returns true if the server heartbeat expired.
    pub fn is_heartbeat_expired(&self) -> bool {
        *self.heartbeat_expired.read()
    }

    /// Sets the heartbeat-expired flag.
    pub fn set_heartbeat_expired(&self, expired: bool) {
        *self.heartbeat_expired.write() = expired;
    }

    /// Returns true if a connectivity fault is outstanding.
    pub fn has_fault(&self) -> bool {
        self.is_connection_down() || self.is_heartbeat_expired()
    }

    /// Returns the time of the last successful resynchronization.
    pub fn last_refresh(&self) -> Option<Instant> {
        *self.last_refresh.read()
    }

    /// Returns the duration since the last successful resynchronization.
    pub fn time_since_refresh(&self) -> Option<Duration> {
        self.last_refresh.read().map(|t| t.elapsed())
    }

    /// Records a successful resynchronization, clearing every fault flag.
    pub fn record_success(&self) {
        let mut connection_down = self.connection_down.write();
        let mut heartbeat_expired = self.heartbeat_expired.write();
        let mut last_refresh = self.last_refresh.write();
        let mut last_error = self.last_error.write();
        let mut failure_count = self.failure_count.write();

        *connection_down = false;
        *heartbeat_expired = false;
        *last_refresh = Some(Instant::now());
        *last_error = None;
        *failure_count = 0;
    }

    /// Records a failed resynchronization.
    pub fn record_failure(&self, error: impl Into<String>) {
        let mut last_error = self.last_error.write();
        let mut failure_count = self.failure_count.write();

        *last_error = Some(error.into());
        *failure_count += 1;
    }

    /// Returns the last error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().clone()
    }

    /// Returns the number of consecutive failures.
    pub fn failure_count(&self) -> u32 {
        *self.failure_count.read()
    }

    /// Returns true if the cache is in sync with the server.
    pub fn is_healthy(&self) -> bool {
        !self.has_fault() && self.last_error.read().is_none()
    }

    /// Returns true if the last resynchronization failed and must be retried.
    pub fn needs_recovery(&self) -> bool {
        self.last_error.read().is_some()
    }
}

impl Default for SyncState {
    fn default() -> Self {
        Self::new()
    }
}
