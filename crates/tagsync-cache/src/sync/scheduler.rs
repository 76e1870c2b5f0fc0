//! Background recovery scheduler.
//!
//! A refresh that fails leaves the live cache stale until the next one
//! succeeds. The scheduler retries a full refresh on a fixed interval while
//! a failure is outstanding, backing off after repeated failures.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::time::{Instant, Interval, interval_at};
use tracing::{debug, info, warn};

use super::SynchronizationEngine;
use crate::config::RecoveryConfig;
use tagsync_core::CacheError;

/// Handle for controlling a running recovery scheduler.
///
/// The scheduler stops when the handle is dropped.
pub struct RecoveryHandle {
    shutdown_tx: watch::Sender<bool>,
}

impl RecoveryHandle {
    /// Signals the scheduler to stop.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(true);
    }
}

impl Drop for RecoveryHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Retries failed refreshes in the background.
pub struct RecoveryScheduler {
    engine: SynchronizationEngine,
    config: RecoveryConfig,
    /// Current retry period.
    current_backoff: Arc<Mutex<Duration>>,
}

impl RecoveryScheduler {
    /// Creates a new recovery scheduler.
    pub fn new(engine: SynchronizationEngine, config: RecoveryConfig) -> Self {
        Self {
            engine,
            current_backoff: Arc::new(Mutex::new(config.interval)),
            config,
        }
    }

    /// Starts the background task on `handle`.
    ///
    /// Returns a handle that can be used to stop the scheduler.
    pub fn start(self, handle: &Handle) -> RecoveryHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        handle.spawn(self.run(shutdown_rx));
        RecoveryHandle { shutdown_tx }
    }

    /// Returns the current retry period.
    pub fn current_backoff(&self) -> Duration {
        *self.current_backoff.lock()
    }

    async fn run(self, mut shutdown_rx: watch::Receiver<bool>) {
        let mut timer = period_timer(self.config.interval);
        info!(interval = ?self.config.interval, "Starting recovery scheduler");

        loop {
            tokio::select! {
                _ = timer.tick() => {
                    self.do_recovery().await;

                    let current = self.current_backoff();
                    if current != timer.period() {
                        timer = period_timer(current);
                    }
                }
                result = shutdown_rx.changed() => {
                    if result.is_err() || *shutdown_rx.borrow() {
                        info!("Recovery scheduler shutting down");
                        break;
                    }
                }
            }
        }
    }

    async fn do_recovery(&self) {
        if !self.engine.state().needs_recovery() {
            return;
        }

        debug!("Retrying failed live cache refresh");
        match self.engine.refresh(None).await {
            Ok(()) => {
                self.reset_backoff();
                info!("Live cache recovered");
            },
            Err(e) => {
                self.increase_backoff();
                warn!(error = %e, "Live cache recovery failed");
            },
        }
    }

    fn reset_backoff(&self) {
        *self.current_backoff.lock() = self.config.interval;
    }

    fn increase_backoff(&self) {
        let mut backoff = self.current_backoff.lock();
        let failure_count = self.engine.state().failure_count();

        if failure_count >= self.config.max_failures {
            let next = Duration::from_secs_f64(backoff.as_secs_f64() * self.config.backoff_multiplier);
            *backoff = next.min(self.config.max_backoff);

            debug!(backoff = ?*backoff, failure_count, "Increased recovery backoff");
        }
    }

    /// Runs a full refresh right away, whatever the current state.
    pub async fn trigger_recovery(&self) -> Result<(), CacheError> {
        info!("Manual recovery triggered");
        let result = self.engine.refresh(None).await;

        if result.is_ok() {
            self.reset_backoff();
        }
        result
    }
}

// the first tick is one period away, not immediate
fn period_timer(period: Duration) -> Interval {
    interval_at(Instant::now() + period, period)
}
