//! Cache metrics recording.

use metrics::{counter, gauge, histogram};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Registers the descriptions of the cache metrics.
/// Call once at startup, after installing the recorder.
pub fn describe_cache_metrics() {
    metrics::describe_counter!(
        "tagsync_tags_created_total",
        "Total number of tags added to the cache"
    );
    metrics::describe_counter!(
        "tagsync_tags_removed_total",
        "Total number of tags removed from the cache"
    );
    metrics::describe_gauge!("tagsync_cache_entries", "Current number of live cache entries");
    metrics::describe_counter!(
        "tagsync_refresh_total",
        "Total number of cache resynchronizations by outcome"
    );
    metrics::describe_counter!(
        "tagsync_subscription_tasks_total",
        "Total number of asynchronous subscription tasks run"
    );
    metrics::describe_histogram!(
        "tagsync_request_seconds",
        "Time spent waiting for the request service"
    );
}

/// Cache metrics recorder.
/// Keeps internal atomic counters for in-process inspection.
#[derive(Debug, Clone, Default)]
pub struct CacheMetrics {
    created: Arc<AtomicU64>,
    removed: Arc<AtomicU64>,
    refresh_ok: Arc<AtomicU64>,
    refresh_failed: Arc<AtomicU64>,
    subscription_tasks: Arc<AtomicU64>,
}

impl CacheMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records tags added to the cache
    pub fn record_tags_created(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.created.fetch_add(count as u64, Ordering::Relaxed);
        counter!("tagsync_tags_created_total").increment(count as u64);
    }

    /// Records tags removed from the cache
    pub fn record_tags_removed(&self, count: usize) {
        if count == 0 {
            return;
        }
        self.removed.fetch_add(count as u64, Ordering::Relaxed);
        counter!("tagsync_tags_removed_total").increment(count as u64);
    }

    /// Updates the live entries gauge
    pub fn update_entry_count(&self, count: usize) {
        gauge!("tagsync_cache_entries").set(count as f64);
    }

    /// Records the outcome of a resynchronization
    pub fn record_refresh(&self, success: bool) {
        let outcome = if success {
            self.refresh_ok.fetch_add(1, Ordering::Relaxed);
            "success"
        } else {
            self.refresh_failed.fetch_add(1, Ordering::Relaxed);
            "failure"
        };
        counter!("tagsync_refresh_total", "outcome" => outcome).increment(1);
    }

    /// Records a subscription task
    pub fn record_subscription_task(&self) {
        self.subscription_tasks.fetch_add(1, Ordering::Relaxed);
        counter!("tagsync_subscription_tasks_total").increment(1);
    }

    /// Records the duration of a service call
    pub fn record_request(&self, operation: &'static str, duration: Duration) {
        histogram!("tagsync_request_seconds", "operation" => operation)
            .record(duration.as_secs_f64());
    }

    pub fn tags_created(&self) -> u64 {
        self.created.load(Ordering::Relaxed)
    }

    pub fn tags_removed(&self) -> u64 {
        self.removed.load(Ordering::Relaxed)
    }

    pub fn refresh_successes(&self) -> u64 {
        self.refresh_ok.load(Ordering::Relaxed)
    }

    pub fn refresh_failures(&self) -> u64 {
        self.refresh_failed.load(Ordering::Relaxed)
    }

    pub fn subscription_tasks(&self) -> u64 {
        self.subscription_tasks.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_created_removed_counters() {
        let metrics = CacheMetrics::new();

        metrics.record_tags_created(3);
        metrics.record_tags_created(0);
        metrics.record_tags_removed(2);

        assert_eq!(metrics.tags_created(), 3);
        assert_eq!(metrics.tags_removed(), 2);
    }

    #[test]
    fn test_refresh_outcomes() {
        let metrics = CacheMetrics::new();

        metrics.record_refresh(true);
        metrics.record_refresh(false);
        metrics.record_refresh(false);

        assert_eq!(metrics.refresh_successes(), 1);
        assert_eq!(metrics.refresh_failures(), 2);
    }

    #[test]
    fn test_clones_share_counters() {
        let metrics = CacheMetrics::new();
        let clone = metrics.clone();

        clone.record_subscription_task();
        clone.record_request("fetch_by_ids", Duration::from_millis(3));

        assert_eq!(metrics.subscription_tasks(), 1);
    }
}
