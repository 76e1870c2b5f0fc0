//! Simulated monitoring session.
//!
//! Runs a [`TagCache`] against an [`InMemoryTagServer`]: subscribes a
//! monitor listener by name pattern, publishes rounds of value updates,
//! optionally simulates a heartbeat outage and a history playback, then
//! unsubscribes and reports what the listener saw.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::counter;
use tracing::{debug, info, warn};

use tagsync_cache::{
    CacheConfig, InMemoryTagServer, InitialDelivery, ListenerHandle, TagCache, TagListener,
};
use tagsync_core::{QualityStatus, Tag, TagId, TagValueUpdate};

use crate::error::Result;
use crate::settings::SessionSettings;

/// Summary of a finished session.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionReport {
    /// Tags matched by the subscription pattern.
    pub subscribed: usize,
    /// Tags delivered in the initial batch.
    pub initial_values: usize,
    /// Updates received by the monitor listener.
    pub updates_received: u64,
    /// Tags flagged while the heartbeat was down.
    pub invalidated_during_outage: usize,
    /// Tags valid again after the heartbeat resumed.
    pub valid_after_outage: usize,
    /// Failed cache refreshes.
    pub refresh_failures: u64,
    /// Cache entries left after unsubscribing.
    pub remaining_entries: usize,
}

/// Listener counting what the session delivers.
#[derive(Default)]
struct MonitorListener {
    initial: AtomicU64,
    updates: AtomicU64,
}

impl TagListener for MonitorListener {
    fn on_update(&self, tag: &Tag) {
        self.updates.fetch_add(1, Ordering::Relaxed);
        counter!("tagsync_monitor_updates_total").increment(1);
        debug!(tag_id = %tag.id, name = tag.name(), valid = tag.is_valid(), "Tag update");
    }

    fn on_initial_update(&self, tags: &[Tag]) {
        self.initial.fetch_add(tags.len() as u64, Ordering::Relaxed);
        info!(count = tags.len(), "Initial values received");
    }
}

/// Name of the simulated tag with the given id.
pub fn tag_name(id: u64) -> String {
    format!("PLANT.TAG.{id:04}")
}

/// Runs one session and returns its report.
///
/// # Errors
///
/// Fails if the cache cannot be built or the subscription fails.
pub async fn run_session(settings: &SessionSettings, config: CacheConfig) -> Result<SessionReport> {
    let server = Arc::new(InMemoryTagServer::new());
    for id in 1..=settings.tag_count {
        server.define_tag(id, &tag_name(id), 0.0);
    }

    let cache = TagCache::builder().config(config).in_memory(&server).build()?;
    let monitor = Arc::new(MonitorListener::default());
    let handle = ListenerHandle::from(monitor.clone());

    let ids = cache
        .subscribe_by_name(
            std::slice::from_ref(&settings.pattern),
            &handle,
            InitialDelivery::Separate,
        )
        .await?;
    cache.await_pending_subscriptions().await;
    info!(pattern = %settings.pattern, matched = ids.len(), "Monitor subscribed");

    let recovery = settings.recovery.then(|| cache.start_recovery());

    for round in 1..=settings.update_rounds {
        for id in &ids {
            let value = round as f64 + id.get() as f64 / 1000.0;
            if server.publish(*id, value).is_none() {
                warn!(tag_id = %id, "Published to an unknown tag");
            }
        }
        debug!(round, "Update round published");
        tokio::time::sleep(settings.update_interval()).await;
    }

    let mut report = SessionReport {
        subscribed: ids.len(),
        ..SessionReport::default()
    };

    if settings.simulate_outage {
        simulate_outage(&server, &cache, &ids, &mut report).await;
    }

    if settings.history_playback {
        replay_history(&server, &cache, &ids)?;
    }

    drop(recovery);
    cache.unsubscribe_all(&handle).await;
    cache.await_pending_subscriptions().await;

    report.initial_values = monitor.initial.load(Ordering::Relaxed) as usize;
    report.updates_received = monitor.updates.load(Ordering::Relaxed);
    report.refresh_failures = cache.metrics().refresh_failures();
    report.remaining_entries = cache.cache_size();

    info!(
        updates = report.updates_received,
        refresh_failures = report.refresh_failures,
        "Session finished"
    );
    Ok(report)
}

async fn simulate_outage(
    server: &InMemoryTagServer,
    cache: &TagCache,
    ids: &std::collections::BTreeSet<TagId>,
    report: &mut SessionReport,
) {
    info!("Simulating heartbeat loss");
    server.fire_heartbeat_expired();
    cache.await_pending_subscriptions().await;

    report.invalidated_during_outage = ids
        .iter()
        .filter_map(|id| cache.get(*id))
        .filter(|tag| tag.quality.is_invalid_status_set(QualityStatus::ServerHeartbeatExpired))
        .count();

    // values the cache could not see while the heartbeat was down
    for id in ids {
        server.set_value(*id, -1.0);
    }

    server.fire_heartbeat_resumed();
    cache.await_pending_subscriptions().await;

    report.valid_after_outage = ids
        .iter()
        .filter_map(|id| cache.get(*id))
        .filter(Tag::is_valid)
        .count();
    info!(
        invalidated = report.invalidated_during_outage,
        recovered = report.valid_after_outage,
        "Heartbeat outage handled"
    );
}

fn replay_history(
    server: &InMemoryTagServer,
    cache: &TagCache,
    ids: &std::collections::BTreeSet<TagId>,
) -> Result<()> {
    let Some(first) = ids.first().copied() else {
        return Ok(());
    };

    let _mode = cache.lock_history_mode();
    cache.set_history_mode(true);
    let replayed = cache.apply_history_value(&TagValueUpdate::new(
        first,
        42.0,
        server.next_timestamp(),
    ))?;
    debug!(tag_id = %first, replayed, "History value applied");
    cache.set_history_mode(false);
    Ok(())
}
