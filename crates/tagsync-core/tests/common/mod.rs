#![allow(dead_code)]
use chrono::{DateTime, TimeZone, Utc};
use tagsync_core::{TagId, TagUpdate, TagValueUpdate};

/// Fixed timestamp `secs` seconds after a reference instant.
pub fn ts(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0)
        .single()
        .expect("valid test timestamp")
}

/// Helper to build a described tag with a numeric value.
pub fn described(id: u64, name: &str, value: f64, secs: i64) -> TagUpdate {
    TagUpdate::new(name, TagValueUpdate::new(TagId::new(id), value, ts(secs)))
}
