//! Feed metrics
//!
//! - `echoes_posts_created_total`: posts appended through this client
//! - `echoes_likes_total`: like increments acknowledged by the store
//! - `echoes_write_failures_total{op}`: rejected appends and increments
//! - `echoes_snapshots_total`: snapshots delivered to subscribers
//! - `echoes_snapshot_size`: posts per delivered snapshot
//!
//! No recorder is installed here; without one these calls are no-ops.

use metrics::{histogram, increment_counter};

pub(crate) fn record_post_created() {
    increment_counter!("echoes_posts_created_total");
}

pub(crate) fn record_like() {
    increment_counter!("echoes_likes_total");
}

pub(crate) fn record_write_failure(op: &'static str) {
    increment_counter!("echoes_write_failures_total", "op" => op);
}

pub(crate) fn record_snapshot(len: usize) {
    increment_counter!("echoes_snapshots_total");
    histogram!("echoes_snapshot_size", len as f64);
}
