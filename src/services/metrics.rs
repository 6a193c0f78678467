//! Prometheus metrics, registered in the default registry and exported by GET /metrics

use lazy_static::lazy_static;
use prometheus::{register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec};

lazy_static! {
    /// Upstream playlist/guide fetches by source and outcome
    pub static ref SOURCE_FETCHES: IntCounterVec = register_int_counter_vec!(
        "iptv_source_fetches_total",
        "Upstream playlist and guide fetches",
        &["source", "outcome"]
    )
    .unwrap();

    /// Proxied stream requests by kind (manifest, media, error)
    pub static ref STREAM_REQUESTS: IntCounterVec = register_int_counter_vec!(
        "iptv_stream_requests_total",
        "Stream proxy requests",
        &["kind"]
    )
    .unwrap();

    pub static ref PLAYLIST_ENTRIES_SKIPPED: IntCounter = register_int_counter!(
        "iptv_playlist_entries_skipped_total",
        "Playlist entries skipped as malformed or missing a URL"
    )
    .unwrap();
}
