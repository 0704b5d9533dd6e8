//! Prometheus counters, registered in the default registry served at `/metrics`

use lazy_static::lazy_static;
use prometheus::{register_int_counter, register_int_counter_vec, IntCounter, IntCounterVec};

lazy_static! {
    static ref SOURCE_FETCH_FAILURES: IntCounterVec = register_int_counter_vec!(
        "acestream_proxy_source_fetch_failures_total",
        "Playlist source fetches that failed, by source label",
        &["source"]
    )
    .expect("failed to register acestream_proxy_source_fetch_failures_total");

    static ref RELAY_SESSIONS: IntCounterVec = register_int_counter_vec!(
        "acestream_proxy_relay_sessions_total",
        "Finished relay sessions, by outcome",
        &["outcome"]
    )
    .expect("failed to register acestream_proxy_relay_sessions_total");

    static ref RELAY_BYTES: IntCounter = register_int_counter!(
        "acestream_proxy_relay_bytes_total",
        "Bytes copied from the engine to clients"
    )
    .expect("failed to register acestream_proxy_relay_bytes_total");
}

pub fn record_fetch_failure(source: &str) {
    SOURCE_FETCH_FAILURES.with_label_values(&[source]).inc();
}

/// `outcome` is one of `completed`, `cancelled`, `slow_client`, `failed`
pub fn record_relay(outcome: &str, bytes: u64) {
    RELAY_SESSIONS.with_label_values(&[outcome]).inc();
    RELAY_BYTES.inc_by(bytes);
}
