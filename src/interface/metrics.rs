//! Bridge metrics
//!
//! Recorded through the `metrics` facade; the embedding application decides which
//! recorder (if any) to install.

use metrics::{counter, describe_counter, describe_gauge, gauge};

/// Describe all bridge metrics
pub fn describe_metrics() {
    describe_counter!(
        "callbridge_events_delivered_total",
        "Total number of events delivered to listeners"
    );
    describe_counter!(
        "callbridge_normalization_errors_total",
        "Native payloads dropped because they could not be normalized"
    );
    describe_counter!(
        "callbridge_rejected_total",
        "Native events and commands rejected by the call state machine"
    );
    describe_counter!(
        "callbridge_queue_dropped_total",
        "Events dropped from the delivery queue on overflow"
    );
    describe_gauge!(
        "callbridge_queue_depth",
        "Events waiting in the delivery queue"
    );
}

pub fn record_delivered(count: usize) {
    counter!("callbridge_events_delivered_total").increment(count as u64);
}

pub fn record_normalization_error(kind: &'static str) {
    counter!("callbridge_normalization_errors_total", "kind" => kind).increment(1);
}

/// Record a rejected input; `origin` is "native" or "command"
pub fn record_rejected(origin: &'static str, kind: &'static str) {
    counter!("callbridge_rejected_total", "origin" => origin, "kind" => kind).increment(1);
}

pub fn record_queue_dropped(count: u64) {
    counter!("callbridge_queue_dropped_total").increment(count);
}

pub fn update_queue_depth(depth: usize) {
    gauge!("callbridge_queue_depth").set(depth as f64);
}
