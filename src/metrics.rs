//! Metrics facade (`spec.md` §6's table), wired through the `metrics` crate
//! the way the teacher wires logging through `log`/`env_logger`: a thin,
//! call-site-friendly set of free functions over named instruments,
//! with no crate-specific state of its own — a `metrics`
//! exporter (Prometheus, StatsD, ...) is installed once by the binary.
//!
//! Instrument names and label sets follow `spec.md` §6's table verbatim
//! (`events_emitted_total{channel,zone,type}`, `detections_total{channel}`,
//! `kv_errors_total`, `frame_latency_ms`, `kv_call_ms`,
//! `active_tracks{channel}`, `disappeared_tracks{channel}`); everything else
//! here (re-ID/dedup/overflow counters, `kv_degraded`) is this crate's own
//! supplement for the degraded-path visibility `spec.md` §4.2/§7 ask for.

/// Call once from the binary entry point before any pipeline code runs.
/// The library itself never installs a recorder — that decision belongs to
/// the binary composing it, same as the teacher leaves `env_logger::init`
/// to its own `main`.
pub fn describe() {
    metrics::describe_counter!("events_emitted_total", "Counted events emitted to the sink, per channel/zone/type");
    metrics::describe_counter!("detections_total", "Detections received from the tracker, per channel");
    metrics::describe_counter!("kv_errors_total", "KV store calls that failed and fell back to in-memory state");
    metrics::describe_counter!("sink_errors_total", "Event sink batch writes that failed");
    metrics::describe_counter!("staff_filtered_total", "Detections excluded from counting as staff");
    metrics::describe_counter!("reid_matches_total", "Re-identification matches against the existing catalog");
    metrics::describe_counter!("reid_new_identities_total", "New person identities minted");
    metrics::describe_counter!("daily_dedup_skipped_total", "Events skipped by the once-per-day-per-person gate");
    metrics::describe_counter!("sink_overflow_dropped_total", "Rows dropped from the event queue by the overflow cap");
    metrics::describe_histogram!("frame_latency_ms", "Per-frame pipeline latency, per channel");
    metrics::describe_histogram!("kv_call_ms", "KV store call latency");
    metrics::describe_gauge!("kv_degraded", "1 when a channel has fallen back to the in-memory KV store");
    metrics::describe_gauge!("active_tracks", "Live track count, per channel");
    metrics::describe_gauge!("disappeared_tracks", "Tracks awaiting spatial-match recovery, per channel");
    metrics::describe_gauge!("zone_current_occupancy", "Current confirmed occupancy, per zone");
}

pub fn detection_received(channel_id: u32) {
    metrics::counter!("detections_total", "channel" => channel_id.to_string()).increment(1);
}

pub fn event_emitted(channel_id: u32, zone_id: &str, event_type: &str) {
    metrics::counter!(
        "events_emitted_total",
        "channel" => channel_id.to_string(),
        "zone" => zone_id.to_string(),
        "type" => event_type.to_string()
    )
    .increment(1);
}

pub fn staff_filtered() {
    metrics::counter!("staff_filtered_total").increment(1);
}

pub fn reid_match() {
    metrics::counter!("reid_matches_total").increment(1);
}

pub fn reid_new_identity() {
    metrics::counter!("reid_new_identities_total").increment(1);
}

pub fn daily_dedup_skipped() {
    metrics::counter!("daily_dedup_skipped_total").increment(1);
}

pub fn kv_error() {
    metrics::counter!("kv_errors_total").increment(1);
}

pub fn sink_error() {
    metrics::counter!("sink_errors_total").increment(1);
}

pub fn frame_latency_ms(channel_id: u32, millis: f64) {
    metrics::histogram!("frame_latency_ms", "channel" => channel_id.to_string()).record(millis);
}

pub fn kv_call_ms(millis: f64) {
    metrics::histogram!("kv_call_ms").record(millis);
}

pub fn kv_degraded(degraded: bool) {
    metrics::gauge!("kv_degraded").set(if degraded { 1.0 } else { 0.0 });
}

pub fn active_tracks(channel_id: u32, count: usize) {
    metrics::gauge!("active_tracks", "channel" => channel_id.to_string()).set(count as f64);
}

pub fn disappeared_tracks(channel_id: u32, count: usize) {
    metrics::gauge!("disappeared_tracks", "channel" => channel_id.to_string()).set(count as f64);
}

pub fn zone_current_occupancy(zone_id: &str, current: u64) {
    metrics::gauge!("zone_current_occupancy", "zone" => zone_id.to_string()).set(current as f64);
}
