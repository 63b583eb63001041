//! Prometheus metrics for the teleport oracle
//!
//! Exposed on the /metrics endpoint for Prometheus scraping.

use lazy_static::lazy_static;
use prometheus::{
    register_counter_vec, register_gauge_vec, CounterVec, Encoder, GaugeVec, TextEncoder,
};

lazy_static! {
    pub static ref VOTES_SUBMITTED: CounterVec = register_counter_vec!(
        "oracle_votes_submitted_total",
        "Actions submitted to the destination chain",
        &["direction", "status"]
    ).unwrap();

    pub static ref EVENTS_SKIPPED: CounterVec = register_counter_vec!(
        "oracle_events_skipped_total",
        "Events skipped, by reason",
        &["direction", "reason"]
    ).unwrap();

    pub static ref ENDPOINTS_REMOVED: CounterVec = register_counter_vec!(
        "oracle_endpoints_removed_total",
        "Endpoints permanently removed for serving another network",
        &["chain"]
    ).unwrap();

    pub static ref ERRORS: CounterVec = register_counter_vec!(
        "oracle_errors_total",
        "Errors seen by the relay loops",
        &["direction", "type"]
    ).unwrap();

    pub static ref CHECKPOINT: GaugeVec = register_gauge_vec!(
        "oracle_checkpoint",
        "Last persisted checkpoint (teleport id or block number)",
        &["direction"]
    ).unwrap();

    pub static ref FINALITY_HORIZON: GaugeVec = register_gauge_vec!(
        "oracle_finality_horizon",
        "Latest irreversible horizon (seconds on the account chain, block on EVM)",
        &["chain"]
    ).unwrap();
}

pub fn record_vote(direction: &str, status: &str) {
    VOTES_SUBMITTED.with_label_values(&[direction, status]).inc();
}

pub fn record_skip(direction: &str, reason: &str) {
    EVENTS_SKIPPED.with_label_values(&[direction, reason]).inc();
}

pub fn record_endpoint_removed(chain: &str) {
    ENDPOINTS_REMOVED.with_label_values(&[chain]).inc();
}

pub fn record_error(direction: &str, error_type: &str) {
    ERRORS.with_label_values(&[direction, error_type]).inc();
}

pub fn set_checkpoint(direction: &str, value: u64) {
    CHECKPOINT.with_label_values(&[direction]).set(value as f64);
}

pub fn set_finality_horizon(chain: &str, value: u64) {
    FINALITY_HORIZON.with_label_values(&[chain]).set(value as f64);
}

/// Render all registered metrics in the Prometheus text format.
pub fn gather_text() -> Result<String, String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .map_err(|e| e.to_string())?;
    String::from_utf8(buffer).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_are_exported() {
        record_vote("sign", "success");
        record_skip("sign", "already_claimed");
        set_checkpoint("sign", 42);

        let text = gather_text().unwrap();
        assert!(text.contains("oracle_votes_submitted_total"));
        assert!(text.contains("oracle_events_skipped_total"));
        assert!(text.contains("oracle_checkpoint"));
    }
}
