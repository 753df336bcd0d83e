//! Metrics collection and exposition.
//!
//! # Metrics
//! - `settlement_addresses_issued_total` (counter): addresses issued, by currency
//! - `settlement_broadcasts_total` (counter): broadcasts by currency, outcome
//! - `settlement_fee_subunits` (histogram): fee paid per transfer, by currency
//! - `settlement_tracked_transactions` (gauge): entries in the tracker
//! - `settlement_tracker_transitions_total` (counter): terminal transitions by state
//! - `settlement_node_health` (gauge): 1=healthy, 0=unhealthy, by node
//! - `settlement_watched_addresses` (gauge): addresses watched for income
//! - `settlement_incoming_payments_total` (counter): by currency, stage

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Broadcast outcome label values.
pub const OUTCOME_ACCEPTED: &str = "accepted";
pub const OUTCOME_REJECTED: &str = "rejected";
pub const OUTCOME_UNKNOWN: &str = "unknown";
pub const OUTCOME_REPLAYED: &str = "replayed";

/// Incoming payment stage label values.
pub const INCOMING_DETECTED: &str = "detected";
pub const INCOMING_FINAL: &str = "final";

/// Install the Prometheus exporter listening on `addr`.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics exporter listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_address_issued(currency: &str) {
    metrics::counter!("settlement_addresses_issued_total", "currency" => currency.to_string())
        .increment(1);
}

pub fn record_broadcast(currency: &str, outcome: &'static str) {
    metrics::counter!(
        "settlement_broadcasts_total",
        "currency" => currency.to_string(),
        "outcome" => outcome
    )
    .increment(1);
}

pub fn record_fee(currency: &str, fee: u128) {
    metrics::histogram!("settlement_fee_subunits", "currency" => currency.to_string())
        .record(fee as f64);
}

pub fn set_tracked_transactions(count: usize) {
    metrics::gauge!("settlement_tracked_transactions").set(count as f64);
}

pub fn record_tracker_transition(state: &'static str) {
    metrics::counter!("settlement_tracker_transitions_total", "state" => state).increment(1);
}

pub fn record_node_health(node: &str, healthy: bool) {
    metrics::gauge!("settlement_node_health", "node" => node.to_string())
        .set(if healthy { 1.0 } else { 0.0 });
}

pub fn set_watched_addresses(count: usize) {
    metrics::gauge!("settlement_watched_addresses").set(count as f64);
}

pub fn record_incoming_payment(currency: &str, stage: &'static str) {
    metrics::counter!(
        "settlement_incoming_payments_total",
        "currency" => currency.to_string(),
        "stage" => stage
    )
    .increment(1);
}
