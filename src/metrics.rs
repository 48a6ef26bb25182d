//! Prometheus instrumentation for the withdraw pipeline (spec §6
//! "Metrics").
//!
//! Registry and helper-function shape follows the teacher's
//! `lazy_static!`-backed `prometheus::Registry` convention; the metric
//! catalog itself is scoped to this node's components instead of block
//! indexing.

use prometheus::{
    Encoder, Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge,
    IntGaugeVec, Opts, Registry, TextEncoder,
};
use lazy_static::lazy_static;
use std::sync::Once;
use std::time::Instant;

static INIT: Once = Once::new();

const LATENCY_BUCKETS: &[f64] = &[0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0];

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    // -- pipeline throughput -------------------------------------------
    pub static ref WITHDRAWS_DISCOVERED: IntCounterVec = IntCounterVec::new(
        Opts::new("elabridge_withdraws_discovered_total", "Withdraw transactions discovered by side chain"),
        &["genesis_address"]
    ).unwrap();

    pub static ref WITHDRAWS_PENDING: IntGaugeVec = IntGaugeVec::new(
        Opts::new("elabridge_withdraws_pending", "Withdraw transactions currently pending"),
        &["genesis_address"]
    ).unwrap();

    pub static ref WITHDRAWS_SUCCEEDED: IntCounterVec = IntCounterVec::new(
        Opts::new("elabridge_withdraws_succeeded_total", "Withdraw transactions submitted successfully"),
        &["genesis_address"]
    ).unwrap();

    pub static ref WITHDRAWS_FAILED: IntCounterVec = IntCounterVec::new(
        Opts::new("elabridge_withdraws_failed_total", "Withdraw transactions that failed terminally"),
        &["genesis_address"]
    ).unwrap();

    pub static ref SIDE_CHAIN_HEIGHT: IntGaugeVec = IntGaugeVec::new(
        Opts::new("elabridge_side_chain_height", "Last confirmed height processed per side chain"),
        &["genesis_address"]
    ).unwrap();

    pub static ref MAIN_CHAIN_HEIGHT: IntGauge = IntGauge::new(
        "elabridge_main_chain_height",
        "Last observed main-chain height"
    ).unwrap();

    // -- latency ----------------------------------------------------------
    pub static ref RPC_CALL_DURATION: HistogramVec = HistogramVec::new(
        HistogramOpts::new("elabridge_rpc_call_duration_seconds", "RPC call latency")
            .buckets(LATENCY_BUCKETS.to_vec()),
        &["target", "method"]
    ).unwrap();

    pub static ref SIGNING_ROUND_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new("elabridge_signing_round_duration_seconds", "Time from proposal to quorum reached")
            .buckets(LATENCY_BUCKETS.to_vec())
    ).unwrap();

    // -- errors & retries ---------------------------------------------
    pub static ref RPC_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("elabridge_rpc_errors_total", "RPC errors by target and method"),
        &["target", "method"]
    ).unwrap();

    pub static ref DB_ERRORS: IntCounterVec = IntCounterVec::new(
        Opts::new("elabridge_db_errors_total", "Storage errors by operation"),
        &["op"]
    ).unwrap();

    pub static ref P2P_FRAME_ERRORS: IntCounter = IntCounter::new(
        "elabridge_p2p_frame_errors_total",
        "Malformed or unrecognized p2p frames dropped"
    ).unwrap();

    pub static ref SUBMISSION_DOUBLE_SPEND: IntCounter = IntCounter::new(
        "elabridge_submission_double_spend_total",
        "Withdraw submissions rejected as transient double-spend"
    ).unwrap();

    // -- reservation & signing -----------------------------------------
    pub static ref RESERVATION_QUORUM_RESPONSES: IntGaugeVec = IntGaugeVec::new(
        Opts::new("elabridge_reservation_quorum_responses", "Peer responses received for the active reservation round"),
        &["genesis_address"]
    ).unwrap();

    pub static ref SIGNING_PROPOSALS_ACTIVE: IntGauge = IntGauge::new(
        "elabridge_signing_proposals_active",
        "Multisig proposals currently awaiting quorum"
    ).unwrap();

    pub static ref SIGNING_FEEDBACK: IntCounterVec = IntCounterVec::new(
        Opts::new("elabridge_signing_feedback_total", "Signature feedback received by outcome"),
        &["result"]
    ).unwrap();

    // -- overlay & operational ------------------------------------------
    pub static ref P2P_PEERS_CONNECTED: IntGauge = IntGauge::new(
        "elabridge_p2p_peers_connected",
        "Currently connected arbiter peers"
    ).unwrap();

    pub static ref HTTP_REQUESTS: IntCounterVec = IntCounterVec::new(
        Opts::new("elabridge_http_requests_total", "Status/metrics HTTP requests"),
        &["endpoint", "status"]
    ).unwrap();

    pub static ref UPTIME_SECONDS: IntGauge = IntGauge::new(
        "elabridge_uptime_seconds",
        "Process uptime in seconds"
    ).unwrap();

    pub static ref SERVICE_START_TIMESTAMP: IntGauge = IntGauge::new(
        "elabridge_service_start_timestamp_seconds",
        "Unix timestamp when the process started"
    ).unwrap();
}

/// Registers every metric with the global registry. Idempotent: later
/// calls (including concurrent ones from tests in the same process) are
/// no-ops rather than failing on double registration.
pub fn init_metrics() -> Result<(), Box<dyn std::error::Error>> {
    let mut result = Ok(());
    INIT.call_once(|| {
        result = init_metrics_once();
    });
    result
}

fn init_metrics_once() -> Result<(), Box<dyn std::error::Error>> {
    REGISTRY.register(Box::new(WITHDRAWS_DISCOVERED.clone()))?;
    REGISTRY.register(Box::new(WITHDRAWS_PENDING.clone()))?;
    REGISTRY.register(Box::new(WITHDRAWS_SUCCEEDED.clone()))?;
    REGISTRY.register(Box::new(WITHDRAWS_FAILED.clone()))?;
    REGISTRY.register(Box::new(SIDE_CHAIN_HEIGHT.clone()))?;
    REGISTRY.register(Box::new(MAIN_CHAIN_HEIGHT.clone()))?;

    REGISTRY.register(Box::new(RPC_CALL_DURATION.clone()))?;
    REGISTRY.register(Box::new(SIGNING_ROUND_DURATION.clone()))?;

    REGISTRY.register(Box::new(RPC_ERRORS.clone()))?;
    REGISTRY.register(Box::new(DB_ERRORS.clone()))?;
    REGISTRY.register(Box::new(P2P_FRAME_ERRORS.clone()))?;
    REGISTRY.register(Box::new(SUBMISSION_DOUBLE_SPEND.clone()))?;

    REGISTRY.register(Box::new(RESERVATION_QUORUM_RESPONSES.clone()))?;
    REGISTRY.register(Box::new(SIGNING_PROPOSALS_ACTIVE.clone()))?;
    REGISTRY.register(Box::new(SIGNING_FEEDBACK.clone()))?;

    REGISTRY.register(Box::new(P2P_PEERS_CONNECTED.clone()))?;
    REGISTRY.register(Box::new(HTTP_REQUESTS.clone()))?;
    REGISTRY.register(Box::new(UPTIME_SECONDS.clone()))?;
    REGISTRY.register(Box::new(SERVICE_START_TIMESTAMP.clone()))?;

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)?
        .as_secs();
    SERVICE_START_TIMESTAMP.set(now as i64);

    Ok(())
}

/// Gather metrics in Prometheus text format.
pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = vec![];
    encoder.encode(&metric_families, &mut buffer).unwrap();
    String::from_utf8(buffer).unwrap()
}

/// Timer for measuring durations.
pub struct Timer {
    start: Instant,
}

impl Timer {
    pub fn new() -> Self {
        Self { start: Instant::now() }
    }

    pub fn elapsed_secs(&self) -> f64 {
        self.start.elapsed().as_secs_f64()
    }
}

impl Default for Timer {
    fn default() -> Self {
        Self::new()
    }
}

pub fn record_rpc_call_duration(target: &str, method: &str, duration_secs: f64) {
    RPC_CALL_DURATION.with_label_values(&[target, method]).observe(duration_secs);
}

pub fn increment_rpc_errors(target: &str, method: &str) {
    RPC_ERRORS.with_label_values(&[target, method]).inc();
}

pub fn increment_db_errors(op: &str) {
    DB_ERRORS.with_label_values(&[op]).inc();
}

pub fn set_withdraws_pending(genesis_address: &str, count: i64) {
    WITHDRAWS_PENDING.with_label_values(&[genesis_address]).set(count);
}

pub fn increment_withdraws_discovered(genesis_address: &str, count: u64) {
    WITHDRAWS_DISCOVERED.with_label_values(&[genesis_address]).inc_by(count);
}

pub fn increment_withdraws_succeeded(genesis_address: &str, count: u64) {
    WITHDRAWS_SUCCEEDED.with_label_values(&[genesis_address]).inc_by(count);
}

pub fn increment_withdraws_failed(genesis_address: &str, count: u64) {
    WITHDRAWS_FAILED.with_label_values(&[genesis_address]).inc_by(count);
}

pub fn set_side_chain_height(genesis_address: &str, height: i64) {
    SIDE_CHAIN_HEIGHT.with_label_values(&[genesis_address]).set(height);
}

pub fn update_uptime() {
    let start = SERVICE_START_TIMESTAMP.get();
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_secs();
    UPTIME_SECONDS.set((now as i64 - start).max(0));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_register_without_conflict() {
        init_metrics().unwrap();
    }

    #[test]
    fn gather_includes_registered_metric_names() {
        init_metrics().unwrap();
        set_side_chain_height("side1", 100);
        let output = gather_metrics();
        assert!(output.contains("elabridge_side_chain_height"));
    }

    #[test]
    fn timer_measures_elapsed_time() {
        let timer = Timer::new();
        std::thread::sleep(std::time::Duration::from_millis(5));
        assert!(timer.elapsed_secs() >= 0.004);
    }
}
