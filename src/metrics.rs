/// Metrics and telemetry for netwarden
///
/// Provides Prometheus-compatible metrics for monitoring:
/// - Background job runs, durations and skipped ticks
/// - Per-network reconciliation outcomes
/// - Expiration revocations

use lazy_static::lazy_static;
use prometheus::{
    register_histogram_vec, register_int_counter, register_int_counter_vec, register_int_gauge_vec,
    Encoder, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, TextEncoder,
};

lazy_static! {
    // ========== Background Job Metrics ==========

    /// Background job executions by job and result
    pub static ref JOB_RUNS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "netwarden_job_runs_total",
        "Total number of background job runs",
        &["job", "result"]
    )
    .unwrap();

    /// Background job duration in seconds
    pub static ref JOB_RUN_DURATION_SECONDS: HistogramVec = register_histogram_vec!(
        "netwarden_job_run_duration_seconds",
        "Background job run time in seconds",
        &["job"],
        vec![0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0]
    )
    .unwrap();

    /// Ticks dropped because the previous run was still going
    pub static ref JOB_RUNS_SKIPPED_TOTAL: IntCounterVec = register_int_counter_vec!(
        "netwarden_job_runs_skipped_total",
        "Total number of job ticks skipped while a run was in progress",
        &["job"]
    )
    .unwrap();

    /// Whether a job is currently running
    pub static ref JOB_RUNNING: IntGaugeVec = register_int_gauge_vec!(
        "netwarden_job_running",
        "1 while a job run is in progress",
        &["job"]
    )
    .unwrap();

    // ========== Reconciliation Metrics ==========

    /// Networks handled by the peer reconciler by outcome
    pub static ref RECONCILED_NETWORKS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "netwarden_reconciled_networks_total",
        "Networks processed by peer reconciliation",
        &["outcome"]
    )
    .unwrap();

    /// Member rows written by reconciliation
    pub static ref MEMBERS_WRITTEN_TOTAL: IntCounter = register_int_counter!(
        "netwarden_members_written_total",
        "Member rows created or changed by peer reconciliation"
    )
    .unwrap();

    // ========== Expiration Metrics ==========

    pub static ref MEMBERS_DEAUTHORIZED_TOTAL: IntCounter = register_int_counter!(
        "netwarden_members_deauthorized_total",
        "Members deauthorized because their owner expired"
    )
    .unwrap();

    pub static ref USERS_DEACTIVATED_TOTAL: IntCounter = register_int_counter!(
        "netwarden_users_deactivated_total",
        "Users deactivated after their account expired"
    )
    .unwrap();
}

/// Render metrics in Prometheus text format
pub fn render_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        tracing::warn!("Failed to encode metrics: {}", e);
    }
    String::from_utf8(buffer).unwrap_or_default()
}

/// Record a finished background job run
pub fn record_job_run(job: &str, result: &str, duration: f64) {
    JOB_RUNS_TOTAL.with_label_values(&[job, result]).inc();
    JOB_RUN_DURATION_SECONDS
        .with_label_values(&[job])
        .observe(duration);
}

/// Record a tick that was dropped because the job was still running
pub fn record_job_skipped(job: &str) {
    JOB_RUNS_SKIPPED_TOTAL.with_label_values(&[job]).inc();
}

pub fn set_job_running(job: &str, running: bool) {
    JOB_RUNNING
        .with_label_values(&[job])
        .set(if running { 1 } else { 0 });
}

/// Record the per-network counts of a reconciliation run
pub fn record_reconcile(synced: u64, skipped: u64, failed: u64, deduplicated: u64, members_written: u64) {
    RECONCILED_NETWORKS_TOTAL.with_label_values(&["synced"]).inc_by(synced);
    RECONCILED_NETWORKS_TOTAL.with_label_values(&["skipped"]).inc_by(skipped);
    RECONCILED_NETWORKS_TOTAL.with_label_values(&["failed"]).inc_by(failed);
    RECONCILED_NETWORKS_TOTAL
        .with_label_values(&["deduplicated"])
        .inc_by(deduplicated);
    MEMBERS_WRITTEN_TOTAL.inc_by(members_written);
}

/// Record the counts of an expiration run
pub fn record_expiry(users_deactivated: u64, members_deauthorized: u64) {
    USERS_DEACTIVATED_TOTAL.inc_by(users_deactivated);
    MEMBERS_DEAUTHORIZED_TOTAL.inc_by(members_deauthorized);
}
