// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics for the DNS reconciliation engine.
//!
//! All metrics carry the namespace prefix `maas_dns_`.
//!
//! # Metrics Categories
//!
//! - **Reconciliation Metrics** - Attempts by strategy and outcome, and their duration
//! - **Nameserver Metrics** - `rndc` commands and dynamic update lines sent to BIND9
//! - **Convergence Metrics** - SOA polls issued while waiting for a serial
//! - **Escalation Metrics** - Consecutive failed attempts
//!
//! # Example
//!
//! ```rust,no_run
//! use dnssync::metrics::record_reconciliation;
//!
//! record_reconciliation("full_reload", "success", std::time::Duration::from_secs(1));
//! ```

use prometheus::{
    CounterVec, Encoder, Gauge, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};
use std::sync::LazyLock;
use std::time::Duration;

// ============================================================================
// Metric Name Constants
// ============================================================================

/// Namespace prefix for all engine metrics
const METRICS_NAMESPACE: &str = "maas_dns";

// ============================================================================
// Global Metrics Registry
// ============================================================================

/// Global Prometheus metrics registry
///
/// All metrics are registered in this registry and exposed via `/metrics` endpoint.
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// ============================================================================
// Reconciliation Metrics
// ============================================================================

/// Total number of reconciliation attempts by strategy and status
///
/// Labels:
/// - `strategy`: `full_reload`, `dynamic_update`, `noop`
/// - `status`: `success`, `error`
pub static RECONCILIATION_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_reconciliations_total"),
        "Total number of reconciliation attempts by strategy and status",
    );
    let counter = CounterVec::new(opts, &["strategy", "status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Duration of reconciliation attempts in seconds
pub static RECONCILIATION_DURATION_SECONDS: LazyLock<HistogramVec> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_reconciliation_duration_seconds"),
        "Duration of reconciliation attempts in seconds by strategy",
    )
    .buckets(vec![0.01, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0, 120.0]);
    let histogram = HistogramVec::new(opts, &["strategy"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

// ============================================================================
// Nameserver Metrics
// ============================================================================

/// Total number of rndc invocations
///
/// Labels:
/// - `command`: rndc sub-command (`freeze`, `thaw`, `reconfig`, `sync`)
/// - `status`: `success`, `error`
pub static RNDC_COMMANDS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_rndc_commands_total"),
        "Total number of rndc commands by command and status",
    );
    let counter = CounterVec::new(opts, &["command", "status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Total number of nsupdate `update` lines sent
///
/// Labels:
/// - `operation`: `add`, `delete`
pub static DYNAMIC_UPDATE_LINES_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_dynamic_update_lines_total"),
        "Total number of dynamic update lines applied by operation",
    );
    let counter = CounterVec::new(opts, &["operation"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Convergence Metrics
// ============================================================================

/// Total number of SOA polls
///
/// Labels:
/// - `outcome`: `current`, `stale`, `error`
pub static CONVERGENCE_POLLS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_convergence_polls_total"),
        "Total number of SOA serial polls by outcome",
    );
    let counter = CounterVec::new(opts, &["outcome"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

// ============================================================================
// Escalation Metrics
// ============================================================================

/// Number of consecutive failed reconciliation attempts
pub static CONSECUTIVE_FAILURES: LazyLock<Gauge> = LazyLock::new(|| {
    let gauge = Gauge::new(
        format!("{METRICS_NAMESPACE}_consecutive_failed_attempts"),
        "Number of consecutive failed reconciliation attempts",
    )
    .unwrap();
    METRICS_REGISTRY.register(Box::new(gauge.clone())).unwrap();
    gauge
});

// ============================================================================
// Helper Functions
// ============================================================================

/// Record a finished reconciliation attempt
///
/// # Arguments
/// * `strategy` - `full_reload`, `dynamic_update` or `noop`
/// * `status` - `success` or `error`
/// * `duration` - Duration of the attempt
pub fn record_reconciliation(strategy: &str, status: &str, duration: Duration) {
    RECONCILIATION_TOTAL
        .with_label_values(&[strategy, status])
        .inc();
    RECONCILIATION_DURATION_SECONDS
        .with_label_values(&[strategy])
        .observe(duration.as_secs_f64());
}

/// Record an rndc invocation
pub fn record_rndc_command(command: &str, success: bool) {
    let status = if success { "success" } else { "error" };
    RNDC_COMMANDS_TOTAL
        .with_label_values(&[command, status])
        .inc();
}

/// Record `count` nsupdate lines of `operation` (`add` or `delete`)
pub fn record_dynamic_update_lines(operation: &str, count: usize) {
    #[allow(clippy::cast_precision_loss)]
    DYNAMIC_UPDATE_LINES_TOTAL
        .with_label_values(&[operation])
        .inc_by(count as f64);
}

/// Record one SOA poll
pub fn record_convergence_poll(outcome: &str) {
    CONVERGENCE_POLLS_TOTAL.with_label_values(&[outcome]).inc();
}

/// Publish the current number of consecutive failed attempts
pub fn set_consecutive_failures(count: u32) {
    CONSECUTIVE_FAILURES.set(f64::from(count));
}

/// Gather and encode all metrics in Prometheus text format
///
/// # Errors
/// Returns error if encoding fails
pub fn gather_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = METRICS_REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(format!("UTF-8 error: {e}")))
}
