//! Prometheus metrics for the Tyler server.
//!
//! Exposes counters for sign-ins, gatekeeper redirects, uploads, deletions and
//! multi-step rollbacks.
//!
//! # Security Note
//!
//! The `/metrics` endpoint is unauthenticated so Prometheus can scrape it.
//! Metrics carry no member data (no emails, ids or document names) but do
//! reveal aggregate activity. Restrict the endpoint to scraper addresses at
//! the network level, or disable it with `server.metrics_enabled = false`.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use std::sync::{LazyLock, Once};

/// Global Prometheus registry for all metrics.
pub static REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

// Sessions
pub static SIGN_INS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new("tyler_sign_ins_total", "Sign-in attempts by outcome"),
        &["outcome"],
    )
    .expect("metric creation failed")
});

pub static GATE_REDIRECTS: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tyler_gate_redirects_total",
        "Page requests redirected to sign-in by the gatekeeper",
    )
    .expect("metric creation failed")
});

pub static SESSIONS_PURGED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tyler_sessions_purged_total",
        "Expired or revoked sessions removed by the sweeper",
    )
    .expect("metric creation failed")
});

// Documents
pub static RITUALS_UPLOADED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("tyler_rituals_uploaded_total", "Binaries stored by uploads")
        .expect("metric creation failed")
});

pub static BYTES_UPLOADED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("tyler_bytes_uploaded_total", "Total bytes of uploaded binaries")
        .expect("metric creation failed")
});

pub static UPLOAD_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "tyler_upload_duration_seconds",
            "Time taken to store an uploaded binary",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
    )
    .expect("metric creation failed")
});

pub static RITUALS_DELETED: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new("tyler_rituals_deleted_total", "Ritual documents deleted")
        .expect("metric creation failed")
});

pub static BINARY_CLEANUP_FAILURES: LazyLock<IntCounter> = LazyLock::new(|| {
    IntCounter::new(
        "tyler_binary_cleanup_failures_total",
        "Binaries left behind because best-effort deletion failed",
    )
    .expect("metric creation failed")
});

// Members
pub static USER_ROLLBACKS: LazyLock<IntCounterVec> = LazyLock::new(|| {
    IntCounterVec::new(
        Opts::new(
            "tyler_user_rollbacks_total",
            "Compensating actions after a partial member operation, by result",
        ),
        &["result"],
    )
    .expect("metric creation failed")
});

/// Guard to ensure metrics are only registered once.
static REGISTER_ONCE: Once = Once::new();

/// Register all metrics with the global registry.
///
/// Idempotent, so integration tests may build many routers.
pub fn register_metrics() {
    REGISTER_ONCE.call_once(|| {
        REGISTRY
            .register(Box::new(SIGN_INS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(GATE_REDIRECTS.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(SESSIONS_PURGED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(RITUALS_UPLOADED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BYTES_UPLOADED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(UPLOAD_DURATION.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(RITUALS_DELETED.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(BINARY_CLEANUP_FAILURES.clone()))
            .expect("metric registration failed");
        REGISTRY
            .register(Box::new(USER_ROLLBACKS.clone()))
            .expect("metric registration failed");
    });
}

/// GET /metrics - Prometheus text exposition.
pub async fn metrics_handler() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();

    match encoder.encode(&metric_families, &mut buffer) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            buffer,
        ),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            format!("Failed to encode metrics: {e}").into_bytes(),
        ),
    }
}

/// Record a sign-in outcome (`success`, `rejected`, `pending`, `error`).
pub fn record_sign_in(outcome: &str) {
    SIGN_INS.with_label_values(&[outcome]).inc();
}

/// Record the result of a compensating action (`succeeded`, `failed`).
pub fn record_rollback(result: &str) {
    USER_ROLLBACKS.with_label_values(&[result]).inc();
}
