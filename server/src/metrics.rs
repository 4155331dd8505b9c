//! # Prometheus Metrics
//!
//! Exposes operational metrics for the tracker. Scraped by Prometheus at
//! the `/metrics` HTTP endpoint on the configured metrics port.
//!
//! All metrics are registered in a dedicated [`prometheus::Registry`] so
//! they do not collide with any default global registry consumers.

use axum::http::StatusCode;
use axum::response::IntoResponse;
use prometheus::{Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Registry, TextEncoder};
use std::sync::Arc;

/// Holds all Prometheus metric handles for the server.
///
/// Clone-friendly (wraps `Arc` internally via prometheus handles) so it
/// can be shared across request handlers.
#[derive(Clone)]
pub struct TrackerMetrics {
    /// Prometheus registry that owns all metrics below.
    registry: Registry,
    /// Total ledger entries applied since this process started.
    pub entries_applied_total: IntCounter,
    /// Total sessions issued through the auth endpoint.
    pub sessions_issued_total: IntCounter,
    /// Total mutating requests rejected by the auth gate.
    pub auth_denied_total: IntCounter,
    /// Current number of tracked subjects.
    pub subjects: IntGauge,
    /// Histogram of ledger apply latency in seconds.
    pub apply_latency_seconds: Histogram,
}

impl TrackerMetrics {
    /// Creates and registers all metrics. Call once at startup.
    pub fn new() -> Self {
        let registry = Registry::new_custom(Some("tally".into()), None)
            .expect("failed to create prometheus registry");

        let entries_applied_total = IntCounter::new(
            "entries_applied_total",
            "Total number of ledger entries applied",
        )
        .expect("metric creation");
        registry
            .register(Box::new(entries_applied_total.clone()))
            .expect("metric registration");

        let sessions_issued_total = IntCounter::new(
            "sessions_issued_total",
            "Total number of sessions issued after secret authentication",
        )
        .expect("metric creation");
        registry
            .register(Box::new(sessions_issued_total.clone()))
            .expect("metric registration");

        let auth_denied_total = IntCounter::new(
            "auth_denied_total",
            "Total number of mutating requests rejected by the auth gate",
        )
        .expect("metric creation");
        registry
            .register(Box::new(auth_denied_total.clone()))
            .expect("metric registration");

        let subjects = IntGauge::new("subjects", "Current number of tracked subjects")
            .expect("metric creation");
        registry
            .register(Box::new(subjects.clone()))
            .expect("metric registration");

        let apply_latency_seconds = Histogram::with_opts(
            HistogramOpts::new(
                "apply_latency_seconds",
                "End-to-end ledger apply latency in seconds",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
            ]),
        )
        .expect("metric creation");
        registry
            .register(Box::new(apply_latency_seconds.clone()))
            .expect("metric registration");

        Self {
            registry,
            entries_applied_total,
            sessions_issued_total,
            auth_denied_total,
            subjects,
            apply_latency_seconds,
        }
    }

    /// Encodes all registered metrics into the Prometheus text exposition format.
    pub fn encode(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer).expect("prometheus output is valid utf-8"))
    }
}

impl Default for TrackerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Shared metrics state passed to axum handlers.
pub type SharedMetrics = Arc<TrackerMetrics>;

/// Axum handler that renders `/metrics` in Prometheus text format.
///
/// Returns HTTP 500 if encoding fails (should never happen in practice).
pub async fn metrics_handler(
    axum::extract::State(metrics): axum::extract::State<SharedMetrics>,
) -> impl IntoResponse {
    match metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("failed to encode metrics: {}", e);
            (StatusCode::INTERNAL_SERVER_ERROR, "metrics encoding failed").into_response()
        }
    }
}
