// Copyright (c) 2025 Erick Bourgeois, firestoned
// SPDX-License-Identifier: MIT

//! Prometheus metrics and the telemetry HTTP server for the pflb operator.
//!
//! All metrics live under the `pflb` namespace and are exposed together
//! with the health endpoints on one axum server:
//!
//! - `/metrics` - Prometheus text format
//! - `/healthz` - process liveness (always `ok` once serving)
//! - `/readyz` - readiness, probing the firewall's firmware-version call
//!   so a pod only reports ready when pfSense is reachable
//!
//! # Example
//!
//! ```rust,no_run
//! use pflb::metrics::record_reconciliation_success;
//!
//! // Record a successful reconciliation
//! record_reconciliation_success(std::time::Duration::from_secs(1));
//! ```

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use prometheus::{
    CounterVec, Encoder, Histogram, HistogramOpts, IntCounter, Opts, Registry, TextEncoder,
};
use std::sync::LazyLock;
use tracing::info;

use crate::constants::METRICS_SERVER_PATH;
use crate::pfsense::FirewallClient;

/// Namespace prefix for all pflb metrics
const METRICS_NAMESPACE: &str = "pflb";

/// Global Prometheus metrics registry
///
/// All metrics are registered in this registry and exposed via the
/// `/metrics` endpoint.
pub static METRICS_REGISTRY: LazyLock<Registry> = LazyLock::new(Registry::new);

/// Total number of Service reconciliations by outcome
///
/// Labels:
/// - `status`: Outcome (`success`, `error`)
pub static RECONCILIATION_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_reconciliations_total"),
        "Total number of Service reconciliations by outcome",
    );
    let counter = CounterVec::new(opts, &["status"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Duration of reconciliations in seconds
pub static RECONCILIATION_DURATION_SECONDS: LazyLock<Histogram> = LazyLock::new(|| {
    let opts = HistogramOpts::new(
        format!("{METRICS_NAMESPACE}_reconciliation_duration_seconds"),
        "Duration of Service reconciliations in seconds",
    )
    .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0]);
    let histogram = Histogram::with_opts(opts).unwrap();
    METRICS_REGISTRY
        .register(Box::new(histogram.clone()))
        .unwrap();
    histogram
});

/// Total number of external addresses allocated from the firewall
pub static IP_ALLOCATIONS_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        format!("{METRICS_NAMESPACE}_ip_allocations_total"),
        "Total number of external addresses allocated",
    )
    .unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Total number of external addresses released back to the firewall
pub static IP_RELEASES_TOTAL: LazyLock<IntCounter> = LazyLock::new(|| {
    let counter = IntCounter::new(
        format!("{METRICS_NAMESPACE}_ip_releases_total"),
        "Total number of external addresses released",
    )
    .unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Total number of errors by reason code
///
/// Labels:
/// - `reason`: the error's status reason (e.g. `NoFreeAddress`,
///   `PersistFailed`, `TransportFailed`)
pub static ERRORS_TOTAL: LazyLock<CounterVec> = LazyLock::new(|| {
    let opts = Opts::new(
        format!("{METRICS_NAMESPACE}_errors_total"),
        "Total number of errors by reason code",
    );
    let counter = CounterVec::new(opts, &["reason"]).unwrap();
    METRICS_REGISTRY
        .register(Box::new(counter.clone()))
        .unwrap();
    counter
});

/// Record a successful reconciliation
pub fn record_reconciliation_success(duration: Duration) {
    RECONCILIATION_TOTAL.with_label_values(&["success"]).inc();
    RECONCILIATION_DURATION_SECONDS.observe(duration.as_secs_f64());
}

/// Record a failed reconciliation with its reason code
pub fn record_reconciliation_error(duration: Duration, reason: &str) {
    RECONCILIATION_TOTAL.with_label_values(&["error"]).inc();
    RECONCILIATION_DURATION_SECONDS.observe(duration.as_secs_f64());
    ERRORS_TOTAL.with_label_values(&[reason]).inc();
}

/// Record an external address allocation
pub fn record_ip_allocated() {
    IP_ALLOCATIONS_TOTAL.inc();
}

/// Record an external address release
pub fn record_ip_released() {
    IP_RELEASES_TOTAL.inc();
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

/// Build the telemetry router serving metrics and health endpoints.
#[must_use]
pub fn telemetry_router(firewall: Arc<dyn FirewallClient>) -> Router {
    Router::new()
        .route(METRICS_SERVER_PATH, get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .with_state(firewall)
}

/// Serve the telemetry endpoints until the process exits.
///
/// # Errors
///
/// Returns an error if the listener cannot bind or the server fails.
pub async fn serve_telemetry(
    addr: SocketAddr,
    firewall: Arc<dyn FirewallClient>,
) -> anyhow::Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "telemetry server listening");
    axum::serve(listener, telemetry_router(firewall)).await?;
    Ok(())
}

async fn metrics_handler() -> Response {
    match gather_metrics() {
        Ok(body) => (StatusCode::OK, body).into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

async fn healthz_handler() -> &'static str {
    "ok"
}

/// Ready only when the firewall answers its liveness probe.
async fn readyz_handler(State(firewall): State<Arc<dyn FirewallClient>>) -> Response {
    match firewall.firmware_version().await {
        Ok(version) => (StatusCode::OK, version).into_response(),
        Err(e) => (StatusCode::SERVICE_UNAVAILABLE, e.to_string()).into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lb_errors::FirewallError;
    use async_trait::async_trait;

    struct StaticFirewall {
        healthy: bool,
    }

    #[async_trait]
    impl FirewallClient for StaticFirewall {
        async fn fetch_nat_section(
            &self,
        ) -> Result<crate::pfsense::NatSection, FirewallError> {
            Ok(crate::pfsense::NatSection::default())
        }

        async fn persist_nat_section(
            &self,
            _section: &crate::pfsense::NatSection,
        ) -> Result<(), FirewallError> {
            Ok(())
        }

        async fn firmware_version(&self) -> Result<String, FirewallError> {
            if self.healthy {
                Ok("2.7.2-RELEASE".to_string())
            } else {
                Err(FirewallError::Http { status: 502 })
            }
        }
    }

    #[test]
    fn test_record_reconciliation_success() {
        record_reconciliation_success(Duration::from_millis(500));

        let counter = RECONCILIATION_TOTAL.with_label_values(&["success"]);
        assert!(counter.get() > 0.0);
        assert!(RECONCILIATION_DURATION_SECONDS.get_sample_count() > 0);
    }

    #[test]
    fn test_record_reconciliation_error() {
        record_reconciliation_error(Duration::from_millis(250), "PersistFailed");

        let counter = RECONCILIATION_TOTAL.with_label_values(&["error"]);
        assert!(counter.get() > 0.0);
        let errors = ERRORS_TOTAL.with_label_values(&["PersistFailed"]);
        assert!(errors.get() > 0.0);
    }

    #[test]
    fn test_gather_metrics() {
        record_ip_allocated();
        record_ip_released();

        let metrics_text = gather_metrics().unwrap();
        assert!(metrics_text.contains("pflb_ip_allocations_total"));
        assert!(metrics_text.contains("pflb_ip_releases_total"));
        assert!(metrics_text.contains("pflb_reconciliations_total"));
    }

    #[tokio::test]
    async fn test_readyz_reflects_firewall_health() {
        let response = readyz_handler(State(Arc::new(StaticFirewall { healthy: true }))).await;
        assert_eq!(response.status(), StatusCode::OK);

        let response = readyz_handler(State(Arc::new(StaticFirewall { healthy: false }))).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_metrics_endpoint_renders() {
        record_reconciliation_success(Duration::from_millis(1));

        let response = metrics_handler().await;
        assert_eq!(response.status(), StatusCode::OK);
    }
}
