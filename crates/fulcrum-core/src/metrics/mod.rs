//! Prometheus metrics.
//!
//! The `metrics` facade keeps recording sites cheap and decoupled: every
//! helper below is a no-op until [`install_recorder`] installs the global
//! Prometheus recorder, so tests and library consumers never need metrics
//! plumbing. The rendered exposition is served by the `/metrics` endpoint
//! through [`render`].

use std::sync::OnceLock;

use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{BuildError, PrometheusBuilder, PrometheusHandle};

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the process-wide Prometheus recorder. Safe to call once;
/// subsequent calls keep the first handle.
pub fn install_recorder() -> Result<(), BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    let _ = PROMETHEUS_HANDLE.set(handle);
    Ok(())
}

/// Current Prometheus text exposition, empty before [`install_recorder`].
pub fn render() -> String {
    PROMETHEUS_HANDLE
        .get()
        .map(PrometheusHandle::render)
        .unwrap_or_default()
}

/// One inbound proxy transaction.
pub fn record_request() {
    counter!("proxy_requests").increment(1);
}

pub fn record_request_for_method(method: &str) {
    counter!("proxy_requests_method", "method" => method.to_string()).increment(1);
}

/// A transaction that failed before reaching any method accounting.
pub fn record_request_error() {
    counter!("proxy_requests_error").increment(1);
}

/// Failed methods plus the transaction-level error counter.
pub fn record_error_methods<S: AsRef<str>>(methods: &[S]) {
    for method in methods {
        counter!("proxy_requests_method_error", "method" => method.as_ref().to_string())
            .increment(1);
    }
    counter!("proxy_requests_error").increment(1);
}

/// Positions served from cache, per method and in total.
pub fn record_cached_methods<S: AsRef<str>>(methods: &[S]) {
    counter!("proxy_requests_cached").increment(methods.len() as u64);
    for method in methods {
        counter!("proxy_requests_method_cached", "method" => method.as_ref().to_string())
            .increment(1);
    }
}

/// Upstream round-trip duration in milliseconds.
pub fn record_request_duration(millis: f64) {
    histogram!("proxy_request_duration").record(millis);
}

/// Live entry count of the in-process store.
pub fn set_cache_size(size: usize) {
    gauge!("proxy_cache_size").set(size as f64);
}
