//! Prometheus metrics.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `zephyr_requests_total` | Counter | `protocol`, `status` |
//! | `zephyr_request_duration_seconds` | Histogram | `protocol` |
//! | `zephyr_cache_lookups_total` | Counter | `cache`, `outcome` |
//! | `zephyr_coalesced_requests_total` | Counter | - |
//! | `zephyr_ws_connections_active` | Gauge | - |
//! | `zephyr_sync_updates_total` | Counter | `outcome` |
//!
//! Recording functions are no-ops until a recorder is installed.

use std::sync::OnceLock;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

use crate::error::TelemetryError;
use crate::TelemetryResult;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Name of the request duration histogram.
pub const REQUEST_DURATION: &str = "zephyr_request_duration_seconds";

/// Metrics configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricsConfig {
    /// Whether to install a recorder.
    pub enabled: bool,
    /// Buckets of the request duration histogram, in seconds.
    pub duration_buckets: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            duration_buckets: vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ],
        }
    }
}

/// Builds the Prometheus recorder for `config` without installing it.
pub fn build_recorder(
    config: &MetricsConfig,
) -> TelemetryResult<metrics_exporter_prometheus::PrometheusRecorder> {
    let builder = PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full(REQUEST_DURATION.to_string()),
            &config.duration_buckets,
        )
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    Ok(builder.build_recorder())
}

/// Installs the global recorder and keeps its handle for
/// [`render_metrics`].
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }
    if METRICS_HANDLE.get().is_some() {
        return Err(TelemetryError::AlreadyInitialized("metrics"));
    }

    let recorder = build_recorder(config)?;
    let handle = recorder.handle();
    metrics::set_global_recorder(recorder)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    let _ = METRICS_HANDLE.set(handle);

    describe_metrics();
    Ok(())
}

/// Renders the exposition text, or `None` if no recorder was installed.
pub fn render_metrics() -> Option<String> {
    METRICS_HANDLE.get().map(PrometheusHandle::render)
}

/// Registers help text for every Zephyr metric.
pub fn describe_metrics() {
    describe_counter!("zephyr_requests_total", "Requests dispatched, by protocol and status");
    describe_histogram!(REQUEST_DURATION, "Dispatch latency in seconds");
    describe_counter!("zephyr_cache_lookups_total", "Cache lookups, by cache and outcome");
    describe_counter!(
        "zephyr_coalesced_requests_total",
        "Requests served by joining an identical in-flight request"
    );
    describe_gauge!("zephyr_ws_connections_active", "Open WebSocket sessions");
    describe_counter!("zephyr_sync_updates_total", "Sync layer updates, by outcome");
}

/// Records a dispatched request.
pub fn record_request(protocol: &'static str, status: u16, duration: Duration) {
    counter!(
        "zephyr_requests_total",
        "protocol" => protocol,
        "status" => status.to_string()
    )
    .increment(1);
    histogram!(REQUEST_DURATION, "protocol" => protocol).record(duration.as_secs_f64());
}

/// Records a cache lookup. `cache` is `route` or `response`; `outcome` is
/// `hit` or `miss`.
pub fn record_cache_lookup(cache: &'static str, outcome: &'static str) {
    counter!("zephyr_cache_lookups_total", "cache" => cache, "outcome" => outcome).increment(1);
}

/// Records a request that joined an in-flight duplicate.
pub fn record_coalesced() {
    counter!("zephyr_coalesced_requests_total").increment(1);
}

/// Tracks an open WebSocket session until dropped.
#[derive(Debug)]
#[must_use = "the gauge is decremented when the guard drops"]
pub struct WsConnectionGuard {
    _private: (),
}

impl WsConnectionGuard {
    /// Increments the active connection gauge.
    pub fn new() -> Self {
        gauge!("zephyr_ws_connections_active").increment(1.0);
        Self { _private: () }
    }
}

impl Default for WsConnectionGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for WsConnectionGuard {
    fn drop(&mut self) {
        gauge!("zephyr_ws_connections_active").decrement(1.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(f: impl FnOnce()) -> String {
        let recorder = build_recorder(&MetricsConfig::default()).unwrap();
        let handle = recorder.handle();
        metrics::with_local_recorder(&recorder, f);
        handle.render()
    }

    #[test]
    fn test_request_counter_and_histogram() {
        let text = rendered(|| {
            record_request("http", 200, Duration::from_millis(12));
            record_request("http", 404, Duration::from_millis(3));
        });
        assert!(text.contains(r#"zephyr_requests_total{protocol="http",status="200"} 1"#));
        assert!(text.contains(r#"zephyr_requests_total{protocol="http",status="404"} 1"#));
        assert!(text.contains("zephyr_request_duration_seconds_bucket"));
    }

    #[test]
    fn test_cache_and_coalescing() {
        let text = rendered(|| {
            record_cache_lookup("response", "hit");
            record_cache_lookup("response", "hit");
            record_coalesced();
        });
        assert!(text.contains(r#"zephyr_cache_lookups_total{cache="response",outcome="hit"} 2"#));
        assert!(text.contains("zephyr_coalesced_requests_total 1"));
    }

    #[test]
    fn test_ws_gauge_returns_to_zero() {
        let recorder = build_recorder(&MetricsConfig::default()).unwrap();
        let handle = recorder.handle();
        let while_open = metrics::with_local_recorder(&recorder, || {
            let first = WsConnectionGuard::new();
            let second = WsConnectionGuard::new();
            drop(first);
            let text = handle.render();
            drop(second);
            text
        });
        assert!(while_open.contains("zephyr_ws_connections_active 1"));
        assert!(handle
            .render()
            .contains("zephyr_ws_connections_active 0"));
    }

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_request("tcp", 200, Duration::ZERO);
        record_coalesced();
        let _guard = WsConnectionGuard::new();
    }
}
