//! Prometheus metrics recording and endpoint.

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Install the Prometheus metrics recorder and return the handle for rendering.
pub fn install_prometheus_recorder() -> anyhow::Result<PrometheusHandle> {
    Ok(PrometheusBuilder::new().install_recorder()?)
}

/// Record a handled control request.
pub fn record_request(route: &str, status: u16, duration_secs: f64) {
    let labels = [("route", route.to_string()), ("status", status.to_string())];
    metrics::counter!("http_requests_total", &labels).increment(1);
    metrics::histogram!("http_request_duration_seconds", &labels).record(duration_secs);
}

/// Record the number of open sessions.
pub fn record_active_sessions(count: usize) {
    metrics::gauge!("sessions_active").set(count as f64);
}

pub fn record_session_created() {
    metrics::counter!("sessions_created_total").increment(1);
}

pub fn record_session_ended(reason: &'static str) {
    let labels = [("reason", reason.to_string())];
    metrics::counter!("sessions_ended_total", &labels).increment(1);
}

/// Record an audio socket attaching to a session.
pub fn record_audio_connect() {
    metrics::gauge!("audio_connections_active").increment(1.0);
}

pub fn record_audio_disconnect() {
    metrics::gauge!("audio_connections_active").decrement(1.0);
}

/// Record an error of a given kind.
pub fn record_error(kind: &str) {
    let labels = [("kind", kind.to_string())];
    metrics::counter!("errors_total", &labels).increment(1);
}
