//! Prometheus scrape endpoint.

use crate::error::AppError;
use axum::{
    http::header,
    response::{IntoResponse, Response},
};
use metrics_exporter_prometheus::PrometheusHandle;

/// Content type of the Prometheus text exposition format.
pub const PROMETHEUS_CONTENT_TYPE: &str = "text/plain; version=0.0.4";

/// Render the recorder behind `handle` for a scrape.
///
/// Responds 503 when no recorder was installed (metrics disabled, or another
/// recorder already owned the process).
#[must_use]
pub fn render_metrics(handle: Option<&PrometheusHandle>) -> Response {
    match handle {
        Some(handle) => ([(header::CONTENT_TYPE, PROMETHEUS_CONTENT_TYPE)], handle.render()).into_response(),
        None => AppError::unavailable("Metrics are disabled").into_response(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;

    #[test]
    fn missing_recorder_is_unavailable() {
        let response = render_metrics(None);
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn renders_recorder_output() {
        let recorder = metrics_exporter_prometheus::PrometheusBuilder::new().build_recorder();
        let response = render_metrics(Some(&recorder.handle()));

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers()[header::CONTENT_TYPE],
            PROMETHEUS_CONTENT_TYPE
        );
    }
}
