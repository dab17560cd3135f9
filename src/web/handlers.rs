//! HTTP request handlers.

use super::AppState;
use crate::metrics::{MetricSet, MetricsError, CONTENT_TYPE};
use crate::probe::resolve_params;

use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{IntoResponse, Response},
};

// ============================================================================
// Probe
// ============================================================================

/// Run one probe and answer with its metrics.
///
/// Probe failures still yield `200 OK` with zeroed statistics, so the caller
/// sees the failure through `ping_success`. Only a broken metric set fails
/// the response.
pub async fn handle_probe(
    State(state): State<AppState>,
    Query(params): Query<Vec<(String, String)>>,
) -> Response {
    let resolved = resolve_params(params.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    for diagnostic in &resolved.diagnostics {
        diagnostic.emit();
    }
    let request = resolved.request;
    tracing::debug!(?request, defaulted = ?resolved.defaulted, "Probe request received");

    let metrics = match MetricSet::new() {
        Ok(metrics) => metrics,
        Err(e) => return metrics_failure(e),
    };

    let result = state.runner.run(&request).await;
    metrics.observe(&result);

    match metrics.encode() {
        Ok(body) => ([(header::CONTENT_TYPE, CONTENT_TYPE)], body).into_response(),
        Err(e) => metrics_failure(e),
    }
}

fn metrics_failure(e: MetricsError) -> Response {
    tracing::error!(error = %e, "Failed to build probe metrics");
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response()
}

// ============================================================================
// Pages
// ============================================================================

const INDEX_OPTIONS: &str =
    "[&count=5&size=56&interval=1s&timeout=10s&ttl=64&protocol=ip4&packet=icmp]";

pub async fn handle_index(State(state): State<AppState>) -> impl IntoResponse {
    format!(
        "echoprobe\n\nProbe a host: {}?target=<host>{}\n",
        state.config.probe_path, INDEX_OPTIONS
    )
}

pub async fn handle_healthz() -> impl IntoResponse {
    "ok"
}
