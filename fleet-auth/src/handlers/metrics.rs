use service_core::axum::{extract::State, http::StatusCode, response::IntoResponse};

use crate::AppState;

/// Prometheus text exposition of the process metrics.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    match &state.metrics {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (
            StatusCode::SERVICE_UNAVAILABLE,
            "metrics recorder not installed".to_string(),
        ),
    }
}
