use service_core::{
    axum::{extract::State, http::StatusCode, response::IntoResponse, Json},
    serde_json::json,
};

use crate::AppState;

/// Service health check
///
/// A down durable tier only degrades caching, so it is reported but does not
/// fail the check.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 503, description = "Database unavailable")
    ),
    tag = "Observability"
)]
pub async fn health_check(State(state): State<AppState>) -> impl IntoResponse {
    let database = match state.credentials.health_check().await {
        Ok(()) => "up",
        Err(e) => {
            tracing::error!(error = %e, "Database health check failed");
            "down"
        }
    };

    let cache = match state.cache.health_check().await {
        Ok(()) => "up",
        Err(e) => {
            tracing::warn!(error = %e, "Durable store health check failed");
            "down"
        }
    };

    let (status, label) = if database == "up" {
        (StatusCode::OK, "healthy")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "degraded")
    };

    (
        status,
        Json(json!({
            "status": label,
            "service": state.config.service_name,
            "version": state.config.service_version,
            "environment": format!("{:?}", state.config.environment),
            "checks": {
                "database": database,
                "cache": cache,
                "cache_mode": state.cache.mode(),
            }
        })),
    )
}
