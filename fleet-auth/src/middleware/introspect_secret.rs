use axum::{
    extract::{Request, State},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;
use subtle::ConstantTimeEq;

use crate::AppState;

pub const INTROSPECT_SECRET_HEADER: &str = "x-introspect-secret";

/// Gate internal endpoints behind the shared introspection secret.
pub async fn introspect_secret_middleware(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let presented = request
        .headers()
        .get(INTROSPECT_SECRET_HEADER)
        .and_then(|value| value.to_str().ok());

    let expected = state.config.security.introspect_secret.as_bytes();

    match presented {
        Some(secret) if bool::from(secret.as_bytes().ct_eq(expected)) => Ok(next.run(request).await),
        _ => {
            tracing::warn!("Rejected introspection call with missing or wrong secret");
            Err(AppError::AuthError {
                code: "invalid_introspect_secret",
                message: "Missing or invalid introspection secret".to_string(),
            })
        }
    }
}
