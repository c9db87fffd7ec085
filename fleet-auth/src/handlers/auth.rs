use service_core::{
    axum::{
        extract::{Path, State},
        http::{HeaderMap, StatusCode},
        response::IntoResponse,
        Json,
    },
    error::AppError,
};

use crate::{
    dtos::{
        auth::{LoginRequest, LoginResponse, RefreshRequest, TokenResponse},
        ErrorResponse, MessageResponse,
    },
    middleware::{bearer_token, AuthUser},
    models::{TokenClaims, UserType},
    services::{LoginCommand, ServiceError},
    utils::{Password, ValidatedJson},
    AppState,
};

const TOKEN_TYPE: &str = "Bearer";

/// Login as one of the principal types
#[utoipa::path(
    post,
    path = "/auth/{user_type}/login",
    params(
        ("user_type" = String, Path, description = "admin, employee, driver or vendor")
    ),
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 403, description = "Account inactive", body = ErrorResponse),
        (status = 404, description = "Unknown user type", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 429, description = "Too many login attempts", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn login(
    State(state): State<AppState>,
    Path(user_type): Path<String>,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_type: UserType = user_type
        .parse()
        .map_err(|e: String| AppError::NotFound(anyhow::anyhow!(e)))?;

    let outcome = state
        .auth_service
        .login(LoginCommand {
            user_type,
            identifier: req.username.trim().to_string(),
            password: Password::new(req.password),
            tenant_id: req.tenant_id,
            platform: req.platform,
        })
        .await?;

    Ok((
        StatusCode::OK,
        Json(LoginResponse {
            access_token: outcome.tokens.access_token,
            refresh_token: outcome.tokens.refresh_token,
            token_type: TOKEN_TYPE.to_string(),
            expires_in: outcome.tokens.expires_in,
            user: outcome.user,
        }),
    ))
}

/// Introspect a bearer token for an internal caller
#[utoipa::path(
    post,
    path = "/auth/introspect",
    responses(
        (status = 200, description = "Token claims", body = TokenClaims),
        (status = 401, description = "Missing secret, invalid or superseded token", body = ErrorResponse),
        (status = 403, description = "Account inactive", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(
        ("introspect_secret" = [], "bearer_auth" = [])
    )
)]
pub async fn introspect(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, AppError> {
    let token = bearer_token(&headers).ok_or(ServiceError::InvalidToken)?;
    let claims = state.introspection.validate_bearer(token).await?;
    Ok((StatusCode::OK, Json(claims)))
}

/// Exchange a refresh token for a new token pair
#[utoipa::path(
    post,
    path = "/auth/refresh-token",
    request_body = RefreshRequest,
    responses(
        (status = 200, description = "Token refreshed successfully", body = TokenResponse),
        (status = 401, description = "Invalid, revoked or superseded refresh token", body = ErrorResponse),
        (status = 403, description = "Account inactive", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn refresh(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RefreshRequest>,
) -> Result<impl IntoResponse, AppError> {
    let issued = state.auth_service.refresh(&req.refresh_token).await?;
    Ok((
        StatusCode::OK,
        Json(TokenResponse {
            access_token: issued.access_token,
            refresh_token: issued.refresh_token,
            token_type: TOKEN_TYPE.to_string(),
            expires_in: issued.expires_in,
        }),
    ))
}

/// Logout and revoke the current session
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Logged out successfully", body = MessageResponse),
        (status = 401, description = "Invalid token", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn logout(
    State(state): State<AppState>,
    AuthUser(claims): AuthUser,
) -> Result<impl IntoResponse, AppError> {
    state.auth_service.logout(&claims).await?;
    Ok((
        StatusCode::OK,
        Json(MessageResponse {
            message: "Logged out successfully".to_string(),
        }),
    ))
}

/// Claims of the calling principal
#[utoipa::path(
    get,
    path = "/auth/me",
    responses(
        (status = 200, description = "Current principal", body = TokenClaims),
        (status = 401, description = "Invalid token", body = ErrorResponse)
    ),
    tag = "Authentication",
    security(
        ("bearer_auth" = [])
    )
)]
pub async fn me(AuthUser(claims): AuthUser) -> Json<TokenClaims> {
    Json(claims)
}
