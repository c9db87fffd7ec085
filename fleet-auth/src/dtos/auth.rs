use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use validator::Validate;

use crate::models::{Platform, UserSummary};

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct LoginRequest {
    /// Email, phone or employee/driver code depending on the user type.
    #[validate(length(min = 1, max = 150, message = "Username is required"))]
    #[schema(example = "alice@acme.test")]
    pub username: String,

    #[validate(length(min = 1, max = 256, message = "Password is required"))]
    #[schema(example = "Secret123!")]
    pub password: String,

    #[validate(length(min = 1, max = 50, message = "Invalid tenant id"))]
    #[schema(example = "ACME")]
    pub tenant_id: Option<String>,

    #[serde(default)]
    pub platform: Platform,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct LoginResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[schema(example = "Bearer")]
    pub token_type: String,
    #[schema(example = 3600)]
    pub expires_in: i64,
    pub user: UserSummary,
}

#[derive(Debug, Deserialize, Validate, ToSchema)]
pub struct RefreshRequest {
    #[validate(length(min = 1, message = "Refresh token is required"))]
    pub refresh_token: String,
}

#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct TokenResponse {
    pub access_token: String,
    pub refresh_token: String,
    #[schema(example = "Bearer")]
    pub token_type: String,
    #[schema(example = 3600)]
    pub expires_in: i64,
}
