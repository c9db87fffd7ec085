use service_core::error::AppError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ServiceError {
    /// Unknown identifier and wrong password are deliberately indistinguishable.
    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Account is inactive")]
    AccountInactive,

    #[error("Invalid token")]
    InvalidToken,

    #[error("Session superseded by a newer login")]
    SessionSuperseded,

    #[error("Authentication process failed: {0}")]
    AuthProcessFailed(anyhow::Error),

    #[error("Token store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}

impl ServiceError {
    /// Stable label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ServiceError::InvalidCredentials => "invalid_credentials",
            ServiceError::AccountInactive => "account_inactive",
            ServiceError::InvalidToken => "invalid_token",
            ServiceError::SessionSuperseded => "session_superseded",
            ServiceError::AuthProcessFailed(_) => "auth_process_failed",
            ServiceError::StoreUnavailable(_) => "store_unavailable",
            ServiceError::Forbidden(_) => "forbidden",
            ServiceError::Validation(_) => "validation",
            ServiceError::Database(_) => "database",
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::InvalidCredentials => AppError::AuthError {
                code: "invalid_credentials",
                message: "Invalid credentials".to_string(),
            },
            ServiceError::InvalidToken => AppError::AuthError {
                code: "invalid_token",
                message: "Invalid or expired token".to_string(),
            },
            ServiceError::SessionSuperseded => AppError::AuthError {
                code: "session_superseded",
                message: "Session superseded by a newer login, please log in again".to_string(),
            },
            ServiceError::AccountInactive => AppError::Forbidden {
                code: "account_inactive",
                message: "Account is inactive".to_string(),
            },
            ServiceError::Forbidden(msg) => AppError::Forbidden {
                code: "forbidden",
                message: msg,
            },
            ServiceError::AuthProcessFailed(e) => AppError::InternalError(e),
            ServiceError::StoreUnavailable(msg) => AppError::ServiceUnavailable(msg),
            ServiceError::Validation(msg) => AppError::Unprocessable(msg),
            ServiceError::Database(e) => AppError::DatabaseError(anyhow::Error::new(e)),
        }
    }
}
