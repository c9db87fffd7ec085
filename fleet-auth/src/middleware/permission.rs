//! Capability checks for routers that sit behind `auth_middleware`.

use axum::{
    extract::{Path, Request, State},
    middleware::Next,
    response::Response,
};
use service_core::error::AppError;
use std::collections::HashMap;

use crate::models::{TokenClaims, UserType};

/// Requires any one of `required` (`module.action` strings).
///
/// With `check_tenant`, a `tenant_id` path parameter must equal the caller's
/// tenant. Admins are not tenant-bound and skip that check.
#[derive(Debug, Clone)]
pub struct PermissionChecker {
    pub required: Vec<String>,
    pub check_tenant: bool,
}

impl PermissionChecker {
    pub fn new<I, S>(required: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            required: required.into_iter().map(Into::into).collect(),
            check_tenant: true,
        }
    }

    pub fn without_tenant_check(mut self) -> Self {
        self.check_tenant = false;
        self
    }

    pub fn authorize(&self, claims: &TokenClaims, path_tenant: Option<&str>) -> Result<(), AppError> {
        if !self.required.iter().any(|key| claims.permissions.allows_key(key)) {
            tracing::warn!(
                user_id = claims.user_id,
                required = ?self.required,
                "Permission denied"
            );
            return Err(AppError::Forbidden {
                code: "insufficient_permissions",
                message: "Insufficient permissions".to_string(),
            });
        }

        if self.check_tenant && claims.user_type != UserType::Admin {
            if let Some(path_tenant) = path_tenant {
                if claims.tenant_id.as_deref() != Some(path_tenant) {
                    tracing::warn!(
                        user_id = claims.user_id,
                        path_tenant = %path_tenant,
                        token_tenant = ?claims.tenant_id,
                        "Tenant access forbidden"
                    );
                    return Err(AppError::Forbidden {
                        code: "tenant_forbidden",
                        message: "Access to this tenant is forbidden".to_string(),
                    });
                }
            }
        }

        Ok(())
    }
}

/// Use with `from_fn_with_state(PermissionChecker::new([...]), require_permissions)`.
pub async fn require_permissions(
    State(checker): State<PermissionChecker>,
    params: Option<Path<HashMap<String, String>>>,
    req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let claims = req.extensions().get::<TokenClaims>().ok_or_else(|| {
        AppError::InternalError(anyhow::anyhow!(
            "Auth claims missing from request extensions"
        ))
    })?;

    let path_tenant = params
        .as_ref()
        .and_then(|Path(params)| params.get("tenant_id"))
        .map(String::as_str);

    checker.authorize(claims, path_tenant)?;

    Ok(next.run(req).await)
}
