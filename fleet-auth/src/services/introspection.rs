//! Token introspection: signed token -> session check -> cached or recomputed claims.

use chrono::Utc;
use metrics::counter;
use std::sync::Arc;
use subtle::ConstantTimeEq;

use super::directory::{CredentialStore, RbacStore};
use super::error::ServiceError;
use super::jwt::{AccessTokenClaims, JwtService};
use super::permissions::{aggregate, eligible_role_names, TenantScope};
use super::session::{SessionKey, SessionRegistry};
use super::token_store::{token_prefix, TokenStore};
use crate::models::{CapabilitySet, TokenClaims, UserType};

/// Role names and capability set for a principal in a tenant.
pub(crate) async fn resolve_capabilities(
    rbac: &dyn RbacStore,
    user_type: UserType,
    user_id: i64,
    tenant_id: Option<&str>,
) -> Result<(Vec<String>, CapabilitySet), ServiceError> {
    let roles = rbac.roles_for(user_type, user_id, tenant_id).await?;
    let scope = TenantScope::for_principal(user_type, tenant_id);
    Ok((eligible_role_names(&roles, &scope), aggregate(&roles, &scope)))
}

/// Store failures inside the auth pipeline are internal failures for the request.
pub(crate) fn process_failed(err: ServiceError) -> ServiceError {
    match err {
        ServiceError::StoreUnavailable(msg) => {
            ServiceError::AuthProcessFailed(anyhow::anyhow!("Token store unavailable: {}", msg))
        }
        ServiceError::Database(e) => ServiceError::AuthProcessFailed(anyhow::Error::new(e)),
        other => other,
    }
}

fn same_token(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

#[derive(Clone)]
pub struct IntrospectionService {
    jwt: Arc<JwtService>,
    sessions: SessionRegistry,
    tokens: TokenStore,
    credentials: Arc<dyn CredentialStore>,
    rbac: Arc<dyn RbacStore>,
}

impl IntrospectionService {
    pub fn new(
        jwt: Arc<JwtService>,
        sessions: SessionRegistry,
        tokens: TokenStore,
        credentials: Arc<dyn CredentialStore>,
        rbac: Arc<dyn RbacStore>,
    ) -> Self {
        Self {
            jwt,
            sessions,
            tokens,
            credentials,
            rbac,
        }
    }

    /// Validate a bearer token using the opaque reference it carries.
    pub async fn validate_bearer(&self, access_token: &str) -> Result<TokenClaims, ServiceError> {
        let signed = self.decode(access_token)?;
        let opaque = signed.opaque_token.clone();
        self.observe(self.validate_decoded(signed, &opaque).await)
    }

    /// Validate a signed access token presented together with its opaque reference.
    pub async fn validate(
        &self,
        access_token: &str,
        opaque_ref: &str,
    ) -> Result<TokenClaims, ServiceError> {
        let signed = self.decode(access_token)?;
        self.observe(self.validate_decoded(signed, opaque_ref).await)
    }

    fn decode(&self, access_token: &str) -> Result<AccessTokenClaims, ServiceError> {
        self.jwt.validate_access(access_token).map_err(|e| {
            tracing::debug!(error = %e, "Rejected signed token");
            counter!("auth_introspections_total", "outcome" => "invalid_token").increment(1);
            ServiceError::InvalidToken
        })
    }

    fn observe(&self, result: Result<TokenClaims, ServiceError>) -> Result<TokenClaims, ServiceError> {
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        counter!("auth_introspections_total", "outcome" => outcome).increment(1);
        if let Err(ServiceError::AuthProcessFailed(e)) = &result {
            tracing::error!(error = %e, "Introspection failed");
        }
        result
    }

    async fn validate_decoded(
        &self,
        signed: AccessTokenClaims,
        opaque_ref: &str,
    ) -> Result<TokenClaims, ServiceError> {
        if !same_token(&signed.opaque_token, opaque_ref) {
            tracing::debug!(token = token_prefix(opaque_ref), "Opaque reference does not match signed token");
            return Err(ServiceError::InvalidToken);
        }

        let session_key = SessionKey::new(signed.user_type, signed.user_id, signed.platform);
        self.sessions
            .check(&session_key, opaque_ref)
            .await
            .map_err(process_failed)?;

        // Logged out or rotated away. Outlives the record, which may be gone or
        // still marked active in a tier that missed the revocation.
        if self
            .tokens
            .is_refresh_revoked(opaque_ref)
            .await
            .map_err(process_failed)?
        {
            tracing::debug!(token = token_prefix(opaque_ref), "Presented token of a closed session");
            return Err(ServiceError::InvalidToken);
        }

        match self.tokens.get(opaque_ref).await.map_err(process_failed)? {
            Some(cached) => {
                counter!("auth_token_cache_total", "result" => "hit").increment(1);

                if !cached.active {
                    tracing::debug!(token = token_prefix(opaque_ref), "Presented revoked token");
                    return Err(ServiceError::InvalidToken);
                }
                if cached.user_id != signed.user_id || cached.user_type != signed.user_type {
                    tracing::warn!(token = token_prefix(opaque_ref), "Token record belongs to another principal");
                    return Err(ServiceError::InvalidToken);
                }

                // The slot may have been overwritten while the cache was read.
                self.sessions
                    .check(&session_key, opaque_ref)
                    .await
                    .map_err(process_failed)?;

                Ok(cached)
            }
            None => {
                counter!("auth_token_cache_total", "result" => "miss").increment(1);
                let claims = self.recompute(&signed).await?;

                let now = Utc::now().timestamp();
                if !self.tokens.put(opaque_ref, &claims, claims.remaining_ttl(now)).await {
                    tracing::warn!(token = token_prefix(opaque_ref), "Could not repopulate token cache");
                }

                Ok(claims)
            }
        }
    }

    /// Rebuild claims from the stores. Keeps the original `iat`/`exp`.
    async fn recompute(&self, signed: &AccessTokenClaims) -> Result<TokenClaims, ServiceError> {
        tracing::debug!(
            user_id = signed.user_id,
            user_type = %signed.user_type,
            token = token_prefix(&signed.opaque_token),
            "Recomputing token claims"
        );

        let user = self
            .credentials
            .find_by_id(signed.user_type, signed.user_id)
            .await
            .map_err(process_failed)?;

        match user {
            Some(user) if user.is_active() => {}
            _ => return Err(ServiceError::AccountInactive),
        }

        let (roles, permissions) = resolve_capabilities(
            self.rbac.as_ref(),
            signed.user_type,
            signed.user_id,
            signed.tenant_id.as_deref(),
        )
        .await
        .map_err(process_failed)?;

        Ok(TokenClaims {
            user_id: signed.user_id,
            user_type: signed.user_type,
            tenant_id: signed.tenant_id.clone(),
            platform: signed.platform,
            opaque_token: signed.opaque_token.clone(),
            roles,
            permissions,
            iat: signed.iat,
            exp: signed.exp,
            active: true,
        })
    }
}
