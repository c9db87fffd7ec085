use chrono::Utc;
use metrics::counter;
use std::sync::Arc;

use super::directory::{CredentialStore, RbacStore};
use super::error::ServiceError;
use super::introspection::{process_failed, resolve_capabilities};
use super::jwt::{generate_opaque_token, JwtService, TokenSubject};
use super::session::{SessionKey, SessionRegistry};
use super::token_store::{token_prefix, TokenStore};
use crate::models::{Platform, TokenClaims, User, UserSummary, UserType};
use crate::utils::password::verify_against_dummy;
use crate::utils::{verify_password, Password, PasswordHashString};

/// Tokens minted for one session.
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: i64,
    pub claims: TokenClaims,
}

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub tokens: IssuedTokens,
    pub user: UserSummary,
}

pub struct LoginCommand {
    pub user_type: UserType,
    pub identifier: String,
    pub password: Password,
    pub tenant_id: Option<String>,
    pub platform: Platform,
}

/// Login, refresh and logout flows.
#[derive(Clone)]
pub struct AuthService {
    jwt: Arc<JwtService>,
    sessions: SessionRegistry,
    tokens: TokenStore,
    credentials: Arc<dyn CredentialStore>,
    rbac: Arc<dyn RbacStore>,
}

impl AuthService {
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

    pub async fn login(&self, cmd: LoginCommand) -> Result<LoginOutcome, ServiceError> {
        let user_type = cmd.user_type;
        let result = self.authenticate(cmd).await;

        let outcome = match &result {
            Ok(_) => "success",
            Err(e) => e.kind(),
        };
        counter!("auth_logins_total", "user_type" => user_type.as_str(), "outcome" => outcome)
            .increment(1);

        result
    }

    async fn authenticate(&self, cmd: LoginCommand) -> Result<LoginOutcome, ServiceError> {
        let user = self
            .credentials
            .find_by_identifier(cmd.user_type, &cmd.identifier, cmd.tenant_id.as_deref())
            .await
            .map_err(process_failed)?;

        let Some(user) = user else {
            let password = cmd.password;
            let _ = tokio::task::spawn_blocking(move || verify_against_dummy(&password)).await;
            tracing::info!(user_type = %cmd.user_type, "Login failed: unknown identifier");
            return Err(ServiceError::InvalidCredentials);
        };

        let hash = PasswordHashString::new(user.password_hash.clone());
        let password = cmd.password;
        let verified = tokio::task::spawn_blocking(move || verify_password(&password, &hash))
            .await
            .map_err(|e| ServiceError::AuthProcessFailed(anyhow::anyhow!("Password task failed: {}", e)))?;

        if verified.is_err() {
            tracing::info!(user_type = %user.user_type, user_id = user.user_id, "Login failed: wrong password");
            return Err(ServiceError::InvalidCredentials);
        }

        if !user.is_active() {
            tracing::info!(user_type = %user.user_type, user_id = user.user_id, "Login rejected: account inactive");
            return Err(ServiceError::AccountInactive);
        }

        let tokens = self.issue(&user, cmd.platform).await?;

        tracing::info!(
            user_type = %user.user_type,
            user_id = user.user_id,
            platform = %cmd.platform,
            token = token_prefix(&tokens.claims.opaque_token),
            "User logged in"
        );

        let user = UserSummary {
            user_id: user.user_id,
            user_type: user.user_type,
            tenant_id: user.tenant_id.clone(),
            name: user.name.clone(),
            username: user.username.clone(),
            roles: tokens.claims.roles.clone(),
            permissions: tokens.claims.permissions.to_grants(),
        };

        Ok(LoginOutcome { tokens, user })
    }

    /// Exchange a refresh token for a fresh session. Always rotates.
    pub async fn refresh(&self, refresh_token: &str) -> Result<IssuedTokens, ServiceError> {
        let claims = self.jwt.validate_refresh(refresh_token).map_err(|e| {
            tracing::debug!(error = %e, "Rejected refresh token");
            ServiceError::InvalidToken
        })?;

        if self
            .tokens
            .is_refresh_revoked(&claims.sid)
            .await
            .map_err(process_failed)?
        {
            tracing::info!(user_id = claims.user_id, token = token_prefix(&claims.sid), "Refresh token already used or revoked");
            return Err(ServiceError::InvalidToken);
        }

        let key = SessionKey::new(claims.user_type, claims.user_id, claims.platform);
        self.sessions
            .check(&key, &claims.sid)
            .await
            .map_err(process_failed)?;

        if let Some(basic) = self.tokens.get_basic(&claims.sid).await.map_err(process_failed)? {
            if !basic.active {
                return Err(ServiceError::InvalidToken);
            }
        }

        let user = match self
            .credentials
            .find_by_id(claims.user_type, claims.user_id)
            .await
            .map_err(process_failed)?
        {
            Some(user) if user.is_active() => user,
            _ => return Err(ServiceError::AccountInactive),
        };

        // Single use: of concurrent attempts, only the one that sets the marker proceeds.
        if !self
            .tokens
            .claim_refresh(&claims.sid, self.refresh_ttl())
            .await
            .map_err(process_failed)?
        {
            tracing::info!(user_id = claims.user_id, token = token_prefix(&claims.sid), "Refresh token already used or revoked");
            return Err(ServiceError::InvalidToken);
        }

        let issued = self.issue(&user, claims.platform).await?;

        if let Err(e) = self.tokens.revoke(&claims.sid).await {
            tracing::warn!(token = token_prefix(&claims.sid), error = %e, "Failed to revoke rotated token");
        }

        tracing::info!(
            user_id = user.user_id,
            user_type = %user.user_type,
            old = token_prefix(&claims.sid),
            new = token_prefix(&issued.claims.opaque_token),
            "Rotated session on refresh"
        );

        Ok(issued)
    }

    /// Revoke the presented session and clear its slot if it is still the active one.
    pub async fn logout(&self, claims: &TokenClaims) -> Result<(), ServiceError> {
        if let Err(e) = self.tokens.revoke(&claims.opaque_token).await {
            tracing::warn!(token = token_prefix(&claims.opaque_token), error = %e, "Failed to revoke token on logout");
        }
        self.tokens
            .revoke_refresh(&claims.opaque_token, self.refresh_ttl())
            .await;

        let key = SessionKey::new(claims.user_type, claims.user_id, claims.platform);
        if self.sessions.enforces(claims.user_type) {
            let active = self.sessions.get_active(&key).await.map_err(process_failed)?;
            if active.as_deref() == Some(claims.opaque_token.as_str()) {
                self.sessions.clear(&key).await.map_err(process_failed)?;
            }
        }

        tracing::info!(
            user_id = claims.user_id,
            user_type = %claims.user_type,
            token = token_prefix(&claims.opaque_token),
            "User logged out"
        );
        Ok(())
    }

    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.jwt.access_token_expiry_seconds()
    }

    fn refresh_ttl(&self) -> u64 {
        self.jwt.refresh_token_expiry_seconds().max(1) as u64
    }

    /// Aggregate, mint, register, cache. Shared by login and refresh.
    async fn issue(&self, user: &User, platform: Platform) -> Result<IssuedTokens, ServiceError> {
        let (roles, permissions) = resolve_capabilities(
            self.rbac.as_ref(),
            user.user_type,
            user.user_id,
            user.tenant_id.as_deref(),
        )
        .await
        .map_err(process_failed)?;

        let subject = TokenSubject {
            user_id: user.user_id,
            user_type: user.user_type,
            tenant_id: user.tenant_id.clone(),
            platform,
        };

        let opaque_token = generate_opaque_token();
        let (access_token, signed) = self
            .jwt
            .mint_access(&subject, &opaque_token)
            .map_err(ServiceError::AuthProcessFailed)?;

        if self.sessions.enforces(user.user_type) {
            let key = SessionKey::new(user.user_type, user.user_id, platform);
            self.sessions
                .register(&key, &opaque_token)
                .await
                .map_err(process_failed)?;
        }

        let claims = TokenClaims {
            user_id: user.user_id,
            user_type: user.user_type,
            tenant_id: user.tenant_id.clone(),
            platform,
            opaque_token: opaque_token.clone(),
            roles,
            permissions,
            iat: signed.iat,
            exp: signed.exp,
            active: true,
        };

        // A failed cache write is repaired by the recompute path on first use.
        let ttl = claims.remaining_ttl(Utc::now().timestamp());
        if !self.tokens.put(&opaque_token, &claims, ttl).await {
            tracing::warn!(token = token_prefix(&opaque_token), "Issued token without cache entry");
        }

        let refresh_token = self
            .jwt
            .mint_refresh(&subject, &opaque_token)
            .map_err(ServiceError::AuthProcessFailed)?;

        Ok(IssuedTokens {
            access_token,
            refresh_token,
            expires_in: self.jwt.access_token_expiry_seconds(),
            claims,
        })
    }
}
