use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use rand::RngCore;
use serde::{Deserialize, Serialize};

use crate::config::{JwtConfig, MIN_SIGNING_SECRET_LEN};
use crate::models::{Platform, UserType};

/// Token type marker carried in every signed token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

/// Identity a token pair is issued for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TokenSubject {
    pub user_id: i64,
    pub user_type: UserType,
    pub tenant_id: Option<String>,
    pub platform: Platform,
}

/// Claims for access tokens (short-lived)
///
/// Roles and permissions are not embedded; they live behind `opaque_token`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub user_id: i64,
    pub user_type: UserType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub platform: Platform,
    pub opaque_token: String,
    pub token_type: TokenType,
    pub iat: i64,
    pub exp: i64,
}

/// Claims for refresh tokens (long-lived)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshTokenClaims {
    pub user_id: i64,
    pub user_type: UserType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub platform: Platform,
    /// Opaque token of the session this refresh token belongs to.
    pub sid: String,
    pub token_type: TokenType,
    pub iat: i64,
    pub exp: i64,
}

impl AccessTokenClaims {
    pub fn subject(&self) -> TokenSubject {
        TokenSubject {
            user_id: self.user_id,
            user_type: self.user_type,
            tenant_id: self.tenant_id.clone(),
            platform: self.platform,
        }
    }
}

impl RefreshTokenClaims {
    pub fn subject(&self) -> TokenSubject {
        TokenSubject {
            user_id: self.user_id,
            user_type: self.user_type,
            tenant_id: self.tenant_id.clone(),
            platform: self.platform,
        }
    }
}

/// 128 random bits rendered as 32 lowercase hex characters.
pub fn generate_opaque_token() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// HS256 token issuer. Stateless: nothing is persisted here.
#[derive(Clone)]
pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    access_token_expiry_hours: i64,
    refresh_token_expiry_days: i64,
}

impl JwtService {
    /// Fails when the signing secret is too short to be safe.
    pub fn new(config: &JwtConfig) -> Result<Self, anyhow::Error> {
        if config.secret.len() < MIN_SIGNING_SECRET_LEN {
            return Err(anyhow::anyhow!(
                "JWT signing secret must be at least {} bytes",
                MIN_SIGNING_SECRET_LEN
            ));
        }

        tracing::info!("JWT service initialized with HS256 key");

        Ok(Self {
            encoding_key: EncodingKey::from_secret(config.secret.as_bytes()),
            decoding_key: DecodingKey::from_secret(config.secret.as_bytes()),
            access_token_expiry_hours: config.access_token_expiry_hours,
            refresh_token_expiry_days: config.refresh_token_expiry_days,
        })
    }

    /// Mint an access token bound to `opaque_token`. The claims are returned so the
    /// caller can reuse the exact `iat`/`exp` for the opaque record.
    pub fn mint_access(
        &self,
        subject: &TokenSubject,
        opaque_token: &str,
    ) -> Result<(String, AccessTokenClaims), anyhow::Error> {
        let now = Utc::now();
        let exp = now + Duration::hours(self.access_token_expiry_hours);

        let claims = AccessTokenClaims {
            user_id: subject.user_id,
            user_type: subject.user_type,
            tenant_id: subject.tenant_id.clone(),
            platform: subject.platform,
            opaque_token: opaque_token.to_string(),
            token_type: TokenType::Access,
            iat: now.timestamp(),
            exp: exp.timestamp(),
        };

        let token = encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode access token: {}", e))?;

        Ok((token, claims))
    }

    pub fn mint_refresh(
        &self,
        subject: &TokenSubject,
        session_token: &str,
    ) -> Result<String, anyhow::Error> {
        let now = Utc::now();
        let exp = now + Duration::days(self.refresh_token_expiry_days);

        let claims = RefreshTokenClaims {
            user_id: subject.user_id,
            user_type: subject.user_type,
            tenant_id: subject.tenant_id.clone(),
            platform: subject.platform,
            sid: session_token.to_string(),
            token_type: TokenType::Refresh,
            iat: now.timestamp(),
            exp: exp.timestamp(),
        };

        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding_key)
            .map_err(|e| anyhow::anyhow!("Failed to encode refresh token: {}", e))
    }

    /// Verify signature and expiry, and require the access marker.
    pub fn validate_access(&self, token: &str) -> Result<AccessTokenClaims, anyhow::Error> {
        let claims = decode::<AccessTokenClaims>(token, &self.decoding_key, &self.validation())
            .map_err(|e| anyhow::anyhow!("Invalid access token: {}", e))?
            .claims;

        if claims.token_type != TokenType::Access {
            return Err(anyhow::anyhow!("Token is not an access token"));
        }

        Ok(claims)
    }

    pub fn validate_refresh(&self, token: &str) -> Result<RefreshTokenClaims, anyhow::Error> {
        let claims = decode::<RefreshTokenClaims>(token, &self.decoding_key, &self.validation())
            .map_err(|e| anyhow::anyhow!("Invalid refresh token: {}", e))?
            .claims;

        if claims.token_type != TokenType::Refresh {
            return Err(anyhow::anyhow!("Token is not a refresh token"));
        }

        Ok(claims)
    }

    fn validation(&self) -> Validation {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.required_spec_claims.clear();
        validation.required_spec_claims.insert("exp".to_string());
        validation
    }

    /// Get access token expiry in seconds (for client info)
    pub fn access_token_expiry_seconds(&self) -> i64 {
        self.access_token_expiry_hours * 3600
    }

    /// Session slots live as long as the refresh token.
    pub fn refresh_token_expiry_seconds(&self) -> i64 {
        self.refresh_token_expiry_days * 86_400
    }
}
