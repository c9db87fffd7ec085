//! Opaque token record and its cheap projection.

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::capability::{CapabilitySet, PermissionGrant};
use super::user::{Platform, UserType};

/// Full record stored under an opaque token and returned by introspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
pub struct TokenClaims {
    pub user_id: i64,
    pub user_type: UserType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant_id: Option<String>,
    #[serde(default)]
    pub platform: Platform,
    #[schema(example = "9f86d081884c7d659a2feaa0c55ad015")]
    pub opaque_token: String,
    pub roles: Vec<String>,
    #[schema(value_type = Vec<PermissionGrant>)]
    pub permissions: CapabilitySet,
    pub iat: i64,
    pub exp: i64,
    pub active: bool,
}

impl TokenClaims {
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.exp <= now
    }

    /// Seconds left before `exp`, floored at one.
    pub fn remaining_ttl(&self, now: i64) -> u64 {
        (self.exp - now).max(1) as u64
    }

    pub fn basic(&self) -> BasicTokenInfo {
        BasicTokenInfo {
            exp: self.exp,
            user_id: self.user_id,
            tenant_id: self.tenant_id.clone(),
            active: self.active,
        }
    }
}

/// Existence and expiry check without the capability payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BasicTokenInfo {
    pub exp: i64,
    pub user_id: i64,
    #[serde(default)]
    pub tenant_id: Option<String>,
    pub active: bool,
}
