//! Single-active-session registry keyed by (user type, user id, platform).

use std::collections::HashSet;
use std::sync::Arc;

use super::cache_backend::CacheBackend;
use super::error::ServiceError;
use super::local_cache::Retention;
use super::token_store::token_prefix;
use crate::models::{Platform, UserType};

/// Identifies one independently enforced session slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub user_type: UserType,
    pub user_id: i64,
    pub platform: Platform,
}

impl SessionKey {
    pub fn new(user_type: UserType, user_id: i64, platform: Platform) -> Self {
        Self {
            user_type,
            user_id,
            platform,
        }
    }

    pub fn storage_key(&self) -> String {
        format!("session:{}:{}:{}", self.user_type, self.user_id, self.platform)
    }
}

/// Maps each session slot to the currently active opaque token.
///
/// Holds references only, never claims. Concurrent registrations for one slot
/// are last-writer-wins.
#[derive(Clone)]
pub struct SessionRegistry {
    backend: Arc<CacheBackend>,
    enforced: HashSet<UserType>,
    ttl_seconds: u64,
}

impl SessionRegistry {
    pub fn new(backend: Arc<CacheBackend>, enforced: &[UserType], ttl_seconds: u64) -> Self {
        Self {
            backend,
            enforced: enforced.iter().copied().collect(),
            ttl_seconds: ttl_seconds.max(1),
        }
    }

    /// Whether this user type is limited to one session per platform.
    pub fn enforces(&self, user_type: UserType) -> bool {
        self.enforced.contains(&user_type)
    }

    /// Overwrites any previous token for the slot.
    pub async fn register(&self, key: &SessionKey, opaque_token: &str) -> Result<(), ServiceError> {
        self.backend
            .set(&key.storage_key(), opaque_token, self.ttl_seconds, Retention::Pinned)
            .await?;
        tracing::info!(
            user_type = %key.user_type,
            user_id = key.user_id,
            platform = %key.platform,
            token = token_prefix(opaque_token),
            "Registered active session"
        );
        Ok(())
    }

    pub async fn get_active(&self, key: &SessionKey) -> Result<Option<String>, ServiceError> {
        self.backend.get(&key.storage_key()).await
    }

    pub async fn clear(&self, key: &SessionKey) -> Result<(), ServiceError> {
        self.backend.delete(&key.storage_key()).await?;
        tracing::info!(
            user_type = %key.user_type,
            user_id = key.user_id,
            platform = %key.platform,
            "Cleared session"
        );
        Ok(())
    }

    /// Fails with `SessionSuperseded` when the slot holds a different token.
    ///
    /// Unenforced user types and empty slots pass.
    pub async fn check(&self, key: &SessionKey, opaque_token: &str) -> Result<(), ServiceError> {
        if !self.enforces(key.user_type) {
            return Ok(());
        }

        match self.get_active(key).await? {
            Some(active) if active != opaque_token => {
                tracing::info!(
                    user_type = %key.user_type,
                    user_id = key.user_id,
                    platform = %key.platform,
                    token = token_prefix(opaque_token),
                    "Rejected superseded session"
                );
                Err(ServiceError::SessionSuperseded)
            }
            _ => Ok(()),
        }
    }
}
