//! Opaque token records on top of the tiered cache backend.

use chrono::Utc;
use std::sync::Arc;

use super::cache_backend::CacheBackend;
use super::error::ServiceError;
use super::local_cache::Retention;
use crate::models::{BasicTokenInfo, TokenClaims};

const BASIC_PREFIX: &str = "opaque_token";
const METADATA_PREFIX: &str = "opaque_token_metadata";
const REFRESH_REVOKED_PREFIX: &str = "revoked_refresh";

fn basic_key(opaque_token: &str) -> String {
    format!("{}:{}", BASIC_PREFIX, opaque_token)
}

fn metadata_key(opaque_token: &str) -> String {
    format!("{}:{}", METADATA_PREFIX, opaque_token)
}

fn refresh_revoked_key(session_token: &str) -> String {
    format!("{}:{}", REFRESH_REVOKED_PREFIX, session_token)
}

/// Log-safe form of an opaque token.
pub(crate) fn token_prefix(opaque_token: &str) -> &str {
    opaque_token.get(..8).unwrap_or(opaque_token)
}

/// Maps opaque tokens to their claims.
///
/// Each record is written twice: a small basic projection and the full metadata.
#[derive(Clone)]
pub struct TokenStore {
    backend: Arc<CacheBackend>,
}

impl TokenStore {
    pub fn new(backend: Arc<CacheBackend>) -> Self {
        Self { backend }
    }

    /// Store both projections. Failures are logged and reported as `false`, never raised.
    pub async fn put(&self, opaque_token: &str, claims: &TokenClaims, ttl_seconds: u64) -> bool {
        let ttl_seconds = ttl_seconds.max(1);

        let (basic, metadata) = match (
            serde_json::to_string(&claims.basic()),
            serde_json::to_string(claims),
        ) {
            (Ok(basic), Ok(metadata)) => (basic, metadata),
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!(error = %e, "Failed to serialize token claims");
                return false;
            }
        };

        let stored_basic = self
            .backend
            .set(&basic_key(opaque_token), &basic, ttl_seconds, Retention::Evictable)
            .await;
        let stored_metadata = self
            .backend
            .set(&metadata_key(opaque_token), &metadata, ttl_seconds, Retention::Evictable)
            .await;

        match (stored_basic, stored_metadata) {
            (Ok(()), Ok(())) => {
                tracing::debug!(token = token_prefix(opaque_token), ttl_seconds, "Stored token claims");
                true
            }
            (Err(e), _) | (_, Err(e)) => {
                tracing::error!(token = token_prefix(opaque_token), error = %e, "Failed to store token claims");
                false
            }
        }
    }

    /// Full record, or `None` when absent or past its `exp`.
    ///
    /// A record found past its expiry is evicted.
    pub async fn get(&self, opaque_token: &str) -> Result<Option<TokenClaims>, ServiceError> {
        let Some(raw) = self.backend.get(&metadata_key(opaque_token)).await? else {
            return Ok(None);
        };

        let claims: TokenClaims = match serde_json::from_str(&raw) {
            Ok(claims) => claims,
            Err(e) => {
                tracing::warn!(token = token_prefix(opaque_token), error = %e, "Discarding unreadable token record");
                self.evict(opaque_token).await;
                return Ok(None);
            }
        };

        if claims.is_expired_at(Utc::now().timestamp()) {
            tracing::debug!(token = token_prefix(opaque_token), "Evicting expired token record");
            self.evict(opaque_token).await;
            return Ok(None);
        }

        Ok(Some(claims))
    }

    /// Basic projection only.
    pub async fn get_basic(&self, opaque_token: &str) -> Result<Option<BasicTokenInfo>, ServiceError> {
        let Some(raw) = self.backend.get(&basic_key(opaque_token)).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<BasicTokenInfo>(&raw) {
            Ok(basic) if basic.exp > Utc::now().timestamp() => Ok(Some(basic)),
            Ok(_) => Ok(None),
            Err(e) => {
                tracing::warn!(token = token_prefix(opaque_token), error = %e, "Discarding unreadable token projection");
                Ok(None)
            }
        }
    }

    /// Rewrite the record as inactive for its remaining lifetime.
    ///
    /// Returns `false` when there is nothing live to revoke.
    pub async fn revoke(&self, opaque_token: &str) -> Result<bool, ServiceError> {
        let Some(mut claims) = self.get(opaque_token).await? else {
            return Ok(false);
        };

        claims.active = false;
        let ttl = claims.remaining_ttl(Utc::now().timestamp());
        let stored = self.put(opaque_token, &claims, ttl).await;
        if stored {
            tracing::info!(token = token_prefix(opaque_token), user_id = claims.user_id, "Revoked opaque token");
        }
        Ok(stored)
    }

    /// Block refresh tokens bound to `session_token` for `ttl_seconds`.
    ///
    /// Outlives the opaque record, which expires with the access token, and
    /// also marks the session's access token as revoked once that record is gone.
    pub async fn revoke_refresh(&self, session_token: &str, ttl_seconds: u64) -> bool {
        match self
            .backend
            .set(&refresh_revoked_key(session_token), "1", ttl_seconds, Retention::Pinned)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::error!(token = token_prefix(session_token), error = %e, "Failed to record refresh revocation");
                false
            }
        }
    }

    /// Atomically set the revocation marker. Only the first caller gets `true`.
    pub async fn claim_refresh(&self, session_token: &str, ttl_seconds: u64) -> Result<bool, ServiceError> {
        self.backend
            .set_nx(&refresh_revoked_key(session_token), "1", ttl_seconds, Retention::Pinned)
            .await
    }

    pub async fn is_refresh_revoked(&self, session_token: &str) -> Result<bool, ServiceError> {
        Ok(self
            .backend
            .get(&refresh_revoked_key(session_token))
            .await?
            .is_some())
    }

    /// Drop both projections from every tier.
    pub async fn evict(&self, opaque_token: &str) {
        for key in [basic_key(opaque_token), metadata_key(opaque_token)] {
            if let Err(e) = self.backend.delete(&key).await {
                tracing::warn!(token = token_prefix(opaque_token), error = %e, "Failed to evict token record");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Action, CapabilitySet, Platform, UserType};
    use crate::services::local_cache::LocalCache;
    use crate::services::redis::{KeyValueStore, MockKeyValueStore};
    use std::time::Duration;

    fn claims(opaque: &str, lifetime: i64) -> TokenClaims {
        let now = Utc::now().timestamp();
        let mut permissions = CapabilitySet::new();
        permissions.grant("booking", Action::All);
        TokenClaims {
            user_id: 7,
            user_type: UserType::Employee,
            tenant_id: Some("ACME".to_string()),
            platform: Platform::App,
            opaque_token: opaque.to_string(),
            roles: vec!["Dispatcher".to_string()],
            permissions,
            iat: now,
            exp: now + lifetime,
            active: true,
        }
    }

    async fn durable_store() -> (TokenStore, Arc<MockKeyValueStore>) {
        let durable = Arc::new(MockKeyValueStore::new());
        let backend = CacheBackend::select(
            Some(durable.clone() as Arc<dyn KeyValueStore>),
            LocalCache::new(100, 3600),
            Duration::from_millis(200),
        )
        .await;
        (TokenStore::new(Arc::new(backend)), durable)
    }

    #[tokio::test]
    async fn test_put_writes_both_projections() -> Result<(), ServiceError> {
        let (store, durable) = durable_store().await;
        let record = claims("aaaaaaaabbbbbbbbccccccccdddddddd", 3600);

        assert!(store.put(&record.opaque_token, &record, 3600).await);
        assert_eq!(durable.len(), 2);

        assert_eq!(store.get(&record.opaque_token).await?, Some(record.clone()));
        assert_eq!(store.get_basic(&record.opaque_token).await?, Some(record.basic()));
        Ok(())
    }

    #[tokio::test]
    async fn test_revoke_marks_inactive() -> Result<(), ServiceError> {
        let (store, _) = durable_store().await;
        let record = claims("11111111222222223333333344444444", 3600);
        store.put(&record.opaque_token, &record, 3600).await;

        assert!(store.revoke(&record.opaque_token).await?);

        let revoked = store.get(&record.opaque_token).await?;
        assert!(matches!(revoked, Some(ref c) if !c.active));
        let basic = store.get_basic(&record.opaque_token).await?;
        assert!(matches!(basic, Some(ref b) if !b.active));

        assert!(!store.revoke("ffffffffffffffffffffffffffffffff").await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_refresh_revocation_marker() -> Result<(), ServiceError> {
        let (store, _) = durable_store().await;
        assert!(!store.is_refresh_revoked("session-a").await?);
        assert!(store.revoke_refresh("session-a", 600).await);
        assert!(store.is_refresh_revoked("session-a").await?);
        assert!(!store.is_refresh_revoked("session-b").await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_claim_refresh_succeeds_once() -> Result<(), ServiceError> {
        let (store, _) = durable_store().await;
        assert!(store.claim_refresh("session-a", 600).await?);
        assert!(!store.claim_refresh("session-a", 600).await?);
        assert!(store.is_refresh_revoked("session-a").await?);

        assert!(store.revoke_refresh("session-b", 600).await);
        assert!(!store.claim_refresh("session-b", 600).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_refresh_marker_outlives_local_ttl_cap() -> Result<(), ServiceError> {
        let store = TokenStore::new(Arc::new(CacheBackend::local_only(LocalCache::new(100, 1))));
        let record = claims("abcdabcdabcdabcdabcdabcdabcdabcd", 3600);
        store.put(&record.opaque_token, &record, 3600).await;
        assert!(store.revoke_refresh(&record.opaque_token, 60).await);

        tokio::time::sleep(Duration::from_millis(2100)).await;

        // The record was capped and dropped, the marker was not.
        assert_eq!(store.get(&record.opaque_token).await?, None);
        assert!(store.is_refresh_revoked(&record.opaque_token).await?);
        Ok(())
    }

    #[tokio::test]
    async fn test_ttl_one_is_gone_from_both_tiers() -> Result<(), ServiceError> {
        let (store, durable) = durable_store().await;
        let record = claims("55555555666666667777777788888888", 1);

        durable.set_failing(true);
        store.put("local-copy", &record, 1).await;
        durable.set_failing(false);
        store.put(&record.opaque_token, &record, 1).await;

        tokio::time::sleep(Duration::from_secs(2)).await;

        assert_eq!(store.get(&record.opaque_token).await?, None);
        assert_eq!(store.get("local-copy").await?, None);
        assert_eq!(store.get_basic(&record.opaque_token).await?, None);
        Ok(())
    }

    #[tokio::test]
    async fn test_expired_record_is_evicted_on_read() -> Result<(), ServiceError> {
        let (store, durable) = durable_store().await;
        let mut record = claims("99999999000000009999999900000000", 3600);
        record.exp = Utc::now().timestamp() - 5;

        // The tier TTL outlives the claim expiry.
        store.put(&record.opaque_token, &record, 3600).await;
        assert_eq!(store.get(&record.opaque_token).await?, None);
        assert!(durable.is_empty());
        Ok(())
    }
}
