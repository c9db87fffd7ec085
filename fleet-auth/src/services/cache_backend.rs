//! Two-tier key-value backend shared by the token store and the session registry.

use metrics::counter;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::error::ServiceError;
use super::local_cache::{next_version, LocalCache, LocalEntry, Retention};
use super::redis::KeyValueStore;

/// Durable-tier wire form: the payload plus the version it was written at.
#[derive(Serialize, Deserialize)]
struct Stamped {
    v: u64,
    data: String,
}

impl Stamped {
    fn encode(version: u64, data: &str) -> Result<String, ServiceError> {
        serde_json::to_string(&Stamped {
            v: version,
            data: data.to_string(),
        })
        .map_err(|e| ServiceError::StoreUnavailable(e.to_string()))
    }

    /// Unstamped values read as version 0, older than any local write.
    fn decode(raw: String) -> Stamped {
        serde_json::from_str(&raw).unwrap_or(Stamped { v: 0, data: raw })
    }
}

/// Storage strategy, chosen once at start-up.
pub enum CacheBackend {
    /// Durable shared store first, process-local cache when it errors or times out.
    ///
    /// Local entries exist only for writes the durable tier missed. Reads return
    /// the newer of the two and push a newer local write back once the durable
    /// tier answers again.
    DurableBacked {
        durable: Arc<dyn KeyValueStore>,
        local: LocalCache,
        timeout: Duration,
    },
    /// No durable tier reachable at start-up.
    LocalOnly { local: LocalCache },
}

impl CacheBackend {
    /// Health-check the durable tier and fall back to local-only mode if it is absent or unreachable.
    pub async fn select(
        durable: Option<Arc<dyn KeyValueStore>>,
        local: LocalCache,
        timeout: Duration,
    ) -> Self {
        let Some(durable) = durable else {
            tracing::warn!("Durable token store disabled, running in local-only cache mode");
            return CacheBackend::LocalOnly { local };
        };

        match tokio::time::timeout(timeout, durable.health_check()).await {
            Ok(Ok(())) => {
                tracing::info!("Durable token store reachable, using tiered cache");
                CacheBackend::DurableBacked {
                    durable,
                    local,
                    timeout,
                }
            }
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "Durable token store unavailable at start-up, running in local-only cache mode");
                CacheBackend::LocalOnly { local }
            }
            Err(_) => {
                tracing::warn!("Durable token store timed out at start-up, running in local-only cache mode");
                CacheBackend::LocalOnly { local }
            }
        }
    }

    pub fn local_only(local: LocalCache) -> Self {
        CacheBackend::LocalOnly { local }
    }

    pub fn mode(&self) -> &'static str {
        match self {
            CacheBackend::DurableBacked { .. } => "durable",
            CacheBackend::LocalOnly { .. } => "local_only",
        }
    }

    pub async fn set(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
        retention: Retention,
    ) -> Result<(), ServiceError> {
        let ttl_seconds = ttl_seconds.max(1);
        let version = next_version();
        match self {
            CacheBackend::DurableBacked {
                durable,
                local,
                timeout,
            } => {
                let stamped = Stamped::encode(version, value)?;
                match durable_call(*timeout, "set", durable.set_ex(key, &stamped, ttl_seconds)).await {
                    Some(()) => {
                        drop_override(local, key);
                        Ok(())
                    }
                    None => local
                        .store(key, Some(value.to_string()), version, ttl_seconds, retention)
                        .map_err(both_tiers_failed),
                }
            }
            CacheBackend::LocalOnly { local } => local
                .store(key, Some(value.to_string()), version, ttl_seconds, retention)
                .map_err(both_tiers_failed),
        }
    }

    /// Write only when no live value exists. Returns whether this call wrote it.
    ///
    /// Atomic on the durable tier. While it is down the claim is local to this process.
    pub async fn set_nx(
        &self,
        key: &str,
        value: &str,
        ttl_seconds: u64,
        retention: Retention,
    ) -> Result<bool, ServiceError> {
        let ttl_seconds = ttl_seconds.max(1);
        let version = next_version();
        match self {
            CacheBackend::DurableBacked {
                durable,
                local,
                timeout,
            } => {
                // An outage write not yet pushed back still owns the key.
                if let Ok(Some(entry)) = local.entry(key) {
                    if entry.value.is_some() {
                        return Ok(false);
                    }
                }
                let stamped = Stamped::encode(version, value)?;
                match durable_call(*timeout, "set_nx", durable.set_nx(key, &stamped, ttl_seconds)).await {
                    Some(claimed) => Ok(claimed),
                    None => local
                        .set_if_absent(key, value.to_string(), version, ttl_seconds, retention)
                        .map_err(both_tiers_failed),
                }
            }
            CacheBackend::LocalOnly { local } => local
                .set_if_absent(key, value.to_string(), version, ttl_seconds, retention)
                .map_err(both_tiers_failed),
        }
    }

    /// Newest value across both tiers.
    ///
    /// Falls back to the local tier alone when the durable tier fails.
    pub async fn get(&self, key: &str) -> Result<Option<String>, ServiceError> {
        match self {
            CacheBackend::DurableBacked {
                durable,
                local,
                timeout,
            } => {
                let remote = durable_call(*timeout, "get", durable.get(key)).await;
                let Some(remote) = remote else {
                    return local.get(key).map_err(both_tiers_failed);
                };
                let remote = remote.map(Stamped::decode);

                let entry = match local.entry(key) {
                    Ok(entry) => entry,
                    Err(e) => {
                        tracing::warn!(error = %e, "Local cache unreadable, using durable value");
                        None
                    }
                };

                match entry {
                    Some(entry) if remote.as_ref().map_or(true, |r| entry.version > r.v) => {
                        resync(durable.as_ref(), local, *timeout, key, &entry).await;
                        Ok(entry.value)
                    }
                    Some(_) => {
                        drop_override(local, key);
                        Ok(remote.map(|r| r.data))
                    }
                    None => Ok(remote.map(|r| r.data)),
                }
            }
            CacheBackend::LocalOnly { local } => local.get(key).map_err(both_tiers_failed),
        }
    }

    /// Removes the key from every tier.
    ///
    /// A delete the durable tier misses is remembered locally so the stale
    /// durable value cannot resurface.
    pub async fn delete(&self, key: &str) -> Result<(), ServiceError> {
        match self {
            CacheBackend::DurableBacked {
                durable,
                local,
                timeout,
            } => {
                let version = next_version();
                match durable_call(*timeout, "delete", durable.delete(key)).await {
                    Some(()) => {
                        drop_override(local, key);
                        Ok(())
                    }
                    None => local.tombstone(key, version).map_err(both_tiers_failed),
                }
            }
            CacheBackend::LocalOnly { local } => local.delete(key).map_err(both_tiers_failed),
        }
    }

    pub async fn health_check(&self) -> Result<(), anyhow::Error> {
        match self {
            CacheBackend::DurableBacked {
                durable, timeout, ..
            } => tokio::time::timeout(*timeout, durable.health_check())
                .await
                .map_err(|_| anyhow::anyhow!("Durable store health check timed out"))?,
            CacheBackend::LocalOnly { .. } => Ok(()),
        }
    }
}

/// Push a local write made during an outage to the durable tier, then drop it locally.
async fn resync(
    durable: &dyn KeyValueStore,
    local: &LocalCache,
    timeout: Duration,
    key: &str,
    entry: &LocalEntry,
) {
    let ttl_seconds = entry.remaining.as_secs().max(1);
    let pushed = match &entry.value {
        Some(value) => match Stamped::encode(entry.version, value) {
            Ok(stamped) => durable_call(timeout, "resync", durable.set_ex(key, &stamped, ttl_seconds))
                .await
                .is_some(),
            Err(_) => false,
        },
        None => durable_call(timeout, "resync", durable.delete(key)).await.is_some(),
    };

    if pushed {
        tracing::info!(key, "Resynced local write to durable store");
        drop_override(local, key);
    }
}

fn drop_override(local: &LocalCache, key: &str) {
    if let Err(e) = local.delete(key) {
        tracing::warn!(key, error = %e, "Failed to drop local override");
    }
}

/// Run one durable-tier call under `timeout`. Errors and timeouts become `None`.
async fn durable_call<T>(
    timeout: Duration,
    op: &'static str,
    call: impl Future<Output = Result<T, anyhow::Error>>,
) -> Option<T> {
    match tokio::time::timeout(timeout, call).await {
        Ok(Ok(value)) => Some(value),
        Ok(Err(e)) => {
            tracing::warn!(op, error = %e, "Durable store call failed, using local cache");
            counter!("auth_store_fallbacks_total").increment(1);
            None
        }
        Err(_) => {
            tracing::warn!(op, "Durable store call timed out, using local cache");
            counter!("auth_store_fallbacks_total").increment(1);
            None
        }
    }
}

fn both_tiers_failed(e: anyhow::Error) -> ServiceError {
    ServiceError::StoreUnavailable(e.to_string())
}
