//! Process-local fallback tier.

use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

static LAST_VERSION: AtomicU64 = AtomicU64::new(0);

/// Write version shared by both tiers: wall-clock microseconds, strictly
/// increasing within the process.
pub(crate) fn next_version() -> u64 {
    let now = Utc::now().timestamp_micros().max(0) as u64;
    let prev = LAST_VERSION
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |prev| {
            Some(now.max(prev + 1))
        })
        .unwrap_or(now);
    now.max(prev + 1)
}

/// How the local tier may treat an entry before its own TTL runs out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retention {
    /// Rebuildable data: TTL capped at the cache maximum, first to go when full.
    Evictable,
    /// Session slots and revocation state: kept for the full TTL, never evicted.
    Pinned,
}

struct Entry {
    value: Option<String>,
    version: u64,
    expires_at: Instant,
    retention: Retention,
}

/// Snapshot of one live local entry. `value` is `None` for a delete marker.
#[derive(Debug, Clone)]
pub struct LocalEntry {
    pub value: Option<String>,
    pub version: u64,
    pub remaining: Duration,
    pub retention: Retention,
}

/// Bounded in-memory map with per-entry expiry.
///
/// The lock is held only for the map operation itself, never across an await.
/// Capacity applies to evictable entries; pinned ones are only dropped on expiry.
pub struct LocalCache {
    entries: Mutex<HashMap<String, Entry>>,
    max_entries: usize,
    max_ttl: Duration,
}

impl LocalCache {
    pub fn new(max_entries: usize, max_ttl_seconds: u64) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            max_entries: max_entries.max(1),
            max_ttl: Duration::from_secs(max_ttl_seconds.max(1)),
        }
    }

    pub fn set(
        &self,
        key: &str,
        value: String,
        ttl_seconds: u64,
        retention: Retention,
    ) -> Result<(), anyhow::Error> {
        self.store(key, Some(value), next_version(), ttl_seconds, retention)
    }

    /// Store a versioned value, or a delete marker when `value` is `None`.
    pub fn store(
        &self,
        key: &str,
        value: Option<String>,
        version: u64,
        ttl_seconds: u64,
        retention: Retention,
    ) -> Result<(), anyhow::Error> {
        let mut entries = self.lock()?;
        self.insert(&mut entries, key, value, version, ttl_seconds, retention);
        Ok(())
    }

    /// Store only if no live value exists. Delete markers do not block.
    pub fn set_if_absent(
        &self,
        key: &str,
        value: String,
        version: u64,
        ttl_seconds: u64,
        retention: Retention,
    ) -> Result<bool, anyhow::Error> {
        let mut entries = self.lock()?;
        let now = Instant::now();
        let taken = entries
            .get(key)
            .is_some_and(|entry| entry.expires_at > now && entry.value.is_some());
        if taken {
            return Ok(false);
        }
        self.insert(&mut entries, key, Some(value), version, ttl_seconds, retention);
        Ok(true)
    }

    /// Record a delete that could not reach the durable tier.
    pub fn tombstone(&self, key: &str, version: u64) -> Result<(), anyhow::Error> {
        self.store(key, None, version, self.max_ttl.as_secs(), Retention::Pinned)
    }

    /// Expired entries are dropped on read. Delete markers read as `None`.
    pub fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        Ok(self.entry(key)?.and_then(|entry| entry.value))
    }

    pub fn entry(&self, key: &str) -> Result<Option<LocalEntry>, anyhow::Error> {
        let mut entries = self.lock()?;
        let now = Instant::now();

        match entries.get(key) {
            Some(entry) if entry.expires_at <= now => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(LocalEntry {
                value: entry.value.clone(),
                version: entry.version,
                remaining: entry.expires_at - now,
                retention: entry.retention,
            })),
            None => Ok(None),
        }
    }

    pub fn delete(&self, key: &str) -> Result<(), anyhow::Error> {
        self.lock()?.remove(key);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Entry>>, anyhow::Error> {
        self.entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Local cache mutex poisoned: {}", e))
    }

    fn insert(
        &self,
        entries: &mut HashMap<String, Entry>,
        key: &str,
        value: Option<String>,
        version: u64,
        ttl_seconds: u64,
        retention: Retention,
    ) {
        let ttl = Duration::from_secs(ttl_seconds.max(1));
        let ttl = match retention {
            Retention::Evictable => ttl.min(self.max_ttl),
            Retention::Pinned => ttl,
        };
        let now = Instant::now();

        if !entries.contains_key(key) && entries.len() >= self.max_entries {
            entries.retain(|_, entry| entry.expires_at > now);
            if entries.len() >= self.max_entries {
                let soonest = entries
                    .iter()
                    .filter(|(_, entry)| entry.retention == Retention::Evictable)
                    .min_by_key(|(_, entry)| entry.expires_at)
                    .map(|(k, _)| k.clone());
                if let Some(soonest) = soonest {
                    entries.remove(&soonest);
                }
            }
        }

        entries.insert(
            key.to_string(),
            Entry {
                value,
                version,
                expires_at: now + ttl,
                retention,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_set_get_delete() -> Result<(), anyhow::Error> {
        let cache = LocalCache::new(10, 3600);
        cache.set("a", "1".to_string(), 60, Retention::Evictable)?;
        assert_eq!(cache.get("a")?, Some("1".to_string()));
        cache.delete("a")?;
        assert_eq!(cache.get("a")?, None);
        Ok(())
    }

    #[test]
    fn test_capacity_evicts_soonest_expiry() -> Result<(), anyhow::Error> {
        let cache = LocalCache::new(2, 3600);
        cache.set("short", "s".to_string(), 10, Retention::Evictable)?;
        cache.set("long", "l".to_string(), 1000, Retention::Evictable)?;
        cache.set("new", "n".to_string(), 500, Retention::Evictable)?;

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.get("short")?, None);
        assert_eq!(cache.get("long")?, Some("l".to_string()));
        assert_eq!(cache.get("new")?, Some("n".to_string()));
        Ok(())
    }

    #[test]
    fn test_pinned_entries_survive_capacity_pressure() -> Result<(), anyhow::Error> {
        let cache = LocalCache::new(2, 3600);
        cache.set("slot", "s".to_string(), 10, Retention::Pinned)?;
        cache.set("marker", "m".to_string(), 20, Retention::Pinned)?;
        cache.set("record", "r".to_string(), 500, Retention::Evictable)?;
        cache.set("other", "o".to_string(), 500, Retention::Evictable)?;

        assert_eq!(cache.get("slot")?, Some("s".to_string()));
        assert_eq!(cache.get("marker")?, Some("m".to_string()));
        assert_eq!(cache.get("record")?, None);
        assert_eq!(cache.get("other")?, Some("o".to_string()));
        Ok(())
    }

    #[test]
    fn test_ttl_cap_applies_to_evictable_only() -> Result<(), anyhow::Error> {
        let cache = LocalCache::new(10, 60);
        cache.set("record", "r".to_string(), 7200, Retention::Evictable)?;
        cache.set("slot", "s".to_string(), 7200, Retention::Pinned)?;

        let record = cache.entry("record")?.map(|e| e.remaining);
        let slot = cache.entry("slot")?.map(|e| e.remaining);
        assert!(matches!(record, Some(r) if r <= Duration::from_secs(60)));
        assert!(matches!(slot, Some(s) if s > Duration::from_secs(3600)));
        Ok(())
    }

    #[test]
    fn test_overwrite_does_not_evict() -> Result<(), anyhow::Error> {
        let cache = LocalCache::new(1, 3600);
        cache.set("a", "1".to_string(), 60, Retention::Evictable)?;
        cache.set("a", "2".to_string(), 60, Retention::Evictable)?;
        assert_eq!(cache.get("a")?, Some("2".to_string()));
        Ok(())
    }

    #[test]
    fn test_set_if_absent() -> Result<(), anyhow::Error> {
        let cache = LocalCache::new(10, 3600);
        assert!(cache.set_if_absent("m", "1".to_string(), next_version(), 60, Retention::Pinned)?);
        assert!(!cache.set_if_absent("m", "2".to_string(), next_version(), 60, Retention::Pinned)?);
        assert_eq!(cache.get("m")?, Some("1".to_string()));

        cache.tombstone("t", next_version())?;
        assert_eq!(cache.get("t")?, None);
        assert!(cache.set_if_absent("t", "1".to_string(), next_version(), 60, Retention::Pinned)?);
        Ok(())
    }

    #[test]
    fn test_versions_increase() {
        let first = next_version();
        let second = next_version();
        assert!(second > first);
    }

    #[tokio::test]
    async fn test_expired_entry_evicted_on_read() -> Result<(), anyhow::Error> {
        let cache = LocalCache::new(10, 3600);
        cache.set("a", "1".to_string(), 1, Retention::Evictable)?;
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(cache.get("a")?, None);
        assert!(cache.is_empty());
        Ok(())
    }
}
