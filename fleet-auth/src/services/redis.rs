use async_trait::async_trait;
use redis::{aio::ConnectionManager, Client};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Durable shared key-value tier. Every operation is a single atomic command.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), anyhow::Error>;
    /// Set only when the key is absent. Returns whether this call wrote it.
    async fn set_nx(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<bool, anyhow::Error>;
    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error>;
    async fn delete(&self, key: &str) -> Result<(), anyhow::Error>;
    async fn health_check(&self) -> Result<(), anyhow::Error>;
}

#[derive(Clone)]
pub struct RedisService {
    _client: Client,
    manager: ConnectionManager,
}

impl RedisService {
    pub async fn new(config: &crate::config::RedisConfig) -> Result<Self, anyhow::Error> {
        tracing::info!("Connecting to Redis");
        let client = Client::open(config.url.clone())?;

        // ConnectionManager reconnects on its own after transient failures
        let manager = client.get_connection_manager().await.map_err(|e| {
            tracing::error!("Failed to get Redis connection manager: {}", e);
            anyhow::anyhow!("Failed to connect to Redis: {}", e)
        })?;

        tracing::info!("Successfully connected to Redis");

        Ok(Self {
            _client: client,
            manager,
        })
    }
}

#[async_trait]
impl KeyValueStore for RedisService {
    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("EX")
            .arg(ttl_seconds.max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to set key: {}", e))
    }

    async fn set_nx(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<bool, anyhow::Error> {
        let mut conn = self.manager.clone();
        let reply: Option<String> = redis::cmd("SET")
            .arg(key)
            .arg(value)
            .arg("NX")
            .arg("EX")
            .arg(ttl_seconds.max(1))
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to set key: {}", e))?;
        Ok(reply.is_some())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("GET")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to get key: {}", e))
    }

    async fn delete(&self, key: &str) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("DEL")
            .arg(key)
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to delete key: {}", e))
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        let mut conn = self.manager.clone();
        redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| anyhow::anyhow!("Redis health check failed: {}", e))
    }
}

/// In-memory stand-in for Redis that honours TTLs and can be switched to fail.
pub struct MockKeyValueStore {
    entries: Mutex<HashMap<String, (String, Instant)>>,
    failing: AtomicBool,
}

impl Default for MockKeyValueStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockKeyValueStore {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            failing: AtomicBool::new(false),
        }
    }

    /// Every subsequent call returns an error while set.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn len(&self) -> usize {
        self.entries.lock().map(|e| e.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self) -> Result<(), anyhow::Error> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(anyhow::anyhow!("Mock store unavailable"));
        }
        Ok(())
    }
}

#[async_trait]
impl KeyValueStore for MockKeyValueStore {
    async fn set_ex(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<(), anyhow::Error> {
        self.check()?;
        let expires_at = Instant::now() + Duration::from_secs(ttl_seconds.max(1));
        self.entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock store mutex poisoned: {}", e))?
            .insert(key.to_string(), (value.to_string(), expires_at));
        Ok(())
    }

    async fn set_nx(&self, key: &str, value: &str, ttl_seconds: u64) -> Result<bool, anyhow::Error> {
        self.check()?;
        let now = Instant::now();
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock store mutex poisoned: {}", e))?;

        if matches!(entries.get(key), Some((_, expires_at)) if *expires_at > now) {
            return Ok(false);
        }
        entries.insert(
            key.to_string(),
            (value.to_string(), now + Duration::from_secs(ttl_seconds.max(1))),
        );
        Ok(true)
    }

    async fn get(&self, key: &str) -> Result<Option<String>, anyhow::Error> {
        self.check()?;
        let mut entries = self
            .entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock store mutex poisoned: {}", e))?;

        match entries.get(key) {
            Some((_, expires_at)) if *expires_at <= Instant::now() => {
                entries.remove(key);
                Ok(None)
            }
            Some((value, _)) => Ok(Some(value.clone())),
            None => Ok(None),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), anyhow::Error> {
        self.check()?;
        self.entries
            .lock()
            .map_err(|e| anyhow::anyhow!("Mock store mutex poisoned: {}", e))?
            .remove(key);
        Ok(())
    }

    async fn health_check(&self) -> Result<(), anyhow::Error> {
        self.check()
    }
}
