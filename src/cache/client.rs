//! Typed, best-effort cache facade.
//!
//! Backend failures never reach the caller: reads degrade to a miss, writes
//! and removals degrade to a no-op, and each failure is logged at warn level.

use super::cache::CacheBackend;
use serde::{de::DeserializeOwned, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

#[derive(Clone)]
pub struct CacheClient {
    backend: Arc<dyn CacheBackend>,
    default_ttl: Duration,
}

impl CacheClient {
    pub fn new(backend: Arc<dyn CacheBackend>, default_ttl: Duration) -> Self {
        Self {
            backend,
            default_ttl,
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub async fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let raw = match self.backend.get(key).await {
            Ok(Some(raw)) => raw,
            Ok(None) => {
                debug!(key, "cache miss");
                return None;
            }
            Err(e) => {
                warn!(key, backend = self.backend.name(), error = %e, "cache read failed");
                return None;
            }
        };

        match serde_json::from_str(&raw) {
            Ok(value) => {
                debug!(key, "cache hit");
                Some(value)
            }
            Err(e) => {
                warn!(key, error = %e, "discarding undecodable cache entry");
                self.remove(key).await;
                None
            }
        }
    }

    /// Store `value` under `key`; `None` uses the configured default TTL
    pub async fn set<T: Serialize>(&self, key: &str, value: &T, ttl: Option<Duration>) {
        let raw = match serde_json::to_string(value) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key, error = %e, "cache value not serializable");
                return;
            }
        };

        let ttl = ttl.unwrap_or(self.default_ttl);
        if let Err(e) = self.backend.set(key, &raw, ttl).await {
            warn!(key, backend = self.backend.name(), error = %e, "cache write failed");
        }
    }

    pub async fn remove(&self, key: &str) {
        if let Err(e) = self.backend.delete(key).await {
            warn!(key, backend = self.backend.name(), error = %e, "cache invalidation failed");
        }
    }

    pub async fn remove_all<I, K>(&self, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: AsRef<str>,
    {
        for key in keys {
            self.remove(key.as_ref()).await;
        }
    }

    /// Read-through lookup.
    ///
    /// On a hit the loader is not invoked. On a miss (or any cache failure)
    /// the loader runs, its value is stored, and returned. Only the loader's
    /// own error can fail this call.
    pub async fn get_or_set<T, E, F, Fut>(
        &self,
        key: &str,
        ttl: Option<Duration>,
        loader: F,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(cached) = self.get::<T>(key).await {
            return Ok(cached);
        }

        let value = loader().await?;
        self.set(key, &value, ttl).await;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::cache::InMemoryCache;
    use crate::cache::error::{CacheError, CacheResult};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct BrokenBackend;

    #[async_trait]
    impl CacheBackend for BrokenBackend {
        async fn get(&self, _key: &str) -> CacheResult<Option<String>> {
            Err(CacheError::ConnectionError("connection refused".to_string()))
        }

        async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> CacheResult<()> {
            Err(CacheError::ConnectionError("connection refused".to_string()))
        }

        async fn delete(&self, _key: &str) -> CacheResult<bool> {
            Err(CacheError::ConnectionError("connection refused".to_string()))
        }

        fn name(&self) -> &'static str {
            "broken"
        }
    }

    fn memory_client() -> CacheClient {
        CacheClient::new(Arc::new(InMemoryCache::new()), Duration::from_secs(60))
    }

    #[tokio::test]
    async fn get_or_set_invokes_loader_only_on_miss() {
        let client = memory_client();
        let calls = AtomicUsize::new(0);

        for _ in 0..3 {
            let value: Result<u32, String> = client
                .get_or_set("v1:test:counter", None, || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(7)
                })
                .await;
            assert_eq!(value, Ok(7));
        }

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn loader_error_is_not_cached() {
        let client = memory_client();

        let first: Result<u32, String> = client
            .get_or_set("v1:test:flaky", None, || async { Err("db down".to_string()) })
            .await;
        assert!(first.is_err());

        let second: Result<u32, String> = client
            .get_or_set("v1:test:flaky", None, || async { Ok(3) })
            .await;
        assert_eq!(second, Ok(3));
    }

    #[tokio::test]
    async fn remove_forces_reload() {
        let client = memory_client();
        client.set("v1:test:item", &"old", None).await;
        client.remove("v1:test:item").await;

        let value: Result<String, String> = client
            .get_or_set("v1:test:item", None, || async { Ok("new".to_string()) })
            .await;
        assert_eq!(value.unwrap(), "new");
    }

    #[tokio::test]
    async fn broken_backend_falls_through_to_loader() {
        let client = CacheClient::new(Arc::new(BrokenBackend), Duration::from_secs(60));

        let value: Result<u32, String> = client
            .get_or_set("v1:test:any", None, || async { Ok(11) })
            .await;
        assert_eq!(value, Ok(11));

        client.remove("v1:test:any").await;
        assert_eq!(client.get::<u32>("v1:test:any").await, None);
    }

    #[tokio::test]
    async fn undecodable_entry_is_treated_as_miss() {
        let backend = Arc::new(InMemoryCache::new());
        backend
            .set("v1:test:bad", "not json", Duration::from_secs(60))
            .await
            .unwrap();
        let client = CacheClient::new(backend.clone(), Duration::from_secs(60));

        assert_eq!(client.get::<u32>("v1:test:bad").await, None);
        assert_eq!(backend.get("v1:test:bad").await.unwrap(), None);
    }
}
