use crate::errors::AppError;
use crate::models::{CacheRecord, Service};
use crate::storage::Storage;
use chrono::{DateTime, Utc};
use moka::future::Cache;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on the in-process tier TTL. The persistent tier is the
/// source of truth; the hot tier only short-circuits repeat lookups.
const HOT_TIER_MAX_TTL: Duration = Duration::from_secs(300);
const HOT_TIER_CAPACITY: u64 = 10_000;

/// Two-tier cache for successful lookup results.
///
/// Reads check an in-process moka tier first, then the persistent tier.
/// Persistent entries carry a SHA-256 checksum computed at write time;
/// an entry whose checksum no longer matches its payload is dropped and
/// treated as a miss, so a poisoned row can never be served. Expiry is
/// optional: with no TTL configured, entries live until explicitly
/// invalidated.
#[derive(Clone)]
pub struct ResultCache {
    storage: Arc<dyn Storage>,
    hot: Cache<(Service, String), Value>,
    ttl: Option<Duration>,
}

impl ResultCache {
    pub fn new(storage: Arc<dyn Storage>, ttl: Option<Duration>) -> Self {
        let hot_ttl = ttl.map(|t| t.min(HOT_TIER_MAX_TTL)).unwrap_or(HOT_TIER_MAX_TTL);
        let hot = Cache::builder()
            .time_to_live(hot_ttl)
            .max_capacity(HOT_TIER_CAPACITY)
            .build();
        Self { storage, hot, ttl }
    }

    pub async fn get(&self, service: Service, query: &str) -> Result<Option<Value>, AppError> {
        let key = (service, query.to_string());
        if let Some(payload) = self.hot.get(&key).await {
            tracing::debug!("Hot cache hit for {}:{}", service, query);
            return Ok(Some(payload));
        }

        let Some(record) = self.storage.cache_get(service, query).await? else {
            return Ok(None);
        };

        if self.is_expired(record.created_at) {
            tracing::debug!("Cache entry expired for {}:{}", service, query);
            self.storage.cache_delete(service, query).await?;
            return Ok(None);
        }

        if compute_checksum(&record.payload) != record.checksum {
            tracing::warn!(
                "Cache checksum mismatch for {}:{}, dropping entry",
                service,
                query
            );
            self.storage.cache_delete(service, query).await?;
            return Ok(None);
        }

        self.hot.insert(key, record.payload.clone()).await;
        Ok(Some(record.payload))
    }

    pub async fn put(&self, service: Service, query: &str, payload: &Value) -> Result<(), AppError> {
        let record = CacheRecord {
            service: service.as_str().to_string(),
            query: query.to_string(),
            payload: payload.clone(),
            checksum: compute_checksum(payload),
            created_at: Utc::now(),
        };
        self.storage.cache_put(record).await?;
        self.hot
            .insert((service, query.to_string()), payload.clone())
            .await;
        Ok(())
    }

    /// Removes an entry from both tiers.
    pub async fn invalidate(&self, service: Service, query: &str) -> Result<(), AppError> {
        self.hot.invalidate(&(service, query.to_string())).await;
        self.storage.cache_delete(service, query).await?;
        tracing::info!("Cache invalidated for {}:{}", service, query);
        Ok(())
    }

    fn is_expired(&self, created_at: DateTime<Utc>) -> bool {
        match self.ttl {
            Some(ttl) => {
                let age = Utc::now().signed_duration_since(created_at);
                age.num_seconds() >= ttl.as_secs() as i64
            }
            None => false,
        }
    }
}

fn compute_checksum(payload: &Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(payload.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use serde_json::json;

    #[test]
    fn checksum_is_deterministic() {
        let payload = json!({"name": "test", "value": 42});
        assert_eq!(compute_checksum(&payload), compute_checksum(&payload));
        assert_ne!(
            compute_checksum(&payload),
            compute_checksum(&json!({"name": "other"}))
        );
    }

    #[tokio::test]
    async fn put_then_get_round_trips_through_persistent_tier() {
        let storage = Arc::new(MemoryStorage::new());
        let writer = ResultCache::new(storage.clone(), None);
        let payload = json!({"city": "Pune"});
        writer.put(Service::Ip, "8.8.8.8", &payload).await.unwrap();

        // Fresh instance so the hot tier is empty and the read must
        // come from storage and pass checksum verification.
        let reader = ResultCache::new(storage, None);
        let got = reader.get(Service::Ip, "8.8.8.8").await.unwrap();
        assert_eq!(got, Some(payload));
    }

    #[tokio::test]
    async fn tampered_entry_is_dropped() {
        let storage = Arc::new(MemoryStorage::new());
        storage
            .cache_put(CacheRecord {
                service: Service::Ip.as_str().to_string(),
                query: "8.8.8.8".to_string(),
                payload: json!({"city": "Pune"}),
                checksum: "deadbeef".to_string(),
                created_at: Utc::now(),
            })
            .await
            .unwrap();

        let cache = ResultCache::new(storage.clone(), None);
        assert_eq!(cache.get(Service::Ip, "8.8.8.8").await.unwrap(), None);
        // The poisoned row must be gone so the next lookup refetches.
        assert!(storage.cache_get(Service::Ip, "8.8.8.8").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn entry_older_than_ttl_is_a_miss() {
        let storage = Arc::new(MemoryStorage::new());
        let payload = json!({"city": "Pune"});
        storage
            .cache_put(CacheRecord {
                service: Service::Ip.as_str().to_string(),
                query: "8.8.8.8".to_string(),
                checksum: compute_checksum(&payload),
                payload,
                created_at: Utc::now() - chrono::Duration::hours(2),
            })
            .await
            .unwrap();

        let cache = ResultCache::new(storage, Some(Duration::from_secs(3600)));
        assert_eq!(cache.get(Service::Ip, "8.8.8.8").await.unwrap(), None);
    }

    #[tokio::test]
    async fn invalidate_clears_both_tiers() {
        let storage = Arc::new(MemoryStorage::new());
        let cache = ResultCache::new(storage.clone(), None);
        let payload = json!({"city": "Pune"});
        cache.put(Service::Ip, "8.8.8.8", &payload).await.unwrap();

        cache.invalidate(Service::Ip, "8.8.8.8").await.unwrap();
        assert_eq!(cache.get(Service::Ip, "8.8.8.8").await.unwrap(), None);
        assert!(storage.cache_get(Service::Ip, "8.8.8.8").await.unwrap().is_none());
    }
}
