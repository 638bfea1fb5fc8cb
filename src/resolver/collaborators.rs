// Result cache and stats collaborators
//
// The resolver decides cache keys and hit/miss policy; storage and expiry
// belong to the cache implementation.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Serialize;

use crate::resolver::models::{CacheKey, ExtractionResult, Platform};

#[async_trait]
pub trait ResultCache: Send + Sync {
    async fn get(&self, key: &CacheKey) -> Option<ExtractionResult>;

    async fn set(&self, key: &CacheKey, result: &ExtractionResult, ttl: Duration);
}

/// In-process TTL cache
#[derive(Default)]
pub struct MemoryCache {
    entries: Mutex<HashMap<CacheKey, (ExtractionResult, Instant)>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl ResultCache for MemoryCache {
    async fn get(&self, key: &CacheKey) -> Option<ExtractionResult> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some((result, expires)) if *expires > Instant::now() => Some(result.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    async fn set(&self, key: &CacheKey, result: &ExtractionResult, ttl: Duration) {
        self.entries
            .lock()
            .insert(key.clone(), (result.clone(), Instant::now() + ttl));
    }
}

/// Cache that never hits
pub struct NoCache;

#[async_trait]
impl ResultCache for NoCache {
    async fn get(&self, _key: &CacheKey) -> Option<ExtractionResult> {
        None
    }

    async fn set(&self, _key: &CacheKey, _result: &ExtractionResult, _ttl: Duration) {}
}

/// One completed dispatch
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsEvent {
    pub platform: Platform,
    pub success: bool,
    pub latency_ms: u64,
    /// Front-end the request came from ("cli", "api", ...)
    pub source_channel: String,
}

/// Usage/quota sink. Called fire-and-forget: errors are logged, never returned.
#[async_trait]
pub trait StatsSink: Send + Sync {
    async fn record(&self, event: StatsEvent) -> Result<(), String>;
}

pub struct NoopStats;

#[async_trait]
impl StatsSink for NoopStats {
    async fn record(&self, _event: StatsEvent) -> Result<(), String> {
        Ok(())
    }
}

/// Keeps every event in memory
#[derive(Default)]
pub struct MemoryStats {
    events: Mutex<Vec<StatsEvent>>,
}

impl MemoryStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<StatsEvent> {
        self.events.lock().clone()
    }
}

#[async_trait]
impl StatsSink for MemoryStats {
    async fn record(&self, event: StatsEvent) -> Result<(), String> {
        self.events.lock().push(event);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::errors::ErrorCode;

    fn key(s: &str) -> CacheKey {
        CacheKey(s.to_string())
    }

    #[tokio::test]
    async fn test_memory_cache_expiry() {
        let cache = MemoryCache::new();
        let result = ExtractionResult::failure(ErrorCode::NoMedia, "x");

        cache.set(&key("instagram:0"), &result, Duration::from_secs(60)).await;
        assert_eq!(cache.get(&key("instagram:0")).await, Some(result.clone()));
        assert_eq!(cache.get(&key("instagram:1")).await, None);

        cache.set(&key("instagram:2"), &result, Duration::ZERO).await;
        assert_eq!(cache.get(&key("instagram:2")).await, None);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_stats_records() {
        let stats = MemoryStats::new();
        stats
            .record(StatsEvent {
                platform: Platform::TikTok,
                success: true,
                latency_ms: 12,
                source_channel: "cli".to_string(),
            })
            .await
            .unwrap();
        assert_eq!(stats.events().len(), 1);
    }
}
