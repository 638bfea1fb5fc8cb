// Credential persistence backends

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use parking_lot::Mutex;

use super::pool::Credential;
use crate::resolver::errors::StoreError;
use crate::resolver::models::{Platform, Tier};

/// Durable storage for one (platform, tier) pool at a time
#[async_trait]
pub trait PoolStore: Send + Sync {
    /// Backend name for logs
    fn name(&self) -> &'static str;

    /// Stored credentials, empty when nothing was saved yet
    async fn load_pool(&self, platform: Platform, tier: Tier) -> Result<Vec<Credential>, StoreError>;

    /// Replace the stored pool with `credentials`
    async fn save_pool(&self, platform: Platform, tier: Tier, credentials: &[Credential]) -> Result<(), StoreError>;
}

/// Process-local store. State is lost on restart.
#[derive(Default)]
pub struct MemoryPoolStore {
    pools: Mutex<HashMap<(Platform, Tier), Vec<Credential>>>,
}

impl MemoryPoolStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PoolStore for MemoryPoolStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load_pool(&self, platform: Platform, tier: Tier) -> Result<Vec<Credential>, StoreError> {
        Ok(self.pools.lock().get(&(platform, tier)).cloned().unwrap_or_default())
    }

    async fn save_pool(&self, platform: Platform, tier: Tier, credentials: &[Credential]) -> Result<(), StoreError> {
        self.pools.lock().insert((platform, tier), credentials.to_vec());
        Ok(())
    }
}

/// One JSON file per pool: `{dir}/{platform}_{tier}.json`.
///
/// Writes go to a temp file in the same directory and are renamed over the
/// target, so a crash mid-write leaves the previous file intact.
pub struct JsonFilePoolStore {
    dir: PathBuf,
}

impl JsonFilePoolStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, platform: Platform, tier: Tier) -> PathBuf {
        self.dir.join(format!("{}_{}.json", platform.as_str(), tier.as_str()))
    }

    fn write_atomic(dir: &Path, target: &Path, bytes: &[u8]) -> Result<(), StoreError> {
        std::fs::create_dir_all(dir)?;
        let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
        tmp.write_all(bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(target).map_err(|e| StoreError::Io(e.error))?;
        Ok(())
    }
}

#[async_trait]
impl PoolStore for JsonFilePoolStore {
    fn name(&self) -> &'static str {
        "json-file"
    }

    async fn load_pool(&self, platform: Platform, tier: Tier) -> Result<Vec<Credential>, StoreError> {
        let path = self.path_for(platform, tier);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
            Err(e) => Err(e.into()),
        }
    }

    async fn save_pool(&self, platform: Platform, tier: Tier, credentials: &[Credential]) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(credentials)?;
        let dir = self.dir.clone();
        let target = self.path_for(platform, tier);

        tokio::task::spawn_blocking(move || Self::write_atomic(&dir, &target, &bytes))
            .await
            .map_err(|e| StoreError::Io(std::io::Error::new(std::io::ErrorKind::Other, e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_json_store_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFilePoolStore::new(dir.path().join("creds"));

        assert!(store.load_pool(Platform::Instagram, Tier::Private).await.unwrap().is_empty());

        let cred = Credential::new(Platform::Instagram, Tier::Private, "sessionid=abc");
        store
            .save_pool(Platform::Instagram, Tier::Private, &[cred.clone()])
            .await
            .unwrap();

        assert!(dir.path().join("creds/instagram_private.json").exists());
        let loaded = store.load_pool(Platform::Instagram, Tier::Private).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, cred.id);
        assert_eq!(loaded[0].value(), "sessionid=abc");

        // Other pools are untouched
        assert!(store.load_pool(Platform::Instagram, Tier::Public).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_json_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("tiktok_public.json"), b"{not json").unwrap();
        let store = JsonFilePoolStore::new(dir.path());

        let err = store.load_pool(Platform::TikTok, Tier::Public).await.unwrap_err();
        assert!(matches!(err, StoreError::Serde(_)));
    }

    #[tokio::test]
    async fn test_memory_store_replaces() {
        let store = MemoryPoolStore::new();
        let a = Credential::new(Platform::TikTok, Tier::Public, "a=1");
        let b = Credential::new(Platform::TikTok, Tier::Public, "b=2");
        store.save_pool(Platform::TikTok, Tier::Public, &[a]).await.unwrap();
        store.save_pool(Platform::TikTok, Tier::Public, &[b.clone()]).await.unwrap();

        let loaded = store.load_pool(Platform::TikTok, Tier::Public).await.unwrap();
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].id, b.id);
    }
}
