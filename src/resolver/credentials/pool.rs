// Credential pool with health-based rotation
//
// One pool per (platform, tier). Selection advances a lock-free cursor and
// takes a read lock; every state transition takes that pool's write lock, so
// transitions on one pool never interleave while other pools stay free.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::store::PoolStore;
use crate::resolver::config::PoolConfig;
use crate::resolver::models::{Platform, Tier};

/// Source of "now" in unix seconds
pub trait Clock: Send + Sync {
    fn now(&self) -> u64;
}

pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Clock that only moves when told to
#[derive(Debug, Default)]
pub struct ManualClock(AtomicU64);

impl ManualClock {
    pub fn new(start: u64) -> Self {
        Self(AtomicU64::new(start))
    }

    pub fn advance(&self, secs: u64) {
        self.0.fetch_add(secs, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> u64 {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    Healthy,
    Degraded,
    Cooling,
    Evicted,
}

impl HealthState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Cooling => "cooling",
            Self::Evicted => "evicted",
        }
    }
}

impl fmt::Display for HealthState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pooled credential and its health record
#[derive(Clone, Serialize, Deserialize)]
pub struct Credential {
    /// Stable id derived from the secret, safe to log
    pub id: String,
    value: String,
    pub platform: Platform,
    pub tier: Tier,
    pub state: HealthState,
    pub failure_count: u32,
    #[serde(default)]
    pub expiry_count: u32,
    pub cooldown_until: Option<u64>,
    pub last_used_at: Option<u64>,
    #[serde(default)]
    pub last_error: Option<String>,
}

impl Credential {
    pub fn new(platform: Platform, tier: Tier, value: impl Into<String>) -> Self {
        let value = value.into();
        Self {
            id: credential_id(&value),
            value,
            platform,
            tier,
            state: HealthState::Healthy,
            failure_count: 0,
            expiry_count: 0,
            cooldown_until: None,
            last_used_at: None,
            last_error: None,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    fn lease(&self) -> CredentialLease {
        CredentialLease {
            id: self.id.clone(),
            platform: self.platform,
            tier: self.tier,
            value: self.value.clone(),
        }
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("id", &self.id)
            .field("platform", &self.platform)
            .field("tier", &self.tier)
            .field("state", &self.state)
            .field("failure_count", &self.failure_count)
            .field("cooldown_until", &self.cooldown_until)
            .finish_non_exhaustive()
    }
}

fn credential_id(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    hex::encode(digest)[..12].to_string()
}

/// A credential handed out for the duration of one extraction.
///
/// Health signals go back to the pool through the lease id, so the secret
/// never needs to leave the extraction call.
#[derive(Clone)]
pub struct CredentialLease {
    pub id: String,
    pub platform: Platform,
    pub tier: Tier,
    value: String,
}

impl CredentialLease {
    pub fn value(&self) -> &str {
        &self.value
    }
}

impl fmt::Debug for CredentialLease {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialLease")
            .field("id", &self.id)
            .field("platform", &self.platform)
            .field("tier", &self.tier)
            .field("value", &"<redacted>")
            .finish()
    }
}

/// Per-state counts for one pool
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    pub platform: Platform,
    pub tier: Tier,
    pub healthy: usize,
    pub degraded: usize,
    pub cooling: usize,
    /// Evicted since startup; evicted credentials are no longer stored
    pub evicted: usize,
}

impl PoolStats {
    pub fn total(&self) -> usize {
        self.healthy + self.degraded + self.cooling
    }
}

#[derive(Default)]
struct TierPool {
    cursor: AtomicUsize,
    evicted: AtomicUsize,
    credentials: RwLock<Vec<Credential>>,
    /// Serializes snapshot + save so the newest state is written last
    persist: tokio::sync::Mutex<()>,
}

/// Outcome of one health signal
enum Transition {
    Updated,
    Evicted,
    Missing,
}

pub struct CredentialPool {
    pools: HashMap<(Platform, Tier), TierPool>,
    config: PoolConfig,
    store: Arc<dyn PoolStore>,
    clock: Arc<dyn Clock>,
}

impl CredentialPool {
    pub fn new(config: PoolConfig, store: Arc<dyn PoolStore>) -> Self {
        Self::with_clock(config, store, Arc::new(SystemClock))
    }

    pub fn with_clock(config: PoolConfig, store: Arc<dyn PoolStore>, clock: Arc<dyn Clock>) -> Self {
        let mut pools = HashMap::new();
        for platform in Platform::ALL {
            for tier in [Tier::Public, Tier::Private] {
                pools.insert((platform, tier), TierPool::default());
            }
        }
        Self {
            pools,
            config,
            store,
            clock,
        }
    }

    fn pool(&self, platform: Platform, tier: Tier) -> &TierPool {
        // Every (platform, tier) pair is created in the constructor
        &self.pools[&(platform, tier)]
    }

    /// Restore every pool from the store. Pools that fail to load stay empty.
    pub async fn load_all(&self) {
        for (&(platform, tier), pool) in &self.pools {
            match self.store.load_pool(platform, tier).await {
                Ok(credentials) => {
                    if !credentials.is_empty() {
                        tracing::info!(
                            platform = %platform,
                            tier = %tier,
                            count = credentials.len(),
                            store = self.store.name(),
                            "credential pool restored"
                        );
                    }
                    *pool.credentials.write() = credentials
                        .into_iter()
                        .filter(|c| c.state != HealthState::Evicted)
                        .collect();
                }
                Err(e) => {
                    tracing::warn!(platform = %platform, tier = %tier, error = %e, "failed to load credential pool");
                }
            }
        }
    }

    /// Write every pool to the store
    pub async fn flush(&self) {
        for &(platform, tier) in self.pools.keys() {
            self.persist(platform, tier).await;
        }
    }

    async fn persist(&self, platform: Platform, tier: Tier) {
        let pool = self.pool(platform, tier);
        let _guard = pool.persist.lock().await;
        let snapshot = pool.credentials.read().clone();
        if let Err(e) = self.store.save_pool(platform, tier, &snapshot).await {
            tracing::warn!(platform = %platform, tier = %tier, error = %e, "failed to persist credential pool");
        }
    }

    /// Provision a credential. Re-adding a known secret resets its health.
    /// Returns the credential id.
    pub async fn add(&self, platform: Platform, tier: Tier, value: &str) -> String {
        let credential = Credential::new(platform, tier, value.trim());
        let id = credential.id.clone();
        {
            let mut credentials = self.pool(platform, tier).credentials.write();
            match credentials.iter_mut().find(|c| c.id == id) {
                Some(existing) => *existing = credential,
                None => credentials.push(credential),
            }
        }
        tracing::info!(platform = %platform, tier = %tier, credential = %id, "credential added");
        self.persist(platform, tier).await;
        id
    }

    /// Remove a credential by id
    pub async fn remove(&self, platform: Platform, tier: Tier, id: &str) -> bool {
        let removed = {
            let mut credentials = self.pool(platform, tier).credentials.write();
            let before = credentials.len();
            credentials.retain(|c| c.id != id);
            credentials.len() != before
        };
        if removed {
            tracing::info!(platform = %platform, tier = %tier, credential = id, "credential removed");
            self.persist(platform, tier).await;
        }
        removed
    }

    /// Next eligible credential, falling back from private to public
    pub fn get_rotating(&self, platform: Platform, tier: Tier) -> Option<CredentialLease> {
        if let Some(lease) = self.select(platform, tier) {
            return Some(lease);
        }
        if tier == Tier::Private {
            tracing::debug!(platform = %platform, "no private credential available, falling back to public");
            return self.select(platform, Tier::Public);
        }
        None
    }

    fn select(&self, platform: Platform, tier: Tier) -> Option<CredentialLease> {
        let pool = self.pool(platform, tier);
        let now = self.clock.now();
        self.release_cooled(pool, now);

        let guard = pool.credentials.read();
        let credentials: &[Credential] = &guard;
        let len = credentials.len();
        if len == 0 {
            return None;
        }
        let start = pool.cursor.fetch_add(1, Ordering::Relaxed) % len;
        let in_rotation = || (0..len).map(move |offset| &credentials[(start + offset) % len]);

        in_rotation()
            .find(|c| c.state == HealthState::Healthy)
            .or_else(|| in_rotation().find(|c| c.state == HealthState::Degraded))
            .map(Credential::lease)
    }

    /// Move credentials whose cooldown elapsed back to Degraded
    fn release_cooled(&self, pool: &TierPool, now: u64) {
        let cooled = |c: &Credential| c.state == HealthState::Cooling && c.cooldown_until.map_or(true, |t| t <= now);
        if !pool.credentials.read().iter().any(cooled) {
            return;
        }
        for credential in pool.credentials.write().iter_mut().filter(|c| cooled(c)) {
            credential.state = HealthState::Degraded;
            credential.cooldown_until = None;
            tracing::info!(credential = %credential.id, platform = %credential.platform, "cooldown elapsed, credential degraded");
        }
    }

    fn transition<F>(&self, lease: &CredentialLease, apply: F) -> Transition
    where
        F: FnOnce(&mut Credential, u64, &PoolConfig) -> Transition,
    {
        let pool = self.pool(lease.platform, lease.tier);
        let now = self.clock.now();
        let mut credentials = pool.credentials.write();
        let Some(index) = credentials.iter().position(|c| c.id == lease.id) else {
            return Transition::Missing;
        };

        credentials[index].last_used_at = Some(now);
        let outcome = apply(&mut credentials[index], now, &self.config);
        if let Transition::Evicted = outcome {
            credentials.remove(index);
            pool.evicted.fetch_add(1, Ordering::Relaxed);
        }
        outcome
    }

    async fn finish(&self, lease: &CredentialLease, outcome: Transition) {
        if !matches!(outcome, Transition::Missing) {
            self.persist(lease.platform, lease.tier).await;
        }
    }

    pub async fn mark_success(&self, lease: &CredentialLease) {
        let outcome = self.transition(lease, |c, _, _| {
            if c.state != HealthState::Healthy {
                tracing::info!(credential = %c.id, from = %c.state, "credential healthy again");
            }
            c.state = HealthState::Healthy;
            c.failure_count = 0;
            c.expiry_count = 0;
            c.cooldown_until = None;
            c.last_error = None;
            Transition::Updated
        });
        self.finish(lease, outcome).await;
    }

    pub async fn mark_error(&self, lease: &CredentialLease, reason: &str) {
        let outcome = self.transition(lease, |c, now, config| {
            c.failure_count += 1;
            c.last_error = Some(reason.to_string());

            if c.failure_count >= config.hard_threshold {
                if c.state != HealthState::Cooling {
                    tracing::info!(credential = %c.id, failures = c.failure_count, "credential cooling down");
                }
                c.state = HealthState::Cooling;
                c.cooldown_until = Some(now + config.cooldown_secs);
            } else if c.failure_count >= config.soft_threshold && c.state == HealthState::Healthy {
                tracing::info!(credential = %c.id, failures = c.failure_count, "credential degraded");
                c.state = HealthState::Degraded;
            }
            Transition::Updated
        });
        self.finish(lease, outcome).await;
    }

    pub async fn mark_expired(&self, lease: &CredentialLease, reason: &str) {
        let outcome = self.transition(lease, |c, now, config| {
            c.expiry_count += 1;
            c.last_error = Some(reason.to_string());

            if c.expiry_count >= config.evict_after_expiries {
                c.state = HealthState::Evicted;
                tracing::warn!(
                    credential = %c.id,
                    platform = %c.platform,
                    tier = %c.tier,
                    expiries = c.expiry_count,
                    "credential evicted, needs re-provisioning"
                );
                return Transition::Evicted;
            }

            c.state = HealthState::Cooling;
            c.cooldown_until = Some(now + config.cooldown_secs);
            tracing::info!(credential = %c.id, reason, "credential expired, cooling down");
            Transition::Updated
        });
        self.finish(lease, outcome).await;
    }

    /// Per-state counts for every non-empty pool
    pub fn stats(&self) -> Vec<PoolStats> {
        let mut stats: Vec<PoolStats> = self
            .pools
            .iter()
            .map(|(&(platform, tier), pool)| {
                let credentials = pool.credentials.read();
                let count = |state: HealthState| credentials.iter().filter(|c| c.state == state).count();
                PoolStats {
                    platform,
                    tier,
                    healthy: count(HealthState::Healthy),
                    degraded: count(HealthState::Degraded),
                    cooling: count(HealthState::Cooling),
                    evicted: pool.evicted.load(Ordering::Relaxed),
                }
            })
            .filter(|s| s.total() > 0 || s.evicted > 0)
            .collect();
        stats.sort_by_key(|s| (s.platform, s.tier));
        stats
    }

    /// Snapshot of one credential's record
    pub fn credential(&self, platform: Platform, tier: Tier, id: &str) -> Option<Credential> {
        self.pool(platform, tier)
            .credentials
            .read()
            .iter()
            .find(|c| c.id == id)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::credentials::store::MemoryPoolStore;

    fn make_pool(clock: Arc<ManualClock>) -> CredentialPool {
        CredentialPool::with_clock(PoolConfig::default(), Arc::new(MemoryPoolStore::new()), clock)
    }

    #[tokio::test]
    async fn test_round_robin() {
        let pool = make_pool(Arc::new(ManualClock::new(1_000)));
        let a = pool.add(Platform::Instagram, Tier::Public, "a=1").await;
        let b = pool.add(Platform::Instagram, Tier::Public, "b=2").await;

        let picks: Vec<String> = (0..4)
            .map(|_| pool.get_rotating(Platform::Instagram, Tier::Public).unwrap().id)
            .collect();
        assert_eq!(picks, vec![a.clone(), b.clone(), a, b]);
    }

    #[tokio::test]
    async fn test_hard_threshold_cools_until_elapsed() {
        let clock = Arc::new(ManualClock::new(1_000));
        let pool = make_pool(clock.clone());
        pool.add(Platform::TikTok, Tier::Public, "s=1").await;
        let lease = pool.get_rotating(Platform::TikTok, Tier::Public).unwrap();

        for _ in 0..PoolConfig::default().hard_threshold {
            pool.mark_error(&lease, "blocked").await;
        }
        let record = pool.credential(Platform::TikTok, Tier::Public, &lease.id).unwrap();
        assert_eq!(record.state, HealthState::Cooling);
        assert_eq!(record.cooldown_until, Some(1_000 + 900));

        for _ in 0..5 {
            assert!(pool.get_rotating(Platform::TikTok, Tier::Public).is_none());
        }

        clock.advance(900);
        let again = pool.get_rotating(Platform::TikTok, Tier::Public).unwrap();
        assert_eq!(again.id, lease.id);
        let record = pool.credential(Platform::TikTok, Tier::Public, &lease.id).unwrap();
        assert_eq!(record.state, HealthState::Degraded);
    }

    #[tokio::test]
    async fn test_success_resets() {
        let pool = make_pool(Arc::new(ManualClock::new(0)));
        pool.add(Platform::Twitter, Tier::Private, "auth_token=x").await;
        let lease = pool.get_rotating(Platform::Twitter, Tier::Private).unwrap();

        pool.mark_error(&lease, "login required").await;
        pool.mark_error(&lease, "login required").await;
        assert_eq!(
            pool.credential(Platform::Twitter, Tier::Private, &lease.id).unwrap().state,
            HealthState::Degraded
        );

        pool.mark_success(&lease).await;
        let record = pool.credential(Platform::Twitter, Tier::Private, &lease.id).unwrap();
        assert_eq!(record.state, HealthState::Healthy);
        assert_eq!(record.failure_count, 0);
        assert!(record.last_used_at.is_some());
    }

    #[tokio::test]
    async fn test_degraded_is_deprioritized() {
        let pool = make_pool(Arc::new(ManualClock::new(0)));
        let weak = pool.add(Platform::Facebook, Tier::Public, "weak=1").await;
        let strong = pool.add(Platform::Facebook, Tier::Public, "strong=1").await;

        let lease = CredentialLease {
            id: weak.clone(),
            platform: Platform::Facebook,
            tier: Tier::Public,
            value: String::new(),
        };
        pool.mark_error(&lease, "x").await;
        pool.mark_error(&lease, "x").await;

        for _ in 0..4 {
            assert_eq!(pool.get_rotating(Platform::Facebook, Tier::Public).unwrap().id, strong);
        }
    }

    #[tokio::test]
    async fn test_private_falls_back_to_public_only() {
        let pool = make_pool(Arc::new(ManualClock::new(0)));
        let public = pool.add(Platform::Instagram, Tier::Public, "p=1").await;

        let lease = pool.get_rotating(Platform::Instagram, Tier::Private).unwrap();
        assert_eq!(lease.id, public);
        assert_eq!(lease.tier, Tier::Public);

        let pool = make_pool(Arc::new(ManualClock::new(0)));
        pool.add(Platform::Instagram, Tier::Private, "q=1").await;
        assert!(pool.get_rotating(Platform::Instagram, Tier::Public).is_none());
    }

    #[tokio::test]
    async fn test_fully_cooling_private_falls_back() {
        let pool = make_pool(Arc::new(ManualClock::new(0)));
        pool.add(Platform::Instagram, Tier::Private, "priv=1").await;
        let public = pool.add(Platform::Instagram, Tier::Public, "pub=1").await;

        let lease = pool.get_rotating(Platform::Instagram, Tier::Private).unwrap();
        pool.mark_expired(&lease, "session rejected").await;

        assert_eq!(pool.get_rotating(Platform::Instagram, Tier::Private).unwrap().id, public);
    }

    #[tokio::test]
    async fn test_repeated_expiry_evicts() {
        let clock = Arc::new(ManualClock::new(0));
        let pool = make_pool(clock.clone());
        pool.add(Platform::Threads, Tier::Private, "s=1").await;
        let lease = pool.get_rotating(Platform::Threads, Tier::Private).unwrap();

        for _ in 0..3 {
            pool.mark_expired(&lease, "expired").await;
            clock.advance(1_000);
        }

        assert!(pool.credential(Platform::Threads, Tier::Private, &lease.id).is_none());
        let stats = pool.stats();
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].evicted, 1);
        assert_eq!(stats[0].total(), 0);

        // Late signals for an evicted credential are ignored
        pool.mark_success(&lease).await;
        assert!(pool.credential(Platform::Threads, Tier::Private, &lease.id).is_none());
    }

    #[tokio::test]
    async fn test_concurrent_errors_are_not_lost() {
        let config = PoolConfig {
            hard_threshold: 1_000,
            ..PoolConfig::default()
        };
        let pool = Arc::new(CredentialPool::with_clock(
            config,
            Arc::new(MemoryPoolStore::new()),
            Arc::new(ManualClock::new(0)),
        ));
        pool.add(Platform::YouTube, Tier::Public, "c=1").await;
        let lease = pool.get_rotating(Platform::YouTube, Tier::Public).unwrap();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let pool = pool.clone();
            let lease = lease.clone();
            handles.push(tokio::spawn(async move { pool.mark_error(&lease, "x").await }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let record = pool.credential(Platform::YouTube, Tier::Public, &lease.id).unwrap();
        assert_eq!(record.failure_count, 50);
    }

    #[tokio::test]
    async fn test_state_survives_restart() {
        let store: Arc<dyn PoolStore> = Arc::new(MemoryPoolStore::new());
        let first = CredentialPool::with_clock(PoolConfig::default(), store.clone(), Arc::new(ManualClock::new(0)));
        let id = first.add(Platform::TikTok, Tier::Private, "sid=1").await;
        let lease = first.get_rotating(Platform::TikTok, Tier::Private).unwrap();
        first.mark_error(&lease, "x").await;
        first.flush().await;

        let second = CredentialPool::with_clock(PoolConfig::default(), store, Arc::new(ManualClock::new(0)));
        second.load_all().await;
        let record = second.credential(Platform::TikTok, Tier::Private, &id).unwrap();
        assert_eq!(record.failure_count, 1);
        assert_eq!(record.value(), "sid=1");
    }

    #[test]
    fn test_lease_debug_is_redacted() {
        let credential = Credential::new(Platform::Instagram, Tier::Private, "sessionid=secret");
        let printed = format!("{:?} {:?}", credential, credential.lease());
        assert!(!printed.contains("secret"));
    }
}
