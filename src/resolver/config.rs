// Resolver configuration
//
// Loaded from TOML, then overlaid by MEDIA_RESOLVER_* environment variables,
// then adjusted in code through the `with_*` builders.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::models::Platform;

pub const DEFAULT_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/121.0.0.0 Safari/537.36";

/// Failure while loading configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Credential pool thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PoolConfig {
    /// Failures before a credential is deprioritized
    pub soft_threshold: u32,
    /// Failures before a credential is put on cooldown
    pub hard_threshold: u32,
    pub cooldown_secs: u64,
    /// Expiry signals before a credential is evicted
    pub evict_after_expiries: u32,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            soft_threshold: 2,
            hard_threshold: 5,
            cooldown_secs: 900,
            evict_after_expiries: 3,
        }
    }
}

/// Bounded retry policy for binary fetches
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchConfig {
    pub max_attempts: u32,
    pub backoff_ms: u64,
    /// Double the delay after each attempt instead of growing linearly
    pub exponential: bool,
    pub timeout_secs: u64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: 500,
            exponential: true,
            timeout_secs: 60,
        }
    }
}

/// A deployment-specific domain claimed by a platform
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DomainRule {
    pub platform: Platform,
    pub domain: String,
}

/// A deployment-specific short-link prefix (`host/path-prefix`)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ShortLinkRule {
    /// `None` means "any platform"
    #[serde(default)]
    pub platform: Option<Platform>,
    pub prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct DetectorConfig {
    pub extra_domains: Vec<DomainRule>,
    pub extra_short_links: Vec<ShortLinkRule>,
}

/// Top-level resolver configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Skip the private-network blocklist. Only for local test fixtures.
    pub allow_private_networks: bool,
    pub resolve_timeout_secs: u64,
    pub engine_timeout_secs: u64,
    pub subprocess_timeout_secs: u64,
    pub detector_cache_size: usize,
    pub max_redirects: usize,
    pub cache_ttl_secs: u64,
    /// SOCKS5/HTTP proxy URL
    pub proxy: Option<String>,
    pub user_agent: String,
    pub ytdlp_path: Option<String>,
    /// Directory for the JSON credential store
    pub store_dir: Option<PathBuf>,
    pub pool: PoolConfig,
    pub fetch: FetchConfig,
    pub detector: DetectorConfig,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            allow_private_networks: false,
            resolve_timeout_secs: 5,
            engine_timeout_secs: 30,
            subprocess_timeout_secs: 55,
            detector_cache_size: 1024,
            max_redirects: 10,
            cache_ttl_secs: 3600,
            proxy: None,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            ytdlp_path: None,
            store_dir: None,
            pool: PoolConfig::default(),
            fetch: FetchConfig::default(),
            detector: DetectorConfig::default(),
        }
    }
}

impl ResolverConfig {
    /// Load from a TOML file and apply environment overrides
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml_str(&content)?.with_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: ResolverConfig = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Overlay MEDIA_RESOLVER_PROXY, MEDIA_RESOLVER_YTDLP and MEDIA_RESOLVER_STORE_DIR
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(proxy) = env_non_empty("MEDIA_RESOLVER_PROXY") {
            self.proxy = Some(proxy);
        }
        if let Some(path) = env_non_empty("MEDIA_RESOLVER_YTDLP") {
            self.ytdlp_path = Some(path);
        }
        if let Some(dir) = env_non_empty("MEDIA_RESOLVER_STORE_DIR") {
            self.store_dir = Some(PathBuf::from(dir));
        }
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if self.resolve_timeout_secs == 0 {
            errors.push("resolve_timeout_secs must be > 0");
        }
        if self.engine_timeout_secs == 0 {
            errors.push("engine_timeout_secs must be > 0");
        }
        if self.subprocess_timeout_secs == 0 || self.subprocess_timeout_secs >= 60 {
            errors.push("subprocess_timeout_secs must be between 1 and 59");
        }
        if self.detector_cache_size == 0 {
            errors.push("detector_cache_size must be > 0");
        }
        if self.pool.soft_threshold == 0 || self.pool.hard_threshold <= self.pool.soft_threshold {
            errors.push("pool thresholds must satisfy 0 < soft_threshold < hard_threshold");
        }
        if self.pool.evict_after_expiries == 0 {
            errors.push("pool.evict_after_expiries must be > 0");
        }
        if self.fetch.max_attempts == 0 {
            errors.push("fetch.max_attempts must be > 0");
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors.join("; ")))
        }
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }

    pub fn engine_timeout(&self) -> Duration {
        Duration::from_secs(self.engine_timeout_secs)
    }

    pub fn subprocess_timeout(&self) -> Duration {
        Duration::from_secs(self.subprocess_timeout_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_secs)
    }

    /// Store directory, falling back to the per-user data directory
    pub fn effective_store_dir(&self) -> Option<PathBuf> {
        self.store_dir
            .clone()
            .or_else(|| dirs::data_dir().map(|d| d.join("media-resolver").join("credentials")))
    }

    pub fn with_proxy(mut self, proxy: Option<String>) -> Self {
        self.proxy = proxy;
        self
    }

    pub fn with_allow_private_networks(mut self, allow: bool) -> Self {
        self.allow_private_networks = allow;
        self
    }

    pub fn with_resolve_timeout(mut self, seconds: u64) -> Self {
        self.resolve_timeout_secs = seconds;
        self
    }

    pub fn with_engine_timeout(mut self, seconds: u64) -> Self {
        self.engine_timeout_secs = seconds;
        self
    }

    pub fn with_ytdlp_path(mut self, path: Option<String>) -> Self {
        self.ytdlp_path = path;
        self
    }

    pub fn with_store_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.store_dir = dir;
        self
    }

    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    pub fn with_fetch(mut self, fetch: FetchConfig) -> Self {
        self.fetch = fetch;
        self
    }

    pub fn with_extra_domain(mut self, platform: Platform, domain: &str) -> Self {
        self.detector.extra_domains.push(DomainRule {
            platform,
            domain: domain.to_lowercase(),
        });
        self
    }

    pub fn with_extra_short_link(mut self, platform: Option<Platform>, prefix: &str) -> Self {
        self.detector.extra_short_links.push(ShortLinkRule {
            platform,
            prefix: prefix.to_lowercase(),
        });
        self
    }
}

fn env_non_empty(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}
