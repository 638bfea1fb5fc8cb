// MediaResolver - the long-lived service object
//
// Built once at startup from a ResolverConfig. Holds the detector cache, the
// credential pool and the engine routes; request handlers share it by
// reference. `shutdown` flushes pool state to the store.

use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::collaborators::{NoCache, NoopStats, ResultCache, StatsEvent, StatsSink};
use super::config::{ConfigError, ResolverConfig};
use super::credentials::{Clock, CredentialPool, JsonFilePoolStore, MemoryPoolStore, PoolStore, SystemClock};
use super::errors::{ErrorCode, ExtractError};
use super::extractors::{DispatchOutcome, Dispatcher, Engine};
use super::fetch::{FetchedFile, MediaFetcher, Sleeper};
use super::models::{
    CacheKey, ContentDescriptor, ExtractionRequest, ExtractionResult, MediaFormat, Platform, ResolutionResult, Tier,
};
use super::pipeline::{self, PlatformDetector, RedirectResolver};

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("failed to set up engines: {0}")]
    Engine(#[from] ExtractError),
}

/// Everything derived from the input URL before any engine runs
#[derive(Debug, Clone, Serialize)]
pub struct PreparedRequest {
    pub resolution: ResolutionResult,
    pub platform: Platform,
    pub descriptor: ContentDescriptor,
    pub cache_key: CacheKey,
}

/// Full answer to one `resolve` call
#[derive(Debug, Clone, Serialize)]
pub struct Resolution {
    pub result: ExtractionResult,
    /// Absent when the input failed before platform detection finished
    pub request: Option<PreparedRequest>,
    pub from_cache: bool,
    /// Absent on cache hits and pre-dispatch failures
    pub dispatch: Option<DispatchOutcome>,
}

impl Resolution {
    fn rejected(error: ExtractError) -> Self {
        Self {
            result: error.into(),
            request: None,
            from_cache: false,
            dispatch: None,
        }
    }
}

pub struct MediaResolver {
    config: ResolverConfig,
    detector: PlatformDetector,
    redirects: RedirectResolver,
    pool: Arc<CredentialPool>,
    dispatcher: Dispatcher,
    fetcher: MediaFetcher,
    cache: Arc<dyn ResultCache>,
    stats: Arc<dyn StatsSink>,
}

impl MediaResolver {
    pub fn builder(config: ResolverConfig) -> MediaResolverBuilder {
        MediaResolverBuilder::new(config)
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<CredentialPool> {
        &self.pool
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn detector(&self) -> &PlatformDetector {
        &self.detector
    }

    /// Raw text -> platform, content descriptor and cache key.
    ///
    /// Fails with INVALID_URL, UNSUPPORTED_PLATFORM or RESOLVE_FAILED; no
    /// engine has run when this returns.
    pub async fn prepare(&self, text: &str) -> Result<PreparedRequest, ExtractError> {
        let allow_private = self.config.allow_private_networks;
        let canonical = pipeline::canonicalize(text, allow_private)?;
        let initial = self.detector.detect_platform(canonical.as_str());
        let needs_resolve = self.detector.needs_resolve(canonical.as_str(), initial);

        let resolution = if needs_resolve {
            // Share links of some platforms only redirect for a session
            let lease = initial.and_then(|p| self.pool.get_rotating(p, Tier::Public));
            self.redirects
                .resolve(&canonical, self.config.resolve_timeout(), lease.as_ref().map(|l| l.value()))
                .await
        } else {
            ResolutionResult::unresolved(canonical.as_str())
        };

        if needs_resolve && !resolution.was_resolved {
            return Err(ExtractError::new(
                ErrorCode::ResolveFailed,
                format!("could not resolve short link {}", canonical),
            ));
        }

        let platform = match self.detector.detect_platform(&resolution.resolved_url) {
            Some(platform) => platform,
            None if needs_resolve => {
                return Err(ExtractError::new(
                    ErrorCode::ResolveFailed,
                    format!("{} does not lead to a supported platform", canonical),
                ))
            }
            None => {
                return Err(ExtractError::new(
                    ErrorCode::UnsupportedPlatform,
                    format!("no supported platform for {}", canonical),
                ))
            }
        };

        if initial.map_or(false, |p| p != platform) {
            tracing::debug!(from = ?initial, to = %platform, "platform changed after resolution");
        }

        let descriptor = pipeline::describe(platform, &resolution.resolved_url);
        let cache_key = pipeline::generate_cache_key(platform, &resolution.resolved_url);

        Ok(PreparedRequest {
            resolution,
            platform,
            descriptor,
            cache_key,
        })
    }

    /// Resolve raw input to media formats.
    ///
    /// `source_channel` is passed through to the stats sink.
    pub async fn resolve(&self, text: &str, source_channel: &str) -> Resolution {
        let started = Instant::now();

        let prepared = match self.prepare(text).await {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::info!(code = %e.code, error = %e.message, "input rejected before dispatch");
                return Resolution::rejected(e);
            }
        };

        if let Some(hit) = self.cache.get(&prepared.cache_key).await {
            tracing::debug!(key = %prepared.cache_key, "cache hit");
            return Resolution {
                result: hit,
                request: Some(prepared),
                from_cache: true,
                dispatch: None,
            };
        }

        let request = ExtractionRequest {
            platform: prepared.platform,
            resolved_url: prepared.resolution.resolved_url.clone(),
            descriptor: prepared.descriptor.clone(),
        };
        let outcome = self.dispatcher.dispatch(&request).await;
        let success = outcome.result.is_success();

        if success {
            self.cache
                .set(&prepared.cache_key, &outcome.result, self.config.cache_ttl())
                .await;
        }

        self.record_stats(StatsEvent {
            platform: prepared.platform,
            success,
            latency_ms: started.elapsed().as_millis() as u64,
            source_channel: source_channel.to_string(),
        });

        Resolution {
            result: outcome.result.clone(),
            request: Some(prepared),
            from_cache: false,
            dispatch: Some(outcome),
        }
    }

    fn record_stats(&self, event: StatsEvent) {
        let sink = self.stats.clone();
        tokio::spawn(async move {
            let platform = event.platform;
            if let Err(e) = sink.record(event).await {
                tracing::warn!(platform = %platform, error = %e, "stats sink failed");
            }
        });
    }

    /// Download one format through the retrying fetcher.
    ///
    /// With `use_credential`, a pooled session for `platform` is sent along
    /// and its health updated from the outcome.
    pub async fn download(
        &self,
        format: &MediaFormat,
        platform: Platform,
        use_credential: bool,
        cancel: &CancellationToken,
    ) -> Result<FetchedFile, ExtractError> {
        let lease = if use_credential {
            self.pool.get_rotating(platform, Tier::Private)
        } else {
            None
        };

        let result = self
            .fetcher
            .fetch(&format.url, lease.as_ref().map(|l| l.value()), cancel)
            .await;

        if let Some(lease) = &lease {
            match &result {
                Ok(_) => self.pool.mark_success(lease).await,
                Err(e) if e.code.invalidates_credential() => self.pool.mark_expired(lease, &e.message).await,
                Err(e) if e.code.is_credential_attributable() => self.pool.mark_error(lease, &e.message).await,
                Err(_) => {}
            }
        }
        result
    }

    /// Flush credential state to the store
    pub async fn shutdown(&self) {
        self.pool.flush().await;
        tracing::info!("resolver shut down, credential pools flushed");
    }
}

pub struct MediaResolverBuilder {
    config: ResolverConfig,
    store: Option<Arc<dyn PoolStore>>,
    cache: Option<Arc<dyn ResultCache>>,
    stats: Option<Arc<dyn StatsSink>>,
    clock: Option<Arc<dyn Clock>>,
    sleeper: Option<Arc<dyn Sleeper>>,
    routes: Vec<(Platform, Vec<Arc<dyn Engine>>)>,
}

impl MediaResolverBuilder {
    pub fn new(config: ResolverConfig) -> Self {
        Self {
            config,
            store: None,
            cache: None,
            stats: None,
            clock: None,
            sleeper: None,
            routes: Vec::new(),
        }
    }

    pub fn with_store(mut self, store: Arc<dyn PoolStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_cache(mut self, cache: Arc<dyn ResultCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn with_stats(mut self, stats: Arc<dyn StatsSink>) -> Self {
        self.stats = Some(stats);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    /// Override the engine list of one platform
    pub fn with_route(mut self, platform: Platform, engines: Vec<Arc<dyn Engine>>) -> Self {
        self.routes.push((platform, engines));
        self
    }

    fn default_store(config: &ResolverConfig) -> Arc<dyn PoolStore> {
        match config.effective_store_dir() {
            Some(dir) => {
                tracing::info!(dir = %dir.display(), "using JSON credential store");
                Arc::new(JsonFilePoolStore::new(dir))
            }
            None => {
                tracing::warn!("no credential store directory, pool state will not survive restarts");
                Arc::new(MemoryPoolStore::new())
            }
        }
    }

    /// Validate config, build the engines and restore the credential pools
    pub async fn build(self) -> Result<MediaResolver, BuildError> {
        let config = self.config;
        config.validate()?;

        let store = self.store.unwrap_or_else(|| Self::default_store(&config));
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let pool = Arc::new(CredentialPool::with_clock(config.pool.clone(), store, clock));
        pool.load_all().await;

        let mut dispatcher = Dispatcher::with_default_routes(&config, pool.clone()).await?;
        for (platform, engines) in self.routes {
            dispatcher.set_route(platform, engines);
        }

        let mut fetcher = MediaFetcher::new(&config)?;
        if let Some(sleeper) = self.sleeper {
            fetcher = fetcher.with_sleeper(sleeper);
        }

        Ok(MediaResolver {
            detector: PlatformDetector::new(&config.detector, config.detector_cache_size),
            redirects: RedirectResolver::new(&config)?,
            pool,
            dispatcher,
            fetcher,
            cache: self.cache.unwrap_or_else(|| Arc::new(NoCache)),
            stats: self.stats.unwrap_or_else(|| Arc::new(NoopStats)),
            config,
        })
    }
}
