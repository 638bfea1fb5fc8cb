// Extraction dispatcher - ordered engines per platform with one credentialed retry
//
// Strategy:
// 1. Walk the platform's engine list in order, first attempt without a credential
// 2. Credential-recoverable failure: lease a credential and retry once, on the
//    same engine if it takes credentials, else the next one that does. The
//    lease then stays with engines of the retry target's kind only.
// 3. Terminal failure: stop, no further engines
// 4. Anything else (parse errors, empty results, blocks, timeouts): next engine
//
// Every attempt is bounded by the engine timeout, and credential health is
// only updated after an attempt has finished.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tokio::time::timeout;

use super::api::ApiEngine;
use super::markup::MarkupEngine;
use super::traits::{Engine, EngineInput, EngineKind};
use super::ytdlp::YtDlpEngine;
use crate::resolver::config::ResolverConfig;
use crate::resolver::credentials::{CredentialLease, CredentialPool};
use crate::resolver::errors::{ErrorCode, ExtractError};
use crate::resolver::models::{ExtractedMedia, ExtractionRequest, ExtractionResult, Platform, Tier};

/// One engine invocation as seen by the dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AttemptRecord {
    pub engine: &'static str,
    pub credentialed: bool,
    /// `None` on success
    pub code: Option<ErrorCode>,
}

/// Result with diagnostic information
#[derive(Debug, Clone, Serialize)]
pub struct DispatchOutcome {
    pub result: ExtractionResult,
    /// Engine that produced `result`, if any engine ran
    pub engine: Option<&'static str>,
    pub attempts: Vec<AttemptRecord>,
    pub credential_retry_used: bool,
}

impl DispatchOutcome {
    fn failed(error: ExtractError, engine: Option<&'static str>, attempts: Vec<AttemptRecord>, retry: bool) -> Self {
        Self {
            result: error.into(),
            engine,
            attempts,
            credential_retry_used: retry,
        }
    }
}

pub struct Dispatcher {
    routes: HashMap<Platform, Vec<Arc<dyn Engine>>>,
    pool: Arc<CredentialPool>,
    engine_timeout: Duration,
    subprocess_timeout: Duration,
}

impl Dispatcher {
    pub fn new(pool: Arc<CredentialPool>, engine_timeout: Duration, subprocess_timeout: Duration) -> Self {
        Self {
            routes: HashMap::new(),
            pool,
            engine_timeout,
            subprocess_timeout,
        }
    }

    /// Dispatcher with the built-in engine order for every platform
    pub async fn with_default_routes(config: &ResolverConfig, pool: Arc<CredentialPool>) -> Result<Self, ExtractError> {
        let api_public: Arc<dyn Engine> = Arc::new(ApiEngine::public(config)?);
        let api_auth: Arc<dyn Engine> = Arc::new(ApiEngine::authenticated(config)?);
        let markup: Arc<dyn Engine> = Arc::new(MarkupEngine::new(config)?);
        let ytdlp: Arc<dyn Engine> = Arc::new(YtDlpEngine::detect(config).await);

        let mut dispatcher = Self::new(pool, config.engine_timeout(), config.subprocess_timeout());
        for platform in Platform::ALL {
            let route = match platform {
                Platform::Instagram => vec![api_public.clone(), api_auth.clone(), markup.clone(), ytdlp.clone()],
                Platform::TikTok => vec![api_public.clone(), api_auth.clone(), ytdlp.clone(), markup.clone()],
                Platform::Twitter => vec![api_public.clone(), ytdlp.clone(), markup.clone()],
                Platform::Facebook => vec![markup.clone(), ytdlp.clone()],
                Platform::YouTube => vec![ytdlp.clone()],
                Platform::Threads => vec![markup.clone(), ytdlp.clone()],
            };
            dispatcher.set_route(platform, route);
        }
        Ok(dispatcher)
    }

    /// Replace the engine list of one platform
    pub fn set_route(&mut self, platform: Platform, engines: Vec<Arc<dyn Engine>>) {
        self.routes.insert(platform, engines);
    }

    fn timeout_for(&self, engine: &dyn Engine) -> Duration {
        match engine.kind() {
            EngineKind::Subprocess => self.subprocess_timeout,
            _ => self.engine_timeout,
        }
    }

    /// First available engine at or after `from` that takes credentials
    fn credential_engine(engines: &[Arc<dyn Engine>], from: usize) -> Option<usize> {
        (from..engines.len()).find(|&i| engines[i].accepts_credentials() && engines[i].is_available())
    }

    async fn attempt(
        &self,
        engine: &dyn Engine,
        request: &ExtractionRequest,
        lease: Option<&CredentialLease>,
    ) -> Result<ExtractedMedia, ExtractError> {
        let limit = self.timeout_for(engine);
        let input = EngineInput {
            resolved_url: &request.resolved_url,
            platform: request.platform,
            descriptor: &request.descriptor,
            credential: lease.map(|l| l.value()),
            timeout: limit,
        };

        match timeout(limit, engine.extract(&input)).await {
            Ok(result) => result,
            Err(_) => Err(ExtractError::timeout(engine.name(), limit.as_secs())),
        }
    }

    /// Report the attempt's outcome against the credential it used
    async fn signal(&self, lease: &CredentialLease, result: &Result<ExtractedMedia, ExtractError>) {
        match result {
            Ok(_) => self.pool.mark_success(lease).await,
            Err(e) if e.code.invalidates_credential() => self.pool.mark_expired(lease, &e.message).await,
            Err(e) if e.code.is_credential_attributable() => self.pool.mark_error(lease, &e.message).await,
            Err(_) => {}
        }
    }

    pub async fn dispatch(&self, request: &ExtractionRequest) -> DispatchOutcome {
        let Some(engines) = self.routes.get(&request.platform).filter(|e| !e.is_empty()) else {
            return DispatchOutcome::failed(
                ExtractError::new(ErrorCode::UnsupportedPlatform, format!("no engines for {}", request.platform)),
                None,
                Vec::new(),
                false,
            );
        };

        let mut attempts = Vec::new();
        // Leased credential and the engine kind it was acquired for
        let mut lease: Option<(CredentialLease, EngineKind)> = None;
        let mut retry_used = false;
        let mut last: Option<(ExtractError, &'static str)> = None;
        let mut index = 0;

        while index < engines.len() {
            let engine = engines[index].as_ref();
            if !engine.is_available() {
                tracing::debug!(engine = engine.name(), "engine unavailable, skipping");
                index += 1;
                continue;
            }

            let presented = lease
                .as_ref()
                .filter(|(_, kind)| engine.accepts_credentials() && *kind == engine.kind())
                .map(|(lease, _)| lease);
            if engine.kind() == EngineKind::AuthenticatedApi && presented.is_none() {
                index += 1;
                continue;
            }

            tracing::debug!(
                engine = engine.name(),
                platform = %request.platform,
                credentialed = presented.is_some(),
                "trying engine"
            );
            let result = self.attempt(engine, request, presented).await.and_then(require_formats);
            if let Some(lease) = presented {
                self.signal(lease, &result).await;
            }
            attempts.push(AttemptRecord {
                engine: engine.name(),
                credentialed: presented.is_some(),
                code: result.as_ref().err().map(|e| e.code),
            });

            let error = match result {
                Ok(media) => {
                    tracing::info!(
                        engine = engine.name(),
                        platform = %request.platform,
                        formats = media.formats.len(),
                        credentialed = presented.is_some(),
                        "extraction succeeded"
                    );
                    return DispatchOutcome {
                        result: ExtractionResult::Success(media),
                        engine: Some(engine.name()),
                        attempts,
                        credential_retry_used: retry_used,
                    };
                }
                Err(e) => e,
            };
            tracing::debug!(engine = engine.name(), code = %error.code, error = %error.message, "engine failed");

            if error.code.is_terminal() {
                return DispatchOutcome::failed(error, Some(engine.name()), attempts, retry_used);
            }

            if error.code.is_credential_recoverable() {
                if retry_used {
                    return DispatchOutcome::failed(error, Some(engine.name()), attempts, retry_used);
                }
                retry_used = true;

                let Some(target) = Self::credential_engine(engines, index) else {
                    return DispatchOutcome::failed(error, Some(engine.name()), attempts, retry_used);
                };
                match self.pool.get_rotating(request.platform, Tier::Private) {
                    Some(acquired) => {
                        tracing::debug!(credential = %acquired.id, engine = engines[target].name(), "credentialed retry");
                        lease = Some((acquired, engines[target].kind()));
                        index = target;
                    }
                    None => {
                        tracing::info!(platform = %request.platform, code = %error.code, "no credential available for retry");
                        last = Some((error, engine.name()));
                        index += 1;
                    }
                }
                continue;
            }

            // Keep an earlier, more specific failure over a later parse failure
            if !(error.code.is_parse_level() && last.is_some()) {
                last = Some((error, engine.name()));
            }
            index += 1;
        }

        match last {
            Some((error, engine)) => DispatchOutcome::failed(error, Some(engine), attempts, retry_used),
            None => DispatchOutcome::failed(
                ExtractError::new(ErrorCode::Unknown, format!("no engine available for {}", request.platform)),
                None,
                attempts,
                retry_used,
            ),
        }
    }
}

/// An engine that returns nothing downloadable has not succeeded
fn require_formats(media: ExtractedMedia) -> Result<ExtractedMedia, ExtractError> {
    if media.formats.is_empty() {
        Err(ExtractError::no_media(ErrorCode::NoMedia.description()))
    } else {
        Ok(media)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::config::PoolConfig;
    use crate::resolver::credentials::{ManualClock, MemoryPoolStore};
    use crate::resolver::models::{ContentDescriptor, FormatSet, MediaKind};
    use crate::resolver::parser::{Candidate, FormatSelector};
    use async_trait::async_trait;
    use parking_lot::Mutex;

    /// Engine that replays scripted results and records what it was given
    struct ScriptedEngine {
        name: &'static str,
        kind: EngineKind,
        accepts: bool,
        script: Mutex<Vec<Result<(), ErrorCode>>>,
        seen: Mutex<Vec<Option<String>>>,
    }

    impl ScriptedEngine {
        fn new(name: &'static str, accepts: bool, script: Vec<Result<(), ErrorCode>>) -> Arc<Self> {
            Self::of_kind(name, EngineKind::NativeApi, accepts, script)
        }

        fn of_kind(
            name: &'static str,
            kind: EngineKind,
            accepts: bool,
            script: Vec<Result<(), ErrorCode>>,
        ) -> Arc<Self> {
            Arc::new(Self {
                name,
                kind,
                accepts,
                script: Mutex::new(script.into_iter().rev().collect()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<Option<String>> {
            self.seen.lock().clone()
        }
    }

    fn sample_formats() -> FormatSet {
        FormatSelector::normalize(vec![
            Candidate::new(MediaKind::Video, "https://cdn.example/v.mp4").with_dimensions(Some(1280), Some(720)),
        ])
    }

    #[async_trait]
    impl Engine for ScriptedEngine {
        fn name(&self) -> &'static str {
            self.name
        }

        fn kind(&self) -> EngineKind {
            self.kind
        }

        fn accepts_credentials(&self) -> bool {
            self.accepts
        }

        async fn extract(&self, input: &EngineInput<'_>) -> Result<ExtractedMedia, ExtractError> {
            self.seen.lock().push(input.credential.map(str::to_string));
            let next = self.script.lock().pop().unwrap_or(Err(ErrorCode::Unknown));
            match next {
                Ok(()) => Ok(ExtractedMedia {
                    formats: sample_formats(),
                    used_credential: input.credential.is_some(),
                    ..Default::default()
                }),
                Err(code) => Err(ExtractError::from_code(code)),
            }
        }
    }

    /// Engine that "succeeds" without any formats
    #[derive(Default)]
    struct EmptyEngine {
        seen: Mutex<Vec<Option<String>>>,
    }

    #[async_trait]
    impl Engine for EmptyEngine {
        fn name(&self) -> &'static str {
            "empty"
        }

        fn kind(&self) -> EngineKind {
            EngineKind::NativeApi
        }

        fn accepts_credentials(&self) -> bool {
            true
        }

        async fn extract(&self, input: &EngineInput<'_>) -> Result<ExtractedMedia, ExtractError> {
            self.seen.lock().push(input.credential.map(str::to_string));
            Ok(ExtractedMedia {
                used_credential: input.credential.is_some(),
                ..Default::default()
            })
        }
    }

    struct SlowEngine;

    #[async_trait]
    impl Engine for SlowEngine {
        fn name(&self) -> &'static str {
            "slow"
        }

        fn kind(&self) -> EngineKind {
            EngineKind::Markup
        }

        fn accepts_credentials(&self) -> bool {
            false
        }

        async fn extract(&self, _input: &EngineInput<'_>) -> Result<ExtractedMedia, ExtractError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(ExtractError::from_code(ErrorCode::Unknown))
        }
    }

    async fn pool_with_credential() -> Arc<CredentialPool> {
        let pool = Arc::new(CredentialPool::with_clock(
            PoolConfig::default(),
            Arc::new(MemoryPoolStore::new()),
            Arc::new(ManualClock::new(0)),
        ));
        pool.add(Platform::Instagram, Tier::Private, "sessionid=abc").await;
        pool
    }

    fn request() -> ExtractionRequest {
        ExtractionRequest {
            platform: Platform::Instagram,
            resolved_url: "https://www.instagram.com/p/abc/".to_string(),
            descriptor: ContentDescriptor::default(),
        }
    }

    fn dispatcher(pool: Arc<CredentialPool>, engines: Vec<Arc<dyn Engine>>) -> Dispatcher {
        let mut d = Dispatcher::new(pool, Duration::from_secs(5), Duration::from_secs(5));
        d.set_route(Platform::Instagram, engines);
        d
    }

    #[tokio::test]
    async fn test_cookie_required_triggers_one_retry() {
        let pool = pool_with_credential().await;
        let engine = ScriptedEngine::new("api", true, vec![Err(ErrorCode::CookieRequired), Ok(())]);
        let d = dispatcher(pool.clone(), vec![engine.clone()]);

        let outcome = d.dispatch(&request()).await;
        assert!(outcome.result.is_success());
        assert!(outcome.credential_retry_used);
        assert_eq!(engine.calls(), vec![None, Some("sessionid=abc".to_string())]);
        assert!(outcome.result.media().unwrap().used_credential);

        let stats = pool.stats();
        assert_eq!(stats[0].healthy, 1);
    }

    #[tokio::test]
    async fn test_not_found_never_retries() {
        let pool = pool_with_credential().await;
        let first = ScriptedEngine::new("api", true, vec![Err(ErrorCode::NotFound)]);
        let second = ScriptedEngine::new("markup", true, vec![Ok(())]);
        let d = dispatcher(pool, vec![first.clone(), second.clone()]);

        let outcome = d.dispatch(&request()).await;
        assert_eq!(outcome.result.error_code(), Some(ErrorCode::NotFound));
        assert!(!outcome.credential_retry_used);
        assert_eq!(first.calls().len(), 1);
        assert!(second.calls().is_empty());
    }

    #[tokio::test]
    async fn test_failure_after_retry_is_returned() {
        let pool = pool_with_credential().await;
        let engine = ScriptedEngine::new(
            "api",
            true,
            vec![Err(ErrorCode::CookieRequired), Err(ErrorCode::CookieRequired), Ok(())],
        );
        let d = dispatcher(pool, vec![engine.clone()]);

        let outcome = d.dispatch(&request()).await;
        assert_eq!(outcome.result.error_code(), Some(ErrorCode::CookieRequired));
        assert_eq!(engine.calls().len(), 2);
        assert_eq!(outcome.attempts.len(), 2);
    }

    #[tokio::test]
    async fn test_parse_error_advances_without_retry() {
        let pool = pool_with_credential().await;
        let first = ScriptedEngine::new("api", false, vec![Err(ErrorCode::ParseError)]);
        let second = ScriptedEngine::new("markup", true, vec![Ok(())]);
        let d = dispatcher(pool, vec![first, second.clone()]);

        let outcome = d.dispatch(&request()).await;
        assert!(outcome.result.is_success());
        assert_eq!(outcome.engine, Some("markup"));
        assert!(!outcome.credential_retry_used);
        assert_eq!(second.calls(), vec![None]);
    }

    #[tokio::test]
    async fn test_retry_moves_to_credential_engine() {
        let pool = pool_with_credential().await;
        let public = ScriptedEngine::new("public", false, vec![Err(ErrorCode::PrivateContent)]);
        let private = ScriptedEngine::new("private", true, vec![Ok(())]);
        let d = dispatcher(pool, vec![public.clone(), private.clone()]);

        let outcome = d.dispatch(&request()).await;
        assert!(outcome.result.is_success());
        assert_eq!(public.calls().len(), 1);
        assert_eq!(private.calls(), vec![Some("sessionid=abc".to_string())]);
    }

    #[tokio::test]
    async fn test_expired_credential_is_signalled() {
        let pool = pool_with_credential().await;
        let engine = ScriptedEngine::new("api", true, vec![Err(ErrorCode::CookieRequired), Err(ErrorCode::CookieExpired)]);
        let d = dispatcher(pool.clone(), vec![engine]);

        let outcome = d.dispatch(&request()).await;
        assert_eq!(outcome.result.error_code(), Some(ErrorCode::CookieExpired));
        assert_eq!(pool.stats()[0].cooling, 1);
    }

    #[tokio::test]
    async fn test_rate_limited_is_terminal() {
        let pool = pool_with_credential().await;
        let first = ScriptedEngine::new("api", true, vec![Err(ErrorCode::RateLimited)]);
        let second = ScriptedEngine::new("markup", true, vec![Ok(())]);
        let d = dispatcher(pool, vec![first, second.clone()]);

        let outcome = d.dispatch(&request()).await;
        assert_eq!(outcome.result.error_code(), Some(ErrorCode::RateLimited));
        assert!(second.calls().is_empty());
    }

    #[tokio::test]
    async fn test_no_credential_falls_through() {
        let pool = Arc::new(CredentialPool::new(PoolConfig::default(), Arc::new(MemoryPoolStore::new())));
        let first = ScriptedEngine::new("api", true, vec![Err(ErrorCode::CookieRequired)]);
        let second = ScriptedEngine::new("markup", true, vec![Ok(())]);
        let d = dispatcher(pool, vec![first, second.clone()]);

        let outcome = d.dispatch(&request()).await;
        assert!(outcome.result.is_success());
        assert_eq!(second.calls(), vec![None]);
    }

    #[tokio::test]
    async fn test_empty_result_is_no_media() {
        let pool = pool_with_credential().await;
        let d = dispatcher(pool, vec![Arc::new(EmptyEngine::default())]);

        let outcome = d.dispatch(&request()).await;
        assert_eq!(outcome.result.error_code(), Some(ErrorCode::NoMedia));
        assert_eq!(outcome.attempts[0].code, Some(ErrorCode::NoMedia));
    }

    #[tokio::test]
    async fn test_empty_result_advances_to_next_engine() {
        let pool = pool_with_credential().await;
        let second = ScriptedEngine::new("markup", true, vec![Ok(())]);
        let d = dispatcher(pool, vec![Arc::new(EmptyEngine::default()), second.clone()]);

        let outcome = d.dispatch(&request()).await;
        assert!(outcome.result.is_success());
        assert_eq!(outcome.engine, Some("markup"));
        assert!(!outcome.result.media().unwrap().formats.is_empty());
    }

    #[tokio::test]
    async fn test_empty_credentialed_result_is_not_marked_success() {
        let pool = Arc::new(CredentialPool::with_clock(
            PoolConfig::default(),
            Arc::new(MemoryPoolStore::new()),
            Arc::new(ManualClock::new(0)),
        ));
        let id = pool.add(Platform::Instagram, Tier::Private, "sessionid=abc").await;
        let public = ScriptedEngine::new("public", false, vec![Err(ErrorCode::CookieRequired)]);
        let empty = Arc::new(EmptyEngine::default());
        let d = dispatcher(pool.clone(), vec![public, empty.clone()]);

        let outcome = d.dispatch(&request()).await;
        assert_eq!(outcome.result.error_code(), Some(ErrorCode::NoMedia));
        assert_eq!(empty.seen.lock().clone(), vec![Some("sessionid=abc".to_string())]);

        let credential = pool.credential(Platform::Instagram, Tier::Private, &id).unwrap();
        assert!(credential.last_used_at.is_none());
    }

    #[tokio::test]
    async fn test_lease_stays_with_retry_engine_kind() {
        let pool = pool_with_credential().await;
        let public = ScriptedEngine::of_kind("public", EngineKind::NativeApi, false, vec![Err(ErrorCode::CookieRequired)]);
        let auth = ScriptedEngine::of_kind("auth", EngineKind::AuthenticatedApi, true, vec![Err(ErrorCode::ParseError)]);
        let markup = ScriptedEngine::of_kind("markup", EngineKind::Markup, true, vec![Ok(())]);
        let d = dispatcher(pool, vec![public, auth.clone(), markup.clone()]);

        let outcome = d.dispatch(&request()).await;
        assert!(outcome.result.is_success());
        assert!(outcome.credential_retry_used);
        assert_eq!(auth.calls(), vec![Some("sessionid=abc".to_string())]);
        assert_eq!(markup.calls(), vec![None]);
        assert!(!outcome.result.media().unwrap().used_credential);
    }

    #[tokio::test]
    async fn test_parse_error_keeps_earlier_failure() {
        let pool = pool_with_credential().await;
        let first = ScriptedEngine::new("api", false, vec![Err(ErrorCode::Blocked)]);
        let second = ScriptedEngine::new("markup", false, vec![Err(ErrorCode::ParseError)]);
        let d = dispatcher(pool, vec![first, second.clone()]);

        let outcome = d.dispatch(&request()).await;
        assert_eq!(second.calls().len(), 1);
        assert_eq!(outcome.result.error_code(), Some(ErrorCode::Blocked));
        assert_eq!(outcome.engine, Some("api"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_engine_timeout_maps_to_timeout() {
        let pool = pool_with_credential().await;
        let d = dispatcher(pool, vec![Arc::new(SlowEngine)]);

        let outcome = d.dispatch(&request()).await;
        assert_eq!(outcome.result.error_code(), Some(ErrorCode::Timeout));
    }

    #[tokio::test]
    async fn test_unrouted_platform() {
        let pool = pool_with_credential().await;
        let d = Dispatcher::new(pool, Duration::from_secs(1), Duration::from_secs(1));
        let outcome = d.dispatch(&request()).await;
        assert_eq!(outcome.result.error_code(), Some(ErrorCode::UnsupportedPlatform));
    }
}
