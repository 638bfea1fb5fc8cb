// Bounded-retry binary fetch for restricted CDNs
//
// Each attempt streams into a fresh temp file. The file is owned by the
// attempt until it succeeds, so a failed, timed-out or cancelled attempt
// drops (and deletes) it on the way out.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use reqwest::header::{CONTENT_TYPE, COOKIE, REFERER};
use tempfile::NamedTempFile;
use tokio::io::AsyncWriteExt;
use tokio_util::sync::CancellationToken;

use crate::resolver::config::{FetchConfig, ResolverConfig};
use crate::resolver::diagnostics::status_to_code;
use crate::resolver::errors::{ErrorCode, ExtractError};
use crate::resolver::pipeline::validator;
use crate::resolver::utils::{build_http_client, cookie_header};

/// Waits between attempts
#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, delay: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, delay: Duration) {
        tokio::time::sleep(delay).await;
    }
}

/// Records requested delays and returns immediately
#[derive(Default)]
pub struct RecordingSleeper {
    delays: Mutex<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn delays(&self) -> Vec<Duration> {
        self.delays.lock().clone()
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, delay: Duration) {
        self.delays.lock().push(delay);
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub exponential: bool,
}

impl RetryPolicy {
    pub fn from_config(config: &FetchConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: Duration::from_millis(config.backoff_ms),
            exponential: config.exponential,
        }
    }

    /// Delay after the `attempt`-th failure (1-based)
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = if self.exponential {
            1u32.checked_shl(attempt.saturating_sub(1)).unwrap_or(u32::MAX)
        } else {
            attempt
        };
        self.base_delay.saturating_mul(factor)
    }
}

/// A completed download, deleted on drop unless persisted
#[derive(Debug)]
pub struct FetchedFile {
    file: NamedTempFile,
    pub bytes: u64,
    pub content_type: Option<String>,
    pub attempts: u32,
}

impl FetchedFile {
    pub fn path(&self) -> &Path {
        self.file.path()
    }

    /// Move the file to `dest`, keeping it past this handle
    pub fn persist(self, dest: impl AsRef<Path>) -> Result<PathBuf, ExtractError> {
        let dest = dest.as_ref().to_path_buf();
        self.file
            .persist(&dest)
            .map_err(|e| ExtractError::new(ErrorCode::Unknown, format!("failed to save {}: {}", dest.display(), e.error)))?;
        Ok(dest)
    }
}

/// Whether another attempt may help
enum Fault {
    Transient(ExtractError),
    Permanent(ExtractError),
}

fn io_error(e: std::io::Error) -> Fault {
    Fault::Permanent(ExtractError::new(ErrorCode::Unknown, format!("temp file: {}", e)))
}

fn cancelled() -> ExtractError {
    ExtractError::new(ErrorCode::Timeout, "fetch cancelled")
}

pub struct MediaFetcher {
    client: reqwest::Client,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    allow_private_networks: bool,
    temp_dir: Option<PathBuf>,
}

impl MediaFetcher {
    pub fn new(config: &ResolverConfig) -> Result<Self, ExtractError> {
        Ok(Self {
            client: build_http_client(config, true, Duration::from_secs(config.fetch.timeout_secs.max(1)))?,
            policy: RetryPolicy::from_config(&config.fetch),
            sleeper: Arc::new(TokioSleeper),
            allow_private_networks: config.allow_private_networks,
            temp_dir: None,
        })
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Directory for in-flight downloads (system temp dir by default)
    pub fn with_temp_dir(mut self, dir: Option<PathBuf>) -> Self {
        self.temp_dir = dir;
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Download `url` with bounded retries.
    ///
    /// Transport faults and 5xx/408 responses are retried; other statuses fail
    /// at once. Cancelling `cancel` aborts the current attempt or backoff.
    pub async fn fetch(
        &self,
        url: &str,
        credential: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<FetchedFile, ExtractError> {
        let target = validator::validate(url, self.allow_private_networks)?;
        validator::check_resolved_host(&target, self.allow_private_networks).await?;

        let mut last_error = ExtractError::new(ErrorCode::Unknown, "no fetch attempt made");
        for attempt in 1..=self.policy.max_attempts {
            let outcome = tokio::select! {
                _ = cancel.cancelled() => return Err(cancelled()),
                outcome = self.fetch_once(target.as_str(), credential) => outcome,
            };

            match outcome {
                Ok(mut fetched) => {
                    fetched.attempts = attempt;
                    tracing::debug!(url, attempt, bytes = fetched.bytes, "media fetched");
                    return Ok(fetched);
                }
                Err(Fault::Permanent(e)) => return Err(e),
                Err(Fault::Transient(e)) => {
                    tracing::debug!(url, attempt, error = %e, "fetch attempt failed");
                    last_error = e;
                }
            }

            if attempt < self.policy.max_attempts {
                let delay = self.policy.delay_after(attempt);
                tokio::select! {
                    _ = cancel.cancelled() => return Err(cancelled()),
                    _ = self.sleeper.sleep(delay) => {}
                }
            }
        }

        tracing::warn!(url, attempts = self.policy.max_attempts, error = %last_error, "media fetch gave up");
        Err(last_error)
    }

    async fn fetch_once(&self, url: &str, credential: Option<&str>) -> Result<FetchedFile, Fault> {
        let file = match &self.temp_dir {
            Some(dir) => NamedTempFile::new_in(dir),
            None => NamedTempFile::new(),
        }
        .map_err(io_error)?;

        let mut request = self.client.get(url);
        if let Some(credential) = credential {
            request = request.header(COOKIE, cookie_header(credential));
        }
        if let Some(origin) = referer_for(url) {
            request = request.header(REFERER, origin);
        }

        let mut response = request.send().await.map_err(|e| Fault::Transient(e.into()))?;
        let status = response.status().as_u16();
        if !response.status().is_success() {
            let error = ExtractError::new(
                status_to_code(status, credential.is_some()),
                format!("media request returned HTTP {}", status),
            );
            return Err(if status >= 500 || status == 408 {
                Fault::Transient(error)
            } else {
                Fault::Permanent(error)
            });
        }

        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut out = tokio::fs::File::from_std(file.reopen().map_err(io_error)?);
        let mut bytes = 0u64;
        while let Some(chunk) = response.chunk().await.map_err(|e| Fault::Transient(e.into()))? {
            out.write_all(&chunk).await.map_err(io_error)?;
            bytes += chunk.len() as u64;
        }
        out.flush().await.map_err(io_error)?;

        Ok(FetchedFile {
            file,
            bytes,
            content_type,
            attempts: 1,
        })
    }
}

/// Some CDNs refuse hotlinked requests without a same-site referer
fn referer_for(url: &str) -> Option<&'static str> {
    let host = url::Url::parse(url).ok()?.host_str()?.to_lowercase();
    if host.ends_with("cdninstagram.com") || host.ends_with("fbcdn.net") {
        Some("https://www.instagram.com/")
    } else if host.contains("tiktok") {
        Some("https://www.tiktok.com/")
    } else {
        None
    }
}
