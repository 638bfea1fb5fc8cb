// Bounded short-link resolution
//
// Hops are walked by hand (the client never follows redirects) so every
// intermediate URL is SSRF-checked and recorded in the chain. Resolution
// never fails: any fault returns the input unchanged with was_resolved=false.

use std::time::Duration;

use lazy_static::lazy_static;
use regex::Regex;
use reqwest::header::{CONTENT_TYPE, COOKIE, LOCATION};
use tokio::time::timeout;
use url::Url;

use super::validator::{self, CanonicalUrl};
use crate::resolver::config::ResolverConfig;
use crate::resolver::errors::ExtractError;
use crate::resolver::models::ResolutionResult;
use crate::resolver::utils::{build_http_client, cookie_header};

/// Only the head of an HTML body is scanned for a meta refresh
const MAX_REFRESH_SCAN_BYTES: usize = 64 * 1024;

lazy_static! {
    static ref META_REFRESH_TAG: Regex =
        Regex::new(r#"(?is)<meta\b[^>]*http-equiv\s*=\s*["']?refresh["']?[^>]*>"#).unwrap();
    static ref REFRESH_TARGET: Regex =
        Regex::new(r#"(?i)content\s*=\s*["']?\s*\d*\s*;?\s*url\s*=\s*['"]?([^"'>\s]+)"#).unwrap();
}

/// Why a single hop walk stopped early
#[derive(Debug)]
enum HopError {
    Request(reqwest::Error),
    Rejected(String),
}

impl From<reqwest::Error> for HopError {
    fn from(e: reqwest::Error) -> Self {
        HopError::Request(e)
    }
}

impl std::fmt::Display for HopError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HopError::Request(e) => write!(f, "request failed: {}", e),
            HopError::Rejected(reason) => write!(f, "hop rejected: {}", reason),
        }
    }
}

pub struct RedirectResolver {
    client: reqwest::Client,
    max_redirects: usize,
    allow_private_networks: bool,
}

impl RedirectResolver {
    pub fn new(config: &ResolverConfig) -> Result<Self, ExtractError> {
        Ok(Self {
            client: build_http_client(config, false, config.resolve_timeout())?,
            max_redirects: config.max_redirects,
            allow_private_networks: config.allow_private_networks,
        })
    }

    /// Follow redirects from `url` until a non-redirect response, the hop cap
    /// or the deadline.
    ///
    /// `credential` is sent as a cookie header on every hop. Some platforms
    /// only reveal the target of a share link to a logged-in session.
    pub async fn resolve(
        &self,
        url: &CanonicalUrl,
        limit: Duration,
        credential: Option<&str>,
    ) -> ResolutionResult {
        let start = url.as_str();
        match timeout(limit, self.walk(start, credential)).await {
            Ok(Ok(chain)) => {
                let result = ResolutionResult::from_chain(start, chain);
                tracing::debug!(
                    from = start,
                    to = %result.resolved_url,
                    hops = result.redirect_chain.len() - 1,
                    "short link resolved"
                );
                result
            }
            Ok(Err(e)) => {
                tracing::warn!(url = start, error = %e, "redirect resolution failed, using URL as-is");
                ResolutionResult::unresolved(start)
            }
            Err(_) => {
                tracing::warn!(url = start, timeout_ms = limit.as_millis() as u64, "redirect resolution timed out");
                ResolutionResult::unresolved(start)
            }
        }
    }

    async fn walk(&self, start: &str, credential: Option<&str>) -> Result<Vec<String>, HopError> {
        let mut current =
            validator::validate(start, self.allow_private_networks).map_err(|e| HopError::Rejected(e.to_string()))?;
        validator::check_resolved_host(&current, self.allow_private_networks)
            .await
            .map_err(|e| HopError::Rejected(e.to_string()))?;

        let cookie = credential.map(cookie_header).filter(|c| !c.is_empty());
        let mut chain = vec![start.to_string()];

        for _ in 0..self.max_redirects {
            let Some(next) = self.next_hop(&current, cookie.as_deref()).await? else {
                return Ok(chain);
            };

            let checked = validator::validate(next.as_str(), self.allow_private_networks)
                .map_err(|e| HopError::Rejected(e.to_string()))?;
            validator::check_resolved_host(&checked, self.allow_private_networks)
                .await
                .map_err(|e| HopError::Rejected(e.to_string()))?;

            let normalized = validator::normalize(&checked).into_string();
            if chain.contains(&normalized) {
                tracing::debug!(url = %normalized, "redirect loop, stopping");
                return Ok(chain);
            }

            current = Url::parse(&normalized).map_err(|e| HopError::Rejected(e.to_string()))?;
            chain.push(normalized);
        }

        tracing::debug!(hops = self.max_redirects, "redirect cap reached");
        Ok(chain)
    }

    /// Target of one hop: the Location header of a 3xx, or the meta refresh
    /// of a 200 HTML page
    async fn next_hop(&self, current: &Url, cookie: Option<&str>) -> Result<Option<Url>, HopError> {
        let mut request = self.client.get(current.clone());
        if let Some(cookie) = cookie {
            request = request.header(COOKIE, cookie);
        }
        let mut response = request.send().await?;
        let status = response.status();

        if status.is_redirection() {
            let location = response
                .headers()
                .get(LOCATION)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string);
            return match location {
                Some(location) => current
                    .join(&location)
                    .map(Some)
                    .map_err(|e| HopError::Rejected(format!("bad Location {}: {}", location, e))),
                None => Ok(None),
            };
        }

        let is_html = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(|ct| ct.to_ascii_lowercase().contains("text/html"))
            .unwrap_or(false);
        if !status.is_success() || !is_html {
            return Ok(None);
        }

        let mut head = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            head.extend_from_slice(&chunk);
            if head.len() >= MAX_REFRESH_SCAN_BYTES {
                break;
            }
        }
        let body = String::from_utf8_lossy(&head);

        Ok(meta_refresh_target(&body).and_then(|target| current.join(&target).ok()))
    }
}

/// URL named by a `<meta http-equiv="refresh">` tag, if any
pub fn meta_refresh_target(html: &str) -> Option<String> {
    let tag = META_REFRESH_TAG.find(html)?;
    let caps = REFRESH_TARGET.captures(tag.as_str())?;
    let target = caps.get(1)?.as_str().replace("&amp;", "&");
    Some(target)
}
