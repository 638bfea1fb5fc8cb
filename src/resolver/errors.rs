// Error taxonomy shared by every stage of the resolver

use serde::{Deserialize, Serialize};
use std::fmt;

use super::diagnostics::{diagnose_error, status_to_code};

/// Caller-visible failure kinds.
///
/// Every engine fault, transport error and validation failure is mapped onto
/// exactly one of these before it leaves the engine boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// URL failed validation (scheme, blocked host, encoding tricks)
    InvalidUrl,

    /// No platform claims the URL
    UnsupportedPlatform,

    /// A short link could not be resolved to a known platform
    ResolveFailed,

    /// Extraction succeeded but found nothing downloadable
    NoMedia,

    /// Content needs an authenticated session
    CookieRequired,

    /// Session was presented and rejected
    CookieExpired,

    /// Content is private to the author's audience
    PrivateContent,

    /// Content is behind an age gate
    AgeRestricted,

    /// Platform demands an interactive security checkpoint
    CheckpointRequired,

    /// Platform is throttling us
    RateLimited,

    /// Content was deleted or never existed
    NotFound,

    /// Content type the platform exposes but we cannot extract (live, DRM)
    UnsupportedContent,

    /// Request refused (403, bot wall)
    Blocked,

    /// Response shape did not match any known pattern
    ParseError,

    /// Network or subprocess deadline elapsed
    Timeout,

    /// Anything else
    Unknown,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidUrl => "INVALID_URL",
            Self::UnsupportedPlatform => "UNSUPPORTED_PLATFORM",
            Self::ResolveFailed => "RESOLVE_FAILED",
            Self::NoMedia => "NO_MEDIA",
            Self::CookieRequired => "COOKIE_REQUIRED",
            Self::CookieExpired => "COOKIE_EXPIRED",
            Self::PrivateContent => "PRIVATE_CONTENT",
            Self::AgeRestricted => "AGE_RESTRICTED",
            Self::CheckpointRequired => "CHECKPOINT_REQUIRED",
            Self::RateLimited => "RATE_LIMITED",
            Self::NotFound => "NOT_FOUND",
            Self::UnsupportedContent => "UNSUPPORTED_CONTENT",
            Self::Blocked => "BLOCKED",
            Self::ParseError => "PARSE_ERROR",
            Self::Timeout => "TIMEOUT",
            Self::Unknown => "UNKNOWN",
        }
    }

    /// A credentialed retry may turn this failure into a success
    pub fn is_credential_recoverable(&self) -> bool {
        matches!(
            self,
            Self::CookieRequired
                | Self::CookieExpired
                | Self::CheckpointRequired
                | Self::AgeRestricted
                | Self::PrivateContent
        )
    }

    /// Stop the dispatch immediately: no further engines, no retry
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::NotFound
                | Self::UnsupportedContent
                | Self::InvalidUrl
                | Self::UnsupportedPlatform
                | Self::ResolveFailed
                | Self::RateLimited
        )
    }

    /// Engine-specific breakage; the next engine may still succeed
    pub fn is_parse_level(&self) -> bool {
        matches!(self, Self::ParseError)
    }

    /// The presented credential itself is no longer usable
    pub fn invalidates_credential(&self) -> bool {
        matches!(self, Self::CookieExpired | Self::CheckpointRequired)
    }

    /// Failure counts against the credential that was presented
    pub fn is_credential_attributable(&self) -> bool {
        matches!(
            self,
            Self::CookieRequired
                | Self::PrivateContent
                | Self::AgeRestricted
                | Self::Blocked
                | Self::RateLimited
        )
    }

    /// Default human-readable message when an engine gives none
    pub fn description(&self) -> &'static str {
        match self {
            Self::InvalidUrl => "The link is not a valid public http(s) URL",
            Self::UnsupportedPlatform => "This platform is not supported",
            Self::ResolveFailed => "The short link could not be resolved",
            Self::NoMedia => "No downloadable media found in this post",
            Self::CookieRequired => "This content requires a logged-in session",
            Self::CookieExpired => "The session used for this request has expired",
            Self::PrivateContent => "This content is private",
            Self::AgeRestricted => "This content is age-restricted",
            Self::CheckpointRequired => "The platform requires a security checkpoint",
            Self::RateLimited => "The platform is rate-limiting requests, try again later",
            Self::NotFound => "The post was not found or has been removed",
            Self::UnsupportedContent => "This kind of content cannot be downloaded",
            Self::Blocked => "The platform refused the request",
            Self::ParseError => "The platform response could not be parsed",
            Self::Timeout => "The platform did not respond in time",
            Self::Unknown => "Unknown error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error value returned by every engine and pipeline stage
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{code}: {message}")]
pub struct ExtractError {
    pub code: ErrorCode,
    pub message: String,
}

impl ExtractError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Error carrying the code's default description
    pub fn from_code(code: ErrorCode) -> Self {
        Self::new(code, code.description())
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::ParseError, message)
    }

    pub fn no_media(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NoMedia, message)
    }

    pub fn timeout(what: &str, secs: u64) -> Self {
        Self::new(ErrorCode::Timeout, format!("{} timed out after {}s", what, secs))
    }
}

// Raw tool output and ad-hoc messages are classified by content
impl From<String> for ExtractError {
    fn from(s: String) -> Self {
        let code = diagnose_error(&s);
        Self { code, message: s }
    }
}

impl From<&str> for ExtractError {
    fn from(s: &str) -> Self {
        Self::from(s.to_string())
    }
}

impl From<reqwest::Error> for ExtractError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            return Self::new(ErrorCode::Timeout, format!("request timed out: {}", e));
        }
        if let Some(status) = e.status() {
            return Self::new(status_to_code(status.as_u16(), false), e.to_string());
        }
        if e.is_decode() {
            return Self::parse(format!("invalid response body: {}", e));
        }
        Self::new(ErrorCode::Unknown, format!("network error: {}", e))
    }
}

impl From<serde_json::Error> for ExtractError {
    fn from(e: serde_json::Error) -> Self {
        Self::parse(format!("Invalid JSON: {}", e))
    }
}

/// Typed failure from the URL validator
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("no http(s) link found in input")]
    NoUrlFound,

    #[error("malformed URL: {0}")]
    Malformed(String),

    #[error("scheme '{0}' is not allowed")]
    UnsupportedScheme(String),

    #[error("host '{0}' points to a private or local network")]
    BlockedHost(String),

    #[error("URL embeds login credentials")]
    EmbeddedCredentials,

    #[error("URL hides a dangerous scheme behind encoding")]
    EncodedScheme,
}

impl From<ValidationError> for ExtractError {
    fn from(e: ValidationError) -> Self {
        Self::new(ErrorCode::InvalidUrl, e.to_string())
    }
}

/// Failure inside a credential persistence backend
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
