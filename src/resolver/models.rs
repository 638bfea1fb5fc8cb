// Common data models for the resolver

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use super::errors::{ErrorCode, ExtractError};
use super::parser::QualityTier;

/// Platforms the resolver knows how to extract from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Instagram,
    TikTok,
    Twitter,
    Facebook,
    YouTube,
    Threads,
}

impl Platform {
    pub const ALL: [Platform; 6] = [
        Platform::Instagram,
        Platform::TikTok,
        Platform::Twitter,
        Platform::Facebook,
        Platform::YouTube,
        Platform::Threads,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Instagram => "instagram",
            Self::TikTok => "tiktok",
            Self::Twitter => "twitter",
            Self::Facebook => "facebook",
            Self::YouTube => "youtube",
            Self::Threads => "threads",
        }
    }

    /// Domain a session cookie for this platform is scoped to
    pub fn cookie_domain(&self) -> &'static str {
        match self {
            Self::Instagram => ".instagram.com",
            Self::TikTok => ".tiktok.com",
            Self::Twitter => ".x.com",
            Self::Facebook => ".facebook.com",
            Self::YouTube => ".youtube.com",
            Self::Threads => ".threads.net",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "instagram" | "ig" => Ok(Self::Instagram),
            "tiktok" => Ok(Self::TikTok),
            "twitter" | "x" => Ok(Self::Twitter),
            "facebook" | "fb" => Ok(Self::Facebook),
            "youtube" | "yt" => Ok(Self::YouTube),
            "threads" => Ok(Self::Threads),
            other => Err(format!("unknown platform: {}", other)),
        }
    }
}

/// Credential class
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Shared, lower-privilege sessions
    Public,
    /// Scarce, higher-privilege sessions
    Private,
}

impl Tier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Public => "public",
            Self::Private => "private",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "public" => Ok(Self::Public),
            "private" => Ok(Self::Private),
            other => Err(format!("unknown tier: {}", other)),
        }
    }
}

/// Content classification derived from the URL shape
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    Video,
    Reel,
    Story,
    Post,
    Image,
    #[default]
    Unknown,
}

/// Platform-specific content id and type, from URL parsing only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ContentDescriptor {
    pub content_id: Option<String>,
    pub content_type: ContentType,
}

/// Outcome of short-link resolution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionResult {
    pub normalized_url: String,
    pub resolved_url: String,
    /// True iff `resolved_url != normalized_url`
    pub was_resolved: bool,
    /// Every URL visited, starting with `normalized_url`
    pub redirect_chain: Vec<String>,
}

impl ResolutionResult {
    /// Result for a URL that was not (or could not be) resolved
    pub fn unresolved(url: &str) -> Self {
        Self {
            normalized_url: url.to_string(),
            resolved_url: url.to_string(),
            was_resolved: false,
            redirect_chain: vec![url.to_string()],
        }
    }

    /// Build from a visited chain; the last entry is the resolved URL
    pub fn from_chain(normalized_url: &str, chain: Vec<String>) -> Self {
        let resolved_url = chain
            .last()
            .cloned()
            .unwrap_or_else(|| normalized_url.to_string());
        let was_resolved = resolved_url != normalized_url;
        Self {
            normalized_url: normalized_url.to_string(),
            resolved_url,
            was_resolved,
            redirect_chain: chain,
        }
    }
}

/// `{platform}:{16 hex chars}` key for the result cache
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CacheKey(pub(crate) String);

impl CacheKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Media kind of a format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Video,
    Image,
    Audio,
}

/// One downloadable media variant
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MediaFormat {
    /// Display label, e.g. "1080p", "720p", "sd", "audio"
    pub quality_label: String,
    pub quality: QualityTier,
    pub kind: MediaKind,
    pub url: String,
    pub filesize: Option<u64>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub has_muxed_audio: Option<bool>,
    /// Groups formats belonging to one item of multi-item content
    pub item_id: Option<String>,
    #[serde(skip)]
    pub(crate) priority_score: i32,
}

/// Deduplicated, sorted formats.
///
/// Only the format selector builds these, so a `FormatSet` always holds at
/// most one format per (quality label, kind, item) and is ordered by
/// descending quality with audio last.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct FormatSet(Vec<MediaFormat>);

impl FormatSet {
    pub(crate) fn from_sorted(formats: Vec<MediaFormat>) -> Self {
        Self(formats)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, MediaFormat> {
        self.0.iter()
    }

    pub fn first(&self) -> Option<&MediaFormat> {
        self.0.first()
    }
}

impl<'a> IntoIterator for &'a FormatSet {
    type Item = &'a MediaFormat;
    type IntoIter = std::slice::Iter<'a, MediaFormat>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Successful extraction payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ExtractedMedia {
    pub title: Option<String>,
    pub author: Option<String>,
    pub thumbnail: Option<String>,
    pub formats: FormatSet,
    pub used_credential: bool,
}

/// Failed extraction payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionFailure {
    pub code: ErrorCode,
    pub message: String,
}

/// Final, immutable result of one request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ExtractionResult {
    Success(ExtractedMedia),
    Failure(ExtractionFailure),
}

impl ExtractionResult {
    pub fn failure(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Failure(ExtractionFailure {
            code,
            message: message.into(),
        })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn error_code(&self) -> Option<ErrorCode> {
        match self {
            Self::Success(_) => None,
            Self::Failure(f) => Some(f.code),
        }
    }

    pub fn media(&self) -> Option<&ExtractedMedia> {
        match self {
            Self::Success(m) => Some(m),
            Self::Failure(_) => None,
        }
    }
}

impl From<ExtractError> for ExtractionResult {
    fn from(e: ExtractError) -> Self {
        Self::Failure(ExtractionFailure {
            code: e.code,
            message: e.message,
        })
    }
}

impl From<Result<ExtractedMedia, ExtractError>> for ExtractionResult {
    fn from(r: Result<ExtractedMedia, ExtractError>) -> Self {
        match r {
            Ok(media) if media.formats.is_empty() => {
                Self::failure(ErrorCode::NoMedia, ErrorCode::NoMedia.description())
            }
            Ok(media) => Self::Success(media),
            Err(e) => e.into(),
        }
    }
}

/// What the dispatcher needs to run one extraction
#[derive(Debug, Clone)]
pub struct ExtractionRequest {
    pub platform: Platform,
    pub resolved_url: String,
    pub descriptor: ContentDescriptor,
}
