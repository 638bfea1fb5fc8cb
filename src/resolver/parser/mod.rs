// Parser and format normalizer
//
// Engines hand raw payloads (API JSON, yt-dlp JSON, page markup) to this
// module and get back an `ExtractedMedia` with a normalized FormatSet.

pub mod format_selector;
pub mod patterns;
pub mod quality;
pub mod scoring;

pub use format_selector::FormatSelector;
pub use patterns::{Candidate, ContentShape, ParsedPayload};
pub use quality::QualityTier;

use serde_json::Value;

use crate::resolver::errors::ExtractError;
use crate::resolver::models::ExtractedMedia;

impl ParsedPayload {
    /// Normalize candidates and build the success payload
    pub fn into_media(self, used_credential: bool) -> Result<ExtractedMedia, ExtractError> {
        let formats = FormatSelector::normalize(self.candidates);
        if formats.is_empty() {
            return Err(ExtractError::no_media("no usable media URLs after normalization"));
        }
        Ok(ExtractedMedia {
            title: self.title,
            author: self.author,
            thumbnail: self.thumbnail,
            formats,
            used_credential,
        })
    }
}

/// Parse a JSON payload through the pattern registry
pub fn parse_json(value: &Value, used_credential: bool) -> Result<ExtractedMedia, ExtractError> {
    let payload = patterns::match_json(value)?;
    tracing::debug!(
        pattern = payload.pattern.unwrap_or("?"),
        candidates = payload.candidates.len(),
        "JSON payload matched"
    );
    payload.into_media(used_credential)
}

/// Parse raw JSON text
pub fn parse_json_str(body: &str, used_credential: bool) -> Result<ExtractedMedia, ExtractError> {
    let value: Value = serde_json::from_str(body.trim())?;
    parse_json(&value, used_credential)
}

/// Parse page markup through the markup registry
pub fn parse_markup(html: &str, used_credential: bool) -> Result<ExtractedMedia, ExtractError> {
    let payload = patterns::match_markup(html)?;
    tracing::debug!(
        pattern = payload.pattern.unwrap_or("?"),
        candidates = payload.candidates.len(),
        "markup matched"
    );
    payload.into_media(used_credential)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::errors::ErrorCode;
    use crate::resolver::models::MediaKind;

    #[test]
    fn test_parse_json_end_to_end() {
        let body = r#"{
            "items": [{
                "user": {"username": "alice"},
                "video_versions": [
                    {"url": "https://scontent.cdninstagram.com/v1080.mp4", "width": 1080, "height": 1920},
                    {"url": "https://scontent.cdninstagram.com/v1080b.mp4", "width": 1080, "height": 1920},
                    {"url": "https://scontent.cdninstagram.com/v480.mp4", "width": 480, "height": 854}
                ],
                "has_audio": true
            }]
        }"#;

        let media = parse_json_str(body, true).unwrap();
        assert!(media.used_credential);
        assert_eq!(media.author.as_deref(), Some("alice"));
        assert_eq!(media.formats.len(), 2);
        assert_eq!(media.formats.first().unwrap().quality_label, "1080p");
        assert!(media.formats.iter().all(|f| f.kind == MediaKind::Video));
    }

    #[test]
    fn test_invalid_json_is_parse_error() {
        let err = parse_json_str("<html>", false).unwrap_err();
        assert_eq!(err.code, ErrorCode::ParseError);
    }
}
