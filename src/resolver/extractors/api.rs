// Native API engine
//
// Talks to the platforms' own JSON endpoints. The public flavour never sends
// a session; the authenticated flavour only runs with one and reaches
// endpoints that are closed to anonymous clients.

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, REFERER};
use serde_json::Value;

use super::http::get_page;
use super::traits::{Engine, EngineInput, EngineKind};
use crate::resolver::config::ResolverConfig;
use crate::resolver::errors::{ErrorCode, ExtractError};
use crate::resolver::models::{ContentType, ExtractedMedia, Platform};
use crate::resolver::parser;
use crate::resolver::utils::{build_http_client, cookie_value};

const IG_APP_ID: &str = "936619743392459";
const SHORTCODE_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

/// One prepared endpoint call
struct ApiCall {
    url: String,
    headers: HeaderMap,
}

pub struct ApiEngine {
    client: reqwest::Client,
    authenticated: bool,
}

impl ApiEngine {
    pub fn public(config: &ResolverConfig) -> Result<Self, ExtractError> {
        Ok(Self {
            client: build_http_client(config, true, config.engine_timeout())?,
            authenticated: false,
        })
    }

    pub fn authenticated(config: &ResolverConfig) -> Result<Self, ExtractError> {
        Ok(Self {
            client: build_http_client(config, true, config.engine_timeout())?,
            authenticated: true,
        })
    }

    fn content_id<'a>(input: &'a EngineInput<'_>) -> Result<&'a str, ExtractError> {
        input
            .descriptor
            .content_id
            .as_deref()
            .ok_or_else(|| ExtractError::parse(format!("no content id in {}", input.resolved_url)))
    }

    fn build_call(&self, input: &EngineInput<'_>) -> Result<ApiCall, ExtractError> {
        let id = Self::content_id(input)?;
        match (input.platform, self.authenticated) {
            (Platform::Instagram, false) => {
                if input.descriptor.content_type == ContentType::Story {
                    return Err(ExtractError::from_code(ErrorCode::CookieRequired));
                }
                Ok(ApiCall {
                    url: format!("https://www.instagram.com/p/{}/?__a=1&__d=dis", id),
                    headers: instagram_headers(None)?,
                })
            }
            (Platform::Instagram, true) => {
                let media_id = if id.bytes().all(|b| b.is_ascii_digit()) {
                    id.to_string()
                } else {
                    shortcode_to_media_id(id)
                        .ok_or_else(|| ExtractError::parse(format!("bad shortcode {}", id)))?
                        .to_string()
                };
                Ok(ApiCall {
                    url: format!("https://i.instagram.com/api/v1/media/{}/info/", media_id),
                    headers: instagram_headers(input.credential)?,
                })
            }
            (Platform::TikTok, _) => {
                let mut headers = HeaderMap::new();
                headers.insert(REFERER, HeaderValue::from_static("https://www.tiktok.com/"));
                Ok(ApiCall {
                    url: format!("https://www.tiktok.com/api/item/detail/?itemId={}&aid=1988", id),
                    headers,
                })
            }
            (Platform::Twitter, false) => {
                let token = syndication_token(id)
                    .ok_or_else(|| ExtractError::parse(format!("tweet id {} is not numeric", id)))?;
                Ok(ApiCall {
                    url: format!(
                        "https://cdn.syndication.twimg.com/tweet-result?id={}&token={}&lang=en",
                        id, token
                    ),
                    headers: HeaderMap::new(),
                })
            }
            (platform, _) => Err(ExtractError::parse(format!(
                "{} has no {} endpoint",
                platform,
                self.kind()
            ))),
        }
    }
}

fn header(name: &'static str, value: &str) -> Result<(HeaderName, HeaderValue), ExtractError> {
    let value = HeaderValue::from_str(value)
        .map_err(|_| ExtractError::new(ErrorCode::Unknown, format!("invalid {} header value", name)))?;
    Ok((HeaderName::from_static(name), value))
}

fn instagram_headers(credential: Option<&str>) -> Result<HeaderMap, ExtractError> {
    let mut headers = HeaderMap::new();
    let (name, value) = header("x-ig-app-id", IG_APP_ID)?;
    headers.insert(name, value);
    headers.insert(REFERER, HeaderValue::from_static("https://www.instagram.com/"));
    if let Some(csrf) = credential.and_then(|c| cookie_value(c, "csrftoken")) {
        let (name, value) = header("x-csrftoken", csrf)?;
        headers.insert(name, value);
    }
    Ok(headers)
}

/// Instagram shortcodes are base64 (URL alphabet) encodings of the media id.
/// Shortcodes of private posts carry a suffix after the first 11 characters.
pub fn shortcode_to_media_id(shortcode: &str) -> Option<u128> {
    shortcode.bytes().take(11).try_fold(0u128, |id, b| {
        let digit = SHORTCODE_ALPHABET.iter().position(|&a| a == b)?;
        Some(id * 64 + digit as u128)
    })
}

/// Token the tweet syndication endpoint expects: `(id / 1e15 * PI)` in base 36
/// with zeros and the point removed
pub fn syndication_token(tweet_id: &str) -> Option<String> {
    if tweet_id.is_empty() || !tweet_id.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let id: f64 = tweet_id.parse().ok()?;
    let value = id / 1e15 * std::f64::consts::PI;
    Some(to_base36(value).chars().filter(|c| *c != '0' && *c != '.').collect())
}

fn to_base36(value: f64) -> String {
    const DIGITS: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    let mut int_part = value.trunc() as u64;
    let mut frac = value.fract();

    let mut int_digits = Vec::new();
    loop {
        int_digits.push(DIGITS[(int_part % 36) as usize]);
        int_part /= 36;
        if int_part == 0 {
            break;
        }
    }
    int_digits.reverse();

    let mut out = String::from_utf8_lossy(&int_digits).into_owned();
    out.push('.');
    for _ in 0..12 {
        if frac == 0.0 {
            break;
        }
        frac *= 36.0;
        let digit = frac.trunc() as usize;
        out.push(DIGITS[digit.min(35)] as char);
        frac -= frac.trunc();
    }
    out
}

/// TikTok reports failures in a `statusCode` field of a 200 response
fn tiktok_status(value: &Value) -> Option<ErrorCode> {
    let code = value["statusCode"].as_i64().or_else(|| value["status_code"].as_i64())?;
    match code {
        0 => None,
        10204 => Some(ErrorCode::NotFound),
        10216 | 10222 => Some(ErrorCode::PrivateContent),
        10101 | 10000 => Some(ErrorCode::Blocked),
        _ => Some(ErrorCode::Unknown),
    }
}

/// Deleted and withheld tweets come back as tombstones
fn twitter_tombstone(value: &Value) -> Option<ErrorCode> {
    if value.as_object().map_or(false, |o| o.is_empty()) {
        return Some(ErrorCode::NotFound);
    }
    if value["__typename"].as_str() != Some("TweetTombstone") {
        return None;
    }
    let text = value["tombstone"]["text"]["text"].as_str().unwrap_or("").to_lowercase();
    if text.contains("age-restricted") || text.contains("adult content") {
        Some(ErrorCode::AgeRestricted)
    } else if text.contains("protected") {
        Some(ErrorCode::PrivateContent)
    } else {
        Some(ErrorCode::NotFound)
    }
}

#[async_trait]
impl Engine for ApiEngine {
    fn name(&self) -> &'static str {
        if self.authenticated {
            "api-authenticated"
        } else {
            "api-public"
        }
    }

    fn kind(&self) -> EngineKind {
        if self.authenticated {
            EngineKind::AuthenticatedApi
        } else {
            EngineKind::NativeApi
        }
    }

    fn accepts_credentials(&self) -> bool {
        self.authenticated
    }

    async fn extract(&self, input: &EngineInput<'_>) -> Result<ExtractedMedia, ExtractError> {
        let credential = if self.authenticated {
            Some(input.credential.ok_or_else(|| ExtractError::from_code(ErrorCode::CookieRequired))?)
        } else {
            None
        };

        let call = self.build_call(input)?;
        tracing::debug!(engine = self.name(), url = %call.url, "calling platform API");

        let page = get_page(&self.client, &call.url, call.headers, credential).await?;
        page.check(credential.is_some())?;

        let value: Value = serde_json::from_str(page.body.trim())?;
        let platform_code = match input.platform {
            Platform::TikTok => tiktok_status(&value),
            Platform::Twitter => twitter_tombstone(&value),
            _ => None,
        };
        if let Some(code) = platform_code {
            return Err(ExtractError::from_code(code));
        }

        parser::parse_json(&value, credential.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::models::ContentDescriptor;
    use serde_json::json;
    use std::time::Duration;

    #[test]
    fn test_shortcode_to_media_id() {
        assert_eq!(shortcode_to_media_id("B"), Some(1));
        assert_eq!(shortcode_to_media_id("BA"), Some(64));
        assert_eq!(shortcode_to_media_id("_"), Some(63));
        assert_eq!(shortcode_to_media_id("a!b"), None);
    }

    #[test]
    fn test_syndication_token_shape() {
        let token = syndication_token("1700000000000000000").unwrap();
        assert!(!token.is_empty());
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric() && c != '0'));
        assert!(syndication_token("12ab").is_none());
    }

    #[test]
    fn test_to_base36() {
        assert_eq!(to_base36(35.0), "z.");
        assert_eq!(to_base36(36.5), "10.i");
    }

    #[test]
    fn test_tiktok_status() {
        assert_eq!(tiktok_status(&json!({"statusCode": 0})), None);
        assert_eq!(tiktok_status(&json!({"statusCode": 10204})), Some(ErrorCode::NotFound));
        assert_eq!(tiktok_status(&json!({"statusCode": 10216})), Some(ErrorCode::PrivateContent));
        assert_eq!(tiktok_status(&json!({"itemInfo": {}})), None);
    }

    #[test]
    fn test_twitter_tombstone() {
        assert_eq!(twitter_tombstone(&json!({})), Some(ErrorCode::NotFound));
        let gated = json!({
            "__typename": "TweetTombstone",
            "tombstone": {"text": {"text": "Age-restricted adult content. Log in to view."}}
        });
        assert_eq!(twitter_tombstone(&gated), Some(ErrorCode::AgeRestricted));
        assert_eq!(twitter_tombstone(&json!({"__typename": "Tweet"})), None);
    }

    #[tokio::test]
    async fn test_public_instagram_story_needs_cookie() {
        let engine = ApiEngine::public(&ResolverConfig::default()).unwrap();
        let descriptor = ContentDescriptor {
            content_id: Some("3141592653".to_string()),
            content_type: ContentType::Story,
        };
        let input = EngineInput {
            resolved_url: "https://www.instagram.com/stories/someone/3141592653/",
            platform: Platform::Instagram,
            descriptor: &descriptor,
            credential: None,
            timeout: Duration::from_secs(5),
        };
        let err = engine.extract(&input).await.unwrap_err();
        assert_eq!(err.code, ErrorCode::CookieRequired);
    }

    #[tokio::test]
    async fn test_authenticated_without_credential() {
        let engine = ApiEngine::authenticated(&ResolverConfig::default()).unwrap();
        let descriptor = ContentDescriptor::default();
        let input = EngineInput {
            resolved_url: "https://www.instagram.com/p/abc/",
            platform: Platform::Instagram,
            descriptor: &descriptor,
            credential: None,
            timeout: Duration::from_secs(5),
        };
        assert_eq!(engine.extract(&input).await.unwrap_err().code, ErrorCode::CookieRequired);
    }

    #[tokio::test]
    async fn test_unrouted_platform_is_parse_level() {
        let engine = ApiEngine::public(&ResolverConfig::default()).unwrap();
        let descriptor = ContentDescriptor {
            content_id: Some("dQw4w9WgXcQ".to_string()),
            content_type: ContentType::Video,
        };
        let input = EngineInput {
            resolved_url: "https://www.youtube.com/watch?v=dQw4w9WgXcQ",
            platform: Platform::YouTube,
            descriptor: &descriptor,
            credential: None,
            timeout: Duration::from_secs(5),
        };
        assert_eq!(engine.extract(&input).await.unwrap_err().code, ErrorCode::ParseError);
    }
}
