// Platform detection, content descriptors and cache keys
//
// All of this is pure URL parsing: nothing here looks at page content.

use std::collections::{HashMap, VecDeque};

use lazy_static::lazy_static;
use parking_lot::Mutex;
use regex::Regex;
use sha2::{Digest, Sha256};
use url::Url;

use super::validator::strip_tracking;
use crate::resolver::config::DetectorConfig;
use crate::resolver::models::{CacheKey, ContentDescriptor, ContentType, Platform};

/// Domains owned by each platform, matched exactly or as a suffix
const PLATFORM_DOMAINS: &[(Platform, &[&str])] = &[
    (Platform::Instagram, &["instagram.com", "instagr.am", "ig.me"]),
    (Platform::TikTok, &["tiktok.com"]),
    (
        Platform::Twitter,
        &["twitter.com", "x.com", "t.co", "fxtwitter.com", "vxtwitter.com", "fixupx.com"],
    ),
    (Platform::Facebook, &["facebook.com", "fb.watch", "fb.com", "fb.me"]),
    (Platform::YouTube, &["youtube.com", "youtu.be", "youtube-nocookie.com"]),
    (Platform::Threads, &["threads.net", "threads.com"]),
];

lazy_static! {
    /// Short-link shapes, matched against `host/path` with `www.` stripped
    static ref SHORT_LINK_PATTERNS: Vec<(Platform, Regex)> = vec![
        (Platform::Instagram, Regex::new(r"^instagr\.am/").unwrap()),
        (Platform::Instagram, Regex::new(r"^ig\.me/").unwrap()),
        (Platform::Instagram, Regex::new(r"^instagram\.com/share/").unwrap()),
        (Platform::TikTok, Regex::new(r"^v[mt]\.tiktok\.com/").unwrap()),
        (Platform::TikTok, Regex::new(r"^(m\.)?tiktok\.com/t/").unwrap()),
        (Platform::Twitter, Regex::new(r"^t\.co/").unwrap()),
        (Platform::Facebook, Regex::new(r"^fb\.watch/").unwrap()),
        (Platform::Facebook, Regex::new(r"^fb\.me/").unwrap()),
        (Platform::Facebook, Regex::new(r"^(m\.)?facebook\.com/share/").unwrap()),
    ];

    /// Content id and type patterns, in priority order per platform
    static ref CONTENT_PATTERNS: Vec<(Platform, Regex, ContentType)> = vec![
        (Platform::Instagram, Regex::new(r"/stories/[^/]+/(\d+)").unwrap(), ContentType::Story),
        (Platform::Instagram, Regex::new(r"/reels?/([A-Za-z0-9_-]+)").unwrap(), ContentType::Reel),
        (Platform::Instagram, Regex::new(r"/tv/([A-Za-z0-9_-]+)").unwrap(), ContentType::Video),
        (Platform::Instagram, Regex::new(r"/p/([A-Za-z0-9_-]+)").unwrap(), ContentType::Post),
        (Platform::TikTok, Regex::new(r"/video/(\d+)").unwrap(), ContentType::Video),
        (Platform::TikTok, Regex::new(r"/photo/(\d+)").unwrap(), ContentType::Image),
        (Platform::TikTok, Regex::new(r"/embed/(?:v2/)?(\d+)").unwrap(), ContentType::Video),
        (Platform::Twitter, Regex::new(r"/status(?:es)?/(\d+)").unwrap(), ContentType::Post),
        (Platform::Facebook, Regex::new(r"/reels?/(\d+)").unwrap(), ContentType::Reel),
        (Platform::Facebook, Regex::new(r"/videos/(?:[^/?]+/)?(\d+)").unwrap(), ContentType::Video),
        (Platform::Facebook, Regex::new(r"/watch/?\?(?:.*&)?v=(\d+)").unwrap(), ContentType::Video),
        (Platform::Facebook, Regex::new(r"[?&]story_fbid=([A-Za-z0-9]+)").unwrap(), ContentType::Post),
        (Platform::Facebook, Regex::new(r"/posts/([A-Za-z0-9]+)").unwrap(), ContentType::Post),
        (Platform::Facebook, Regex::new(r"[?&]fbid=(\d+)").unwrap(), ContentType::Image),
        (Platform::YouTube, Regex::new(r"/shorts/([A-Za-z0-9_-]{6,})").unwrap(), ContentType::Reel),
        (Platform::YouTube, Regex::new(r"^youtu\.be/([A-Za-z0-9_-]{6,})").unwrap(), ContentType::Video),
        (Platform::YouTube, Regex::new(r"[?&]v=([A-Za-z0-9_-]{6,})").unwrap(), ContentType::Video),
        (Platform::YouTube, Regex::new(r"/(?:embed|live)/([A-Za-z0-9_-]{6,})").unwrap(), ContentType::Video),
        (Platform::Threads, Regex::new(r"/(?:post|t)/([A-Za-z0-9_-]+)").unwrap(), ContentType::Post),
    ];
}

/// Oldest-first bounded map
struct DetectionCache {
    entries: HashMap<String, Option<Platform>>,
    order: VecDeque<String>,
    capacity: usize,
}

impl DetectionCache {
    fn new(capacity: usize) -> Self {
        Self {
            entries: HashMap::new(),
            order: VecDeque::new(),
            capacity: capacity.max(1),
        }
    }

    fn get(&self, key: &str) -> Option<Option<Platform>> {
        self.entries.get(key).copied()
    }

    fn insert(&mut self, key: String, value: Option<Platform>) {
        if self.entries.contains_key(&key) {
            return;
        }
        while self.entries.len() >= self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.entries.remove(&oldest);
                }
                None => break,
            }
        }
        self.order.push_back(key.clone());
        self.entries.insert(key, value);
    }
}

/// Platform detector with a bounded detection cache
pub struct PlatformDetector {
    extra_domains: Vec<(Platform, String)>,
    extra_short_links: Vec<(Option<Platform>, String)>,
    cache: Mutex<DetectionCache>,
}

impl PlatformDetector {
    pub fn new(config: &DetectorConfig, cache_size: usize) -> Self {
        Self {
            extra_domains: config
                .extra_domains
                .iter()
                .map(|r| (r.platform, r.domain.trim_start_matches("www.").to_lowercase()))
                .collect(),
            extra_short_links: config
                .extra_short_links
                .iter()
                .map(|r| (r.platform, r.prefix.trim_start_matches("www.").to_lowercase()))
                .collect(),
            cache: Mutex::new(DetectionCache::new(cache_size)),
        }
    }

    /// Owning platform of a URL, or `None` when no table claims the host
    pub fn detect_platform(&self, url: &str) -> Option<Platform> {
        if let Some(hit) = self.cache.lock().get(url) {
            return hit;
        }

        let detected = canonical_host(url).and_then(|host| self.match_host(&host));
        self.cache.lock().insert(url.to_string(), detected);
        detected
    }

    fn match_host(&self, host: &str) -> Option<Platform> {
        let owns = |domain: &str| host == domain || host.ends_with(&format!(".{}", domain));

        if let Some((platform, _)) = self.extra_domains.iter().find(|(_, d)| owns(d.as_str())) {
            return Some(*platform);
        }

        PLATFORM_DOMAINS
            .iter()
            .find(|(_, domains)| domains.iter().any(|d| owns(*d)))
            .map(|(platform, _)| *platform)
    }

    /// True when the URL has a known short-link shape for `platform`, or for
    /// any platform when `platform` is `None`
    pub fn needs_resolve(&self, url: &str, platform: Option<Platform>) -> bool {
        let Some(target) = host_path(url) else {
            return false;
        };
        let wanted = |p: Option<Platform>| platform.is_none() || p.is_none() || p == platform;

        SHORT_LINK_PATTERNS
            .iter()
            .any(|(p, re)| wanted(Some(*p)) && re.is_match(&target))
            || self
                .extra_short_links
                .iter()
                .any(|(p, prefix)| wanted(*p) && target.starts_with(prefix.as_str()))
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.lock().entries.len()
    }
}

/// Host with a trailing dot and a leading `www.` removed
fn canonical_host(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = parsed.host_str()?.trim_end_matches('.').to_lowercase();
    let host = host.strip_prefix("www.").map(str::to_string).unwrap_or(host);
    Some(host)
}

/// `host/path?query` with the canonical host, used by the pattern tables
fn host_path(url: &str) -> Option<String> {
    let parsed = Url::parse(url).ok()?;
    let host = canonical_host(url)?;
    let mut target = format!("{}{}", host, parsed.path());
    if let Some(query) = parsed.query() {
        target.push('?');
        target.push_str(query);
    }
    Some(target)
}

fn first_content_match(platform: Platform, url: &str) -> Option<(String, ContentType)> {
    let target = host_path(url)?;
    CONTENT_PATTERNS
        .iter()
        .filter(|(p, _, _)| *p == platform)
        .find_map(|(_, re, content_type)| {
            re.captures(&target)
                .and_then(|caps| caps.get(1))
                .map(|m| (m.as_str().to_string(), *content_type))
        })
}

/// Platform-specific content id from the resolved URL
pub fn extract_content_id(platform: Platform, url: &str) -> Option<String> {
    first_content_match(platform, url).map(|(id, _)| id)
}

/// Content type from the resolved URL
pub fn detect_content_type(platform: Platform, url: &str) -> ContentType {
    first_content_match(platform, url)
        .map(|(_, content_type)| content_type)
        .unwrap_or(ContentType::Unknown)
}

pub fn describe(platform: Platform, url: &str) -> ContentDescriptor {
    match first_content_match(platform, url) {
        Some((id, content_type)) => ContentDescriptor {
            content_id: Some(id),
            content_type,
        },
        None => ContentDescriptor::default(),
    }
}

/// `{platform}:{first 16 hex chars of sha256(url without tracking)}`
pub fn generate_cache_key(platform: Platform, url: &str) -> CacheKey {
    let stripped = match Url::parse(url) {
        Ok(mut parsed) => {
            strip_tracking(&mut parsed);
            parsed.to_string()
        }
        Err(_) => url.to_string(),
    };
    let digest = Sha256::digest(stripped.as_bytes());
    let hex = hex::encode(digest);
    CacheKey(format!("{}:{}", platform.as_str(), &hex[..16]))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resolver::config::{DomainRule, ShortLinkRule};

    fn detector() -> PlatformDetector {
        PlatformDetector::new(&DetectorConfig::default(), 1024)
    }

    #[test]
    fn test_detect_platform() {
        let d = detector();
        assert_eq!(d.detect_platform("https://www.instagram.com/p/abc/"), Some(Platform::Instagram));
        assert_eq!(d.detect_platform("https://m.tiktok.com/v/1.html"), Some(Platform::TikTok));
        assert_eq!(d.detect_platform("https://x.com/a/status/1"), Some(Platform::Twitter));
        assert_eq!(d.detect_platform("https://fb.watch/abc/"), Some(Platform::Facebook));
        assert_eq!(d.detect_platform("https://youtu.be/dQw4w9WgXcQ"), Some(Platform::YouTube));
        assert_eq!(d.detect_platform("https://www.threads.net/@a/post/C1"), Some(Platform::Threads));
        assert_eq!(d.detect_platform("https://notinstagram.com/p/abc/"), None);
        assert_eq!(d.detect_platform("https://example.com/"), None);
    }

    #[test]
    fn test_detection_cache_is_bounded() {
        let d = PlatformDetector::new(&DetectorConfig::default(), 3);
        for i in 0..10 {
            d.detect_platform(&format!("https://x.com/a/status/{}", i));
        }
        assert_eq!(d.cached_entries(), 3);
        // Still answers correctly after eviction
        assert_eq!(d.detect_platform("https://x.com/a/status/0"), Some(Platform::Twitter));
    }

    #[test]
    fn test_needs_resolve() {
        let d = detector();
        assert!(d.needs_resolve("https://vm.tiktok.com/ZMabc/", Some(Platform::TikTok)));
        assert!(d.needs_resolve("https://www.tiktok.com/t/ZTabc/", None));
        assert!(d.needs_resolve("https://t.co/xyz", None));
        assert!(d.needs_resolve("https://www.facebook.com/share/r/abc/", Some(Platform::Facebook)));
        assert!(!d.needs_resolve("https://vm.tiktok.com/ZMabc/", Some(Platform::Instagram)));
        assert!(!d.needs_resolve("https://www.tiktok.com/@a/video/123", Some(Platform::TikTok)));
    }

    #[test]
    fn test_extra_rules() {
        let config = DetectorConfig {
            extra_domains: vec![DomainRule {
                platform: Platform::Threads,
                domain: "service.example".into(),
            }],
            extra_short_links: vec![ShortLinkRule {
                platform: None,
                prefix: "short.example/".into(),
            }],
        };
        let d = PlatformDetector::new(&config, 16);
        assert!(d.needs_resolve("https://short.example/abc", None));
        assert_eq!(d.detect_platform("https://service.example/post/12345"), Some(Platform::Threads));
        assert_eq!(
            extract_content_id(Platform::Threads, "https://service.example/post/12345").as_deref(),
            Some("12345")
        );
    }

    #[test]
    fn test_content_descriptors() {
        let cases = [
            (Platform::Instagram, "https://www.instagram.com/reel/Cx1_-a/", "Cx1_-a", ContentType::Reel),
            (Platform::Instagram, "https://www.instagram.com/p/Bq2/", "Bq2", ContentType::Post),
            (Platform::Instagram, "https://www.instagram.com/stories/bob/3141592/", "3141592", ContentType::Story),
            (Platform::TikTok, "https://www.tiktok.com/@a/video/7301", "7301", ContentType::Video),
            (Platform::TikTok, "https://www.tiktok.com/@a/photo/7302", "7302", ContentType::Image),
            (Platform::Twitter, "https://x.com/a/status/1790", "1790", ContentType::Post),
            (Platform::Facebook, "https://www.facebook.com/watch/?v=555", "555", ContentType::Video),
            (Platform::Facebook, "https://www.facebook.com/reel/777", "777", ContentType::Reel),
            (Platform::YouTube, "https://www.youtube.com/shorts/abcdefghijk", "abcdefghijk", ContentType::Reel),
            (Platform::YouTube, "https://youtu.be/dQw4w9WgXcQ", "dQw4w9WgXcQ", ContentType::Video),
            (Platform::YouTube, "https://www.youtube.com/watch?v=dQw4w9WgXcQ", "dQw4w9WgXcQ", ContentType::Video),
        ];
        for (platform, url, id, content_type) in cases {
            let d = describe(platform, url);
            assert_eq!(d.content_id.as_deref(), Some(id), "{}", url);
            assert_eq!(d.content_type, content_type, "{}", url);
        }
        assert_eq!(describe(Platform::TikTok, "https://www.tiktok.com/@a"), ContentDescriptor::default());
    }

    #[test]
    fn test_cache_key_ignores_tracking() {
        let a = generate_cache_key(Platform::Instagram, "https://www.instagram.com/p/abc/?igsh=1");
        let b = generate_cache_key(Platform::Instagram, "https://www.instagram.com/p/abc/?utm_source=x#f");
        let c = generate_cache_key(Platform::Instagram, "https://www.instagram.com/p/abd/");
        assert_eq!(a, b);
        assert_ne!(a, c);

        let (platform, hash) = a.as_str().split_once(':').unwrap();
        assert_eq!(platform, "instagram");
        assert_eq!(hash.len(), 16);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
