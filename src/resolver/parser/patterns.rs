// Response-shape pattern registry
//
// Two ordered tables of (matcher, extractor) pairs:
// - JSON_PATTERNS for API responses, subprocess output and JSON blobs
//   embedded in pages
// - MARKUP_PATTERNS for raw HTML
//
// Patterns are tried in table order. The first one that matches and yields
// candidates wins, so more specific shapes (stories, carousels) sit above the
// generic single-media shapes of the same platform.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use crate::resolver::errors::ExtractError;
use crate::resolver::models::MediaKind;

const MAX_SEARCH_DEPTH: usize = 12;
const MAX_TITLE_CHARS: usize = 200;

/// Content shape a pattern recognizes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentShape {
    Video,
    Image,
    /// Multi-item post (carousel, sidecar, photo mode, multi-media tweet)
    Carousel,
    Story,
}

/// One raw media candidate before normalization
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub kind: MediaKind,
    pub url: String,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub filesize: Option<u64>,
    /// Bits per second
    pub bitrate: Option<u64>,
    pub has_audio: Option<bool>,
    /// Single muxed file (true) vs DASH/HLS fragments (false)
    pub progressive: Option<bool>,
    pub watermarked: bool,
    /// Textual quality hint ("hd", "1080p", gear name)
    pub hint: Option<String>,
    pub item_id: Option<String>,
}

impl Candidate {
    pub fn new(kind: MediaKind, url: &str) -> Self {
        Self {
            kind,
            url: url.to_string(),
            width: None,
            height: None,
            filesize: None,
            bitrate: None,
            has_audio: None,
            progressive: None,
            watermarked: false,
            hint: None,
            item_id: None,
        }
    }

    pub fn with_dimensions(mut self, width: Option<u32>, height: Option<u32>) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn with_item(mut self, item_id: Option<String>) -> Self {
        self.item_id = item_id;
        self
    }

    pub fn with_hint(mut self, hint: &str) -> Self {
        self.hint = Some(hint.to_string());
        self
    }
}

/// Everything one pattern pulled out of a payload
#[derive(Debug, Clone, Default)]
pub struct ParsedPayload {
    pub title: Option<String>,
    pub author: Option<String>,
    pub thumbnail: Option<String>,
    pub candidates: Vec<Candidate>,
    pub shape: Option<ContentShape>,
    /// Name of the pattern that produced the payload
    pub pattern: Option<&'static str>,
}

impl ParsedPayload {
    fn set_title(&mut self, title: Option<String>) {
        if self.title.is_none() {
            self.title = title.map(|t| t.chars().take(MAX_TITLE_CHARS).collect());
        }
    }

    fn set_author(&mut self, author: Option<String>) {
        if self.author.is_none() {
            self.author = author;
        }
    }

    fn set_thumbnail(&mut self, thumbnail: Option<String>) {
        if self.thumbnail.is_none() {
            self.thumbnail = thumbnail;
        }
    }

    fn push(&mut self, candidate: Candidate) {
        if candidate.url.starts_with("http://") || candidate.url.starts_with("https://") {
            self.candidates.push(candidate);
        }
    }
}

/// A JSON response shape
pub struct JsonPattern {
    pub name: &'static str,
    pub shape: ContentShape,
    pub matches: fn(&Value) -> bool,
    pub extract: fn(&Value, &mut ParsedPayload),
}

/// A raw-markup shape
pub struct MarkupPattern {
    pub name: &'static str,
    pub extract: fn(&str, &mut ParsedPayload),
}

pub static JSON_PATTERNS: &[JsonPattern] = &[
    JsonPattern {
        name: "instagram_story",
        shape: ContentShape::Story,
        matches: is_ig_story,
        extract: extract_ig_story,
    },
    JsonPattern {
        name: "instagram_carousel",
        shape: ContentShape::Carousel,
        matches: is_ig_carousel,
        extract: extract_ig_items,
    },
    JsonPattern {
        name: "instagram_video",
        shape: ContentShape::Video,
        matches: is_ig_video,
        extract: extract_ig_items,
    },
    JsonPattern {
        name: "instagram_image",
        shape: ContentShape::Image,
        matches: is_ig_image,
        extract: extract_ig_items,
    },
    JsonPattern {
        name: "instagram_graphql_sidecar",
        shape: ContentShape::Carousel,
        matches: is_graph_sidecar,
        extract: extract_graph_media,
    },
    JsonPattern {
        name: "instagram_graphql_media",
        shape: ContentShape::Video,
        matches: is_graph_media,
        extract: extract_graph_media,
    },
    JsonPattern {
        name: "threads_carousel",
        shape: ContentShape::Carousel,
        matches: is_threads_carousel,
        extract: extract_threads_post,
    },
    JsonPattern {
        name: "threads_media",
        shape: ContentShape::Video,
        matches: is_threads_media,
        extract: extract_threads_post,
    },
    JsonPattern {
        name: "tiktok_photo_mode",
        shape: ContentShape::Carousel,
        matches: is_tiktok_photo,
        extract: extract_tiktok_photo,
    },
    JsonPattern {
        name: "tiktok_item_struct",
        shape: ContentShape::Video,
        matches: is_tiktok_item,
        extract: extract_tiktok_item,
    },
    JsonPattern {
        name: "tiktok_aweme_detail",
        shape: ContentShape::Video,
        matches: is_tiktok_aweme,
        extract: extract_tiktok_aweme,
    },
    JsonPattern {
        name: "twitter_media_details",
        shape: ContentShape::Carousel,
        matches: is_twitter_syndication,
        extract: extract_twitter_syndication,
    },
    JsonPattern {
        name: "twitter_extended_entities",
        shape: ContentShape::Carousel,
        matches: is_twitter_entities,
        extract: extract_twitter_entities,
    },
    JsonPattern {
        name: "facebook_playable",
        shape: ContentShape::Video,
        matches: is_facebook_playable,
        extract: extract_facebook_playable,
    },
    JsonPattern {
        name: "ytdlp_playlist",
        shape: ContentShape::Carousel,
        matches: is_ytdlp_playlist,
        extract: extract_ytdlp_playlist,
    },
    JsonPattern {
        name: "ytdlp_formats",
        shape: ContentShape::Video,
        matches: is_ytdlp_single,
        extract: extract_ytdlp_single,
    },
];

pub static MARKUP_PATTERNS: &[MarkupPattern] = &[
    MarkupPattern {
        name: "embedded_json",
        extract: extract_embedded_json,
    },
    MarkupPattern {
        name: "json_ld",
        extract: extract_json_ld,
    },
    MarkupPattern {
        name: "escaped_media_urls",
        extract: extract_escaped_urls,
    },
    MarkupPattern {
        name: "opengraph",
        extract: extract_opengraph,
    },
];

/// Run the JSON registry.
///
/// Returns `PARSE_ERROR` when no pattern recognizes the payload and
/// `NO_MEDIA` when a pattern recognized it but found nothing downloadable.
pub fn match_json(value: &Value) -> Result<ParsedPayload, ExtractError> {
    let mut recognized = None;

    for pattern in JSON_PATTERNS {
        if !(pattern.matches)(value) {
            continue;
        }
        let mut out = ParsedPayload::default();
        (pattern.extract)(value, &mut out);
        if !out.candidates.is_empty() {
            out.shape = Some(pattern.shape);
            out.pattern = Some(pattern.name);
            return Ok(out);
        }
        recognized.get_or_insert(pattern.name);
    }

    match recognized {
        Some(name) => Err(ExtractError::no_media(format!(
            "response matched '{}' but carried no media",
            name
        ))),
        None => Err(ExtractError::parse("response shape not recognized")),
    }
}

/// Run the markup registry. OpenGraph metadata always fills title and
/// thumbnail gaps, whichever pattern supplied the candidates.
pub fn match_markup(html: &str) -> Result<ParsedPayload, ExtractError> {
    let meta = read_meta_tags(html);

    for pattern in MARKUP_PATTERNS {
        let mut out = ParsedPayload::default();
        (pattern.extract)(html, &mut out);
        if out.candidates.is_empty() {
            continue;
        }
        out.pattern = Some(pattern.name);
        out.set_title(meta.get("og:title").cloned());
        out.set_thumbnail(meta.get("og:image").cloned());
        return Ok(out);
    }

    if meta.is_empty() {
        Err(ExtractError::parse("page carries no recognizable media markup"))
    } else {
        Err(ExtractError::no_media("page metadata found but no media URLs"))
    }
}

// ---------------------------------------------------------------------------
// JSON helpers
// ---------------------------------------------------------------------------

/// Depth-limited search for the first value stored under `key`
pub fn find_key<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    find_key_depth(value, key, 0)
}

fn find_key_depth<'a>(value: &'a Value, key: &str, depth: usize) -> Option<&'a Value> {
    if depth > MAX_SEARCH_DEPTH {
        return None;
    }
    match value {
        Value::Object(map) => {
            if let Some(v) = map.get(key) {
                if !v.is_null() {
                    return Some(v);
                }
            }
            map.values().find_map(|v| find_key_depth(v, key, depth + 1))
        }
        Value::Array(items) => items.iter().find_map(|v| find_key_depth(v, key, depth + 1)),
        _ => None,
    }
}

fn str_of(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn u64_of(value: &Value) -> Option<u64> {
    value
        .as_u64()
        .or_else(|| value.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
        .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
}

fn u32_of(value: &Value) -> Option<u32> {
    u64_of(value).and_then(|v| u32::try_from(v).ok()).filter(|v| *v > 0)
}

fn id_of(value: &Value) -> Option<String> {
    str_of(value).or_else(|| value.as_u64().map(|n| n.to_string()))
}

fn non_empty_array(value: &Value) -> bool {
    value.as_array().map_or(false, |a| !a.is_empty())
}

// ---------------------------------------------------------------------------
// Instagram (private API v1 items, also used by Threads posts)
// ---------------------------------------------------------------------------

fn ig_first_item(value: &Value) -> &Value {
    &value["items"][0]
}

fn is_ig_story(value: &Value) -> bool {
    non_empty_array(&value["reels_media"]) || value["reels"].as_object().map_or(false, |m| !m.is_empty())
}

fn is_ig_carousel(value: &Value) -> bool {
    non_empty_array(&ig_first_item(value)["carousel_media"])
}

fn is_ig_video(value: &Value) -> bool {
    non_empty_array(&ig_first_item(value)["video_versions"])
}

fn is_ig_image(value: &Value) -> bool {
    ig_first_item(value)["image_versions2"]["candidates"].is_array()
}

fn extract_ig_story(value: &Value, out: &mut ParsedPayload) {
    let reels: Vec<&Value> = match value["reels_media"].as_array() {
        Some(list) => list.iter().collect(),
        None => value["reels"]
            .as_object()
            .map(|m| m.values().collect())
            .unwrap_or_default(),
    };

    for reel in reels {
        out.set_author(str_of(&reel["user"]["username"]));
        for (index, item) in reel["items"].as_array().into_iter().flatten().enumerate() {
            let item_id = id_of(&item["pk"])
                .or_else(|| id_of(&item["id"]))
                .unwrap_or_else(|| index.to_string());
            ig_item(item, Some(item_id), out);
        }
    }
}

fn extract_ig_items(value: &Value, out: &mut ParsedPayload) {
    let item = ig_first_item(value);
    ig_post(item, out);
}

/// One post: either a carousel of children or a single media item
fn ig_post(item: &Value, out: &mut ParsedPayload) {
    out.set_title(str_of(&item["caption"]["text"]));
    out.set_author(str_of(&item["user"]["username"]));

    if let Some(children) = item["carousel_media"].as_array() {
        for (index, child) in children.iter().enumerate() {
            let item_id = id_of(&child["id"])
                .or_else(|| id_of(&child["pk"]))
                .unwrap_or_else(|| index.to_string());
            ig_item(child, Some(item_id), out);
        }
    } else {
        ig_item(item, None, out);
    }
}

fn ig_item(item: &Value, item_id: Option<String>, out: &mut ParsedPayload) {
    let images = item["image_versions2"]["candidates"].as_array();
    let best_image = images.and_then(|list| list.first()).and_then(|img| str_of(&img["url"]));
    out.set_thumbnail(best_image);

    if let Some(versions) = item["video_versions"].as_array().filter(|v| !v.is_empty()) {
        let has_audio = item["has_audio"].as_bool();
        for version in versions {
            let Some(url) = str_of(&version["url"]) else {
                continue;
            };
            let mut candidate = Candidate::new(MediaKind::Video, &url)
                .with_dimensions(u32_of(&version["width"]), u32_of(&version["height"]))
                .with_item(item_id.clone());
            candidate.has_audio = has_audio;
            candidate.progressive = Some(true);
            out.push(candidate);
        }
        return;
    }

    for image in images.into_iter().flatten() {
        if let Some(url) = str_of(&image["url"]) {
            out.push(
                Candidate::new(MediaKind::Image, &url)
                    .with_dimensions(u32_of(&image["width"]), u32_of(&image["height"]))
                    .with_item(item_id.clone()),
            );
        }
    }
}

// ---------------------------------------------------------------------------
// Instagram (web GraphQL shortcode media)
// ---------------------------------------------------------------------------

fn graph_media(value: &Value) -> Option<&Value> {
    find_key(value, "xdt_shortcode_media").or_else(|| find_key(value, "shortcode_media"))
}

fn is_graph_sidecar(value: &Value) -> bool {
    graph_media(value).map_or(false, |m| {
        non_empty_array(&m["edge_sidecar_to_children"]["edges"])
    })
}

fn is_graph_media(value: &Value) -> bool {
    graph_media(value).map_or(false, |m| m["display_url"].is_string() || m["video_url"].is_string())
}

fn extract_graph_media(value: &Value, out: &mut ParsedPayload) {
    let Some(media) = graph_media(value) else {
        return;
    };

    out.set_title(str_of(&media["edge_media_to_caption"]["edges"][0]["node"]["text"]));
    out.set_author(str_of(&media["owner"]["username"]));
    out.set_thumbnail(str_of(&media["display_url"]));

    match media["edge_sidecar_to_children"]["edges"].as_array() {
        Some(edges) if !edges.is_empty() => {
            for (index, edge) in edges.iter().enumerate() {
                let node = &edge["node"];
                let item_id = id_of(&node["shortcode"])
                    .or_else(|| id_of(&node["id"]))
                    .unwrap_or_else(|| index.to_string());
                graph_node(node, Some(item_id), out);
            }
        }
        _ => graph_node(media, None, out),
    }
}

fn graph_node(node: &Value, item_id: Option<String>, out: &mut ParsedPayload) {
    let width = u32_of(&node["dimensions"]["width"]);
    let height = u32_of(&node["dimensions"]["height"]);

    if node["is_video"].as_bool() == Some(true) {
        if let Some(url) = str_of(&node["video_url"]) {
            let mut candidate = Candidate::new(MediaKind::Video, &url)
                .with_dimensions(width, height)
                .with_item(item_id);
            candidate.has_audio = node["has_audio"].as_bool();
            candidate.progressive = Some(true);
            out.push(candidate);
        }
        return;
    }

    match node["display_resources"].as_array() {
        Some(resources) if !resources.is_empty() => {
            for resource in resources {
                if let Some(url) = str_of(&resource["src"]) {
                    out.push(
                        Candidate::new(MediaKind::Image, &url)
                            .with_dimensions(
                                u32_of(&resource["config_width"]),
                                u32_of(&resource["config_height"]),
                            )
                            .with_item(item_id.clone()),
                    );
                }
            }
        }
        _ => {
            if let Some(url) = str_of(&node["display_url"]) {
                out.push(
                    Candidate::new(MediaKind::Image, &url)
                        .with_dimensions(width, height)
                        .with_item(item_id),
                );
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Threads (same item layout as Instagram v1)
// ---------------------------------------------------------------------------

fn threads_post(value: &Value) -> Option<&Value> {
    find_key(value, "thread_items")
        .and_then(|items| items.get(0))
        .map(|item| &item["post"])
        .filter(|post| post.is_object())
}

fn is_threads_carousel(value: &Value) -> bool {
    threads_post(value).map_or(false, |p| non_empty_array(&p["carousel_media"]))
}

fn is_threads_media(value: &Value) -> bool {
    threads_post(value).map_or(false, |p| {
        non_empty_array(&p["video_versions"]) || p["image_versions2"]["candidates"].is_array()
    })
}

fn extract_threads_post(value: &Value, out: &mut ParsedPayload) {
    if let Some(post) = threads_post(value) {
        ig_post(post, out);
    }
}

// ---------------------------------------------------------------------------
// TikTok
// ---------------------------------------------------------------------------

fn tiktok_item(value: &Value) -> Option<&Value> {
    find_key(value, "itemStruct")
}

fn is_tiktok_photo(value: &Value) -> bool {
    tiktok_item(value).map_or(false, |item| non_empty_array(&item["imagePost"]["images"]))
}

fn is_tiktok_item(value: &Value) -> bool {
    tiktok_item(value).map_or(false, |item| item["video"].is_object())
}

fn tiktok_meta(item: &Value, out: &mut ParsedPayload) {
    out.set_title(str_of(&item["desc"]));
    out.set_author(str_of(&item["author"]["uniqueId"]).or_else(|| str_of(&item["author"])));
    out.set_thumbnail(str_of(&item["video"]["cover"]).or_else(|| str_of(&item["video"]["originCover"])));
}

fn tiktok_music(music: &Value, out: &mut ParsedPayload) {
    if let Some(url) = str_of(&music["playUrl"]).or_else(|| str_of(&music["play_url"]["url_list"][0])) {
        out.push(Candidate::new(MediaKind::Audio, &url));
    }
}

fn extract_tiktok_photo(value: &Value, out: &mut ParsedPayload) {
    let Some(item) = tiktok_item(value) else {
        return;
    };
    tiktok_meta(item, out);
    out.set_thumbnail(str_of(&item["imagePost"]["cover"]["imageURL"]["urlList"][0]));

    for (index, image) in item["imagePost"]["images"].as_array().into_iter().flatten().enumerate() {
        if let Some(url) = str_of(&image["imageURL"]["urlList"][0]) {
            out.push(
                Candidate::new(MediaKind::Image, &url)
                    .with_dimensions(u32_of(&image["imageWidth"]), u32_of(&image["imageHeight"]))
                    .with_item(Some(index.to_string())),
            );
        }
    }
    tiktok_music(&item["music"], out);
}

fn extract_tiktok_item(value: &Value, out: &mut ParsedPayload) {
    let Some(item) = tiktok_item(value) else {
        return;
    };
    tiktok_meta(item, out);
    let video = &item["video"];
    let width = u32_of(&video["width"]);
    let height = u32_of(&video["height"]);

    for info in video["bitrateInfo"].as_array().into_iter().flatten() {
        let play = &info["PlayAddr"];
        let Some(url) = str_of(&play["UrlList"][0]) else {
            continue;
        };
        let mut candidate = Candidate::new(MediaKind::Video, &url).with_dimensions(
            u32_of(&play["Width"]).or(width),
            u32_of(&play["Height"]).or(height),
        );
        candidate.filesize = u64_of(&play["DataSize"]);
        candidate.bitrate = u64_of(&info["Bitrate"]);
        candidate.hint = str_of(&info["GearName"]);
        candidate.has_audio = Some(true);
        candidate.progressive = Some(true);
        out.push(candidate);
    }

    if let Some(url) = str_of(&video["playAddr"]) {
        let mut candidate = Candidate::new(MediaKind::Video, &url).with_dimensions(width, height);
        candidate.has_audio = Some(true);
        candidate.progressive = Some(true);
        candidate.bitrate = u64_of(&video["bitrate"]);
        out.push(candidate);
    }

    if let Some(url) = str_of(&video["downloadAddr"]) {
        let mut candidate = Candidate::new(MediaKind::Video, &url).with_dimensions(width, height);
        candidate.has_audio = Some(true);
        candidate.progressive = Some(true);
        candidate.watermarked = true;
        out.push(candidate);
    }

    tiktok_music(&item["music"], out);
}

fn tiktok_aweme(value: &Value) -> Option<&Value> {
    find_key(value, "aweme_detail").or_else(|| value["aweme_list"].get(0))
}

fn is_tiktok_aweme(value: &Value) -> bool {
    tiktok_aweme(value).map_or(false, |a| a["video"].is_object())
}

fn extract_tiktok_aweme(value: &Value, out: &mut ParsedPayload) {
    let Some(aweme) = tiktok_aweme(value) else {
        return;
    };
    out.set_title(str_of(&aweme["desc"]));
    out.set_author(str_of(&aweme["author"]["unique_id"]));
    out.set_thumbnail(str_of(&aweme["video"]["cover"]["url_list"][0]));

    let video = &aweme["video"];
    for rate in video["bit_rate"].as_array().into_iter().flatten() {
        let play = &rate["play_addr"];
        let Some(url) = str_of(&play["url_list"][0]) else {
            continue;
        };
        let mut candidate = Candidate::new(MediaKind::Video, &url)
            .with_dimensions(u32_of(&play["width"]), u32_of(&play["height"]));
        candidate.filesize = u64_of(&play["data_size"]);
        candidate.bitrate = u64_of(&rate["bit_rate"]);
        candidate.hint = str_of(&rate["gear_name"]);
        candidate.has_audio = Some(true);
        candidate.progressive = Some(true);
        out.push(candidate);
    }

    let play = &video["play_addr"];
    if let Some(url) = str_of(&play["url_list"][0]) {
        let mut candidate = Candidate::new(MediaKind::Video, &url)
            .with_dimensions(u32_of(&play["width"]), u32_of(&play["height"]));
        candidate.has_audio = Some(true);
        candidate.progressive = Some(true);
        out.push(candidate);
    }

    let download = &video["download_addr"];
    if let Some(url) = str_of(&download["url_list"][0]) {
        let mut candidate = Candidate::new(MediaKind::Video, &url)
            .with_dimensions(u32_of(&download["width"]), u32_of(&download["height"]));
        candidate.has_audio = Some(true);
        candidate.watermarked = true;
        out.push(candidate);
    }

    tiktok_music(&aweme["music"], out);
}

// ---------------------------------------------------------------------------
// Twitter / X
// ---------------------------------------------------------------------------

lazy_static! {
    static ref TWIMG_DIMENSIONS_RE: Regex = Regex::new(r"/(\d{2,4})x(\d{2,4})/").unwrap();
}

fn is_twitter_syndication(value: &Value) -> bool {
    non_empty_array(&value["mediaDetails"])
}

fn is_twitter_entities(value: &Value) -> bool {
    find_key(value, "extended_entities").map_or(false, |e| non_empty_array(&e["media"]))
}

fn extract_twitter_syndication(value: &Value, out: &mut ParsedPayload) {
    out.set_title(str_of(&value["text"]));
    out.set_author(str_of(&value["user"]["screen_name"]));
    if let Some(media) = value["mediaDetails"].as_array() {
        twitter_media(media, out);
    }
}

fn extract_twitter_entities(value: &Value, out: &mut ParsedPayload) {
    let Some(entities) = find_key(value, "extended_entities") else {
        return;
    };
    out.set_title(find_key(value, "full_text").and_then(str_of));
    out.set_author(find_key(value, "screen_name").and_then(str_of));
    if let Some(media) = entities["media"].as_array() {
        twitter_media(media, out);
    }
}

fn twitter_media(media: &[Value], out: &mut ParsedPayload) {
    for (index, entry) in media.iter().enumerate() {
        let item_id = id_of(&entry["id_str"]).unwrap_or_else(|| index.to_string());
        let preview = str_of(&entry["media_url_https"]);
        out.set_thumbnail(preview.clone());

        match entry["type"].as_str() {
            Some("video") | Some("animated_gif") => {
                let is_gif = entry["type"].as_str() == Some("animated_gif");
                for variant in entry["video_info"]["variants"].as_array().into_iter().flatten() {
                    if variant["content_type"].as_str() != Some("video/mp4") {
                        continue;
                    }
                    let Some(url) = str_of(&variant["url"]) else {
                        continue;
                    };
                    let (width, height) = twimg_dimensions(&url);
                    let mut candidate = Candidate::new(MediaKind::Video, &url)
                        .with_dimensions(width, height)
                        .with_item(Some(item_id.clone()));
                    candidate.bitrate = u64_of(&variant["bitrate"]);
                    candidate.progressive = Some(true);
                    if !is_gif {
                        candidate.has_audio = Some(true);
                    }
                    out.push(candidate);
                }
            }
            _ => {
                if let Some(url) = preview {
                    let url = if url.contains('?') {
                        url
                    } else {
                        format!("{}?name=orig", url)
                    };
                    out.push(
                        Candidate::new(MediaKind::Image, &url)
                            .with_dimensions(
                                u32_of(&entry["original_info"]["width"]),
                                u32_of(&entry["original_info"]["height"]),
                            )
                            .with_item(Some(item_id.clone()))
                            .with_hint("original"),
                    );
                }
            }
        }
    }
}

fn twimg_dimensions(url: &str) -> (Option<u32>, Option<u32>) {
    TWIMG_DIMENSIONS_RE
        .captures(url)
        .map(|caps| (caps[1].parse().ok(), caps[2].parse().ok()))
        .unwrap_or((None, None))
}

// ---------------------------------------------------------------------------
// Facebook
// ---------------------------------------------------------------------------

const FACEBOOK_HD_KEYS: &[&str] = &["browser_native_hd_url", "playable_url_quality_hd", "hd_src"];
const FACEBOOK_SD_KEYS: &[&str] = &["browser_native_sd_url", "playable_url", "sd_src"];

fn is_facebook_playable(value: &Value) -> bool {
    FACEBOOK_HD_KEYS
        .iter()
        .chain(FACEBOOK_SD_KEYS)
        .any(|key| find_key(value, key).map_or(false, Value::is_string))
}

fn extract_facebook_playable(value: &Value, out: &mut ParsedPayload) {
    for (keys, hint) in [(FACEBOOK_HD_KEYS, "hd"), (FACEBOOK_SD_KEYS, "sd")] {
        for key in keys {
            if let Some(url) = find_key(value, key).and_then(str_of) {
                let mut candidate = Candidate::new(MediaKind::Video, &url).with_hint(hint);
                candidate.progressive = Some(true);
                candidate.has_audio = Some(true);
                out.push(candidate);
            }
        }
    }
    out.set_thumbnail(find_key(value, "preferred_thumbnail").and_then(|t| str_of(&t["image"]["uri"])));
    out.set_author(find_key(value, "owner").and_then(|o| str_of(&o["name"])));
}

// ---------------------------------------------------------------------------
// yt-dlp JSON (-J output)
// ---------------------------------------------------------------------------

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "webp", "heic"];

fn is_ytdlp_playlist(value: &Value) -> bool {
    non_empty_array(&value["entries"])
}

fn is_ytdlp_single(value: &Value) -> bool {
    value["formats"].is_array() || (value["url"].is_string() && value["ext"].is_string())
}

fn extract_ytdlp_playlist(value: &Value, out: &mut ParsedPayload) {
    ytdlp_meta(value, out);
    for (index, entry) in value["entries"].as_array().into_iter().flatten().enumerate() {
        let item_id = id_of(&entry["id"]).unwrap_or_else(|| index.to_string());
        ytdlp_meta(entry, out);
        ytdlp_formats(entry, Some(item_id), out);
    }
}

fn extract_ytdlp_single(value: &Value, out: &mut ParsedPayload) {
    ytdlp_meta(value, out);
    ytdlp_formats(value, None, out);
}

fn ytdlp_meta(value: &Value, out: &mut ParsedPayload) {
    out.set_title(str_of(&value["title"]).or_else(|| str_of(&value["description"])));
    out.set_author(
        str_of(&value["uploader"])
            .or_else(|| str_of(&value["channel"]))
            .or_else(|| str_of(&value["uploader_id"])),
    );
    out.set_thumbnail(str_of(&value["thumbnail"]));
}

fn ytdlp_formats(value: &Value, item_id: Option<String>, out: &mut ParsedPayload) {
    let before = out.candidates.len();
    for format in value["formats"].as_array().into_iter().flatten() {
        if let Some(candidate) = ytdlp_candidate(format, item_id.clone()) {
            out.push(candidate);
        }
    }
    // Single-file results (images, some GIFs) carry the URL on the root
    if out.candidates.len() == before {
        if let Some(candidate) = ytdlp_candidate(value, item_id) {
            out.push(candidate);
        }
    }
}

fn ytdlp_candidate(format: &Value, item_id: Option<String>) -> Option<Candidate> {
    let url = str_of(&format["url"])?;
    let ext = format["ext"].as_str().unwrap_or("").to_lowercase();
    let note = format["format_note"].as_str().unwrap_or("").to_lowercase();
    if ext == "mhtml" || note.contains("storyboard") {
        return None;
    }

    let vcodec = format["vcodec"].as_str();
    let acodec = format["acodec"].as_str();
    let kind = if IMAGE_EXTENSIONS.contains(&ext.as_str()) {
        MediaKind::Image
    } else if vcodec == Some("none") && acodec.map_or(false, |a| a != "none") {
        MediaKind::Audio
    } else {
        MediaKind::Video
    };

    let mut candidate = Candidate::new(kind, &url)
        .with_dimensions(u32_of(&format["width"]), u32_of(&format["height"]))
        .with_item(item_id);
    candidate.filesize = u64_of(&format["filesize"]).or_else(|| u64_of(&format["filesize_approx"]));
    candidate.bitrate = format["tbr"].as_f64().map(|kbps| (kbps * 1000.0) as u64);
    candidate.hint = str_of(&format["format_note"])
        .or_else(|| str_of(&format["resolution"]))
        .or_else(|| str_of(&format["format_id"]));

    if kind == MediaKind::Video {
        candidate.has_audio = acodec.map(|a| a != "none");
        candidate.progressive = match format["protocol"].as_str() {
            Some("https") | Some("http") => Some(true),
            Some(p) if p.contains("m3u8") || p.contains("dash") => Some(false),
            _ => None,
        };
    }
    Some(candidate)
}

// ---------------------------------------------------------------------------
// Markup
// ---------------------------------------------------------------------------

lazy_static! {
    static ref JSON_SCRIPT_RE: Regex =
        Regex::new(r#"(?is)<script[^>]*type\s*=\s*["']application/json["'][^>]*>(.*?)</script>"#).unwrap();
    static ref LD_JSON_RE: Regex =
        Regex::new(r#"(?is)<script[^>]*type\s*=\s*["']application/ld\+json["'][^>]*>(.*?)</script>"#).unwrap();
    static ref SHARED_DATA_RE: Regex =
        Regex::new(r"(?s)window\._sharedData\s*=\s*(\{.*?\});\s*</script>").unwrap();
    static ref ESCAPED_URL_RE: Regex = Regex::new(
        r#""(video_url|playable_url_quality_hd|playable_url|browser_native_hd_url|browser_native_sd_url|playAddr|downloadAddr|contentUrl)"\s*:\s*"(https?:[^"]+)""#
    )
    .unwrap();
    static ref META_TAG_RE: Regex = Regex::new(r"(?is)<meta\s[^>]*>").unwrap();
    static ref META_NAME_RE: Regex =
        Regex::new(r#"(?i)(?:property|name)\s*=\s*["']([^"']+)["']"#).unwrap();
    static ref META_CONTENT_RE: Regex =
        Regex::new(r#"(?is)content\s*=\s*(?:"([^"]*)"|'([^']*)')"#).unwrap();
}

fn extract_embedded_json(html: &str, out: &mut ParsedPayload) {
    let blobs = JSON_SCRIPT_RE
        .captures_iter(html)
        .chain(SHARED_DATA_RE.captures_iter(html))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim().to_string()));

    for blob in blobs {
        let Ok(value) = serde_json::from_str::<Value>(&blob) else {
            continue;
        };
        if let Ok(payload) = match_json(&value) {
            out.candidates = payload.candidates;
            out.shape = payload.shape;
            out.set_title(payload.title);
            out.set_author(payload.author);
            out.set_thumbnail(payload.thumbnail);
            return;
        }
    }
}

fn extract_json_ld(html: &str, out: &mut ParsedPayload) {
    for caps in LD_JSON_RE.captures_iter(html) {
        let Some(raw) = caps.get(1) else {
            continue;
        };
        let Ok(value) = serde_json::from_str::<Value>(raw.as_str().trim()) else {
            continue;
        };
        let objects: Vec<&Value> = match &value {
            Value::Array(list) => list.iter().collect(),
            other => vec![other],
        };
        for object in objects {
            let kind = match object["@type"].as_str() {
                Some("VideoObject") => MediaKind::Video,
                Some("ImageObject") => MediaKind::Image,
                _ => continue,
            };
            if let Some(url) = str_of(&object["contentUrl"]) {
                out.push(
                    Candidate::new(kind, &url)
                        .with_dimensions(u32_of(&object["width"]), u32_of(&object["height"])),
                );
            }
            out.set_title(str_of(&object["name"]));
            out.set_author(str_of(&object["author"]["name"]).or_else(|| str_of(&object["creator"]["name"])));
            out.set_thumbnail(
                str_of(&object["thumbnailUrl"]).or_else(|| str_of(&object["thumbnailUrl"][0])),
            );
        }
    }
}

fn extract_escaped_urls(html: &str, out: &mut ParsedPayload) {
    let mut seen = std::collections::HashSet::new();
    for caps in ESCAPED_URL_RE.captures_iter(html) {
        let key = &caps[1];
        let url = unescape_json_url(&caps[2]);
        if !seen.insert(url.clone()) {
            continue;
        }
        let mut candidate = Candidate::new(MediaKind::Video, &url);
        if key.contains("hd") {
            candidate.hint = Some("hd".to_string());
        } else if key.contains("sd") {
            candidate.hint = Some("sd".to_string());
        }
        candidate.watermarked = key == "downloadAddr";
        out.push(candidate);
    }
}

fn extract_opengraph(html: &str, out: &mut ParsedPayload) {
    let meta = read_meta_tags(html);
    let get = |key: &str| meta.get(key).cloned();

    out.set_title(get("og:title"));
    out.set_thumbnail(get("og:image"));

    let video = get("og:video:secure_url")
        .or_else(|| get("og:video:url"))
        .or_else(|| get("og:video"))
        .or_else(|| get("twitter:player:stream"));
    if let Some(url) = video {
        let width = get("og:video:width").and_then(|w| w.parse().ok());
        let height = get("og:video:height").and_then(|h| h.parse().ok());
        out.push(Candidate::new(MediaKind::Video, &url).with_dimensions(width, height));
        return;
    }

    // A video page whose stream we could not find must not degrade to its cover image
    let is_video_page = get("og:type").map_or(false, |t| t.contains("video"));
    if is_video_page {
        return;
    }
    if let Some(url) = get("og:image") {
        let width = get("og:image:width").and_then(|w| w.parse().ok());
        let height = get("og:image:height").and_then(|h| h.parse().ok());
        out.push(Candidate::new(MediaKind::Image, &url).with_dimensions(width, height));
    }
}

/// Collect `<meta property|name=... content=...>` pairs (first wins)
pub fn read_meta_tags(html: &str) -> std::collections::HashMap<String, String> {
    let mut meta = std::collections::HashMap::new();
    for tag in META_TAG_RE.find_iter(html) {
        let tag = tag.as_str();
        let Some(name) = META_NAME_RE.captures(tag).map(|c| c[1].to_lowercase()) else {
            continue;
        };
        let Some(content) = META_CONTENT_RE
            .captures(tag)
            .and_then(|c| c.get(1).or_else(|| c.get(2)))
            .map(|m| decode_entities(m.as_str()))
        else {
            continue;
        };
        if !content.is_empty() {
            meta.entry(name).or_insert(content);
        }
    }
    meta
}

/// Undo JSON string escaping on a URL literal found in markup
pub fn unescape_json_url(raw: &str) -> String {
    raw.replace("\\/", "/")
        .replace("\\u0026", "&")
        .replace("\\u002F", "/")
        .replace("\\u002f", "/")
        .replace("\\u003D", "=")
        .replace("\\u003d", "=")
        .replace("&amp;", "&")
}

fn decode_entities(raw: &str) -> String {
    raw.replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
}
