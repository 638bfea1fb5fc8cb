// Candidate scoring
//
// The score only breaks ties between candidates of the same quality label;
// tiers come from `quality`.

use super::patterns::Candidate;
use crate::resolver::models::MediaKind;

const CDN_BONUS: i32 = 20;
const CDN_TRANSCODE_PENALTY: i32 = 10;
const PROGRESSIVE_BONUS: i32 = 25;
const FRAGMENTED_PENALTY: i32 = 15;
const MUTED_PENALTY: i32 = 40;
const WATERMARK_PENALTY: i32 = 30;
const BITRATE_CAP: i32 = 50;

/// Hosts that serve original uploads rather than transcodes or proxies
const PRIMARY_CDN_HOSTS: &[&str] = &[
    "cdninstagram.com",
    "fbcdn.net",
    "video.twimg.com",
    "pbs.twimg.com",
    "tiktokcdn.com",
    "tiktokcdn-us.com",
    "tiktokv.com",
    "googlevideo.com",
];

/// Compute the priority score for a candidate
pub fn score(candidate: &Candidate) -> i32 {
    let mut score = cdn_score(&candidate.url);

    match candidate.progressive {
        Some(true) => score += PROGRESSIVE_BONUS,
        Some(false) => score -= FRAGMENTED_PENALTY,
        None => {
            if looks_fragmented(&candidate.url) {
                score -= FRAGMENTED_PENALTY;
            }
        }
    }

    if candidate.kind == MediaKind::Video && candidate.has_audio == Some(false) {
        score -= MUTED_PENALTY;
    }

    if candidate.watermarked {
        score -= WATERMARK_PENALTY;
    }

    if let Some(bitrate) = candidate.bitrate {
        // One point per 100 kbps, capped so bitrate never outweighs delivery mode
        let kbps = (bitrate / 1000).min(i32::MAX as u64) as i32;
        score += (kbps / 100).min(BITRATE_CAP);
    }

    score
}

/// CDN-endpoint quality heuristic
pub fn cdn_score(url: &str) -> i32 {
    let host = url::Url::parse(url)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_lowercase()))
        .unwrap_or_default();

    let mut score = 0;
    if PRIMARY_CDN_HOSTS
        .iter()
        .any(|cdn| host == *cdn || host.ends_with(&format!(".{}", cdn)))
    {
        score += CDN_BONUS;
    }

    let lower = url.to_lowercase();
    // Instagram/Facebook encode downscaled variants in the path or the efg blob
    if lower.contains("/s150x150/") || lower.contains("/s320x320/") || lower.contains("_nc_cat=0") {
        score -= CDN_TRANSCODE_PENALTY;
    }
    score
}

/// DASH segments, HLS playlists and byte-range fragments
pub fn looks_fragmented(url: &str) -> bool {
    let lower = url.to_lowercase();
    lower.contains(".m3u8")
        || lower.contains(".mpd")
        || lower.contains(".m4s")
        || lower.contains("bytestart=")
        || lower.contains("/dash/")
}
