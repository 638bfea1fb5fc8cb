// Quality tiers
//
// Raw sources describe quality in many ways: pixel dimensions, "1080p"
// labels, "hd"/"sd" flags, TikTok gear names. Everything is reduced to one
// ranked enum here so scoring and sorting never look at source strings.

use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::resolver::models::MediaKind;

/// Ranked quality tier, lowest first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QualityTier {
    #[default]
    Unknown,
    Low,
    Standard,
    High,
    Top,
}

impl QualityTier {
    /// Display label used as the dedup key
    pub fn label(&self) -> &'static str {
        match self {
            Self::Top => "1080p",
            Self::High => "720p",
            Self::Standard => "sd",
            Self::Low => "low",
            Self::Unknown => "unknown",
        }
    }
}

lazy_static! {
    static ref DIMENSIONS_RE: Regex = Regex::new(r"(\d{3,4})\s*[x×]\s*(\d{3,4})").unwrap();
    static ref HEIGHT_RE: Regex = Regex::new(r"(?i)(\d{3,4})\s*p\b").unwrap();
}

/// Tier from pixel dimensions. The short side decides so portrait and
/// landscape videos of the same resolution rank equally.
pub fn classify_dimensions(width: Option<u32>, height: Option<u32>) -> QualityTier {
    let side = match (width, height) {
        (Some(w), Some(h)) if w > 0 && h > 0 => w.min(h),
        (Some(w), None) if w > 0 => w,
        (None, Some(h)) if h > 0 => h,
        (Some(w), Some(0)) if w > 0 => w,
        (Some(0), Some(h)) if h > 0 => h,
        _ => return QualityTier::Unknown,
    };
    tier_for_side(side)
}

fn tier_for_side(side: u32) -> QualityTier {
    if side >= 1080 {
        QualityTier::Top
    } else if side >= 720 {
        QualityTier::High
    } else {
        QualityTier::Standard
    }
}

/// Tier from a textual hint when no dimensions are available
pub fn classify_hint(hint: &str) -> QualityTier {
    let lower = hint.to_lowercase();

    if let Some(caps) = DIMENSIONS_RE.captures(&lower) {
        let w = caps[1].parse::<u32>().ok();
        let h = caps[2].parse::<u32>().ok();
        return classify_dimensions(w, h);
    }
    if let Some(caps) = HEIGHT_RE.captures(&lower) {
        if let Ok(h) = caps[1].parse::<u32>() {
            return tier_for_side(h);
        }
    }

    // Order matters: "fhd" contains "hd"
    if lower.contains("uhd") || lower.contains("fhd") || lower.contains("full hd") || lower.contains("original") {
        QualityTier::Top
    } else if lower.contains("hd") || lower.contains("high") {
        QualityTier::High
    } else if lower.contains("sd") || lower.contains("normal") || lower.contains("medium") {
        QualityTier::Standard
    } else if lower.contains("low") || lower.contains("lq") || lower.contains("small") || lower.contains("thumb") {
        QualityTier::Low
    } else {
        QualityTier::Unknown
    }
}

/// Classify from dimensions first, then from the hint
pub fn classify(width: Option<u32>, height: Option<u32>, hint: Option<&str>) -> QualityTier {
    match classify_dimensions(width, height) {
        QualityTier::Unknown => hint.map(classify_hint).unwrap_or_default(),
        tier => tier,
    }
}

/// Label a format of the given kind and tier
pub fn label_for(kind: MediaKind, tier: QualityTier) -> String {
    match kind {
        MediaKind::Audio => "audio".to_string(),
        _ => tier.label().to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_thresholds() {
        assert_eq!(classify_dimensions(Some(1920), Some(1080)), QualityTier::Top);
        assert_eq!(classify_dimensions(Some(1080), Some(1920)), QualityTier::Top);
        assert_eq!(classify_dimensions(Some(720), Some(1280)), QualityTier::High);
        assert_eq!(classify_dimensions(Some(640), Some(360)), QualityTier::Standard);
        assert_eq!(classify_dimensions(None, None), QualityTier::Unknown);
    }

    #[test]
    fn test_text_hints() {
        assert_eq!(classify_hint("1080p"), QualityTier::Top);
        assert_eq!(classify_hint("720x1280"), QualityTier::High);
        assert_eq!(classify_hint("HD"), QualityTier::High);
        assert_eq!(classify_hint("browser_native_sd_url"), QualityTier::Standard);
        assert_eq!(classify_hint("lowest"), QualityTier::Low);
        assert_eq!(classify_hint("mystery"), QualityTier::Unknown);
    }

    #[test]
    fn test_dimensions_win_over_hint() {
        assert_eq!(classify(Some(1280), Some(720), Some("sd")), QualityTier::High);
        assert_eq!(classify(None, None, Some("hd")), QualityTier::High);
    }

    #[test]
    fn test_tier_ordering() {
        assert!(QualityTier::Top > QualityTier::High);
        assert!(QualityTier::Standard > QualityTier::Low);
        assert!(QualityTier::Low > QualityTier::Unknown);
    }

    #[test]
    fn test_audio_label() {
        assert_eq!(label_for(MediaKind::Audio, QualityTier::High), "audio");
        assert_eq!(label_for(MediaKind::Video, QualityTier::Top), "1080p");
    }
}
