// FormatSelector - turns raw candidates into a FormatSet
//
// Handles:
// - Quality tier and label assignment
// - Priority scoring
// - Dedup per (quality label, kind, item)
// - One best format per item for multi-item content
// - Final ordering (tier descending, audio last)

use std::cmp::Reverse;
use std::collections::{HashMap, HashSet};

use super::patterns::Candidate;
use super::quality::{self, QualityTier};
use super::scoring;
use crate::resolver::models::{FormatSet, MediaFormat, MediaKind};

/// Format selector with tie-break rules
pub struct FormatSelector;

impl FormatSelector {
    /// Normalize candidates into a deduplicated, sorted set
    pub fn normalize(candidates: Vec<Candidate>) -> FormatSet {
        let formats: Vec<MediaFormat> = candidates.into_iter().map(Self::to_format).collect();
        let formats = Self::dedup(formats);

        let mut formats = if Self::is_multi_item(&formats) {
            Self::best_per_item(formats)
        } else {
            formats
        };

        Self::sort(&mut formats);
        FormatSet::from_sorted(formats)
    }

    fn to_format(candidate: Candidate) -> MediaFormat {
        let tier = quality::classify(candidate.width, candidate.height, candidate.hint.as_deref());
        let priority_score = scoring::score(&candidate);
        MediaFormat {
            quality_label: quality::label_for(candidate.kind, tier),
            quality: tier,
            kind: candidate.kind,
            url: candidate.url,
            filesize: candidate.filesize,
            width: candidate.width,
            height: candidate.height,
            has_muxed_audio: candidate.has_audio,
            item_id: candidate.item_id,
            priority_score,
        }
    }

    /// Keep one format per (label, kind, item): highest score, then largest file
    fn dedup(formats: Vec<MediaFormat>) -> Vec<MediaFormat> {
        let mut order: Vec<(String, MediaKind, Option<String>)> = Vec::new();
        let mut best: HashMap<(String, MediaKind, Option<String>), MediaFormat> = HashMap::new();

        for format in formats {
            let key = (format.quality_label.clone(), format.kind, format.item_id.clone());
            let replace = match best.get(&key) {
                Some(current) => Self::dedup_rank(&format) > Self::dedup_rank(current),
                None => {
                    order.push(key.clone());
                    true
                }
            };
            if replace {
                best.insert(key, format);
            }
        }

        order.into_iter().filter_map(|key| best.remove(&key)).collect()
    }

    fn dedup_rank(format: &MediaFormat) -> (i32, u64) {
        (format.priority_score, format.filesize.unwrap_or(0))
    }

    fn is_multi_item(formats: &[MediaFormat]) -> bool {
        let items: HashSet<&str> = formats.iter().filter_map(|f| f.item_id.as_deref()).collect();
        items.len() > 1
    }

    /// Keep only the strongest format of each item. Formats without an item
    /// (post-level audio tracks) are kept as they are.
    fn best_per_item(formats: Vec<MediaFormat>) -> Vec<MediaFormat> {
        let mut order: Vec<String> = Vec::new();
        let mut best: HashMap<String, MediaFormat> = HashMap::new();
        let mut loose = Vec::new();

        for format in formats {
            let Some(item) = format.item_id.clone() else {
                loose.push(format);
                continue;
            };
            let replace = match best.get(&item) {
                Some(current) => Self::item_rank(&format) > Self::item_rank(current),
                None => {
                    order.push(item.clone());
                    true
                }
            };
            if replace {
                best.insert(item, format);
            }
        }

        let mut kept: Vec<MediaFormat> = order.into_iter().filter_map(|item| best.remove(&item)).collect();
        kept.extend(loose);
        kept
    }

    /// Video beats image beats audio within one item, then quality
    fn item_rank(format: &MediaFormat) -> (u8, QualityTier, i32, u64) {
        let kind_rank = match format.kind {
            MediaKind::Video => 2,
            MediaKind::Image => 1,
            MediaKind::Audio => 0,
        };
        (kind_rank, format.quality, format.priority_score, format.filesize.unwrap_or(0))
    }

    /// Stable sort so carousel order survives among equal tiers
    fn sort(formats: &mut [MediaFormat]) {
        formats.sort_by_key(|f| {
            (
                f.kind == MediaKind::Audio,
                Reverse(f.quality),
                Reverse(f.priority_score),
                Reverse(f.filesize.unwrap_or(0)),
            )
        });
    }

    /// Pick a format by quality label, or the best non-audio format for "best"
    pub fn pick<'a>(formats: &'a FormatSet, quality: &str) -> Option<&'a MediaFormat> {
        match quality {
            "best" => formats.iter().find(|f| f.kind != MediaKind::Audio),
            "audio" => formats.iter().find(|f| f.kind == MediaKind::Audio),
            label => formats.iter().find(|f| f.quality_label.eq_ignore_ascii_case(label)),
        }
    }
}
