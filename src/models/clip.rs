//! Clip models: discovered video assets and their user-authored state.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use super::quality::{QualityTier, VideoFormat};

/// Unique identity of a clip: the site it was found on plus its site-native id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ClipKey {
    pub site: String,
    pub clip_id: String,
}

impl ClipKey {
    pub fn new(site: impl Into<String>, clip_id: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            clip_id: clip_id.into(),
        }
    }

    /// Key for sites without native ids, derived from the canonical URL.
    pub fn from_url_hash(site: impl Into<String>, canonical_url: &str) -> Self {
        Self::new(site, url_hash_id(canonical_url))
    }
}

impl std::fmt::Display for ClipKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.site, self.clip_id)
    }
}

/// First 16 hex chars of the SHA-256 of a URL.
pub fn url_hash_id(url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(url.as_bytes());
    let digest = hex::encode(hasher.finalize());
    digest[..16].to_string()
}

/// Download status of a clip as tracked on the clip row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DownloadStatus {
    #[default]
    None,
    Queued,
    Downloading,
    Done,
    Failed,
}

impl DownloadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::None => "",
            Self::Queued => "queued",
            Self::Downloading => "downloading",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "" | "none" => Some(Self::None),
            "queued" => Some(Self::Queued),
            "downloading" => Some(Self::Downloading),
            "done" => Some(Self::Done),
            "failed" | "error" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Canonical video URL of a clip together with its rank.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FormatUrl {
    pub url: String,
    pub tier: QualityTier,
    pub format: Option<VideoFormat>,
}

impl FormatUrl {
    pub fn new(url: impl Into<String>) -> Self {
        let url = url.into();
        let tier = QualityTier::from_url(&url);
        let format = VideoFormat::from_url(&url);
        Self { url, tier, format }
    }
}

/// Discovery-side view of a clip, produced by the crawler and handed to the
/// store for upsert. Empty strings mean "not extracted".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClipRecord {
    pub site: String,
    pub clip_id: String,
    pub source_url: String,
    pub title: String,
    pub creator: String,
    pub collection: String,
    pub tags: Vec<String>,
    pub resolution: String,
    pub duration: String,
    pub frame_rate: String,
    pub camera: String,
    pub thumbnail_url: String,
    pub video: Option<FormatUrl>,
    /// Every tier discovery saw for this clip, including discarded ones.
    #[serde(default)]
    pub seen_tiers: BTreeSet<QualityTier>,
}

impl ClipRecord {
    pub fn new(site: impl Into<String>, clip_id: impl Into<String>) -> Self {
        Self {
            site: site.into(),
            clip_id: clip_id.into(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> ClipKey {
        ClipKey::new(self.site.clone(), self.clip_id.clone())
    }

    /// Tier labels to record in the clip's `available_formats`.
    pub fn format_labels(&self) -> BTreeSet<String> {
        self.seen_tiers
            .iter()
            .chain(self.video.as_ref().map(|v| &v.tier))
            .filter(|t| **t != QualityTier::Unknown)
            .map(|t| t.label().to_string())
            .collect()
    }

    /// Fill empty fields of `self` from `other`, never overwriting.
    pub fn fill_from(&mut self, other: &ClipRecord) {
        fn fill(dst: &mut String, src: &str) {
            if dst.is_empty() && !src.is_empty() {
                *dst = src.to_string();
            }
        }
        fill(&mut self.source_url, &other.source_url);
        fill(&mut self.title, &other.title);
        fill(&mut self.creator, &other.creator);
        fill(&mut self.collection, &other.collection);
        fill(&mut self.resolution, &other.resolution);
        fill(&mut self.duration, &other.duration);
        fill(&mut self.frame_rate, &other.frame_rate);
        fill(&mut self.camera, &other.camera);
        fill(&mut self.thumbnail_url, &other.thumbnail_url);
        for tag in &other.tags {
            if !self.tags.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
                self.tags.push(tag.clone());
            }
        }
        if self.video.is_none() {
            self.video = other.video.clone();
        }
    }
}

/// A clip as persisted in the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Clip {
    pub id: i64,
    pub key: ClipKey,
    pub source_url: String,
    pub title: String,
    pub creator: String,
    pub collection: String,
    pub tags: Vec<String>,
    pub resolution: String,
    pub duration: String,
    pub frame_rate: String,
    pub camera: String,
    pub thumbnail_url: String,
    pub video_url: String,
    pub quality_tier: QualityTier,
    pub format: Option<VideoFormat>,
    /// Tier labels of every format URL seen for this clip.
    pub available_formats: BTreeSet<String>,
    pub found_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,

    // User-authored
    pub rating: u8,
    pub favorite: bool,
    pub notes: String,
    pub user_tags: Vec<String>,

    // Download state
    pub dl_status: DownloadStatus,
    pub local_path: Option<String>,
    pub thumb_path: Option<String>,
    pub dl_error: Option<String>,
    pub downloaded_at: Option<DateTime<Utc>>,
}

impl Clip {
    pub fn has_video(&self) -> bool {
        !self.video_url.is_empty()
    }

    pub fn canonical_format(&self) -> Option<FormatUrl> {
        if self.video_url.is_empty() {
            return None;
        }
        Some(FormatUrl {
            url: self.video_url.clone(),
            tier: self.quality_tier,
            format: self.format,
        })
    }
}

/// Split a comma/newline separated tag string into a unique, trimmed list.
pub fn parse_tags(raw: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for tag in raw.split([',', '\n', ';']) {
        let tag = tag.trim();
        if tag.is_empty() {
            continue;
        }
        if !out.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
            out.push(tag.to_string());
        }
    }
    out
}

/// Join tags for storage.
pub fn join_tags(tags: &[String]) -> String {
    tags.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_hash_id_is_stable() {
        let a = url_hash_id("https://example.com/v/1");
        let b = url_hash_id("https://example.com/v/1");
        assert_eq!(a, b);
        assert_eq!(a.len(), 16);
        assert_ne!(a, url_hash_id("https://example.com/v/2"));
    }

    #[test]
    fn test_fill_from_never_overwrites() {
        let mut a = ClipRecord::new("pexels", "1");
        a.title = "Ocean".to_string();
        let mut b = ClipRecord::new("pexels", "1");
        b.title = "Other".to_string();
        b.creator = "Jane".to_string();
        b.tags = vec!["sea".to_string()];
        a.fill_from(&b);
        assert_eq!(a.title, "Ocean");
        assert_eq!(a.creator, "Jane");
        assert_eq!(a.tags, vec!["sea".to_string()]);
    }

    #[test]
    fn test_parse_tags_dedups_case_insensitively() {
        assert_eq!(
            parse_tags("Sea, sea,\nwaves ; sunset,"),
            vec!["Sea".to_string(), "waves".to_string(), "sunset".to_string()]
        );
    }

    #[test]
    fn test_download_status_round_trip_legacy_error() {
        assert_eq!(DownloadStatus::from_str("error"), Some(DownloadStatus::Failed));
        assert_eq!(DownloadStatus::from_str(""), Some(DownloadStatus::None));
    }
}
