//! Quality tiers and container formats for discovered video URLs.

use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// `1920_1080_25fps` style token embedded in CDN file names.
static RESOLUTION_TOKEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d{3,4})_(\d{3,4})_(\d+)fps").expect("valid regex"));

/// `-uhd_`, `-hd_`, `-sd_` markers used by several CDNs.
static TIER_MARKER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)-(uhd|hd|sd)_").expect("valid regex"));

/// Ordinal rank used to select the canonical format URL of a clip.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum QualityTier {
    #[default]
    Unknown,
    Sd,
    Hd,
    Uhd,
}

impl QualityTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Sd => "sd",
            Self::Hd => "hd",
            Self::Uhd => "uhd",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_ascii_lowercase().as_str() {
            "unknown" => Some(Self::Unknown),
            "sd" => Some(Self::Sd),
            "hd" => Some(Self::Hd),
            "uhd" | "4k" => Some(Self::Uhd),
            _ => None,
        }
    }

    /// Short uppercase label for logs and the `available_formats` set.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Unknown => "?",
            Self::Sd => "SD",
            Self::Hd => "HD",
            Self::Uhd => "UHD",
        }
    }

    /// Tier implied by the longest edge of a frame.
    pub fn from_dimension(max_edge: u32) -> Self {
        if max_edge >= 2560 {
            Self::Uhd
        } else if max_edge >= 1280 {
            Self::Hd
        } else {
            Self::Sd
        }
    }

    /// Infer the tier of a video URL from resolution tokens, tier markers,
    /// and finally the container type.
    pub fn from_url(url: &str) -> Self {
        if let Some(res) = ResolutionHint::from_url(url) {
            return Self::from_dimension(res.width.max(res.height));
        }
        if let Some(caps) = TIER_MARKER.captures(url) {
            if let Some(tier) = Self::from_str(&caps[1]) {
                return tier;
            }
        }
        let lower = url.to_ascii_lowercase();
        if lower.contains("uhd") {
            return Self::Uhd;
        }
        if VideoFormat::from_url(url) == Some(VideoFormat::M3u8) {
            // Adaptive master playlists carry every rendition.
            return Self::Hd;
        }
        Self::Unknown
    }
}

impl std::fmt::Display for QualityTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Resolution and frame rate parsed from a CDN file name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionHint {
    pub width: u32,
    pub height: u32,
    pub fps: u32,
}

impl ResolutionHint {
    pub fn from_url(url: &str) -> Option<Self> {
        let caps = RESOLUTION_TOKEN.captures(url)?;
        Some(Self {
            width: caps[1].parse().ok()?,
            height: caps[2].parse().ok()?,
            fps: caps[3].parse().ok()?,
        })
    }

    /// `WIDTHxHEIGHT` as stored on clips.
    pub fn resolution(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

/// Container or manifest format of a video URL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VideoFormat {
    M3u8,
    M3u,
    Mpd,
    Mp4,
    Webm,
    Mov,
}

impl VideoFormat {
    pub const ALL: [VideoFormat; 6] = [
        Self::M3u8,
        Self::Mp4,
        Self::Webm,
        Self::Mpd,
        Self::M3u,
        Self::Mov,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::M3u8 => "m3u8",
            Self::M3u => "m3u",
            Self::Mpd => "mpd",
            Self::Mp4 => "mp4",
            Self::Webm => "webm",
            Self::Mov => "mov",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.trim_start_matches('.').to_ascii_lowercase().as_str() {
            "m3u8" => Some(Self::M3u8),
            "m3u" => Some(Self::M3u),
            "mpd" => Some(Self::Mpd),
            "mp4" => Some(Self::Mp4),
            "webm" => Some(Self::Webm),
            "mov" => Some(Self::Mov),
            _ => None,
        }
    }

    /// Detect the format from the extension of the URL path (query ignored).
    pub fn from_url(url: &str) -> Option<Self> {
        let path = match url::Url::parse(url) {
            Ok(u) => u.path().to_string(),
            Err(_) => url.split(['?', '#']).next().unwrap_or(url).to_string(),
        };
        let ext = path.rsplit_once('.').map(|(_, ext)| ext)?;
        Self::from_str(ext)
    }

    /// Segmented stream manifests need a fetch-and-mux conversion step.
    pub fn is_manifest(&self) -> bool {
        matches!(self, Self::M3u8 | Self::M3u | Self::Mpd)
    }

    /// File extension of the downloaded output.
    pub fn output_extension(&self) -> &'static str {
        match self {
            Self::Webm => "webm",
            Self::Mov => "mov",
            _ => "mp4",
        }
    }
}

impl std::fmt::Display for VideoFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tier_from_resolution_token() {
        let url = "https://videos.pexels.com/video-files/123/123-uhd_3840_2160_25fps.mp4";
        assert_eq!(QualityTier::from_url(url), QualityTier::Uhd);
        let url = "https://videos.pexels.com/video-files/123/123-sd_640_360_25fps.mp4";
        assert_eq!(QualityTier::from_url(url), QualityTier::Sd);
        let url = "https://videos.pexels.com/video-files/123/123-hd_1920_1080_30fps.mp4";
        assert_eq!(QualityTier::from_url(url), QualityTier::Hd);
    }

    #[test]
    fn test_tier_from_marker_and_manifest() {
        assert_eq!(
            QualityTier::from_url("https://cdn.example.com/a-hd_clip.mp4"),
            QualityTier::Hd
        );
        assert_eq!(
            QualityTier::from_url("https://cdn.example.com/master.m3u8?token=1"),
            QualityTier::Hd
        );
        assert_eq!(
            QualityTier::from_url("https://cdn.example.com/clip.webm"),
            QualityTier::Unknown
        );
    }

    #[test]
    fn test_tier_ordering() {
        assert!(QualityTier::Uhd > QualityTier::Hd);
        assert!(QualityTier::Hd > QualityTier::Sd);
        assert!(QualityTier::Sd > QualityTier::Unknown);
    }

    #[test]
    fn test_format_from_url_ignores_query() {
        assert_eq!(
            VideoFormat::from_url("https://cdn.example.com/v/playlist.m3u8?sig=abc.mp4"),
            Some(VideoFormat::M3u8)
        );
        assert_eq!(
            VideoFormat::from_url("https://cdn.example.com/v/clip.MP4"),
            Some(VideoFormat::Mp4)
        );
        assert_eq!(VideoFormat::from_url("https://cdn.example.com/page"), None);
        assert!(VideoFormat::Mpd.is_manifest());
        assert!(!VideoFormat::Webm.is_manifest());
    }

    #[test]
    fn test_resolution_hint() {
        let hint = ResolutionHint::from_url("x/123-hd_1280_720_24fps.mp4").unwrap();
        assert_eq!(hint.resolution(), "1280x720");
        assert_eq!(hint.fps, 24);
    }
}
