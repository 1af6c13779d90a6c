//! Video URL patterns shared by the discovery strategies.

use std::sync::LazyLock;

use regex::Regex;
use scraper::{Html, Selector};
use url::Url;

use crate::models::{QualityTier, VideoFormat};

/// `/video-files/<id>/` path segment used by CDN file URLs.
static VIDEO_FILES_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/video-files/(\d+)/").expect("valid regex"));

/// URL-encoded MP4 links carried by partner/editor embeds.
static PARTNER_LINK: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"file-url=(https?%3A%2F%2F[^&"'<>\s]+?\.mp4[^&"'<>\s]*)"#).expect("valid regex")
});

/// Query parameters that sometimes carry the rendition height or tier.
const QUALITY_PARAMS: &[&str] = &["quality", "q", "res", "resolution", "height", "h", "rendition"];

/// Site-native clip id embedded in a CDN file URL.
pub fn explicit_clip_id(url: &str) -> Option<String> {
    VIDEO_FILES_ID
        .captures(url)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

/// Undo the escaping JSON and HTML apply to URLs.
pub fn unescape(text: &str) -> String {
    text.replace("\\/", "/")
        .replace("\\u002F", "/")
        .replace("\\u002f", "/")
        .replace("\\u0026", "&")
        .replace("&amp;", "&")
}

/// Strip trailing characters a greedy match may pick up.
fn clean(url: &str) -> String {
    url.trim_end_matches(['\\', ',', ';', ')', ']', '}'])
        .to_string()
}

/// Every match of `video_re` in `text`, in order of appearance.
pub fn find_video_urls(text: &str, video_re: &Regex) -> Vec<String> {
    let text = unescape(text);
    let mut urls: Vec<String> = Vec::new();
    for m in video_re.find_iter(&text) {
        let url = clean(m.as_str());
        if !urls.contains(&url) {
            urls.push(url);
        }
    }
    urls
}

/// URL-encoded partner links (`file-url=https%3A%2F%2F...mp4`), decoded.
pub fn partner_links(html: &str) -> Vec<String> {
    let mut urls: Vec<String> = Vec::new();
    for caps in PARTNER_LINK.captures_iter(html) {
        let Ok(decoded) = urlencoding::decode(&caps[1]) else {
            continue;
        };
        let url = decoded.into_owned();
        if !urls.contains(&url) {
            urls.push(url);
        }
    }
    urls
}

/// `src`/`data-src` of `<video>` and `<source>` elements, resolved against
/// the page URL.
pub fn media_element_sources(html: &str, page_url: &str) -> Vec<String> {
    let Ok(selector) = Selector::parse("video, source") else {
        return Vec::new();
    };
    let base = Url::parse(page_url).ok();
    let document = Html::parse_document(html);
    let mut urls: Vec<String> = Vec::new();
    for el in document.select(&selector) {
        for attr in ["src", "data-src"] {
            let Some(raw) = el.value().attr(attr).map(str::trim).filter(|s| !s.is_empty()) else {
                continue;
            };
            let resolved = match &base {
                Some(base) => base.join(raw).map(|u| u.to_string()).ok(),
                None => Url::parse(raw).map(|u| u.to_string()).ok(),
            };
            if let Some(url) = resolved.filter(|u| u.starts_with("http")) {
                if !urls.contains(&url) {
                    urls.push(url);
                }
            }
        }
    }
    urls
}

/// Format implied by a response MIME type.
pub fn format_from_mime(mime: &str) -> Option<VideoFormat> {
    let mime = mime.split(';').next().unwrap_or(mime).trim().to_ascii_lowercase();
    match mime.as_str() {
        "application/vnd.apple.mpegurl" | "application/x-mpegurl" | "audio/mpegurl" => {
            Some(VideoFormat::M3u8)
        }
        "application/dash+xml" => Some(VideoFormat::Mpd),
        "video/mp4" => Some(VideoFormat::Mp4),
        "video/webm" => Some(VideoFormat::Webm),
        "video/quicktime" => Some(VideoFormat::Mov),
        _ => None,
    }
}

/// Tier of a URL, falling back to quality hints in its query string.
pub fn tier_hint(url: &str) -> QualityTier {
    let tier = QualityTier::from_url(url);
    if tier != QualityTier::Unknown {
        return tier;
    }
    let Ok(parsed) = Url::parse(url) else {
        return tier;
    };
    for (key, value) in parsed.query_pairs() {
        if !QUALITY_PARAMS.contains(&key.to_ascii_lowercase().as_str()) {
            continue;
        }
        let value = value.to_ascii_lowercase();
        if let Some(t) = QualityTier::from_str(&value) {
            return t;
        }
        let digits: String = value.chars().take_while(|c| c.is_ascii_digit()).collect();
        if let Ok(height) = digits.parse::<u32>() {
            // Heights: 2160 -> UHD, 720/1080 -> HD
            return match height {
                h if h >= 1440 => QualityTier::Uhd,
                h if h >= 720 => QualityTier::Hd,
                h if h > 0 => QualityTier::Sd,
                _ => QualityTier::Unknown,
            };
        }
    }
    tier
}

#[cfg(test)]
mod tests {
    use super::*;

    fn video_re() -> Regex {
        Regex::new(r#"(?i)https?://[^\s"'<>]+\.(?:m3u8|mp4|webm)(?:\?[^\s"'<>]*)?"#).unwrap()
    }

    #[test]
    fn test_explicit_clip_id() {
        assert_eq!(
            explicit_clip_id("https://videos.pexels.com/video-files/856/856-hd_1920_1080_25fps.mp4")
                .as_deref(),
            Some("856")
        );
        assert_eq!(explicit_clip_id("https://cdn.example.com/master.m3u8"), None);
    }

    #[test]
    fn test_find_urls_in_escaped_json() {
        let body = r#"{"src":"https:\/\/cdn.example.com\/a\/clip.m3u8?t=1","x":"https://cdn.example.com/b.mp4"}"#;
        assert_eq!(
            find_video_urls(body, &video_re()),
            vec![
                "https://cdn.example.com/a/clip.m3u8?t=1",
                "https://cdn.example.com/b.mp4"
            ]
        );
    }

    #[test]
    fn test_partner_links_decoded() {
        let html = r#"<a href="https://editor.example.com/?file-url=https%3A%2F%2Fvideos.pexels.com%2Fvideo-files%2F9%2F9-hd_1280_720_25fps.mp4&type=video">"#;
        assert_eq!(
            partner_links(html),
            vec!["https://videos.pexels.com/video-files/9/9-hd_1280_720_25fps.mp4"]
        );
    }

    #[test]
    fn test_media_element_sources() {
        let html = r#"<video src="/v/a.mp4"></video><video><source data-src="https://cdn.example.com/b.webm"></video>"#;
        assert_eq!(
            media_element_sources(html, "https://example.com/page"),
            vec!["https://example.com/v/a.mp4", "https://cdn.example.com/b.webm"]
        );
    }

    #[test]
    fn test_tier_hint_from_query() {
        assert_eq!(
            tier_hint("https://cdn.example.com/clip.mp4?quality=2160p"),
            QualityTier::Uhd
        );
        assert_eq!(tier_hint("https://cdn.example.com/clip.mp4?h=360"), QualityTier::Sd);
        assert_eq!(tier_hint("https://cdn.example.com/clip.mp4?q=hd"), QualityTier::Hd);
        assert_eq!(tier_hint("https://cdn.example.com/clip.mp4"), QualityTier::Unknown);
    }

    #[test]
    fn test_mime_formats() {
        assert_eq!(
            format_from_mime("application/vnd.apple.mpegurl; charset=utf-8"),
            Some(VideoFormat::M3u8)
        );
        assert_eq!(format_from_mime("text/html"), None);
    }
}
