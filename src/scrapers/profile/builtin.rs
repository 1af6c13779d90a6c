//! Built-in site profiles.

use super::{ExtractionRule, MetadataField, Pagination, SiteProfile};
use crate::models::VideoFormat;

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

/// Every built-in profile, in display order.
pub fn builtin_profiles() -> Vec<SiteProfile> {
    vec![artlist(), pexels(), pixabay(), storyblocks(), generic()]
}

fn artlist() -> SiteProfile {
    use MetadataField::*;
    let mut p = SiteProfile::new("artlist", "Artlist");
    p.description = "Artlist.io stock footage (HLS streams)".to_string();
    p.domains = strings(&["artlist.io"]);
    p.start_url = "https://artlist.io/stock-footage/".to_string();
    p.catalog_patterns = strings(&["/stock-footage"]);
    p.item_patterns = strings(&["/stock-footage/"]);
    p.item_url_regex = Some(r"/stock-footage/.+/\d{4,}$".to_string());
    p.exclude_patterns = strings(&[
        "/sfx",
        "/stock-music",
        "/video-templates",
        "/song/",
        "/sound-effects",
        "/templates",
        "/playlist",
        "/browse",
        "/editorial",
        "/enterprise",
        "/teams",
        "/voice-over",
        "/royalty-free-music",
        "/luts",
        "/tools",
        "/favorites",
        "/downloads",
        "/spotlight",
        "/page/pricing",
    ]);
    p.video_types = vec![VideoFormat::M3u8];
    p.pagination = Pagination::InfiniteScroll;
    p.jsonld_fallback = false;
    p.rules = vec![
        ExtractionRule::regex(ClipId, r"Clip\s+ID\s+(\d+)"),
        ExtractionRule::regex(
            Resolution,
            r"Resolution\s+([\d]{3,4}\s*[xX\x{00d7}]\s*[\d]{3,4})",
        ),
        ExtractionRule::regex(Duration, r"Length\s+([\d:]{4,8})"),
        ExtractionRule::regex(FrameRate, r"Frame\s+Rate\s+(\d+)"),
        ExtractionRule::regex(Camera, r"Camera\s+([^\n\r]{2,50}?)(?:\n|\r|Available)"),
        ExtractionRule::regex(
            Formats,
            r"Available\s+Formats\s+((?:(?:HD|SD|4K|2K|ProRes|MP4|MOV|RAW)\s*)+)",
        ),
        ExtractionRule::regex(Creator, r"Clip by\s*\n?\s*([^\n\r]{2,50})"),
        ExtractionRule::regex(Collection, r"Part of\s*\n?\s*([^\n\r]{2,60})"),
        ExtractionRule::regex(
            Tags,
            r"Tags\s*\n((?:.+\n?){1,25}?)(?:Related|Part of|Clip by|Similar|Explore|$)",
        ),
    ];
    p
}

fn pexels() -> SiteProfile {
    let mut p = SiteProfile::new("pexels", "Pexels");
    p.description = "Pexels.com free stock videos (direct MP4 in SD/HD/UHD)".to_string();
    p.domains = strings(&["pexels.com", "www.pexels.com"]);
    p.start_url = "https://www.pexels.com/videos/".to_string();
    p.catalog_patterns = strings(&["/videos/", "/search/videos/", "/collections/"]);
    p.item_patterns = strings(&["/video/"]);
    p.item_url_regex = Some(r"pexels\.com/video/[^/]+-\d+/?$".to_string());
    let mut excludes = strings(&["/download/", "/license/", "/photo/"]);
    excludes.extend(
        [
            "ja-jp", "ko-kr", "de-de", "fr-fr", "es-es", "pt-br", "zh-cn", "zh-tw", "ru-ru",
            "it-it", "nl-nl", "pl-pl", "sv-se", "tr-tr", "da-dk", "fi-fi", "nb-no", "cs-cz",
            "hu-hu", "ro-ro", "sk-sk", "uk-ua", "vi-vn", "th-th", "el-gr", "et-ee", "id-id",
            "ca-es",
        ]
        .iter()
        .map(|locale| format!("/{}/", locale)),
    );
    p.exclude_patterns = excludes;
    p.video_types = vec![VideoFormat::Mp4, VideoFormat::Webm];
    p.video_cdn_domain = Some("videos.pexels.com".to_string());
    p.pagination = Pagination::LoadMore {
        selector: r#"[class*="loadMore"], [class*="LoadMore"]"#.to_string(),
        max_clicks: 15,
    };
    p
}

fn pixabay() -> SiteProfile {
    let mut p = SiteProfile::new("pixabay", "Pixabay");
    p.description = "Pixabay.com free stock videos".to_string();
    p.domains = strings(&["pixabay.com", "www.pixabay.com"]);
    p.start_url = "https://pixabay.com/videos/".to_string();
    p.catalog_patterns = strings(&["/videos/"]);
    p.item_patterns = strings(&["/videos/"]);
    p.item_url_regex = Some(r"/videos/[^/]+-\d+/?$".to_string());
    p.video_types = vec![VideoFormat::Mp4, VideoFormat::Webm];
    p.pagination = Pagination::InfiniteScroll;
    p
}

fn storyblocks() -> SiteProfile {
    let mut p = SiteProfile::new("storyblocks", "Storyblocks");
    p.description = "Storyblocks.com stock video (HLS streams)".to_string();
    p.domains = strings(&["storyblocks.com", "www.storyblocks.com"]);
    p.start_url = "https://www.storyblocks.com/video/".to_string();
    p.catalog_patterns = strings(&["/video/"]);
    p.item_patterns = strings(&["/video/stock/"]);
    p.item_url_regex = Some(r"/video/stock/.+".to_string());
    p.video_types = vec![VideoFormat::M3u8, VideoFormat::Mp4, VideoFormat::Webm];
    p.pagination = Pagination::InfiniteScroll;
    p
}

fn generic() -> SiteProfile {
    let mut p = SiteProfile::new("generic", "Generic");
    p.description = "Detect video streams on any site (M3U8, MP4, WebM, DASH)".to_string();
    p.video_types = vec![
        VideoFormat::M3u8,
        VideoFormat::Mp4,
        VideoFormat::Webm,
        VideoFormat::Mpd,
        VideoFormat::Mov,
    ];
    p.pagination = Pagination::InfiniteScroll;
    p
}
