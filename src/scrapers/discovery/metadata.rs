//! Clip metadata extraction from rendered pages.
//!
//! Sources, in order of precedence: the profile's extraction rules,
//! JSON-LD `VideoObject`, OpenGraph tags, then heading/slug/title
//! fallbacks. Earlier sources win; later ones only fill gaps.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use url::Url;

use crate::models::QualityTier;
use crate::scrapers::browser::PageSnapshot;
use crate::scrapers::profile::{CompiledProfile, MetadataField, RuleMatcher};

const MAX_FIELD_LEN: usize = 500;
const MAX_TAGS: usize = 25;

static RESOLUTION_SEP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\s*[xX\x{00d7}]\s*").expect("valid regex"));

static FORMAT_TOKENS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)\b(4K|2K|HD|SD|ProRes|MP4|MOV|RAW|WebM)\b").expect("valid regex"));

static TAG_SPLIT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\n|,|\s{2,}").expect("valid regex"));

/// "Video by Jane Doe on Pexels" style titles.
static BY_ON_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(?:video|photo|clip|footage)\s+by\s+(.+?)\s+on\s+\S+").expect("valid regex")
});

/// Creator named in a description.
static BY_CREATOR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\bby\s+(\w[\w\s.]+?)(?:\s+for\s+free|\s+on\s+|\s*$)").expect("valid regex")
});

static OG_URL_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[/-](\d{4,})/?$").expect("valid regex"));

static SLUG_TITLE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"/(?:video|videos|clip|stock-footage)/([^/?#]+?)(?:-\d+)?/?(?:[?#].*)?$")
        .expect("valid regex")
});

static GENERIC_HEADING: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)^(The best free|Free stock|Download free|Search results|Browse)")
        .expect("valid regex")
});

static TITLE_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\s*[|\x{2013}-]\s*(Stock Footage|Artlist|Pexels|Pixabay|Storyblocks|Free).*$")
        .expect("valid regex")
});

/// Metadata found on one page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageMetadata {
    /// Site-native id printed on the page or in its canonical URL.
    pub clip_id: Option<String>,
    pub title: String,
    pub creator: String,
    pub collection: String,
    pub tags: Vec<String>,
    pub resolution: String,
    pub duration: String,
    pub frame_rate: String,
    pub camera: String,
    pub thumbnail_url: String,
    /// Tiers named in an "available formats" listing.
    pub listed_tiers: BTreeSet<QualityTier>,
    /// Video URL advertised by `og:video` or JSON-LD `contentUrl`.
    pub advertised_video: Option<String>,
    /// `(video source, item page link)` pairs from catalog grids.
    pub catalog_entries: Vec<(String, String)>,
}

fn truncate(s: &str, max: usize) -> String {
    let s = s.trim();
    match s.char_indices().nth(max) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}

fn fill(dst: &mut String, value: &str) {
    let value = value.trim();
    if dst.is_empty() && !value.is_empty() {
        *dst = truncate(value, MAX_FIELD_LEN);
    }
}

fn push_tags(tags: &mut Vec<String>, raw: &str) {
    for part in TAG_SPLIT.split(raw) {
        let tag = part.trim();
        let len = tag.chars().count();
        if len < 2 || len >= 35 || tag.starts_with("http") {
            continue;
        }
        if tags.len() >= MAX_TAGS {
            return;
        }
        if !tags.iter().any(|t| t.eq_ignore_ascii_case(tag)) {
            tags.push(tag.to_string());
        }
    }
}

fn element_text(el: &ElementRef<'_>) -> String {
    el.text().collect::<Vec<_>>().join(" ").split_whitespace().collect::<Vec<_>>().join(" ")
}

fn meta_content(document: &Html, key: &str) -> Option<String> {
    let selector = Selector::parse(&format!(
        r#"meta[property="{key}"], meta[name="{key}"]"#
    ))
    .ok()?;
    document
        .select(&selector)
        .filter_map(|el| el.value().attr("content"))
        .map(str::trim)
        .find(|c| !c.is_empty())
        .map(str::to_string)
}

fn title_case(slug: &str) -> String {
    slug.split(['-', '_'])
        .filter(|w| !w.is_empty())
        .map(|w| {
            let mut chars = w.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<String>>()
        .join(" ")
}

/// Title derived from the last path segment of a clip URL.
pub fn title_from_slug(url: &str) -> Option<String> {
    let caps = SLUG_TITLE.captures(url)?;
    let slug = caps.get(1)?.as_str();
    if slug.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let title = title_case(&urlencoding::decode(slug).map(|s| s.into_owned()).unwrap_or_default());
    (!title.is_empty()).then_some(title)
}

impl PageMetadata {
    fn set(&mut self, field: MetadataField, value: &str) {
        match field {
            MetadataField::ClipId => {
                let id = value.trim();
                if self.clip_id.is_none() && !id.is_empty() {
                    self.clip_id = Some(id.to_string());
                }
            }
            MetadataField::Title => fill(&mut self.title, value),
            MetadataField::Creator => fill(&mut self.creator, value),
            MetadataField::Collection => fill(&mut self.collection, value),
            MetadataField::Tags => push_tags(&mut self.tags, value),
            MetadataField::Resolution => {
                fill(&mut self.resolution, &RESOLUTION_SEP.replace_all(value.trim(), "x"))
            }
            MetadataField::Duration => fill(&mut self.duration, value),
            MetadataField::FrameRate => fill(&mut self.frame_rate, value),
            MetadataField::Camera => fill(&mut self.camera, value),
            MetadataField::ThumbnailUrl => fill(&mut self.thumbnail_url, value),
            MetadataField::Formats => {
                for m in FORMAT_TOKENS.find_iter(value) {
                    let tier = match m.as_str().to_ascii_uppercase().as_str() {
                        "4K" => Some(QualityTier::Uhd),
                        "2K" | "HD" => Some(QualityTier::Hd),
                        "SD" => Some(QualityTier::Sd),
                        _ => None,
                    };
                    self.listed_tiers.extend(tier);
                }
            }
        }
    }

    fn apply_rules(&mut self, profile: &CompiledProfile, document: &Html, body_text: &str) {
        for rule in profile.compiled_rules() {
            match &rule.matcher {
                RuleMatcher::Regex(re) => {
                    if let Some(m) = re.captures(body_text).and_then(|c| c.get(1)) {
                        self.set(rule.field, m.as_str());
                    }
                }
                RuleMatcher::Css { selector, attr } => {
                    let Ok(sel) = Selector::parse(selector) else {
                        continue;
                    };
                    let values = document.select(&sel).filter_map(|el| match attr {
                        Some(a) => el.value().attr(a).map(str::to_string),
                        None => Some(element_text(&el)),
                    });
                    if rule.field == MetadataField::Tags {
                        for v in values {
                            push_tags(&mut self.tags, &v);
                        }
                    } else if let Some(v) = values.into_iter().find(|v| !v.trim().is_empty()) {
                        self.set(rule.field, &v);
                    }
                }
            }
        }
    }

    fn apply_json_ld(&mut self, document: &Html) {
        let Ok(selector) = Selector::parse(r#"script[type="application/ld+json"]"#) else {
            return;
        };
        for script in document.select(&selector) {
            let raw = script.text().collect::<String>();
            let Ok(value) = serde_json::from_str::<Value>(raw.trim()) else {
                continue;
            };
            let mut objects = Vec::new();
            collect_ld_objects(&value, &mut objects);
            for obj in objects {
                self.apply_ld_object(obj);
            }
        }
    }

    fn apply_ld_object(&mut self, obj: &Value) {
        let str_field = |key: &str| obj.get(key).and_then(Value::as_str).unwrap_or_default();
        fill(&mut self.title, &truncate(str_field("name"), 200));
        fill(&mut self.duration, str_field("duration"));

        let thumb = match obj.get("thumbnailUrl") {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Array(items)) => items
                .iter()
                .find_map(Value::as_str)
                .unwrap_or_default()
                .to_string(),
            _ => String::new(),
        };
        fill(&mut self.thumbnail_url, &thumb);

        let author = match obj.get("author").or_else(|| obj.get("creator")) {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Object(o)) => o.get("name").and_then(Value::as_str).unwrap_or_default().to_string(),
            Some(Value::Array(items)) => items
                .iter()
                .find_map(|a| a.get("name").and_then(Value::as_str))
                .unwrap_or_default()
                .to_string(),
            _ => String::new(),
        };
        fill(&mut self.creator, &author);

        match obj.get("keywords") {
            Some(Value::String(s)) => push_tags(&mut self.tags, s),
            Some(Value::Array(items)) => {
                for k in items.iter().filter_map(Value::as_str).take(MAX_TAGS) {
                    push_tags(&mut self.tags, k);
                }
            }
            _ => {}
        }

        if self.advertised_video.is_none() {
            self.advertised_video = obj
                .get("contentUrl")
                .and_then(Value::as_str)
                .filter(|u| u.starts_with("http"))
                .map(str::to_string);
        }
    }

    fn apply_open_graph(&mut self, document: &Html) {
        if let Some(title) = meta_content(document, "og:title") {
            if let Some(caps) = BY_ON_TITLE.captures(&title) {
                fill(&mut self.creator, &caps[1]);
            } else {
                fill(&mut self.title, &title);
            }
        }
        if let Some(image) = meta_content(document, "og:image") {
            fill(&mut self.thumbnail_url, &image);
        }
        if self.advertised_video.is_none() {
            self.advertised_video = meta_content(document, "og:video:url")
                .or_else(|| meta_content(document, "og:video"))
                .filter(|u| u.starts_with("http"));
        }
        if let Some(desc) = meta_content(document, "og:description") {
            if let Some(caps) = BY_CREATOR.captures(&desc) {
                fill(&mut self.creator, &caps[1]);
            }
        }
        if self.clip_id.is_none() {
            self.clip_id = meta_content(document, "og:url")
                .and_then(|u| OG_URL_ID.captures(&u).map(|c| c[1].to_string()));
        }
    }

    fn apply_title_fallbacks(&mut self, document: &Html, page: &PageSnapshot) {
        if !self.title.is_empty() {
            return;
        }
        if let Ok(h1) = Selector::parse("h1") {
            if let Some(text) = document
                .select(&h1)
                .map(|el| element_text(&el))
                .find(|t| t.chars().count() > 3 && !GENERIC_HEADING.is_match(t))
            {
                fill(&mut self.title, &text);
                return;
            }
        }
        if let Some(title) = title_from_slug(&page.final_url) {
            fill(&mut self.title, &title);
            return;
        }
        let stripped = TITLE_SUFFIX.replace(page.title.trim(), "");
        fill(&mut self.title, &stripped);
    }
}

fn collect_ld_objects<'v>(value: &'v Value, out: &mut Vec<&'v Value>) {
    match value {
        Value::Array(items) => {
            for item in items {
                collect_ld_objects(item, out);
            }
        }
        Value::Object(obj) => {
            let is_media = match obj.get("@type") {
                Some(Value::String(t)) => t == "VideoObject" || t == "ImageObject",
                Some(Value::Array(ts)) => ts
                    .iter()
                    .any(|t| matches!(t.as_str(), Some("VideoObject" | "ImageObject"))),
                _ => false,
            };
            if is_media {
                out.push(value);
            }
            if let Some(graph) = obj.get("@graph") {
                collect_ld_objects(graph, out);
            }
        }
        _ => {}
    }
}

/// `<video>` sources on catalog grids paired with the nearest item link.
fn catalog_entries(document: &Html, page_url: &str) -> Vec<(String, String)> {
    let (Ok(media), Ok(links)) = (Selector::parse("video"), Selector::parse("a[href]")) else {
        return Vec::new();
    };
    let source = Selector::parse("source[src]").ok();
    let Ok(base) = Url::parse(page_url) else {
        return Vec::new();
    };

    let mut entries = Vec::new();
    for video in document.select(&media) {
        let src = video
            .value()
            .attr("src")
            .or_else(|| video.value().attr("data-src"))
            .map(str::to_string)
            .or_else(|| {
                source.as_ref().and_then(|s| {
                    video
                        .select(s)
                        .next()
                        .and_then(|el| el.value().attr("src"))
                        .map(str::to_string)
                })
            });
        let Some(src) = src.and_then(|s| base.join(s.trim()).ok()) else {
            continue;
        };

        let link = video
            .ancestors()
            .take(6)
            .filter_map(ElementRef::wrap)
            .find_map(|anc| {
                if anc.value().name() == "a" {
                    return anc.value().attr("href").map(str::to_string);
                }
                anc.select(&links)
                    .next()
                    .and_then(|a| a.value().attr("href"))
                    .map(str::to_string)
            })
            .and_then(|href| base.join(&href).ok());
        if let Some(link) = link {
            entries.push((src.to_string(), link.to_string()));
        }
    }
    entries
}

/// Extract every metadata source the profile enables.
pub fn extract_metadata(profile: &CompiledProfile, page: &PageSnapshot) -> PageMetadata {
    let document = Html::parse_document(&page.html);
    let mut meta = PageMetadata::default();

    meta.apply_rules(profile, &document, &page.body_text);
    if profile.jsonld_fallback {
        meta.apply_json_ld(&document);
    }
    if profile.og_fallback {
        meta.apply_open_graph(&document);
    }
    meta.apply_title_fallbacks(&document, page);
    meta.catalog_entries = catalog_entries(&document, &page.final_url);
    meta
}
