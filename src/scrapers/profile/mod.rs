//! Data-driven site profiles.
//!
//! A [`SiteProfile`] is plain configuration: where to start, which links are
//! catalog or item pages, how to paginate, and which extraction rules apply.
//! Profiles are validated once by [`SiteProfile::compile`] and are immutable
//! after registration.

mod builtin;
mod registry;

use std::ops::Deref;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::models::VideoFormat;

pub use builtin::builtin_profiles;
pub use registry::ProfileRegistry;

/// Path fragments no profile ever wants to crawl.
pub const COMMON_EXCLUDES: &[&str] = &[
    "/login",
    "/register",
    "/signup",
    "/pricing",
    "/account",
    "/blog",
    "/about",
    "/careers",
    "/contact",
    "/legal",
    "/privacy",
    "/terms",
    "/help",
    "/support",
    "/faq",
    "/press",
    "javascript:",
    "mailto:",
    "tel:",
];

/// Numeric clip id ending a path segment (`/12345/` or `slug-12345`).
static PAGE_CLIP_ID: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[/-](\d{4,})(?:/|$)").expect("valid regex"));

/// Errors raised while validating or registering profiles.
#[derive(Debug, thiserror::Error)]
pub enum ProfileError {
    #[error("profile id is empty")]
    MissingId,

    #[error("profile '{0}' is already registered")]
    Duplicate(String),

    #[error("profile '{profile}': invalid regex '{pattern}': {source}")]
    InvalidRegex {
        profile: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("profile '{profile}': invalid CSS selector '{selector}': {reason}")]
    InvalidSelector {
        profile: String,
        selector: String,
        reason: String,
    },

    #[error("profile '{profile}': {reason}")]
    InvalidRule { profile: String, reason: String },

    #[error("failed to read profile file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse profile file {path}: {reason}")]
    Parse { path: String, reason: String },
}

/// How a catalog page reveals more items.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Pagination {
    #[default]
    None,
    /// Scroll the page in steps so lazy content loads.
    InfiniteScroll,
    /// Click a "load more" control up to `max_clicks` times, then scroll.
    LoadMore {
        selector: String,
        #[serde(default = "default_max_clicks")]
        max_clicks: u32,
    },
}

fn default_max_clicks() -> u32 {
    10
}

/// Clip fields an extraction rule can fill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetadataField {
    ClipId,
    Title,
    Creator,
    Collection,
    Tags,
    Resolution,
    Duration,
    FrameRate,
    Camera,
    ThumbnailUrl,
    Formats,
}

/// One extraction rule: a CSS selector (optionally reading an attribute) or
/// a regex with one capture group applied to the page's visible text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractionRule {
    pub field: MetadataField,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub css: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub regex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub attr: Option<String>,
}

impl ExtractionRule {
    pub fn regex(field: MetadataField, pattern: &str) -> Self {
        Self {
            field,
            css: None,
            regex: Some(pattern.to_string()),
            attr: None,
        }
    }

    pub fn css(field: MetadataField, selector: &str, attr: Option<&str>) -> Self {
        Self {
            field,
            css: Some(selector.to_string()),
            regex: None,
            attr: attr.map(str::to_string),
        }
    }
}

/// Per-site navigation and extraction rules.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteProfile {
    /// Lookup key, e.g. `pexels`.
    pub id: String,
    /// Display name, stored as the clip's site. Defaults to the id.
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Allowed domains; empty allows any.
    #[serde(default)]
    pub domains: Vec<String>,
    #[serde(default)]
    pub start_url: String,
    #[serde(default)]
    pub catalog_patterns: Vec<String>,
    #[serde(default)]
    pub item_patterns: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item_url_regex: Option<String>,
    /// Extra links to follow as catalog pages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link_pattern: Option<String>,
    /// Merged with [`COMMON_EXCLUDES`].
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default = "default_video_types")]
    pub video_types: Vec<VideoFormat>,
    /// Only record video URLs served from this host.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub video_cdn_domain: Option<String>,
    #[serde(default)]
    pub pagination: Pagination,
    /// Overrides the crawl settings' max depth.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_depth: Option<u32>,
    #[serde(default)]
    pub rules: Vec<ExtractionRule>,
    #[serde(default = "default_true")]
    pub og_fallback: bool,
    #[serde(default = "default_true")]
    pub jsonld_fallback: bool,
    /// Script evaluated after each page load.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_js: Option<String>,
    /// Site-specific interstitial phrases, matched like the built-in
    /// challenge signatures.
    #[serde(default)]
    pub challenge_markers: Vec<String>,
}

fn default_video_types() -> Vec<VideoFormat> {
    vec![
        VideoFormat::M3u8,
        VideoFormat::Mp4,
        VideoFormat::Webm,
        VideoFormat::Mpd,
    ]
}

fn default_true() -> bool {
    true
}

impl SiteProfile {
    /// An empty profile with defaults for every optional field.
    pub fn new(id: &str, name: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            description: String::new(),
            domains: Vec::new(),
            start_url: String::new(),
            catalog_patterns: Vec::new(),
            item_patterns: Vec::new(),
            item_url_regex: None,
            link_pattern: None,
            exclude_patterns: Vec::new(),
            video_types: default_video_types(),
            video_cdn_domain: None,
            pagination: Pagination::None,
            max_depth: None,
            rules: Vec::new(),
            og_fallback: true,
            jsonld_fallback: true,
            custom_js: None,
            challenge_markers: Vec::new(),
        }
    }

    /// Validate patterns and selectors and build the matchers.
    pub fn compile(mut self) -> Result<CompiledProfile, ProfileError> {
        self.id = self.id.trim().to_string();
        if self.id.is_empty() {
            return Err(ProfileError::MissingId);
        }
        if self.name.trim().is_empty() {
            self.name = self.id.clone();
        }
        if self.video_types.is_empty() {
            self.video_types = default_video_types();
        }

        let profile = self.id.clone();
        let compile_re = |pattern: &str| {
            Regex::new(pattern).map_err(|source| ProfileError::InvalidRegex {
                profile: profile.clone(),
                pattern: pattern.to_string(),
                source,
            })
        };

        let item_re = self.item_url_regex.as_deref().map(compile_re).transpose()?;
        let link_re = self.link_pattern.as_deref().map(compile_re).transpose()?;

        let exts: Vec<&str> = self.video_types.iter().map(|f| f.as_str()).collect();
        let video_re = compile_re(&format!(
            r#"(?i)https?://[^\s"'<>]+\.(?:{})(?:\?[^\s"'<>]*)?"#,
            exts.join("|")
        ))?;

        let mut rules = Vec::with_capacity(self.rules.len());
        for rule in &self.rules {
            let kind = match (&rule.css, &rule.regex) {
                (Some(css), None) => {
                    scraper::Selector::parse(css).map_err(|e| ProfileError::InvalidSelector {
                        profile: profile.clone(),
                        selector: css.clone(),
                        reason: e.to_string(),
                    })?;
                    RuleMatcher::Css {
                        selector: css.clone(),
                        attr: rule.attr.clone(),
                    }
                }
                (None, Some(pattern)) => {
                    let re = Regex::new(&format!("(?i){}", pattern)).map_err(|source| {
                        ProfileError::InvalidRegex {
                            profile: profile.clone(),
                            pattern: pattern.clone(),
                            source,
                        }
                    })?;
                    if re.captures_len() < 2 {
                        return Err(ProfileError::InvalidRule {
                            profile: profile.clone(),
                            reason: format!("regex for {:?} needs a capture group", rule.field),
                        });
                    }
                    RuleMatcher::Regex(re)
                }
                _ => {
                    return Err(ProfileError::InvalidRule {
                        profile: profile.clone(),
                        reason: format!(
                            "rule for {:?} must set exactly one of css or regex",
                            rule.field
                        ),
                    })
                }
            };
            rules.push(CompiledRule {
                field: rule.field,
                matcher: kind,
            });
        }

        if let Pagination::LoadMore { selector, .. } = &self.pagination {
            scraper::Selector::parse(selector).map_err(|e| ProfileError::InvalidSelector {
                profile: profile.clone(),
                selector: selector.clone(),
                reason: e.to_string(),
            })?;
        }

        let mut excludes: Vec<String> = COMMON_EXCLUDES.iter().map(|s| s.to_string()).collect();
        for p in &self.exclude_patterns {
            if !excludes.contains(p) {
                excludes.push(p.clone());
            }
        }

        Ok(CompiledProfile {
            def: self,
            excludes,
            item_re,
            link_re,
            video_re,
            rules,
        })
    }
}

/// Validated matcher of an extraction rule.
#[derive(Debug, Clone)]
pub enum RuleMatcher {
    /// Selector source is kept as text; parsed documents are not `Send`.
    Css { selector: String, attr: Option<String> },
    Regex(Regex),
}

#[derive(Debug, Clone)]
pub struct CompiledRule {
    pub field: MetadataField,
    pub matcher: RuleMatcher,
}

/// A validated profile with its matchers built.
#[derive(Debug, Clone)]
pub struct CompiledProfile {
    def: SiteProfile,
    excludes: Vec<String>,
    item_re: Option<Regex>,
    link_re: Option<Regex>,
    video_re: Regex,
    rules: Vec<CompiledRule>,
}

impl Deref for CompiledProfile {
    type Target = SiteProfile;

    fn deref(&self) -> &SiteProfile {
        &self.def
    }
}

impl CompiledProfile {
    pub fn definition(&self) -> &SiteProfile {
        &self.def
    }

    pub fn compiled_rules(&self) -> &[CompiledRule] {
        &self.rules
    }

    /// Matches any URL of this profile's video types.
    pub fn video_regex(&self) -> &Regex {
        &self.video_re
    }

    pub fn is_allowed_domain(&self, host: &str) -> bool {
        if self.domains.is_empty() {
            return true;
        }
        let host = host.to_ascii_lowercase();
        self.domains.iter().any(|d| {
            let d = d.to_ascii_lowercase();
            host == d || host.ends_with(&format!(".{}", d))
        })
    }

    pub fn is_allowed_url(&self, url: &str) -> bool {
        url::Url::parse(url)
            .ok()
            .and_then(|u| u.host_str().map(|h| self.is_allowed_domain(h)))
            .unwrap_or(false)
    }

    pub fn is_catalog(&self, url: &str) -> bool {
        self.catalog_patterns.iter().any(|p| url.contains(p.as_str()))
    }

    /// Individual item (clip) page.
    pub fn is_item(&self, url: &str) -> bool {
        if let Some(re) = &self.item_re {
            return re.is_match(url);
        }
        if self.item_patterns.is_empty() {
            return false;
        }
        let path = url::Url::parse(url)
            .map(|u| u.path().trim_end_matches('/').to_string())
            .unwrap_or_default();
        if !self.item_patterns.iter().any(|p| path.contains(p.as_str())) {
            return false;
        }
        path.rsplit('/')
            .next()
            .map(|last| !last.is_empty() && last.chars().all(|c| c.is_ascii_digit()))
            .unwrap_or(false)
    }

    pub fn is_excluded(&self, url: &str) -> bool {
        self.excludes.iter().any(|p| url.contains(p.as_str()))
    }

    /// Queue priority of a discovered link, or `None` if it should not be
    /// followed. Item pages outrank catalog pages.
    pub fn crawl_priority(&self, url: &str) -> Option<i32> {
        if self.is_excluded(url) || !self.is_allowed_url(url) {
            return None;
        }
        if self.is_item(url) {
            Some(ITEM_PRIORITY)
        } else if self.is_catalog(url) || self.link_re.as_ref().is_some_and(|re| re.is_match(url))
        {
            Some(CATALOG_PRIORITY)
        } else {
            None
        }
    }

    /// Site-native clip id taken from an item page URL.
    pub fn page_clip_id(&self, url: &str) -> Option<String> {
        PAGE_CLIP_ID
            .captures(url)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
    }

    /// Whether a candidate video URL passes the CDN restriction.
    pub fn accepts_video_host(&self, video_url: &str) -> bool {
        let Some(cdn) = self.video_cdn_domain.as_deref().filter(|d| !d.is_empty()) else {
            return true;
        };
        url::Url::parse(video_url)
            .ok()
            .and_then(|u| u.host_str().map(|h| h.contains(cdn)))
            .unwrap_or(false)
    }

    pub fn effective_max_depth(&self, settings_max: u32) -> u32 {
        self.max_depth.unwrap_or(settings_max)
    }
}

/// Priority of links to item pages.
pub const ITEM_PRIORITY: i32 = 10;
/// Priority of links to catalog pages.
pub const CATALOG_PRIORITY: i32 = 5;
/// Priority of seed URLs.
pub const SEED_PRIORITY: i32 = 100;
