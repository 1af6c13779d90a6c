//! URL normalization and link extraction.

use std::collections::HashSet;

use scraper::{Html, Selector};
use url::Url;

/// Tracking parameters stripped during normalization.
const TRACKING_PARAMS: &[&str] = &[
    "utm_source",
    "utm_medium",
    "utm_campaign",
    "utm_term",
    "utm_content",
    "ref",
    "fbclid",
    "gclid",
    "gad_source",
];

/// Canonical form of a page URL used for frontier dedup: fragment removed,
/// tracking parameters dropped, host lowercased. Non-HTTP URLs yield `None`.
pub fn normalize_url(raw: &str) -> Option<String> {
    let mut url = Url::parse(raw.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);

    let kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !TRACKING_PARAMS.contains(&k.as_ref()))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept);
    }
    Some(url.to_string())
}

/// Absolute, normalized `a[href]` targets of a page, in document order and
/// without duplicates. The page itself is excluded.
pub fn extract_links(html: &str, page_url: &str) -> Vec<String> {
    let Ok(base) = Url::parse(page_url) else {
        return Vec::new();
    };
    let Ok(selector) = Selector::parse("a[href]") else {
        return Vec::new();
    };
    let document = Html::parse_document(html);
    let own = normalize_url(page_url);

    let mut seen = HashSet::new();
    let mut links = Vec::new();
    for element in document.select(&selector) {
        let Some(href) = element.value().attr("href") else {
            continue;
        };
        let href = href.trim();
        if href.is_empty()
            || href.starts_with('#')
            || href.starts_with("javascript:")
            || href.starts_with("mailto:")
            || href.starts_with("tel:")
        {
            continue;
        }
        let Some(normalized) = base
            .join(href)
            .ok()
            .and_then(|u| normalize_url(u.as_str()))
        else {
            continue;
        };
        if Some(&normalized) == own.as_ref() {
            continue;
        }
        if seen.insert(normalized.clone()) {
            links.push(normalized);
        }
    }
    links
}

/// Host of a URL, lowercased.
pub fn host_of(raw: &str) -> Option<String> {
    Url::parse(raw)
        .ok()
        .and_then(|u| u.host_str().map(|h| h.to_ascii_lowercase()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_strips_tracking_and_fragment() {
        assert_eq!(
            normalize_url("https://WWW.Pexels.com/videos/?utm_source=x&page=2#top").as_deref(),
            Some("https://www.pexels.com/videos/?page=2")
        );
        assert_eq!(
            normalize_url("https://www.pexels.com/videos/?fbclid=abc").as_deref(),
            Some("https://www.pexels.com/videos/")
        );
        assert_eq!(normalize_url("mailto:me@example.com"), None);
        assert_eq!(normalize_url("not a url"), None);
    }

    #[test]
    fn test_extract_links_resolves_and_dedups() {
        let html = r##"
            <a href="/video/ocean-123456/">a</a>
            <a href="/video/ocean-123456/#comments">dup</a>
            <a href="https://www.pexels.com/videos/?ref=nav">b</a>
            <a href="#top">skip</a>
            <a href="javascript:void(0)">skip</a>
            <a href="/videos/">self</a>
        "##;
        let links = extract_links(html, "https://www.pexels.com/videos/");
        assert_eq!(links, vec!["https://www.pexels.com/video/ocean-123456/"]);
    }
}
