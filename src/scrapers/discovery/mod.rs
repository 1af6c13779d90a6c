//! Video discovery on a loaded page.
//!
//! Three live strategies run concurrently against the page until a shared
//! deadline: network interception, DOM-mutation watch (injected hooks polled
//! through the session), and response-body scanning. If they find nothing
//! usable, a regex sweep over the final HTML runs. Candidates are then
//! merged per clip id, keeping the best quality tier.
//!
//! The merge depends only on candidate content: ties are broken by strategy
//! rank and each strategy's own sequence, never by arrival order across
//! strategies.

mod metadata;
mod patterns;

pub use metadata::{extract_metadata, title_from_slug, PageMetadata};
pub use patterns::{
    explicit_clip_id, find_video_urls, format_from_mime, media_element_sources, partner_links,
    tier_hint,
};

use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

use super::browser::{BrowserSession, ObservedBody, ObservedResponse, PageSnapshot};
use super::links::normalize_url;
use super::profile::CompiledProfile;
use crate::models::{url_hash_id, ClipRecord, FormatUrl, QualityTier, ResolutionHint, VideoFormat};

/// Which detection strategy produced a candidate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Strategy {
    NetworkIntercept,
    DomMutation,
    ResponseBody,
    FallbackSweep,
}

impl Strategy {
    /// Tie-break rank; lower wins.
    pub fn rank(&self) -> u8 {
        match self {
            Self::NetworkIntercept => 0,
            Self::DomMutation => 1,
            Self::ResponseBody => 2,
            Self::FallbackSweep => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NetworkIntercept => "network",
            Self::DomMutation => "dom",
            Self::ResponseBody => "body",
            Self::FallbackSweep => "fallback",
        }
    }
}

/// A video URL found on the page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub url: String,
    pub tier: QualityTier,
    pub format: Option<VideoFormat>,
    /// Id embedded in the URL itself (`/video-files/<id>/`).
    pub explicit_id: Option<String>,
    pub strategy: Strategy,
    /// Position within the producing strategy's output.
    pub seq: u32,
}

impl Candidate {
    pub fn new(url: impl Into<String>, strategy: Strategy, seq: u32) -> Self {
        let url = url.into();
        Self {
            tier: tier_hint(&url),
            format: VideoFormat::from_url(&url),
            explicit_id: explicit_clip_id(&url),
            url,
            strategy,
            seq,
        }
    }

    fn sort_key(&self) -> (std::cmp::Reverse<QualityTier>, u8, u32, &str) {
        (
            std::cmp::Reverse(self.tier),
            self.strategy.rank(),
            self.seq,
            self.url.as_str(),
        )
    }
}

/// The best candidate of one clip plus every tier seen for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedClip {
    pub clip_id: String,
    pub best: Candidate,
    pub tiers: BTreeSet<QualityTier>,
    pub candidates: usize,
}

/// Discovery timing.
#[derive(Debug, Clone, Copy)]
pub struct DiscoveryTiming {
    /// Deadline for the live strategies.
    pub wait: Duration,
    /// Interval between DOM polls.
    pub dom_poll: Duration,
}

impl DiscoveryTiming {
    pub fn new(wait: Duration) -> Self {
        Self {
            wait,
            dom_poll: Duration::from_millis(250),
        }
    }
}

/// Result of discovery on one page.
#[derive(Debug, Clone, Default)]
pub struct DiscoveryReport {
    /// Records ready for upsert, one per clip with a video URL.
    pub clips: Vec<ClipRecord>,
    /// Raw candidates before filtering and merge.
    pub raw_candidates: usize,
    pub fallback_used: bool,
    /// Id of the clip this page is about, if any.
    pub page_clip_id: Option<String>,
}

/// Runs the discovery strategies for one profile.
pub struct VideoDiscovery<'a> {
    profile: &'a CompiledProfile,
}

impl<'a> VideoDiscovery<'a> {
    pub fn new(profile: &'a CompiledProfile) -> Self {
        Self { profile }
    }

    /// Discover clips on the page currently loaded in `session`.
    ///
    /// `page` is the snapshot taken after navigation; a fresh snapshot is
    /// read after the wait so the sweep and metadata see lazy content.
    pub async fn run(
        &self,
        session: &mut dyn BrowserSession,
        page: &PageSnapshot,
        timing: DiscoveryTiming,
    ) -> DiscoveryReport {
        let feeds = session.take_feeds();
        let session: &dyn BrowserSession = session;

        let live = self
            .collect_live(session, feeds.responses, feeds.bodies, timing)
            .await;
        let raw_live = live.len();

        let final_page = match session.snapshot().await {
            Ok(snap) if !snap.html.is_empty() => snap,
            Ok(_) => page.clone(),
            Err(e) => {
                debug!("Re-reading page failed, using navigation snapshot: {}", e);
                page.clone()
            }
        };
        self.analyze(&final_page, live, raw_live)
    }

    /// Filtering, fallback, merge and record building. Synchronous: parsed
    /// documents are not `Send`.
    pub fn analyze(&self, page: &PageSnapshot, live: Vec<Candidate>, raw_live: usize) -> DiscoveryReport {
        let meta = extract_metadata(self.profile, page);
        let url_id = |url: &str| {
            self.profile
                .is_item(url)
                .then(|| self.profile.page_clip_id(url))
                .flatten()
        };
        let page_clip_id = url_id(&page.final_url)
            .or_else(|| url_id(&page.requested_url))
            .or_else(|| meta.clip_id.clone());

        let mut candidates = self.filter(live);
        let mut raw = raw_live;
        let mut fallback_used = false;
        if candidates.is_empty() {
            let swept = self.sweep(page, &meta);
            raw += swept.len();
            candidates = self.filter(swept);
            fallback_used = true;
        }

        let merged = merge_candidates(candidates, page_clip_id.as_deref());
        let clips = merged
            .into_iter()
            .map(|m| self.build_record(m, page, &meta, page_clip_id.as_deref()))
            .collect();

        DiscoveryReport {
            clips,
            raw_candidates: raw,
            fallback_used,
            page_clip_id,
        }
    }

    async fn collect_live(
        &self,
        session: &dyn BrowserSession,
        responses: mpsc::UnboundedReceiver<ObservedResponse>,
        bodies: mpsc::UnboundedReceiver<ObservedBody>,
        timing: DiscoveryTiming,
    ) -> Vec<Candidate> {
        let deadline = Instant::now() + timing.wait;
        let closed = AtomicUsize::new(0);

        let (network, body, dom) = tokio::join!(
            self.watch_network(responses, deadline, &closed),
            self.scan_bodies(bodies, deadline, &closed),
            self.watch_dom(session, deadline, timing.dom_poll, &closed),
        );
        debug!(
            "Live discovery: {} network, {} dom, {} body candidate(s)",
            network.len(),
            dom.len(),
            body.len()
        );
        network.into_iter().chain(dom).chain(body).collect()
    }

    async fn watch_network(
        &self,
        mut rx: mpsc::UnboundedReceiver<ObservedResponse>,
        deadline: Instant,
        closed: &AtomicUsize,
    ) -> Vec<Candidate> {
        let mut out: Vec<Candidate> = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(resp)) => {
                    let by_url = self.profile.video_regex().is_match(&resp.url);
                    let by_mime = format_from_mime(&resp.mime_type)
                        .is_some_and(|f| self.profile.video_types.contains(&f));
                    if !(by_url || by_mime) || out.iter().any(|c| c.url == resp.url) {
                        continue;
                    }
                    let mut c = Candidate::new(resp.url, Strategy::NetworkIntercept, out.len() as u32);
                    if c.format.is_none() {
                        c.format = format_from_mime(&resp.mime_type);
                    }
                    out.push(c);
                }
                Ok(None) => {
                    closed.fetch_add(1, Ordering::SeqCst);
                    break;
                }
                Err(_) => break,
            }
        }
        out
    }

    async fn scan_bodies(
        &self,
        mut rx: mpsc::UnboundedReceiver<ObservedBody>,
        deadline: Instant,
        closed: &AtomicUsize,
    ) -> Vec<Candidate> {
        let mut out: Vec<Candidate> = Vec::new();
        loop {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(body)) => {
                    for url in find_video_urls(&body.body, self.profile.video_regex()) {
                        if !out.iter().any(|c| c.url == url) {
                            let seq = out.len() as u32;
                            out.push(Candidate::new(url, Strategy::ResponseBody, seq));
                        }
                    }
                }
                Ok(None) => {
                    closed.fetch_add(1, Ordering::SeqCst);
                    break;
                }
                Err(_) => break,
            }
        }
        out
    }

    /// Poll the injected hooks until the deadline, or until both network
    /// feeds have ended and one more poll has run.
    async fn watch_dom(
        &self,
        session: &dyn BrowserSession,
        deadline: Instant,
        poll: Duration,
        closed: &AtomicUsize,
    ) -> Vec<Candidate> {
        let mut out: Vec<Candidate> = Vec::new();
        let mut seen = HashSet::new();
        loop {
            let feeds_done = closed.load(Ordering::SeqCst) >= 2;
            match session.dom_video_urls().await {
                Ok(urls) => {
                    for url in urls {
                        if self.profile.video_regex().is_match(&url) && seen.insert(url.clone()) {
                            let seq = out.len() as u32;
                            out.push(Candidate::new(url, Strategy::DomMutation, seq));
                        }
                    }
                }
                Err(e) => debug!("DOM poll failed: {}", e),
            }
            if feeds_done || Instant::now() + poll > deadline {
                break;
            }
            tokio::time::sleep(poll).await;
            // Feeds may have closed while sleeping; loop once more to poll.
        }
        out
    }

    /// Regex sweep over the final HTML: video URLs, media element sources,
    /// encoded partner links and advertised OpenGraph/JSON-LD videos.
    pub fn sweep(&self, page: &PageSnapshot, meta: &PageMetadata) -> Vec<Candidate> {
        let re = self.profile.video_regex();
        let mut urls = find_video_urls(&page.html, re);
        urls.extend(
            media_element_sources(&page.html, &page.final_url)
                .into_iter()
                .filter(|u| re.is_match(u)),
        );
        urls.extend(partner_links(&page.html));
        urls.extend(meta.advertised_video.iter().filter(|u| re.is_match(u)).cloned());
        urls.extend(meta.catalog_entries.iter().map(|(v, _)| v.clone()).filter(|u| re.is_match(u)));

        let mut out: Vec<Candidate> = Vec::new();
        for url in urls {
            if !out.iter().any(|c| c.url == url) {
                let seq = out.len() as u32;
                out.push(Candidate::new(url, Strategy::FallbackSweep, seq));
            }
        }
        out
    }

    /// Drop candidates outside the CDN restriction or the profile's
    /// formats, and exact duplicates (keeping the best-ranked copy).
    fn filter(&self, mut candidates: Vec<Candidate>) -> Vec<Candidate> {
        candidates.sort_by(|a, b| {
            (a.strategy.rank(), a.seq, &a.url).cmp(&(b.strategy.rank(), b.seq, &b.url))
        });
        let mut seen = HashSet::new();
        candidates
            .into_iter()
            .filter(|c| self.profile.accepts_video_host(&c.url))
            .filter(|c| {
                c.format
                    .map(|f| self.profile.video_types.contains(&f))
                    .unwrap_or(true)
            })
            .filter(|c| seen.insert(c.url.clone()))
            .collect()
    }

    fn build_record(
        &self,
        merged: MergedClip,
        page: &PageSnapshot,
        meta: &PageMetadata,
        page_clip_id: Option<&str>,
    ) -> ClipRecord {
        let mut record = ClipRecord::new(self.profile.name.clone(), merged.clip_id.clone());
        let page_url = normalize_url(&page.final_url).unwrap_or_else(|| page.final_url.clone());

        if page_clip_id == Some(merged.clip_id.as_str()) {
            record.source_url = page_url;
            record.title = meta.title.clone();
            record.creator = meta.creator.clone();
            record.collection = meta.collection.clone();
            record.tags = meta.tags.clone();
            record.resolution = meta.resolution.clone();
            record.duration = meta.duration.clone();
            record.frame_rate = meta.frame_rate.clone();
            record.camera = meta.camera.clone();
            record.thumbnail_url = meta.thumbnail_url.clone();
            record.seen_tiers.extend(meta.listed_tiers.iter().copied());
        } else {
            let link = meta
                .catalog_entries
                .iter()
                .find(|(video, _)| *video == merged.best.url)
                .map(|(_, link)| link.clone());
            match link {
                Some(link) => {
                    record.title = title_from_slug(&link).unwrap_or_default();
                    record.source_url = normalize_url(&link).unwrap_or(link);
                }
                None => record.source_url = page_url,
            }
        }

        if let Some(hint) = ResolutionHint::from_url(&merged.best.url) {
            if record.resolution.is_empty() {
                record.resolution = hint.resolution();
            }
            if record.frame_rate.is_empty() {
                record.frame_rate = hint.fps.to_string();
            }
        }

        record.seen_tiers.extend(merged.tiers.iter().copied());
        record.video = Some(FormatUrl {
            url: merged.best.url.clone(),
            tier: merged.best.tier,
            format: merged.best.format,
        });
        record
    }
}

/// Group candidates by clip id and keep the best of each group.
///
/// Clip id: the URL's explicit id, else the page's clip id, else a hash of
/// the URL without its query. When the page's own clip is among the
/// explicit ids, other explicit ids are related-clip previews and dropped.
pub fn merge_candidates(candidates: Vec<Candidate>, page_clip_id: Option<&str>) -> Vec<MergedClip> {
    let page_is_present = page_clip_id.is_some_and(|pid| {
        candidates
            .iter()
            .any(|c| c.explicit_id.as_deref() == Some(pid))
    });

    let mut groups: BTreeMap<String, Vec<Candidate>> = BTreeMap::new();
    for c in candidates {
        let clip_id = match (&c.explicit_id, page_clip_id) {
            (Some(id), Some(pid)) if page_is_present && id != pid => continue,
            (Some(id), _) => id.clone(),
            (None, Some(pid)) => pid.to_string(),
            (None, None) => {
                let base = c.url.split(['?', '#']).next().unwrap_or(&c.url);
                url_hash_id(base)
            }
        };
        groups.entry(clip_id).or_default().push(c);
    }

    groups
        .into_iter()
        .filter_map(|(clip_id, group)| {
            let tiers = group.iter().map(|c| c.tier).collect();
            let count = group.len();
            let best = group.into_iter().min_by(|a, b| a.sort_key().cmp(&b.sort_key()))?;
            Some(MergedClip {
                clip_id,
                best,
                tiers,
                candidates: count,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scrapers::profile::SiteProfile;

    fn c(url: &str, strategy: Strategy, seq: u32) -> Candidate {
        Candidate::new(url, strategy, seq)
    }

    const UHD: &str = "https://videos.pexels.com/video-files/1000/1000-uhd_3840_2160_25fps.mp4";
    const SD: &str = "https://videos.pexels.com/video-files/1000/1000-sd_640_360_25fps.mp4";
    const RELATED: &str = "https://videos.pexels.com/video-files/2000/2000-hd_1920_1080_25fps.mp4";

    #[test]
    fn test_merge_keeps_highest_tier() {
        let merged = merge_candidates(
            vec![c(SD, Strategy::NetworkIntercept, 0), c(UHD, Strategy::ResponseBody, 0)],
            None,
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].clip_id, "1000");
        assert_eq!(merged[0].best.url, UHD);
        assert_eq!(
            merged[0].tiers,
            BTreeSet::from([QualityTier::Sd, QualityTier::Uhd])
        );
    }

    #[test]
    fn test_merge_is_order_independent() {
        let a = "https://cdn.example.com/clip-hd_a.mp4";
        let b = "https://cdn.example.com/clip-hd_b.mp4";
        let forward = vec![c(a, Strategy::DomMutation, 0), c(b, Strategy::NetworkIntercept, 0)];
        let mut backward = forward.clone();
        backward.reverse();
        let m1 = merge_candidates(forward, Some("7"));
        let m2 = merge_candidates(backward, Some("7"));
        assert_eq!(m1, m2);
        // Same tier: network outranks dom
        assert_eq!(m1[0].best.url, b);
    }

    #[test]
    fn test_related_previews_dropped_when_page_clip_present() {
        let merged = merge_candidates(
            vec![c(UHD, Strategy::NetworkIntercept, 0), c(RELATED, Strategy::NetworkIntercept, 1)],
            Some("1000"),
        );
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].clip_id, "1000");

        // Page clip absent: everything is kept
        let merged = merge_candidates(vec![c(RELATED, Strategy::NetworkIntercept, 0)], Some("1000"));
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].clip_id, "2000");
    }

    #[test]
    fn test_unidentified_candidates_use_page_id() {
        let merged = merge_candidates(
            vec![c("https://cdn.example.com/master.m3u8?token=1", Strategy::DomMutation, 0)],
            Some("555"),
        );
        assert_eq!(merged[0].clip_id, "555");
        let merged = merge_candidates(
            vec![c("https://cdn.example.com/master.m3u8?token=1", Strategy::DomMutation, 0)],
            None,
        );
        assert_eq!(merged[0].clip_id, url_hash_id("https://cdn.example.com/master.m3u8"));
    }

    #[test]
    fn test_analyze_falls_back_to_sweep() {
        let mut def = SiteProfile::new("pexels", "Pexels");
        def.video_types = vec![VideoFormat::Mp4];
        def.video_cdn_domain = Some("videos.pexels.com".to_string());
        def.item_url_regex = Some(r"/video/[^/]+-\d+/?$".to_string());
        let profile = def.compile().unwrap();
        let page = PageSnapshot {
            requested_url: "https://www.pexels.com/video/waves-1000/".to_string(),
            final_url: "https://www.pexels.com/video/waves-1000/".to_string(),
            status: Some(200),
            title: "Waves".to_string(),
            html: format!(r#"<video src="{}"></video><a href="https://other.example.com/x.mp4">x</a>"#, SD),
            body_text: String::new(),
        };
        let report = VideoDiscovery::new(&profile).analyze(&page, Vec::new(), 0);
        assert!(report.fallback_used);
        assert_eq!(report.page_clip_id.as_deref(), Some("1000"));
        assert_eq!(report.clips.len(), 1);
        let clip = &report.clips[0];
        assert_eq!(clip.site, "Pexels");
        assert_eq!(clip.clip_id, "1000");
        assert_eq!(clip.title, "Waves");
        assert_eq!(clip.resolution, "640x360");
        assert_eq!(clip.video.as_ref().unwrap().url, SD);
    }
}
