//! Browser sessions driven by the crawler.
//!
//! [`BrowserSession`] is the seam between the crawl engine and a real
//! browser. The Chrome implementation uses chromiumoxide (CDP) with stealth
//! evasion; tests drive the crawler with an in-process session instead.

mod config;
mod scripts;
mod stealth;

#[cfg(feature = "browser")]
mod chrome;

pub use config::{default_headless, BrowserSettings};
#[cfg(feature = "browser")]
pub use chrome::ChromeSession;

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Largest response body handed to the body scan.
pub const MAX_SCANNED_BODY: usize = 512 * 1024;

/// The rendered state of the current page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageSnapshot {
    pub requested_url: String,
    pub final_url: String,
    /// HTTP status of the main document, when the browser reported one.
    pub status: Option<u16>,
    pub title: String,
    pub html: String,
    /// Visible text (`document.body.innerText`).
    pub body_text: String,
}

/// Resource type of an observed network response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceKind {
    Document,
    Xhr,
    Fetch,
    Media,
    Script,
    Other,
}

/// One network response seen while the page loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedResponse {
    pub url: String,
    pub mime_type: String,
    pub kind: ResourceKind,
    pub status: Option<u16>,
}

impl ObservedResponse {
    /// Script-initiated textual responses may embed player configs.
    pub fn body_worth_scanning(&self) -> bool {
        matches!(self.kind, ResourceKind::Xhr | ResourceKind::Fetch)
            && (self.mime_type.contains("json") || self.mime_type.starts_with("text/"))
    }
}

/// A textual response body captured for scanning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObservedBody {
    pub url: String,
    pub mime_type: String,
    pub body: String,
}

/// Event streams of the current page, consumed by the discovery pipeline.
///
/// Each navigation starts fresh feeds. A feed ends when its sender is
/// dropped; live browsers keep them open until the next navigation.
pub struct DiscoveryFeeds {
    pub responses: mpsc::UnboundedReceiver<ObservedResponse>,
    pub bodies: mpsc::UnboundedReceiver<ObservedBody>,
}

impl DiscoveryFeeds {
    /// Feeds that yield nothing.
    pub fn closed() -> Self {
        let (_, responses) = mpsc::unbounded_channel();
        let (_, bodies) = mpsc::unbounded_channel();
        Self { responses, bodies }
    }
}

/// A browser tab the crawler drives through pages.
///
/// Page operations take `&self` so discovery strategies can run
/// concurrently against one page. Navigation and mode switches take
/// `&mut self`.
#[async_trait]
pub trait BrowserSession: Send + Sync {
    /// Load `url` in a fresh page and return its rendered state.
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<PageSnapshot>;

    /// Re-read the current page without navigating.
    async fn snapshot(&self) -> Result<PageSnapshot>;

    /// Network feeds of the current page. Returns closed feeds when taken
    /// twice or before any navigation.
    fn take_feeds(&mut self) -> DiscoveryFeeds;

    /// Video URLs collected by the injected hooks plus current
    /// `<video>`/`<source>` sources.
    async fn dom_video_urls(&self) -> Result<Vec<String>>;

    /// Scroll down in `steps` increments, pausing `delay` after each.
    async fn scroll(&self, steps: u32, delay: Duration) -> Result<()>;

    /// Click the first visible match of `selector` until it disappears or
    /// `max_clicks` is reached. Returns the number of clicks.
    async fn click_load_more(&self, selector: &str, max_clicks: u32, delay: Duration)
        -> Result<u32>;

    /// Hover previews and start muted playback of lazy players.
    async fn trigger_players(&self) -> Result<()>;

    async fn evaluate(&self, script: &str) -> Result<()>;

    fn is_headless(&self) -> bool;

    /// Switch between headless and a visible window. The current page is
    /// lost; callers re-navigate.
    async fn set_visible(&mut self, visible: bool) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

/// Creates browser sessions for crawl workers.
#[async_trait]
pub trait SessionLauncher: Send + Sync {
    async fn launch(&self, headless: bool) -> Result<Box<dyn BrowserSession>>;
}

/// Launches Chrome sessions from [`BrowserSettings`].
#[derive(Debug, Clone, Default)]
pub struct ChromeLauncher {
    settings: BrowserSettings,
}

impl ChromeLauncher {
    pub fn new(settings: BrowserSettings) -> Self {
        Self { settings }
    }
}

#[cfg(feature = "browser")]
#[async_trait]
impl SessionLauncher for ChromeLauncher {
    async fn launch(&self, headless: bool) -> Result<Box<dyn BrowserSession>> {
        let session = ChromeSession::launch(self.settings.clone(), headless).await?;
        Ok(Box::new(session))
    }
}

#[cfg(not(feature = "browser"))]
#[async_trait]
impl SessionLauncher for ChromeLauncher {
    async fn launch(&self, _headless: bool) -> Result<Box<dyn BrowserSession>> {
        let _ = &self.settings;
        Err(anyhow::anyhow!(
            "Browser support not compiled. Rebuild with --features browser"
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_body_scan_eligibility() {
        let mut r = ObservedResponse {
            url: "https://example.com/api/clip".to_string(),
            mime_type: "application/json".to_string(),
            kind: ResourceKind::Fetch,
            status: Some(200),
        };
        assert!(r.body_worth_scanning());
        r.kind = ResourceKind::Document;
        assert!(!r.body_worth_scanning());
        r.kind = ResourceKind::Xhr;
        r.mime_type = "image/png".to_string();
        assert!(!r.body_worth_scanning());
    }

    #[tokio::test]
    async fn test_closed_feeds_yield_nothing() {
        let mut feeds = DiscoveryFeeds::closed();
        assert!(feeds.responses.recv().await.is_none());
        assert!(feeds.bodies.recv().await.is_none());
    }
}
