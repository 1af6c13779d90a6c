//! Chrome session over the DevTools protocol.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use base64::Engine;
use chromiumoxide::cdp::browser_protocol::network::{
    EnableParams, EventLoadingFinished, EventResponseReceived, GetResponseBodyParams,
    ResourceType, SetUserAgentOverrideParams,
};
use chromiumoxide::cdp::browser_protocol::page::{
    AddScriptToEvaluateOnNewDocumentParams, NavigateParams,
};
use chromiumoxide::{Browser, BrowserConfig, Page};
use futures::StreamExt;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::scripts::{
    click_visible, scroll_to_fraction, BODY_TEXT_SCRIPT, COLLECT_VIDEO_URLS_SCRIPT,
    READY_STATE_SCRIPT, TRIGGER_PLAYERS_SCRIPT, VIDEO_INTERCEPT_SCRIPT,
};
use super::stealth::stealth_script;
use super::{
    BrowserSession, BrowserSettings, DiscoveryFeeds, ObservedBody, ObservedResponse,
    PageSnapshot, ResourceKind, MAX_SCANNED_BODY,
};

/// Common Chrome executable paths to check.
const CHROME_PATHS: &[&str] = &[
    // Linux
    "/usr/bin/google-chrome",
    "/usr/bin/google-chrome-stable",
    "/usr/bin/chromium",
    "/usr/bin/chromium-browser",
    "/snap/bin/chromium",
    // macOS
    "/Applications/Google Chrome.app/Contents/MacOS/Google Chrome",
    "/Applications/Chromium.app/Contents/MacOS/Chromium",
    // Common install locations
    "/opt/google/chrome/google-chrome",
];

/// Find Chrome executable.
fn find_chrome(explicit: Option<&str>) -> Result<PathBuf> {
    if let Some(path) = explicit {
        let p = PathBuf::from(shellexpand::tilde(path).as_ref());
        if p.exists() {
            return Ok(p);
        }
        bail!("Configured Chrome executable not found: {}", path);
    }

    for path in CHROME_PATHS {
        let p = std::path::Path::new(path);
        if p.exists() {
            info!("Found Chrome at: {}", path);
            return Ok(p.to_path_buf());
        }
    }

    for cmd in &[
        "google-chrome",
        "google-chrome-stable",
        "chromium",
        "chromium-browser",
    ] {
        if let Ok(path) = which::which(cmd) {
            info!("Found Chrome in PATH: {}", path.display());
            return Ok(path);
        }
    }

    Err(anyhow!(
        "Chrome/Chromium not found. Install it or set browser.chrome_path:\n\
         - Arch/Manjaro: sudo pacman -S chromium\n\
         - Ubuntu/Debian: sudo apt install chromium-browser\n\
         - Fedora: sudo dnf install chromium\n\
         - Or download from: https://www.google.com/chrome/"
    ))
}

impl ResourceKind {
    fn from_cdp(kind: &ResourceType) -> Self {
        match kind {
            ResourceType::Document => Self::Document,
            ResourceType::Xhr => Self::Xhr,
            ResourceType::Fetch => Self::Fetch,
            ResourceType::Media => Self::Media,
            ResourceType::Script => Self::Script,
            _ => Self::Other,
        }
    }
}

/// One Chrome instance with at most one open page.
pub struct ChromeSession {
    settings: BrowserSettings,
    headless: bool,
    browser: Option<Browser>,
    handler: Option<JoinHandle<()>>,
    page: Option<Page>,
    listener: Option<JoinHandle<()>>,
    feeds: Option<DiscoveryFeeds>,
    document_status: Arc<AtomicU16>,
    requested_url: String,
}

impl ChromeSession {
    /// Launch Chrome, or attach to `settings.remote_url` when set.
    pub async fn launch(settings: BrowserSettings, headless: bool) -> Result<Self> {
        let mut session = Self {
            settings,
            headless,
            browser: None,
            handler: None,
            page: None,
            listener: None,
            feeds: None,
            document_status: Arc::new(AtomicU16::new(0)),
            requested_url: String::new(),
        };
        session.start_browser().await?;
        Ok(session)
    }

    async fn start_browser(&mut self) -> Result<()> {
        if let Some(remote_url) = self.settings.remote_url.clone() {
            return self.connect_remote(&remote_url).await;
        }

        info!("Launching browser (headless={})", self.headless);
        let chrome_path = find_chrome(self.settings.chrome_path.as_deref())?;

        let mut builder = BrowserConfig::builder().chrome_executable(chrome_path);

        // with_head means NOT headless
        if !self.headless {
            builder = builder.with_head();
        }

        if let Some(ref proxy) = self.settings.proxy {
            builder = builder.arg(format!("--proxy-server={}", proxy));
        }

        builder = builder
            .arg("--disable-blink-features=AutomationControlled")
            .arg("--disable-infobars")
            .arg("--disable-dev-shm-usage")
            .arg("--no-first-run")
            .arg("--no-default-browser-check")
            .arg("--disable-background-networking")
            .arg("--disable-sync")
            .arg("--disable-translate")
            .arg("--metrics-recording-only")
            .arg("--safebrowsing-disable-auto-update")
            .arg("--autoplay-policy=no-user-gesture-required")
            .arg("--mute-audio")
            .arg("--no-sandbox")
            .arg("--disable-gpu")
            .arg("--disable-software-rasterizer");

        for arg in &self.settings.chrome_args {
            builder = builder.arg(arg);
        }

        let config = builder
            .build()
            .map_err(|e| anyhow!("Failed to build browser config: {}", e))?;

        let (browser, mut handler) = Browser::launch(config)
            .await
            .context("Failed to launch browser")?;

        self.handler = Some(tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        }));
        self.browser = Some(browser);
        Ok(())
    }

    /// Connect to a remote Chrome instance.
    async fn connect_remote(&mut self, url: &str) -> Result<()> {
        info!("Connecting to remote browser at {}", url);

        let http_url = url
            .replace("ws://", "http://")
            .replace("wss://", "https://");
        let version_url = format!("{}/json/version", http_url.trim_end_matches('/'));

        let resp: serde_json::Value = reqwest::Client::new()
            .get(&version_url)
            .send()
            .await
            .context("Failed to connect to remote browser")?
            .json()
            .await
            .context("Failed to parse browser version info")?;

        let ws_url = resp
            .get("webSocketDebuggerUrl")
            .and_then(|v| v.as_str())
            .ok_or_else(|| anyhow!("No webSocketDebuggerUrl in response"))?;

        debug!("Connecting to WebSocket: {}", ws_url);
        let (browser, mut handler) = Browser::connect(ws_url)
            .await
            .context("Failed to connect to remote browser")?;

        self.handler = Some(tokio::spawn(async move {
            while let Some(h) = handler.next().await {
                if h.is_err() {
                    break;
                }
            }
        }));
        self.browser = Some(browser);
        Ok(())
    }

    fn page(&self) -> Result<&Page> {
        self.page.as_ref().ok_or_else(|| anyhow!("no page loaded"))
    }

    async fn close_page(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        self.feeds = None;
        if let Some(page) = self.page.take() {
            if let Err(e) = page.close().await {
                debug!("Closing page failed: {}", e);
            }
        }
    }

    async fn shutdown(&mut self) {
        self.close_page().await;
        if let Some(mut browser) = self.browser.take() {
            // Attached browsers belong to someone else.
            if self.settings.remote_url.is_none() {
                if let Err(e) = browser.close().await {
                    debug!("Browser close failed: {}", e);
                }
                let _ = browser.wait().await;
            }
        }
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
    }

    /// Forward response events into fresh discovery feeds. Bodies of
    /// eligible responses are fetched once loading finishes.
    async fn start_listener(&mut self, page: &Page) -> Result<()> {
        let mut responses = page
            .event_listener::<EventResponseReceived>()
            .await
            .context("Failed to subscribe to network responses")?;
        let mut finished = page
            .event_listener::<EventLoadingFinished>()
            .await
            .context("Failed to subscribe to network completions")?;

        let (resp_tx, resp_rx) = mpsc::unbounded_channel();
        let (body_tx, body_rx) = mpsc::unbounded_channel();
        let status = self.document_status.clone();
        status.store(0, Ordering::SeqCst);
        let page = page.clone();

        self.listener = Some(tokio::spawn(async move {
            let mut pending = HashMap::new();
            loop {
                tokio::select! {
                    Some(event) = responses.next() => {
                        let response = &event.response;
                        let kind = ResourceKind::from_cdp(&event.r#type);
                        let code = u16::try_from(response.status).ok();
                        if kind == ResourceKind::Document {
                            if let Some(code) = code {
                                let _ = status.compare_exchange(0, code, Ordering::SeqCst, Ordering::SeqCst);
                            }
                        }
                        let observed = ObservedResponse {
                            url: response.url.clone(),
                            mime_type: response.mime_type.clone(),
                            kind,
                            status: code,
                        };
                        if observed.body_worth_scanning() {
                            pending.insert(
                                event.request_id.inner().clone(),
                                (event.request_id.clone(), observed.url.clone(), observed.mime_type.clone()),
                            );
                        }
                        let _ = resp_tx.send(observed);
                    }
                    Some(event) = finished.next() => {
                        let Some((request_id, url, mime_type)) = pending.remove(event.request_id.inner()) else {
                            continue;
                        };
                        if event.encoded_data_length > MAX_SCANNED_BODY as f64 {
                            continue;
                        }
                        match page.execute(GetResponseBodyParams::new(request_id)).await {
                            Ok(resp) => {
                                let body = if resp.result.base64_encoded {
                                    base64::engine::general_purpose::STANDARD
                                        .decode(&resp.result.body)
                                        .map(|b| String::from_utf8_lossy(&b).into_owned())
                                        .unwrap_or_default()
                                } else {
                                    resp.result.body.clone()
                                };
                                if !body.is_empty() && body.len() <= MAX_SCANNED_BODY {
                                    let _ = body_tx.send(ObservedBody { url, mime_type, body });
                                }
                            }
                            Err(e) => debug!("Response body unavailable for {}: {}", url, e),
                        }
                    }
                    else => break,
                }
            }
        }));

        self.feeds = Some(DiscoveryFeeds {
            responses: resp_rx,
            bodies: body_rx,
        });
        Ok(())
    }

    async fn wait_ready(page: &Page, timeout: Duration) {
        match tokio::time::timeout(timeout, page.evaluate(READY_STATE_SCRIPT.to_string())).await {
            Ok(Ok(result)) => {
                let state: String = result
                    .into_value()
                    .unwrap_or_else(|_| "unknown".to_string());
                debug!("Page ready state: {}", state);
            }
            Ok(Err(e)) => debug!("Could not check ready state: {}", e),
            Err(_) => warn!("Timeout waiting for page ready state"),
        }
    }
}

#[async_trait]
impl BrowserSession for ChromeSession {
    async fn navigate(&mut self, url: &str, timeout: Duration) -> Result<PageSnapshot> {
        self.close_page().await;
        let browser = self
            .browser
            .as_ref()
            .ok_or_else(|| anyhow!("browser is not running"))?;

        let page = browser
            .new_page("about:blank")
            .await
            .context("Failed to open page")?;

        // User agent and init scripts must be in place before navigation
        page.execute(SetUserAgentOverrideParams::new(
            self.settings.user_agent.clone(),
        ))
        .await?;
        page.execute(EnableParams::default()).await?;
        if let Some(script) = stealth_script(&self.settings, self.headless) {
            page.evaluate_on_new_document(AddScriptToEvaluateOnNewDocumentParams::new(script))
                .await?;
        }
        page.evaluate_on_new_document(AddScriptToEvaluateOnNewDocumentParams::new(
            VIDEO_INTERCEPT_SCRIPT.to_string(),
        ))
        .await?;
        self.start_listener(&page).await?;

        info!("Navigating to {}", url);
        let nav_params = NavigateParams::builder()
            .url(url)
            .build()
            .map_err(|e| anyhow!("Invalid URL: {}", e))?;

        let navigated = tokio::time::timeout(timeout, page.execute(nav_params))
            .await
            .map_err(|_| anyhow!("timed out after {}s", timeout.as_secs()))?
            .context("navigation failed")?;
        if let Some(error) = navigated.result.error_text.as_deref() {
            self.page = Some(page);
            bail!("navigation failed: {}", error);
        }

        Self::wait_ready(&page, timeout).await;
        self.page = Some(page);
        self.requested_url = url.to_string();
        self.snapshot().await
    }

    async fn snapshot(&self) -> Result<PageSnapshot> {
        let page = self.page()?;
        let final_url = page
            .url()
            .await?
            .map(|u| u.to_string())
            .unwrap_or_else(|| self.requested_url.clone());
        let title = page.get_title().await?.unwrap_or_default();
        let html = page.content().await?;
        let body_text: String = page
            .evaluate(BODY_TEXT_SCRIPT.to_string())
            .await
            .ok()
            .and_then(|r| r.into_value().ok())
            .unwrap_or_default();
        let status = match self.document_status.load(Ordering::SeqCst) {
            0 => None,
            code => Some(code),
        };
        Ok(PageSnapshot {
            requested_url: self.requested_url.clone(),
            final_url,
            status,
            title,
            html,
            body_text,
        })
    }

    fn take_feeds(&mut self) -> DiscoveryFeeds {
        self.feeds.take().unwrap_or_else(DiscoveryFeeds::closed)
    }

    async fn dom_video_urls(&self) -> Result<Vec<String>> {
        let urls: Vec<String> = self
            .page()?
            .evaluate(COLLECT_VIDEO_URLS_SCRIPT.to_string())
            .await?
            .into_value()
            .unwrap_or_default();
        Ok(urls)
    }

    async fn scroll(&self, steps: u32, delay: Duration) -> Result<()> {
        let page = self.page()?;
        let steps = steps.max(1);
        for i in 1..=steps {
            page.evaluate(scroll_to_fraction(i as f64 / steps as f64))
                .await?;
            tokio::time::sleep(delay).await;
        }
        page.evaluate(scroll_to_fraction(1.0)).await?;
        Ok(())
    }

    async fn click_load_more(
        &self,
        selector: &str,
        max_clicks: u32,
        delay: Duration,
    ) -> Result<u32> {
        let page = self.page()?;
        let script = click_visible(selector);
        let mut clicks = 0;
        while clicks < max_clicks {
            let clicked: bool = page
                .evaluate(script.clone())
                .await?
                .into_value()
                .unwrap_or(false);
            if !clicked {
                break;
            }
            clicks += 1;
            tokio::time::sleep(delay).await;
        }
        debug!("Clicked load-more {} time(s)", clicks);
        Ok(clicks)
    }

    async fn trigger_players(&self) -> Result<()> {
        self.page()?.evaluate(TRIGGER_PLAYERS_SCRIPT.to_string()).await?;
        Ok(())
    }

    async fn evaluate(&self, script: &str) -> Result<()> {
        self.page()?.evaluate(script.to_string()).await?;
        Ok(())
    }

    fn is_headless(&self) -> bool {
        self.headless
    }

    async fn set_visible(&mut self, visible: bool) -> Result<()> {
        if self.headless != visible {
            return Ok(());
        }
        if self.settings.remote_url.is_some() {
            warn!("Attached browser cannot change visibility; continuing as is");
            return Ok(());
        }
        info!(
            "Relaunching browser {}",
            if visible { "visibly" } else { "headless" }
        );
        self.shutdown().await;
        self.headless = !visible;
        self.start_browser().await
    }

    async fn close(&mut self) -> Result<()> {
        self.shutdown().await;
        Ok(())
    }
}

impl Drop for ChromeSession {
    fn drop(&mut self) {
        if let Some(listener) = self.listener.take() {
            listener.abort();
        }
        if let Some(handler) = self.handler.take() {
            handler.abort();
        }
    }
}
