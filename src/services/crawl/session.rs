//! One profile's crawl session: browser, frontier and challenge gate.

use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use rand::Rng;
use tokio::sync::{mpsc, Notify};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::queue::CrawlQueue;
use super::types::{CrawlError, CrawlEvent, CrawlStats, ProfileSummary, StopReason};
use crate::config::CrawlSettings;
use crate::models::{CrawlQueueEntry, CrawledPage, PageOutcome};
use crate::repository::{MetadataStore, StoreError, UpsertOutcome};
use crate::scrapers::challenge::{Backoff, ChallengeSignal, SolveBudget};
use crate::scrapers::links::extract_links;
use crate::scrapers::profile::{Pagination, SEED_PRIORITY};
use crate::scrapers::{
    BrowserSession, ChallengeDetector, ChallengeState, CompiledProfile, DiscoveryTiming,
    PageSnapshot, SessionLauncher, VideoDiscovery,
};

/// What happened to one dequeued entry.
enum Visit {
    Finished { clips: usize, new_links: usize, error: Option<String> },
    Cancelled,
}

/// Result of waiting on a challenge.
enum Gate {
    Cleared,
    Cancelled,
}

/// Everything one profile's worker task owns.
pub(crate) struct ProfileCrawl {
    pub profile: Arc<CompiledProfile>,
    pub store: Arc<MetadataStore>,
    pub settings: CrawlSettings,
    pub launcher: Arc<dyn SessionLauncher>,
    pub start_url: Option<String>,
    pub events: mpsc::UnboundedSender<CrawlEvent>,
    pub cancel: CancellationToken,
    pub solved: Arc<Notify>,
}

/// Mutable state of a running session.
struct SessionState {
    queue: CrawlQueue,
    stats: CrawlStats,
    budget: SolveBudget,
    backoff: Backoff,
    detector: ChallengeDetector,
    gate: ChallengeState,
}

impl ProfileCrawl {
    fn emit(&self, event: CrawlEvent) {
        let _ = self.events.send(event);
    }

    fn id(&self) -> String {
        self.profile.id.clone()
    }

    /// Run until the frontier drains, stop is requested or a fatal error.
    pub async fn run(self) -> ProfileSummary {
        let mut state = SessionState {
            queue: CrawlQueue::new(
                self.profile.effective_max_depth(self.settings.max_depth),
                self.settings.page_limit(),
            ),
            stats: CrawlStats::default(),
            budget: SolveBudget::new(self.settings.manual_solve_cap()),
            backoff: Backoff::default(),
            detector: self
                .profile
                .challenge_markers
                .iter()
                .fold(ChallengeDetector::new(), |d, marker| d.with_text(marker)),
            gate: ChallengeState::Clear,
        };

        let reason = match self.seed(&mut state.queue) {
            Ok((seeds, resumed)) => {
                self.emit(CrawlEvent::Started {
                    profile: self.id(),
                    seeds,
                    resumed,
                });
                self.drive(&mut state).await
            }
            Err(e) => StopReason::Fatal(e.to_string()),
        };

        let persisted = match self.persist(&state.queue) {
            Ok(n) => n,
            Err(e) => {
                warn!("[{}] Failed to persist pending queue: {}", self.profile.id, e);
                0
            }
        };

        state.stats.queued = state.queue.len();
        let summary = ProfileSummary {
            profile: self.id(),
            stats: state.stats,
            reason,
            persisted,
        };
        info!(
            "[{}] Crawl stopped ({:?}): {} pages, {} clips, {} queued",
            self.profile.id, summary.reason, summary.stats.pages, summary.stats.clips_found, persisted
        );
        self.emit(CrawlEvent::Stopped {
            profile: self.id(),
            summary: summary.clone(),
        });
        summary
    }

    /// Seed the frontier. Returns (seed count, restored entries).
    fn seed(&self, queue: &mut CrawlQueue) -> Result<(usize, usize), CrawlError> {
        let start = self
            .start_url
            .clone()
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| self.profile.start_url.clone());
        if start.trim().is_empty() {
            return Err(CrawlError::Navigation {
                url: String::new(),
                reason: format!("profile {} has no start URL", self.profile.id),
            });
        }

        // The start page is revisited on every run so new clips surface.
        let seeds = usize::from(queue.enqueue(&start, 0, SEED_PRIORITY, None));

        let mut resumed = 0;
        if self.settings.resume {
            for url in self.store.crawled_urls(&self.profile.id)? {
                queue.mark_seen(&url);
            }
            resumed = queue.restore(self.store.load_pending_queue(&self.profile.id)?);
            if resumed > 0 {
                info!("[{}] Resuming with {} queued URLs", self.profile.id, resumed);
            }
        }
        Ok((seeds, resumed))
    }

    fn persist(&self, queue: &CrawlQueue) -> Result<usize, StoreError> {
        let pending = queue.pending_entries();
        if pending.is_empty() {
            self.store.clear_pending_queue(&self.profile.id)?;
            return Ok(0);
        }
        self.store.save_pending_queue(&self.profile.id, &pending)
    }

    async fn drive(&self, state: &mut SessionState) -> StopReason {
        let mut session = match self.launcher.launch(self.settings.headless).await {
            Ok(s) => s,
            Err(e) => {
                let err = CrawlError::BrowserLaunch {
                    profile: self.id(),
                    reason: format!("{:#}", e),
                };
                warn!("{}", err);
                return StopReason::Fatal(err.to_string());
            }
        };

        let reason = self.crawl_loop(session.as_mut(), state).await;

        if let Err(e) = session.close().await {
            debug!("[{}] Browser close failed: {}", self.profile.id, e);
        }
        reason
    }

    async fn crawl_loop(&self, session: &mut dyn BrowserSession, state: &mut SessionState) -> StopReason {
        let batch_size = self.settings.batch_size.max(1) as usize;
        let mut in_batch = 0usize;

        loop {
            if self.cancel.is_cancelled() {
                return StopReason::Cancelled;
            }
            let Some(entry) = state.queue.dequeue() else {
                return StopReason::Exhausted;
            };

            match self.visit(session, state, &entry).await {
                Ok(Visit::Cancelled) => return StopReason::Cancelled,
                Ok(Visit::Finished {
                    clips,
                    new_links,
                    error,
                }) => {
                    state.queue.mark_done(&entry.url);
                    state.stats.pages += 1;
                    if clips == 0 {
                        state.stats.no_clip_pages += 1;
                    }
                    self.record(&entry, PageOutcome::Success, clips, error.clone());
                    self.emit(CrawlEvent::PageFinished {
                        profile: self.id(),
                        url: entry.url.clone(),
                        outcome: PageOutcome::Success,
                        clips,
                        new_links,
                        error,
                    });
                }
                Err(err) => {
                    state.queue.mark_failed(&entry.url);
                    state.stats.failed_pages += 1;
                    let outcome = match err {
                        CrawlError::ChallengeTimeout { .. } => PageOutcome::Challenge,
                        _ => PageOutcome::Error,
                    };
                    warn!("[{}] {}", self.profile.id, err);
                    self.record(&entry, outcome, 0, Some(err.to_string()));
                    self.emit(CrawlEvent::PageFinished {
                        profile: self.id(),
                        url: entry.url.clone(),
                        outcome,
                        clips: 0,
                        new_links: 0,
                        error: Some(err.to_string()),
                    });
                    if err.is_fatal() {
                        return StopReason::Fatal(err.to_string());
                    }
                }
            }

            in_batch += 1;
            if in_batch >= batch_size {
                in_batch = 0;
                state.stats.queued = state.queue.len();
                self.emit(CrawlEvent::Stats {
                    profile: self.id(),
                    stats: state.stats,
                });
                if let Err(e) = self.persist(&state.queue) {
                    warn!("[{}] Queue checkpoint failed: {}", self.profile.id, e);
                }
                tokio::task::yield_now().await;
            }

            if state.queue.is_empty() {
                continue;
            }
            let jitter = rand::rng().random_range(0.6..=1.5);
            let delay = state.backoff.delay(self.settings.page_delay(), jitter);
            tokio::select! {
                _ = self.cancel.cancelled() => return StopReason::Cancelled,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn record(&self, entry: &CrawlQueueEntry, outcome: PageOutcome, clips: usize, error: Option<String>) {
        let page = CrawledPage {
            url: entry.url.clone(),
            profile: self.profile.id.clone(),
            depth: entry.depth,
            outcome,
            clip_count: clips as u32,
            error,
            crawled_at: Utc::now(),
        };
        if let Err(e) = self.store.record_crawled_page(&page) {
            warn!("[{}] Failed to record {}: {}", self.profile.id, entry.url, e);
        }
    }

    async fn navigate(&self, session: &mut dyn BrowserSession, url: &str) -> Result<PageSnapshot, CrawlError> {
        session
            .navigate(url, self.settings.timeout())
            .await
            .map_err(|e| CrawlError::Navigation {
                url: url.to_string(),
                reason: format!("{:#}", e),
            })
    }

    async fn visit(
        &self,
        session: &mut dyn BrowserSession,
        state: &mut SessionState,
        entry: &CrawlQueueEntry,
    ) -> Result<Visit, CrawlError> {
        let url = entry.url.as_str();
        debug!("[{}] Visiting d{} p{} {}", self.profile.id, entry.depth, entry.priority, url);
        self.emit(CrawlEvent::PageStarted {
            profile: self.id(),
            url: url.to_string(),
            depth: entry.depth,
        });

        let mut page = self.navigate(session, url).await?;

        let mut challenged = false;
        while let Some(signal) = state.detector.detect(&page) {
            challenged = true;
            match self.wait_for_solve(session, state, url, &signal).await? {
                Gate::Cancelled => return Ok(Visit::Cancelled),
                Gate::Cleared => {}
            }
            page = self.navigate(session, url).await?;
        }
        if challenged {
            state.backoff.relax();
            self.advance(state, url, ChallengeState::Clear);
        }

        self.paginate(session).await;

        if let Some(script) = self.profile.custom_js.as_deref().filter(|s| !s.trim().is_empty()) {
            if let Err(e) = session.evaluate(script).await {
                debug!("[{}] Custom script failed on {}: {}", self.profile.id, url, e);
            }
        }
        if let Err(e) = session.trigger_players().await {
            debug!("[{}] Triggering players failed on {}: {}", self.profile.id, url, e);
        }

        let mut error = None;
        match session.snapshot().await {
            Ok(snap) if !snap.html.is_empty() => page = snap,
            Ok(_) => {}
            Err(e) => {
                let err = CrawlError::Extraction {
                    url: url.to_string(),
                    reason: format!("{:#}", e),
                };
                warn!("[{}] {}", self.profile.id, err);
                error = Some(err.to_string());
            }
        }

        let discovery = VideoDiscovery::new(&self.profile);
        let report = discovery
            .run(session, &page, DiscoveryTiming::new(self.settings.m3u8_wait()))
            .await;
        if report.fallback_used {
            debug!("[{}] Fallback sweep used on {}", self.profile.id, url);
        }

        let clips = self.save_clips(state, report.clips, url)?;
        let new_links = self.enqueue_links(state, &page, entry);

        Ok(Visit::Finished {
            clips,
            new_links,
            error,
        })
    }

    async fn paginate(&self, session: &mut dyn BrowserSession) {
        let delay = self.settings.scroll_delay();
        let steps = self.settings.scroll_steps;
        let result = match &self.profile.pagination {
            Pagination::None => Ok(()),
            Pagination::InfiniteScroll => session.scroll(steps, delay).await,
            Pagination::LoadMore {
                selector,
                max_clicks,
            } => match session.click_load_more(selector, *max_clicks, delay).await {
                Ok(clicks) => {
                    debug!("[{}] Load more clicked {} times", self.profile.id, clicks);
                    session.scroll(steps, delay).await
                }
                Err(e) => Err(e),
            },
        };
        if let Err(e) = result {
            debug!("[{}] Pagination failed: {}", self.profile.id, e);
        }
    }

    fn save_clips(
        &self,
        state: &mut SessionState,
        records: Vec<crate::models::ClipRecord>,
        url: &str,
    ) -> Result<usize, CrawlError> {
        let mut saved = 0;
        for record in records {
            let key = record.key();
            match self.store.upsert_clip(&record) {
                Ok(result) => {
                    saved += 1;
                    state.stats.clips_found += 1;
                    match result.outcome {
                        UpsertOutcome::Inserted => state.stats.clips_new += 1,
                        UpsertOutcome::Upgraded => state.stats.clips_upgraded += 1,
                        _ => {}
                    }
                    self.emit(CrawlEvent::ClipSaved {
                        profile: self.id(),
                        key,
                        outcome: result.outcome,
                    });
                }
                Err(StoreError::Invalid(reason)) => {
                    warn!("[{}] Skipping clip from {}: {}", self.profile.id, url, reason);
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(saved)
    }

    fn enqueue_links(&self, state: &mut SessionState, page: &PageSnapshot, entry: &CrawlQueueEntry) -> usize {
        if entry.depth >= state.queue.max_depth() {
            return 0;
        }
        let base = if page.final_url.is_empty() {
            entry.url.as_str()
        } else {
            page.final_url.as_str()
        };
        extract_links(&page.html, base)
            .into_iter()
            .filter(|link| match self.profile.crawl_priority(link) {
                Some(priority) => {
                    state
                        .queue
                        .enqueue(link, entry.depth + 1, priority, Some(entry.url.as_str()))
                }
                None => false,
            })
            .count()
    }

    /// Show the browser and wait until a human clears the challenge or the
    /// session's solve budget runs out.
    async fn wait_for_solve(
        &self,
        session: &mut dyn BrowserSession,
        state: &mut SessionState,
        url: &str,
        signal: &ChallengeSignal,
    ) -> Result<Gate, CrawlError> {
        warn!("[{}] Challenge on {} ({})", self.profile.id, url, signal);
        state.stats.challenges += 1;
        state.backoff.escalate();
        self.advance(state, url, ChallengeState::ChallengeDetected);

        if session.is_headless() {
            info!("[{}] Switching browser to a visible window for manual solve", self.profile.id);
            session
                .set_visible(true)
                .await
                .map_err(|e| CrawlError::BrowserLaunch {
                    profile: self.id(),
                    reason: format!("{:#}", e),
                })?;
            if let Err(e) = session.navigate(url, self.settings.timeout()).await {
                debug!("[{}] Reloading challenge page failed: {}", self.profile.id, e);
            }
        }

        self.advance(state, url, ChallengeState::AwaitingManualSolve);
        let poll = self.settings.challenge_poll();
        loop {
            if state.budget.is_exhausted() {
                let waited = state.budget.spent();
                self.emit(CrawlEvent::ChallengeTimeout {
                    profile: self.id(),
                    url: url.to_string(),
                    waited,
                });
                return Err(CrawlError::ChallengeTimeout {
                    url: url.to_string(),
                    waited,
                });
            }

            let wait = poll.min(state.budget.remaining());
            let started = Instant::now();
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    state.budget.charge(started.elapsed());
                    return Ok(Gate::Cancelled);
                }
                _ = self.solved.notified() => {}
                _ = tokio::time::sleep(wait) => {}
            }
            state.budget.charge(started.elapsed());

            match session.snapshot().await {
                Ok(snap) if !snap.html.is_empty() && state.detector.detect(&snap).is_none() => {
                    info!("[{}] Challenge cleared on {}", self.profile.id, url);
                    self.advance(state, url, ChallengeState::Resumed);
                    return Ok(Gate::Cleared);
                }
                Ok(_) => {}
                Err(e) => debug!("[{}] Challenge poll failed: {}", self.profile.id, e),
            }
        }
    }

    /// Move the challenge gate. Every state but the return to `Clear` is
    /// reported; illegal moves are logged and dropped.
    fn advance(&self, state: &mut SessionState, url: &str, next: ChallengeState) {
        if !state.gate.can_transition_to(next) {
            warn!(
                "[{}] Ignoring challenge transition {} -> {} on {}",
                self.profile.id, state.gate, next, url
            );
            return;
        }
        state.gate = next;
        if next != ChallengeState::Clear {
            self.emit(CrawlEvent::Challenge {
                profile: self.id(),
                url: url.to_string(),
                state: next,
            });
        }
    }
}
