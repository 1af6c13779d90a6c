//! Crawl service types and events.

use std::time::Duration;

use crate::models::{ClipKey, PageOutcome};
use crate::repository::{StoreError, UpsertOutcome};
use crate::scrapers::ChallengeState;

/// Errors of a crawl session.
///
/// Navigation and extraction errors are recorded per page. Browser launch
/// failures, an exhausted manual-solve budget and store failures end the
/// profile's session.
#[derive(Debug, thiserror::Error)]
pub enum CrawlError {
    #[error("navigation to {url} failed: {reason}")]
    Navigation { url: String, reason: String },

    #[error("challenge on {url} was not solved (waited {waited:?})")]
    ChallengeTimeout { url: String, waited: Duration },

    #[error("extraction on {url} failed: {reason}")]
    Extraction { url: String, reason: String },

    #[error("could not start browser for profile {profile}: {reason}")]
    BrowserLaunch { profile: String, reason: String },

    #[error("unknown profile: {0}")]
    UnknownProfile(String),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl CrawlError {
    /// Whether the error ends the profile's session.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::ChallengeTimeout { .. }
                | Self::BrowserLaunch { .. }
                | Self::UnknownProfile(_)
                | Self::Store(_)
        )
    }
}

/// Running counters of one profile's session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CrawlStats {
    pub pages: usize,
    pub failed_pages: usize,
    pub no_clip_pages: usize,
    pub clips_found: usize,
    pub clips_new: usize,
    pub clips_upgraded: usize,
    pub challenges: usize,
    pub queued: usize,
}

/// Why a profile's session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Frontier drained.
    Exhausted,
    /// Stop was requested.
    Cancelled,
    /// Fatal error, with its message.
    Fatal(String),
}

/// Final state of one profile's session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProfileSummary {
    pub profile: String,
    pub stats: CrawlStats,
    pub reason: StopReason,
    /// Entries persisted for the next run.
    pub persisted: usize,
}

/// Result of a whole crawl run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CrawlSummary {
    pub profiles: Vec<ProfileSummary>,
}

impl CrawlSummary {
    pub fn pages(&self) -> usize {
        self.profiles.iter().map(|p| p.stats.pages).sum()
    }

    pub fn clips_found(&self) -> usize {
        self.profiles.iter().map(|p| p.stats.clips_found).sum()
    }

    pub fn clips_new(&self) -> usize {
        self.profiles.iter().map(|p| p.stats.clips_new).sum()
    }

    pub fn failures(&self) -> Vec<(&str, &str)> {
        self.profiles
            .iter()
            .filter_map(|p| match &p.reason {
                StopReason::Fatal(e) => Some((p.profile.as_str(), e.as_str())),
                _ => None,
            })
            .collect()
    }
}

/// Events emitted during a crawl.
#[derive(Debug, Clone)]
pub enum CrawlEvent {
    Started {
        profile: String,
        seeds: usize,
        resumed: usize,
    },
    PageStarted {
        profile: String,
        url: String,
        depth: u32,
    },
    PageFinished {
        profile: String,
        url: String,
        outcome: PageOutcome,
        clips: usize,
        new_links: usize,
        error: Option<String>,
    },
    ClipSaved {
        profile: String,
        key: ClipKey,
        outcome: UpsertOutcome,
    },
    Challenge {
        profile: String,
        url: String,
        state: ChallengeState,
    },
    ChallengeTimeout {
        profile: String,
        url: String,
        waited: Duration,
    },
    Stats {
        profile: String,
        stats: CrawlStats,
    },
    Stopped {
        profile: String,
        summary: ProfileSummary,
    },
}

impl CrawlEvent {
    pub fn profile(&self) -> &str {
        match self {
            Self::Started { profile, .. }
            | Self::PageStarted { profile, .. }
            | Self::PageFinished { profile, .. }
            | Self::ClipSaved { profile, .. }
            | Self::Challenge { profile, .. }
            | Self::ChallengeTimeout { profile, .. }
            | Self::Stats { profile, .. }
            | Self::Stopped { profile, .. } => profile,
        }
    }
}

/// Overrides for a single crawl run.
#[derive(Debug, Clone, Default)]
pub struct CrawlRequest {
    /// Profiles to crawl, by id.
    pub profiles: Vec<String>,
    /// Replaces the start URL; only valid with a single profile.
    pub start_url: Option<String>,
}

impl CrawlRequest {
    pub fn new<I, S>(profiles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            profiles: profiles.into_iter().map(Into::into).collect(),
            start_url: None,
        }
    }

    pub fn with_start_url(mut self, url: impl Into<String>) -> Self {
        self.start_url = Some(url.into());
        self
    }
}
