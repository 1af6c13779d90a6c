//! Crawl frontier and audit models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle of a frontier entry within one crawl session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryState {
    Pending,
    InFlight,
    Done,
    Failed,
}

impl EntryState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InFlight => "in_flight",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "in_flight" => Some(Self::InFlight),
            "done" => Some(Self::Done),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// A URL queued for crawling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CrawlQueueEntry {
    pub url: String,
    pub depth: u32,
    pub priority: i32,
    pub state: EntryState,
    pub parent: Option<String>,
}

/// Result of visiting one page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageOutcome {
    Success,
    Challenge,
    Error,
}

impl PageOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Challenge => "challenge",
            Self::Error => "error",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "success" | "done" => Some(Self::Success),
            "challenge" => Some(Self::Challenge),
            "error" | "failed" => Some(Self::Error),
            _ => None,
        }
    }
}

/// Append-only audit record of a page visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawledPage {
    pub url: String,
    pub profile: String,
    pub depth: u32,
    pub outcome: PageOutcome,
    pub clip_count: u32,
    pub error: Option<String>,
    pub crawled_at: DateTime<Utc>,
}
