//! Bot-challenge detection and the manual-solve state machine.
//!
//! Nothing here tries to solve a challenge. A detected challenge moves the
//! session into a visible window and waits for a human, bounded by a
//! session-wide time budget.

use std::fmt;
use std::time::Duration;

use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};

use super::browser::PageSnapshot;

/// Phrases found on interstitial pages.
const TEXT_SIGNATURES: &[&str] = &[
    "checking your browser",
    "just a moment",
    "verify you are human",
    "verifying you are human",
    "captcha",
    "challenge-platform",
    "access denied",
    "please wait while we verify",
    "bot detection",
    "are you a robot",
    "unusual traffic",
];

/// Elements of common challenge widgets.
const ELEMENT_SIGNATURES: &[&str] = &[
    "#challenge-form",
    "#cf-challenge-running",
    ".cf-browser-verification",
    "#challenge-stage",
    ".g-recaptcha",
    ".h-captcha",
    r#"iframe[src*="challenges.cloudflare.com"]"#,
    r#"iframe[src*="captcha"]"#,
];

/// Body markers that turn a 403/429/503 into a challenge.
const BLOCKED_STATUS_MARKERS: &[&str] = &["cloudflare", "ray id", "cf-ray", "ddos-guard", "perimeterx"];

/// Only the start of the visible text is checked; long pages mention
/// "captcha" in footers and articles.
const BODY_SCAN_CHARS: usize = 2000;

/// Where the crawler stands with respect to a challenge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChallengeState {
    Clear,
    ChallengeDetected,
    AwaitingManualSolve,
    Resumed,
}

impl ChallengeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Clear => "clear",
            Self::ChallengeDetected => "challenge-detected",
            Self::AwaitingManualSolve => "awaiting-manual-solve",
            Self::Resumed => "resumed",
        }
    }

    /// Legal transitions of the gate.
    pub fn can_transition_to(&self, next: ChallengeState) -> bool {
        use ChallengeState::*;
        matches!(
            (self, next),
            (Clear, ChallengeDetected)
                | (Resumed, ChallengeDetected)
                | (ChallengeDetected, AwaitingManualSolve)
                | (AwaitingManualSolve, Resumed)
                | (Resumed, Clear)
        )
    }
}

impl fmt::Display for ChallengeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What matched on a challenge page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChallengeSignal {
    Text(String),
    Element(String),
    Status(u16),
}

impl fmt::Display for ChallengeSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(t) => write!(f, "text \"{}\"", t),
            Self::Element(s) => write!(f, "element {}", s),
            Self::Status(code) => write!(f, "HTTP {} block page", code),
        }
    }
}

/// Matches rendered pages against known challenge signatures.
#[derive(Debug, Clone)]
pub struct ChallengeDetector {
    text: Vec<String>,
    elements: Vec<String>,
}

impl Default for ChallengeDetector {
    fn default() -> Self {
        Self {
            text: TEXT_SIGNATURES.iter().map(|s| s.to_string()).collect(),
            elements: ELEMENT_SIGNATURES.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl ChallengeDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a lowercase text signature.
    pub fn with_text(mut self, phrase: &str) -> Self {
        self.text.push(phrase.to_lowercase());
        self
    }

    /// First signature the page matches, if any.
    pub fn detect(&self, page: &PageSnapshot) -> Option<ChallengeSignal> {
        let title = page.title.to_lowercase();
        let head: String = page.body_text.chars().take(BODY_SCAN_CHARS).collect();
        let head = head.to_lowercase();

        if let Some(phrase) = self
            .text
            .iter()
            .find(|p| title.contains(p.as_str()) || head.contains(p.as_str()))
        {
            return Some(ChallengeSignal::Text(phrase.clone()));
        }

        if let Some(code) = page.status.filter(|c| matches!(c, 403 | 429 | 503)) {
            let html = page.html.to_lowercase();
            if BLOCKED_STATUS_MARKERS.iter().any(|m| html.contains(m)) {
                return Some(ChallengeSignal::Status(code));
            }
        }

        if page.html.is_empty() {
            return None;
        }
        let document = Html::parse_document(&page.html);
        self.elements
            .iter()
            .find(|sel| {
                Selector::parse(sel)
                    .map(|s| document.select(&s).next().is_some())
                    .unwrap_or(false)
            })
            .map(|sel| ChallengeSignal::Element(sel.clone()))
    }
}

/// Session-wide cap on time spent waiting for a human.
#[derive(Debug, Clone)]
pub struct SolveBudget {
    cap: Duration,
    spent: Duration,
}

impl SolveBudget {
    pub fn new(cap: Duration) -> Self {
        Self {
            cap,
            spent: Duration::ZERO,
        }
    }

    pub fn remaining(&self) -> Duration {
        self.cap.saturating_sub(self.spent)
    }

    pub fn is_exhausted(&self) -> bool {
        self.spent >= self.cap
    }

    pub fn charge(&mut self, elapsed: Duration) {
        self.spent += elapsed;
    }

    pub fn spent(&self) -> Duration {
        self.spent
    }
}

/// Inter-page delay multiplier that grows after challenges.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Backoff {
    factor: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self { factor: 1.0 }
    }
}

impl Backoff {
    pub const MAX: f64 = 8.0;
    const DECAY: f64 = 0.7;

    pub fn factor(&self) -> f64 {
        self.factor
    }

    /// A challenge was hit.
    pub fn escalate(&mut self) {
        self.factor = (self.factor * 2.0).min(Self::MAX);
    }

    /// A page went through after a challenge.
    pub fn relax(&mut self) {
        self.factor = (self.factor * Self::DECAY).max(1.0);
    }

    /// `base` scaled by the factor and a jitter (0.6 to 1.5), never
    /// below half a second.
    pub fn delay(&self, base: Duration, jitter: f64) -> Duration {
        let secs = base.as_secs_f64() * jitter * self.factor;
        Duration::from_secs_f64(secs.max(0.5))
    }
}
