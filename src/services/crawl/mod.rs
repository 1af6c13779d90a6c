//! Crawl service.
//!
//! Runs one independent session per site profile. Each session owns its
//! browser, frontier and challenge state; sessions share nothing but the
//! metadata store. Progress is reported through [`CrawlEvent`]s and the
//! run is controlled through a [`CrawlHandle`].

mod queue;
mod session;
mod types;

use std::sync::Arc;

use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::CrawlSettings;
use crate::repository::MetadataStore;
use crate::scrapers::{ProfileRegistry, SessionLauncher};

pub use queue::{CrawlQueue, QueueStats};
pub use types::{
    CrawlError, CrawlEvent, CrawlRequest, CrawlStats, CrawlSummary, ProfileSummary, StopReason,
};

use session::ProfileCrawl;

/// Starts crawl runs.
pub struct CrawlService {
    store: Arc<MetadataStore>,
    registry: Arc<ProfileRegistry>,
    launcher: Arc<dyn SessionLauncher>,
}

impl CrawlService {
    pub fn new(
        store: Arc<MetadataStore>,
        registry: Arc<ProfileRegistry>,
        launcher: Arc<dyn SessionLauncher>,
    ) -> Self {
        Self {
            store,
            registry,
            launcher,
        }
    }

    /// Start crawling the requested profiles, one task each.
    ///
    /// Unknown profile ids are rejected before anything starts. The
    /// settings are an immutable snapshot for the whole run.
    pub fn start(&self, request: CrawlRequest, settings: CrawlSettings) -> Result<CrawlHandle, CrawlError> {
        let mut profiles = Vec::with_capacity(request.profiles.len());
        for id in &request.profiles {
            let profile = self
                .registry
                .get(id)
                .ok_or_else(|| CrawlError::UnknownProfile(id.clone()))?;
            profiles.push(profile);
        }
        let start_url = if profiles.len() == 1 {
            request.start_url.clone()
        } else {
            if request.start_url.is_some() {
                tracing::warn!("Start URL override ignored: more than one profile selected");
            }
            None
        };

        let (tx, rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let mut solvers = Vec::with_capacity(profiles.len());
        let mut tasks = Vec::with_capacity(profiles.len());

        for profile in profiles {
            let solved = Arc::new(Notify::new());
            solvers.push(solved.clone());
            info!("[{}] Starting crawl", profile.id);
            let worker = ProfileCrawl {
                profile,
                store: self.store.clone(),
                settings: settings.clone(),
                launcher: self.launcher.clone(),
                start_url: start_url.clone(),
                events: tx.clone(),
                cancel: cancel.child_token(),
                solved,
            };
            tasks.push(tokio::spawn(worker.run()));
        }

        Ok(CrawlHandle {
            cancel,
            solvers,
            events: Some(rx),
            tasks,
        })
    }
}

/// Control surface of a running crawl.
pub struct CrawlHandle {
    cancel: CancellationToken,
    solvers: Vec<Arc<Notify>>,
    events: Option<mpsc::UnboundedReceiver<CrawlEvent>>,
    tasks: Vec<JoinHandle<ProfileSummary>>,
}

impl CrawlHandle {
    /// Ask every session to stop at its next cancellation point.
    pub fn stop(&self) {
        self.cancel.cancel();
    }

    pub fn is_stopping(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Tell sessions waiting on a manual solve to re-check the page now.
    pub fn acknowledge_solve(&self) {
        for solved in &self.solvers {
            solved.notify_one();
        }
    }

    /// Take the event stream. Only the first call gets it.
    pub fn events(&mut self) -> Option<mpsc::UnboundedReceiver<CrawlEvent>> {
        self.events.take()
    }

    /// A clonable token that stops the crawl when cancelled.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Wait for every session to end.
    pub async fn join(self) -> CrawlSummary {
        let mut summary = CrawlSummary::default();
        for task in self.tasks {
            match task.await {
                Ok(profile) => summary.profiles.push(profile),
                Err(e) => error!("Crawl task panicked: {}", e),
            }
        }
        summary
    }
}
