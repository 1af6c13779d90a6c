//! Download manager.
//!
//! Tasks are persisted in the metadata store, dispatched to a bounded pool
//! of workers and reported through an event channel. Direct files are
//! streamed over HTTP under a shared bandwidth cap; stream manifests are
//! muxed by ffmpeg. Every transfer writes to a `.part` file that is only
//! renamed into place once complete.

mod bandwidth;
mod fetcher;
mod sidecar;
mod template;
mod throughput;
mod types;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::DownloadSettings;
use crate::models::{parse_duration_secs, Clip, ClipKey, DownloadStatus, DownloadTask, TaskId, TaskState};
use crate::repository::MetadataStore;
use crate::services::ffmpeg::ConvertOutcome;

pub use bandwidth::{BandwidthLimiter, MAX_CHUNK};
pub use fetcher::{HttpFetcher, MediaFetcher, MediaStream};
pub use sidecar::{write_sidecar, Sidecar};
pub use template::{partial_path, render, sanitize_component, sibling, target_path, FALLBACK_TEMPLATE};
pub use throughput::{eta_from_position, ThroughputMeter};
pub use types::{DownloadError, DownloadEvent, EnqueueResult, SkipReason};

/// Files at least this large are treated as an earlier complete download.
const EXISTING_MIN_BYTES: u64 = 1024;

/// Minimum spacing of progress events per task.
const PROGRESS_INTERVAL: Duration = Duration::from_millis(250);

struct Inner {
    store: Arc<MetadataStore>,
    settings: DownloadSettings,
    fetcher: Arc<dyn MediaFetcher>,
    limiter: Option<BandwidthLimiter>,
    events: mpsc::UnboundedSender<DownloadEvent>,
    queue: mpsc::UnboundedSender<TaskId>,
    /// Queued and running tasks.
    active: Mutex<HashMap<TaskId, Slot>>,
    idle: Notify,
    shutdown: CancellationToken,
}

struct Slot {
    token: CancellationToken,
    /// Set once a worker has picked the task up.
    running: bool,
}

/// What `cancel` found for a task id.
enum Claim {
    Running(CancellationToken),
    Waiting,
    Unknown,
}

/// How a single attempt ended without success.
enum AttemptEnd {
    Cancelled,
    Interrupted,
    Error(DownloadError),
}

impl From<DownloadError> for AttemptEnd {
    fn from(e: DownloadError) -> Self {
        Self::Error(e)
    }
}

/// Queue of persistent download tasks served by a worker pool.
pub struct DownloadManager {
    inner: Arc<Inner>,
    workers: Arc<Semaphore>,
    event_rx: Mutex<Option<mpsc::UnboundedReceiver<DownloadEvent>>>,
}

impl DownloadManager {
    /// Start the dispatcher. Must be called inside a tokio runtime.
    pub fn start(
        store: Arc<MetadataStore>,
        settings: DownloadSettings,
        fetcher: Arc<dyn MediaFetcher>,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (queue_tx, queue_rx) = mpsc::unbounded_channel();
        let limiter = settings.bandwidth_bytes().map(BandwidthLimiter::new);
        let workers = Arc::new(Semaphore::new(settings.concurrent_downloads.max(1)));
        if settings.effective_max_attempts() < settings.max_attempts {
            warn!(
                "max_attempts lowered from {} to {}: retries past {} ms would not back off further",
                settings.max_attempts,
                settings.effective_max_attempts(),
                settings.max_backoff_ms
            );
        }

        let inner = Arc::new(Inner {
            store,
            settings,
            fetcher,
            limiter,
            events: event_tx,
            queue: queue_tx,
            active: Mutex::new(HashMap::new()),
            idle: Notify::new(),
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(dispatch(inner.clone(), queue_rx, workers.clone()));

        Self {
            inner,
            workers,
            event_rx: Mutex::new(Some(event_rx)),
        }
    }

    /// Take the event receiver. Only the first call returns it.
    pub fn events(&self) -> Option<mpsc::UnboundedReceiver<DownloadEvent>> {
        self.event_rx.lock().ok().and_then(|mut rx| rx.take())
    }

    /// Queue downloads for `clips` using `template` (or the configured
    /// filename template).
    pub fn enqueue(&self, clips: &[ClipKey], template: Option<&str>) -> Result<EnqueueResult, DownloadError> {
        let template = template.unwrap_or(&self.inner.settings.filename_template).to_string();
        let mut result = EnqueueResult::default();

        for key in clips {
            let Some(clip) = self.inner.store.get_clip(key)? else {
                result.skipped.push((key.to_string(), SkipReason::NotFound));
                continue;
            };
            if !clip.has_video() {
                result.skipped.push((key.to_string(), SkipReason::NoVideoUrl));
                continue;
            }
            if is_downloaded(&clip) {
                result.skipped.push((key.to_string(), SkipReason::AlreadyDownloaded));
                continue;
            }
            if self.inner.store.active_task_for(key)?.is_some() {
                result.skipped.push((key.to_string(), SkipReason::AlreadyQueued));
                continue;
            }

            let ext = clip.format.map(|f| f.output_extension()).unwrap_or("mp4");
            match target_path(&self.inner.settings.output_dir, &template, &clip, ext) {
                Ok(target) => {
                    let task = DownloadTask::new(key.clone(), target, template.clone());
                    self.inner.store.save_task(&task)?;
                    result.queued.push(task.id.clone());
                    self.inner.submit(&task);
                }
                Err(e) => {
                    // Rejected outright; recorded as a failed task without attempts.
                    let mut task = DownloadTask::new(key.clone(), PathBuf::new(), template.clone());
                    task.state = TaskState::Failed;
                    task.last_error = Some(e.to_string());
                    task.finished_at = Some(Utc::now());
                    self.inner.store.save_task(&task)?;
                    self.inner.store.mark_download_failed(key, &e.to_string())?;
                    warn!("Not downloading {}: {}", key, e);
                    self.inner.emit(DownloadEvent::Failed {
                        task: task.id,
                        clip: key.clone(),
                        error: e.to_string(),
                        cancelled: false,
                    });
                }
            }
        }
        Ok(result)
    }

    /// Re-queue tasks left unfinished by an earlier run.
    pub fn resume_pending(&self) -> Result<Vec<TaskId>, DownloadError> {
        let tasks = self.inner.store.pending_tasks()?;
        let mut resumed = Vec::new();
        for task in tasks {
            if self.inner.is_active(&task.id) {
                continue;
            }
            self.inner.submit(&task);
            resumed.push(task.id);
        }
        if !resumed.is_empty() {
            info!("Resumed {} pending download(s)", resumed.len());
        }
        Ok(resumed)
    }

    /// Cancel a queued or running task.
    ///
    /// A queued task is dropped from the store. A running task stops its
    /// transfer, removes partial output and is recorded as cancelled; the
    /// clip's download status is left as it was.
    pub fn cancel(&self, task_id: &str) -> Result<(), DownloadError> {
        // A task not yet picked up leaves `active` here, so no worker starts it.
        let claim = match self.inner.active.lock() {
            Ok(mut active) => match active.get(task_id).map(|s| (s.running, s.token.clone())) {
                Some((true, token)) => Claim::Running(token),
                Some((false, _)) => {
                    active.remove(task_id);
                    Claim::Waiting
                }
                None => Claim::Unknown,
            },
            Err(_) => Claim::Unknown,
        };
        match claim {
            Claim::Running(token) => {
                token.cancel();
                return Ok(());
            }
            Claim::Waiting => self.inner.notify_if_idle(),
            Claim::Unknown => {}
        }

        match self.inner.store.get_task(task_id)? {
            Some(task) if task.state == TaskState::Queued => {
                self.inner.drop_queued(&task)?;
                Ok(())
            }
            Some(_) => Ok(()),
            None => Err(DownloadError::UnknownTask(task_id.to_string())),
        }
    }

    /// Number of queued and running tasks.
    pub fn active_count(&self) -> usize {
        self.inner.active.lock().map(|a| a.len()).unwrap_or(0)
    }

    /// Wait until no task is queued or running.
    pub async fn wait_idle(&self) {
        loop {
            if self.active_count() == 0 {
                return;
            }
            tokio::select! {
                _ = self.inner.idle.notified() => {}
                _ = tokio::time::sleep(Duration::from_millis(200)) => {}
            }
        }
    }

    /// Stop dispatching and interrupt running transfers. Interrupted tasks
    /// stay queued in the store for [`Self::resume_pending`].
    pub async fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let all = self.inner.settings.concurrent_downloads.max(1) as u32;
        // Every permit back means every worker has finished.
        let _ = self.workers.acquire_many(all).await;
    }
}

fn is_downloaded(clip: &Clip) -> bool {
    clip.dl_status == DownloadStatus::Done
        && clip
            .local_path
            .as_deref()
            .is_some_and(|p| Path::new(p).exists())
}

async fn dispatch(inner: Arc<Inner>, mut queue: mpsc::UnboundedReceiver<TaskId>, workers: Arc<Semaphore>) {
    loop {
        let task_id = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            next = queue.recv() => match next {
                Some(id) => id,
                None => break,
            },
        };
        let permit = tokio::select! {
            _ = inner.shutdown.cancelled() => break,
            permit = workers.clone().acquire_owned() => match permit {
                Ok(p) => p,
                Err(_) => break,
            },
        };
        let inner = inner.clone();
        tokio::spawn(async move {
            let _permit = permit;
            inner.run_task(&task_id).await;
            inner.finish(&task_id);
        });
    }
    debug!("Download dispatcher stopped");
}

impl Inner {
    fn emit(&self, event: DownloadEvent) {
        let _ = self.events.send(event);
    }

    fn is_active(&self, id: &str) -> bool {
        self.active.lock().map(|a| a.contains_key(id)).unwrap_or(false)
    }

    fn submit(&self, task: &DownloadTask) {
        if let Ok(mut active) = self.active.lock() {
            active.insert(
                task.id.clone(),
                Slot {
                    token: self.shutdown.child_token(),
                    running: false,
                },
            );
        }
        self.emit(DownloadEvent::Queued {
            task: task.id.clone(),
            clip: task.clip.clone(),
            target: task.target_path.clone(),
        });
        if self.queue.send(task.id.clone()).is_err() {
            self.finish(&task.id);
        }
    }

    fn finish(&self, id: &str) {
        if let Ok(mut active) = self.active.lock() {
            active.remove(id);
        }
        self.notify_if_idle();
    }

    fn notify_if_idle(&self) {
        if self.active.lock().is_ok_and(|a| a.is_empty()) {
            self.idle.notify_waiters();
        }
    }

    /// Mark a task as picked up by a worker. `None` when it was cancelled
    /// while waiting.
    fn claim(&self, id: &str) -> Option<CancellationToken> {
        let mut active = self.active.lock().ok()?;
        let slot = active.get_mut(id)?;
        slot.running = true;
        Some(slot.token.clone())
    }

    async fn run_task(&self, task_id: &str) {
        let Some(token) = self.claim(task_id) else {
            return;
        };
        let mut task = match self.store.get_task(task_id) {
            Ok(Some(task)) => task,
            Ok(None) => return,
            Err(e) => {
                warn!("Failed to load download task {}: {}", task_id, e);
                return;
            }
        };
        if token.is_cancelled() {
            return;
        }

        let clip = match self.store.get_clip(&task.clip) {
            Ok(Some(clip)) => clip,
            Ok(None) => {
                let e = DownloadError::fatal(task.clip.to_string(), "clip no longer exists");
                self.fail(&mut task, &e);
                return;
            }
            Err(e) => {
                self.fail(&mut task, &DownloadError::from(e));
                return;
            }
        };

        if let Some(size) = existing_size(&task.target_path).await {
            if size >= EXISTING_MIN_BYTES {
                debug!("{} already on disk", task.target_path.display());
                self.complete(&mut task, &clip, size, true).await;
                return;
            }
        }

        let max_attempts = self.settings.effective_max_attempts();
        task.started_at = Some(Utc::now());
        loop {
            task.attempts += 1;
            task.state = if clip.format.is_some_and(|f| f.is_manifest()) {
                TaskState::Converting
            } else {
                TaskState::Fetching
            };
            self.save(&task);
            self.emit(DownloadEvent::Started {
                task: task.id.clone(),
                clip: task.clip.clone(),
                attempt: task.attempts,
            });

            let end = match self.attempt(&task, &clip, &token).await {
                Ok(bytes) => {
                    self.complete(&mut task, &clip, bytes, false).await;
                    return;
                }
                Err(end) => end,
            };

            let error = match end {
                AttemptEnd::Cancelled => {
                    self.cancelled(&mut task);
                    return;
                }
                AttemptEnd::Interrupted => {
                    self.interrupted(&mut task);
                    return;
                }
                AttemptEnd::Error(error) => error,
            };

            if !error.is_retryable() || task.attempts >= max_attempts {
                self.fail(&mut task, &error);
                return;
            }

            let delay = self.settings.backoff(task.attempts);
            warn!(
                "Download of {} failed (attempt {}/{}): {}; retrying in {:?}",
                task.clip, task.attempts, max_attempts, error, delay
            );
            task.last_error = Some(error.to_string());
            task.state = TaskState::Queued;
            self.save(&task);
            self.emit(DownloadEvent::Retrying {
                task: task.id.clone(),
                attempt: task.attempts,
                delay,
                error: error.to_string(),
            });
            tokio::select! {
                _ = token.cancelled() => {
                    if self.shutdown.is_cancelled() {
                        self.interrupted(&mut task);
                    } else {
                        self.cancelled(&mut task);
                    }
                    return;
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One transfer into the `.part` file, renamed into place on success.
    async fn attempt(
        &self,
        task: &DownloadTask,
        clip: &Clip,
        token: &CancellationToken,
    ) -> Result<u64, AttemptEnd> {
        let target = &task.target_path;
        let partial = partial_path(target);
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                DownloadError::fatal(parent.display().to_string(), format!("cannot create directory: {}", e))
            })?;
        }

        let result = if clip.format.is_some_and(|f| f.is_manifest()) {
            self.convert(task, clip, &partial, token).await
        } else {
            self.stream(task, clip, &partial, token).await
        };

        match result {
            Ok(bytes) => {
                tokio::fs::rename(&partial, target).await.map_err(|e| {
                    DownloadError::fatal(target.display().to_string(), format!("cannot move into place: {}", e))
                })?;
                Ok(bytes)
            }
            Err(end) => {
                let _ = tokio::fs::remove_file(&partial).await;
                if matches!(end, AttemptEnd::Cancelled | AttemptEnd::Interrupted) {
                    let _ = tokio::fs::remove_file(target).await;
                }
                Err(end)
            }
        }
    }

    fn stopped(&self) -> AttemptEnd {
        if self.shutdown.is_cancelled() {
            AttemptEnd::Interrupted
        } else {
            AttemptEnd::Cancelled
        }
    }

    async fn stream(
        &self,
        task: &DownloadTask,
        clip: &Clip,
        partial: &Path,
        token: &CancellationToken,
    ) -> Result<u64, AttemptEnd> {
        let url = clip.video_url.as_str();
        let mut stream = tokio::select! {
            _ = token.cancelled() => return Err(self.stopped()),
            opened = self.fetcher.open(url) => opened?,
        };
        let total = stream.content_length();
        let mut file = tokio::fs::File::create(partial).await.map_err(|e| {
            DownloadError::fatal(partial.display().to_string(), format!("cannot create file: {}", e))
        })?;

        let mut meter = ThroughputMeter::default();
        let mut last_report: Option<Instant> = None;
        loop {
            let chunk = tokio::select! {
                _ = token.cancelled() => return Err(self.stopped()),
                chunk = stream.next_chunk() => chunk?,
            };
            let Some(chunk) = chunk else { break };

            for piece in chunk.chunks(MAX_CHUNK) {
                if let Some(limiter) = &self.limiter {
                    tokio::select! {
                        _ = token.cancelled() => return Err(self.stopped()),
                        _ = limiter.acquire(piece.len()) => {}
                    }
                }
                file.write_all(piece).await.map_err(|e| {
                    DownloadError::fatal(partial.display().to_string(), format!("write failed: {}", e))
                })?;
                meter.record(piece.len() as u64);
            }

            if last_report.map_or(true, |t| t.elapsed() >= PROGRESS_INTERVAL) {
                last_report = Some(Instant::now());
                self.emit(DownloadEvent::Progress {
                    task: task.id.clone(),
                    bytes: meter.total(),
                    total,
                    speed_bps: meter.speed(),
                    eta: meter.eta(total),
                });
            }
        }

        file.flush().await.map_err(|e| {
            DownloadError::fatal(partial.display().to_string(), format!("write failed: {}", e))
        })?;
        drop(file);

        let bytes = meter.total();
        if let Some(expected) = total {
            if bytes < expected {
                return Err(DownloadError::transient(
                    url,
                    format!("connection closed after {} of {} bytes", bytes, expected),
                )
                .into());
            }
        }
        self.emit(DownloadEvent::Progress {
            task: task.id.clone(),
            bytes,
            total,
            speed_bps: meter.speed(),
            eta: Some(Duration::ZERO),
        });
        Ok(bytes)
    }

    async fn convert(
        &self,
        task: &DownloadTask,
        clip: &Clip,
        partial: &Path,
        token: &CancellationToken,
    ) -> Result<u64, AttemptEnd> {
        let total = parse_duration_secs(&clip.duration)
            .filter(|s| *s > 0.0)
            .map(Duration::from_secs_f64);
        let started = Instant::now();
        let events = self.events.clone();
        let task_id = task.id.clone();
        let mut progress = move |position: Duration| {
            let eta = total.and_then(|t| eta_from_position(started.elapsed(), position, t));
            let _ = events.send(DownloadEvent::Converting {
                task: task_id.clone(),
                position,
                total,
                eta,
            });
        };

        let outcome = self
            .fetcher
            .convert(&clip.video_url, partial, token, &mut progress)
            .await?;
        match outcome {
            ConvertOutcome::Completed => Ok(tokio::fs::metadata(partial).await.map(|m| m.len()).unwrap_or(0)),
            ConvertOutcome::Cancelled => Err(self.stopped()),
        }
    }

    async fn complete(&self, task: &mut DownloadTask, clip: &Clip, bytes: u64, existing: bool) {
        let target = task.target_path.clone();
        let now = Utc::now();

        if !existing {
            let sidecar = sibling(&target, "json");
            if let Err(e) = write_sidecar(&sidecar, clip, &target, now).await {
                warn!("Failed to write {}: {}", sidecar.display(), e);
            }
        }

        let mut thumb = None;
        if self.settings.thumbnails {
            let path = sibling(&target, "jpg");
            if path.exists() {
                thumb = Some(path);
            } else {
                match self.fetcher.thumbnail(&target, &path).await {
                    Ok(()) => thumb = Some(path),
                    Err(e) => debug!("No thumbnail for {}: {}", target.display(), e),
                }
            }
        }

        if let Err(e) = self.store.mark_download_done(&task.clip, &target, thumb.as_deref()) {
            warn!("Failed to record download of {}: {}", task.clip, e);
        }
        task.state = TaskState::Done;
        task.bytes_transferred = bytes;
        task.last_error = None;
        task.finished_at = Some(now);
        self.save(task);

        info!("Downloaded {} -> {}", task.clip, target.display());
        self.emit(DownloadEvent::Completed {
            task: task.id.clone(),
            clip: task.clip.clone(),
            path: target,
            existing,
        });
    }

    fn fail(&self, task: &mut DownloadTask, error: &DownloadError) {
        let message = error.to_string();
        warn!("Download of {} failed: {}", task.clip, message);
        if let Err(e) = self.store.mark_download_failed(&task.clip, &message) {
            warn!("Failed to record failure of {}: {}", task.clip, e);
        }
        task.state = TaskState::Failed;
        task.last_error = Some(message.clone());
        task.finished_at = Some(Utc::now());
        self.save(task);
        self.emit(DownloadEvent::Failed {
            task: task.id.clone(),
            clip: task.clip.clone(),
            error: message,
            cancelled: false,
        });
    }

    fn cancelled(&self, task: &mut DownloadTask) {
        info!("Download of {} cancelled", task.clip);
        task.state = TaskState::Failed;
        task.cancelled = true;
        task.last_error = Some("cancelled".to_string());
        task.finished_at = Some(Utc::now());
        self.save(task);
        self.emit(DownloadEvent::Failed {
            task: task.id.clone(),
            clip: task.clip.clone(),
            error: "cancelled".to_string(),
            cancelled: true,
        });
    }

    /// Shutdown mid-transfer: leave the task queued for the next run.
    fn interrupted(&self, task: &mut DownloadTask) {
        debug!("Download of {} interrupted by shutdown", task.clip);
        task.state = TaskState::Queued;
        self.save(task);
    }

    fn drop_queued(&self, task: &DownloadTask) -> Result<(), DownloadError> {
        self.store.delete_task(&task.id)?;
        info!("Removed queued download of {}", task.clip);
        self.emit(DownloadEvent::Failed {
            task: task.id.clone(),
            clip: task.clip.clone(),
            error: "cancelled".to_string(),
            cancelled: true,
        });
        Ok(())
    }

    fn save(&self, task: &DownloadTask) {
        if let Err(e) = self.store.save_task(task) {
            warn!("Failed to save download task {}: {}", task.id, e);
        }
    }
}

async fn existing_size(path: &Path) -> Option<u64> {
    tokio::fs::metadata(path)
        .await
        .ok()
        .filter(|m| m.is_file())
        .map(|m| m.len())
}
