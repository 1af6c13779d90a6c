//! Download manager tests with an in-process media fetcher.

use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;
use tokio_util::sync::CancellationToken;

use clipscout::config::DownloadSettings;
use clipscout::models::{ClipKey, ClipRecord, DownloadStatus, FormatUrl, QualityTier, TaskState, VideoFormat};
use clipscout::repository::MetadataStore;
use clipscout::services::download::{
    target_path, DownloadError, DownloadEvent, DownloadManager, MediaFetcher, MediaStream, SkipReason,
};
use clipscout::services::ffmpeg::ConvertOutcome;

/// How the fake server answers one URL.
#[derive(Clone)]
struct Plan {
    size: usize,
    chunk: usize,
    delay: Duration,
    /// Leading opens that fail with a retryable error.
    transient_failures: usize,
    fatal: bool,
    /// Advertised length, when it differs from `size`.
    content_length: Option<u64>,
}

impl Plan {
    fn serve(size: usize) -> Self {
        Self {
            size,
            chunk: 4096,
            delay: Duration::ZERO,
            transient_failures: 0,
            fatal: false,
            content_length: None,
        }
    }

    fn slow(mut self, chunk: usize, delay: Duration) -> Self {
        self.chunk = chunk;
        self.delay = delay;
        self
    }

    fn failing(mut self, times: usize) -> Self {
        self.transient_failures = times;
        self
    }
}

#[derive(Default)]
struct FakeFetcher {
    plans: Mutex<HashMap<String, Plan>>,
    opens: Mutex<HashMap<String, usize>>,
    streaming: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

impl FakeFetcher {
    fn with(self, url: &str, plan: Plan) -> Self {
        self.plans.lock().unwrap().insert(url.to_string(), plan);
        self
    }

    fn opens(&self, url: &str) -> usize {
        self.opens.lock().unwrap().get(url).copied().unwrap_or(0)
    }
}

struct FakeStream {
    chunks: VecDeque<Vec<u8>>,
    length: Option<u64>,
    delay: Duration,
    streaming: Arc<AtomicUsize>,
}

impl Drop for FakeStream {
    fn drop(&mut self) {
        self.streaming.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl MediaStream for FakeStream {
    fn content_length(&self) -> Option<u64> {
        self.length
    }

    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>, DownloadError> {
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        Ok(self.chunks.pop_front())
    }
}

#[async_trait]
impl MediaFetcher for FakeFetcher {
    async fn open(&self, url: &str) -> Result<Box<dyn MediaStream>, DownloadError> {
        let attempt = {
            let mut opens = self.opens.lock().unwrap();
            let n = opens.entry(url.to_string()).or_insert(0);
            *n += 1;
            *n
        };
        let Some(plan) = self.plans.lock().unwrap().get(url).cloned() else {
            return Err(DownloadError::fatal(url, "HTTP 404 Not Found"));
        };
        if plan.fatal {
            return Err(DownloadError::fatal(url, "HTTP 403 Forbidden"));
        }
        if attempt <= plan.transient_failures {
            return Err(DownloadError::transient(url, "HTTP 503 Service Unavailable"));
        }

        let body = vec![7u8; plan.size];
        let now = self.streaming.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        Ok(Box::new(FakeStream {
            chunks: body.chunks(plan.chunk.max(1)).map(<[u8]>::to_vec).collect(),
            length: plan.content_length.or(Some(plan.size as u64)),
            delay: plan.delay,
            streaming: self.streaming.clone(),
        }))
    }

    async fn convert(
        &self,
        url: &str,
        output: &Path,
        cancel: &CancellationToken,
        progress: &mut (dyn FnMut(Duration) + Send),
    ) -> Result<ConvertOutcome, DownloadError> {
        *self.opens.lock().unwrap().entry(url.to_string()).or_insert(0) += 1;
        if cancel.is_cancelled() {
            return Ok(ConvertOutcome::Cancelled);
        }
        progress(Duration::from_secs(2));
        tokio::fs::write(output, vec![1u8; 3000])
            .await
            .map_err(|e| DownloadError::fatal(output.display().to_string(), e.to_string()))?;
        Ok(ConvertOutcome::Completed)
    }

    async fn thumbnail(&self, _video: &Path, output: &Path) -> Result<(), DownloadError> {
        tokio::fs::write(output, b"jpeg")
            .await
            .map_err(|e| DownloadError::fatal(output.display().to_string(), e.to_string()))
    }
}

const OCEAN_URL: &str = "https://cdn.stock.test/video-files/1000/1000-hd_1920_1080_25fps.mp4";
const FOREST_URL: &str = "https://cdn.stock.test/video-files/2000/2000-hd_1920_1080_25fps.mp4";

struct Fixture {
    _dir: TempDir,
    out: PathBuf,
    store: Arc<MetadataStore>,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(MetadataStore::open(&dir.path().join("clips.db")).unwrap());
        let out = dir.path().join("downloads");
        Self {
            _dir: dir,
            out,
            store,
        }
    }

    fn clip(&self, id: &str, title: &str, url: &str, format: VideoFormat) -> ClipKey {
        let mut record = ClipRecord::new("Stock", id);
        record.title = title.to_string();
        record.source_url = format!("https://stock.test/video/{}", id);
        record.duration = "0:04".to_string();
        record.video = Some(FormatUrl {
            url: url.to_string(),
            tier: QualityTier::Hd,
            format: Some(format),
        });
        self.store.upsert_clip(&record).unwrap();
        record.key()
    }

    fn settings(&self) -> DownloadSettings {
        DownloadSettings {
            output_dir: self.out.clone(),
            concurrent_downloads: 2,
            max_attempts: 3,
            backoff_base_ms: 10,
            max_backoff_ms: 50,
            thumbnails: false,
            ..DownloadSettings::default()
        }
    }
}

/// Collect events until every task in `tasks` has completed or failed.
async fn run_until_done(rx: &mut UnboundedReceiver<DownloadEvent>, tasks: &[String]) -> Vec<DownloadEvent> {
    let mut open: Vec<String> = tasks.to_vec();
    let mut seen = Vec::new();
    let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
    while !open.is_empty() {
        let event = tokio::time::timeout_at(deadline, rx.recv())
            .await
            .expect("downloads did not finish in time")
            .expect("event channel closed");
        if let DownloadEvent::Completed { task, .. } | DownloadEvent::Failed { task, .. } = &event {
            open.retain(|t| t != task);
        }
        seen.push(event);
    }
    seen
}

fn completed_path(events: &[DownloadEvent]) -> PathBuf {
    events
        .iter()
        .find_map(|e| match e {
            DownloadEvent::Completed { path, .. } => Some(path.clone()),
            _ => None,
        })
        .expect("no completed event")
}

#[tokio::test]
async fn test_download_writes_file_and_sidecar() {
    let fx = Fixture::new();
    let key = fx.clip("1000", "Ocean waves", OCEAN_URL, VideoFormat::Mp4);
    let fetcher = Arc::new(FakeFetcher::default().with(OCEAN_URL, Plan::serve(10_000)));

    let manager = DownloadManager::start(fx.store.clone(), fx.settings(), fetcher.clone());
    let mut events = manager.events().unwrap();
    let result = manager.enqueue(&[key.clone()], None).unwrap();
    assert_eq!(result.queued.len(), 1);
    assert!(result.skipped.is_empty());

    let seen = run_until_done(&mut events, &result.queued).await;
    let path = completed_path(&seen);

    assert!(path.starts_with(&fx.out));
    assert_eq!(path.extension().unwrap(), "mp4");
    assert_eq!(std::fs::metadata(&path).unwrap().len(), 10_000);
    assert!(!path.with_extension("mp4.part").exists());

    let sidecar: serde_json::Value =
        serde_json::from_str(&std::fs::read_to_string(path.with_extension("json")).unwrap()).unwrap();
    assert_eq!(sidecar["clip_id"], "1000");
    assert_eq!(sidecar["video_url"], OCEAN_URL);

    let clip = fx.store.get_clip(&key).unwrap().unwrap();
    assert_eq!(clip.dl_status, DownloadStatus::Done);
    assert_eq!(clip.local_path.as_deref(), path.to_str());

    let task = fx.store.get_task(&result.queued[0]).unwrap().unwrap();
    assert_eq!(task.state, TaskState::Done);
    assert_eq!(task.attempts, 1);
    assert_eq!(task.bytes_transferred, 10_000);
    assert!(seen
        .iter()
        .any(|e| matches!(e, DownloadEvent::Progress { bytes: 10_000, .. })));
}

#[tokio::test]
async fn test_transient_errors_are_retried_until_attempts_run_out() {
    let fx = Fixture::new();
    let key = fx.clip("1000", "Ocean", OCEAN_URL, VideoFormat::Mp4);
    let fetcher = Arc::new(FakeFetcher::default().with(OCEAN_URL, Plan::serve(2048).failing(usize::MAX)));

    let manager = DownloadManager::start(fx.store.clone(), fx.settings(), fetcher.clone());
    let mut events = manager.events().unwrap();
    let result = manager.enqueue(&[key.clone()], None).unwrap();
    let seen = run_until_done(&mut events, &result.queued).await;

    assert_eq!(fetcher.opens(OCEAN_URL), 3);
    let delays: Vec<Duration> = seen
        .iter()
        .filter_map(|e| match e {
            DownloadEvent::Retrying { delay, .. } => Some(*delay),
            _ => None,
        })
        .collect();
    assert_eq!(delays, vec![Duration::from_millis(10), Duration::from_millis(20)]);
    assert!(delays.windows(2).all(|w| w[0] < w[1]));
    assert!(matches!(
        seen.last(),
        Some(DownloadEvent::Failed { cancelled: false, .. })
    ));

    let task = fx.store.get_task(&result.queued[0]).unwrap().unwrap();
    assert_eq!(task.state, TaskState::Failed);
    assert_eq!(task.attempts, 3);
    assert!(task.last_error.unwrap().contains("503"));

    let clip = fx.store.get_clip(&key).unwrap().unwrap();
    assert_eq!(clip.dl_status, DownloadStatus::Failed);
    assert!(clip.dl_error.is_some());
}

#[tokio::test]
async fn test_transient_error_then_success() {
    let fx = Fixture::new();
    let key = fx.clip("1000", "Ocean", OCEAN_URL, VideoFormat::Mp4);
    let fetcher = Arc::new(FakeFetcher::default().with(OCEAN_URL, Plan::serve(4096).failing(1)));

    let manager = DownloadManager::start(fx.store.clone(), fx.settings(), fetcher.clone());
    let mut events = manager.events().unwrap();
    let result = manager.enqueue(&[key], None).unwrap();
    let seen = run_until_done(&mut events, &result.queued).await;

    assert!(matches!(seen.last(), Some(DownloadEvent::Completed { existing: false, .. })));
    assert_eq!(fetcher.opens(OCEAN_URL), 2);
    let task = fx.store.get_task(&result.queued[0]).unwrap().unwrap();
    assert_eq!(task.attempts, 2);
    assert_eq!(task.state, TaskState::Done);
}

#[tokio::test]
async fn test_fatal_error_is_not_retried() {
    let fx = Fixture::new();
    let key = fx.clip("1000", "Ocean", OCEAN_URL, VideoFormat::Mp4);
    let mut plan = Plan::serve(2048);
    plan.fatal = true;
    let fetcher = Arc::new(FakeFetcher::default().with(OCEAN_URL, plan));

    let manager = DownloadManager::start(fx.store.clone(), fx.settings(), fetcher.clone());
    let mut events = manager.events().unwrap();
    let result = manager.enqueue(&[key], None).unwrap();
    let seen = run_until_done(&mut events, &result.queued).await;

    assert_eq!(fetcher.opens(OCEAN_URL), 1);
    assert!(!seen.iter().any(|e| matches!(e, DownloadEvent::Retrying { .. })));
}

#[tokio::test]
async fn test_short_body_leaves_no_partial_file() {
    let fx = Fixture::new();
    let key = fx.clip("1000", "Ocean", OCEAN_URL, VideoFormat::Mp4);
    let mut plan = Plan::serve(2048);
    plan.content_length = Some(8192);
    let fetcher = Arc::new(FakeFetcher::default().with(OCEAN_URL, plan));

    let mut settings = fx.settings();
    settings.max_attempts = 2;
    let manager = DownloadManager::start(fx.store.clone(), settings.clone(), fetcher.clone());
    let mut events = manager.events().unwrap();
    let result = manager.enqueue(&[key.clone()], None).unwrap();
    let seen = run_until_done(&mut events, &result.queued).await;

    assert_eq!(fetcher.opens(OCEAN_URL), 2);
    assert!(matches!(seen.last(), Some(DownloadEvent::Failed { .. })));

    let clip = fx.store.get_clip(&key).unwrap().unwrap();
    let target = target_path(&settings.output_dir, &settings.filename_template, &clip, "mp4").unwrap();
    assert!(!target.exists());
    assert!(!target.with_extension("mp4.part").exists());
}

#[tokio::test]
async fn test_existing_file_counts_as_downloaded() {
    let fx = Fixture::new();
    let key = fx.clip("1000", "Ocean", OCEAN_URL, VideoFormat::Mp4);
    let settings = fx.settings();
    let clip = fx.store.get_clip(&key).unwrap().unwrap();
    let target = target_path(&settings.output_dir, &settings.filename_template, &clip, "mp4").unwrap();
    std::fs::create_dir_all(target.parent().unwrap()).unwrap();
    std::fs::write(&target, vec![0u8; 2048]).unwrap();

    let fetcher = Arc::new(FakeFetcher::default().with(OCEAN_URL, Plan::serve(4096)));
    let manager = DownloadManager::start(fx.store.clone(), settings, fetcher.clone());
    let mut events = manager.events().unwrap();
    let result = manager.enqueue(&[key.clone()], None).unwrap();
    let seen = run_until_done(&mut events, &result.queued).await;

    assert!(matches!(seen.last(), Some(DownloadEvent::Completed { existing: true, .. })));
    assert_eq!(fetcher.opens(OCEAN_URL), 0);
    assert_eq!(std::fs::metadata(&target).unwrap().len(), 2048);
    assert!(!target.with_extension("json").exists());
    assert_eq!(fx.store.get_clip(&key).unwrap().unwrap().dl_status, DownloadStatus::Done);
}

#[tokio::test]
async fn test_cancel_running_download_removes_output() {
    let fx = Fixture::new();
    let key = fx.clip("1000", "Ocean", OCEAN_URL, VideoFormat::Mp4);
    let plan = Plan::serve(64 * 1024).slow(1024, Duration::from_millis(30));
    let fetcher = Arc::new(FakeFetcher::default().with(OCEAN_URL, plan));

    let manager = DownloadManager::start(fx.store.clone(), fx.settings(), fetcher);
    let mut events = manager.events().unwrap();
    let result = manager.enqueue(&[key.clone()], None).unwrap();
    let task_id = result.queued[0].clone();

    let mut target = None;
    let mut seen = Vec::new();
    while let Some(event) = events.recv().await {
        match &event {
            DownloadEvent::Queued { target: t, .. } => target = Some(t.clone()),
            DownloadEvent::Progress { .. } => {
                manager.cancel(&task_id).unwrap();
            }
            DownloadEvent::Failed { .. } | DownloadEvent::Completed { .. } => {
                seen.push(event);
                break;
            }
            _ => {}
        }
        seen.push(event);
    }

    assert!(matches!(seen.last(), Some(DownloadEvent::Failed { cancelled: true, .. })));
    let target = target.unwrap();
    assert!(!target.exists());
    assert!(!target.with_extension("mp4.part").exists());

    let task = fx.store.get_task(&task_id).unwrap().unwrap();
    assert!(task.cancelled);
    assert_eq!(task.state, TaskState::Failed);
    assert_eq!(fx.store.get_clip(&key).unwrap().unwrap().dl_status, DownloadStatus::None);
}

#[tokio::test]
async fn test_cancel_waiting_task_survives_shutdown() {
    let fx = Fixture::new();
    let ocean = fx.clip("1000", "Ocean", OCEAN_URL, VideoFormat::Mp4);
    let forest = fx.clip("2000", "Forest", FOREST_URL, VideoFormat::Mp4);
    let fetcher = Arc::new(
        FakeFetcher::default()
            .with(OCEAN_URL, Plan::serve(64 * 1024).slow(1024, Duration::from_millis(30)))
            .with(FOREST_URL, Plan::serve(4096)),
    );

    let mut settings = fx.settings();
    settings.concurrent_downloads = 1;
    let manager = DownloadManager::start(fx.store.clone(), settings.clone(), fetcher.clone());
    let mut events = manager.events().unwrap();
    let first = manager.enqueue(&[ocean.clone()], None).unwrap();
    while let Some(event) = events.recv().await {
        if matches!(event, DownloadEvent::Progress { .. }) {
            break;
        }
    }

    // The only worker is busy, so the second task is still waiting.
    let second = manager.enqueue(&[forest.clone()], None).unwrap();
    let waiting = second.queued[0].clone();
    manager.cancel(&waiting).unwrap();
    assert!(fx.store.get_task(&waiting).unwrap().is_none());
    assert!(fx.store.active_task_for(&forest).unwrap().is_none());

    let cancelled = loop {
        match events.recv().await {
            Some(DownloadEvent::Failed { task, cancelled, .. }) if task == waiting => break cancelled,
            Some(_) => continue,
            None => panic!("event channel closed"),
        }
    };
    assert!(cancelled);

    manager.shutdown().await;
    assert_eq!(fetcher.opens(FOREST_URL), 0);
    assert_eq!(fx.store.get_clip(&forest).unwrap().unwrap().dl_status, DownloadStatus::None);

    let next = DownloadManager::start(fx.store.clone(), settings, Arc::new(FakeFetcher::default()));
    let resumed = next.resume_pending().unwrap();
    assert_eq!(resumed, first.queued);
    next.shutdown().await;
}

#[tokio::test]
async fn test_cancel_unknown_task() {
    let fx = Fixture::new();
    let manager = DownloadManager::start(fx.store.clone(), fx.settings(), Arc::new(FakeFetcher::default()));
    assert!(matches!(
        manager.cancel("no-such-task"),
        Err(DownloadError::UnknownTask(_))
    ));
}

#[tokio::test]
async fn test_enqueue_skips_missing_and_duplicate_clips() {
    let fx = Fixture::new();
    let key = fx.clip("1000", "Ocean", OCEAN_URL, VideoFormat::Mp4);
    let mut bare = ClipRecord::new("Stock", "3000");
    bare.title = "No video".to_string();
    fx.store.upsert_clip(&bare).unwrap();

    let plan = Plan::serve(64 * 1024).slow(1024, Duration::from_millis(20));
    let fetcher = Arc::new(FakeFetcher::default().with(OCEAN_URL, plan));
    let manager = DownloadManager::start(fx.store.clone(), fx.settings(), fetcher);

    let first = manager.enqueue(&[key.clone()], None).unwrap();
    assert_eq!(first.queued.len(), 1);

    let second = manager
        .enqueue(&[key.clone(), bare.key(), ClipKey::new("Stock", "404")], None)
        .unwrap();
    assert!(second.queued.is_empty());
    assert_eq!(
        second.skipped,
        vec![
            ("Stock:1000".to_string(), SkipReason::AlreadyQueued),
            ("Stock:3000".to_string(), SkipReason::NoVideoUrl),
            ("Stock:404".to_string(), SkipReason::NotFound),
        ]
    );
    manager.shutdown().await;
}

#[tokio::test]
async fn test_worker_pool_is_bounded() {
    let fx = Fixture::new();
    let mut keys = Vec::new();
    let mut fetcher = FakeFetcher::default();
    for i in 0..4 {
        let url = format!("https://cdn.stock.test/video-files/{0}/{0}-hd_1280_720_25fps.mp4", 5000 + i);
        keys.push(fx.clip(&(5000 + i).to_string(), &format!("Clip {}", i), &url, VideoFormat::Mp4));
        fetcher = fetcher.with(&url, Plan::serve(5 * 1024).slow(1024, Duration::from_millis(40)));
    }
    let fetcher = Arc::new(fetcher);

    let manager = DownloadManager::start(fx.store.clone(), fx.settings(), fetcher.clone());
    let mut events = manager.events().unwrap();
    let result = manager.enqueue(&keys, None).unwrap();
    assert_eq!(result.queued.len(), 4);
    let seen = run_until_done(&mut events, &result.queued).await;

    let completed = seen
        .iter()
        .filter(|e| matches!(e, DownloadEvent::Completed { .. }))
        .count();
    assert_eq!(completed, 4);
    assert_eq!(fetcher.peak.load(Ordering::SeqCst), 2);
    manager.wait_idle().await;
    assert_eq!(manager.active_count(), 0);
}

#[tokio::test]
async fn test_bandwidth_cap_throttles_transfer() {
    let fx = Fixture::new();
    let key = fx.clip("1000", "Ocean", OCEAN_URL, VideoFormat::Mp4);
    let fetcher = Arc::new(FakeFetcher::default().with(OCEAN_URL, Plan::serve(32 * 1024)));

    let mut settings = fx.settings();
    settings.bandwidth_kbps = 8;
    let manager = DownloadManager::start(fx.store.clone(), settings, fetcher);
    let mut events = manager.events().unwrap();

    let started = Instant::now();
    let result = manager.enqueue(&[key], None).unwrap();
    let seen = run_until_done(&mut events, &result.queued).await;

    assert!(matches!(seen.last(), Some(DownloadEvent::Completed { .. })));
    // 32 KiB at 8 KiB/s with at most one 16 KiB chunk banked.
    assert!(started.elapsed() >= Duration::from_millis(1500));
}

#[tokio::test]
async fn test_bandwidth_cap_is_shared_by_concurrent_workers() {
    let fx = Fixture::new();
    let mut keys = Vec::new();
    let mut fetcher = FakeFetcher::default();
    for i in 0..3 {
        let id = 6000 + i;
        let url = format!("https://cdn.stock.test/video-files/{0}/{0}-hd_1280_720_25fps.mp4", id);
        keys.push(fx.clip(&id.to_string(), &format!("Clip {}", i), &url, VideoFormat::Mp4));
        fetcher = fetcher.with(&url, Plan::serve(24 * 1024).slow(4096, Duration::from_millis(10)));
    }
    let fetcher = Arc::new(fetcher);

    let mut settings = fx.settings();
    settings.concurrent_downloads = 3;
    settings.bandwidth_kbps = 16;
    let cap = settings.bandwidth_bytes().unwrap() as f64;

    let started = Instant::now();
    let manager = DownloadManager::start(fx.store.clone(), settings, fetcher.clone());
    let mut events = manager.events().unwrap();
    let result = manager.enqueue(&keys, None).unwrap();
    let seen = run_until_done(&mut events, &result.queued).await;
    let elapsed = started.elapsed().as_secs_f64();

    let completed = seen
        .iter()
        .filter(|e| matches!(e, DownloadEvent::Completed { .. }))
        .count();
    assert_eq!(completed, 3);
    assert_eq!(fetcher.peak.load(Ordering::SeqCst), 3);

    // The bucket starts empty, so every byte is paid for at the cap.
    let total = (3 * 24 * 1024) as f64;
    assert!(total / elapsed <= cap * 1.1, "{:.0} B/s over a {:.0} B/s cap", total / elapsed, cap);
}

#[tokio::test]
async fn test_shutdown_keeps_task_for_resume() {
    let fx = Fixture::new();
    let key = fx.clip("1000", "Ocean", OCEAN_URL, VideoFormat::Mp4);
    let slow = Plan::serve(64 * 1024).slow(1024, Duration::from_millis(30));
    let fetcher = Arc::new(FakeFetcher::default().with(OCEAN_URL, slow));

    let manager = DownloadManager::start(fx.store.clone(), fx.settings(), fetcher);
    let mut events = manager.events().unwrap();
    let result = manager.enqueue(&[key.clone()], None).unwrap();
    let task_id = result.queued[0].clone();

    while let Some(event) = events.recv().await {
        if matches!(event, DownloadEvent::Progress { .. }) {
            break;
        }
    }
    manager.shutdown().await;

    let task = fx.store.get_task(&task_id).unwrap().unwrap();
    assert_eq!(task.state, TaskState::Queued);
    assert!(!task.cancelled);

    let fast = Arc::new(FakeFetcher::default().with(OCEAN_URL, Plan::serve(4096)));
    let resumed_manager = DownloadManager::start(fx.store.clone(), fx.settings(), fast);
    let mut events = resumed_manager.events().unwrap();
    let resumed = resumed_manager.resume_pending().unwrap();
    assert_eq!(resumed, vec![task_id.clone()]);

    let seen = run_until_done(&mut events, &resumed).await;
    let path = completed_path(&seen);
    assert_eq!(std::fs::metadata(path).unwrap().len(), 4096);
    assert_eq!(fx.store.get_task(&task_id).unwrap().unwrap().state, TaskState::Done);
}

#[tokio::test]
async fn test_manifest_is_converted_and_thumbnailed() {
    let fx = Fixture::new();
    let url = "https://cdn.stock.test/hls/2000/master.m3u8";
    let key = fx.clip("2000", "Forest", url, VideoFormat::M3u8);
    let fetcher = Arc::new(FakeFetcher::default());

    let mut settings = fx.settings();
    settings.thumbnails = true;
    let manager = DownloadManager::start(fx.store.clone(), settings, fetcher.clone());
    let mut events = manager.events().unwrap();
    let result = manager.enqueue(&[key.clone()], None).unwrap();
    let seen = run_until_done(&mut events, &result.queued).await;

    assert!(seen
        .iter()
        .any(|e| matches!(e, DownloadEvent::Converting { total: Some(_), .. })));
    let path = completed_path(&seen);
    assert_eq!(path.extension().unwrap(), "mp4");
    assert_eq!(fetcher.opens(url), 1);

    let clip = fx.store.get_clip(&key).unwrap().unwrap();
    let thumb = PathBuf::from(clip.thumb_path.unwrap());
    assert_eq!(thumb, path.with_extension("jpg"));
    assert!(thumb.exists());
}

#[tokio::test]
async fn test_template_subdirectories() {
    let fx = Fixture::new();
    let key = fx.clip("2000", "Forest path", FOREST_URL, VideoFormat::Mp4);
    let fetcher = Arc::new(FakeFetcher::default().with(FOREST_URL, Plan::serve(2048)));

    let manager = DownloadManager::start(fx.store.clone(), fx.settings(), fetcher);
    let mut events = manager.events().unwrap();
    let result = manager.enqueue(&[key], Some("{creator}/{title}")).unwrap();
    let seen = run_until_done(&mut events, &result.queued).await;

    let path = completed_path(&seen);
    let relative = path.strip_prefix(&fx.out).unwrap();
    assert_eq!(relative, Path::new("unknown/Forest_path_2000.mp4"));
}
