//! Download command.

use std::collections::HashSet;
use std::sync::Arc;

use console::style;

use crate::cli::helpers::{format_bytes, open_store};
use crate::cli::progress::DownloadProgress;
use crate::config::Settings;
use crate::models::TaskId;
use crate::services::download::{DownloadEvent, DownloadManager, HttpFetcher, SkipReason};
use crate::services::ffmpeg::Ffmpeg;

pub struct DownloadArgs {
    pub clips: Vec<String>,
    pub all: bool,
    pub template: Option<String>,
    pub concurrency: Option<usize>,
    pub limit_kbps: Option<u64>,
}

/// Download clips, resuming tasks left over from an earlier run first.
pub async fn cmd_download(settings: &Settings, args: DownloadArgs) -> anyhow::Result<()> {
    let store = open_store(settings)?;

    let mut download = settings.download.clone();
    if let Some(n) = args.concurrency {
        download.concurrent_downloads = n.max(1);
    }
    if let Some(kbps) = args.limit_kbps {
        download.bandwidth_kbps = kbps;
    }

    let mut keys = Vec::new();
    if args.all {
        keys.extend(store.clips_pending_download()?.into_iter().map(|c| c.key));
    }
    for reference in &args.clips {
        keys.push(store.resolve_clip(reference)?.key);
    }

    let ffmpeg = Ffmpeg::locate(download.ffmpeg_path.as_deref());
    if ffmpeg.is_none() {
        tracing::warn!("ffmpeg not found; stream manifests and thumbnails will fail");
    }
    let browser = settings.browser_settings();
    let fetcher = HttpFetcher::new(&browser.user_agent, browser.proxy.as_deref(), ffmpeg)?;

    let manager = DownloadManager::start(store, download.clone(), Arc::new(fetcher));
    let mut events = manager
        .events()
        .ok_or_else(|| anyhow::anyhow!("download events already taken"))?;

    let resumed = manager.resume_pending()?;
    let result = manager.enqueue(&keys, args.template.as_deref())?;
    for (clip, reason) in &result.skipped {
        let why = match reason {
            SkipReason::NotFound => "not in the catalog",
            SkipReason::NoVideoUrl => "no video URL",
            SkipReason::AlreadyDownloaded => "already downloaded",
            SkipReason::AlreadyQueued => "already queued",
        };
        println!("  {} {}: {}", style("→").dim(), clip, why);
    }

    let mut pending: HashSet<TaskId> = resumed.into_iter().chain(result.queued).collect();
    let total = pending.len();
    if total == 0 {
        println!("{} Nothing to download", style("!").yellow());
        if keys.is_empty() && !args.all {
            println!("  Pass clip ids or --all");
        }
        return Ok(());
    }

    println!(
        "{} Downloading {} clip(s) with {} worker(s) into {}",
        style("→").cyan(),
        total,
        download.concurrent_downloads,
        download.output_dir.display()
    );
    if let Some(rate) = download.bandwidth_bytes() {
        println!("  {} limited to {}/s", style("→").dim(), format_bytes(rate));
    }

    let mut progress = DownloadProgress::new(total as u64);
    let mut completed = 0usize;
    let mut failed = 0usize;

    while !pending.is_empty() {
        let event = tokio::select! {
            event = events.recv() => match event {
                Some(event) => event,
                None => break,
            },
            _ = tokio::signal::ctrl_c() => {
                progress.println(&format!(
                    "{} Interrupted; unfinished downloads resume on the next run",
                    style("!").yellow()
                ));
                manager.shutdown().await;
                break;
            }
        };
        match event {
            DownloadEvent::Queued { .. } => {}
            DownloadEvent::Started { task, clip, attempt } => {
                let label = if attempt > 1 {
                    format!("{} (attempt {})", clip, attempt)
                } else {
                    clip.to_string()
                };
                progress.start(&task, &label);
            }
            DownloadEvent::Progress {
                task,
                bytes,
                total,
                speed_bps,
                eta,
            } => progress.progress(&task, bytes, total, speed_bps, eta),
            DownloadEvent::Converting { task, position, eta, .. } => {
                progress.converting(&task, position, eta)
            }
            DownloadEvent::Retrying {
                attempt, delay, error, ..
            } => progress.println(&format!(
                "{} attempt {} failed ({}); retrying in {}s",
                style("!").yellow(),
                attempt,
                error,
                delay.as_secs()
            )),
            DownloadEvent::Completed { task, path, existing, .. } => {
                if !pending.remove(&task) {
                    continue;
                }
                completed += 1;
                progress.finish(&task);
                let note = if existing { " (already on disk)" } else { "" };
                progress.println(&format!("{} {}{}", style("✓").green(), path.display(), note));
            }
            DownloadEvent::Failed {
                task,
                clip,
                error,
                cancelled,
            } => {
                if pending.remove(&task) {
                    failed += 1;
                    progress.finish(&task);
                }
                if !cancelled {
                    progress.println(&format!("{} {}: {}", style("✗").red(), clip, error));
                }
            }
        }
    }
    progress.done();

    println!("{} Downloaded {} clip(s)", style("✓").green(), completed);
    if failed > 0 {
        println!("  {} {} failed", style("✗").red(), failed);
    }
    Ok(())
}
