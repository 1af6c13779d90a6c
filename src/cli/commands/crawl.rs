//! Crawl command.

use std::sync::Arc;

use console::style;
use tokio::io::{AsyncBufReadExt, BufReader};

use crate::cli::helpers::{format_duration, load_registry, open_store, truncate};
use crate::cli::progress::CrawlProgress;
use crate::config::Settings;
use crate::models::PageOutcome;
use crate::repository::UpsertOutcome;
use crate::scrapers::{ChallengeState, ChromeLauncher};
use crate::services::crawl::{CrawlEvent, CrawlRequest, CrawlService, StopReason};

pub struct CrawlArgs {
    pub profiles: Vec<String>,
    pub start_url: Option<String>,
    pub max_pages: Option<u32>,
    pub max_depth: Option<u32>,
    pub headed: bool,
    pub no_resume: bool,
}

/// Crawl the selected profiles until their queues run dry or Ctrl-C.
pub async fn cmd_crawl(settings: &Settings, args: CrawlArgs) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    let registry = Arc::new(load_registry(settings)?);

    let mut crawl = settings.crawl.clone();
    if let Some(n) = args.max_pages {
        crawl.max_pages = n;
    }
    if let Some(depth) = args.max_depth {
        crawl.max_depth = depth;
    }
    if args.headed {
        crawl.headless = false;
    }
    if args.no_resume {
        crawl.resume = false;
    }

    let mut browser = settings.browser_settings();
    browser.headless = crawl.headless;
    let launcher = Arc::new(ChromeLauncher::new(browser));

    let profiles = if args.profiles.is_empty() {
        registry.ids()
    } else {
        args.profiles
    };
    let mut request = CrawlRequest::new(profiles);
    if let Some(url) = args.start_url {
        request = request.with_start_url(url);
    }

    let service = CrawlService::new(store, registry, launcher);
    let mut handle = service.start(request, crawl)?;
    let mut events = handle
        .events()
        .ok_or_else(|| anyhow::anyhow!("crawl events already taken"))?;

    println!(
        "{} Crawling; press Enter after solving a challenge, Ctrl-C to stop",
        style("→").cyan()
    );

    let mut progress = CrawlProgress::new();
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;

    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                render_event(&mut progress, event);
            }
            line = stdin.next_line(), if stdin_open => {
                match line {
                    Ok(Some(_)) => handle.acknowledge_solve(),
                    _ => stdin_open = false,
                }
            }
            _ = tokio::signal::ctrl_c(), if !handle.is_stopping() => {
                progress.println(&format!(
                    "{} Stopping; saving the queue for the next run...",
                    style("!").yellow()
                ));
                handle.stop();
            }
        }
    }

    let summary = handle.join().await;

    println!(
        "{} Crawled {} pages, found {} clips ({} new)",
        style("✓").green(),
        summary.pages(),
        summary.clips_found(),
        summary.clips_new()
    );
    for profile in &summary.profiles {
        if profile.persisted > 0 {
            println!(
                "  {} {}: {} URLs saved for resume",
                style("→").dim(),
                profile.profile,
                profile.persisted
            );
        }
    }
    let failures = summary.failures();
    for (profile, error) in &failures {
        println!("  {} {}: {}", style("✗").red(), profile, error);
    }
    if !failures.is_empty() {
        anyhow::bail!("{} profile(s) stopped with an error", failures.len());
    }
    Ok(())
}

fn render_event(progress: &mut CrawlProgress, event: CrawlEvent) {
    match event {
        CrawlEvent::Started { profile, seeds, resumed } => {
            let message = if resumed > 0 {
                format!("started ({} seeds, {} resumed)", seeds, resumed)
            } else {
                format!("started ({} seeds)", seeds)
            };
            progress.set_message(&profile, message);
        }
        CrawlEvent::PageStarted { profile, url, depth } => {
            progress.set_message(&profile, format!("[d{}] {}", depth, truncate(&url, 70)));
        }
        CrawlEvent::PageFinished {
            profile,
            url,
            outcome,
            error,
            ..
        } => {
            if outcome == PageOutcome::Error {
                progress.println(&format!(
                    "{} [{}] {}: {}",
                    style("✗").red(),
                    profile,
                    truncate(&url, 60),
                    error.unwrap_or_default()
                ));
            }
        }
        CrawlEvent::ClipSaved { profile, key, outcome } => match outcome {
            UpsertOutcome::Inserted => {
                progress.println(&format!("{} [{}] new clip {}", style("+").green(), profile, key))
            }
            UpsertOutcome::Upgraded => {
                progress.println(&format!("{} [{}] upgraded {}", style("↑").cyan(), profile, key))
            }
            _ => {}
        },
        CrawlEvent::Challenge { profile, url, state } => match state {
            ChallengeState::ChallengeDetected => progress.println(&format!(
                "{} [{}] challenge on {}",
                style("!").yellow(),
                profile,
                truncate(&url, 60)
            )),
            ChallengeState::AwaitingManualSolve => progress.println(&format!(
                "{} [{}] solve the challenge in the browser window, then press Enter",
                style("!").yellow(),
                profile
            )),
            ChallengeState::Resumed => {
                progress.println(&format!("{} [{}] challenge cleared", style("✓").green(), profile))
            }
            ChallengeState::Clear => {}
        },
        CrawlEvent::ChallengeTimeout { profile, url, waited } => progress.println(&format!(
            "{} [{}] gave up on {} after {}",
            style("✗").red(),
            profile,
            truncate(&url, 60),
            format_duration(waited)
        )),
        CrawlEvent::Stats { profile, stats } => progress.set_message(
            &profile,
            format!(
                "{} pages, {} clips ({} new), {} queued",
                stats.pages, stats.clips_found, stats.clips_new, stats.queued
            ),
        ),
        CrawlEvent::Stopped { profile, summary } => {
            let reason = match &summary.reason {
                StopReason::Exhausted => "done".to_string(),
                StopReason::Cancelled => "stopped".to_string(),
                StopReason::Fatal(e) => format!("failed: {}", e),
            };
            progress.finish(
                &profile,
                format!(
                    "{}: {} pages, {} clips",
                    reason, summary.stats.pages, summary.stats.clips_found
                ),
            );
        }
    }
}
