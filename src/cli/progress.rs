//! Progress display for crawls and concurrent downloads.

use std::collections::HashMap;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};

use super::helpers::{format_bytes, format_duration, truncate};

fn bar_style(template: &str) -> ProgressStyle {
    ProgressStyle::default_bar()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("━╸─")
}

fn spinner_style(template: &str) -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

/// One spinner per crawled profile.
pub struct CrawlProgress {
    multi: MultiProgress,
    bars: HashMap<String, ProgressBar>,
}

impl CrawlProgress {
    pub fn new() -> Self {
        Self {
            multi: MultiProgress::new(),
            bars: HashMap::new(),
        }
    }

    fn bar(&mut self, profile: &str) -> &ProgressBar {
        let multi = &self.multi;
        self.bars.entry(profile.to_string()).or_insert_with(|| {
            let bar = multi.add(ProgressBar::new_spinner());
            bar.set_style(spinner_style("{spinner:.green} {prefix:.bold} {wide_msg}"));
            bar.set_prefix(profile.to_string());
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        })
    }

    pub fn set_message(&mut self, profile: &str, message: String) {
        self.bar(profile).set_message(message);
    }

    pub fn finish(&mut self, profile: &str, message: String) {
        self.bar(profile).finish_with_message(message);
    }

    /// Print above the bars.
    pub fn println(&self, message: &str) {
        let _ = self.multi.println(message);
    }
}

impl Default for CrawlProgress {
    fn default() -> Self {
        Self::new()
    }
}

/// A summary bar plus one bar per running download task.
pub struct DownloadProgress {
    multi: MultiProgress,
    summary: ProgressBar,
    tasks: HashMap<String, ProgressBar>,
}

impl DownloadProgress {
    pub fn new(total: u64) -> Self {
        let multi = MultiProgress::new();
        let summary = multi.add(ProgressBar::new(total));
        summary.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} {msg} [{bar:30.cyan/blue}] {pos}/{len}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("█▓░"),
        );
        summary.set_message("Downloading");
        Self {
            multi,
            summary,
            tasks: HashMap::new(),
        }
    }

    pub fn start(&mut self, task: &str, label: &str) {
        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(spinner_style("  {spinner:.cyan} {wide_msg} {prefix}"));
        bar.set_message(truncate(label, 40));
        bar.enable_steady_tick(Duration::from_millis(100));
        if let Some(old) = self.tasks.insert(task.to_string(), bar) {
            old.finish_and_clear();
        }
    }

    pub fn progress(&mut self, task: &str, bytes: u64, total: Option<u64>, speed: f64, eta: Option<Duration>) {
        let Some(bar) = self.tasks.get(task) else {
            return;
        };
        match total {
            Some(total) => {
                if bar.length() != Some(total) {
                    bar.set_length(total);
                    bar.set_style(bar_style(
                        "  {spinner:.cyan} {wide_msg} [{bar:25.cyan/blue}] {bytes}/{total_bytes} {prefix}",
                    ));
                }
                bar.set_position(bytes);
            }
            None => bar.set_position(bytes),
        }
        let eta = eta.map(format_duration).unwrap_or_else(|| "--".to_string());
        bar.set_prefix(format!("{}/s eta {}", format_bytes(speed as u64), eta));
    }

    pub fn converting(&mut self, task: &str, position: Duration, eta: Option<Duration>) {
        if let Some(bar) = self.tasks.get(task) {
            let eta = eta.map(format_duration).unwrap_or_else(|| "--".to_string());
            bar.set_prefix(format!("muxed {} eta {}", format_duration(position), eta));
        }
    }

    pub fn finish(&mut self, task: &str) {
        if let Some(bar) = self.tasks.remove(task) {
            bar.finish_and_clear();
        }
        self.summary.inc(1);
    }

    /// Print above the bars.
    pub fn println(&self, message: &str) {
        let _ = self.multi.println(message);
    }

    pub fn done(&self) {
        self.summary.finish_and_clear();
    }
}
