//! Configuration management.
//!
//! A config file is discovered with `prefer` (or given with `--config`) and
//! parsed with serde according to its extension. [`Settings`] is the
//! resolved, immutable snapshot handed to the crawl and download services.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::repository::TiePolicy;
use crate::scrapers::BrowserSettings;

/// Default database filename.
pub const DEFAULT_DATABASE_FILENAME: &str = "clipscout.db";

/// Subdirectory scanned for additional site profiles.
const PROFILES_SUBDIR: &str = "profiles";

/// Default download subdirectory.
const DOWNLOADS_SUBDIR: &str = "downloads";

/// Crawl pacing and limits for one run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlSettings {
    /// Pages drawn from the frontier before the longer batch pause.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    #[serde(default = "default_page_delay_ms")]
    pub page_delay_ms: u64,
    #[serde(default = "default_scroll_delay_ms")]
    pub scroll_delay_ms: u64,
    /// How long the live discovery strategies run on each page.
    #[serde(default = "default_m3u8_wait_ms")]
    pub m3u8_wait_ms: u64,
    #[serde(default = "default_scroll_steps")]
    pub scroll_steps: u32,
    /// Page-load timeout.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// 0 = unlimited.
    #[serde(default)]
    pub max_pages: u32,
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,
    #[serde(default = "crate::scrapers::browser::default_headless")]
    pub headless: bool,
    /// Session-wide cap on time spent waiting for a manual challenge solve.
    #[serde(default = "default_manual_solve_cap_secs")]
    pub manual_solve_cap_secs: u64,
    #[serde(default = "default_challenge_poll_ms")]
    pub challenge_poll_ms: u64,
    /// Re-seed from the persisted frontier and skip crawled URLs.
    #[serde(default = "default_true")]
    pub resume: bool,
}

fn default_batch_size() -> u32 {
    50
}

fn default_page_delay_ms() -> u64 {
    2500
}

fn default_scroll_delay_ms() -> u64 {
    800
}

fn default_m3u8_wait_ms() -> u64 {
    4000
}

fn default_scroll_steps() -> u32 {
    15
}

fn default_timeout_ms() -> u64 {
    30_000
}

fn default_max_depth() -> u32 {
    2
}

fn default_manual_solve_cap_secs() -> u64 {
    300
}

fn default_challenge_poll_ms() -> u64 {
    2000
}

fn default_true() -> bool {
    true
}

impl Default for CrawlSettings {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            page_delay_ms: default_page_delay_ms(),
            scroll_delay_ms: default_scroll_delay_ms(),
            m3u8_wait_ms: default_m3u8_wait_ms(),
            scroll_steps: default_scroll_steps(),
            timeout_ms: default_timeout_ms(),
            max_pages: 0,
            max_depth: default_max_depth(),
            headless: crate::scrapers::browser::default_headless(),
            manual_solve_cap_secs: default_manual_solve_cap_secs(),
            challenge_poll_ms: default_challenge_poll_ms(),
            resume: true,
        }
    }
}

impl CrawlSettings {
    pub fn page_delay(&self) -> Duration {
        Duration::from_millis(self.page_delay_ms)
    }

    pub fn scroll_delay(&self) -> Duration {
        Duration::from_millis(self.scroll_delay_ms)
    }

    pub fn m3u8_wait(&self) -> Duration {
        Duration::from_millis(self.m3u8_wait_ms)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn manual_solve_cap(&self) -> Duration {
        Duration::from_secs(self.manual_solve_cap_secs)
    }

    pub fn challenge_poll(&self) -> Duration {
        Duration::from_millis(self.challenge_poll_ms.max(50))
    }

    /// `None` when unlimited.
    pub fn page_limit(&self) -> Option<usize> {
        (self.max_pages > 0).then_some(self.max_pages as usize)
    }
}

/// Download worker pool settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DownloadSettings {
    /// Output directory; resolved against the data directory when empty.
    #[serde(default)]
    pub output_dir: PathBuf,
    #[serde(default = "default_concurrent_downloads")]
    pub concurrent_downloads: usize,
    /// Total attempts per task, including the first. Lowered at run time
    /// when later retries would hit `max_backoff_ms` twice (see
    /// [`DownloadSettings::effective_max_attempts`]).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Aggregate cap in KB/s; 0 = unlimited.
    #[serde(default)]
    pub bandwidth_kbps: u64,
    /// Accepted and persisted; nothing in the core reads it.
    #[serde(default)]
    pub clipboard_monitor: bool,
    #[serde(default = "default_filename_template")]
    pub filename_template: String,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    /// Extract a thumbnail frame after each download.
    #[serde(default = "default_true")]
    pub thumbnails: bool,
    /// Explicit ffmpeg binary; searched in PATH when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ffmpeg_path: Option<PathBuf>,
}

fn default_concurrent_downloads() -> usize {
    2
}

fn default_max_attempts() -> u32 {
    3
}

fn default_filename_template() -> String {
    "{title}".to_string()
}

fn default_backoff_base_ms() -> u64 {
    2000
}

fn default_max_backoff_ms() -> u64 {
    30_000
}

impl Default for DownloadSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::new(),
            concurrent_downloads: default_concurrent_downloads(),
            max_attempts: default_max_attempts(),
            bandwidth_kbps: 0,
            clipboard_monitor: false,
            filename_template: default_filename_template(),
            backoff_base_ms: default_backoff_base_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            thumbnails: true,
            ffmpeg_path: None,
        }
    }
}

impl DownloadSettings {
    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(20);
        let ms = self.backoff_base_ms.saturating_mul(1u64 << exp);
        Duration::from_millis(ms.min(self.max_backoff_ms))
    }

    /// Attempts actually made per task. `max_attempts` is lowered so that
    /// every retry waits longer than the one before; once `max_backoff_ms`
    /// is reached further retries would repeat the same delay.
    pub fn effective_max_attempts(&self) -> u32 {
        let wanted = self.max_attempts.max(1);
        if self.backoff_base_ms == 0 {
            return wanted;
        }
        let mut attempts = 2;
        while attempts < wanted && self.backoff(attempts) > self.backoff(attempts - 1) {
            attempts += 1;
        }
        attempts.min(wanted)
    }

    /// Bandwidth cap in bytes per second.
    pub fn bandwidth_bytes(&self) -> Option<u64> {
        (self.bandwidth_kbps > 0).then(|| self.bandwidth_kbps * 1024)
    }
}

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Database filename inside `data_dir`.
    pub database_filename: String,
    /// Explicit database path (overrides data_dir/database_filename).
    pub database_path: Option<PathBuf>,
    /// Directory scanned for extra profile files.
    pub profiles_dir: PathBuf,
    pub tie_policy: TiePolicy,
    pub crawl: CrawlSettings,
    pub download: DownloadSettings,
    pub browser: BrowserSettings,
}

impl Default for Settings {
    fn default() -> Self {
        // Falls back gracefully: data dir -> home dir -> current dir
        let data_dir = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."))
            .join("clipscout");
        Self::with_data_dir(data_dir)
    }
}

impl Settings {
    /// Create settings with a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        let download = DownloadSettings {
            output_dir: data_dir.join(DOWNLOADS_SUBDIR),
            ..Default::default()
        };
        Self {
            profiles_dir: data_dir.join(PROFILES_SUBDIR),
            data_dir,
            database_filename: DEFAULT_DATABASE_FILENAME.to_string(),
            database_path: None,
            tie_policy: TiePolicy::default(),
            crawl: CrawlSettings::default(),
            download,
            browser: BrowserSettings::default(),
        }
    }

    /// Get the full path to the database.
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(|| self.data_dir.join(&self.database_filename))
    }

    /// Browser settings with the crawl's headless flag applied.
    pub fn browser_settings(&self) -> BrowserSettings {
        BrowserSettings {
            headless: self.crawl.headless,
            ..self.browser.clone()
        }
    }

    /// Ensure the data and download directories exist.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        for (dir, what) in [
            (&self.data_dir, "data"),
            (&self.download.output_dir, "download"),
        ] {
            fs::create_dir_all(dir).map_err(|e| {
                std::io::Error::new(
                    e.kind(),
                    format!("Failed to create {} directory '{}': {}", what, dir.display(), e),
                )
            })?;
        }
        if let Some(parent) = self.database_path().parent() {
            fs::create_dir_all(parent)?;
        }
        Ok(())
    }

    /// Apply `DATABASE_PATH`, `CLIPSCOUT_DATA_DIR` and `CLIPSCOUT_HEADLESS`.
    pub fn apply_env_overrides(&mut self) {
        if let Some(dir) = env_value("CLIPSCOUT_DATA_DIR") {
            tracing::debug!("Using CLIPSCOUT_DATA_DIR from environment: {}", dir);
            self.set_data_dir(expand_path(&dir));
        }
        if let Some(path) = env_value("DATABASE_PATH") {
            tracing::debug!("Using DATABASE_PATH from environment: {}", path);
            self.database_path = Some(expand_path(&path));
        }
        if let Some(flag) = env_value("CLIPSCOUT_HEADLESS") {
            match parse_flag(&flag) {
                Some(headless) => self.crawl.headless = headless,
                None => tracing::warn!("Ignoring CLIPSCOUT_HEADLESS={}: not a boolean", flag),
            }
        }
    }

    /// Move the data directory, carrying along subdirectories that were
    /// derived from it.
    pub fn set_data_dir(&mut self, data_dir: PathBuf) {
        if self.profiles_dir == self.data_dir.join(PROFILES_SUBDIR) {
            self.profiles_dir = data_dir.join(PROFILES_SUBDIR);
        }
        if self.download.output_dir == self.data_dir.join(DOWNLOADS_SUBDIR) {
            self.download.output_dir = data_dir.join(DOWNLOADS_SUBDIR);
        }
        self.data_dir = data_dir;
    }
}

fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|s| !s.trim().is_empty())
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn expand_path(raw: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(raw).as_ref())
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Data directory path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<String>,
    /// Database filename or path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,
    /// Directory of extra profile files.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profiles_dir: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tie_policy: Option<TiePolicy>,
    #[serde(default)]
    pub crawl: CrawlSettings,
    #[serde(default)]
    pub download: DownloadSettings,
    #[serde(default)]
    pub browser: BrowserSettings,
    /// Path to the config file this was loaded from (not serialized).
    #[serde(skip)]
    pub source_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration using prefer for discovery.
    /// Falls back to defaults when no file is found or it fails to parse.
    pub async fn load() -> Self {
        match prefer::load("clipscout").await {
            Ok(pref_config) => {
                if let Some(path) = pref_config.source_path() {
                    match Self::load_from_path(path).await {
                        Ok(config) => config,
                        Err(e) => {
                            tracing::warn!("{}", e);
                            Self::default()
                        }
                    }
                } else {
                    Self::default()
                }
            }
            Err(_) => Self::default(),
        }
    }

    /// Load configuration from a specific file path.
    /// Supports JSON, TOML and YAML based on file extension.
    pub async fn load_from_path(path: &Path) -> Result<Self, String> {
        let contents = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| format!("Failed to read config file {}: {}", path.display(), e))?;

        let mut config = Self::parse(&contents, path)?;
        config.source_path = Some(path.to_path_buf());
        Ok(config)
    }

    fn parse(contents: &str, path: &Path) -> Result<Self, String> {
        let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("json");
        match ext {
            "toml" => toml::from_str(contents)
                .map_err(|e| format!("Failed to parse TOML config: {}", e)),
            "yaml" | "yml" => serde_yaml::from_str(contents)
                .map_err(|e| format!("Failed to parse YAML config: {}", e)),
            _ => serde_json::from_str(contents)
                .map_err(|e| format!("Failed to parse JSON config: {}", e)),
        }
    }

    /// Get the base directory for resolving relative paths.
    pub fn base_dir(&self) -> Option<PathBuf> {
        self.source_path
            .as_ref()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
    }

    /// Resolve a path that may be relative to the config file.
    /// - Absolute paths are returned as-is
    /// - Paths starting with ~ are expanded
    /// - Relative paths are resolved relative to `base_dir`
    pub fn resolve_path(&self, path_str: &str, base_dir: &Path) -> PathBuf {
        let expanded = shellexpand::tilde(path_str);
        let path = Path::new(expanded.as_ref());

        if path.is_absolute() {
            path.to_path_buf()
        } else {
            base_dir.join(path)
        }
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings, base_dir: &Path) {
        if let Some(ref data_dir) = self.data_dir {
            settings.set_data_dir(self.resolve_path(data_dir, base_dir));
        }
        if let Some(ref database) = self.database {
            let path = Path::new(database);
            if path.components().count() > 1 || database.starts_with('~') {
                settings.database_path = Some(self.resolve_path(database, base_dir));
            } else {
                settings.database_filename = database.clone();
            }
        }
        if let Some(ref dir) = self.profiles_dir {
            settings.profiles_dir = self.resolve_path(dir, base_dir);
        }
        if let Some(policy) = self.tie_policy {
            settings.tie_policy = policy;
        }

        settings.crawl = self.crawl.clone();
        settings.browser = self.browser.clone();

        let derived_output = settings.download.output_dir.clone();
        settings.download = self.download.clone();
        settings.download.output_dir = if self.download.output_dir.as_os_str().is_empty() {
            derived_output
        } else {
            self.resolve_path(&self.download.output_dir.to_string_lossy(), base_dir)
        };
    }
}

/// Options for loading settings.
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit config file path (overrides auto-discovery).
    pub config_path: Option<PathBuf>,
    /// Data directory override (--data-dir).
    pub data_dir: Option<PathBuf>,
}

/// Load settings with explicit options.
/// Priority: defaults < config file < environment < command line.
pub async fn load_settings_with_options(options: LoadOptions) -> Result<(Settings, Config), String> {
    let config = match options.config_path {
        Some(ref path) => Config::load_from_path(path).await?,
        None => Config::load().await,
    };

    let mut settings = Settings::default();
    let base_dir = config
        .base_dir()
        .unwrap_or_else(|| std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")));
    config.apply_to_settings(&mut settings, &base_dir);
    settings.apply_env_overrides();

    if let Some(ref dir) = options.data_dir {
        settings.set_data_dir(expand_path(&dir.to_string_lossy()));
    }

    Ok((settings, config))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crawl_defaults() {
        let crawl = CrawlSettings::default();
        assert_eq!(crawl.batch_size, 50);
        assert_eq!(crawl.page_delay(), Duration::from_millis(2500));
        assert_eq!(crawl.m3u8_wait(), Duration::from_secs(4));
        assert_eq!(crawl.scroll_steps, 15);
        assert_eq!(crawl.page_limit(), None);
        assert_eq!(crawl.max_depth, 2);
        assert!(crawl.headless);
        assert!(crawl.resume);
        assert_eq!(crawl.manual_solve_cap(), Duration::from_secs(300));
    }

    #[test]
    fn test_download_backoff_doubles_and_caps() {
        let dl = DownloadSettings::default();
        assert_eq!(dl.backoff(1), Duration::from_secs(2));
        assert_eq!(dl.backoff(2), Duration::from_secs(4));
        assert_eq!(dl.backoff(4), Duration::from_secs(16));
        assert_eq!(dl.backoff(5), Duration::from_secs(30));
        assert_eq!(dl.backoff(60), Duration::from_secs(30));
        assert_eq!(dl.bandwidth_bytes(), None);
    }

    #[test]
    fn test_attempts_stop_before_backoff_plateaus() {
        let mut dl = DownloadSettings::default();
        assert_eq!(dl.effective_max_attempts(), 3);

        // 2, 4, 8, 16, 30 s; a sixth retry would wait 30 s again.
        dl.max_attempts = 10;
        assert_eq!(dl.effective_max_attempts(), 6);
        let delays: Vec<Duration> = (1..dl.effective_max_attempts()).map(|n| dl.backoff(n)).collect();
        assert!(delays.windows(2).all(|w| w[0] < w[1]));

        dl.max_attempts = 1;
        assert_eq!(dl.effective_max_attempts(), 1);

        dl.max_attempts = 5;
        dl.backoff_base_ms = 0;
        assert_eq!(dl.effective_max_attempts(), 5);
    }

    #[test]
    fn test_parse_toml_partial() {
        let toml = r#"
data_dir = "library"
tie_policy = "latest_discovered"

[crawl]
max_pages = 40
headless = false

[download]
concurrent_downloads = 4
bandwidth_kbps = 512
"#;
        let config = Config::parse(toml, Path::new("clipscout.toml")).unwrap();
        assert_eq!(config.crawl.max_pages, 40);
        assert!(!config.crawl.headless);
        assert_eq!(config.crawl.scroll_steps, 15);
        assert_eq!(config.download.concurrent_downloads, 4);
        assert_eq!(config.download.max_attempts, 3);
        assert_eq!(config.tie_policy, Some(TiePolicy::LatestDiscovered));

        let mut settings = Settings::with_data_dir(PathBuf::from("/tmp/default"));
        config.apply_to_settings(&mut settings, Path::new("/srv/cfg"));
        assert_eq!(settings.data_dir, PathBuf::from("/srv/cfg/library"));
        assert_eq!(settings.download.output_dir, PathBuf::from("/srv/cfg/library/downloads"));
        assert_eq!(settings.profiles_dir, PathBuf::from("/srv/cfg/library/profiles"));
        assert_eq!(settings.database_path(), PathBuf::from("/srv/cfg/library/clipscout.db"));
        assert_eq!(settings.download.bandwidth_bytes(), Some(512 * 1024));
        assert!(!settings.browser_settings().headless);
    }

    #[test]
    fn test_parse_yaml_and_json() {
        let yaml = "crawl:\n  max_depth: 5\ndownload:\n  filename_template: \"{creator}/{title}\"\n";
        let config = Config::parse(yaml, Path::new("c.yaml")).unwrap();
        assert_eq!(config.crawl.max_depth, 5);
        assert_eq!(config.download.filename_template, "{creator}/{title}");

        let json = r#"{"database": "/var/lib/clips.db"}"#;
        let config = Config::parse(json, Path::new("c.json")).unwrap();
        let mut settings = Settings::with_data_dir(PathBuf::from("/tmp/d"));
        config.apply_to_settings(&mut settings, Path::new("/etc"));
        assert_eq!(settings.database_path(), PathBuf::from("/var/lib/clips.db"));
    }

    #[test]
    fn test_explicit_output_dir_kept_when_data_dir_moves() {
        let mut settings = Settings::with_data_dir(PathBuf::from("/a"));
        settings.download.output_dir = PathBuf::from("/media/clips");
        settings.set_data_dir(PathBuf::from("/b"));
        assert_eq!(settings.download.output_dir, PathBuf::from("/media/clips"));
        assert_eq!(settings.profiles_dir, PathBuf::from("/b/profiles"));
    }

    #[test]
    fn test_parse_flag() {
        assert_eq!(parse_flag("TRUE"), Some(true));
        assert_eq!(parse_flag("off"), Some(false));
        assert_eq!(parse_flag("maybe"), None);
    }
}
