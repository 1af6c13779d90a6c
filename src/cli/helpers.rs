//! Shared helper functions for CLI commands.

use std::sync::Arc;
use std::time::Duration;

use console::style;

use crate::config::Settings;
use crate::models::Clip;
use crate::repository::MetadataStore;
use crate::scrapers::ProfileRegistry;

/// Open the metadata store, creating the data directories first.
pub fn open_store(settings: &Settings) -> anyhow::Result<Arc<MetadataStore>> {
    settings.ensure_directories()?;
    let store = MetadataStore::open_with_policy(&settings.database_path(), settings.tie_policy)?;
    Ok(Arc::new(store))
}

/// Built-in profiles plus any profile files in the profiles directory.
pub fn load_registry(settings: &Settings) -> anyhow::Result<ProfileRegistry> {
    let mut registry = ProfileRegistry::with_builtins();
    if settings.profiles_dir.is_dir() {
        let loaded = registry.load_dir(&settings.profiles_dir)?;
        if loaded > 0 {
            tracing::info!(
                "Loaded {} profile(s) from {}",
                loaded,
                settings.profiles_dir.display()
            );
        }
    }
    Ok(registry)
}

/// Format bytes as human-readable size.
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;

    if bytes >= GB {
        format!("{:.2} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.2} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2} KB", bytes as f64 / KB as f64)
    } else {
        format!("{} B", bytes)
    }
}

/// `1h02m`, `3m05s` or `42s`.
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs >= 3600 {
        format!("{}h{:02}m", secs / 3600, (secs % 3600) / 60)
    } else if secs >= 60 {
        format!("{}m{:02}s", secs / 60, secs % 60)
    } else {
        format!("{}s", secs)
    }
}

/// Truncate a string for display, ending with `...` when cut.
pub fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let cut: String = s.chars().take(max_len.saturating_sub(3)).collect();
        format!("{}...", cut)
    }
}

/// One-line listing of a clip.
pub fn clip_line(clip: &Clip) -> String {
    let mut flags = String::new();
    if clip.favorite {
        flags.push('*');
    }
    if clip.rating > 0 {
        flags.push_str(&format!("{}/5", clip.rating));
    }
    let title = if clip.title.is_empty() {
        "(untitled)"
    } else {
        clip.title.as_str()
    };
    format!(
        "{:<28} {:<5} {:<10} {:<45} {}",
        style(clip.key.to_string()).cyan(),
        clip.quality_tier.label(),
        truncate(&clip.resolution, 10),
        truncate(title, 45),
        style(flags).yellow()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(2048), "2.00 KB");
        assert_eq!(format_bytes(5 * 1024 * 1024), "5.00 MB");
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(42)), "42s");
        assert_eq!(format_duration(Duration::from_secs(185)), "3m05s");
        assert_eq!(format_duration(Duration::from_secs(3720)), "1h02m");
    }

    #[test]
    fn test_truncate() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("a much longer title", 10), "a much ...");
    }
}
