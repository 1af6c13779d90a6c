//! Search and saved-search commands.

use console::style;

use crate::cli::helpers::{clip_line, open_store};
use crate::config::Settings;
use crate::models::{DurationRange, MatchMode, SearchFilters};
use crate::repository::ClipQuery;

/// Filter flags shared by `search` and `saved save`.
pub struct FilterArgs {
    pub any: bool,
    pub site: Option<String>,
    pub creator: Option<String>,
    pub collection: Option<String>,
    pub resolution: Option<String>,
    pub duration: Option<String>,
    pub min_rating: Option<u8>,
    pub favorites: bool,
    pub downloaded: bool,
}

pub fn build_filters(args: FilterArgs) -> anyhow::Result<SearchFilters> {
    let duration = match args.duration.as_deref() {
        Some(raw) => Some(DurationRange::from_str(raw).ok_or_else(|| {
            anyhow::anyhow!(
                "unknown duration range '{}' (expected 0-10s, 10-30s, 30s-1m, 1-5m or 5m+)",
                raw
            )
        })?),
        None => None,
    };
    Ok(SearchFilters {
        site: args.site,
        resolution: args.resolution,
        creator: args.creator,
        collection: args.collection,
        duration,
        min_rating: args.min_rating.filter(|r| *r > 0),
        favorites_only: args.favorites,
        downloaded_only: args.downloaded,
        match_mode: if args.any { MatchMode::Any } else { MatchMode::All },
    })
}

/// Search the catalog and print matching clips.
pub fn cmd_search(
    settings: &Settings,
    query: Option<String>,
    filters: SearchFilters,
    limit: Option<usize>,
    saved: Option<&str>,
) -> anyhow::Result<()> {
    let store = open_store(settings)?;

    let mut request = match saved {
        Some(name) => {
            let saved = store
                .get_saved_search(name)?
                .ok_or_else(|| anyhow::anyhow!("no saved search named '{}'", name))?;
            ClipQuery::text(saved.query).with_filters(saved.filters)
        }
        None => ClipQuery::text(query.unwrap_or_default()).with_filters(filters),
    };
    if let Some(limit) = limit {
        request = request.with_limit(limit);
    }

    let clips = store.query_clips(&request)?;
    if clips.is_empty() {
        println!("{} No clips found", style("!").yellow());
        return Ok(());
    }
    for clip in &clips {
        println!("{}", clip_line(clip));
    }
    println!("\n{} clip(s)", clips.len());
    Ok(())
}

pub fn cmd_saved_save(settings: &Settings, name: &str, query: &str, filters: &SearchFilters) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    store.save_search(name, query, filters)?;
    println!("{} Saved search '{}'", style("✓").green(), name);
    Ok(())
}

pub fn cmd_saved_list(settings: &Settings) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    let searches = store.list_saved_searches()?;
    if searches.is_empty() {
        println!("{} No saved searches", style("!").yellow());
        return Ok(());
    }
    for s in searches {
        let filters = serde_json::to_string(&s.filters)?;
        println!(
            "{:<24} {:<30} {}",
            style(&s.name).bold(),
            if s.query.is_empty() { "-" } else { s.query.as_str() },
            style(filters).dim()
        );
    }
    Ok(())
}

pub fn cmd_saved_delete(settings: &Settings, name: &str) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    if store.delete_saved_search(name)? {
        println!("{} Deleted saved search '{}'", style("✓").green(), name);
    } else {
        println!("{} No saved search named '{}'", style("!").yellow(), name);
    }
    Ok(())
}
