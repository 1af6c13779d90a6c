//! Search index maintenance and catalog statistics.

use console::style;

use crate::cli::helpers::open_store;
use crate::config::Settings;

pub fn cmd_index_rebuild(settings: &Settings) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    println!("{} Rebuilding search index...", style("→").cyan());
    let rows = store.rebuild_search_index()?;
    println!("{} Indexed {} clips", style("✓").green(), rows);
    Ok(())
}

pub fn cmd_index_check(settings: &Settings) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    match store.check_search_index() {
        Ok(()) => {
            println!("{} Search index is consistent", style("✓").green());
            Ok(())
        }
        Err(e) => {
            println!("{} {}", style("✗").red(), e);
            println!("  Run 'clipscout index rebuild' to repair it");
            Err(e.into())
        }
    }
}

/// Show catalog statistics.
pub fn cmd_stats(settings: &Settings) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    let stats = store.stats()?;

    println!("\n{}", style("Catalog").bold());
    println!("{}", "-".repeat(40));
    println!("{:<22} {}", "Database:", store.path().display());
    println!("{:<22} {}", "Clips:", stats.clips);
    println!("{:<22} {}", "  With video URL:", stats.with_video);
    println!("{:<22} {}", "  Downloaded:", stats.downloaded);
    println!("{:<22} {}", "  Favorites:", stats.favorites);
    println!("{:<22} {}", "Collections:", stats.collections);
    println!("{:<22} {}", "Pages crawled:", stats.crawled_pages);
    println!("{:<22} {}", "URLs queued:", stats.queued_urls);
    println!("{:<22} {}", "Downloads pending:", stats.pending_downloads);
    Ok(())
}
