//! Profile listing command.

use console::style;

use crate::cli::helpers::load_registry;
use crate::config::Settings;
use crate::scrapers::profile::Pagination;

/// List registered site profiles.
pub fn cmd_profiles(settings: &Settings) -> anyhow::Result<()> {
    let registry = load_registry(settings)?;

    println!("\n{}", style("Site Profiles").bold());
    println!("{}", "-".repeat(70));

    for profile in registry.iter() {
        let pagination = match &profile.pagination {
            Pagination::None => "none".to_string(),
            Pagination::InfiniteScroll => "scroll".to_string(),
            Pagination::LoadMore { max_clicks, .. } => format!("load-more x{}", max_clicks),
        };
        println!(
            "{:<12} {:<12} {:<14} {}",
            style(&profile.id).cyan(),
            profile.name,
            pagination,
            style(&profile.start_url).dim()
        );
        if !profile.description.is_empty() {
            println!("{:<12} {}", "", profile.description);
        }
    }

    println!(
        "\n{} profile(s); custom profiles are read from {}",
        registry.len(),
        settings.profiles_dir.display()
    );
    Ok(())
}
