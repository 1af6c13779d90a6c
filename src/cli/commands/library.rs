//! User library commands: ratings, favorites, notes, tags and collections.

use console::style;

use crate::cli::helpers::{clip_line, open_store};
use crate::config::Settings;

pub fn cmd_rate(settings: &Settings, clip: &str, rating: i64) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    let clip = store.resolve_clip(clip)?;
    let stored = store.set_rating(&clip.key, rating)?;
    if stored == 0 {
        println!("{} Cleared rating of {}", style("✓").green(), clip.key);
    } else {
        println!("{} Rated {} {}/5", style("✓").green(), clip.key, stored);
    }
    Ok(())
}

pub fn cmd_favorite(settings: &Settings, clip: &str) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    let clip = store.resolve_clip(clip)?;
    let favorite = store.toggle_favorite(&clip.key)?;
    let verb = if favorite { "Added" } else { "Removed" };
    println!(
        "{} {} {} {} favorites",
        style("✓").green(),
        verb,
        clip.key,
        if favorite { "to" } else { "from" }
    );
    Ok(())
}

pub fn cmd_notes(settings: &Settings, clip: &str, text: &str) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    let clip = store.resolve_clip(clip)?;
    store.set_notes(&clip.key, text)?;
    println!("{} Saved notes for {}", style("✓").green(), clip.key);
    Ok(())
}

pub fn cmd_tag(settings: &Settings, clip: &str, tags: &str) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    let clip = store.resolve_clip(clip)?;
    let tags = store.set_user_tags(&clip.key, tags)?;
    if tags.is_empty() {
        println!("{} Cleared tags of {}", style("✓").green(), clip.key);
    } else {
        println!("{} Tagged {}: {}", style("✓").green(), clip.key, tags.join(", "));
    }
    Ok(())
}

pub fn cmd_collection_create(settings: &Settings, name: &str, color: Option<&str>) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    store.create_collection(name, color)?;
    println!("{} Created collection '{}'", style("✓").green(), name);
    Ok(())
}

pub fn cmd_collection_rename(settings: &Settings, name: &str, new_name: &str) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    store.rename_collection(name, new_name)?;
    println!("{} Renamed '{}' to '{}'", style("✓").green(), name, new_name);
    Ok(())
}

pub fn cmd_collection_delete(settings: &Settings, name: &str) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    store.delete_collection(name)?;
    println!("{} Deleted collection '{}'", style("✓").green(), name);
    Ok(())
}

pub fn cmd_collection_add(settings: &Settings, name: &str, clips: &[String]) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    let mut added = 0;
    for reference in clips {
        let clip = store.resolve_clip(reference)?;
        if store.add_to_collection(name, &clip.key)? {
            added += 1;
        } else {
            println!("  {} {} already in '{}'", style("→").dim(), clip.key, name);
        }
    }
    println!("{} Added {} clip(s) to '{}'", style("✓").green(), added, name);
    Ok(())
}

pub fn cmd_collection_remove(settings: &Settings, name: &str, clips: &[String]) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    let mut removed = 0;
    for reference in clips {
        let clip = store.resolve_clip(reference)?;
        if store.remove_from_collection(name, &clip.key)? {
            removed += 1;
        }
    }
    println!("{} Removed {} clip(s) from '{}'", style("✓").green(), removed, name);
    Ok(())
}

pub fn cmd_collection_list(settings: &Settings) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    let collections = store.list_collections()?;
    if collections.is_empty() {
        println!("{} No collections yet", style("!").yellow());
        println!("  Create one with 'clipscout collection create NAME'");
        return Ok(());
    }
    for c in collections {
        println!(
            "{:<30} {:>6} clips  {}",
            style(&c.name).bold(),
            c.clip_count,
            style(&c.color).dim()
        );
    }
    Ok(())
}

pub fn cmd_collection_show(settings: &Settings, name: &str) -> anyhow::Result<()> {
    let store = open_store(settings)?;
    let clips = store.collection_clips(name)?;
    println!("\n{} ({} clips)", style(name).bold(), clips.len());
    println!("{}", "-".repeat(70));
    for clip in &clips {
        println!("{}", clip_line(clip));
    }
    Ok(())
}
