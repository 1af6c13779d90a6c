//! CLI commands implementation.
//!
//! This module contains the CLI parser and dispatches to command-specific modules.

mod crawl;
mod download;
mod library;
mod maintenance;
mod profiles;
mod search;

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use crate::config::{load_settings_with_options, LoadOptions};

#[derive(Parser)]
#[command(name = "clipscout")]
#[command(about = "Stock video discovery crawler, clip catalog and download manager")]
#[command(version)]
pub struct Cli {
    /// Config file path (overrides auto-discovery)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Data directory holding the database, profiles and downloads
    #[arg(long, global = true, env = "CLIPSCOUT_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Check if verbose mode is enabled (for early logging setup).
pub fn is_verbose() -> bool {
    std::env::args().any(|arg| arg == "-v" || arg == "--verbose")
}

#[derive(Subcommand)]
enum Commands {
    /// List registered site profiles
    Profiles,

    /// Crawl one or more sites for video clips
    Crawl {
        /// Profile ids to crawl (repeatable; default: all)
        #[arg(short, long = "profile")]
        profiles: Vec<String>,
        /// Start from this URL instead of the profile's (single profile only)
        #[arg(long)]
        start_url: Option<String>,
        /// Stop after this many pages per profile (0 = unlimited)
        #[arg(long)]
        max_pages: Option<u32>,
        /// Maximum link depth from the start page
        #[arg(long)]
        max_depth: Option<u32>,
        /// Show the browser window from the start
        #[arg(long)]
        headed: bool,
        /// Ignore the saved queue and crawl history
        #[arg(long)]
        no_resume: bool,
    },

    /// Search the clip catalog
    Search {
        /// Free-text query
        query: Option<String>,
        /// Match any term instead of all terms
        #[arg(long)]
        any: bool,
        #[arg(long)]
        site: Option<String>,
        #[arg(long)]
        creator: Option<String>,
        /// Only clips in this collection
        #[arg(long)]
        collection: Option<String>,
        /// Resolution substring, e.g. 3840
        #[arg(long)]
        resolution: Option<String>,
        /// Duration bucket: 0-10s, 10-30s, 30s-1m, 1-5m, 5m+
        #[arg(long)]
        duration: Option<String>,
        #[arg(long)]
        min_rating: Option<u8>,
        #[arg(long)]
        favorites: bool,
        #[arg(long)]
        downloaded: bool,
        #[arg(short, long)]
        limit: Option<usize>,
        /// Run a saved search (other filters are ignored)
        #[arg(long)]
        saved: Option<String>,
    },

    /// Download clips
    Download {
        /// Clip ids (`site:id` or bare id)
        clips: Vec<String>,
        /// Download every clip that has a video and is not downloaded yet
        #[arg(long)]
        all: bool,
        /// Filename template, e.g. "{creator}/{title}"
        #[arg(long)]
        template: Option<String>,
        /// Number of parallel downloads
        #[arg(long)]
        concurrency: Option<usize>,
        /// Aggregate bandwidth cap in KB/s (0 = unlimited)
        #[arg(long)]
        limit_kbps: Option<u64>,
    },

    /// Rate a clip from 0 (unrated) to 5
    Rate { clip: String, rating: i64 },

    /// Toggle a clip's favorite flag
    Favorite { clip: String },

    /// Set a clip's notes
    Notes { clip: String, text: String },

    /// Set a clip's user tags (comma separated)
    Tag { clip: String, tags: String },

    /// Manage collections
    Collection {
        #[command(subcommand)]
        command: CollectionCommands,
    },

    /// Manage saved searches
    Saved {
        #[command(subcommand)]
        command: SavedCommands,
    },

    /// Maintain the full-text search index
    Index {
        #[command(subcommand)]
        command: IndexCommands,
    },

    /// Show catalog statistics
    Stats,
}

#[derive(Subcommand)]
enum CollectionCommands {
    /// Create a collection
    Create {
        name: String,
        /// Display color, e.g. #89b4fa
        #[arg(long)]
        color: Option<String>,
    },
    /// Rename a collection
    Rename { name: String, new_name: String },
    /// Delete a collection (clips are kept)
    Delete { name: String },
    /// Add clips to a collection
    Add { name: String, clips: Vec<String> },
    /// Remove clips from a collection
    Remove { name: String, clips: Vec<String> },
    /// List collections
    List,
    /// Show the clips in a collection
    Show { name: String },
}

#[derive(Subcommand)]
enum SavedCommands {
    /// Save a query with filters under a name
    Save {
        name: String,
        query: Option<String>,
        #[arg(long)]
        any: bool,
        #[arg(long)]
        site: Option<String>,
        #[arg(long)]
        creator: Option<String>,
        #[arg(long)]
        collection: Option<String>,
        #[arg(long)]
        resolution: Option<String>,
        #[arg(long)]
        duration: Option<String>,
        #[arg(long)]
        min_rating: Option<u8>,
        #[arg(long)]
        favorites: bool,
        #[arg(long)]
        downloaded: bool,
    },
    /// List saved searches
    List,
    /// Delete a saved search
    Delete { name: String },
}

#[derive(Subcommand)]
enum IndexCommands {
    /// Rebuild the search index from the clip rows
    Rebuild,
    /// Verify the search index matches the clip rows
    Check,
}

/// Run the CLI.
pub async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let options = LoadOptions {
        config_path: cli.config,
        data_dir: cli.data_dir,
    };
    let (settings, _config) = load_settings_with_options(options)
        .await
        .map_err(|e| anyhow::anyhow!(e))?;

    match cli.command {
        Commands::Profiles => profiles::cmd_profiles(&settings),
        Commands::Crawl {
            profiles,
            start_url,
            max_pages,
            max_depth,
            headed,
            no_resume,
        } => {
            crawl::cmd_crawl(
                &settings,
                crawl::CrawlArgs {
                    profiles,
                    start_url,
                    max_pages,
                    max_depth,
                    headed,
                    no_resume,
                },
            )
            .await
        }
        Commands::Search {
            query,
            any,
            site,
            creator,
            collection,
            resolution,
            duration,
            min_rating,
            favorites,
            downloaded,
            limit,
            saved,
        } => {
            let filters = search::build_filters(search::FilterArgs {
                any,
                site,
                creator,
                collection,
                resolution,
                duration,
                min_rating,
                favorites,
                downloaded,
            })?;
            search::cmd_search(&settings, query, filters, limit, saved.as_deref())
        }
        Commands::Download {
            clips,
            all,
            template,
            concurrency,
            limit_kbps,
        } => {
            download::cmd_download(
                &settings,
                download::DownloadArgs {
                    clips,
                    all,
                    template,
                    concurrency,
                    limit_kbps,
                },
            )
            .await
        }
        Commands::Rate { clip, rating } => library::cmd_rate(&settings, &clip, rating),
        Commands::Favorite { clip } => library::cmd_favorite(&settings, &clip),
        Commands::Notes { clip, text } => library::cmd_notes(&settings, &clip, &text),
        Commands::Tag { clip, tags } => library::cmd_tag(&settings, &clip, &tags),
        Commands::Collection { command } => match command {
            CollectionCommands::Create { name, color } => {
                library::cmd_collection_create(&settings, &name, color.as_deref())
            }
            CollectionCommands::Rename { name, new_name } => {
                library::cmd_collection_rename(&settings, &name, &new_name)
            }
            CollectionCommands::Delete { name } => library::cmd_collection_delete(&settings, &name),
            CollectionCommands::Add { name, clips } => {
                library::cmd_collection_add(&settings, &name, &clips)
            }
            CollectionCommands::Remove { name, clips } => {
                library::cmd_collection_remove(&settings, &name, &clips)
            }
            CollectionCommands::List => library::cmd_collection_list(&settings),
            CollectionCommands::Show { name } => library::cmd_collection_show(&settings, &name),
        },
        Commands::Saved { command } => match command {
            SavedCommands::Save {
                name,
                query,
                any,
                site,
                creator,
                collection,
                resolution,
                duration,
                min_rating,
                favorites,
                downloaded,
            } => {
                let filters = search::build_filters(search::FilterArgs {
                    any,
                    site,
                    creator,
                    collection,
                    resolution,
                    duration,
                    min_rating,
                    favorites,
                    downloaded,
                })?;
                search::cmd_saved_save(&settings, &name, query.as_deref().unwrap_or(""), &filters)
            }
            SavedCommands::List => search::cmd_saved_list(&settings),
            SavedCommands::Delete { name } => search::cmd_saved_delete(&settings, &name),
        },
        Commands::Index { command } => match command {
            IndexCommands::Rebuild => maintenance::cmd_index_rebuild(&settings),
            IndexCommands::Check => maintenance::cmd_index_check(&settings),
        },
        Commands::Stats => maintenance::cmd_stats(&settings),
    }
}
