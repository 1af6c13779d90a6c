//! Data models for clipscout.

mod clip;
mod crawl;
mod download;
mod library;
mod quality;

pub use clip::{
    join_tags, parse_tags, url_hash_id, Clip, ClipKey, ClipRecord, DownloadStatus, FormatUrl,
};
pub use crawl::{CrawlQueueEntry, CrawledPage, EntryState, PageOutcome};
pub use download::{DownloadTask, TaskId, TaskState};
pub use library::{
    parse_duration_secs, Collection, DurationRange, MatchMode, SavedSearch, SearchFilters,
    DEFAULT_COLLECTION_COLOR,
};
pub use quality::{QualityTier, ResolutionHint, VideoFormat};
