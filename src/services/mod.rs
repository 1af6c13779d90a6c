//! Service layer for clipscout business logic.
//!
//! Crawl and download orchestration, separated from UI concerns. Services
//! report progress through event channels so any front end can drive them.

pub mod crawl;
pub mod download;
pub mod ffmpeg;

pub use crawl::{CrawlEvent, CrawlHandle, CrawlRequest, CrawlService, CrawlSummary};
pub use download::{DownloadEvent, DownloadManager, HttpFetcher, MediaFetcher};
