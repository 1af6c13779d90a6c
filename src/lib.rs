//! clipscout - stock video discovery and download.
//!
//! Crawls stock-footage sites in a real browser, extracts the best video
//! URL and metadata for every clip, keeps a searchable catalog in SQLite
//! and downloads clips through a bandwidth-limited worker pool.

pub mod cli;
pub mod config;
pub mod models;
pub mod repository;
pub mod scrapers;
pub mod services;
