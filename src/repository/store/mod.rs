//! SQLite-backed metadata store for clips, library state and crawl audit.
//!
//! Concurrency model: every read opens its own WAL connection and never
//! waits on writers. All writes run through [`MetadataStore::write`], which
//! holds an explicit process-wide lock around a single `BEGIN IMMEDIATE`
//! transaction. The lock is a blocking mutex and every write closure is
//! synchronous, so it can never be held across an `.await`.

mod clips;
mod crawl;
mod downloads;
mod library;
mod schema;
mod search;

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{open_db, Result, StoreError};

pub use clips::{UpsertOutcome, UpsertResult};
pub use search::ClipQuery;

/// What to do when a re-discovered URL has the same quality tier as the
/// stored one but a different address.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TiePolicy {
    /// Keep the URL that was stored first.
    #[default]
    FirstDiscovered,
    /// Replace with the most recently discovered URL.
    LatestDiscovered,
}

/// Aggregate counts for status displays.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    pub clips: u64,
    pub with_video: u64,
    pub downloaded: u64,
    pub favorites: u64,
    pub collections: u64,
    pub crawled_pages: u64,
    pub queued_urls: u64,
    pub pending_downloads: u64,
}

/// Single writer of record for clips, collections, saved searches, crawl
/// audit rows and download tasks.
pub struct MetadataStore {
    db_path: PathBuf,
    writer: Mutex<Connection>,
    tie_policy: TiePolicy,
}

impl MetadataStore {
    /// Open (and create if needed) the store at `db_path`.
    pub fn open(db_path: &Path) -> Result<Self> {
        Self::open_with_policy(db_path, TiePolicy::default())
    }

    pub fn open_with_policy(db_path: &Path, tie_policy: TiePolicy) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = open_db(db_path)?;
        schema::init_schema(&conn)?;
        debug!("Opened metadata store at {}", db_path.display());
        Ok(Self {
            db_path: db_path.to_path_buf(),
            writer: Mutex::new(conn),
            tie_policy,
        })
    }

    pub fn path(&self) -> &Path {
        &self.db_path
    }

    pub fn tie_policy(&self) -> TiePolicy {
        self.tie_policy
    }

    /// Open a read connection. Never blocks on the write lock.
    pub(crate) fn reader(&self) -> Result<Connection> {
        Ok(open_db(&self.db_path)?)
    }

    /// Run `f` inside one immediate transaction while holding the write lock.
    /// The transaction rolls back if `f` fails.
    pub(crate) fn write<T>(&self, f: impl FnOnce(&Transaction<'_>) -> Result<T>) -> Result<T> {
        let mut conn = self.writer.lock().map_err(|_| StoreError::LockPoisoned)?;
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let out = f(&tx)?;
        tx.commit()?;
        Ok(out)
    }

    /// Aggregate counts across the store.
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.reader()?;
        let count = |sql: &str| -> Result<u64> {
            let n: i64 = conn.query_row(sql, [], |row| row.get(0))?;
            Ok(n.max(0) as u64)
        };
        Ok(StoreStats {
            clips: count("SELECT COUNT(*) FROM clips")?,
            with_video: count("SELECT COUNT(*) FROM clips WHERE video_url != ''")?,
            downloaded: count("SELECT COUNT(*) FROM clips WHERE dl_status = 'done'")?,
            favorites: count("SELECT COUNT(*) FROM clips WHERE favorite = 1")?,
            collections: count("SELECT COUNT(*) FROM collections")?,
            crawled_pages: count("SELECT COUNT(*) FROM crawled_pages")?,
            queued_urls: count("SELECT COUNT(*) FROM crawl_queue")?,
            pending_downloads: count(
                "SELECT COUNT(*) FROM download_tasks WHERE state IN ('queued', 'fetching', 'converting')",
            )?,
        })
    }

    /// Reclaim free pages.
    pub fn vacuum(&self) -> Result<()> {
        let conn = self.writer.lock().map_err(|_| StoreError::LockPoisoned)?;
        conn.execute_batch("VACUUM")?;
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use tempfile::TempDir;

    pub fn temp_store() -> (TempDir, MetadataStore) {
        let dir = TempDir::new().unwrap();
        let store = MetadataStore::open(&dir.path().join("clips.db")).unwrap();
        (dir, store)
    }
}
