//! Crawl audit rows and the persisted frontier used for resume.

use std::collections::HashSet;

use chrono::Utc;
use rusqlite::params;

use super::MetadataStore;
use crate::models::{CrawlQueueEntry, CrawledPage, EntryState, PageOutcome};
use crate::repository::{parse_datetime, Result};

impl MetadataStore {
    /// Append a page visit to the audit log.
    pub fn record_crawled_page(&self, page: &CrawledPage) -> Result<()> {
        self.write(|tx| {
            tx.execute(
                r#"
                INSERT INTO crawled_pages (url, profile, depth, outcome, clip_count, error, crawled_at)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
                params![
                    page.url,
                    page.profile,
                    page.depth,
                    page.outcome.as_str(),
                    page.clip_count,
                    page.error,
                    page.crawled_at.to_rfc3339(),
                ],
            )?;
            Ok(())
        })
    }

    /// URLs of a profile that were visited successfully. Challenge and error
    /// outcomes are left out so a resumed crawl retries them.
    pub fn crawled_urls(&self, profile: &str) -> Result<HashSet<String>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT url FROM crawled_pages WHERE profile = ? AND outcome = 'success'",
        )?;
        let urls = stmt
            .query_map(params![profile], |row| row.get::<_, String>(0))?
            .collect::<std::result::Result<HashSet<_>, _>>()?;
        Ok(urls)
    }

    /// Most recent visits of a profile, newest first.
    pub fn recent_crawled_pages(&self, profile: &str, limit: usize) -> Result<Vec<CrawledPage>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT url, profile, depth, outcome, clip_count, error, crawled_at
            FROM crawled_pages WHERE profile = ?
            ORDER BY id DESC LIMIT ?
            "#,
        )?;
        let pages = stmt
            .query_map(params![profile, limit as i64], |row| {
                let outcome: String = row.get(3)?;
                let crawled_at: String = row.get(6)?;
                Ok(CrawledPage {
                    url: row.get(0)?,
                    profile: row.get(1)?,
                    depth: row.get(2)?,
                    outcome: PageOutcome::from_str(&outcome).unwrap_or(PageOutcome::Error),
                    clip_count: row.get(4)?,
                    error: row.get(5)?,
                    crawled_at: parse_datetime(&crawled_at),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(pages)
    }

    /// Replace the persisted frontier of a profile with `entries`.
    pub fn save_pending_queue(&self, profile: &str, entries: &[CrawlQueueEntry]) -> Result<usize> {
        self.write(|tx| {
            tx.execute("DELETE FROM crawl_queue WHERE profile = ?", params![profile])?;
            let now = Utc::now().to_rfc3339();
            let mut stmt = tx.prepare(
                r#"
                INSERT OR IGNORE INTO crawl_queue (profile, url, depth, priority, parent_url, added_at)
                VALUES (?, ?, ?, ?, ?, ?)
                "#,
            )?;
            let mut saved = 0;
            for entry in entries {
                saved += stmt.execute(params![
                    profile,
                    entry.url,
                    entry.depth,
                    entry.priority,
                    entry.parent,
                    now
                ])?;
            }
            Ok(saved)
        })
    }

    /// Load the persisted frontier of a profile as pending entries.
    pub fn load_pending_queue(&self, profile: &str) -> Result<Vec<CrawlQueueEntry>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT url, depth, priority, parent_url FROM crawl_queue
            WHERE profile = ?
            ORDER BY depth ASC, priority DESC, rowid ASC
            "#,
        )?;
        let entries = stmt
            .query_map(params![profile], |row| {
                Ok(CrawlQueueEntry {
                    url: row.get(0)?,
                    depth: row.get(1)?,
                    priority: row.get(2)?,
                    state: EntryState::Pending,
                    parent: row.get(3)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(entries)
    }

    pub fn clear_pending_queue(&self, profile: &str) -> Result<()> {
        self.write(|tx| {
            tx.execute("DELETE FROM crawl_queue WHERE profile = ?", params![profile])?;
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::temp_store;
    use super::*;

    fn page(url: &str, outcome: PageOutcome) -> CrawledPage {
        CrawledPage {
            url: url.to_string(),
            profile: "pexels".to_string(),
            depth: 1,
            outcome,
            clip_count: 0,
            error: None,
            crawled_at: Utc::now(),
        }
    }

    fn entry(url: &str, depth: u32, priority: i32) -> CrawlQueueEntry {
        CrawlQueueEntry {
            url: url.to_string(),
            depth,
            priority,
            state: EntryState::Pending,
            parent: None,
        }
    }

    #[test]
    fn test_crawled_urls_skip_failed_outcomes() {
        let (_dir, store) = temp_store();
        store.record_crawled_page(&page("https://a/1", PageOutcome::Success)).unwrap();
        store.record_crawled_page(&page("https://a/2", PageOutcome::Challenge)).unwrap();
        store.record_crawled_page(&page("https://a/3", PageOutcome::Error)).unwrap();
        let urls = store.crawled_urls("pexels").unwrap();
        assert_eq!(urls.len(), 1);
        assert!(urls.contains("https://a/1"));
        assert!(store.crawled_urls("artlist").unwrap().is_empty());
        assert_eq!(store.recent_crawled_pages("pexels", 10).unwrap().len(), 3);
    }

    #[test]
    fn test_pending_queue_roundtrip_orders_by_depth_then_priority() {
        let (_dir, store) = temp_store();
        let saved = store
            .save_pending_queue(
                "pexels",
                &[entry("https://a/c", 1, 5), entry("https://a/i", 1, 10), entry("https://a/s", 0, 0)],
            )
            .unwrap();
        assert_eq!(saved, 3);
        let loaded = store.load_pending_queue("pexels").unwrap();
        let urls: Vec<_> = loaded.iter().map(|e| e.url.as_str()).collect();
        assert_eq!(urls, vec!["https://a/s", "https://a/i", "https://a/c"]);

        store.save_pending_queue("pexels", &[entry("https://a/x", 0, 0)]).unwrap();
        assert_eq!(store.load_pending_queue("pexels").unwrap().len(), 1);
        store.clear_pending_queue("pexels").unwrap();
        assert!(store.load_pending_queue("pexels").unwrap().is_empty());
    }
}
