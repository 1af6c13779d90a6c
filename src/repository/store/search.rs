//! Full-text search and search-index maintenance.

use rusqlite::types::Value;
use tracing::{info, warn};

use super::clips::row_to_clip;
use super::MetadataStore;
use crate::models::{parse_duration_secs, Clip, MatchMode, SearchFilters};
use crate::repository::{Result, StoreError};

/// A search request: free text plus structured filters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ClipQuery {
    pub text: String,
    pub filters: SearchFilters,
    pub limit: Option<usize>,
}

impl ClipQuery {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_filters(mut self, filters: SearchFilters) -> Self {
        self.filters = filters;
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Build an FTS5 MATCH expression from free text.
///
/// Every term is quoted so user input cannot inject FTS syntax. In `Any`
/// mode single-character terms are dropped.
pub(crate) fn fts_expression(text: &str, mode: MatchMode) -> Option<String> {
    let terms: Vec<String> = text
        .split_whitespace()
        .map(|t| t.replace('"', ""))
        .filter(|t| !t.is_empty())
        .filter(|t| mode == MatchMode::All || t.chars().count() > 1)
        .map(|t| format!("\"{}\"", t))
        .collect();
    if terms.is_empty() {
        return None;
    }
    let joiner = match mode {
        MatchMode::All => " AND ",
        MatchMode::Any => " OR ",
    };
    Some(terms.join(joiner))
}

impl MetadataStore {
    /// Search clips. Results are ranked by relevance when there is a text
    /// query, newest first otherwise.
    pub fn query_clips(&self, query: &ClipQuery) -> Result<Vec<Clip>> {
        let filters = &query.filters;
        let fts = fts_expression(&query.text, filters.match_mode);

        let mut sql = String::from("SELECT clips.* FROM clips");
        let mut args: Vec<Value> = Vec::new();
        let mut clauses: Vec<&str> = Vec::new();

        if fts.is_some() {
            sql.push_str(" JOIN clips_fts ON clips_fts.rowid = clips.id");
        }
        if filters.collection.is_some() {
            sql.push_str(
                " JOIN clip_collections ON clip_collections.clip_pk = clips.id \
                 JOIN collections ON collections.id = clip_collections.collection_id",
            );
        }

        if let Some(expr) = &fts {
            clauses.push("clips_fts MATCH ?");
            args.push(Value::Text(expr.clone()));
        }
        if let Some(site) = &filters.site {
            clauses.push("clips.site = ? COLLATE NOCASE");
            args.push(Value::Text(site.clone()));
        }
        if let Some(resolution) = &filters.resolution {
            clauses.push("clips.resolution LIKE ?");
            args.push(Value::Text(format!("%{}%", resolution)));
        }
        if let Some(creator) = &filters.creator {
            clauses.push("clips.creator LIKE ?");
            args.push(Value::Text(format!("%{}%", creator)));
        }
        if let Some(collection) = &filters.collection {
            clauses.push("collections.name = ?");
            args.push(Value::Text(collection.clone()));
        }
        if let Some(min) = filters.min_rating {
            clauses.push("clips.rating >= ?");
            args.push(Value::Integer(i64::from(min.min(5))));
        }
        if filters.favorites_only {
            clauses.push("clips.favorite = 1");
        }
        if filters.downloaded_only {
            clauses.push("clips.dl_status = 'done'");
        }

        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        if fts.is_some() {
            sql.push_str(" ORDER BY bm25(clips_fts), clips.id");
        } else {
            sql.push_str(" ORDER BY clips.found_at DESC, clips.id DESC");
        }
        // Duration is filtered after parsing, so the limit applies afterwards.
        if filters.duration.is_none() {
            if let Some(limit) = query.limit {
                sql.push_str(&format!(" LIMIT {}", limit));
            }
        }

        let conn = self.reader()?;
        let mut stmt = conn.prepare(&sql)?;
        let mut clips = stmt
            .query_map(rusqlite::params_from_iter(args), row_to_clip)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        if let Some(range) = filters.duration {
            clips.retain(|c| {
                parse_duration_secs(&c.duration)
                    .map(|secs| range.contains(secs))
                    .unwrap_or(false)
            });
            if let Some(limit) = query.limit {
                clips.truncate(limit);
            }
        }
        Ok(clips)
    }

    /// Recompute the full-text index from the clip rows. Returns the number
    /// of indexed clips.
    pub fn rebuild_search_index(&self) -> Result<usize> {
        let count = self.write(|tx| {
            tx.execute("DELETE FROM clips_fts", [])?;
            let n = tx.execute(
                r#"
                INSERT INTO clips_fts (rowid, title, creator, collection, tags, resolution, camera, duration)
                SELECT id, title, creator, collection, trim(tags || ' ' || user_tags),
                       resolution, camera, duration
                FROM clips
                "#,
                [],
            )?;
            Ok(n)
        })?;
        info!("Rebuilt search index ({} clips)", count);
        Ok(count)
    }

    /// Verify the full-text index matches the clip rows.
    pub fn check_search_index(&self) -> Result<()> {
        let conn = self.reader()?;
        let missing: i64 = conn.query_row(
            "SELECT COUNT(*) FROM clips WHERE id NOT IN (SELECT rowid FROM clips_fts)",
            [],
            |row| row.get(0),
        )?;
        let orphaned: i64 = conn.query_row(
            "SELECT COUNT(*) FROM clips_fts WHERE rowid NOT IN (SELECT id FROM clips)",
            [],
            |row| row.get(0),
        )?;
        let stale: i64 = conn.query_row(
            r#"
            SELECT COUNT(*) FROM clips
            JOIN clips_fts ON clips_fts.rowid = clips.id
            WHERE clips_fts.title != clips.title
               OR clips_fts.creator != clips.creator
               OR clips_fts.collection != clips.collection
               OR clips_fts.tags != trim(clips.tags || ' ' || clips.user_tags)
            "#,
            [],
            |row| row.get(0),
        )?;
        if missing + orphaned + stale > 0 {
            warn!(
                "Search index drift: {} missing, {} orphaned, {} stale",
                missing, orphaned, stale
            );
            return Err(StoreError::Consistency(format!(
                "{} missing, {} orphaned, {} stale rows; run an index rebuild",
                missing, orphaned, stale
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::temp_store;
    use super::*;
    use crate::models::{ClipKey, ClipRecord, DurationRange, FormatUrl};

    fn seed(store: &MetadataStore, id: &str, title: &str, creator: &str, duration: &str) {
        let mut r = ClipRecord::new("Pexels", id);
        r.title = title.to_string();
        r.creator = creator.to_string();
        r.duration = duration.to_string();
        r.video = Some(FormatUrl::new(format!(
            "https://videos.pexels.com/video-files/{id}/{id}-hd_1920_1080_25fps.mp4"
        )));
        store.upsert_clip(&r).unwrap();
    }

    #[test]
    fn test_fts_expression_modes() {
        assert_eq!(
            fts_expression("ocean waves", MatchMode::All).as_deref(),
            Some("\"ocean\" AND \"waves\"")
        );
        assert_eq!(
            fts_expression("a ocean \"waves\"", MatchMode::Any).as_deref(),
            Some("\"ocean\" OR \"waves\"")
        );
        assert_eq!(fts_expression("  ", MatchMode::All), None);
        assert_eq!(fts_expression("a", MatchMode::Any), None);
    }

    #[test]
    fn test_and_or_search() {
        let (_dir, store) = temp_store();
        seed(&store, "1", "Ocean waves at sunset", "Jane", "00:12");
        seed(&store, "2", "Mountain sunrise", "Bob", "00:45");
        seed(&store, "3", "Ocean cliffs", "Jane", "02:10");

        let all = store.query_clips(&ClipQuery::text("ocean sunset")).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].key.clip_id, "1");

        let any = store
            .query_clips(&ClipQuery::text("sunset sunrise").with_filters(SearchFilters {
                match_mode: MatchMode::Any,
                ..Default::default()
            }))
            .unwrap();
        let mut ids: Vec<_> = any.iter().map(|c| c.key.clip_id.as_str()).collect();
        ids.sort();
        assert_eq!(ids, vec!["1", "2"]);
    }

    #[test]
    fn test_structured_filters_compose() {
        let (_dir, store) = temp_store();
        seed(&store, "1", "Ocean waves", "Jane", "00:12");
        seed(&store, "2", "Ocean cliffs", "Jane", "02:10");
        seed(&store, "3", "Ocean calm", "Bob", "02:30");

        let results = store
            .query_clips(&ClipQuery::text("ocean").with_filters(SearchFilters {
                creator: Some("Jane".to_string()),
                duration: Some(DurationRange::From1To5m),
                ..Default::default()
            }))
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].key.clip_id, "2");
    }

    #[test]
    fn test_rebuild_matches_live_index() {
        let (_dir, store) = temp_store();
        seed(&store, "1", "Ocean waves", "Jane", "00:12");
        seed(&store, "2", "City traffic", "Bob", "00:20");
        let before = store.query_clips(&ClipQuery::text("ocean")).unwrap();
        assert_eq!(store.rebuild_search_index().unwrap(), 2);
        let after = store.query_clips(&ClipQuery::text("ocean")).unwrap();
        assert_eq!(before, after);
        store.check_search_index().unwrap();
    }

    #[test]
    fn test_check_detects_drift_and_rebuild_recovers() {
        let (_dir, store) = temp_store();
        seed(&store, "1", "Ocean waves", "Jane", "00:12");
        {
            let conn = store.reader().unwrap();
            conn.execute("DELETE FROM clips_fts", []).unwrap();
        }
        assert!(matches!(
            store.check_search_index(),
            Err(StoreError::Consistency(_))
        ));
        assert!(store.query_clips(&ClipQuery::text("ocean")).unwrap().is_empty());
        store.rebuild_search_index().unwrap();
        store.check_search_index().unwrap();
        let found = store.query_clips(&ClipQuery::text("ocean")).unwrap();
        assert_eq!(found[0].key, ClipKey::new("Pexels", "1"));
    }

    #[test]
    fn test_empty_query_orders_newest_first() {
        let (_dir, store) = temp_store();
        seed(&store, "1", "First", "Jane", "");
        seed(&store, "2", "Second", "Jane", "");
        let results = store.query_clips(&ClipQuery::default().with_limit(1)).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].key.clip_id, "2");
    }
}
