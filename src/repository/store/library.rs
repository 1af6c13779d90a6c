//! User library mutators: ratings, favorites, notes, user tags,
//! collections and saved searches.

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Transaction};

use super::clips::{reindex_clip, row_to_clip};
use super::MetadataStore;
use crate::models::{
    join_tags, parse_tags, Clip, ClipKey, Collection, SavedSearch, SearchFilters,
    DEFAULT_COLLECTION_COLOR,
};
use crate::repository::{parse_datetime, Result, StoreError};

fn clip_pk(tx: &Transaction<'_>, key: &ClipKey) -> Result<i64> {
    tx.query_row(
        "SELECT id FROM clips WHERE site = ? AND clip_id = ?",
        params![key.site, key.clip_id],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| StoreError::NotFound {
        entity: "clip",
        id: key.to_string(),
    })
}

fn collection_id(tx: &Transaction<'_>, name: &str) -> Result<i64> {
    tx.query_row(
        "SELECT id FROM collections WHERE name = ?",
        params![name],
        |row| row.get(0),
    )
    .optional()?
    .ok_or_else(|| StoreError::NotFound {
        entity: "collection",
        id: name.to_string(),
    })
}

impl MetadataStore {
    /// Set a 1-5 star rating; 0 clears it. Out-of-range values are clamped.
    pub fn set_rating(&self, key: &ClipKey, rating: i64) -> Result<u8> {
        let rating = rating.clamp(0, 5);
        self.write(|tx| {
            let id = clip_pk(tx, key)?;
            tx.execute(
                "UPDATE clips SET rating = ? WHERE id = ?",
                params![rating, id],
            )?;
            Ok(rating as u8)
        })
    }

    /// Flip the favorite flag, returning the new value.
    pub fn toggle_favorite(&self, key: &ClipKey) -> Result<bool> {
        self.write(|tx| {
            let id = clip_pk(tx, key)?;
            tx.execute(
                "UPDATE clips SET favorite = 1 - favorite WHERE id = ?",
                params![id],
            )?;
            let fav: i64 =
                tx.query_row("SELECT favorite FROM clips WHERE id = ?", params![id], |row| {
                    row.get(0)
                })?;
            Ok(fav != 0)
        })
    }

    pub fn set_favorite(&self, key: &ClipKey, favorite: bool) -> Result<()> {
        self.write(|tx| {
            let id = clip_pk(tx, key)?;
            tx.execute(
                "UPDATE clips SET favorite = ? WHERE id = ?",
                params![favorite as i64, id],
            )?;
            Ok(())
        })
    }

    pub fn set_notes(&self, key: &ClipKey, notes: &str) -> Result<()> {
        self.write(|tx| {
            let id = clip_pk(tx, key)?;
            tx.execute("UPDATE clips SET notes = ? WHERE id = ?", params![notes, id])?;
            Ok(())
        })
    }

    /// Replace the user tags of a clip. User tags are searchable alongside
    /// source tags, so the clip is re-indexed in the same transaction.
    pub fn set_user_tags(&self, key: &ClipKey, raw: &str) -> Result<Vec<String>> {
        let tags = parse_tags(raw);
        self.write(|tx| {
            let id = clip_pk(tx, key)?;
            tx.execute(
                "UPDATE clips SET user_tags = ? WHERE id = ?",
                params![join_tags(&tags), id],
            )?;
            reindex_clip(tx, id)?;
            Ok(())
        })?;
        Ok(tags)
    }

    // Collections

    pub fn create_collection(&self, name: &str, color: Option<&str>) -> Result<i64> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::Invalid("collection name is empty".to_string()));
        }
        let color = color.unwrap_or(DEFAULT_COLLECTION_COLOR);
        self.write(|tx| {
            tx.execute(
                "INSERT INTO collections (name, color, created_at) VALUES (?, ?, ?)",
                params![name, color, Utc::now().to_rfc3339()],
            )?;
            Ok(tx.last_insert_rowid())
        })
    }

    pub fn rename_collection(&self, name: &str, new_name: &str) -> Result<()> {
        let new_name = new_name.trim();
        if new_name.is_empty() {
            return Err(StoreError::Invalid("collection name is empty".to_string()));
        }
        self.write(|tx| {
            let id = collection_id(tx, name)?;
            tx.execute(
                "UPDATE collections SET name = ? WHERE id = ?",
                params![new_name, id],
            )?;
            Ok(())
        })
    }

    pub fn set_collection_color(&self, name: &str, color: &str) -> Result<()> {
        self.write(|tx| {
            let id = collection_id(tx, name)?;
            tx.execute(
                "UPDATE collections SET color = ? WHERE id = ?",
                params![color, id],
            )?;
            Ok(())
        })
    }

    /// Delete a collection. Member clips are untouched.
    pub fn delete_collection(&self, name: &str) -> Result<()> {
        self.write(|tx| {
            let id = collection_id(tx, name)?;
            tx.execute(
                "DELETE FROM clip_collections WHERE collection_id = ?",
                params![id],
            )?;
            tx.execute("DELETE FROM collections WHERE id = ?", params![id])?;
            Ok(())
        })
    }

    /// Add a clip to a collection. Returns false if it was already a member.
    pub fn add_to_collection(&self, name: &str, key: &ClipKey) -> Result<bool> {
        self.write(|tx| {
            let cid = collection_id(tx, name)?;
            let pk = clip_pk(tx, key)?;
            let n = tx.execute(
                "INSERT OR IGNORE INTO clip_collections (clip_pk, collection_id, added_at) VALUES (?, ?, ?)",
                params![pk, cid, Utc::now().to_rfc3339()],
            )?;
            Ok(n > 0)
        })
    }

    pub fn remove_from_collection(&self, name: &str, key: &ClipKey) -> Result<bool> {
        self.write(|tx| {
            let cid = collection_id(tx, name)?;
            let pk = clip_pk(tx, key)?;
            let n = tx.execute(
                "DELETE FROM clip_collections WHERE clip_pk = ? AND collection_id = ?",
                params![pk, cid],
            )?;
            Ok(n > 0)
        })
    }

    /// All collections with member counts, alphabetically.
    pub fn list_collections(&self) -> Result<Vec<Collection>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT c.id, c.name, c.color, c.created_at, COUNT(cc.clip_pk) AS clip_count
            FROM collections c
            LEFT JOIN clip_collections cc ON cc.collection_id = c.id
            GROUP BY c.id
            ORDER BY c.name COLLATE NOCASE
            "#,
        )?;
        let rows = stmt
            .query_map([], |row| {
                let created: String = row.get("created_at")?;
                let count: i64 = row.get("clip_count")?;
                Ok(Collection {
                    id: row.get("id")?,
                    name: row.get("name")?,
                    color: row.get("color")?,
                    clip_count: count.max(0) as u64,
                    created_at: parse_datetime(&created),
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Clips in a collection, most recently added first.
    pub fn collection_clips(&self, name: &str) -> Result<Vec<Clip>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            r#"
            SELECT clips.* FROM clips
            JOIN clip_collections cc ON cc.clip_pk = clips.id
            JOIN collections c ON c.id = cc.collection_id
            WHERE c.name = ?
            ORDER BY cc.added_at DESC, clips.id DESC
            "#,
        )?;
        let clips = stmt
            .query_map(params![name], row_to_clip)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(clips)
    }

    // Saved searches

    /// Save (or overwrite by name) a search.
    pub fn save_search(&self, name: &str, query: &str, filters: &SearchFilters) -> Result<i64> {
        let name = name.trim();
        if name.is_empty() {
            return Err(StoreError::Invalid("saved search name is empty".to_string()));
        }
        let filters_json = serde_json::to_string(filters)?;
        self.write(|tx| {
            tx.execute(
                r#"
                INSERT INTO saved_searches (name, query, filters, created_at)
                VALUES (?, ?, ?, ?)
                ON CONFLICT(name) DO UPDATE SET query = excluded.query, filters = excluded.filters
                "#,
                params![name, query, filters_json, Utc::now().to_rfc3339()],
            )?;
            let id: i64 = tx.query_row(
                "SELECT id FROM saved_searches WHERE name = ?",
                params![name],
                |row| row.get(0),
            )?;
            Ok(id)
        })
    }

    pub fn list_saved_searches(&self) -> Result<Vec<SavedSearch>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT id, name, query, filters, created_at FROM saved_searches ORDER BY name COLLATE NOCASE",
        )?;
        let rows = stmt
            .query_map([], |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(id, name, query, filters, created)| {
                Ok(SavedSearch {
                    id,
                    name,
                    query,
                    filters: serde_json::from_str(&filters)?,
                    created_at: parse_datetime(&created),
                })
            })
            .collect()
    }

    pub fn get_saved_search(&self, name: &str) -> Result<Option<SavedSearch>> {
        Ok(self
            .list_saved_searches()?
            .into_iter()
            .find(|s| s.name == name))
    }

    pub fn delete_saved_search(&self, name: &str) -> Result<bool> {
        self.write(|tx| {
            let n = tx.execute("DELETE FROM saved_searches WHERE name = ?", params![name])?;
            Ok(n > 0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::temp_store;
    use super::*;
    use crate::models::{ClipRecord, MatchMode};
    use crate::repository::ClipQuery;

    fn seed(store: &MetadataStore, id: &str, title: &str) -> ClipKey {
        let mut r = ClipRecord::new("Artlist", id);
        r.title = title.to_string();
        store.upsert_clip(&r).unwrap();
        r.key()
    }

    #[test]
    fn test_rating_is_clamped() {
        let (_dir, store) = temp_store();
        let key = seed(&store, "100", "Drone shot");
        assert_eq!(store.set_rating(&key, 9).unwrap(), 5);
        assert_eq!(store.set_rating(&key, -2).unwrap(), 0);
        store.set_rating(&key, 4).unwrap();
        assert_eq!(store.get_clip(&key).unwrap().unwrap().rating, 4);
    }

    #[test]
    fn test_favorite_toggle() {
        let (_dir, store) = temp_store();
        let key = seed(&store, "100", "Drone shot");
        assert!(store.toggle_favorite(&key).unwrap());
        assert!(!store.toggle_favorite(&key).unwrap());
    }

    #[test]
    fn test_mutators_on_missing_clip() {
        let (_dir, store) = temp_store();
        let key = ClipKey::new("Artlist", "missing");
        assert!(matches!(
            store.set_notes(&key, "x"),
            Err(StoreError::NotFound { entity: "clip", .. })
        ));
    }

    #[test]
    fn test_user_tags_are_searchable() {
        let (_dir, store) = temp_store();
        let key = seed(&store, "100", "Drone shot");
        store.set_user_tags(&key, "hero, opener").unwrap();
        let found = store.query_clips(&ClipQuery::text("opener")).unwrap();
        assert_eq!(found.len(), 1);
        store.check_search_index().unwrap();
    }

    #[test]
    fn test_collections_lifecycle() {
        let (_dir, store) = temp_store();
        let a = seed(&store, "1", "Alpha");
        let b = seed(&store, "2", "Beta");
        store.create_collection("Reel", None).unwrap();
        assert!(store.add_to_collection("Reel", &a).unwrap());
        assert!(!store.add_to_collection("Reel", &a).unwrap());
        store.add_to_collection("Reel", &b).unwrap();

        let cols = store.list_collections().unwrap();
        assert_eq!(cols.len(), 1);
        assert_eq!(cols[0].clip_count, 2);
        assert_eq!(cols[0].color, DEFAULT_COLLECTION_COLOR);

        let filtered = store
            .query_clips(&ClipQuery::default().with_filters(SearchFilters {
                collection: Some("Reel".to_string()),
                ..Default::default()
            }))
            .unwrap();
        assert_eq!(filtered.len(), 2);

        store.remove_from_collection("Reel", &a).unwrap();
        assert_eq!(store.collection_clips("Reel").unwrap().len(), 1);

        store.rename_collection("Reel", "Showreel").unwrap();
        store.delete_collection("Showreel").unwrap();
        assert!(store.list_collections().unwrap().is_empty());
        assert!(store.get_clip(&b).unwrap().is_some());
    }

    #[test]
    fn test_saved_search_crud() {
        let (_dir, store) = temp_store();
        let filters = SearchFilters {
            site: Some("Artlist".to_string()),
            match_mode: MatchMode::Any,
            ..Default::default()
        };
        store.save_search("drones", "drone aerial", &filters).unwrap();
        store.save_search("drones", "drone", &filters).unwrap();
        let all = store.list_saved_searches().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].query, "drone");
        assert_eq!(all[0].filters, filters);
        assert!(store.delete_saved_search("drones").unwrap());
        assert!(store.get_saved_search("drones").unwrap().is_none());
    }
}
