//! Clip upsert with the quality-upgrade rule, plus clip lookups.

use std::collections::BTreeSet;

use chrono::Utc;
use rusqlite::{params, OptionalExtension, Row, Transaction};
use tracing::debug;

use super::{MetadataStore, TiePolicy};
use crate::models::{
    join_tags, parse_tags, Clip, ClipKey, ClipRecord, DownloadStatus, FormatUrl, QualityTier,
    VideoFormat,
};
use crate::repository::{parse_datetime, parse_datetime_opt, Result, StoreError};

/// What an upsert did to the stored clip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// New clip row.
    Inserted,
    /// Canonical video URL was set or replaced by a better one.
    Upgraded,
    /// Only empty metadata fields were filled.
    MetadataUpdated,
    /// Nothing changed (includes lower or equal-tier re-discoveries).
    Unchanged,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertResult {
    pub id: i64,
    pub outcome: UpsertOutcome,
}

/// Fields of an existing row needed to decide an upsert.
struct Current {
    id: i64,
    video_url: String,
    tier: QualityTier,
    available_formats: String,
    meta: ClipRecord,
}

impl MetadataStore {
    /// Insert a clip or merge it into the stored row.
    ///
    /// Reading the current tier, comparing, and writing happen in one
    /// transaction under the write lock. A lower-tier URL never replaces a
    /// higher-tier one; a same-tier URL follows the configured [`TiePolicy`].
    pub fn upsert_clip(&self, record: &ClipRecord) -> Result<UpsertResult> {
        if record.site.is_empty() || record.clip_id.is_empty() {
            return Err(StoreError::Invalid(format!(
                "clip needs a site and clip id (source {})",
                record.source_url
            )));
        }
        let policy = self.tie_policy;
        self.write(|tx| upsert_in_tx(tx, record, policy))
    }

    /// Look up a clip by its key.
    pub fn get_clip(&self, key: &ClipKey) -> Result<Option<Clip>> {
        let conn = self.reader()?;
        let clip = conn
            .query_row(
                "SELECT * FROM clips WHERE site = ? AND clip_id = ?",
                params![key.site, key.clip_id],
                row_to_clip,
            )
            .optional()?;
        Ok(clip)
    }

    /// Look up a clip by site-native id alone (first match across sites).
    pub fn find_clip_by_id(&self, clip_id: &str) -> Result<Option<Clip>> {
        let conn = self.reader()?;
        let clip = conn
            .query_row(
                "SELECT * FROM clips WHERE clip_id = ? ORDER BY id LIMIT 1",
                params![clip_id],
                row_to_clip,
            )
            .optional()?;
        Ok(clip)
    }

    /// Resolve `site:clip_id` or a bare clip id to a stored clip.
    pub fn resolve_clip(&self, reference: &str) -> Result<Clip> {
        let found = match reference.split_once(':') {
            Some((site, id)) if !site.contains('/') => {
                self.get_clip(&ClipKey::new(site, id))?
            }
            _ => self.find_clip_by_id(reference)?,
        };
        found.ok_or_else(|| StoreError::NotFound {
            entity: "clip",
            id: reference.to_string(),
        })
    }

    /// All clips with a video URL and no completed download.
    pub fn clips_pending_download(&self) -> Result<Vec<Clip>> {
        let conn = self.reader()?;
        let mut stmt = conn.prepare(
            "SELECT * FROM clips WHERE video_url != '' AND dl_status != 'done' ORDER BY found_at",
        )?;
        let clips = stmt
            .query_map([], row_to_clip)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(clips)
    }
}

fn upsert_in_tx(tx: &Transaction<'_>, record: &ClipRecord, policy: TiePolicy) -> Result<UpsertResult> {
    let now = Utc::now().to_rfc3339();
    let current = tx
        .query_row(
            "SELECT * FROM clips WHERE site = ? AND clip_id = ?",
            params![record.site, record.clip_id],
            |row| {
                let clip = row_to_clip(row)?;
                Ok(Current {
                    id: clip.id,
                    video_url: clip.video_url.clone(),
                    tier: clip.quality_tier,
                    available_formats: row.get("available_formats")?,
                    meta: clip_to_record(&clip),
                })
            },
        )
        .optional()?;

    let Some(current) = current else {
        let (video_url, tier, format) = match &record.video {
            Some(v) => (v.url.clone(), v.tier, v.format.map(|f| f.as_str())),
            None => (String::new(), QualityTier::Unknown, None),
        };
        let formats = record.format_labels().into_iter().collect::<Vec<_>>().join(",");
        tx.execute(
            r#"
            INSERT INTO clips (
                site, clip_id, source_url, title, creator, collection, tags,
                resolution, duration, frame_rate, camera, thumbnail_url,
                video_url, quality_tier, format, available_formats,
                found_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
            params![
                record.site,
                record.clip_id,
                record.source_url,
                record.title,
                record.creator,
                record.collection,
                join_tags(&record.tags),
                record.resolution,
                record.duration,
                record.frame_rate,
                record.camera,
                record.thumbnail_url,
                video_url,
                tier.as_str(),
                format,
                formats,
                now,
                now,
            ],
        )?;
        let id = tx.last_insert_rowid();
        reindex_clip(tx, id)?;
        debug!("Inserted clip {}:{} ({})", record.site, record.clip_id, tier);
        return Ok(UpsertResult {
            id,
            outcome: UpsertOutcome::Inserted,
        });
    };

    // Decide on the canonical video URL.
    let mut upgraded: Option<&FormatUrl> = None;
    if let Some(incoming) = &record.video {
        let replace = if current.video_url.is_empty() {
            true
        } else if incoming.url == current.video_url {
            false
        } else if incoming.tier > current.tier {
            true
        } else if incoming.tier == current.tier {
            policy == TiePolicy::LatestDiscovered
        } else {
            false
        };
        if replace {
            upgraded = Some(incoming);
        }
    }

    // Merge metadata: fill empty fields only, except resolution and frame
    // rate which follow a video upgrade.
    let mut merged = current.meta.clone();
    merged.fill_from(record);
    merged.video = current.meta.video.clone();
    if upgraded.is_some() {
        if !record.resolution.is_empty() {
            merged.resolution = record.resolution.clone();
        }
        if !record.frame_rate.is_empty() {
            merged.frame_rate = record.frame_rate.clone();
        }
    }
    let metadata_changed = merged != current.meta;

    let mut formats: BTreeSet<String> = split_formats(&current.available_formats);
    formats.extend(record.format_labels());
    let formats = formats.into_iter().collect::<Vec<_>>().join(",");

    if let Some(video) = upgraded {
        tx.execute(
            r#"
            UPDATE clips SET video_url = ?, quality_tier = ?, format = ?, updated_at = ?
            WHERE id = ?
            "#,
            params![
                video.url,
                video.tier.as_str(),
                video.format.map(|f| f.as_str()),
                now,
                current.id
            ],
        )?;
        debug!(
            "Upgraded clip {}:{} {} -> {}",
            record.site, record.clip_id, current.tier, video.tier
        );
    }

    if metadata_changed {
        tx.execute(
            r#"
            UPDATE clips SET
                source_url = ?, title = ?, creator = ?, collection = ?, tags = ?,
                resolution = ?, duration = ?, frame_rate = ?, camera = ?,
                thumbnail_url = ?, updated_at = ?
            WHERE id = ?
            "#,
            params![
                merged.source_url,
                merged.title,
                merged.creator,
                merged.collection,
                join_tags(&merged.tags),
                merged.resolution,
                merged.duration,
                merged.frame_rate,
                merged.camera,
                merged.thumbnail_url,
                now,
                current.id
            ],
        )?;
        reindex_clip(tx, current.id)?;
    }

    if formats != current.available_formats {
        tx.execute(
            "UPDATE clips SET available_formats = ? WHERE id = ?",
            params![formats, current.id],
        )?;
    }

    let outcome = if upgraded.is_some() {
        UpsertOutcome::Upgraded
    } else if metadata_changed {
        UpsertOutcome::MetadataUpdated
    } else {
        UpsertOutcome::Unchanged
    };
    Ok(UpsertResult {
        id: current.id,
        outcome,
    })
}

/// Replace the full-text row of one clip from its primary row.
pub(super) fn reindex_clip(tx: &Transaction<'_>, id: i64) -> Result<()> {
    tx.execute("DELETE FROM clips_fts WHERE rowid = ?", params![id])?;
    tx.execute(
        r#"
        INSERT INTO clips_fts (rowid, title, creator, collection, tags, resolution, camera, duration)
        SELECT id, title, creator, collection, trim(tags || ' ' || user_tags),
               resolution, camera, duration
        FROM clips WHERE id = ?
        "#,
        params![id],
    )?;
    Ok(())
}

fn split_formats(raw: &str) -> BTreeSet<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Project the discovery fields of a stored clip back into a record.
fn clip_to_record(clip: &Clip) -> ClipRecord {
    ClipRecord {
        site: clip.key.site.clone(),
        clip_id: clip.key.clip_id.clone(),
        source_url: clip.source_url.clone(),
        title: clip.title.clone(),
        creator: clip.creator.clone(),
        collection: clip.collection.clone(),
        tags: clip.tags.clone(),
        resolution: clip.resolution.clone(),
        duration: clip.duration.clone(),
        frame_rate: clip.frame_rate.clone(),
        camera: clip.camera.clone(),
        thumbnail_url: clip.thumbnail_url.clone(),
        video: clip.canonical_format(),
        seen_tiers: BTreeSet::new(),
    }
}

/// Map a `SELECT * FROM clips` row.
pub(crate) fn row_to_clip(row: &Row<'_>) -> rusqlite::Result<Clip> {
    let tier: String = row.get("quality_tier")?;
    let format: Option<String> = row.get("format")?;
    let formats: String = row.get("available_formats")?;
    let tags: String = row.get("tags")?;
    let user_tags: String = row.get("user_tags")?;
    let dl_status: String = row.get("dl_status")?;
    let found_at: String = row.get("found_at")?;
    let updated_at: String = row.get("updated_at")?;
    let rating: i64 = row.get("rating")?;

    Ok(Clip {
        id: row.get("id")?,
        key: ClipKey::new(row.get::<_, String>("site")?, row.get::<_, String>("clip_id")?),
        source_url: row.get("source_url")?,
        title: row.get("title")?,
        creator: row.get("creator")?,
        collection: row.get("collection")?,
        tags: parse_tags(&tags),
        resolution: row.get("resolution")?,
        duration: row.get("duration")?,
        frame_rate: row.get("frame_rate")?,
        camera: row.get("camera")?,
        thumbnail_url: row.get("thumbnail_url")?,
        video_url: row.get("video_url")?,
        quality_tier: QualityTier::from_str(&tier).unwrap_or_default(),
        format: format.as_deref().and_then(VideoFormat::from_str),
        available_formats: split_formats(&formats),
        found_at: parse_datetime(&found_at),
        updated_at: parse_datetime(&updated_at),
        rating: rating.clamp(0, 5) as u8,
        favorite: row.get::<_, i64>("favorite")? != 0,
        notes: row.get("notes")?,
        user_tags: parse_tags(&user_tags),
        dl_status: DownloadStatus::from_str(&dl_status).unwrap_or_default(),
        local_path: row.get("local_path")?,
        thumb_path: row.get("thumb_path")?,
        dl_error: row.get("dl_error")?,
        downloaded_at: parse_datetime_opt(row.get("downloaded_at")?),
    })
}

#[cfg(test)]
mod tests {
    use super::super::test_support::temp_store;
    use super::*;

    fn record(id: &str, url: &str) -> ClipRecord {
        let mut r = ClipRecord::new("Pexels", id);
        r.source_url = format!("https://www.pexels.com/video/clip-{}/", id);
        r.video = Some(FormatUrl::new(url));
        r
    }

    const SD: &str = "https://videos.pexels.com/video-files/1/1-sd_640_360_25fps.mp4";
    const HD: &str = "https://videos.pexels.com/video-files/1/1-hd_1920_1080_25fps.mp4";
    const UHD: &str = "https://videos.pexels.com/video-files/1/1-uhd_3840_2160_25fps.mp4";

    #[test]
    fn test_insert_then_upgrade() {
        let (_dir, store) = temp_store();
        let first = store.upsert_clip(&record("1", SD)).unwrap();
        assert_eq!(first.outcome, UpsertOutcome::Inserted);

        let second = store.upsert_clip(&record("1", UHD)).unwrap();
        assert_eq!(second.outcome, UpsertOutcome::Upgraded);
        assert_eq!(second.id, first.id);

        let clip = store.get_clip(&ClipKey::new("Pexels", "1")).unwrap().unwrap();
        assert_eq!(clip.video_url, UHD);
        assert_eq!(clip.quality_tier, QualityTier::Uhd);
        assert!(clip.available_formats.contains("SD"));
        assert!(clip.available_formats.contains("UHD"));
    }

    #[test]
    fn test_lower_tier_is_noop() {
        let (_dir, store) = temp_store();
        store.upsert_clip(&record("1", UHD)).unwrap();
        let result = store.upsert_clip(&record("1", HD)).unwrap();
        assert_eq!(result.outcome, UpsertOutcome::Unchanged);
        let clip = store.get_clip(&ClipKey::new("Pexels", "1")).unwrap().unwrap();
        assert_eq!(clip.video_url, UHD);
    }

    #[test]
    fn test_same_tier_first_discovered_wins() {
        let (_dir, store) = temp_store();
        let mirror = "https://mirror.example.com/video-files/1/1-hd_1920_1080_30fps.mp4";
        store.upsert_clip(&record("1", HD)).unwrap();
        let result = store.upsert_clip(&record("1", mirror)).unwrap();
        assert_eq!(result.outcome, UpsertOutcome::Unchanged);
        let clip = store.get_clip(&ClipKey::new("Pexels", "1")).unwrap().unwrap();
        assert_eq!(clip.video_url, HD);
    }

    #[test]
    fn test_same_tier_latest_policy_replaces() {
        let dir = tempfile::TempDir::new().unwrap();
        let store = MetadataStore::open_with_policy(
            &dir.path().join("clips.db"),
            TiePolicy::LatestDiscovered,
        )
        .unwrap();
        let mirror = "https://mirror.example.com/video-files/1/1-hd_1920_1080_30fps.mp4";
        store.upsert_clip(&record("1", HD)).unwrap();
        let result = store.upsert_clip(&record("1", mirror)).unwrap();
        assert_eq!(result.outcome, UpsertOutcome::Upgraded);
    }

    #[test]
    fn test_metadata_fills_empty_fields_only() {
        let (_dir, store) = temp_store();
        let mut a = record("1", HD);
        a.title = "Ocean Waves".to_string();
        store.upsert_clip(&a).unwrap();

        let mut b = ClipRecord::new("Pexels", "1");
        b.title = "Different".to_string();
        b.creator = "Jane Doe".to_string();
        let result = store.upsert_clip(&b).unwrap();
        assert_eq!(result.outcome, UpsertOutcome::MetadataUpdated);

        let clip = store.get_clip(&ClipKey::new("Pexels", "1")).unwrap().unwrap();
        assert_eq!(clip.title, "Ocean Waves");
        assert_eq!(clip.creator, "Jane Doe");
        assert_eq!(clip.video_url, HD);
    }

    #[test]
    fn test_upgrade_replaces_resolution() {
        let (_dir, store) = temp_store();
        let mut a = record("1", SD);
        a.resolution = "640x360".to_string();
        store.upsert_clip(&a).unwrap();
        let mut b = record("1", UHD);
        b.resolution = "3840x2160".to_string();
        store.upsert_clip(&b).unwrap();
        let clip = store.get_clip(&ClipKey::new("Pexels", "1")).unwrap().unwrap();
        assert_eq!(clip.resolution, "3840x2160");
    }

    #[test]
    fn test_rejects_missing_identity() {
        let (_dir, store) = temp_store();
        let err = store.upsert_clip(&ClipRecord::new("Pexels", "")).unwrap_err();
        assert!(matches!(err, StoreError::Invalid(_)));
    }

    #[test]
    fn test_resolve_clip_by_reference() {
        let (_dir, store) = temp_store();
        store.upsert_clip(&record("77", HD)).unwrap();
        assert_eq!(store.resolve_clip("Pexels:77").unwrap().key.clip_id, "77");
        assert_eq!(store.resolve_clip("77").unwrap().key.site, "Pexels");
        assert!(matches!(
            store.resolve_clip("nope"),
            Err(StoreError::NotFound { .. })
        ));
    }
}
