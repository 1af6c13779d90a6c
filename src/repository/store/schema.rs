//! Schema creation for the metadata store.

use rusqlite::Connection;

use crate::repository::Result;

pub(super) fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Discovered clips; (site, clip_id) is the identity
        CREATE TABLE IF NOT EXISTS clips (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            site TEXT NOT NULL,
            clip_id TEXT NOT NULL,
            source_url TEXT NOT NULL DEFAULT '',

            -- Discovery metadata
            title TEXT NOT NULL DEFAULT '',
            creator TEXT NOT NULL DEFAULT '',
            collection TEXT NOT NULL DEFAULT '',
            tags TEXT NOT NULL DEFAULT '',
            resolution TEXT NOT NULL DEFAULT '',
            duration TEXT NOT NULL DEFAULT '',
            frame_rate TEXT NOT NULL DEFAULT '',
            camera TEXT NOT NULL DEFAULT '',
            thumbnail_url TEXT NOT NULL DEFAULT '',

            -- Canonical format URL
            video_url TEXT NOT NULL DEFAULT '',
            quality_tier TEXT NOT NULL DEFAULT 'unknown',
            format TEXT,
            available_formats TEXT NOT NULL DEFAULT '',

            found_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,

            -- User-authored
            rating INTEGER NOT NULL DEFAULT 0,
            favorite INTEGER NOT NULL DEFAULT 0,
            notes TEXT NOT NULL DEFAULT '',
            user_tags TEXT NOT NULL DEFAULT '',

            -- Download state
            dl_status TEXT NOT NULL DEFAULT '',
            local_path TEXT,
            thumb_path TEXT,
            dl_error TEXT,
            downloaded_at TEXT,

            UNIQUE(site, clip_id)
        );

        -- Full-text index over clips; rowid = clips.id
        CREATE VIRTUAL TABLE IF NOT EXISTS clips_fts USING fts5(
            title, creator, collection, tags, resolution, camera, duration,
            tokenize = 'porter unicode61'
        );

        CREATE TABLE IF NOT EXISTS collections (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            color TEXT NOT NULL DEFAULT '#89b4fa',
            created_at TEXT NOT NULL
        );

        CREATE TABLE IF NOT EXISTS clip_collections (
            clip_pk INTEGER NOT NULL REFERENCES clips(id) ON DELETE CASCADE,
            collection_id INTEGER NOT NULL REFERENCES collections(id) ON DELETE CASCADE,
            added_at TEXT NOT NULL,
            PRIMARY KEY (clip_pk, collection_id)
        );

        CREATE TABLE IF NOT EXISTS saved_searches (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            name TEXT NOT NULL UNIQUE,
            query TEXT NOT NULL DEFAULT '',
            filters TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL
        );

        -- Append-only page visit audit
        CREATE TABLE IF NOT EXISTS crawled_pages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            url TEXT NOT NULL,
            profile TEXT NOT NULL,
            depth INTEGER NOT NULL DEFAULT 0,
            outcome TEXT NOT NULL,
            clip_count INTEGER NOT NULL DEFAULT 0,
            error TEXT,
            crawled_at TEXT NOT NULL
        );

        -- Frontier persisted between sessions for resume
        CREATE TABLE IF NOT EXISTS crawl_queue (
            profile TEXT NOT NULL,
            url TEXT NOT NULL,
            depth INTEGER NOT NULL,
            priority INTEGER NOT NULL,
            parent_url TEXT,
            added_at TEXT NOT NULL,
            PRIMARY KEY (profile, url)
        );

        CREATE TABLE IF NOT EXISTS download_tasks (
            id TEXT PRIMARY KEY,
            site TEXT NOT NULL,
            clip_id TEXT NOT NULL,
            target_path TEXT NOT NULL,
            template TEXT NOT NULL,
            state TEXT NOT NULL,
            attempts INTEGER NOT NULL DEFAULT 0,
            last_error TEXT,
            cancelled INTEGER NOT NULL DEFAULT 0,
            bytes INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            started_at TEXT,
            finished_at TEXT
        );

        CREATE INDEX IF NOT EXISTS idx_clips_found ON clips(found_at);
        CREATE INDEX IF NOT EXISTS idx_clips_site ON clips(site);
        CREATE INDEX IF NOT EXISTS idx_clips_dl_status ON clips(dl_status);
        CREATE INDEX IF NOT EXISTS idx_crawled_pages_profile_url
            ON crawled_pages(profile, url);
        CREATE INDEX IF NOT EXISTS idx_download_tasks_state ON download_tasks(state);
        CREATE INDEX IF NOT EXISTS idx_download_tasks_clip
            ON download_tasks(site, clip_id);
    "#,
    )?;
    Ok(())
}
